//! OpenAI Realtime GA API client: ephemeral client secrets and WebRTC SDP
//! exchange, the two outbound calls the voice app's `GET /session` and
//! `POST /sdp` handlers make.
//!
//! Grounded verbatim on `original_source/.../voice/realtime.py`'s two
//! functions (`create_client_secret`, `exchange_sdp`), translated from
//! `httpx.AsyncClient` to `reqwest::Client`.

use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use xp_domain::{Error, Result};

const OPENAI_REALTIME_BASE: &str = "https://api.openai.com/v1/realtime";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub model: String,
    pub voice: String,
    pub instructions: String,
    pub tools: Vec<Value>,
    pub openai_api_key: String,
}

#[derive(Serialize)]
struct ClientSecretSession<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    model: &'a str,
    instructions: &'a str,
    tools: &'a [Value],
}

/// POST `/v1/realtime/client_secrets`; returns the ephemeral token string
/// from the response's `value` field. Note: `voice`, `turn_detection`,
/// `modalities`, and `input_audio_transcription` are not accepted at
/// session-creation time — transcription config is sent by the client via
/// `session.update` after the data channel opens.
pub async fn create_client_secret(client: &reqwest::Client, config: &VoiceConfig) -> Result<String> {
    let payload = json!({
        "session": ClientSecretSession {
            kind: "realtime",
            model: &config.model,
            instructions: &config.instructions,
            tools: &config.tools,
        }
    });

    let resp = client
        .post(format!("{OPENAI_REALTIME_BASE}/client_secrets"))
        .bearer_auth(&config.openai_api_key)
        .timeout(REQUEST_TIMEOUT)
        .json(&payload)
        .send()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Http(format!("client_secrets failed ({status}): {body}")));
    }

    let data: Value = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
    data.get("value")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::Http("client_secrets response missing 'value'".into()))
}

/// POST `/v1/realtime/calls`; exchanges a WebRTC SDP offer for an answer,
/// authenticated with the ephemeral token returned by
/// `create_client_secret`. Returns the raw SDP answer body.
pub async fn exchange_sdp(
    client: &reqwest::Client,
    sdp_offer: &str,
    ephemeral_token: &str,
    model: &str,
) -> Result<String> {
    let resp = client
        .post(format!("{OPENAI_REALTIME_BASE}/calls"))
        .query(&[("model", model)])
        .bearer_auth(ephemeral_token)
        .header("Content-Type", "application/sdp")
        .timeout(REQUEST_TIMEOUT)
        .body(sdp_offer.to_owned())
        .send()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Http(format!("sdp exchange failed ({status}): {body}")));
    }

    resp.text().await.map_err(|e| Error::Http(e.to_string()))
}
