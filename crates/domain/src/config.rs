//! Top-level configuration and startup validation.
//!
//! Mirrors the teacher's `Config` / `ConfigError` / `validate()` shape:
//! nested `#[serde(default)]` sub-configs loaded from TOML, validated once
//! at startup, with the validation checks doubling as the payload for
//! `GET /api/status`.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    /// Conventional root holding `projects/<project_id>/sessions/<id>/…`.
    /// Overridable by the `EXPERIENCE_RUNTIME_HOME` environment variable.
    #[serde(default = "d_runtime_home")]
    pub runtime_home: PathBuf,
    /// Root holding `index.json` and `<id>/{conversation.json,transcript.jsonl}`.
    #[serde(default = "d_voice_sessions_root")]
    pub voice_sessions_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            voice: VoiceConfig::default(),
            runtime_home: d_runtime_home(),
            voice_sessions_root: d_voice_sessions_root(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults if the file is
    /// absent. Environment overrides (`EXPERIENCE_RUNTIME_HOME`,
    /// `EXPERIENCE_API_TOKEN`) are applied after the file is parsed, so env
    /// always wins over the file — matching the spec's "env-first" rule
    /// for credential resolution.
    pub fn load(path: Option<&std::path::Path>) -> crate::error::Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw).map_err(|e| crate::error::Error::Config(e.to_string()))?
            }
            _ => Config::default(),
        };

        if let Ok(home) = std::env::var("EXPERIENCE_RUNTIME_HOME") {
            config.runtime_home = PathBuf::from(home);
        }

        Ok(config)
    }

    /// Run every startup validation check. Never panics; always returns the
    /// full list of issues so the caller can decide how to react (fail hard
    /// vs. surface as `/api/status` warnings).
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        if self.server.host.trim().is_empty() {
            issues.push(ConfigError {
                field: "server.host".into(),
                message: "host must not be empty".into(),
                severity: ConfigSeverity::Error,
            });
        }
        if self.server.port == 0 {
            issues.push(ConfigError {
                field: "server.port".into(),
                message: "port must be nonzero".into(),
                severity: ConfigSeverity::Error,
            });
        }

        for origin in &self.server.cors.allowed_origins {
            if origin != "*" && !origin.starts_with("http://") && !origin.starts_with("https://") {
                issues.push(ConfigError {
                    field: "server.cors.allowed_origins".into(),
                    message: format!("origin '{origin}' is missing a scheme"),
                    severity: ConfigSeverity::Warning,
                });
            }
            if origin == "*" {
                issues.push(ConfigError {
                    field: "server.cors.allowed_origins".into(),
                    message: "wildcard CORS origin allows any site to call the API".into(),
                    severity: ConfigSeverity::Warning,
                });
            }
        }

        if resolve_api_token(&self.server.api_token_env).is_none() {
            issues.push(ConfigError {
                field: "server.api_token_env".into(),
                message: format!(
                    "{} is unset; the server is running in open (dev) mode",
                    self.server.api_token_env
                ),
                severity: ConfigSeverity::Warning,
            });
        }

        if resolve_api_token("OPENAI_API_KEY").is_none() {
            issues.push(ConfigError {
                field: "voice".into(),
                message: "OPENAI_API_KEY is unset; voice features are unconfigured".into(),
                severity: ConfigSeverity::Warning,
            });
        }

        if !self.runtime_home.is_absolute() {
            issues.push(ConfigError {
                field: "runtime_home".into(),
                message: "runtime_home should be an absolute path".into(),
                severity: ConfigSeverity::Warning,
            });
        }

        issues
    }
}

/// Resolve a secret from the environment first, falling back to a
/// `keys.env`-style file only if the environment is silent. Env wins, per
/// the spec's explicit "preserve this order" note.
pub fn resolve_api_token(env_var: &str) -> Option<String> {
    if let Ok(v) = std::env::var(env_var) {
        if !v.trim().is_empty() {
            return Some(v);
        }
    }
    read_keys_file(&d_runtime_home().join("keys.env")).and_then(|kv| kv.get(env_var).cloned())
}

/// Parses `KEY=VALUE` lines, skipping blank lines and `#` comments, and
/// stripping one layer of surrounding single/double quotes from the value.
fn read_keys_file(path: &std::path::Path) -> Option<std::collections::HashMap<String, String>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let mut map = std::collections::HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else { continue };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        map.insert(key.trim().to_owned(), value.to_owned());
    }
    Some(map)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Name of the environment variable holding the bearer API token.
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            api_token_env: d_api_token_env(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Voice
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "d_voice_model")]
    pub model: String,
    #[serde(default = "d_voice_voice")]
    pub voice: String,
    #[serde(default = "d_assistant_name")]
    pub assistant_name: String,
    #[serde(default = "d_suppression_list")]
    pub suppression_list: Vec<String>,
    #[serde(default = "d_safe_tools")]
    pub safe_tools: Vec<String>,
    #[serde(default = "d_dangerous_tools")]
    pub dangerous_tools: Vec<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            model: d_voice_model(),
            voice: d_voice_voice(),
            assistant_name: d_assistant_name(),
            suppression_list: d_suppression_list(),
            safe_tools: d_safe_tools(),
            dangerous_tools: d_dangerous_tools(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSeverity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for ConfigSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSeverity::Info => write!(f, "info"),
            ConfigSeverity::Warning => write!(f, "warning"),
            ConfigSeverity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigError {
    pub field: String,
    pub message: String,
    pub severity: ConfigSeverity,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.field, self.message)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    3210
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_api_token_env() -> String {
    "EXPERIENCE_API_TOKEN".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_runtime_home() -> PathBuf {
    std::env::var("EXPERIENCE_RUNTIME_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs_home().join(".experience-server")
        })
}
fn d_voice_sessions_root() -> PathBuf {
    d_runtime_home().join("voice-sessions")
}
fn d_voice_model() -> String {
    "gpt-realtime".into()
}
fn d_voice_voice() -> String {
    "alloy".into()
}
fn d_assistant_name() -> String {
    "Assistant".into()
}
fn d_suppression_list() -> Vec<String> {
    vec!["debug:".into(), "trace:".into(), "[internal]".into()]
}
fn d_safe_tools() -> Vec<String> {
    vec!["read_file".into(), "list_files".into(), "search".into()]
}
fn d_dangerous_tools() -> Vec<String> {
    vec![
        "bash".into(),
        "execute".into(),
        "write_file".into(),
        "delete_file".into(),
        "git_push".into(),
        "git_commit".into(),
    ]
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::default()
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|i| i.field == field)
    }

    #[test]
    fn default_config_validates_with_only_warnings() {
        let issues = valid_config().validate();
        assert!(issues.iter().all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn empty_host_is_an_error() {
        let mut config = valid_config();
        config.server.host = "".into();
        let issues = config.validate();
        let issue = find_issue(&issues, "server.host").expect("expected host issue");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut config = valid_config();
        config.server.port = 0;
        let issues = config.validate();
        assert_eq!(
            find_issue(&issues, "server.port").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn wildcard_cors_is_a_warning_not_an_error() {
        let mut config = valid_config();
        config.server.cors.allowed_origins = vec!["*".into()];
        let issues = config.validate();
        let issue = find_issue(&issues, "server.cors.allowed_origins").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn missing_api_token_env_is_a_warning() {
        std::env::remove_var("EXPERIENCE_API_TOKEN");
        let issues = valid_config().validate();
        assert!(find_issue(&issues, "server.api_token_env").is_some());
    }

    #[test]
    fn config_error_display_matches_bracket_format() {
        let err = ConfigError {
            field: "server.port".into(),
            message: "port must be nonzero".into(),
            severity: ConfigSeverity::Error,
        };
        assert_eq!(err.to_string(), "[error] server.port: port must be nonzero");
    }

    #[test]
    fn resolve_api_token_prefers_env() {
        std::env::set_var("XP_TEST_TOKEN_VAR", "secret-value");
        assert_eq!(
            resolve_api_token("XP_TEST_TOKEN_VAR"),
            Some("secret-value".into())
        );
        std::env::remove_var("XP_TEST_TOKEN_VAR");
    }

    #[test]
    fn resolve_api_token_none_when_unset() {
        std::env::remove_var("XP_TEST_TOKEN_ABSENT");
        assert_eq!(resolve_api_token("XP_TEST_TOKEN_ABSENT"), None);
    }

    #[test]
    fn resolve_api_token_falls_back_to_keys_file() {
        std::env::remove_var("XP_TEST_TOKEN_FILE");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keys.env"), "# comment\nXP_TEST_TOKEN_FILE=\"from-file\"\n").unwrap();
        std::env::set_var("EXPERIENCE_RUNTIME_HOME", dir.path());
        assert_eq!(resolve_api_token("XP_TEST_TOKEN_FILE"), Some("from-file".into()));
        std::env::remove_var("EXPERIENCE_RUNTIME_HOME");
    }
}
