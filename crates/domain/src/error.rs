/// Shared error type used across all experience-server crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session busy: {0}")]
    SessionBusy(String),

    #[error("reconnect failed: {0}")]
    Reconnect(String),

    #[error("bundle load failed: {0}")]
    BundleLoad(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("csrf: {0}")]
    Csrf(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
