use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Map a ureq failure to a remote error, keeping the status code when there is one.
pub(crate) fn remote(context: &str, err: ureq::Error) -> Error {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            Error::Remote(format!("{context}: HTTP {code}: {}", body.trim()))
        }
        ureq::Error::Transport(t) => Error::Remote(format!("{context}: {t}")),
    }
}
