use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("entity {entity} reported unusable state '{state}'")]
    InvalidState { entity: String, state: String },

    #[error("platform returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{source_name} returned status {status}: {message}")]
    Status {
        source_name: &'static str,
        status: u16,
        message: String,
    },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("missing data: {0}")]
    Missing(String),
}
