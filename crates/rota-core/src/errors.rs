/// Core error type.
///
/// Adapter crates map their transport errors into `External` so the core can
/// treat every failure path the same way: log it and degrade capacity.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("not cached: {0}")]
    NotCached(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
