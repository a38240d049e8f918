use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Fewer candles than an evaluation requires. A normal "no evaluation
    /// possible" condition, not something callers should crash on.
    #[error("insufficient data: have {have} candles, need {need}")]
    InsufficientData { have: usize, need: usize },

    /// No market-data provider could serve the request.
    #[error("provider error: {0}")]
    Provider(String),

    /// A second outcome write was attempted for a signal that already has
    /// one. Recovered locally by forcing the terminal state.
    #[error("outcome already recorded for signal {0}")]
    OutcomeConflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
