use thiserror::Error;

/// Every failure the simulation can raise. None of them are retried: setup
/// errors stop startup, validation errors abort the frame being recorded.
#[derive(Error, Debug)]
pub enum SimError {
    /// Misuse of a layout or an impossible static configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing packed value or missing kernel resource. Raised before any
    /// GPU submission for the current frame.
    #[error("validation error: {0}")]
    Validation(String),

    /// Adapter, device or kernel compilation failure at startup.
    #[error("platform error: {0}")]
    Platform(String),

    #[error("failed to read scene: {0}")]
    SceneIo(#[from] std::io::Error),

    #[error("failed to parse scene: {0}")]
    SceneParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
