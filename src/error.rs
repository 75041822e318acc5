use thiserror::Error;

#[derive(Error, Debug)]
pub enum FfrunError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Device not supported: {0}")]
    NotSupported(String),

    #[error("FFmpeg binary has not been loaded")]
    NotLoaded,

    #[error("A command is already running")]
    AlreadyRunning,

    #[error("Command is empty")]
    EmptyCommand,

    #[error("Failed to launch ffmpeg: {0}")]
    Spawn(String),
}

pub type Result<T> = std::result::Result<T, FfrunError>;
