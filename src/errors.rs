use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeskDriverError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model provider error: {0}")]
    Provider(String),

    #[error("Screen capture error: {0}")]
    Screen(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Decode error: {0}")]
    Decode(#[from] crate::decode::DecodeError),

    #[error("Coordinate error: {0}")]
    Coordinate(#[from] crate::coords::CoordinateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type DeskDriverResult<T> = Result<T, DeskDriverError>;
