use thiserror::Error;

/// Failures while loading, checking or rendering [`Settings`](crate::Settings).
#[derive(Debug, Error)]
pub enum MedchatError {
    /// A source could not be read or merged
    #[error("Failed to load settings: {0}")]
    Load(#[from] ::config::ConfigError),

    /// Loaded, but a value is out of range or unknown
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to render settings: {0}")]
    Render(#[from] toml::ser::Error),
}
