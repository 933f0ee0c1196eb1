use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudcronError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CloudcronError {
    /// Short error code string used in structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            CloudcronError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudcronError>;
