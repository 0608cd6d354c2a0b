use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("Mode store error: {0}")]
    ModeStore(String),
}

impl ApiError {
    pub fn mode_store(msg: impl Into<String>) -> Self {
        Self::ModeStore(msg.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
