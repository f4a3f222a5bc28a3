use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("conflict")]
    Conflict,
}

impl DomainError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::AccessDenied(message.into())
    }
}
