use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("data unavailable from '{source_id}': {reason}")]
    DataUnavailable { source_id: String, reason: String },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("failed to render: {0}")]
    Render(String),
}

impl DashboardError {
    pub fn unavailable(source_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        DashboardError::DataUnavailable {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!(%message, "rejected input");
        DashboardError::Validation(message)
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
