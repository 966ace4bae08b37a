use thiserror::Error;

pub type TrainingServiceResult<T> = Result<T, TrainingServiceError>;

#[derive(Error, Debug)]
pub enum TrainingServiceError {
    #[error("Training service request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Cannot connect to the training service: {0}")]
    Connection(String),

    #[error("Training service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected training service response: {0}")]
    InvalidResponse(String),

    #[error("Model training could not be started: {0}")]
    StartFailed(#[source] Box<TrainingServiceError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrainingServiceError {
    /// HTTP status of an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            TrainingServiceError::Api { status, .. } => Some(*status),
            TrainingServiceError::StartFailed(inner) => inner.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|status| status >= 500)
    }

    /// Normalize an error response body: the first structured error message
    /// when the body carries one, the raw body otherwise
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|json| {
                json.get("errors")?
                    .as_array()?
                    .first()?
                    .get("message")?
                    .as_str()
                    .map(str::to_string)
            })
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| body.trim().to_string());
        TrainingServiceError::Api { status, message }
    }
}
