use thiserror::Error;

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// HTTP-ответ со статусом >= 400, сообщение извлечено из тела
    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    /// Сетевой сбой до получения ответа (DNS, TCP, TLS, таймаут)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Remote job failed: {0}")]
    JobFailed(String),

    #[error("Gave up waiting for {job} after {attempts} attempts")]
    PollExhausted { job: String, attempts: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Custom(String),
}

impl ConnectorError {
    pub fn api(code: u16, message: impl Into<String>) -> Self {
        ConnectorError::Api {
            code,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ConnectorError::Config(message.into())
    }

    /// Успешный ответ без поля, нужного дальше по сценарию
    pub fn unexpected(message: impl Into<String>) -> Self {
        ConnectorError::UnexpectedResponse(message.into())
    }

    /// HTTP-код для классифицированных ошибок API
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ConnectorError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectorError::Transport(e) if e.is_timeout())
    }
}

impl From<String> for ConnectorError {
    fn from(s: String) -> Self {
        ConnectorError::Custom(s)
    }
}

impl From<&str> for ConnectorError {
    fn from(s: &str) -> Self {
        ConnectorError::Custom(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_exposes_status_code() {
        let err = ConnectorError::api(429, "Too Many Requests");
        assert_eq!(err.status_code(), Some(429));
        assert_eq!(err.to_string(), "API error (429): Too Many Requests");
    }

    #[test]
    fn constructors_pick_the_variant() {
        let config = ConnectorError::config("page_id is required");
        assert!(matches!(config, ConnectorError::Config(ref m) if m == "page_id is required"));

        let unexpected = ConnectorError::unexpected("No id");
        assert!(matches!(unexpected, ConnectorError::UnexpectedResponse(ref m) if m == "No id"));
    }

    #[test]
    fn non_api_errors_have_no_status() {
        let err: ConnectorError = "boom".into();
        assert_eq!(err.status_code(), None);
        assert!(!err.is_timeout());
    }
}
