use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ExamError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl ExamError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ExamError::InvalidInput(message.into())
    }

    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ExamError::InvalidInput(_) => "bad_params",
            ExamError::NotFound(_) => "not_found",
            ExamError::Db(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            ExamError::Db(e) => Some(json!({ "source": format!("{e:?}") })),
            _ => None,
        }
    }
}

pub type ExamResult<T> = Result<T, ExamError>;
