use serde_json::json;
use thiserror::Error;

/// Business-rule failures raised by the services. The IPC layer maps each
/// variant to an error code plus the HTTP status a REST facade would use.
#[derive(Debug, Error)]
pub enum SchoolError {
    #[error("{message}")]
    Validation {
        field: Option<&'static str>,
        message: String,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Permission(String),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type SchoolResult<T> = Result<T, SchoolError>;

impl SchoolError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            field: None,
            message: message.into(),
        }
    }

    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::Permission(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_failed",
            Self::NotFound(_) => "not_found",
            Self::Permission(_) => "permission_denied",
            Self::Db(_) => "db_query_failed",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::NotFound(_) => 404,
            Self::Permission(_) => 403,
            Self::Db(_) => 500,
        }
    }

    pub fn details(&self) -> serde_json::Value {
        match self {
            Self::Validation {
                field: Some(field),
                message,
            } => json!({
                "status": self.status(),
                "fields": { *field: [message] }
            }),
            _ => json!({ "status": self.status() }),
        }
    }
}
