/// Domain-specific error types for booktrack
///
/// Carries enough context (field names, entity kinds) for API clients and
/// MCP agents to correct a bad request.

#[derive(Debug, thiserror::Error)]
pub enum BooksError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("{entity} not found: {id}")]
    NotFound {
        entity: &'static str,
        id: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("ISBN lookup error: {0}")]
    Lookup(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BooksError {
    fn from(e: sqlx::Error) -> Self {
        BooksError::Storage(e.to_string())
    }
}

impl BooksError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use booktrack::errors::BooksError;
    /// let err = BooksError::validation("Title", "Title cannot be empty");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        BooksError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BooksError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
