use crate::db::errors::DbError;
use thiserror::Error as ThisError;

/// Errors raised while billing a usage batch or talking to the broker.
///
/// Every variant is classified by [`Error::is_retryable`], which decides whether the inbound
/// message is negatively acknowledged for redelivery or terminated.
#[derive(ThisError, Debug)]
pub enum Error {
    /// No price is configured for the model (token, image or video)
    #[error("Price not found for model {model}{}", .detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    MissingPrice { model: String, detail: Option<String> },

    /// The caller has no wallet row yet
    #[error("User wallet not found: {user_id}")]
    WalletNotFound { user_id: i64 },

    /// The conditional balance update matched no rows
    #[error("Failed to update balance for user {user_id}, cost: {cost}")]
    BalanceConflict { user_id: i64, cost: i64 },

    /// The caller field could not be parsed into a user id
    #[error("Invalid caller '{caller}': expected a numeric user id")]
    InvalidCaller { caller: String },

    /// A charge or balance fell outside the representable range
    #[error("Amount overflow while computing {operation}")]
    Overflow { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Broker connectivity or publish error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Payload could not be encoded or decoded
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether redelivering the message could succeed.
    ///
    /// Missing prices, unparseable callers and overflowing amounts are data problems that will not resolve inside the
    /// redelivery window, so they are permanent. Missing wallets, write conflicts and
    /// connectivity problems are retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::MissingPrice { .. } | Error::InvalidCaller { .. } | Error::Overflow { .. } | Error::Serialization(_) => false,
            Error::WalletNotFound { .. } | Error::BalanceConflict { .. } | Error::Transport(_) => true,
            Error::Database(db_err) => !matches!(
                db_err,
                DbError::UniqueViolation { .. } | DbError::ForeignKeyViolation { .. }
            ),
            Error::Internal { .. } | Error::Other(_) => true,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(DbError::from(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
