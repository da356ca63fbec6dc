use std::fmt;
use webdav_store::RemoteError;

/// Central error type of the sync engine
#[derive(Debug)]
pub enum SyncError {
    /// Local record store error (rusqlite)
    Database(rusqlite::Error),
    /// Remote store error (WebDAV transport)
    Remote(RemoteError),
    /// JSON (de)serialization error
    Serialization(serde_json::Error),
    /// Invalid or unreadable configuration
    Config(String),
    /// Validation error (e.g. sync disabled, unknown category)
    Validation(String),
    /// Resource not found
    NotFound(String),
    /// General error
    Other(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncError::Database(e) => write!(f, "Database error: {}", e),
            SyncError::Remote(e) => write!(f, "Remote error: {}", e),
            SyncError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SyncError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SyncError::Validation(msg) => write!(f, "Validation error: {}", msg),
            SyncError::NotFound(msg) => write!(f, "Not found: {}", msg),
            SyncError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Database(e) => Some(e),
            SyncError::Remote(e) => Some(e),
            SyncError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

// Conversions from other error types
impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Database(e)
    }
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        SyncError::Remote(e)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e)
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(e: toml::de::Error) -> Self {
        SyncError::Config(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Other(format!("IO error: {}", e))
    }
}

impl SyncError {
    /// True for a SQLite UNIQUE / PRIMARY KEY violation
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            SyncError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }

    /// Short message suitable for a status line
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Database(_) => "A database error occurred. Please try again.".to_string(),
            SyncError::Remote(RemoteError::Unauthorized(_)) => {
                "The server rejected the credentials. Please check username and password."
                    .to_string()
            }
            SyncError::Remote(_) => {
                "The sync server could not be reached. Please check the URL and network."
                    .to_string()
            }
            SyncError::Serialization(_) => "Remote sync data is malformed.".to_string(),
            SyncError::Config(msg) => format!("Sync is not configured correctly: {}", msg),
            SyncError::Validation(msg) => msg.clone(),
            SyncError::NotFound(msg) => format!("{} was not found.", msg),
            SyncError::Other(msg) => msg.clone(),
        }
    }
}
