use serde::Serialize;

use crate::ast::Action;
use crate::catalog::CatalogError;
use crate::store::StoreError;

/// The only failures a resolution reports. Hidden rows and fields are not
/// errors; they are filtered out silently.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Table not found: {0}")]
    NotFound(String),
    #[error("Forbidden: no {action} permission on {table}")]
    Forbidden { table: String, action: Action },
    #[error("Schema error: {0}")]
    Schema(#[from] CatalogError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ResolveError {
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Forbidden { .. } => 403,
            Self::Schema(_) | Self::Store(_) => 500,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            status: self.status(),
            error: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: String,
}
