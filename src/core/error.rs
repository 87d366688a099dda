//! Error types for schema mutations

use crate::core::schema::{ConnectionId, TableId};
use crate::core::validation::ValidationReport;

/// Coarse classification used when surfacing an error to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad name, type or shape; the mutation was aborted
    Validation,
    /// Something refers to a table, field or connection that does not exist
    Referential,
    /// The operation needs an open project
    State,
}

/// Why a mutation was rejected. The model is unchanged whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("Validation failed: {0}")]
    Invalid(ValidationReport),

    #[error("Table '{0}' already exists")]
    DuplicateTableName(String),

    #[error("Relationship {source_table}.{source_field} -> {target_table}.{target_field} already exists")]
    DuplicateConnection {
        source_table: String,
        source_field: String,
        target_table: String,
        target_field: String,
    },

    #[error("Field '{table}.{field}' already has a foreign key")]
    ForeignKeyTaken { table: String, field: String },

    #[error("Table {0} not found")]
    TableNotFound(TableId),

    #[error("Field '{field}' not found in table '{table}'")]
    FieldNotFound { table: String, field: String },

    #[error("Connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    #[error("No project is open")]
    NoProject,
}

impl SchemaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchemaError::Invalid(_)
            | SchemaError::DuplicateTableName(_)
            | SchemaError::DuplicateConnection { .. }
            | SchemaError::ForeignKeyTaken { .. } => ErrorKind::Validation,
            SchemaError::TableNotFound(_)
            | SchemaError::FieldNotFound { .. }
            | SchemaError::ConnectionNotFound(_) => ErrorKind::Referential,
            SchemaError::NoProject => ErrorKind::State,
        }
    }

    /// Field-level messages, when the error carries them
    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            SchemaError::Invalid(report) => Some(report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SchemaError::Invalid(ValidationReport::default()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            SchemaError::TableNotFound(TableId::new()).kind(),
            ErrorKind::Referential
        );
        assert_eq!(SchemaError::NoProject.kind(), ErrorKind::State);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(SchemaError::NoProject.to_string(), "No project is open");
        assert_eq!(
            SchemaError::FieldNotFound {
                table: "users".to_string(),
                field: "email".to_string()
            }
            .to_string(),
            "Field 'email' not found in table 'users'"
        );
    }
}
