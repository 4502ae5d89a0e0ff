use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("input not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("table '{table}' already exists and the if-exists policy is fail")]
    TableExists { table: String },

    #[error("column '{column}' is not present in existing table '{table}'")]
    SchemaMismatch { table: String, column: String },

    #[error("required column '{0}' is missing from the play data")]
    MissingColumn(String),

    #[error("table '{0}' does not exist in the store")]
    MissingTable(String),

    #[error("table name must not be empty")]
    EmptyTableName,
}
