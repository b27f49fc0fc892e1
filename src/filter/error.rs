use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Missing bind parameter: {0}")]
    MissingBind(String),

    #[error("Bind parameter {0} must be a sequence")]
    ExpectedSequence(String),

    #[error("No columns left to select")]
    EmptyProjection,

    #[error("No rows to insert")]
    EmptyInsert,

    #[error("No values to update")]
    EmptyAssignment,
}
