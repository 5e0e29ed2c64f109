use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AisdbErrorCode {
    CatalogTooLarge,
    StoreUnavailable,
    QueryCanceled,
    Validation,
    SchemaNotFound,
    TableNotFound,
    TableAlreadyExists,
    SequenceNotFound,
    RoutineNotFound,
    ColumnNotFound,
    ColumnAlreadyExists,
    IndexNotFound,
    IndexAlreadyExists,
    Decode,
    Encode,
    WrongTransactionService,
    Internal,
}

impl AisdbErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AisdbErrorCode::CatalogTooLarge => "catalog_too_large",
            AisdbErrorCode::StoreUnavailable => "store_unavailable",
            AisdbErrorCode::QueryCanceled => "query_canceled",
            AisdbErrorCode::Validation => "validation",
            AisdbErrorCode::SchemaNotFound => "schema_not_found",
            AisdbErrorCode::TableNotFound => "table_not_found",
            AisdbErrorCode::TableAlreadyExists => "table_already_exists",
            AisdbErrorCode::SequenceNotFound => "sequence_not_found",
            AisdbErrorCode::RoutineNotFound => "routine_not_found",
            AisdbErrorCode::ColumnNotFound => "column_not_found",
            AisdbErrorCode::ColumnAlreadyExists => "column_already_exists",
            AisdbErrorCode::IndexNotFound => "index_not_found",
            AisdbErrorCode::IndexAlreadyExists => "index_already_exists",
            AisdbErrorCode::Decode => "decode",
            AisdbErrorCode::Encode => "encode",
            AisdbErrorCode::WrongTransactionService => "wrong_transaction_service",
            AisdbErrorCode::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AisdbError {
    #[error("serialized catalog exceeds maximum buffer size of {cap} bytes")]
    CatalogTooLarge { cap: usize },
    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },
    #[error("query canceled for session {session_id}")]
    QueryCanceled { session_id: u64 },
    #[error("catalog validation failed: {message}")]
    Validation { message: String },
    #[error("schema '{schema}' not found")]
    SchemaNotFound { schema: String },
    #[error("table '{schema}.{table}' not found")]
    TableNotFound { schema: String, table: String },
    #[error("table '{schema}.{table}' already exists")]
    TableAlreadyExists { schema: String, table: String },
    #[error("sequence '{schema}.{sequence}' not found")]
    SequenceNotFound { schema: String, sequence: String },
    #[error("routine '{schema}.{routine}' not found")]
    RoutineNotFound { schema: String, routine: String },
    #[error("column '{column}' not found in table '{schema}.{table}'")]
    ColumnNotFound {
        schema: String,
        table: String,
        column: String,
    },
    #[error("column '{column}' already exists in table '{schema}.{table}'")]
    ColumnAlreadyExists {
        schema: String,
        table: String,
        column: String,
    },
    #[error("index '{index}' not found on table '{schema}.{table}'")]
    IndexNotFound {
        schema: String,
        table: String,
        index: String,
    },
    #[error("index '{index}' already exists on table '{schema}.{table}'")]
    IndexAlreadyExists {
        schema: String,
        table: String,
        index: String,
    },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error(
        "sessions must come from the session service bound to the schema manager's transaction service"
    )]
    WrongTransactionService,
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AisdbError {
    pub fn internal(message: impl Into<String>) -> Self {
        AisdbError::Internal {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AisdbError::Validation {
            message: message.into(),
        }
    }

    pub fn code(&self) -> AisdbErrorCode {
        match self {
            AisdbError::CatalogTooLarge { .. } => AisdbErrorCode::CatalogTooLarge,
            AisdbError::StoreUnavailable { .. } => AisdbErrorCode::StoreUnavailable,
            AisdbError::QueryCanceled { .. } => AisdbErrorCode::QueryCanceled,
            AisdbError::Validation { .. } => AisdbErrorCode::Validation,
            AisdbError::SchemaNotFound { .. } => AisdbErrorCode::SchemaNotFound,
            AisdbError::TableNotFound { .. } => AisdbErrorCode::TableNotFound,
            AisdbError::TableAlreadyExists { .. } => AisdbErrorCode::TableAlreadyExists,
            AisdbError::SequenceNotFound { .. } => AisdbErrorCode::SequenceNotFound,
            AisdbError::RoutineNotFound { .. } => AisdbErrorCode::RoutineNotFound,
            AisdbError::ColumnNotFound { .. } => AisdbErrorCode::ColumnNotFound,
            AisdbError::ColumnAlreadyExists { .. } => AisdbErrorCode::ColumnAlreadyExists,
            AisdbError::IndexNotFound { .. } => AisdbErrorCode::IndexNotFound,
            AisdbError::IndexAlreadyExists { .. } => AisdbErrorCode::IndexAlreadyExists,
            AisdbError::Decode(_) => AisdbErrorCode::Decode,
            AisdbError::Encode(_) => AisdbErrorCode::Encode,
            AisdbError::WrongTransactionService => AisdbErrorCode::WrongTransactionService,
            AisdbError::Internal { .. } => AisdbErrorCode::Internal,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
