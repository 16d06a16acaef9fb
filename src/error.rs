pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Redb(#[from] redb::Error),

    #[error("storage database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("storage transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("storage table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("storage commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("document has no _id")]
    MissingId,

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("field '{field}' is {expected:?}, got {actual:?}")]
    SchemaConflict {
        field: String,
        expected: crate::schema::DataType,
        actual: crate::schema::DataType,
    },
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
