use std::env;

use bb8::RunError;

/// Raised before any SQL is built or sent.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("Empty key fields: none of the key names match a non-identity field of the table")]
    EmptyKeyFields,

    #[error("Empty table fields: the table has no fields besides identity columns")]
    EmptyTableFields,

    #[error("Record {record} has no value for field `{field}`")]
    MissingValue { record: usize, field: String },

    #[error("Record {duplicate} repeats the key of record {first}")]
    DuplicateKey { first: usize, duplicate: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum UpsertError {
    #[error("{0}")]
    Precondition(#[from] PreconditionError),

    #[error("PgError {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Connection pool error: {0}")]
    ConnectionPool(#[from] RunError<tokio_postgres::Error>),
}

#[derive(thiserror::Error, Debug)]
pub enum PostgresConnectionError {
    #[error("The database connection string is wrong please check your environment: {0}")]
    DatabaseConnectionConfigWrong(#[from] env::VarError),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(#[from] tokio_postgres::Error),

    #[error("Can not connect to the database please make sure your connection string is correct")]
    CanNotConnectToDatabase,

    #[error("Could not parse connection string make sure it is correctly formatted")]
    CouldNotParseConnectionString,

    #[error("Could not create tls connector")]
    CouldNotCreateTlsConnector,
}

#[derive(thiserror::Error, Debug)]
pub enum PostgresError {
    #[error("PgError {0}")]
    PgError(#[from] tokio_postgres::Error),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(#[from] RunError<tokio_postgres::Error>),
}
