mod database;
pub use database::postgres::{
    client::{connection_string, PgType, PostgresClient, ToSql},
    error::{PostgresConnectionError, PostgresError, PreconditionError, UpsertError},
    record::UpsertRecord,
    schema::{FieldDescriptor, FieldType, KeyAffinity, TableSchema},
    sql_type_wrapper::SqlValue,
    upsert::{
        upsert, UpsertPlan, UpsertRequest, UpsertStatement, POSTGRES_MAX_BIND_PARAMETERS,
    },
};

pub mod query_builder {
    pub use crate::database::postgres::upsert::{
        build_assignments, build_column_list, build_insert_missing, build_key_match,
        build_new_values_cte, build_upsert_cte, build_upsert_statement, build_values_rows,
        format_table_name, quote_identifier,
    };
}

mod logger;
pub use logger::{setup_info_logger, setup_logger, LOG_TARGET};

// export 3rd party dependencies
pub use tokio_postgres::GenericClient;
pub use tracing::level_filters::LevelFilter;
