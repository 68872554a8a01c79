pub mod client;
pub mod error;
pub mod record;
pub mod schema;
pub mod sql_type_wrapper;
pub mod upsert;
