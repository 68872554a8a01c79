use std::{env, time::Duration};

use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use dotenv::dotenv;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
pub use tokio_postgres::types::{ToSql, Type as PgType};
use tokio_postgres::{Config, Row};
use tracing::{debug, error};

use crate::database::postgres::{
    error::{PostgresConnectionError, PostgresError, UpsertError},
    record::UpsertRecord,
    upsert::UpsertRequest,
};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

pub fn connection_string() -> Result<String, env::VarError> {
    dotenv().ok();
    let connection = env::var("DATABASE_URL")?;
    Ok(connection)
}

/// A pool of connections for callers that do not own one.
pub struct PostgresClient {
    pool: Pool<PostgresConnectionManager<MakeTlsConnector>>,
}

impl PostgresClient {
    /// Connects to `DATABASE_URL`.
    pub async fn new() -> Result<Self, PostgresConnectionError> {
        let connection_str = connection_string()?;
        Self::connect(&connection_str).await
    }

    /// Builds the pool and checks one connection out of it, so a wrong URL
    /// fails here rather than on the first upsert. TLS follows the URL's
    /// `sslmode` (`prefer` by default).
    pub async fn connect(connection_str: &str) -> Result<Self, PostgresConnectionError> {
        let config: Config = connection_str
            .parse()
            .map_err(|_| PostgresConnectionError::CouldNotParseConnectionString)?;

        let connector = TlsConnector::builder()
            .build()
            .map_err(|_| PostgresConnectionError::CouldNotCreateTlsConnector)?;
        let manager = PostgresConnectionManager::new(config, MakeTlsConnector::new(connector));

        let pool = Pool::builder().connection_timeout(CONNECTION_TIMEOUT).build(manager).await?;

        match pool.get().await {
            Ok(conn) => {
                conn.simple_query("SELECT 1").await?;
            }
            Err(e) => {
                error!("Error connecting to database: {}", e);
                return Err(PostgresConnectionError::CanNotConnectToDatabase);
            }
        }

        debug!("Postgres connection pool ready");

        Ok(PostgresClient { pool })
    }

    pub async fn batch_execute(&self, sql: &str) -> Result<(), PostgresError> {
        let conn = self.pool.get().await?;
        conn.batch_execute(sql).await.map_err(PostgresError::PgError)
    }

    pub async fn query(
        &self,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, PostgresError> {
        let conn = self.pool.get().await?;
        let rows = conn.query(query, params).await.map_err(PostgresError::PgError)?;
        Ok(rows)
    }

    /// Runs `request` on a pooled connection in autocommit mode, so the
    /// statement is its own transaction. Returns the number of inserted rows.
    pub async fn upsert<R>(&self, request: &UpsertRequest<'_, R>) -> Result<u64, UpsertError>
    where
        R: UpsertRecord + Sync,
    {
        let conn = self.pool.get().await?;
        request.execute(&*conn).await
    }

    /// Runs `request` inside a fresh transaction and commits it.
    ///
    /// On error the transaction is dropped, which rolls it back.
    pub async fn upsert_in_transaction<R>(
        &self,
        request: &UpsertRequest<'_, R>,
    ) -> Result<u64, UpsertError>
    where
        R: UpsertRecord + Sync,
    {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;

        let inserted = request.execute(&transaction).await?;

        transaction.commit().await?;

        Ok(inserted)
    }
}
