use std::sync::Arc;

use diesel::pg::PgConnection;
use tracing::{error, warn};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    extract::TextExtractor,
    storage::ObjectStorage,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub extractor: Arc<dyn TextExtractor>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        extractor: Arc<dyn TextExtractor>,
        jwt: JwtService,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage,
            extractor,
            jwt,
        }
    }

    /// Runs blocking store work off the async runtime, bounded by the
    /// configured store timeout. `operation` names the work in logs and in the
    /// timeout error.
    ///
    /// A timed out task is not cancelled. Pooled connections carry a matching
    /// `statement_timeout`, but a transaction already past its last statement
    /// may still commit after the caller sees 504, so clients retry only
    /// idempotent writes.
    pub async fn run_store<T, F>(&self, operation: &'static str, work: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| AppError::internal(format!("database pool error: {err}")))?;
            work(&mut conn)
        });

        match tokio::time::timeout(self.config.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!(operation, error = %join_err, "store task failed");
                Err(AppError::internal(format!("{operation} failed")))
            }
            Err(_) => {
                warn!(
                    operation,
                    timeout_secs = self.config.store_timeout.as_secs(),
                    "store operation timed out"
                );
                Err(AppError::timeout(operation))
            }
        }
    }
}
