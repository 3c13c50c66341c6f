//! Transaction coordinator
//!
//! Runs a unit of work against a transaction-scoped [`Queries`] handle. The
//! work commits when it returns `Ok` and rolls back when it returns `Err` or
//! exceeds its deadline.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;

use crate::{
    error::{AppError, AppResult},
    repository::{LedgerStore, Queries},
};

#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn LedgerStore>,
    acquire_timeout: Duration,
    work_timeout: Duration,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn LedgerStore>, acquire_timeout: Duration, work_timeout: Duration) -> Self {
        Self {
            store,
            acquire_timeout,
            work_timeout,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Direct handle for read-only operations
    pub async fn connection(&self) -> AppResult<Box<dyn Queries>> {
        tokio::time::timeout(self.acquire_timeout, self.store.connection())
            .await
            .map_err(|_| AppError::Timeout("Timed out acquiring a connection".to_string()))?
    }

    /// Run `work` in its own transaction.
    ///
    /// The work is never attempted if the transaction cannot be opened. A
    /// failed rollback is logged and the work's own error is returned.
    pub async fn run<T, F>(&self, work: F) -> AppResult<T>
    where
        T: Send,
        F: for<'q> FnOnce(&'q mut dyn Queries) -> BoxFuture<'q, AppResult<T>> + Send,
    {
        let mut tx = tokio::time::timeout(self.acquire_timeout, self.store.begin())
            .await
            .map_err(|_| AppError::Timeout("Timed out opening a transaction".to_string()))??;

        let queries: &mut dyn Queries = &mut *tx;
        let outcome = match tokio::time::timeout(self.work_timeout, work(queries)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout("Transaction deadline exceeded".to_string())),
        };

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!("Rollback failed after '{}': {}", err, rollback_err);
                }
                Err(err)
            }
        }
    }
}
