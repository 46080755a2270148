use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, FutureExt, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::store::ConfigStore;
use super::synchronizer::{AccountSynchronizer, SyncPhase, SyncResult};
use crate::account::AccountConfig;
use crate::error::{IngestError, SyncError};

/// Runs the synchronizer over every configured account with bounded
/// concurrency. One account failing (or panicking) never affects the others.
pub struct IngestionOrchestrator {
    accounts: Arc<dyn ConfigStore>,
    synchronizer: Arc<AccountSynchronizer>,
    max_concurrent: usize,
    run_timeout: Option<Duration>,
    shutdown: CancellationToken,
    run_lock: Mutex<()>,
}

impl IngestionOrchestrator {
    pub fn new(
        accounts: Arc<dyn ConfigStore>,
        synchronizer: Arc<AccountSynchronizer>,
        max_concurrent: usize,
        run_timeout: Option<Duration>,
    ) -> Self {
        Self {
            accounts,
            synchronizer,
            max_concurrent: max_concurrent.max(1),
            run_timeout,
            shutdown: CancellationToken::new(),
            run_lock: Mutex::new(()),
        }
    }

    /// Cancelling this token stops the current run and the poller.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Synchronize every account once. Results come back in configuration
    /// order, one per account.
    pub async fn run_once(&self) -> Result<Vec<SyncResult>, IngestError> {
        let _running = self
            .run_lock
            .try_lock()
            .map_err(|_| IngestError::AlreadyRunning)?;

        let accounts = self.accounts.list_accounts().await?;
        tracing::info!(
            "Starting ingestion run over {} account(s), {} at a time",
            accounts.len(),
            self.max_concurrent
        );

        let run = self.shutdown.child_token();
        let deadline = self.run_timeout.map(|timeout| {
            let run = run.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!("Ingestion run exceeded {:?}, cancelling", timeout);
                run.cancel();
            })
        });

        let results: Vec<SyncResult> = stream::iter(accounts)
            .map(|account| self.run_account(account, run.clone()))
            .buffered(self.max_concurrent)
            .collect()
            .await;

        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        let stored: usize = results.iter().map(|r| r.stored_count).sum();
        tracing::info!(
            "Ingestion run finished: {} stored, {}/{} account(s) failed",
            stored,
            failed,
            results.len()
        );

        Ok(results)
    }

    async fn run_account(&self, account: AccountConfig, cancel: CancellationToken) -> SyncResult {
        if cancel.is_cancelled() {
            return SyncResult::failed(&account, SyncPhase::Idle, SyncError::Cancelled);
        }

        let sync = AssertUnwindSafe(self.synchronizer.synchronize(&account, &cancel));
        match sync.catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    account_id = account.id,
                    "Synchronizer panicked: {}",
                    message
                );
                SyncResult::failed(&account, SyncPhase::Failed, SyncError::Panicked(message))
            }
        }
    }

    /// Run on a fixed interval until shutdown. Ticks that land while a run
    /// is still going are skipped.
    pub async fn poll(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_once().await {
                Ok(_) => {}
                Err(IngestError::AlreadyRunning) => {
                    tracing::debug!("Previous ingestion run still in progress, skipping tick");
                }
                Err(e) => tracing::error!("Scheduled ingestion run failed: {}", e),
            }
        }

        tracing::info!("Ingestion poller stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
