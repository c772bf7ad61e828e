//! Per-account refresh, wave scheduling, and the top-level run.
//!
//! [`AccountRefresher`] owns one account's login/extract/persist/sync cycle
//! under a bounded retry budget. [`BatchScheduler`] fans refreshes out in
//! fixed-size concurrent waves. [`RefreshOrchestrator`] wraps a whole run:
//! master identity check, account loading, batch execution, aggregation.

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::browser::{BrowserDriver, BrowserProvider};
use crate::config::{BatchConfig, LoginConfig, account_retry_policy};
use crate::error::RefreshError;
use crate::login::LoginSession;
use crate::mailbox::CodeSource;
use crate::models::{BatchSummary, DependentAccount, RefreshResult, SessionTokens};
use crate::pool::{PoolApi, PoolSync};
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};
use crate::store::AccountStore;
use crate::tokens::extract_session_tokens;

/// One account's refresh cycle, as seen by the scheduler.
#[async_trait]
pub trait Refresh: Send + Sync {
    async fn refresh(
        &self,
        account: &DependentAccount,
        cancel: &CancellationToken,
    ) -> RefreshResult;
}

/// Runs login + extraction end-to-end for one account, persists the tokens,
/// and pushes them to the pool.
///
/// Each attempt gets a fresh isolated browser session, released on every
/// exit path. No partial token set survives across attempts: an attempt
/// either yields a complete extraction or an error.
pub struct AccountRefresher<'a, A: PoolApi> {
    provider: &'a dyn BrowserProvider,
    codes: &'a dyn CodeSource,
    store: &'a dyn AccountStore,
    pool: &'a PoolSync<A>,
    login: &'a LoginConfig,
    retry: RetryPolicy,
}

impl<'a, A: PoolApi> AccountRefresher<'a, A> {
    pub fn new(
        provider: &'a dyn BrowserProvider,
        codes: &'a dyn CodeSource,
        store: &'a dyn AccountStore,
        pool: &'a PoolSync<A>,
        login: &'a LoginConfig,
    ) -> Self {
        Self {
            provider,
            codes,
            store,
            pool,
            login,
            retry: account_retry_policy(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn attempt(
        &self,
        account: &DependentAccount,
        attempt: u32,
    ) -> RetryAction<SessionTokens, RefreshError> {
        info!(
            email = %account.email,
            attempt = attempt + 1,
            max = self.retry.max_attempts,
            "starting login attempt"
        );
        let mut driver = match self.provider.open_session().await {
            Ok(driver) => driver,
            Err(e) => return RetryAction::Retry(e.into()),
        };

        let result = self.drive(driver.as_mut(), account).await;

        // The session is released whatever the attempt did.
        if let Err(e) = driver.close().await {
            warn!(email = %account.email, error = %e, "browser session close failed");
        }

        match result {
            Ok(tokens) => RetryAction::Success(tokens),
            Err(e) => RetryAction::Retry(e),
        }
    }

    async fn drive(
        &self,
        driver: &mut dyn BrowserDriver,
        account: &DependentAccount,
    ) -> Result<SessionTokens, RefreshError> {
        let session = LoginSession::new(self.login, self.codes, &account.email, account.account_id);
        session.run(driver).await?;
        let tokens = extract_session_tokens(driver).await?;
        Ok(tokens)
    }
}

#[async_trait]
impl<A: PoolApi> Refresh for AccountRefresher<'_, A> {
    async fn refresh(
        &self,
        account: &DependentAccount,
        cancel: &CancellationToken,
    ) -> RefreshResult {
        let outcome = retry_with_backoff(
            &self.retry,
            cancel,
            || RefreshError::Cancelled,
            |attempt| self.attempt(account, attempt),
        )
        .await;

        match outcome {
            Ok(tokens) => {
                if let Err(e) = self.store.update_tokens(&account.email, &tokens).await {
                    warn!(email = %account.email, error = %e, "token persistence failed");
                    return RefreshResult::failed(
                        &account.email,
                        format!("tokens extracted but not persisted: {e}"),
                    );
                }
                let sync = self.pool.sync_one(&account.email, &tokens).await;
                info!(email = %account.email, "account refreshed");
                RefreshResult::succeeded(&account.email, tokens, sync)
            }
            Err(e) => {
                warn!(email = %account.email, error = %e, "account refresh exhausted");
                RefreshResult::failed(&account.email, e.to_string())
            }
        }
    }
}

/// Fans account refreshes out in consecutive waves of fixed size.
pub struct BatchScheduler<'a> {
    refresher: &'a dyn Refresh,
    config: BatchConfig,
}

impl<'a> BatchScheduler<'a> {
    pub fn new(refresher: &'a dyn Refresh, config: BatchConfig) -> Self {
        Self { refresher, config }
    }

    /// Refresh every account, `window` at a time. One account's failure
    /// never halts the others; the result list preserves input order with
    /// exactly one entry per account. Cancellation is honored between
    /// waves, with untouched accounts recorded as failed.
    pub async fn run_batch(
        &self,
        accounts: &[DependentAccount],
        cancel: &CancellationToken,
    ) -> Vec<RefreshResult> {
        let window = self.config.window.max(1);
        let wave_count = accounts.len().div_ceil(window);
        let mut results: Vec<RefreshResult> = Vec::with_capacity(accounts.len());

        for (index, wave) in accounts.chunks(window).enumerate() {
            if index > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = sleep(self.config.wave_pause) => {}
                }
            }
            if cancel.is_cancelled() {
                warn!(done = results.len(), "batch cancelled, skipping remaining accounts");
                for account in accounts.iter().skip(results.len()) {
                    results.push(RefreshResult::failed(&account.email, "cancelled"));
                }
                break;
            }

            info!(
                wave = index + 1,
                waves = wave_count,
                size = wave.len(),
                "starting wave"
            );
            let settled = join_all(
                wave.iter()
                    .map(|account| self.refresher.refresh(account, cancel)),
            )
            .await;
            results.extend(settled);
        }

        results
    }
}

/// One full refresh run over the stored account list.
pub struct RefreshOrchestrator<'a> {
    store: &'a dyn AccountStore,
    refresher: &'a dyn Refresh,
    batch: BatchConfig,
}

impl<'a> RefreshOrchestrator<'a> {
    pub fn new(store: &'a dyn AccountStore, refresher: &'a dyn Refresh, batch: BatchConfig) -> Self {
        Self {
            store,
            refresher,
            batch,
        }
    }

    /// Verifies the authenticated mailbox identity against the stored
    /// master, then refreshes every dependent account and aggregates the
    /// outcomes. Identity mismatch aborts before any account is touched.
    pub async fn run(
        &self,
        current_identity: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary, RefreshError> {
        let snapshot = self.store.load().await?;

        let master = snapshot
            .master
            .as_ref()
            .ok_or_else(|| RefreshError::Config("snapshot has no master account".to_string()))?;
        if !master.email.eq_ignore_ascii_case(current_identity) {
            return Err(RefreshError::IdentityMismatch {
                expected: master.email.clone(),
                actual: current_identity.to_string(),
            });
        }

        if snapshot.accounts.is_empty() {
            info!("no dependent accounts to refresh");
            return Ok(BatchSummary::default());
        }

        info!(accounts = snapshot.accounts.len(), "starting refresh run");
        let scheduler = BatchScheduler::new(self.refresher, self.batch);
        let results = scheduler.run_batch(&snapshot.accounts, cancel).await;
        let summary = BatchSummary::from_results(results);

        for result in summary.results.iter().filter(|r| !r.success) {
            warn!(
                email = %result.email,
                error = result.error.as_deref().unwrap_or("unknown"),
                "account failed"
            );
        }
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "refresh run complete"
        );
        Ok(summary)
    }
}
