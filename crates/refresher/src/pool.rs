//! Reconciliation against the pool service.
//!
//! The REST surface sits behind [`PoolApi`] so reconciliation logic is
//! testable against an in-memory pool. [`PoolSync`] layers the cached admin
//! credential and the three reconciliation operations on top.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::models::{
    DependentAccount, PoolAction, PoolRecord, PoolRecordDraft, ResyncReport, SessionTokens,
    SyncOutcome,
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("pool api: {0}")]
    Api(String),
}

/// The pool service's REST surface.
#[async_trait]
pub trait PoolApi: Send + Sync {
    async fn login(&self, password: &str) -> Result<String, PoolError>;
    async fn list(&self, token: &str) -> Result<Vec<PoolRecord>, PoolError>;
    async fn insert(&self, token: &str, draft: &PoolRecordDraft) -> Result<(), PoolError>;
    async fn update(&self, token: &str, id: u64, draft: &PoolRecordDraft)
    -> Result<(), PoolError>;
    async fn delete(&self, token: &str, id: u64) -> Result<(), PoolError>;
    /// Probes whether a stored record still authenticates.
    async fn test_record(&self, token: &str, id: u64) -> Result<bool, PoolError>;
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

#[derive(Deserialize)]
struct ListResponse {
    accounts: Vec<PoolRecord>,
}

#[derive(Deserialize)]
struct AckResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

impl AckResponse {
    fn into_result(self, what: &str) -> Result<(), PoolError> {
        if self.success {
            Ok(())
        } else {
            Err(PoolError::Api(
                self.message.unwrap_or_else(|| format!("{what} rejected")),
            ))
        }
    }
}

/// `PoolApi` over HTTP, matching the pool service's endpoint layout.
pub struct HttpPoolApi {
    base_url: String,
    client: Client,
}

impl HttpPoolApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl PoolApi for HttpPoolApi {
    async fn login(&self, password: &str) -> Result<String, PoolError> {
        let response: LoginResponse = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&serde_json::json!({ "password": password }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response
            .token
            .ok_or_else(|| PoolError::Api("login response carried no token".to_string()))
    }

    async fn list(&self, token: &str) -> Result<Vec<PoolRecord>, PoolError> {
        let response: ListResponse = self
            .client
            .get(self.url("/api/accounts"))
            .header(ADMIN_TOKEN_HEADER, token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.accounts)
    }

    async fn insert(&self, token: &str, draft: &PoolRecordDraft) -> Result<(), PoolError> {
        let ack: AckResponse = self
            .client
            .post(self.url("/api/accounts"))
            .header(ADMIN_TOKEN_HEADER, token)
            .json(draft)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ack.into_result("insert")
    }

    async fn update(
        &self,
        token: &str,
        id: u64,
        draft: &PoolRecordDraft,
    ) -> Result<(), PoolError> {
        let ack: AckResponse = self
            .client
            .put(self.url(&format!("/api/accounts/{id}")))
            .header(ADMIN_TOKEN_HEADER, token)
            .json(draft)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ack.into_result("update")
    }

    async fn delete(&self, token: &str, id: u64) -> Result<(), PoolError> {
        let ack: AckResponse = self
            .client
            .delete(self.url(&format!("/api/accounts/{id}")))
            .header(ADMIN_TOKEN_HEADER, token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        ack.into_result("delete")
    }

    async fn test_record(&self, token: &str, id: u64) -> Result<bool, PoolError> {
        let ack: AckResponse = self
            .client
            .get(self.url(&format!("/api/accounts/{id}/test")))
            .header(ADMIN_TOKEN_HEADER, token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(ack.success)
    }
}

/// Cached admin credential as an explicit value, not hidden module state.
struct AdminToken {
    token: String,
    expires_at: Instant,
}

/// Reconciliation client. Shares one admin credential across concurrent
/// `sync_one` calls; re-authentication is idempotent, so last-writer-wins
/// on refresh is fine.
pub struct PoolSync<A: PoolApi> {
    api: A,
    config: PoolConfig,
    admin: Mutex<Option<AdminToken>>,
}

impl<A: PoolApi> PoolSync<A> {
    pub fn new(api: A, config: PoolConfig) -> Self {
        Self {
            api,
            config,
            admin: Mutex::new(None),
        }
    }

    /// Current admin token, re-authenticating when the cached one expired.
    async fn admin_token(&self) -> Result<String, PoolError> {
        let now = Instant::now();
        {
            let cached = self.admin.lock();
            if let Some(admin) = cached.as_ref()
                && now < admin.expires_at
            {
                return Ok(admin.token.clone());
            }
        }
        debug!("admin credential missing or expired, re-authenticating");
        let token = self.api.login(&self.config.password).await?;
        *self.admin.lock() = Some(AdminToken {
            token: token.clone(),
            expires_at: now + self.config.admin_ttl,
        });
        Ok(token)
    }

    /// Push one account's fresh tokens to the pool: update the record whose
    /// team-id matches, insert when none does. Failures are captured in the
    /// outcome, never propagated.
    pub async fn sync_one(&self, email: &str, tokens: &SessionTokens) -> SyncOutcome {
        match self.try_sync_one(tokens).await {
            Ok(outcome) => {
                debug!(email, action = ?outcome.action, "pool sync settled");
                outcome
            }
            Err(e) => {
                warn!(email, error = %e, "pool sync failed");
                SyncOutcome::failed(PoolAction::Error, e.to_string())
            }
        }
    }

    async fn try_sync_one(&self, tokens: &SessionTokens) -> Result<SyncOutcome, PoolError> {
        let token = self.admin_token().await?;
        let records = self.api.list(&token).await?;

        let matched: Vec<&PoolRecord> = records
            .iter()
            .filter(|r| r.team_id == tokens.team_id)
            .collect();
        if matched.len() > 1 {
            // Reconciliation assumes team-id uniqueness; surface violations
            // instead of guessing which record wins.
            warn!(
                team_id = %tokens.team_id,
                count = matched.len(),
                "multiple pool records share one team id"
            );
        }

        let draft = PoolRecordDraft::from_tokens(tokens, &self.config.user_agent);
        match matched.first() {
            Some(existing) => match self.api.update(&token, existing.id, &draft).await {
                Ok(()) => Ok(SyncOutcome::updated(existing.id)),
                Err(e) => Ok(SyncOutcome::failed(PoolAction::UpdateFailed, e.to_string())),
            },
            None => match self.api.insert(&token, &draft).await {
                Ok(()) => Ok(SyncOutcome::added()),
                Err(e) => Ok(SyncOutcome::failed(PoolAction::AddFailed, e.to_string())),
            },
        }
    }

    /// Rebuild the pool from scratch: delete everything remote, then insert
    /// one record per account that carries a complete token set.
    pub async fn full_resync(
        &self,
        accounts: &[DependentAccount],
    ) -> Result<ResyncReport, PoolError> {
        let token = self.admin_token().await?;

        let mut records = self.api.list(&token).await?;
        // Descending id so earlier deletions cannot shift later ids.
        records.sort_by(|a, b| b.id.cmp(&a.id));
        info!(count = records.len(), "clearing remote pool records");
        for record in &records {
            if let Err(e) = self.api.delete(&token, record.id).await {
                warn!(id = record.id, error = %e, "delete failed, continuing");
            }
            sleep(self.config.mutation_pause).await;
        }

        let mut report = ResyncReport::default();
        for account in accounts {
            let Some(tokens) = account.tokens.as_ref().filter(|t| t.is_complete()) else {
                debug!(email = %account.email, "no complete tokens, skipping");
                report.skipped += 1;
                continue;
            };
            let draft = PoolRecordDraft::from_tokens(tokens, &self.config.user_agent);
            match self.api.insert(&token, &draft).await {
                Ok(()) => report.inserted += 1,
                Err(e) => warn!(email = %account.email, error = %e, "insert failed"),
            }
            sleep(self.config.mutation_pause).await;
        }

        report.remote_total = self.api.list(&token).await?.len();
        info!(
            inserted = report.inserted,
            skipped = report.skipped,
            remote_total = report.remote_total,
            "pool resync complete"
        );
        Ok(report)
    }

    /// Probe every remote record and delete the ones that no longer
    /// authenticate. Returns `(tested, removed)`.
    pub async fn prune_invalid(&self) -> Result<(usize, usize), PoolError> {
        let token = self.admin_token().await?;
        let records = self.api.list(&token).await?;
        let tested = records.len();

        let mut failing: Vec<u64> = Vec::new();
        for record in &records {
            let alive = match self.api.test_record(&token, record.id).await {
                Ok(alive) => alive,
                Err(e) => {
                    warn!(id = record.id, error = %e, "record probe failed");
                    false
                }
            };
            if !alive {
                failing.push(record.id);
            }
        }

        failing.sort_by(|a, b| b.cmp(a));
        let mut removed = 0usize;
        for id in failing {
            match self.api.delete(&token, id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(id, error = %e, "delete failed"),
            }
            sleep(self.config.mutation_pause).await;
        }

        info!(tested, removed, "pool prune complete");
        Ok((tested, removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use tokio::time::{Duration, advance};

    #[derive(Default)]
    struct FakePoolState {
        records: Vec<PoolRecord>,
        deletions: Vec<u64>,
        dead: HashSet<u64>,
    }

    #[derive(Default)]
    struct FakePool {
        state: Arc<Mutex<FakePoolState>>,
        next_id: AtomicU64,
        logins: AtomicUsize,
        fail_inserts: bool,
    }

    impl FakePool {
        fn with_records(records: Vec<PoolRecord>) -> Self {
            let next = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
            let pool = Self::default();
            pool.next_id.store(next, Ordering::SeqCst);
            pool.state.lock().records = records;
            pool
        }

        fn record(id: u64, team_id: &str) -> PoolRecord {
            PoolRecord {
                id,
                team_id: team_id.to_string(),
                secure_c_ses: "ses".to_string(),
                host_c_oses: String::new(),
                csesidx: "0".to_string(),
                user_agent: String::new(),
            }
        }
    }

    #[async_trait]
    impl PoolApi for &FakePool {
        async fn login(&self, _password: &str) -> Result<String, PoolError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok("admin-token".to_string())
        }

        async fn list(&self, _token: &str) -> Result<Vec<PoolRecord>, PoolError> {
            Ok(self.state.lock().records.clone())
        }

        async fn insert(&self, _token: &str, draft: &PoolRecordDraft) -> Result<(), PoolError> {
            if self.fail_inserts {
                return Err(PoolError::Api("insert rejected".to_string()));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.state.lock().records.push(PoolRecord {
                id,
                team_id: draft.team_id.clone(),
                secure_c_ses: draft.secure_c_ses.clone(),
                host_c_oses: draft.host_c_oses.clone(),
                csesidx: draft.csesidx.clone(),
                user_agent: draft.user_agent.clone(),
            });
            Ok(())
        }

        async fn update(
            &self,
            _token: &str,
            id: u64,
            draft: &PoolRecordDraft,
        ) -> Result<(), PoolError> {
            let mut state = self.state.lock();
            let record = state
                .records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| PoolError::Api(format!("no record {id}")))?;
            record.secure_c_ses = draft.secure_c_ses.clone();
            record.csesidx = draft.csesidx.clone();
            Ok(())
        }

        async fn delete(&self, _token: &str, id: u64) -> Result<(), PoolError> {
            let mut state = self.state.lock();
            state.deletions.push(id);
            state.records.retain(|r| r.id != id);
            Ok(())
        }

        async fn test_record(&self, _token: &str, id: u64) -> Result<bool, PoolError> {
            Ok(!self.state.lock().dead.contains(&id))
        }
    }

    fn tokens(team_id: &str) -> SessionTokens {
        SessionTokens {
            team_id: team_id.to_string(),
            secure_c_ses: "fresh-ses".to_string(),
            host_c_oses: "oses".to_string(),
            csesidx: "1".to_string(),
        }
    }

    fn config() -> PoolConfig {
        PoolConfig::new("https://pool.example.com", "hunter2")
    }

    #[tokio::test(start_paused = true)]
    async fn sync_one_updates_matching_team_and_inserts_otherwise() {
        let pool = FakePool::with_records(vec![FakePool::record(4, "team-a")]);
        let sync = PoolSync::new(&pool, config());

        let updated = sync.sync_one("a@example.com", &tokens("team-a")).await;
        assert!(updated.success);
        assert_eq!(updated.action, PoolAction::Updated);
        assert_eq!(updated.pool_id, Some(4));

        let added = sync.sync_one("b@example.com", &tokens("team-b")).await;
        assert!(added.success);
        assert_eq!(added.action, PoolAction::Added);
        assert_eq!(pool.state.lock().records.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn admin_token_is_cached_within_ttl() {
        let pool = FakePool::default();
        let sync = PoolSync::new(&pool, config());

        sync.sync_one("a@example.com", &tokens("team-a")).await;
        sync.sync_one("b@example.com", &tokens("team-b")).await;
        assert_eq!(pool.logins.load(Ordering::SeqCst), 1);

        advance(Duration::from_secs(6 * 60)).await;
        sync.sync_one("c@example.com", &tokens("team-c")).await;
        assert_eq!(pool.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_one_captures_api_failures_instead_of_propagating() {
        let pool = FakePool {
            fail_inserts: true,
            ..FakePool::default()
        };
        let sync = PoolSync::new(&pool, config());

        let outcome = sync.sync_one("a@example.com", &tokens("team-a")).await;
        assert!(!outcome.success);
        assert_eq!(outcome.action, PoolAction::AddFailed);
        assert!(outcome.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn full_resync_inserts_complete_and_skips_incomplete() {
        let pool = FakePool::with_records(vec![
            FakePool::record(1, "old-a"),
            FakePool::record(2, "old-b"),
        ]);
        let sync = PoolSync::new(&pool, config());

        let mut with_tokens_1 = DependentAccount::new("a@example.com", 1);
        with_tokens_1.tokens = Some(tokens("team-a"));
        let mut with_tokens_2 = DependentAccount::new("b@example.com", 2);
        with_tokens_2.tokens = Some(tokens("team-b"));
        let without_tokens = DependentAccount::new("c@example.com", 3);

        let report = sync
            .full_resync(&[with_tokens_1, with_tokens_2, without_tokens])
            .await
            .unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.remote_total, 2);

        // Old records must be deleted highest id first.
        assert_eq!(pool.state.lock().deletions, vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn prune_removes_only_failing_records() {
        let pool = FakePool::with_records(vec![
            FakePool::record(1, "team-a"),
            FakePool::record(2, "team-b"),
            FakePool::record(3, "team-c"),
        ]);
        pool.state.lock().dead.insert(2);
        let sync = PoolSync::new(&pool, config());

        let (tested, removed) = sync.prune_invalid().await.unwrap();
        assert_eq!(tested, 3);
        assert_eq!(removed, 1);

        let state = pool.state.lock();
        assert_eq!(state.records.len(), 2);
        assert!(state.records.iter().all(|r| r.id != 2));
    }
}
