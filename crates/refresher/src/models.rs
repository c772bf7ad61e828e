//! Core data types shared across the refresh pipeline.

use serde::{Deserialize, Serialize};

/// The four-field session-credential set extracted after a successful login.
///
/// Field names follow the pool service wire format. A token set is usable
/// only when [`SessionTokens::is_complete`] holds; `host_c_oses` is allowed
/// to be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    /// Team identifier, taken from the post-login URL path.
    pub team_id: String,
    /// Secure session cookie value.
    pub secure_c_ses: String,
    /// Host-scoped cookie value. May be empty.
    #[serde(default)]
    pub host_c_oses: String,
    /// Session index, taken from the post-login URL query.
    pub csesidx: String,
}

impl SessionTokens {
    /// A token set is valid iff team id, secure session cookie and session
    /// index are all non-empty. The host cookie is optional.
    pub fn is_complete(&self) -> bool {
        !self.team_id.is_empty() && !self.secure_c_ses.is_empty() && !self.csesidx.is_empty()
    }
}

/// A dependent account whose credentials the pipeline refreshes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependentAccount {
    /// Mailbox address the account's OTP is delivered to.
    pub email: String,
    /// Mailbox account id, used when listing that mailbox's messages.
    pub account_id: u64,
    /// Provider-reported account status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Last known token set, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<SessionTokens>,
}

impl DependentAccount {
    pub fn new(email: impl Into<String>, account_id: u64) -> Self {
        Self {
            email: email.into(),
            account_id,
            status: None,
            tokens: None,
        }
    }
}

/// The master mailbox identity. Used only for the pre-flight consistency
/// check before a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterAccount {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<u64>,
}

/// Unit of get/set for the external account snapshot store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<MasterAccount>,
    #[serde(default)]
    pub accounts: Vec<DependentAccount>,
}

/// Remote representation of a synced credential set.
///
/// The pool service is assumed to hold at most one record per `team_id`;
/// reconciliation matches on that key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolRecord {
    pub id: u64,
    pub team_id: String,
    #[serde(default)]
    pub secure_c_ses: String,
    #[serde(default)]
    pub host_c_oses: String,
    #[serde(default)]
    pub csesidx: String,
    #[serde(default)]
    pub user_agent: String,
}

/// Payload for pool insert/update calls. Identical to [`PoolRecord`] minus
/// the server-assigned id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolRecordDraft {
    pub team_id: String,
    pub secure_c_ses: String,
    pub host_c_oses: String,
    pub csesidx: String,
    pub user_agent: String,
}

impl PoolRecordDraft {
    pub fn from_tokens(tokens: &SessionTokens, user_agent: &str) -> Self {
        Self {
            team_id: tokens.team_id.clone(),
            secure_c_ses: tokens.secure_c_ses.clone(),
            host_c_oses: tokens.host_c_oses.clone(),
            csesidx: tokens.csesidx.clone(),
            user_agent: user_agent.to_owned(),
        }
    }
}

/// What the pool reconciliation did for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolAction {
    Added,
    Updated,
    AddFailed,
    UpdateFailed,
    Skip,
    Error,
}

/// Outcome of a single `sync_one` call. Remote failures are captured here,
/// never raised to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub action: PoolAction,
    /// Remote record id when the sync updated an existing record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    pub fn added() -> Self {
        Self {
            success: true,
            action: PoolAction::Added,
            pool_id: None,
            error: None,
        }
    }

    pub fn updated(pool_id: u64) -> Self {
        Self {
            success: true,
            action: PoolAction::Updated,
            pool_id: Some(pool_id),
            error: None,
        }
    }

    pub fn failed(action: PoolAction, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action,
            pool_id: None,
            error: Some(error.into()),
        }
    }
}

/// Per-account result of one refresh run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResult {
    pub email: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<SessionTokens>,
    /// Last attempt's error when the refresh exhausted its retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_sync: Option<SyncOutcome>,
}

impl RefreshResult {
    pub fn succeeded(email: impl Into<String>, tokens: SessionTokens, sync: SyncOutcome) -> Self {
        Self {
            email: email.into(),
            success: true,
            tokens: Some(tokens),
            error: None,
            pool_sync: Some(sync),
        }
    }

    pub fn failed(email: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            success: false,
            tokens: None,
            error: Some(error.into()),
            pool_sync: None,
        }
    }
}

/// Aggregated outcome of one batch run, in input order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<RefreshResult>,
}

impl BatchSummary {
    pub fn from_results(results: Vec<RefreshResult>) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total,
            succeeded,
            failed: total - succeeded,
            results,
        }
    }
}

/// Counts reported by a full pool resync.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResyncReport {
    /// Records inserted (one per account with a complete token set).
    pub inserted: usize,
    /// Accounts skipped for lacking a complete token set.
    pub skipped: usize,
    /// Remote record count after the resync.
    pub remote_total: usize,
}
