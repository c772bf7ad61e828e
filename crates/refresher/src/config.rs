//! Explicit configuration values for every bound named by the pipeline.
//!
//! All waits in the pipeline are bounded; the bounds live here as plain data
//! so retry and timeout behavior is independently testable instead of being
//! buried in polling loops.

use std::time::Duration;

use chrono::FixedOffset;
use regex::Regex;

use crate::retry::{PollPolicy, RetryPolicy};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// How an OTP notification is recognized in a mailbox listing.
#[derive(Debug, Clone)]
pub struct CodePattern {
    /// Exact subject of the provider's OTP notification.
    pub subject: String,
    /// Body pattern; the first capture group is the code.
    pub body: Regex,
}

impl Default for CodePattern {
    fn default() -> Self {
        Self {
            subject: "Your verification code".to_string(),
            // "Your one-time verification code is:" followed by a blank line
            // and a 6-character code.
            body: Regex::new(r"(?i)one-time verification code[^\n]*\s*\n\s*\n\s*([A-Z0-9]{6})")
                .expect("static regex"),
        }
    }
}

/// Bounds for OTP retrieval from the mailbox.
#[derive(Debug, Clone)]
pub struct CodeWaiterConfig {
    pub pattern: CodePattern,
    /// Maximum age of a message eligible to supply an OTP.
    pub freshness_window: Duration,
    /// Mailbox poll cadence: 5 attempts, 10s apart (~50s bound).
    pub poll: PollPolicy,
    /// Applied to mailbox timestamps that carry no explicit zone.
    pub fallback_offset: FixedOffset,
    /// How many messages to request per poll.
    pub list_size: u32,
}

impl Default for CodeWaiterConfig {
    fn default() -> Self {
        Self {
            pattern: CodePattern::default(),
            freshness_window: Duration::from_secs(3 * 60),
            poll: PollPolicy {
                attempts: 5,
                interval: Duration::from_secs(10),
            },
            fallback_offset: FixedOffset::east_opt(0).expect("zero offset"),
            list_size: 5,
        }
    }
}

/// Bounds and page affordances for the login state machine.
///
/// Element labels are capability-neutral hints resolved by the browser
/// driver; they default to the hosted application's English UI strings.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    /// Login entry page, navigated to at `Start` and on error recovery.
    pub entry_url: String,
    /// URL fragment marking the canonical post-login destination.
    pub destination_marker: String,
    /// URL fragment marking the first-time-setup (onboarding) page.
    pub onboarding_marker: String,
    /// Field name of the email input on the entry page.
    pub email_field: String,
    /// Field name of the OTP challenge input.
    pub challenge_field: String,
    /// Label of the submit affordance on the entry page.
    pub submit_label: String,
    /// Label of the OTP verify affordance.
    pub verify_label: String,
    /// Label of the retry/continue affordance shown on the error page.
    pub retry_label: String,
    /// Page text signalling an authentication dead-end.
    pub dead_end_text: String,
    /// Labels tried for the onboarding continue/agree affordance.
    pub onboarding_continue_labels: Vec<String>,
    /// Bound on each branch of the challenge/error race.
    pub challenge_timeout: Duration,
    /// Bound on the post-challenge redirect wait.
    pub redirect_timeout: Duration,
    /// Poll cadence while redirecting.
    pub redirect_poll: Duration,
    /// Pause after page-changing actions, giving the page time to settle.
    pub settle_delay: Duration,
    /// Wait before the first mailbox poll, giving the OTP mail time to land.
    pub code_delivery_grace: Duration,
    /// Wait after reaching the destination before reading cookies, letting
    /// the application finish setting them.
    pub post_login_grace: Duration,
    /// Error-page recovery budget.
    pub max_retries: u32,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            entry_url: String::new(),
            destination_marker: "/cid/".to_string(),
            onboarding_marker: "/admin/create".to_string(),
            email_field: "email".to_string(),
            challenge_field: "pinInput".to_string(),
            submit_label: "Next".to_string(),
            verify_label: "Verify".to_string(),
            retry_label: "Sign in or create account".to_string(),
            dead_end_text: "Try another way".to_string(),
            onboarding_continue_labels: vec![
                "Agree and continue".to_string(),
                "Get started".to_string(),
                "Continue".to_string(),
            ],
            challenge_timeout: Duration::from_secs(15),
            redirect_timeout: Duration::from_secs(60),
            redirect_poll: Duration::from_secs(3),
            settle_delay: Duration::from_secs(3),
            code_delivery_grace: Duration::from_secs(10),
            post_login_grace: Duration::from_secs(10),
            max_retries: 10,
        }
    }
}

impl LoginConfig {
    pub fn new(entry_url: impl Into<String>) -> Self {
        Self {
            entry_url: entry_url.into(),
            ..Self::default()
        }
    }
}

/// Pool service endpoint and reconciliation tunables.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub base_url: String,
    pub password: String,
    /// Cached admin credential time-to-live.
    pub admin_ttl: Duration,
    /// User agent recorded on inserted/updated pool records.
    pub user_agent: String,
    /// Pacing between consecutive mutating calls during a resync.
    pub mutation_pause: Duration,
}

impl PoolConfig {
    pub fn new(base_url: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            password: password.into(),
            admin_ttl: Duration::from_secs(5 * 60),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            mutation_pause: Duration::from_millis(300),
        }
    }
}

/// Wave sizing for the batch scheduler.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Accounts refreshed concurrently within one wave.
    pub window: usize,
    /// Pause between consecutive waves.
    pub wave_pause: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            window: 3,
            wave_pause: Duration::from_secs(2),
        }
    }
}

/// Account-level retry budget: any attempt failure triggers a fixed backoff
/// and a fresh attempt.
pub fn account_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_secs(3),
        exponential: false,
    }
}
