//! OTP retrieval with freshness filtering.
//!
//! Polls a mailbox's message listing for the provider's OTP notification,
//! accepting a code only from a message delivered inside the freshness
//! window. Stale or unparsable timestamps never yield a code.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use super::{MailboxError, MailboxMessage, MessageSource};
use crate::config::CodeWaiterConfig;

/// Anything that can produce a fresh OTP for a mailbox account. Seam
/// between the login state machine and the mailbox poll loop.
#[async_trait]
pub trait CodeSource: Send + Sync {
    async fn fetch_code(&self, account_id: u64) -> Result<String, MailboxError>;
}

/// Bounded poll loop over a [`MessageSource`].
pub struct CodeWaiter<S> {
    source: S,
    config: CodeWaiterConfig,
}

impl<S: MessageSource> CodeWaiter<S> {
    pub fn new(source: S, config: CodeWaiterConfig) -> Self {
        Self { source, config }
    }

    /// Poll the mailbox until a qualifying message yields a code, or the
    /// poll budget is exhausted.
    pub async fn wait_for_code(&self, account_id: u64) -> Result<String, MailboxError> {
        let poll = self.config.poll;

        for attempt in 0..poll.attempts {
            if attempt > 0 {
                tokio::time::sleep(poll.interval).await;
            }
            debug!(
                account_id,
                attempt = attempt + 1,
                max = poll.attempts,
                "polling mailbox for verification code"
            );

            match self
                .source
                .list_messages(account_id, self.config.list_size)
                .await
            {
                Ok(mut messages) => {
                    sort_most_recent_first(&mut messages, self.config.fallback_offset);
                    if let Some(code) = find_fresh_code(&messages, Utc::now(), &self.config) {
                        debug!(account_id, "verification code retrieved");
                        return Ok(code);
                    }
                }
                Err(e) => {
                    warn!(account_id, error = %e, "mailbox listing failed; will re-poll");
                }
            }
        }

        Err(MailboxError::CodeNotFound)
    }
}

#[async_trait]
impl<S: MessageSource> CodeSource for CodeWaiter<S> {
    async fn fetch_code(&self, account_id: u64) -> Result<String, MailboxError> {
        self.wait_for_code(account_id).await
    }
}

fn sort_most_recent_first(messages: &mut [MailboxMessage], fallback: FixedOffset) {
    messages.sort_by_key(|m| {
        std::cmp::Reverse(normalize_timestamp(&m.create_time, fallback).map(|t| t.timestamp_millis()))
    });
}

/// First message that matches the OTP subject, yields a code, and is inside
/// the freshness window at `now`.
fn find_fresh_code(
    messages: &[MailboxMessage],
    now: DateTime<Utc>,
    config: &CodeWaiterConfig,
) -> Option<String> {
    for message in messages {
        if message.subject != config.pattern.subject {
            continue;
        }
        let Some(code) = config
            .pattern
            .body
            .captures(&message.text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_owned())
        else {
            continue;
        };

        // Unparsable timestamps are treated as stale.
        let Some(delivered) = normalize_timestamp(&message.create_time, config.fallback_offset)
        else {
            debug!(subject = %message.subject, "skipping message with unparsable timestamp");
            continue;
        };

        // A delivery timestamp ahead of local now is provider clock skew,
        // not staleness; negative age still counts as fresh.
        let age = now.signed_duration_since(delivered);
        let window = TimeDelta::from_std(config.freshness_window).unwrap_or(TimeDelta::MAX);
        if age <= window {
            return Some(code);
        }
        debug!(
            age_secs = age.num_seconds(),
            "verification message outside freshness window"
        );
    }
    None
}

/// Normalize a mailbox timestamp into UTC.
///
/// Accepts epoch seconds (values below 1e12), epoch millis, and strings with
/// an explicit zone (`Z` or `±hh[:]mm`). Zone-less strings are interpreted
/// in `fallback`. Returns `None` for anything unparsable.
pub fn normalize_timestamp(
    value: &serde_json::Value,
    fallback: FixedOffset,
) -> Option<DateTime<Utc>> {
    const MILLIS_CUTOFF: i64 = 1_000_000_000_000;

    let numeric = value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()));
    if let Some(n) = numeric {
        return if n < MILLIS_CUTOFF {
            DateTime::from_timestamp(n, 0)
        } else {
            DateTime::from_timestamp_millis(n)
        };
    }

    let raw = value.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    let iso_like = raw.replacen(' ', "T", 1);

    let has_zone = iso_like.ends_with('Z')
        || iso_like.ends_with('z')
        || zone_suffix_regex().is_match(&iso_like);

    if has_zone {
        if let Ok(t) = DateTime::parse_from_rfc3339(&iso_like) {
            return Some(t.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z"] {
            if let Ok(t) = DateTime::parse_from_str(&iso_like, format) {
                return Some(t.with_timezone(&Utc));
            }
        }
        return None;
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&iso_like, format) {
            return naive
                .and_local_timezone(fallback)
                .single()
                .map(|t| t.with_timezone(&Utc));
        }
    }
    None
}

fn zone_suffix_regex() -> &'static regex::Regex {
    static RE: std::sync::LazyLock<regex::Regex> =
        std::sync::LazyLock::new(|| regex::Regex::new(r"[+-]\d{2}:?\d{2}$").expect("static regex"));
    &RE
}
