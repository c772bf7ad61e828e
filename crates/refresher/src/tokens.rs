//! Session-token extraction from a terminated login session.
//!
//! The team id and session index are derived solely from the shape of the
//! post-login URL; if the hosted application changes its URL scheme this
//! surfaces as a typed extraction failure, by design.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::browser::{BrowserDriver, DriverError};
use crate::models::SessionTokens;

/// Secure session cookie. Required.
pub const SESSION_COOKIE: &str = "__Secure-C_SES";
/// Host-scoped cookie. Optional; may legitimately be absent.
pub const HOST_COOKIE: &str = "__Host-C_OSES";
/// Query parameter carrying the session index.
pub const SESSION_INDEX_PARAM: &str = "csesidx";

static TEAM_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/cid/([^/?#]+)").expect("static regex"));

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("incomplete token set, missing: {}", missing.join(", "))]
    Incomplete { missing: Vec<&'static str> },
    #[error("current URL is not parsable: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Read the four-field credential set out of a session that reached the
/// canonical destination.
pub async fn extract_session_tokens(
    driver: &mut dyn BrowserDriver,
) -> Result<SessionTokens, ExtractError> {
    let secure_c_ses = driver.cookie(SESSION_COOKIE).await?.unwrap_or_default();
    let host_c_oses = driver.cookie(HOST_COOKIE).await?.unwrap_or_default();

    let current = driver.current_url().await?;
    let url = Url::parse(&current).map_err(|e| ExtractError::InvalidUrl(e.to_string()))?;

    let csesidx = url
        .query_pairs()
        .find(|(k, _)| k == SESSION_INDEX_PARAM)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default();

    let team_id = TEAM_ID_RE
        .captures(url.path())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
        .unwrap_or_default();

    let mut missing = Vec::new();
    if secure_c_ses.is_empty() {
        missing.push(SESSION_COOKIE);
    }
    if csesidx.is_empty() {
        missing.push(SESSION_INDEX_PARAM);
    }
    if team_id.is_empty() {
        missing.push("team_id");
    }
    if !missing.is_empty() {
        return Err(ExtractError::Incomplete { missing });
    }

    Ok(SessionTokens {
        team_id,
        secure_c_ses,
        host_c_oses,
        csesidx,
    })
}
