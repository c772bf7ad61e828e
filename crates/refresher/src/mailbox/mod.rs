//! Mailbox provider API client.
//!
//! Covers the three calls the pipeline needs: master login, message listing
//! for OTP retrieval, and the paginated account listing used to rebuild the
//! local snapshot.

mod code;

pub use code::{CodeSource, CodeWaiter, normalize_timestamp};

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::retry::{RetryAction, RetryPolicy, is_retryable_reqwest_error, retry_with_backoff};

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("mailbox API error (code={code}): {message}")]
    Api { code: i64, message: String },
    #[error("no fresh verification code arrived within the poll budget")]
    CodeNotFound,
    #[error("login cancelled")]
    Cancelled,
}

/// Standard response envelope of the mailbox provider.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, MailboxError> {
        if self.code != 200 {
            return Err(MailboxError::Api {
                code: self.code,
                message: self.message.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        self.data
            .ok_or_else(|| MailboxError::Parse("no data field".to_string()))
    }
}

/// One entry of a mailbox message listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxMessage {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: String,
    /// Raw delivery timestamp. The provider is inconsistent about its shape
    /// (epoch seconds, epoch millis, or a string with or without a zone), so
    /// it is kept raw and normalized at the point of use.
    #[serde(default)]
    pub create_time: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    list: Vec<MailboxMessage>,
}

/// One entry of the provider's account listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxAccount {
    pub email: String,
    pub account_id: u64,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

/// Anything that can list a mailbox's messages, most recent first.
///
/// Seam between [`CodeWaiter`] and the HTTP client so OTP polling is
/// testable without a live mailbox.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn list_messages(
        &self,
        account_id: u64,
        size: u32,
    ) -> Result<Vec<MailboxMessage>, MailboxError>;
}

/// HTTP client for the mailbox provider.
#[derive(Debug, Clone)]
pub struct MailboxClient {
    base_url: String,
    client: Client,
    auth: Option<String>,
}

impl MailboxClient {
    pub fn new(base_url: impl Into<String>, client: Client) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client,
            auth: None,
        }
    }

    /// Attach the session token used on authorized calls.
    pub fn set_auth(&mut self, token: impl Into<String>) {
        self.auth = Some(token.into());
    }

    /// Authenticate the master mailbox identity.
    ///
    /// Network failures are retried with exponential backoff (2s, then 4s);
    /// API-level rejections are permanent.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, MailboxError> {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            exponential: true,
        };
        let token = CancellationToken::new();
        let url = format!("{}/api/login", self.base_url);
        info!(email, "logging in master mailbox account");

        let session = retry_with_backoff(&policy, &token, || MailboxError::Cancelled, |_| {
            let url = url.clone();
            async move {
                let result = async {
                    let response = self
                        .client
                        .post(&url)
                        .json(&serde_json::json!({ "email": email, "password": password }))
                        .send()
                        .await?;
                    let envelope: Envelope<LoginData> = response.json().await?;
                    envelope.into_data()
                }
                .await;

                match result {
                    Ok(data) => RetryAction::Success(data.token),
                    Err(MailboxError::Network(e)) if is_retryable_reqwest_error(&e) => {
                        RetryAction::Retry(MailboxError::Network(e))
                    }
                    Err(e) => RetryAction::Fail(e),
                }
            }
        })
        .await?;

        debug!("master login succeeded");
        Ok(session)
    }

    /// Fetch every account the master owns, following the provider's
    /// cursor pagination (at most 30 entries per page).
    pub async fn list_accounts(&self) -> Result<Vec<MailboxAccount>, MailboxError> {
        const PAGE_SIZE: usize = 30;

        let mut all = Vec::new();
        let mut cursor = 0u64;

        loop {
            let url = format!(
                "{}/api/account/list?accountId={}&size={}",
                self.base_url, cursor, PAGE_SIZE
            );
            let response = self.authorized(self.client.get(&url)).send().await?;
            let envelope: Envelope<Vec<MailboxAccount>> = response.json().await?;
            let page = envelope.into_data()?;

            if page.is_empty() {
                break;
            }

            let short_page = page.len() < PAGE_SIZE;
            cursor = page.last().map(|a| a.account_id).unwrap_or(cursor);
            all.extend(page);
            debug!(total = all.len(), "fetched account listing page");

            if short_page {
                break;
            }
            // Pace the pagination so we don't hammer the provider.
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        Ok(all)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some(token) => request.header(reqwest::header::AUTHORIZATION, token),
            None => request,
        }
    }
}

#[async_trait]
impl MessageSource for MailboxClient {
    async fn list_messages(
        &self,
        account_id: u64,
        size: u32,
    ) -> Result<Vec<MailboxMessage>, MailboxError> {
        let url = format!(
            "{}/api/email/list?accountId={}&emailId=0&timeSort=0&size={}&type=0",
            self.base_url, account_id, size
        );
        let response = self.authorized(self.client.get(&url)).send().await?;
        let envelope: Envelope<MessageList> = response.json().await?;
        Ok(envelope.into_data()?.list)
    }
}
