//! Persistence seam for the account snapshot.
//!
//! The pipeline only needs get/set semantics over the snapshot; storage
//! format and location belong to the caller.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AccountSnapshot, SessionTokens};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot malformed: {0}")]
    Malformed(String),
    #[error("unknown account: {0}")]
    UnknownAccount(String),
}

/// Get/set access to the `{master, dependent accounts}` snapshot.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load(&self) -> Result<AccountSnapshot, StoreError>;

    async fn save(&self, snapshot: &AccountSnapshot) -> Result<(), StoreError>;

    /// Replace one dependent account's tokens and persist. The default
    /// load-modify-save is fine for stores without finer-grained writes.
    async fn update_tokens(&self, email: &str, tokens: &SessionTokens) -> Result<(), StoreError> {
        let mut snapshot = self.load().await?;
        let account = snapshot
            .accounts
            .iter_mut()
            .find(|a| a.email == email)
            .ok_or_else(|| StoreError::UnknownAccount(email.to_string()))?;
        account.tokens = Some(tokens.clone());
        self.save(&snapshot).await
    }
}
