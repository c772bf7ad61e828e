//! # Refresher
//!
//! Session-token refresh pipeline for pools of dependent accounts.
//!
//! One refresh cycle per account: drive the hosted login flow in an
//! isolated browser session, pull the emailed one-time code from the
//! master mailbox, extract the session tokens from the landed page, then
//! persist them locally and reconcile them with the pool service.
//! Accounts are processed in fixed-size concurrent waves.
//!
//! External capabilities (browser automation, mailbox, pool REST API,
//! snapshot storage) sit behind traits so each stage is testable in
//! isolation:
//!
//! - [`browser::BrowserDriver`] / [`browser::BrowserProvider`]
//! - [`mailbox::MessageSource`] / [`mailbox::CodeSource`]
//! - [`pool::PoolApi`]
//! - [`store::AccountStore`]

pub mod browser;
pub mod config;
pub mod error;
pub mod login;
pub mod mailbox;
pub mod models;
pub mod pool;
pub mod refresh;
pub mod retry;
pub mod store;
pub mod tokens;

#[cfg(test)]
pub(crate) mod testkit;

/// Re-export key traits and types
pub use error::RefreshError;
pub use models::{
    AccountSnapshot, BatchSummary, DependentAccount, MasterAccount, PoolAction, PoolRecord,
    RefreshResult, ResyncReport, SessionTokens, SyncOutcome,
};
pub use refresh::{AccountRefresher, BatchScheduler, Refresh, RefreshOrchestrator};
