//! Top-level error type composing the per-component failures.

use thiserror::Error;

use crate::browser::DriverError;
use crate::login::LoginError;
use crate::mailbox::MailboxError;
use crate::pool::PoolError;
use crate::store::StoreError;
use crate::tokens::ExtractError;

/// Failure of a refresh run or of one account attempt within it.
///
/// Only `Config` and `IdentityMismatch` abort a whole run; everything else
/// is retried at its owning component's bound and then degrades to a
/// recorded per-account failure.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("configuration: {0}")]
    Config(String),

    #[error("mailbox identity mismatch: configured master is {expected}, authenticated as {actual}")]
    IdentityMismatch { expected: String, actual: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    Login(#[from] LoginError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("cancelled")]
    Cancelled,
}
