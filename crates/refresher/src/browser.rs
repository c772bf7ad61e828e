//! Browser-automation capability consumed by the login state machine.
//!
//! The pipeline never drives a browser directly; it talks to a
//! [`BrowserDriver`] injected by the caller, so the login flow is testable
//! against a scripted driver without a real browser.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("browser session closed")]
    Closed,
}

/// Accessibility role of an actionable element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Button,
    Link,
    /// Match buttons and links alike.
    Any,
}

/// Capability-neutral element reference.
///
/// Drivers resolve these however their automation backend allows (selector,
/// accessibility tree, text search); the state machine never sees markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Editable input identified by its field name.
    Field(String),
    /// Actionable element identified by role and visible label text.
    Labeled { role: Role, label: String },
    /// First visible editable text input on the page.
    FirstEditable,
}

impl Target {
    pub fn field(name: impl Into<String>) -> Self {
        Target::Field(name.into())
    }

    pub fn labeled(role: Role, label: impl Into<String>) -> Self {
        Target::Labeled {
            role,
            label: label.into(),
        }
    }
}

/// A condition the driver can wait on. [`BrowserDriver::wait_any`] races
/// several of these against one shared timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCondition {
    TargetVisible(Target),
    TextPresent(String),
}

/// One isolated browser session.
///
/// All operations suspend at the I/O boundary. A session acquired for an
/// account attempt must be closed on every exit path of that attempt.
#[async_trait]
pub trait BrowserDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    /// Clear and fill an editable target. Returns `false` when no matching
    /// element exists, leaving fallback handling to the caller.
    async fn fill(&mut self, target: &Target, text: &str) -> Result<bool, DriverError>;

    /// Activate (click) a target. Returns `false` when no matching element
    /// exists, leaving fallback handling to the caller.
    async fn activate(&mut self, target: &Target) -> Result<bool, DriverError>;

    /// Type into whatever currently has focus. Keyboard fallback for pages
    /// where no fillable target can be located.
    async fn type_text(&mut self, text: &str) -> Result<(), DriverError>;

    async fn press_enter(&mut self) -> Result<(), DriverError>;

    /// Wait until one of `conditions` settles, returning its index, or
    /// `None` if the timeout elapses first.
    async fn wait_any(
        &mut self,
        conditions: &[PageCondition],
        timeout: Duration,
    ) -> Result<Option<usize>, DriverError>;

    /// Current value of a named cookie, if set.
    async fn cookie(&mut self, name: &str) -> Result<Option<String>, DriverError>;

    async fn current_url(&mut self) -> Result<String, DriverError>;

    /// Release the session. Idempotent.
    async fn close(&mut self) -> Result<(), DriverError>;
}

/// Source of isolated browser sessions, one per account attempt.
#[async_trait]
pub trait BrowserProvider: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn BrowserDriver>, DriverError>;
}
