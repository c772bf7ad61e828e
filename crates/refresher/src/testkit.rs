//! Shared test doubles for the browser and mailbox seams.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::browser::{BrowserDriver, BrowserProvider, DriverError, PageCondition, Target};
use crate::mailbox::{CodeSource, MailboxError};

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn target_key(target: &Target) -> String {
    match target {
        Target::Field(name) => format!("field:{name}"),
        Target::Labeled { label, .. } => format!("labeled:{label}"),
        Target::FirstEditable => "first-editable".to_string(),
    }
}

/// What a scripted session saw, inspectable after the driver was consumed.
#[derive(Default)]
pub struct SessionRecord {
    pub actions: Vec<String>,
    pub closed: bool,
}

impl SessionRecord {
    pub fn action_count(&self, prefix: &str) -> usize {
        self.actions.iter().filter(|a| a.starts_with(prefix)).count()
    }
}

/// A browser driver that replays a pre-scripted page, recording every action.
///
/// `wait_any` outcomes and `current_url` values are consumed front-to-back;
/// when a queue runs dry the driver keeps answering with the last URL and
/// `None` for waits.
#[derive(Default)]
pub struct ScriptedDriver {
    pub waits: VecDeque<Option<usize>>,
    pub urls: VecDeque<String>,
    pub cookies: HashMap<String, String>,
    /// Per-call `activate` results; `true` once exhausted.
    pub activations: VecDeque<bool>,
    /// Per-call `fill` results; `true` once exhausted.
    pub fills: VecDeque<bool>,
    pub record: Arc<Mutex<SessionRecord>>,
    current: String,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_waits(mut self, waits: impl IntoIterator<Item = Option<usize>>) -> Self {
        self.waits = waits.into_iter().collect();
        self
    }

    pub fn with_urls(mut self, urls: impl IntoIterator<Item = &'static str>) -> Self {
        self.urls = urls.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn record(&self) -> Arc<Mutex<SessionRecord>> {
        Arc::clone(&self.record)
    }

    fn log(&self, action: String) {
        self.record.lock().actions.push(action);
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.log(format!("navigate:{url}"));
        Ok(())
    }

    async fn fill(&mut self, target: &Target, text: &str) -> Result<bool, DriverError> {
        self.log(format!("fill:{}={text}", target_key(target)));
        Ok(self.fills.pop_front().unwrap_or(true))
    }

    async fn activate(&mut self, target: &Target) -> Result<bool, DriverError> {
        self.log(format!("activate:{}", target_key(target)));
        Ok(self.activations.pop_front().unwrap_or(true))
    }

    async fn type_text(&mut self, text: &str) -> Result<(), DriverError> {
        self.log(format!("type:{text}"));
        Ok(())
    }

    async fn press_enter(&mut self) -> Result<(), DriverError> {
        self.log("enter".to_string());
        Ok(())
    }

    async fn wait_any(
        &mut self,
        _conditions: &[PageCondition],
        _timeout: Duration,
    ) -> Result<Option<usize>, DriverError> {
        self.log("wait".to_string());
        Ok(self.waits.pop_front().unwrap_or(None))
    }

    async fn cookie(&mut self, name: &str) -> Result<Option<String>, DriverError> {
        Ok(self.cookies.get(name).cloned())
    }

    async fn current_url(&mut self) -> Result<String, DriverError> {
        if let Some(next) = self.urls.pop_front() {
            self.current = next;
        }
        Ok(self.current.clone())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.record.lock().closed = true;
        Ok(())
    }
}

/// Hands out scripted drivers in order, one per `open_session` call.
pub struct QueueProvider {
    drivers: Mutex<VecDeque<ScriptedDriver>>,
}

impl QueueProvider {
    pub fn new(drivers: impl IntoIterator<Item = ScriptedDriver>) -> Self {
        Self {
            drivers: Mutex::new(drivers.into_iter().collect()),
        }
    }

    /// Sessions not yet handed out.
    pub fn remaining(&self) -> usize {
        self.drivers.lock().len()
    }
}

#[async_trait]
impl BrowserProvider for QueueProvider {
    async fn open_session(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        let driver = self
            .drivers
            .lock()
            .pop_front()
            .ok_or_else(|| DriverError::Protocol("no scripted session left".to_string()))?;
        Ok(Box::new(driver))
    }
}

/// A code source that always produces the same code.
pub struct StaticCodes(pub &'static str);

#[async_trait]
impl CodeSource for StaticCodes {
    async fn fetch_code(&self, _account_id: u64) -> Result<String, MailboxError> {
        Ok(self.0.to_string())
    }
}
