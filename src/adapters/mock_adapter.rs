//! Mock hardware adapter for testing
//!
//! Stands in for an instrument without any hardware. It provides:
//! - Scripted replies keyed by command text
//! - A fallback reply for instruments that acknowledge every command
//! - Controllable failure injection
//! - Call logging for test verification
//!
//! Commands are matched after stripping trailing `\r`/`\n`. When a command has a
//! queue of replies they are handed out in order; the last one repeats forever,
//! which is how a polled readback settles on its final value.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::Adapter;
use crate::error::AdapterError;

#[derive(Debug, Default)]
struct MockState {
    replies: HashMap<String, VecDeque<String>>,
    fallback: Option<String>,
    pending: VecDeque<String>,
    written: Vec<String>,
    fail_next: bool,
}

/// Mock hardware adapter for testing
///
/// Clones share state, so a test can keep one handle for inspection while the
/// driver owns another.
///
/// # Example
///
/// ```
/// use lab_instruments::adapters::MockAdapter;
///
/// let adapter = MockAdapter::new().with_reply(":POW?", "-10.0");
/// assert!(adapter.written().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    /// Create a mock with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock from a command → reply map (used by `mock` transports in config).
    pub fn from_replies<'a>(replies: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let adapter = Self::new();
        for (command, reply) in replies {
            adapter.push_reply(command, reply);
        }
        adapter
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue one reply for `command`.
    pub fn with_reply(self, command: &str, reply: &str) -> Self {
        self.push_reply(command, reply);
        self
    }

    /// Queue several replies for `command`, handed out in order.
    pub fn with_replies(self, command: &str, replies: &[&str]) -> Self {
        for reply in replies {
            self.push_reply(command, reply);
        }
        self
    }

    /// Reply to every command that has no scripted reply.
    pub fn with_fallback(self, reply: &str) -> Self {
        self.state().fallback = Some(reply.to_string());
        self
    }

    /// Append a reply for `command` after construction.
    pub fn push_reply(&self, command: &str, reply: &str) {
        self.state()
            .replies
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    /// Inject a failure for the next write
    pub fn inject_next_failure(&self) {
        self.state().fail_next = true;
    }

    /// Commands written so far, terminators stripped.
    pub fn written(&self) -> Vec<String> {
        self.state().written.clone()
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        self.state().written.clear();
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn adapter_type(&self) -> &str {
        "mock"
    }

    fn info(&self) -> String {
        "MockAdapter".to_string()
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), AdapterError> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next) {
            return Err(AdapterError::Injected);
        }

        let command = String::from_utf8_lossy(data)
            .trim_end_matches(['\r', '\n'])
            .to_string();

        let reply = match state.replies.get_mut(&command) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => state.fallback.clone(),
        };
        if let Some(reply) = reply {
            state.pending.push_back(reply);
        }
        state.written.push(command);
        Ok(())
    }

    async fn read_until(
        &mut self,
        _delimiter: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, AdapterError> {
        self.state()
            .pending
            .pop_front()
            .map(String::into_bytes)
            .ok_or(AdapterError::Timeout { after: timeout })
    }

    async fn clear(&mut self) -> Result<(), AdapterError> {
        self.state().pending.clear();
        Ok(())
    }
}
