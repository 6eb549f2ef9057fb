//! Recording link activator for tests.
//!
//! Every invocation is recorded in order and answered with exit status `0`
//! unless a failure was scripted for that exact command with
//! [`RecordingActivator::fail_command`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::application::link_state::LinkActivator;

/// A mock implementation of [`LinkActivator`] that records every command.
pub struct RecordingActivator {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, i32>>,
}

impl RecordingActivator {
    /// Creates an activator on which every command succeeds.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Makes every later invocation of `command` return `status`.
    pub fn fail_command(&self, command: &str, status: i32) {
        self.failures
            .lock()
            .expect("lock poisoned")
            .insert(command.to_string(), status);
    }

    /// Makes `command` succeed again.
    pub fn succeed_command(&self, command: &str) {
        self.failures.lock().expect("lock poisoned").remove(command);
    }

    /// All commands invoked so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    /// Number of times `command` was invoked.
    pub fn count(&self, command: &str) -> usize {
        self.calls
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    /// Forgets the recorded calls; scripted failures are kept.
    pub fn clear(&self) {
        self.calls.lock().expect("lock poisoned").clear();
    }
}

impl Default for RecordingActivator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkActivator for RecordingActivator {
    async fn invoke(&self, command: &str) -> i32 {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push(command.to_string());
        self.failures
            .lock()
            .expect("lock poisoned")
            .get(command)
            .copied()
            .unwrap_or(0)
    }
}
