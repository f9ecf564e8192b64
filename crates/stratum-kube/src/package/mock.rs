//! Mock package tool for testing
//!
//! Releases live in memory. Failures can be scripted per release, and every
//! call is counted and logged in order so tests can assert on side effects.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stratum_core::Values;

use super::{ApplyOutcome, ApplyRequest, PackageTool};
use crate::error::{KubeError, Result};

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub applies: usize,
    pub statuses: usize,
    pub uninstalls: usize,
}

#[derive(Debug, Clone)]
enum Failure {
    Transient(String),
    Conflict(String),
}

#[derive(Default)]
struct State {
    /// namespace/release -> applied values
    releases: HashMap<String, Values>,
    /// release -> failures consumed by the next applies
    failures: HashMap<String, VecDeque<Failure>>,
    /// release -> failure returned by every apply
    permanent: HashMap<String, Failure>,
    /// release -> error returned by every status call
    status_failures: HashMap<String, String>,
    /// releases whose status call never answers
    hung: HashSet<String>,
    counts: OperationCounts,
    /// `apply:<release>` / `uninstall:<release>` in call order
    calls: Vec<String>,
}

/// In-memory package tool for testing
#[derive(Clone, Default)]
pub struct MockPackageTool {
    state: Arc<Mutex<State>>,
}

impl MockPackageTool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pretend a release already exists
    pub fn with_installed(self, release: &str, namespace: &str) -> Self {
        self.lock()
            .releases
            .insert(key(namespace, release), Values::new());
        self
    }

    /// Fail the next `times` applies of a release
    pub fn fail_next(&self, release: &str, times: usize, message: &str) {
        let mut state = self.lock();
        let queue = state.failures.entry(release.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(Failure::Transient(message.to_string()));
        }
    }

    /// Fail every apply of a release until cleared
    pub fn fail_always(&self, release: &str, message: &str) {
        self.lock()
            .permanent
            .insert(release.to_string(), Failure::Transient(message.to_string()));
    }

    /// Report a conflicting pre-existing resource on every apply
    pub fn conflict(&self, release: &str, message: &str) {
        self.lock()
            .permanent
            .insert(release.to_string(), Failure::Conflict(message.to_string()));
    }

    /// Fail every status call for a release until cleared
    pub fn fail_status(&self, release: &str, message: &str) {
        self.lock()
            .status_failures
            .insert(release.to_string(), message.to_string());
    }

    /// Make status calls for a release block forever
    pub fn hang_status(&self, release: &str) {
        self.lock().hung.insert(release.to_string());
    }

    pub fn clear_failures(&self, release: &str) {
        let mut state = self.lock();
        state.failures.remove(release);
        state.permanent.remove(release);
        state.status_failures.remove(release);
        state.hung.remove(release);
    }

    pub fn is_installed(&self, release: &str, namespace: &str) -> bool {
        self.lock().releases.contains_key(&key(namespace, release))
    }

    /// Values of the last successful apply
    pub fn applied_values(&self, release: &str, namespace: &str) -> Option<Values> {
        self.lock().releases.get(&key(namespace, release)).cloned()
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.lock().counts.clone()
    }

    /// Mutating calls in order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Reset counts and the call log
    pub fn reset_counts(&self) {
        let mut state = self.lock();
        state.counts = OperationCounts::default();
        state.calls.clear();
    }
}

fn key(namespace: &str, release: &str) -> String {
    format!("{}/{}", namespace, release)
}

fn into_error(release: &str, failure: Failure) -> KubeError {
    match failure {
        Failure::Transient(message) => KubeError::PackageTool {
            release: release.to_string(),
            message,
        },
        Failure::Conflict(message) => KubeError::Conflict {
            release: release.to_string(),
            message,
        },
    }
}

#[async_trait]
impl PackageTool for MockPackageTool {
    async fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome> {
        let mut state = self.lock();
        state.counts.applies += 1;
        state.calls.push(format!("apply:{}", request.release));

        let scripted = state
            .failures
            .get_mut(&request.release)
            .and_then(VecDeque::pop_front)
            .or_else(|| state.permanent.get(&request.release).cloned());
        if let Some(failure) = scripted {
            return Err(into_error(&request.release, failure));
        }

        state.releases.insert(
            key(&request.namespace, &request.release),
            request.values.clone(),
        );
        Ok(ApplyOutcome {
            installed: true,
            logs: format!("Release \"{}\" has been upgraded", request.release),
        })
    }

    async fn status(&self, release: &str, namespace: &str) -> Result<bool> {
        {
            let mut state = self.lock();
            state.counts.statuses += 1;
            if let Some(message) = state.status_failures.get(release) {
                return Err(KubeError::PackageTool {
                    release: release.to_string(),
                    message: message.clone(),
                });
            }
            if !state.hung.contains(release) {
                return Ok(state.releases.contains_key(&key(namespace, release)));
            }
        }
        std::future::pending::<()>().await;
        Ok(false)
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        let mut state = self.lock();
        state.counts.uninstalls += 1;
        state.calls.push(format!("uninstall:{}", release));
        state.releases.remove(&key(namespace, release));
        Ok(())
    }
}
