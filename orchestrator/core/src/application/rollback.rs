// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Scoped compensation for partially completed work.
//!
//! Each step that creates something registers the action undoing it. On
//! success the guard is disarmed; on failure [`RollbackGuard::unwind`] runs
//! the actions in reverse registration order. A guard dropped while still
//! armed (early return, task abort) hands its pending actions to the runtime.

use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

use crate::domain::error::ClusterError;

type RollbackAction = Pin<Box<dyn Future<Output = Result<(), ClusterError>> + Send>>;

pub struct RollbackGuard {
    scope: String,
    actions: Vec<(String, RollbackAction)>,
}

impl RollbackGuard {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            actions: Vec::new(),
        }
    }

    pub fn register<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: Future<Output = Result<(), ClusterError>> + Send + 'static,
    {
        self.actions.push((label.into(), Box::pin(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Forgets every registered action.
    pub fn disarm(mut self) {
        self.actions.clear();
    }

    /// Runs every registered action, last registered first. Failures are
    /// logged and do not stop the remaining actions.
    pub async fn unwind(mut self) -> usize {
        let actions = std::mem::take(&mut self.actions);
        run_actions(&self.scope, actions).await
    }
}

async fn run_actions(scope: &str, actions: Vec<(String, RollbackAction)>) -> usize {
    let mut failed = 0;
    for (label, action) in actions.into_iter().rev() {
        match action.await {
            Ok(()) => debug!(scope, action = %label, "Rollback action completed"),
            Err(e) => {
                failed += 1;
                warn!(scope, action = %label, "Rollback action failed: {}", e);
            }
        }
    }
    failed
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if self.actions.is_empty() {
            return;
        }
        let actions = std::mem::take(&mut self.actions);
        let scope = std::mem::take(&mut self.scope);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(scope = %scope, "Rollback guard dropped while armed, unwinding in background");
                handle.spawn(async move {
                    run_actions(&scope, actions).await;
                });
            }
            Err(_) => warn!(
                scope = %scope,
                pending = actions.len(),
                "Rollback guard dropped outside a runtime, actions skipped"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(log: &Arc<Mutex<Vec<String>>>, label: &'static str, fail: bool) -> impl Future<Output = Result<(), ClusterError>> {
        let log = log.clone();
        async move {
            log.lock().push(label.to_string());
            if fail {
                Err(ClusterError::Configuration(format!("{} failed", label)))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_unwind_runs_in_reverse_and_continues_past_failures() {
        let log = recorder();
        let mut guard = RollbackGuard::new("test");
        guard.register("network", push(&log, "network", false));
        guard.register("keypair", push(&log, "keypair", true));
        guard.register("gateway", push(&log, "gateway", false));

        assert_eq!(guard.unwind().await, 1);
        assert_eq!(*log.lock(), vec!["gateway", "keypair", "network"]);
    }

    #[tokio::test]
    async fn test_disarm_skips_actions() {
        let log = recorder();
        let mut guard = RollbackGuard::new("test");
        guard.register("network", push(&log, "network", false));
        guard.disarm();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_drop_while_armed_unwinds_in_background() {
        let log = recorder();
        {
            let mut guard = RollbackGuard::new("test");
            guard.register("host", push(&log, "host", false));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*log.lock(), vec!["host"]);
    }
}
