// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::error;

use crate::domain::error::ClusterError;

/// Runs `task(index, item)` for every item on its own tokio task, at most
/// `max_parallel` at a time, and waits for all of them.
///
/// No task is cancelled when a sibling fails. Indexes are 1-based. On
/// failure every error message is kept, ordered by index and joined with
/// newlines into a single [`ClusterError::Aggregate`]; a lone failure is
/// returned as-is.
pub async fn fan_out<I, F, Fut, T>(items: Vec<I>, max_parallel: usize, task: F) -> Result<Vec<T>, ClusterError>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(usize, I) -> Fut,
    Fut: Future<Output = Result<T, ClusterError>> + Send + 'static,
{
    let count = items.len();
    if count == 0 {
        return Ok(Vec::new());
    }

    let permits = Arc::new(Semaphore::new(max_parallel.max(1)));
    let (tx, mut rx) = mpsc::channel(count);

    for (offset, item) in items.into_iter().enumerate() {
        let index = offset + 1;
        let fut = task(index, item);
        let permits = permits.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => fut.await,
                Err(_) => Err(ClusterError::Configuration("fan-out pool closed".to_string())),
            };
            let _ = tx.send((index, result)).await;
        });
    }
    drop(tx);

    let mut successes = Vec::with_capacity(count);
    let mut failures = Vec::new();
    while let Some((index, result)) = rx.recv().await {
        match result {
            Ok(value) => successes.push((index, value)),
            Err(err) => failures.push((index, err)),
        }
    }

    // A task that panicked never reported
    let reported = successes.len() + failures.len();
    if reported < count {
        error!("{} of {} fan-out tasks ended without reporting", count - reported, count);
        failures.push((
            usize::MAX,
            ClusterError::Aggregate(format!(
                "{} of {} tasks ended without reporting a result",
                count - reported,
                count
            )),
        ));
    }

    if failures.is_empty() {
        successes.sort_by_key(|(index, _)| *index);
        return Ok(successes.into_iter().map(|(_, value)| value).collect());
    }

    failures.sort_by_key(|(index, _)| *index);
    if failures.len() == 1 {
        let (_, err) = failures.remove(0);
        return Err(err);
    }
    Err(ClusterError::aggregate(
        failures.into_iter().map(|(_, err)| err).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_succeed_in_index_order() {
        let result = fan_out(vec!["a", "b", "c"], 8, |index, item| async move {
            tokio::time::sleep(Duration::from_millis((4 - index as u64) * 5)).await;
            Ok(format!("{}{}", item, index))
        })
        .await
        .unwrap();
        assert_eq!(result, vec!["a1", "b2", "c3"]);
    }

    #[tokio::test]
    async fn test_every_sibling_error_is_reported() {
        let completed = Arc::new(AtomicUsize::new(0));
        let err = fan_out((0..5).collect::<Vec<i32>>(), 5, |index, _| {
            let completed = completed.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                if index % 2 == 0 {
                    Err(ClusterError::Sizing(format!("host #{} failed", index)))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap_err();

        // Failures did not cancel the siblings
        assert_eq!(completed.load(Ordering::SeqCst), 5);
        let text = err.to_string();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("host #2 failed"));
        assert!(text.contains("host #4 failed"));
        assert!(text.find("host #2").unwrap() < text.find("host #4").unwrap());
    }

    #[tokio::test]
    async fn test_single_failure_is_not_wrapped() {
        let err = fan_out(vec![()], 1, |_, _| async { Err::<(), _>(ClusterError::Cancelled) })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_width_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        fan_out((0..12).collect::<Vec<i32>>(), 3, |_, _: i32| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let err = fan_out(vec![1, 2], 2, |index, _: i32| async move {
            if index == 2 {
                panic!("boom");
            }
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("1 of 2 tasks ended without reporting"));
    }
}
