use crate::error::SyncError;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;

type Queue<F> = Mutex<std::iter::Enumerate<std::vec::IntoIter<F>>>;

fn next_task<F>(queue: &Queue<F>) -> Option<(usize, F)> {
    queue.lock().ok().and_then(|mut queue| queue.next())
}

/// Runs `tasks` with at most `limit` of them in flight.
///
/// Workers pull the next task from a shared cursor until it is exhausted.
/// The result of task `i` is stored at index `i`; a task that fails or
/// panics yields `Err` there without affecting the others.
pub async fn run_with_concurrency<T, F, Fut>(
    tasks: Vec<F>,
    limit: usize,
) -> Vec<Result<T, SyncError>>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
{
    let total = tasks.len();
    if total == 0 {
        return Vec::new();
    }

    let workers = limit.clamp(1, total);
    let queue: Arc<Queue<F>> = Arc::new(Mutex::new(tasks.into_iter().enumerate()));
    let mut join_set = JoinSet::new();

    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        join_set.spawn(async move {
            let mut finished = Vec::new();
            while let Some((index, task)) = next_task(&queue) {
                // Spawned separately so a panic only loses this task
                let result = match tokio::spawn(task()).await {
                    Ok(result) => result,
                    Err(e) => Err(SyncError::Other(format!("Task {} aborted: {}", index, e))),
                };
                finished.push((index, result));
            }
            finished
        });
    }

    let mut slots: Vec<Option<Result<T, SyncError>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(finished) => {
                for (index, result) in finished {
                    slots[index] = Some(result);
                }
            }
            Err(e) => log::error!("Sync worker failed: {}", e),
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| Err(SyncError::Other(format!("Task {} did not complete", index))))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_task_order() {
        let tasks: Vec<_> = (0..6u64)
            .map(|i| {
                move || async move {
                    // Later tasks finish first
                    tokio::time::sleep(Duration::from_millis(30 - i * 5)).await;
                    Ok::<_, SyncError>(i * 10)
                }
            })
            .collect();

        let results = run_with_concurrency(tasks, 3).await;
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn test_limit_is_respected_and_reached() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                move || async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, SyncError>(())
                }
            })
            .collect();

        let results = run_with_concurrency(tasks, 3).await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_isolated() {
        let tasks: Vec<_> = (1..=4u8)
            .map(|i| {
                move || async move {
                    match i {
                        2 => Err(SyncError::Other("boom".to_string())),
                        3 => panic!("worker panic"),
                        _ => Ok(i),
                    }
                }
            })
            .collect();

        let results = run_with_concurrency(tasks, 2).await;
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().ok(), Some(&1));
        assert!(results[1].is_err());
        assert!(results[2].is_err());
        assert_eq!(results[3].as_ref().ok(), Some(&4));
    }

    #[tokio::test]
    async fn test_zero_limit_and_empty_input() {
        let results = run_with_concurrency(vec![|| async { Ok::<_, SyncError>(7) }], 0).await;
        assert_eq!(results[0].as_ref().ok(), Some(&7));

        let empty: Vec<fn() -> std::future::Ready<Result<(), SyncError>>> = Vec::new();
        assert!(run_with_concurrency(empty, 3).await.is_empty());
    }
}
