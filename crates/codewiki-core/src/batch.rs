//! Order-preserving bounded-concurrency runner.
//!
//! [`run_bounded`] maps an async function over a list of inputs with at most
//! `limit` calls in flight and returns outputs in input order, whatever order
//! the calls finish in. It only needs the `futures` executor primitives, so
//! it runs on any async runtime.
//!
//! Workers share an atomic cursor: each claims the next index with
//! `fetch_add`, takes that input, awaits the call, and writes the result into
//! the slot for that index. Every slot is written exactly once.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use futures::future::join_all;

/// Run `f(index, input)` over `inputs` with at most `limit` concurrent calls.
///
/// Output `[i]` is the result for input `[i]`. A `limit` of zero is treated
/// as one. Errors are the caller's business: make `O` a `Result` to carry
/// them per item.
///
/// ```rust
/// use codewiki_core::batch::run_bounded;
///
/// let out = futures::executor::block_on(run_bounded(vec![1, 2, 3], 2, |_, x| async move { x * 10 }));
/// assert_eq!(out, vec![10, 20, 30]);
/// ```
pub async fn run_bounded<I, O, F, Fut>(inputs: Vec<I>, limit: usize, f: F) -> Vec<O>
where
    F: Fn(usize, I) -> Fut,
    Fut: Future<Output = O>,
{
    let n = inputs.len();
    if n == 0 {
        return Vec::new();
    }

    let inputs: Vec<Mutex<Option<I>>> = inputs.into_iter().map(|i| Mutex::new(Some(i))).collect();
    let slots: Vec<OnceLock<O>> = (0..n).map(|_| OnceLock::new()).collect();
    let cursor = AtomicUsize::new(0);
    let workers = limit.max(1).min(n);

    let (inputs_ref, slots_ref, cursor_ref, f_ref) = (&inputs, &slots, &cursor, &f);
    let worker = move || async move {
        loop {
            let idx = cursor_ref.fetch_add(1, Ordering::Relaxed);
            if idx >= n {
                break;
            }
            let input = inputs_ref[idx]
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(input) = input {
                let out = f_ref(idx, input).await;
                let _ = slots_ref[idx].set(out);
            }
        }
    };

    join_all((0..workers).map(|_| worker())).await;

    let out: Vec<O> = slots.into_iter().filter_map(OnceLock::into_inner).collect();
    debug_assert_eq!(out.len(), n, "every slot is written exactly once");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_order_preserved_under_skewed_latency() {
        let inputs: Vec<u64> = vec![1, 2, 3, 4, 5];
        let out = run_bounded(inputs, 3, |_, x| async move {
            tokio::time::sleep(Duration::from_millis((6 - x) * 15)).await;
            x * 2
        })
        .await;
        assert_eq!(out, vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let out = run_bounded((0..12).collect::<Vec<u32>>(), 3, |i, x| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                assert_eq!(i as u32, x);
                x
            }
        })
        .await;

        assert_eq!(out, (0..12).collect::<Vec<u32>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let out: Vec<u8> = run_bounded(Vec::<u8>::new(), 4, |_, x| async move { x }).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_zero_limit_runs_sequentially() {
        let out = run_bounded(vec!["a", "b"], 0, |i, s| async move { format!("{i}{s}") }).await;
        assert_eq!(out, vec!["0a", "1b"]);
    }

    #[tokio::test]
    async fn test_per_item_errors_stay_in_place() {
        let out = run_bounded(vec![1, 2, 3], 2, |_, x| async move {
            if x == 2 {
                Err(format!("bad {x}"))
            } else {
                Ok(x)
            }
        })
        .await;
        assert_eq!(out, vec![Ok(1), Err("bad 2".to_string()), Ok(3)]);
    }
}
