
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::debug;

/// Per-key trailing-edge debouncer.
///
/// Each key has at most one pending timer. Scheduling again for the same key
/// aborts the pending timer and restarts the delay, so only the last request
/// in a burst runs. Triggers for the same key never overlap: a trigger that
/// fires while the previous one is still running waits for it to finish.
#[derive(Debug)]
pub struct Debouncer<K> {
    state: Arc<Mutex<State<K>>>,
}

#[derive(Debug)]
struct State<K> {
    next_generation: u64,
    pending: HashMap<K, Pending>,
    run_locks: HashMap<K, Arc<tokio::sync::Mutex<()>>>,
}

#[derive(Debug)]
struct Pending {
    generation: u64,
    handle: AbortHandle,
}

impl<K> Default for Debouncer<K> {
    #[inline]
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_generation: 0,
                pending: HashMap::new(),
                run_locks: HashMap::new(),
            })),
        }
    }
}

impl<K> Clone for Debouncer<K> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
{
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `trigger` once `delay` has passed without another `schedule` for `key`
    #[inline]
    pub fn schedule<F, Fut>(&self, key: K, delay: Duration, trigger: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // Held across the spawn so the timer cannot observe the map before
        // its own entry is recorded
        let mut state = lock(&self.state);

        state.next_generation += 1;
        let generation = state.next_generation;
        let run_lock = Arc::clone(state.run_locks.entry(key.clone()).or_default());

        let shared = Arc::clone(&self.state);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut state = lock(&shared);
                match state.pending.get(&task_key) {
                    Some(pending) if pending.generation == generation => {
                        state.pending.remove(&task_key);
                    }
                    _ => return,
                }
            }

            {
                let _running = run_lock.lock().await;
                trigger().await;
            }

            release(&shared, &task_key, &run_lock);
        });

        let replaced = state.pending.insert(
            key.clone(),
            Pending {
                generation,
                handle: task.abort_handle(),
            },
        );

        if let Some(previous) = replaced {
            previous.handle.abort();
            debug!("Rescheduled pending update for {:?}", key);
        }
    }

    /// Run `work` while holding the run lock for `key`.
    ///
    /// Waits for any trigger of `key` that is already running, and keeps
    /// triggers that fire meanwhile waiting until `work` is done. Pending
    /// timers are left alone.
    #[inline]
    pub async fn run_exclusive<Fut>(&self, key: K, work: Fut) -> Fut::Output
    where
        Fut: Future + Send,
    {
        let run_lock = Arc::clone(lock(&self.state).run_locks.entry(key.clone()).or_default());

        let output = {
            let _running = run_lock.lock().await;
            work.await
        };

        release(&self.state, &key, &run_lock);
        output
    }

    /// Drop the pending timer for `key`; returns whether one was pending
    #[inline]
    pub fn cancel(&self, key: &K) -> bool {
        let mut state = lock(&self.state);
        state.pending.remove(key).is_some_and(|pending| {
            pending.handle.abort();
            true
        })
    }

    /// Drop every pending timer. Triggers already running are not interrupted.
    #[inline]
    pub fn cancel_all(&self) -> usize {
        let mut state = lock(&self.state);
        let count = state.pending.len();
        for (_, pending) in state.pending.drain() {
            pending.handle.abort();
        }
        count
    }

    #[inline]
    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.state).pending.contains_key(key)
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }
}

/// Forget the run lock for `key` once nobody else holds or awaits it
fn release<K>(state: &Mutex<State<K>>, key: &K, run_lock: &Arc<tokio::sync::Mutex<()>>)
where
    K: Eq + Hash,
{
    let mut state = lock(state);
    // Map plus the caller are the only holders when nothing else is queued
    if !state.pending.contains_key(key) && Arc::strong_count(run_lock) <= 2 {
        state.run_locks.remove(key);
    }
}

fn lock<K>(state: &Mutex<State<K>>) -> MutexGuard<'_, State<K>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
