use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info};

use super::{Clock, LayerReadinessCache};

struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Background thread running [`LayerReadinessCache::sweep`] on an interval.
/// Stops when [`stop`](Self::stop) is called or the handle is dropped.
pub struct SweeperHandle {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Readiness sweeper thread panicked");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// [`spawn_sweeper`] at the cache's configured `sweep_interval`.
pub fn spawn_configured_sweeper<K>(cache: Arc<LayerReadinessCache<K>>) -> io::Result<SweeperHandle>
where
    K: Clock + 'static,
{
    let interval = cache.config().sweep_interval();
    spawn_sweeper(cache, interval)
}

pub fn spawn_sweeper<K>(
    cache: Arc<LayerReadinessCache<K>>,
    interval: Duration,
) -> io::Result<SweeperHandle>
where
    K: Clock + 'static,
{
    let signal = Arc::new(StopSignal {
        stopped: Mutex::new(false),
        wake: Condvar::new(),
    });
    let thread_signal = Arc::clone(&signal);

    let thread = thread::Builder::new()
        .name("readiness-sweeper".to_string())
        .spawn(move || {
            info!("Readiness sweeper started (interval {:?})", interval);
            let mut stopped = thread_signal.stopped.lock();
            while !*stopped {
                let timed_out = thread_signal.wake.wait_for(&mut stopped, interval).timed_out();
                if *stopped {
                    break;
                }
                if timed_out {
                    // Unlocked so stop() is not held up by release hooks.
                    let evicted = MutexGuard::unlocked(&mut stopped, || cache.sweep());
                    if evicted > 0 {
                        debug!("Readiness sweeper evicted {} sessions", evicted);
                    }
                }
            }
            info!("Readiness sweeper stopped");
        })?;

    Ok(SweeperHandle {
        signal,
        thread: Some(thread),
    })
}
