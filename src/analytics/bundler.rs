//! Timer-coalesced event bundling (spec.md §4.4). Grounds
//! `appdAnalyticsApi.go`'s `PostEventsBundled`/`FlushBundle`, but replaces
//! its best-effort cancel-channel pattern with the single coalescing timer
//! Design Notes §9 calls for: one background task per table holds a
//! `tokio::sync::watch`-published deadline, sleeps until it, and flushes
//! only if no later append has pushed the deadline out from under it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

pub const DEFAULT_BUNDLE_SIZE: usize = 20;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives a table's accumulated records once a flush is due (size
/// threshold or idle timeout). Implementations own the HTTP/schema client
/// and are expected to `tokio::spawn` their own async publish work rather
/// than block this call.
pub trait FlushHandler: Send + Sync {
    fn flush(&self, table: &str, records: Vec<serde_json::Value>);
}

struct TableBundle {
    records: Mutex<Vec<serde_json::Value>>,
    deadline_tx: watch::Sender<Instant>,
}

pub struct Bundler {
    bundle_size: usize,
    idle_timeout: Duration,
    handler: Arc<dyn FlushHandler>,
    tables: Mutex<HashMap<String, Arc<TableBundle>>>,
}

impl Bundler {
    pub fn new(handler: Arc<dyn FlushHandler>) -> Self {
        Bundler {
            bundle_size: DEFAULT_BUNDLE_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            handler,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_thresholds(handler: Arc<dyn FlushHandler>, bundle_size: usize, idle_timeout: Duration) -> Self {
        Bundler {
            bundle_size,
            idle_timeout,
            handler,
            tables: Mutex::new(HashMap::new()),
        }
    }

    fn table(self: &Arc<Self>, name: &str) -> Arc<TableBundle> {
        let mut tables = self.tables.lock().expect("bundler tables mutex poisoned");
        if let Some(existing) = tables.get(name) {
            return Arc::clone(existing);
        }
        let (tx, rx) = watch::channel(Instant::now() + self.idle_timeout);
        let bundle = Arc::new(TableBundle {
            records: Mutex::new(Vec::new()),
            deadline_tx: tx,
        });
        tables.insert(name.to_string(), Arc::clone(&bundle));
        drop(tables);

        let this = Arc::clone(self);
        let table_name = name.to_string();
        let bundle_for_task = Arc::clone(&bundle);
        tokio::spawn(async move {
            this.idle_timer_loop(table_name, bundle_for_task, rx).await;
        });
        bundle
    }

    async fn idle_timer_loop(&self, table: String, bundle: Arc<TableBundle>, mut rx: watch::Receiver<Instant>) {
        loop {
            let deadline = *rx.borrow();
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    // only flush if no later append moved the deadline out
                    // from under us while we slept
                    if *rx.borrow() <= Instant::now() {
                        self.flush_table(&table, &bundle);
                    }
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Appends `record` to `table`'s bundle. Any pending idle timer is
    /// implicitly superseded (its deadline push-out below makes the sleeper
    /// re-check and skip its now-stale wakeup); flushes immediately if the
    /// bundle crosses the size threshold.
    pub fn append(self: &Arc<Self>, table: &str, record: serde_json::Value) {
        let bundle = self.table(table);
        let len = {
            let mut records = bundle.records.lock().expect("bundle records mutex poisoned");
            records.push(record);
            records.len()
        };
        let _ = bundle.deadline_tx.send(Instant::now() + self.idle_timeout);

        if len >= self.bundle_size {
            self.flush_table(table, &bundle);
        }
    }

    fn flush_table(&self, table: &str, bundle: &TableBundle) {
        let batch = {
            let mut records = bundle.records.lock().expect("bundle records mutex poisoned");
            if records.is_empty() {
                return;
            }
            std::mem::take(&mut *records)
        };
        self.handler.flush(table, batch);
    }

    /// Caller-driven flush (e.g. on shutdown), taking the same mutex the
    /// timer-driven flush does.
    pub fn flush_now(self: &Arc<Self>, table: &str) {
        let bundle = self.table(table);
        self.flush_table(table, &bundle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        flushes: AtomicUsize,
        total_records: AtomicUsize,
        last_len: Mutex<Vec<usize>>,
    }

    impl FlushHandler for CountingHandler {
        fn flush(&self, _table: &str, records: Vec<serde_json::Value>) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            self.total_records.fetch_add(records.len(), Ordering::SeqCst);
            self.last_len.lock().unwrap().push(records.len());
        }
    }

    // Concrete Scenario F (spec.md §8): 19 appends -> no flush; 20th ->
    // immediate flush of 20; one more -> flush after 5s idle.
    #[tokio::test(start_paused = true)]
    async fn scenario_f_size_threshold_then_idle_flush() {
        let handler = Arc::new(CountingHandler {
            flushes: AtomicUsize::new(0),
            total_records: AtomicUsize::new(0),
            last_len: Mutex::new(Vec::new()),
        });
        let bundler = Arc::new(Bundler::new(Arc::clone(&handler) as Arc<dyn FlushHandler>));

        for i in 0..19 {
            bundler.append("events", serde_json::json!({"i": i}));
        }
        tokio::task::yield_now().await;
        assert_eq!(handler.flushes.load(Ordering::SeqCst), 0);

        bundler.append("events", serde_json::json!({"i": 19}));
        tokio::task::yield_now().await;
        assert_eq!(handler.flushes.load(Ordering::SeqCst), 1);
        assert_eq!(handler.last_len.lock().unwrap().last(), Some(&20));

        bundler.append("events", serde_json::json!({"i": 20}));
        tokio::time::advance(DEFAULT_IDLE_TIMEOUT + Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(handler.flushes.load(Ordering::SeqCst), 2);
        assert_eq!(handler.last_len.lock().unwrap().last(), Some(&1));
    }
}
