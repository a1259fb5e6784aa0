use std::{
    any::Any,
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

use parking_lot::{Condvar, Mutex};

use crate::error::{FusionError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    Admitted,
    /// Admitted after evicting the oldest pending item.
    Evicted,
    /// The queue has shut down; the item went straight to the cancel callback.
    Rejected,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub processed: u64,
    pub canceled: u64,
}

pub struct WorkQueue<T: Send + 'static> {
    name: String,
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<T> {
    max_depth: usize,
    state: Mutex<QueueState<T>>,
    available: Condvar,
    on_canceled: Box<dyn Fn(T) + Send + Sync>,
}

struct QueueState<T> {
    pending: VecDeque<T>,
    in_flight: bool,
    stopped: bool,
    stats: QueueStats,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Start the worker thread. `process` runs on it for every admitted item;
    /// `on_canceled` receives every evicted or drained item.
    pub fn spawn<P, C>(
        name: impl Into<String>,
        max_depth: usize,
        process: P,
        on_canceled: C,
    ) -> Result<Self>
    where
        P: FnMut(T) + Send + 'static,
        C: Fn(T) + Send + Sync + 'static,
    {
        Self::spawn_with_panic_hook(name, max_depth, process, on_canceled, |_| {})
    }

    /// Like [`WorkQueue::spawn`], with `on_panic` called on the worker thread
    /// with the message of every item whose processing panicked.
    pub fn spawn_with_panic_hook<P, C, H>(
        name: impl Into<String>,
        max_depth: usize,
        process: P,
        on_canceled: C,
        on_panic: H,
    ) -> Result<Self>
    where
        P: FnMut(T) + Send + 'static,
        C: Fn(T) + Send + Sync + 'static,
        H: Fn(&str) + Send + 'static,
    {
        let name = name.into();
        let max_depth = max_depth.max(1);
        let shared = Arc::new(Shared {
            max_depth,
            state: Mutex::new(QueueState {
                pending: VecDeque::with_capacity(max_depth),
                in_flight: false,
                stopped: false,
                stats: QueueStats::default(),
            }),
            available: Condvar::new(),
            on_canceled: Box::new(on_canceled),
        });

        let worker_shared = Arc::clone(&shared);
        let worker_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(&worker_shared, &worker_name, process, on_panic))
            .map_err(|source| FusionError::WorkerSpawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_depth(&self) -> usize {
        self.shared.max_depth
    }

    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_busy(&self) -> bool {
        self.shared.state.lock().in_flight
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.state.lock().stats
    }

    /// Admit `item` without blocking. A full queue evicts its oldest pending
    /// item; the one in flight is never touched.
    pub fn enqueue(&self, item: T) -> Enqueued {
        let evicted = {
            let mut state = self.shared.state.lock();
            if state.stopped {
                state.stats.canceled += 1;
                drop(state);
                (self.shared.on_canceled)(item);
                return Enqueued::Rejected;
            }

            let evicted = if state.pending.len() >= self.shared.max_depth {
                state.pending.pop_front()
            } else {
                None
            };
            if evicted.is_some() {
                state.stats.canceled += 1;
            }
            state.pending.push_back(item);
            evicted
        };
        self.shared.available.notify_one();

        match evicted {
            Some(old) => {
                log::trace!("{}: queue full, evicting oldest pending item", self.name);
                (self.shared.on_canceled)(old);
                Enqueued::Evicted
            }
            None => Enqueued::Admitted,
        }
    }

    pub fn shutdown(&self) {
        let drained: Vec<T> = {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            let drained: Vec<T> = state.pending.drain(..).collect();
            state.stats.canceled += drained.len() as u64;
            drained
        };
        self.shared.available.notify_all();

        if !drained.is_empty() {
            log::debug!("{}: draining {} pending items", self.name, drained.len());
        }
        for item in drained {
            (self.shared.on_canceled)(item);
        }

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // Dropped from inside our own callback; the loop exits on its own.
                return;
            }
            if handle.join().is_err() {
                log::error!("{}: worker thread panicked", self.name);
            }
        }
    }
}

impl<T: Send + 'static> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Send + 'static> std::fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .field("max_depth", &self.shared.max_depth)
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight)
            .field("stats", &state.stats)
            .finish()
    }
}

impl<T> Shared<T> {
    fn next_item(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(item) = state.pending.pop_front() {
                state.in_flight = true;
                return Some(item);
            }
            self.available.wait(&mut state);
        }
    }

    fn finish_item(&self) {
        let mut state = self.state.lock();
        state.in_flight = false;
        state.stats.processed += 1;
    }
}

fn run_worker<T, P, H>(shared: &Shared<T>, name: &str, mut process: P, on_panic: H)
where
    P: FnMut(T),
    H: Fn(&str),
{
    log::debug!("{name}: worker started");

    while let Some(item) = shared.next_item() {
        // A failing item must not take the worker down with it.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| process(item))) {
            let message = panic_message(&*payload);
            log::error!("{name}: item processing panicked: {message}");
            on_panic(message);
        }
        shared.finish_item();
    }

    log::debug!("{name}: worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
