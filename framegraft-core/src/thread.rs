//! Worker thread and per-thread context storage.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

/// Number of pre-sized fast-path slots. Thread indices beyond this spill
/// into a map.
const FAST_PATH_SLOTS: usize = 65_536;

static NEXT_THREAD_INDEX: AtomicU32 = AtomicU32::new(0);

thread_local! {
    static THREAD_INDEX: u32 = NEXT_THREAD_INDEX.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_index() -> u32 {
    THREAD_INDEX.with(|i| *i)
}

/// Per-thread scratch storage.
///
/// Each thread gets its own `T`, created on first access. The fast path is
/// an indexed read of a pre-sized slot table; if the process ever churns
/// through more threads than the table holds, later threads land in a
/// map and a warning is logged once.
pub struct ThreadContext<T: Default + Send + 'static> {
    slots: RwLock<Vec<Option<Arc<Mutex<T>>>>>,
    spill: Mutex<HashMap<u32, Arc<Mutex<T>>>>,
    spilled: std::sync::atomic::AtomicBool,
}

impl<T: Default + Send + 'static> Default for ThreadContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default + Send + 'static> ThreadContext<T> {
    pub fn new() -> Self {
        let mut slots = Vec::new();
        slots.resize_with(FAST_PATH_SLOTS, || None);
        Self {
            slots: RwLock::new(slots),
            spill: Mutex::new(HashMap::new()),
            spilled: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Context for the calling thread, created on first use.
    pub fn context(&self) -> Arc<Mutex<T>> {
        let index = current_thread_index();
        if (index as usize) < FAST_PATH_SLOTS {
            if let Some(ctx) = &self.slots.read().unwrap()[index as usize] {
                return ctx.clone();
            }
            let mut slots = self.slots.write().unwrap();
            let entry = &mut slots[index as usize];
            if entry.is_none() {
                *entry = Some(Arc::new(Mutex::new(T::default())));
            }
            return entry.as_ref().unwrap().clone();
        }
        if !self.spilled.swap(true, Ordering::Relaxed) {
            tracing::warn!("thread index over {FAST_PATH_SLOTS} detected, switching to thread map");
        }
        let mut spill = self.spill.lock().unwrap();
        spill
            .entry(index)
            .or_insert_with(|| Arc::new(Mutex::new(T::default())))
            .clone()
    }

    /// Drop every stored context.
    pub fn clear(&self) {
        let mut slots = self.slots.write().unwrap();
        for slot in slots.iter_mut() {
            *slot = None;
        }
        self.spill.lock().unwrap().clear();
    }
}

type Job = Box<dyn FnMut() + Send>;

struct WorkQueue {
    jobs: VecDeque<(bool, Job)>,
    work_added: bool,
    quit: bool,
    flushing: bool,
    /// A job is executing outside the lock right now.
    active: bool,
    job_count: usize,
}

struct Shared {
    queue: Mutex<WorkQueue>,
    work_cv: Condvar,
    flush_cv: Condvar,
}

/// A named worker consuming closures from a queue.
///
/// Perpetual jobs are re-enqueued after each run until a flush is
/// requested; `flush` waits for the queue to drain with a timeout.
pub struct WorkerThread {
    shared: Arc<Shared>,
    name: String,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl WorkerThread {
    pub fn new(name: &str) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(WorkQueue {
                jobs: VecDeque::new(),
                work_added: false,
                quit: false,
                flushing: false,
                active: false,
                job_count: 0,
            }),
            work_cv: Condvar::new(),
            flush_cv: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::worker(worker_shared))
            .expect("failed to spawn worker thread");
        Self { shared, name: name.to_string(), handle: Some(handle) }
    }

    fn worker(shared: Arc<Shared>) {
        let mut queue = shared.queue.lock().unwrap();
        loop {
            if queue.quit {
                return;
            }
            match queue.jobs.pop_front() {
                None => {
                    // Tell threads waiting on flush that we are done.
                    shared.flush_cv.notify_all();
                    queue = shared
                        .work_cv
                        .wait_while(queue, |q| !q.work_added && !q.quit)
                        .unwrap();
                    queue.work_added = false;
                }
                Some((perpetual, mut job)) => {
                    queue.active = true;
                    drop(queue);
                    job();
                    queue = shared.queue.lock().unwrap();
                    queue.active = false;
                    // A flush that started while the job ran still drains it.
                    if perpetual && !queue.flushing {
                        // Back of the queue so other workloads run first.
                        queue.jobs.push_back((perpetual, job));
                    } else {
                        queue.job_count -= 1;
                    }
                }
            }
        }
    }

    pub fn schedule<F: FnMut() + Send + 'static>(&self, job: F) {
        self.schedule_inner(Box::new(job), false)
    }

    /// A perpetual job runs after every other queued workload and is
    /// re-enqueued until the next `flush`.
    pub fn schedule_perpetual<F: FnMut() + Send + 'static>(&self, job: F) {
        self.schedule_inner(Box::new(job), true)
    }

    fn schedule_inner(&self, job: Job, perpetual: bool) {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.jobs.push_back((perpetual, job));
        queue.work_added = true;
        queue.job_count += 1;
        self.shared.work_cv.notify_one();
    }

    pub fn job_count(&self) -> usize {
        self.shared.queue.lock().unwrap().job_count
    }

    /// Wait until the queue drains. Returns false on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.flushing {
            return true; // another thread is already flushing
        }
        queue.flushing = true;
        let mut drained = true;
        if !queue.jobs.is_empty() || queue.active {
            self.shared.work_cv.notify_all();
            let (q, result) = self
                .shared
                .flush_cv
                .wait_timeout_while(queue, timeout, |q| !q.jobs.is_empty() || q.active)
                .unwrap();
            queue = q;
            if result.timed_out() {
                tracing::warn!("worker thread '{}' flush timed out", self.name);
                drained = false;
            }
        }
        queue.flushing = false;
        drained
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.quit = true;
            queue.work_added = true;
        }
        self.shared.work_cv.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn thread_context_is_distinct_per_thread() {
        #[derive(Default)]
        struct Scratch {
            value: u32,
        }
        let ctx: Arc<ThreadContext<Scratch>> = Arc::new(ThreadContext::new());
        ctx.context().lock().unwrap().value = 7;

        let remote = ctx.clone();
        std::thread::spawn(move || {
            assert_eq!(remote.context().lock().unwrap().value, 0);
            remote.context().lock().unwrap().value = 9;
        })
        .join()
        .unwrap();

        assert_eq!(ctx.context().lock().unwrap().value, 7);
    }

    #[test]
    fn worker_runs_jobs_and_flushes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker = WorkerThread::new("test-worker");
        for _ in 0..8 {
            let counter = counter.clone();
            worker.schedule(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(worker.flush(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(worker.job_count(), 0);
    }

    #[test]
    fn perpetual_job_survives_until_flush() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker = WorkerThread::new("test-perpetual");
        let c = counter.clone();
        worker.schedule_perpetual(move || {
            c.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
        });
        while counter.load(Ordering::SeqCst) < 3 {
            std::thread::yield_now();
        }
        assert!(worker.flush(Duration::from_secs(5)));
        assert_eq!(worker.job_count(), 0);
    }
}
