// SPDX-FileCopyrightText: 2025 AerynOS Developers
// SPDX-License-Identifier: MPL-2.0

//! The phase mutex (coordinating load/match/execute across the whole
//! build context) and the task scheduler that runs match/execute work
//! across a thread pool, detecting deadlock when nothing makes progress.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::logging::Progress;

/// One of the three phases a build context can be in. Only one phase is
/// active at a time system-wide; `Match` and `Execute` may be held by many
/// threads concurrently, `Load` is exclusive to the thread already holding
/// it (an "island append").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Load,
    Match,
    Execute,
}

struct Inner {
    active: Option<Phase>,
    holders: usize,
    load_generation: u64,
    failed: bool,
}

thread_local! {
    static STACK: RefCell<Vec<Phase>> = const { RefCell::new(Vec::new()) };
}

/// The process-wide (per build context) phase coordinator.
pub struct PhaseMutex {
    inner: Mutex<Inner>,
    cv: Condvar,
}

/// A held phase lock. Dropping it releases the phase once every nested
/// same-thread hold has been dropped.
pub struct PhaseGuard<'a> {
    mutex: &'a PhaseMutex,
    reentrant: bool,
}

impl PhaseMutex {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                active: None,
                holders: 0,
                load_generation: 0,
                failed: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Acquire `phase`, blocking while a different phase is active. A
    /// thread that already holds `phase` (load, most commonly, appending to
    /// an already-loaded scope) reacquires it without touching global
    /// state — this is the nesting that makes island append non-deadlocking.
    pub fn lock(&self, phase: Phase) -> PhaseGuard<'_> {
        let already_holds = STACK.with(|stack| stack.borrow().last().copied() == Some(phase));
        if already_holds {
            STACK.with(|stack| stack.borrow_mut().push(phase));
            return PhaseGuard { mutex: self, reentrant: true };
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match inner.active {
                None => break,
                Some(active) if active == phase && phase != Phase::Load => break,
                _ => inner = self.cv.wait(inner).unwrap_or_else(|e| e.into_inner()),
            }
        }
        inner.active = Some(phase);
        inner.holders += 1;
        if phase == Phase::Load {
            inner.load_generation += 1;
        }
        drop(inner);

        STACK.with(|stack| stack.borrow_mut().push(phase));
        PhaseGuard { mutex: self, reentrant: false }
    }

    /// Bumped every time `Load` transitions from unheld to held; a match
    /// result computed under an older generation is stale and must be
    /// recomputed.
    pub fn load_generation(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).load_generation
    }

    pub fn mark_failed(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).failed = true;
    }

    pub fn failed(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).failed
    }
}

impl Default for PhaseMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
        if self.reentrant {
            return;
        }
        let mut inner = self.mutex.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.holders -= 1;
        if inner.holders == 0 {
            inner.active = None;
            self.mutex.cv.notify_all();
        }
    }
}

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A bounded, work-stealing-style task queue: each worker has its own
/// deque it pushes and pops from the same end (LIFO, for cache locality on
/// a freshly spawned subtask), and steals from the opposite end of a peer's
/// queue when its own is empty.
struct Queue {
    tasks: Mutex<VecDeque<Task>>,
}

impl Queue {
    fn new() -> Self {
        Self { tasks: Mutex::new(VecDeque::new()) }
    }

    fn push(&self, task: Task) {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).push_back(task);
    }

    fn pop(&self) -> Option<Task> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).pop_back()
    }

    fn steal(&self) -> Option<Task> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }
}

/// The scheduler: a fixed pool of queues (one the calling/"main" thread
/// uses, the rest for helper threads the driver spawns) plus a deadlock
/// monitor based on a shared [`Progress`] counter.
pub struct Scheduler {
    queues: Vec<Queue>,
    cv: Condvar,
    lock: Mutex<()>,
    shutdown: AtomicBool,
    pending: AtomicUsize,
    progress: Progress,
}

/// A handle identifying which of the scheduler's queues a caller pushes
/// new work onto and pops its own work from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerId(pub usize);

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            queues: (0..workers).map(|_| Queue::new()).collect(),
            cv: Condvar::new(),
            lock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            progress: Progress::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.queues.len()
    }

    /// Schedule `task` onto `worker`'s queue and wake any thread that might
    /// be idle waiting for work.
    pub fn spawn(&self, worker: WorkerId, task: impl FnOnce() + Send + 'static) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.queues[worker.0 % self.queues.len()].push(Box::new(task));
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.cv.notify_all();
    }

    /// Try to find one runnable task for `worker`: first its own queue,
    /// then stealing from every other queue in turn.
    fn find_task(&self, worker: WorkerId) -> Option<Task> {
        let home = worker.0 % self.queues.len();
        if let Some(task) = self.queues[home].pop() {
            return Some(task);
        }
        for (index, queue) in self.queues.iter().enumerate() {
            if index == home {
                continue;
            }
            if let Some(task) = queue.steal() {
                return Some(task);
            }
        }
        None
    }

    fn run_one(&self, worker: WorkerId) -> bool {
        match self.find_task(worker) {
            Some(task) => {
                task();
                self.pending.fetch_sub(1, Ordering::SeqCst);
                self.progress.bump();
                true
            }
            None => false,
        }
    }

    /// Block the calling thread, helping run other workers' queued tasks,
    /// until `done` returns true. This is the scheduler's "async, then
    /// wait" pattern: the caller queues async work elsewhere and calls
    /// `wait` to make productive use of its own thread instead of sleeping.
    ///
    /// Returns an error if no task made progress for `stall_threshold`
    /// while `done` still reports unfinished and tasks remain pending —
    /// the calling convention a cyclic dependency graph hits.
    pub fn wait(&self, worker: WorkerId, stall_threshold: Duration, mut done: impl FnMut() -> bool) -> Result<(), crate::error::Error> {
        let mut last_progress = self.progress.get();
        let mut last_progress_at = Instant::now();

        while !done() {
            if self.run_one(worker) {
                let current = self.progress.get();
                if current != last_progress {
                    last_progress = current;
                    last_progress_at = Instant::now();
                }
                continue;
            }

            if self.pending.load(Ordering::SeqCst) == 0 {
                // Nothing queued anywhere and `done` is still false: the
                // caller is waiting on work that was never scheduled.
                return Err(crate::error::Error::Deadlock {
                    waiting: 1,
                    stalled_for_ms: last_progress_at.elapsed().as_millis() as u64,
                });
            }

            if last_progress_at.elapsed() > stall_threshold {
                return Err(crate::error::Error::Deadlock {
                    waiting: self.pending.load(Ordering::SeqCst),
                    stalled_for_ms: last_progress_at.elapsed().as_millis() as u64,
                });
            }

            let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            let _ = self.cv.wait_timeout(guard, Duration::from_millis(1)).unwrap_or_else(|e| e.into_inner());
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.cv.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
