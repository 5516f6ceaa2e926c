//! Event loop abstraction and the two shipped implementations.
//!
//! Operations never know whether they run event-driven or inline; they
//! post work, arm timeouts, and watch socket descriptors through
//! [`EventLoop`]. The asynchronous variant is [`ThreadedEventLoop`]; the
//! synchronous variant is [`InlineEventLoop`], whose "schedule" invokes
//! inline and whose timers never fire because the blocking driver
//! enforces its own deadlines.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::handler::IoInterest;

/// A unit of work posted to the I/O thread.
pub type LoopTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle to an armed timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u64);

/// Handle to a one-shot socket readiness watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FdWatchId(pub(crate) u64);

/// Scheduling surface operations run against.
///
/// Readiness watches are one-shot: after the task fires, the watch is
/// gone and a pending verb re-registers on its next `Pending` return.
pub trait EventLoop: Send + Sync {
    /// Post `task` onto the I/O thread. Returns false when the loop has
    /// shut down and will never run it.
    fn run_in_loop(&self, task: LoopTask) -> bool;

    /// True when the calling thread is the I/O thread.
    fn is_in_loop_thread(&self) -> bool;

    /// Rolling average of task dispatch delay, in microseconds. Used
    /// for timeout stall attribution.
    fn callback_delay_micros_avg(&self) -> u64;

    /// Arm a one-shot timeout.
    fn schedule_timeout(&self, delay: Duration, task: LoopTask) -> TimerId;

    /// Disarm a timeout; a no-op if it already fired.
    fn cancel_timeout(&self, id: TimerId);

    /// Watch a socket descriptor for readiness, one-shot.
    fn watch_fd(&self, fd: i32, interest: IoInterest, task: LoopTask) -> FdWatchId;

    /// Drop a readiness watch; a no-op if it already fired.
    fn unwatch_fd(&self, id: FdWatchId);
}

/// The synchronous variant: everything happens on the caller's thread.
///
/// Used with a blocking driver whose verbs never return `Pending`;
/// timeouts are the driver's responsibility, so armed timers are inert.
#[derive(Debug, Default)]
pub struct InlineEventLoop {
    next_id: AtomicU64,
}

impl InlineEventLoop {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLoop for InlineEventLoop {
    fn run_in_loop(&self, task: LoopTask) -> bool {
        task();
        true
    }

    fn is_in_loop_thread(&self) -> bool {
        true
    }

    fn callback_delay_micros_avg(&self) -> u64 {
        0
    }

    fn schedule_timeout(&self, _delay: Duration, _task: LoopTask) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn cancel_timeout(&self, _id: TimerId) {}

    fn watch_fd(&self, fd: i32, _interest: IoInterest, _task: LoopTask) -> FdWatchId {
        // A blocking driver has no business parking on readiness.
        tracing::error!(fd, "watch_fd called on the inline event loop; dropping watch");
        FdWatchId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn unwatch_fd(&self, _id: FdWatchId) {}
}

struct TimerEntry {
    id: u64,
    deadline: Instant,
    task: LoopTask,
}

struct FdWatch {
    id: u64,
    fd: i32,
    #[allow(dead_code)]
    interest: IoInterest,
    task: LoopTask,
}

#[derive(Default)]
struct LoopState {
    tasks: VecDeque<(Instant, LoopTask)>,
    timers: Vec<TimerEntry>,
    fd_watches: Vec<FdWatch>,
    shutdown: bool,
}

struct LoopShared {
    state: Mutex<LoopState>,
    wakeup: Condvar,
    next_id: AtomicU64,
    cb_delay_avg_micros: AtomicU64,
    loop_thread: Mutex<Option<ThreadId>>,
}

/// The asynchronous variant: a dedicated I/O thread draining a task
/// queue and a timer list.
///
/// Socket readiness is injected by the embedding reactor through
/// [`ThreadedEventLoop::notify_fd_ready`]; this loop does not poll file
/// descriptors itself.
pub struct ThreadedEventLoop {
    shared: Arc<LoopShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadedEventLoop {
    /// Spawn the I/O thread and return the loop handle.
    pub fn spawn() -> Arc<Self> {
        let shared = Arc::new(LoopShared {
            state: Mutex::new(LoopState::default()),
            wakeup: Condvar::new(),
            next_id: AtomicU64::new(1),
            cb_delay_avg_micros: AtomicU64::new(0),
            loop_thread: Mutex::new(None),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("sqlstream-io".to_string())
            .spawn(move || run_loop(&thread_shared))
            .expect("failed to spawn the I/O thread");

        Arc::new(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Report readiness for `fd`; fires every watch registered on it.
    pub fn notify_fd_ready(&self, fd: i32) {
        let mut state = self.shared.state.lock();
        let mut fired = Vec::new();
        let mut i = 0;
        while i < state.fd_watches.len() {
            if state.fd_watches[i].fd == fd {
                fired.push(state.fd_watches.swap_remove(i));
            } else {
                i += 1;
            }
        }
        let now = Instant::now();
        for watch in fired {
            state.tasks.push_back((now, watch.task));
        }
        drop(state);
        self.shared.wakeup.notify_one();
    }

    /// Stop accepting work and wind the thread down. Queued tasks run
    /// before the thread exits; armed timers are dropped.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.wakeup.notify_one();

        let joinable = {
            let loop_thread = self.shared.loop_thread.lock();
            *loop_thread != Some(thread::current().id())
        };
        if joinable {
            if let Some(handle) = self.thread.lock().take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ThreadedEventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EventLoop for ThreadedEventLoop {
    fn run_in_loop(&self, task: LoopTask) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return false;
        }
        state.tasks.push_back((Instant::now(), task));
        drop(state);
        self.shared.wakeup.notify_one();
        true
    }

    fn is_in_loop_thread(&self) -> bool {
        *self.shared.loop_thread.lock() == Some(thread::current().id())
    }

    fn callback_delay_micros_avg(&self) -> u64 {
        self.shared.cb_delay_avg_micros.load(Ordering::Relaxed)
    }

    fn schedule_timeout(&self, delay: Duration, task: LoopTask) -> TimerId {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.shared.state.lock();
        if !state.shutdown {
            state.timers.push(TimerEntry {
                id,
                deadline: Instant::now() + delay,
                task,
            });
        }
        drop(state);
        self.shared.wakeup.notify_one();
        TimerId(id)
    }

    fn cancel_timeout(&self, id: TimerId) {
        let mut state = self.shared.state.lock();
        state.timers.retain(|t| t.id != id.0);
    }

    fn watch_fd(&self, fd: i32, interest: IoInterest, task: LoopTask) -> FdWatchId {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.shared.state.lock();
        if !state.shutdown {
            state.fd_watches.push(FdWatch {
                id,
                fd,
                interest,
                task,
            });
        }
        FdWatchId(id)
    }

    fn unwatch_fd(&self, id: FdWatchId) {
        let mut state = self.shared.state.lock();
        state.fd_watches.retain(|w| w.id != id.0);
    }
}

fn run_loop(shared: &Arc<LoopShared>) {
    *shared.loop_thread.lock() = Some(thread::current().id());

    loop {
        let mut due: Vec<LoopTask> = Vec::new();
        let mut delays: Vec<u64> = Vec::new();

        {
            let mut state = shared.state.lock();
            loop {
                let now = Instant::now();

                let mut i = 0;
                while i < state.timers.len() {
                    if state.timers[i].deadline <= now {
                        due.push(state.timers.swap_remove(i).task);
                    } else {
                        i += 1;
                    }
                }
                while let Some((enqueued, task)) = state.tasks.pop_front() {
                    delays.push(now.saturating_duration_since(enqueued).as_micros() as u64);
                    due.push(task);
                }

                if !due.is_empty() {
                    break;
                }
                if state.shutdown {
                    *shared.loop_thread.lock() = None;
                    return;
                }

                match state.timers.iter().map(|t| t.deadline).min() {
                    Some(deadline) => {
                        shared.wakeup.wait_until(&mut state, deadline);
                    }
                    None => {
                        shared.wakeup.wait(&mut state);
                    }
                }
            }
        }

        for sample in delays {
            let avg = shared.cb_delay_avg_micros.load(Ordering::Relaxed);
            let next = (avg * 7 + sample) / 8;
            shared.cb_delay_avg_micros.store(next, Ordering::Relaxed);
        }
        for task in due {
            task();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;

    #[test]
    fn inline_loop_runs_tasks_immediately() {
        let event_loop = InlineEventLoop::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        assert!(event_loop.run_in_loop(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
        })));
        assert!(ran.load(Ordering::SeqCst));
        assert!(event_loop.is_in_loop_thread());
        assert_eq!(event_loop.callback_delay_micros_avg(), 0);
    }

    #[test]
    fn threaded_loop_runs_posted_tasks() {
        let event_loop = ThreadedEventLoop::spawn();
        let (tx, rx) = mpsc::channel();
        assert!(event_loop.run_in_loop(Box::new(move || {
            tx.send(42).unwrap();
        })));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        assert!(!event_loop.is_in_loop_thread());
        event_loop.shutdown();
        assert!(!event_loop.run_in_loop(Box::new(|| {})));
    }

    #[test]
    fn threaded_loop_fires_timers() {
        let event_loop = ThreadedEventLoop::spawn();
        let (tx, rx) = mpsc::channel();
        event_loop.schedule_timeout(
            Duration::from_millis(10),
            Box::new(move || {
                tx.send(()).unwrap();
            }),
        );
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        event_loop.shutdown();
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let event_loop = ThreadedEventLoop::spawn();
        let (tx, rx) = mpsc::channel::<()>();
        let id = event_loop.schedule_timeout(
            Duration::from_millis(50),
            Box::new(move || {
                tx.send(()).unwrap();
            }),
        );
        event_loop.cancel_timeout(id);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        event_loop.shutdown();
    }

    #[test]
    fn fd_readiness_fires_watch_once() {
        let event_loop = ThreadedEventLoop::spawn();
        let (tx, rx) = mpsc::channel();
        event_loop.watch_fd(
            7,
            IoInterest::Read,
            Box::new(move || {
                tx.send(()).unwrap();
            }),
        );
        event_loop.notify_fd_ready(7);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // The watch was one-shot; another readiness report is silent.
        event_loop.notify_fd_ready(7);
        event_loop.shutdown();
    }
}
