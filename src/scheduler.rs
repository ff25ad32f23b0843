//! Drain scheduling
//!
//! Two disciplines share one drain routine:
//!
//! - **poll**: the producer callback drains inline, bounded to
//!   [`POLL_DRAIN_LIMIT`](crate::constants::POLL_DRAIN_LIMIT) packets per
//!   delivery so a backlog cannot starve the callback context;
//! - **thread**: a pacing thread wakes every few milliseconds and drains at
//!   most one packet per packet interval. Missed deadlines are not caught up;
//!   the deadline simply moves forward one interval per due wake.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Something the scheduler can drain packets from
pub trait Drainer: Send + Sync {
    /// Whether one packet worth of input is available
    fn packet_ready(&self) -> bool;

    /// Run one drain cycle
    fn drain_one(&self);
}

/// Drain inline while input is available, at most `limit` times
///
/// Returns the number of drain cycles run.
pub fn poll_drain<D: Drainer + ?Sized>(target: &D, limit: usize) -> usize {
    let mut drained = 0;
    while drained < limit && target.packet_ready() {
        target.drain_one();
        drained += 1;
    }
    drained
}

/// Lifecycle of the pacing thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    NotStarted = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::Running,
            2 => SchedulerState::Stopping,
            3 => SchedulerState::Stopped,
            _ => SchedulerState::NotStarted,
        }
    }
}

/// Dedicated pacing thread
pub struct PacingThread {
    running: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
}

impl PacingThread {
    /// Not yet started
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(AtomicU8::new(SchedulerState::NotStarted as u8)),
            handle: None,
        }
    }

    /// Spawn the thread; it drains `target` once per `interval`, waking every `slice`
    pub fn start(
        &mut self,
        target: Arc<dyn Drainer>,
        interval: Duration,
        slice: Duration,
    ) -> std::io::Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();

        let spawned = thread::Builder::new()
            .name("rtp-pacing".to_string())
            .spawn(move || pace(target.as_ref(), &running, interval, slice));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state.store(SchedulerState::Running as u8, Ordering::SeqCst);
                tracing::debug!("pacing thread started ({:?} interval)", interval);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Clear the run flag and wait for the thread to exit
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.state.store(SchedulerState::Stopping as u8, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        if handle.join().is_err() {
            tracing::error!("pacing thread panicked");
        }
        self.state.store(SchedulerState::Stopped as u8, Ordering::SeqCst);
        tracing::debug!("pacing thread stopped");
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

impl Default for PacingThread {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PacingThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pace(target: &dyn Drainer, running: &AtomicBool, interval: Duration, slice: Duration) {
    let mut deadline: Option<Instant> = None;

    while running.load(Ordering::Relaxed) {
        thread::sleep(slice);

        if !running.load(Ordering::Relaxed) {
            break;
        }

        let now = Instant::now();
        let ts = *deadline.get_or_insert(now);
        if ts > now {
            continue;
        }

        if target.packet_ready() {
            target.drain_one();
        }

        deadline = Some(ts + interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        backlog: AtomicUsize,
        drained: AtomicUsize,
    }

    impl Counter {
        fn new(backlog: usize) -> Self {
            Self {
                backlog: AtomicUsize::new(backlog),
                drained: AtomicUsize::new(0),
            }
        }
    }

    impl Drainer for Counter {
        fn packet_ready(&self) -> bool {
            self.backlog.load(Ordering::SeqCst) > 0
        }

        fn drain_one(&self) {
            self.backlog.fetch_sub(1, Ordering::SeqCst);
            self.drained.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_poll_drain_is_bounded() {
        let counter = Counter::new(100);
        assert_eq!(poll_drain(&counter, 16), 16);
        assert_eq!(counter.backlog.load(Ordering::SeqCst), 84);
    }

    #[test]
    fn test_poll_drain_stops_when_empty() {
        let counter = Counter::new(3);
        assert_eq!(poll_drain(&counter, 16), 3);
        assert_eq!(poll_drain(&counter, 16), 0);
    }

    #[test]
    fn test_state_transitions() {
        let mut pacer = PacingThread::new();
        assert_eq!(pacer.state(), SchedulerState::NotStarted);

        let target: Arc<dyn Drainer> = Arc::new(Counter::new(0));
        pacer
            .start(target, Duration::from_millis(20), Duration::from_millis(2))
            .unwrap();
        assert_eq!(pacer.state(), SchedulerState::Running);

        pacer.stop();
        assert_eq!(pacer.state(), SchedulerState::Stopped);

        // second stop is a no-op
        pacer.stop();
        assert_eq!(pacer.state(), SchedulerState::Stopped);
    }

    #[test]
    fn test_pacing_does_not_catch_up() {
        // plenty of backlog; 20ms interval over ~200ms allows roughly 10 drains
        let counter = Arc::new(Counter::new(1000));
        let mut pacer = PacingThread::new();
        pacer
            .start(counter.clone(), Duration::from_millis(20), Duration::from_millis(4))
            .unwrap();
        thread::sleep(Duration::from_millis(200));
        pacer.stop();

        let drained = counter.drained.load(Ordering::SeqCst);
        assert!(drained >= 3, "drained {}", drained);
        assert!(drained <= 12, "drained {}", drained);
    }

    #[test]
    fn test_nothing_drained_after_stop() {
        let counter = Arc::new(Counter::new(1000));
        let mut pacer = PacingThread::new();
        pacer
            .start(counter.clone(), Duration::from_millis(1), Duration::from_millis(1))
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        pacer.stop();

        let after_stop = counter.drained.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(counter.drained.load(Ordering::SeqCst), after_stop);
    }
}
