//! # Task Execution Engine
//!
//! One logical engine instance per task kind. Each kind owns a [`TaskSlot`]:
//! a FIFO of setpoints plus an atomic run flag and an atomic stop flag, the
//! slot being the only thing the handshake controller ever observes about a
//! task. Accepting a start spawns one dedicated worker thread which drains
//! the queue, captures media and hands the folder to the sync manager.
//!
//! Queue discipline: a slot is refilled only while its run flag is down (the
//! trigger refuses otherwise), and the queue is left empty on every exit of
//! the drain, cancelled or not.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Task folder manifest - written at task start, completed at task end,
/// parsed back by the recovery sweep
pub mod manifest;

/// Task trigger - resolves setpoints and spawns workers
pub mod trigger;

/// Task worker - the per-kind capture flows run on the worker thread
pub mod worker;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Local};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use crate::plc_client::AmrTelemetry;
use crate::ptz_ctrl::PtzAngles;

pub use comms_if::ctl::TaskKind;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Pause between setpoints while draining a queue
pub const SETPOINT_PACING: Duration = Duration::from_millis(500);

/// Bound on how long a cancellation will wait for the worker to exit. The
/// join is by flag polling; the thread itself is never forced.
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Period between run-flag polls during a bounded stop-join
const STOP_JOIN_POLL: Duration = Duration::from_millis(100);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One attitude a task drives the mechanism to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub angles: PtzAngles,

    /// Clip length for video setpoints, seconds
    pub duration_s: Option<u32>,
}

/// The shared state of one task kind.
///
/// Single producer (the trigger, which refuses while the run flag is up) and
/// single consumer (the worker). The handshake controller reads only the run
/// flag.
pub struct TaskSlot {
    queue: Mutex<VecDeque<Setpoint>>,

    running: AtomicBool,

    stop: AtomicBool,

    start_time: Mutex<Option<DateTime<Local>>>,
}

/// The six task slots.
pub struct TaskRegistry {
    panorama: TaskSlot,
    target: TaskSlot,
    designated: TaskSlot,
    thermal: TaskSlot,
    video: TaskSlot,
    initial: TaskSlot,
}

/// AMR position a task was started at.
///
/// Snapshotted from the telemetry cache at trigger time; the snapshot keys
/// the task's storage folder and provenance row for its whole lifetime, even
/// if the AMR moves while the task runs.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PositionSnapshot {
    pub pos_x: i32,
    pub pos_y: i32,
    pub pos_z: i32,

    /// Heading in whole degrees
    pub heading_deg: i32,

    pub tag_id: i32,
}

/// How a queue drain ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrainOutcome {
    /// Setpoints handed to the visitor
    pub visited: usize,

    /// Setpoints still queued when the drain exited, nonzero only on cancel
    pub remaining: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TaskSlot {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            start_time: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::Release);
    }

    /// Replace the queue's contents.
    ///
    /// Must only be called once the run flag is confirmed down; the trigger
    /// guards this.
    pub fn refill(&self, setpoints: Vec<Setpoint>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
            queue.extend(setpoints);
        }
    }

    pub fn pop(&self) -> Option<Setpoint> {
        self.queue.lock().ok().and_then(|mut queue| queue.pop_front())
    }

    pub fn clear(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn set_start_time(&self, time: Option<DateTime<Local>>) {
        if let Ok(mut guard) = self.start_time.lock() {
            *guard = time;
        }
    }

    pub fn start_time(&self) -> Option<DateTime<Local>> {
        self.start_time.lock().ok().and_then(|guard| *guard)
    }
}

impl PositionSnapshot {
    pub fn from_telemetry(telemetry: &AmrTelemetry) -> Self {
        Self {
            pos_x: telemetry.pos_x,
            pos_y: telemetry.pos_y,
            pos_z: telemetry.pos_z,
            heading_deg: telemetry.heading_deg.round() as i32,
            tag_id: telemetry.tag_id,
        }
    }

    /// Folder name keying this position, `(x,y,heading,tag)`.
    pub fn key(&self) -> String {
        format!(
            "({},{},{},{})",
            self.pos_x, self.pos_y, self.heading_deg, self.tag_id
        )
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            panorama: TaskSlot::new(),
            target: TaskSlot::new(),
            designated: TaskSlot::new(),
            thermal: TaskSlot::new(),
            video: TaskSlot::new(),
            initial: TaskSlot::new(),
        }
    }

    pub fn slot(&self, kind: TaskKind) -> &TaskSlot {
        match kind {
            TaskKind::Panorama => &self.panorama,
            TaskKind::Target => &self.target,
            TaskKind::Designated => &self.designated,
            TaskKind::Thermal => &self.thermal,
            TaskKind::Video => &self.video,
            TaskKind::Initial => &self.initial,
        }
    }

    /// True if any kind's worker is running.
    pub fn any_running(&self) -> bool {
        TaskKind::all().iter().any(|kind| self.slot(*kind).is_running())
    }

    /// Request cancellation of the given kind and wait, bounded, for its
    /// worker to exit.
    ///
    /// Returns whether the worker was observed to have exited; `false` means
    /// the bound elapsed first, the worker will still exit on its own.
    pub fn stop_and_join(&self, kind: TaskKind) -> bool {
        let slot = self.slot(kind);

        slot.request_stop();

        let deadline = Instant::now() + STOP_JOIN_TIMEOUT;

        while slot.is_running() {
            if Instant::now() >= deadline {
                return false;
            }

            thread::sleep(STOP_JOIN_POLL);
        }

        true
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Drain the slot's queue, handing each setpoint to `visit`.
///
/// The stop flag is honoured once per iteration, so cancellation latency is
/// bounded by one setpoint's processing plus one pacing period, never by the
/// whole queue. The queue is empty when this returns, whichever way the
/// drain ended.
pub fn drain_queue<F>(slot: &TaskSlot, pacing: Duration, mut visit: F) -> DrainOutcome
where
    F: FnMut(&Setpoint),
{
    let mut visited = 0;

    loop {
        if slot.stop_requested() {
            break;
        }

        let setpoint = match slot.pop() {
            Some(setpoint) => setpoint,
            None => break,
        };

        visit(&setpoint);
        visited += 1;

        thread::sleep(pacing);
    }

    let remaining = slot.queue_len();
    slot.clear();

    DrainOutcome { visited, remaining }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    fn setpoint(pan_deg: f64) -> Setpoint {
        Setpoint {
            angles: PtzAngles {
                pan_deg,
                tilt_deg: 0.0,
                zoom: 0.0,
            },
            duration_s: None,
        }
    }

    #[test]
    fn test_drain_to_exhaustion() {
        let registry = TaskRegistry::new();
        let slot = registry.slot(TaskKind::Panorama);

        slot.refill(vec![setpoint(-10.0), setpoint(0.0), setpoint(10.0)]);

        let mut pans = Vec::new();
        let outcome = drain_queue(slot, Duration::from_millis(0), |sp| {
            pans.push(sp.angles.pan_deg);
        });

        assert_eq!(outcome.visited, 3);
        assert_eq!(outcome.remaining, 0);
        assert_eq!(pans, vec![-10.0, 0.0, 10.0]);
        assert_eq!(slot.queue_len(), 0);
    }

    #[test]
    fn test_cancel_mid_drain_leaves_queue_drained() {
        let registry = TaskRegistry::new();
        let slot = registry.slot(TaskKind::Target);

        slot.refill((0..5).map(|i| setpoint(i as f64)).collect());

        let mut visited = 0;
        let outcome = drain_queue(slot, Duration::from_millis(0), |_| {
            visited += 1;

            // Cancel arrives while the second setpoint is being processed
            if visited == 2 {
                slot.request_stop();
            }
        });

        // The stop flag is seen at the next iteration, the remainder is
        // cleared rather than left queued
        assert_eq!(outcome.visited, 2);
        assert_eq!(outcome.remaining, 3);
        assert_eq!(slot.queue_len(), 0);
        assert!(slot.stop_requested());
    }

    #[test]
    fn test_refill_replaces_contents() {
        let registry = TaskRegistry::new();
        let slot = registry.slot(TaskKind::Designated);

        slot.refill(vec![setpoint(1.0), setpoint(2.0)]);
        slot.refill(vec![setpoint(3.0)]);

        assert_eq!(slot.queue_len(), 1);
        assert_eq!(slot.pop().map(|sp| sp.angles.pan_deg), Some(3.0));
    }

    #[test]
    fn test_stop_and_join_bounded() {
        let registry = Arc::new(TaskRegistry::new());

        // Nothing running joins immediately
        assert!(registry.stop_and_join(TaskKind::Video));

        // A running worker that honours the stop flag is joined
        let slot = registry.slot(TaskKind::Video);
        slot.clear_stop();
        slot.set_running(true);

        let registry_clone = registry.clone();
        let worker = thread::spawn(move || {
            let slot = registry_clone.slot(TaskKind::Video);
            while !slot.stop_requested() {
                thread::sleep(Duration::from_millis(10));
            }
            slot.set_running(false);
        });

        assert!(registry.stop_and_join(TaskKind::Video));
        assert!(!registry.slot(TaskKind::Video).is_running());

        worker.join().unwrap();
    }

    #[test]
    fn test_any_running() {
        let registry = TaskRegistry::new();
        assert!(!registry.any_running());

        registry.slot(TaskKind::Thermal).set_running(true);
        assert!(registry.any_running());

        registry.slot(TaskKind::Thermal).set_running(false);
        assert!(!registry.any_running());
    }
}
