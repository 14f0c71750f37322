//! # Controller Handshake
//!
//! The per-cycle exchange with the AMR's controller: heartbeat, telemetry
//! batch, obstacle signal, and the three-register work handshake through
//! which the controller starts tasks and observes their completion.
//!
//! Register protocol: the controller raises a work command in
//! `ToCameraWorkCommand` and holds it. Accepting the command sets
//! `CameraWorkStatus` to running and echoes the command into
//! `FromCameraWorkCommand`; a refused command reports failed instead. Once
//! the worker exits the status returns to idle, the controller then drops
//! its command to zero and the echo register is cleared. The echo register
//! is never nonzero while the status claims idle, which is what lets the
//! controller distinguish "not yet accepted" from "already finished".

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, error, info, warn};
use thiserror::Error;

use comms_if::{
    ctl::TaskKind,
    plc::{regs, PlcError, PlcLink, PlcValue, WorkCommand, WorkStatus},
};

use crate::{
    cam_client::{CamClient, PtzCamClient},
    ctx::RigContext,
    obstacle::EdgeDetector,
    plc_client::read_telemetry,
    ptz_ctrl::angles_from_values,
    task_exec::trigger::{TaskTrigger, Trigger},
    thermal_client::ThermalClient,
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The status/reopen surface the equipment self-heal sweep drives.
///
/// Implemented by every streaming equipment client so the sweep can treat
/// them uniformly, and by mocks in the tests.
pub trait EqptStream {
    /// Whether the link currently answers its status endpoint.
    fn answering(&mut self) -> bool;

    /// Tear the stream down and bring it back up, ignoring teardown failures
    /// on an already-dead link.
    fn reopen(&mut self);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Per-cycle handshake state that must survive between ticks.
pub struct HandshakeCtrl {
    /// Phase of the liveness bit, flipped every tick
    heart_bit: bool,

    /// Edge state of the obstacle signal
    obstacle_edge: EdgeDetector,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TickError {
    #[error("Could not write the heartbeat: {0}")]
    Heartbeat(PlcError),

    #[error("Could not read the telemetry batch: {0}")]
    Telemetry(PlcError),

    #[error("Handshake register exchange failed: {0}")]
    Handshake(PlcError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl HandshakeCtrl {
    pub fn new() -> Self {
        Self {
            heart_bit: false,
            obstacle_edge: EdgeDetector::new(),
        }
    }

    /// Run one poll cycle against the controller.
    ///
    /// Equipment self-healing and the PTZ cache refresh are best effort; a
    /// failed heartbeat or telemetry read aborts the tick before any
    /// handshake register is touched, so a half-read cycle can never mutate
    /// the protocol state.
    pub fn tick(&mut self, ctx: &mut RigContext) -> Result<(), TickError> {
        self.heal_equipment(ctx);

        refresh_ptz_cache(ctx);

        // The phase flips whether or not the write lands, so a recovering
        // controller sees a moving bit immediately
        let phase = self.heart_bit;
        self.heart_bit = !self.heart_bit;

        ctx.plc
            .write_variable(regs::HEART_BIT, PlcValue::Bool(phase))
            .map_err(TickError::Heartbeat)?;

        let telemetry = read_telemetry(&mut ctx.plc).map_err(TickError::Telemetry)?;

        let to_raw = ctx
            .plc
            .read_int(regs::TO_WORK_COMMAND)
            .map_err(TickError::Telemetry)?;
        let from_raw = ctx
            .plc
            .read_int(regs::FROM_WORK_COMMAND)
            .map_err(TickError::Telemetry)?;
        let status_raw = ctx
            .plc
            .read_int(regs::WORK_STATUS)
            .map_err(TickError::Telemetry)?;

        // The whole batch landed, publish it
        ctx.telemetry = Some(telemetry);

        // Obstacle signal is best effort, a failed read skips the edge
        // update entirely rather than feeding it a stale level
        match ctx.plc.read_bool(regs::OBSTACLE_SIGNAL) {
            Ok(signal) => {
                if self.obstacle_edge.update(signal) {
                    info!("Obstacle signal rose, starting a capture");
                    ctx.obstacle
                        .trigger(&ctx.zmq_ctx, &ctx.net_params, &ctx.params, &ctx.session);
                }
            }
            Err(e) => debug!("Could not read the obstacle signal: {}", e),
        }

        // Borrow the context apart so the trigger and the PLC link can be
        // held at the same time
        let RigContext {
            plc,
            registry,
            ptz_cam,
            ptz_ctrl,
            panorama_grid,
            target_grid,
            history,
            params,
            net_params,
            zmq_ctx,
            session,
            telemetry,
            ..
        } = ctx;

        let mut trigger = Trigger {
            registry,
            ptz_cam,
            ptz_ctrl,
            panorama_grid,
            target_grid,
            history,
            telemetry: *telemetry,
            params,
            net_params,
            zmq_ctx,
            session,
        };

        eval_registers(plc, &mut trigger, to_raw, from_raw, status_raw)
            .map_err(TickError::Handshake)
    }

    /// Reopen any equipment link whose status has gone unreadable.
    fn heal_equipment(&mut self, ctx: &mut RigContext) {
        heal_stream(&mut ctx.ptz_cam, "PTZ camera");
        heal_stream(&mut ctx.aux_cam, "auxiliary camera");
        heal_stream(&mut ctx.thermal, "thermal imager");

        if ctx.history.ping().is_err() {
            warn!("The history database stopped answering, reopening it");
            match crate::history::HistoryStore::open(&ctx.history_path) {
                Ok(store) => ctx.history = store,
                Err(e) => error!("Could not reopen the history database: {}", e),
            }
        }
    }
}

impl Default for HandshakeCtrl {
    fn default() -> Self {
        Self::new()
    }
}

impl EqptStream for PtzCamClient {
    fn answering(&mut self) -> bool {
        self.status().is_ok()
    }

    fn reopen(&mut self) {
        let _ = self.close();
        let _ = self.open();
    }
}

impl EqptStream for CamClient {
    fn answering(&mut self) -> bool {
        self.status().is_ok()
    }

    fn reopen(&mut self) {
        let _ = self.close();
        let _ = self.open();
    }
}

impl EqptStream for ThermalClient {
    fn answering(&mut self) -> bool {
        self.status().is_ok()
    }

    fn reopen(&mut self) {
        let _ = self.close();
        let _ = self.open();
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Reopen one equipment stream if its status endpoint has stopped answering.
///
/// Returns whether a reopen was attempted.
fn heal_stream(stream: &mut dyn EqptStream, name: &str) -> bool {
    if stream.answering() {
        return false;
    }

    warn!("The {} stopped answering, reopening the stream", name);
    stream.reopen();
    true
}

/// Refresh the shared PTZ attitude cache from the device's status endpoint.
///
/// Best effort: while a task worker is converging the mechanism the worker's
/// own updates win, and a failed read simply leaves the cache as it was.
fn refresh_ptz_cache(ctx: &mut RigContext) {
    if ctx.registry.any_running() {
        return;
    }

    if let Ok(sample) = ctx.ptz_cam.ptz_status() {
        ctx.ptz_ctrl.set_current(Some(angles_from_values(&sample)));
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Evaluate one cycle of the work handshake against the raw register values.
///
/// Pure over the link and trigger, so the transition table can be exercised
/// with mocks.
pub fn eval_registers(
    plc: &mut dyn PlcLink,
    trigger: &mut dyn TaskTrigger,
    to_raw: i32,
    from_raw: i32,
    status_raw: i32,
) -> Result<(), PlcError> {
    let command = WorkCommand::from_register(to_raw);
    let status = WorkStatus::from_register(status_raw);

    match (command, status) {
        // A new command while idle and unacknowledged: accept or fail it
        (Some(cmd), Some(WorkStatus::Idle)) if cmd != WorkCommand::None && from_raw == 0 => {
            // Unreachable by from_work_command's totality over non-None
            // commands, but the match still needs the arm
            let kind = match TaskKind::from_work_command(cmd) {
                Some(kind) => kind,
                None => return Ok(()),
            };

            match trigger.start_task(kind, "AGVC") {
                Ok(msg) => {
                    info!("Controller command accepted: {}", msg);
                    plc.write_int(regs::WORK_STATUS, WorkStatus::Running.as_register())?;
                    plc.write_int(regs::FROM_WORK_COMMAND, to_raw)?;
                }
                Err(e) => {
                    warn!("Controller command refused: {}", e);
                    plc.write_int(regs::WORK_STATUS, WorkStatus::Failed.as_register())?;
                    plc.write_int(regs::FROM_WORK_COMMAND, to_raw)?;
                }
            }
        }

        // Command held while running: report completion once the worker has
        // exited
        (Some(cmd), Some(WorkStatus::Running)) if cmd != WorkCommand::None => {
            if let Some(kind) = TaskKind::from_work_command(cmd) {
                if !trigger.task_running(kind) {
                    info!("The {} task finished, reporting idle", kind.as_str());
                    plc.write_int(regs::WORK_STATUS, WorkStatus::Idle.as_register())?;
                }
            }
        }

        // Command dropped after a completed exchange: clear the echo
        (Some(WorkCommand::None), Some(WorkStatus::Idle)) if from_raw != 0 => {
            plc.write_int(regs::FROM_WORK_COMMAND, 0)?;
        }

        // Command dropped while the status still claims otherwise: the
        // controller has abandoned the exchange, reset both registers
        (Some(WorkCommand::None), Some(status)) if status != WorkStatus::Idle => {
            error!(
                "The controller dropped its command mid-exchange (status {}), resetting",
                status_raw
            );
            plc.write_int(regs::WORK_STATUS, WorkStatus::Idle.as_register())?;
            plc.write_int(regs::FROM_WORK_COMMAND, 0)?;
        }

        // A failed command is held until the controller drops it
        (Some(_), Some(WorkStatus::Failed)) => (),

        (None, _) => {
            debug!("Ignoring the unknown work command code {}", to_raw);
        }

        (_, None) => {
            warn!("The work status register holds the unknown code {}", status_raw);
        }

        _ => (),
    }

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::task_exec::trigger::TriggerError;
    use std::collections::HashMap;

    /// Register map with an optional poisoned register that fails writes.
    struct MapPlc {
        regs: HashMap<String, i32>,
        fail_writes: bool,
    }

    impl MapPlc {
        fn new() -> Self {
            Self {
                regs: HashMap::new(),
                fail_writes: false,
            }
        }

        fn get(&self, name: &str) -> i32 {
            self.regs.get(name).copied().unwrap_or(0)
        }
    }

    impl PlcLink for MapPlc {
        fn read_variable(&mut self, name: &str) -> Result<PlcValue, PlcError> {
            Ok(PlcValue::Int(self.get(name)))
        }

        fn write_variable(&mut self, name: &str, value: PlcValue) -> Result<(), PlcError> {
            if self.fail_writes {
                return Err(PlcError::NotConnected);
            }
            if let PlcValue::Int(v) = value {
                self.regs.insert(name.to_owned(), v);
            }
            Ok(())
        }
    }

    /// Trigger stub scripted to accept or refuse, recording what it saw.
    struct StubTrigger {
        accept: bool,
        running: bool,
        started: Vec<(TaskKind, String)>,
    }

    impl StubTrigger {
        fn accepting() -> Self {
            Self {
                accept: true,
                running: false,
                started: Vec::new(),
            }
        }

        fn refusing() -> Self {
            Self {
                accept: false,
                running: false,
                started: Vec::new(),
            }
        }
    }

    impl TaskTrigger for StubTrigger {
        fn start_task(
            &mut self,
            kind: TaskKind,
            requestor: &str,
        ) -> Result<String, TriggerError> {
            if self.accept {
                self.started.push((kind, requestor.to_owned()));
                self.running = true;
                Ok("started".into())
            } else {
                Err(TriggerError::CameraClosed)
            }
        }

        fn task_running(&self, _kind: TaskKind) -> bool {
            self.running
        }
    }

    #[test]
    fn test_accept_sets_running_and_echo() {
        let mut plc = MapPlc::new();
        let mut trigger = StubTrigger::accepting();

        eval_registers(&mut plc, &mut trigger, 10, 0, 0).unwrap();

        assert_eq!(plc.get(regs::WORK_STATUS), 1);
        assert_eq!(plc.get(regs::FROM_WORK_COMMAND), 10);
        assert_eq!(
            trigger.started,
            vec![(TaskKind::Panorama, "AGVC".to_owned())]
        );
    }

    #[test]
    fn test_refusal_reports_failed() {
        let mut plc = MapPlc::new();
        let mut trigger = StubTrigger::refusing();

        eval_registers(&mut plc, &mut trigger, 8, 0, 0).unwrap();

        assert_eq!(plc.get(regs::WORK_STATUS), 2);
        assert_eq!(plc.get(regs::FROM_WORK_COMMAND), 8);
        assert!(trigger.started.is_empty());
    }

    #[test]
    fn test_completion_reports_idle_once_worker_exits() {
        let mut plc = MapPlc::new();
        plc.regs.insert(regs::WORK_STATUS.to_owned(), 1);
        plc.regs.insert(regs::FROM_WORK_COMMAND.to_owned(), 10);
        let mut trigger = StubTrigger::accepting();
        trigger.running = true;

        // Worker still running, nothing changes
        eval_registers(&mut plc, &mut trigger, 10, 10, 1).unwrap();
        assert_eq!(plc.get(regs::WORK_STATUS), 1);

        trigger.running = false;
        eval_registers(&mut plc, &mut trigger, 10, 10, 1).unwrap();
        assert_eq!(plc.get(regs::WORK_STATUS), 0);
        // The echo stays up until the controller drops its command
        assert_eq!(plc.get(regs::FROM_WORK_COMMAND), 10);
    }

    #[test]
    fn test_command_drop_clears_echo() {
        let mut plc = MapPlc::new();
        plc.regs.insert(regs::FROM_WORK_COMMAND.to_owned(), 10);
        let mut trigger = StubTrigger::accepting();

        eval_registers(&mut plc, &mut trigger, 0, 10, 0).unwrap();

        assert_eq!(plc.get(regs::FROM_WORK_COMMAND), 0);
    }

    #[test]
    fn test_abandoned_exchange_resets_both() {
        let mut plc = MapPlc::new();
        plc.regs.insert(regs::WORK_STATUS.to_owned(), 1);
        plc.regs.insert(regs::FROM_WORK_COMMAND.to_owned(), 10);
        let mut trigger = StubTrigger::accepting();

        eval_registers(&mut plc, &mut trigger, 0, 10, 1).unwrap();

        assert_eq!(plc.get(regs::WORK_STATUS), 0);
        assert_eq!(plc.get(regs::FROM_WORK_COMMAND), 0);
    }

    #[test]
    fn test_unknown_command_code_ignored() {
        let mut plc = MapPlc::new();
        let mut trigger = StubTrigger::accepting();

        eval_registers(&mut plc, &mut trigger, 3, 0, 0).unwrap();

        assert!(trigger.started.is_empty());
        assert_eq!(plc.get(regs::WORK_STATUS), 0);
        assert_eq!(plc.get(regs::FROM_WORK_COMMAND), 0);
    }

    #[test]
    fn test_failed_status_held_until_command_drops() {
        let mut plc = MapPlc::new();
        plc.regs.insert(regs::WORK_STATUS.to_owned(), 2);
        plc.regs.insert(regs::FROM_WORK_COMMAND.to_owned(), 8);
        let mut trigger = StubTrigger::refusing();

        // Command still held, the failure is not re-evaluated
        eval_registers(&mut plc, &mut trigger, 8, 8, 2).unwrap();
        assert_eq!(plc.get(regs::WORK_STATUS), 2);

        // Command dropped, the abandoned-exchange reset applies
        eval_registers(&mut plc, &mut trigger, 0, 8, 2).unwrap();
        assert_eq!(plc.get(regs::WORK_STATUS), 0);
        assert_eq!(plc.get(regs::FROM_WORK_COMMAND), 0);
    }

    #[test]
    fn test_write_failure_propagates() {
        let mut plc = MapPlc::new();
        plc.fail_writes = true;
        let mut trigger = StubTrigger::accepting();

        assert!(eval_registers(&mut plc, &mut trigger, 10, 0, 0).is_err());
    }

    /// Equipment stream stub that comes back up once reopened.
    struct StubStream {
        up: bool,
        reopens: usize,
    }

    impl EqptStream for StubStream {
        fn answering(&mut self) -> bool {
            self.up
        }

        fn reopen(&mut self) {
            self.up = true;
            self.reopens += 1;
        }
    }

    #[test]
    fn test_dead_stream_is_reopened() {
        let mut stream = StubStream {
            up: false,
            reopens: 0,
        };

        assert!(heal_stream(&mut stream, "auxiliary camera"));
        assert!(stream.up);
        assert_eq!(stream.reopens, 1);

        // Healed streams are left alone on the next sweep
        assert!(!heal_stream(&mut stream, "auxiliary camera"));
        assert_eq!(stream.reopens, 1);
    }

    #[test]
    fn test_answering_stream_is_not_touched() {
        let mut stream = StubStream {
            up: true,
            reopens: 0,
        };

        assert!(!heal_stream(&mut stream, "PTZ camera"));
        assert_eq!(stream.reopens, 0);
    }
}
