//! Machine session
//!
//! One [`Session`] owns a single machine link at a time: the transport's
//! write half, the firmware detector, the bound dialect, the flow queue and
//! the telemetry parser. It is driven synchronously by the actor in
//! [`actor`], which feeds it transport bytes, timer expiries and viewer
//! actions in one sequence, so no state here needs a lock except the
//! shared [`Snapshot`].

pub mod actor;
pub mod job;
pub mod snapshot;

pub use actor::{spawn_session, SessionHandle};
pub use job::{prepare_lines, Job};
pub use snapshot::Snapshot;

use crate::communication::{Communicator, ConnectionParams, FlowLimits, FlowQueue, LineFramer};
use crate::firmware::{
    dialect_for, laser_s_value, ClearMethod, ControlAction, DetectorConfig, DetectorStep, Dialect,
    FirmwareDetector, MotionCommand, Outbound, SdOperation, StatusPoll, Telemetry,
    TelemetryParser,
};
use machlink_core::{
    ActivePort, ConnectionError, ControllerError, Error, EventDispatcher, Feature, FirmwareError,
    FirmwareInfo, FirmwareProfile, MachineEvent, Precision, Result, RunState, RunStatus, TransportKind,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Status line shown while no link is open
pub const CONNECT_PROMPT: &str = "Connect";

/// Tunables for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub detector: DetectorConfig,
    pub limits: FlowLimits,
    pub precision: Precision,
    /// Period of the status poll
    pub poll_interval: Duration,
    /// Period of `qCount` reports while a job runs
    pub queue_report_interval: Duration,
    /// Give up opening a transport after this long
    pub connect_timeout: Duration,
    /// Compact motion lines of submitted jobs
    pub optimize_gcode: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            limits: FlowLimits::default(),
            precision: Precision::default(),
            poll_interval: Duration::from_millis(250),
            queue_report_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            optimize_gcode: false,
        }
    }
}

/// Job lifecycle callbacks
pub trait JobHooks: Send {
    fn on_start(&mut self) {}
    fn on_finish(&mut self) {}
    fn on_abort(&mut self) {}
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl JobHooks for NoHooks {}

/// Laser test request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaserRequest {
    /// Percent of full power
    pub power: f64,
    /// Fire time, 0 keeps the laser on until the next toggle
    pub duration_ms: u64,
    /// `S` value at 100%
    pub max_s: f64,
}

/// Everything a viewer can ask of a connected session
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    RunJob(String),
    RunCommand(String),
    Motion(MotionCommand),
    FeedOverride(i32),
    SpindleOverride(i32),
    LaserTest(LaserRequest),
    Pause,
    Resume,
    Stop,
    ClearAlarm(ClearMethod),
    ResetMachine,
    Sd(SdOperation),
    ClosePort,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::RunJob(_) => "runJob",
            Action::RunCommand(_) => "runCommand",
            Action::Motion(cmd) => cmd.name(),
            Action::FeedOverride(_) => "feedOverride",
            Action::SpindleOverride(_) => "spindleOverride",
            Action::LaserTest(_) => "laserTest",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Stop => "stop",
            Action::ClearAlarm(_) => "clearAlarm",
            Action::ResetMachine => "resetMachine",
            Action::Sd(op) => op.name(),
            Action::ClosePort => "closePort",
        }
    }
}

struct ActiveLink {
    params: ConnectionParams,
    writer: Box<dyn Communicator>,
}

struct Bound {
    profile: FirmwareProfile,
    dialect: Box<dyn Dialect>,
}

/// State of one machine connection
pub struct Session {
    config: SessionConfig,
    events: EventDispatcher,
    snapshot: Arc<RwLock<Snapshot>>,
    hooks: Box<dyn JobHooks>,
    link: Option<ActiveLink>,
    detector: Option<FirmwareDetector>,
    bound: Option<Bound>,
    framer: LineFramer,
    flow: FlowQueue,
    telemetry: TelemetryParser,
    run_state: RunState,
    paused: bool,
    wait_for_pos: bool,
    feed_override: u32,
    spindle_override: u32,
    laser_on: bool,
    laser_off_at: Option<Instant>,
    job: Option<Job>,
}

impl Session {
    pub fn new(config: SessionConfig, events: EventDispatcher, hooks: Box<dyn JobHooks>) -> Self {
        let telemetry = TelemetryParser::new(config.precision);
        let snapshot = Snapshot {
            connect_status: Some(CONNECT_PROMPT.to_string()),
            ..Snapshot::default()
        };
        Self {
            config,
            events,
            snapshot: Arc::new(RwLock::new(snapshot)),
            hooks,
            link: None,
            detector: None,
            bound: None,
            framer: LineFramer::new(),
            flow: FlowQueue::default(),
            telemetry,
            run_state: RunState::Disconnected,
            paused: false,
            wait_for_pos: false,
            feed_override: 100,
            spindle_override: 100,
            laser_on: false,
            laser_off_at: None,
            job: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Snapshot shared with handles
    pub fn shared_snapshot(&self) -> Arc<RwLock<Snapshot>> {
        Arc::clone(&self.snapshot)
    }

    /// Events a late viewer needs
    pub fn snapshot(&self) -> Vec<MachineEvent> {
        self.snapshot.read().events()
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// A transport is open, identified or not
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Bound firmware, once detection resolved
    pub fn profile(&self) -> Option<&FirmwareProfile> {
        self.bound.as_ref().map(|b| &b.profile)
    }

    pub fn flow(&self) -> &FlowQueue {
        &self.flow
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    fn emit(&self, event: MachineEvent) {
        self.snapshot.write().record(&event);
        self.events.publish(event);
    }

    fn set_state(&mut self, state: RunState) {
        if self.run_state != state {
            tracing::debug!("run state {} -> {}", self.run_state, state);
        }
        self.run_state = state;
        self.snapshot.write().run_state = state;
    }

    /// Surface a failed action to every viewer
    pub fn report_error(&self, err: &Error) {
        tracing::warn!("{}", err);
        self.emit(MachineEvent::Error(err.to_string()));
    }

    // ---- connection lifecycle ----

    /// Announce a connect attempt
    ///
    /// With a link already open the viewer is reminded of it and the attempt
    /// fails with [`ControllerError::AlreadyConnected`].
    pub fn begin_connect(&mut self, params: &ConnectionParams) -> Result<()> {
        if let Some(link) = &self.link {
            let target = link.params.target.clone();
            self.emit(MachineEvent::ConnectStatus(format!("opened:{}", target)));
            return Err(ControllerError::AlreadyConnected { target }.into());
        }
        self.emit(MachineEvent::ConnectStatus(format!(
            "opening:{}",
            params.target
        )));
        Ok(())
    }

    /// The transport could not be opened
    pub fn connect_failed(&mut self, params: &ConnectionParams) {
        tracing::error!("Could not open {}", params);
        self.emit(MachineEvent::ConnectStatus(CONNECT_PROMPT.to_string()));
    }

    /// Take over a freshly opened transport and start detection
    pub fn attach(
        &mut self,
        params: ConnectionParams,
        writer: Box<dyn Communicator>,
        now: Instant,
    ) {
        match params.kind {
            TransportKind::Usb => self.emit(MachineEvent::ActivePort(ActivePort {
                port: params.target.clone(),
                baudrate: params.baud_rate,
            })),
            TransportKind::Telnet | TransportKind::Esp => {
                self.emit(MachineEvent::ActiveIp(params.target.clone()))
            }
        }
        self.emit(MachineEvent::ConnectStatus(format!(
            "opened:{}",
            params.target
        )));
        tracing::info!("Connected to {}", params);

        let detector = FirmwareDetector::new(self.config.detector.clone(), now);
        let opening = detector.opening_bytes();
        self.link = Some(ActiveLink { params, writer });
        self.detector = Some(detector);
        self.framer.reset();
        self.set_state(RunState::Connecting);
        self.write(&opening);
    }

    /// Bytes from the reader half
    pub fn on_data(&mut self, bytes: &[u8], now: Instant) {
        for line in self.framer.push(bytes) {
            if self.link.is_none() {
                break;
            }
            let line = line.trim();
            if !line.is_empty() {
                self.on_line(line, now);
            }
        }
    }

    /// The reader half saw the link go away
    pub fn on_closed(&mut self, reason: Option<String>) {
        if self.link.is_none() {
            return;
        }
        if let Some(reason) = reason {
            self.report_error(&ConnectionError::ConnectionLost { reason }.into());
        }
        self.teardown();
    }

    /// Next instant [`Self::on_timeout`] has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        let detector = self.detector.as_ref().and_then(|d| d.deadline());
        match (detector, self.laser_off_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Advance timers that are due at `now`
    pub fn on_timeout(&mut self, now: Instant) {
        if let Some(detector) = self.detector.as_mut() {
            let steps = detector.on_timeout(now);
            self.apply_detector(steps);
        }
        if self.laser_off_at.is_some_and(|at| now >= at) {
            self.laser_off_at = None;
            self.laser_on = false;
            self.emit(MachineEvent::LaserTest(0.0));
        }
    }

    /// Periodic status request
    pub fn poll(&mut self) {
        let Some(bound) = &self.bound else {
            return;
        };
        match bound.dialect.status_poll() {
            StatusPoll::None => {}
            StatusPoll::Realtime(byte) => self.write(&[byte]),
            StatusPoll::PositionQuery => {
                if !self.wait_for_pos && self.flow.take_line_credit() {
                    self.wait_for_pos = true;
                    self.write_line("M114");
                }
            }
        }
    }

    /// Periodic `qCount` while a job streams
    pub fn report_queue(&mut self) {
        if self.job.is_some() {
            self.emit(MachineEvent::QueueCount(self.flow.remaining()));
        }
    }

    /// Close the link, if any
    pub fn shutdown(&mut self) {
        self.teardown();
    }

    fn on_line(&mut self, line: &str, now: Instant) {
        if let Some(detector) = self.detector.as_mut().filter(|d| !d.is_finished()) {
            let steps = detector.on_line(line, now);
            if steps.is_empty() {
                if line != "ok" {
                    self.emit(MachineEvent::Data(line.to_string()));
                }
            } else {
                self.apply_detector(steps);
            }
            return;
        }

        let Some(bound) = &self.bound else {
            return;
        };
        let items = self.telemetry.parse(line, bound.dialect.as_ref());
        for item in items {
            match item {
                Telemetry::Ack => {
                    self.flow.acknowledge();
                    self.drain();
                }
                Telemetry::PositionReply => self.wait_for_pos = false,
                Telemetry::Alarm => self.set_state(RunState::Alarm),
                Telemetry::Fault(err) => {
                    self.emit(MachineEvent::Data(err.to_string()));
                    self.report_error(&err.into());
                }
                Telemetry::MachineState(state) => self.on_machine_state(&state),
                Telemetry::Event(event) => {
                    match &event {
                        MachineEvent::FeedOverride(v) => self.feed_override = *v as u32,
                        MachineEvent::SpindleOverride(v) => self.spindle_override = *v as u32,
                        _ => {}
                    }
                    self.emit(event);
                }
            }
        }
    }

    fn on_machine_state(&mut self, state: &str) {
        if state.eq_ignore_ascii_case("alarm") {
            self.set_state(RunState::Alarm);
        } else if self.run_state == RunState::Alarm {
            self.set_state(RunState::Idle);
        }
    }

    fn apply_detector(&mut self, steps: Vec<DetectorStep>) {
        for step in steps {
            match step {
                DetectorStep::Send(bytes) => self.write(&bytes),
                DetectorStep::Resolved(profile) => self.bind(profile),
                DetectorStep::Failed => self.detection_failed(),
            }
        }
    }

    fn bind(&mut self, profile: FirmwareProfile) {
        let dialect = dialect_for(profile.firmware);
        let pending = self.detector.as_ref().map_or(0, |d| d.pending_acks());
        self.flow = FlowQueue::new(dialect.flow_credit(&self.config.limits, pending));
        self.telemetry.reset();
        self.feed_override = 100;
        self.spindle_override = 100;

        let info = FirmwareInfo::from(&profile);
        let features: Vec<Feature> = profile.features.iter().cloned().collect();
        self.bound = Some(Bound { profile, dialect });
        self.set_state(RunState::Idle);
        self.emit(MachineEvent::Firmware(info));
        self.emit(MachineEvent::FeatureList(features));
    }

    fn detection_failed(&mut self) {
        let target = self
            .link
            .as_ref()
            .map(|l| l.params.target.clone())
            .unwrap_or_default();
        self.emit(MachineEvent::Data(
            "No supported firmware detected. Closing port.".to_string(),
        ));
        self.report_error(&FirmwareError::UnsupportedFirmware { target }.into());
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        link.writer.close();
        if let Some(job) = self.job.take() {
            tracing::warn!(
                "Job dropped by disconnect after {:.1}s",
                job.elapsed().as_secs_f64()
            );
        }
        self.detector = None;
        self.bound = None;
        self.framer.reset();
        self.flow = FlowQueue::default();
        self.telemetry.reset();
        self.paused = false;
        self.wait_for_pos = false;
        self.feed_override = 100;
        self.spindle_override = 100;
        self.laser_on = false;
        self.laser_off_at = None;
        self.set_state(RunState::Disconnected);

        tracing::info!("Closed {}", link.params.target);
        self.emit(MachineEvent::ConnectStatus(format!(
            "closed:{}",
            link.params.target
        )));
        self.emit(MachineEvent::ConnectStatus(CONNECT_PROMPT.to_string()));
    }

    // ---- writes ----

    fn write(&mut self, bytes: &[u8]) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if let Err(e) = link.writer.send(bytes) {
            tracing::error!("Write to {} failed: {}", link.params.target, e);
            self.report_error(&e);
            self.teardown();
        }
    }

    fn write_line(&mut self, line: &str) {
        tracing::trace!("> {}", line);
        self.write(format!("{}\n", line).as_bytes());
    }

    fn send_outbound(&mut self, output: Vec<Outbound>) {
        let mut credited = false;
        for out in output {
            match out {
                Outbound::Immediate(bytes) => self.write(&bytes),
                Outbound::Credited(line) => {
                    self.flow.enqueue_urgent(line);
                    credited = true;
                }
            }
        }
        if credited {
            self.drain();
        }
    }

    /// Write whatever the ledger admits and handle queue completion
    fn drain(&mut self) {
        if self.link.is_none() || self.bound.is_none() {
            return;
        }
        let drained = self.flow.drain(self.paused);
        for line in &drained.lines {
            self.write_line(line);
        }
        if let Some(job) = self.job.as_mut() {
            job.sample(drained.cursor);
        }
        if drained.completed {
            self.emit(MachineEvent::QueueCount(0));
            if let Some(job) = self.job.take() {
                job.log_completion(drained.cursor);
                self.emit(MachineEvent::RunStatus(RunStatus::Finished));
                self.hooks.on_finish();
                self.set_state(RunState::Idle);
            }
        }
    }

    /// Drop queued work, restore the ledger and abort a running job
    fn flush(&mut self) {
        self.flow.reset();
        self.paused = false;
        self.wait_for_pos = false;
        if let Some(job) = self.job.take() {
            tracing::info!(
                "Job aborted after {:.1}s",
                job.elapsed().as_secs_f64()
            );
            self.hooks.on_abort();
        }
        self.emit(MachineEvent::QueueCount(0));
    }

    // ---- actions ----

    fn require_bound(&self) -> Result<&Bound> {
        self.bound
            .as_ref()
            .ok_or_else(|| ControllerError::NotConnected.into())
    }

    fn require_feature(&self, feature: Feature, command: &str) -> Result<&Bound> {
        let bound = self.require_bound()?;
        if bound.profile.supports(feature) {
            Ok(bound)
        } else {
            Err(bound.dialect.not_supported(command))
        }
    }

    /// Perform a viewer action
    pub fn handle(&mut self, action: Action, now: Instant) -> Result<()> {
        tracing::debug!("action {}", action.name());
        match action {
            Action::RunJob(source) => self.run_job(source),
            Action::RunCommand(text) => self.run_command(&text),
            Action::Motion(command) => self.motion(&command),
            Action::FeedOverride(adjust) => self.adjust_override(Feature::FeedOverride, adjust),
            Action::SpindleOverride(adjust) => {
                self.adjust_override(Feature::SpindleOverride, adjust)
            }
            Action::LaserTest(request) => self.laser_test(request, now),
            Action::Pause => self.pause(),
            Action::Resume => self.resume(),
            Action::Stop => self.stop(),
            Action::ClearAlarm(method) => self.clear_alarm(method),
            Action::ResetMachine => self.reset_machine(),
            Action::Sd(op) => self.sd(&op),
            Action::ClosePort => self.close_port(),
        }
    }

    fn run_job(&mut self, source: String) -> Result<()> {
        self.require_bound()?;
        let lines = prepare_lines(&source, self.config.optimize_gcode);
        if lines.is_empty() {
            return Err(Error::invalid_parameters("job has no lines to run"));
        }

        let count = lines.len();
        for line in lines {
            self.flow.enqueue(line);
        }
        tracing::info!("Job queued, {} lines", count);
        self.emit(MachineEvent::RunningJob(source.clone()));
        self.job = Some(Job::new(source, count));
        self.set_state(if self.paused {
            RunState::Paused
        } else {
            RunState::Running
        });
        self.emit(MachineEvent::RunStatus(RunStatus::Running));
        self.hooks.on_start();
        self.drain();
        Ok(())
    }

    fn run_command(&mut self, text: &str) -> Result<()> {
        self.require_bound()?;
        for line in prepare_lines(text, false) {
            self.flow.enqueue(line);
        }
        self.drain();
        Ok(())
    }

    fn motion(&mut self, command: &MotionCommand) -> Result<()> {
        let lines = self.require_bound()?.dialect.translate(command)?;
        for line in lines {
            self.flow.enqueue(line);
        }
        self.drain();
        Ok(())
    }

    fn adjust_override(&mut self, feature: Feature, adjust: i32) -> Result<()> {
        let is_feed = feature == Feature::FeedOverride;
        let command = if is_feed {
            "feedOverride"
        } else {
            "spindleOverride"
        };
        let bound = self.require_feature(feature, command)?;
        let change = if is_feed {
            bound.dialect.feed_override(adjust, self.feed_override)
        } else {
            bound.dialect.spindle_override(adjust, self.spindle_override)
        };

        self.send_outbound(change.output);
        if let Some(value) = change.value {
            if is_feed {
                self.feed_override = value;
                self.emit(MachineEvent::FeedOverride(value as f64));
            } else {
                self.spindle_override = value;
                self.emit(MachineEvent::SpindleOverride(value as f64));
            }
        }
        Ok(())
    }

    fn laser_test(&mut self, request: LaserRequest, now: Instant) -> Result<()> {
        let bound = self.require_feature(Feature::LaserTest, "laserTest")?;

        if self.laser_on {
            let lines = bound.dialect.laser_off();
            self.laser_on = false;
            self.laser_off_at = None;
            for line in lines {
                self.flow.enqueue(line);
            }
            self.drain();
            self.emit(MachineEvent::LaserTest(0.0));
            return Ok(());
        }

        if request.power <= 0.0 {
            tracing::debug!("laser test with zero power ignored");
            return Ok(());
        }

        let s_value = laser_s_value(request.power, request.max_s);
        let plan = bound
            .dialect
            .laser_on(request.power, s_value, request.duration_ms, &bound.profile);
        for line in plan.before.into_iter().chain(plan.after) {
            self.flow.enqueue(line);
        }
        self.laser_on = true;
        if request.duration_ms > 0 {
            self.laser_off_at = Some(now + Duration::from_millis(request.duration_ms));
        }
        self.drain();
        self.emit(MachineEvent::LaserTest(request.power));
        Ok(())
    }

    fn control_output(&self, action: ControlAction) -> Result<Vec<Outbound>> {
        let bound = self.require_bound()?;
        Ok(bound.dialect.control(action, &bound.profile))
    }

    fn pause(&mut self) -> Result<()> {
        let output = self.control_output(ControlAction::Pause)?;
        self.paused = true;
        self.send_outbound(output);
        self.set_state(RunState::Paused);
        self.emit(MachineEvent::RunStatus(RunStatus::Paused));
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let output = self.control_output(ControlAction::Resume)?;
        self.send_outbound(output);
        self.paused = false;
        self.set_state(if self.job.is_some() {
            RunState::Running
        } else {
            RunState::Idle
        });
        self.emit(MachineEvent::RunStatus(RunStatus::Resumed));
        self.drain();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let output = self.control_output(ControlAction::Stop)?;
        self.send_outbound(output);
        self.flush();
        self.laser_on = false;
        self.laser_off_at = None;
        self.set_state(RunState::Stopped);
        self.emit(MachineEvent::RunStatus(RunStatus::Stopped));
        Ok(())
    }

    fn clear_alarm(&mut self, method: ClearMethod) -> Result<()> {
        let output = self.control_output(ControlAction::ClearAlarm(method))?;
        if method == ClearMethod::Flush {
            self.flush();
        }
        self.send_outbound(output);
        self.set_state(RunState::Idle);
        self.emit(MachineEvent::RunStatus(RunStatus::Stopped));
        Ok(())
    }

    /// Soft reset; also flushes the queue, so a running job is aborted and
    /// its `on_abort` hook fires
    fn reset_machine(&mut self) -> Result<()> {
        let output = self.control_output(ControlAction::ResetMachine)?;
        self.send_outbound(output);
        self.flush();
        self.set_state(RunState::Idle);
        Ok(())
    }

    fn sd(&mut self, op: &SdOperation) -> Result<()> {
        let lines = self
            .require_feature(Feature::SdCard, op.name())?
            .dialect
            .sd_command(op)?;
        self.send_outbound(lines.into_iter().map(Outbound::Credited).collect());
        Ok(())
    }

    fn close_port(&mut self) -> Result<()> {
        let target = self
            .link
            .as_ref()
            .map(|l| l.params.target.clone())
            .ok_or(ControllerError::NotConnected)?;
        self.emit(MachineEvent::ConnectStatus(format!("closing:{}", target)));
        self.teardown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Communicator for Recorder {
        fn send(&mut self, data: &[u8]) -> Result<usize> {
            self.written.lock().extend_from_slice(data);
            Ok(data.len())
        }

        fn close(&mut self) {}

        fn target(&self) -> &str {
            "/dev/ttyTEST"
        }
    }

    fn connected(banner: &str) -> (Session, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::new(
            SessionConfig::default(),
            EventDispatcher::default(),
            Box::new(NoHooks),
        );
        let now = Instant::now();
        session.attach(
            ConnectionParams::usb("/dev/ttyTEST", 115200),
            Box::new(Recorder {
                written: Arc::clone(&written),
            }),
            now,
        );
        session.on_data(banner.as_bytes(), now);
        written.lock().clear();
        (session, written)
    }

    #[test]
    fn test_actions_need_a_bound_firmware() {
        let mut session = Session::new(
            SessionConfig::default(),
            EventDispatcher::default(),
            Box::new(NoHooks),
        );
        let err = session.handle(Action::Pause, Instant::now()).unwrap_err();
        assert!(err.is_not_connected());
    }

    #[test]
    fn test_banner_binds_dialect() {
        let (session, _) = connected("Grbl 1.1f ['$' for help]\r\n");
        assert_eq!(session.run_state(), RunState::Idle);
        assert_eq!(
            session.profile().map(|p| p.firmware),
            Some(machlink_core::Firmware::Grbl)
        );
    }

    #[test]
    fn test_unsupported_feature_is_rejected() {
        let (mut session, _) = connected("Grbl 1.1f ['$' for help]\r\n");
        let err = session
            .handle(Action::Sd(SdOperation::List), Instant::now())
            .unwrap_err();
        assert_eq!(err.to_string(), "sd.list not supported by grbl");
    }

    #[test]
    fn test_grbl_pause_writes_feed_hold() {
        let (mut session, written) = connected("Grbl 1.1f ['$' for help]\r\n");
        session.handle(Action::Pause, Instant::now()).unwrap();
        assert_eq!(written.lock().as_slice(), b"!");
        assert!(session.is_paused());
        assert_eq!(session.run_state(), RunState::Paused);
    }

    #[test]
    fn test_laser_timer_turns_test_off() {
        let (mut session, _) = connected("Grbl 1.1f ['$' for help]\r\n");
        let now = Instant::now();
        session
            .handle(
                Action::LaserTest(LaserRequest {
                    power: 10.0,
                    duration_ms: 200,
                    max_s: 1000.0,
                }),
                now,
            )
            .unwrap();
        assert_eq!(session.next_deadline(), Some(now + Duration::from_millis(200)));
        session.on_timeout(now + Duration::from_millis(200));
        assert_eq!(session.next_deadline(), None);
    }

    #[test]
    fn test_close_port_returns_to_prompt() {
        let (mut session, _) = connected("Grbl 1.1f ['$' for help]\r\n");
        session.handle(Action::ClosePort, Instant::now()).unwrap();
        assert!(!session.is_connected());
        assert_eq!(session.run_state(), RunState::Disconnected);
        assert_eq!(
            session.shared_snapshot().read().connect_status.as_deref(),
            Some(CONNECT_PROMPT)
        );
    }
}
