//! # Runtime Module
//!
//! Composition root. Every component is built once from [`Config`] and owned
//! by exactly one of two tokio tasks:
//!
//! - the control task, which drives a [`ControlNode`] (controller or robot)
//!   once per `[state] tick_ms`
//! - the display task, which renders the latest [`StatusSnapshot`] once per
//!   `[telemetry] display_interval_ms`
//!
//! The tasks share one `Arc<Mutex<StatusSnapshot>>`. The control task is its
//! only writer; the lock is taken for a copy and released before any
//! `.await`.

use async_trait::async_trait;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::actuation::store::{load_steering_middle, save_steering_middle, JsonFileStore, NonVolatileStore};
use crate::actuation::{ActuationMapper, ActuatorSink, TracingActuator};
use crate::config::{Config, RadioBackend, Role};
use crate::controller::gamepad::GamepadInput;
use crate::controller::shaper::{ButtonEdges, ButtonSet, ControlVector, InputShaper, RawInputSource, RawSample};
use crate::error::{RcLinkError, Result};
use crate::link::channel::{SerialRadio, UdpRadio};
use crate::link::{LinkTransport, RadioChannel};
use crate::packet::decoder::{decode_controller_payload, decode_telemetry_payload};
use crate::packet::encoder::{encode_controller_payload, encode_telemetry_payload};
use crate::packet::protocol::{Button, Packet, PacketType, TelemetryPayload};
use crate::state::{ConnectionStateMachine, LinkState};
use crate::telemetry::battery::{
    BatteryKind, BatteryMonitor, DividerVoltage, FixedVoltage, SysfsBattery, VoltageSource,
};
use crate::telemetry::display::{render_status, DisplaySink, StatusSnapshot, TracingDisplay};
use crate::telemetry::logger::{TelemetryLogger, TelemetryRecord};
use crate::telemetry::TelemetryScheduler;

/// Latest status, written by the control task and read by the display task.
pub type SharedStatus = Arc<Mutex<StatusSnapshot>>;

/// One end of the link, driven by the control task.
#[async_trait]
pub trait ControlNode: Send {
    /// Brings the radio up and finishes hardware initialization.
    async fn start(&mut self) -> Result<()>;

    /// Runs one control tick and returns the resulting link state.
    ///
    /// Never fails: radio errors are logged and the tick carries on with
    /// whatever it has, so the state machine and fail-safe still run.
    async fn tick(&mut self) -> LinkState;

    /// Called once after the last tick.
    async fn stop(&mut self) {}

    /// Copy of everything the display shows.
    fn snapshot(&self) -> StatusSnapshot;
}

// ==================== Builders ====================

fn parse_addr(name: &str, addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| RcLinkError::Channel(format!("Invalid {} '{}': {}", name, addr, e)))
}

/// Radio backend selected by `[radio] backend`.
///
/// # Errors
///
/// Returns error if an address does not parse or the serial port cannot be
/// opened.
pub fn build_channel(config: &Config) -> Result<Box<dyn RadioChannel>> {
    match config.radio.backend {
        RadioBackend::Udp => {
            let bind = parse_addr("bind_addr", &config.radio.bind_addr)?;
            let peer = parse_addr("peer_addr", &config.radio.peer_addr)?;
            Ok(Box::new(UdpRadio::new(bind, peer)))
        }
        RadioBackend::Serial => {
            let radio = SerialRadio::open(&config.radio.serial_port, config.radio.baud_rate)?;
            Ok(Box::new(radio))
        }
    }
}

/// Battery monitor selected by `[telemetry] battery_kind`, if any.
#[must_use]
pub fn build_battery(config: &Config) -> Option<BatteryMonitor> {
    let telemetry = &config.telemetry;
    let source: Box<dyn VoltageSource> = match telemetry.battery_kind {
        BatteryKind::None => return None,
        BatteryKind::Sysfs => Box::new(SysfsBattery::new(&telemetry.battery_path)),
        BatteryKind::Divider => Box::new(DividerVoltage::new(&telemetry.battery_path)),
        BatteryKind::Fixed => Box::new(FixedVoltage(telemetry.battery_fixed_volts)),
    };
    Some(BatteryMonitor::new(
        source,
        Duration::from_millis(telemetry.battery_interval_ms),
    ))
}

/// Builds the node for `[node] role` with its real hardware backends.
///
/// # Errors
///
/// Returns error if the radio, the gamepad or the telemetry log directory
/// cannot be set up.
pub fn build_node(config: &Config) -> Result<Box<dyn ControlNode>> {
    let channel = build_channel(config)?;
    let transport = LinkTransport::new(channel, config.node.own_id, config.transport_settings());

    match config.node.role {
        Role::Controller => {
            let device_path = Some(config.input.device_path.as_str()).filter(|p| !p.is_empty());
            let input = GamepadInput::open(device_path)?;

            let logger = if config.telemetry.enabled {
                Some(TelemetryLogger::new(
                    &config.telemetry.log_dir,
                    config.telemetry.max_records_per_file,
                    config.telemetry.max_files_to_keep,
                )?)
            } else {
                None
            };

            Ok(Box::new(ControllerNode::new(config, transport, Box::new(input), logger)))
        }
        Role::Robot => {
            let store = JsonFileStore::new(&config.actuation.calibration_file);
            Ok(Box::new(RobotNode::new(
                config,
                transport,
                Box::new(TracingActuator),
                Box::new(store),
                build_battery(config),
            )))
        }
    }
}

// ==================== Controller ====================

/// Handheld side: shapes local input, streams it, listens for telemetry.
pub struct ControllerNode {
    transport: LinkTransport,
    input: Box<dyn RawInputSource>,
    shaper: InputShaper,
    machine: ConnectionStateMachine,
    logger: Option<TelemetryLogger>,
    peer_id: u8,
    redundant_copies: u8,
    receive_budget: Duration,
    poll_interval: Duration,
    calibration_samples: usize,
    setup_button: Button,
    log_interval: Duration,
    last_logged_at: Option<Instant>,
    remote: Option<TelemetryPayload>,
}

impl ControllerNode {
    pub fn new(
        config: &Config,
        transport: LinkTransport,
        input: Box<dyn RawInputSource>,
        logger: Option<TelemetryLogger>,
    ) -> Self {
        Self {
            transport,
            input,
            shaper: InputShaper::new(config.shaper_settings()),
            machine: ConnectionStateMachine::new(Duration::from_millis(config.state.debounce_ms)),
            logger,
            peer_id: config.node.peer_id,
            redundant_copies: config.radio.redundant_copies,
            receive_budget: Duration::from_millis(config.radio.receive_budget_ms),
            poll_interval: Duration::from_millis(config.radio.poll_interval_ms),
            calibration_samples: config.input.calibration_samples,
            setup_button: config.state.setup_button,
            log_interval: Duration::from_millis(config.telemetry.log_interval_ms),
            last_logged_at: None,
            remote: None,
        }
    }

    /// Last telemetry answer from the robot.
    #[must_use]
    pub fn remote_telemetry(&self) -> Option<TelemetryPayload> {
        self.remote
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.machine.state()
    }

    fn calibrate(&mut self) {
        if self.calibration_samples == 0 {
            return;
        }
        let samples: Vec<RawSample> = (0..self.calibration_samples)
            .map(|_| RawSample::read(self.input.as_mut()))
            .collect();
        self.shaper.calibrate(&samples);
        info!(
            "Stick calibration from {} samples: offsets {:?}",
            samples.len(),
            self.shaper.stick_offsets()
        );
    }

    fn handle_packet(&mut self, packet: &Packet) {
        match packet.packet_type {
            PacketType::TelemetryData => match decode_telemetry_payload(&packet.payload) {
                Ok(telemetry) => self.remote = Some(telemetry),
                Err(e) => debug!("Dropping telemetry packet {}: {}", packet.id, e),
            },
            PacketType::ControllerData => {
                debug!("Ignoring controller data packet {} from 0x{:02X}", packet.id, packet.sender);
            }
        }
    }

    fn log_telemetry(&mut self, now: Instant) {
        if self.logger.is_none() {
            return;
        }
        let due = self
            .last_logged_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.log_interval);
        if !due {
            return;
        }
        self.last_logged_at = Some(now);

        let mut record = TelemetryRecord::now(
            self.machine.state(),
            &self.transport.stats(),
            self.transport.frame_rate(),
            self.transport.signal_strength(),
            self.transport.noise(),
        );
        record.remote_frame_rate = self.remote.map(|t| t.frame_rate);
        record.battery_voltage = self.remote.map(|t| t.battery_voltage);

        if let Some(logger) = self.logger.as_mut() {
            if let Err(e) = logger.log(&record) {
                warn!("Failed to write telemetry record: {}", e);
            }
        }
    }
}

#[async_trait]
impl ControlNode for ControllerNode {
    async fn start(&mut self) -> Result<()> {
        self.transport.begin().await?;
        self.calibrate();
        self.machine.hardware_ready(Instant::now());
        Ok(())
    }

    async fn tick(&mut self) -> LinkState {
        let sample = RawSample::read(self.input.as_mut());
        let vector = self.shaper.shape(&sample);

        let payload = encode_controller_payload(&vector.to_payload());
        let packet = Packet::new(
            self.transport.own_id(),
            self.peer_id,
            PacketType::ControllerData,
            payload,
        );
        if let Err(e) = self.transport.send_redundant(packet, self.redundant_copies).await {
            warn!("Failed to send controller update: {}", e);
        }

        match self
            .transport
            .receive_within(self.receive_budget, self.poll_interval)
            .await
        {
            Ok(Some(packet)) => self.handle_packet(&packet),
            Ok(None) => {}
            Err(e) => warn!("Radio receive failed: {}", e),
        }

        let now = Instant::now();
        let connected = self.transport.refresh(now);
        // Mirrors the robot's mode on the local display
        self.machine
            .update(connected, vector.is_released(self.setup_button), now);

        self.log_telemetry(now);
        self.machine.state()
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: Some(self.machine.state()),
            stats: self.transport.stats(),
            frame_rate: self.transport.frame_rate(),
            remote_frame_rate: self.remote.map(|t| t.frame_rate),
            battery_voltage: self.remote.map(|t| t.battery_voltage),
            rssi: self.transport.signal_strength(),
            snr: self.transport.noise(),
            steering_middle: None,
        }
    }
}

// ==================== Robot ====================

/// Mobile side: applies controller updates to the actuators and answers
/// telemetry requests.
pub struct RobotNode {
    transport: LinkTransport,
    mapper: ActuationMapper,
    actuator: Box<dyn ActuatorSink>,
    store: Box<dyn NonVolatileStore>,
    battery: Option<BatteryMonitor>,
    scheduler: TelemetryScheduler,
    machine: ConnectionStateMachine,
    edges: ButtonEdges,
    vector: ControlVector,
    peer_id: u8,
    redundant_copies: u8,
    receive_budget: Duration,
    default_middle: i32,
    setup_button: Button,
    capture_button: Button,
}

impl RobotNode {
    pub fn new(
        config: &Config,
        transport: LinkTransport,
        actuator: Box<dyn ActuatorSink>,
        store: Box<dyn NonVolatileStore>,
        battery: Option<BatteryMonitor>,
    ) -> Self {
        Self {
            transport,
            mapper: ActuationMapper::new(config.actuation_settings(), config.actuation.default_middle),
            actuator,
            store,
            battery,
            scheduler: TelemetryScheduler::new(config.telemetry.request_interval),
            machine: ConnectionStateMachine::new(Duration::from_millis(config.state.debounce_ms)),
            edges: ButtonEdges::default(),
            vector: ControlVector::default(),
            peer_id: config.node.peer_id,
            redundant_copies: config.radio.redundant_copies,
            receive_budget: Duration::from_millis(config.radio.receive_budget_ms),
            default_middle: config.actuation.default_middle,
            setup_button: config.state.setup_button,
            capture_button: config.state.capture_button,
        }
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.machine.state()
    }

    #[must_use]
    pub fn steering_middle(&self) -> i32 {
        self.mapper.middle()
    }

    /// Applies one accepted packet; returns the buttons it released.
    async fn handle_packet(&mut self, packet: Packet) -> ButtonSet {
        if packet.packet_type != PacketType::ControllerData {
            debug!("Ignoring {:?} packet {} on the robot", packet.packet_type, packet.id);
            return ButtonSet::EMPTY;
        }

        let payload = match decode_controller_payload(&packet.payload) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Dropping controller packet {}: {}", packet.id, e);
                return ButtonSet::EMPTY;
            }
        };

        let mut vector = ControlVector::from_payload(&payload);
        self.edges.annotate(&mut vector);
        self.vector = vector;

        if self.scheduler.should_respond(packet.id) {
            self.send_telemetry().await;
        }
        vector.released
    }

    async fn send_telemetry(&mut self) {
        let voltage = self.battery.as_ref().and_then(BatteryMonitor::voltage);
        let payload = TelemetryScheduler::payload(voltage, self.transport.frame_rate());
        let packet = Packet::new(
            self.transport.own_id(),
            self.peer_id,
            PacketType::TelemetryData,
            encode_telemetry_payload(&payload),
        );
        if let Err(e) = self.transport.send_redundant(packet, self.redundant_copies).await {
            warn!("Failed to send telemetry: {}", e);
        }
    }
}

#[async_trait]
impl ControlNode for RobotNode {
    async fn start(&mut self) -> Result<()> {
        let neutral = self.mapper.neutral();
        self.mapper.emit(neutral, self.actuator.as_mut());

        let middle = load_steering_middle(self.store.as_mut(), self.default_middle);
        self.mapper.set_middle(middle);
        info!("Steering middle {}", self.mapper.middle());

        self.transport.begin().await?;
        self.machine.hardware_ready(Instant::now());
        Ok(())
    }

    async fn tick(&mut self) -> LinkState {
        if let Some(battery) = self.battery.as_mut() {
            if battery.poll(Instant::now()) {
                debug!("Battery at {:.2} V", battery.voltage().unwrap_or_default());
            }
        }

        // Releases from every packet of this tick, so none is missed when
        // several updates arrive at once
        let deadline = Instant::now() + self.receive_budget;
        let mut released = ButtonSet::EMPTY;
        loop {
            match self.transport.try_receive().await {
                Ok(Some(packet)) => {
                    let pulse = self.handle_packet(packet).await;
                    released = ButtonSet::from_bits(released.bits() | pulse.bits());
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Radio receive failed: {}", e);
                    break;
                }
            }
            if Instant::now() >= deadline {
                debug!("Receive budget spent, leaving the rest for the next tick");
                break;
            }
        }
        self.vector.released = released;

        let now = Instant::now();
        let connected = self.transport.refresh(now);
        self.machine
            .update(connected, self.vector.is_released(self.setup_button), now);
        let state = self.machine.state();

        if state == LinkState::Setup && self.vector.is_released(self.capture_button) {
            let middle = self.mapper.capture_middle(&self.vector);
            save_steering_middle(self.store.as_mut(), middle);
            info!("Steering middle captured at {}", middle);
        }

        self.mapper.drive(&self.vector, state, self.actuator.as_mut());
        self.vector.clear_edges();
        state
    }

    async fn stop(&mut self) {
        let neutral = self.mapper.neutral();
        self.mapper.emit(neutral, self.actuator.as_mut());
        info!("Actuators set to neutral");
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: Some(self.machine.state()),
            stats: self.transport.stats(),
            frame_rate: self.transport.frame_rate(),
            remote_frame_rate: None,
            battery_voltage: self.battery.as_ref().and_then(BatteryMonitor::voltage),
            rssi: self.transport.signal_strength(),
            snr: self.transport.noise(),
            steering_middle: Some(self.mapper.middle()),
        }
    }
}

// ==================== Tasks ====================

fn publish(status: &SharedStatus, snapshot: StatusSnapshot) {
    if let Ok(mut slot) = status.lock() {
        *slot = snapshot;
    }
}

fn read_status(status: &SharedStatus) -> StatusSnapshot {
    status.lock().map(|s| s.clone()).unwrap_or_default()
}

async fn control_loop(
    mut node: Box<dyn ControlNode>,
    period: Duration,
    status: SharedStatus,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                node.tick().await;
                publish(&status, node.snapshot());
            }
            _ = shutdown.changed() => break,
        }
    }

    node.stop().await;
    publish(&status, node.snapshot());
}

async fn display_loop(
    mut sink: Box<dyn DisplaySink>,
    period: Duration,
    status: SharedStatus,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = read_status(&status);
                sink.show(&render_status(&snapshot));
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Starts `node`, runs both tasks until `shutdown` resolves, then stops them.
///
/// # Errors
///
/// Returns error if the node fails to start or a task panics.
pub async fn run_node<F>(
    mut node: Box<dyn ControlNode>,
    display: Box<dyn DisplaySink>,
    tick: Duration,
    display_period: Duration,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    node.start().await?;

    let status: SharedStatus = Arc::new(Mutex::new(node.snapshot()));
    let (stop_tx, stop_rx) = watch::channel(false);

    let control = tokio::spawn(control_loop(node, tick, Arc::clone(&status), stop_rx.clone()));
    let display = tokio::spawn(display_loop(display, display_period, status, stop_rx));

    info!("Running (tick {} ms)", tick.as_millis());
    shutdown.await;
    info!("Shutting down...");

    // Receivers only go away when both tasks are already gone
    let _ = stop_tx.send(true);

    control
        .await
        .map_err(|e| RcLinkError::Task(format!("control task: {}", e)))?;
    display
        .await
        .map_err(|e| RcLinkError::Task(format!("display task: {}", e)))?;
    Ok(())
}

/// Builds the configured node and runs it until `shutdown` resolves.
///
/// # Errors
///
/// Returns error if any component fails to build or start.
pub async fn run_until<F>(config: &Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let node = build_node(config)?;
    run_node(
        node,
        Box::new(TracingDisplay::default()),
        Duration::from_millis(config.state.tick_ms),
        Duration::from_millis(config.telemetry.display_interval_ms),
        shutdown,
    )
    .await
}

/// Runs the configured node until Ctrl+C.
///
/// # Errors
///
/// Returns error if any component fails to build or start.
pub async fn run(config: &Config) -> Result<()> {
    run_until(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
    })
    .await
}
