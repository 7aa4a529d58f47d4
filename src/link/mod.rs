//! # Link Module
//!
//! Owns the session lifecycle: the live serial link with its reconnect
//! loop, the dummy generator, the uplink write path and pressure playback.
//!
//! At most one ingestion task runs at a time. It is either the live read
//! loop or the dummy generator loop, never both. Outbound writes share the
//! transport with the read loop only through the write lock.

pub mod backoff;
pub mod state;

pub use state::LinkState;

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{invalid, Config, INTERVAL_RANGE_S};
use crate::dispatch::Event;
use crate::error::{GroundError, Result};
use crate::pipeline::{lock, Pipeline};
use crate::serial::{LineFramer, PortOpener, PortReader, PortWriter};
use crate::telemetry::{SequenceStats, SimulationGenerator};
use crate::uplink::{encode_raw, CommandEncoder, CommandIntent, ModeFlags, PressureProfile, SimMode};

/// Read buffer size for the live link
const READ_CHUNK: usize = 1024;

/// A spawned loop and its stop signal
struct Task {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Task {
    fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(f(rx));
        Self { shutdown, handle }
    }

    /// Signal the loop and wait until it has finished its current line
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("Task ended abnormally: {}", e);
        }
    }
}

enum Session {
    Live(Task),
    Dummy {
        task: Task,
        interval: watch::Sender<Duration>,
    },
}

/// Operator-facing snapshot of the core's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub link: LinkState,
    pub stats: SequenceStats,
    pub flags: ModeFlags,
    pub recording: bool,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self
            .stats
            .last_packet_count
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "[CONNECTION: {}] [DUMMY: {}] [SIM: {}/{}] [RECORDING: {}] [RECEIVED: {}] [LOST: {}] [LAST PACKET: {}]",
            self.link,
            on_off(self.flags.dummy_enabled),
            on_off(self.flags.sim_enabled),
            on_off(self.flags.sim_activated),
            on_off(self.recording),
            self.stats.received,
            self.stats.lost,
            last
        )
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

/// Session and uplink controller
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ConnectionController {
    config: Arc<RwLock<Arc<Config>>>,
    opener: Arc<dyn PortOpener>,
    pipeline: Arc<Pipeline>,
    encoder: Arc<Mutex<CommandEncoder>>,
    writer: Arc<AsyncMutex<Option<PortWriter>>>,
    state: Arc<watch::Sender<LinkState>>,
    session: Arc<AsyncMutex<Option<Session>>>,
    playback: Arc<AsyncMutex<Option<Task>>>,
    link_fault: Arc<Mutex<Arc<Notify>>>,
}

impl fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionController")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ConnectionController {
    pub fn new(config: Arc<Config>, opener: Arc<dyn PortOpener>, pipeline: Arc<Pipeline>) -> Self {
        let encoder = CommandEncoder::new(config.application.team_id.clone());
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            config: Arc::new(RwLock::new(config)),
            opener,
            pipeline,
            encoder: Arc::new(Mutex::new(encoder)),
            writer: Arc::new(AsyncMutex::new(None)),
            state: Arc::new(state),
            session: Arc::new(AsyncMutex::new(None)),
            playback: Arc::new(AsyncMutex::new(None)),
            link_fault: Arc::new(Mutex::new(Arc::new(Notify::new()))),
        }
    }

    /// Current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn link_state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Receiver observing every link state change
    pub fn watch_link_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn mode_flags(&self) -> ModeFlags {
        lock(&self.encoder).flags()
    }

    pub fn stats(&self) -> SequenceStats {
        self.pipeline.stats()
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            link: self.link_state(),
            stats: self.pipeline.stats(),
            flags: self.mode_flags(),
            recording: self.pipeline.is_recording(),
        }
    }

    /// Ports the opener can currently reach
    pub fn available_ports(&self) -> Vec<String> {
        self.opener.list()
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Link state {} -> {}", previous, state);
        }
    }

    /// Open the live link
    ///
    /// # Errors
    ///
    /// - `GroundError::ModeConflict` if a live session or dummy mode is
    ///   already running
    /// - `GroundError::Transport` if the port cannot be opened; the state is
    ///   left `Disconnected`
    pub async fn connect(&self, port: &str, baud: u32) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(active) = session.as_ref() {
            return Err(conflict(active, "connect"));
        }

        self.set_state(LinkState::Connecting);
        let transport = match self.opener.open(port, baud) {
            Ok(transport) => transport,
            Err(e) => {
                self.set_state(LinkState::Disconnected);
                warn!("Connection to {} failed: {}", port, e);
                return Err(e);
            }
        };

        if let Err(e) = self.pipeline.begin_session(&transport.description) {
            self.pipeline.report_fault(&e.to_string());
        }

        let fault = Arc::new(Notify::new());
        *lock(&self.link_fault) = Arc::clone(&fault);
        *self.writer.lock().await = Some(transport.writer);
        self.set_state(LinkState::Connected);

        let live = LiveLink {
            config: self.config(),
            opener: Arc::clone(&self.opener),
            pipeline: Arc::clone(&self.pipeline),
            writer: Arc::clone(&self.writer),
            state: Arc::clone(&self.state),
            fault,
            link_fault: Arc::clone(&self.link_fault),
            port: port.to_string(),
            baud,
        };
        let reader = transport.reader;
        *session = Some(Session::Live(Task::spawn(move |shutdown| live.run(reader, shutdown))));

        self.pipeline.status(format!("Connected: {}", transport.description));
        Ok(())
    }

    /// Close the live link
    ///
    /// The read loop finishes the line in hand, then the transport is closed
    /// and both logs are flushed. Calling it while already disconnected is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns `GroundError::ModeConflict` while dummy mode is on.
    pub async fn disconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        match session.take() {
            Some(Session::Live(task)) => {
                self.stop_playback().await;
                task.stop().await;
                if let Some(mut writer) = self.writer.lock().await.take() {
                    if let Err(e) = writer.shutdown().await {
                        debug!("Closing transport: {}", e);
                    }
                }
                self.pipeline.end_session();
                self.set_state(LinkState::Disconnected);
                self.pipeline.status("Disconnected");
                Ok(())
            }
            Some(dummy) => {
                let err = conflict(&dummy, "disconnect");
                *session = Some(dummy);
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Start feeding the pipeline from the dummy generator
    ///
    /// # Errors
    ///
    /// Returns `GroundError::ModeConflict` unless the link is disconnected
    /// and dummy mode is off.
    pub async fn enable_dummy(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(active) = session.as_ref() {
            return Err(conflict(active, "dummy.on"));
        }

        let config = self.config();
        let period = config.dummy_interval();
        if let Err(e) = self
            .pipeline
            .begin_session(&format!("DUMMY @ {:.2}s", period.as_secs_f64()))
        {
            self.pipeline.report_fault(&e.to_string());
        }

        let (interval, interval_rx) = watch::channel(period);
        let dummy = DummyFeed {
            pipeline: Arc::clone(&self.pipeline),
            generator: SimulationGenerator::new(config.application.team_id.clone()),
        };
        let task = Task::spawn(move |shutdown| dummy.run(interval_rx, shutdown));
        *session = Some(Session::Dummy { task, interval });
        lock(&self.encoder).set_dummy_enabled(true);

        self.pipeline.status("Dummy mode ON");
        Ok(())
    }

    /// Stop the dummy generator; a no-op when it is not running
    ///
    /// # Errors
    ///
    /// Returns `GroundError::ModeConflict` while the live link is open.
    pub async fn disable_dummy(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        match session.take() {
            Some(Session::Dummy { task, .. }) => {
                task.stop().await;
                self.pipeline.end_session();
                lock(&self.encoder).set_dummy_enabled(false);
                self.pipeline.status("Dummy mode OFF");
                Ok(())
            }
            Some(live) => {
                let err = conflict(&live, "dummy.off");
                *session = Some(live);
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Change the dummy cadence while it runs
    ///
    /// # Errors
    ///
    /// - `GroundError::Config` when `period` is outside `INTERVAL_RANGE_S`
    /// - `GroundError::ModeConflict` when dummy mode is off
    pub async fn set_dummy_interval(&self, period: Duration) -> Result<()> {
        if !INTERVAL_RANGE_S.contains(&period.as_secs_f64()) {
            return Err(invalid(format!(
                "dummy interval must be between {}s and {}s",
                INTERVAL_RANGE_S.start(),
                INTERVAL_RANGE_S.end()
            )));
        }
        let session = self.session.lock().await;
        match session.as_ref() {
            Some(Session::Dummy { interval, .. }) => {
                interval.send_replace(period);
                self.pipeline
                    .status(format!("Dummy interval set to {:.2}s", period.as_secs_f64()));
                Ok(())
            }
            _ => Err(GroundError::ModeConflict(
                "dummy mode is off; enable it before changing its interval".to_string(),
            )),
        }
    }

    /// Encode and write an uplink command
    ///
    /// Returns the exact text written.
    ///
    /// # Errors
    ///
    /// - `GroundError::Transport` when no link is open or the write fails
    /// - `GroundError::GuardRejected` for `SIMP` without simulation armed;
    ///   nothing is written
    pub async fn send(&self, intent: &CommandIntent) -> Result<String> {
        let sent = {
            let mut writer = self.writer.lock().await;
            if writer.is_none() {
                return Err(self.not_connected());
            }
            let built = lock(&self.encoder).build(intent);
            let command = match built {
                Ok(command) => command,
                Err(e) => {
                    self.pipeline.status(format!("(!) {}", e));
                    return Err(e);
                }
            };
            self.write_locked(&mut writer, command).await?
        };

        if *intent == CommandIntent::Simulation(SimMode::Disable) {
            self.stop_playback().await;
        }
        Ok(sent)
    }

    /// Write operator text verbatim, adding CRLF if missing
    pub async fn send_raw(&self, text: &str) -> Result<String> {
        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            return Err(self.not_connected());
        }
        self.write_locked(&mut writer, encode_raw(text)).await
    }

    fn not_connected(&self) -> GroundError {
        let state = self.link_state();
        let err = if state.is_live() {
            GroundError::Transport(format!("cannot send while {}; wait for the link", state))
        } else {
            GroundError::Transport(format!("cannot send while {}; connect first", state))
        };
        self.pipeline.status(format!("(!) {}", err));
        err
    }

    async fn write_locked(&self, writer: &mut Option<PortWriter>, command: String) -> Result<String> {
        let Some(port) = writer.as_mut() else {
            return Err(self.not_connected());
        };

        let written = match port.write_all(command.as_bytes()).await {
            Ok(()) => port.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            // The read loop owns recovery; hand it the fault
            *writer = None;
            lock(&self.link_fault).notify_one();
            let err = GroundError::Transport(format!("write failed: {}", e));
            self.pipeline.report_fault(&err.to_string());
            return Err(err);
        }

        let echo = command.trim_end().to_string();
        info!("Sent: {}", echo);
        self.pipeline.publish(&Event::Sent(echo));
        Ok(command)
    }

    /// Start sending the configured pressure profile, one `SIMP` per
    /// `tx_interval_s`
    ///
    /// Returns the number of samples queued. Replaces a running playback.
    ///
    /// # Errors
    ///
    /// - `GroundError::GuardRejected` unless simulation is enabled and activated
    /// - `GroundError::Transport` when no link is open
    /// - `GroundError::Config` / `GroundError::Csv` / `GroundError::Io` when
    ///   the profile cannot be loaded
    pub async fn sim_play(&self) -> Result<usize> {
        if !self.mode_flags().simulation_armed() {
            let err = GroundError::GuardRejected(
                "simulation playback requires SIM ENABLE and SIM ACTIVATE first".to_string(),
            );
            self.pipeline.status(format!("(!) {}", err));
            return Err(err);
        }
        if self.writer.lock().await.is_none() {
            return Err(self.not_connected());
        }

        let config = self.config();
        let profile = PressureProfile::load(
            &config.simulation.csv_profile_path,
            &config.simulation.csv_column,
        )?;
        let samples = profile.len();

        self.stop_playback().await;
        let controller = self.clone();
        let period = config.tx_interval();
        let task = Task::spawn(move |shutdown| controller.play(profile, period, shutdown));
        *self.playback.lock().await = Some(task);

        self.pipeline.status(format!(
            "Simulation playback started ({} samples every {:.2}s)",
            samples,
            period.as_secs_f64()
        ));
        Ok(samples)
    }

    /// Stop pressure playback; a no-op when none runs
    pub async fn sim_stop(&self) {
        if self.stop_playback().await {
            self.pipeline.status("Simulation playback stopped");
        }
    }

    async fn stop_playback(&self) -> bool {
        let task = self.playback.lock().await.take();
        match task {
            Some(task) => {
                task.stop().await;
                true
            }
            None => false,
        }
    }

    async fn play(self, profile: PressureProfile, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        for pressure in profile {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.send(&CommandIntent::SimulatedPressure(pressure)).await {
                if e.is_transport() {
                    warn!("Simulation playback lost the link: {}", e);
                }
                self.pipeline.status(format!("Simulation playback aborted: {}", e));
                return;
            }
        }
        self.pipeline.status("Simulation playback finished");
    }

    /// Operator "clear all"
    pub fn clear_runtime(&self) -> Result<()> {
        self.pipeline.clear_runtime()?;
        self.pipeline.status("Runtime cleared");
        Ok(())
    }

    pub fn set_recording(&self, enabled: bool) -> Result<()> {
        self.pipeline.set_recording(enabled)
    }

    /// Swap in a reloaded configuration
    ///
    /// Counters and simulation flags are kept.
    ///
    /// # Errors
    ///
    /// Returns `GroundError::ModeConflict` while a session runs, or the
    /// persistence error if the new logs folder cannot be created.
    pub async fn reload(&self, config: Arc<Config>) -> Result<()> {
        let session = self.session.lock().await;
        if let Some(active) = session.as_ref() {
            return Err(conflict(active, "reload"));
        }

        self.pipeline.reconfigure(&config)?;
        lock(&self.encoder).set_team_id(config.application.team_id.clone());
        *self.config.write().unwrap_or_else(std::sync::PoisonError::into_inner) = config;
        self.pipeline.status("Configuration reloaded");
        Ok(())
    }

    /// Stop whatever session runs; used on process exit
    pub async fn shutdown(&self) {
        if let Err(e) = self.disable_dummy().await {
            debug!("Shutdown: {}", e);
        }
        if let Err(e) = self.disconnect().await {
            debug!("Shutdown: {}", e);
        }
        self.stop_playback().await;
    }
}

fn conflict(active: &Session, action: &str) -> GroundError {
    let reason = match active {
        Session::Live(_) => "live link is open",
        Session::Dummy { .. } => "dummy mode is on",
    };
    GroundError::ModeConflict(format!("cannot {} while {}", action, reason))
}

/// Why the read loop left the connected phase
enum ReadStep {
    Shutdown,
    Data(usize),
    Idle,
    Lost(String),
}

/// State moved into the live read task
struct LiveLink {
    config: Arc<Config>,
    opener: Arc<dyn PortOpener>,
    pipeline: Arc<Pipeline>,
    writer: Arc<AsyncMutex<Option<PortWriter>>>,
    state: Arc<watch::Sender<LinkState>>,
    fault: Arc<Notify>,
    link_fault: Arc<Mutex<Arc<Notify>>>,
    port: String,
    baud: u32,
}

impl LiveLink {
    async fn run(mut self, reader: PortReader, mut shutdown: watch::Receiver<bool>) {
        let mut reader = reader;
        let mut framer = LineFramer::new();
        let mut buf = [0u8; READ_CHUNK];
        let read_timeout = self.config.read_timeout();

        loop {
            let step = tokio::select! {
                biased;
                _ = shutdown.changed() => ReadStep::Shutdown,
                _ = self.fault.notified() => ReadStep::Lost("write failure".to_string()),
                read = timeout(read_timeout, reader.read(&mut buf)) => match read {
                    Err(_) => ReadStep::Idle,
                    Ok(Ok(0)) => ReadStep::Lost("end of stream".to_string()),
                    Ok(Ok(n)) => ReadStep::Data(n),
                    Ok(Err(e)) => ReadStep::Lost(e.to_string()),
                },
            };

            match step {
                ReadStep::Shutdown => return,
                ReadStep::Idle => continue,
                ReadStep::Data(n) => {
                    for line in framer.push(&buf[..n]) {
                        self.pipeline.ingest_line(&line);
                    }
                }
                ReadStep::Lost(reason) => {
                    if framer.pending() > 0 {
                        debug!("Dropping {} bytes of a partial line", framer.pending());
                    }
                    framer.reset();
                    match self.recover(&reason, &mut shutdown).await {
                        Some(fresh) => reader = fresh,
                        None => return,
                    }
                }
            }
        }
    }

    /// Unplugged phase: retry with backoff until reopened or told to stop
    async fn recover(&mut self, reason: &str, shutdown: &mut watch::Receiver<bool>) -> Option<PortReader> {
        self.writer.lock().await.take();
        self.state.send_replace(LinkState::Unplugged);
        self.pipeline.report_fault(&format!("[UNPLUGGED] {}: {}", self.port, reason));
        self.pipeline.publish(&Event::Unplugged);

        let max_attempts = self.config.connection.max_reconnect_attempts;
        let cap_ms = self.config.connection.reconnect_interval_ms;
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            if max_attempts > 0 && attempt > max_attempts {
                self.pipeline.status(format!(
                    "[UNPLUGGED] gave up after {} attempts; disconnect to reset",
                    max_attempts
                ));
                let _ = shutdown.changed().await;
                return None;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => return None,
                _ = sleep(backoff::retry_delay(attempt, cap_ms)) => {}
            }

            match self.opener.open(&self.port, self.baud) {
                Ok(transport) => {
                    // A write that failed on the old port may have left a
                    // stored permit; the new port gets its own signal
                    let mut writer = self.writer.lock().await;
                    self.fault = Arc::new(Notify::new());
                    *lock(&self.link_fault) = Arc::clone(&self.fault);
                    *writer = Some(transport.writer);
                    drop(writer);
                    self.state.send_replace(LinkState::Connected);
                    self.pipeline.publish(&Event::Relinked);
                    self.pipeline
                        .status(format!("[RELINKED] {} after {} attempt(s)", transport.description, attempt));
                    return Some(transport.reader);
                }
                Err(e) => {
                    if self.config.connection.alarm {
                        eprint!("\x07");
                    }
                    warn!("Reconnect attempt {} to {} failed: {}", attempt, self.port, e);
                    self.pipeline
                        .status(format!("[UNPLUGGED] retry {} failed: {}", attempt, e));
                }
            }
        }
    }
}

/// State moved into the dummy generator task
struct DummyFeed {
    pipeline: Arc<Pipeline>,
    generator: SimulationGenerator,
}

enum DummyStep {
    Shutdown,
    Retimed,
    Tick,
}

impl DummyFeed {
    async fn run(mut self, mut interval: watch::Receiver<Duration>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let period = *interval.borrow_and_update();
            let step = tokio::select! {
                biased;
                _ = shutdown.changed() => DummyStep::Shutdown,
                changed = interval.changed() => match changed {
                    Ok(()) => DummyStep::Retimed,
                    Err(_) => DummyStep::Shutdown,
                },
                _ = sleep(period) => DummyStep::Tick,
            };

            match step {
                DummyStep::Shutdown => return,
                DummyStep::Retimed => continue,
                DummyStep::Tick => {
                    let record = self.generator.next(self.pipeline.last_packet_count());
                    self.pipeline.ingest_line(&record.to_line());
                }
            }
        }
    }
}
