//! Capture session engine
//!
//! The [`CaptureEngine`] owns the device transport, the capture sink and the
//! [`CaptureStateMachine`]. It issues commands, validates acknowledgements,
//! classifies every inbound line and decides when a capture session is active,
//! safely started or safely terminated.
//!
//! The engine never blocks unboundedly: every wait is capped by
//! [`CaptureTiming`], and the sustained capture loop is a cooperative
//! [`CaptureEngine::stream_step`] that the caller re-invokes, checking for
//! cancellation between calls.

use super::logger::{CaptureSink, SinkError, SinkWriter};
use super::protocol::{classify, ClassifiedLine, Command, LabelError, LineKind};
use super::state_machine::{CaptureState, CaptureStateMachine, InvalidTransition, StateTransition};
use super::transport::{LineTransport, TransportError};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Progress is reported every this many samples
pub const PROGRESS_INTERVAL: u64 = 50;

/// Bounded waits used by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureTiming {
    /// Delay after opening the port before talking to the device
    /// (boards commonly reset when the port opens)
    #[serde(with = "millis")]
    pub settle: Duration,
    /// How long to wait for replies after `STATUS`/`STOP`
    #[serde(with = "millis")]
    pub drain_wait: Duration,
    /// Number of polls while waiting for the CSV header
    pub handshake_attempts: u32,
    /// Delay between header polls
    #[serde(with = "millis")]
    pub handshake_interval: Duration,
    /// Upper bound for a single line read
    #[serde(with = "millis")]
    pub read_timeout: Duration,
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            drain_wait: Duration::from_millis(500),
            handshake_attempts: 10,
            handshake_interval: Duration::from_millis(500),
            read_timeout: Duration::from_millis(100),
        }
    }
}

impl CaptureTiming {
    /// Total time the handshake may take
    pub fn handshake_budget(&self) -> Duration {
        self.handshake_interval * self.handshake_attempts
    }
}

/// Serde adapter storing a `Duration` as integer milliseconds
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Operator issued `stop`
    Operator,
    /// Operator interrupted the capture (Ctrl+C)
    Cancelled,
    /// Configured capture duration elapsed
    TimeLimit,
    /// Device sent its stop marker on its own
    Device,
    /// Persisting a line failed; the session was stopped to avoid silent loss
    SinkFailure,
    /// The link to the device failed
    TransportFailure,
    /// Disconnect while a session was active
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operator => write!(f, "stopped by operator"),
            Self::Cancelled => write!(f, "interrupted"),
            Self::TimeLimit => write!(f, "time limit reached"),
            Self::Device => write!(f, "stopped by device"),
            Self::SinkFailure => write!(f, "capture sink failed"),
            Self::TransportFailure => write!(f, "transport failed"),
            Self::Shutdown => write!(f, "disconnected"),
        }
    }
}

/// Session engine errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Port unavailable or link lost
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Operation not valid in the current state
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,
        /// State at the time
        state: CaptureState,
    },

    /// Label cannot be sent to the device
    #[error("invalid label: {0}")]
    InvalidLabel(#[from] LabelError),

    /// Device never sent its CSV header
    #[error("device did not send a header for '{label}' within {attempts} attempts")]
    HandshakeTimeout {
        /// Requested label
        label: String,
        /// Polls performed
        attempts: u32,
        /// Whether the device at least acknowledged the start
        acknowledged: bool,
    },

    /// Capture destination could not be opened
    #[error("capture sink unavailable: {0}")]
    SinkOpen(#[source] SinkError),

    /// Persisting a line failed mid-capture; the session has been stopped
    #[error("capture stopped after {} samples: {source}", summary.samples)]
    SinkWrite {
        /// Underlying failure
        #[source]
        source: SinkError,
        /// Summary of the forcibly stopped session
        summary: Box<CaptureSummary>,
    },

    /// Internal state bookkeeping rejected a transition
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Returned when a capture starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureStarted {
    /// Session ID
    pub session_id: Uuid,
    /// Label
    pub label: String,
    /// Header line as received (also the first line in the sink)
    pub header: String,
    /// Sink destination
    pub destination: String,
    /// Whether the device sent its start marker before the header
    pub acknowledged: bool,
}

/// Returned whenever a session ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSummary {
    /// Session ID
    pub session_id: Uuid,
    /// Label
    pub label: String,
    /// Data lines persisted
    pub samples: u64,
    /// Sample count the device reported in its stop marker, if any
    pub device_samples: Option<u64>,
    /// Sink destination (none if the sink never opened)
    pub destination: Option<String>,
    /// Why the session ended
    pub reason: StopReason,
    /// When `START` was sent
    pub started_at: DateTime<Local>,
    /// Session duration
    pub elapsed: Duration,
    /// Device replies seen while stopping
    pub device_responses: Vec<String>,
}

/// Result of one [`CaptureEngine::stream_step`]
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Nothing was pending
    Idle,
    /// A data line was persisted
    Sample {
        /// Samples persisted so far in this session
        count: u64,
    },
    /// A non-data line was observed (status, repeated header, noise)
    Control(ClassifiedLine),
    /// The device ended the session
    SessionEnded(CaptureSummary),
}

/// Result of [`CaptureEngine::end_capture`]
#[derive(Debug, Clone)]
pub enum EndOutcome {
    /// There was no session to end
    NotCollecting,
    /// Session ended
    Ended(CaptureSummary),
}

/// Live capture context
pub struct Session {
    id: Uuid,
    label: String,
    started_at: DateTime<Local>,
    started: Instant,
    sample_count: u64,
    acknowledged: bool,
    writer: Option<Box<dyn SinkWriter>>,
}

impl Session {
    fn new(label: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.to_string(),
            started_at: Local::now(),
            started: Instant::now(),
            sample_count: 0,
            acknowledged: false,
            writer: None,
        }
    }

    /// Session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Data lines persisted so far
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Whether the device acknowledged the start
    pub fn acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Sink destination, once opened
    pub fn destination(&self) -> Option<String> {
        self.writer.as_ref().map(|w| w.destination())
    }

    /// When the session started
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    fn summary(
        &self,
        reason: StopReason,
        device_samples: Option<u64>,
        device_responses: Vec<String>,
    ) -> CaptureSummary {
        CaptureSummary {
            session_id: self.id,
            label: self.label.clone(),
            samples: self.sample_count,
            device_samples,
            destination: self.destination(),
            reason,
            started_at: self.started_at,
            elapsed: self.started.elapsed(),
            device_responses,
        }
    }

    /// Close the sink if open. Errors are logged; the session is over either way.
    fn close_sink(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.close() {
                warn!(session = %self.id, error = %e, "failed to close capture sink");
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("sample_count", &self.sample_count)
            .field("acknowledged", &self.acknowledged)
            .field("destination", &self.destination())
            .finish()
    }
}

/// Session protocol engine
pub struct CaptureEngine<T: LineTransport> {
    transport: T,
    sink: Box<dyn CaptureSink>,
    timing: CaptureTiming,
    machine: CaptureStateMachine,
    session: Option<Session>,
}

impl<T: LineTransport> CaptureEngine<T> {
    /// Create an engine with default timing
    pub fn new(transport: T, sink: Box<dyn CaptureSink>) -> Self {
        Self::with_timing(transport, sink, CaptureTiming::default())
    }

    /// Create an engine with custom timing
    pub fn with_timing(transport: T, sink: Box<dyn CaptureSink>, timing: CaptureTiming) -> Self {
        Self {
            transport,
            sink,
            timing,
            machine: CaptureStateMachine::new(),
            session: None,
        }
    }

    /// Current state
    pub fn state(&self) -> CaptureState {
        self.machine.state()
    }

    /// Active session, if any
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Recorded transitions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &StateTransition> {
        self.machine.history()
    }

    /// States visited so far
    pub fn state_path(&self) -> Vec<CaptureState> {
        self.machine.path()
    }

    /// Timing in use
    pub fn timing(&self) -> &CaptureTiming {
        &self.timing
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether the transport is open
    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    /// Open the transport, discard stale input and probe the device with
    /// `STATUS`. Returns whatever the device answered within the drain wait.
    ///
    /// Only valid without an active capture, since clearing input would drop
    /// rows that belong to it.
    pub async fn connect(&mut self) -> Result<Vec<String>, SessionError> {
        self.require_state("connect", CaptureState::Idle)?;
        if !self.transport.is_open() {
            self.transport.open().await?;
            info!(link = %self.transport.connection_info(), "connected");

            if !self.timing.settle.is_zero() {
                tokio::time::sleep(self.timing.settle).await;
            }
        }

        self.transport.clear_input().await?;
        self.send(&Command::Status).await?;
        Ok(self.drain().await?)
    }

    /// Ask the device for its status. Only valid without an active capture.
    pub async fn probe_status(&mut self) -> Result<Vec<String>, SessionError> {
        self.require_state("probe status", CaptureState::Idle)?;
        if !self.transport.is_open() {
            return Err(TransportError::NotConnected.into());
        }

        self.send(&Command::Status).await?;
        Ok(self.drain().await?)
    }

    /// Start a labelled capture and wait (bounded) for the device's CSV header.
    ///
    /// On success the sink is open with the header as its first line and the
    /// engine is `Collecting`. If the header never arrives the engine returns to
    /// `Idle` without opening a sink.
    pub async fn begin_capture(&mut self, label: &str) -> Result<CaptureStarted, SessionError> {
        self.require_state("begin capture", CaptureState::Idle)?;
        if !self.transport.is_open() {
            return Err(TransportError::NotConnected.into());
        }
        let command = Command::start(label)?;

        self.send(&command).await?;
        self.session = Some(Session::new(label));
        self.machine
            .transition(CaptureState::AwaitingHeader, Some("START sent"))?;
        info!(label, "capture requested, waiting for header");

        let attempts = self.timing.handshake_attempts;
        for attempt in 1..=attempts {
            // Each attempt owns one interval, however chatty the device is
            let window_end = Instant::now() + self.timing.handshake_interval;
            while self.pending_or_abandon()? > 0 {
                let Some(raw) = self.read_or_abandon().await? else {
                    break;
                };
                let line = classify(&raw);

                match line.kind {
                    LineKind::SessionStart => {
                        debug!(attempt, marker = %line.text, "device acknowledged start");
                        if let Some(session) = self.session.as_mut() {
                            session.acknowledged = true;
                        }
                    }
                    LineKind::HeaderLine => return self.open_capture(line.text).await,
                    _ => debug!(attempt, %line, "discarded during handshake"),
                }

                if Instant::now() >= window_end {
                    break;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(window_end.saturating_duration_since(Instant::now())).await;
            }
        }

        let acknowledged = self.session.as_ref().is_some_and(Session::acknowledged);
        if acknowledged {
            // The device thinks it is streaming; tell it to stop
            if let Err(e) = self.send(&Command::Stop).await {
                warn!(error = %e, "failed to send STOP after handshake timeout");
            }
        }

        self.session = None;
        self.machine
            .transition(CaptureState::Idle, Some("handshake timeout"))?;
        warn!(label, attempts, acknowledged, "no header from device");

        Err(SessionError::HandshakeTimeout {
            label: label.to_string(),
            attempts,
            acknowledged,
        })
    }

    async fn open_capture(&mut self, header: String) -> Result<CaptureStarted, SessionError> {
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::InvalidState {
                operation: "open capture",
                state: self.machine.state(),
            });
        };

        let opened = self
            .sink
            .open(&session.label, session.started_at)
            .and_then(|mut writer| writer.append(&header).map(|()| writer));

        match opened {
            Ok(writer) => {
                session.writer = Some(writer);
                let started = CaptureStarted {
                    session_id: session.id,
                    label: session.label.clone(),
                    header,
                    destination: session.destination().unwrap_or_default(),
                    acknowledged: session.acknowledged,
                };
                self.machine
                    .transition(CaptureState::Collecting, Some("header received"))?;
                info!(
                    session = %started.session_id,
                    label = %started.label,
                    destination = %started.destination,
                    "capture started"
                );
                Ok(started)
            }
            Err(e) => {
                warn!(error = %e, "capture sink unavailable, stopping device");
                let (_, transport_error) = self.stop_session(StopReason::SinkFailure).await?;
                if let Some(te) = transport_error {
                    warn!(error = %te, "device may still be streaming");
                }
                Err(SessionError::SinkOpen(e))
            }
        }
    }

    /// Process at most one pending line. Returns immediately when nothing is
    /// pending; callers poll this in a loop and check for cancellation
    /// between calls.
    pub async fn stream_step(&mut self) -> Result<StepOutcome, SessionError> {
        self.require_state("stream", CaptureState::Collecting)?;

        if self.pending_or_abandon()? == 0 {
            return Ok(StepOutcome::Idle);
        }
        let Some(raw) = self.read_or_abandon().await? else {
            return Ok(StepOutcome::Idle);
        };
        let line = classify(&raw);

        match line.kind {
            LineKind::DataLine => self.persist(line).await,
            LineKind::SessionStop => {
                let device_samples = line.reported_samples();
                info!(marker = %line.text, "device ended the session");
                self.machine
                    .transition(CaptureState::Stopping, Some("device stop marker"))?;
                let summary = self.conclude(StopReason::Device, device_samples, vec![line.text])?;
                Ok(StepOutcome::SessionEnded(summary))
            }
            _ => {
                debug!(%line, "control line during capture");
                Ok(StepOutcome::Control(line))
            }
        }
    }

    async fn persist(&mut self, line: ClassifiedLine) -> Result<StepOutcome, SessionError> {
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::InvalidState {
                operation: "persist sample",
                state: self.machine.state(),
            });
        };

        let written = match session.writer.as_mut() {
            Some(writer) => writer.append(&line.text),
            None => Err(SinkError::Closed(session.label.clone())),
        };

        match written {
            Ok(()) => {
                session.sample_count += 1;
                let count = session.sample_count;
                if count % PROGRESS_INTERVAL == 0 {
                    info!(session = %session.id, samples = count, "capture progress");
                }
                Ok(StepOutcome::Sample { count })
            }
            Err(source) => {
                warn!(error = %source, "sample could not be persisted, forcing stop");
                let (summary, transport_error) = self.stop_session(StopReason::SinkFailure).await?;
                if let Some(te) = transport_error {
                    warn!(error = %te, "STOP after sink failure did not reach the device");
                }
                Err(SessionError::SinkWrite {
                    source,
                    summary: Box::new(summary),
                })
            }
        }
    }

    /// Stop the active session: send `STOP`, report replies, close the sink and
    /// return to `Idle`. Calling this without a session is a no-op.
    pub async fn end_capture(&mut self) -> Result<EndOutcome, SessionError> {
        self.end_capture_with(StopReason::Operator).await
    }

    /// [`end_capture`](Self::end_capture) with an explicit reason
    pub async fn end_capture_with(&mut self, reason: StopReason) -> Result<EndOutcome, SessionError> {
        let state = self.machine.state();
        if state == CaptureState::Idle {
            info!("not collecting");
            return Ok(EndOutcome::NotCollecting);
        }
        if !state.can_end() {
            return Err(SessionError::InvalidState {
                operation: "end capture",
                state,
            });
        }

        match self.stop_session(reason).await? {
            (_, Some(e)) => Err(e.into()),
            (summary, None) => Ok(EndOutcome::Ended(summary)),
        }
    }

    /// End any active session, then close the transport
    pub async fn disconnect(&mut self) -> Result<Option<CaptureSummary>, SessionError> {
        let ended = if self.machine.state().can_end() {
            self.end_capture_with(StopReason::Shutdown).await
        } else {
            Ok(EndOutcome::NotCollecting)
        };

        self.transport.close().await?;
        info!("disconnected");

        match ended? {
            EndOutcome::Ended(summary) => Ok(Some(summary)),
            EndOutcome::NotCollecting => Ok(None),
        }
    }

    /// Send `STOP`, drain replies and conclude. A transport failure does not
    /// keep the session alive; it is handed back next to the summary.
    async fn stop_session(
        &mut self,
        reason: StopReason,
    ) -> Result<(CaptureSummary, Option<TransportError>), SessionError> {
        self.machine
            .transition(CaptureState::Stopping, Some(&reason.to_string()))?;

        let mut transport_error = None;
        let mut responses = Vec::new();
        match self.send(&Command::Stop).await {
            Ok(()) => match self.drain().await {
                Ok(lines) => responses = lines,
                Err(e) => transport_error = Some(e),
            },
            Err(e) => transport_error = Some(e),
        }

        let device_samples = responses
            .iter()
            .map(|r| classify(r))
            .find(|line| line.kind == LineKind::SessionStop)
            .and_then(|line| line.reported_samples());

        let summary = self.conclude(reason, device_samples, responses)?;
        Ok((summary, transport_error))
    }

    /// Close the sink, drop the session and return to `Idle` (from `Stopping`)
    fn conclude(
        &mut self,
        reason: StopReason,
        device_samples: Option<u64>,
        responses: Vec<String>,
    ) -> Result<CaptureSummary, SessionError> {
        let Some(mut session) = self.session.take() else {
            return Err(SessionError::InvalidState {
                operation: "conclude capture",
                state: self.machine.state(),
            });
        };

        session.close_sink();
        let summary = session.summary(reason, device_samples, responses);
        self.machine
            .transition(CaptureState::Idle, Some(&reason.to_string()))?;

        info!(
            session = %summary.session_id,
            label = %summary.label,
            samples = summary.samples,
            device_samples = ?summary.device_samples,
            %reason,
            "capture ended"
        );
        Ok(summary)
    }

    /// Discard the session after a transport failure
    fn abandon(&mut self, error: TransportError) -> SessionError {
        if let Some(mut session) = self.session.take() {
            session.close_sink();
            warn!(
                session = %session.id,
                samples = session.sample_count,
                error = %error,
                "transport failed, session discarded"
            );
        }
        if self.machine.state() != CaptureState::Idle {
            if let Err(e) = self
                .machine
                .transition(CaptureState::Idle, Some("transport failure"))
            {
                return e.into();
            }
        }
        error.into()
    }

    fn pending_or_abandon(&mut self) -> Result<usize, SessionError> {
        self.transport.pending().map_err(|e| self.abandon(e))
    }

    async fn read_or_abandon(&mut self) -> Result<Option<String>, SessionError> {
        match self.transport.read_line(self.timing.read_timeout).await {
            Ok(line) => Ok(line),
            Err(e) => Err(self.abandon(e)),
        }
    }

    async fn send(&mut self, command: &Command) -> Result<(), TransportError> {
        debug!(%command, "sending");
        self.transport.write(&command.encode()).await
    }

    /// Wait for replies, then read what arrived. Reading stops after another
    /// `drain_wait` even if the device keeps talking.
    async fn drain(&mut self) -> Result<Vec<String>, TransportError> {
        tokio::time::sleep(self.timing.drain_wait).await;

        let read_until = Instant::now() + self.timing.drain_wait;
        let mut lines = Vec::new();
        while self.transport.pending()? > 0 {
            match self.transport.read_line(self.timing.read_timeout).await? {
                Some(line) => {
                    let line = line.trim().to_string();
                    debug!(response = %line, "device");
                    lines.push(line);
                }
                None => break,
            }
            if Instant::now() >= read_until {
                debug!(read = lines.len(), "drain window closed with input pending");
                break;
            }
        }
        Ok(lines)
    }

    fn require_state(&self, operation: &'static str, expected: CaptureState) -> Result<(), SessionError> {
        let state = self.machine.state();
        if state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState { operation, state })
        }
    }
}
