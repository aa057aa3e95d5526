//! Simulated data logger
//!
//! Emulates the logger firmware closely enough to exercise the whole capture
//! flow without hardware: a `READY` banner when the port opens, replies to
//! `STATUS`, `START:<label>` and `STOP`, and a stream of IMU rows at the
//! configured sample rate while a session is active.

use super::protocol::{
    CONTROL_PREFIX, HEADER_FIELD, SAMPLES_KEY, SESSION_START_TOKEN, SESSION_STOP_TOKEN,
};
use super::transport::{LineTransport, TransportError, TransportStats, TransportType};
use crate::core::codec::decode_lossy;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Columns emitted by the firmware after `timestamp_ms`
pub const SENSOR_COLUMNS: [&str; 9] = ["ax", "ay", "az", "gx", "gy", "gz", "pitch", "roll", "label"];

/// Rows generated per poll at most, so a stalled reader can't flood memory
const MAX_CATCH_UP: u64 = 500;

/// Simulator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Interval between rows (firmware: 20 ms, 50 Hz)
    #[serde(with = "crate::core::session::millis")]
    pub sample_interval: Duration,
    /// Device ends the session by itself after this many rows
    pub auto_stop_after: Option<u64>,
    /// Amplitude of the accelerometer noise (g)
    pub noise: f64,
    /// Fixed RNG seed for reproducible streams
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(20),
            auto_stop_after: None,
            noise: 0.05,
            seed: None,
        }
    }
}

#[derive(Debug)]
struct Recording {
    label: String,
    started: Instant,
    next_due: Duration,
    samples: u64,
}

/// In-process stand-in for the data logger
#[derive(Debug)]
pub struct SimulatedLogger {
    config: SimulatorConfig,
    open: bool,
    outbound: VecDeque<String>,
    recording: Option<Recording>,
    rng: StdRng,
    stats: TransportStats,
    connected_at: Option<Instant>,
}

impl Default for SimulatedLogger {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl SimulatedLogger {
    /// Create a simulator (the "port" opens with [`LineTransport::open`])
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            open: false,
            outbound: VecDeque::new(),
            recording: None,
            rng,
            stats: TransportStats::default(),
            connected_at: None,
        }
    }

    /// Settings in use
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Whether the simulated firmware is streaming
    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    fn reply(&mut self, line: String) {
        trace!(%line, "simulator reply");
        self.outbound.push_back(line);
    }

    fn handle_command(&mut self, text: &str) {
        match text {
            "STATUS" => {
                let status = match &self.recording {
                    Some(rec) => format!(
                        "{CONTROL_PREFIX}STATUS:COLLECTING:{}:{SAMPLES_KEY}{}",
                        rec.label, rec.samples
                    ),
                    None => format!("{CONTROL_PREFIX}READY"),
                };
                self.reply(status);
            }
            "STOP" => match self.recording.take() {
                Some(rec) => self.reply(format!("{SESSION_STOP_TOKEN}:{SAMPLES_KEY}{}", rec.samples)),
                None => self.reply(format!("{CONTROL_PREFIX}ERROR:Not collecting")),
            },
            _ => match text.strip_prefix("START:") {
                Some(_) if self.recording.is_some() => {
                    self.reply(format!("{CONTROL_PREFIX}ERROR:Already collecting"));
                }
                Some(label) => {
                    debug!(label, "simulated session started");
                    self.reply(format!("{SESSION_START_TOKEN}:{label}"));
                    self.reply(format!("{HEADER_FIELD},{}", SENSOR_COLUMNS.join(",")));
                    self.recording = Some(Recording {
                        label: label.to_string(),
                        started: Instant::now(),
                        next_due: Duration::ZERO,
                        samples: 0,
                    });
                }
                None => self.reply(format!("{CONTROL_PREFIX}ERROR:Unknown command")),
            },
        }
    }

    /// Emit every row that has come due since the last poll
    fn generate(&mut self) {
        let interval = self.config.sample_interval;
        let noise = self.config.noise;
        let auto_stop = self.config.auto_stop_after;

        let Some(rec) = self.recording.as_mut() else {
            return;
        };
        let elapsed = rec.started.elapsed();

        let mut emitted = 0;
        while rec.next_due <= elapsed && emitted < MAX_CATCH_UP {
            if auto_stop.is_some_and(|limit| rec.samples >= limit) {
                break;
            }
            let row = sensor_row(&mut self.rng, noise, rec.next_due, &rec.label);
            self.outbound.push_back(row);
            rec.samples += 1;
            rec.next_due += interval.max(Duration::from_micros(1));
            emitted += 1;
        }

        if auto_stop.is_some_and(|limit| rec.samples >= limit) {
            let samples = rec.samples;
            self.recording = None;
            debug!(samples, "simulated session reached its sample limit");
            self.outbound
                .push_back(format!("{SESSION_STOP_TOKEN}:{SAMPLES_KEY}{samples}"));
        }
    }

    fn time_to_next_row(&self) -> Option<Duration> {
        self.recording
            .as_ref()
            .map(|rec| rec.next_due.saturating_sub(rec.started.elapsed()))
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

/// One firmware-style CSV row: a device at rest with a little noise
fn sensor_row(rng: &mut StdRng, noise: f64, at: Duration, label: &str) -> String {
    let mut jitter = |scale: f64| {
        if noise > 0.0 {
            rng.gen_range(-noise..noise) * scale
        } else {
            0.0
        }
    };

    let (ax, ay, az) = (jitter(1.0), jitter(1.0), 1.0 + jitter(1.0));
    let (gx, gy, gz) = (jitter(20.0), jitter(20.0), jitter(20.0));
    let pitch = ax.atan2((ay * ay + az * az).sqrt()).to_degrees();
    let roll = ay.atan2(az).to_degrees();

    format!(
        "{},{ax:.4},{ay:.4},{az:.4},{gx:.4},{gy:.4},{gz:.4},{pitch:.2},{roll:.2},{label}",
        at.as_millis()
    )
}

#[async_trait]
impl LineTransport for SimulatedLogger {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.open = true;
        self.recording = None;
        self.outbound.clear();
        self.stats = TransportStats::default();
        self.connected_at = Some(Instant::now());
        // Boards reset when the port opens and print their banner
        self.reply(format!("{CONTROL_PREFIX}READY"));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        self.connected_at = None;
        self.outbound.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn clear_input(&mut self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.generate();
        self.outbound.clear();
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.generate();

        let text = decode_lossy(data);
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            self.handle_command(line);
        }

        self.stats.bytes_sent += data.len() as u64;
        self.stats.commands_sent += 1;
        Ok(())
    }

    fn pending(&mut self) -> Result<usize, TransportError> {
        self.ensure_open()?;
        self.generate();
        Ok(self.outbound.iter().map(|line| line.len() + 1).sum())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            self.ensure_open()?;
            self.generate();

            if let Some(line) = self.outbound.pop_front() {
                self.stats.bytes_received += line.len() as u64 + 1;
                self.stats.lines_received += 1;
                return Ok(Some(line));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = self
                .time_to_next_row()
                .unwrap_or(deadline - now)
                .min(deadline - now);
            tokio::time::sleep(wait.max(Duration::from_micros(100))).await;
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Simulated
    }

    fn connection_info(&self) -> String {
        format!(
            "simulated logger ({} Hz)",
            1000 / self.config.sample_interval.as_millis().max(1)
        )
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.clone();
        if let Some(connected_at) = self.connected_at {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}
