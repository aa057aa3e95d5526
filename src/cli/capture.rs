//! Capture driver
//!
//! Runs the cooperative capture loop on top of [`CaptureEngine::stream_step`],
//! checking between steps for Ctrl+C, typed operator commands and an optional
//! time limit. Used by the interactive shell and by the headless `capture`
//! subcommand.

use super::shell::OperatorCommand;
use super::stdin::{InputPoll, StdinLineReader};
use super::{CliResult, OutputFormat, ShellError};
use crate::core::session::{
    CaptureEngine, CaptureSummary, EndOutcome, SessionError, StepOutcome, StopReason,
    PROGRESS_INTERVAL,
};
use crate::core::transport::LineTransport;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Pause between steps when the device has nothing pending
pub const IDLE_DELAY: Duration = Duration::from_millis(1);

/// What may end a running capture besides the device
pub struct CaptureControl<'a> {
    interrupt: Arc<AtomicBool>,
    input: Option<&'a StdinLineReader>,
    deadline: Option<Instant>,
}

impl<'a> CaptureControl<'a> {
    /// Only Ctrl+C (and the device) can end the capture
    pub fn new(interrupt: Arc<AtomicBool>) -> Self {
        Self {
            interrupt,
            input: None,
            deadline: None,
        }
    }

    /// Also watch typed operator commands
    #[must_use]
    pub fn with_input(mut self, input: &'a StdinLineReader) -> Self {
        self.input = Some(input);
        self
    }

    /// Stop after `limit`
    #[must_use]
    pub fn with_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.deadline = limit.map(|d| Instant::now() + d);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt.swap(false, Ordering::SeqCst)
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// How a driven capture finished
#[derive(Debug)]
pub struct DriveResult {
    /// Session summary
    pub summary: CaptureSummary,
    /// Operator typed `quit` during the capture
    pub quit: bool,
}

/// Drive an active capture until it ends
pub async fn drive_capture<T, W>(
    engine: &mut CaptureEngine<T>,
    control: &CaptureControl<'_>,
    out: &mut W,
) -> Result<DriveResult, ShellError>
where
    T: LineTransport,
    W: Write,
{
    let mut quit = false;

    loop {
        if control.interrupted() {
            writeln!(out, "\nInterrupted by user")?;
            let summary = end(engine, StopReason::Cancelled).await?;
            return Ok(DriveResult { summary, quit });
        }

        if control.expired() {
            let summary = end(engine, StopReason::TimeLimit).await?;
            return Ok(DriveResult { summary, quit });
        }

        if let Some(input) = control.input {
            if let InputPoll::Line(line) = input.try_recv_line() {
                match OperatorCommand::parse(&line) {
                    OperatorCommand::Stop => {
                        let summary = end(engine, StopReason::Operator).await?;
                        return Ok(DriveResult { summary, quit });
                    }
                    OperatorCommand::Quit => {
                        quit = true;
                        let summary = end(engine, StopReason::Operator).await?;
                        return Ok(DriveResult { summary, quit });
                    }
                    OperatorCommand::Status => {
                        if let Some(session) = engine.session() {
                            writeln!(
                                out,
                                "\nCollecting '{}': {} samples",
                                session.label(),
                                session.sample_count()
                            )?;
                        }
                    }
                    OperatorCommand::Empty => {}
                    _ => writeln!(out, "\nCapture in progress. Type 'stop' to end it.")?,
                }
            }
        }

        match engine.stream_step().await? {
            StepOutcome::Idle => tokio::time::sleep(IDLE_DELAY).await,
            StepOutcome::Sample { count } => {
                if count % PROGRESS_INTERVAL == 0 {
                    write!(out, "\r  Collected {count} samples...")?;
                    out.flush()?;
                }
            }
            StepOutcome::Control(line) => writeln!(out, "\nDevice: {}", line.text)?,
            StepOutcome::SessionEnded(summary) => {
                for response in &summary.device_responses {
                    writeln!(out, "\nDevice: {response}")?;
                }
                return Ok(DriveResult { summary, quit });
            }
        }
    }
}

async fn end<T: LineTransport>(
    engine: &mut CaptureEngine<T>,
    reason: StopReason,
) -> Result<CaptureSummary, SessionError> {
    match engine.end_capture_with(reason).await? {
        EndOutcome::Ended(summary) => Ok(summary),
        EndOutcome::NotCollecting => Err(SessionError::InvalidState {
            operation: "end capture",
            state: engine.state(),
        }),
    }
}

/// Print a finished session for the operator
pub fn write_summary<W: Write>(out: &mut W, summary: &CaptureSummary) -> std::io::Result<()> {
    if summary.reason != StopReason::Device {
        for response in &summary.device_responses {
            writeln!(out, "Device: {response}")?;
        }
    }
    writeln!(out)?;
    writeln!(out, "Collection stopped: {}", summary.reason)?;
    writeln!(out, "Total samples collected: {}", summary.samples)?;
    if let Some(reported) = summary.device_samples.filter(|n| *n != summary.samples) {
        writeln!(out, "  device reported {reported} samples")?;
    }
    if let Some(destination) = &summary.destination {
        writeln!(out, "  saved to {destination}")?;
    }
    Ok(())
}

/// One-shot capture: connect, capture `label` until the device stops, the time
/// limit passes or Ctrl+C, then disconnect.
pub async fn run_capture<T, W>(
    engine: &mut CaptureEngine<T>,
    label: &str,
    limit: Option<Duration>,
    interrupt: Arc<AtomicBool>,
    format: OutputFormat,
    out: &mut W,
) -> Result<CliResult, ShellError>
where
    T: LineTransport,
    W: Write,
{
    let outcome = capture_once(engine, label, limit, interrupt, format, out).await;

    match engine.disconnect().await {
        Ok(Some(summary)) => warn!(samples = summary.samples, "capture was still active at disconnect"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "disconnect failed"),
    }

    match outcome {
        Ok(result) => Ok(result),
        Err(ShellError::Session(e)) => {
            if let SessionError::SinkWrite { summary, .. } = &e {
                report_summary(out, summary, format)?;
            }
            Ok(CliResult::from(&e))
        }
        Err(other) => Err(other),
    }
}

async fn capture_once<T, W>(
    engine: &mut CaptureEngine<T>,
    label: &str,
    limit: Option<Duration>,
    interrupt: Arc<AtomicBool>,
    format: OutputFormat,
    out: &mut W,
) -> Result<CliResult, ShellError>
where
    T: LineTransport,
    W: Write,
{
    let responses = engine.connect().await?;
    let text = format == OutputFormat::Text;
    if text {
        for response in &responses {
            writeln!(out, "Device: {response}")?;
        }
    }

    let started = engine.begin_capture(label).await?;
    info!(label = %started.label, destination = %started.destination, "headless capture running");
    if text {
        writeln!(out, "Started collecting '{}' data -> {}", started.label, started.destination)?;
    }

    // Progress output would corrupt a JSON document on stdout
    let mut progress = std::io::sink();
    let control = CaptureControl::new(interrupt).with_time_limit(limit);
    let result = if text {
        drive_capture(engine, &control, out).await?
    } else {
        drive_capture(engine, &control, &mut progress).await?
    };

    report_summary(out, &result.summary, format)?;
    Ok(match result.summary.reason {
        StopReason::Cancelled => CliResult::cancelled("capture interrupted"),
        _ => CliResult::success(),
    })
}

fn report_summary<W: Write>(
    out: &mut W,
    summary: &CaptureSummary,
    format: OutputFormat,
) -> Result<(), ShellError> {
    match format {
        OutputFormat::Text => write_summary(out, summary)?,
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(summary)?)?,
    }
    Ok(())
}
