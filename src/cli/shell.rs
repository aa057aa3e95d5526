//! Interactive operator shell
//!
//! Prompt loop around a [`CaptureEngine`]: `collect <label>`, `stop`,
//! `status`, `help` and `quit`. Input is lowercased before parsing. Every
//! exit path disconnects, which ends an active capture first.

use super::capture::{drive_capture, write_summary, CaptureControl, DriveResult};
use super::stdin::{InputPoll, StdinLineReader};
use super::{CliResult, ShellError};
use crate::core::session::{CaptureEngine, EndOutcome, SessionError};
use crate::core::transport::LineTransport;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// How often the prompt checks for Ctrl+C while waiting for input
pub const PROMPT_POLL: Duration = Duration::from_millis(50);

/// Parsed operator input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// `collect <label>`
    Collect(String),
    /// `collect` without a label
    MissingLabel,
    /// `stop`
    Stop,
    /// `status`
    Status,
    /// `help` or `?`
    Help,
    /// `quit` or `exit`
    Quit,
    /// Blank line
    Empty,
    /// Anything else
    Unknown(String),
}

impl OperatorCommand {
    /// Parse one line of operator input (case-insensitive; labels are lowercased too)
    pub fn parse(input: &str) -> Self {
        let cmd = input.trim().to_lowercase();

        match cmd.as_str() {
            "" => Self::Empty,
            "quit" | "exit" => Self::Quit,
            "stop" => Self::Stop,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "collect" => Self::MissingLabel,
            _ => match cmd.strip_prefix("collect ").map(str::trim) {
                Some("") => Self::MissingLabel,
                Some(label) => Self::Collect(label.to_string()),
                None => Self::Unknown(cmd),
            },
        }
    }
}

/// Help text shown on start and for `help`
pub const HELP: &str = "\
Commands:
  collect <label>  - Start collecting data (e.g. 'collect normal')
  stop             - Stop the current collection
  status           - Check device status
  help             - Show this list
  quit             - Exit";

/// Interactive shell
pub struct Shell<T: LineTransport, W: Write> {
    engine: CaptureEngine<T>,
    input: StdinLineReader,
    out: W,
    interrupt: Arc<AtomicBool>,
}

impl<T: LineTransport, W: Write> Shell<T, W> {
    /// Create a shell. `interrupt` is raised by the Ctrl+C handler.
    pub fn new(
        engine: CaptureEngine<T>,
        input: StdinLineReader,
        out: W,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            engine,
            input,
            out,
            interrupt,
        }
    }

    /// Engine, for inspection once the shell has finished
    pub fn engine(&self) -> &CaptureEngine<T> {
        &self.engine
    }

    /// Connect, run the prompt until `quit`, EOF or Ctrl+C, then disconnect
    pub async fn run(&mut self) -> Result<CliResult, ShellError> {
        let result = self.session_loop().await;

        match self.engine.disconnect().await {
            Ok(Some(summary)) => write_summary(&mut self.out, &summary)?,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "disconnect failed"),
        }
        writeln!(self.out, "\nData collection session ended")?;

        match result {
            Ok(()) => Ok(CliResult::success()),
            Err(ShellError::Session(e)) => Ok(CliResult::from(&e)),
            Err(other) => Err(other),
        }
    }

    async fn session_loop(&mut self) -> Result<(), ShellError> {
        let responses = self.engine.connect().await?;
        writeln!(
            self.out,
            "Connected to {}",
            self.engine.transport().connection_info()
        )?;
        for response in responses {
            writeln!(self.out, "Device: {response}")?;
        }
        writeln!(self.out, "\n{HELP}")?;

        loop {
            write!(self.out, "\n> ")?;
            self.out.flush()?;

            let Some(line) = self.next_line().await? else {
                return Ok(());
            };

            match OperatorCommand::parse(&line) {
                OperatorCommand::Quit => return Ok(()),
                OperatorCommand::Empty => {}
                OperatorCommand::Help => writeln!(self.out, "{HELP}")?,
                OperatorCommand::MissingLabel => writeln!(self.out, "Usage: collect <label>")?,
                OperatorCommand::Unknown(cmd) => writeln!(
                    self.out,
                    "Unknown command '{cmd}'. Type 'help' for commands or 'quit' to exit."
                )?,
                OperatorCommand::Status => match self.engine.probe_status().await {
                    Ok(responses) => {
                        for response in responses {
                            writeln!(self.out, "Device: {response}")?;
                        }
                    }
                    Err(e) => self.report(e)?,
                },
                OperatorCommand::Stop => match self.engine.end_capture().await {
                    Ok(EndOutcome::NotCollecting) => writeln!(self.out, "Not currently collecting")?,
                    Ok(EndOutcome::Ended(summary)) => write_summary(&mut self.out, &summary)?,
                    Err(e) => self.report(e)?,
                },
                OperatorCommand::Collect(label) => {
                    if self.collect(&label).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run one capture. Returns `true` if the operator asked to quit meanwhile.
    async fn collect(&mut self, label: &str) -> Result<bool, ShellError> {
        let started = match self.engine.begin_capture(label).await {
            Ok(started) => started,
            Err(e) => {
                writeln!(self.out, "Failed to start collection")?;
                self.report(e)?;
                return Ok(false);
            }
        };

        writeln!(
            self.out,
            "Started collecting '{}' data -> {}",
            started.label, started.destination
        )?;
        writeln!(self.out, "  Type 'stop' or press Ctrl+C to end the collection")?;

        let driven = {
            let control = CaptureControl::new(Arc::clone(&self.interrupt)).with_input(&self.input);
            drive_capture(&mut self.engine, &control, &mut self.out).await
        };
        match driven {
            Ok(DriveResult { summary, quit }) => {
                write_summary(&mut self.out, &summary)?;
                Ok(quit)
            }
            Err(ShellError::Session(e)) => {
                if let SessionError::SinkWrite { summary, .. } = &e {
                    write_summary(&mut self.out, summary)?;
                }
                self.report(e)?;
                Ok(false)
            }
            Err(other) => Err(other),
        }
    }

    /// Show an engine error. Transport failures end the shell.
    fn report(&mut self, err: SessionError) -> Result<(), ShellError> {
        writeln!(self.out, "Error: {err}")?;
        match err {
            SessionError::Transport(_) => Err(err.into()),
            _ => Ok(()),
        }
    }

    /// Wait for a line. `None` on EOF or Ctrl+C.
    async fn next_line(&mut self) -> Result<Option<String>, ShellError> {
        loop {
            if self.interrupt.swap(false, Ordering::SeqCst) {
                writeln!(self.out, "\nExiting...")?;
                return Ok(None);
            }

            match self.input.try_recv_line() {
                InputPoll::Line(line) => return Ok(Some(line)),
                InputPoll::Closed => return Ok(None),
                InputPoll::Empty => tokio::time::sleep(PROMPT_POLL).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logger::MemorySink;
    use crate::core::session::CaptureTiming;
    use crate::core::state_machine::CaptureState;
    use crate::core::transport::{ScriptedHandle, ScriptedTransport};
    use std::io::Cursor;

    #[test]
    fn test_parse() {
        assert_eq!(OperatorCommand::parse("  Collect Normal "), OperatorCommand::Collect("normal".into()));
        assert_eq!(OperatorCommand::parse("collect"), OperatorCommand::MissingLabel);
        assert_eq!(OperatorCommand::parse("collect   "), OperatorCommand::MissingLabel);
        assert_eq!(OperatorCommand::parse("STOP"), OperatorCommand::Stop);
        assert_eq!(OperatorCommand::parse("exit"), OperatorCommand::Quit);
        assert_eq!(OperatorCommand::parse(""), OperatorCommand::Empty);
        assert_eq!(OperatorCommand::parse("?"), OperatorCommand::Help);
        assert_eq!(OperatorCommand::parse("Launch"), OperatorCommand::Unknown("launch".into()));
        assert_eq!(OperatorCommand::parse("collection"), OperatorCommand::Unknown("collection".into()));
    }

    fn shell(script: &str) -> (Shell<ScriptedTransport, Vec<u8>>, ScriptedHandle, MemorySink) {
        let transport = ScriptedTransport::new();
        let handle = transport.handle();
        handle.on_command("STATUS", ["DATA_LOGGER:READY"]);
        handle.on_command("START:normal", ["DATA_LOGGER:START:normal", "timestamp_ms,ax"]);
        handle.on_command("STOP", ["DATA_LOGGER:STOP:Samples=0"]);

        let sink = MemorySink::new();
        let timing = CaptureTiming {
            settle: Duration::ZERO,
            drain_wait: Duration::from_millis(1),
            handshake_attempts: 3,
            handshake_interval: Duration::from_millis(1),
            read_timeout: Duration::from_millis(1),
        };
        let engine = CaptureEngine::with_timing(transport, Box::new(sink.clone()), timing);
        let input = StdinLineReader::from_reader(Cursor::new(script.to_string()));
        let shell = Shell::new(engine, input, Vec::new(), Arc::new(AtomicBool::new(false)));
        (shell, handle, sink)
    }

    async fn run(shell: &mut Shell<ScriptedTransport, Vec<u8>>) -> CliResult {
        tokio::time::timeout(Duration::from_secs(5), shell.run())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_and_quit() {
        let (mut shell, handle, _) = shell("status\nbogus\nquit\n");
        let result = run(&mut shell).await;

        assert!(result.is_success());
        assert_eq!(handle.written(), vec!["STATUS", "STATUS"]);
        assert_eq!(handle.closes(), 1);

        let out = String::from_utf8(shell.out.clone()).unwrap();
        assert!(out.contains("Device: DATA_LOGGER:READY"));
        assert!(out.contains("Unknown command 'bogus'"));
        assert!(out.contains("Data collection session ended"));
    }

    #[tokio::test]
    async fn test_stop_without_capture() {
        let (mut shell, handle, _) = shell("stop\n");
        run(&mut shell).await;

        let out = String::from_utf8(shell.out.clone()).unwrap();
        assert!(out.contains("Not currently collecting"));
        assert!(!handle.written().contains(&"STOP".to_string()));
    }

    #[tokio::test]
    async fn test_collect_then_stop() {
        let (mut shell, handle, sink) = shell("Collect Normal\nstop\nquit\n");
        run(&mut shell).await;

        assert_eq!(handle.written(), vec!["STATUS", "START:normal", "STOP"]);
        let captures = sink.captures();
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].label, "normal");
        assert!(captures[0].closed);
        assert_eq!(shell.engine().state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_eof_during_capture_still_disconnects() {
        let (mut shell, handle, sink) = shell("collect normal\n");

        // EOF leaves the capture running; Ctrl+C is the way out
        let interrupt = Arc::clone(&shell.interrupt);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            interrupt.store(true, Ordering::SeqCst);
        });
        run(&mut shell).await;

        assert_eq!(handle.written().last().map(String::as_str), Some("STOP"));
        assert!(sink.captures()[0].closed);
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn test_connect_failure_exit_code() {
        let (mut shell, handle, _) = shell("quit\n");
        handle.fail_open();

        let result = run(&mut shell).await;
        assert_eq!(result.code(), crate::cli::ExitCodes::PORT_NOT_FOUND);
    }
}
