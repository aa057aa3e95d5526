//! Scripted in-memory transport
//!
//! Plays back queued lines and canned replies to specific commands. Used by
//! tests and dry runs where no device is attached.

use super::{LineTransport, TransportError, TransportStats, TransportType};
use crate::core::codec::decode_lossy;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct ScriptState {
    inbound: VecDeque<String>,
    replies: HashMap<String, Vec<String>>,
    written: Vec<String>,
    open: bool,
    opens: usize,
    closes: usize,
    fail_open: bool,
    fail_next_read: bool,
    fail_next_write: bool,
    stats: TransportStats,
}

/// In-memory transport driven by a script
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

/// Shared handle used to drive and inspect a [`ScriptedTransport`] after it
/// has been handed to an engine
#[derive(Debug, Clone)]
pub struct ScriptedHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// Create an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a handle sharing this transport's state
    pub fn handle(&self) -> ScriptedHandle {
        ScriptedHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl ScriptedHandle {
    /// Queue a line as if the device had just sent it
    pub fn push_line(&self, line: impl Into<String>) {
        self.state.lock().inbound.push_back(line.into());
    }

    /// Queue several lines
    pub fn push_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        state.inbound.extend(lines.into_iter().map(Into::into));
    }

    /// Queue `lines` every time `command` (without terminator) is written
    pub fn on_command<I, S>(&self, command: &str, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().replies.insert(
            command.to_string(),
            lines.into_iter().map(Into::into).collect(),
        );
    }

    /// Commands written so far, terminators stripped
    pub fn written(&self) -> Vec<String> {
        self.state.lock().written.clone()
    }

    /// Lines still waiting to be read
    pub fn queued(&self) -> usize {
        self.state.lock().inbound.len()
    }

    /// Whether the transport is currently open
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Number of successful opens
    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    /// Number of closes of an open channel
    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    /// Make the next `open` fail
    pub fn fail_open(&self) {
        self.state.lock().fail_open = true;
    }

    /// Make the next `read_line` fail as if the cable was pulled
    pub fn fail_next_read(&self) {
        self.state.lock().fail_next_read = true;
    }

    /// Make the next `write` fail
    pub fn fail_next_write(&self) {
        self.state.lock().fail_next_write = true;
    }
}

#[async_trait]
impl LineTransport for ScriptedTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_open {
            state.fail_open = false;
            return Err(TransportError::PortNotFound("scripted".to_string()));
        }
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    async fn clear_input(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        state.inbound.clear();
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(TransportError::Disconnected);
        }

        let command = decode_lossy(data).trim_end().to_string();
        if let Some(reply) = state.replies.get(&command).cloned() {
            state.inbound.extend(reply);
        }
        state.stats.bytes_sent += data.len() as u64;
        state.stats.commands_sent += 1;
        state.written.push(command);
        Ok(())
    }

    fn pending(&mut self) -> Result<usize, TransportError> {
        let state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        Ok(state.inbound.iter().map(|line| line.len() + 1).sum())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        {
            let mut state = self.state.lock();
            if !state.open {
                return Err(TransportError::NotConnected);
            }
            if state.fail_next_read {
                state.fail_next_read = false;
                return Err(TransportError::Disconnected);
            }
            if let Some(line) = state.inbound.pop_front() {
                state.stats.bytes_received += line.len() as u64 + 1;
                state.stats.lines_received += 1;
                return Ok(Some(line));
            }
        }

        tokio::time::sleep(timeout).await;
        Ok(None)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Scripted
    }

    fn connection_info(&self) -> String {
        "scripted".to_string()
    }

    fn stats(&self) -> TransportStats {
        self.state.lock().stats.clone()
    }
}
