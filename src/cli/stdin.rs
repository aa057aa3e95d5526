//! Non-blocking operator input
//!
//! Reads lines on a background thread and hands them over a channel, so the
//! capture loop can check for typed commands without ever blocking on stdin.

use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

/// Result of polling for a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputPoll {
    /// A complete line (terminator stripped)
    Line(String),
    /// Nothing yet
    Empty,
    /// Input reached EOF or failed
    Closed,
}

/// Line-based reader fed by a background thread
pub struct StdinLineReader {
    receiver: Receiver<String>,
    _thread: thread::JoinHandle<()>,
}

impl StdinLineReader {
    /// Read lines from the process stdin
    pub fn new() -> Self {
        Self::spawn(|| io::stdin().lock())
    }

    /// Read lines from any buffered source (tests, scripted input)
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        Self::spawn(move || reader)
    }

    fn spawn<F, R>(open: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: BufRead,
    {
        let (sender, receiver) = mpsc::channel();

        let thread = thread::spawn(move || {
            Self::reader_thread(open(), sender);
        });

        Self {
            receiver,
            _thread: thread,
        }
    }

    fn reader_thread<R: BufRead>(reader: R, sender: Sender<String>) {
        for line in reader.lines() {
            match line {
                Ok(l) => {
                    if sender.send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    }

    /// Wait up to `timeout` for a line
    pub fn recv_line_timeout(&self, timeout: Duration) -> InputPoll {
        match self.receiver.recv_timeout(timeout) {
            Ok(line) => InputPoll::Line(line),
            Err(RecvTimeoutError::Timeout) => InputPoll::Empty,
            Err(RecvTimeoutError::Disconnected) => InputPoll::Closed,
        }
    }

    /// Take a line if one is ready
    pub fn try_recv_line(&self) -> InputPoll {
        match self.receiver.try_recv() {
            Ok(line) => InputPoll::Line(line),
            Err(TryRecvError::Empty) => InputPoll::Empty,
            Err(TryRecvError::Disconnected) => InputPoll::Closed,
        }
    }
}

impl Default for StdinLineReader {
    fn default() -> Self {
        Self::new()
    }
}
