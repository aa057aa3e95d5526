//! Core module containing the capture machinery
//!
//! This module provides:
//! - Wire protocol (commands, markers, line classification)
//! - Line framing of the inbound byte stream
//! - Transport layer (serial, scripted, simulated)
//! - Capture state machine and session engine
//! - Capture sinks (CSV files, memory)
//! - Simulated data logger

pub mod codec;
pub mod logger;
pub mod protocol;
pub mod session;
pub mod simulator;
pub mod state_machine;
pub mod transport;
