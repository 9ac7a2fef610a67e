//! Control command handlers
//!
//! Transport-agnostic commands for driving the recorder. The binary feeds
//! them from stdin, one JSON object per line.

pub mod control;

pub use control::{dispatch, CommandResponse, ControlCommand};
