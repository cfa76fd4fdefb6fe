//! System module: toolchain subprocess execution and output streaming.
//!
//! Every external tool invocation in the engine goes through here so that
//! spawning, line decoding and termination behave the same everywhere.

pub mod paths;
pub mod process;

pub use paths::{absolute_path, file_url};
pub use process::{
    describe_command, run_command, run_command_raw, spawn_line_readers, terminate_child,
    CommandOutput, StreamLine, StreamSource, LINE_QUEUE_CAPACITY,
};
