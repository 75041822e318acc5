//! ffrun - run commands against a bundled ffmpeg binary
//!
//! `BinaryLoader` installs the ffmpeg executable for the host architecture
//! once; `CommandRunner` launches one command at a time and streams its
//! lifecycle to a `ResponseHandler` or as `RunEvent`s.

pub mod cli;
pub mod command;
pub mod config;
pub mod console;
pub mod error;
pub mod event;
pub mod loader;
pub mod runner;
pub mod session;

pub use command::Command;
pub use error::{FfrunError, Result};
pub use event::{ResponseHandler, RunEvent, RunEvents, RunOutcome};
pub use loader::{BinaryLoader, LoadState, Loaded};
pub use runner::CommandRunner;
pub use session::Session;
