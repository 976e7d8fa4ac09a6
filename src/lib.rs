//! Remote shell core for CircuitPython boards.
//!
//! Talks to a board over its USB serial console, drives the interpreter's
//! raw REPL as a remote-execution channel, and builds shell-style file
//! operations (ls, cat, cp, rm, mkdir, rsync) on top of it. Remote paths are
//! marked with a leading `:`.

pub mod cli;
pub mod config;
pub mod error;
pub mod link;
pub mod locale;
pub mod ops;
pub mod path;
pub mod remote;
pub mod repl;
pub mod session;
pub mod sync;
pub mod transport;
pub mod vfs;

pub use error::{Error, Result};
