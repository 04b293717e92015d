//! # scriptproxy runtime
//!
//! Process lifecycle helpers shared by the scripting core and the CLI:
//! a cloneable shutdown broadcast and an OS signal handler that fires it.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod shutdown;

pub use shutdown::{ShutdownListener, ShutdownSignal, SignalHandler};
