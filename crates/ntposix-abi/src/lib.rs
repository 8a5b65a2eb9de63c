//! # ntposix-abi
//!
//! extern "C" boundary for the ntposix descriptor layer.
//!
//! Every symbol carries an `ntp_` prefix so the library can be linked next
//! to the host libc without shadowing it. Calls run against one process
//! context per loaded library, created on first use over the simulated
//! kernel and configured from the environment (see
//! [`ntposix_core::config`]).
//!
//! ```text
//! C caller -> ntp_* entry (this crate) -> pointer checks -> ProcessContext -> return
//! ```
//!
//! Failures return `-1` and leave the error number in the thread-local
//! errno, readable through [`errno_abi::ntp_errno`].

pub mod errno_abi;
pub mod io_abi;
pub mod poll_abi;
pub mod runtime;
pub mod signal_abi;
pub mod socket_abi;
pub mod termios_abi;
pub mod unistd_abi;
mod util;
