//! # ntposix-core
//!
//! POSIX file descriptors over NT kernel objects.
//!
//! Each open file description is a handle object ([`fhandler::Fhandler`])
//! for one device class: pipes and FIFOs, tapes and disks, memory, the
//! console, the window message queue, socket pairs, and the virtual
//! `/proc/registry`, `/proc/sys` and `/proc/self` trees. The descriptor
//! table maps small integers to handles and takes part in fork and exec;
//! [`context::ProcessContext`] is the call surface on top.
//!
//! No `unsafe` code is permitted at the crate level.

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod device;
pub mod dtable;
pub mod env;
pub mod errmap;
pub mod errno;
pub mod fhandler;
pub mod flags;
pub mod ioctl;
pub mod poll;
pub mod security;
pub mod signal;
pub mod termios;
pub mod testing;

pub use context::ProcessContext;
pub use errno::Errno;
