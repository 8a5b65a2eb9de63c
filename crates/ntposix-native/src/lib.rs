//! Native kernel-object substrate for ntposix.
//!
//! Everything the descriptor layer talks to lives here: per-process handle
//! tables, waitable synchronization objects, named pipes, tape and disk
//! drivers, serial ports, pseudo-terminals, physical memory sections, the
//! registry hive, the object-manager namespace, the console device and
//! window message queues. Each primitive
//! ships with an in-process implementation so the layer above runs on any
//! host; the result codes follow the Win32 and NTSTATUS numbering.

#![deny(unsafe_code)]

pub mod console;
pub mod disk;
pub mod fault;
pub mod kernel;
pub mod msgqueue;
pub mod namespace;
pub mod object;
pub mod pipe;
pub mod process;
pub mod pty;
pub mod registry;
pub mod section;
pub mod serial;
pub mod status;
pub mod sync;
pub mod tape;

pub use kernel::{Kernel, KernelBuilder};
pub use object::{KernelObject, ObjectBody, ObjectKind};
pub use process::{OwnedHandle, Process, RawHandle};
pub use status::{NtStatus, Partial, WinError};
