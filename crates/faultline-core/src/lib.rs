//! # faultline-core
//!
//! In-process crash capture: detect a fatal failure, freeze the process,
//! record what the machine looked like, and hand a structured event to
//! whoever persists it. Then let the process die the way it was going to.
//!
//! This crate provides:
//! - [`monitors`]: signal, panic and user-report monitors and the event pipeline
//! - [`context`]: register and thread-list capture, suspending the process
//! - [`unwind`]: the depth-bounded stack cursor
//! - [`images`]: loaded Mach-O images, address to symbol resolution
//! - [`io`]: allocation-free descriptor I/O and file utilities
//! - [`log`]: logging that works inside a signal handler
//!
//! ## Platform Support
//!
//! - **macOS**: Mach APIs (`task_threads`, `thread_suspend`, `thread_get_state`)
//!   and dyld for the image list
//! - **Linux / Android**: `/proc/self/task`, `process_vm_readv(2)`; threads
//!   cannot be suspended and there is no Mach-O image list
//!
//! ## Fault-path rules
//!
//! Code reachable from a signal handler does not allocate, lock, or log
//! through `tracing`. Buffers are sized up front or live on the stack,
//! shared state is atomics, and diagnostics go through [`safe_log!`].
//!
//! ## Why unsafe code is needed
//!
//! Installing signal handlers, reading registers out of a `ucontext_t`,
//! suspending threads through Mach and probing arbitrary memory are all
//! system calls with no safe wrapper. The unsafe calls are wrapped in safe
//! functions that validate their inputs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use faultline_core::prelude::*;
//!
//! fn on_event(event: &mut CrashEvent<'_>)
//! {
//!     let _ = (event.monitor_id, event.signal.signum);
//! }
//!
//! let config = CaptureConfig::from_env().unwrap_or_default().on_event(on_event);
//! install(&config).expect("capture setup");
//! ```

#![allow(unsafe_code)] // Required for signal handlers, Mach and raw memory access

pub mod config;
pub mod context;
pub mod error;
pub mod images;
pub mod io;
pub mod log;
pub mod memory;
pub mod monitors;
pub mod platform;
pub mod prelude;
pub mod types;
pub mod unwind;

pub use error::{FaultlineError, Result};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("faultline-core supports x86_64 and aarch64");
