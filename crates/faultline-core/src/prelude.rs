//! Common module for library exports

pub use crate::config::{install, CaptureConfig};
pub use crate::context::{MachineContext, RegisterState};
pub use crate::error::{FaultlineError, Result};
pub use crate::images::{BinaryImage, ImageTable, SymbolInfo};
pub use crate::monitors::{report_user_exception, CrashEvent, Monitor, MonitorFlags, MonitorSet, UserReport};
pub use crate::types::{Address, ThreadId};
pub use crate::unwind::StackCursor;
