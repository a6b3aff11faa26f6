//! Crash event record.
//!
//! A [`CrashEvent`] is filled by whichever monitor caught the failure,
//! annotated by every enabled monitor, and handed to the event callback.
//! It borrows the machine context and stack cursor from the stack frame of
//! the capturing code, so it never outlives the capture.

use std::fmt;

use uuid::Uuid;

use crate::context::MachineContext;
use crate::types::Address;
use crate::unwind::StackCursor;

/// Length of a hyphenated UUID
pub const EVENT_ID_LENGTH: usize = 36;

/// Unique identifier of one event, as hyphenated lowercase UUID text
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId([u8; EVENT_ID_LENGTH]);

impl EventId
{
    /// Fresh random identifier
    ///
    /// Reads the OS random source, so it must not be called from a signal
    /// handler. The signal monitor generates its identifier when enabled.
    #[must_use]
    pub fn generate() -> Self
    {
        Self::from_uuid(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self
    {
        let mut text = [0u8; EVENT_ID_LENGTH];
        uuid.hyphenated().encode_lower(&mut text);
        Self(text)
    }

    pub fn as_str(&self) -> &str
    {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for EventId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for EventId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "EventId({})", self.as_str())
    }
}

/// Signal number and code of a fault
///
/// Zero for events that did not come from a signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalInfo
{
    pub signum: i32,
    pub code: i32,
}

/// Details of an exception reported by the application itself
#[derive(Debug, Clone, Copy, Default)]
pub struct UserException<'a>
{
    pub name: &'a str,
    pub language: Option<&'a str>,
    pub line_of_code: Option<&'a str>,
    /// Backtrace in the reporting language, one frame per entry
    pub custom_stack_trace: &'a [&'a str],
}

/// The record built while capturing one failure
#[derive(Debug)]
pub struct CrashEvent<'a>
{
    pub event_id: EventId,
    /// Id of the monitor that produced the event
    pub monitor_id: &'static str,
    pub signal: SignalInfo,
    pub fault_address: Address,
    /// Whether the machine context registers describe the fault
    pub registers_are_valid: bool,
    pub crash_reason: Option<&'a str>,
    pub user_exception: Option<UserException<'a>>,
    pub is_user_reported: bool,
    /// Every monitor is disabled once the event is delivered
    ///
    /// Cleared for user reports and for panics that unwind, after which the
    /// process may keep running.
    pub is_fatal: bool,
    /// Set when this failure happened while another one was being handled
    pub crashed_during_crash_handling: bool,
    pub machine_context: &'a MachineContext,
    pub stack_cursor: &'a mut StackCursor,
}

impl<'a> CrashEvent<'a>
{
    pub fn new(
        monitor_id: &'static str,
        event_id: EventId,
        machine_context: &'a MachineContext,
        stack_cursor: &'a mut StackCursor,
    ) -> Self
    {
        Self {
            event_id,
            monitor_id,
            signal: SignalInfo::default(),
            fault_address: Address::ZERO,
            registers_are_valid: false,
            crash_reason: None,
            user_exception: None,
            is_user_reported: false,
            is_fatal: true,
            crashed_during_crash_handling: false,
            machine_context,
            stack_cursor,
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_event_id_text()
    {
        let uuid = Uuid::from_u64_pair(0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210);
        let id = EventId::from_uuid(uuid);
        assert_eq!(id.as_str(), "01234567-89ab-cdef-fedc-ba9876543210");
        assert_eq!(id.to_string().len(), EVENT_ID_LENGTH);
    }

    #[test]
    fn test_generated_ids_differ()
    {
        assert_ne!(EventId::generate(), EventId::generate());
    }
}
