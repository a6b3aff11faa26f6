//! Tests for error handling

use faultline_core::error::{Errno, FaultlineError, Result};
#[cfg(target_os = "macos")]
use faultline_core::platform::macos::error::MachError;

#[cfg(target_os = "macos")]
#[test]
fn test_mach_error_from_kern_return()
{
    use mach2::kern_return::{KERN_INVALID_ARGUMENT, KERN_PROTECTION_FAILURE};

    assert!(matches!(MachError::from(KERN_PROTECTION_FAILURE), MachError::ProtectionFailure));
    assert!(MachError::from(KERN_INVALID_ARGUMENT).to_string().contains("KERN_INVALID_ARGUMENT"));
    assert_eq!(MachError::from(999).to_string(), "Unknown Mach error: 999");
}

#[cfg(target_os = "macos")]
#[test]
fn test_mach_error_to_faultline_error()
{
    let mach_err = MachError::ResourceShortage;
    let error: FaultlineError = mach_err.into();

    match error {
        FaultlineError::MachError(MachError::ResourceShortage) => {}
        other => panic!("Expected MachError variant, got {other:?}"),
    }
}

#[test]
fn test_hook_install_failed_display()
{
    let error = FaultlineError::HookInstallFailed {
        hook: "SIGSEGV",
        reason: "EINVAL: Invalid argument".to_string(),
    };
    let message = format!("{}", error);
    assert!(message.contains("SIGSEGV"));
    assert!(message.contains("EINVAL"));
}

#[test]
fn test_resource_exhausted_display()
{
    let error = FaultlineError::ResourceExhausted("reserved thread list is full".to_string());
    let message = format!("{}", error);
    assert!(message.starts_with("Resource exhausted"));
    assert!(message.contains("reserved thread list"));
}

#[test]
fn test_unsupported_display()
{
    let error = FaultlineError::Unsupported("thread suspension");
    assert_eq!(error.to_string(), "Unsupported on this platform: thread suspension");
}

#[test]
fn test_io_error_converts()
{
    let io = std::io::Error::from(std::io::ErrorKind::NotFound);
    let error: FaultlineError = io.into();
    assert!(matches!(error, FaultlineError::Io(_)));
    assert!(error.to_string().starts_with("IO error"));
}

#[test]
fn test_question_mark_converts_io_errors()
{
    fn open_missing() -> Result<std::fs::File>
    {
        Ok(std::fs::File::open("/nonexistent/faultline/report.txt")?)
    }

    let error = open_missing().unwrap_err();
    assert!(matches!(error, FaultlineError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound));
}

#[test]
fn test_errno_shows_code_only()
{
    let io = std::io::Error::from_raw_os_error(libc::ENOENT);
    assert_eq!(Errno(&io).to_string(), format!("errno {}", libc::ENOENT));

    let kind_only = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
    assert_eq!(Errno(&kind_only).to_string(), "UnexpectedEof");
}

#[test]
fn test_fault_display()
{
    let error = FaultlineError::Io(std::io::Error::from_raw_os_error(libc::EBADF));
    assert_eq!(error.fault_display().to_string(), format!("IO error: errno {}", libc::EBADF));

    let error = FaultlineError::Unsupported("thread suspension");
    assert_eq!(error.fault_display().to_string(), error.to_string());
}
