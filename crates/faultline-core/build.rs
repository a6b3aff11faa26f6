//! Build script for faultline-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version (`std::panic::PanicHookInfo` needs Rust 1.81.0)
//! - Platform-specific requirements (macOS version)
//! - Frame pointers, which the self-thread backtrace relies on
//!
//! ## Requirements
//!
//! - **Rust**: 1.81.0 or newer
//! - **macOS**: 10.13+ for Intel, 11.0+ (Big Sur) for Apple Silicon
//! - **Linux**: `process_vm_readv(2)` (kernel 3.2+); a pipe fallback is used
//!   when it is unavailable

const MIN_RUST_VERSION: &str = "1.81.0";

fn main()
{
    match (rustc_version::version(), rustc_version::Version::parse(MIN_RUST_VERSION)) {
        (Ok(found), Ok(required)) => {
            if found < required {
                panic!("faultline-core requires Rust {required} or newer, found {found}");
            }
        }
        // Some build environments hide the compiler version
        _ => println!("cargo:warning=could not verify Rust version"),
    }

    // Self-thread backtraces walk frame records; without frame pointers they
    // stop early.
    let flags = std::env::var("CARGO_ENCODED_RUSTFLAGS").unwrap_or_default();
    if !flags.contains("force-frame-pointers") {
        println!("cargo:warning=building without -C force-frame-pointers=yes; self-thread backtraces may be truncated");
    }
    println!("cargo:rerun-if-env-changed=CARGO_ENCODED_RUSTFLAGS");

    #[cfg(target_os = "macos")]
    check_macos_requirements();
}

#[cfg(target_os = "macos")]
fn check_macos_requirements()
{
    // __crash_info records of version 5 and the 64-bit-only dyld APIs we use
    // are present from 10.13 on; Apple Silicon starts at 11.0.
    let min_macos_version = if cfg!(target_arch = "aarch64") { (11, 0, 0) } else { (10, 13, 0) };

    match get_macos_version() {
        Some(version) if version < min_macos_version => panic!(
            "faultline-core requires macOS {}.{}.{} or newer, found {}.{}.{}",
            min_macos_version.0, min_macos_version.1, min_macos_version.2, version.0, version.1, version.2
        ),
        Some(_) => {}
        // Might be cross-compiling
        None => println!("cargo:warning=could not detect macOS version"),
    }
}

#[cfg(target_os = "macos")]
fn get_macos_version() -> Option<(u32, u32, u32)>
{
    use std::process::Command;

    let output = Command::new("sw_vers").arg("-productVersion").output().ok()?;
    let version_str = String::from_utf8(output.stdout).ok()?;

    // e.g. "14.2.1" or "11.0"
    let mut parts = version_str.trim().split('.');
    let major = parts.next()?.parse::<u32>().ok()?;
    let minor = parts.next()?.parse::<u32>().ok()?;
    let patch = parts.next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);

    Some((major, minor, patch))
}
