use std::path::PathBuf;
use std::process;
use std::sync::mpsc;
use std::thread;

use clap::{Parser, Subcommand, ValueEnum};
use faultline_core::config::{install, CaptureConfig};
use faultline_core::context::{capture_for_thread, resume_environment, suspend_environment, MachineContext};
use faultline_core::images::{ImageTable, MAX_CRASH_INFO_STRING_LENGTH};
use faultline_core::io::make_path;
use faultline_core::monitors::{report_user_exception, UserReport};
use faultline_core::platform;
use faultline_core::types::{Address, ThreadId};
use faultline_core::unwind::{StackCursor, DEFAULT_MAX_DEPTH};
use faultline_utils::{
    default_log_file, info, init_file_logging, init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingGuard,
};

mod report;

/// In-process crash capture: inspect loaded images and run capture drills.
#[derive(Parser, Debug)]
#[command(name = "faultline")]
#[command(version)]
#[command(about = "In-process crash capture: inspect loaded images and run capture drills", long_about = None)]
struct Cli
{
    /// Log level for both tracing and the fault-path logger (default: RUST_LOG or info)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Log format: pretty or json
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,
    /// Send tracing output to ~/.faultline instead of the console
    #[arg(long, global = true, default_value_t = false)]
    log_to_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// List the binary images loaded into this process
    Images
    {
        /// Only show images whose path contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Resolve addresses in this process to image and symbol
    Resolve
    {
        /// Addresses to resolve (hex format: 0x1000 or decimal)
        #[arg(required = true, value_parser = parse_address)]
        addresses: Vec<Address>,
    },
    /// Print a symbolicated backtrace of the calling thread
    Backtrace
    {
        /// Maximum number of frames
        #[arg(short, long, default_value_t = DEFAULT_MAX_DEPTH)]
        depth: usize,
    },
    /// List threads, suspending them to read registers where supported
    Threads
    {
        /// Idle helper threads to spawn first
        #[arg(short, long, default_value_t = 2)]
        spawn: usize,
    },
    /// Install crash capture, then trigger a failure
    Crash
    {
        /// Failure to trigger
        #[arg(value_enum)]
        kind: CrashKind,
        /// Write reports into this directory instead of stderr
        #[arg(long)]
        report_dir: Option<PathBuf>,
        /// Also trap SIGTERM
        #[arg(long, default_value_t = false)]
        sigterm: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum CrashKind
{
    /// Write through a null pointer (SIGSEGV)
    Segv,
    /// Call abort() (SIGABRT)
    Abort,
    /// Execute a breakpoint instruction (SIGTRAP)
    Trap,
    /// Recurse until the stack guard page is hit
    StackOverflow,
    /// Send SIGTERM to this process (needs --sigterm to be captured)
    Term,
    /// Panic on the main thread
    Panic,
    /// Report an application exception and keep running
    User,
}

fn parse_address(text: &str) -> Result<Address, String>
{
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    };
    parsed
        .map(Address::new)
        .map_err(|e| format!("invalid address {text:?}: {e}"))
}

fn init_tracing(cli: &Cli) -> Result<LoggingGuard, Box<dyn std::error::Error>>
{
    let guard = if cli.log_to_file {
        let path = default_log_file("faultline");
        let guard = init_file_logging(&path, cli.log_level, cli.log_format)?;
        eprintln!("Logging to {}", path.display());
        guard
    } else if let Some(level) = cli.log_level {
        init_logging_with_level(level, cli.log_format)?
    } else {
        init_logging()?
    };
    Ok(guard)
}

fn main()
{
    let cli = Cli::parse();

    let _guard = match init_tracing(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>>
{
    match cli.command {
        Commands::Images { filter } => list_images(filter.as_deref()),
        Commands::Resolve { addresses } => {
            for (index, address) in addresses.into_iter().enumerate() {
                print_frame(index, address)?;
            }
            Ok(())
        }
        Commands::Backtrace { depth } => {
            let mut cursor = StackCursor::from_current_thread(0, depth);
            while cursor.advance() {
                print_frame(cursor.depth() - 1, cursor.address())?;
            }
            Ok(())
        }
        Commands::Threads { spawn } => list_threads(spawn),
        Commands::Crash {
            kind,
            report_dir,
            sigterm,
        } => run_drill(kind, report_dir, sigterm, cli.log_level),
    }
}

fn print_frame(index: usize, address: Address) -> Result<(), Box<dyn std::error::Error>>
{
    let mut line = String::new();
    report::write_frame(&mut line, index, address)?;
    print!("{line}");
    Ok(())
}

fn list_images(filter: Option<&str>) -> Result<(), Box<dyn std::error::Error>>
{
    let table = ImageTable::live();
    let count = table.image_count();
    if count == 0 {
        println!("No Mach-O images are visible on this platform.");
        return Ok(());
    }

    let mut shown = 0;
    for index in 0..count {
        let Some(image) = table.image_at(index) else {
            continue;
        };
        let name = image.name_str().unwrap_or("???");
        if filter.is_some_and(|filter| !name.contains(filter)) {
            continue;
        }
        let uuid = image.uuid().map_or_else(|| "-".to_string(), |uuid| uuid.hyphenated().to_string());
        println!(
            "{index:>4} {} {:>10} {:>3}.{}.{} {uuid} {name}",
            image.address, image.size, image.major_version, image.minor_version, image.revision_version
        );
        let mut buffer = [0u8; MAX_CRASH_INFO_STRING_LENGTH + 1];
        if let Some(message) = image.crash_info.message.and_then(|message| message.read(&mut buffer)) {
            println!("       crash info: {}", message.to_string_lossy());
        }
        shown += 1;
    }
    info!("Listed {} of {} images", shown, count);
    Ok(())
}

fn list_threads(spawn: usize) -> Result<(), Box<dyn std::error::Error>>
{
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let stop_rx = std::sync::Arc::new(std::sync::Mutex::new(stop_rx));
    let helpers: Vec<_> = (0..spawn)
        .map(|n| {
            let stop_rx = std::sync::Arc::clone(&stop_rx);
            thread::Builder::new()
                .name(format!("idle-{n}"))
                .spawn(move || {
                    if let Ok(rx) = stop_rx.lock() {
                        let _ = rx.recv();
                    }
                })
        })
        .collect::<Result<_, _>>()?;

    let mut threads = Vec::new();
    let count = platform::for_each_thread(|thread| threads.push(thread))?;
    let this_thread = platform::current_thread();
    println!("{count} threads (suspension {})", if platform::suspend_supported() { "supported" } else { "unsupported" });

    let mut suspended = suspend_environment();
    let mut contexts: Vec<(ThreadId, MachineContext)> = Vec::with_capacity(threads.len());
    for &thread in &threads {
        let mut context = MachineContext::new();
        capture_for_thread(thread, false, &mut context);
        contexts.push((thread, context));
    }
    resume_environment(&mut suspended);

    for (thread, context) in &contexts {
        let marker = if *thread == this_thread { "*" } else { " " };
        if context.can_have_cpu_state() && !context.registers().is_empty() {
            let registers = context.registers();
            println!("{marker} {thread:>8} pc {:#018x} sp {:#018x}", registers.pc, registers.sp);
        } else {
            println!("{marker} {thread:>8} (no register state)");
        }
    }

    drop(stop_tx);
    for helper in helpers {
        let _ = helper.join();
    }
    Ok(())
}

fn run_drill(
    kind: CrashKind,
    report_dir: Option<PathBuf>,
    sigterm: bool,
    log_level: Option<LogLevel>,
) -> Result<(), Box<dyn std::error::Error>>
{
    if let Some(dir) = &report_dir {
        make_path(dir)?;
        report::set_report_dir(dir)?;
    }

    let mut config = CaptureConfig::from_env()?.on_event(report::write_report);
    if sigterm {
        config = config.with_sigterm(true);
    }
    if let Some(level) = log_level {
        config = config.with_log_level(level.into());
    }
    let active = install(&config)?;
    info!("Triggering {:?} with monitors {:?}", kind, active);

    match kind {
        CrashKind::Segv => {
            let pointer = std::hint::black_box(std::ptr::null_mut::<u64>());
            // SAFETY: none. The write is meant to fault.
            unsafe { pointer.write_volatile(0xdead) };
        }
        CrashKind::Abort => process::abort(),
        CrashKind::Trap => trap(),
        CrashKind::StackOverflow => {
            let depth = recurse(std::hint::black_box(0));
            println!("recursion returned at depth {depth}");
        }
        CrashKind::Term => {
            // SAFETY: signalling our own process.
            unsafe { libc::kill(libc::getpid(), libc::SIGTERM) };
        }
        CrashKind::Panic => panic!("faultline panic drill"),
        CrashKind::User => {
            report_user_exception(&UserReport {
                name: "DrillError",
                reason: Some("user-reported exception drill"),
                language: Some("rust"),
                line_of_code: Some(concat!(file!(), ":", line!())),
                stack_trace: &["drill::run", "faultline::main"],
                ..Default::default()
            });
            println!("User report delivered; process still running");
            return Ok(());
        }
    }

    Err("the drill did not terminate the process".into())
}

#[inline(never)]
fn trap()
{
    // SAFETY: a breakpoint instruction only raises SIGTRAP.
    unsafe {
        #[cfg(target_arch = "x86_64")]
        std::arch::asm!("int3");
        #[cfg(target_arch = "aarch64")]
        std::arch::asm!("brk #1");
    }
}

#[inline(never)]
#[allow(unconditional_recursion)]
fn recurse(depth: u64) -> u64
{
    let padding = std::hint::black_box([depth; 64]);
    recurse(depth + 1) + padding[0]
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_address()
    {
        assert_eq!(parse_address("0x1000"), Ok(Address::new(0x1000)));
        assert_eq!(parse_address("0XfF"), Ok(Address::new(0xff)));
        assert_eq!(parse_address("4096"), Ok(Address::new(4096)));
        assert!(parse_address("0xzz").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn test_cli_parses_crash_drill()
    {
        let cli = Cli::try_parse_from(["faultline", "crash", "stack-overflow", "--report-dir", "/tmp/r"]).unwrap();
        match cli.command {
            Commands::Crash { kind, report_dir, sigterm } => {
                assert_eq!(kind, CrashKind::StackOverflow);
                assert_eq!(report_dir, Some(PathBuf::from("/tmp/r")));
                assert!(!sigterm);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_address()
    {
        assert!(Cli::try_parse_from(["faultline", "resolve", "nowhere"]).is_err());
        assert!(Cli::try_parse_from(["faultline", "resolve"]).is_err());
    }
}
