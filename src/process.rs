//! Process-level collaborators: exiting and memory reporting.

use std::sync::{Arc, Mutex, PoisonError};

/// Ends the process.
///
/// The kernel never calls `std::process::exit` directly so fatal paths can be
/// observed in tests.
pub trait ProcessExit: Send + Sync {
    fn exit(&self, code: i32);
}

/// Exits the real process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessTerminator;

impl ProcessExit for ProcessTerminator {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Records exit codes instead of exiting.
#[derive(Debug, Default, Clone)]
pub struct RecordingExit {
    codes: Arc<Mutex<Vec<i32>>>,
}

impl RecordingExit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit codes requested so far, oldest first
    pub fn codes(&self) -> Vec<i32> {
        self.codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProcessExit for RecordingExit {
    fn exit(&self, code: i32) {
        tracing::debug!("Recorded process exit with status {}", code);
        self.codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(code);
    }
}

/// Resident set size of the current process in bytes.
///
/// `None` where the platform does not expose it.
pub fn resident_memory() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss(&status)
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line
        .trim_start_matches("VmRSS:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()?;
    Some(kib * 1024)
}

/// `Memory usage: 12.34 MB`
pub fn format_memory_usage(bytes: Option<u64>) -> String {
    match bytes {
        Some(bytes) => format!("Memory usage: {:.2} MB", bytes as f64 / 1024.0 / 1024.0),
        None => "Memory usage: unavailable".to_string(),
    }
}
