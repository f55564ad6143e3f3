//! CPU and memory accounting for the orchestrator and its workers.

use crate::config::types::{EvaluatorError, Result};
use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::time::TimeValLike;
use nix::unistd::{sysconf, Pid, SysconfVar};
use std::time::Duration;

const FALLBACK_CLOCK_TICKS: u64 = 100;
const FALLBACK_PAGE_SIZE: u64 = 4096;

/// One point-in-time reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSample {
    /// User plus system CPU time consumed so far
    pub cpu: Duration,
    /// Resident set size in bytes
    pub rss_bytes: u64,
}

/// CPU time of the orchestrator process so far.
pub fn self_cpu_time() -> Result<Duration> {
    let usage = getrusage(UsageWho::RUSAGE_SELF)
        .map_err(|e| EvaluatorError::Process(format!("getrusage(self): {e}")))?;
    let micros = usage.user_time().num_microseconds() + usage.system_time().num_microseconds();
    Ok(Duration::from_micros(micros.max(0) as u64))
}

/// Orchestrator CPU (rusage) and RSS (`/proc/self/stat`).
pub fn sample_self() -> Result<ResourceSample> {
    let cpu = self_cpu_time()?;
    let stat = read_stat("self")?;
    Ok(ResourceSample {
        cpu,
        rss_bytes: stat.rss_pages * page_size(),
    })
}

/// CPU and RSS of another process, from `/proc/<pid>/stat`.
pub fn sample_process(pid: Pid) -> Result<ResourceSample> {
    let stat = read_stat(&pid.to_string())?;
    let ticks = clock_ticks();
    let cpu_ticks = stat.utime + stat.stime;
    Ok(ResourceSample {
        cpu: Duration::from_micros(cpu_ticks.saturating_mul(1_000_000) / ticks),
        rss_bytes: stat.rss_pages * page_size(),
    })
}

#[derive(Debug, PartialEq, Eq)]
struct ProcStat {
    utime: u64,
    stime: u64,
    rss_pages: u64,
}

fn read_stat(which: &str) -> Result<ProcStat> {
    let path = format!("/proc/{}/stat", which);
    let content = std::fs::read_to_string(&path)?;
    parse_stat(&content)
        .ok_or_else(|| EvaluatorError::Process(format!("unrecognised format in {}", path)))
}

/// Fields after the parenthesised command name, which may itself contain spaces.
fn parse_stat(content: &str) -> Option<ProcStat> {
    let (_, rest) = content.rsplit_once(')')?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // `rest` starts at field 3 (state); utime/stime are fields 14/15, rss is 24.
    let field = |n: usize| fields.get(n - 3)?.parse::<i64>().ok();
    Some(ProcStat {
        utime: field(14)?.max(0) as u64,
        stime: field(15)?.max(0) as u64,
        rss_pages: field(24)?.max(0) as u64,
    })
}

fn clock_ticks() -> u64 {
    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(ticks)) if ticks > 0 => ticks as u64,
        _ => FALLBACK_CLOCK_TICKS,
    }
}

fn page_size() -> u64 {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as u64,
        _ => FALLBACK_PAGE_SIZE,
    }
}

/// `"<n> ms"`
pub fn format_millis(duration: Duration) -> String {
    format!("{} ms", duration.as_millis())
}

/// `"<n.nn> MiB"`
pub fn format_mebibytes(bytes: u64) -> String {
    format!("{:.2} MiB", bytes as f64 / (1024.0 * 1024.0))
}

/// Host name for metadata; never fails.
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|e| {
            log::warn!("gethostname failed: {}", e);
            String::from("unknown")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stat_with_spaces_in_command() {
        let line = "4242 (my (odd) worker) S 1 4242 4242 0 -1 4194560 300 0 0 0 \
                    17 5 0 0 20 0 1 0 123456 10485760 2560 18446744073709551615";
        assert_eq!(
            parse_stat(line),
            Some(ProcStat {
                utime: 17,
                stime: 5,
                rss_pages: 2560,
            })
        );
        assert_eq!(parse_stat("garbage"), None);
        assert_eq!(parse_stat("1 (short) S 1 2"), None);
    }

    #[test]
    fn samples_the_current_process() {
        let sample = sample_self().unwrap();
        assert!(sample.rss_bytes > 0);

        let me = sample_process(Pid::this()).unwrap();
        assert!(me.rss_bytes > 0);
    }

    #[test]
    fn sampling_a_missing_process_fails() {
        assert!(sample_process(Pid::from_raw(i32::MAX)).is_err());
    }

    #[test]
    fn formats() {
        assert_eq!(format_millis(Duration::from_micros(12_999)), "12 ms");
        assert_eq!(format_mebibytes(3 * 1024 * 1024 + 512 * 1024), "3.50 MiB");
        assert!(!hostname().is_empty());
    }
}
