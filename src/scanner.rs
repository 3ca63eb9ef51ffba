use std::sync::{Arc, Mutex};

use log::{debug, warn};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

use crate::error::{MonitorError, MonitorResult};

/// A live process as seen by one enumeration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    /// File name of the executable, when the OS exposes it.
    pub exe_name: Option<String>,
}

/// Source of process snapshots. Enumeration is read-only.
pub trait ProcessSource: Send + Sync {
    fn snapshot(&self) -> MonitorResult<Vec<ProcessEntry>>;
}

/// Enumerates host processes through `sysinfo`.
pub struct SysinfoProcessSource {
    system: Mutex<System>,
    /// Our own PID so we can filter ourselves out
    own_pid: u32,
}

impl SysinfoProcessSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            own_pid: std::process::id(),
        }
    }
}

impl Default for SysinfoProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SysinfoProcessSource {
    fn snapshot(&self) -> MonitorResult<Vec<ProcessEntry>> {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // exe() is only populated when requested explicitly
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            ProcessRefreshKind::new().with_exe(sysinfo::UpdateKind::OnlyIfNotSet),
        );

        let mut entries: Vec<ProcessEntry> = system
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != self.own_pid)
            .filter_map(|(pid, process)| {
                let name = process.name().to_string_lossy().into_owned();
                // Exited between refresh and inspection
                if name.is_empty() {
                    return None;
                }
                let exe_name = process
                    .exe()
                    .and_then(|exe| exe.file_name())
                    .map(|file| file.to_string_lossy().into_owned());
                Some(ProcessEntry {
                    pid: pid.as_u32(),
                    name,
                    exe_name,
                })
            })
            .collect();

        if entries.is_empty() {
            return Err(MonitorError::ProcessEnumeration(
                "process table came back empty".into(),
            ));
        }

        entries.sort_by_key(|entry| entry.pid);
        Ok(entries)
    }
}

/// Case-insensitive substring patterns, fixed for a session.
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    patterns: Vec<String>,
}

impl Blocklist {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.patterns.iter().any(|pattern| name.contains(pattern.as_str()))
    }

    /// First process whose name (or executable file name) contains a pattern.
    pub fn first_match(&self, processes: &[ProcessEntry]) -> Option<String> {
        processes
            .iter()
            .find(|process| {
                self.matches(&process.name)
                    || process.exe_name.as_deref().is_some_and(|exe| self.matches(exe))
            })
            .map(|process| process.name.clone())
    }
}

pub struct ProcessScanner {
    source: Arc<dyn ProcessSource>,
    blocklist: Blocklist,
}

impl ProcessScanner {
    pub fn new(source: Arc<dyn ProcessSource>, blocklist: Blocklist) -> Self {
        Self { source, blocklist }
    }

    /// One enumeration pass. Enumeration failures are logged and read as "no match".
    pub fn scan(&self) -> Option<String> {
        if self.blocklist.is_empty() {
            return None;
        }

        match self.source.snapshot() {
            Ok(processes) => {
                let hit = self.blocklist.first_match(&processes);
                debug!(
                    "process scan: {} processes, match={:?}",
                    processes.len(),
                    hit
                );
                hit
            }
            Err(err) => {
                warn!("process scan skipped: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Vec<&'static str>);

    impl ProcessSource for FixedSource {
        fn snapshot(&self) -> MonitorResult<Vec<ProcessEntry>> {
            Ok(self
                .0
                .iter()
                .enumerate()
                .map(|(i, name)| ProcessEntry {
                    pid: i as u32 + 100,
                    name: name.to_string(),
                    exe_name: None,
                })
                .collect())
        }
    }

    struct BrokenSource;

    impl ProcessSource for BrokenSource {
        fn snapshot(&self) -> MonitorResult<Vec<ProcessEntry>> {
            Err(MonitorError::ProcessEnumeration("permission denied".into()))
        }
    }

    #[test]
    fn test_match_is_case_insensitive_substring() {
        let blocklist = Blocklist::new(["cluely"]);
        assert!(blocklist.matches("Cluely Helper.exe"));
        assert!(blocklist.matches("CLUELY"));
        assert!(!blocklist.matches("Clue"));
    }

    #[test]
    fn test_scan_returns_matched_process_name() {
        let scanner = ProcessScanner::new(
            Arc::new(FixedSource(vec!["launchd", "Cluely Helper", "zoom.us"])),
            Blocklist::new(["cluely"]),
        );
        assert_eq!(scanner.scan().as_deref(), Some("Cluely Helper"));
    }

    #[test]
    fn test_scan_returns_first_match_in_pid_order() {
        let blocklist = Blocklist::new(["cluely", "coder"]);
        let processes = vec![
            ProcessEntry { pid: 5, name: "Interview Coder".into(), exe_name: None },
            ProcessEntry { pid: 9, name: "Cluely".into(), exe_name: None },
        ];
        assert_eq!(blocklist.first_match(&processes).as_deref(), Some("Interview Coder"));
    }

    #[test]
    fn test_executable_name_also_matches() {
        let blocklist = Blocklist::new(["cluely"]);
        let processes = vec![ProcessEntry {
            pid: 1,
            name: "Helper (Rend".into(),
            exe_name: Some("Cluely Helper (Renderer)".into()),
        }];
        assert_eq!(blocklist.first_match(&processes).as_deref(), Some("Helper (Rend"));
    }

    #[test]
    fn test_enumeration_failure_reads_as_no_match() {
        let scanner = ProcessScanner::new(Arc::new(BrokenSource), Blocklist::new(["cluely"]));
        assert_eq!(scanner.scan(), None);
    }

    #[test]
    fn test_empty_blocklist_never_matches() {
        let scanner = ProcessScanner::new(
            Arc::new(FixedSource(vec!["cluely"])),
            Blocklist::new(["  ", ""]),
        );
        assert_eq!(scanner.scan(), None);
    }

    #[test]
    fn test_sysinfo_source_sees_processes() {
        let source = SysinfoProcessSource::new();
        let processes = source.snapshot().unwrap();
        assert!(!processes.is_empty());
        assert!(processes.iter().all(|p| p.pid != std::process::id()));
    }
}
