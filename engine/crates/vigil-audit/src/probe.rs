//! Resource probe layer
//!
//! A [`ResourceCache`] lives for the evaluation of one control. Every snapshot
//! query runs on a blocking thread under the per-probe timeout, and its answer
//! (success or failure) is kept so that later expectations of the same control
//! see the same file state. Modification times are the exception: they are
//! read fresh each time because they are compared against the wall clock.

use crate::snapshot::{FileKind, FileStat, ProbeResult, ProcessEntry, SystemSnapshot};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{trace, warn};
use vigil_core::ProbeError;

/// Per-control cache of snapshot answers
pub struct ResourceCache {
    snapshot: Arc<dyn SystemSnapshot>,
    probe_timeout: Duration,
    stats: HashMap<String, ProbeResult<Option<FileStat>>>,
    contents: HashMap<String, ProbeResult<Arc<str>>>,
    processes: Option<ProbeResult<Arc<Vec<ProcessEntry>>>>,
}

impl ResourceCache {
    pub fn new(snapshot: Arc<dyn SystemSnapshot>, probe_timeout: Duration) -> Self {
        Self {
            snapshot,
            probe_timeout,
            stats: HashMap::new(),
            contents: HashMap::new(),
            processes: None,
        }
    }

    /// Probe a file, reusing an earlier stat of the same path
    pub async fn file(&mut self, path: &str) -> FileProbe {
        if let Some(stat) = self.stats.get(path) {
            return FileProbe::new(path, stat.clone());
        }

        let owned = path.to_string();
        let stat = self
            .query(path, move |snapshot| snapshot.stat_path(&owned))
            .await;
        self.stats.insert(path.to_string(), stat.clone());
        FileProbe::new(path, stat)
    }

    /// Stat a file without consulting or filling the cache
    pub async fn file_fresh(&self, path: &str) -> FileProbe {
        let owned = path.to_string();
        let stat = self
            .query(path, move |snapshot| snapshot.stat_path(&owned))
            .await;
        FileProbe::new(path, stat)
    }

    /// Content of a file, read once per control
    pub async fn content(&mut self, path: &str) -> ProbeResult<Arc<str>> {
        if let Some(content) = self.contents.get(path) {
            return content.clone();
        }

        let owned = path.to_string();
        let content = self
            .query(path, move |snapshot| snapshot.read_file(&owned))
            .await
            .map(|bytes| Arc::<str>::from(&*String::from_utf8_lossy(&bytes)));
        self.contents.insert(path.to_string(), content.clone());
        content
    }

    /// Probe the processes named `name`
    pub async fn processes(&mut self, name: &str) -> ProbeResult<ProcessProbe> {
        let table = match self.processes.clone() {
            Some(table) => table,
            None => {
                let table = self
                    .query("process table", |snapshot| snapshot.list_processes())
                    .await
                    .map(Arc::new);
                self.processes = Some(table.clone());
                table
            }
        };
        Ok(ProcessProbe::from_table(name, &table?))
    }

    async fn query<T, F>(&self, target: &str, f: F) -> ProbeResult<T>
    where
        F: FnOnce(&dyn SystemSnapshot) -> ProbeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        trace!("Probing {}", target);
        let snapshot = Arc::clone(&self.snapshot);
        let task = tokio::task::spawn_blocking(move || f(snapshot.as_ref()));

        match timeout(self.probe_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ProbeError::Failed {
                target: target.to_string(),
                message: format!("probe task failed: {}", e),
            }),
            Err(_) => {
                warn!(
                    "Probe of {} timed out after {}ms",
                    target,
                    self.probe_timeout.as_millis()
                );
                Err(ProbeError::Timeout {
                    target: target.to_string(),
                    timeout_ms: self.probe_timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Attributes of one path
#[derive(Debug, Clone)]
pub struct FileProbe {
    path: String,
    stat: ProbeResult<Option<FileStat>>,
}

impl FileProbe {
    pub fn new(path: impl Into<String>, stat: ProbeResult<Option<FileStat>>) -> Self {
        Self {
            path: path.into(),
            stat,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the path exists; an absent path is a valid answer
    pub fn exists(&self) -> ProbeResult<bool> {
        Ok(self.stat.clone()?.is_some())
    }

    /// Metadata of an existing path
    pub fn stat(&self) -> ProbeResult<&FileStat> {
        match &self.stat {
            Ok(Some(stat)) => Ok(stat),
            Ok(None) => Err(ProbeError::NotFound {
                path: self.path.clone(),
            }),
            Err(e) => Err(e.clone()),
        }
    }

    /// Type/permission flag of the path, false when the path is absent
    pub fn flag(&self, f: impl Fn(&FileStat) -> bool) -> ProbeResult<bool> {
        Ok(self.stat.clone()?.as_ref().map(f).unwrap_or(false))
    }

    pub fn is_file(&self) -> ProbeResult<bool> {
        self.flag(FileStat::is_file)
    }

    pub fn is_directory(&self) -> ProbeResult<bool> {
        self.flag(FileStat::is_directory)
    }

    pub fn is_executable(&self) -> ProbeResult<bool> {
        self.flag(FileStat::is_executable)
    }

    /// Kind of the path, `None` when it is absent
    pub fn kind(&self) -> ProbeResult<Option<FileKind>> {
        Ok(self.stat.clone()?.map(|stat| stat.kind))
    }

    pub fn owner(&self) -> ProbeResult<&str> {
        Ok(&self.stat()?.owner)
    }

    pub fn group(&self) -> ProbeResult<&str> {
        Ok(&self.stat()?.group)
    }

    pub fn mode(&self) -> ProbeResult<u16> {
        Ok(self.stat()?.mode)
    }

    pub fn mtime(&self) -> ProbeResult<i64> {
        Ok(self.stat()?.mtime)
    }
}

/// Processes matching a name filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessProbe {
    pub name: String,
    pub matching_count: usize,
    /// Distinct owners across all matches
    pub users: BTreeSet<String>,
}

impl ProcessProbe {
    /// Match by exact process name
    pub fn from_table(name: &str, table: &[ProcessEntry]) -> Self {
        let matches: Vec<&ProcessEntry> = table.iter().filter(|p| p.name == name).collect();
        Self {
            name: name.to_string(),
            matching_count: matches.len(),
            users: matches.iter().map(|p| p.user.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemorySnapshot;

    fn cache(snapshot: MemorySnapshot) -> ResourceCache {
        ResourceCache::new(Arc::new(snapshot), Duration::from_secs(5))
    }

    #[test]
    fn test_process_probe() {
        let table = vec![
            ProcessEntry::new(1, "rsyslogd", "syslog"),
            ProcessEntry::new(2, "rsyslogd", "root"),
            ProcessEntry::new(3, "rsyslogd", "syslog"),
            ProcessEntry::new(4, "sshd", "root"),
        ];
        let probe = ProcessProbe::from_table("rsyslogd", &table);
        assert_eq!(probe.matching_count, 3);
        assert_eq!(probe.users.len(), 2);

        let probe = ProcessProbe::from_table("syslogd", &table);
        assert_eq!(probe.matching_count, 0);
        assert!(probe.users.is_empty());
    }

    #[tokio::test]
    async fn test_absent_file_is_a_value() {
        let mut cache = cache(MemorySnapshot::new());
        let probe = cache.file("/etc/rsyslog.conf").await;
        assert_eq!(probe.exists(), Ok(false));
        assert_eq!(probe.is_file(), Ok(false));
        assert!(matches!(probe.mode(), Err(ProbeError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_content_is_cached_per_control() {
        let snapshot = MemorySnapshot::new().with_file("/var/log/syslog", "syslog", 0o644, "kernel: up");
        let mut cache = cache(snapshot);

        let first = cache.content("/var/log/syslog").await.unwrap();
        // A second read must not observe the snapshot again
        cache.snapshot = Arc::new(MemorySnapshot::new());
        let second = cache.content("/var/log/syslog").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.file_fresh("/var/log/syslog").await.exists(), Ok(false));
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        let snapshot = MemorySnapshot::new()
            .with_file("/var/log/messages", "root", 0o600, "")
            .with_stall(Duration::from_millis(300));
        let mut cache = ResourceCache::new(Arc::new(snapshot), Duration::from_millis(20));

        let err = cache.content("/var/log/messages").await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { timeout_ms: 20, .. }));
    }
}
