//! System snapshot providers
//!
//! The auditor never touches the filesystem or process table itself; every
//! question goes through a [`SystemSnapshot`]. [`MemorySnapshot`] is a fixed,
//! serializable sample used for captured snapshots and tests.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use vigil_core::{Mode, PlatformSignals, ProbeError};

/// Result of a snapshot query
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

/// Kind of filesystem entry, after following symlinks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    #[default]
    File,
    Directory,
    /// Fifo, socket or device node
    Other,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Directory => "directory",
            FileKind::Other => "special file",
        }
    }
}

/// Metadata of a filesystem entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    pub owner: String,
    pub group: String,
    /// Permission bits, `& 0o7777`
    pub mode: u16,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
}

impl FileStat {
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Any execute bit is set
    pub fn is_executable(&self) -> bool {
        self.mode & 0o111 != 0
    }
}

/// One row of the process table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    #[serde(default)]
    pub pid: u32,
    pub name: String,
    pub user: String,
}

impl ProcessEntry {
    pub fn new(pid: u32, name: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            user: user.into(),
        }
    }
}

/// Read-only view of the audited system.
///
/// Implementations are called from blocking worker threads and may block.
pub trait SystemSnapshot: Send + Sync {
    /// Metadata of `path`, `Ok(None)` when it does not exist
    fn stat_path(&self, path: &str) -> ProbeResult<Option<FileStat>>;

    /// Full content of `path`
    fn read_file(&self, path: &str) -> ProbeResult<Vec<u8>>;

    /// The process table
    fn list_processes(&self) -> ProbeResult<Vec<ProcessEntry>>;

    /// Raw platform signals for the OS classifier
    fn platform_facts(&self) -> PlatformSignals;
}

/// A file in a [`MemorySnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryFile {
    #[serde(default)]
    pub kind: FileKind,
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_owner")]
    pub group: String,
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub mtime: i64,
    #[serde(default)]
    pub content: Option<String>,
}

fn default_owner() -> String {
    "root".to_string()
}

fn default_mode() -> Mode {
    Mode(0o644)
}

impl MemoryFile {
    /// Regular file, modified now
    pub fn file(owner: &str, group: &str, mode: u16, content: &str) -> Self {
        Self {
            kind: FileKind::File,
            owner: owner.to_string(),
            group: group.to_string(),
            mode: Mode(mode),
            mtime: chrono::Utc::now().timestamp(),
            content: Some(content.to_string()),
        }
    }

    /// Directory, modified now
    pub fn directory(owner: &str, group: &str, mode: u16) -> Self {
        Self {
            kind: FileKind::Directory,
            content: None,
            ..Self::file(owner, group, mode, "")
        }
    }

    pub fn with_mtime(mut self, mtime: i64) -> Self {
        self.mtime = mtime;
        self
    }

    fn stat(&self) -> FileStat {
        FileStat {
            kind: self.kind,
            owner: self.owner.clone(),
            group: self.group.clone(),
            mode: self.mode.bits(),
            mtime: self.mtime,
        }
    }
}

/// In-memory system snapshot.
///
/// Deserializable from JSON:
///
/// ```json
/// {
///   "platform": { "platform_id": "rhel" },
///   "files": {
///     "/etc/rsyslog.conf": { "owner": "root", "mode": "0644", "content": "*.* @@logs:514" }
///   },
///   "processes": [ { "pid": 812, "name": "rsyslogd", "user": "root" } ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySnapshot {
    #[serde(default)]
    pub platform: PlatformSignals,
    #[serde(default)]
    pub files: BTreeMap<String, MemoryFile>,
    #[serde(default)]
    pub processes: Vec<ProcessEntry>,
    /// Paths that exist but cannot be read
    #[serde(default)]
    pub unreadable: BTreeSet<String>,
    /// Artificial delay added to every query
    #[serde(skip)]
    stall: Option<Duration>,
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a captured snapshot
    pub fn from_json(json: &str) -> vigil_core::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a captured snapshot from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> vigil_core::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(vigil_core::Error::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn with_platform(mut self, platform: PlatformSignals) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_entry(mut self, path: impl Into<String>, file: MemoryFile) -> Self {
        self.files.insert(path.into(), file);
        self
    }

    pub fn with_file(self, path: impl Into<String>, owner: &str, mode: u16, content: &str) -> Self {
        self.with_entry(path, MemoryFile::file(owner, owner, mode, content))
    }

    pub fn with_directory(self, path: impl Into<String>, owner: &str, mode: u16) -> Self {
        self.with_entry(path, MemoryFile::directory(owner, owner, mode))
    }

    pub fn with_process(mut self, name: impl Into<String>, user: impl Into<String>) -> Self {
        let pid = 100 + self.processes.len() as u32;
        self.processes.push(ProcessEntry::new(pid, name, user));
        self
    }

    pub fn with_unreadable(mut self, path: impl Into<String>) -> Self {
        self.unreadable.insert(path.into());
        self
    }

    /// Delay every query, to exercise probe timeouts
    pub fn with_stall(mut self, stall: Duration) -> Self {
        self.stall = Some(stall);
        self
    }

    fn wait(&self) {
        if let Some(stall) = self.stall {
            std::thread::sleep(stall);
        }
    }
}

impl SystemSnapshot for MemorySnapshot {
    fn stat_path(&self, path: &str) -> ProbeResult<Option<FileStat>> {
        self.wait();
        Ok(self.files.get(path).map(MemoryFile::stat))
    }

    fn read_file(&self, path: &str) -> ProbeResult<Vec<u8>> {
        self.wait();
        let file = self.files.get(path).ok_or_else(|| ProbeError::NotFound {
            path: path.to_string(),
        })?;

        if self.unreadable.contains(path) {
            return Err(ProbeError::PermissionDenied {
                path: path.to_string(),
            });
        }
        if file.kind == FileKind::Directory {
            return Err(ProbeError::Failed {
                target: path.to_string(),
                message: "is a directory".into(),
            });
        }

        Ok(file.content.clone().unwrap_or_default().into_bytes())
    }

    fn list_processes(&self) -> ProbeResult<Vec<ProcessEntry>> {
        self.wait();
        Ok(self.processes.clone())
    }

    fn platform_facts(&self) -> PlatformSignals {
        self.platform.clone()
    }
}
