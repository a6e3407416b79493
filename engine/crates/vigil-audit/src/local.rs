//! Snapshot of the local host (unix)

use crate::snapshot::{FileKind, FileStat, ProbeResult, ProcessEntry, SystemSnapshot};
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::process::{Command, Output};
use tracing::{debug, trace};
use vigil_core::{PlatformSignals, ProbeError};

const PACKAGE_MANAGERS: &[(&str, &[&str])] = &[
    ("zypper", &["/usr/bin/zypper"]),
    ("dnf", &["/usr/bin/dnf"]),
    ("yum", &["/usr/bin/yum"]),
    ("rpm", &["/usr/bin/rpm", "/bin/rpm"]),
    ("dpkg", &["/usr/bin/dpkg", "/bin/dpkg"]),
    ("apt", &["/usr/bin/apt-get"]),
];

/// The live system, read through the filesystem and `/proc`
#[derive(Debug, Clone)]
pub struct LocalSnapshot {
    users: HashMap<u32, String>,
    groups: HashMap<u32, String>,
}

impl LocalSnapshot {
    /// Load the user and group tables once
    pub fn new() -> Self {
        let users = fs::read_to_string("/etc/passwd")
            .map(|c| parse_id_names(&c))
            .unwrap_or_default();
        let groups = fs::read_to_string("/etc/group")
            .map(|c| parse_id_names(&c))
            .unwrap_or_default();
        debug!("Loaded {} users and {} groups", users.len(), groups.len());
        Self { users, groups }
    }

    fn username(&self, uid: u32) -> String {
        self.users
            .get(&uid)
            .cloned()
            .unwrap_or_else(|| uid.to_string())
    }

    fn groupname(&self, gid: u32) -> String {
        self.groups
            .get(&gid)
            .cloned()
            .unwrap_or_else(|| gid.to_string())
    }

    fn proc_processes(&self) -> Option<Vec<ProcessEntry>> {
        let entries = fs::read_dir("/proc").ok()?;
        let mut processes = Vec::new();

        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            // Processes may exit while the table is read
            let Ok(status) = fs::read_to_string(entry.path().join("status")) else {
                continue;
            };
            if let Some((name, uid)) = parse_proc_status(&status) {
                processes.push(ProcessEntry::new(pid, name, self.username(uid)));
            }
        }
        Some(processes)
    }

    fn ps_processes(&self) -> ProbeResult<Vec<ProcessEntry>> {
        let output = Command::new("ps")
            .args(["-axo", "pid=,user=,comm="])
            .output()
            .map_err(|e| ProbeError::Failed {
                target: "process table".into(),
                message: format!("failed to run ps: {}", e),
            })?;

        ps_table(&output)
    }
}

impl Default for LocalSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSnapshot for LocalSnapshot {
    fn stat_path(&self, path: &str) -> ProbeResult<Option<FileStat>> {
        // Follows symlinks: a linked binary or log file is judged by its target
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProbeError::from_io(path, &e)),
        };

        let file_type = metadata.file_type();
        let kind = if file_type.is_file() {
            FileKind::File
        } else if file_type.is_dir() {
            FileKind::Directory
        } else {
            FileKind::Other
        };

        Ok(Some(FileStat {
            kind,
            owner: self.username(metadata.uid()),
            group: self.groupname(metadata.gid()),
            mode: (metadata.permissions().mode() & 0o7777) as u16,
            mtime: metadata.mtime(),
        }))
    }

    fn read_file(&self, path: &str) -> ProbeResult<Vec<u8>> {
        fs::read(path).map_err(|e| ProbeError::from_io(path, &e))
    }

    fn list_processes(&self) -> ProbeResult<Vec<ProcessEntry>> {
        match self.proc_processes() {
            Some(processes) => Ok(processes),
            None => {
                trace!("/proc unavailable, falling back to ps");
                self.ps_processes()
            }
        }
    }

    fn platform_facts(&self) -> PlatformSignals {
        let mut signals = PlatformSignals::default();

        if cfg!(target_os = "macos") {
            signals.platform_id = Some("darwin".into());
        } else if let Ok(content) = fs::read_to_string("/etc/os-release") {
            let (id, id_like) = parse_os_release(&content);
            signals.platform_id = id;
            signals.id_like = id_like;
        }

        for (manager, paths) in PACKAGE_MANAGERS {
            if paths.iter().any(|p| Path::new(p).exists()) {
                signals.package_managers.push(manager.to_string());
            }
        }

        if let Some(system) = detect_virtualization() {
            signals.virtualization_role = Some("guest".into());
            signals.virtualization_system = Some(system);
        }

        signals.hostname = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().to_string());
        signals
    }
}

/// Container or VM this host runs in, if any
fn detect_virtualization() -> Option<String> {
    detect_virt_command()
        .or_else(detect_container_markers)
        .or_else(|| {
            // Fallback: check DMI
            fs::read_to_string("/sys/class/dmi/id/product_name")
                .ok()
                .and_then(|s| {
                    let lower = s.to_lowercase();
                    if lower.contains("virtualbox") {
                        Some("virtualbox".into())
                    } else if lower.contains("vmware") {
                        Some("vmware".into())
                    } else if lower.contains("qemu") || lower.contains("kvm") {
                        Some("kvm".into())
                    } else if lower.contains("hyper-v") {
                        Some("hyperv".into())
                    } else {
                        None
                    }
                })
        })
}

fn detect_virt_command() -> Option<String> {
    Command::new("systemd-detect-virt")
        .output()
        .ok()
        .and_then(|o| {
            let result = String::from_utf8_lossy(&o.stdout).trim().to_string();
            if result != "none" && !result.is_empty() {
                Some(result)
            } else {
                None
            }
        })
}

fn detect_container_markers() -> Option<String> {
    if Path::new("/.dockerenv").exists() {
        return Some("docker".into());
    }
    if Path::new("/run/.containerenv").exists() {
        return Some("podman".into());
    }
    fs::read_to_string("/proc/1/environ")
        .ok()
        .filter(|env| env.split('\0').any(|kv| kv == "container=lxc"))
        .map(|_| "lxc".into())
}

/// `ID` and `ID_LIKE` from os-release content
pub fn parse_os_release(content: &str) -> (Option<String>, Vec<String>) {
    let mut id = None;
    let mut id_like = Vec::new();

    for line in content.lines() {
        if let Some(v) = line.strip_prefix("ID=") {
            id = Some(v.trim_matches('"').to_lowercase());
        } else if let Some(v) = line.strip_prefix("ID_LIKE=") {
            id_like = v
                .trim_matches('"')
                .split_whitespace()
                .map(str::to_lowercase)
                .collect();
        }
    }
    (id, id_like)
}

/// Name by numeric id from `/etc/passwd` or `/etc/group` content
pub fn parse_id_names(content: &str) -> HashMap<u32, String> {
    content
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() >= 3 {
                let id = parts[2].parse::<u32>().ok()?;
                Some((id, parts[0].to_string()))
            } else {
                None
            }
        })
        .collect()
}

/// Process name and real uid from `/proc/<pid>/status`
fn parse_proc_status(status: &str) -> Option<(String, u32)> {
    let mut name = None;
    let mut uid = None;

    for line in status.lines() {
        if let Some(v) = line.strip_prefix("Name:") {
            name = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("Uid:") {
            uid = v.split_whitespace().next().and_then(|u| u.parse().ok());
        }
    }
    Some((name?, uid?))
}

/// Process table from a finished `ps`; a failed run is a probe error, not an empty table
fn ps_table(output: &Output) -> ProbeResult<Vec<ProcessEntry>> {
    if !output.status.success() {
        return Err(ProbeError::Failed {
            target: "process table".into(),
            message: format!(
                "ps exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(parse_ps(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_ps(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse().ok()?;
            let user = parts.next()?;
            let command = parts.collect::<Vec<_>>().join(" ");
            let name = command.rsplit('/').next().unwrap_or(&command).to_string();
            Some(ProcessEntry::new(pid, name, user))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_os_release() {
        let content = "NAME=\"Rocky Linux\"\nID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\nVERSION_ID=\"9.3\"\n";
        let (id, id_like) = parse_os_release(content);
        assert_eq!(id.as_deref(), Some("rocky"));
        assert_eq!(id_like, vec!["rhel", "centos", "fedora"]);
    }

    #[test]
    fn test_parse_id_names() {
        let names = parse_id_names("root:x:0:0:root:/root:/bin/bash\nsyslog:x:104:110::/home/syslog:/usr/sbin/nologin\nbroken\n");
        assert_eq!(names[&0], "root");
        assert_eq!(names[&104], "syslog");
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_parse_proc_status() {
        let status = "Name:\trsyslogd\nUmask:\t0022\nState:\tS (sleeping)\nUid:\t104\t104\t104\t104\n";
        assert_eq!(parse_proc_status(status), Some(("rsyslogd".to_string(), 104)));
        assert_eq!(parse_proc_status("Name:\tx\n"), None);
    }

    #[test]
    fn test_parse_ps() {
        let entries = parse_ps("  1 root     /sbin/launchd\n 97 root     /usr/sbin/syslogd\nbad line\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], ProcessEntry::new(97, "syslogd", "root"));
    }

    #[test]
    fn test_failed_ps_is_an_error() {
        use std::os::unix::process::ExitStatusExt;

        let failed = Output {
            status: std::process::ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: b"ps: illegal option\n".to_vec(),
        };
        let err = ps_table(&failed).unwrap_err();
        assert!(matches!(err, ProbeError::Failed { .. }));
        assert!(err.to_string().contains("illegal option"));

        let ok = Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: b"  1 root /sbin/launchd\n".to_vec(),
            stderr: Vec::new(),
        };
        assert_eq!(ps_table(&ok).unwrap(), vec![ProcessEntry::new(1, "launchd", "root")]);
    }

    #[test]
    fn test_stat_follows_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("rsyslogd");
        fs::write(&target, b"").unwrap();
        let link = dir.path().join("syslogd");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let snapshot = LocalSnapshot::new();
        let stat = snapshot.stat_path(link.to_str().unwrap()).unwrap().unwrap();
        assert_eq!(stat.kind, FileKind::File);
        let stat = snapshot.stat_path(dir.path().to_str().unwrap()).unwrap().unwrap();
        assert_eq!(stat.kind, FileKind::Directory);
    }

    #[test]
    fn test_local_stat_and_read() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"kernel: hello\n").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let snapshot = LocalSnapshot::new();
        let stat = snapshot.stat_path(&path).unwrap().unwrap();
        assert!(stat.is_file());
        assert_eq!(stat.mode, 0o640);
        assert!(!stat.owner.is_empty());
        assert_eq!(snapshot.read_file(&path).unwrap(), b"kernel: hello\n");

        assert_eq!(snapshot.stat_path("/nonexistent/vigil/file").unwrap(), None);
        assert!(matches!(
            snapshot.read_file("/nonexistent/vigil/file"),
            Err(ProbeError::NotFound { .. })
        ));
    }

    #[test]
    fn test_local_process_table_includes_self() {
        let processes = LocalSnapshot::new().list_processes().unwrap();
        let me = std::process::id();
        assert!(processes.iter().any(|p| p.pid == me));
    }
}
