//! Platform facts used for control applicability

use serde::{Deserialize, Serialize};

/// Discrete OS family a control can branch on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Darwin,
    Redhat,
    Suse,
    Debian,
    #[default]
    Other,
}

impl OsFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Darwin => "darwin",
            OsFamily::Redhat => "redhat",
            OsFamily::Suse => "suse",
            OsFamily::Debian => "debian",
            OsFamily::Other => "other",
        }
    }
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the host is a virtualization host or a guest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VirtualizationRole {
    Host,
    Guest,
    #[default]
    Unknown,
}

impl VirtualizationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            VirtualizationRole::Host => "host",
            VirtualizationRole::Guest => "guest",
            VirtualizationRole::Unknown => "unknown",
        }
    }
}

/// Facts about the audited system, computed once per run and read-only afterwards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsFacts {
    /// OS family
    pub family: OsFamily,
    /// Virtualization role
    pub virtualization_role: VirtualizationRole,
    /// Virtualization system (docker, kvm, ...), empty when unknown
    #[serde(default)]
    pub virtualization_system: String,
}

impl OsFacts {
    pub fn new(family: OsFamily) -> Self {
        Self {
            family,
            ..Default::default()
        }
    }

    pub fn with_virtualization(mut self, role: VirtualizationRole, system: impl Into<String>) -> Self {
        self.virtualization_role = role;
        self.virtualization_system = system.into();
        self
    }
}

/// Raw platform signals reported by a snapshot provider.
///
/// The OS classifier turns these into [`OsFacts`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSignals {
    /// Platform identifier (`ID` from os-release, or `darwin`/`macos`)
    #[serde(default)]
    pub platform_id: Option<String>,
    /// Related platform identifiers (`ID_LIKE` from os-release)
    #[serde(default)]
    pub id_like: Vec<String>,
    /// Package managers present on the system (rpm, dpkg, zypper, ...)
    #[serde(default)]
    pub package_managers: Vec<String>,
    /// Virtualization role, as reported by the provider
    #[serde(default)]
    pub virtualization_role: Option<String>,
    /// Virtualization system, as reported by the provider
    #[serde(default)]
    pub virtualization_system: Option<String>,
    /// Hostname
    #[serde(default)]
    pub hostname: Option<String>,
}

impl PlatformSignals {
    pub fn with_platform_id(mut self, id: impl Into<String>) -> Self {
        self.platform_id = Some(id.into());
        self
    }

    pub fn with_package_manager(mut self, manager: impl Into<String>) -> Self {
        self.package_managers.push(manager.into());
        self
    }

    pub fn with_virtualization(mut self, role: impl Into<String>, system: impl Into<String>) -> Self {
        self.virtualization_role = Some(role.into());
        self.virtualization_system = Some(system.into());
        self
    }
}
