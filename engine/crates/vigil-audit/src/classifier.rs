//! OS classifier - turns raw platform signals into run-wide OS facts

use tracing::debug;
use vigil_core::{OsFacts, OsFamily, PlatformSignals, VirtualizationRole};

/// Classify a system from its platform signals.
///
/// The platform identifier wins over `ID_LIKE`, which wins over package
/// manager heuristics. Anything unrecognized is [`OsFamily::Other`].
pub fn classify(signals: &PlatformSignals) -> OsFacts {
    let family = signals
        .platform_id
        .as_deref()
        .and_then(family_from_id)
        .or_else(|| signals.id_like.iter().find_map(|id| family_from_id(id)))
        .or_else(|| family_from_package_managers(&signals.package_managers))
        .unwrap_or(OsFamily::Other);

    let role = match signals.virtualization_role.as_deref().map(str::trim) {
        Some(r) if r.eq_ignore_ascii_case("guest") => VirtualizationRole::Guest,
        Some(r) if r.eq_ignore_ascii_case("host") => VirtualizationRole::Host,
        _ => VirtualizationRole::Unknown,
    };
    let system = signals
        .virtualization_system
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();

    debug!(
        "Classified platform {:?} as {} (virtualization {} {})",
        signals.platform_id,
        family,
        role.as_str(),
        system
    );
    OsFacts::new(family).with_virtualization(role, system)
}

fn family_from_id(id: &str) -> Option<OsFamily> {
    let id = id.trim().trim_matches('"').to_lowercase();
    let family = match id.as_str() {
        "darwin" | "macos" | "mac_os_x" | "osx" => OsFamily::Darwin,
        "rhel" | "redhat" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" | "oracle"
        | "amzn" | "scientific" => OsFamily::Redhat,
        "sles" | "sled" | "suse" => OsFamily::Suse,
        s if s.starts_with("opensuse") => OsFamily::Suse,
        "debian" | "ubuntu" | "linuxmint" | "raspbian" | "kali" | "pop" => OsFamily::Debian,
        _ => return None,
    };
    Some(family)
}

fn family_from_package_managers(managers: &[String]) -> Option<OsFamily> {
    let has = |name: &str| managers.iter().any(|m| m.eq_ignore_ascii_case(name));

    // zypper systems also ship rpm
    if has("zypper") {
        Some(OsFamily::Suse)
    } else if has("dnf") || has("yum") || has("rpm") {
        Some(OsFamily::Redhat)
    } else if has("dpkg") || has("apt") || has("apt-get") {
        Some(OsFamily::Debian)
    } else {
        None
    }
}
