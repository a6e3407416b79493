//! Built-in syslog profile
//!
//! Checks that a syslog daemon is installed, running, configured and actively
//! logging. Each control is authored once per platform variant; expected
//! owners and modes are declared per family because they differ between
//! distributions (RedHat keeps `/var/log/messages` at 0600, Debian-family
//! systems hand `/var/log/syslog` to the `syslog` user at 0644).

use crate::ControlRegistry;
use vigil_core::{
    Control, Impact, InputDecl, Matcher, Mode, OsFamily, PatternSource, Predicate, Profile,
    Resource, Result, VirtualizationRole,
};

const IMPACT: Impact = Impact::from_millis(700);
const FORWARDING_IMPACT: Impact = Impact::from_millis(500);

/// Maximum age of the newest log entry, in seconds
pub const LOG_FRESHNESS_WINDOW: u64 = 900;

/// Default rule shape for forwarding to a remote collector (`*.* @@host:port`)
pub const FORWARD_RULE_PATTERN: &str = r"(?m)^\s*[^#\s]\S*\s+@@?\S+";

/// Input names declared by the profile
pub mod inputs {
    pub const SYSLOG_SERVERS: &str = "syslog_servers";
    pub const FORWARD_PATTERNS: &str = "syslog_forward_patterns";
    pub const CONTENT_CHECK: &str = "syslog_content_check";
    pub const CONTENT_PATTERNS: &str = "syslog_content_patterns";
}

fn mode(bits: u16) -> Matcher {
    Matcher::ModeEquals(Mode(bits))
}

fn owned_by(user: &str) -> Matcher {
    Matcher::OwnedBy(user.to_string())
}

fn container_guest() -> Predicate {
    Predicate::all([
        Predicate::VirtualizationRole(VirtualizationRole::Guest),
        Predicate::any(
            ["docker", "lxc", "podman"].map(|s| Predicate::VirtualizationSystem(s.to_string())),
        ),
    ])
}

fn darwin() -> Predicate {
    Predicate::family(OsFamily::Darwin)
}

fn redhat() -> Predicate {
    Predicate::family(OsFamily::Redhat)
}

/// The syslog profile definition
pub fn syslog_profile() -> Profile {
    Profile {
        name: "syslog".into(),
        title: "syslog section".into(),
        inputs: vec![
            InputDecl::new(inputs::SYSLOG_SERVERS, false)
                .with_description("Check that logs are forwarded to central syslog servers"),
            InputDecl::new(inputs::FORWARD_PATTERNS, vec![FORWARD_RULE_PATTERN.to_string()])
                .with_description("Patterns the syslog configuration must contain when forwarding"),
            InputDecl::new(inputs::CONTENT_CHECK, true)
                .with_description("Check that the system log carries expected messages"),
            InputDecl::new(inputs::CONTENT_PATTERNS, vec!["kernel: ".to_string()])
                .with_description("Patterns the system log must contain"),
        ],
        controls: [
            daemon_present(),
            daemon_running(),
            log_files_present(),
            log_files_updated(),
            forwarding_configured(),
            log_content(),
        ]
        .into_iter()
        .flatten()
        .collect(),
    }
}

/// The syslog profile, validated
pub fn syslog_registry() -> Result<ControlRegistry> {
    ControlRegistry::from_profile(syslog_profile())
}

fn daemon_present() -> Vec<Control> {
    let control = |suffix: &str| {
        Control::new(
            format!("syslog-1.0-{}", suffix),
            "syslogd should be present",
            IMPACT,
        )
        .with_description("Ensure syslogd executable and configuration are present")
    };

    vec![
        control("darwin")
            .only_if(darwin())
            .describe(
                Resource::file("/var/log"),
                [Matcher::IsDirectory, owned_by("root"), mode(0o755)],
            )
            .describe(
                Resource::file("/etc/syslog.conf"),
                [
                    Matcher::IsFile,
                    Matcher::ContentMatches(PatternSource::literal([
                        r"install.*\s+@127.0.0.1:32376",
                    ])),
                ],
            )
            .describe(
                Resource::file("/usr/sbin/syslogd"),
                [Matcher::IsFile, Matcher::IsExecutable, owned_by("root")],
            ),
        control("redhat")
            .only_if(redhat())
            .describe(
                Resource::file("/sbin/rsyslogd"),
                [Matcher::IsFile, Matcher::IsExecutable, owned_by("root")],
            )
            .describe(
                Resource::file("/etc/rsyslog.conf"),
                [Matcher::IsFile, owned_by("root"), mode(0o644)],
            ),
        control("suse")
            .only_if(Predicate::family(OsFamily::Suse))
            .describe(
                Resource::file("/sbin/rsyslogd"),
                [
                    Matcher::IsFile,
                    Matcher::IsExecutable,
                    owned_by("root"),
                    mode(0o755),
                ],
            )
            .describe(
                Resource::file("/etc/syslog.conf"),
                [Matcher::IsFile, owned_by("root"), mode(0o640)],
            ),
        control("default")
            .only_if(Predicate::FamilyIn(vec![OsFamily::Debian, OsFamily::Other]))
            .describe(
                Resource::file("/usr/sbin/rsyslogd"),
                [Matcher::IsFile, Matcher::IsExecutable, owned_by("root")],
            ),
    ]
}

fn daemon_running() -> Vec<Control> {
    let control = |id: &str| {
        Control::new(id, "syslogd should be running", IMPACT)
            .with_description("Ensure syslogd is running")
    };

    vec![
        control("syslog-2.0-darwin")
            .only_if(Predicate::all([darwin(), Predicate::not(container_guest())]))
            .describe(
                Resource::processes("syslogd"),
                [
                    Matcher::ProcessUsers(vec!["root".into()]),
                    Matcher::ProcessCount(1),
                ],
            ),
        control("syslog-2.0")
            .only_if(Predicate::all([
                Predicate::not(darwin()),
                Predicate::not(container_guest()),
            ]))
            .describe(
                Resource::processes("rsyslogd"),
                [
                    Matcher::ProcessUsers(vec!["syslog".into()]),
                    Matcher::ProcessCount(1),
                ],
            ),
    ]
}

fn log_files_present() -> Vec<Control> {
    let control = |suffix: &str| {
        Control::new(
            format!("syslog-3.0-{}", suffix),
            "syslogd should have log files",
            IMPACT,
        )
        .with_description("Ensure syslogd logs file are present")
    };

    vec![
        control("darwin")
            .only_if(darwin())
            .describe(
                Resource::file("/var/log/system.log"),
                [
                    Matcher::IsFile,
                    owned_by("root"),
                    mode(0o640),
                    Matcher::ContentMatches(PatternSource::literal([
                        "last message repeated",
                        "WindowServer",
                    ])),
                ],
            )
            .describe(
                Resource::file("/var/log/asl/StoreData"),
                [Matcher::IsFile, owned_by("root"), mode(0o644)],
            ),
        control("redhat").only_if(redhat()).describe(
            Resource::file("/var/log/messages"),
            [Matcher::IsFile, owned_by("root"), mode(0o600)],
        ),
        control("default")
            .only_if(Predicate::not(Predicate::any([darwin(), redhat()])))
            .describe(
                Resource::file("/var/log/syslog"),
                [Matcher::IsFile, owned_by("syslog"), mode(0o644)],
            ),
    ]
}

fn log_files_updated() -> Vec<Control> {
    let control = |suffix: &str, path: &str| {
        Control::new(
            format!("syslog-4.0-{}", suffix),
            "syslogd updated log files",
            IMPACT,
        )
        .with_description(format!(
            "Ensure syslogd logs file were updated less than {}s in the past",
            LOG_FRESHNESS_WINDOW
        ))
        .describe(Resource::file(path), [Matcher::MtimeWithin(LOG_FRESHNESS_WINDOW)])
    };

    vec![
        control("darwin", "/var/log/system.log").only_if(darwin()),
        control("redhat", "/var/log/messages").only_if(redhat()),
        control("default", "/var/log/syslog")
            .only_if(Predicate::not(Predicate::any([darwin(), redhat()]))),
    ]
}

fn forwarding_configured() -> Vec<Control> {
    let control = |suffix: &str, path: &str| {
        Control::new(
            format!("syslog-5.0-{}", suffix),
            "syslogd should forward to central servers",
            FORWARDING_IMPACT,
        )
        .with_description("Ensure the syslog configuration forwards messages to a collector")
        .describe(
            Resource::file(path),
            [
                Matcher::IsFile,
                Matcher::ContentMatches(PatternSource::input(inputs::FORWARD_PATTERNS)),
            ],
        )
    };

    vec![
        control("darwin", "/etc/syslog.conf")
            .only_if(Predicate::all([Predicate::input(inputs::SYSLOG_SERVERS), darwin()])),
        control("default", "/etc/rsyslog.conf").only_if(Predicate::all([
            Predicate::input(inputs::SYSLOG_SERVERS),
            Predicate::not(darwin()),
        ])),
    ]
}

/// Best-effort: the log is read once as it stands; rotation or a quiet host
/// can make this fail without anything being misconfigured.
fn log_content() -> Vec<Control> {
    let control = |suffix: &str, path: &str| {
        Control::new(
            format!("syslog-6.0-{}", suffix),
            "syslogd should be recording system messages",
            IMPACT,
        )
        .with_description("Ensure the system log contains the expected messages")
        .describe(
            Resource::file(path),
            [Matcher::ContentMatches(PatternSource::input(inputs::CONTENT_PATTERNS))],
        )
    };

    vec![
        control("redhat", "/var/log/messages")
            .only_if(Predicate::all([Predicate::input(inputs::CONTENT_CHECK), redhat()])),
        control("default", "/var/log/syslog").only_if(Predicate::all([
            Predicate::input(inputs::CONTENT_CHECK),
            Predicate::not(Predicate::any([darwin(), redhat()])),
        ])),
    ]
}
