//! End-to-end runs of the built-in syslog profile against in-memory snapshots

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use vigil_audit::{AuditOptions, Auditor, CancelToken, MemorySnapshot, RunReport};
use vigil_checks::{parse_profile, syslog_registry, ControlRegistry};
use vigil_core::{
    ControlResult, ControlStatus, NoOverrides, OsFamily, OutcomeStatus, PlatformSignals, Value,
};

fn debian_host() -> MemorySnapshot {
    MemorySnapshot::new()
        .with_platform(PlatformSignals {
            platform_id: Some("ubuntu".into()),
            hostname: Some("log-1".into()),
            ..Default::default()
        })
        .with_file("/usr/sbin/rsyslogd", "root", 0o755, "")
        .with_file("/etc/rsyslog.conf", "root", 0o644, "*.* @@logs.example.com:514\n")
        .with_file(
            "/var/log/syslog",
            "syslog",
            0o644,
            "Oct 19 10:00:00 log-1 kernel: Linux version 6.1\n",
        )
        .with_process("rsyslogd", "syslog")
}

fn redhat_host() -> MemorySnapshot {
    MemorySnapshot::new()
        .with_platform(PlatformSignals::default().with_platform_id("rhel"))
        .with_file("/sbin/rsyslogd", "root", 0o755, "")
        .with_file("/etc/rsyslog.conf", "root", 0o644, "")
}

async fn audit(snapshot: MemorySnapshot) -> RunReport {
    audit_with(snapshot, &NoOverrides).await
}

async fn audit_with(snapshot: MemorySnapshot, overrides: &dyn vigil_core::InputSource) -> RunReport {
    Auditor::new(syslog_registry().unwrap(), Arc::new(snapshot))
        .run(overrides, &CancelToken::new())
        .await
        .unwrap()
}

fn control<'a>(report: &'a RunReport, id: &str) -> &'a ControlResult {
    report
        .controls
        .iter()
        .find(|r| r.control_id == id)
        .unwrap_or_else(|| panic!("no result for {}", id))
}

#[tokio::test]
async fn test_compliant_debian_host() {
    let report = audit(debian_host()).await;

    assert_eq!(report.os.family, OsFamily::Debian);
    assert_eq!(report.hostname.as_deref(), Some("log-1"));
    assert_eq!(report.summary.total, 16);
    assert_eq!(report.summary.passed, 5);
    assert_eq!(report.summary.skipped, 11);
    assert_eq!(report.summary.score, 0.0);
    assert!(report.is_compliant());
}

#[tokio::test]
async fn test_scenario_a_redhat_config_passes() {
    let report = audit(redhat_host()).await;

    let result = control(&report, "syslog-1.0-redhat");
    assert_eq!(result.status, ControlStatus::Pass);
    assert!(result
        .outcomes
        .iter()
        .any(|o| o.expectation.contains("/etc/rsyslog.conf") && o.expectation.contains("mode_equals 0644")));
    assert_eq!(control(&report, "syslog-1.0-default").status, ControlStatus::Skipped);
}

#[tokio::test]
async fn test_scenario_b_missing_daemon_fails() {
    let mut snapshot = debian_host();
    snapshot.processes.clear();
    let report = audit(snapshot).await;

    let result = control(&report, "syslog-2.0");
    assert_eq!(result.status, ControlStatus::Fail);
    assert!(result
        .outcomes
        .iter()
        .any(|o| o.status == OutcomeStatus::Fail && o.message.contains("matchingCount == 0")));
    assert_eq!(control(&report, "syslog-2.0-darwin").status, ControlStatus::Skipped);
}

#[tokio::test]
async fn test_scenario_c_forwarding_skipped_by_default() {
    let report = audit(debian_host()).await;
    for id in ["syslog-5.0-darwin", "syslog-5.0-default"] {
        let result = control(&report, id);
        assert_eq!(result.status, ControlStatus::Skipped);
        assert!(!result.applicable);
        assert!(result.outcomes.is_empty());
    }

    let overrides: BTreeMap<String, Value> =
        [("syslog_servers".to_string(), Value::Bool(true))].into_iter().collect();
    let report = audit_with(debian_host(), &overrides).await;
    assert_eq!(control(&report, "syslog-5.0-default").status, ControlStatus::Pass);
    assert_eq!(control(&report, "syslog-5.0-darwin").status, ControlStatus::Skipped);
}

#[tokio::test]
async fn test_scenario_d_missing_log_content_fails() {
    let snapshot = debian_host().with_file("/var/log/syslog", "syslog", 0o644, "Oct 19 sshd[1]: started\n");
    let report = audit(snapshot).await;

    let result = control(&report, "syslog-6.0-default");
    assert_eq!(result.status, ControlStatus::Fail);
    assert_eq!(result.outcomes.len(), 1);
    assert!(result.outcomes[0].message.contains("kernel: "));
    // The same file still satisfies the ownership checks
    assert_eq!(control(&report, "syslog-3.0-default").status, ControlStatus::Pass);
}

#[tokio::test]
async fn test_content_patterns_from_overrides() {
    let overrides: BTreeMap<String, Value> = [(
        "syslog_content_patterns".to_string(),
        Value::List(vec!["Linux version".into()]),
    )]
    .into_iter()
    .collect();
    let report = audit_with(debian_host(), &overrides).await;
    assert_eq!(control(&report, "syslog-6.0-default").status, ControlStatus::Pass);

    let overrides: BTreeMap<String, Value> =
        [("syslog_content_check".to_string(), Value::Bool(false))].into_iter().collect();
    let report = audit_with(debian_host(), &overrides).await;
    assert_eq!(control(&report, "syslog-6.0-default").status, ControlStatus::Skipped);
}

#[tokio::test]
async fn test_invalid_override_pattern_aborts_before_any_control() {
    let overrides: BTreeMap<String, Value> = [(
        "syslog_content_patterns".to_string(),
        Value::List(vec!["kernel: (".into()]),
    )]
    .into_iter()
    .collect();

    let err = Auditor::new(syslog_registry().unwrap(), Arc::new(debian_host()))
        .run(&overrides, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.code(), "INVALID_PATTERN");
}

#[tokio::test]
async fn test_probe_error_does_not_abort_the_run() {
    let report = audit(debian_host().with_unreadable("/var/log/syslog")).await;

    let result = control(&report, "syslog-6.0-default");
    assert_eq!(result.status, ControlStatus::Error);
    assert_eq!(result.outcomes[0].status, OutcomeStatus::Error);
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.passed, 4);
    // Errors count toward the score, and are not failures
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.score, 0.7);
}

#[tokio::test]
async fn test_skipped_controls_have_no_outcomes() {
    for snapshot in [debian_host(), redhat_host(), MemorySnapshot::new()] {
        let report = audit(snapshot).await;
        for result in &report.controls {
            if !result.applicable {
                assert_eq!(result.status, ControlStatus::Skipped);
                assert!(result.outcomes.is_empty());
            }
        }
    }
}

#[tokio::test]
async fn test_container_guest_skips_process_checks() {
    let mut snapshot = debian_host();
    snapshot.processes.clear();
    snapshot.platform = snapshot.platform.clone().with_virtualization("guest", "docker");

    let report = audit(snapshot).await;
    assert_eq!(control(&report, "syslog-2.0").status, ControlStatus::Skipped);
    assert!(report.is_compliant());
}

#[tokio::test]
async fn test_probe_timeout_is_error_outcome() {
    let snapshot = debian_host().with_stall(Duration::from_millis(200));
    let report = Auditor::new(syslog_registry().unwrap(), Arc::new(snapshot))
        .with_options(AuditOptions {
            concurrency: 8,
            probe_timeout: Duration::from_millis(20),
        })
        .run(&NoOverrides, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.summary.errors, 5);
    for result in report.controls.iter().filter(|r| r.applicable) {
        assert_eq!(result.status, ControlStatus::Error);
        assert!(result.outcomes.iter().all(|o| o.message.contains("timed out")));
    }
}

#[tokio::test]
async fn test_cancellation_keeps_completed_results() {
    let snapshot = debian_host().with_stall(Duration::from_millis(50));
    let auditor = Auditor::new(syslog_registry().unwrap(), Arc::new(snapshot)).with_options(AuditOptions {
        concurrency: 1,
        probe_timeout: Duration::from_secs(5),
    });
    let cancel = CancelToken::new();

    let stopper = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        })
    };
    let report = auditor.run(&NoOverrides, &cancel).await.unwrap();
    stopper.await.unwrap();

    assert!(report.cancelled);
    assert!(report.summary.cancelled >= 1);
    assert!(report.ensure_complete().is_err());
    assert_eq!(report.controls.len(), 16);
    assert_eq!(report.controls[0].control_id, "syslog-1.0-darwin");
    for result in &report.controls {
        if result.status == ControlStatus::Cancelled {
            assert!(result.outcomes.iter().all(|o| o.status == OutcomeStatus::Pass));
            if !result.applicable {
                assert!(result.outcomes.is_empty());
            }
        }
    }
}

#[tokio::test]
async fn test_yaml_profile_run() {
    let profile = parse_profile(
        r#"
name: forwarding
inputs:
  - name: collector
    default: logs.example.com
controls:
  - id: forward-1
    impact: 0.5
    title: rsyslog forwards to the collector
    only_if: { family_in: [debian, redhat] }
    body:
      - resource: { file: /etc/rsyslog.conf }
        matcher: { content_matches: { input: collector } }
      - resource: { file: /etc/rsyslog.conf }
        matcher: { mode_not_more_permissive_than: "0644" }
      - resource: { file: /etc/rsyslog.conf }
        matcher: { owned_by: syslog }
        negate: true
"#,
    )
    .unwrap();
    let registry = ControlRegistry::from_profile(profile).unwrap();

    let report = Auditor::new(registry, Arc::new(debian_host()))
        .run(&NoOverrides, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.profile, "forwarding");
    assert_eq!(report.controls[0].status, ControlStatus::Pass);
    assert_eq!(report.controls[0].outcomes.len(), 3);
}
