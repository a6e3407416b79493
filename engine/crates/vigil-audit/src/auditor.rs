//! Auditor - orchestrates control evaluation against a system snapshot

use crate::cancel::CancelToken;
use crate::classifier::classify;
use crate::inputs::resolve_all;
use crate::matcher::{self, CompiledPatterns, MatchContext};
use crate::probe::ResourceCache;
use crate::report::RunReport;
use crate::snapshot::SystemSnapshot;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use vigil_checks::ControlRegistry;
use vigil_core::{
    Control, ControlResult, Error, InputSource, OsFacts, PlatformSignals, ResolvedInputs, Result,
};

/// Scheduling options of a run
#[derive(Debug, Clone)]
pub struct AuditOptions {
    /// Maximum number of controls evaluated at once
    pub concurrency: usize,
    /// Timeout applied to every snapshot query
    pub probe_timeout: Duration,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            probe_timeout: Duration::from_millis(5000),
        }
    }
}

/// Read-only state of one run, shared by every control task
struct RunContext {
    facts: OsFacts,
    inputs: ResolvedInputs,
    patterns: CompiledPatterns,
    snapshot: Arc<dyn SystemSnapshot>,
    probe_timeout: Duration,
}

/// Runs a registry of controls against a system snapshot
pub struct Auditor {
    registry: ControlRegistry,
    snapshot: Arc<dyn SystemSnapshot>,
    options: AuditOptions,
}

impl Auditor {
    pub fn new(registry: ControlRegistry, snapshot: Arc<dyn SystemSnapshot>) -> Self {
        Self {
            registry,
            snapshot,
            options: AuditOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AuditOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &ControlRegistry {
        &self.registry
    }

    /// Platform signals and OS facts of the snapshot
    pub async fn platform(&self) -> Result<(PlatformSignals, OsFacts)> {
        let snapshot = Arc::clone(&self.snapshot);
        let signals = tokio::task::spawn_blocking(move || snapshot.platform_facts())
            .await
            .map_err(|e| Error::Internal(format!("platform probe failed: {}", e)))?;
        let facts = classify(&signals);
        Ok((signals, facts))
    }

    /// Evaluate every control.
    ///
    /// Configuration errors (input overrides, content patterns) abort before
    /// any control runs. Once controls are running, nothing but cancellation
    /// stops the run; a cancelled run still returns the completed results.
    pub async fn run(&self, overrides: &dyn InputSource, cancel: &CancelToken) -> Result<RunReport> {
        let started = Instant::now();
        info!(
            "Starting audit of profile {} ({} controls)",
            self.registry.name(),
            self.registry.len()
        );

        let (signals, facts) = self.platform().await?;
        let inputs = resolve_all(self.registry.inputs(), overrides)?;
        let controls = self.registry.controls();
        let patterns = CompiledPatterns::compile(controls.iter().map(|c| c.as_ref()), &inputs)?;
        debug!("Compiled {} content patterns", patterns.len());

        let ctx = Arc::new(RunContext {
            facts: facts.clone(),
            inputs,
            patterns,
            snapshot: Arc::clone(&self.snapshot),
            probe_timeout: self.options.probe_timeout,
        });

        let mut slots: Vec<Option<ControlResult>> = vec![None; controls.len()];
        let mut spawned = vec![false; controls.len()];
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for (index, control) in controls.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            if !control.applicability.evaluate(&ctx.facts, &ctx.inputs) {
                debug!("Skipping control {} (not applicable)", control.id);
                slots[index] = Some(ControlResult::skipped(control));
                continue;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|e| Error::Internal(format!("scheduler closed: {}", e)))?
                }
                _ = cancel.cancelled() => break,
            };

            let ctx = Arc::clone(&ctx);
            let control = Arc::clone(control);
            let cancel = cancel.clone();
            spawned[index] = true;
            join_set.spawn(async move {
                let _permit = permit;
                (index, evaluate_control(&control, &ctx, &cancel).await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!("Control task failed: {}", e),
            }
        }

        let results: Vec<ControlResult> = slots
            .into_iter()
            .zip(controls)
            .zip(spawned)
            .map(|((slot, control), spawned)| match slot {
                Some(result) => result,
                None if spawned => ControlResult::aborted(control, "evaluation task failed"),
                None => ControlResult::unscheduled(control),
            })
            .collect();

        let report = RunReport::aggregate(results)
            .with_profile(self.registry.name())
            .with_os(facts)
            .with_hostname(signals.hostname);

        let summary = &report.summary;
        if report.cancelled {
            warn!(
                "Audit cancelled: {} controls did not complete",
                summary.cancelled
            );
        }
        info!(
            "Audit complete in {:?}: {} passed, {} failed, {} errors, {} skipped",
            started.elapsed(),
            summary.passed,
            summary.failed,
            summary.errors,
            summary.skipped
        );

        Ok(report)
    }
}

/// Run a control's expectations in order, stopping between expectations on cancellation
async fn evaluate_control(control: &Control, ctx: &RunContext, cancel: &CancelToken) -> ControlResult {
    debug!("Executing control: {} - {}", control.id, control.title);

    let mut cache = ResourceCache::new(Arc::clone(&ctx.snapshot), ctx.probe_timeout);
    let match_ctx = MatchContext {
        patterns: &ctx.patterns,
        inputs: &ctx.inputs,
    };
    let mut outcomes = Vec::with_capacity(control.body.len());

    for expectation in &control.body {
        if cancel.is_cancelled() {
            debug!(
                "Control {} cancelled after {} of {} expectations",
                control.id,
                outcomes.len(),
                control.body.len()
            );
            return ControlResult::cancelled(control, outcomes);
        }
        outcomes.push(matcher::evaluate(expectation, &match_ctx, &mut cache).await);
    }

    let result = ControlResult::evaluated(control, outcomes);
    debug!("Control {} finished: {}", control.id, result.status);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemorySnapshot;
    use vigil_core::{ControlStatus, Expectation, Impact, InputDecl, Matcher, NoOverrides, Predicate};

    fn registry() -> ControlRegistry {
        let mut registry = ControlRegistry::new("test");
        registry.declare_input(InputDecl::new("enabled", false)).unwrap();
        registry
            .register(
                Control::new("present", "config present", Impact::from_millis(700))
                    .expect(Expectation::file("/etc/rsyslog.conf", Matcher::IsFile)),
            )
            .unwrap();
        registry
            .register(
                Control::new("gated", "gated", Impact::from_millis(500))
                    .only_if(Predicate::input("enabled"))
                    .expect(Expectation::file("/etc/rsyslog.conf", Matcher::IsFile)),
            )
            .unwrap();
        registry
            .register(Control::new("empty", "no expectations", Impact::from_millis(100)))
            .unwrap();
        registry
    }

    fn snapshot() -> Arc<dyn SystemSnapshot> {
        Arc::new(MemorySnapshot::new().with_file("/etc/rsyslog.conf", "root", 0o644, ""))
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let auditor = Auditor::new(ControlRegistry::new("empty"), snapshot());
        let report = auditor.run(&NoOverrides, &CancelToken::new()).await.unwrap();
        assert_eq!(report.summary.total, 0);
        assert_eq!(report.summary.passed, 0);
        assert_eq!(report.summary.failed, 0);
    }

    #[tokio::test]
    async fn test_skip_and_order() {
        let auditor = Auditor::new(registry(), snapshot()).with_options(AuditOptions {
            concurrency: 2,
            ..Default::default()
        });
        let report = auditor.run(&NoOverrides, &CancelToken::new()).await.unwrap();

        let ids: Vec<&str> = report.controls.iter().map(|r| r.control_id.as_str()).collect();
        assert_eq!(ids, vec!["present", "gated", "empty"]);
        assert_eq!(report.controls[0].status, ControlStatus::Pass);
        assert_eq!(report.controls[1].status, ControlStatus::Skipped);
        assert!(report.controls[1].outcomes.is_empty());
        // No expectations on this platform is not a failure
        assert_eq!(report.controls[2].status, ControlStatus::Pass);
        assert_eq!(report.profile, "test");
    }

    #[tokio::test]
    async fn test_override_type_mismatch_aborts() {
        let auditor = Auditor::new(registry(), snapshot());
        let overrides: std::collections::BTreeMap<String, vigil_core::Value> =
            [("enabled".to_string(), vigil_core::Value::from("yes"))].into_iter().collect();

        let err = auditor.run(&overrides, &CancelToken::new()).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = Auditor::new(registry(), snapshot())
            .run(&NoOverrides, &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.summary.cancelled, 3);
        assert!(report.controls.iter().all(|r| r.outcomes.is_empty()));
    }
}
