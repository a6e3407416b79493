//! Matcher engine - evaluates one expectation to an outcome
//!
//! Every matcher reduces to a pure comparison between a probed attribute and
//! the expected value. When the attribute cannot be produced the outcome is
//! `error`, never `pass` or `fail`.

use crate::probe::ResourceCache;
use crate::snapshot::FileKind;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use tracing::trace;
use vigil_core::{
    Control, Error, Expectation, Matcher, MatcherError, Outcome, PatternSource, ResolvedInputs,
    Resource, Result,
};

/// Every content pattern of a run, compiled before any control executes
#[derive(Debug, Clone, Default)]
pub struct CompiledPatterns {
    regexes: HashMap<String, Regex>,
}

impl CompiledPatterns {
    /// Compile the literal and input-supplied patterns of `controls`
    pub fn compile<'a>(
        controls: impl IntoIterator<Item = &'a Control>,
        inputs: &ResolvedInputs,
    ) -> Result<Self> {
        let mut regexes = HashMap::new();

        for control in controls {
            for expectation in &control.body {
                let source = match &expectation.matcher {
                    Matcher::ContentMatches(source) | Matcher::ContentNotMatches(source) => source,
                    _ => continue,
                };
                let patterns = patterns_of(source, inputs)
                    .map_err(|e| Error::Configuration(format!("control {}: {}", control.id, e)))?;

                for pattern in patterns {
                    if regexes.contains_key(&pattern) {
                        continue;
                    }
                    let regex = Regex::new(&pattern).map_err(|e| Error::InvalidPattern {
                        control_id: control.id.clone(),
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    })?;
                    regexes.insert(pattern, regex);
                }
            }
        }

        Ok(Self { regexes })
    }

    pub fn len(&self) -> usize {
        self.regexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regexes.is_empty()
    }

    fn get(&self, pattern: &str) -> std::result::Result<&Regex, MatcherError> {
        self.regexes
            .get(pattern)
            .ok_or_else(|| MatcherError::AttributeUnavailable {
                attribute: "pattern",
                target: pattern.to_string(),
                reason: "pattern was not compiled for this run".into(),
            })
    }
}

fn patterns_of(
    source: &PatternSource,
    inputs: &ResolvedInputs,
) -> std::result::Result<Vec<String>, MatcherError> {
    match source {
        PatternSource::Literal(patterns) => Ok(patterns.clone()),
        PatternSource::Input { input } => {
            inputs
                .get_strings(input)
                .ok_or_else(|| MatcherError::AttributeUnavailable {
                    attribute: "patterns",
                    target: format!("input {}", input),
                    reason: "input is not a resolved string or list".into(),
                })
        }
    }
}

/// `actual` grants no permission bit outside `ceiling`
pub fn mode_not_more_permissive_than(actual: u16, ceiling: u16) -> bool {
    actual & !ceiling == 0
}

/// `now - window <= mtime <= now`
pub fn mtime_within(mtime: i64, now: i64, window_secs: u64) -> bool {
    let window = i64::try_from(window_secs).unwrap_or(i64::MAX);
    now.saturating_sub(window) <= mtime && mtime <= now
}

/// Evaluation context shared by every expectation of a run
pub struct MatchContext<'a> {
    pub patterns: &'a CompiledPatterns,
    pub inputs: &'a ResolvedInputs,
}

/// A matcher's verdict before negation
struct Verdict {
    passed: bool,
    message: String,
}

impl Verdict {
    fn new(passed: bool, message: impl Into<String>) -> Self {
        Self {
            passed,
            message: message.into(),
        }
    }
}

/// Evaluate one expectation.
///
/// `negate` inverts the matcher's verdict exactly once, after evaluation. For
/// `content_not_matches` that verdict is already "no pattern matched", so a
/// negated one reads "at least one pattern matched".
pub async fn evaluate(
    expectation: &Expectation,
    ctx: &MatchContext<'_>,
    cache: &mut ResourceCache,
) -> Outcome {
    let label = expectation.to_string();

    match verdict(expectation, ctx, cache).await {
        Ok(v) => {
            let passed = v.passed != expectation.negate;
            trace!("{} -> {} ({})", label, passed, v.message);
            match (passed, expectation.negate) {
                (true, _) => Outcome::pass(label, v.message),
                (false, false) => Outcome::fail(label, v.message),
                (false, true) => Outcome::fail(label, format!("expected the opposite: {}", v.message)),
            }
        }
        Err(e) => {
            trace!("{} -> error ({})", label, e);
            Outcome::error(label, e.to_string())
        }
    }
}

async fn verdict(
    expectation: &Expectation,
    ctx: &MatchContext<'_>,
    cache: &mut ResourceCache,
) -> Result<Verdict> {
    match &expectation.resource {
        Resource::File(path) => file_verdict(path, &expectation.matcher, ctx, cache).await,
        Resource::Processes(name) => process_verdict(name, &expectation.matcher, cache).await,
    }
}

async fn file_verdict(
    path: &str,
    matcher: &Matcher,
    ctx: &MatchContext<'_>,
    cache: &mut ResourceCache,
) -> Result<Verdict> {
    let verdict = match matcher {
        Matcher::Exists => {
            let exists = cache.file(path).await.exists()?;
            Verdict::new(exists, if exists { "exists" } else { "does not exist" })
        }
        Matcher::IsFile => {
            let probe = cache.file(path).await;
            Verdict::new(probe.is_file()?, kind_message(probe.exists()?, "a file"))
        }
        Matcher::IsDirectory => {
            let probe = cache.file(path).await;
            Verdict::new(probe.is_directory()?, kind_message(probe.exists()?, "a directory"))
        }
        Matcher::IsExecutable => {
            let probe = cache.file(path).await;
            Verdict::new(probe.is_executable()?, kind_message(probe.exists()?, "executable"))
        }
        Matcher::OwnedBy(user) => {
            let probe = cache.file(path).await;
            let owner = probe.owner()?;
            Verdict::new(owner == user, format!("owner is {}, expected {}", owner, user))
        }
        Matcher::GroupEquals(group) => {
            let probe = cache.file(path).await;
            let actual = probe.group()?;
            Verdict::new(actual == group, format!("group is {}, expected {}", actual, group))
        }
        Matcher::ModeEquals(mode) => {
            let actual = cache.file(path).await.mode()?;
            Verdict::new(
                actual == mode.bits(),
                format!("mode is {:04o}, expected {}", actual, mode),
            )
        }
        Matcher::ModeNotMorePermissiveThan(ceiling) => {
            let actual = cache.file(path).await.mode()?;
            let passed = mode_not_more_permissive_than(actual, ceiling.bits());
            let message = if passed {
                format!("mode {:04o} is within {}", actual, ceiling)
            } else {
                format!(
                    "mode {:04o} grants {:04o} beyond {}",
                    actual,
                    actual & !ceiling.bits(),
                    ceiling
                )
            };
            Verdict::new(passed, message)
        }
        Matcher::ContentMatches(source) | Matcher::ContentNotMatches(source) => {
            let must_match = matches!(matcher, Matcher::ContentMatches(_));
            // Only regular files are read; a fifo would block the probe thread
            match cache.file(path).await.kind()? {
                Some(FileKind::File) | None => {}
                Some(kind) => {
                    return Err(MatcherError::AttributeUnavailable {
                        attribute: "content",
                        target: path.to_string(),
                        reason: format!("target is a {}", kind.as_str()),
                    }
                    .into())
                }
            }
            let content = cache.content(path).await?;
            content_verdict(&content, source, must_match, ctx)?
        }
        Matcher::MtimeWithin(window) => {
            let mtime = cache.file_fresh(path).await.mtime()?;
            let now = chrono::Utc::now().timestamp();
            Verdict::new(
                mtime_within(mtime, now, *window),
                format!("modified {}s ago, window {}s", now.saturating_sub(mtime), window),
            )
        }
        Matcher::ProcessCount(_) | Matcher::ProcessUsers(_) => {
            return Err(unsupported(matcher, &Resource::File(path.to_string())))
        }
    };
    Ok(verdict)
}

async fn process_verdict(name: &str, matcher: &Matcher, cache: &mut ResourceCache) -> Result<Verdict> {
    let verdict = match matcher {
        Matcher::Exists => {
            let probe = cache.processes(name).await?;
            Verdict::new(
                probe.matching_count > 0,
                format!("matchingCount == {}", probe.matching_count),
            )
        }
        Matcher::ProcessCount(expected) => {
            let probe = cache.processes(name).await?;
            Verdict::new(
                probe.matching_count == *expected,
                format!("matchingCount == {}, expected {}", probe.matching_count, expected),
            )
        }
        Matcher::ProcessUsers(expected) => {
            let probe = cache.processes(name).await?;
            let expected: BTreeSet<String> = expected.iter().cloned().collect();
            Verdict::new(
                probe.users == expected,
                format!(
                    "users {:?}, expected {:?} (matchingCount == {})",
                    probe.users, expected, probe.matching_count
                ),
            )
        }
        _ => return Err(unsupported(matcher, &Resource::Processes(name.to_string()))),
    };
    Ok(verdict)
}

fn content_verdict(
    content: &str,
    source: &PatternSource,
    must_match: bool,
    ctx: &MatchContext<'_>,
) -> Result<Verdict> {
    let patterns = patterns_of(source, ctx.inputs)?;
    let mut offending = Vec::new();

    for pattern in &patterns {
        let regex = ctx.patterns.get(pattern)?;
        if regex.is_match(content) != must_match {
            offending.push(pattern.as_str());
        }
    }

    let verdict = match (must_match, offending.is_empty()) {
        (true, true) => Verdict::new(true, format!("all {} patterns matched", patterns.len())),
        (true, false) => Verdict::new(false, format!("missing patterns: {:?}", offending)),
        (false, true) => Verdict::new(true, format!("none of {} patterns matched", patterns.len())),
        (false, false) => Verdict::new(false, format!("forbidden patterns found: {:?}", offending)),
    };
    Ok(verdict)
}

fn kind_message(exists: bool, what: &str) -> String {
    if exists {
        format!("checked whether path is {}", what)
    } else {
        "path does not exist".to_string()
    }
}

fn unsupported(matcher: &Matcher, resource: &Resource) -> Error {
    MatcherError::UnsupportedResource {
        matcher: matcher.name().to_string(),
        resource: resource.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{MemoryFile, MemorySnapshot};
    use std::sync::Arc;
    use std::time::Duration;
    use vigil_core::{Mode, OutcomeStatus, Value};

    fn snapshot() -> MemorySnapshot {
        MemorySnapshot::new()
            .with_file("/etc/rsyslog.conf", "root", 0o644, "*.* @@logs.example.com:514\n")
            .with_file("/var/log/syslog", "syslog", 0o640, "Oct 19 kernel: booted\n")
            .with_directory("/var/log", "root", 0o755)
            .with_process("rsyslogd", "syslog")
            .with_unreadable("/var/log/syslog")
    }

    fn inputs() -> ResolvedInputs {
        [(
            "patterns".to_string(),
            Value::List(vec!["kernel: ".into(), "sshd".into()]),
        )]
        .into_iter()
        .collect()
    }

    async fn run(snapshot: MemorySnapshot, expectation: Expectation) -> Outcome {
        let inputs = inputs();
        let control = Control::new("test", "test", vigil_core::Impact::from_millis(500))
            .expect(expectation);
        let patterns = CompiledPatterns::compile([&control], &inputs).unwrap();
        let ctx = MatchContext {
            patterns: &patterns,
            inputs: &inputs,
        };
        let mut cache = ResourceCache::new(Arc::new(snapshot), Duration::from_secs(5));
        evaluate(&control.body[0], &ctx, &mut cache).await
    }

    #[test]
    fn test_mode_not_more_permissive_than() {
        assert!(mode_not_more_permissive_than(0o640, 0o644));
        assert!(!mode_not_more_permissive_than(0o644, 0o640));
        assert!(!mode_not_more_permissive_than(0o4755, 0o755));
        // Reflexive, and monotonic in the ceiling
        for mode in [0, 0o600, 0o640, 0o755, 0o7777] {
            assert!(mode_not_more_permissive_than(mode, mode));
            assert!(mode_not_more_permissive_than(mode, mode | 0o022));
        }
        // Bitwise, not numeric: 0o070 is below 0o700 yet outside it
        assert!(!mode_not_more_permissive_than(0o070, 0o700));
    }

    #[test]
    fn test_mtime_within() {
        assert!(mtime_within(1000, 1000, 0));
        assert!(mtime_within(100, 1000, 900));
        assert!(!mtime_within(99, 1000, 900));
        assert!(!mtime_within(1001, 1000, 900));
        assert!(mtime_within(i64::MIN + 1, 0, u64::MAX));
    }

    #[tokio::test]
    async fn test_existence_and_type() {
        let outcome = run(snapshot(), Expectation::file("/var/log", Matcher::IsDirectory)).await;
        assert_eq!(outcome.status, OutcomeStatus::Pass);

        let outcome = run(snapshot(), Expectation::file("/var/log", Matcher::IsFile)).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);

        let outcome = run(snapshot(), Expectation::file("/sbin/rsyslogd", Matcher::IsFile)).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(outcome.message.contains("does not exist"));

        let outcome = run(snapshot(), Expectation::file("/sbin/rsyslogd", Matcher::Exists).negated()).await;
        assert_eq!(outcome.status, OutcomeStatus::Pass);
    }

    #[tokio::test]
    async fn test_absent_attribute_is_error() {
        for matcher in [
            Matcher::OwnedBy("root".into()),
            Matcher::GroupEquals("root".into()),
            Matcher::ModeEquals(Mode(0o644)),
            Matcher::MtimeWithin(900),
            Matcher::ContentMatches(PatternSource::literal(["x"])),
        ] {
            let outcome = run(snapshot(), Expectation::file("/var/log/missing", matcher.clone())).await;
            assert_eq!(outcome.status, OutcomeStatus::Error, "{}", matcher);
            let outcome = run(snapshot(), Expectation::file("/var/log/missing", matcher).negated()).await;
            assert_eq!(outcome.status, OutcomeStatus::Error);
        }
    }

    #[tokio::test]
    async fn test_ownership_and_mode() {
        let outcome = run(snapshot(), Expectation::file("/etc/rsyslog.conf", Matcher::OwnedBy("root".into()))).await;
        assert_eq!(outcome.status, OutcomeStatus::Pass);

        let outcome = run(snapshot(), Expectation::file("/etc/rsyslog.conf", Matcher::ModeEquals(Mode(0o640)))).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(outcome.message.contains("0644"));

        let outcome = run(
            snapshot(),
            Expectation::file("/etc/rsyslog.conf", Matcher::ModeNotMorePermissiveThan(Mode(0o644))),
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Pass);

        let outcome = run(
            snapshot(),
            Expectation::file("/etc/rsyslog.conf", Matcher::OwnedBy("syslog".into())).negated(),
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Pass);
    }

    #[tokio::test]
    async fn test_content_patterns_are_anded() {
        let conf = "/etc/rsyslog.conf";
        let outcome = run(
            snapshot(),
            Expectation::file(conf, Matcher::ContentMatches(PatternSource::literal(["@@", "logs"]))),
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Pass);

        let outcome = run(
            snapshot(),
            Expectation::file(conf, Matcher::ContentMatches(PatternSource::literal(["@@", "kernel: "]))),
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(outcome.message.contains("kernel: "));
        assert!(!outcome.message.contains("@@"));

        let outcome = run(
            snapshot(),
            Expectation::file(conf, Matcher::ContentNotMatches(PatternSource::literal(["kernel: ", "@@"]))),
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    #[tokio::test]
    async fn test_negated_content_does_not_double_invert() {
        let conf = "/etc/rsyslog.conf";
        let not_matches = Expectation::file(conf, Matcher::ContentNotMatches(PatternSource::literal(["@@"])));

        let plain = run(snapshot(), not_matches.clone()).await;
        let negated = run(snapshot(), not_matches.negated()).await;
        assert_eq!(plain.status, OutcomeStatus::Fail);
        assert_eq!(negated.status, OutcomeStatus::Pass);
    }

    #[tokio::test]
    async fn test_negated_pattern_list_inverts_the_whole_verdict() {
        let snapshot = MemorySnapshot::new().with_file("/etc/app.conf", "root", 0o644, "only a here\n");
        let both = PatternSource::literal(["a", "b"]);

        // Not every pattern matches: "b" is missing
        let outcome = run(
            snapshot.clone(),
            Expectation::file("/etc/app.conf", Matcher::ContentMatches(both.clone())).negated(),
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Pass);
        assert!(outcome.message.contains("missing patterns"));

        // At least one pattern matches: "a" is present
        let outcome = run(
            snapshot.clone(),
            Expectation::file("/etc/app.conf", Matcher::ContentNotMatches(both.clone())).negated(),
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Pass);

        let absent = PatternSource::literal(["b", "c"]);
        let outcome = run(
            snapshot,
            Expectation::file("/etc/app.conf", Matcher::ContentNotMatches(absent)).negated(),
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(outcome.message.contains("none of 2 patterns matched"));
    }

    #[tokio::test]
    async fn test_content_from_input() {
        let snapshot = MemorySnapshot::new().with_file("/var/log/messages", "root", 0o600, "kernel: up\n");
        let outcome = run(
            snapshot,
            Expectation::file("/var/log/messages", Matcher::ContentMatches(PatternSource::input("patterns"))),
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(outcome.message.contains("sshd"));
    }

    #[tokio::test]
    async fn test_unreadable_or_directory_content_is_error() {
        let matcher = Matcher::ContentMatches(PatternSource::literal(["kernel: "]));
        let outcome = run(snapshot(), Expectation::file("/var/log/syslog", matcher.clone())).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.message.contains("Permission denied"));

        let outcome = run(snapshot(), Expectation::file("/var/log", matcher.clone())).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.message.contains("directory"));
    }

    #[tokio::test]
    async fn test_special_file_content_is_not_read() {
        let fifo = MemoryFile {
            kind: FileKind::Other,
            ..MemoryFile::file("root", "root", 0o600, "")
        };
        // Stands in for a fifo
        let snapshot = MemorySnapshot::new().with_entry("/run/log.pipe", fifo);
        let matcher = Matcher::ContentMatches(PatternSource::literal(["kernel: "]));

        let outcome = run(snapshot.clone(), Expectation::file("/run/log.pipe", matcher)).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.message.contains("special file"));

        let outcome = run(snapshot, Expectation::file("/run/log.pipe", Matcher::IsFile)).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    #[tokio::test]
    async fn test_mtime_window() {
        let stale = chrono::Utc::now().timestamp() - 3600;
        let snapshot = snapshot()
            .with_entry("/var/log/old", MemoryFile::file("root", "root", 0o640, "").with_mtime(stale));

        let outcome = run(snapshot.clone(), Expectation::file("/var/log/old", Matcher::MtimeWithin(900))).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        let outcome = run(snapshot, Expectation::file("/etc/rsyslog.conf", Matcher::MtimeWithin(900))).await;
        assert_eq!(outcome.status, OutcomeStatus::Pass);
    }

    #[tokio::test]
    async fn test_mtime_at_the_epoch_limits() {
        let snapshot = MemorySnapshot::new()
            .with_entry("/var/log/ancient", MemoryFile::file("root", "root", 0o640, "").with_mtime(i64::MIN))
            .with_entry("/var/log/future", MemoryFile::file("root", "root", 0o640, "").with_mtime(i64::MAX));

        let outcome = run(snapshot.clone(), Expectation::file("/var/log/ancient", Matcher::MtimeWithin(900))).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
        assert!(outcome.message.contains("modified"));

        let outcome = run(snapshot, Expectation::file("/var/log/future", Matcher::MtimeWithin(900))).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    #[tokio::test]
    async fn test_process_matchers() {
        let count = run(snapshot(), Expectation::processes("rsyslogd", Matcher::ProcessCount(1))).await;
        assert_eq!(count.status, OutcomeStatus::Pass);

        let users = run(
            snapshot(),
            Expectation::processes("rsyslogd", Matcher::ProcessUsers(vec!["root".into()])),
        )
        .await;
        assert_eq!(users.status, OutcomeStatus::Fail);

        let absent = run(snapshot(), Expectation::processes("syslogd", Matcher::ProcessCount(1))).await;
        assert_eq!(absent.status, OutcomeStatus::Fail);
        assert!(absent.message.contains("matchingCount == 0"));
    }

    #[tokio::test]
    async fn test_wrong_resource_kind_is_error() {
        let outcome = run(snapshot(), Expectation::processes("rsyslogd", Matcher::IsFile)).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        let outcome = run(snapshot(), Expectation::file("/var/log", Matcher::ProcessCount(1))).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
    }

    #[test]
    fn test_invalid_input_pattern_fails_compilation() {
        let inputs: ResolvedInputs = [("patterns".to_string(), Value::from("(unclosed"))]
            .into_iter()
            .collect();
        let control = Control::new("syslog-6.0", "content", vigil_core::Impact::from_millis(500)).expect(
            Expectation::file("/var/log/syslog", Matcher::ContentMatches(PatternSource::input("patterns"))),
        );
        let err = CompiledPatterns::compile([&control], &inputs).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::InvalidPattern { ref control_id, .. } if control_id == "syslog-6.0"));
    }
}
