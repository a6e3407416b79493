//! Control definitions - the declarative checks a profile is made of

use crate::inputs::{InputDecl, ResolvedInputs, Value};
use crate::platform::{OsFacts, OsFamily, VirtualizationRole};
use crate::severity::Impact;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A named compliance check composed of expectations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Control {
    /// Unique control ID
    pub id: String,
    /// Severity weight in `[0, 1]`
    pub impact: Impact,
    /// Control title
    pub title: String,
    /// Description
    #[serde(default, alias = "desc")]
    pub description: String,
    /// Predicate deciding whether the control runs at all
    #[serde(default, alias = "only_if")]
    pub applicability: Predicate,
    /// Expectations, evaluated in declaration order
    #[serde(default)]
    pub body: Vec<Expectation>,
}

impl Control {
    pub fn new(id: impl Into<String>, title: impl Into<String>, impact: Impact) -> Self {
        Self {
            id: id.into(),
            impact,
            title: title.into(),
            description: String::new(),
            applicability: Predicate::Always,
            body: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn only_if(mut self, predicate: Predicate) -> Self {
        self.applicability = predicate;
        self
    }

    pub fn expect(mut self, expectation: Expectation) -> Self {
        self.body.push(expectation);
        self
    }

    /// Add several expectations against the same resource
    pub fn describe(mut self, resource: Resource, matchers: impl IntoIterator<Item = Matcher>) -> Self {
        for matcher in matchers {
            self.body.push(Expectation::new(resource.clone(), matcher));
        }
        self
    }
}

/// An ordered set of controls plus the inputs they may consult
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub inputs: Vec<InputDecl>,
    #[serde(default)]
    pub controls: Vec<Control>,
}

/// The thing an expectation probes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// A path on the system
    File(String),
    /// All processes whose name equals the filter
    Processes(String),
}

impl Resource {
    pub fn file(path: impl Into<String>) -> Self {
        Resource::File(path.into())
    }

    pub fn processes(name: impl Into<String>) -> Self {
        Resource::Processes(name.into())
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::File(path) => write!(f, "file({})", path),
            Resource::Processes(name) => write!(f, "processes({})", name),
        }
    }
}

/// Unix permission bits.
///
/// Serialized as an octal string (`"0644"`); a bare integer is taken as the
/// numeric value, so YAML authors should quote modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode(pub u16);

impl Mode {
    pub const MAX: u16 = 0o7777;

    pub fn bits(&self) -> u16 {
        self.0
    }

    /// Parse an octal mode string such as `0644`, `644` or `0o644`
    pub fn parse(s: &str) -> Option<Self> {
        let digits = s.trim().trim_start_matches("0o");
        let bits = u16::from_str_radix(digits, 8).ok()?;
        (bits <= Self::MAX).then_some(Mode(bits))
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Octal(String),
            Bits(u16),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Octal(s) => Mode::parse(&s)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid octal mode: {:?}", s))),
            Raw::Bits(bits) if bits <= Mode::MAX => Ok(Mode(bits)),
            Raw::Bits(bits) => Err(serde::de::Error::custom(format!(
                "mode {:o} exceeds {:o}",
                bits,
                Mode::MAX
            ))),
        }
    }
}

/// Where a content matcher takes its patterns from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternSource {
    /// Patterns written into the control
    Literal(Vec<String>),
    /// Patterns taken from a string or list input
    Input { input: String },
}

impl PatternSource {
    pub fn literal<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PatternSource::Literal(patterns.into_iter().map(Into::into).collect())
    }

    pub fn input(name: impl Into<String>) -> Self {
        PatternSource::Input { input: name.into() }
    }
}

/// The fixed matcher vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    Exists,
    IsFile,
    IsDirectory,
    IsExecutable,
    OwnedBy(String),
    GroupEquals(String),
    ModeEquals(Mode),
    /// Every bit set in the actual mode must also be set in the ceiling
    ModeNotMorePermissiveThan(Mode),
    /// Every pattern must match the file content
    ContentMatches(PatternSource),
    /// No pattern may match the file content
    ContentNotMatches(PatternSource),
    /// `now - window <= mtime <= now`, window in seconds
    MtimeWithin(u64),
    /// Number of matching processes equals the value
    ProcessCount(usize),
    /// Distinct owners of matching processes equal the set
    ProcessUsers(Vec<String>),
}

impl Matcher {
    /// Matcher name as used in profiles
    pub fn name(&self) -> &'static str {
        match self {
            Matcher::Exists => "exists",
            Matcher::IsFile => "is_file",
            Matcher::IsDirectory => "is_directory",
            Matcher::IsExecutable => "is_executable",
            Matcher::OwnedBy(_) => "owned_by",
            Matcher::GroupEquals(_) => "group_equals",
            Matcher::ModeEquals(_) => "mode_equals",
            Matcher::ModeNotMorePermissiveThan(_) => "mode_not_more_permissive_than",
            Matcher::ContentMatches(_) => "content_matches",
            Matcher::ContentNotMatches(_) => "content_not_matches",
            Matcher::MtimeWithin(_) => "mtime_within",
            Matcher::ProcessCount(_) => "process_count",
            Matcher::ProcessUsers(_) => "process_users",
        }
    }

    /// Input referenced by the matcher, if any
    pub fn input(&self) -> Option<&str> {
        match self {
            Matcher::ContentMatches(PatternSource::Input { input })
            | Matcher::ContentNotMatches(PatternSource::Input { input }) => Some(input),
            _ => None,
        }
    }
}

impl std::fmt::Display for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Matcher::OwnedBy(v) | Matcher::GroupEquals(v) => write!(f, "{} {}", self.name(), v),
            Matcher::ModeEquals(m) | Matcher::ModeNotMorePermissiveThan(m) => {
                write!(f, "{} {}", self.name(), m)
            }
            Matcher::ContentMatches(PatternSource::Literal(p))
            | Matcher::ContentNotMatches(PatternSource::Literal(p)) => {
                write!(f, "{} {:?}", self.name(), p)
            }
            Matcher::ContentMatches(PatternSource::Input { input })
            | Matcher::ContentNotMatches(PatternSource::Input { input }) => {
                write!(f, "{} input({})", self.name(), input)
            }
            Matcher::MtimeWithin(secs) => write!(f, "{} {}s", self.name(), secs),
            Matcher::ProcessCount(n) => write!(f, "{} {}", self.name(), n),
            Matcher::ProcessUsers(users) => write!(f, "{} {:?}", self.name(), users),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// A single matcher applied to one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    pub resource: Resource,
    pub matcher: Matcher,
    #[serde(default)]
    pub negate: bool,
}

impl Expectation {
    pub fn new(resource: Resource, matcher: Matcher) -> Self {
        Self {
            resource,
            matcher,
            negate: false,
        }
    }

    pub fn file(path: impl Into<String>, matcher: Matcher) -> Self {
        Self::new(Resource::file(path), matcher)
    }

    pub fn processes(name: impl Into<String>, matcher: Matcher) -> Self {
        Self::new(Resource::processes(name), matcher)
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }
}

impl std::fmt::Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.negate {
            write!(f, "{} not {}", self.resource, self.matcher)
        } else {
            write!(f, "{} {}", self.resource, self.matcher)
        }
    }
}

/// Applicability predicate over platform facts and resolved inputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    #[default]
    Always,
    Family(OsFamily),
    FamilyIn(Vec<OsFamily>),
    VirtualizationRole(VirtualizationRole),
    VirtualizationSystem(String),
    /// A bool input is true
    Input(String),
    InputEquals { input: String, value: Value },
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn family(family: OsFamily) -> Self {
        Predicate::Family(family)
    }

    pub fn input(name: impl Into<String>) -> Self {
        Predicate::Input(name.into())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::All(predicates.into_iter().collect())
    }

    pub fn any(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::Any(predicates.into_iter().collect())
    }

    /// Evaluate against the run's facts and inputs
    pub fn evaluate(&self, facts: &OsFacts, inputs: &ResolvedInputs) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Family(family) => facts.family == *family,
            Predicate::FamilyIn(families) => families.contains(&facts.family),
            Predicate::VirtualizationRole(role) => facts.virtualization_role == *role,
            Predicate::VirtualizationSystem(system) => {
                facts.virtualization_system.eq_ignore_ascii_case(system)
            }
            Predicate::Input(name) => inputs.get_bool(name).unwrap_or(false),
            Predicate::InputEquals { input, value } => inputs.get(input) == Some(value),
            Predicate::Not(inner) => !inner.evaluate(facts, inputs),
            Predicate::All(preds) => preds.iter().all(|p| p.evaluate(facts, inputs)),
            Predicate::Any(preds) => preds.iter().any(|p| p.evaluate(facts, inputs)),
        }
    }

    /// Visit every leaf that reads an input
    pub fn input_refs(&self) -> Vec<InputRef<'_>> {
        let mut refs = Vec::new();
        self.collect_input_refs(&mut refs);
        refs
    }

    fn collect_input_refs<'a>(&'a self, refs: &mut Vec<InputRef<'a>>) {
        match self {
            Predicate::Input(name) => refs.push(InputRef::Bool(name)),
            Predicate::InputEquals { input, value } => refs.push(InputRef::Equals(input, value)),
            Predicate::Not(inner) => inner.collect_input_refs(refs),
            Predicate::All(preds) | Predicate::Any(preds) => {
                for p in preds {
                    p.collect_input_refs(refs);
                }
            }
            _ => {}
        }
    }
}

/// How a predicate reads an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRef<'a> {
    /// Read as a bool
    Bool(&'a str),
    /// Compared against a value
    Equals(&'a str, &'a Value),
}
