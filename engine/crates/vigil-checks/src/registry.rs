//! Control registry - validated, ordered index of a profile's controls

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use vigil_core::{
    Control, Error, InputDecl, InputRef, Matcher, PatternSource, Profile, Result, Severity,
};

/// Registry of the controls and inputs of one profile.
///
/// Every control is validated when it is registered, so a registry that was
/// built successfully can be evaluated without configuration errors coming
/// from the control definitions themselves.
#[derive(Debug, Clone, Default)]
pub struct ControlRegistry {
    name: String,
    /// Declared inputs, in declaration order
    inputs: Vec<InputDecl>,
    /// Controls in registration order
    controls: Vec<Arc<Control>>,
    /// Control position indexed by ID
    index: HashMap<String, usize>,
}

impl ControlRegistry {
    /// Create a new empty registry
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build a registry from a profile, declaring every input before any control
    pub fn from_profile(profile: Profile) -> Result<Self> {
        let mut registry = Self::new(profile.name);
        for input in profile.inputs {
            registry.declare_input(input)?;
        }
        for control in profile.controls {
            registry.register(control)?;
        }
        Ok(registry)
    }

    /// Merge another profile into this registry
    pub fn extend(&mut self, profile: Profile) -> Result<()> {
        for input in profile.inputs {
            self.declare_input(input)?;
        }
        for control in profile.controls {
            self.register(control)?;
        }
        Ok(())
    }

    /// Declare an input
    pub fn declare_input(&mut self, input: InputDecl) -> Result<()> {
        if self.input(&input.name).is_some() {
            return Err(Error::DuplicateInput { name: input.name });
        }
        self.inputs.push(input);
        Ok(())
    }

    /// Validate and register a control
    pub fn register(&mut self, control: Control) -> Result<()> {
        if self.index.contains_key(&control.id) {
            return Err(Error::DuplicateControl {
                control_id: control.id,
            });
        }

        self.validate_predicate(&control)?;
        self.validate_expectations(&control)?;

        debug!(
            "Registered control {} ({} expectations)",
            control.id,
            control.body.len()
        );
        self.index.insert(control.id.clone(), self.controls.len());
        self.controls.push(Arc::new(control));
        Ok(())
    }

    fn validate_predicate(&self, control: &Control) -> Result<()> {
        for input_ref in control.applicability.input_refs() {
            match input_ref {
                InputRef::Bool(name) => {
                    let decl = self.declared(control, name)?;
                    if decl.declared_default.as_bool().is_none() {
                        return Err(Error::InvalidPredicate {
                            control_id: control.id.clone(),
                            message: format!(
                                "input {} is a {}, not a bool",
                                name,
                                decl.declared_default.type_name()
                            ),
                        });
                    }
                }
                InputRef::Equals(name, value) => {
                    let decl = self.declared(control, name)?;
                    if !decl.declared_default.same_type(value) {
                        return Err(Error::InvalidPredicate {
                            control_id: control.id.clone(),
                            message: format!(
                                "input {} is a {}, compared against a {}",
                                name,
                                decl.declared_default.type_name(),
                                value.type_name()
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_expectations(&self, control: &Control) -> Result<()> {
        for expectation in &control.body {
            match &expectation.matcher {
                Matcher::ContentMatches(PatternSource::Literal(patterns))
                | Matcher::ContentNotMatches(PatternSource::Literal(patterns)) => {
                    for pattern in patterns {
                        validate_pattern(&control.id, pattern)?;
                    }
                }
                Matcher::ContentMatches(PatternSource::Input { input })
                | Matcher::ContentNotMatches(PatternSource::Input { input }) => {
                    let decl = self.declared(control, input)?;
                    if decl.declared_default.as_strings().is_none() {
                        return Err(Error::InputTypeMismatch {
                            name: input.clone(),
                            expected: "string or list",
                            actual: decl.declared_default.type_name(),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn declared(&self, control: &Control, name: &str) -> Result<&InputDecl> {
        self.input(name).ok_or_else(|| Error::UnknownInput {
            control_id: control.id.clone(),
            input: name.to_string(),
        })
    }

    /// Profile name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a control by ID
    pub fn get(&self, id: &str) -> Option<Arc<Control>> {
        self.index.get(id).map(|&i| Arc::clone(&self.controls[i]))
    }

    /// Get an input declaration by name
    pub fn input(&self, name: &str) -> Option<&InputDecl> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// All declared inputs
    pub fn inputs(&self) -> &[InputDecl] {
        &self.inputs
    }

    /// All controls in registration order
    pub fn controls(&self) -> &[Arc<Control>] {
        &self.controls
    }

    /// All control IDs in registration order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.controls.iter().map(|c| c.id.as_str())
    }

    /// Get number of registered controls
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Keep only controls at or above a severity
    pub fn retain_min_severity(&mut self, min_severity: Severity) {
        self.controls
            .retain(|c| Severity::from_impact(c.impact) >= min_severity);
        self.reindex();
    }

    /// Keep only the listed controls
    pub fn retain_ids(&mut self, ids: &[String]) {
        self.controls.retain(|c| ids.iter().any(|id| *id == c.id));
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index = self
            .controls
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
    }
}

fn validate_pattern(control_id: &str, pattern: &str) -> Result<()> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| Error::InvalidPattern {
            control_id: control_id.to_string(),
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}
