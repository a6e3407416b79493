//! Input declarations and values

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A typed input value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    String(String),
    List(Vec<String>),
}

impl Value {
    /// Name of the value's type, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Whether `other` carries the same type as `self`
    pub fn same_type(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// String and list values as a list of strings
    pub fn as_strings(&self) -> Option<Vec<String>> {
        match self {
            Value::String(s) => Some(vec![s.clone()]),
            Value::List(items) => Some(items.clone()),
            Value::Bool(_) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{:?}", s),
            Value::List(items) => write!(f, "{:?}", items),
        }
    }
}

/// A named, defaulted input that controls may consult
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDecl {
    /// Unique input name
    pub name: String,
    /// Value used when no override is supplied
    #[serde(rename = "default")]
    pub declared_default: Value,
    /// Description
    #[serde(default)]
    pub description: String,
}

impl InputDecl {
    pub fn new(name: impl Into<String>, declared_default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            declared_default: declared_default.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }
}

/// Input values resolved for one run. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedInputs(BTreeMap<String, Value>);

impl ResolvedInputs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_strings(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).and_then(Value::as_strings)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for ResolvedInputs {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// External source of input overrides
pub trait InputSource: Send + Sync {
    /// Override for `name`, if one is supplied
    fn get(&self, name: &str) -> Option<Value>;

    /// Names of every supplied override
    fn names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// An override source that never overrides anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverrides;

impl InputSource for NoOverrides {
    fn get(&self, _name: &str) -> Option<Value> {
        None
    }
}

impl InputSource for HashMap<String, Value> {
    fn get(&self, name: &str) -> Option<Value> {
        HashMap::get(self, name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }
}

impl InputSource for BTreeMap<String, Value> {
    fn get(&self, name: &str) -> Option<Value> {
        BTreeMap::get(self, name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_untagged_deserialize() {
        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));
        let v: Value = serde_json::from_str("\"root\"").unwrap();
        assert_eq!(v, Value::String("root".into()));
        let v: Value = serde_json::from_str("[\"a\", \"b\"]").unwrap();
        assert_eq!(v, Value::List(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_same_type() {
        assert!(Value::Bool(true).same_type(&Value::Bool(false)));
        assert!(!Value::Bool(true).same_type(&Value::String("true".into())));
    }

    #[test]
    fn test_hashmap_source() {
        let mut overrides = HashMap::new();
        overrides.insert("syslog_servers".to_string(), Value::Bool(true));
        assert_eq!(
            InputSource::get(&overrides, "syslog_servers"),
            Some(Value::Bool(true))
        );
        assert_eq!(InputSource::get(&overrides, "missing"), None);
        assert_eq!(NoOverrides.get("syslog_servers"), None);
    }
}
