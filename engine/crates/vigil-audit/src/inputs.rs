//! Input resolver - applies external overrides to declared input defaults

use tracing::{debug, warn};
use vigil_core::{Error, InputDecl, InputSource, ResolvedInputs, Result, Value};

/// Resolve one input: the override if supplied, else the declared default.
///
/// An override of a different type than the default is a configuration error.
pub fn resolve(name: &str, default: &Value, overrides: &dyn InputSource) -> Result<Value> {
    match overrides.get(name) {
        Some(value) if value.same_type(default) => Ok(value),
        Some(value) => Err(Error::InputTypeMismatch {
            name: name.to_string(),
            expected: default.type_name(),
            actual: value.type_name(),
        }),
        None => Ok(default.clone()),
    }
}

/// Resolve every declared input once for a run
pub fn resolve_all(decls: &[InputDecl], overrides: &dyn InputSource) -> Result<ResolvedInputs> {
    for name in overrides.names() {
        if !decls.iter().any(|d| d.name == name) {
            warn!("Ignoring override for undeclared input: {}", name);
        }
    }

    decls
        .iter()
        .map(|decl| -> Result<(String, Value)> {
            let value = resolve(&decl.name, &decl.declared_default, overrides)?;
            debug!("Input {} = {}", decl.name, value);
            Ok((decl.name.clone(), value))
        })
        .collect()
}
