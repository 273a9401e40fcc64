//! # Function registry
//!
//! Parses the per-language function manifest (§4.4) and exposes, per
//! function, its dispatch [`Trigger`]. Grounded in
//! `original_source/process/controller/include/praas/process/controller/workers.hpp`'s
//! `Trigger`/`DirectTrigger` hierarchy, translated from virtual dispatch
//! into a closed tagged enum per DESIGN NOTES' guidance on dynamic
//! dispatch over triggers.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::PraasError;
use crate::workqueue::{Invocation, WorkQueue};

/// The trigger kinds named in the data model. Only `Direct` has a
/// specified readiness rule; the rest are recognized manifest values that
/// refuse invocations rather than silently stalling the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Direct,
    MultiSource,
    Batch,
    Pipeline,
    Dependency,
}

impl TriggerKind {
    fn parse(raw: &str) -> Result<Self, PraasError> {
        match raw {
            "direct" => Ok(TriggerKind::Direct),
            "multi-source" => Ok(TriggerKind::MultiSource),
            "batch" => Ok(TriggerKind::Batch),
            "pipeline" => Ok(TriggerKind::Pipeline),
            "dependency" => Ok(TriggerKind::Dependency),
            other => Err(PraasError::InvalidConfiguration(format!(
                "unknown trigger type in manifest: {other}"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TriggerKind::Direct => "direct",
            TriggerKind::MultiSource => "multi-source",
            TriggerKind::Batch => "batch",
            TriggerKind::Pipeline => "pipeline",
            TriggerKind::Dependency => "dependency",
        }
    }
}

/// A function's dispatch rule. `ready` decides whether a queued invocation
/// has all the payloads it needs to run.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    pub kind: TriggerKind,
}

impl Trigger {
    pub fn new(kind: TriggerKind) -> Self {
        Trigger { kind }
    }

    /// A `direct` trigger is ready the moment its single expected payload
    /// exists, which `add_payload` already guarantees by construction, so
    /// this is unconditional. Every other kind is an acknowledged gap in
    /// the source material (§9 Open Questions) and must refuse rather than
    /// silently block the invocations queued behind it.
    pub fn ready(&self, _invocation: &Invocation, _queue: &WorkQueue) -> Result<bool, PraasError> {
        match self.kind {
            TriggerKind::Direct => Ok(true),
            other => Err(PraasError::NotImplemented(format!(
                "trigger kind {:?} has no specified readiness rule",
                other
            ))),
        }
    }
}

/// One entry in the function manifest: where the code lives and how it's
/// triggered.
#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub name: String,
    pub module_name: String,
    pub function_symbol: String,
    pub trigger: Trigger,
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    functions: HashMap<String, HashMap<String, ManifestFunction>>,
}

#[derive(Debug, Deserialize)]
struct ManifestFunction {
    code: ManifestCode,
    trigger: ManifestTrigger,
}

#[derive(Debug, Deserialize)]
struct ManifestCode {
    module: String,
    function: String,
}

#[derive(Debug, Deserialize)]
struct ManifestTrigger {
    #[serde(rename = "type")]
    kind: String,
}

/// Functions available to one process, loaded once at process start from
/// the manifest keyed by language (§6 "Function manifest").
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionEntry>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        FunctionRegistry {
            functions: HashMap::new(),
        }
    }

    /// Parses `manifest_json` and keeps only the entries under `language`.
    /// An unknown trigger type fails the whole load with
    /// [`PraasError::InvalidConfiguration`] (the original's `InvalidJSON`).
    pub fn load(manifest_json: &str, language: &str) -> Result<Self, PraasError> {
        let manifest: ManifestFile = serde_json::from_str(manifest_json)
            .map_err(|e| PraasError::InvalidConfiguration(format!("malformed manifest: {e}")))?;

        let entries = manifest.functions.get(language).ok_or_else(|| {
            PraasError::InvalidConfiguration(format!("manifest has no entries for language {language}"))
        })?;

        let mut functions = HashMap::with_capacity(entries.len());
        for (fname, def) in entries {
            let kind = TriggerKind::parse(&def.trigger.kind)?;
            functions.insert(
                fname.clone(),
                FunctionEntry {
                    name: fname.clone(),
                    module_name: def.code.module.clone(),
                    function_symbol: def.code.function.clone(),
                    trigger: Trigger::new(kind),
                },
            );
        }

        Ok(FunctionRegistry { functions })
    }

    pub fn get(&self, name: &str) -> Option<&FunctionEntry> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
    {
        "functions": {
            "cpp": {
                "hello-world": {"code": {"module": "functions", "function": "hello_world"}, "trigger": {"type": "direct"}},
                "add": {"code": {"module": "functions", "function": "add"}, "trigger": {"type": "direct"}}
            }
        }
    }
    "#;

    #[test]
    fn loads_functions_for_requested_language() {
        let registry = FunctionRegistry::load(MANIFEST, "cpp").unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("hello-world"));
        assert!(registry.contains("add"));
        assert!(!registry.contains("missing"));
    }

    #[test]
    fn missing_language_section_is_an_error() {
        assert!(FunctionRegistry::load(MANIFEST, "python").is_err());
    }

    #[test]
    fn unknown_trigger_type_fails_the_whole_load() {
        let manifest = r#"
        {
            "functions": {
                "cpp": {
                    "weird": {"code": {"module": "m", "function": "f"}, "trigger": {"type": "quantum"}}
                }
            }
        }
        "#;
        assert!(matches!(
            FunctionRegistry::load(manifest, "cpp"),
            Err(PraasError::InvalidConfiguration(_))
        ));
    }
}
