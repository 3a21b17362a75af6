//! The gadget contract and registry (Component C).
//!
//! A gadget is a duck-typed capability record — name, description,
//! parameter schema, optional timeout, optional worked examples, and an
//! `execute` function — rather than a class hierarchy, per the "duck-typed
//! gadgets" design note. Grounded on the teacher's `tools::Tool` trait and
//! `tools::ToolRegistry` (`tools/traits.rs`, `tools/registry.rs`), adapted
//! from JSON-schema parameters to the neutral path-based schema this
//! protocol's arg blocks produce.

mod http_fetch;
mod read_file;
mod write_file;

pub use http_fetch::HttpFetchGadget;
pub use read_file::ReadFileGadget;
pub use write_file::WriteFileGadget;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::markers::ParameterTree;
use crate::tree::{ExecutionTree, MediaRef, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

#[derive(Debug, Clone)]
pub struct ParameterField {
    pub path: String,
    pub description: String,
    pub required: bool,
    pub kind: ParameterKind,
}

/// A neutral, serialization-agnostic description of a gadget's parameters.
/// The prompt assembler renders this as plain text; it is not tied to JSON
/// Schema or any other wire format.
#[derive(Debug, Clone, Default)]
pub struct ParameterSchema {
    pub fields: Vec<ParameterField>,
}

impl ParameterSchema {
    pub fn new(fields: Vec<ParameterField>) -> Self {
        Self { fields }
    }

    /// Renders the schema as a human-and-model-readable text block.
    pub fn render_text(&self) -> String {
        self.fields
            .iter()
            .map(|f| {
                let kind = match f.kind {
                    ParameterKind::String => "string",
                    ParameterKind::Number => "number",
                    ParameterKind::Boolean => "boolean",
                    ParameterKind::Object => "object",
                    ParameterKind::Array => "array",
                };
                let req = if f.required { "required" } else { "optional" };
                format!("  {} ({kind}, {req}): {}", f.path, f.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A worked example, expressed as flattened `(path, value)` pairs so the
/// prompt assembler can render it in whichever parameter encoding (block,
/// JSON, YAML, TOML, XML) the run has selected.
#[derive(Debug, Clone)]
pub struct GadgetExample {
    pub description: String,
    pub parameters: Vec<(String, String)>,
}

/// What an `execute` call produces: always at minimum a result string, with
/// an optional cost (plain USD amount, spec §9 open question (i)) and
/// optional media attachments.
#[derive(Debug, Clone)]
pub struct GadgetOutput {
    pub result: String,
    pub cost: Option<f64>,
    pub media: Option<Vec<MediaRef>>,
}

impl GadgetOutput {
    pub fn text(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            cost: None,
            media: None,
        }
    }

    pub fn with_cost(result: impl Into<String>, cost: f64) -> Self {
        Self {
            result: result.into(),
            cost: Some(cost),
            media: None,
        }
    }
}

impl From<String> for GadgetOutput {
    fn from(result: String) -> Self {
        Self::text(result)
    }
}

/// A cooperative cancellation signal threaded through `execute`. Gadgets
/// that perform long-running work should poll `*cancel.borrow()` at
/// convenient points; cleanup on cancellation is the gadget's
/// responsibility, per the concurrency model's cooperative-cancellation
/// contract.
pub type CancelSignal = watch::Receiver<bool>;

/// Execution-tree context threaded into every `execute` call: the shared
/// tree instance and the gadget's own node id. Most gadgets ignore it; the
/// subagent gadget pattern (spec §4.H) needs both to spawn a child agent
/// loop that shares the parent's tree and records itself as that child's
/// `parent_gadget_id`.
#[derive(Clone)]
pub struct GadgetExecutionContext {
    pub tree: Arc<ExecutionTree>,
    pub node_id: NodeId,
}

#[async_trait]
pub trait Gadget: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameter_schema(&self) -> ParameterSchema;

    /// `None` means no deadline; otherwise `execute` is raced against this
    /// many milliseconds and force-failed with `Error::GadgetTimeout` on
    /// expiry (enforced by the caller, not by the gadget itself).
    fn timeout_ms(&self) -> Option<u64> {
        None
    }

    fn examples(&self) -> Vec<GadgetExample> {
        Vec::new()
    }

    /// Purely a prompt-section grouping hint for registries holding many
    /// gadgets; `llmist` has no fixed built-in tool set so this is a
    /// first-class field rather than a doc convention.
    fn category(&self) -> Option<&str> {
        None
    }

    async fn execute(
        &self,
        params: ParameterTree,
        cancel: CancelSignal,
        context: GadgetExecutionContext,
    ) -> Result<GadgetOutput>;
}

/// A gadget descriptor as rendered for the prompt assembler: everything
/// about a gadget except its executable behavior.
pub struct GadgetDefinition {
    pub name: String,
    pub description: String,
    pub schema: ParameterSchema,
    pub category: Option<String>,
    pub examples: Vec<GadgetExample>,
}

/// Maps gadget name (case-sensitive) to its descriptor, mirroring
/// `tools::ToolRegistry`.
#[derive(Default, Clone)]
pub struct GadgetRegistry {
    gadgets: HashMap<String, Arc<dyn Gadget>>,
}

impl GadgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gadget: Arc<dyn Gadget>) {
        self.gadgets.insert(gadget.name().to_string(), gadget);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Gadget>> {
        self.gadgets.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.gadgets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.gadgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gadgets.is_empty()
    }

    pub fn definitions(&self) -> Vec<GadgetDefinition> {
        self.gadgets
            .values()
            .map(|g| GadgetDefinition {
                name: g.name().to_string(),
                description: g.description().to_string(),
                schema: g.parameter_schema(),
                category: g.category().map(|s| s.to_string()),
                examples: g.examples(),
            })
            .collect()
    }

    /// Executes a gadget by name, returning `Error::UnknownGadget` rather
    /// than panicking when the name is not registered — matching
    /// `ToolRegistry::execute`'s "Unknown tool" failure shape.
    pub async fn execute(
        &self,
        name: &str,
        params: ParameterTree,
        cancel: CancelSignal,
        context: GadgetExecutionContext,
    ) -> Result<GadgetOutput> {
        match self.get(name) {
            Some(gadget) => gadget.execute(params, cancel, context).await,
            None => Err(Error::UnknownGadget(name.to_string())),
        }
    }
}

/// Lexically normalizes a path (resolving `.`/`..` components without
/// touching the filesystem), for confinement checks on paths that may not
/// exist yet (e.g. a `write_file` target).
pub(crate) fn normalize_lexically(path: &std::path::Path) -> std::path::PathBuf {
    use std::path::Component;
    let mut out = std::path::PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Gadget for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its message parameter"
        }
        fn parameter_schema(&self) -> ParameterSchema {
            ParameterSchema::new(vec![ParameterField {
                path: "message".to_string(),
                description: "text to echo".to_string(),
                required: true,
                kind: ParameterKind::String,
            }])
        }
        async fn execute(
            &self,
            params: ParameterTree,
            _cancel: CancelSignal,
            _context: GadgetExecutionContext,
        ) -> Result<GadgetOutput> {
            let message = params
                .as_object()
                .and_then(|o| o.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Ok(GadgetOutput::text(message.to_string()))
        }
    }

    fn test_context() -> GadgetExecutionContext {
        let tree = Arc::new(ExecutionTree::new());
        GadgetExecutionContext {
            node_id: NodeId("test".to_string()),
            tree,
        }
    }

    #[tokio::test]
    async fn registry_executes_registered_gadget() {
        let mut registry = GadgetRegistry::new();
        registry.register(Arc::new(Echo));
        let (_tx, rx) = watch::channel(false);
        let params = crate::markers::resolve_parameters(&[("message".to_string(), "hi".to_string())]).unwrap();
        let out = registry.execute("echo", params, rx, test_context()).await.unwrap();
        assert_eq!(out.result, "hi");
    }

    #[tokio::test]
    async fn registry_reports_unknown_gadget() {
        let registry = GadgetRegistry::new();
        let (_tx, rx) = watch::channel(false);
        let err = registry
            .execute("nope", ParameterTree::Object(Default::default()), rx, test_context())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownGadget(_)));
    }
}
