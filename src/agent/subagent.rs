//! The subagent gadget pattern (Component H): a gadget whose `execute`
//! recursively instantiates a child [`AgentLoop`], sharing the parent's
//! [`ExecutionTree`] rather than owning a fresh one.
//!
//! Grounded on no single teacher file (the teacher has no recursive-agent
//! concept); built directly on Components D and F per spec §4.H, using the
//! depth ceiling already carried on [`crate::config::RunConfig`] and
//! [`crate::error::Error::SubagentDepthExceeded`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::MarkerConfig;
use crate::error::{Error, Result};
use crate::gadget::{
    CancelSignal, Gadget, GadgetExample, GadgetExecutionContext, GadgetOutput, ParameterField,
    ParameterKind, ParameterSchema,
};
use crate::gadget::GadgetRegistry;
use crate::markers::ParameterTree;
use crate::message::Message;
use crate::prompt::PromptAssembler;
use crate::provider::LlmProvider;

use super::{AgentLoop, AgentLoopInput};

/// A gadget that spawns a nested agent loop to carry out a sub-task,
/// sharing the parent's execution tree. The spawned loop's `parent_gadget_id`
/// is this gadget's own tree node, so the tree-hook bridge (Component G)
/// can derive subagent context for everything the child does — including
/// further, recursively nested subagents.
pub struct SubagentGadget {
    name: String,
    description: String,
    provider: Arc<dyn LlmProvider>,
    prompt: Arc<PromptAssembler>,
    registry: Arc<GadgetRegistry>,
    markers: MarkerConfig,
    model: String,
    max_iterations: u32,
    max_subagent_depth: usize,
    default_gadget_timeout: Option<Duration>,
}

#[allow(clippy::too_many_arguments)]
impl SubagentGadget {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        prompt: Arc<PromptAssembler>,
        registry: Arc<GadgetRegistry>,
        markers: MarkerConfig,
        model: impl Into<String>,
        max_iterations: u32,
        max_subagent_depth: usize,
        default_gadget_timeout: Option<Duration>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            provider,
            prompt,
            registry,
            markers,
            model: model.into(),
            max_iterations,
            max_subagent_depth,
            default_gadget_timeout,
        }
    }
}

#[async_trait]
impl Gadget for SubagentGadget {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![ParameterField {
            path: "task".to_string(),
            description: "instructions for the subagent, given as its initial user turn".to_string(),
            required: true,
            kind: ParameterKind::String,
        }])
    }

    fn category(&self) -> Option<&str> {
        Some("Subagents")
    }

    fn examples(&self) -> Vec<GadgetExample> {
        vec![GadgetExample {
            description: "Delegate a focused sub-task".to_string(),
            parameters: vec![(
                "task".to_string(),
                "Summarize the contents of report.txt in three bullet points.".to_string(),
            )],
        }]
    }

    async fn execute(
        &self,
        params: ParameterTree,
        cancel: CancelSignal,
        context: GadgetExecutionContext,
    ) -> Result<GadgetOutput> {
        let task = params
            .as_object()
            .and_then(|o| o.get("task"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput(format!("{} requires a 'task' parameter", self.name)))?;

        // Depth of the child we're about to spawn: one more than however
        // deep *this* gadget node already sits among nested subagents.
        let depth = context
            .tree
            .subagent_context(&context.node_id)
            .map(|c| c.depth + 1)
            .unwrap_or(1);
        if depth > self.max_subagent_depth {
            return Err(Error::SubagentDepthExceeded(self.max_subagent_depth));
        }

        let transcript = vec![
            self.prompt.build_system_message(&self.registry),
            Message::user(task.to_string()),
        ];

        let child_loop = AgentLoop::new(self.provider.clone(), self.prompt.clone(), self.default_gadget_timeout);
        let input = AgentLoopInput {
            transcript,
            model: self.model.clone(),
            registry: self.registry.clone(),
            markers: self.markers.clone(),
            max_iterations: self.max_iterations,
            tree: context.tree.clone(),
            parent_gadget_id: Some(context.node_id.clone()),
            cancel,
        };

        let output = child_loop.run(input).await.map_err(|e| Error::GadgetThrew {
            name: self.name.clone(),
            invocation_id: String::new(),
            message: e.to_string(),
        })?;

        let final_text = output
            .final_messages
            .last()
            .map(|m| m.content.as_text())
            .unwrap_or_default();
        Ok(GadgetOutput::text(final_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ParameterEncoding;
    use crate::provider::{LlmStream, StreamingChunk};
    use crate::tree::ExecutionTree;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;

    struct OneShotProvider {
        response: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for OneShotProvider {
        fn id(&self) -> &str {
            "one-shot"
        }
        fn default_model(&self) -> &str {
            "test-model"
        }
        async fn generate_stream(&self, _messages: &[Message], _model: &str) -> Result<LlmStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let chunk = StreamingChunk {
                delta: Some(self.response.clone()),
                is_final: true,
                finish_reason: Some("stop".to_string()),
                usage: None,
            };
            Ok(Box::pin(stream::iter(vec![Ok(chunk)])))
        }
    }

    #[tokio::test]
    async fn s3_subagent_shares_parent_tree_and_records_parent_gadget() {
        let provider = Arc::new(OneShotProvider {
            response: "done".to_string(),
            calls: AtomicUsize::new(0),
        });
        let registry = Arc::new(GadgetRegistry::new());
        let markers = MarkerConfig::default();
        let prompt = Arc::new(PromptAssembler::new(markers.clone(), ParameterEncoding::Block));

        let gadget = SubagentGadget::new(
            "delegate",
            "runs a nested agent",
            provider,
            prompt,
            registry,
            markers,
            "test-model",
            5,
            8,
            None,
        );

        let tree = Arc::new(ExecutionTree::new());
        let root_call = tree.add_llm_call(0, "test-model".to_string(), None).await;
        let node_id = tree
            .add_gadget("browse-1".to_string(), "delegate".to_string(), None, root_call, vec![])
            .await;
        tree.start_gadget(&node_id).await;

        let (_tx, cancel) = watch::channel(false);
        let params = crate::markers::resolve_parameters(&[("task".to_string(), "summarize".to_string())]).unwrap();
        let context = GadgetExecutionContext {
            tree: tree.clone(),
            node_id: node_id.clone(),
        };
        let output = gadget.execute(params, cancel, context).await.unwrap();
        assert_eq!(output.result, "done");

        // The subagent's own node has no gadget ancestor (it's the
        // root-most gadget here); anything it spawns does.
        assert!(tree.subagent_context(&node_id).is_none());
        let ancestors_of_node = tree.get_ancestors(&node_id);
        assert_eq!(ancestors_of_node.len(), 2, "gadget node plus its parent llm call");
    }

    #[tokio::test]
    async fn depth_ceiling_is_enforced() {
        let provider = Arc::new(OneShotProvider {
            response: "done".to_string(),
            calls: AtomicUsize::new(0),
        });
        let registry = Arc::new(GadgetRegistry::new());
        let markers = MarkerConfig::default();
        let prompt = Arc::new(PromptAssembler::new(markers.clone(), ParameterEncoding::Block));

        let gadget = SubagentGadget::new(
            "delegate",
            "runs a nested agent",
            provider,
            prompt,
            registry,
            markers,
            "test-model",
            5,
            0, // ceiling of zero: even the first level is too deep
            None,
        );

        let tree = Arc::new(ExecutionTree::new());
        let root_call = tree.add_llm_call(0, "test-model".to_string(), None).await;
        let node_id = tree
            .add_gadget("browse-1".to_string(), "delegate".to_string(), None, root_call, vec![])
            .await;

        let (_tx, cancel) = watch::channel(false);
        let params = crate::markers::resolve_parameters(&[("task".to_string(), "summarize".to_string())]).unwrap();
        let context = GadgetExecutionContext { tree, node_id };
        let err = gadget.execute(params, cancel, context).await.unwrap_err();
        assert!(matches!(err, Error::SubagentDepthExceeded(0)));
    }
}
