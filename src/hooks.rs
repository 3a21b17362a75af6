//! The tree-hook observer bridge (Component G): subscribes to execution-tree
//! events and forwards them to a user-supplied `AgentHooks` implementation,
//! enriching each callback with the node's derived subagent context.
//!
//! Grounded on the callback-trait shape of `agent/agentic_loop.rs::LoopCallback`
//! and the event-payload shape of the `other_examples` `ExecutorEventHandler`
//! (`on_tool_start`/`on_tool_done` taking id/name/result/duration), adapted to
//! this crate's tree-event stream instead of a flat sequential tool loop.

use std::sync::Arc;

use async_trait::async_trait;

use crate::tree::{ExecutionTree, GadgetStatus, LlmCallStatus, Node, NodeId, SubagentContext, TreeEvent, TreeSubscriber, Unsubscribe};

/// Identifying and contextual fields carried on every LLM-call hook.
#[derive(Debug, Clone)]
pub struct LlmCallHookContext {
    pub id: NodeId,
    pub iteration: u32,
    pub model: String,
    pub subagent_context: Option<SubagentContext>,
}

/// Identifying and contextual fields carried on every gadget hook.
#[derive(Debug, Clone)]
pub struct GadgetHookContext {
    pub id: NodeId,
    pub invocation_id: String,
    pub name: String,
    pub subagent_context: Option<SubagentContext>,
}

/// The agent-hook surface consumed by external UIs (spec §6). Default
/// method bodies are no-ops so a hooks implementation need only override
/// the callbacks it cares about.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    async fn on_llm_call_start(&self, _ctx: LlmCallHookContext) {}
    async fn on_llm_call_stream_chunk(&self, _ctx: LlmCallHookContext, _chunk: String) {}
    async fn on_llm_call_complete(&self, _ctx: LlmCallHookContext) {}
    async fn on_llm_call_error(&self, _ctx: LlmCallHookContext, _error: String) {}
    async fn on_gadget_execution_start(&self, _ctx: GadgetHookContext) {}
    async fn on_gadget_execution_complete(&self, _ctx: GadgetHookContext, _result: String) {}
    async fn on_gadget_execution_error(&self, _ctx: GadgetHookContext, _error: String) {}
}

/// Bridges an [`ExecutionTree`]'s event stream to an [`AgentHooks`]
/// implementation. Root-level LLM calls (no gadget ancestor) are suppressed
/// since the agent loop delivers those to its caller directly; only
/// subagent LLM calls flow through the bridge, per spec §4.G.
pub struct TreeHookBridge {
    hooks: Arc<dyn AgentHooks>,
}

impl TreeHookBridge {
    /// Subscribes `hooks` to `tree`'s events, returning an [`Unsubscribe`]
    /// handle that stops all forwarding when cancelled.
    pub fn attach(tree: &Arc<ExecutionTree>, hooks: Arc<dyn AgentHooks>) -> Unsubscribe {
        tree.on_all(Arc::new(Self { hooks }))
    }
}

#[async_trait]
impl TreeSubscriber for TreeHookBridge {
    async fn on_event(&self, tree: &ExecutionTree, event: TreeEvent) {
        match event {
            TreeEvent::LlmCallAdded(id) => self.forward_llm_call(tree, &id, Phase::Start).await,
            TreeEvent::LlmCallChunk(id, delta) => self.forward_llm_call_chunk(tree, &id, delta).await,
            TreeEvent::LlmCallCompleted(id) => self.forward_llm_call(tree, &id, Phase::Complete).await,
            TreeEvent::LlmCallFailed(id) => self.forward_llm_call(tree, &id, Phase::Error).await,
            TreeEvent::GadgetStarted(id) => self.forward_gadget(tree, &id, Phase::Start).await,
            TreeEvent::GadgetCompleted(id) => self.forward_gadget(tree, &id, Phase::Complete).await,
            TreeEvent::GadgetSkipped(id) => self.forward_gadget(tree, &id, Phase::Error).await,
            TreeEvent::GadgetAdded(_) => {}
        }
    }
}

enum Phase {
    Start,
    Complete,
    Error,
}

impl TreeHookBridge {
    async fn forward_llm_call(&self, tree: &ExecutionTree, id: &NodeId, phase: Phase) {
        let Some(Node::LlmCall(node)) = tree.get_node(id) else {
            return;
        };
        // Suppress root-level LLM calls: the agent loop already reports
        // those to its own caller, and the spec reserves the bridge for
        // subagent calls so a hooks implementation sees each call exactly
        // once.
        let Some(subagent_context) = tree.subagent_context(id) else {
            return;
        };
        let ctx = LlmCallHookContext {
            id: id.clone(),
            iteration: node.iteration,
            model: node.model.clone(),
            subagent_context: Some(subagent_context),
        };
        match phase {
            Phase::Start => self.hooks.on_llm_call_start(ctx).await,
            Phase::Complete => {
                if node.status == LlmCallStatus::Failed {
                    self.hooks
                        .on_llm_call_error(ctx, node.error.clone().unwrap_or_default())
                        .await;
                } else {
                    self.hooks.on_llm_call_complete(ctx).await;
                }
            }
            Phase::Error => {
                self.hooks
                    .on_llm_call_error(ctx, node.error.clone().unwrap_or_default())
                    .await;
            }
        }
    }

    async fn forward_llm_call_chunk(&self, tree: &ExecutionTree, id: &NodeId, delta: String) {
        let Some(Node::LlmCall(node)) = tree.get_node(id) else {
            return;
        };
        let Some(subagent_context) = tree.subagent_context(id) else {
            return;
        };
        let ctx = LlmCallHookContext {
            id: id.clone(),
            iteration: node.iteration,
            model: node.model.clone(),
            subagent_context: Some(subagent_context),
        };
        self.hooks.on_llm_call_stream_chunk(ctx, delta).await;
    }

    async fn forward_gadget(&self, tree: &ExecutionTree, id: &NodeId, phase: Phase) {
        let Some(Node::Gadget(node)) = tree.get_node(id) else {
            return;
        };
        let ctx = GadgetHookContext {
            id: id.clone(),
            invocation_id: node.invocation_id.clone(),
            name: node.name.clone(),
            subagent_context: tree.subagent_context(id),
        };
        match phase {
            Phase::Start => self.hooks.on_gadget_execution_start(ctx).await,
            Phase::Complete => match node.status {
                GadgetStatus::Failed => {
                    self.hooks
                        .on_gadget_execution_error(ctx, node.error.clone().unwrap_or_default())
                        .await;
                }
                _ => {
                    self.hooks
                        .on_gadget_execution_complete(ctx, node.result.clone().unwrap_or_default())
                        .await;
                }
            },
            Phase::Error => {
                self.hooks
                    .on_gadget_execution_error(ctx, node.error.clone().unwrap_or_default())
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        llm_starts: Mutex<Vec<LlmCallHookContext>>,
        llm_chunks: Mutex<Vec<(LlmCallHookContext, String)>>,
        gadget_starts: Mutex<Vec<GadgetHookContext>>,
        gadget_completes: Mutex<Vec<(GadgetHookContext, String)>>,
    }

    #[async_trait]
    impl AgentHooks for Recorder {
        async fn on_llm_call_start(&self, ctx: LlmCallHookContext) {
            self.llm_starts.lock().unwrap().push(ctx);
        }
        async fn on_llm_call_stream_chunk(&self, ctx: LlmCallHookContext, chunk: String) {
            self.llm_chunks.lock().unwrap().push((ctx, chunk));
        }
        async fn on_gadget_execution_start(&self, ctx: GadgetHookContext) {
            self.gadget_starts.lock().unwrap().push(ctx);
        }
        async fn on_gadget_execution_complete(&self, ctx: GadgetHookContext, result: String) {
            self.gadget_completes.lock().unwrap().push((ctx, result));
        }
    }

    #[tokio::test]
    async fn s3_root_llm_calls_suppressed_subagent_calls_forwarded() {
        let tree = Arc::new(ExecutionTree::new());
        let recorder = Arc::new(Recorder::default());
        let _unsub = TreeHookBridge::attach(&tree, recorder.clone());

        let root_call = tree.add_llm_call(0, "m".to_string(), None).await;
        let gadget = tree
            .add_gadget("browse-1".to_string(), "BrowseWeb".to_string(), None, root_call, vec![])
            .await;
        tree.start_gadget(&gadget).await;
        let child_call = tree.add_llm_call(0, "m".to_string(), Some(gadget.clone())).await;

        assert!(recorder.llm_starts.lock().unwrap().is_empty(), "root call must be suppressed");

        let starts = recorder.gadget_starts.lock().unwrap();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].invocation_id, "browse-1");
        assert!(starts[0].subagent_context.is_none());
        drop(starts);

        let ctx = tree.subagent_context(&child_call);
        assert_eq!(ctx.unwrap().parent_gadget_invocation_id, "browse-1");
    }

    #[tokio::test]
    async fn nested_gadget_complete_carries_subagent_context() {
        let tree = Arc::new(ExecutionTree::new());
        let recorder = Arc::new(Recorder::default());
        let _unsub = TreeHookBridge::attach(&tree, recorder.clone());

        let call_a = tree.add_llm_call(0, "m".to_string(), None).await;
        let browse_1 = tree
            .add_gadget("browse-1".to_string(), "BrowseWeb".to_string(), None, call_a, vec![])
            .await;
        let call_b = tree.add_llm_call(0, "m".to_string(), Some(browse_1.clone())).await;
        let inner_1 = tree
            .add_gadget("inner-1".to_string(), "InnerTool".to_string(), None, call_b, vec![])
            .await;
        tree.start_gadget(&inner_1).await;
        tree.complete_gadget(&inner_1, Some("ok".to_string()), None, Some(1), None, None)
            .await;

        let completes = recorder.gadget_completes.lock().unwrap();
        let (ctx, result) = completes.iter().find(|(c, _)| c.invocation_id == "inner-1").unwrap();
        assert_eq!(result, "ok");
        let sub = ctx.subagent_context.as_ref().unwrap();
        assert_eq!(sub.parent_gadget_invocation_id, "browse-1");
    }

    #[tokio::test]
    async fn subagent_stream_chunks_forwarded_root_chunks_suppressed() {
        let tree = Arc::new(ExecutionTree::new());
        let recorder = Arc::new(Recorder::default());
        let _unsub = TreeHookBridge::attach(&tree, recorder.clone());

        let root_call = tree.add_llm_call(0, "m".to_string(), None).await;
        tree.emit_llm_call_chunk(&root_call, "root chunk".to_string()).await;

        let gadget = tree
            .add_gadget("browse-1".to_string(), "BrowseWeb".to_string(), None, root_call, vec![])
            .await;
        let child_call = tree.add_llm_call(0, "m".to_string(), Some(gadget)).await;
        tree.emit_llm_call_chunk(&child_call, "child chunk".to_string()).await;

        let chunks = recorder.llm_chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1, "root-level chunks must be suppressed like other root LLM events");
        assert_eq!(chunks[0].1, "child chunk");
        assert_eq!(chunks[0].0.id, child_call);
    }

    #[tokio::test]
    async fn unsubscribe_stops_forwarding() {
        let tree = Arc::new(ExecutionTree::new());
        let recorder = Arc::new(Recorder::default());
        let unsub = TreeHookBridge::attach(&tree, recorder.clone());
        unsub.cancel();

        let call_a = tree.add_llm_call(0, "m".to_string(), None).await;
        let gadget = tree
            .add_gadget("inv-1".to_string(), "Tool".to_string(), None, call_a, vec![])
            .await;
        tree.start_gadget(&gadget).await;

        assert!(recorder.gadget_starts.lock().unwrap().is_empty());
    }
}
