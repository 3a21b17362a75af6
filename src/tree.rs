//! The execution tree: an append-mostly, ordered record of every LLM call
//! and gadget invocation in a run (including those nested inside recursively
//! spawned subagents), with O(1) lookup by id and an event-subscriber bus.
//!
//! Grounded on the teacher's `LoopTrace`/`LoopStep` shape in
//! `agent/agentic_loop.rs`, generalized from a flat per-run trace into a
//! real tree shared across a parent agent and all subagent gadgets it
//! spawns, and on the `Arc<RwLock<_>>` shared-mutable-state pattern the
//! teacher uses for `RateLimitState` in `agent/client.rs`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::markers::ParameterTree;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmCallStatus {
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GadgetStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub media_type: String,
    pub url_or_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallNode {
    pub id: NodeId,
    pub iteration: u32,
    pub model: String,
    pub status: LlmCallStatus,
    pub parent_id: Option<NodeId>,
    pub response: Option<String>,
    pub usage: Option<Usage>,
    pub cost: Option<f64>,
    pub finish_reason: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GadgetNode {
    pub id: NodeId,
    pub invocation_id: String,
    pub name: String,
    pub parameters: Option<ParameterTree>,
    pub dependencies: Vec<String>,
    pub parent_id: NodeId,
    pub status: GadgetStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub cost: Option<f64>,
    pub media: Option<Vec<MediaRef>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    LlmCall(LlmCallNode),
    Gadget(GadgetNode),
}

impl Node {
    pub fn id(&self) -> &NodeId {
        match self {
            Node::LlmCall(n) => &n.id,
            Node::Gadget(n) => &n.id,
        }
    }

    pub fn parent_id(&self) -> Option<&NodeId> {
        match self {
            Node::LlmCall(n) => n.parent_id.as_ref(),
            Node::Gadget(n) => Some(&n.parent_id),
        }
    }

    pub fn as_gadget(&self) -> Option<&GadgetNode> {
        match self {
            Node::Gadget(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_llm_call(&self) -> Option<&LlmCallNode> {
        match self {
            Node::LlmCall(n) => Some(n),
            _ => None,
        }
    }
}

/// The derived "subagent context" for a node (spec §3): the nearest
/// enclosing gadget ancestor's invocation id, and the count of gadget
/// ancestors (how deep inside nested subagents this node sits).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubagentContext {
    pub parent_gadget_invocation_id: String,
    pub depth: usize,
}

/// An event fired after a mutating tree operation completes, in the order
/// operations were applied.
#[derive(Debug, Clone)]
pub enum TreeEvent {
    LlmCallAdded(NodeId),
    LlmCallChunk(NodeId, String),
    LlmCallCompleted(NodeId),
    LlmCallFailed(NodeId),
    GadgetAdded(NodeId),
    GadgetStarted(NodeId),
    GadgetCompleted(NodeId),
    GadgetSkipped(NodeId),
}

#[async_trait]
pub trait TreeSubscriber: Send + Sync {
    async fn on_event(&self, tree: &ExecutionTree, event: TreeEvent);
}

/// A handle returned by [`ExecutionTree::on_all`]. Unsubscription happens
/// only via an explicit call to [`Unsubscribe::cancel`] — not on `Drop` —
/// so a handle a caller forgets about is inert rather than silently
/// unsubscribing.
pub struct Unsubscribe {
    id: u64,
    tree: Arc<ExecutionTree>,
}

impl Unsubscribe {
    pub fn cancel(self) {
        self.tree.remove_subscriber(self.id);
    }
}

pub struct ExecutionTree {
    nodes: RwLock<HashMap<NodeId, Node>>,
    order: RwLock<Vec<NodeId>>,
    subscribers: RwLock<Vec<(u64, Arc<dyn TreeSubscriber>)>>,
    next_subscriber_id: AtomicU64,
}

impl Default for ExecutionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTree {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(0),
        }
    }

    fn insert(&self, node: Node) {
        let id = node.id().clone();
        self.nodes.write().unwrap().insert(id.clone(), node);
        self.order.write().unwrap().push(id);
    }

    async fn notify(self: &Arc<Self>, event: TreeEvent) {
        let subscribers: Vec<Arc<dyn TreeSubscriber>> = self
            .subscribers
            .read()
            .unwrap()
            .iter()
            .map(|(_, s)| s.clone())
            .collect();
        for subscriber in subscribers {
            subscriber.on_event(self, event.clone()).await;
        }
    }

    pub fn on_all(self: &Arc<Self>, subscriber: Arc<dyn TreeSubscriber>) -> Unsubscribe {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().unwrap().push((id, subscriber));
        Unsubscribe {
            id,
            tree: self.clone(),
        }
    }

    fn remove_subscriber(&self, id: u64) {
        self.subscribers.write().unwrap().retain(|(sid, _)| *sid != id);
    }

    pub fn get_node(&self, id: &NodeId) -> Option<Node> {
        self.nodes.read().unwrap().get(id).cloned()
    }

    /// Inclusive ancestor walk: `n`, then its parent, grandparent, ... to
    /// the root.
    pub fn get_ancestors(&self, id: &NodeId) -> Vec<Node> {
        let nodes = self.nodes.read().unwrap();
        let mut out = Vec::new();
        let mut current = nodes.get(id).cloned();
        while let Some(node) = current {
            let parent_id = node.parent_id().cloned();
            out.push(node);
            current = parent_id.and_then(|pid| nodes.get(&pid).cloned());
        }
        out
    }

    /// Derives the subagent context for `id` (spec §3): walks ancestors
    /// (excluding `id` itself) until the first enclosing gadget node.
    /// Returns `None` when no gadget ancestor exists (the node belongs to
    /// the root agent).
    pub fn subagent_context(&self, id: &NodeId) -> Option<SubagentContext> {
        let ancestors = self.get_ancestors(id);
        let gadget_ancestors: Vec<&GadgetNode> =
            ancestors.iter().skip(1).filter_map(Node::as_gadget).collect();
        let nearest = gadget_ancestors.first()?;
        Some(SubagentContext {
            parent_gadget_invocation_id: nearest.invocation_id.clone(),
            depth: gadget_ancestors.len(),
        })
    }

    pub async fn add_llm_call(
        self: &Arc<Self>,
        iteration: u32,
        model: String,
        parent_id: Option<NodeId>,
    ) -> NodeId {
        let id = NodeId::new();
        self.insert(Node::LlmCall(LlmCallNode {
            id: id.clone(),
            iteration,
            model,
            status: LlmCallStatus::Running,
            parent_id,
            response: None,
            usage: None,
            cost: None,
            finish_reason: None,
            error: None,
        }));
        self.notify(TreeEvent::LlmCallAdded(id.clone())).await;
        id
    }

    /// Fires an `llm_call_stream` signal for one chunk of a still-running
    /// LLM call (spec §4.F step 2). The chunk text itself is not persisted
    /// on the node — only the final accumulated response is, via
    /// [`Self::complete_llm_call`] — this is a transient notify-only event.
    pub async fn emit_llm_call_chunk(self: &Arc<Self>, id: &NodeId, delta: String) {
        self.notify(TreeEvent::LlmCallChunk(id.clone(), delta)).await;
    }

    pub async fn complete_llm_call(
        self: &Arc<Self>,
        id: &NodeId,
        response: Option<String>,
        usage: Option<Usage>,
        finish_reason: Option<String>,
        cost: Option<f64>,
    ) {
        {
            let mut nodes = self.nodes.write().unwrap();
            if let Some(Node::LlmCall(n)) = nodes.get_mut(id) {
                debug_assert_eq!(n.status, LlmCallStatus::Running, "monotonic transition violated");
                n.status = LlmCallStatus::Complete;
                n.response = response;
                n.usage = usage;
                n.finish_reason = finish_reason;
                n.cost = cost;
            }
        }
        self.notify(TreeEvent::LlmCallCompleted(id.clone())).await;
    }

    pub async fn fail_llm_call(self: &Arc<Self>, id: &NodeId, error: String) {
        {
            let mut nodes = self.nodes.write().unwrap();
            if let Some(Node::LlmCall(n)) = nodes.get_mut(id) {
                n.status = LlmCallStatus::Failed;
                n.error = Some(error);
            }
        }
        self.notify(TreeEvent::LlmCallFailed(id.clone())).await;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_gadget(
        self: &Arc<Self>,
        invocation_id: String,
        name: String,
        parameters: Option<ParameterTree>,
        parent_id: NodeId,
        dependencies: Vec<String>,
    ) -> NodeId {
        let id = NodeId::new();
        self.insert(Node::Gadget(GadgetNode {
            id: id.clone(),
            invocation_id,
            name,
            parameters,
            dependencies,
            parent_id,
            status: GadgetStatus::Pending,
            result: None,
            error: None,
            execution_time_ms: None,
            cost: None,
            media: None,
            started_at: None,
            completed_at: None,
        }));
        self.notify(TreeEvent::GadgetAdded(id.clone())).await;
        id
    }

    pub async fn start_gadget(self: &Arc<Self>, id: &NodeId) {
        {
            let mut nodes = self.nodes.write().unwrap();
            if let Some(Node::Gadget(n)) = nodes.get_mut(id) {
                n.status = GadgetStatus::Running;
                n.started_at = Some(Utc::now());
            }
        }
        self.notify(TreeEvent::GadgetStarted(id.clone())).await;
    }

    pub async fn complete_gadget(
        self: &Arc<Self>,
        id: &NodeId,
        result: Option<String>,
        error: Option<String>,
        execution_time_ms: Option<u64>,
        cost: Option<f64>,
        media: Option<Vec<MediaRef>>,
    ) {
        {
            let mut nodes = self.nodes.write().unwrap();
            if let Some(Node::Gadget(n)) = nodes.get_mut(id) {
                n.status = if error.is_some() {
                    GadgetStatus::Failed
                } else {
                    GadgetStatus::Complete
                };
                n.result = result;
                n.error = error;
                n.execution_time_ms = execution_time_ms;
                n.cost = cost;
                n.media = media;
                n.completed_at = Some(Utc::now());
            }
        }
        self.notify(TreeEvent::GadgetCompleted(id.clone())).await;
    }

    pub async fn skip_gadget(
        self: &Arc<Self>,
        id: &NodeId,
        failed_dep_id: &str,
        failed_dep_error: &str,
        reason: &str,
    ) {
        {
            let mut nodes = self.nodes.write().unwrap();
            if let Some(Node::Gadget(n)) = nodes.get_mut(id) {
                n.status = GadgetStatus::Skipped;
                n.error = Some(format!(
                    "skipped: {reason} (dependency {failed_dep_id} failed: {failed_dep_error})"
                ));
                n.completed_at = Some(Utc::now());
            }
        }
        self.notify(TreeEvent::GadgetSkipped(id.clone())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        events: std::sync::Mutex<Vec<TreeEvent>>,
    }

    #[async_trait]
    impl TreeSubscriber for Recorder {
        async fn on_event(&self, _tree: &ExecutionTree, event: TreeEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn ancestors_walk_to_root_inclusive() {
        let tree = Arc::new(ExecutionTree::new());
        let root_llm = tree.add_llm_call(0, "m".to_string(), None).await;
        let gadget = tree
            .add_gadget("inv-1".to_string(), "Tool".to_string(), None, root_llm.clone(), vec![])
            .await;
        let child_llm = tree.add_llm_call(0, "m".to_string(), Some(gadget.clone())).await;

        let ancestors = tree.get_ancestors(&child_llm);
        assert_eq!(ancestors.len(), 3);
        assert_eq!(ancestors[0].id(), &child_llm);
        assert_eq!(ancestors[1].id(), &gadget);
        assert_eq!(ancestors[2].id(), &root_llm);
    }

    #[tokio::test]
    async fn subscribers_see_events_in_operation_order() {
        let tree = Arc::new(ExecutionTree::new());
        let recorder = Arc::new(Recorder {
            events: std::sync::Mutex::new(Vec::new()),
        });
        let _unsub = tree.on_all(recorder.clone());

        let llm = tree.add_llm_call(0, "m".to_string(), None).await;
        let gadget = tree
            .add_gadget("inv-1".to_string(), "Tool".to_string(), None, llm.clone(), vec![])
            .await;
        tree.start_gadget(&gadget).await;
        tree.complete_gadget(&gadget, Some("ok".to_string()), None, Some(5), None, None)
            .await;
        tree.complete_llm_call(&llm, Some("done".to_string()), None, Some("stop".to_string()), None)
            .await;

        let events = recorder.events.lock().unwrap();
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                TreeEvent::LlmCallAdded(_) => "llm_added",
                TreeEvent::LlmCallChunk(..) => "llm_chunk",
                TreeEvent::LlmCallCompleted(_) => "llm_completed",
                TreeEvent::LlmCallFailed(_) => "llm_failed",
                TreeEvent::GadgetAdded(_) => "gadget_added",
                TreeEvent::GadgetStarted(_) => "gadget_started",
                TreeEvent::GadgetCompleted(_) => "gadget_completed",
                TreeEvent::GadgetSkipped(_) => "gadget_skipped",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "llm_added",
                "gadget_added",
                "gadget_started",
                "gadget_completed",
                "llm_completed",
            ]
        );
    }

    #[tokio::test]
    async fn unsubscribe_stops_forwarding() {
        let tree = Arc::new(ExecutionTree::new());
        let recorder = Arc::new(Recorder {
            events: std::sync::Mutex::new(Vec::new()),
        });
        let unsub = tree.on_all(recorder.clone());
        unsub.cancel();

        tree.add_llm_call(0, "m".to_string(), None).await;
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn s3_subagent_context_derivation() {
        // root LLM call A -> gadget browse-1 -> child LLM call B -> gadget inner-1
        let tree = Arc::new(ExecutionTree::new());
        let call_a = tree.add_llm_call(0, "m".to_string(), None).await;
        let browse_1 = tree
            .add_gadget("browse-1".to_string(), "BrowseWeb".to_string(), None, call_a, vec![])
            .await;
        let call_b = tree.add_llm_call(0, "m".to_string(), Some(browse_1.clone())).await;
        let inner_1 = tree
            .add_gadget("inner-1".to_string(), "InnerTool".to_string(), None, call_b, vec![])
            .await;

        let ctx = tree.subagent_context(&inner_1).expect("inner-1 has a gadget ancestor");
        assert_eq!(ctx.parent_gadget_invocation_id, "browse-1");
        assert!(ctx.depth >= 1);

        assert!(tree.subagent_context(&browse_1).is_none());
    }

    #[tokio::test]
    async fn skip_gadget_records_dependency_reason() {
        let tree = Arc::new(ExecutionTree::new());
        let llm = tree.add_llm_call(0, "m".to_string(), None).await;
        let gadget = tree
            .add_gadget("inv-2".to_string(), "Tool".to_string(), None, llm, vec!["inv-1".to_string()])
            .await;
        tree.skip_gadget(&gadget, "inv-1", "timed out", "dependency failed")
            .await;
        let node = tree.get_node(&gadget).unwrap();
        let gadget_node = node.as_gadget().unwrap();
        assert_eq!(gadget_node.status, GadgetStatus::Skipped);
        assert!(gadget_node.error.as_ref().unwrap().contains("inv-1"));
    }
}
