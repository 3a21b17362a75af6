//! The agent loop (Component F): the iteration-bounded turn loop that
//! streams a completion, parses it incrementally, dispatches the resulting
//! gadget DAG, and appends results back as transcript turns.
//!
//! Grounded on `agent/agentic_loop.rs::run_agentic_loop`'s overall shape
//! (iteration loop, finish-reason matching, usage accumulation) but
//! generalized from a flat sequential tool-call loop into one that respects
//! a declared dependency DAG with concurrent within-wave dispatch.

mod dag;
pub mod subagent;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures::future::join_all;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};

use crate::config::MarkerConfig;
use crate::error::{Error, Result};
use crate::gadget::{GadgetExecutionContext, GadgetRegistry};
use crate::markers::coerce_scalars;
use crate::message::Message;
use crate::parser::{GadgetCall, Parser, StreamEvent};
use crate::prompt::PromptAssembler;
use crate::provider::LlmProvider;
use crate::tree::{ExecutionTree, NodeId, Usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    MaxIterations,
    Cancelled,
}

pub struct AgentLoopInput {
    pub transcript: Vec<Message>,
    pub model: String,
    pub registry: Arc<GadgetRegistry>,
    pub markers: MarkerConfig,
    pub max_iterations: u32,
    pub tree: Arc<ExecutionTree>,
    pub parent_gadget_id: Option<NodeId>,
    pub cancel: watch::Receiver<bool>,
}

impl AgentLoopInput {
    /// Convenience constructor for a root (non-subagent) run, with its own
    /// fresh tree and an always-false cancellation signal.
    pub fn root(
        transcript: Vec<Message>,
        model: String,
        registry: Arc<GadgetRegistry>,
        markers: MarkerConfig,
        max_iterations: u32,
    ) -> Self {
        let (_tx, cancel) = watch::channel(false);
        Self {
            transcript,
            model,
            registry,
            markers,
            max_iterations,
            tree: Arc::new(ExecutionTree::new()),
            parent_gadget_id: None,
            cancel,
        }
    }
}

pub struct AgentLoopOutput {
    pub final_messages: Vec<Message>,
    pub finish_reason: FinishReason,
    pub total_usage: Usage,
}

enum CallOutcome {
    Success(String),
    Failed(String),
    Skipped { failed_dep: String, failed_dep_error: String },
}

/// Runs the streaming-parse-dispatch-append iteration loop.
pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    prompt: Arc<PromptAssembler>,
    default_gadget_timeout: Option<Duration>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        prompt: Arc<PromptAssembler>,
        default_gadget_timeout: Option<Duration>,
    ) -> Self {
        Self {
            provider,
            prompt,
            default_gadget_timeout,
        }
    }

    pub async fn run(&self, input: AgentLoopInput) -> Result<AgentLoopOutput> {
        let AgentLoopInput {
            mut transcript,
            model,
            registry,
            markers,
            max_iterations,
            tree,
            parent_gadget_id,
            cancel,
        } = input;

        let mut iteration = 0u32;
        let mut total_usage = Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        };
        let mut final_pass = false;

        loop {
            if *cancel.borrow() {
                return Ok(AgentLoopOutput {
                    final_messages: transcript,
                    finish_reason: FinishReason::Cancelled,
                    total_usage,
                });
            }

            let span = info_span!("iteration", iteration, max_iterations);
            let llm_node_id = tree
                .add_llm_call(iteration, model.clone(), parent_gadget_id.clone())
                .instrument(span.clone())
                .await;

            let stream_result = self
                .stream_with_retry(&markers, &transcript, &model, &cancel, &tree, &llm_node_id)
                .instrument(span.clone())
                .await;

            let (text, calls, finish_reason, usage) = match stream_result {
                Err(e) => {
                    tree.fail_llm_call(&llm_node_id, e.to_string()).await;
                    return Err(e);
                }
                Ok(v) => v,
            };

            if let Some(u) = &usage {
                total_usage.prompt_tokens += u.prompt_tokens;
                total_usage.completion_tokens += u.completion_tokens;
                total_usage.total_tokens += u.total_tokens;
            }
            tree.complete_llm_call(
                &llm_node_id,
                Some(text.clone()),
                usage,
                Some(finish_reason.clone()),
                None,
            )
            .await;

            if calls.is_empty() || final_pass {
                transcript.push(Message::assistant(text));
                let reason = if final_pass {
                    FinishReason::MaxIterations
                } else {
                    FinishReason::Stop
                };
                return Ok(AgentLoopOutput {
                    final_messages: transcript,
                    finish_reason: reason,
                    total_usage,
                });
            }

            info!(iteration, call_count = calls.len(), "dispatching gadget calls");

            self.dispatch_calls(&registry, &tree, &llm_node_id, &calls, &cancel, &span)
                .await
                .into_iter()
                .for_each(|(call, result_text)| {
                    let (assistant_msg, user_msg) = self.prompt.build_replay_messages(&call, &result_text);
                    transcript.push(assistant_msg);
                    transcript.push(user_msg);
                });

            iteration += 1;
            if iteration >= max_iterations {
                transcript.push(Message::user(
                    "Maximum iterations reached. Please provide your final answer now; no further gadget calls will be executed.",
                ));
                final_pass = true;
            }
        }
    }

    async fn stream_with_retry(
        &self,
        markers: &MarkerConfig,
        transcript: &[Message],
        model: &str,
        cancel: &watch::Receiver<bool>,
        tree: &Arc<ExecutionTree>,
        llm_node_id: &NodeId,
    ) -> Result<(String, Vec<GadgetCall>, String, Option<Usage>)> {
        match self.stream_once(markers, transcript, model, cancel, tree, llm_node_id).await {
            Ok(v) => Ok(v),
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "retryable LLM error, retrying once");
                let mut backoff = ExponentialBackoff::default();
                if let Some(delay) = backoff.next_backoff() {
                    tokio::time::sleep(delay).await;
                }
                self.stream_once(markers, transcript, model, cancel, tree, llm_node_id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn stream_once(
        &self,
        markers: &MarkerConfig,
        transcript: &[Message],
        model: &str,
        cancel: &watch::Receiver<bool>,
        tree: &Arc<ExecutionTree>,
        llm_node_id: &NodeId,
    ) -> Result<(String, Vec<GadgetCall>, String, Option<Usage>)> {
        let mut parser = Parser::new(markers.clone())?;
        let mut stream = self.provider.generate_stream(transcript, model).await?;

        let mut text = String::new();
        let mut calls = Vec::new();
        let mut finish_reason = "stop".to_string();
        let mut usage = None;

        while let Some(chunk) = stream.next().await {
            if *cancel.borrow() {
                return Err(Error::Cancelled);
            }
            let chunk = chunk?;
            if let Some(delta) = &chunk.delta {
                tree.emit_llm_call_chunk(llm_node_id, delta.clone()).await;
                for event in parser.feed(delta) {
                    match event {
                        StreamEvent::Text(t) => text.push_str(&t),
                        StreamEvent::GadgetCall(c) => calls.push(c),
                    }
                }
            }
            if let Some(fr) = chunk.finish_reason {
                finish_reason = fr;
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }
        for event in parser.finalize() {
            match event {
                StreamEvent::Text(t) => text.push_str(&t),
                StreamEvent::GadgetCall(c) => calls.push(c),
            }
        }

        Ok((text, calls, finish_reason, usage))
    }

    /// Executes one iteration's calls respecting the dependency DAG,
    /// returning `(call, result_text)` pairs in original invocation order
    /// (the order the parser emitted them), regardless of completion order.
    async fn dispatch_calls(
        &self,
        registry: &Arc<GadgetRegistry>,
        tree: &Arc<ExecutionTree>,
        llm_node_id: &NodeId,
        calls: &[GadgetCall],
        cancel: &watch::Receiver<bool>,
        span: &tracing::Span,
    ) -> Vec<(GadgetCall, String)> {
        let dag = dag::build_dag(calls);
        let call_by_id: HashMap<&str, &GadgetCall> =
            calls.iter().map(|c| (c.invocation_id.as_str(), c)).collect();

        let mut node_ids = HashMap::new();
        for call in calls {
            let node_id = tree
                .add_gadget(
                    call.invocation_id.clone(),
                    call.gadget_name.clone(),
                    call.parameters.clone(),
                    llm_node_id.clone(),
                    call.dependencies.clone(),
                )
                .await;
            node_ids.insert(call.invocation_id.clone(), node_id);
        }

        let mut outcomes: HashMap<String, CallOutcome> = HashMap::new();

        'waves: for wave in &dag.waves {
            let mut futures = Vec::new();
            for invocation_id in wave {
                let call = call_by_id[invocation_id.as_str()];
                let node_id = node_ids[invocation_id].clone();

                if *cancel.borrow() {
                    tree.skip_gadget(&node_id, "", "", "cancelled").await;
                    outcomes.insert(
                        invocation_id.clone(),
                        CallOutcome::Skipped {
                            failed_dep: String::new(),
                            failed_dep_error: "cancelled".to_string(),
                        },
                    );
                    continue;
                }

                if let Some(parse_error) = &call.parse_error {
                    let message = parse_error.clone();
                    tree.complete_gadget(&node_id, None, Some(message.clone()), None, None, None)
                        .await;
                    outcomes.insert(invocation_id.clone(), CallOutcome::Failed(message));
                    continue;
                }

                if let Some(err) = dag.per_call_errors.get(invocation_id) {
                    let message = err.to_string();
                    tree.complete_gadget(&node_id, None, Some(message.clone()), None, None, None)
                        .await;
                    outcomes.insert(invocation_id.clone(), CallOutcome::Failed(message));
                    continue;
                }

                let failed_dep = call.dependencies.iter().find_map(|dep| match outcomes.get(dep) {
                    Some(CallOutcome::Failed(msg)) => Some((dep.clone(), msg.clone())),
                    Some(CallOutcome::Skipped { .. }) => {
                        Some((dep.clone(), "upstream dependency skipped".to_string()))
                    }
                    _ => None,
                });

                if let Some((failed_dep, failed_dep_error)) = failed_dep {
                    tree.skip_gadget(&node_id, &failed_dep, &failed_dep_error, "dependency failed")
                        .await;
                    outcomes.insert(
                        invocation_id.clone(),
                        CallOutcome::Skipped {
                            failed_dep,
                            failed_dep_error,
                        },
                    );
                    continue;
                }

                futures.push(
                    self.execute_one(registry, tree, node_id, call.clone(), cancel.clone())
                        .instrument(span.clone()),
                );
            }

            if !futures.is_empty() {
                for (invocation_id, outcome) in join_all(futures).await {
                    outcomes.insert(invocation_id, outcome);
                }
            }

            if *cancel.borrow() {
                break 'waves;
            }
        }

        // Cancellation observed after a wave's join_all breaks the loop
        // before later waves are ever built, leaving their gadget nodes
        // stuck `Pending`. The tree must reach a terminal state for every
        // node it ever registered, so sweep whatever never got an outcome.
        for (invocation_id, node_id) in &node_ids {
            if outcomes.contains_key(invocation_id) {
                continue;
            }
            tree.skip_gadget(node_id, "", "", "cancelled").await;
            outcomes.insert(
                invocation_id.clone(),
                CallOutcome::Skipped {
                    failed_dep: String::new(),
                    failed_dep_error: "cancelled".to_string(),
                },
            );
        }

        calls
            .iter()
            .map(|call| {
                let text = match outcomes.get(&call.invocation_id) {
                    Some(CallOutcome::Success(s)) => s.clone(),
                    Some(CallOutcome::Failed(e)) => format!("Error: {e}"),
                    Some(CallOutcome::Skipped {
                        failed_dep,
                        failed_dep_error,
                    }) => format!("Skipped: dependency {failed_dep} failed: {failed_dep_error}"),
                    None => "Error: call was never scheduled".to_string(),
                };
                (call.clone(), text)
            })
            .collect()
    }

    async fn execute_one(
        &self,
        registry: &Arc<GadgetRegistry>,
        tree: &Arc<ExecutionTree>,
        node_id: NodeId,
        call: GadgetCall,
        cancel: watch::Receiver<bool>,
    ) -> (String, CallOutcome) {
        tree.start_gadget(&node_id).await;

        let gadget = match registry.get(&call.gadget_name) {
            Some(g) => g,
            None => {
                let message = Error::UnknownGadget(call.gadget_name.clone()).to_string();
                tree.complete_gadget(&node_id, None, Some(message.clone()), Some(0), None, None)
                    .await;
                return (call.invocation_id, CallOutcome::Failed(message));
            }
        };

        let params = coerce_scalars(
            call.parameters
                .clone()
                .unwrap_or_else(|| crate::markers::ParameterTree::Object(Default::default())),
        );

        let timeout_ms = gadget.timeout_ms().or_else(|| self.default_gadget_timeout.map(|d| d.as_millis() as u64));
        let start = Instant::now();
        let context = GadgetExecutionContext {
            tree: tree.clone(),
            node_id: node_id.clone(),
        };
        let exec_future = gadget.execute(params, cancel, context);

        let outcome_result = match timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), exec_future).await {
                Ok(inner) => inner,
                Err(_) => Err(Error::GadgetTimeout {
                    name: call.gadget_name.clone(),
                    invocation_id: call.invocation_id.clone(),
                    timeout_ms: ms,
                }),
            },
            None => exec_future.await,
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome_result {
            Ok(output) => {
                tree.complete_gadget(
                    &node_id,
                    Some(output.result.clone()),
                    None,
                    Some(elapsed_ms),
                    output.cost,
                    output.media,
                )
                .await;
                (call.invocation_id, CallOutcome::Success(output.result))
            }
            Err(e) => {
                let message = e.to_string();
                tree.complete_gadget(&node_id, None, Some(message.clone()), Some(elapsed_ms), None, None)
                    .await;
                (call.invocation_id, CallOutcome::Failed(message))
            }
        }
    }
}
