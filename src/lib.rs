//! # llmist
//!
//! An LLM-agent runtime that turns a conversational completion stream into
//! an iterative tool-using agent without relying on provider-native
//! function-calling APIs. The defining trick is a textual tool-call
//! protocol embedded in the raw token stream: the model emits sentinel
//! markers with named parameter blocks ("gadget calls"), parsed
//! incrementally as tokens arrive, dispatched as gadget invocations
//! (respecting a declared dependency DAG), fed back into the next turn, and
//! recursively spawned as subagents with their own nested loop.
//!
//! ## Architecture
//!
//! - **Markers & arg-path resolver** (`markers`): the slash-separated
//!   parameter-path grammar and the pure function that rebuilds nested
//!   parameter trees from flat `(path, value)` pairs.
//! - **Streaming parser** (`parser`): an incremental state machine that
//!   recognizes begin/arg/end markers mid-token and emits `text` /
//!   `gadget_call` events only once a call is complete.
//! - **Gadgets** (`gadget`): the callable-tool contract (name, schema,
//!   timeout, `execute`) and the registry that holds them.
//! - **Execution tree** (`tree`): a concurrent, append-mostly record of
//!   every LLM call and gadget invocation in a run, including those nested
//!   inside recursively spawned subagents.
//! - **Hooks** (`hooks`): the tree-event-to-observer bridge that derives
//!   subagent context from tree topology.
//! - **Prompt assembly** (`prompt`): builds the system prompt describing
//!   the marker protocol and replays prior calls as transcript turns.
//! - **Agent loop** (`agent`): the iteration-bounded turn loop tying all of
//!   the above together, plus the subagent gadget pattern.
//! - **Provider** (`provider`): the `LlmProvider` trait vendor SDKs would
//!   implement, plus one generic HTTP/SSE reference adapter.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use llmist::agent::{AgentLoop, AgentLoopInput};
//! use llmist::config::MarkerConfig;
//! use llmist::gadget::GadgetRegistry;
//! use llmist::message::Message;
//! use llmist::prompt::{ParameterEncoding, PromptAssembler};
//! use llmist::provider::HttpChatProvider;
//! use llmist::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = llmist::config::ProviderConfig::from_env()?;
//!     let provider = Arc::new(HttpChatProvider::new(config)?);
//!     let registry = Arc::new(GadgetRegistry::new());
//!     let prompt = Arc::new(PromptAssembler::new(MarkerConfig::default(), ParameterEncoding::Block));
//!
//!     let system = prompt.build_system_message(&registry);
//!     let loop_ = AgentLoop::new(provider, prompt, None);
//!     let input = AgentLoopInput::root(
//!         vec![system, Message::user("hello")],
//!         "gpt-4o-mini".to_string(),
//!         registry,
//!         MarkerConfig::default(),
//!         10,
//!     );
//!     let _output = loop_.run(input).await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod gadget;
pub mod hooks;
pub mod markers;
pub mod message;
pub mod parser;
pub mod prompt;
pub mod provider;
pub mod tree;

pub use error::{Error, Result};

pub use agent::{AgentLoop, AgentLoopInput, AgentLoopOutput, FinishReason};
pub use gadget::{Gadget, GadgetOutput, GadgetRegistry};
pub use hooks::{AgentHooks, TreeHookBridge};
pub use markers::ParameterTree;
pub use message::{ContentPart, Message, Role};
pub use parser::{GadgetCall, Parser, StreamEvent};
pub use provider::{HttpChatProvider, LlmProvider};
pub use tree::{ExecutionTree, Node, NodeId, SubagentContext};

/// Crate version, from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, from `Cargo.toml`.
pub const NAME: &str = env!("CARGO_PKG_NAME");
