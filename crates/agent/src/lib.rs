//! Agent runtime - drives the chatbot/tools/approval graph per thread.
//!
//! The runtime is a constrained loop over three nodes:
//! 1. **Chatbot** (`engine`) - detected buy intent prepares a pending order
//!    directly; anything else goes to the chat model with tools bound
//! 2. **Tools** (`tools`) - executes model-issued tool calls
//! 3. **Approval** (`engine`) - parks the thread on a suspension until a
//!    human answers through `resume`
//!
//! # Key Types
//!
//! - `WorkflowEngine` - main orchestrator (see `engine` module)
//! - `ChatModel` - pluggable trait for OpenAI-compatible providers
//! - `CheckpointStore` - per-thread snapshot storage
//!
//! # Safety Principle
//!
//! The model never executes a trade. A buy only becomes real when a human
//! approves the suspension, and the approval append happens exactly once on
//! the resume path.

pub mod checkpoint;
pub mod engine;
pub mod llm;
pub mod tools;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore};
pub use engine::{EngineError, InvokeOutcome, WorkflowEngine};
pub use llm::{ChatModel, ModelError, ModelReply, OpenAiChatModel, ScriptedChatModel};
pub use tools::{Tool, ToolRegistry};
