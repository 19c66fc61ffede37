use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use thiserror::Error;
use tradebot_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use tradebot_core::checkpoint::{Checkpoint, Suspension};
use tradebot_core::conversation::{ConversationState, Message, Role};
use tradebot_core::graph::{route_after, NodeName};
use tradebot_core::intent::IntentExtractor;
use tradebot_core::tools::{
    prepare_buy, PendingBuy, PriceSource, ToolError, DECLINED_MESSAGE, MANUAL_PREPARE_BUY_CALL_ID,
};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::llm::{ChatModel, ModelError};
use crate::tools::ToolRegistry;

const ENGINE_ACTOR: &str = "workflow-engine";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("thread `{thread_id}` has no pending suspension")]
    NoPendingSuspension { thread_id: String },
    #[error("thread `{thread_id}` is awaiting an approval decision")]
    SuspensionPending { thread_id: String },
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Result of driving a thread until it either finishes or needs a human.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvokeOutcome {
    Completed { response: String },
    ApprovalRequired { prompt: String, suspension_id: String },
}

/// Drives the chatbot/tools/approval graph for each thread.
///
/// A step that fails (unknown symbol, model outage) writes no checkpoint, so
/// the thread's last good snapshot stands and the caller can retry the same
/// message without duplicating state.
pub struct WorkflowEngine {
    model: Arc<dyn ChatModel>,
    price_source: Arc<dyn PriceSource>,
    tools: ToolRegistry,
    extractor: IntentExtractor,
    checkpoints: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditSink>,
    thread_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkflowEngine {
    pub fn build(
        model: Arc<dyn ChatModel>,
        price_source: Arc<dyn PriceSource>,
        checkpoints: Arc<dyn CheckpointStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            model,
            price_source: price_source.clone(),
            tools: ToolRegistry::with_builtin(price_source),
            extractor: IntentExtractor::new(),
            checkpoints,
            audit,
            thread_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Runs one user message through the graph. Fails fast if the thread is
    /// parked on an approval; `resume` is the only way forward from there.
    pub async fn invoke(
        &self,
        thread_id: &str,
        text: &str,
    ) -> Result<InvokeOutcome, EngineError> {
        let lock = self.thread_lock(thread_id);
        let _guard = lock.lock().await;

        let context = self.context_for(thread_id);
        let mut checkpoint = self.checkpoints.get(thread_id).unwrap_or_default();
        if checkpoint.is_paused() {
            return Err(EngineError::SuspensionPending { thread_id: thread_id.to_string() });
        }

        checkpoint.state.push(Message::user(text));
        self.run(thread_id, checkpoint, NodeName::START, &context).await
    }

    /// Feeds a human decision into the thread's suspended node. The stored
    /// suspension is consumed whether the decision approves or declines; a
    /// later buy raises a fresh one.
    pub async fn resume(
        &self,
        thread_id: &str,
        decision: &str,
    ) -> Result<InvokeOutcome, EngineError> {
        let lock = self.thread_lock(thread_id);
        let _guard = lock.lock().await;

        let context = self.context_for(thread_id);
        let mut checkpoint = self
            .checkpoints
            .get(thread_id)
            .ok_or_else(|| EngineError::NoPendingSuspension { thread_id: thread_id.to_string() })?;
        let suspension = checkpoint.paused.take().ok_or_else(|| {
            EngineError::NoPendingSuspension { thread_id: thread_id.to_string() }
        })?;

        let approved = decision == "yes";
        let response = if approved {
            suspension.pending.approved_message()
        } else {
            DECLINED_MESSAGE.to_string()
        };
        checkpoint.state.push(Message::assistant(response));

        self.audit.emit(
            AuditEvent::new(
                &context,
                if approved { "approval.approved" } else { "approval.declined" },
                AuditCategory::Approval,
                if approved { AuditOutcome::Success } else { AuditOutcome::Rejected },
            )
            .with_metadata("suspension_id", suspension.suspension_id.as_str())
            .with_metadata("decision", decision),
        );
        tracing::info!(
            event_name = "engine.resumed",
            thread_id,
            suspension_id = %suspension.suspension_id,
            approved,
        );

        let next = route_after(suspension.node, checkpoint.state.last());
        self.run(thread_id, checkpoint, next, &context).await
    }

    async fn run(
        &self,
        thread_id: &str,
        mut checkpoint: Checkpoint,
        mut node: NodeName,
        context: &AuditContext,
    ) -> Result<InvokeOutcome, EngineError> {
        loop {
            match node {
                NodeName::End => {
                    let response = checkpoint
                        .state
                        .last()
                        .map(|message| message.content.clone())
                        .unwrap_or_default();
                    self.checkpoints.put(thread_id, checkpoint);
                    self.audit.emit(AuditEvent::new(
                        context,
                        "engine.run_completed",
                        AuditCategory::Node,
                        AuditOutcome::Success,
                    ));
                    tracing::info!(event_name = "engine.run_completed", thread_id);
                    return Ok(InvokeOutcome::Completed { response });
                }
                NodeName::Chatbot => self.chatbot_node(&mut checkpoint.state).await?,
                NodeName::Tools => self.tools_node(&mut checkpoint.state).await?,
                NodeName::Approval => {
                    if let Some(suspension) = approval_node(&checkpoint.state) {
                        return Ok(self.suspend(thread_id, checkpoint, suspension, context));
                    }
                }
            }
            node = route_after(node, checkpoint.state.last());
        }
    }

    fn suspend(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        suspension: Suspension,
        context: &AuditContext,
    ) -> InvokeOutcome {
        self.audit.emit(
            AuditEvent::new(
                context,
                "approval.suspension_raised",
                AuditCategory::Approval,
                AuditOutcome::Success,
            )
            .with_metadata("suspension_id", suspension.suspension_id.as_str())
            .with_metadata("symbol", suspension.pending.symbol.as_str())
            .with_metadata("quantity", suspension.pending.quantity.to_string()),
        );
        tracing::info!(
            event_name = "engine.suspended",
            thread_id,
            suspension_id = %suspension.suspension_id,
            symbol = %suspension.pending.symbol,
        );

        let prompt = suspension.prompt.clone();
        let suspension_id = suspension.suspension_id.clone();
        self.checkpoints.put(thread_id, Checkpoint::paused(checkpoint.state, suspension));
        InvokeOutcome::ApprovalRequired { prompt, suspension_id }
    }

    /// Detected buy intent short-circuits the model entirely; everything else
    /// goes to the chat model with both tools bound.
    async fn chatbot_node(&self, state: &mut ConversationState) -> Result<(), EngineError> {
        let buy = match state.last() {
            Some(last) if last.role == Role::User => self.extractor.extract(&last.content),
            _ => None,
        };

        if let Some(intent) = buy {
            let price = self.price_source.price(&intent.symbol)?;
            let total = price * Decimal::from(intent.quantity);
            let token = prepare_buy(&intent.symbol, intent.quantity, total);
            state.push(Message::tool(token, MANUAL_PREPARE_BUY_CALL_ID));
            return Ok(());
        }

        let reply = self.model.complete(state.messages(), &self.tools.specs()).await?;
        if reply.tool_calls.is_empty() {
            state.push(Message::assistant(reply.content));
        } else {
            state.push(Message::assistant_with_calls(reply.content, reply.tool_calls));
        }
        Ok(())
    }

    async fn tools_node(&self, state: &mut ConversationState) -> Result<(), EngineError> {
        let calls = state
            .last()
            .filter(|message| message.has_tool_calls())
            .map(|message| message.tool_calls.clone())
            .unwrap_or_default();

        for call in calls {
            let output = self.tools.execute(&call.tool_name, &call.arguments).await?;
            state.push(Message::tool(output, call.call_id));
        }
        Ok(())
    }

    fn thread_lock(&self, thread_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.thread_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(thread_id.to_string()).or_default().clone()
    }

    fn context_for(&self, thread_id: &str) -> AuditContext {
        AuditContext::new(
            Some(thread_id.to_string()),
            Uuid::new_v4().to_string(),
            ENGINE_ACTOR,
        )
    }
}

/// Raises a suspension when the last message is a pending-buy token;
/// anything else passes through untouched.
fn approval_node(state: &ConversationState) -> Option<Suspension> {
    let last = state.last()?;
    if !last.is_tool() {
        return None;
    }
    let pending = PendingBuy::parse(&last.content)?;
    let prompt = pending.approval_prompt();
    Some(Suspension::new(NodeName::Approval, prompt, pending))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tradebot_core::audit::InMemoryAuditSink;
    use tradebot_core::conversation::ToolCallRequest;
    use tradebot_core::tools::{StaticPriceSource, ToolError};

    use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
    use crate::llm::{ModelReply, ScriptedChatModel};

    use super::{EngineError, InvokeOutcome, WorkflowEngine};

    struct Harness {
        engine: WorkflowEngine,
        checkpoints: Arc<InMemoryCheckpointStore>,
        audit: Arc<InMemoryAuditSink>,
    }

    fn harness(replies: Vec<ModelReply>) -> Harness {
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let audit = Arc::new(InMemoryAuditSink::default());
        let engine = WorkflowEngine::build(
            Arc::new(ScriptedChatModel::with_replies(replies)),
            Arc::new(StaticPriceSource::default()),
            checkpoints.clone(),
            audit.clone(),
        );
        Harness { engine, checkpoints, audit }
    }

    async fn suspend_buy(harness: &Harness, thread_id: &str) -> (String, String) {
        match harness.engine.invoke(thread_id, "buy 10 MSFT").await.expect("invoke") {
            InvokeOutcome::ApprovalRequired { prompt, suspension_id } => (prompt, suspension_id),
            other => panic!("expected a suspension, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn buy_intent_suspends_with_rounded_prompt() {
        let harness = harness(vec![]);
        let (prompt, suspension_id) = suspend_buy(&harness, "t1").await;

        assert_eq!(prompt, "Approve buying 10 MSFT stocks for $4155.80?");
        assert!(!suspension_id.is_empty());

        let checkpoint = harness.checkpoints.get("t1").expect("persisted checkpoint");
        assert!(checkpoint.is_paused());
        assert!(harness
            .audit
            .events()
            .iter()
            .any(|event| event.event_type == "approval.suspension_raised"));
    }

    #[tokio::test]
    async fn approving_records_the_trade_exactly_once() {
        let harness = harness(vec![]);
        suspend_buy(&harness, "t1").await;

        let outcome = harness.engine.resume("t1", "yes").await.expect("resume");
        assert_eq!(
            outcome,
            InvokeOutcome::Completed {
                response: "Approved: Bought 10 shares of MSFT for $4155.80".to_string()
            }
        );

        let checkpoint = harness.checkpoints.get("t1").expect("persisted checkpoint");
        assert!(!checkpoint.is_paused());

        // The suspension was consumed; a second decision has nowhere to land.
        let again = harness.engine.resume("t1", "yes").await;
        assert!(matches!(again, Err(EngineError::NoPendingSuspension { .. })));
    }

    #[tokio::test]
    async fn any_decision_other_than_yes_declines() {
        for decision in ["no", "YES", "yes please", ""] {
            let harness = harness(vec![]);
            suspend_buy(&harness, "t1").await;

            let outcome = harness.engine.resume("t1", decision).await.expect("resume");
            assert_eq!(
                outcome,
                InvokeOutcome::Completed { response: "Trade declined by human.".to_string() },
                "decision {decision:?} should decline"
            );
        }
    }

    #[tokio::test]
    async fn resume_without_suspension_is_rejected_and_state_untouched() {
        let harness = harness(vec![ModelReply::text("hello")]);

        let missing = harness.engine.resume("ghost", "yes").await;
        assert!(matches!(missing, Err(EngineError::NoPendingSuspension { .. })));
        assert!(harness.checkpoints.get("ghost").is_none());

        harness.engine.invoke("t1", "hi there").await.expect("chat");
        let completed = harness.engine.resume("t1", "yes").await;
        assert!(matches!(completed, Err(EngineError::NoPendingSuspension { .. })));
    }

    #[tokio::test]
    async fn invoke_on_a_paused_thread_is_rejected() {
        let harness = harness(vec![]);
        suspend_buy(&harness, "t1").await;

        let blocked = harness.engine.invoke("t1", "buy 1 AAPL").await;
        assert!(matches!(blocked, Err(EngineError::SuspensionPending { .. })));

        // Still resumable after the rejected invoke.
        let outcome = harness.engine.resume("t1", "no").await.expect("resume");
        assert!(matches!(outcome, InvokeOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn plain_chat_goes_to_the_model() {
        let harness = harness(vec![ModelReply::text("MSFT closed at $415.58.")]);

        let outcome = harness.engine.invoke("t1", "how is MSFT doing?").await.expect("invoke");
        assert_eq!(
            outcome,
            InvokeOutcome::Completed { response: "MSFT closed at $415.58.".to_string() }
        );
        assert!(!harness.checkpoints.get("t1").expect("checkpoint").is_paused());
    }

    #[tokio::test]
    async fn model_issued_price_lookup_runs_through_tools_node() {
        let harness = harness(vec![ModelReply::with_calls(
            "",
            vec![ToolCallRequest {
                call_id: "call-1".to_string(),
                tool_name: "get_stock_price".to_string(),
                arguments: json!({"symbol": "NVDA"}),
            }],
        )]);

        let outcome = harness.engine.invoke("t1", "what does nvidia cost?").await.expect("invoke");
        assert_eq!(outcome, InvokeOutcome::Completed { response: "117.02".to_string() });

        let checkpoint = harness.checkpoints.get("t1").expect("checkpoint");
        let last = checkpoint.state.last().expect("tool output recorded");
        assert_eq!(last.tool_call_id.as_deref(), Some("call-1"));
    }

    #[tokio::test]
    async fn model_issued_prepare_buy_suspends_like_manual_intent() {
        let harness = harness(vec![ModelReply::with_calls(
            "",
            vec![ToolCallRequest {
                call_id: "call-2".to_string(),
                tool_name: "prepare_buy".to_string(),
                arguments: json!({"symbol": "AAPL", "quantity": 2, "total_price": "455.70"}),
            }],
        )]);

        let outcome = harness.engine.invoke("t1", "grab me a couple of apple shares").await;
        match outcome.expect("invoke") {
            InvokeOutcome::ApprovalRequired { prompt, .. } => {
                assert_eq!(prompt, "Approve buying 2 AAPL stocks for $455.70?");
            }
            other => panic!("expected a suspension, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_symbol_aborts_without_writing_a_checkpoint() {
        let harness = harness(vec![]);

        let failed = harness.engine.invoke("t1", "buy 5 ZZZZ").await;
        assert!(matches!(
            failed,
            Err(EngineError::Tool(ToolError::UnknownSymbol(ref symbol))) if symbol == "ZZZZ"
        ));
        assert!(harness.checkpoints.get("t1").is_none());

        // The thread is not wedged; a valid message proceeds normally.
        let outcome = harness.engine.invoke("t1", "buy 1 TSLA").await.expect("invoke");
        assert!(matches!(outcome, InvokeOutcome::ApprovalRequired { .. }));
    }

    #[tokio::test]
    async fn threads_suspend_and_resolve_independently() {
        let harness = harness(vec![]);
        let (_, first) = suspend_buy(&harness, "t1").await;
        let (_, second) = suspend_buy(&harness, "t2").await;
        assert_ne!(first, second);

        harness.engine.resume("t1", "yes").await.expect("approve t1");

        // t2 is still parked on its own suspension.
        let still_paused = harness.checkpoints.get("t2").expect("checkpoint");
        assert!(still_paused.is_paused());
        let outcome = harness.engine.resume("t2", "no").await.expect("decline t2");
        assert_eq!(
            outcome,
            InvokeOutcome::Completed { response: "Trade declined by human.".to_string() }
        );
    }

    #[tokio::test]
    async fn a_resumed_thread_can_suspend_again_with_a_fresh_id() {
        let harness = harness(vec![]);
        let (_, first) = suspend_buy(&harness, "t1").await;
        harness.engine.resume("t1", "yes").await.expect("approve");

        let (_, second) = suspend_buy(&harness, "t1").await;
        assert_ne!(first, second);

        let checkpoint = harness.checkpoints.get("t1").expect("checkpoint");
        // Both the earlier approval and the new suspension live in one log.
        assert!(checkpoint.is_paused());
        assert!(checkpoint
            .state
            .messages()
            .iter()
            .any(|message| message.content.starts_with("Approved: Bought 10 shares")));
    }

    #[tokio::test]
    async fn audit_trail_carries_thread_id_through_suspension_and_approval() {
        let harness = harness(vec![]);
        let (_, suspension_id) = suspend_buy(&harness, "t1").await;
        harness.engine.resume("t1", "yes").await.expect("approve");

        let events = harness.audit.events();
        let raised = events
            .iter()
            .find(|event| event.event_type == "approval.suspension_raised")
            .expect("suspension event recorded");
        assert_eq!(raised.thread_id.as_deref(), Some("t1"));
        assert_eq!(raised.metadata.get("suspension_id"), Some(&suspension_id));

        let approved = events
            .iter()
            .find(|event| event.event_type == "approval.approved")
            .expect("approval event recorded");
        assert_eq!(approved.thread_id.as_deref(), Some("t1"));
        assert_eq!(approved.metadata.get("suspension_id"), Some(&suspension_id));
        assert_eq!(approved.metadata.get("decision").map(String::as_str), Some("yes"));
    }

    #[tokio::test]
    async fn declining_emits_a_rejected_audit_event() {
        let harness = harness(vec![]);
        suspend_buy(&harness, "t1").await;
        harness.engine.resume("t1", "no").await.expect("decline");

        let events = harness.audit.events();
        let declined = events
            .iter()
            .find(|event| event.event_type == "approval.declined")
            .expect("decline event recorded");
        assert_eq!(declined.thread_id.as_deref(), Some("t1"));
        assert_eq!(declined.outcome, tradebot_core::audit::AuditOutcome::Rejected);
        assert!(!events.iter().any(|event| event.event_type == "approval.approved"));
    }

    #[tokio::test]
    async fn concurrent_invokes_on_distinct_threads_do_not_interleave_state() {
        let harness = harness(vec![]);

        let (first, second) = tokio::join!(
            harness.engine.invoke("t1", "buy 10 MSFT"),
            harness.engine.invoke("t2", "buy 2 AAPL"),
        );
        assert!(matches!(first.expect("t1 invoke"), InvokeOutcome::ApprovalRequired { .. }));
        assert!(matches!(second.expect("t2 invoke"), InvokeOutcome::ApprovalRequired { .. }));

        let msft = harness.checkpoints.get("t1").expect("t1 checkpoint");
        assert_eq!(msft.state.len(), 2);
        assert!(msft.state.messages().iter().all(|message| message.content.contains("MSFT")));

        let aapl = harness.checkpoints.get("t2").expect("t2 checkpoint");
        assert_eq!(aapl.state.len(), 2);
        assert!(aapl.state.messages().iter().all(|message| message.content.contains("AAPL")));
    }

    #[tokio::test]
    async fn racing_invokes_on_one_thread_serialize() {
        let harness = harness(vec![]);

        let (first, second) = tokio::join!(
            harness.engine.invoke("t1", "buy 10 MSFT"),
            harness.engine.invoke("t1", "buy 2 AAPL"),
        );

        // Whichever acquired the thread lock first suspends; the other finds
        // the thread already parked.
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|outcome| matches!(outcome, Err(EngineError::SuspensionPending { .. }))));
        assert!(harness.checkpoints.get("t1").expect("checkpoint").is_paused());
    }

    #[tokio::test]
    async fn conversation_survives_across_turns() {
        let harness = harness(vec![
            ModelReply::text("Hello!"),
            ModelReply::text("Goodbye!"),
        ]);

        harness.engine.invoke("t1", "hi").await.expect("first turn");
        harness.engine.invoke("t1", "bye").await.expect("second turn");

        let checkpoint = harness.checkpoints.get("t1").expect("checkpoint");
        let contents = checkpoint
            .state
            .messages()
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["hi", "Hello!", "bye", "Goodbye!"]);
    }
}
