pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod conversation;
pub mod graph;
pub mod intent;
pub mod tools;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use checkpoint::{Checkpoint, Suspension};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmConfig, LlmProvider, LoadOptions, LogFormat, LoggingConfig, ServerConfig};
pub use conversation::{ConversationState, Message, Role, ToolCallRequest};
pub use graph::{route_after, NodeName};
pub use intent::{BuyIntent, IntentExtractor};
pub use tools::{
    get_stock_price_spec, prepare_buy, prepare_buy_spec, PendingBuy, PriceSource,
    StaticPriceSource, ToolError, ToolSpec, DECLINED_MESSAGE, GET_STOCK_PRICE_TOOL,
    MANUAL_PREPARE_BUY_CALL_ID, PENDING_BUY_MARKER, PREPARE_BUY_TOOL,
};
