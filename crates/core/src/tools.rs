use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Wire prefix of the pending-action token. Routing to the approval gate keys
/// on this exact prefix, so the shape must stay stable:
/// `REQUEST_BUY::<SYMBOL>::<QUANTITY>::<TOTAL_PRICE>`.
pub const PENDING_BUY_MARKER: &str = "REQUEST_BUY::";

pub const GET_STOCK_PRICE_TOOL: &str = "get_stock_price";
pub const PREPARE_BUY_TOOL: &str = "prepare_buy";

/// Call id used when the chatbot node prepares a buy directly from extracted
/// intent instead of a model-issued call.
pub const MANUAL_PREPARE_BUY_CALL_ID: &str = "manual_prepare_buy";

pub const DECLINED_MESSAGE: &str = "Trade declined by human.";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown symbol `{0}`")]
    UnknownSymbol(String),
    #[error("unrecognized tool `{0}`")]
    UnknownTool(String),
    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },
}

/// Price lookup for a stock symbol. Deterministic from the engine's point of
/// view; an external market-data client can stand in behind the same trait.
pub trait PriceSource: Send + Sync {
    fn price(&self, symbol: &str) -> Result<Decimal, ToolError>;
}

#[derive(Clone, Debug)]
pub struct StaticPriceSource {
    prices: HashMap<String, Decimal>,
}

impl StaticPriceSource {
    pub fn with_prices(prices: Vec<(impl Into<String>, Decimal)>) -> Self {
        Self {
            prices: prices
                .into_iter()
                .map(|(symbol, price)| (symbol.into().to_ascii_uppercase(), price))
                .collect(),
        }
    }
}

impl Default for StaticPriceSource {
    fn default() -> Self {
        Self::with_prices(vec![
            ("MSFT", Decimal::new(41558, 2)),
            ("AAPL", Decimal::new(22785, 2)),
            ("GOOG", Decimal::new(17644, 2)),
            ("AMZN", Decimal::new(18612, 2)),
            ("TSLA", Decimal::new(24990, 2)),
            ("NVDA", Decimal::new(11702, 2)),
        ])
    }
}

impl PriceSource for StaticPriceSource {
    fn price(&self, symbol: &str) -> Result<Decimal, ToolError> {
        self.prices
            .get(&symbol.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| ToolError::UnknownSymbol(symbol.to_string()))
    }
}

/// Formats the pending-action token. This never executes a trade: the side
/// effect stays deferred until a human approves the resulting suspension.
pub fn prepare_buy(symbol: &str, quantity: u32, total_price: Decimal) -> String {
    format!("{PENDING_BUY_MARKER}{symbol}::{quantity}::{total_price}")
}

/// Parsed form of the pending-action token, the approval node's partial
/// result across the suspend/resume boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBuy {
    pub symbol: String,
    pub quantity: u32,
    pub total_price: Decimal,
}

impl PendingBuy {
    pub fn parse(content: &str) -> Option<Self> {
        let rest = content.strip_prefix(PENDING_BUY_MARKER)?;
        let mut fields = rest.splitn(3, "::");
        let symbol = fields.next()?.to_string();
        let quantity = fields.next()?.parse().ok()?;
        let total_price = fields.next()?.parse().ok()?;
        Some(Self { symbol, quantity, total_price })
    }

    pub fn approval_prompt(&self) -> String {
        format!(
            "Approve buying {} {} stocks for ${:.2}?",
            self.quantity, self.symbol, self.total_price
        )
    }

    pub fn approved_message(&self) -> String {
        format!(
            "Approved: Bought {} shares of {} for ${}",
            self.quantity, self.symbol, self.total_price
        )
    }
}

/// Description of a tool exposed for model-initiated invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub fn get_stock_price_spec() -> ToolSpec {
    ToolSpec {
        name: GET_STOCK_PRICE_TOOL.to_string(),
        description: "Look up the current price of a stock symbol.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "symbol": { "type": "string", "description": "Ticker symbol, e.g. MSFT" }
            },
            "required": ["symbol"]
        }),
    }
}

pub fn prepare_buy_spec() -> ToolSpec {
    ToolSpec {
        name: PREPARE_BUY_TOOL.to_string(),
        description: "Prepare a pending buy order for human approval. Does not execute the trade."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "symbol": { "type": "string" },
                "quantity": { "type": "integer", "minimum": 1 },
                "total_price": { "type": "number" }
            },
            "required": ["symbol", "quantity", "total_price"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{prepare_buy, PendingBuy, PriceSource, StaticPriceSource, ToolError};

    #[test]
    fn static_source_prices_known_symbols_case_insensitively() {
        let source = StaticPriceSource::default();
        assert_eq!(source.price("MSFT").expect("known symbol"), Decimal::new(41558, 2));
        assert_eq!(source.price("msft").expect("known symbol"), Decimal::new(41558, 2));
    }

    #[test]
    fn static_source_rejects_unknown_symbol() {
        let source = StaticPriceSource::default();
        assert_eq!(
            source.price("ZZZZ"),
            Err(ToolError::UnknownSymbol("ZZZZ".to_string()))
        );
    }

    #[test]
    fn prepare_buy_formats_wire_token() {
        let token = prepare_buy("MSFT", 10, Decimal::new(415580, 2));
        assert_eq!(token, "REQUEST_BUY::MSFT::10::4155.80");
    }

    #[test]
    fn pending_buy_parses_token_fields() {
        let pending = PendingBuy::parse("REQUEST_BUY::MSFT::10::4155.80").expect("valid token");
        assert_eq!(pending.symbol, "MSFT");
        assert_eq!(pending.quantity, 10);
        assert_eq!(pending.total_price, Decimal::new(415580, 2));
    }

    #[test]
    fn pending_buy_rejects_foreign_content() {
        assert!(PendingBuy::parse("the price of MSFT is 415.58").is_none());
        assert!(PendingBuy::parse("REQUEST_BUY::MSFT::ten::415.58").is_none());
        assert!(PendingBuy::parse("REQUEST_BUY::MSFT::10").is_none());
    }

    #[test]
    fn prompt_formats_total_to_two_decimals() {
        let pending = PendingBuy::parse("REQUEST_BUY::MSFT::10::4155.8").expect("valid token");
        assert_eq!(pending.approval_prompt(), "Approve buying 10 MSFT stocks for $4155.80?");
    }

    #[test]
    fn approved_message_echoes_token_total() {
        let pending = PendingBuy::parse("REQUEST_BUY::MSFT::10::4155.80").expect("valid token");
        assert_eq!(
            pending.approved_message(),
            "Approved: Bought 10 shares of MSFT for $4155.80"
        );
    }
}
