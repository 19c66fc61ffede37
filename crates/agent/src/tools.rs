use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tradebot_core::tools::{
    get_stock_price_spec, prepare_buy, prepare_buy_spec, PriceSource, ToolError, ToolSpec,
    GET_STOCK_PRICE_TOOL, PREPARE_BUY_TOOL,
};

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn execute(&self, arguments: &Value) -> Result<String, ToolError>;
}

pub struct GetStockPriceTool {
    source: Arc<dyn PriceSource>,
}

impl GetStockPriceTool {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for GetStockPriceTool {
    fn spec(&self) -> ToolSpec {
        get_stock_price_spec()
    }

    // Models are inconsistent about argument shape; a bare string symbol is
    // accepted alongside the object form.
    async fn execute(&self, arguments: &Value) -> Result<String, ToolError> {
        let symbol = arguments
            .get("symbol")
            .and_then(Value::as_str)
            .or_else(|| arguments.as_str())
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: GET_STOCK_PRICE_TOOL.to_string(),
                message: "expected a `symbol` argument".to_string(),
            })?;

        let price = self.source.price(symbol)?;
        Ok(price.to_string())
    }
}

pub struct PrepareBuyTool;

#[async_trait]
impl Tool for PrepareBuyTool {
    fn spec(&self) -> ToolSpec {
        prepare_buy_spec()
    }

    async fn execute(&self, arguments: &Value) -> Result<String, ToolError> {
        let symbol = arguments.get("symbol").and_then(Value::as_str).ok_or_else(|| {
            invalid_prepare_buy("expected a string `symbol` argument")
        })?;
        let quantity = arguments
            .get("quantity")
            .and_then(Value::as_u64)
            .and_then(|quantity| u32::try_from(quantity).ok())
            .ok_or_else(|| invalid_prepare_buy("expected a positive integer `quantity`"))?;
        let total_price = arguments
            .get("total_price")
            .and_then(decimal_argument)
            .ok_or_else(|| invalid_prepare_buy("expected a numeric `total_price`"))?;

        Ok(prepare_buy(&symbol.to_ascii_uppercase(), quantity, total_price))
    }
}

fn decimal_argument(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => number.to_string().parse().ok(),
        Value::String(raw) => raw.parse().ok(),
        _ => None,
    }
}

fn invalid_prepare_buy(message: &str) -> ToolError {
    ToolError::InvalidArguments {
        tool: PREPARE_BUY_TOOL.to_string(),
        message: message.to_string(),
    }
}

/// Name-to-handler dispatch for model-issued tool calls.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn with_builtin(source: Arc<dyn PriceSource>) -> Self {
        let mut registry = Self::default();
        registry.register(GetStockPriceTool::new(source));
        registry.register(PrepareBuyTool);
        registry
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.spec().name, Box::new(tool));
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs = self.tools.values().map(|tool| tool.spec()).collect::<Vec<_>>();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub async fn execute(&self, name: &str, arguments: &Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(arguments).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tradebot_core::tools::{StaticPriceSource, ToolError};

    use super::ToolRegistry;

    fn registry() -> ToolRegistry {
        ToolRegistry::with_builtin(Arc::new(StaticPriceSource::default()))
    }

    #[tokio::test]
    async fn registry_executes_price_lookup_from_object_and_bare_string() {
        let registry = registry();

        let from_object = registry
            .execute("get_stock_price", &json!({"symbol": "MSFT"}))
            .await
            .expect("price lookup");
        assert_eq!(from_object, "415.58");

        let from_string = registry
            .execute("get_stock_price", &json!("msft"))
            .await
            .expect("price lookup");
        assert_eq!(from_string, "415.58");
    }

    #[tokio::test]
    async fn registry_prepares_buy_token() {
        let registry = registry();
        let token = registry
            .execute(
                "prepare_buy",
                &json!({"symbol": "aapl", "quantity": 2, "total_price": "455.70"}),
            )
            .await
            .expect("prepared token");
        assert_eq!(token, "REQUEST_BUY::AAPL::2::455.70");
    }

    #[tokio::test]
    async fn registry_rejects_unknown_tool_and_bad_arguments() {
        let registry = registry();

        let unknown = registry.execute("sell_everything", &json!({})).await;
        assert_eq!(unknown, Err(ToolError::UnknownTool("sell_everything".to_string())));

        let bad = registry.execute("prepare_buy", &json!({"symbol": "AAPL"})).await;
        assert!(matches!(bad, Err(ToolError::InvalidArguments { .. })));
    }

    #[test]
    fn specs_cover_both_builtin_tools() {
        let specs = registry().specs();
        let names = specs.iter().map(|spec| spec.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["get_stock_price", "prepare_buy"]);
    }
}
