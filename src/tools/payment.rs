//! 支付链接：由固定商户参数与金额拼出 URL

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::config::PaymentSection;
use crate::core::AgentError;
use crate::tools::schema::parameters_schema_for;
use crate::tools::search::to_price;
use crate::tools::{parse_args, Tool, ToolContext};

pub const PAYMENT_TOOL: &str = "generate_payment_link";

/// 支付 URL 构造器（纯函数）
#[derive(Debug, Clone)]
pub struct PaymentUrlBuilder {
    base_url: String,
    service_id: String,
    merchant_id: String,
    transaction_param: String,
    return_url: String,
}

impl PaymentUrlBuilder {
    pub fn from_config(cfg: &PaymentSection) -> Self {
        Self {
            base_url: cfg.base_url.clone(),
            service_id: cfg.service_id.clone(),
            merchant_id: cfg.merchant_id.clone(),
            transaction_param: cfg.transaction_param.clone(),
            return_url: cfg.return_url.clone(),
        }
    }

    pub fn build(&self, amount: u64) -> String {
        format!(
            "{}?service_id={}&merchant_id={}&amount={}.00&transaction_param={}&return_url={}",
            self.base_url,
            self.service_id,
            self.merchant_id,
            amount,
            self.transaction_param,
            self.return_url
        )
    }
}

/// generate_payment_link 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PaymentArgs {
    /// Price of the product in the smallest currency units
    pub price: f64,
}

pub struct PaymentLinkTool {
    builder: PaymentUrlBuilder,
    currency: String,
}

impl PaymentLinkTool {
    pub fn new(builder: PaymentUrlBuilder, currency: &str) -> Self {
        Self {
            builder,
            currency: currency.to_string(),
        }
    }
}

#[async_trait]
impl Tool for PaymentLinkTool {
    fn name(&self) -> &str {
        PAYMENT_TOOL
    }

    fn description(&self) -> &str {
        "Generate a payment link for a specific product when customer wants to buy"
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<PaymentArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AgentError> {
        let args: PaymentArgs = parse_args(PAYMENT_TOOL, args)?;
        let price = to_price(args.price);
        if price == 0 {
            return Err(AgentError::InvalidArguments {
                tool: PAYMENT_TOOL.to_string(),
                reason: "price must be positive".to_string(),
            });
        }
        let url = self.builder.build(price);
        tracing::info!(user_id = %ctx.user_id, price, currency = %self.currency, "payment link generated");
        Ok(format!(
            "Payment link generated (Price: {} {}):\n{}",
            price, self.currency, url
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn builder() -> PaymentUrlBuilder {
        PaymentUrlBuilder::from_config(&PaymentSection {
            base_url: "https://pay.example/services/pay/".into(),
            service_id: "30067".into(),
            merchant_id: "22535".into(),
            transaction_param: "165884".into(),
            return_url: "https://t.me/shop_bot".into(),
        })
    }

    #[test]
    fn test_build_url() {
        assert_eq!(
            builder().build(350000),
            "https://pay.example/services/pay/?service_id=30067&merchant_id=22535&amount=350000.00&transaction_param=165884&return_url=https://t.me/shop_bot"
        );
    }

    #[tokio::test]
    async fn test_tool_result_text() {
        let tool = PaymentLinkTool::new(builder(), "uzs");
        let out = tool
            .execute(json!({"price": 350000}), &ToolContext::new("u"))
            .await
            .unwrap();
        assert!(out.starts_with("Payment link generated (Price: 350000 uzs):\n"));
        assert!(out.ends_with("amount=350000.00&transaction_param=165884&return_url=https://t.me/shop_bot"));
    }

    #[tokio::test]
    async fn test_rejects_missing_or_zero_price() {
        let tool = PaymentLinkTool::new(builder(), "uzs");
        let ctx = ToolContext::new("u");
        assert!(matches!(
            tool.execute(json!({}), &ctx).await,
            Err(AgentError::InvalidArguments { .. })
        ));
        assert!(tool.execute(json!({"price": 0}), &ctx).await.is_err());
    }
}
