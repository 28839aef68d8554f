//! 汇率查询工具（Frankfurter 兼容 API）
//!
//! GET `{base}/{date}?from=..&to=..&amount=..`，原样返回 JSON；响应缺少 rates 视为错误。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::schema::parameters_schema;
use super::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExchangeRateArgs {
    /// The currency to convert from (e.g. "USD", "EUR").
    #[serde(default = "default_from")]
    pub currency_from: String,
    /// The currency to convert to (e.g. "EUR", "USD").
    #[serde(default = "default_to")]
    pub currency_to: String,
    /// The date for the exchange rate (YYYY-MM-DD) or "latest".
    #[serde(default = "default_date")]
    pub currency_date: String,
    /// The amount of currency to convert. Defaults to 1.0.
    #[serde(default = "default_amount")]
    pub amount: f64,
}

fn default_from() -> String {
    "USD".to_string()
}

fn default_to() -> String {
    "EUR".to_string()
}

fn default_date() -> String {
    "latest".to_string()
}

fn default_amount() -> f64 {
    1.0
}

pub struct ExchangeRateTool {
    client: Client,
    base_url: String,
}

impl ExchangeRateTool {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("concierge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn valid_date(date: &str) -> bool {
    date == "latest" || chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}

#[async_trait]
impl Tool for ExchangeRateTool {
    fn name(&self) -> &str {
        "get_exchange_rate"
    }

    fn description(&self) -> &str {
        "Use this to get current exchange rate and optionally convert an amount."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ExchangeRateArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ExchangeRateArgs =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {e}"))?;
        if !valid_date(&args.currency_date) {
            return Err(format!(
                "Invalid currency_date '{}', expected YYYY-MM-DD or latest",
                args.currency_date
            ));
        }
        let url = format!("{}/{}", self.base_url, args.currency_date);
        let amount = args.amount.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("from", args.currency_from.to_uppercase()),
                ("to", args.currency_to.to_uppercase()),
                ("amount", amount),
            ])
            .send()
            .await
            .map_err(|e| format!("API request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("API request failed: HTTP {}", resp.status()));
        }
        let data: Value = resp
            .json()
            .await
            .map_err(|_| "Invalid JSON response from API.".to_string())?;
        if data.get("rates").is_none() {
            return Err("Invalid API response format.".to_string());
        }
        Ok(data.to_string())
    }
}
