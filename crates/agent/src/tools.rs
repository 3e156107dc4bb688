use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use cadence_core::pricing::{self, ServiceTier, DEFAULT_RELEASES_PER_YEAR};

use crate::llm::ToolSchema;

pub const ESCALATE_TO_HUMAN: &str = "escalate_to_human";

/// One executed tool call as recorded on the turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub tool_name: String,
    pub arguments: Value,
    pub result: Value,
}

impl ToolInvocationResult {
    pub fn is_escalation(&self) -> bool {
        self.tool_name == ESCALATE_TO_HUMAN
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Value;
    async fn execute(&self, input: Value) -> Result<Value>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|tool| tool.schema()).collect()
    }

    /// Runs one invocation. Unknown tools and handler errors become an
    /// `{"error": ..}` result rather than failing the turn.
    pub async fn execute(&self, name: &str, arguments: Value) -> ToolInvocationResult {
        let result = match self.tools.get(name) {
            Some(tool) => match tool.execute(arguments.clone()).await {
                Ok(result) => result,
                Err(error) => json!({ "error": error.to_string() }),
            },
            None => json!({ "error": "unknown tool" }),
        };
        ToolInvocationResult { tool_name: name.to_string(), arguments, result }
    }

    pub fn sales() -> Self {
        let mut registry = Self::default();
        registry.register(GetPricingTool);
        registry.register(GenerateQuoteTool);
        registry.register(EscalateToHumanTool);
        registry
    }

    pub fn support() -> Self {
        let mut registry = Self::default();
        registry.register(CheckReleaseStatusTool);
        registry.register(QueryRoyaltiesTool);
        registry.register(CreateSupportTicketTool);
        registry.register(UpdateMetadataTool);
        registry.register(EscalateToHumanTool);
        registry
    }
}

fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str> {
    input
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("missing required argument `{field}`"))
}

fn optional_str<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str).map(str::trim).filter(|value| !value.is_empty())
}

fn money(value: Decimal) -> Value {
    value.to_f64().map(Value::from).unwrap_or(Value::Null)
}

pub struct GetPricingTool;

#[async_trait]
impl Tool for GetPricingTool {
    fn name(&self) -> &'static str {
        "get_pricing"
    }

    fn description(&self) -> &'static str {
        "Look up monthly and yearly prices and features of a distribution plan"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service_type": {
                    "type": "string",
                    "enum": ["basic", "professional", "premium", "enterprise"],
                    "description": "Plan to look up"
                }
            },
            "required": ["service_type"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let Some(tier) = ServiceTier::parse(required_str(&input, "service_type")?) else {
            return Ok(json!({}));
        };
        let listed = pricing::list_pricing(tier);
        Ok(json!({
            "monthly": money(listed.monthly),
            "yearly": money(listed.yearly),
            "features": listed.features,
        }))
    }
}

pub struct GenerateQuoteTool;

#[async_trait]
impl Tool for GenerateQuoteTool {
    fn name(&self) -> &'static str {
        "generate_quote"
    }

    fn description(&self) -> &'static str {
        "Generate a personalised quote with volume and annual prepay discounts"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service_type": {"type": "string", "description": "Plan name"},
                "num_releases": {"type": "integer", "description": "Releases per year"},
                "artist_name": {"type": "string", "description": "Artist name"}
            },
            "required": ["service_type", "num_releases"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let requested = required_str(&input, "service_type")?;
        let tier = ServiceTier::parse(requested).unwrap_or(ServiceTier::Basic);
        let num_releases = input
            .get("num_releases")
            .and_then(Value::as_u64)
            .map(|value| u32::try_from(value).unwrap_or(u32::MAX))
            .unwrap_or(DEFAULT_RELEASES_PER_YEAR);
        let artist_name = optional_str(&input, "artist_name").map(str::to_string);

        let quote = pricing::quote(tier, num_releases, artist_name);
        Ok(json!({
            "service": requested,
            "tier": quote.tier.as_str(),
            "monthly_price": money(quote.monthly_price),
            "yearly_price": money(quote.yearly_price),
            "discount_applied": money(quote.discount_applied),
            "num_releases": quote.num_releases,
            "artist_name": quote.artist_name,
        }))
    }
}

pub struct EscalateToHumanTool;

#[async_trait]
impl Tool for EscalateToHumanTool {
    fn name(&self) -> &'static str {
        ESCALATE_TO_HUMAN
    }

    fn description(&self) -> &'static str {
        "Transfer the conversation to a human agent"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {"type": "string", "description": "Why a human is needed"}
            },
            "required": ["reason"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let reason = optional_str(&input, "reason").unwrap_or("requested by agent");
        Ok(json!({ "escalated": true, "reason": reason }))
    }
}

pub struct CheckReleaseStatusTool;

#[async_trait]
impl Tool for CheckReleaseStatusTool {
    fn name(&self) -> &'static str {
        "check_release_status"
    }

    fn description(&self) -> &'static str {
        "Check the distribution status of a release on each platform"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "release_id": {"type": "string", "description": "Release identifier"}
            },
            "required": ["release_id"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let release_id = required_str(&input, "release_id")?;
        Ok(json!({
            "release_id": release_id,
            "status": "live",
            "platforms": {
                "spotify": "active",
                "apple_music": "active",
                "youtube_music": "active",
                "deezer": "active"
            },
            "distribution_date": "2024-11-15",
            "streams_total": 15420
        }))
    }
}

pub struct QueryRoyaltiesTool;

#[async_trait]
impl Tool for QueryRoyaltiesTool {
    fn name(&self) -> &'static str {
        "query_royalties"
    }

    fn description(&self) -> &'static str {
        "Report royalties earned in a period with a per-platform breakdown"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "period": {"type": "string", "description": "Period such as 2024-11 or Q4 2024"}
            },
            "required": ["period"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let period = required_str(&input, "period")?;
        Ok(json!({
            "period": period,
            "total_earned": 1245.50,
            "total_streams": 45230,
            "payment_status": "pending",
            "next_payment_date": "2025-01-15",
            "breakdown": {
                "spotify": 850.30,
                "apple_music": 295.20,
                "youtube_music": 100.00
            }
        }))
    }
}

pub struct CreateSupportTicketTool;

impl CreateSupportTicketTool {
    /// Stable `TKT-NNNN` id derived from the ticket description.
    pub fn ticket_id(description: &str) -> String {
        let digest = blake3::hash(description.as_bytes());
        let mut prefix = [0_u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        format!("TKT-{:04}", u64::from_le_bytes(prefix) % 10_000)
    }
}

#[async_trait]
impl Tool for CreateSupportTicketTool {
    fn name(&self) -> &'static str {
        "create_support_ticket"
    }

    fn description(&self) -> &'static str {
        "Open a support ticket for an issue that needs follow-up"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "issue_type": {
                    "type": "string",
                    "enum": ["metadata", "distribution", "royalties", "technical", "other"]
                },
                "description": {"type": "string"},
                "priority": {"type": "string", "enum": ["low", "medium", "high", "critical"]}
            },
            "required": ["issue_type", "description"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let issue_type = required_str(&input, "issue_type")?;
        let description = required_str(&input, "description")?;
        let priority = optional_str(&input, "priority").unwrap_or("medium");
        Ok(json!({
            "ticket_id": Self::ticket_id(description),
            "status": "created",
            "issue_type": issue_type,
            "priority": priority,
            "estimated_resolution": "24-48 hours"
        }))
    }
}

pub struct UpdateMetadataTool;

impl UpdateMetadataTool {
    pub const EDITABLE_FIELDS: [&'static str; 5] =
        ["title", "artist", "isrc", "genre", "release_date"];
}

#[async_trait]
impl Tool for UpdateMetadataTool {
    fn name(&self) -> &'static str {
        "update_metadata"
    }

    fn description(&self) -> &'static str {
        "Request a metadata change on a release"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "release_id": {"type": "string"},
                "field": {"type": "string", "enum": Self::EDITABLE_FIELDS},
                "value": {"type": "string"}
            },
            "required": ["release_id", "field", "value"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let release_id = required_str(&input, "release_id")?;
        let field = required_str(&input, "field")?;
        let value = required_str(&input, "value")?;

        if !Self::EDITABLE_FIELDS.contains(&field) {
            return Ok(json!({
                "error": format!("field `{field}` cannot be edited"),
                "allowed_fields": Self::EDITABLE_FIELDS,
            }));
        }

        Ok(json!({
            "release_id": release_id,
            "field": field,
            "new_value": value,
            "status": "pending_review",
            "estimated_update": "24-72 hours"
        }))
    }
}
