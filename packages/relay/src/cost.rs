// ABOUTME: Token cost estimation over canonical events and tool-call records
// ABOUTME: Prices usage per model from an embedded table with a default fallback entry

use crate::error::{RelayError, Result};
use crate::events::CanonicalEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the fallback entry in the price table
pub const DEFAULT_MODEL: &str = "default";

/// USD price per million tokens for one model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million_tokens: f64,
    pub output_per_million_tokens: f64,
}

#[derive(Debug, Deserialize)]
struct PricingConfig {
    #[allow(dead_code)]
    version: String,
    models: HashMap<String, ModelPrice>,
}

/// Raw usage record, typically one per tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub task_id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// One input to the aggregator
#[derive(Debug, Clone)]
pub enum UsageInput {
    Event {
        task_id: String,
        event: CanonicalEvent,
    },
    ToolCall(ToolCallRecord),
}

impl From<ToolCallRecord> for UsageInput {
    fn from(record: ToolCallRecord) -> Self {
        UsageInput::ToolCall(record)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub task_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// USD rounded to 4 decimal places
    pub estimated_cost: f64,
    pub model: String,
}

pub struct CostAggregator {
    prices: HashMap<String, ModelPrice>,
}

impl CostAggregator {
    /// Create an aggregator from the embedded price table
    pub fn new() -> Result<Self> {
        let config_json = include_str!("../config/pricing.json");
        Self::from_json(config_json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: PricingConfig =
            serde_json::from_str(json).map_err(|e| RelayError::Pricing(e.to_string()))?;
        if !config.models.contains_key(DEFAULT_MODEL) {
            return Err(RelayError::Pricing(format!(
                "missing '{}' entry",
                DEFAULT_MODEL
            )));
        }
        Ok(Self {
            prices: config.models,
        })
    }

    /// Price for a model, accepting `provider/model` ids
    pub fn price(&self, model: &str) -> ModelPrice {
        let bare = model.rsplit('/').next().unwrap_or(model);
        self.prices
            .get(model)
            .or_else(|| self.prices.get(bare))
            .or_else(|| self.prices.get(DEFAULT_MODEL))
            .copied()
            .unwrap_or(ModelPrice {
                input_per_million_tokens: 0.0,
                output_per_million_tokens: 0.0,
            })
    }

    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64, model: &str) -> f64 {
        let price = self.price(model);
        let cost = (input_tokens as f64 / 1_000_000.0) * price.input_per_million_tokens
            + (output_tokens as f64 / 1_000_000.0) * price.output_per_million_tokens;
        round4(cost)
    }

    /// One breakdown per distinct task, in first-seen order
    pub fn aggregate<I>(&self, inputs: I) -> Vec<CostBreakdown>
    where
        I: IntoIterator<Item = UsageInput>,
    {
        struct Totals {
            input: u64,
            output: u64,
            model: Option<String>,
        }

        let mut order: Vec<String> = Vec::new();
        let mut totals: HashMap<String, Totals> = HashMap::new();

        for input in inputs {
            let (task_id, input_tokens, output_tokens, model) = match input {
                UsageInput::ToolCall(record) => (
                    record.task_id,
                    record.input_tokens,
                    record.output_tokens,
                    record.model,
                ),
                UsageInput::Event { task_id, event } => match event.usage() {
                    Some((tokens, model)) => (
                        task_id,
                        tokens.input,
                        tokens.output,
                        model.map(str::to_string),
                    ),
                    None => continue,
                },
            };

            let entry = totals.entry(task_id.clone()).or_insert_with(|| {
                order.push(task_id);
                Totals {
                    input: 0,
                    output: 0,
                    model: None,
                }
            });
            entry.input = entry.input.saturating_add(input_tokens);
            entry.output = entry.output.saturating_add(output_tokens);
            if model.is_some() {
                entry.model = model;
            }
        }

        order
            .into_iter()
            .filter_map(|task_id| {
                let t = totals.remove(&task_id)?;
                let model = t.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
                Some(CostBreakdown {
                    estimated_cost: self.calculate_cost(t.input, t.output, &model),
                    task_id,
                    input_tokens: t.input,
                    output_tokens: t.output,
                    model,
                })
            })
            .collect()
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_frame;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(task: &str, model: Option<&str>, input: u64, output: u64) -> UsageInput {
        ToolCallRecord {
            task_id: task.to_string(),
            model: model.map(str::to_string),
            input_tokens: input,
            output_tokens: output,
        }
        .into()
    }

    #[test]
    fn test_zero_tokens_cost_nothing() {
        let agg = CostAggregator::new().unwrap();
        assert_eq!(agg.calculate_cost(0, 0, "gpt-5"), 0.0);
        assert_eq!(agg.calculate_cost(0, 0, "no-such-model"), 0.0);
    }

    #[test]
    fn test_unlisted_model_uses_default() {
        let agg = CostAggregator::new().unwrap();
        assert_eq!(
            agg.calculate_cost(1_000_000, 1_000_000, "mystery-model"),
            agg.calculate_cost(1_000_000, 1_000_000, "default")
        );
        assert_eq!(agg.calculate_cost(1_000_000, 0, "default"), 3.0);
    }

    #[test]
    fn test_rounding_and_provider_prefix() {
        let agg = CostAggregator::new().unwrap();
        // 1234 * 3 / 1e6 + 567 * 15 / 1e6 = 0.003702 + 0.008505 = 0.012207
        assert_eq!(
            agg.calculate_cost(1234, 567, "anthropic/claude-sonnet-4-5-20250929"),
            0.0122
        );
    }

    #[test]
    fn test_aggregate_per_task_first_seen_order() {
        let agg = CostAggregator::new().unwrap();
        let breakdowns = agg.aggregate(vec![
            record("t2", Some("gpt-5"), 1_000_000, 0),
            record("t1", None, 10, 20),
            record("t2", None, 1_000_000, 1_000_000),
        ]);

        assert_eq!(breakdowns.len(), 2);
        assert_eq!(breakdowns[0].task_id, "t2");
        assert_eq!(breakdowns[0].input_tokens, 2_000_000);
        assert_eq!(breakdowns[0].model, "gpt-5");
        assert_eq!(breakdowns[0].estimated_cost, 12.5);
        assert_eq!(breakdowns[1].task_id, "t1");
        assert_eq!(breakdowns[1].model, "default");
    }

    #[test]
    fn test_aggregate_saturates_huge_totals() {
        let agg = CostAggregator::new().unwrap();
        let breakdowns = agg.aggregate(vec![
            record("t1", None, u64::MAX, 5),
            record("t1", None, 10, u64::MAX - 1),
            record("t1", None, 1, 1),
        ]);

        assert_eq!(breakdowns.len(), 1);
        assert_eq!(breakdowns[0].input_tokens, u64::MAX);
        assert_eq!(breakdowns[0].output_tokens, u64::MAX);
        assert!(breakdowns[0].estimated_cost.is_finite());
    }

    #[test]
    fn test_aggregate_from_events() {
        let agg = CostAggregator::new().unwrap();
        let step = parse_frame(&json!({
            "type": "message.part.updated",
            "properties": {
                "part": {
                    "type": "step-finish",
                    "modelID": "claude-opus-4-1-20250805",
                    "tokens": { "input": 100000, "output": 10000 }
                }
            }
        }))
        .unwrap();
        let heartbeat = parse_frame(&json!({ "type": "heartbeat" })).unwrap();

        let breakdowns = agg.aggregate(vec![
            UsageInput::Event {
                task_id: "t".to_string(),
                event: heartbeat,
            },
            UsageInput::Event {
                task_id: "t".to_string(),
                event: step,
            },
        ]);

        assert_eq!(breakdowns.len(), 1);
        assert_eq!(breakdowns[0].model, "claude-opus-4-1-20250805");
        // 0.1 * 15 + 0.01 * 75
        assert_eq!(breakdowns[0].estimated_cost, 2.25);
    }

    #[test]
    fn test_table_requires_default_entry() {
        let result = CostAggregator::from_json("{\"version\":\"1\",\"models\":{}}");
        assert!(matches!(result, Err(RelayError::Pricing(_))));
    }
}
