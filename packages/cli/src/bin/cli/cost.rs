// ABOUTME: `drover cost` estimates spend from a JSONL file of events or tool-call records
// ABOUTME: Lines with a task_id are tool-call records; anything else is parsed as an event frame

use anyhow::{Context, Result};
use colored::*;
use drover_relay::{parse_frame, CostAggregator, ToolCallRecord, UsageInput};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

const UNKNOWN_TASK: &str = "unknown";

/// Turn JSONL text into aggregator inputs, skipping lines that carry no usage
pub fn parse_usage_lines(
    text: &str,
    task_id: Option<&str>,
    model: Option<&str>,
) -> Vec<UsageInput> {
    let mut inputs = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                debug!(line = number + 1, "Skipping malformed line: {}", e);
                continue;
            }
        };

        if value.get("task_id").is_some() {
            match serde_json::from_value::<ToolCallRecord>(value) {
                Ok(mut record) => {
                    if record.model.is_none() {
                        record.model = model.map(str::to_string);
                    }
                    inputs.push(UsageInput::ToolCall(record));
                }
                Err(e) => debug!(line = number + 1, "Skipping invalid record: {}", e),
            }
            continue;
        }

        if let Some(event) = parse_frame(&value) {
            let task = task_id
                .or_else(|| event.session_id())
                .unwrap_or(UNKNOWN_TASK)
                .to_string();
            inputs.push(UsageInput::Event {
                task_id: task,
                event,
            });
        }
    }

    inputs
}

pub fn cost_command(file: &Path, task_id: Option<&str>, model: Option<&str>) -> Result<()> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let aggregator = CostAggregator::new()?;
    let breakdowns = aggregator.aggregate(parse_usage_lines(&text, task_id, model));

    if breakdowns.is_empty() {
        println!("No token usage found in {}", file.display());
        return Ok(());
    }

    let mut total = 0.0;
    for breakdown in &breakdowns {
        total += breakdown.estimated_cost;
        println!(
            "{}  {} in / {} out  {}  {}",
            breakdown.task_id.bold(),
            breakdown.input_tokens,
            breakdown.output_tokens,
            breakdown.model.dimmed(),
            format!("${:.4}", breakdown.estimated_cost).green()
        );
    }
    if breakdowns.len() > 1 {
        println!("{} {}", "Total:".bold(), format!("${:.4}", total).green());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const LINES: &str = r#"
{"task_id":"t1","input_tokens":1000000,"output_tokens":0}
not json
{"type":"message.part.updated","properties":{"part":{"type":"step-finish","sessionID":"s9","modelID":"gpt-5","tokens":{"input":10,"output":20}}}}
{"type":"heartbeat","properties":{}}
"#;

    #[test]
    fn test_records_and_events_are_both_read() {
        let inputs = parse_usage_lines(LINES, None, Some("gpt-5"));
        assert_eq!(inputs.len(), 3);

        let breakdowns = CostAggregator::new().unwrap().aggregate(inputs);
        assert_eq!(breakdowns.len(), 2);
        assert_eq!(breakdowns[0].task_id, "t1");
        assert_eq!(breakdowns[0].model, "gpt-5");
        assert_eq!(breakdowns[0].estimated_cost, 1.25);
        assert_eq!(breakdowns[1].task_id, "s9");
    }

    #[test]
    fn test_task_id_flag_groups_events() {
        let inputs = parse_usage_lines(LINES, Some("run-1"), None);
        let breakdowns = CostAggregator::new().unwrap().aggregate(inputs);
        assert_eq!(breakdowns[0].task_id, "t1");
        assert_eq!(breakdowns[0].model, "default");
        assert_eq!(breakdowns[1].task_id, "run-1");
    }

    #[test]
    fn test_cost_command_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LINES.as_bytes()).unwrap();
        cost_command(file.path(), None, None).unwrap();

        assert!(cost_command(Path::new("/nonexistent/usage.jsonl"), None, None).is_err());
    }
}
