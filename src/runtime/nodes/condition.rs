//! Condition node: first-match branch selection
//!
//! Evaluates its rules in stored order; the first rule that holds routes the
//! execution out of that rule's output port. No match falls out of the
//! `"false"` port. The input passes through unchanged either way.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::error::EngineError;
use crate::runtime::context::{ExecutionContext, LogEntry, LogLevel, NodeResult};
use crate::runtime::nodes::NodeBehavior;
use crate::runtime::path::resolve_path;
use crate::runtime::template::as_number;
use crate::workflow::types::{ConditionRule, NodeData};

pub struct ConditionNode;

#[async_trait]
impl NodeBehavior for ConditionNode {
    fn type_tag(&self) -> &'static str {
        "condition"
    }

    fn validate(&self, data: &NodeData) -> Result<(), EngineError> {
        for (i, rule) in data.conditions.iter().enumerate() {
            if rule.field.is_empty() {
                return Err(EngineError::config(
                    format!("conditions[{i}].field"),
                    "condition field must not be empty",
                ));
            }
            if rule.output_port_id.is_empty() {
                return Err(EngineError::config(
                    format!("conditions[{i}].outputPortId"),
                    "condition output port must not be empty",
                ));
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        data: &NodeData,
    ) -> Result<NodeResult, EngineError> {
        for rule in &data.conditions {
            let actual = resolve_path(&ctx.input, &rule.field);
            if matches_rule(rule, &actual) {
                let mut result = NodeResult::new(ctx.input.clone(), rule.output_port_id.clone());
                result.logs.push(LogEntry::new(
                    LogLevel::Debug,
                    format!(
                        "condition '{} {}' matched, taking port '{}'",
                        rule.field, rule.operator, rule.output_port_id
                    ),
                ));
                return Ok(result);
            }
        }
        Ok(NodeResult::new(ctx.input.clone(), "false"))
    }
}

fn matches_rule(rule: &ConditionRule, actual: &Value) -> bool {
    let expected = &rule.value;
    match rule.operator.as_str() {
        "eq" | "==" => loose_eq(actual, expected),
        "neq" | "!=" => !loose_eq(actual, expected),
        "gt" | ">" => as_number(actual) > as_number(expected),
        "gte" | ">=" => as_number(actual) >= as_number(expected),
        "lt" | "<" => as_number(actual) < as_number(expected),
        "lte" | "<=" => as_number(actual) <= as_number(expected),
        "contains" => match (actual, expected) {
            (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
            (Value::Array(items), _) => items.iter().any(|item| loose_eq(item, expected)),
            _ => false,
        },
        "startsWith" => match (actual, expected) {
            (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        "endsWith" => match (actual, expected) {
            (Value::String(s), Value::String(suffix)) => s.ends_with(suffix.as_str()),
            _ => false,
        },
        "regex" | "matches" => match (actual, expected) {
            (Value::String(s), Value::String(pattern)) => Regex::new(pattern)
                .map(|re| re.is_match(s))
                .unwrap_or(false),
            _ => false,
        },
        "isNull" => actual.is_null(),
        "isNotNull" => !actual.is_null(),
        "isEmpty" => is_empty(actual),
        "isNotEmpty" => !is_empty(actual),
        "in" => match expected {
            Value::Array(allowed) => allowed.iter().any(|item| loose_eq(actual, item)),
            _ => false,
        },
        _ => false,
    }
}

/// Loose equality: numeric compare when both sides coerce to numbers out of
/// actual numerics, stringified compare otherwise.
fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if actual.is_number() && expected.is_number() {
        return as_number(actual) == as_number(expected);
    }
    stringify(actual) == stringify(expected)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
