//! Transform node: field mapping with opcodes
//!
//! Applies mapping rules (source path → opcode → target path) to build a new
//! output object. When a NodeSchema side record exists for the node, the flow
//! executor hydrates its connections into `mapping_rules` before this executor
//! runs, so the connections supersede whatever was configured inline.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::runtime::context::{ExecutionContext, LogEntry, LogLevel, NodeResult};
use crate::runtime::nodes::NodeBehavior;
use crate::runtime::path::{resolve_path, set_path};
use crate::workflow::types::{MappingRule, NodeData};

pub struct TransformNode;

#[async_trait]
impl NodeBehavior for TransformNode {
    fn type_tag(&self) -> &'static str {
        "transform"
    }

    fn validate(&self, data: &NodeData) -> Result<(), EngineError> {
        if data.mapping_rules.is_empty() {
            return Err(EngineError::config(
                "mappingRules",
                "transform node requires at least one mapping rule or a node schema",
            ));
        }
        for (i, rule) in data.mapping_rules.iter().enumerate() {
            if rule.source_field.is_empty() {
                return Err(EngineError::config(
                    format!("mappingRules[{i}].sourceField"),
                    "source field must not be empty",
                ));
            }
            if rule.target_field.is_empty() {
                return Err(EngineError::config(
                    format!("mappingRules[{i}].targetField"),
                    "target field must not be empty",
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
        let mut output = Map::new();
        let mut logs = Vec::new();

        for rule in &data.mapping_rules {
            let resolved = resolve_path(&ctx.input, &rule.source_field);
            let value = match &rule.transform {
                Some(opcode) => match apply_opcode(opcode, &resolved) {
                    Ok(v) => v,
                    Err(reason) => {
                        logs.push(LogEntry::with_data(
                            LogLevel::Warn,
                            format!("transform '{opcode}' failed on '{}': {reason}", rule.source_field),
                            resolved.clone(),
                        ));
                        rule.default_value.clone().unwrap_or(Value::Null)
                    }
                },
                None => resolved,
            };
            let value = match (value, &rule.default_value) {
                (Value::Null, Some(default)) => default.clone(),
                (v, _) => v,
            };
            set_path(&mut output, &rule.target_field, value);
        }

        let mut result = NodeResult::new(Value::Object(output), "output");
        result.logs = logs;
        Ok(result)
    }
}

/// Apply a transform opcode. Unknown opcodes copy the value through; the
/// operator names reserved for future use (concat, split, format, parseDate,
/// formatDate, replace, extract, lookup, expression, condition) fall into the
/// copy path until they grow behavior.
fn apply_opcode(opcode: &str, value: &Value) -> Result<Value, String> {
    match opcode {
        "toString" => Ok(Value::String(match value {
            Value::String(s) => s.clone(),
            Value::Null => "null".to_string(),
            other => other.to_string(),
        })),
        "toNumber" => match value {
            Value::Number(n) => Ok(Value::Number(n.clone())),
            Value::String(s) => {
                let t = s.trim();
                if let Ok(n) = t.parse::<i64>() {
                    return Ok(Value::Number(serde_json::Number::from(n)));
                }
                t.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{s}' is not numeric"))
            }
            other => Err(format!("cannot convert {other} to number")),
        },
        "lowercase" => Ok(string_op(value, |s| s.to_lowercase())),
        "uppercase" => Ok(string_op(value, |s| s.to_uppercase())),
        "trim" => Ok(string_op(value, |s| s.trim().to_string())),
        _ => Ok(value.clone()),
    }
}

/// String opcodes pass non-strings through untouched
fn string_op(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        other => other.clone(),
    }
}

/// Effective mapping rules for a node: schema connections supersede inline
/// rules when non-empty. Called by the flow executor during hydration.
pub fn effective_rules(
    inline: &[MappingRule],
    schema_connections: Option<&[crate::workflow::types::SchemaConnection]>,
) -> Vec<MappingRule> {
    match schema_connections {
        Some(connections) if !connections.is_empty() => {
            connections.iter().map(|c| c.to_mapping_rule()).collect()
        }
        _ => inline.to_vec(),
    }
}
