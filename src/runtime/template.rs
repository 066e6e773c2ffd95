//! Expression & template engine
//!
//! Renders `{{path}}` placeholders, `{{#each}}` loops, and
//! `{{#if}}/{{else}}/{{#unless}}` conditionals against a JSON context, then
//! parses the result as JSON. Rendering is a single recursive left-to-right
//! pass with depth-counted block matching, which produces the same observable
//! output as the regex multi-pass it replaces while staying correct under
//! nested blocks of the same kind.

use crate::error::TemplateError;
use crate::runtime::path::resolve_path;
use serde_json::{Map, Value};

/// Render a template against `data` and parse the result as a JSON value.
pub fn render(template: &str, data: &Value) -> Result<Value, TemplateError> {
    let text = render_text(template, data)?;
    serde_json::from_str(text.trim())
        .map_err(|e| TemplateError(format!("rendered output is not valid JSON: {e}")))
}

/// Render a template against `data` into raw text without the JSON parse.
pub fn render_text(template: &str, ctx: &Value) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];

        if tail.starts_with("{{#each") {
            let (path, body, after) = parse_block(tail, "each")?;
            render_each(&path, body, ctx, &mut out)?;
            rest = after;
        } else if tail.starts_with("{{#if") {
            let (expr, body, after) = parse_block(tail, "if")?;
            let (then_branch, else_branch) = split_else(body);
            let branch = if eval_expr(&expr, ctx) {
                then_branch
            } else {
                else_branch
            };
            out.push_str(&render_text(branch, ctx)?);
            rest = after;
        } else if tail.starts_with("{{#unless") {
            let (expr, body, after) = parse_block(tail, "unless")?;
            if !eval_expr(&expr, ctx) {
                out.push_str(&render_text(body, ctx)?);
            }
            rest = after;
        } else {
            let close = tail
                .find("}}")
                .ok_or_else(|| TemplateError("unterminated '{{' placeholder".into()))?;
            let path = tail[2..close].trim();
            let mut after = &tail[close + 2..];
            // A placeholder may be wrapped in quotes in the template; strip
            // them so the canonical JSON value replaces the quoted string.
            if out.ends_with('"') && after.starts_with('"') {
                out.pop();
                after = &after[1..];
            }
            let value = resolve_path(ctx, path);
            out.push_str(&canonical_json(&value));
            rest = after;
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Substitute `{{var}}` occurrences with plain text values; used by the HTTP
/// and code nodes where the result is a URL, header, or body fragment rather
/// than a JSON document. Missing paths substitute as empty strings.
pub fn interpolate(text: &str, input: &Value) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        match tail.find("}}") {
            Some(close) => {
                let path = tail[2..close].trim();
                out.push_str(&plain_string(&resolve_path(input, path)));
                rest = &tail[close + 2..];
            }
            None => {
                rest = tail;
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Evaluate a condition expression: split on the longest matching comparison
/// operator, or fall back to single-operand truthiness.
pub fn eval_expr(expr: &str, ctx: &Value) -> bool {
    const OPERATORS: [&str; 8] = ["===", "!==", "==", "!=", ">=", "<=", ">", "<"];
    for op in OPERATORS {
        if let Some(idx) = expr.find(op) {
            let left = operand(&expr[..idx], ctx);
            let right = operand(&expr[idx + op.len()..], ctx);
            return match op {
                "===" | "==" => compare_string(&left) == compare_string(&right),
                "!==" | "!=" => compare_string(&left) != compare_string(&right),
                ">=" => as_number(&left) >= as_number(&right),
                "<=" => as_number(&left) <= as_number(&right),
                ">" => as_number(&left) > as_number(&right),
                "<" => as_number(&left) < as_number(&right),
                _ => unreachable!(),
            };
        }
    }
    truthy(&operand(expr, ctx))
}

/// Truthiness: non-null, non-empty string, non-zero number, non-empty
/// array/object, or literal true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Numeric coercion for ordering comparisons; non-numeric operands become 0.
pub fn as_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    }
}

fn operand(token: &str, ctx: &Value) -> Value {
    let t = token.trim();
    if (t.starts_with('"') && t.ends_with('"') && t.len() >= 2)
        || (t.starts_with('\'') && t.ends_with('\'') && t.len() >= 2)
    {
        return Value::String(t[1..t.len() - 1].to_string());
    }
    match t {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    // Integer literals stay integers so stringified equality behaves
    if let Ok(n) = t.parse::<i64>() {
        return Value::Number(serde_json::Number::from(n));
    }
    if let Ok(n) = t.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return Value::Number(num);
        }
    }
    resolve_path(ctx, t)
}

/// Stringified compare used by the equality operators.
fn compare_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn plain_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse `{{#kind expr}}body{{/kind}}` starting at the open tag. Returns the
/// expression, the raw body, and the remainder after the close tag. Nested
/// blocks of the same kind are skipped by depth counting.
fn parse_block<'a>(
    tail: &'a str,
    kind: &str,
) -> Result<(String, &'a str, &'a str), TemplateError> {
    let open_prefix = format!("{{{{#{kind}");
    let close_tag = format!("{{{{/{kind}}}}}");

    let header_end = tail
        .find("}}")
        .ok_or_else(|| TemplateError(format!("unterminated {{{{#{kind}}}}} tag")))?;
    let expr = tail[open_prefix.len()..header_end].trim().to_string();
    let body_start = header_end + 2;

    let mut depth = 1usize;
    let mut cursor = body_start;
    while depth > 0 {
        let nested_open = tail[cursor..].find(&open_prefix);
        let close = tail[cursor..]
            .find(&close_tag)
            .ok_or_else(|| TemplateError(format!("missing {close_tag} for {{{{#{kind}}}}}")))?;
        match nested_open {
            Some(open) if open < close => {
                depth += 1;
                cursor += open + open_prefix.len();
            }
            _ => {
                depth -= 1;
                cursor += close + if depth == 0 { 0 } else { close_tag.len() };
                if depth == 0 {
                    let body = &tail[body_start..cursor];
                    let after = &tail[cursor + close_tag.len()..];
                    return Ok((expr, body, after));
                }
            }
        }
    }
    unreachable!("loop exits by return or error")
}

/// Split an if-body on the `{{else}}` belonging to the outermost block.
fn split_else(body: &str) -> (&str, &str) {
    let mut depth = 0usize;
    let mut cursor = 0usize;
    while let Some(pos) = body[cursor..].find("{{") {
        let at = cursor + pos;
        let tail = &body[at..];
        if tail.starts_with("{{#each") || tail.starts_with("{{#if") || tail.starts_with("{{#unless")
        {
            depth += 1;
        } else if tail.starts_with("{{/each}}")
            || tail.starts_with("{{/if}}")
            || tail.starts_with("{{/unless}}")
        {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && tail.starts_with("{{else}}") {
            return (&body[..at], &body[at + "{{else}}".len()..]);
        }
        cursor = at + 2;
    }
    (body, "")
}

fn render_each(
    path: &str,
    body: &str,
    ctx: &Value,
    out: &mut String,
) -> Result<(), TemplateError> {
    let resolved = resolve_path(ctx, path);
    let items = match resolved {
        Value::Array(items) => items,
        // Empty or missing arrays render as empty output
        _ => return Ok(()),
    };
    let len = items.len();
    for (index, item) in items.iter().enumerate() {
        let child = each_context(ctx, item, index, len);
        out.push_str(&render_text(body, &child)?);
    }
    Ok(())
}

/// Child context for one loop iteration: parent fields, then the element's
/// own fields when it is an object, then the iteration specials.
fn each_context(parent: &Value, item: &Value, index: usize, len: usize) -> Value {
    let mut map = match parent {
        Value::Object(m) => m.clone(),
        _ => Map::new(),
    };
    if let Value::Object(fields) = item {
        for (k, v) in fields {
            map.insert(k.clone(), v.clone());
        }
    }
    map.insert("this".to_string(), item.clone());
    map.insert("@index".to_string(), Value::from(index as u64));
    map.insert("@first".to_string(), Value::Bool(index == 0));
    map.insert("@last".to_string(), Value::Bool(index + 1 == len));
    Value::Object(map)
}
