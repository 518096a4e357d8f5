//! Encoding of job input variables into the tool's `.tfvars` syntax.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Result, WorkerError};
use crate::sandbox::{random_token, write_private};

/// Render `vars` as `name = value` lines.
pub fn encode(vars: &BTreeMap<String, Value>) -> Result<String> {
    let mut out = String::new();
    for (name, value) in vars {
        if !is_identifier(name) {
            return Err(WorkerError::VarEncoding(format!(
                "variable name {:?} is not a valid identifier",
                name
            )));
        }
        out.push_str(name);
        out.push_str(" = ");
        encode_value(value, &mut out);
        out.push('\n');
    }
    Ok(out)
}

/// Encode `vars` and write them to `<dir>/<random>.tfvars`, readable by the
/// owner only.
pub async fn write_var_file(dir: &Path, vars: &BTreeMap<String, Value>) -> Result<PathBuf> {
    let contents = encode(vars)?;
    let path = dir.join(format!("{}.tfvars", random_token(5)));
    write_private(&path, contents.as_bytes()).await?;
    Ok(path)
}

fn encode_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => encode_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                encode_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            if map.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push_str("{ ");
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                encode_string(key, out);
                out.push_str(" = ");
                encode_value(item, out);
            }
            out.push_str(" }");
        }
    }
}

fn encode_string(s: &str, out: &mut String) {
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            // template sequences must not be interpolated
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
