//! Outbound payload rendering.
//!
//! Templates are plain text with `{{.field}}` actions resolved against a JSON
//! fields document. Dotted paths walk nested objects (`{{.from.user}}`),
//! `{{.}}` prints the whole document and `{{/* ... */}}` is a comment. A `-`
//! right inside the braces (`{{- .x -}}`) trims whitespace on that side.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::PayloadConfig;
use crate::{Result, WsctlError};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const NO_VALUE: &str = "<no value>";

/// Reads the template and fields document, renders, and applies CRLF
/// conversion when configured.
pub fn render_payload(config: &PayloadConfig) -> Result<Vec<u8>> {
    let template = fs::read_to_string(&config.template).map_err(|e| {
        WsctlError::Config(format!("cannot read template '{}': {}", config.template.display(), e))
    })?;
    let fields = load_fields(config.fields.as_deref())?;

    let rendered = render(&template, &fields)?;
    let rendered = if config.crlf { to_crlf(&rendered) } else { rendered };

    debug!("Rendered {} byte payload from {}", rendered.len(), config.template.display());
    Ok(rendered.into_bytes())
}

/// Loads the fields document; no path means an empty object.
pub fn load_fields(path: Option<&Path>) -> Result<Value> {
    let Some(path) = path else {
        return Ok(Value::Object(Map::new()));
    };

    let data = fs::read_to_string(path)
        .map_err(|e| WsctlError::Config(format!("cannot read fields file '{}': {}", path.display(), e)))?;
    Ok(serde_json::from_str(&data)?)
}

pub fn render(template: &str, fields: &Value) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut trim_next = false;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open
            .find(CLOSE)
            .ok_or_else(|| WsctlError::Template(format!("unclosed action at byte {}", template.len() - rest.len() + start)))?;
        let mut action = &after_open[..end];

        // Trim markers only ever touch the literal text next to the action
        let mut text = &rest[..start];
        if trim_next {
            text = text.trim_start();
        }
        if let Some(stripped) = action.strip_prefix("- ") {
            text = text.trim_end();
            action = stripped;
        }
        out.push_str(text);

        trim_next = false;
        if let Some(stripped) = action.strip_suffix(" -") {
            trim_next = true;
            action = stripped;
        }

        render_action(&mut out, action.trim(), fields)?;
        rest = &after_open[end + CLOSE.len()..];
    }
    out.push_str(if trim_next { rest.trim_start() } else { rest });

    Ok(out)
}

fn render_action(out: &mut String, action: &str, fields: &Value) -> Result<()> {
    if action.starts_with("/*") && action.ends_with("*/") {
        return Ok(());
    }
    if action == "." {
        write_value(out, fields);
        return Ok(());
    }

    let Some(path) = action.strip_prefix('.') else {
        return Err(WsctlError::Template(format!("unsupported action '{{{{{}}}}}'", action)));
    };

    let mut current = Some(fields);
    for key in path.split('.') {
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(WsctlError::Template(format!("invalid field path '{}'", action)));
        }
        current = match current {
            Some(Value::Object(map)) => map.get(key),
            None | Some(Value::Null) => None,
            Some(other) => {
                return Err(WsctlError::Template(format!(
                    "can't evaluate field {} in {} value",
                    key,
                    kind(other)
                )));
            }
        };
    }

    match current {
        Some(value) => write_value(out, value),
        None => out.push_str(NO_VALUE),
    }
    Ok(())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str(NO_VALUE),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push_str("map[");
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(key);
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push(']');
        }
    }
}

/// Turns every bare LF into CRLF. Existing CRLF pairs are left alone.
pub fn to_crlf(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 16);
    let mut prev = '\0';
    for c in text.chars() {
        if c == '\n' && prev != '\r' {
            out.push('\r');
        }
        out.push(c);
        prev = c;
    }
    out
}
