//! Probing helpers for the free-form `args` payloads of browser trace events.

use serde_json::Value;
use std::fmt;

/// Renders an identifier-like value: non-empty strings, integers, or
/// `{"id_ref": ..}` / `{"id": ..}` wrappers as emitted by cc.
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => n
            .as_u64()
            .map(|v| v.to_string())
            .or_else(|| n.as_i64().map(|v| v.to_string()))
            .or_else(|| n.as_f64().map(|v| v.to_string())),
        Value::Object(map) => map
            .get("id_ref")
            .or_else(|| map.get("id"))
            .and_then(value_as_id),
        _ => None,
    }
}

/// Reads a non-negative integer, accepting numeric strings and hex ids.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64)),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}

pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}

/// Reduces a URL to its file name, dropping query and fragment.
///
/// `https://cdn.example.com/img/hero.png?v=3` becomes `hero.png`. URLs that
/// end in a slash keep their last non-empty segment.
pub fn url_filename(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let path = without_fragment.split('?').next().unwrap_or(without_fragment);
    path.rsplit('/')
        .find(|segment| !segment.is_empty() && !segment.ends_with(':'))
        .unwrap_or(url)
        .to_string()
}

/// One JavaScript frame of a trace-event stack trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptFrame {
    pub function_name: String,
    pub url: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl ScriptFrame {
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let function_name = object
            .get("functionName")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();
        let url = object
            .get("url")
            .or_else(|| object.get("scriptName"))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        let line = object.get("lineNumber").and_then(value_as_u64).map(clamp_u32);
        let column = object.get("columnNumber").and_then(value_as_u64).map(clamp_u32);
        if function_name.is_empty() && url.is_none() {
            return None;
        }
        Some(Self {
            function_name,
            url,
            line,
            column,
        })
    }

    pub fn display_name(&self) -> &str {
        if self.function_name.is_empty() {
            "(anonymous)"
        } else {
            &self.function_name
        }
    }

    pub fn file(&self) -> Option<String> {
        self.url.as_deref().map(url_filename)
    }

    /// `function@file:line`, omitting what is unknown.
    pub fn call_site(&self) -> String {
        let mut site = self.display_name().to_string();
        if let Some(file) = self.file() {
            site.push('@');
            site.push_str(&file);
            if let Some(line) = self.line {
                site.push_str(&format!(":{line}"));
            }
        }
        site
    }
}

impl fmt::Display for ScriptFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())?;
        if let Some(url) = &self.url {
            write!(f, " ({url}")?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
                if let Some(column) = self.column {
                    write!(f, ":{column}")?;
                }
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Parses a `stackTrace` array, skipping entries that carry neither a function
/// name nor a URL.
pub fn parse_stack_trace(value: &Value) -> Vec<ScriptFrame> {
    value
        .as_array()
        .map(|frames| frames.iter().filter_map(ScriptFrame::from_value).collect())
        .unwrap_or_default()
}

pub(crate) fn clamp_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}
