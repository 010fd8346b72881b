//! Property value vocabulary for data-bound instances
//!
//! Bindable instances expose properties addressed by dotted path
//! (`"player.score"`). The bridge does not model nested instance graphs
//! statically; it only carries one of a small closed set of value kinds and
//! lets the worker resolve the path against the native engine at dispatch
//! time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of property kinds a bindable instance can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Number,
    Text,
    Boolean,
    EnumOption,
    Color,
    Trigger,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PropertyKind::Number => "number",
            PropertyKind::Text => "text",
            PropertyKind::Boolean => "boolean",
            PropertyKind::EnumOption => "enum_option",
            PropertyKind::Color => "color",
            PropertyKind::Trigger => "trigger",
        };
        write!(f, "{label}")
    }
}

/// A property value crossing the bridge by copy
///
/// Colors are packed 0xAARRGGBB. A trigger carries no payload; setting one
/// fires it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    EnumOption(String),
    Color(u32),
    Trigger,
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Number(_) => PropertyKind::Number,
            PropertyValue::Text(_) => PropertyKind::Text,
            PropertyValue::Boolean(_) => PropertyKind::Boolean,
            PropertyValue::EnumOption(_) => PropertyKind::EnumOption,
            PropertyValue::Color(_) => PropertyKind::Color,
            PropertyValue::Trigger => PropertyKind::Trigger,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Number(n) => write!(f, "{n}"),
            PropertyValue::Text(s) => write!(f, "{s:?}"),
            PropertyValue::Boolean(b) => write!(f, "{b}"),
            PropertyValue::EnumOption(s) => write!(f, "{s}"),
            PropertyValue::Color(c) => write!(f, "#{c:08x}"),
            PropertyValue::Trigger => write!(f, "trigger"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_reports_its_kind() {
        assert_eq!(PropertyValue::Number(1.5).kind(), PropertyKind::Number);
        assert_eq!(PropertyValue::Trigger.kind(), PropertyKind::Trigger);
        assert_eq!(
            PropertyValue::Color(0xff00ff00).kind(),
            PropertyKind::Color
        );
    }

    #[test]
    fn serde_tag_is_stable() {
        let json = serde_json::to_string(&PropertyValue::Boolean(true)).expect("serialize");
        assert_eq!(json, r#"{"type":"boolean","value":true}"#);
    }
}
