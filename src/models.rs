//! Wire data models for plugin results and requests.
//!
//! This module contains the structures sent back to the controller
//! (documents, sections, coerced values) and the request shape the
//! agent consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One coerced datum in its wire-safe form.
///
/// Exactly one variant is chosen per engine value; see [`crate::coerce`]
/// for the precedence rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Value {
    /// A structured analysis object (struct, pointer, enumeration...).
    TypedObject {
        type_name: String,
        object_name: String,
        offset: u64,
        address_space: String,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "wide_int::deserialize_option"
        )]
        integer_value: Option<i128>,
        /// Only present when the textual rendering carries information the
        /// integer does not.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        string_value: Option<String>,
    },
    /// An explicitly unavailable result.
    Absent { type_name: String, reason: String },
    /// Booleans travel as text so they never look like small integers.
    Boolean { string_value: String },
    Integer {
        #[serde(deserialize_with = "wide_int::deserialize")]
        integer_value: i128,
    },
    Text { string_value: String },
    /// Debug representation of anything not covered above.
    Fallback { string_value: String },
}

impl Value {
    /// Returns the string payload, if this value carries one.
    pub fn string_value(&self) -> Option<&str> {
        match self {
            Value::TypedObject { string_value, .. } => string_value.as_deref(),
            Value::Boolean { string_value }
            | Value::Text { string_value }
            | Value::Fallback { string_value } => Some(string_value),
            Value::Absent { .. } | Value::Integer { .. } => None,
        }
    }

    /// Returns the integer payload, if this value carries one.
    pub fn integer_value(&self) -> Option<i128> {
        match self {
            Value::TypedObject { integer_value, .. } => *integer_value,
            Value::Integer { integer_value } => Some(*integer_value),
            _ => None,
        }
    }

    /// Short text used when rendering the value for humans.
    pub fn display_text(&self) -> String {
        match self {
            Value::TypedObject {
                object_name,
                integer_value,
                string_value,
                ..
            } => match (string_value, integer_value) {
                (Some(text), _) => text.clone(),
                (None, Some(n)) => n.to_string(),
                (None, None) => object_name.clone(),
            },
            Value::Absent { .. } => "-".to_string(),
            Value::Integer { integer_value } => integer_value.to_string(),
            Value::Boolean { string_value }
            | Value::Text { string_value }
            | Value::Fallback { string_value } => string_value.clone(),
        }
    }
}

/// 128-bit integers inside internally tagged enums are buffered by serde,
/// and the buffer only answers `deserialize_any`.
mod wide_int {
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    struct WideInt;

    impl<'de> Visitor<'de> for WideInt {
        type Value = i128;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i128, E> {
            Ok(i128::from(v))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i128, E> {
            Ok(i128::from(v))
        }

        fn visit_i128<E: de::Error>(self, v: i128) -> Result<i128, E> {
            Ok(v)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<i128, E> {
            i128::try_from(v).map_err(|_| E::custom("integer out of range"))
        }
    }

    struct MaybeWideInt;

    impl<'de> Visitor<'de> for MaybeWideInt {
        type Value = Option<i128>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Option<i128>, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Option<i128>, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Option<i128>, D::Error> {
            deserialize(d).map(Some)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i128, D::Error> {
        d.deserialize_any(WideInt)
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i128>, D::Error> {
        d.deserialize_option(MaybeWideInt)
    }
}

/// Column description for a table section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnHeader {
    /// Human-readable column title.
    pub display_name: String,
    /// Machine-readable field name.
    pub field_name: String,
    /// Engine-specific formatting hint (e.g. `[addrpad]`, `<20`).
    pub format_hint: String,
}

impl ColumnHeader {
    pub fn new(
        display_name: impl Into<String>,
        field_name: impl Into<String>,
        format_hint: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            field_name: field_name.into(),
            format_hint: format_hint.into(),
        }
    }
}

/// Tabular output: headers plus rows of coerced values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSection {
    #[serde(default)]
    pub headers: Vec<ColumnHeader>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

/// One formatted-text entry. The template is sent raw; interpolation is
/// left to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedText {
    pub template: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Free-text output: an ordered run of formatted entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSection {
    #[serde(default)]
    pub entries: Vec<FormattedText>,
}

/// One contiguous block of a result document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Section {
    Table(TableSection),
    Text(TextSection),
}

impl Section {
    pub fn as_table(&self) -> Option<&TableSection> {
        match self {
            Section::Table(table) => Some(table),
            Section::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextSection> {
        match self {
            Section::Text(text) => Some(text),
            Section::Table(_) => None,
        }
    }
}

/// The result of running one plugin, as sent to the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl ResultDocument {
    /// Whether the plugin completed without a recorded error.
    pub fn is_ok(&self) -> bool {
        self.error.as_deref().map_or(true, str::is_empty)
    }

    /// Iterates over the table sections only.
    pub fn tables(&self) -> impl Iterator<Item = &TableSection> {
        self.sections.iter().filter_map(Section::as_table)
    }
}

/// Addressable target device (memory image or live memory driver).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Path of the image; doubles as the context cache key.
    pub path: String,
}

impl DeviceDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// A controller-supplied scalar attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    /// Wide enough for any 64-bit address, signed or not.
    Integer(#[serde(deserialize_with = "wide_int::deserialize")] i128),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    /// Parse a command-line value: bool, then integer, then float, then text.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "true" => return AttributeValue::Bool(true),
            "false" => return AttributeValue::Bool(false),
            _ => {}
        }
        if let Ok(n) = raw.parse::<i128>() {
            return AttributeValue::Integer(n);
        }
        if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            if let Ok(n) = i128::from_str_radix(hex, 16) {
                return AttributeValue::Integer(n);
            }
        }
        if let Ok(f) = raw.parse::<f64>() {
            return AttributeValue::Float(f);
        }
        AttributeValue::Text(raw.to_string())
    }

    pub fn as_integer(&self) -> Option<i128> {
        match self {
            AttributeValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Integer(n) => write!(f, "{}", n),
            AttributeValue::Float(x) => write!(f, "{}", x),
            AttributeValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Request to run a batch of plugins against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRequest {
    pub device: DeviceDescriptor,
    pub plugins: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// Metadata about one batch, used by the human-readable report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Path of the analyzed target.
    pub target: String,
    /// Date and time the batch finished.
    pub analysis_date: DateTime<Utc>,
    /// Number of plugins requested.
    pub plugins_requested: usize,
    /// Number of documents carrying an error.
    pub plugins_failed: usize,
    /// Duration of the batch in seconds.
    pub duration_seconds: f64,
}

impl ReportMetadata {
    pub fn from_documents(
        target: &str,
        documents: &[ResultDocument],
        duration_seconds: f64,
    ) -> Self {
        Self {
            target: target.to_string(),
            analysis_date: Utc::now(),
            plugins_requested: documents.len(),
            plugins_failed: documents.iter().filter(|d| !d.is_ok()).count(),
            duration_seconds,
        }
    }
}
