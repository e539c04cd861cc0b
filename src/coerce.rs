//! Coercion of engine values into wire values.
//!
//! Engine values expose what they are through the [`SourceValue`]
//! capability checks. [`coerce`] asks them in a fixed order and picks
//! the first match:
//!
//! 1. structured analysis object
//! 2. boolean
//! 3. integer
//! 4. text
//! 5. absence marker
//! 6. fallback (debug representation)
//!
//! A value may answer several checks; only the first one counts.

use crate::models::{AttributeValue, Value};
use std::fmt;

/// A structured object produced by the analysis engine (a struct
/// overlaid on memory, a pointer, an enumeration...).
pub trait AnalysisObject {
    /// Engine type name, e.g. `_EPROCESS`.
    fn type_name(&self) -> &str;
    /// Symbolic name of this instance.
    fn object_name(&self) -> &str;
    /// Offset of the object inside its address space.
    fn offset(&self) -> u64;
    /// Label of the owning address space.
    fn address_space(&self) -> String;

    /// Integer interpretation, if the object has one.
    fn to_integer(&self) -> Option<i128> {
        None
    }

    /// Textual rendering, if the object has one.
    fn render(&self) -> Option<String> {
        None
    }
}

/// An explicitly unavailable result, with the type that was asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Absent {
    pub type_name: String,
    pub reason: String,
}

impl Absent {
    pub fn new(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }
}

/// Capability checks for anything a plugin may hand to the result builder.
///
/// Every check defaults to "no"; a type opts into the capabilities it has.
/// Types answering none of them are sent as their `Debug` text.
pub trait SourceValue: fmt::Debug {
    fn as_object(&self) -> Option<&dyn AnalysisObject> {
        None
    }

    fn as_bool(&self) -> Option<bool> {
        None
    }

    fn as_integer(&self) -> Option<i128> {
        None
    }

    fn as_text(&self) -> Option<&str> {
        None
    }

    fn as_absent(&self) -> Option<Absent> {
        None
    }

    /// Text used by the fallback variant.
    fn debug_repr(&self) -> String {
        format!("{:?}", self)
    }
}

/// Map one engine value to exactly one wire value. Never fails.
pub fn coerce<V: SourceValue + ?Sized>(value: &V) -> Value {
    if let Some(object) = value.as_object() {
        return coerce_object(object);
    }
    if let Some(flag) = value.as_bool() {
        return Value::Boolean {
            string_value: flag.to_string(),
        };
    }
    if let Some(integer_value) = value.as_integer() {
        return Value::Integer { integer_value };
    }
    if let Some(text) = value.as_text() {
        return Value::Text {
            string_value: text.to_string(),
        };
    }
    if let Some(absent) = value.as_absent() {
        return Value::Absent {
            type_name: absent.type_name,
            reason: absent.reason,
        };
    }
    Value::Fallback {
        string_value: value.debug_repr(),
    }
}

fn coerce_object(object: &dyn AnalysisObject) -> Value {
    let integer_value = object.to_integer();

    // The rendering is only sent when it says something the integer does not:
    // it parses to a different integer, or it does not parse at all.
    let string_value = object
        .render()
        .filter(|text| !text.is_empty())
        .filter(|text| match parse_integer(text) {
            Some(parsed) => Some(parsed) != integer_value,
            None => true,
        });

    Value::TypedObject {
        type_name: object.type_name().to_string(),
        object_name: object.object_name().to_string(),
        offset: object.offset(),
        address_space: object.address_space(),
        integer_value,
        string_value,
    }
}

/// Decimal integer interpretation of a rendering, surrounding whitespace allowed.
fn parse_integer(text: &str) -> Option<i128> {
    text.trim().parse::<i128>().ok()
}

impl SourceValue for bool {
    fn as_bool(&self) -> Option<bool> {
        Some(*self)
    }
}

macro_rules! integer_source_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SourceValue for $ty {
                fn as_integer(&self) -> Option<i128> {
                    i128::try_from(*self).ok()
                }
            }
        )*
    };
}

integer_source_value!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl SourceValue for f32 {}

impl SourceValue for f64 {}

impl SourceValue for char {}

impl SourceValue for str {
    fn as_text(&self) -> Option<&str> {
        Some(self)
    }
}

impl SourceValue for String {
    fn as_text(&self) -> Option<&str> {
        Some(self)
    }
}

impl SourceValue for Absent {
    fn as_absent(&self) -> Option<Absent> {
        Some(self.clone())
    }
}

impl SourceValue for AttributeValue {
    fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_integer(&self) -> Option<i128> {
        match self {
            AttributeValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    fn debug_repr(&self) -> String {
        match self {
            AttributeValue::Float(x) => format!("{:?}", x),
            other => format!("{:?}", other),
        }
    }
}

/// `None` is the absence marker; `Some` is transparent.
impl<T: SourceValue> SourceValue for Option<T> {
    fn as_object(&self) -> Option<&dyn AnalysisObject> {
        self.as_ref()?.as_object()
    }

    fn as_bool(&self) -> Option<bool> {
        self.as_ref()?.as_bool()
    }

    fn as_integer(&self) -> Option<i128> {
        self.as_ref()?.as_integer()
    }

    fn as_text(&self) -> Option<&str> {
        self.as_ref()?.as_text()
    }

    fn as_absent(&self) -> Option<Absent> {
        match self {
            Some(value) => value.as_absent(),
            None => Some(Absent::new(
                short_type_name(std::any::type_name::<T>()),
                "value not available",
            )),
        }
    }

    fn debug_repr(&self) -> String {
        match self {
            Some(value) => value.debug_repr(),
            None => "None".to_string(),
        }
    }
}

/// Last path segment of a Rust type name, without references or generics.
fn short_type_name(full: &str) -> &str {
    let mut name = full.trim_start_matches('&');
    name = name.strip_prefix("mut ").unwrap_or(name);
    name = name.strip_prefix("dyn ").unwrap_or(name);
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}

impl<T: SourceValue + ?Sized> SourceValue for &T {
    fn as_object(&self) -> Option<&dyn AnalysisObject> {
        (**self).as_object()
    }

    fn as_bool(&self) -> Option<bool> {
        (**self).as_bool()
    }

    fn as_integer(&self) -> Option<i128> {
        (**self).as_integer()
    }

    fn as_text(&self) -> Option<&str> {
        (**self).as_text()
    }

    fn as_absent(&self) -> Option<Absent> {
        (**self).as_absent()
    }

    fn debug_repr(&self) -> String {
        (**self).debug_repr()
    }
}
