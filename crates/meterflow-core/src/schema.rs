//! Typed schemas for named conditions.
//!
//! A [`Schema`] maps every permitted name to the [`ValueKind`] its value must
//! have. [`Schema::validate`] rejects names outside the schema and values of
//! the wrong kind; nothing is coerced.

use std::collections::BTreeMap;
use std::fmt;

use snafu::prelude::*;

/// Primitive kinds a schema entry may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `true` / `false`.
    Bool,
    /// UTF-8 text.
    Str,
    /// Signed 64-bit integer.
    Int,
    /// Ordered sequence of values.
    Tuple,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Str => "str",
            ValueKind::Int => "int",
            ValueKind::Tuple => "tuple",
        };
        f.write_str(name)
    }
}

/// A value tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Text value.
    Str(String),
    /// Integer value.
    Int(i64),
    /// Tuple of values.
    Tuple(Vec<Value>),
}

impl Value {
    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Str(_) => ValueKind::Str,
            Value::Int(_) => ValueKind::Int,
            Value::Tuple(_) => ValueKind::Tuple,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Tuple(v)
    }
}

/// Errors raised by [`Schema::validate`].
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum SchemaError {
    /// The name is not part of the schema.
    #[snafu(display("Capability '{name}' is not in the schema"))]
    UnknownCapability {
        /// Name that was looked up.
        name: String,
    },

    /// The value's kind disagrees with the schema.
    #[snafu(display("Capability '{name}={value}' should be of kind {expected}, not {actual}"))]
    TypeMismatch {
        /// Name of the offending entry.
        name: String,
        /// Rendered value that failed validation.
        value: String,
        /// Kind declared by the schema.
        expected: ValueKind,
        /// Kind of the supplied value.
        actual: ValueKind,
    },
}

/// Immutable mapping from condition name to expected value kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    definition: BTreeMap<String, ValueKind>,
}

impl Schema {
    /// Build a schema from `(name, kind)` pairs.
    pub fn new<I, K>(definition: I) -> Self
    where
        I: IntoIterator<Item = (K, ValueKind)>,
        K: Into<String>,
    {
        Self {
            definition: definition
                .into_iter()
                .map(|(name, kind)| (name.into(), kind))
                .collect(),
        }
    }

    /// Kind declared for `name`, if any.
    pub fn expected_kind(&self, name: &str) -> Option<ValueKind> {
        self.definition.get(name).copied()
    }

    /// Every name in the schema, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definition.keys().map(String::as_str)
    }

    /// Check every `(name, value)` pair against the schema.
    ///
    /// Stops at the first violation.
    pub fn validate<'a, I>(&self, candidate: I) -> Result<(), SchemaError>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        for (name, value) in candidate {
            let expected = self
                .expected_kind(name)
                .context(UnknownCapabilitySnafu { name })?;
            let actual = value.kind();
            ensure!(
                actual == expected,
                TypeMismatchSnafu {
                    name,
                    value: value.to_string(),
                    expected,
                    actual,
                }
            );
        }
        Ok(())
    }
}
