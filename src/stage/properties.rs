//! Stage configuration: typed property bags and descriptor tables.
//!
//! Every stage owns a [`PropertyBag`] initialized from a static
//! [`PropertyDescriptor`] table. The table is what applications use to
//! build command-line parsers (the `stage.prop` flag convention); the
//! bag is what the stage reads at run time. Each successful write bumps
//! a modification counter that the pipeline driver watches to invalidate
//! cached reported metadata.

use crate::error::{Error, Result};

/// A typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Integer (also used for enum-like selectors).
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
    /// String.
    Str(String),
    /// List of strings.
    StrList(Vec<String>),
    /// List of floats.
    FloatList(Vec<f64>),
}

impl PropertyValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Str(_) => "string",
            Self::StrList(_) => "string list",
            Self::FloatList(_) => "float list",
        }
    }
}

/// One row of a stage's static property table.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    /// Property name (the `prop` in `stage.prop`).
    pub name: &'static str,
    /// Default value; also fixes the property's type.
    pub default: PropertyValue,
    /// One-line description for generated flag help.
    pub description: &'static str,
}

impl PropertyDescriptor {
    /// Shorthand constructor.
    pub const fn new(
        name: &'static str,
        default: PropertyValue,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            default,
            description,
        }
    }
}

/// A stage's named typed configuration values.
#[derive(Debug, Clone, Default)]
pub struct PropertyBag {
    values: Vec<(&'static str, PropertyValue)>,
    modification_count: u64,
}

impl PropertyBag {
    /// Build a bag holding each descriptor's default.
    pub fn from_descriptors(descriptors: &[PropertyDescriptor]) -> Self {
        Self {
            values: descriptors
                .iter()
                .map(|d| (d.name, d.default.clone()))
                .collect(),
            modification_count: 0,
        }
    }

    /// How many times this bag has been written.
    ///
    /// The driver compares this against its snapshot to decide whether a
    /// stage's cached reported metadata is stale.
    pub fn modification_count(&self) -> u64 {
        self.modification_count
    }

    /// Force cache invalidation without changing any value.
    pub fn set_modified(&mut self) {
        self.modification_count += 1;
    }

    fn slot(&self, name: &str) -> Result<&PropertyValue> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::config(format!("unknown property \"{name}\"")))
    }

    /// Write a property; its type must match the descriptor's default.
    pub fn set(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        let slot = self
            .values
            .iter_mut()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| Error::config(format!("unknown property \"{name}\"")))?;
        if std::mem::discriminant(&slot.1) != std::mem::discriminant(&value) {
            return Err(Error::config(format!(
                "property \"{name}\" is {}, got {}",
                slot.1.kind(),
                value.kind()
            )));
        }
        slot.1 = value;
        self.modification_count += 1;
        Ok(())
    }

    /// Write a property from flag text, parsed per the property's type.
    ///
    /// Lists are comma separated.
    pub fn set_from_str(&mut self, name: &str, text: &str) -> Result<()> {
        let parsed = match self.slot(name)? {
            PropertyValue::Int(_) => PropertyValue::Int(
                text.parse()
                    .map_err(|_| Error::config(format!("property \"{name}\": bad int \"{text}\"")))?,
            ),
            PropertyValue::Float(_) => PropertyValue::Float(text.parse().map_err(|_| {
                Error::config(format!("property \"{name}\": bad float \"{text}\""))
            })?),
            PropertyValue::Bool(_) => match text {
                "1" | "true" => PropertyValue::Bool(true),
                "0" | "false" => PropertyValue::Bool(false),
                _ => {
                    return Err(Error::config(format!(
                        "property \"{name}\": bad bool \"{text}\""
                    )))
                }
            },
            PropertyValue::Str(_) => PropertyValue::Str(text.to_string()),
            PropertyValue::StrList(_) => PropertyValue::StrList(
                text.split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            PropertyValue::FloatList(_) => {
                let mut out = Vec::new();
                for field in text.split(',').filter(|s| !s.is_empty()) {
                    out.push(field.parse().map_err(|_| {
                        Error::config(format!("property \"{name}\": bad float \"{field}\""))
                    })?);
                }
                PropertyValue::FloatList(out)
            }
        };
        self.set(name, parsed)
    }

    /// Read an integer property.
    pub fn int(&self, name: &str) -> Result<i64> {
        match self.slot(name)? {
            PropertyValue::Int(v) => Ok(*v),
            other => Err(Error::config(format!(
                "property \"{name}\" is {}, not int",
                other.kind()
            ))),
        }
    }

    /// Read a float property.
    pub fn float(&self, name: &str) -> Result<f64> {
        match self.slot(name)? {
            PropertyValue::Float(v) => Ok(*v),
            other => Err(Error::config(format!(
                "property \"{name}\" is {}, not float",
                other.kind()
            ))),
        }
    }

    /// Read a boolean property.
    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.slot(name)? {
            PropertyValue::Bool(v) => Ok(*v),
            other => Err(Error::config(format!(
                "property \"{name}\" is {}, not bool",
                other.kind()
            ))),
        }
    }

    /// Read a string property.
    pub fn str(&self, name: &str) -> Result<&str> {
        match self.slot(name)? {
            PropertyValue::Str(v) => Ok(v),
            other => Err(Error::config(format!(
                "property \"{name}\" is {}, not string",
                other.kind()
            ))),
        }
    }

    /// Read a string property that must be non-empty.
    pub fn required_str(&self, name: &str) -> Result<&str> {
        let v = self.str(name)?;
        if v.is_empty() {
            return Err(Error::config(format!(
                "required property \"{name}\" is not set"
            )));
        }
        Ok(v)
    }

    /// Read a string-list property.
    pub fn str_list(&self, name: &str) -> Result<&[String]> {
        match self.slot(name)? {
            PropertyValue::StrList(v) => Ok(v),
            other => Err(Error::config(format!(
                "property \"{name}\" is {}, not string list",
                other.kind()
            ))),
        }
    }

    /// Read a float-list property.
    pub fn float_list(&self, name: &str) -> Result<&[f64]> {
        match self.slot(name)? {
            PropertyValue::FloatList(v) => Ok(v),
            other => Err(Error::config(format!(
                "property \"{name}\" is {}, not float list",
                other.kind()
            ))),
        }
    }

    /// Iterate over `(name, value)` pairs in descriptor order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &PropertyValue)> {
        self.values.iter().map(|(n, v)| (*n, v))
    }
}
