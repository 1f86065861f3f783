//! Schema documents - the entity model a store is opened with
//!
//! A schema lists entity kinds and their attributes:
//!
//! ```toml
//! [[entities]]
//! name = "TestEntity"
//!
//! [[entities.attributes]]
//! name = "name"
//! type = "string"
//! optional = true
//! ```
//!
//! Attribute types map onto SQLite storage classes:
//! - `String`: TEXT
//! - `Integer`: INTEGER
//! - `Double`: REAL
//! - `Boolean`: INTEGER (0/1)
//! - `Binary`: BLOB

use crate::value::Value;
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

/// Attribute types understood by the store.
///
/// Schema documents may use the aliases accepted by `FromStr` (`text`,
/// `int`, `bool`, `blob`, ...); serialization always writes the canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum AttributeType {
    String,
    Integer,
    Double,
    Boolean,
    Binary,
}

impl AttributeType {
    /// Get the string representation of the attribute type
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Integer => "integer",
            AttributeType::Double => "double",
            AttributeType::Boolean => "boolean",
            AttributeType::Binary => "binary",
        }
    }

    /// SQLite column type for this attribute type
    pub fn sql_type(&self) -> &'static str {
        match self {
            AttributeType::String => "TEXT",
            AttributeType::Integer | AttributeType::Boolean => "INTEGER",
            AttributeType::Double => "REAL",
            AttributeType::Binary => "BLOB",
        }
    }
}

impl FromStr for AttributeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "string" | "text" | "str" => Ok(AttributeType::String),
            "integer" | "int" | "int64" | "i64" => Ok(AttributeType::Integer),
            "double" | "float" | "real" | "f64" => Ok(AttributeType::Double),
            "boolean" | "bool" => Ok(AttributeType::Boolean),
            "binary" | "blob" | "bytes" | "data" => Ok(AttributeType::Binary),
            _ => Err(Error::Schema(format!("Unknown attribute type: {}", s))),
        }
    }
}

impl TryFrom<String> for AttributeType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One attribute of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
    /// Optional attributes may be absent or null
    #[serde(default = "default_optional")]
    pub optional: bool,
    /// Value stored when an insert leaves the attribute unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_optional() -> bool {
    true
}

impl AttributeDescription {
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            optional: true,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// An entity kind and its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDescription>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeDescription) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// The full entity model of a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub entities: Vec<EntityDescription>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityDescription) -> Self {
        self.entities.push(entity);
        self
    }

    /// Look up an entity by kind name
    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Schema(e.to_string()))
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Schema(e.to_string()))
    }

    /// Load a schema document from disk. `.json` files are read as JSON,
    /// everything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let schema = if is_json {
            Self::from_json_str(&contents)?
        } else {
            Self::from_toml_str(&contents)?
        };
        tracing::debug!("Loaded schema with {} entities from {}", schema.entities.len(), path.display());
        Ok(schema)
    }

    /// Check the schema can be turned into tables.
    pub fn validate(&self) -> Result<()> {
        if self.entities.is_empty() {
            return Err(Error::Schema("schema defines no entities".to_string()));
        }

        let mut kinds = HashSet::new();
        for entity in &self.entities {
            check_identifier(&entity.name)?;
            if !kinds.insert(entity.name.as_str()) {
                return Err(Error::Schema(format!("duplicate entity: {}", entity.name)));
            }

            let mut attributes = HashSet::new();
            for attribute in &entity.attributes {
                check_identifier(&attribute.name)?;
                if !attributes.insert(attribute.name.as_str()) {
                    return Err(Error::Schema(format!(
                        "duplicate attribute {} on {}",
                        attribute.name, entity.name
                    )));
                }
                if let Some(default) = &attribute.default {
                    if default.is_null() || !default.conforms_to(attribute.attribute_type) {
                        return Err(Error::Schema(format!(
                            "default for {}.{} is not a {}",
                            entity.name, attribute.name, attribute.attribute_type
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

/// Names become SQL identifiers; a leading underscore is reserved for
/// store bookkeeping columns.
fn check_identifier(name: &str) -> Result<()> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::Schema(format!("invalid name: '{}'", name)))
    }
}
