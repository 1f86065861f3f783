//! Object identity - stable URI for every persisted record
//!
//! Format: `dataservice://<Kind>/p<pk>`
//!
//! Examples:
//! - `dataservice://TestEntity/p1`
//! - `dataservice://Note/p42`

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

const SCHEME: &str = "dataservice://";

/// Stable identity of a record inside a store.
///
/// The primary key is assigned by the store when the record is inserted and
/// never reused while the record exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    /// Entity kind the record belongs to
    pub kind: String,
    /// Row primary key within the kind's table
    pub pk: i64,
}

impl ObjectId {
    pub fn new(kind: impl Into<String>, pk: i64) -> Self {
        Self {
            kind: kind.into(),
            pk,
        }
    }

    /// Parse a URI string into an ObjectId
    ///
    /// Expected format: `dataservice://<Kind>/p<pk>`
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix(SCHEME)
            .ok_or_else(|| Error::InvalidUri(format!("URI must start with {}", SCHEME)))?;

        let (kind, pk_part) = rest.rsplit_once('/')
            .ok_or_else(|| Error::InvalidUri("URI must contain <kind>/p<pk>".to_string()))?;

        if kind.is_empty() {
            return Err(Error::InvalidUri("URI kind is empty".to_string()));
        }

        let pk_str = pk_part.strip_prefix('p')
            .ok_or_else(|| Error::InvalidUri(format!("Invalid key segment: {}", pk_part)))?;
        let pk: i64 = pk_str.parse()
            .map_err(|_| Error::InvalidUri(format!("Invalid primary key: {}", pk_str)))?;

        Ok(Self::new(kind, pk))
    }

    /// Convert to URI string
    pub fn to_uri_string(&self) -> String {
        format!("{}{}/p{}", SCHEME, self.kind, self.pk)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri_string())
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_uri_string())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_format() {
        let id = ObjectId::new("TestEntity", 7);
        assert_eq!(id.to_uri_string(), "dataservice://TestEntity/p7");
        assert_eq!(ObjectId::parse(&id.to_uri_string()).unwrap(), id);
    }

    #[test]
    fn test_uri_parse() {
        let id: ObjectId = "dataservice://Note/p42".parse().unwrap();
        assert_eq!(id.kind, "Note");
        assert_eq!(id.pk, 42);
    }

    #[test]
    fn test_invalid_uri() {
        assert!(ObjectId::parse("invalid").is_err());
        assert!(ObjectId::parse("http://Note/p1").is_err());
        assert!(ObjectId::parse("dataservice://Note").is_err()); // missing key
        assert!(ObjectId::parse("dataservice://Note/42").is_err()); // missing p prefix
        assert!(ObjectId::parse("dataservice:///p1").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let id = ObjectId::new("Note", 3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"dataservice://Note/p3\"");
    }
}
