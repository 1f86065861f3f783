//! Queries - filter and ordering over records of one kind
//!
//! A query names an entity kind, a predicate and an ordered list of sort
//! descriptors. Queries are plain data; the storage layer compiles them to SQL
//! and checks them against the schema when they run.

use crate::model::EntityDescription;
use crate::value::Value;
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Comparison operators available in predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// SQL LIKE pattern match (`%` and `_` wildcards)
    Like,
}

impl ComparisonOp {
    /// SQL operator text
    pub fn as_sql(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Like => "LIKE",
        }
    }

    /// Operator symbol used in the textual comparison form
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Like => "~",
        }
    }
}

impl FromStr for ComparisonOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "=" | "==" => Ok(ComparisonOp::Eq),
            "!=" | "<>" => Ok(ComparisonOp::Ne),
            "<" => Ok(ComparisonOp::Lt),
            "<=" => Ok(ComparisonOp::Le),
            ">" => Ok(ComparisonOp::Gt),
            ">=" => Ok(ComparisonOp::Ge),
            "~" => Ok(ComparisonOp::Like),
            _ if s.eq_ignore_ascii_case("like") => Ok(ComparisonOp::Like),
            _ => Err(Error::Parse(format!("Unknown comparison operator: {}", s))),
        }
    }
}

/// A filter over records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Matches every record
    #[default]
    True,
    /// Matches nothing
    False,
    Compare {
        attribute: String,
        op: ComparisonOp,
        value: Value,
    },
    IsNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(attribute: impl Into<String>, op: ComparisonOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, ComparisonOp::Eq, value)
    }

    pub fn ne(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, ComparisonOp::Ne, value)
    }

    pub fn lt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, ComparisonOp::Lt, value)
    }

    pub fn le(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, ComparisonOp::Le, value)
    }

    pub fn gt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, ComparisonOp::Gt, value)
    }

    pub fn ge(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, ComparisonOp::Ge, value)
    }

    pub fn like(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::compare(attribute, ComparisonOp::Like, Value::String(pattern.into()))
    }

    pub fn is_null(attribute: impl Into<String>) -> Self {
        Predicate::IsNull(attribute.into())
    }

    /// Conjunction, flattening nested `And`s and dropping `True`
    pub fn and(self, other: Predicate) -> Self {
        let mut parts = Vec::new();
        for p in [self, other] {
            match p {
                Predicate::True => {}
                Predicate::And(inner) => parts.extend(inner),
                p => parts.push(p),
            }
        }
        match parts.len() {
            0 => Predicate::True,
            1 => parts.remove(0),
            _ => Predicate::And(parts),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut inner) => {
                inner.push(other);
                Predicate::Or(inner)
            }
            p => Predicate::Or(vec![p, other]),
        }
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }
}

/// A comparison in textual form, before the attribute type is known.
///
/// `name=Name0`, `rank>=3`, `name~Na%`, `done!=true`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub attribute: String,
    pub op: ComparisonOp,
    pub raw_value: String,
}

fn comparison_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_]*)\s*(!=|<>|<=|>=|==|=|<|>|~)\s*(.*?)\s*$")
            .expect("valid comparison regex")
    })
}

impl Comparison {
    pub fn parse(text: &str) -> Result<Self> {
        let caps = comparison_pattern()
            .captures(text)
            .ok_or_else(|| Error::Parse(format!("Invalid comparison: '{}'", text)))?;
        Ok(Self {
            attribute: caps[1].to_string(),
            op: caps[2].parse()?,
            raw_value: caps[3].to_string(),
        })
    }

    /// Type the raw value against `entity` and build the predicate.
    ///
    /// LIKE patterns stay text whatever the attribute type.
    pub fn to_predicate(&self, entity: &EntityDescription) -> Result<Predicate> {
        let attribute = entity.attribute(&self.attribute).ok_or_else(|| Error::UnknownAttribute {
            kind: entity.name.clone(),
            attribute: self.attribute.clone(),
        })?;
        let value = if self.op == ComparisonOp::Like {
            Value::String(self.raw_value.clone())
        } else {
            Value::parse_as(&self.raw_value, attribute.attribute_type)?
        };
        Ok(Predicate::compare(self.attribute.clone(), self.op, value))
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.attribute, self.op.symbol(), self.raw_value)
    }
}

impl FromStr for Comparison {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Ordering on one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDescriptor {
    pub attribute: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: true,
        }
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: false,
        }
    }
}

impl FromStr for SortDescriptor {
    type Err = Error;

    /// `name`, `name:asc`, `name:desc` or `-name`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(attr) = s.strip_prefix('-') {
            return Ok(Self::descending(attr));
        }
        match s.split_once(':') {
            None if !s.is_empty() => Ok(Self::ascending(s)),
            Some((attr, dir)) if !attr.is_empty() => match dir.to_lowercase().as_str() {
                "asc" | "ascending" => Ok(Self::ascending(attr)),
                "desc" | "descending" => Ok(Self::descending(attr)),
                _ => Err(Error::Parse(format!("Unknown sort direction: {}", dir))),
            },
            _ => Err(Error::Parse(format!("Invalid sort descriptor: '{}'", s))),
        }
    }
}

/// Filter + ordering over records of one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub kind: String,
    #[serde(default)]
    pub predicate: Predicate,
    #[serde(default)]
    pub sort: Vec<SortDescriptor>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl Query {
    /// All records of `kind`, in store order
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            predicate: Predicate::True,
            sort: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Narrow the query; repeated calls are combined with AND
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = std::mem::take(&mut self.predicate).and(predicate);
        self
    }

    pub fn sort_by(mut self, descriptor: SortDescriptor) -> Self {
        self.sort.push(descriptor);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_flattens() {
        let p = Predicate::True
            .and(Predicate::eq("a", 1))
            .and(Predicate::eq("b", 2))
            .and(Predicate::True);
        assert_eq!(p, Predicate::And(vec![Predicate::eq("a", 1), Predicate::eq("b", 2)]));
        assert_eq!(Predicate::True.and(Predicate::True), Predicate::True);
    }

    #[test]
    fn test_or_and_negate_nesting() {
        let p = Predicate::eq("a", 1)
            .or(Predicate::is_null("b"))
            .or(Predicate::False)
            .and(Predicate::like("c", "x%").negate());
        assert_eq!(
            p,
            Predicate::And(vec![
                Predicate::Or(vec![Predicate::eq("a", 1), Predicate::is_null("b"), Predicate::False]),
                Predicate::Not(Box::new(Predicate::like("c", "x%"))),
            ])
        );
    }

    #[test]
    fn test_comparison_parse() {
        let c = Comparison::parse("rank >= 3").unwrap();
        assert_eq!(c.attribute, "rank");
        assert_eq!(c.op, ComparisonOp::Ge);
        assert_eq!(c.raw_value, "3");

        let c = Comparison::parse("name~Na%").unwrap();
        assert_eq!(c.op, ComparisonOp::Like);
        assert_eq!(c.raw_value, "Na%");
        assert_eq!(c.to_string(), "name~Na%");

        let c = Comparison::parse("done <> true").unwrap();
        assert_eq!(c.to_string(), "done!=true");

        let c = Comparison::parse("name=").unwrap();
        assert_eq!(c.raw_value, "");

        assert!(Comparison::parse("no operator").is_err());
        assert!(Comparison::parse("=value").is_err());
    }

    #[test]
    fn test_comparison_to_predicate() {
        use crate::model::{AttributeDescription, AttributeType};
        let entity = EntityDescription::new("Note")
            .with_attribute(AttributeDescription::new("rank", AttributeType::Integer))
            .with_attribute(AttributeDescription::new("done", AttributeType::Boolean));

        let p = Comparison::parse("rank<=4").unwrap().to_predicate(&entity).unwrap();
        assert_eq!(p, Predicate::le("rank", 4));

        let p = Comparison::parse("done=yes").unwrap().to_predicate(&entity).unwrap();
        assert_eq!(p, Predicate::eq("done", true));

        let p = Comparison::parse("rank~1%").unwrap().to_predicate(&entity).unwrap();
        assert_eq!(p, Predicate::like("rank", "1%"));

        assert!(Comparison::parse("rank=high").unwrap().to_predicate(&entity).is_err());
        assert!(Comparison::parse("color=red").unwrap().to_predicate(&entity).is_err());
    }

    #[test]
    fn test_sort_descriptor_parse() {
        assert_eq!("name".parse::<SortDescriptor>().unwrap(), SortDescriptor::ascending("name"));
        assert_eq!("name:desc".parse::<SortDescriptor>().unwrap(), SortDescriptor::descending("name"));
        assert_eq!("-rank".parse::<SortDescriptor>().unwrap(), SortDescriptor::descending("rank"));
        assert!("name:sideways".parse::<SortDescriptor>().is_err());
        assert!("".parse::<SortDescriptor>().is_err());
    }

    #[test]
    fn test_query_builder() {
        let q = Query::new("Note")
            .filter(Predicate::eq("done", false))
            .filter(Predicate::gt("rank", 2))
            .sort_by(SortDescriptor::ascending("title"))
            .limit(5);
        assert_eq!(q.kind, "Note");
        assert!(matches!(q.predicate, Predicate::And(ref parts) if parts.len() == 2));
        assert_eq!(q.sort.len(), 1);
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.offset, None);
    }
}
