//! Query compilation - predicates and orderings to parameterized SQL
//!
//! Every attribute a query mentions is checked against the entity before any
//! SQL is produced, so a malformed query fails here rather than in SQLite.

use super::schema::{quote, PK_COLUMN};
use crate::model::EntityDescription;
use crate::query::{ComparisonOp, Predicate, Query};
use crate::value::Value;
use crate::{Error, Result};

/// SQL text with its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Column list in the order rows are decoded: primary key, then attributes
pub fn select_columns(entity: &EntityDescription) -> String {
    let mut columns = vec![PK_COLUMN.to_string()];
    columns.extend(entity.attributes.iter().map(|a| quote(&a.name)));
    columns.join(", ")
}

/// Compile a full SELECT for `query`
pub fn compile_select(entity: &EntityDescription, query: &Query) -> Result<CompiledQuery> {
    let mut params = Vec::new();
    let where_clause = compile_predicate(entity, &query.predicate, &mut params)?;

    let mut sql = format!(
        "SELECT {} FROM {} WHERE {}",
        select_columns(entity),
        quote(&entity.name),
        where_clause
    );

    // Insertion order breaks ties so results are stable across runs.
    let mut order = Vec::with_capacity(query.sort.len() + 1);
    for descriptor in &query.sort {
        let column = if descriptor.attribute == PK_COLUMN {
            PK_COLUMN.to_string()
        } else {
            check_attribute(entity, &descriptor.attribute)?;
            quote(&descriptor.attribute)
        };
        let direction = if descriptor.ascending { "ASC" } else { "DESC" };
        order.push(format!("{} {}", column, direction));
    }
    order.push(format!("{} ASC", PK_COLUMN));
    sql.push_str(" ORDER BY ");
    sql.push_str(&order.join(", "));

    match (query.limit, query.offset) {
        (None, None) => {}
        (limit, offset) => {
            // SQLite needs a LIMIT before OFFSET; -1 means unbounded.
            let limit = limit.map(|l| l as i64).unwrap_or(-1);
            params.push(Value::Integer(limit));
            params.push(Value::Integer(offset.unwrap_or(0) as i64));
            sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", params.len() - 1, params.len()));
        }
    }

    Ok(CompiledQuery { sql, params })
}

/// Compile a COUNT over the records matching `predicate`
pub fn compile_count(entity: &EntityDescription, predicate: &Predicate) -> Result<CompiledQuery> {
    let mut params = Vec::new();
    let where_clause = compile_predicate(entity, predicate, &mut params)?;
    Ok(CompiledQuery {
        sql: format!("SELECT COUNT(*) FROM {} WHERE {}", quote(&entity.name), where_clause),
        params,
    })
}

fn check_attribute(entity: &EntityDescription, attribute: &str) -> Result<()> {
    if entity.attribute(attribute).is_some() {
        Ok(())
    } else {
        Err(Error::UnknownAttribute {
            kind: entity.name.clone(),
            attribute: attribute.to_string(),
        })
    }
}

fn compile_predicate(entity: &EntityDescription, predicate: &Predicate, params: &mut Vec<Value>) -> Result<String> {
    match predicate {
        Predicate::True => Ok("1".to_string()),
        Predicate::False => Ok("0".to_string()),
        Predicate::IsNull(attribute) => {
            check_attribute(entity, attribute)?;
            Ok(format!("{} IS NULL", quote(attribute)))
        }
        Predicate::Compare { attribute, op, value } => {
            let description = entity.attribute(attribute).ok_or_else(|| Error::UnknownAttribute {
                kind: entity.name.clone(),
                attribute: attribute.clone(),
            })?;
            let column = quote(attribute);

            if value.is_null() {
                return match op {
                    ComparisonOp::Eq => Ok(format!("{} IS NULL", column)),
                    ComparisonOp::Ne => Ok(format!("{} IS NOT NULL", column)),
                    _ => Err(Error::Parse(format!(
                        "null can only be compared with = or != (attribute {})",
                        attribute
                    ))),
                };
            }

            if *op == ComparisonOp::Like {
                if !matches!(value, Value::String(_)) {
                    return Err(Error::TypeMismatch {
                        attribute: attribute.clone(),
                        expected: "string pattern".to_string(),
                        found: value.type_name(),
                    });
                }
            } else if !value.conforms_to(description.attribute_type) {
                return Err(Error::TypeMismatch {
                    attribute: attribute.clone(),
                    expected: description.attribute_type.to_string(),
                    found: value.type_name(),
                });
            }

            params.push(value.clone());
            Ok(format!("{} {} ?{}", column, op.as_sql(), params.len()))
        }
        Predicate::And(parts) => compile_group(entity, parts, " AND ", "1", params),
        Predicate::Or(parts) => compile_group(entity, parts, " OR ", "0", params),
        Predicate::Not(inner) => Ok(format!("NOT ({})", compile_predicate(entity, inner, params)?)),
    }
}

fn compile_group(
    entity: &EntityDescription,
    parts: &[Predicate],
    joiner: &str,
    empty: &str,
    params: &mut Vec<Value>,
) -> Result<String> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let compiled = parts
        .iter()
        .map(|p| compile_predicate(entity, p, params).map(|sql| format!("({})", sql)))
        .collect::<Result<Vec<_>>>()?;
    Ok(compiled.join(joiner))
}
