//! Table definitions derived from the entity model

use crate::model::{AttributeDescription, EntityDescription, Schema};

/// Primary key column present in every entity table
pub const PK_COLUMN: &str = "_pk";

/// Quote an identifier for use in SQL. Names are validated by the schema,
/// so they never contain quotes.
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name)
}

fn column_definition(attribute: &AttributeDescription) -> String {
    let mut def = format!("{} {}", quote(&attribute.name), attribute.attribute_type.sql_type());
    if !attribute.optional {
        def.push_str(" NOT NULL");
    }
    def
}

/// SQL to create the table for one entity
pub fn create_table_sql(entity: &EntityDescription) -> String {
    let mut columns = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", PK_COLUMN)];
    columns.extend(entity.attributes.iter().map(column_definition));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote(&entity.name),
        columns.join(",\n    ")
    )
}

/// SQL to add a column that a newer schema introduced.
///
/// SQLite cannot add a NOT NULL column without a default, so added columns
/// are always nullable; required attributes are enforced on write.
pub fn add_column_sql(entity: &EntityDescription, attribute: &AttributeDescription) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote(&entity.name),
        quote(&attribute.name),
        attribute.attribute_type.sql_type()
    )
}

/// All table creation statements for a schema
pub fn all_schema_statements(schema: &Schema) -> Vec<String> {
    schema.entities.iter().map(create_table_sql).collect()
}
