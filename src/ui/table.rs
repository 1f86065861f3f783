use crate::model::EntityDescription;
use crate::record::Record;
use tabled::{builder::Builder, settings::Style};

/// Row-by-row table with a fixed header
pub struct TableBuilder {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TableBuilder {
    pub fn new<I, S>(header: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            header: header.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        let mut builder = Builder::default();
        builder.push_record(self.header.clone());
        for row in &self.rows {
            builder.push_record(row.clone());
        }
        builder.build().with(Style::rounded()).to_string()
    }
}

/// One row per record: identity first, then every attribute in schema order
pub fn records_table(entity: &EntityDescription, records: &[Record]) -> String {
    let mut header = vec!["id".to_string()];
    header.extend(entity.attributes.iter().map(|a| a.name.clone()));

    let mut table = TableBuilder::new(header);
    for record in records {
        let mut row = vec![record.id.as_ref().map(|id| id.to_uri_string()).unwrap_or_default()];
        row.extend(entity.attributes.iter().map(|a| {
            record.get(&a.name).map(|v| v.to_string()).unwrap_or_default()
        }));
        table.add_row(row);
    }
    table.build()
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new(["Metric", "Value"]);
    for (label, value) in stats {
        builder.add_row(vec![label.to_string(), value.to_string()]);
    }
    builder.build()
}
