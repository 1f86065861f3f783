//! DataService CLI - inspect and edit a schema-defined SQLite store

use anyhow::Context;
use clap::{Parser, Subcommand};
use dataservice::config::{self, DataServiceConfig};
use dataservice::query::{Comparison, Predicate, Query, SortDescriptor};
use dataservice::storage::StoreType;
use dataservice::ui::{self, Icons};
use dataservice::{DataStore, ObjectId, Record, Schema, StoreEvent, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "dataservice")]
#[command(version)]
#[command(about = "Generic data access over an embedded SQLite store")]
#[command(long_about = r#"
DataService opens a SQLite store described by a schema document and lets you
insert, query and delete records of any entity kind the schema defines.

Example usage:
  dataservice --schema model.toml insert --kind TestEntity --set name=Name0
  dataservice --schema model.toml fetch --kind TestEntity --sort name
  dataservice --schema model.toml fetch --kind TestEntity --where "name~Name%" --json
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Schema document (overrides config)
    #[arg(short, long, global = true)]
    schema: Option<PathBuf>,

    /// Database file (overrides config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Storage medium: sqlite or memory (overrides config)
    #[arg(long, global = true)]
    store_type: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file pointing at a schema
    Init {
        /// Store name
        #[arg(short, long, default_value = config::DEFAULT_STORE_NAME)]
        name: String,

        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Show the entities and attributes of the schema
    Schema,

    /// Insert a record and save it
    Insert {
        /// Entity kind
        #[arg(short, long)]
        kind: String,

        /// Attribute assignment, `attr=value` (repeatable)
        #[arg(long = "set")]
        assignments: Vec<String>,
    },

    /// Fetch records of one kind
    Fetch {
        /// Entity kind
        #[arg(short, long)]
        kind: String,

        /// Filter, e.g. `name=Name0`, `rank>=3`, `name~Na%` (repeatable, ANDed)
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,

        /// Sort key, `attr`, `attr:desc` or `-attr` (repeatable)
        #[arg(long)]
        sort: Vec<String>,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Results to skip
        #[arg(long)]
        offset: Option<usize>,
    },

    /// Count records of one kind
    Count {
        /// Entity kind
        #[arg(short, long)]
        kind: String,

        /// Filter (repeatable, ANDed)
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,
    },

    /// Delete a record by URI and save
    Delete {
        /// Object URI, e.g. `dataservice://TestEntity/p1`
        #[arg(short, long)]
        uri: String,
    },

    /// Show record counts per kind
    Stats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    // The default database lives next to the config file
    let base = match cli.config.as_deref().and_then(Path::parent) {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    if let Some(schema) = &cli.schema {
        config.schema = Some(schema.display().to_string());
    }
    if let Some(database) = &cli.database {
        config.database = Some(database.display().to_string());
    }
    if let Some(store_type) = &cli.store_type {
        config.store_type = Some(store_type.clone());
    }

    match cli.command {
        Commands::Init { name, force } => {
            let schema = config
                .schema
                .clone()
                .context("init needs --schema")?;
            // Fail early on a schema that would not open
            Schema::load(Path::new(&schema))?.validate()?;

            config.name = Some(name);
            let path = cli.config.unwrap_or_else(config::default_config_path);
            // Reloading resolves relative paths against the config file, so
            // pin a cwd-relative schema when the file is written elsewhere
            let config_dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());
            if config_dir.is_some() && Path::new(&schema).is_relative() {
                let absolute = std::fs::canonicalize(&schema)
                    .with_context(|| format!("cannot resolve schema path {}", schema))?;
                config.schema = Some(absolute.display().to_string());
            }
            config::write_config(&path, &config, force)?;
            ui::success(&format!("Wrote {}", path.display()));
        }

        Commands::Schema => {
            let schema = load_schema(&config)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&schema)?);
            } else {
                for entity in &schema.entities {
                    ui::section(&entity.name);
                    let mut table = ui::TableBuilder::new(["attribute", "type", "optional", "default"]);
                    for attribute in &entity.attributes {
                        table.add_row(vec![
                            attribute.name.clone(),
                            attribute.attribute_type.to_string(),
                            attribute.optional.to_string(),
                            attribute.default.as_ref().map(Value::to_string).unwrap_or_default(),
                        ]);
                    }
                    if table.is_empty() {
                        println!("  {}", ui::muted("(no attributes)"));
                    } else {
                        println!("{}", table.build());
                    }
                }
            }
        }

        Commands::Insert { kind, assignments } => {
            let store = open_store(&config, &base)?;
            let entity = store
                .schema()
                .entity(&kind)
                .with_context(|| format!("unknown entity kind: {}", kind))?;

            let mut values = Vec::with_capacity(assignments.len());
            for assignment in &assignments {
                let (attribute, raw) = assignment
                    .split_once('=')
                    .with_context(|| format!("expected attr=value, got '{}'", assignment))?;
                let description = entity
                    .attribute(attribute)
                    .with_context(|| format!("{} has no attribute '{}'", kind, attribute))?;
                values.push((attribute.to_string(), Value::parse_as(raw, description.attribute_type)?));
            }

            let record = store.try_insert(&kind, |record| {
                for (attribute, value) in values {
                    record.set(attribute, value);
                }
            })?;
            store.save()?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                let id = record.id.as_ref().map(ObjectId::to_uri_string).unwrap_or_default();
                println!("{} Inserted {}", Icons::NEW, ui::identifier(&id));
            }
        }

        Commands::Fetch { kind, filters, sort, limit, offset } => {
            let store = open_store(&config, &base)?;
            let mut query = build_query(&store, &kind, &filters)?;
            for key in &sort {
                query = query.sort_by(key.parse::<SortDescriptor>()?);
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            if let Some(offset) = offset {
                query = query.offset(offset);
            }

            let records: Vec<Record> = store.fetch(&query)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("{} No {} records found.", Icons::EMPTY, kind);
            } else if let Some(entity) = store.schema().entity(&kind) {
                println!("{}", ui::records_table(entity, &records));
                ui::summary_row("records:", &records.len().to_string());
            }
        }

        Commands::Count { kind, filters } => {
            let store = open_store(&config, &base)?;
            let query = build_query(&store, &kind, &filters)?;
            let count = store.count(&query)?;
            if cli.json {
                println!("{}", serde_json::json!({ "kind": kind, "count": count }));
            } else {
                ui::info(&kind, &count.to_string());
            }
        }

        Commands::Delete { uri } => {
            let store = open_store(&config, &base)?;
            let id = ObjectId::parse(&uri)?;
            store.delete(&id)?;
            store.save()?;
            println!("{} Deleted {}", Icons::DEL, ui::identifier(&id.to_uri_string()));
        }

        Commands::Stats => {
            let store = open_store(&config, &base)?;
            let stats = store.stats()?;
            if cli.json {
                let counts: serde_json::Map<String, serde_json::Value> = stats
                    .counts
                    .iter()
                    .map(|(kind, count)| (kind.clone(), serde_json::json!(count)))
                    .collect();
                println!("{}", serde_json::json!({ "store": store.name(), "counts": counts, "total": stats.total() }));
            } else {
                ui::header(&format!("{} Statistics", store.name()));
                let counts: Vec<(String, String)> = stats
                    .counts
                    .iter()
                    .map(|(kind, count)| (kind.clone(), count.to_string()))
                    .chain(std::iter::once(("Total".to_string(), stats.total().to_string())))
                    .collect();
                let rows: Vec<(&str, &str)> = counts.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                println!("{}", ui::stats_table(&rows));
            }
        }
    }

    Ok(())
}

fn load_schema(config: &DataServiceConfig) -> anyhow::Result<Schema> {
    let path = config
        .schema
        .as_deref()
        .context("no schema given (use --schema or set `schema` in dataservice.toml)")?;
    Ok(Schema::load(Path::new(path))?)
}

fn open_store(config: &DataServiceConfig, base: &Path) -> anyhow::Result<DataStore> {
    let schema = load_schema(config)?;
    let description = config.store_description(base)?;

    if description.store_type == StoreType::Memory {
        ui::warn("in-memory store: changes are discarded on exit");
    }
    if let Some(path) = &description.path {
        config::ensure_db_dir(path)?;
    }

    let store = DataStore::initialize(
        config.store_name(),
        schema,
        description,
        Some(Box::new(|event: StoreEvent| match event {
            StoreEvent::Failure(err) => ui::error(&format!("Failed to open store: {}", err)),
        })),
    );
    if !store.is_loaded() {
        anyhow::bail!("store '{}' could not be opened", config.store_name());
    }
    Ok(store)
}

fn build_query(store: &DataStore, kind: &str, filters: &[String]) -> anyhow::Result<Query> {
    let entity = store
        .schema()
        .entity(kind)
        .with_context(|| format!("unknown entity kind: {}", kind))?;

    let mut predicate = Predicate::True;
    for filter in filters {
        let comparison = Comparison::parse(filter)?;
        tracing::debug!("filter: {}", comparison);
        predicate = predicate.and(comparison.to_predicate(entity)?);
    }
    Ok(Query::new(kind).filter(predicate))
}
