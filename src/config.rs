use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::storage::{StoreDescription, StoreType};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DataServiceConfig {
    /// Store name; also names the default database file
    pub name: Option<String>,
    /// Path to the schema document (TOML or JSON)
    pub schema: Option<String>,
    /// `sqlite` or `memory`
    pub store_type: Option<String>,
    pub database: Option<String>,
}

pub const DEFAULT_STORE_NAME: &str = "default";

impl DataServiceConfig {
    pub fn store_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_STORE_NAME)
    }

    /// Resolve relative `schema` and `database` paths against `dir`
    pub fn resolve_paths(&mut self, dir: &Path) {
        self.schema = self.schema.take().map(|p| resolve_in(dir, &p));
        self.database = self.database.take().map(|p| resolve_in(dir, &p));
    }

    /// Resolve the store description, defaulting to a SQLite file under
    /// `.dataservice/` in `base`
    pub fn store_description(&self, base: &Path) -> anyhow::Result<StoreDescription> {
        let store_type = match &self.store_type {
            Some(s) => s.parse::<StoreType>()?,
            None => StoreType::Sqlite,
        };
        Ok(match store_type {
            StoreType::Memory => StoreDescription::in_memory(),
            StoreType::Sqlite => {
                let path = self
                    .database
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| default_database_path_in(base, self.store_name()));
                StoreDescription::sqlite(path)
            }
        })
    }
}

fn resolve_in(dir: &Path, path: &str) -> String {
    let candidate = Path::new(path);
    if candidate.is_absolute() || dir.as_os_str().is_empty() {
        return path.to_string();
    }
    dir.join(candidate).display().to_string()
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("dataservice.toml")
}

pub fn default_database_path_in(base: &Path, name: &str) -> PathBuf {
    base.join(".dataservice").join(format!("{}.db", name))
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<DataServiceConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let mut config: DataServiceConfig = toml::from_str(&contents)?;
    // Paths in the file are relative to the file itself
    if let Some(dir) = path.parent() {
        config.resolve_paths(dir);
    }
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &DataServiceConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
