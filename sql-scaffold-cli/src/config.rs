use std::{
    env,
    error::Error,
    path::{Path, PathBuf},
};

use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use sql_scaffold_core::schema::Semantics;
use thiserror::Error;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const CONFIG_FILE: &str = "sql-scaffold.toml";
const PROFILE_SUFFIX: &str = "_profile.json";
const IMPORTER_SUFFIX: &str = "_importer.py";

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
    #[error("CSV delimiter {0:?} is not a single ASCII character")]
    InvalidDelimiter(char),
    #[error("no database name, set [database] name or a path in {DATABASE_URL}")]
    NoSchemaName,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CodeGenerator {
    Json,
    #[default]
    Python,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DbInfo {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

impl Default for DbInfo {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 3306,
            user: "root".into(),
            password: String::new(),
            name: String::new(),
        }
    }
}

impl DbInfo {
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct CsvOptions {
    pub delimiter: char,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self { delimiter: ';' }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[must_use]
pub struct TomlConfig {
    pub target: PathBuf,
    #[serde(default)]
    pub mode: CodeGenerator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importer_target: Option<PathBuf>,
    #[serde(default)]
    pub database: DbInfo,
    #[serde(default)]
    pub semantics: Semantics,
    #[serde(default)]
    pub csv: CsvOptions,
}

impl TomlConfig {
    pub fn template() -> Self {
        Self {
            target: "<path/to/objects.py>".into(),
            mode: CodeGenerator::Python,
            profile: Some("<path/to/table_profile.json>".into()),
            importer_target: None,
            database: DbInfo {
                name: "<database>".into(),
                ..DbInfo::default()
            },
            semantics: Semantics::default(),
            csv: CsvOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScaffoldConfig {
    pub target: PathBuf,
    pub mode: CodeGenerator,
    pub profile: Option<PathBuf>,
    pub importer_target: Option<PathBuf>,
    pub database: DbInfo,
    pub db_url: String,
    pub schema: String,
    pub semantics: Semantics,
    pub delimiter: u8,
}

/// `DATABASE_URL` from the environment or a `.env` file, when set.
pub fn db_url() -> Option<String> {
    dotenv().ok();
    env::var(DATABASE_URL).ok()
}

/// Last path segment of a connection URL, without query string.
fn url_schema(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let (_, path) = rest.split_once('/')?;
    let name = path.split('?').next().unwrap_or_default();
    (!name.is_empty()).then_some(name)
}

/// `people_profile.json` gives `people_importer.py`, any other name gets the
/// suffix appended to its stem.
pub fn importer_path(profile: &Path) -> PathBuf {
    let name = profile
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let importer = match name.strip_suffix(PROFILE_SUFFIX) {
        Some(stem) => format!("{stem}{IMPORTER_SUFFIX}"),
        None => {
            let stem = profile
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default();
            format!("{stem}{IMPORTER_SUFFIX}")
        }
    };
    profile.with_file_name(importer)
}

impl ScaffoldConfig {
    pub fn from_toml_config(config: TomlConfig, env_url: Option<String>) -> Result<Self, ConfigError> {
        let delimiter = u8::try_from(config.csv.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or(ConfigError::InvalidDelimiter(config.csv.delimiter))?;
        let db_url = env_url.unwrap_or_else(|| config.database.url());
        let schema = match config.database.name.as_str() {
            "" => url_schema(&db_url).ok_or(ConfigError::NoSchemaName)?.to_string(),
            name => name.to_string(),
        };
        let importer_target = config
            .importer_target
            .or_else(|| config.profile.as_deref().map(importer_path));
        Ok(Self {
            target: config.target,
            mode: config.mode,
            profile: config.profile,
            importer_target,
            database: config.database,
            db_url,
            schema,
            semantics: config.semantics,
            delimiter,
        })
    }

    pub fn read(path: Option<PathBuf>) -> Result<Self, Box<dyn Error>> {
        let path = path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        let bytes = std::fs::read(&path).map_err(|error| ConfigError::Unreadable {
            path: path.clone(),
            message: error.to_string(),
        })?;
        let config: TomlConfig = toml::from_slice(&bytes)?;
        Ok(Self::from_toml_config(config, db_url())?)
    }

    /// Python module name the importer uses to reach the generated objects.
    pub fn objects_module(&self) -> String {
        self.target
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "objects".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
target = "out/objects.py"
profile = "profiles/people_profile.json"

[database]
host = "db"
port = 3307
user = "loader"
password = "secret"
name = "people"

[semantics]
use-primary-key-in-equality = false

[csv]
delimiter = ","
"#;

    #[test]
    fn reads_a_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, CONFIG).unwrap();
        let config: TomlConfig = toml::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let config = ScaffoldConfig::from_toml_config(config, None).unwrap();
        assert_eq!(config.mode, CodeGenerator::Python);
        assert_eq!(config.db_url, "mysql://loader:secret@db:3307/people");
        assert_eq!(config.schema, "people");
        assert!(!config.semantics.use_primary_key_in_equality);
        assert!(config.semantics.default_value_for_optional_column);
        assert_eq!(config.delimiter, b',');
        assert_eq!(
            config.importer_target,
            Some(PathBuf::from("profiles/people_importer.py"))
        );
        assert_eq!(config.objects_module(), "objects");
    }

    #[test]
    fn environment_url_wins() {
        let config: TomlConfig = toml::from_str("target = \"objects.py\"").unwrap();
        let config =
            ScaffoldConfig::from_toml_config(config, Some("mysql://u:p@h:1/shop?ssl-mode=DISABLED".into()))
                .unwrap();
        assert_eq!(config.db_url, "mysql://u:p@h:1/shop?ssl-mode=DISABLED");
        assert_eq!(config.schema, "shop");
        assert_eq!(config.delimiter, b';');
        assert_eq!(config.importer_target, None);
    }

    #[test]
    fn rejects_bad_values() {
        let config: TomlConfig = toml::from_str("target = \"o.py\"\n[csv]\ndelimiter = \"§\"").unwrap();
        assert!(matches!(
            ScaffoldConfig::from_toml_config(config, None),
            Err(ConfigError::InvalidDelimiter('§'))
        ));
        let config: TomlConfig = toml::from_str("target = \"o.py\"").unwrap();
        assert!(matches!(
            ScaffoldConfig::from_toml_config(config, Some("mysql://u@h".into())),
            Err(ConfigError::NoSchemaName)
        ));
    }

    #[test]
    fn template_round_trips() {
        let template = toml::to_string_pretty(&TomlConfig::template()).unwrap();
        let parsed: TomlConfig = toml::from_str(&template).unwrap();
        assert_eq!(parsed, TomlConfig::template());
    }

    #[test]
    fn importer_path_follows_the_profile() {
        assert_eq!(
            importer_path(Path::new("a/people_profile.json")),
            PathBuf::from("a/people_importer.py")
        );
        assert_eq!(importer_path(Path::new("people.json")), PathBuf::from("people_importer.py"));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScaffoldConfig::read(Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().starts_with("could not read"));
    }
}
