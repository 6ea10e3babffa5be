use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::{FacultyRecord, Provider};

/// On-disk TOML configuration structure.
/// All sections are optional so partial configs work (merge with defaults).
/// The roster tables (`[[faculty]]`, `[[department]]`) live in the same
/// format, so a standalone roster file parses with this type too.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api: Option<ApiConfig>,
    pub query: Option<QueryConfig>,
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub faculty: Vec<FacultyRecord>,
    #[serde(default)]
    pub department: Vec<DepartmentEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    pub scopus_api_key: Option<String>,
    pub openalex_mailto: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryConfig {
    pub provider: Option<String>,
    pub institution_id: Option<String>,
    pub request_spacing_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub path: Option<String>,
    pub session_ttl_secs: Option<u64>,
    pub persisted_ttl_secs: Option<u64>,
}

/// A department known to the roster. `label` is the display name; `name` is
/// the key faculty rows reference in their `department` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentEntry {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl ConfigFile {
    /// Roster rows belonging to the named department (case-insensitive).
    pub fn department_members(&self, department: &str) -> Vec<&FacultyRecord> {
        self.faculty
            .iter()
            .filter(|f| {
                f.department
                    .as_deref()
                    .is_some_and(|d| d.eq_ignore_ascii_case(department))
            })
            .collect()
    }

    /// Look up a roster row by exact name (case-insensitive).
    pub fn find_faculty(&self, name: &str) -> Option<&FacultyRecord> {
        self.faculty
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Provider ids for every member of the named department, skipping rows
    /// that have no id under that provider.
    pub fn department_ids(&self, department: &str, provider: Provider) -> Vec<String> {
        self.department_members(department)
            .into_iter()
            .filter_map(|f| f.id_for(provider))
            .map(str::to_owned)
            .collect()
    }
}

/// Platform config directory path: `<config_dir>/bibliometer/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bibliometer").join("config.toml"))
}

/// Load config by cascading CWD `.bibliometer.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(&PathBuf::from(".bibliometer.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &PathBuf) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Merge two configs: `overlay` values take precedence over `base`. Roster
/// tables replace wholesale rather than row-by-row: an overlay that carries
/// any roster rows supersedes the base roster entirely.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        api: Some(ApiConfig {
            scopus_api_key: overlay
                .api
                .as_ref()
                .and_then(|a| a.scopus_api_key.clone())
                .or_else(|| base.api.as_ref().and_then(|a| a.scopus_api_key.clone())),
            openalex_mailto: overlay
                .api
                .as_ref()
                .and_then(|a| a.openalex_mailto.clone())
                .or_else(|| base.api.as_ref().and_then(|a| a.openalex_mailto.clone())),
        }),
        query: Some(QueryConfig {
            provider: overlay
                .query
                .as_ref()
                .and_then(|q| q.provider.clone())
                .or_else(|| base.query.as_ref().and_then(|q| q.provider.clone())),
            institution_id: overlay
                .query
                .as_ref()
                .and_then(|q| q.institution_id.clone())
                .or_else(|| base.query.as_ref().and_then(|q| q.institution_id.clone())),
            request_spacing_ms: overlay
                .query
                .as_ref()
                .and_then(|q| q.request_spacing_ms)
                .or_else(|| base.query.as_ref().and_then(|q| q.request_spacing_ms)),
        }),
        cache: Some(CacheConfig {
            path: overlay
                .cache
                .as_ref()
                .and_then(|c| c.path.clone())
                .or_else(|| base.cache.as_ref().and_then(|c| c.path.clone())),
            session_ttl_secs: overlay
                .cache
                .as_ref()
                .and_then(|c| c.session_ttl_secs)
                .or_else(|| base.cache.as_ref().and_then(|c| c.session_ttl_secs)),
            persisted_ttl_secs: overlay
                .cache
                .as_ref()
                .and_then(|c| c.persisted_ttl_secs)
                .or_else(|| base.cache.as_ref().and_then(|c| c.persisted_ttl_secs)),
        }),
        faculty: if overlay.faculty.is_empty() {
            base.faculty
        } else {
            overlay.faculty
        },
        department: if overlay.department.is_empty() {
            base.department
        } else {
            overlay.department
        },
    }
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
    Ok(path)
}
