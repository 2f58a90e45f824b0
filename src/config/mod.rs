use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use directories::BaseDirs;

const ENV_PREFIX: &str = "GEXEC_";

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    /// Defaults, then `~/.config/gui_executor/.gexecrc` if present, then the
    /// process environment.
    pub fn load() -> Self {
        let path = default_config_path();
        let mut map = default_map();
        if path.exists() {
            if let Ok(text) = fs::read_to_string(&path) {
                merge_rc(&mut map, &text);
            }
        }
        overlay_env(&mut map, env::vars());
        Self {
            inner: map,
            config_path: path,
        }
    }

    /// Like [`Config::load`], but an explicitly named rc file must exist.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::load()),
            Some(path) => Self::from_sources(path, env::vars()),
        }
    }

    /// Builds a config from an rc file and an explicit environment.
    pub fn from_sources<I>(path: &Path, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut map = default_map();
        merge_rc(&mut map, &text);
        overlay_env(&mut map, vars);
        Ok(Self {
            inner: map,
            config_path: path.to_path_buf(),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "1"))
            .unwrap_or(false)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn module_path(&self) -> String {
        self.get("MODULE_PATH").unwrap_or_default()
    }

    pub fn kernel_name(&self) -> String {
        self.get("KERNEL_NAME").unwrap_or_else(|| "python3".into())
    }

    pub fn app_name(&self) -> String {
        self.get("APP_NAME").unwrap_or_else(|| "GUI Executor".into())
    }

    pub fn log_filter(&self) -> String {
        self.get("LOG_FILTER").unwrap_or_else(|| "warn".into())
    }
}

fn merge_rc(map: &mut HashMap<String, String>, text: &str) {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
}

/// Known keys are taken as is; `GEXEC_<KEY>` wins over a plain `<KEY>`.
fn overlay_env<I>(map: &mut HashMap<String, String>, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut prefixed = Vec::new();
    for (k, v) in vars {
        if let Some(key) = k.strip_prefix(ENV_PREFIX) {
            prefixed.push((key.to_string(), v));
        } else if is_config_key(&k) {
            map.insert(k, v);
        }
    }
    map.extend(prefixed);
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "MODULE_PATH",
        "KERNEL_NAME",
        "APP_NAME",
        "LOG_FILTER",
        "SHOW_TIMESTAMPS",
        "PRETTIFY_MARKDOWN",
    ];

    KEYS.contains(&k)
}

fn config_dir() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("gui_executor")
}

fn default_config_path() -> PathBuf {
    config_dir().join(".gexecrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    // Strings
    m.insert("MODULE_PATH".into(), crate::builtin::ROOT.into());
    m.insert("KERNEL_NAME".into(), "python3".into());
    m.insert("APP_NAME".into(), "GUI Executor".into());
    m.insert("LOG_FILTER".into(), "warn".into());

    // Bools as strings
    m.insert("SHOW_TIMESTAMPS".into(), "false".into());
    m.insert("PRETTIFY_MARKDOWN".into(), "true".into());

    m
}
