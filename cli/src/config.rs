use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Persistent defaults, stored as JSON. Every field is optional; flags win.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_ip_country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_dir: Option<String>,
    /// Short names for product uids, e.g. `wow` → `wow_enus`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, String>,
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bnet")
        .join("config.json")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Invalid config JSON in {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// Configured candidate ports. An empty list counts as unset.
    pub fn candidate_ports(&self) -> Option<Vec<u16>> {
        self.ports.clone().filter(|ports| !ports.is_empty())
    }

    /// Maps a user-supplied product name to its uid. Built-in: `wow` → `wow_enus`.
    pub fn resolve_product(&self, name: &str) -> String {
        if let Some(uid) = self.aliases.get(name) {
            return uid.clone();
        }
        match name {
            "wow" => "wow_enus".to_string(),
            _ => name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_defaults() {
        let tmp = tempdir().unwrap();
        let cfg = Config::load(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn save_then_load_keeps_fields() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");
        let mut cfg = Config {
            ports: Some(vec![1120, 6881]),
            game_dir: Some("D:/Games".to_string()),
            ..Default::default()
        };
        cfg.aliases.insert("ptr".to_string(), "wowt".to_string());
        cfg.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), cfg);
    }

    #[test]
    fn aliases_override_builtin_names() {
        let mut cfg = Config::default();
        assert_eq!(cfg.resolve_product("wow"), "wow_enus");
        assert_eq!(cfg.resolve_product("d3"), "d3");
        cfg.aliases.insert("wow".to_string(), "wow_engb".to_string());
        assert_eq!(cfg.resolve_product("wow"), "wow_engb");
    }

    #[test]
    fn empty_port_list_counts_as_unset() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"ports": []}"#).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.candidate_ports(), None);

        let cfg = Config {
            ports: Some(vec![6881]),
            ..Default::default()
        };
        assert_eq!(cfg.candidate_ports(), Some(vec![6881]));
    }

    #[test]
    fn invalid_json_is_reported() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config JSON"));
    }
}
