use serde::{Deserialize, Serialize};
use std::fmt;

pub const INSTRUCTIONS_PRODUCT: &str = "NGDP";
pub const INSTALL_PRIORITY: u32 = 900;
pub const UPDATE_PRIORITY: u32 = 999;
pub const REPAIR_PRIORITY: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority {
    pub insert_at_head: bool,
    pub value: u32,
}

impl Priority {
    pub const INSTALL: Self = Self::head(INSTALL_PRIORITY);
    pub const UPDATE: Self = Self::head(UPDATE_PRIORITY);
    pub const REPAIR: Self = Self::head(REPAIR_PRIORITY);

    const fn head(value: u32) -> Self {
        Self {
            insert_at_head: true,
            value,
        }
    }
}

/// Body of `POST /install`, registering a product with the agent.
#[derive(Debug, Clone, Serialize)]
pub struct InstallInstructions {
    /// `[transport, platform, tact code, locale]`
    pub instructions_dataset: [String; 4],
    pub instructions_patch_url: String,
    pub instructions_product: String,
    pub monitor_pid: u32,
    pub priority: Priority,
    pub uid: String,
}

/// Body of `POST /install/{uid}`.
#[derive(Debug, Clone, Serialize)]
pub struct InstallRequestForm {
    pub account_country: String,
    pub finalized: bool,
    pub game_dir: String,
    pub geo_ip_country: String,
    pub language: Vec<String>,
    pub selected_asset_locale: String,
    pub selected_locale: String,
    pub shortcut: String,
    pub tome_torrent: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateRequest {
    pub uid: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize)]
pub struct UninstallRequest {
    pub uid: String,
    pub run_compaction: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairRequest {
    pub uid: String,
    pub priority: Priority,
}

/// Installation record as reported by `GET /game/{uid}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub uid: String,
    pub installed: bool,
    pub download_complete: bool,
    pub install_dir: Option<String>,
    pub link: Option<String>,
    pub raw: serde_json::Value,
}

impl ProductRecord {
    pub fn from_value(uid: &str, raw: serde_json::Value) -> Self {
        let flag = |key: &str| raw.get(key).and_then(|v| v.as_bool()).unwrap_or(false);
        let text = |key: &str| {
            raw.get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            uid: uid.to_string(),
            installed: flag("installed"),
            download_complete: flag("download_complete"),
            install_dir: text("install_dir"),
            link: text("link"),
            raw,
        }
    }

    pub fn has_pending_update(&self) -> bool {
        self.installed && !self.download_complete
    }

    pub fn state(&self) -> ProductState {
        match (self.installed, self.download_complete) {
            (false, _) => ProductState::Initialized,
            (true, true) => ProductState::Installed,
            (true, false) => ProductState::UpdatePending,
        }
    }
}

/// Where a product stands, as far as the agent's records tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductState {
    Unknown,
    Initialized,
    Installed,
    UpdatePending,
}

impl ProductState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Initialized => "initialized",
            Self::Installed => "installed",
            Self::UpdatePending => "update_pending",
        }
    }
}

impl fmt::Display for ProductState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical failure reported inside a 200 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedError {
    pub code: i64,
    pub details: Option<String>,
}

impl EmbeddedError {
    /// Looks for `form.authentication.error` in an install response. Code 0 means none.
    pub fn from_install_response(v: &serde_json::Value) -> Option<Self> {
        let auth = v.get("form")?.get("authentication")?;
        let code = match auth.get("error")? {
            serde_json::Value::Number(n) => n.as_i64()?,
            serde_json::Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        if code == 0 {
            return None;
        }
        let details = auth
            .get("error_details")
            .and_then(|d| match d {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty());
        Some(Self { code, details })
    }
}

impl fmt::Display for EmbeddedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "error {}: {}", self.code, details),
            None => write!(f, "error {}", self.code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pending_update_requires_installed_and_incomplete_download() {
        let cases = [
            (json!({"installed": true, "download_complete": false}), true),
            (json!({"installed": true, "download_complete": true}), false),
            (json!({"installed": false, "download_complete": false}), false),
            (json!({"installed": false, "download_complete": true}), false),
            (json!({}), false),
        ];
        for (raw, expected) in cases {
            let record = ProductRecord::from_value("p", raw.clone());
            assert_eq!(record.has_pending_update(), expected, "{raw}");
        }
    }

    #[test]
    fn record_treats_empty_install_dir_as_absent() {
        let record = ProductRecord::from_value(
            "wow",
            json!({"installed": true, "download_complete": true, "install_dir": "", "link": "x"}),
        );
        assert_eq!(record.install_dir, None);
        assert_eq!(record.link.as_deref(), Some("x"));
        assert_eq!(record.state(), ProductState::Installed);
    }

    #[test]
    fn embedded_error_is_read_from_install_form() {
        let v = json!({"form": {"authentication": {"error": 2301, "error_details": "login required"}}});
        assert_eq!(
            EmbeddedError::from_install_response(&v),
            Some(EmbeddedError {
                code: 2301,
                details: Some("login required".to_string())
            })
        );

        let clean = json!({"form": {"authentication": {"error": 0}}});
        assert_eq!(EmbeddedError::from_install_response(&clean), None);
        assert_eq!(EmbeddedError::from_install_response(&json!({})), None);
    }

    #[test]
    fn priorities_order_repair_over_update_over_install() {
        assert!(Priority::REPAIR.value > Priority::UPDATE.value);
        assert!(Priority::UPDATE.value > Priority::INSTALL.value);
        assert_eq!(
            serde_json::to_value(Priority::INSTALL).unwrap(),
            json!({"insert_at_head": true, "value": 900})
        );
    }
}
