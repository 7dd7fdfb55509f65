//! Idempotent product workflows on top of the agent session.
//!
//! Every workflow re-reads what the agent knows about a product before it
//! mutates anything, so running the same command twice never queues the same
//! work twice. Each mutating request drops the cached record for its uid.

use anyhow::Context;
use reqwest::Method;
use std::io::{BufRead, Write};
use tracing::{debug, info};

use crate::agent_types::{
    EmbeddedError, InstallInstructions, InstallRequestForm, Priority, ProductRecord, ProductState,
    RepairRequest, UninstallRequest, UpdateRequest, INSTRUCTIONS_PRODUCT,
};
use crate::error::{AgentError, Result};
use crate::http_client::{encode_segment, Client};
use crate::products::ProductCache;
use crate::session::{Session, SessionSettings};

pub const DEFAULT_PATCH_URL: &str = "http://us.patch.battle.net:1119";
pub const DEFAULT_LOCALE: &str = "enUS";
pub const DEFAULT_ACCOUNT_COUNTRY: &str = "USA";
pub const DEFAULT_GEO_IP_COUNTRY: &str = "US";
/// Searched when a product's own family has no installed member, so branch
/// uids such as `wowdev` or `wowt` still land next to `wow_enus`.
pub const FALLBACK_FAMILY: &str = "wow";

/// Region and locale values baked into install requests.
#[derive(Debug, Clone)]
pub struct InstallDefaults {
    pub patch_url: String,
    pub transport: String,
    pub platform: String,
    pub locale: String,
    pub account_country: String,
    pub geo_ip_country: String,
}

impl Default for InstallDefaults {
    fn default() -> Self {
        Self {
            patch_url: DEFAULT_PATCH_URL.to_string(),
            transport: "torrent".to_string(),
            platform: "win".to_string(),
            locale: DEFAULT_LOCALE.to_string(),
            account_country: DEFAULT_ACCOUNT_COUNTRY.to_string(),
            geo_ip_country: DEFAULT_GEO_IP_COUNTRY.to_string(),
        }
    }
}

impl InstallDefaults {
    pub fn instructions(&self, uid: &str, tact_code: &str) -> InstallInstructions {
        InstallInstructions {
            instructions_dataset: [
                self.transport.clone(),
                self.platform.clone(),
                tact_code.to_string(),
                self.locale.clone(),
            ],
            instructions_patch_url: format!(
                "{}/{}",
                self.patch_url.trim_end_matches('/'),
                tact_code
            ),
            instructions_product: INSTRUCTIONS_PRODUCT.to_string(),
            monitor_pid: 0,
            priority: Priority::INSTALL,
            uid: uid.to_string(),
        }
    }

    pub fn install_form(&self, game_dir: &str) -> InstallRequestForm {
        InstallRequestForm {
            account_country: self.account_country.clone(),
            finalized: true,
            game_dir: game_dir.to_string(),
            geo_ip_country: self.geo_ip_country.clone(),
            language: vec![self.locale.clone()],
            selected_asset_locale: self.locale.clone(),
            selected_locale: self.locale.clone(),
            shortcut: "all".to_string(),
            tome_torrent: String::new(),
        }
    }
}

/// How `queue_install` picks the directory a product is installed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallDirSource {
    Explicit(String),
    /// Reuse the install directory of another installed product whose uid contains this.
    SiblingOf(String),
    Prompt,
}

impl InstallDirSource {
    /// `wow_classic` → `wow`
    pub fn family_of(uid: &str) -> String {
        uid.split('_').next().unwrap_or(uid).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitializeOutcome {
    AlreadyInitialized,
    Initialized { soft_error: Option<EmbeddedError> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyInstalled,
    UpdatePending,
    Queued { game_dir: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    NotInstalled,
    Queued,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductStatus {
    pub uid: String,
    pub state: ProductState,
    pub record: Option<ProductRecord>,
}

pub struct Orchestrator {
    session: Session,
    products: ProductCache,
    defaults: InstallDefaults,
}

impl Orchestrator {
    pub fn new(settings: SessionSettings, defaults: InstallDefaults) -> Self {
        Self {
            session: Session::new(settings),
            products: ProductCache::new(),
            defaults,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Registers `uid` with the agent unless it already knows about it.
    pub async fn initialize(&mut self, uid: &str, tact_code: Option<&str>) -> Result<InitializeOutcome> {
        let client = self.session.authenticated().await?;
        if self.products.is_initialized(client, uid).await? {
            info!(uid, "already initialized");
            return Ok(InitializeOutcome::AlreadyInitialized);
        }

        let tact_code = tact_code.unwrap_or(uid);
        let body = to_body(&self.defaults.instructions(uid, tact_code))?;
        info!(uid, tact_code, "initializing");
        let res = client.send_json(Method::POST, "/install", Some(body)).await;
        self.products.invalidate(uid);
        let res = res?;

        let soft_error = EmbeddedError::from_install_response(&res);
        if let Some(e) = &soft_error {
            debug!(uid, code = e.code, details = ?e.details, "agent reported an authentication error");
        }
        Ok(InitializeOutcome::Initialized { soft_error })
    }

    /// Queues the download of an initialized product. Never queues an installed one.
    pub async fn queue_install(&mut self, uid: &str, source: &InstallDirSource) -> Result<InstallOutcome> {
        let client = self.session.authenticated().await?;
        if self.products.is_installed(client, uid).await? {
            if self.products.has_pending_update(client, uid).await? {
                return Ok(InstallOutcome::UpdatePending);
            }
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        let game_dir = resolve_install_dir(client, &mut self.products, uid, source).await?;
        let body = to_body(&self.defaults.install_form(&game_dir))?;
        info!(uid, %game_dir, "queueing install");
        let res = client
            .send_json(
                Method::POST,
                &format!("/install/{}", encode_segment(uid)),
                Some(body),
            )
            .await;
        self.products.invalidate(uid);
        res?;
        Ok(InstallOutcome::Queued { game_dir })
    }

    pub async fn update(&mut self, uid: &str) -> Result<()> {
        let client = self.session.authenticated().await?;
        if !self.products.is_installed(client, uid).await? {
            return Err(AgentError::NotInstalled {
                uid: uid.to_string(),
            });
        }

        let body = to_body(&UpdateRequest {
            uid: uid.to_string(),
            priority: Priority::UPDATE,
        })?;
        info!(uid, "queueing update");
        let res = client
            .send_json(
                Method::POST,
                &format!("/update/{}", encode_segment(uid)),
                Some(body),
            )
            .await;
        self.products.invalidate(uid);
        res.map(|_| ())
    }

    pub async fn remove(&mut self, uid: &str, run_compaction: bool) -> Result<RemoveOutcome> {
        let client = self.session.authenticated().await?;
        if !self.products.is_installed(client, uid).await? {
            return Ok(RemoveOutcome::NotInstalled);
        }

        let body = to_body(&UninstallRequest {
            uid: uid.to_string(),
            run_compaction,
        })?;
        info!(uid, run_compaction, "queueing uninstall");
        let res = client.send_json(Method::POST, "/uninstall", Some(body)).await;
        self.products.invalidate(uid);
        res?;
        Ok(RemoveOutcome::Queued)
    }

    pub async fn repair(&mut self, uid: &str) -> Result<()> {
        let client = self.session.authenticated().await?;
        if !self.products.is_installed(client, uid).await? {
            return Err(AgentError::NotInstalled {
                uid: uid.to_string(),
            });
        }

        let body = to_body(&RepairRequest {
            uid: uid.to_string(),
            priority: Priority::REPAIR,
        })?;
        info!(uid, "queueing repair");
        let res = client.send_json(Method::POST, "/repair", Some(body)).await;
        self.products.invalidate(uid);
        res.map(|_| ())
    }

    pub async fn status(&mut self, uid: &str) -> Result<ProductStatus> {
        let client = self.session.authenticated().await?;
        let record = self.products.get(client, uid).await?;
        Ok(ProductStatus {
            uid: uid.to_string(),
            state: record
                .as_ref()
                .map(|r| r.state())
                .unwrap_or(ProductState::Unknown),
            record,
        })
    }

    pub async fn list_sessions(&mut self) -> Result<serde_json::Value> {
        let client = self.session.authenticated().await?;
        client.send_json(Method::GET, "/gamesession", None).await
    }

    pub async fn list_products(&mut self) -> Result<serde_json::Value> {
        let client = self.session.authenticated().await?;
        client.send_json(Method::GET, "/game", None).await
    }

    pub async fn hardware_info(&mut self) -> Result<serde_json::Value> {
        let client = self.session.authenticated().await?;
        client.send_json(Method::GET, "/hardware", None).await
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value).context("failed to encode request body")?)
}

async fn resolve_install_dir(
    client: &Client,
    products: &mut ProductCache,
    uid: &str,
    source: &InstallDirSource,
) -> Result<String> {
    let dir = match source {
        InstallDirSource::Explicit(dir) => Some(dir.trim().to_string()).filter(|d| !d.is_empty()),
        InstallDirSource::SiblingOf(family) => {
            sibling_install_dir(client, products, uid, family).await?
        }
        InstallDirSource::Prompt => {
            let stdin = std::io::stdin();
            prompt_install_dir(uid, &mut stdin.lock(), &mut std::io::stderr())?
        }
    };
    dir.ok_or_else(|| AgentError::NoInstallTarget {
        uid: uid.to_string(),
    })
}

async fn sibling_install_dir(
    client: &Client,
    products: &mut ProductCache,
    uid: &str,
    family: &str,
) -> Result<Option<String>> {
    let summary = client.send_json(Method::GET, "/game", None).await?;
    let mut names: Vec<&String> = summary
        .as_object()
        .map(|m| m.keys().collect())
        .unwrap_or_default();
    names.sort();

    let mut families = vec![family];
    if family != FALLBACK_FAMILY {
        families.push(FALLBACK_FAMILY);
    }
    for family in families {
        for name in &names {
            if name.as_str() == uid || !name.contains(family) {
                continue;
            }
            if let Some(record) = products.get(client, name).await? {
                if record.installed {
                    if let Some(dir) = record.install_dir {
                        info!(uid, sibling = %record.uid, family, %dir, "using install directory of sibling product");
                        return Ok(Some(dir));
                    }
                }
            }
        }
    }
    debug!(uid, family, "no installed product to borrow an install directory from");
    Ok(None)
}

fn prompt_install_dir(
    uid: &str,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<Option<String>> {
    write!(output, "Install directory for '{}': ", uid).context("failed to write prompt")?;
    output.flush().context("failed to write prompt")?;
    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("failed to read install directory")?;
    let dir = line.trim();
    Ok((!dir.is_empty()).then(|| dir.to_string()))
}
