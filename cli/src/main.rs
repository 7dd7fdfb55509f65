mod agent_types;
mod config;
mod discovery;
mod error;
mod http_client;
mod orchestrator;
mod products;
mod session;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{default_config_path, Config};
use crate::discovery::{PortSequence, DEFAULT_HOST};
use crate::error::{Result, EXIT_SUCCESS};
use crate::orchestrator::{
    InitializeOutcome, InstallDefaults, InstallDirSource, InstallOutcome, Orchestrator,
    ProductStatus, RemoveOutcome,
};
use crate::session::SessionSettings;

#[derive(Parser, Debug)]
#[command(name = "bnet")]
#[command(
    about = "Command-line tools for driving the Battle.net Agent without the Battle.net client",
    long_about = None
)]
struct Args {
    /// Host the agent listens on
    #[arg(long, env = "BNET_AGENT_HOST")]
    host: Option<String>,

    /// Candidate agent port (repeatable, probed in order; replaces the built-in list)
    #[arg(long = "port")]
    ports: Vec<u16>,

    /// Load config from this path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Save host/port/patch-url/locale/game-dir flags into the config file
    #[arg(long, default_value_t = false)]
    save_config: bool,

    /// HTTP timeout seconds for agent API calls (default: no timeout)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Patch server base URL used in install instructions
    #[arg(long, env = "BNET_PATCH_URL")]
    patch_url: Option<String>,

    /// Locale used for install instructions and install requests
    #[arg(long)]
    locale: Option<String>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a product with the agent (no-op if already known)
    Init {
        /// Product uid or alias (e.g. 'wow', 'wowdev')
        product: String,
        /// TACT product code, when it differs from the uid
        #[arg(long)]
        tact_code: Option<String>,
    },

    /// Initialize a product and queue it for install
    Install {
        /// Product uid or alias (e.g. 'wow', 'wowdev')
        product: String,
        /// TACT product code, when it differs from the uid
        #[arg(long)]
        tact_code: Option<String>,
        /// Install into this directory
        #[arg(long, conflicts_with = "prompt_dir")]
        game_dir: Option<String>,
        /// Ask for the install directory on stdin
        #[arg(long, default_value_t = false)]
        prompt_dir: bool,
        /// Borrow the install directory of an installed product whose uid contains this
        #[arg(long)]
        family: Option<String>,
    },

    /// Queue an update for an installed product
    Update { product: String },

    /// Queue an uninstall for an installed product
    Uninstall {
        product: String,
        /// Skip compaction of the shared data store
        #[arg(long, default_value_t = false)]
        no_compaction: bool,
    },

    /// Queue a repair for an installed product
    Repair { product: String },

    /// Show what the agent knows about a product
    Status { product: String },

    /// List products known to the agent
    Products,

    /// List running game sessions
    Sessions,

    /// Show the agent's view of this machine's hardware
    Hardware,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logging
    let lvl = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(lvl)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    let cfg_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut cfg = Config::load(&cfg_path)?;

    // Merge: CLI args override config.
    if let Some(host) = &args.host {
        cfg.host = Some(host.clone());
    }
    if !args.ports.is_empty() {
        cfg.ports = Some(args.ports.clone());
    }
    if let Some(url) = &args.patch_url {
        cfg.patch_url = Some(url.clone());
    }
    if let Some(locale) = &args.locale {
        cfg.locale = Some(locale.clone());
    }
    if let Command::Install {
        game_dir: Some(dir),
        ..
    } = &args.cmd
    {
        if args.save_config {
            cfg.game_dir = Some(dir.clone());
        }
    }
    if args.save_config {
        cfg.save(&cfg_path)?;
        debug!(path = ?cfg_path, "saved config");
    }

    let mut settings = SessionSettings::new(
        cfg.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
        cfg.candidate_ports()
            .unwrap_or_else(|| PortSequence::default().ports()),
    );
    settings.request_timeout = args.timeout_secs.map(Duration::from_secs);

    let mut defaults = InstallDefaults::default();
    if let Some(url) = &cfg.patch_url {
        defaults.patch_url = url.clone();
    }
    if let Some(locale) = &cfg.locale {
        defaults.locale = locale.clone();
    }
    if let Some(country) = &cfg.account_country {
        defaults.account_country = country.clone();
    }
    if let Some(country) = &cfg.geo_ip_country {
        defaults.geo_ip_country = country.clone();
    }

    let mut orch = Orchestrator::new(settings, defaults);
    let code = run_command(&mut orch, &cfg, args.cmd).await;
    if let Some(endpoint) = orch.session().endpoint() {
        debug!(%endpoint, authenticated = orch.session().is_authenticated(), "agent session closed");
    }
    code
}

async fn run_command(orch: &mut Orchestrator, cfg: &Config, cmd: Command) -> Result<i32> {
    match cmd {
        Command::Init { product, tact_code } => {
            let uid = cfg.resolve_product(&product);
            let outcome = orch.initialize(&uid, tact_code.as_deref()).await?;
            report_initialize(&uid, &outcome);
        }
        Command::Install {
            product,
            tact_code,
            game_dir,
            prompt_dir,
            family,
        } => {
            let uid = cfg.resolve_product(&product);
            let source = if let Some(dir) = game_dir {
                InstallDirSource::Explicit(dir)
            } else if prompt_dir {
                InstallDirSource::Prompt
            } else if let Some(dir) = &cfg.game_dir {
                InstallDirSource::Explicit(dir.clone())
            } else {
                InstallDirSource::SiblingOf(
                    family.unwrap_or_else(|| InstallDirSource::family_of(&uid)),
                )
            };

            let outcome = orch.initialize(&uid, tact_code.as_deref()).await?;
            report_initialize(&uid, &outcome);
            match orch.queue_install(&uid, &source).await? {
                InstallOutcome::AlreadyInstalled => println!("'{}' is already installed", uid),
                InstallOutcome::UpdatePending => {
                    println!("'{}' is already installed and has an update pending", uid)
                }
                InstallOutcome::Queued { game_dir } => {
                    println!("Queued '{}' for install into {}", uid, game_dir);
                    println!(
                        "Configuration complete. You may need to restart the Battle.net client to see the product in the download queue."
                    );
                }
            }
        }
        Command::Update { product } => {
            let uid = cfg.resolve_product(&product);
            orch.update(&uid).await?;
            println!("Queued update for '{}'", uid);
        }
        Command::Uninstall {
            product,
            no_compaction,
        } => {
            let uid = cfg.resolve_product(&product);
            match orch.remove(&uid, !no_compaction).await? {
                RemoveOutcome::NotInstalled => {
                    println!("'{}' is not installed; nothing to uninstall", uid)
                }
                RemoveOutcome::Queued => println!("Queued uninstall for '{}'", uid),
            }
        }
        Command::Repair { product } => {
            let uid = cfg.resolve_product(&product);
            orch.repair(&uid).await?;
            println!("Queued repair for '{}'", uid);
        }
        Command::Status { product } => {
            let uid = cfg.resolve_product(&product);
            let status = orch.status(&uid).await?;
            print_json_value(&status_to_json(&status))?;
        }
        Command::Products => print_json_value(&orch.list_products().await?)?,
        Command::Sessions => print_json_value(&orch.list_sessions().await?)?,
        Command::Hardware => print_json_value(&orch.hardware_info().await?)?,
    }
    Ok(EXIT_SUCCESS)
}

fn report_initialize(uid: &str, outcome: &InitializeOutcome) {
    match outcome {
        InitializeOutcome::AlreadyInitialized => println!("'{}' is already initialized", uid),
        InitializeOutcome::Initialized { soft_error } => {
            println!("Initialized '{}'", uid);
            if let Some(e) = soft_error {
                eprintln!("warning: agent reported an authentication problem: {}", e);
            }
        }
    }
}

fn status_to_json(status: &ProductStatus) -> serde_json::Value {
    let record = status.record.as_ref();
    serde_json::json!({
        "uid": status.uid,
        "state": status.state.as_str(),
        "installed": record.map(|r| r.installed).unwrap_or(false),
        "download_complete": record.map(|r| r.download_complete).unwrap_or(false),
        "install_dir": record.and_then(|r| r.install_dir.clone()),
        "link": record.and_then(|r| r.link.clone()),
        "record": record.map(|r| r.raw.clone()),
    })
}

fn print_json_value(v: &serde_json::Value) -> Result<()> {
    let s = serde_json::to_string_pretty(v).context("Failed to render JSON")?;
    println!("{}", s);
    Ok(())
}
