mod scenario;
mod storefront;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use shopvn_analytics::identity::IdentityResolver;
use shopvn_analytics::{
    profile, strategy_from_config, Environment, FingerprintGenerator, FixedLocation,
    HostEnvironment, SessionManager, StaticEnvironment, StorageTiers, StrategyKind, TrackerConfig,
};

use scenario::Scenario;
use storefront::Storefront;

const PAGE_URL: &str = "http://localhost:3000/";

/// ShopVN storefront simulator with anonymous visitor analytics.
#[derive(Parser, Debug)]
#[command(name = "shopvn-storefront", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file describing a simulated browser environment. Defaults to
    /// probing the host process.
    #[arg(short, long)]
    environment: Option<PathBuf>,

    /// Override the persistence strategy (remote or snapshot).
    #[arg(long)]
    strategy: Option<StrategyKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one storefront session.
    Run {
        /// Scenario JSON file; the built-in scenario is used otherwise.
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Keep the session open after the scenario until Ctrl+C.
        #[arg(long)]
        wait: bool,
    },
    /// Resolve and print the visitor identity and visit profile.
    Identity,
    /// Print the effective configuration as TOML and exit.
    DumpConfig,
}

fn load_config(cli: &Cli) -> anyhow::Result<TrackerConfig> {
    let mut config = match &cli.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
    }
    Ok(config)
}

fn load_environment(path: Option<&Path>) -> anyhow::Result<Box<dyn Environment>> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read environment {}", path.display()))?;
            let env: StaticEnvironment = serde_json::from_str(&raw)
                .with_context(|| format!("invalid environment {}", path.display()))?;
            Ok(Box::new(env))
        }
        None => Ok(Box::new(HostEnvironment::detect(PAGE_URL))),
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => { tracing::info!("received CTRL+C"); }
                    _ = sigterm.recv() => { tracing::info!("received SIGTERM"); }
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "failed to register SIGTERM handler"),
        }
    }
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("received CTRL+C");
    }
}

async fn run_session(
    config: &TrackerConfig,
    env: &dyn Environment,
    scenario: Scenario,
    wait: bool,
) -> anyhow::Result<()> {
    let tiers = StorageTiers::open_dir_or_memory(&config.storage.dir);
    let strategy = strategy_from_config(config)?;
    let location = FixedLocation(config.location.clone());
    let manager = SessionManager::start(env, &tiers, strategy, config, &location);

    let mut store = Storefront::new(manager.tracker());
    let performed = tokio::select! {
        performed = scenario::play(&mut store, &scenario) => Some(performed),
        _ = wait_for_shutdown_signal() => None,
    };
    match performed {
        Some(performed) => {
            tracing::info!(performed, cart_items = store.cart_count(), "scenario finished");
            if wait {
                tracing::info!("session open, press Ctrl+C to end it");
                wait_for_shutdown_signal().await;
            }
        }
        None => tracing::info!("scenario interrupted"),
    }

    if let Some(report) = manager.teardown().await {
        let summary = serde_json::json!({
            "sessionId": manager.session_id(),
            "userId": manager.context().session.user_id,
            "strategy": config.strategy,
            "durationSecs": report.duration_secs,
            "totalEvents": report.total_events,
            "exported": report.flush.exported,
            "failed": report.flush.failed,
            "abandoned": report.flush.drain.abandoned,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn show_identity(config: &TrackerConfig, env: &dyn Environment) -> anyhow::Result<()> {
    let tiers = StorageTiers::open_dir_or_memory(&config.storage.dir);
    let resolved = IdentityResolver::new(&tiers, env)
        .with_cookie_ttl_days(config.cookie_ttl_days)
        .resolve_user_id();
    let profile = profile::load_profile(tiers.local.as_ref(), &resolved.identity.user_id)?;
    let summary = serde_json::json!({
        "userId": resolved.identity.user_id,
        "source": resolved.source,
        "fingerprint": FingerprintGenerator::generate(env),
        "profile": profile,
        "segment": profile.segment(),
        "cookieHeader": tiers.cookies.header()?,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Command::DumpConfig = cli.command {
        print!("{}", config.render()?);
        return Ok(());
    }

    let _log_guard = shopvn_logging::init_logging(&config.log)?;
    let env = load_environment(cli.environment.as_deref())?;
    tracing::info!(strategy = ?config.strategy, storage = %config.storage.dir.display(), "starting storefront");

    match cli.command {
        Command::Run { scenario, wait } => {
            let scenario = match scenario {
                Some(path) => Scenario::load(&path)?,
                None => Scenario::builtin(),
            };
            run_session(&config, env.as_ref(), scenario, wait).await
        }
        Command::Identity => show_identity(&config, env.as_ref()),
        Command::DumpConfig => Ok(()),
    }
}
