//! stripefsd: stripefs daemon. One process runs one role.
//!
//!   stripefsd cache     metadata service with the fast cache in front
//!   stripefsd storage   coordinator striping data over the nodes
//!   stripefsd node      storage node keeping stripe files

use anyhow::{bail, Context, Result};

use stripefs_core::config::StripeConfig;

mod roles;

use roles::Role;

const USAGE: &str = "usage: stripefsd <cache|storage|node> [--port <port>] [--data-dir <path>]";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(role) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let role: Role = match role.parse() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(e) = StripeConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = StripeConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        StripeConfig::default()
    });
    apply_flags(&mut config, role, &args[1..])?;
    config.validate().context("invalid configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.workers)
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    tracing::info!(role = %role, workers = config.runtime.workers, "stripefsd starting");
    runtime.block_on(roles::run(role, config))
}

/// Command-line overrides on top of the loaded config.
fn apply_flags(config: &mut StripeConfig, role: Role, flags: &[String]) -> Result<()> {
    let mut i = 0;
    while i < flags.len() {
        let value = flags
            .get(i + 1)
            .with_context(|| format!("{} needs a value", flags[i]))?;
        match flags[i].as_str() {
            "--port" => {
                let port: u16 = value.parse().context("--port expects a port number")?;
                match role {
                    Role::Cache => config.network.cache_port = port,
                    Role::Storage => config.network.storage_port = port,
                    Role::Node => config.network.node_port = port,
                }
            }
            "--data-dir" => config.storage.data_dir = value.into(),
            "--api-port" => {
                config.network.api_port = value.parse().context("--api-port expects a port number")?;
            }
            other => bail!("unknown flag {other}\n{USAGE}"),
        }
        i += 2;
    }
    Ok(())
}
