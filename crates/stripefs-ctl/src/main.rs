//! stripefs-ctl: command-line interface for stripefs.
//!
//! Filesystem commands talk to the cache and storage services directly;
//! `status` and `cache` query a daemon's HTTP API.

mod cmd;

use anyhow::{Context, Result};

use libstripefs::FileSystem;
use stripefs_core::config::StripeConfig;

use cmd::fs;
use cmd::status::{cmd_cache, cmd_cache_clear, cmd_status};

const DEFAULT_PORT: u16 = 9001;

fn print_usage() {
    println!("Usage: stripefs-ctl [--cache <addr>] [--storage <addr>] [--port <port>] <command>");
    println!();
    println!("Filesystem commands:");
    println!("  stat <path>            Show a file or directory record");
    println!("  ls <path>              List a directory");
    println!("  mkdir <path> [mode]    Create a directory (octal mode, default 755)");
    println!("  touch <path> [mode]    Create an empty file (octal mode, default 644)");
    println!("  rm <path>              Remove a file and its stripes");
    println!("  rmdir <path>           Remove an empty directory");
    println!("  put <local> <path>     Copy a local file in ('-' reads stdin)");
    println!("  cat <path>             Print a file");
    println!("  chmod <mode> <path>    Change permission bits");
    println!("  chown <uid:gid> <path> Change owner");
    println!("  mv <from> <to>         Rename");
    println!();
    println!("Daemon commands:");
    println!("  status                 Show daemon status");
    println!("  cache                  Show fast cache statistics");
    println!("  cache clear            Empty the fast cache");
    println!();
    println!("Options:");
    println!("  --cache <addr>    Cache service address (default from config)");
    println!("  --storage <addr>  Storage service address (default from config)");
    println!("  --port <port>     Status endpoint port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut client = StripeConfig::load()
        .map(|c| c.client)
        .unwrap_or_default();
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            flag @ ("--port" | "--cache" | "--storage") => {
                i += 1;
                let value = args
                    .get(i)
                    .with_context(|| format!("{flag} requires a value"))?;
                match flag {
                    "--port" => port = value.parse().context("--port must be a number")?,
                    "--cache" => client.cache_addr = value.clone(),
                    _ => client.storage_addr = value.clone(),
                }
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    let http = || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build runtime")
    };
    let connect = || FileSystem::from_config(&client).context("failed to reach stripefs services");

    match remaining.as_slice() {
        ["status"] | []                => http()?.block_on(cmd_status(port)),
        ["cache"]                      => http()?.block_on(cmd_cache(port)),
        ["cache", "clear"]             => http()?.block_on(cmd_cache_clear(port)),
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }

        ["stat", path]                 => fs::cmd_stat(&connect()?, path),
        ["ls", path]                   => fs::cmd_ls(&connect()?, path),
        ["mkdir", path]                => fs::cmd_mkdir(&connect()?, path, 0o755),
        ["mkdir", path, mode]          => fs::cmd_mkdir(&connect()?, path, fs::parse_octal(mode)?),
        ["touch", path]                => fs::cmd_touch(&connect()?, path, 0o644),
        ["touch", path, mode]          => fs::cmd_touch(&connect()?, path, fs::parse_octal(mode)?),
        ["rm", path]                   => fs::cmd_rm(&connect()?, path),
        ["rmdir", path]                => fs::cmd_rmdir(&connect()?, path),
        ["put", local, path]           => fs::cmd_put(&connect()?, local, path),
        ["cat", path]                  => fs::cmd_cat(&connect()?, path),
        ["chmod", mode, path]          => fs::cmd_chmod(&connect()?, mode, path),
        ["chown", owner, path]         => fs::cmd_chown(&connect()?, owner, path),
        ["mv", from, to]               => fs::cmd_mv(&connect()?, from, to),

        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
