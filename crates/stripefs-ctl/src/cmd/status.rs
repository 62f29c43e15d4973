//! Daemon status commands, over the HTTP API.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

#[derive(Deserialize)]
struct StatusResponse {
    role: String,
    uptime_secs: u64,
    stripe_size: u32,
    #[serde(default)]
    nodes: Vec<NodeInfo>,
    cache: Option<CacheInfo>,
}

#[derive(Deserialize)]
struct NodeInfo {
    addr: String,
    calls: u64,
    failures: u64,
}

#[derive(Deserialize)]
struct CacheInfo {
    entries: usize,
    file_generation: u64,
    dir_generation: u64,
    hits: u64,
    misses: u64,
}

#[derive(Deserialize)]
struct ClearResponse {
    cleared: usize,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  stripefsd ({})", resp.role);
    println!("═══════════════════════════════════════");
    println!("  Uptime      : {}s", resp.uptime_secs);
    println!("  Stripe size : {} bytes", resp.stripe_size);

    if !resp.nodes.is_empty() {
        println!("\n  Nodes:");
        for (i, n) in resp.nodes.iter().enumerate() {
            println!("  ┌─ #{} {}", i, n.addr);
            println!("  └─ calls {} / failures {}", n.calls, n.failures);
        }
    }
    if let Some(cache) = &resp.cache {
        print_cache(cache);
    }
    Ok(())
}

pub async fn cmd_cache(port: u16) -> Result<()> {
    let resp: CacheInfo = get_json(&format!("{}/cache", base_url(port))).await?;
    print_cache(&resp);
    Ok(())
}

pub async fn cmd_cache_clear(port: u16) -> Result<()> {
    let resp: ClearResponse = post_json(&format!("{}/cache/clear", base_url(port))).await?;
    println!("Cleared {} entries from the fast cache.", resp.cleared);
    Ok(())
}

fn print_cache(cache: &CacheInfo) {
    println!("\n  Cache:");
    println!("    entries     : {}", cache.entries);
    println!("    hits/misses : {}/{}", cache.hits, cache.misses);
    println!("    generations : file {} / dir {}", cache.file_generation, cache.dir_generation);
}
