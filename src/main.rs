//! Snake Mesh Node
//!
//! Runs one peer. Usage:
//!
//! ```text
//! snake-mesh-node [--config node.json] host <session>
//! snake-mesh-node [--config node.json] join <session> [viewer]
//! snake-mesh-node [--config node.json] list
//! ```
//!
//! While in a session, type `w`/`a`/`s`/`d` + Enter to steer, `v` to become a
//! viewer, `r` to rejoin, `q` to leave.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use snake_mesh::{
    game::{Direction, GameConfig},
    network::{Lifecycle, Node, NodeConfig, Role},
    VERSION,
};

enum Command {
    Host(String),
    Join(String, Role),
    List,
}

fn parse_args() -> Result<(NodeConfig, Command)> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = NodeConfig::default();
    if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            bail!("--config needs a path");
        }
        let path = args.remove(1);
        args.remove(0);
        let body = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
        config = NodeConfig::from_json(&body).with_context(|| format!("parsing {path}"))?;
    }

    let command = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["host", name] => Command::Host(name.to_string()),
        ["join", name] => Command::Join(name.to_string(), Role::Normal),
        ["join", name, "viewer"] => Command::Join(name.to_string(), Role::Viewer),
        ["list"] | [] => Command::List,
        other => bail!("unrecognised arguments: {}", other.join(" ")),
    };
    Ok((config, command))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (config, command) = parse_args()?;
    info!("Snake Mesh node v{}", VERSION);

    let node: Node = Node::start(config).await.context("starting node")?;
    info!(addr = %node.local_addr(), "listening");

    match command {
        Command::Host(name) => {
            node.start_session(&name, GameConfig::default()).await?;
        }
        Command::Join(name, role) => {
            node.discover().await;
            wait_for_session(&node, &name).await?;
            node.join_session(&name, role).await?;
        }
        Command::List => {
            node.discover().await;
            tokio::time::sleep(Duration::from_secs(2)).await;
            for s in node.sessions().await {
                println!(
                    "{:<20} {:>3}x{:<3} players={:<2} joinable={} master={}",
                    s.name, s.config.width, s.config.height, s.players.len(), s.can_join, s.master_address
                );
            }
            node.shutdown().await;
            return Ok(());
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let result = match line.trim() {
                    "w" => node.steer(Direction::Up).await,
                    "a" => node.steer(Direction::Left).await,
                    "s" => node.steer(Direction::Down).await,
                    "d" => node.steer(Direction::Right).await,
                    "v" => node.become_viewer().await,
                    "r" => node.rejoin().await,
                    "q" => break,
                    _ => {
                        info!(status = ?node.status().await, "status");
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    warn!(error = %e, "command failed");
                }
                if node.status().await.lifecycle == Lifecycle::Idle {
                    info!("session over");
                    break;
                }
            }
        }
    }

    node.shutdown().await;
    Ok(())
}

async fn wait_for_session(node: &Node, name: &str) -> Result<()> {
    for _ in 0..50 {
        if node.sessions().await.iter().any(|s| s.name == name) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    bail!("no session named {name} announced")
}
