//! Interactive mesh chat demo over the in-memory transport.
//!
//! Boots a seed peer, any number of silent background peers, and one
//! interactive peer, all on a shared in-process broker, then drops into a
//! chat loop. Watching `/peers` while `/join`-ing newcomers shows the mesh
//! converge; everything typed replicates to every peer.
//!
//! Usage:
//!   mesh_demo --name alice
//!   mesh_demo --name alice --peers bob,carol
//!   mesh_demo --name dana --room game-night
//!
//! Set `RUST_LOG=meshchat_core=debug` to watch the gossip itself.

use meshchat_core::prelude::*;
use meshchat_core::{slug, MIN_NAME_SLUG_LEN};
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn parse_args() -> HashMap<String, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut map = HashMap::new();
    let mut i = 1;
    while i < args.len() {
        if let Some(key) = args[i].strip_prefix("--") {
            if i + 1 < args.len() && !args[i + 1].starts_with("--") {
                map.insert(key.to_string(), args[i + 1].clone());
                i += 2;
            } else {
                map.insert(key.to_string(), String::new());
                i += 1;
            }
        } else {
            i += 1;
        }
    }
    map
}

/// Display names must keep at least `MIN_NAME_SLUG_LEN` characters once
/// slugged; the mesh core itself accepts anything, so the check lives here.
fn usable_name(name: &str) -> bool {
    slug(name).len() >= MIN_NAME_SLUG_LEN
}

fn print_help() {
    println!("Commands:");
    println!("  /peers        list connected peers");
    println!("  /log          reprint the whole chat log");
    println!("  /join <name>  boot another background peer");
    println!("  /quit         leave the mesh");
    println!("Anything else is sent as a chat line.");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("meshchat_core=info".parse().unwrap()),
        )
        .init();

    let args = parse_args();
    let name = args.get("name").cloned().unwrap_or_else(|| "demo".to_string());
    if !usable_name(&name) {
        eprintln!(
            "--name must contain at least {} usable characters",
            MIN_NAME_SLUG_LEN
        );
        std::process::exit(1);
    }

    let config = match args.get("room") {
        Some(room) if !room.is_empty() => MeshConfig {
            seed_id: PeerId::from(room.as_str()),
        },
        _ => MeshConfig::default(),
    };

    println!("=== Meshchat Demo ===");
    println!("Room seed: {}", config.seed_id);
    println!("Chatting as: {}", name);
    println!();

    let network = Arc::new(MemoryNetwork::new());
    let seed = MeshPeer::with_config(None, network.clone(), config.clone());

    let mut background: Vec<MeshPeer> = Vec::new();
    if let Some(list) = args.get("peers") {
        for peer_name in list.split(',').filter(|n| !n.trim().is_empty()) {
            let peer_name = peer_name.trim();
            if !usable_name(peer_name) {
                eprintln!(
                    "Skipping peer {peer_name:?}: names need at least {MIN_NAME_SLUG_LEN} usable characters"
                );
                continue;
            }
            println!("Booting background peer: {peer_name}");
            background.push(MeshPeer::with_config(
                Some(peer_name),
                network.clone(),
                config.clone(),
            ));
        }
    }

    let me = MeshPeer::with_config(Some(&name), network.clone(), config.clone());
    while me.is_loading() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    if let Some(error) = me.current_error() {
        eprintln!("Could not join the mesh: {error}");
        std::process::exit(1);
    }
    println!("Joined as {}", me.id());
    print_help();
    println!();

    // Redraws are driven by the peer's own update notifications.
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let _sub = me.subscribe(move || {
        let _ = update_tx.send(());
    });

    let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if stdin_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut printed = 0;
    let mut last_error: Option<MeshError> = None;
    loop {
        tokio::select! {
            maybe_line = stdin_rx.recv() => {
                let Some(line) = maybe_line else { break };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                match input.split_once(' ').unwrap_or((input, "")) {
                    ("/quit", _) => break,
                    ("/peers", _) => {
                        let peers = me.connected_peers();
                        println!("--- {} connected peer(s) ---", peers.len());
                        for peer in peers {
                            println!("  {peer}");
                        }
                    }
                    ("/log", _) => {
                        println!("--- {} line(s) ---", me.chat_log().len());
                        for line in me.chat_log() {
                            println!("[{}] {}", line.sender, line.content);
                        }
                    }
                    ("/join", rest) => {
                        let peer_name = rest.trim();
                        if !usable_name(peer_name) {
                            println!("usage: /join <name> (at least {MIN_NAME_SLUG_LEN} usable characters)");
                        } else {
                            println!("Booting background peer: {peer_name}");
                            background.push(MeshPeer::with_config(
                                Some(peer_name),
                                network.clone(),
                                config.clone(),
                            ));
                        }
                    }
                    (cmd, _) if cmd.starts_with('/') => print_help(),
                    _ => {
                        if let Err(error) = me.send_message(input) {
                            println!("not sent: {error}");
                        }
                    }
                }
            }
            _ = update_rx.recv() => {}
        }

        // Print whatever arrived since the last pass; local sends included.
        let log = me.chat_log();
        for line in &log[printed..] {
            println!("[{}] {}", line.sender, line.content);
        }
        printed = log.len();

        let error = me.current_error();
        if error != last_error {
            if let Some(error) = &error {
                println!("mesh error: {error}");
            }
            last_error = error;
        }
    }

    println!("Goodbye.");
    drop(me);
    drop(background);
    drop(seed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_name_boundary() {
        // The limit applies to the slug, not the raw input.
        assert!(usable_name("alice"));
        assert!(usable_name("Bo b!"));

        assert!(!usable_name("yo"));
        assert!(!usable_name("x"));
        assert!(!usable_name("--"));
        assert!(!usable_name(""));
    }
}
