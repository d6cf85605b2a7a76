//! Tether Agent — headless group member.
//!
//! Joins a group with a scripted local player and logs what it sees of the
//! other members. Useful for exercising a server without a game client.
//!
//! Configuration comes from the environment (see `SyncConfig::from_env`)
//! plus:
//! - `TETHER_GROUP` -- group name / namespace (default `tether`)
//! - `TETHER_MEMBERS` -- comma-separated roster (default `agent`)
//! - `TETHER_LOCAL_NAME` -- which roster entry this agent is (default: first)

mod patrol;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use tether_sync::{GroupState, Location, Session, SyncConfig};

use patrol::Patrol;

const SUMMARY_INTERVAL: Duration = Duration::from_secs(10);

fn roster_from_env() -> Vec<String> {
    let raw = std::env::var("TETHER_MEMBERS").unwrap_or_else(|_| "agent".to_string());
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

async fn log_summary(session: &Session) {
    let connection = if session.is_connected() { "persistent" } else { "polling" };
    let group = session.group();
    let group = group.read().await;
    info!("Group {} via {connection}", group.name());
    for member in group.members() {
        let location = match group.exposed_location(member.name()) {
            Some(at) => format!("({}, {}, {})", at.x, at.y, at.plane),
            None => "hidden".to_string(),
        };
        info!(
            "  {:<12} world {:>3}  hp {:?}/{:?}  at {location}  {}",
            member.name(),
            member.world(),
            member.hp(),
            member.max_hp(),
            member.activity_summary()
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = SyncConfig::from_env()?;
    let group_name = std::env::var("TETHER_GROUP").unwrap_or_else(|_| "tether".to_string());
    let roster = roster_from_env();
    let local_name = std::env::var("TETHER_LOCAL_NAME")
        .ok()
        .or_else(|| roster.first().cloned())
        .unwrap_or_default();

    info!("Starting Tether Agent as {local_name} in {group_name}...");
    if config.server_address.is_empty() {
        info!("TETHER_SERVER_ADDRESS is empty, running offline");
    }

    let group = GroupState::new(group_name, &roster, &local_name)?;
    let player = Arc::new(Patrol::new(Location::new(3222, 3218, 0), 5, 301));
    let session = Session::new(config, group, player);
    session.start().await;

    let mut summary = tokio::time::interval(SUMMARY_INTERVAL);
    loop {
        tokio::select! {
            _ = summary.tick() => log_summary(&session).await,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down");
    session.stop().await;
    Ok(())
}
