//! simgym-demo: runs episodes against an in-process toy simulation
//!
//! The simulation walks a point along a line towards a goal. The controller
//! reads the position from the observation and steps towards the goal.
//!
//! Usage: simgym-demo [episodes]

use anyhow::Result;
use simgym_bridge::{BridgeConfig, GymBridge, LocalSupervisor, SimCommand, SimulationPeer};
use simgym_channel::LocalEndpoint;
use simgym_core::{ArrayData, DataContainer, ElementKind, SpaceDescriptor};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

const GOAL: i64 = 8;
const MAX_STEPS: u32 = 20;

fn action_space() -> SpaceDescriptor {
    // 0: left, 1: stay, 2: right
    SpaceDescriptor::scalar(3)
}

fn observation_space() -> SpaceDescriptor {
    SpaceDescriptor::array(ElementKind::Int, -100.0, 100.0, vec![2])
}

fn observe(position: i64) -> DataContainer {
    DataContainer::Array(ArrayData::Int(vec![position, GOAL]))
}

async fn walk_simulation(endpoint: LocalEndpoint) -> simgym_core::Result<()> {
    let mut peer = SimulationPeer::new(endpoint, action_space(), observation_space());
    let mut position = 0i64;
    let mut steps = 0u32;

    loop {
        let reward = -((GOAL - position).abs() as f64);
        let info = serde_json::json!({ "steps": steps });
        if steps >= MAX_STEPS {
            return peer.notify_simulation_end(&observe(position), reward, info).await;
        }

        match peer
            .notify_state(&observe(position), reward, position == GOAL, info)
            .await?
        {
            SimCommand::Act(action) => {
                position += action.as_scalar().unwrap_or(1) - 1;
                steps += 1;
            }
            SimCommand::Stop => return Ok(()),
            SimCommand::Continue => {}
        }
    }
}

/// Step towards the goal read from the observation
fn policy(observation: &DataContainer) -> DataContainer {
    let direction = match observation.as_array() {
        Some(ArrayData::Int(values)) if values.len() == 2 => (values[1] - values[0]).signum(),
        _ => 0,
    };
    DataContainer::Scalar(direction + 1)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    let episodes: u32 = match args.get(1) {
        Some(value) => value.parse()?,
        None => 3,
    };

    let supervisor = LocalSupervisor::new("demo", walk_simulation);
    let mut bridge = GymBridge::new(supervisor, BridgeConfig::default())?;
    bridge.initialize().await?;

    for episode in 1..=episodes {
        let mut observation = bridge.reset().await?;
        let mut total_reward = 0.0;
        let mut steps = 0;

        loop {
            let state = bridge.step(&policy(&observation)).await?;
            total_reward += state.reward;
            steps += 1;
            if state.terminated {
                info!(
                    "Episode {}: {} steps, reward {:.1}, ended by {}",
                    episode, steps, total_reward, state.termination_reason
                );
                break;
            }
            observation = state.observation;
        }
    }

    info!(
        "Ran {} episodes over {} launches",
        episodes,
        bridge.supervisor().launches()
    );
    bridge.close().await?;

    Ok(())
}
