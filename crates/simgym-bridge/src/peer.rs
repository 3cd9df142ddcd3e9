//! Simulation side of the protocol
//!
//! A simulation embeds a [`SimulationPeer`] and calls it at every decision
//! point. The peer announces the spaces once, publishes states and hands back
//! the controller's actions. It carries no simulation logic of its own.

use simgym_channel::{SharedChannel, recv_message, send_message};
use simgym_core::{
    DataContainer, DtypePolicy, GymError, GymMessage, REASON_GAME_OVER, REASON_SIMULATION_END,
    Result, SpaceDescriptor,
};
use tracing::{debug, info};

const SIM_TO_BRIDGE: &str = "Sim→Bridge";
const BRIDGE_TO_SIM: &str = "Bridge→Sim";

/// What the controller asked the simulation to do
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    /// Initialization accepted, keep running
    Continue,
    /// Stop the simulation
    Stop,
    /// Apply this action and advance
    Act(DataContainer),
}

/// Simulation half of the bridge protocol
pub struct SimulationPeer<C: SharedChannel> {
    channel: C,
    action_space: SpaceDescriptor,
    observation_space: SpaceDescriptor,
    policy: DtypePolicy,
    initialized: bool,
    stopped: bool,
    simulation_ended: bool,
}

impl<C: SharedChannel> SimulationPeer<C> {
    pub fn new(
        channel: C,
        action_space: SpaceDescriptor,
        observation_space: SpaceDescriptor,
    ) -> Self {
        Self {
            channel,
            action_space,
            observation_space,
            policy: DtypePolicy::default(),
            initialized: false,
            stopped: false,
            simulation_ended: false,
        }
    }

    /// Policy for element tags in received actions
    pub fn with_policy(mut self, policy: DtypePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether the controller has asked to stop
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn action_space(&self) -> &SpaceDescriptor {
        &self.action_space
    }

    pub fn observation_space(&self) -> &SpaceDescriptor {
        &self.observation_space
    }

    /// Announce the spaces and wait for the acknowledgement
    ///
    /// Only the first call talks to the controller.
    pub async fn init(&mut self) -> Result<SimCommand> {
        if self.stopped {
            return Ok(SimCommand::Stop);
        }
        if self.initialized {
            return Ok(SimCommand::Continue);
        }
        self.initialized = true;

        let announce = GymMessage::SimInit {
            action_space: self.action_space.to_record(),
            observation_space: self.observation_space.to_record(),
        };
        send_message(&mut self.channel, &announce, SIM_TO_BRIDGE).await?;

        match recv_message(&mut self.channel, BRIDGE_TO_SIM).await? {
            GymMessage::SimInitAck { stop_sim_req, .. } => {
                if stop_sim_req {
                    info!("Controller requested stop during initialization");
                    self.stopped = true;
                    Ok(SimCommand::Stop)
                } else {
                    Ok(SimCommand::Continue)
                }
            }
            other => Err(GymError::ProtocolError(format!(
                "Expected SimInitAck, got {}",
                other.type_name()
            ))),
        }
    }

    /// Publish a state and wait for the controller's reply
    pub async fn notify_state(
        &mut self,
        observation: &DataContainer,
        reward: f64,
        game_over: bool,
        info: serde_json::Value,
    ) -> Result<SimCommand> {
        if let SimCommand::Stop = self.init().await? {
            return Ok(SimCommand::Stop);
        }

        let reason = if self.simulation_ended {
            REASON_SIMULATION_END
        } else if game_over {
            REASON_GAME_OVER
        } else {
            ""
        };
        let state = GymMessage::EnvState {
            obs_data: observation.encode(&self.observation_space)?,
            reward,
            is_game_over: game_over || self.simulation_ended,
            reason: reason.to_string(),
            info,
        };
        send_message(&mut self.channel, &state, SIM_TO_BRIDGE).await?;

        match recv_message(&mut self.channel, BRIDGE_TO_SIM).await? {
            GymMessage::EnvAct {
                stop_sim_req: true,
                ..
            } => {
                debug!("Controller requested stop");
                self.stopped = true;
                Ok(SimCommand::Stop)
            }
            GymMessage::EnvAct {
                act_data: Some(record),
                ..
            } => Ok(SimCommand::Act(DataContainer::decode(
                &record,
                &self.action_space,
                self.policy,
            )?)),
            GymMessage::EnvAct { act_data: None, .. } => Err(GymError::ProtocolError(
                "EnvAct carries neither an action nor a stop request".into(),
            )),
            other => Err(GymError::ProtocolError(format!(
                "Expected EnvAct, got {}",
                other.type_name()
            ))),
        }
    }

    /// Publish the final state of a simulation that ran out of time
    pub async fn notify_simulation_end(
        &mut self,
        observation: &DataContainer,
        reward: f64,
        info: serde_json::Value,
    ) -> Result<()> {
        self.simulation_ended = true;
        match self.notify_state(observation, reward, true, info).await? {
            SimCommand::Stop => Ok(()),
            other => Err(GymError::ProtocolError(format!(
                "Expected stop after simulation end, got {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simgym_channel::{DEFAULT_CAPACITY, LocalChannel};
    use simgym_core::{ElementKind, StateRecord};

    fn spaces() -> (SpaceDescriptor, SpaceDescriptor) {
        (
            SpaceDescriptor::scalar(4),
            SpaceDescriptor::array(ElementKind::Double, 0.0, 1.0, vec![2]),
        )
    }

    #[tokio::test]
    async fn test_full_exchange() {
        let (mut controller, simulation) = LocalChannel::pair(DEFAULT_CAPACITY);
        let (action_space, observation_space) = spaces();
        let mut peer = SimulationPeer::new(simulation, action_space, observation_space.clone());

        let sim = tokio::spawn(async move {
            let obs = DataContainer::Array(simgym_core::ArrayData::Double(vec![0.5, 0.5]));
            let first = peer
                .notify_state(&obs, 0.0, false, serde_json::Value::Null)
                .await
                .unwrap();
            let second = peer
                .notify_state(&obs, 1.0, true, serde_json::json!("done"))
                .await
                .unwrap();
            (first, second, peer.is_stopped())
        });

        let init = recv_message(&mut controller, SIM_TO_BRIDGE).await.unwrap();
        assert_eq!(init.type_name(), "SimInit");
        let ack = GymMessage::SimInitAck {
            done: true,
            stop_sim_req: false,
        };
        send_message(&mut controller, &ack, BRIDGE_TO_SIM).await.unwrap();

        let state = recv_message(&mut controller, SIM_TO_BRIDGE).await.unwrap();
        let state = StateRecord::from_message(&state, &observation_space, DtypePolicy::Strict).unwrap();
        assert!(!state.terminated);
        let act = GymMessage::EnvAct {
            stop_sim_req: false,
            act_data: Some(DataContainer::Scalar(3).encode(&SpaceDescriptor::scalar(4)).unwrap()),
        };
        send_message(&mut controller, &act, BRIDGE_TO_SIM).await.unwrap();

        let state = recv_message(&mut controller, SIM_TO_BRIDGE).await.unwrap();
        let state = StateRecord::from_message(&state, &observation_space, DtypePolicy::Strict).unwrap();
        assert!(state.terminated);
        assert_eq!(state.termination_reason, REASON_GAME_OVER);
        send_message(&mut controller, &GymMessage::stop(), BRIDGE_TO_SIM)
            .await
            .unwrap();

        let (first, second, stopped) = sim.await.unwrap();
        assert_eq!(first, SimCommand::Act(DataContainer::Scalar(3)));
        assert_eq!(second, SimCommand::Stop);
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_stop_on_init_ends_exchange() {
        let (mut controller, simulation) = LocalChannel::pair(DEFAULT_CAPACITY);
        let (action_space, observation_space) = spaces();
        let mut peer = SimulationPeer::new(simulation, action_space, observation_space);

        let sim = tokio::spawn(async move {
            let init = peer.init().await.unwrap();
            let obs = DataContainer::Array(simgym_core::ArrayData::Double(vec![0.0, 0.0]));
            // No further messages once stopped
            let after = peer
                .notify_state(&obs, 0.0, false, serde_json::Value::Null)
                .await
                .unwrap();
            (init, after)
        });

        recv_message(&mut controller, SIM_TO_BRIDGE).await.unwrap();
        let ack = GymMessage::SimInitAck {
            done: true,
            stop_sim_req: true,
        };
        send_message(&mut controller, &ack, BRIDGE_TO_SIM).await.unwrap();

        let (init, after) = sim.await.unwrap();
        assert_eq!(init, SimCommand::Stop);
        assert_eq!(after, SimCommand::Stop);
    }
}
