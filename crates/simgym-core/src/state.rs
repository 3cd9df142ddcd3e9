//! State records produced by the simulation

use std::collections::HashMap;

use crate::container::DataContainer;
use crate::error::{GymError, Result};
use crate::space::{DtypePolicy, SpaceDescriptor};
use crate::wire::GymMessage;

/// Reason reported when the simulation's own game-over condition fires
pub const REASON_GAME_OVER: &str = "GameOver";

/// Reason reported when the simulation ran out of time
pub const REASON_SIMULATION_END: &str = "SimulationEnd";

/// Auxiliary information attached to a state
pub type ExtraInfo = HashMap<String, serde_json::Value>;

/// One observation/reward/termination bundle
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    pub observation: DataContainer,
    pub reward: f64,
    pub terminated: bool,
    /// Empty unless terminated
    pub termination_reason: String,
    pub info: ExtraInfo,
}

impl StateRecord {
    /// Decode an `EnvState` message against the observation space
    pub fn from_message(
        msg: &GymMessage,
        observation_space: &SpaceDescriptor,
        policy: DtypePolicy,
    ) -> Result<Self> {
        match msg {
            GymMessage::EnvState {
                obs_data,
                reward,
                is_game_over,
                reason,
                info,
            } => Ok(StateRecord {
                observation: DataContainer::decode(obs_data, observation_space, policy)?,
                reward: *reward,
                terminated: *is_game_over,
                termination_reason: reason.clone(),
                info: normalize_info(info),
            }),
            other => Err(GymError::ProtocolError(format!(
                "Expected EnvState message, got {}",
                other.type_name()
            ))),
        }
    }

    /// Encode as an `EnvState` message against the observation space
    pub fn to_message(&self, observation_space: &SpaceDescriptor) -> Result<GymMessage> {
        Ok(GymMessage::EnvState {
            obs_data: self.observation.encode(observation_space)?,
            reward: self.reward,
            is_game_over: self.terminated,
            reason: self.termination_reason.clone(),
            info: serde_json::Value::Object(
                self.info
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
        })
    }
}

/// Objects pass through; a bare non-empty string becomes `{"info": ...}`
fn normalize_info(info: &serde_json::Value) -> ExtraInfo {
    match info {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        serde_json::Value::String(text) if !text.is_empty() => {
            HashMap::from([("info".to_string(), info.clone())])
        }
        serde_json::Value::Null | serde_json::Value::String(_) => HashMap::new(),
        other => HashMap::from([("info".to_string(), other.clone())]),
    }
}
