//! Wire records exchanged over the shared channel
//!
//! Messages are serialized as JSON with internally-tagged enums.
//! Format: {"Type": "MessageType", ...fields}
//!
//! Every field is PascalCase so the simulation side can mirror the layout
//! without renaming rules of its own.

use serde::{Deserialize, Serialize};

/// Wire form of a space descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type", rename_all = "PascalCase")]
pub enum SpaceRecord {
    /// One choice among `n`
    Discrete {
        #[serde(rename = "N")]
        n: u32,
    },

    /// N-dimensional numeric array
    Box {
        #[serde(rename = "Dtype")]
        dtype: String,
        #[serde(rename = "Low")]
        low: f64,
        #[serde(rename = "High")]
        high: f64,
        #[serde(rename = "Shape")]
        shape: Vec<u32>,
    },

    /// Ordered subspaces
    Tuple {
        #[serde(rename = "Elements")]
        elements: Vec<SpaceRecord>,
    },

    /// Named subspaces
    Dict {
        #[serde(rename = "Elements")]
        elements: Vec<NamedSpaceRecord>,
    },
}

/// Entry of a `Dict` space record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NamedSpaceRecord {
    pub name: String,
    pub space: SpaceRecord,
}

/// Wire form of a data container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type", rename_all = "PascalCase")]
pub enum DataRecord {
    /// Discrete value
    Discrete {
        #[serde(rename = "Data")]
        data: i64,
    },

    /// Flat array with one typed field populated
    Box(BoxRecord),

    /// Ordered children
    Tuple {
        #[serde(rename = "Elements")]
        elements: Vec<DataRecord>,
    },

    /// Named children
    Dict {
        #[serde(rename = "Elements")]
        elements: Vec<NamedDataRecord>,
    },
}

/// Payload of a `Box` data record
///
/// Only the field matching `dtype` carries values; the rest stay empty and are
/// left off the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BoxRecord {
    pub dtype: String,
    #[serde(default)]
    pub shape: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub int_data: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uint_data: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub float_data: Vec<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub double_data: Vec<f64>,
}

/// Entry of a `Dict` data record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NamedDataRecord {
    pub name: String,
    pub value: DataRecord,
}

/// Messages exchanged between the bridge and the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type", rename_all = "PascalCase")]
pub enum GymMessage {
    // === Simulation -> Bridge ===
    /// Spaces announced once per session
    SimInit {
        #[serde(rename = "ActionSpace")]
        action_space: SpaceRecord,
        #[serde(rename = "ObservationSpace")]
        observation_space: SpaceRecord,
    },

    /// State after a step
    EnvState {
        #[serde(rename = "ObsData")]
        obs_data: DataRecord,
        #[serde(rename = "Reward")]
        reward: f64,
        #[serde(rename = "IsGameOver")]
        is_game_over: bool,
        #[serde(rename = "Reason", default)]
        reason: String,
        /// Either a JSON object or a bare string
        #[serde(rename = "Info", default)]
        info: serde_json::Value,
    },

    // === Bridge -> Simulation ===
    /// Answer to `SimInit`
    SimInitAck {
        #[serde(rename = "Done")]
        done: bool,
        #[serde(rename = "StopSimReq")]
        stop_sim_req: bool,
    },

    /// Action for the next step, or a stop request
    EnvAct {
        #[serde(rename = "StopSimReq")]
        stop_sim_req: bool,
        #[serde(rename = "ActData", default, skip_serializing_if = "Option::is_none")]
        act_data: Option<DataRecord>,
    },
}

impl GymMessage {
    /// Name of the `Type` tag, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            GymMessage::SimInit { .. } => "SimInit",
            GymMessage::EnvState { .. } => "EnvState",
            GymMessage::SimInitAck { .. } => "SimInitAck",
            GymMessage::EnvAct { .. } => "EnvAct",
        }
    }

    /// Stop request sent by the bridge
    pub fn stop() -> Self {
        GymMessage::EnvAct {
            stop_sim_req: true,
            act_data: None,
        }
    }
}

/// Serialize a message to JSON bytes
pub fn serialize(msg: &GymMessage) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(msg)
}

/// Deserialize a message from JSON bytes
pub fn deserialize(bytes: &[u8]) -> Result<GymMessage, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_init_from_simulation() {
        let json = r#"{"Type":"SimInit","ActionSpace":{"Type":"Discrete","N":4},"ObservationSpace":{"Type":"Box","Dtype":"UINT","Low":0.0,"High":100.0,"Shape":[3]}}"#;

        let msg = deserialize(json.as_bytes()).unwrap();
        match msg {
            GymMessage::SimInit {
                action_space,
                observation_space,
            } => {
                assert_eq!(action_space, SpaceRecord::Discrete { n: 4 });
                match observation_space {
                    SpaceRecord::Box { dtype, shape, .. } => {
                        assert_eq!(dtype, "UINT");
                        assert_eq!(shape, vec![3]);
                    }
                    other => panic!("Expected Box space, got {:?}", other),
                }
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_stop_request_omits_action() {
        let bytes = serialize(&GymMessage::stop()).unwrap();
        let json = String::from_utf8_lossy(&bytes);

        assert!(json.contains("\"Type\":\"EnvAct\""));
        assert!(json.contains("\"StopSimReq\":true"));
        assert!(!json.contains("ActData"));
    }

    #[test]
    fn test_box_record_only_populated_field_on_wire() {
        let record = DataRecord::Box(BoxRecord {
            dtype: "DOUBLE".into(),
            shape: vec![2],
            double_data: vec![0.5, 1.5],
            ..Default::default()
        });
        let json = serde_json::to_string(&record).unwrap();

        assert!(json.contains("\"Type\":\"Box\""));
        assert!(json.contains("\"DoubleData\":[0.5,1.5]"));
        assert!(!json.contains("IntData"));
        assert!(!json.contains("FloatData"));
    }

    #[test]
    fn test_env_state_defaults() {
        let json = r#"{"Type":"EnvState","ObsData":{"Type":"Discrete","Data":1},"Reward":0.5,"IsGameOver":false}"#;
        let msg = deserialize(json.as_bytes()).unwrap();

        match msg {
            GymMessage::EnvState { reason, info, .. } => {
                assert!(reason.is_empty());
                assert!(info.is_null());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let json = r#"{"Type":"Teleport","Where":"moon"}"#;
        assert!(deserialize(json.as_bytes()).is_err());
    }
}
