//! Environment bridge
//!
//! Drives the controller half of the protocol over a channel obtained from a
//! [`ProcessSupervisor`]:
//!
//! ```text
//! initialize: recv SimInit → send SimInitAck → recv EnvState
//! step:       send EnvAct → recv EnvState [→ send stop if terminal]
//! reset:      [send stop] → terminate → initialize
//! close:      [send stop] → terminate
//! ```
//!
//! Every operation awaits its handshakes in order; nothing runs in the
//! background.

use crate::lease::ResourceLease;
use crate::supervisor::ProcessSupervisor;
use serde::Deserialize;
use simgym_channel::{SharedChannel, encode_message, recv_message, send_message, send_payload};
use simgym_core::{
    DataContainer, DtypePolicy, ExtraInfo, GymError, GymMessage, Result, SpaceDescriptor,
    StateRecord,
};
use tracing::{debug, info, warn};

const SIM_TO_BRIDGE: &str = "Sim→Bridge";
const BRIDGE_TO_SIM: &str = "Bridge→Sim";

/// Lifecycle phase of a [`GymBridge`]
///
/// `Initializing` and `Stepping` only persist when the operation that entered
/// them failed; the peer's position in the protocol is then unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initializing,
    Ready,
    Stepping,
    GameOver,
    Closed,
}

/// Configuration for a bridge session
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Ask the simulation to stop right after initialization
    pub stop_on_init: bool,
    /// Treatment of unrecognized element tags in received records
    pub dtype_policy: DtypePolicy,
}

impl BridgeConfig {
    pub fn with_stop_on_init(mut self, stop_on_init: bool) -> Self {
        self.stop_on_init = stop_on_init;
        self
    }

    pub fn with_dtype_policy(mut self, dtype_policy: DtypePolicy) -> Self {
        self.dtype_policy = dtype_policy;
        self
    }
}

/// Everything negotiated for one simulation run
#[derive(Debug)]
struct Session {
    action_space: SpaceDescriptor,
    observation_space: SpaceDescriptor,
    state: Option<StateRecord>,
    /// Current state was handed to the caller
    state_consumed: bool,
    /// A step happened since initialize/reset
    stepped: bool,
    /// An action was sent and its reply not yet received
    awaiting_state: bool,
    stop_sent: bool,
}

impl Session {
    fn new(action_space: SpaceDescriptor, observation_space: SpaceDescriptor) -> Self {
        Self {
            action_space,
            observation_space,
            state: None,
            state_consumed: false,
            stepped: false,
            awaiting_state: false,
            stop_sent: false,
        }
    }
}

/// Controller-side environment bridge
pub struct GymBridge<S: ProcessSupervisor> {
    supervisor: S,
    config: BridgeConfig,
    phase: Phase,
    channel: Option<Box<dyn SharedChannel>>,
    session: Option<Session>,
    lease: Option<ResourceLease>,
}

impl<S: ProcessSupervisor> GymBridge<S> {
    /// Create a bridge, claiming the supervisor's resource
    ///
    /// Fails with `AlreadyActive` while another unclosed bridge holds the
    /// same resource. Nothing is spawned until [`GymBridge::initialize`].
    pub fn new(supervisor: S, config: BridgeConfig) -> Result<Self> {
        let lease = ResourceLease::acquire(supervisor.resource_id())?;
        Ok(Self {
            supervisor,
            config,
            phase: Phase::Uninitialized,
            channel: None,
            session: None,
            lease: Some(lease),
        })
    }

    /// Start the simulation, negotiate spaces and receive the first state
    pub async fn initialize(&mut self) -> Result<()> {
        self.ensure_phase(Phase::Uninitialized, "initialize")?;
        self.launch().await
    }

    /// Send an action and return the resulting state
    ///
    /// The previous state must have been handed out first (by `step`, `reset`
    /// or `take_state`). Encoding and size problems are reported before any
    /// handshake.
    pub async fn step(&mut self, action: &DataContainer) -> Result<StateRecord> {
        self.ensure_phase(Phase::Ready, "step")?;
        let (Some(channel), Some(session)) = (self.channel.as_mut(), self.session.as_mut()) else {
            return Err(GymError::InvalidState("No active session".into()));
        };
        if !session.state_consumed {
            return Err(GymError::StateNotConsumed);
        }

        let msg = GymMessage::EnvAct {
            stop_sim_req: false,
            act_data: Some(action.encode(&session.action_space)?),
        };
        let data = encode_message(&msg, channel.capacity())?;

        self.phase = Phase::Stepping;
        session.stepped = true;
        send_payload(channel, &data, BRIDGE_TO_SIM).await?;
        session.awaiting_state = true;

        self.receive_state().await?;
        self.take_state()
            .ok_or_else(|| GymError::InvalidState("No state received".into()))
    }

    /// Restart the simulation and return its initial observation
    ///
    /// Without a step since the last initialize/reset this returns the
    /// current observation and touches nothing.
    pub async fn reset(&mut self) -> Result<DataContainer> {
        match self.phase {
            Phase::Closed => return Err(GymError::BridgeClosed),
            Phase::Uninitialized => {
                return Err(GymError::InvalidState(
                    "reset called before initialize".into(),
                ));
            }
            _ => {}
        }

        let stepped = self.session.as_ref().is_some_and(|session| session.stepped);
        if self.phase == Phase::Ready && !stepped {
            debug!("No step since last reset, keeping current state");
            return self.current_observation();
        }

        self.stop_session(true).await;
        self.teardown().await?;
        info!("Relaunching simulation");
        self.launch().await?;
        self.current_observation()
    }

    /// Stop the simulation and release every resource
    ///
    /// Safe to call in any phase and more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.phase == Phase::Closed {
            return Ok(());
        }

        self.stop_session(false).await;
        let result = self.teardown().await;
        self.lease = None;
        self.phase = Phase::Closed;
        info!("Bridge closed");
        result
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }

    pub fn action_space(&self) -> Option<&SpaceDescriptor> {
        self.session.as_ref().map(|session| &session.action_space)
    }

    pub fn observation_space(&self) -> Option<&SpaceDescriptor> {
        self.session.as_ref().map(|session| &session.observation_space)
    }

    /// Latest state, without marking it consumed
    pub fn state(&self) -> Option<&StateRecord> {
        self.session.as_ref().and_then(|session| session.state.as_ref())
    }

    pub fn observation(&self) -> Option<&DataContainer> {
        self.state().map(|state| &state.observation)
    }

    pub fn reward(&self) -> Option<f64> {
        self.state().map(|state| state.reward)
    }

    pub fn is_game_over(&self) -> bool {
        self.phase == Phase::GameOver || self.state().is_some_and(|state| state.terminated)
    }

    /// Empty unless the simulation terminated
    pub fn termination_reason(&self) -> Option<&str> {
        self.state().map(|state| state.termination_reason.as_str())
    }

    pub fn extra_info(&self) -> Option<&ExtraInfo> {
        self.state().map(|state| &state.info)
    }

    /// Hand out the latest state, allowing the next step
    pub fn take_state(&mut self) -> Option<StateRecord> {
        let session = self.session.as_mut()?;
        let state = session.state.clone()?;
        session.state_consumed = true;
        Some(state)
    }

    fn ensure_phase(&self, expected: Phase, operation: &str) -> Result<()> {
        match self.phase {
            phase if phase == expected => Ok(()),
            Phase::Closed => Err(GymError::BridgeClosed),
            other => Err(GymError::InvalidState(format!(
                "{} called in phase {:?}",
                operation, other
            ))),
        }
    }

    fn current_observation(&mut self) -> Result<DataContainer> {
        self.take_state()
            .map(|state| state.observation)
            .ok_or_else(|| {
                GymError::InvalidState("Simulation stopped before sending a state".into())
            })
    }

    /// Spawn a simulation and run the initialization handshakes
    async fn launch(&mut self) -> Result<()> {
        self.phase = Phase::Initializing;
        let mut channel = self.supervisor.spawn().await?;

        let (action_record, observation_record) =
            match recv_message(&mut channel, SIM_TO_BRIDGE).await? {
                GymMessage::SimInit {
                    action_space,
                    observation_space,
                } => (action_space, observation_space),
                other => {
                    return Err(GymError::ProtocolError(format!(
                        "Expected SimInit, got {}",
                        other.type_name()
                    )));
                }
            };
        let policy = self.config.dtype_policy;
        let mut session = Session::new(
            SpaceDescriptor::decode(&action_record, policy)?,
            SpaceDescriptor::decode(&observation_record, policy)?,
        );
        info!(
            "Simulation announced action space {} and observation space {}",
            session.action_space.kind_name(),
            session.observation_space.kind_name()
        );

        let ack = GymMessage::SimInitAck {
            done: true,
            stop_sim_req: self.config.stop_on_init,
        };
        send_message(&mut channel, &ack, BRIDGE_TO_SIM).await?;

        let stop_on_init = self.config.stop_on_init;
        session.stop_sent = stop_on_init;
        session.awaiting_state = !stop_on_init;
        self.channel = Some(channel);
        self.session = Some(session);

        if stop_on_init {
            info!("Stop requested at initialization");
            self.phase = Phase::GameOver;
            return Ok(());
        }
        self.receive_state().await
    }

    /// Receive the next state; a terminal one is answered with a stop request
    async fn receive_state(&mut self) -> Result<()> {
        let policy = self.config.dtype_policy;
        let (Some(channel), Some(session)) = (self.channel.as_mut(), self.session.as_mut()) else {
            return Err(GymError::InvalidState("No active session".into()));
        };

        let received = recv_message(channel, SIM_TO_BRIDGE).await;
        session.awaiting_state = false;
        let state = StateRecord::from_message(&received?, &session.observation_space, policy)?;
        debug!(
            "State received: reward={} terminated={}",
            state.reward, state.terminated
        );

        let terminated = state.terminated;
        if terminated {
            info!(
                "Simulation terminated ({}), requesting stop",
                state.termination_reason
            );
        }
        session.state = Some(state);
        session.state_consumed = false;

        if terminated {
            send_message(channel, &GymMessage::stop(), BRIDGE_TO_SIM).await?;
            session.stop_sent = true;
            self.phase = Phase::GameOver;
        } else {
            self.phase = Phase::Ready;
        }
        Ok(())
    }

    /// Send a stop request if the peer is waiting for an action
    ///
    /// With `drain`, a reply left behind by an interrupted step is received
    /// first. Failures are logged; the session is being discarded anyway.
    async fn stop_session(&mut self, drain: bool) {
        let (Some(channel), Some(session)) = (self.channel.as_mut(), self.session.as_mut()) else {
            return;
        };
        if session.stop_sent {
            return;
        }

        let peer_waiting = match self.phase {
            Phase::Ready => true,
            Phase::Stepping if drain && session.awaiting_state => {
                match recv_message(channel, SIM_TO_BRIDGE).await {
                    Ok(_) => {
                        session.awaiting_state = false;
                        true
                    }
                    Err(e) => {
                        warn!("Failed to drain pending state: {}", e);
                        false
                    }
                }
            }
            _ => false,
        };
        if !peer_waiting {
            return;
        }

        match send_message(channel, &GymMessage::stop(), BRIDGE_TO_SIM).await {
            Ok(()) => session.stop_sent = true,
            Err(e) => warn!("Failed to send stop request: {}", e),
        }
    }

    /// Drop the session and channel, then stop the simulation
    async fn teardown(&mut self) -> Result<()> {
        self.session = None;
        self.channel = None;
        self.supervisor.terminate().await
    }
}
