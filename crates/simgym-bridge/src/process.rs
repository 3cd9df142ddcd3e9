//! Supervisor for simulations running as an external program

use crate::supervisor::ProcessSupervisor;
use async_trait::async_trait;
use simgym_channel::shm::{CAPACITY_ENV, SEGMENT_ENV, SHM_DIR_ENV, default_shm_dir};
use simgym_channel::{DEFAULT_CAPACITY, SharedChannel, ShmChannel};
use simgym_core::{GymError, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Configuration for launching the simulation program
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Program to run
    pub program: PathBuf,
    /// Arguments placed before the settings
    pub args: Vec<String>,
    /// Simulation parameters, passed as `--key=value`
    pub settings: BTreeMap<String, String>,
    /// Segment name (default: simgym-<pid>)
    pub segment: String,
    /// Directory holding the segment file
    pub shm_dir: PathBuf,
    /// Channel capacity per direction
    pub capacity: usize,
    /// Inherit the child's stdout/stderr instead of discarding them
    pub show_output: bool,
    /// How long the child gets to exit on its own before it is killed
    pub terminate_timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::new(),
            args: Vec::new(),
            settings: BTreeMap::new(),
            segment: format!("simgym-{}", std::process::id()),
            shm_dir: default_shm_dir(),
            capacity: DEFAULT_CAPACITY,
            show_output: false,
            terminate_timeout: Duration::from_secs(5),
        }
    }
}

impl ProcessConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.settings.insert(key.into(), value.to_string());
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = segment.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_show_output(mut self, show_output: bool) -> Self {
        self.show_output = show_output;
        self
    }
}

/// Spawns the simulation program over a shared-memory segment
pub struct CommandSupervisor {
    config: ProcessConfig,
    child: Option<Child>,
}

impl CommandSupervisor {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            child: None,
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Whether a child process is currently held
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    fn command(&self) -> Command {
        let config = &self.config;
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args);
        for (key, value) in &config.settings {
            cmd.arg(format!("--{}={}", key, value));
        }
        cmd.env(SEGMENT_ENV, &config.segment)
            .env(CAPACITY_ENV, config.capacity.to_string())
            .env(SHM_DIR_ENV, &config.shm_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if !config.show_output {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        cmd
    }
}

#[async_trait]
impl ProcessSupervisor for CommandSupervisor {
    fn resource_id(&self) -> String {
        format!("shm:{}", self.config.segment)
    }

    async fn spawn(&mut self) -> Result<Box<dyn SharedChannel>> {
        self.terminate().await?;

        // The segment must exist before the child attaches to it
        let channel = ShmChannel::create(
            &self.config.segment,
            self.config.capacity,
            &self.config.shm_dir,
        )?;

        let child = self.command().spawn().map_err(|e| {
            GymError::ProcessError(format!("Failed to start {:?}: {}", self.config.program, e))
        })?;
        info!(
            "Started {:?} (pid {:?}) on segment {}",
            self.config.program,
            child.id(),
            self.config.segment
        );
        self.child = Some(child);

        Ok(Box::new(channel))
    }

    async fn terminate(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.config.terminate_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Simulation exited with {}", status);
                return Ok(());
            }
            Ok(Err(e)) => warn!("Failed to wait for simulation: {}", e),
            Err(_) => warn!(
                "Simulation still running after {:?}, killing it",
                self.config.terminate_timeout
            ),
        }

        child
            .kill()
            .await
            .map_err(|e| GymError::ProcessError(format!("Failed to kill simulation: {}", e)))
    }
}
