//! Process supervision for the simulation side

use async_trait::async_trait;
use simgym_channel::{ActivityCounter, DEFAULT_CAPACITY, LocalChannel, LocalEndpoint, SharedChannel};
use simgym_core::Result;
use std::future::Future;
use std::pin::Pin;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Owner of the simulation and of the channel it talks over
#[async_trait]
pub trait ProcessSupervisor: Send {
    /// Identifier of the underlying resource (segment, process slot)
    fn resource_id(&self) -> String;

    /// Start a fresh simulation and return the controller's channel endpoint
    ///
    /// A simulation still running from a previous spawn is terminated first.
    async fn spawn(&mut self) -> Result<Box<dyn SharedChannel>>;

    /// Stop the simulation; calling it with nothing running is a no-op
    async fn terminate(&mut self) -> Result<()>;
}

type SimulationFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type SimulationFactory = Box<dyn FnMut(LocalEndpoint) -> SimulationFuture + Send>;

/// Runs the simulation as a tokio task in this process
///
/// Each spawn builds a new [`LocalChannel`] pair and hands the simulation
/// endpoint to the factory.
pub struct LocalSupervisor {
    name: String,
    capacity: usize,
    factory: SimulationFactory,
    task: Option<JoinHandle<()>>,
    activity: ActivityCounter,
    launches: usize,
}

impl LocalSupervisor {
    /// Create a supervisor that runs `factory(endpoint)` on every spawn
    pub fn new<F, Fut>(name: impl Into<String>, mut factory: F) -> Self
    where
        F: FnMut(LocalEndpoint) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            capacity: DEFAULT_CAPACITY,
            factory: Box::new(move |endpoint| Box::pin(factory(endpoint))),
            task: None,
            activity: ActivityCounter::new(),
            launches: 0,
        }
    }

    /// Override the channel capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Handshake primitives invoked on the controller endpoints so far
    pub fn activity(&self) -> ActivityCounter {
        self.activity.clone()
    }

    /// Number of simulations started
    pub fn launches(&self) -> usize {
        self.launches
    }
}

#[async_trait]
impl ProcessSupervisor for LocalSupervisor {
    fn resource_id(&self) -> String {
        format!("local:{}", self.name)
    }

    async fn spawn(&mut self) -> Result<Box<dyn SharedChannel>> {
        self.terminate().await?;

        let (controller, simulation) = LocalChannel::pair(self.capacity);
        let controller = controller.with_activity(self.activity.clone());
        let run = (self.factory)(simulation);
        let name = self.name.clone();

        self.task = Some(tokio::spawn(async move {
            match run.await {
                Ok(()) => debug!("Simulation {} finished", name),
                Err(e) => warn!("Simulation {} failed: {}", name, e),
            }
        }));
        self.launches += 1;
        info!("Started local simulation {} (launch {})", self.name, self.launches);

        Ok(Box::new(controller))
    }

    async fn terminate(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            // Cancellation is the expected outcome here
            let _ = task.await;
            debug!("Stopped local simulation {}", self.name);
        }
        Ok(())
    }
}

impl Drop for LocalSupervisor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
