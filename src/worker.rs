//! # Worker: a long-lived task with an inbox.
//!
//! A [`Worker`] owns its flow of execution and an [`EventClient`]. Its
//! entry point loops: wait on the inbox (usually with a bounded timeout so
//! periodic work can happen), interpret events, and return when QUIT is
//! observed. The bus's broadcast of a Sticky|HighPriority QUIT is the
//! canonical shutdown signal; every worker must honor it.
//!
//! Two spawn flavors:
//! - [`spawn`] runs the worker as a task on the shared multi-thread
//!   runtime. Used by the system services.
//! - [`spawn_on_thread`] gives the worker a dedicated OS thread with a
//!   validated stack size, driving a current-thread runtime. Used by the
//!   plugin host: plugin code is isolated per-thread and may configure its
//!   stack.
//!
//! ## Rules
//! - The client is registered **before** the worker starts, so events
//!   broadcast after a spawn call returns are guaranteed to reach it.
//! - [`WorkerHandle::join`] blocks until the worker's entry point returns.
//!   Stuck workers block shutdown deliberately: a diagnosable hang beats a
//!   force-kill that corrupts plugin state.
//! - Every worker must observe its inbox at least once per second.

use async_trait::async_trait;
use log::{error, warn};
use tokio::task::JoinHandle;

use crate::error::RuntimeError;
use crate::events::{Bus, EventClient};
use crate::util::clamp_stack_size;

/// A long-lived unit of execution fed by an inbox.
#[async_trait]
pub trait Worker: Send + 'static {
    /// Stable name for logs and thread naming.
    fn name(&self) -> &str;

    /// Entry point. Must return promptly after popping QUIT.
    async fn run(self: Box<Self>, client: EventClient);
}

enum Flavor {
    Task(JoinHandle<()>),
    Thread(Option<std::thread::JoinHandle<()>>),
}

/// Handle to a spawned worker; join it during shutdown.
pub struct WorkerHandle {
    name: String,
    flavor: Flavor,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the worker's entry point to return.
    pub async fn join(self) {
        match self.flavor {
            Flavor::Task(handle) => {
                if handle.await.is_err() {
                    warn!("{}: worker panicked", self.name);
                }
            }
            Flavor::Thread(handle) => {
                let Some(handle) = handle else { return };
                let name = self.name;
                let joined = tokio::task::spawn_blocking(move || handle.join()).await;
                match joined {
                    Ok(Ok(())) => {}
                    _ => warn!("{name}: worker thread panicked"),
                }
            }
        }
    }
}

/// Spawns a worker as a task on the shared runtime.
pub fn spawn(bus: &Bus, worker: Box<dyn Worker>) -> WorkerHandle {
    spawn_with(bus.register(), worker)
}

/// Spawns a worker as a task, feeding it an already-registered client.
/// Used when the caller must know the worker's [`ClientId`] up front
/// (the netlink service address, plugin routing targets).
///
/// [`ClientId`]: crate::events::ClientId
pub fn spawn_with(client: EventClient, worker: Box<dyn Worker>) -> WorkerHandle {
    let name = worker.name().to_string();
    let handle = tokio::spawn(async move { worker.run(client).await });
    WorkerHandle {
        name,
        flavor: Flavor::Task(handle),
    }
}

/// Spawns a worker on a dedicated OS thread with the requested stack size
/// (clamped to the platform minimum and rounded up to a page).
pub fn spawn_on_thread(
    client: EventClient,
    worker: Box<dyn Worker>,
    stack_size: usize,
) -> Result<WorkerHandle, RuntimeError> {
    let name = worker.name().to_string();
    let thread_name = name.clone();

    let handle = std::thread::Builder::new()
        .name(thread_name.clone())
        .stack_size(clamp_stack_size(stack_size))
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(err) => {
                    error!("{thread_name}: runtime build failed: {err}");
                    return;
                }
            };
            runtime.block_on(worker.run(client));
        })
        .map_err(|err| RuntimeError::os(format!("spawn worker thread '{name}'"), err))?;

    Ok(WorkerHandle {
        name,
        flavor: Flavor::Thread(Some(handle)),
    })
}
