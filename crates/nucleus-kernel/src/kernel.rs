//! The kernel owns every installed service and drives their lifecycle.
//!
//! Installing a service immediately connects it with the services it depends
//! on and with the services that depend on it, so the final wiring does not
//! depend on install order. `start` runs services in dependency order and
//! `shutdown` stops them in exactly the reverse of the order they actually
//! started in.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::KernelError;
use crate::order::startup_order;
use crate::service::{KernelService, ServiceKind, ServiceState};

/// Lifecycle of the kernel as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    NotStarted,
    Starting,
    Started,
    Stopping,
    Stopped,
}

/// Reported to the progress observer each time a service finishes starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupProgress {
    pub percentage: u8,
    pub service: ServiceKind,
}

#[derive(Debug)]
pub struct StopFailure {
    pub service: ServiceKind,
    pub error: anyhow::Error,
}

/// Outcome of a shutdown. Shutdown never aborts half way; failures are
/// collected here instead.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub stopped: Vec<ServiceKind>,
    pub failures: Vec<StopFailure>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

type ProgressObserver = Box<dyn Fn(StartupProgress) + Send + Sync>;
type ShutdownAction = Box<dyn FnOnce() + Send>;

struct InstalledService {
    kind: ServiceKind,
    service: Arc<dyn KernelService>,
    state: ServiceState,
}

#[derive(Default)]
pub struct KernelBuilder {
    shutdown_action: Option<ShutdownAction>,
    progress: Option<ProgressObserver>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Action run once after every service has been stopped.
    pub fn with_shutdown_action(mut self, action: impl FnOnce() + Send + 'static) -> Self {
        self.shutdown_action = Some(Box::new(action));
        self
    }

    pub fn with_progress_observer(
        mut self,
        observer: impl Fn(StartupProgress) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(observer));
        self
    }

    pub fn build(self) -> Kernel {
        Kernel {
            services: Vec::new(),
            index: HashMap::new(),
            connections: HashMap::new(),
            started: Vec::new(),
            state: KernelState::NotStarted,
            shutdown_action: self.shutdown_action,
            progress: self.progress,
        }
    }
}

pub struct Kernel {
    services: Vec<InstalledService>,
    index: HashMap<ServiceKind, usize>,
    /// Dependent -> the dependencies it has been connected to.
    connections: HashMap<ServiceKind, Vec<ServiceKind>>,
    /// Realized start order, consumed by shutdown.
    started: Vec<ServiceKind>,
    state: KernelState,
    shutdown_action: Option<ShutdownAction>,
    progress: Option<ProgressObserver>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("state", &self.state)
            .field("services", &self.installed())
            .field("started", &self.started)
            .finish()
    }
}

impl Kernel {
    pub fn new() -> Self {
        KernelBuilder::new().build()
    }

    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    /// Installs `service` and returns the shared handle the kernel keeps.
    pub fn install<S: KernelService>(&mut self, service: S) -> Result<Arc<S>, KernelError> {
        let service = Arc::new(service);
        self.install_shared(service.clone())?;
        Ok(service)
    }

    /// Installs an already shared service under its concrete type.
    pub fn install_shared(&mut self, service: Arc<dyn KernelService>) -> Result<ServiceKind, KernelError> {
        if !matches!(self.state, KernelState::NotStarted | KernelState::Started) {
            return Err(KernelError::NotInInstallReadyState(self.state));
        }

        let kind = ServiceKind::of_service(&*service);
        if self.index.contains_key(&kind) {
            return Err(KernelError::ServiceTypeAlreadyInstalled(kind));
        }

        let wanted = service.services_to_connect_to();
        if wanted.contains(&kind) {
            return Err(KernelError::ServiceCannotDependOnItself(kind));
        }
        if wanted.contains(&ServiceKind::generic()) {
            return Err(KernelError::ServiceCannotDependOnGenericKernelService(kind));
        }

        // Dependencies that are already installed.
        for dependency in dedup(wanted) {
            if let Some(&idx) = self.index.get(&dependency) {
                self.connections.entry(kind).or_default().push(dependency);
                service.connect_to(self.services[idx].service.clone());
            }
        }

        // Installed services waiting for this one.
        for installed in &self.services {
            if installed.service.services_to_connect_to().contains(&kind) {
                self.connections.entry(installed.kind).or_default().push(kind);
                installed.service.connect_to(service.clone());
            }
        }

        log::debug!("installed service {kind}");
        self.index.insert(kind, self.services.len());
        self.services.push(InstalledService {
            kind,
            service,
            state: ServiceState::Stopped,
        });
        Ok(kind)
    }

    /// Starts every installed service that is not already running, each one
    /// strictly after the services it depends on. A kernel that has been
    /// shut down stays down.
    pub fn start(&mut self) -> Result<(), KernelError> {
        if !matches!(self.state, KernelState::NotStarted | KernelState::Started) {
            return Err(KernelError::NotInStartReadyState(self.state));
        }
        let previous = self.state;
        self.state = KernelState::Starting;

        let result = self.start_in_order();
        match result {
            Ok(()) => {
                self.state = KernelState::Started;
                for installed in &self.services {
                    installed.service.startup_complete();
                }
                log::info!("kernel started {} service(s)", self.started.len());
                Ok(())
            }
            Err(err) => {
                self.state = if self.started.is_empty() {
                    previous
                } else {
                    KernelState::Started
                };
                log::error!("kernel start failed: {err}");
                Err(err)
            }
        }
    }

    fn start_in_order(&mut self) -> Result<(), KernelError> {
        let order = startup_order(&self.installed(), &self.connections)?;
        let total = order.len();
        for (position, kind) in order.into_iter().enumerate() {
            let idx = self.index[&kind];
            let entry = &mut self.services[idx];
            if entry.state == ServiceState::Running {
                continue;
            }
            if !entry.service.is_connected_to_all_dependencies() {
                return Err(KernelError::MissingDependency(kind));
            }

            entry.state = ServiceState::Starting;
            log::debug!("starting service {kind}");
            if let Err(source) = entry.service.start_service() {
                entry.state = ServiceState::Failed;
                return Err(KernelError::ServiceStartFailed { service: kind, source });
            }
            entry.state = ServiceState::Running;
            self.started.push(kind);

            if let Some(observer) = &self.progress {
                let percentage = ((position + 1) * 100 / total) as u8;
                observer(StartupProgress {
                    percentage,
                    service: kind,
                });
            }
        }
        Ok(())
    }

    /// Stops every started service, most dependent first. A failing stop is
    /// recorded and the remaining services are still stopped.
    pub fn shutdown(&mut self) -> ShutdownReport {
        self.state = KernelState::Stopping;
        let mut report = ShutdownReport::default();

        let order: Vec<ServiceKind> = self.started.drain(..).rev().collect();
        for kind in order {
            let idx = self.index[&kind];
            let entry = &mut self.services[idx];
            entry.state = ServiceState::Stopping;
            match entry.service.stop_service() {
                Ok(()) => {
                    entry.state = ServiceState::Stopped;
                    log::debug!("stopped service {kind}");
                }
                Err(error) => {
                    entry.state = ServiceState::Failed;
                    log::warn!("service {kind} failed to stop: {error}");
                    report.failures.push(StopFailure {
                        service: kind,
                        error,
                    });
                }
            }
            report.stopped.push(kind);
        }

        if let Some(action) = self.shutdown_action.take() {
            action();
        }
        self.state = KernelState::Stopped;
        report
    }

    /// Kinds of all installed services, in install order.
    pub fn installed(&self) -> Vec<ServiceKind> {
        self.services.iter().map(|s| s.kind).collect()
    }

    pub fn is_installed(&self, kind: ServiceKind) -> bool {
        self.index.contains_key(&kind)
    }

    pub fn service_state(&self, kind: ServiceKind) -> Option<ServiceState> {
        self.index.get(&kind).map(|&idx| self.services[idx].state)
    }

    /// The typed instance installed under `T`.
    pub fn service<T: KernelService>(&self) -> Option<Arc<T>> {
        let idx = *self.index.get(&ServiceKind::of::<T>())?;
        self.services[idx].service.clone().into_any().downcast::<T>().ok()
    }

    /// Services in the order they were started since the last shutdown.
    pub fn started(&self) -> &[ServiceKind] {
        &self.started
    }

    /// Dependencies `kind` has been connected to so far.
    pub fn connections_of(&self, kind: ServiceKind) -> &[ServiceKind] {
        self.connections.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn dedup(kinds: Vec<ServiceKind>) -> Vec<ServiceKind> {
    let mut out = Vec::with_capacity(kinds.len());
    for kind in kinds {
        if !out.contains(&kind) {
            out.push(kind);
        }
    }
    out
}
