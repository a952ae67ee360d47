//! The contract every installable kernel service implements.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

/// Identity of a service slot. Two services share a slot exactly when they
/// have the same concrete type.
#[derive(Clone, Copy)]
pub struct ServiceKind {
    id: TypeId,
    name: &'static str,
}

impl ServiceKind {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The kind of the abstract service contract itself. Too generic to be a
    /// dependency.
    pub fn generic() -> Self {
        Self::of::<dyn KernelService>()
    }

    /// Kind of a live service instance.
    pub fn of_service(service: &dyn KernelService) -> Self {
        Self {
            id: service.as_any().type_id(),
            name: service.type_name(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ServiceKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceKind {}

impl Hash for ServiceKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceKind({})", self.name)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Lifecycle of a single service. Only the kernel moves a service between
/// states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Type-erasure helpers, implemented for every sized service type.
///
/// Call these through `&dyn KernelService` (not through an `Arc`) so the
/// vtable entry of the concrete service is used.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A unit of functionality hosted by the kernel.
///
/// Services are shared (`Arc`) between the kernel and the services that depend
/// on them, so every hook takes `&self`; services keep mutable state behind
/// their own locks.
pub trait KernelService: AsAny + Send + Sync + 'static {
    /// Kinds of the services this one must be connected to before it can
    /// start.
    fn services_to_connect_to(&self) -> Vec<ServiceKind> {
        Vec::new()
    }

    /// Hands over a live reference to one satisfied dependency.
    fn connect_to(&self, _dependency: Arc<dyn KernelService>) {}

    fn is_connected_to_all_dependencies(&self) -> bool {
        true
    }

    fn start_service(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop_service(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once every installed service has been started.
    fn startup_complete(&self) {}
}

/// Bookkeeping for the dependencies a service declares. Services embed one of
/// these and forward the three dependency hooks to it.
pub struct Dependencies {
    wanted: Vec<ServiceKind>,
    connected: Mutex<HashMap<ServiceKind, Arc<dyn KernelService>>>,
}

impl Dependencies {
    pub fn new(wanted: impl IntoIterator<Item = ServiceKind>) -> Self {
        let mut kinds = Vec::new();
        for kind in wanted {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Self {
            wanted: kinds,
            connected: Mutex::new(HashMap::new()),
        }
    }

    pub fn none() -> Self {
        Self::new([])
    }

    pub fn kinds(&self) -> Vec<ServiceKind> {
        self.wanted.clone()
    }

    /// Stores the dependency if it is one of the wanted kinds.
    pub fn connect(&self, dependency: Arc<dyn KernelService>) {
        let kind = ServiceKind::of_service(&*dependency);
        if !self.wanted.contains(&kind) {
            log::warn!("ignoring connection to unrequested service {kind}");
            return;
        }
        self.lock().insert(kind, dependency);
    }

    pub fn is_complete(&self) -> bool {
        let connected = self.lock();
        self.wanted.iter().all(|kind| connected.contains_key(kind))
    }

    pub fn get<T: KernelService>(&self) -> Option<Arc<T>> {
        let service = self.lock().get(&ServiceKind::of::<T>())?.clone();
        service.into_any().downcast::<T>().ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ServiceKind, Arc<dyn KernelService>>> {
        self.connected.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("wanted", &self.wanted)
            .field("connected", &self.lock().len())
            .finish()
    }
}
