//! Service orchestration: install kernel services, wire their dependencies
//! together and drive them through start-up and shutdown in dependency order.

pub mod error;
pub mod kernel;
mod order;
pub mod service;

pub use error::KernelError;
pub use kernel::{Kernel, KernelBuilder, KernelState, ShutdownReport, StartupProgress, StopFailure};
pub use service::{AsAny, Dependencies, KernelService, ServiceKind, ServiceState};
