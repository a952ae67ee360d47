use thiserror::Error;

use crate::kernel::KernelState;
use crate::service::ServiceKind;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("a service of type '{0}' is already installed")]
    ServiceTypeAlreadyInstalled(ServiceKind),
    #[error("service '{0}' cannot depend on itself")]
    ServiceCannotDependOnItself(ServiceKind),
    #[error("service '{0}' cannot depend on the generic kernel service type")]
    ServiceCannotDependOnGenericKernelService(ServiceKind),
    #[error("kernel is {0:?} and cannot install services")]
    NotInInstallReadyState(KernelState),
    #[error("kernel is {0:?} and cannot start services")]
    NotInStartReadyState(KernelState),
    #[error("service '{0}' is not connected to all of its dependencies")]
    MissingDependency(ServiceKind),
    #[error("dependency cycle between services: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
    #[error("service '{service}' failed to start: {source}")]
    ServiceStartFailed {
        service: ServiceKind,
        #[source]
        source: anyhow::Error,
    },
}
