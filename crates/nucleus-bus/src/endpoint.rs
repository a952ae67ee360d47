use nucleus_types::{Id, IdTag};

pub struct EndpointTag;

impl IdTag for EndpointTag {
    const NAME: &'static str = "EndpointId";
}

/// Address of one communicating process instance.
pub type EndpointId = Id<EndpointTag, String>;

/// Sentinel that never names a real endpoint.
pub const NOBODY: EndpointId = Id::new(String::new());

pub fn endpoint_id(name: impl Into<String>) -> EndpointId {
    EndpointId::new(name.into())
}

/// Id for an endpoint hosted by the current process.
pub fn process_endpoint_id(name: &str) -> EndpointId {
    EndpointId::new(format!("{name}:{}", std::process::id()))
}
