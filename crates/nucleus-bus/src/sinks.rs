//! Receivers that processors hand decoded information to.

use crate::config::ChannelType;
use crate::endpoint::EndpointId;
use crate::error::BusError;
use crate::message::{SerializedEventRegistration, SerializedType};

/// Learns about command or notification sets that remote endpoints made
/// available after discovery.
pub trait ReportNewProxies: Send + Sync {
    fn recently_registered_proxy(&self, endpoint: &EndpointId, proxy_type: SerializedType);
}

pub trait TrackConnectedEndpoints: Send + Sync {
    fn recently_connected_endpoint(&self, endpoint: &EndpointId, channel: ChannelType, address: &str);

    fn recently_disconnected_endpoint(&self, _endpoint: &EndpointId) {}
}

/// Local side of notification delivery: remote endpoints subscribe here.
pub trait SendNotifications: Send + Sync {
    fn register_for_notification(
        &self,
        endpoint: &EndpointId,
        registration: &SerializedEventRegistration,
    ) -> Result<(), BusError>;

    fn unregister_from_notification(
        &self,
        endpoint: &EndpointId,
        registration: &SerializedEventRegistration,
    );
}

/// Caller side of notification delivery: events raised by remote endpoints
/// arrive here.
pub trait ReceiveNotifications: Send + Sync {
    fn notification_raised(
        &self,
        endpoint: &EndpointId,
        registration: &SerializedEventRegistration,
        arguments: &[u8],
    );
}
