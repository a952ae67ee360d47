use std::sync::Arc;

use anyhow::Context;
use nucleus_kernel::KernelService;

use crate::bus::EndpointBus;
use crate::endpoint::EndpointId;
use crate::transport::CommunicationChannel;

/// Kernel service that puts an [`EndpointBus`] on a channel.
///
/// Starting opens the channel and announces this endpoint to the configured
/// peers; stopping signs off from every known endpoint and closes the
/// channel. Services that offer or use commands depend on this one and
/// reach the bus through [`CommunicationService::bus`].
pub struct CommunicationService {
    bus: Arc<EndpointBus>,
    channel: Arc<dyn CommunicationChannel>,
    peers: Vec<EndpointId>,
}

impl CommunicationService {
    pub fn new(bus: Arc<EndpointBus>, channel: Arc<dyn CommunicationChannel>) -> Self {
        Self {
            bus,
            channel,
            peers: Vec::new(),
        }
    }

    /// Endpoints to announce this one to on start.
    pub fn with_peers(mut self, peers: impl IntoIterator<Item = EndpointId>) -> Self {
        self.peers = peers.into_iter().collect();
        self
    }

    pub fn bus(&self) -> &Arc<EndpointBus> {
        &self.bus
    }
}

impl KernelService for CommunicationService {
    fn start_service(&self) -> anyhow::Result<()> {
        let local = self.bus.local_endpoint();
        self.channel
            .open(local, self.bus.handler())
            .with_context(|| format!("opening channel for {local}"))?;
        for peer in &self.peers {
            if let Err(err) = self.bus.announce_to(peer) {
                tracing::warn!(endpoint = %peer, "peer not reachable yet: {err}");
            }
        }
        tracing::info!(endpoint = %local, peers = self.peers.len(), "communication started");
        Ok(())
    }

    fn stop_service(&self) -> anyhow::Result<()> {
        self.bus.sign_off();
        self.channel.close(self.bus.local_endpoint());
        tracing::info!(endpoint = %self.bus.local_endpoint(), "communication stopped");
        Ok(())
    }
}
