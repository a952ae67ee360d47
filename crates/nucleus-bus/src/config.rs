use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::endpoint::{EndpointId, process_endpoint_id};

/// Kind of channel an endpoint can be reached on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    NamedPipe,
    Tcp,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelType::NamedPipe => f.write_str("named-pipe"),
            ChannelType::Tcp => f.write_str("tcp"),
        }
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "named-pipe" | "namedpipe" | "pipe" => Ok(ChannelType::NamedPipe),
            "tcp" => Ok(ChannelType::Tcp),
            other => Err(format!("unknown channel type '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Logical name of this endpoint; the process id is appended to form the
    /// endpoint id.
    pub endpoint_name: String,
    /// Channel other endpoints use to reach this one.
    pub channel: ChannelType,
    /// Address on `channel` announced to other endpoints.
    pub address: String,
    /// Whether newly registered command and notification sets are announced
    /// to every known endpoint.
    pub announce_registrations: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint_name: "nucleus".into(),
            channel: ChannelType::NamedPipe,
            address: "nucleus".into(),
            announce_registrations: true,
        }
    }
}

impl BusConfig {
    /// Defaults overridden by `NUCLEUS_ENDPOINT_NAME`, `NUCLEUS_CHANNEL`,
    /// `NUCLEUS_ADDRESS` and `NUCLEUS_ANNOUNCE`. Unparseable values are
    /// ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = std::env::var("NUCLEUS_ENDPOINT_NAME") {
            config.endpoint_name = name;
        }
        if let Some(channel) = std::env::var("NUCLEUS_CHANNEL")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.channel = channel;
        }
        if let Ok(address) = std::env::var("NUCLEUS_ADDRESS") {
            config.address = address;
        }
        if let Ok(announce) = std::env::var("NUCLEUS_ANNOUNCE") {
            config.announce_registrations = parse_flag(&announce, config.announce_registrations);
        }
        config
    }

    pub fn with_endpoint_name(mut self, name: impl Into<String>) -> Self {
        self.endpoint_name = name.into();
        self
    }

    pub fn with_channel(mut self, channel: ChannelType, address: impl Into<String>) -> Self {
        self.channel = channel;
        self.address = address.into();
        self
    }

    pub fn with_announcements(mut self, announce: bool) -> Self {
        self.announce_registrations = announce;
        self
    }

    pub fn endpoint_id(&self) -> EndpointId {
        process_endpoint_id(&self.endpoint_name)
    }
}

fn parse_flag(value: &str, fallback: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_type_parses_common_spellings() {
        assert_eq!("tcp".parse::<ChannelType>(), Ok(ChannelType::Tcp));
        assert_eq!("Named-Pipe".parse::<ChannelType>(), Ok(ChannelType::NamedPipe));
        assert!("udp".parse::<ChannelType>().is_err());
    }

    #[test]
    fn flags_fall_back_on_garbage() {
        assert!(parse_flag("yes", false));
        assert!(!parse_flag("0", true));
        assert!(parse_flag("maybe", true));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = BusConfig::default()
            .with_endpoint_name("calc")
            .with_channel(ChannelType::Tcp, "127.0.0.1:7000")
            .with_announcements(false);
        assert_eq!(config.channel, ChannelType::Tcp);
        assert_eq!(config.address, "127.0.0.1:7000");
        assert!(!config.announce_registrations);
        assert!(config.endpoint_id().value().starts_with("calc:"));
    }
}
