use crate::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// Timeout applied to every network operation when a [`Config`] does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// RCON protocol spoken by a game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RconProtocol {
    /// TCP RCON used by Source engine servers.
    #[serde(rename = "source")]
    Source,

    /// UDP challenge-response RCON used by GoldSource (HLDS) servers.
    #[serde(rename = "goldsrc", alias = "goldsource")]
    GoldSource,
}

impl RconProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            RconProtocol::Source => "source",
            RconProtocol::GoldSource => "goldsrc",
        }
    }
}

impl Display for RconProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RconProtocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "source" => Ok(RconProtocol::Source),
            "goldsrc" | "goldsource" => Ok(RconProtocol::GoldSource),
            other => Err(ErrorKind::UnsupportedRconProtocol(other.to_string()).into()),
        }
    }
}

/// Connection settings for one RCON server.
///
/// A config is immutable once it has been handed to [`new_client`](crate::new_client) or
/// [`Pool::new`](crate::Pool::new). It can be deserialized from the panel's stored server
/// records, in which case `timeout` is given in whole seconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// `host:port` of the server's RCON endpoint.
    pub address: String,
    pub password: String,
    pub protocol: RconProtocol,
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
}

impl Config {
    pub fn new(
        address: impl Into<String>,
        password: impl Into<String>,
        protocol: RconProtocol,
    ) -> Self {
        Config {
            address: address.into(),
            password: password.into(),
            protocol,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the timeout for each dial, read and write. A zero duration selects
    /// [`DEFAULT_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The timeout to actually apply to network operations.
    pub(crate) fn effective_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        }
    }

    /// Checks that `address` looks like `host:port`, without touching the network.
    pub(crate) fn validate(&self) -> crate::Result<()> {
        let invalid = || ErrorKind::InvalidAddress(self.address.clone());

        let (host, port) = self.address.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid().into());
        }
        match port.parse::<u16>() {
            Ok(port) if port != 0 => Ok(()),
            _ => Err(invalid().into()),
        }
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("address", &self.address)
            .field("password", &"<redacted>")
            .field("protocol", &self.protocol)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
