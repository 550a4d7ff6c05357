//! Connection configuration.
//!
//! Turns the connection settings shared by the trigger and the activity into
//! [`ClientOptions`], the configuration a [`ClientFactory`] instantiates a
//! broker client from. Building options is pure: nothing is connected and no
//! store is opened here.
//!
//! [`ClientFactory`]: crate::client::ClientFactory

use crate::error::{MqttError, Result};
use crate::store::Persistence;
use conduit_core::coerce::{self, Attrs};
use std::fmt;
use std::time::Duration;
use url::{Host, Url};

/// Default port for plain TCP brokers.
pub const DEFAULT_PORT: u16 = 1883;

/// Default port for TLS brokers.
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Keep-alive interval used for every client.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Time allowed for the initial network connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix of generated client ids.
pub const CLIENT_ID_PREFIX: &str = "conduit_";

/// Settings needed to reach a broker, shared by every session derived from
/// one trigger or activity configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Broker endpoint, e.g. `tcp://localhost:1883`.
    pub broker: String,

    /// Client id. Empty ids are replaced by a generated one.
    pub client_id: String,

    /// Username, empty for anonymous access.
    pub username: String,

    /// Password.
    pub password: String,

    /// Message-id tracking.
    pub persistence: Persistence,

    /// Clean session flag.
    pub clean_session: bool,
}

impl ConnectionSettings {
    /// Read connection settings from a settings map.
    ///
    /// Reads `broker`, `id`, `user`, `password`, `store` and `cleansess`.
    /// A `cleansess` value that is not a boolean is a configuration error;
    /// no default is substituted.
    pub fn from_settings(settings: &Attrs) -> Result<Self> {
        let broker = coerce::get_string(settings, "broker")?;
        if broker.trim().is_empty() {
            return Err(MqttError::Config("broker must not be empty".into()));
        }

        let clean_session = coerce::get_bool(settings, "cleansess", false).map_err(|e| {
            MqttError::Config(format!("Error converting \"cleansess\" to a boolean: {}", e))
        })?;

        Ok(Self {
            broker,
            client_id: coerce::get_string(settings, "id")?,
            username: coerce::get_string(settings, "user")?,
            password: coerce::get_string(settings, "password")?,
            persistence: Persistence::from_setting(&coerce::get_string(settings, "store")?),
            clean_session,
        })
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("broker", &self.broker)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("persistence", &self.persistence)
            .field("clean_session", &self.clean_session)
            .finish_non_exhaustive()
    }
}

/// Network transport of a broker endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Tls,
}

/// Parsed broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Parse a broker endpoint.
    ///
    /// Accepts `tcp://`, `mqtt://`, `ssl://`, `tls://` and `mqtts://` URLs
    /// as well as a bare `host[:port]`.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(MqttError::Config("broker must not be empty".into()));
        }

        let url = if endpoint.contains("://") {
            Url::parse(endpoint)
        } else {
            Url::parse(&format!("tcp://{}", endpoint))
        }
        .map_err(|e| MqttError::Config(format!("Invalid broker '{}': {}", endpoint, e)))?;

        let transport = match url.scheme() {
            "tcp" | "mqtt" => Transport::Tcp,
            "ssl" | "tls" | "mqtts" => Transport::Tls,
            other => {
                return Err(MqttError::Config(format!(
                    "Unsupported broker scheme '{}' in '{}'",
                    other, endpoint
                )));
            }
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => {
                return Err(MqttError::Config(format!(
                    "Broker '{}' has no host",
                    endpoint
                )));
            }
        };

        let port = url.port().unwrap_or(match transport {
            Transport::Tcp => DEFAULT_PORT,
            Transport::Tls => DEFAULT_TLS_PORT,
        });

        Ok(Self {
            transport,
            host,
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.transport {
            Transport::Tcp => "tcp",
            Transport::Tls => "ssl",
        };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Username and password sent on connect.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Configuration a broker client is instantiated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub broker: BrokerAddress,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub clean_session: bool,
    pub persistence: Persistence,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl ClientOptions {
    /// Build client options from connection settings.
    pub fn new(settings: &ConnectionSettings) -> Result<Self> {
        let broker = BrokerAddress::parse(&settings.broker)?;

        let client_id = if settings.client_id.trim().is_empty() {
            format!("{}{}", CLIENT_ID_PREFIX, uuid::Uuid::new_v4().simple())
        } else {
            settings.client_id.clone()
        };

        let credentials = (!settings.username.is_empty()).then(|| Credentials {
            username: settings.username.clone(),
            password: settings.password.clone(),
        });

        Ok(Self {
            broker,
            client_id,
            credentials,
            clean_session: settings.clean_session,
            persistence: settings.persistence.clone(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Read connection settings from a settings map and build options.
    pub fn from_settings(settings: &Attrs) -> Result<Self> {
        Self::new(&ConnectionSettings::from_settings(settings)?)
    }
}
