use std::env;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{RelayError, Result};
use crate::relay::{AdmissionPolicy, OneSeatPerRole, OpenAdmission, Registry};

pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionMode {
    Open,
    OneSeatPerRole,
}

pub struct RelayConfig {
    pub admission: AdmissionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

pub struct LoggingConfig {
    pub format: LogFormat,
}

impl AdmissionMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(AdmissionMode::Open),
            "one-seat-per-role" => Some(AdmissionMode::OneSeatPerRole),
            _ => None,
        }
    }

    pub fn policy(&self) -> Box<dyn AdmissionPolicy> {
        match self {
            AdmissionMode::Open => Box::new(OpenAdmission),
            AdmissionMode::OneSeatPerRole => Box::new(OneSeatPerRole),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unrecognized values are errors.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = lookup("SERVER_PORT").unwrap_or_else(|| "8080".to_string());
        let port = port
            .parse()
            .map_err(|_| RelayError::InvalidConfiguration(format!("Invalid SERVER_PORT '{}'", port)))?;

        let admission = match lookup("RELAY_ADMISSION") {
            Some(value) => AdmissionMode::parse(&value).ok_or_else(|| {
                RelayError::InvalidConfiguration(format!(
                    "Invalid RELAY_ADMISSION '{}' (expected open or one-seat-per-role)",
                    value
                ))
            })?,
            None => AdmissionMode::Open,
        };

        let format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(RelayError::InvalidConfiguration(format!(
                    "Invalid LOG_FORMAT '{}' (expected pretty or json)",
                    other
                )))
            }
        };

        Ok(Self {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port,
            },
            relay: RelayConfig { admission },
            logging: LoggingConfig { format },
        })
    }

    /// A fresh registry carrying the configured admission policy
    pub fn registry(&self) -> Registry {
        Registry::with_policy(self.relay.admission.policy())
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}
