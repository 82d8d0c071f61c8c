//! Instrument address table.
//!
//! Each instrument server listens on a fixed port on one of the rig's
//! hosts. Hosts are named by alias; the `Local` alias targets servers on
//! this machine, which listen 1000 ports above the rig's.

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Alias used when none is given.
pub const DEFAULT_ALIAS: &str = "Analysis";

/// Port offset of locally run servers.
pub const LOCAL_PORT_OFFSET: u16 = 1000;

const ALIASES: &[(&str, &str)] = &[
    ("CHESS", "128.84.183.184"),
    ("LSA", "128.253.129.74"),
    ("Analysis", "128.253.129.71"),
    ("Local", "localhost"),
];

/// Instrument server roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Camera,
    Focus,
    Lasgo,
    LasgoText,
    Spec,
}

impl Role {
    pub fn default_port(self) -> u16 {
        match self {
            Role::Camera => 1916,
            Role::Focus => 1911,
            Role::Lasgo => 1901,
            Role::LasgoText => 1902,
            Role::Spec => 1920,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Camera => "camera",
            Role::Focus => "focus",
            Role::Lasgo => "lasgo",
            Role::LasgoText => "lasgo_txt",
            Role::Spec => "spec",
        }
    }
}

impl FromStr for Role {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "camera" => Ok(Role::Camera),
            "focus" => Ok(Role::Focus),
            "lasgo" => Ok(Role::Lasgo),
            "lasgo_txt" => Ok(Role::LasgoText),
            "spec" => Ok(Role::Spec),
            other => Err(ClientError::InvalidArgument(format!("unknown role '{}'", other))),
        }
    }
}

/// A resolved host and port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolves a role on a host alias. Unknown aliases are used as host
    /// names.
    pub fn for_role(role: Role, alias: &str) -> Self {
        let port = if alias == "Local" {
            role.default_port() + LOCAL_PORT_OFFSET
        } else {
            role.default_port()
        };
        Self::new(host_for(alias), port)
    }

    /// Resolves a service given either as a role name or a port number.
    pub fn resolve(alias: &str, service: &str) -> Result<Self, ClientError> {
        if let Ok(role) = service.parse::<Role>() {
            return Ok(Self::for_role(role, alias));
        }
        let port = service.parse::<u16>().map_err(|_| {
            ClientError::InvalidArgument(format!(
                "'{}' is neither an instrument role nor a port",
                service
            ))
        })?;
        Ok(Self::new(host_for(alias), port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn host_for(alias: &str) -> String {
    ALIASES
        .iter()
        .find(|(name, _)| *name == alias)
        .map(|(_, host)| host.to_string())
        .unwrap_or_else(|| alias.to_string())
}
