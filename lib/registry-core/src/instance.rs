//! Service instance metadata
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// One registered service endpoint.
///
/// Identity is `(scheme, host, port, context)`. `status` and `parameters`
/// can change without the instance becoming a different one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceMeta {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub context: String,
    /// Online (`true`) or offline (`false`)
    #[serde(default)]
    pub status: bool,
    /// Opaque metadata such as zone or canary flags
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl InstanceMeta {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        context: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            context: context.into(),
            status: false,
            parameters: HashMap::new(),
        }
    }

    /// Plain HTTP instance under the default `rpcman` context
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self::new("http", host, port, "rpcman")
    }

    /// Full URL, `scheme://host:port/context`
    pub fn to_url(&self) -> String {
        format!("{}://{}:{}/{}", self.scheme, self.host, self.port, self.context)
    }

    /// Rebuild an instance from a URL produced by [`InstanceMeta::to_url`].
    pub fn from_url(url: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidInstanceUrl(url.to_string());

        let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
        if scheme.is_empty() {
            return Err(invalid());
        }

        let (authority, context) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash + 1..]),
            None => (rest, ""),
        };

        let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self::new(scheme, host, port, context))
    }

    fn identity(&self) -> (&str, &str, u16, &str) {
        (&self.scheme, &self.host, self.port, &self.context)
    }
}

impl PartialEq for InstanceMeta {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for InstanceMeta {}

impl Hash for InstanceMeta {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}
