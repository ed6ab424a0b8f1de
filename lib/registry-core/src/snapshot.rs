//! Point-in-time copy of registry state used for follower catch-up
use crate::InstanceMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// service -> instances, in registration order
    pub registry: BTreeMap<String, Vec<InstanceMeta>>,
    /// service -> version of its last change
    pub versions: BTreeMap<String, i64>,
    /// `service@instance-url` -> last renew, epoch millis
    pub timestamps: BTreeMap<String, i64>,
    /// Global registry version
    pub version: i64,
}

/// Key under which an instance's renew timestamp is stored
pub fn timestamp_key(service: &str, instance: &InstanceMeta) -> String {
    format!("{}@{}", service, instance.to_url())
}

/// Split a timestamp key at the first `@` into `(service, instance-url)`
pub fn split_timestamp_key(key: &str) -> Option<(&str, &str)> {
    match key.split_once('@') {
        Some((service, url)) if !service.is_empty() && !url.is_empty() => Some((service, url)),
        _ => None,
    }
}
