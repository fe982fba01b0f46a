//! Pure conversions from raw registry payloads to the cached forms.
//!
//! Which conversion runs is decided by the [`ResourceKind`] the watch was
//! created with, never by inspecting the payload.

mod types;
pub use types::*;


use serde_json::Map;
use tracing::warn;

use crate::constants::LOG_TARGET;

/// Converts a health list into connection endpoints.
///
/// The service address wins, the node address is the fallback; entries with
/// neither are skipped. Input order is preserved.
pub fn normalize_discovery_payload(entries: &[HealthEntry]) -> Vec<ConnectionEndpoint> {
    entries
        .iter()
        .filter_map(|entry| {
            let service = entry.service.as_ref();
            let address = service
                .and_then(|s| non_empty(s.address.as_deref()))
                .or_else(|| entry.node.as_ref().and_then(|n| non_empty(n.address.as_deref())))?;
            let port = service
                .and_then(|s| s.port.as_ref())
                .map(|p| p.to_string())
                .unwrap_or_default();

            Some(ConnectionEndpoint::new(address, port))
        })
        .collect()
}

/// Flattens a KV record, lower-casing the first character of every key.
///
/// A missing record normalizes to an empty one whose `value` is `None`.
pub fn normalize_kv_payload(record: Option<RawKvRecord>) -> NormalizedKvRecord {
    let Some(record) = record else {
        return NormalizedKvRecord::default();
    };

    let extra: Map<_, _> = record
        .extra
        .into_iter()
        .map(|(key, value)| (lower_first(&key), value))
        .collect();

    NormalizedKvRecord {
        create_index: record.create_index,
        modify_index: record.modify_index,
        lock_index: record.lock_index,
        key: record.key,
        flags: record.flags,
        value: record.value,
        extra,
    }
}

/// Normalizes a payload for a resource of `kind`.
///
/// A payload of the wrong shape yields empty data, which the watch policy
/// treats as an invalid update.
pub fn normalize_payload(
    kind: ResourceKind,
    payload: RawPayload,
) -> ResourceData {
    match (kind, payload) {
        (ResourceKind::Discovery, RawPayload::Discovery(entries)) => {
            ResourceData::Discovery(normalize_discovery_payload(&entries))
        }
        (ResourceKind::Kv, RawPayload::Kv(record)) => ResourceData::Kv(normalize_kv_payload(record)),
        (kind, payload) => {
            warn!(
                target: LOG_TARGET,
                %kind,
                payload_kind = %payload.kind(),
                "payload does not match the watched resource kind"
            );
            ResourceData::empty(kind)
        }
    }
}

pub(crate) fn lower_first(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
