//! Versioned on-disk envelope.
//!
//! ```json
//! { "version": "1.0", "updated": "<RFC 3339>", "<payload key>": { ... } }
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use xref_error::{Result, XrefError};
use xref_types::{CounterTable, MappingTable};

/// Envelope schema version written and accepted by this provider.
pub const SCHEMA_VERSION: &str = "1.0";

const VERSION_KEY: &str = "version";
const UPDATED_KEY: &str = "updated";

/// Which of the two tables a document holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Mappings,
    Counters,
}

impl TableKind {
    /// Envelope key holding the payload.
    #[must_use]
    pub const fn payload_key(self) -> &'static str {
        match self {
            Self::Mappings => "mappings",
            Self::Counters => "counters",
        }
    }

    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Mappings => crate::file_store::MAPPING_FILE,
            Self::Counters => crate::file_store::COUNTER_FILE,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.payload_key()
    }
}

/// A table payload that can be stored inside the envelope.
pub trait TablePayload: Serialize + DeserializeOwned + Default + Send {
    const TABLE: TableKind;
}

impl TablePayload for MappingTable {
    const TABLE: TableKind = TableKind::Mappings;
}

impl TablePayload for CounterTable {
    const TABLE: TableKind = TableKind::Counters;
}

/// A decoded document: envelope metadata plus the typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedState<P> {
    pub version: String,
    pub updated: String,
    pub payload: P,
}

impl<P: TablePayload> PersistedState<P> {
    /// Parse and validate a document.
    ///
    /// Errors carry a human-readable reason; the caller attaches the path.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|err| format!("not valid JSON: {err}"))?;
        let Value::Object(mut object) = value else {
            return Err("top-level value is not an object".to_owned());
        };

        let payload_key = P::TABLE.payload_key();
        for key in [VERSION_KEY, UPDATED_KEY, payload_key] {
            if !object.contains_key(key) {
                return Err(format!("missing required key '{key}'"));
            }
        }

        let version = take_string(&mut object, VERSION_KEY)?;
        if version != SCHEMA_VERSION {
            return Err(format!(
                "unsupported schema version '{version}', expected '{SCHEMA_VERSION}'"
            ));
        }
        let updated = take_string(&mut object, UPDATED_KEY)?;

        let raw_payload = object.remove(payload_key).unwrap_or(Value::Null);
        let payload = serde_json::from_value(raw_payload)
            .map_err(|err| format!("invalid '{payload_key}' payload: {err}"))?;

        Ok(Self {
            version,
            updated,
            payload,
        })
    }
}

/// Encode `payload` inside an envelope stamped with `updated`.
pub(crate) fn encode_document<P: TablePayload>(payload: &P, updated: &str) -> Result<Vec<u8>> {
    let mut object = Map::new();
    object.insert(VERSION_KEY.to_owned(), Value::from(SCHEMA_VERSION));
    object.insert(UPDATED_KEY.to_owned(), Value::from(updated));
    object.insert(
        P::TABLE.payload_key().to_owned(),
        serde_json::to_value(payload)?,
    );
    let mut bytes = serde_json::to_vec_pretty(&Value::Object(object))?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub(crate) fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|err| XrefError::internal(format!("failed to format timestamp: {err}")))
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> std::result::Result<String, String> {
    match object.remove(key) {
        Some(Value::String(value)) => Ok(value),
        Some(other) => Err(format!("'{key}' must be a string, found {other}")),
        None => Err(format!("missing required key '{key}'")),
    }
}
