//! Persisted record formats and their validation boundary.
//!
//! Records are plain JSON under fixed keys. Nothing read from the store is
//! trusted: every decode returns either a validated domain value or a
//! [`RecordError`] naming why the record was rejected.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use strongbox_common::{Error, Result};
use strongbox_crypto::{Envelope, KdfParams, Salt, NONCE_SIZE, TAG_SIZE};

/// Current metadata format version.
pub const FORMAT_VERSION: u32 = 1;

/// Why a persisted record could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// No value stored under the key.
    #[error("record is missing")]
    Missing,
    /// The store failed to return the value.
    #[error("record could not be read: {0}")]
    Unreadable(String),
    /// The value is not valid JSON for the record type.
    #[error("record could not be parsed: {0}")]
    Unparsable(String),
    /// The value parsed but violates a record invariant.
    #[error("record has an invalid shape: {0}")]
    InvalidShape(String),
}

impl From<RecordError> for Error {
    fn from(err: RecordError) -> Self {
        Error::MalformedRecord(err.to_string())
    }
}

/// Key-derivation parameters of a vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultMeta {
    /// Random salt mixed into derivation.
    pub salt: Salt,
    /// Argon2id costs; `params.iterations` is the persisted work factor.
    pub params: KdfParams,
    /// Metadata format version.
    pub version: u32,
}

impl VaultMeta {
    /// Metadata for a freshly bootstrapped vault.
    pub fn new(salt: Salt, params: KdfParams) -> Self {
        Self {
            salt,
            params,
            version: FORMAT_VERSION,
        }
    }

    /// Argon2id iteration count.
    pub fn iterations(&self) -> u32 {
        self.params.iterations
    }
}

/// The current vault contents: metadata plus encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultRecord {
    pub meta: VaultMeta,
    pub cipher: Envelope,
}

/// A frozen, independently encrypted copy of the vault payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub payload: Envelope,
    /// Metadata in force at capture time. `None` only for entries written
    /// before metadata was recorded alongside snapshots.
    pub meta: Option<VaultMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaWire {
    salt: String,
    iterations: u32,
    ver: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    memory_cost: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parallelism: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeWire {
    iv: String,
    ct: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotWire {
    id: String,
    name: String,
    created_at: i64,
    payload: EnvelopeWire,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<MetaWire>,
}

impl From<&VaultMeta> for MetaWire {
    fn from(meta: &VaultMeta) -> Self {
        Self {
            salt: STANDARD.encode(meta.salt.as_bytes()),
            iterations: meta.params.iterations,
            ver: meta.version,
            memory_cost: Some(meta.params.memory_cost),
            parallelism: Some(meta.params.parallelism),
        }
    }
}

impl From<&Envelope> for EnvelopeWire {
    fn from(envelope: &Envelope) -> Self {
        Self {
            iv: STANDARD.encode(&envelope.iv),
            ct: STANDARD.encode(&envelope.ciphertext),
        }
    }
}

impl From<&Snapshot> for SnapshotWire {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            created_at: snapshot.created_at.timestamp_millis(),
            payload: EnvelopeWire::from(&snapshot.payload),
            meta: snapshot.meta.as_ref().map(MetaWire::from),
        }
    }
}

fn decode_b64(field: &str, value: &str) -> std::result::Result<Vec<u8>, RecordError> {
    STANDARD
        .decode(value)
        .map_err(|e| RecordError::InvalidShape(format!("{} is not base64: {}", field, e)))
}

impl TryFrom<MetaWire> for VaultMeta {
    type Error = RecordError;

    fn try_from(wire: MetaWire) -> std::result::Result<Self, RecordError> {
        if wire.ver != FORMAT_VERSION {
            return Err(RecordError::InvalidShape(format!(
                "unsupported metadata version {}",
                wire.ver
            )));
        }

        let salt = Salt::from_bytes(decode_b64("salt", &wire.salt)?)
            .map_err(|e| RecordError::InvalidShape(e.to_string()))?;

        // Records without explicit costs were written with the default preset.
        let defaults = KdfParams::default();
        let params = KdfParams::new(
            wire.iterations,
            wire.memory_cost.unwrap_or(defaults.memory_cost),
            wire.parallelism.unwrap_or(defaults.parallelism),
        );
        params
            .validate()
            .map_err(|e| RecordError::InvalidShape(e.to_string()))?;

        Ok(VaultMeta {
            salt,
            params,
            version: wire.ver,
        })
    }
}

impl TryFrom<EnvelopeWire> for Envelope {
    type Error = RecordError;

    fn try_from(wire: EnvelopeWire) -> std::result::Result<Self, RecordError> {
        let iv = decode_b64("iv", &wire.iv)?;
        if iv.len() != NONCE_SIZE {
            return Err(RecordError::InvalidShape(format!(
                "iv must be {} bytes, got {}",
                NONCE_SIZE,
                iv.len()
            )));
        }

        let ciphertext = decode_b64("ct", &wire.ct)?;
        if ciphertext.len() < TAG_SIZE {
            return Err(RecordError::InvalidShape(
                "ciphertext shorter than authentication tag".to_string(),
            ));
        }

        Ok(Envelope::new(iv, ciphertext))
    }
}

impl TryFrom<SnapshotWire> for Snapshot {
    type Error = RecordError;

    fn try_from(wire: SnapshotWire) -> std::result::Result<Self, RecordError> {
        if wire.id.is_empty() {
            return Err(RecordError::InvalidShape("snapshot id is empty".to_string()));
        }
        let created_at = DateTime::<Utc>::from_timestamp_millis(wire.created_at).ok_or_else(
            || RecordError::InvalidShape(format!("createdAt out of range: {}", wire.created_at)),
        )?;

        Ok(Snapshot {
            id: wire.id,
            name: wire.name,
            created_at,
            payload: Envelope::try_from(wire.payload)?,
            meta: wire.meta.map(VaultMeta::try_from).transpose()?,
        })
    }
}

fn parse<T: serde::de::DeserializeOwned>(raw: &str) -> std::result::Result<T, RecordError> {
    serde_json::from_str(raw).map_err(|e| RecordError::Unparsable(e.to_string()))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode and validate a metadata record.
pub fn decode_meta(raw: &str) -> std::result::Result<VaultMeta, RecordError> {
    VaultMeta::try_from(parse::<MetaWire>(raw)?)
}

/// Encode a metadata record.
pub fn encode_meta(meta: &VaultMeta) -> Result<String> {
    to_json(&MetaWire::from(meta))
}

/// Decode and validate an envelope record.
pub fn decode_envelope(raw: &str) -> std::result::Result<Envelope, RecordError> {
    Envelope::try_from(parse::<EnvelopeWire>(raw)?)
}

/// Encode an envelope record.
pub fn encode_envelope(envelope: &Envelope) -> Result<String> {
    to_json(&EnvelopeWire::from(envelope))
}

/// Decode a snapshot list.
///
/// The list itself must be a JSON array. Entries that fail validation are
/// dropped individually and reported alongside the valid ones.
pub fn decode_snapshot_list(
    raw: &str,
) -> std::result::Result<(Vec<Snapshot>, Vec<RecordError>), RecordError> {
    let entries: Vec<serde_json::Value> = parse(raw)?;

    let mut snapshots = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    for entry in entries {
        let decoded = serde_json::from_value::<SnapshotWire>(entry)
            .map_err(|e| RecordError::Unparsable(e.to_string()))
            .and_then(Snapshot::try_from);
        match decoded {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(reason) => rejected.push(reason),
        }
    }

    Ok((snapshots, rejected))
}

/// Encode a snapshot list in the given order.
pub fn encode_snapshot_list(snapshots: &[Snapshot]) -> Result<String> {
    let wire: Vec<SnapshotWire> = snapshots.iter().map(SnapshotWire::from).collect();
    to_json(&wire)
}
