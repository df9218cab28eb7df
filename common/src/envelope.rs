//! HMAC-SHA512 authenticated envelopes.
//!
//! Every piece of state exchanged between a controller and its clients travels
//! as `{ nonce, payload, hmac }`. The tag is computed over
//! `nonce + "." + base64(canonical_json(payload))`, where the canonical form is
//! compact JSON with object keys sorted, so producer and verifier agree on the
//! bytes regardless of the field order either side serialized in.
//!
//! Tag verification and nonce freshness are separate checks. [`AuthenticatedEnvelope::validate`]
//! only checks the tag; [`AuthenticatedEnvelope::open`] checks both and is what a
//! server uses for incoming requests.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha512;
use subtle::ConstantTimeEq;

use crate::error::{AuthError, ConfigError};

type HmacSha512 = Hmac<Sha512>;

/// Length of a freshly generated key in bytes.
pub const HMAC_KEY_LEN: usize = 64;

/// Maximum deviation between a nonce and the verifier's clock.
pub const DEFAULT_NONCE_WINDOW_MS: u64 = 2_000;

/// Pre-shared symmetric key.
#[derive(Clone)]
pub struct HmacKey {
    bytes: Vec<u8>,
    mac: HmacSha512,
}

impl HmacKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ConfigError::InvalidKey {
                what: "key is empty".to_string(),
            });
        }
        let mac = HmacSha512::new_from_slice(&bytes).map_err(|err| ConfigError::InvalidKey {
            what: err.to_string(),
        })?;
        Ok(Self { bytes, mac })
    }

    pub fn from_base64(encoded: &str) -> Result<Self, ConfigError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|err| ConfigError::InvalidKey {
                what: format!("not valid base64: {err}"),
            })?;
        Self::from_bytes(bytes)
    }

    /// A new random key of [`HMAC_KEY_LEN`] bytes.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; HMAC_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mac = HmacSha512::new_from_slice(&bytes)
            .unwrap_or_else(|_| unreachable!("hmac accepts keys of any length"));
        Self { bytes, mac }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for HmacKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for HmacKey {}

impl fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacKey")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Text encoding of the tag on the wire. Producer and verifier must agree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagEncoding {
    #[default]
    Base64,
    Hex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedEnvelope {
    pub nonce: String,
    pub payload: Value,
    pub hmac: String,
}

impl AuthenticatedEnvelope {
    /// Wraps `payload`, using the current time in milliseconds as nonce when none is given.
    pub fn produce<T>(
        key: &HmacKey,
        payload: &T,
        nonce: Option<String>,
    ) -> Result<Self, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        Self::produce_with(key, payload, nonce, TagEncoding::default())
    }

    pub fn produce_with<T>(
        key: &HmacKey,
        payload: &T,
        nonce: Option<String>,
        encoding: TagEncoding,
    ) -> Result<Self, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        let nonce = nonce.unwrap_or_else(|| now_ms().to_string());
        let hmac = compute_tag(key, &nonce, &payload, encoding);
        Ok(Self {
            nonce,
            payload,
            hmac,
        })
    }

    /// Parses an envelope from a request or response body.
    pub fn from_slice(raw: &[u8]) -> Result<Self, AuthError> {
        serde_json::from_slice(raw).map_err(|err| AuthError::MalformedEnvelope {
            what: err.to_string(),
        })
    }

    pub fn validate(&self, key: &HmacKey) -> bool {
        self.validate_with(key, TagEncoding::default())
    }

    pub fn validate_with(&self, key: &HmacKey, encoding: TagEncoding) -> bool {
        let expected = compute_tag(key, &self.nonce, &self.payload, encoding);
        expected.as_bytes().ct_eq(self.hmac.as_bytes()).into()
    }

    /// Rejects the envelope if its nonce is not a timestamp within `window_ms` of `now_ms`.
    pub fn check_freshness(&self, now_ms: i64, window_ms: u64) -> Result<(), AuthError> {
        let Ok(issued_ms) = self.nonce.parse::<i64>() else {
            return Err(AuthError::MalformedNonce {
                nonce: self.nonce.clone(),
            });
        };

        let deviation_ms = now_ms.abs_diff(issued_ms);
        if deviation_ms > window_ms {
            return Err(AuthError::StaleNonce {
                nonce: self.nonce.clone(),
                deviation_ms,
                window_ms,
            });
        }
        Ok(())
    }

    /// Freshness first, then the tag. Returns the payload only if both pass.
    pub fn open(
        &self,
        key: &HmacKey,
        encoding: TagEncoding,
        now_ms: i64,
        window_ms: u64,
    ) -> Result<&Value, AuthError> {
        self.check_freshness(now_ms, window_ms)?;
        if !self.validate_with(key, encoding) {
            return Err(AuthError::TagMismatch);
        }
        Ok(&self.payload)
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(name, inner)| (name.clone(), canonicalize(inner)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn tag_input(nonce: &str, payload: &Value) -> String {
    format!("{nonce}.{}", STANDARD.encode(canonical_json(payload)))
}

fn compute_tag(key: &HmacKey, nonce: &str, payload: &Value, encoding: TagEncoding) -> String {
    let mut mac = key.mac.clone();
    mac.update(tag_input(nonce, payload).as_bytes());
    let digest = mac.finalize().into_bytes();

    match encoding {
        TagEncoding::Base64 => STANDARD.encode(digest),
        TagEncoding::Hex => {
            use std::fmt::Write as _;
            let mut hex = String::with_capacity(digest.len() * 2);
            for byte in digest {
                let _ = write!(&mut hex, "{byte:02x}");
            }
            hex
        }
    }
}

/// Wall-clock milliseconds since the UNIX epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
