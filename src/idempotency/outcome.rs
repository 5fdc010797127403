use crate::idempotency::fingerprint::IDEMPOTENCY_KEY_HEADER;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered header mapping carried by an outcome.
pub type Headers = IndexMap<String, String>;

/// The observable result of an operation: status, headers, and body.
///
/// This is also the cached record. Its JSON form keeps the status as an
/// integer, the headers as an ordered object, and the body as hex so that any
/// reader can rebuild the exact bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: u16,
    pub headers: Headers,
    #[serde(with = "hex::serde")]
    pub body: Vec<u8>,
}

impl Outcome {
    pub fn new(status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Outcome with no headers.
    pub fn with_status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status, Headers::new(), body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.header(IDEMPOTENCY_KEY_HEADER)
    }

    /// Sets the `Idempotency-Key` header, replacing any spelling of it already present.
    pub fn set_idempotency_key(&mut self, token: &str) {
        self.headers
            .retain(|key, _| !key.eq_ignore_ascii_case(IDEMPOTENCY_KEY_HEADER));
        self.headers
            .insert(IDEMPOTENCY_KEY_HEADER.to_string(), token.to_string());
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}
