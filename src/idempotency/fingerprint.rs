use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Request and response header carrying the idempotency token.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Identifies one logical attempt by a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    /// Uses the client-supplied header value when present, otherwise generates a token.
    ///
    /// A single pair of surrounding double quotes is stripped. Blank values count as absent.
    /// An empty or whitespace-only header is therefore not used as the literal token `""`;
    /// each such request gets its own generated token and is never deduplicated.
    pub fn resolve(header_value: Option<&str>) -> Self {
        match header_value {
            Some(value) if !value.trim().is_empty() => Self(unquote(value).to_string()),
            _ => Self::generate(),
        }
    }

    /// Generates a fresh random token (32 lowercase hex characters).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Stable key identifying one logical idempotent operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the fingerprint of an operation with SHA-256.
///
/// Every component is length-prefixed before hashing, so component boundaries
/// are part of the identity. Discriminator order matters: callers must pass
/// them in a stable order (tenant before resource, for example).
pub fn fingerprint<S: AsRef<str>>(
    token: &IdempotencyToken,
    path: &str,
    method: &str,
    discriminators: &[S],
) -> Fingerprint {
    let mut hasher = Sha256::new();

    update_component(&mut hasher, token.as_str());
    update_component(&mut hasher, path);
    update_component(&mut hasher, method);

    for discriminator in discriminators {
        update_component(&mut hasher, discriminator.as_ref());
    }

    Fingerprint(hex::encode(hasher.finalize()))
}

fn update_component(hasher: &mut Sha256, component: &str) {
    hasher.update((component.len() as u64).to_be_bytes());
    hasher.update(component.as_bytes());
}
