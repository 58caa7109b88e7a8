//! Browser fingerprint derivation.
//!
//! The fingerprint is a 32-bit rolling hash of the device signature rendered
//! in base 36. It clusters likely-same-device visits and nothing more: the
//! output space is tiny compared to the input entropy, collisions are
//! expected, and it must never be used for security decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::environment::Environment;
use crate::probe::{DeviceProbe, DeviceSignature};

/// Opaque hash of a [`DeviceSignature`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_signature(signature: &DeviceSignature) -> Self {
        Fingerprint(to_base36(rolling_hash(&signature.joined()).unsigned_abs() as u64))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct FingerprintGenerator;

impl FingerprintGenerator {
    /// Recomputed on every call; there is no cached state.
    pub fn generate(env: &dyn Environment) -> Fingerprint {
        let fingerprint = Fingerprint::from_signature(&DeviceProbe::signature(env));
        tracing::debug!(fingerprint = %fingerprint, "generated fingerprint");
        fingerprint
    }
}

/// `h = (h << 5) - h + unit` over UTF-16 code units, wrapped to i32 after
/// every step.
pub fn rolling_hash(input: &str) -> i32 {
    input.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    })
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
