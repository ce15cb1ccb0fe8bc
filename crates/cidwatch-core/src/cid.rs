//! Content identifiers.
//!
//! A `Cid` is kept in its canonical string form: CIDv0 stays base58btc,
//! CIDv1 in any accepted multibase is re-encoded as lowercase base32. The
//! multihash itself is not interpreted. Two CIDs are equal when their
//! canonical strings are, and the canonical string is safe to use as a
//! file name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const BASE58BTC: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BASE32_LOWER: &str = "abcdefghijklmnopqrstuvwxyz234567";
const BASE36_LOWER: &str = "0123456789abcdefghijklmnopqrstuvwxyz";
const BASE16_LOWER: &str = "0123456789abcdef";
const BASE64_STD: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const BASE64_URL: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Length of every CIDv0 (sha2-256 multihash in base58btc).
pub const CID_V0_LEN: usize = 46;

/// Shortest CIDv1 body (after the multibase prefix) we accept.
const MIN_V1_BODY_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CidVersion {
    V0,
    V1,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(String);

impl Cid {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn version(&self) -> CidVersion {
        if self.0.len() == CID_V0_LEN && self.0.starts_with("Qm") {
            CidVersion::V0
        } else {
            CidVersion::V1
        }
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl FromStr for Cid {
    type Err = CidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(CidError::Empty);
        }

        if s.len() == CID_V0_LEN && s.starts_with("Qm") {
            check_alphabet(s, BASE58BTC)?;
            return Ok(Cid(s.to_string()));
        }

        let mut chars = s.chars();
        let prefix = chars.next().ok_or(CidError::Empty)?;
        let body = chars.as_str();

        // (alphabet, case-insensitive encoding)
        let (alphabet, fold_case) = match prefix {
            'b' => (BASE32_LOWER, false),
            'B' => (BASE32_LOWER, true),
            'z' => (BASE58BTC, false),
            'f' => (BASE16_LOWER, false),
            'F' => (BASE16_LOWER, true),
            'k' => (BASE36_LOWER, false),
            'K' => (BASE36_LOWER, true),
            'm' => (BASE64_STD, false),
            'u' => (BASE64_URL, false),
            other => return Err(CidError::UnknownMultibase(other)),
        };

        if body.len() < MIN_V1_BODY_LEN {
            return Err(CidError::InvalidLength(s.len()));
        }

        let body = if fold_case {
            if body.chars().any(|c| c.is_ascii_lowercase()) {
                return Err(CidError::MixedCase);
            }
            body.to_ascii_lowercase()
        } else {
            body.to_string()
        };
        check_alphabet(&body, alphabet)?;

        if alphabet == BASE32_LOWER {
            return Ok(Cid(format!("b{body}")));
        }
        let bytes = decode_body(&body, alphabet).ok_or(CidError::PartialByte)?;
        Ok(Cid(format!("b{}", encode_base32(&bytes))))
    }
}

fn check_alphabet(s: &str, alphabet: &str) -> Result<(), CidError> {
    match s.chars().find(|c| !alphabet.contains(*c)) {
        Some(c) => Err(CidError::InvalidCharacter(c)),
        None => Ok(()),
    }
}

// ── Multibase ─────────────────────────────────────────────────────────────────

/// Raw bytes of an already-validated body. `None` when a power-of-two
/// encoding leaves a whole unused character at the end.
fn decode_body(body: &str, alphabet: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = body
        .chars()
        .filter_map(|c| alphabet.find(c).map(|i| i as u8))
        .collect();
    match alphabet.len() {
        16 => unpack_bits(&digits, 4),
        32 => unpack_bits(&digits, 5),
        64 => unpack_bits(&digits, 6),
        radix => Some(unpack_radix(&digits, radix as u32)),
    }
}

fn unpack_bits(digits: &[u8], bits: u32) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(digits.len() * bits as usize / 8);
    let mut acc: u32 = 0;
    let mut held = 0;
    for &d in digits {
        acc = (acc << bits) | u32::from(d);
        held += bits;
        if held >= 8 {
            held -= 8;
            out.push((acc >> held) as u8);
            acc &= (1 << held) - 1;
        }
    }
    (held < bits).then_some(out)
}

/// Base58 and base36: big-number conversion, leading zero digits become
/// leading zero bytes.
fn unpack_radix(digits: &[u8], radix: u32) -> Vec<u8> {
    let zeros = digits.iter().take_while(|&&d| d == 0).count();
    // little-endian base 256
    let mut num: Vec<u8> = Vec::new();
    for &d in &digits[zeros..] {
        let mut carry = u32::from(d);
        for byte in num.iter_mut() {
            carry += u32::from(*byte) * radix;
            *byte = carry as u8;
            carry >>= 8;
        }
        while carry > 0 {
            num.push(carry as u8);
            carry >>= 8;
        }
    }
    let mut out = vec![0u8; zeros];
    out.extend(num.iter().rev());
    out
}

fn encode_base32(bytes: &[u8]) -> String {
    let alphabet = BASE32_LOWER.as_bytes();
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut acc: u32 = 0;
    let mut held = 0;
    for &b in bytes {
        acc = (acc << 8) | u32::from(b);
        held += 8;
        while held >= 5 {
            held -= 5;
            out.push(alphabet[((acc >> held) & 31) as usize] as char);
        }
        acc &= (1 << held) - 1;
    }
    if held > 0 {
        out.push(alphabet[((acc << (5 - held)) & 31) as usize] as char);
    }
    out
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Cid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── Serde ─────────────────────────────────────────────────────────────────────

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// The exporter emits CIDs as IPLD links (`{"/": "<cid>"}`). Bare strings
/// are accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum CidRepr {
    Link {
        #[serde(rename = "/")]
        link: String,
    },
    Plain(String),
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = match CidRepr::deserialize(deserializer)? {
            CidRepr::Link { link } => link,
            CidRepr::Plain(s) => s,
        };
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CidError {
    #[error("empty CID")]
    Empty,

    #[error("unknown multibase prefix '{0}'")]
    UnknownMultibase(char),

    #[error("invalid character '{0}' for CID encoding")]
    InvalidCharacter(char),

    #[error("CID of length {0} is too short")]
    InvalidLength(usize),

    #[error("mixed-case CID in a case-insensitive encoding")]
    MixedCase,

    #[error("CID body does not decode to whole bytes")]
    PartialByte,
}
