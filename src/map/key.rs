use std::fmt;

use super::MapError;

/// Maximum number of parts a composite key may have.
pub const MAX_KEY_ARITY: usize = 5;

const GOLDEN_RATIO_64: u64 = 0x61C8_8646_80B5_83EB;

/// Number of leading bytes a string key contributes to its hash.
const STR_HASH_BYTES: usize = 5;

/// Type of one key part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Int64,
    /// String stored in `max_len` bytes, one of them reserved, so at most
    /// `max_len - 1` bytes of text are kept.
    Str { max_len: usize },
}

/// One borrowed key part, as passed to lookups and updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyPart<'a> {
    Int(i64),
    Str(&'a str),
}

impl From<i64> for KeyPart<'_> {
    fn from(v: i64) -> Self {
        KeyPart::Int(v)
    }
}

impl<'a> From<&'a str> for KeyPart<'a> {
    fn from(s: &'a str) -> Self {
        KeyPart::Str(s)
    }
}

impl fmt::Display for KeyPart<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(v) => write!(f, "{v}"),
            KeyPart::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/// Ordered list of key part types, fixed for the lifetime of a map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    parts: Vec<KeyKind>,
}

impl KeySchema {
    pub fn new(parts: Vec<KeyKind>) -> Result<Self, MapError> {
        if parts.is_empty() {
            return Err(MapError::InvalidOption("key needs at least one part"));
        }
        if parts.len() > MAX_KEY_ARITY {
            return Err(MapError::InvalidOption("key arity exceeds 5 parts"));
        }
        if parts
            .iter()
            .any(|p| matches!(p, KeyKind::Str { max_len } if *max_len < 2))
        {
            return Err(MapError::InvalidOption("string key length must be at least 2"));
        }
        Ok(Self { parts })
    }

    /// Single `Int64` key.
    pub fn int() -> Self {
        Self {
            parts: vec![KeyKind::Int64],
        }
    }

    /// Single string key of `max_len` bytes.
    pub fn string(max_len: usize) -> Result<Self, MapError> {
        Self::new(vec![KeyKind::Str { max_len }])
    }

    pub fn arity(&self) -> usize {
        self.parts.len()
    }

    pub fn kinds(&self) -> &[KeyKind] {
        &self.parts
    }

    /// Validates `key` against the schema and truncates string parts the
    /// same way stored keys are truncated.
    pub(crate) fn probe<'a>(&self, key: &[KeyPart<'a>]) -> Result<ProbeKey<'a>, MapError> {
        if key.len() != self.parts.len() {
            return Err(MapError::KeyArity {
                expected: self.parts.len(),
                got: key.len(),
            });
        }

        let mut probe = ProbeKey::empty();
        for (index, (kind, part)) in self.parts.iter().zip(key).enumerate() {
            probe.parts[index] = match (kind, *part) {
                (KeyKind::Int64, KeyPart::Int(v)) => KeyPart::Int(v),
                (KeyKind::Str { max_len }, KeyPart::Str(s)) => {
                    KeyPart::Str(truncate_str(s, max_len - 1))
                }
                _ => return Err(MapError::KeyType { index }),
            };
        }
        probe.len = key.len();
        Ok(probe)
    }

    /// Allocates an empty stored key with full-size string buffers.
    pub(crate) fn blank_key(&self) -> Key {
        Key {
            slots: self
                .parts
                .iter()
                .map(|kind| match kind {
                    KeyKind::Int64 => KeySlot::Int(0),
                    KeyKind::Str { max_len } => KeySlot::Str(String::with_capacity(*max_len)),
                })
                .collect(),
        }
    }
}

/// A validated, truncated key kept on the stack.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProbeKey<'a> {
    parts: [KeyPart<'a>; MAX_KEY_ARITY],
    len: usize,
}

impl<'a> ProbeKey<'a> {
    fn empty() -> Self {
        Self {
            parts: [KeyPart::Int(0); MAX_KEY_ARITY],
            len: 0,
        }
    }

    pub(crate) fn parts(&self) -> &[KeyPart<'a>] {
        &self.parts[..self.len]
    }

    /// Hash bucket of this key in a table of `2^bits` chains.
    pub(crate) fn bucket(&self, bits: u32) -> usize {
        self.parts()
            .iter()
            .fold(0u64, |acc, part| acc ^ hash_part(*part, bits)) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum KeySlot {
    Int(i64),
    Str(String),
}

/// A key stored inside a map entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    slots: Vec<KeySlot>,
}

impl Key {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns part `index`, counted from 0.
    pub fn part(&self, index: usize) -> Option<KeyPart<'_>> {
        self.slots.get(index).map(|slot| match slot {
            KeySlot::Int(v) => KeyPart::Int(*v),
            KeySlot::Str(s) => KeyPart::Str(s.as_str()),
        })
    }

    pub fn int(&self, index: usize) -> Option<i64> {
        match self.slots.get(index) {
            Some(KeySlot::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn str(&self, index: usize) -> Option<&str> {
        match self.slots.get(index) {
            Some(KeySlot::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn parts(&self) -> impl Iterator<Item = KeyPart<'_>> + '_ {
        (0..self.slots.len()).filter_map(move |i| self.part(i))
    }

    /// Rebuilds a probe from the stored parts, already truncated.
    pub(crate) fn as_probe(&self) -> ProbeKey<'_> {
        let mut probe = ProbeKey::empty();
        for (dst, part) in probe.parts.iter_mut().zip(self.parts()) {
            *dst = part;
        }
        probe.len = self.slots.len().min(MAX_KEY_ARITY);
        probe
    }

    pub(crate) fn matches(&self, probe: &ProbeKey<'_>) -> bool {
        self.slots.len() == probe.len
            && self
                .slots
                .iter()
                .zip(probe.parts())
                .all(|(slot, part)| match (slot, part) {
                    (KeySlot::Int(a), KeyPart::Int(b)) => a == b,
                    (KeySlot::Str(a), KeyPart::Str(b)) => a == b,
                    _ => false,
                })
    }

    /// Copies a probe into this key. String buffers were sized for the
    /// longest truncated value, so this never reallocates.
    pub(crate) fn write(&mut self, probe: &ProbeKey<'_>) {
        for (slot, part) in self.slots.iter_mut().zip(probe.parts()) {
            match (slot, part) {
                (KeySlot::Int(dst), KeyPart::Int(v)) => *dst = *v,
                (KeySlot::Str(dst), KeyPart::Str(s)) => {
                    dst.clear();
                    dst.push_str(s);
                }
                // Probes are built from the same schema as the stored key.
                _ => debug_assert!(false, "key part kind differs from schema"),
            }
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

/// Cuts `s` to at most `max_bytes` bytes on a char boundary.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Multiplicative hash reducing `value` to `bits` bits.
pub fn hash_long(value: u64, bits: u32) -> u64 {
    value.wrapping_mul(GOLDEN_RATIO_64) >> (64 - bits)
}

/// Cheap string hash: byte sum of the first few bytes, then mixed.
pub fn hash_str(s: &str, bits: u32) -> u64 {
    let sum = s
        .bytes()
        .take(STR_HASH_BYTES)
        .fold(0u64, |acc, b| acc.wrapping_add(u64::from(b)));
    hash_long(sum, bits)
}

fn hash_part(part: KeyPart<'_>, bits: u32) -> u64 {
    match part {
        KeyPart::Int(v) => hash_long(v as u64, bits),
        KeyPart::Str(s) => hash_str(s, bits),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_respects_char_boundaries() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 3), "hel");
        assert_eq!(truncate_str("héllo", 2), "h");
        assert_eq!(truncate_str("héllo", 3), "hé");
        assert_eq!(truncate_str("", 0), "");
    }

    #[test]
    fn test_hash_long_stays_in_range() {
        for bits in 1..=16 {
            for v in [0u64, 1, 42, u64::MAX, 1 << 40] {
                assert!(hash_long(v, bits) < (1 << bits));
            }
        }
    }

    #[test]
    fn test_hash_str_uses_first_five_bytes() {
        assert_eq!(hash_str("abcdeXXX", 8), hash_str("abcdeYYY", 8));
        // Same byte sum, different order.
        assert_eq!(hash_str("ab", 8), hash_str("ba", 8));
    }

    #[test]
    fn test_schema_limits() {
        assert!(KeySchema::new(vec![KeyKind::Int64; 5]).is_ok());
        assert!(matches!(
            KeySchema::new(Vec::new()),
            Err(MapError::InvalidOption(_))
        ));
        assert!(matches!(
            KeySchema::new(vec![KeyKind::Int64; 6]),
            Err(MapError::InvalidOption(_))
        ));
        assert!(matches!(
            KeySchema::string(1),
            Err(MapError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_probe_validates_shape() {
        let schema =
            KeySchema::new(vec![KeyKind::Int64, KeyKind::Str { max_len: 4 }]).expect("schema");

        assert_eq!(
            schema.probe(&[KeyPart::Int(1)]).map(|_| ()),
            Err(MapError::KeyArity {
                expected: 2,
                got: 1
            })
        );
        assert_eq!(
            schema
                .probe(&[KeyPart::Str("x"), KeyPart::Str("y")])
                .map(|_| ()),
            Err(MapError::KeyType { index: 0 })
        );

        let probe = schema
            .probe(&[KeyPart::Int(7), KeyPart::Str("abcdef")])
            .expect("valid key");
        assert_eq!(probe.parts(), &[KeyPart::Int(7), KeyPart::Str("abc")]);
    }

    #[test]
    fn test_stored_key_round_trip() {
        let schema =
            KeySchema::new(vec![KeyKind::Str { max_len: 8 }, KeyKind::Int64]).expect("schema");
        let mut key = schema.blank_key();
        let probe = schema
            .probe(&[KeyPart::Str("read"), KeyPart::Int(-3)])
            .expect("valid key");
        key.write(&probe);

        assert!(key.matches(&probe));
        assert_eq!(key.str(0), Some("read"));
        assert_eq!(key.int(1), Some(-3));
        assert_eq!(key.int(0), None);
        assert_eq!(key.to_string(), "\"read\",-3");
        assert_eq!(key.as_probe().bucket(8), probe.bucket(8));
    }

    #[test]
    fn test_rewriting_key_reuses_string_buffer() {
        let schema = KeySchema::string(16).expect("schema");
        let mut key = schema.blank_key();
        let before = key.str(0).map(str::as_ptr);

        for name in ["read", "openat", "epoll_wait_long_name"] {
            let probe = schema.probe(&[KeyPart::Str(name)]).expect("valid key");
            key.write(&probe);
            assert!(key.matches(&probe));
        }

        assert_eq!(key.str(0), Some("epoll_wait_long"));
        assert_eq!(key.str(0).map(str::as_ptr), before);
    }

    #[test]
    fn test_truncated_probe_matches_stored_key() {
        let schema = KeySchema::string(4).expect("schema");
        let mut key = schema.blank_key();
        key.write(&schema.probe(&[KeyPart::Str("abcdef")]).expect("valid key"));

        let other = schema.probe(&[KeyPart::Str("abcxyz")]).expect("valid key");
        assert!(key.matches(&other));
        assert_eq!(key.str(0), Some("abc"));
    }
}
