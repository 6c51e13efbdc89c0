//! Content names: ordered sequences of typed byte-string segments.
//!
//! A `Name` is immutable after construction and reference counted; `prefix`
//! shares the segment storage with the parent. The 64-bit hash of every
//! prefix length is precomputed cumulatively, so `hash_prefix(k)` is O(1)
//! and stable across equal-valued names.

use crate::error::Error;
use crate::tlv::{Extent, TlvEncoder, TlvIter};
use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Default segment label when a URI component carries none.
pub const LABEL_GENERIC: u16 = 0x0003;

/// One name segment: a 16-bit label and a byte string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    label: u16,
    value: Bytes,
}

impl Segment {
    pub fn new(label: u16, value: impl Into<Bytes>) -> Self {
        Self {
            label,
            value: value.into(),
        }
    }

    pub fn generic(value: impl Into<Bytes>) -> Self {
        Self::new(LABEL_GENERIC, value)
    }

    pub fn label(&self) -> u16 {
        self.label
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label != LABEL_GENERIC {
            write!(f, "{}=", self.label)?;
        }
        for &b in self.value.iter() {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "%{:02X}", b)?;
            }
        }
        Ok(())
    }
}

/// A content name.
#[derive(Debug, Clone)]
pub struct Name {
    segments: Arc<Vec<Segment>>,
    // Cumulative hashes: prefix_hashes[k] covers segments[..k]. Always has
    // segments.len() + 1 entries; shared with every prefix of this name.
    prefix_hashes: Arc<Vec<u64>>,
    count: usize,
}

impl Name {
    /// The empty (zero-segment) name.
    pub fn root() -> Self {
        Self::from_segments(Vec::new())
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        let mut hasher = DefaultHasher::new();
        let mut prefix_hashes = Vec::with_capacity(segments.len() + 1);
        prefix_hashes.push(hasher.finish());
        for segment in &segments {
            segment.label.hash(&mut hasher);
            segment.value.as_ref().hash(&mut hasher);
            prefix_hashes.push(hasher.finish());
        }
        let count = segments.len();
        Self {
            segments: Arc::new(segments),
            prefix_hashes: Arc::new(prefix_hashes),
            count,
        }
    }

    /// Parse an `lci:` URI: `lci:/label=value/value/...`.
    ///
    /// The scheme is optional, the label defaults to the generic type, and
    /// values may be percent-escaped. `lci:/` is the zero-segment name.
    pub fn from_uri(uri: &str) -> Result<Self, Error> {
        let path = uri
            .strip_prefix("lci:")
            .or_else(|| uri.strip_prefix("ccnx:"))
            .unwrap_or(uri);
        let path = path
            .strip_prefix('/')
            .ok_or_else(|| Error::NameParse(format!("missing '/' in {uri:?}")))?;

        let mut segments = Vec::new();
        for component in path.split('/') {
            if component.is_empty() {
                continue;
            }
            let (label, raw) = match component.split_once('=') {
                Some((label, rest)) => match label.parse::<u16>() {
                    Ok(label) => (label, rest),
                    // Not a numeric label: the '=' belongs to the value.
                    Err(_) => (LABEL_GENERIC, component),
                },
                None => (LABEL_GENERIC, component),
            };
            segments.push(Segment::new(label, percent_decode(raw)?));
        }
        Ok(Self::from_segments(segments))
    }

    /// Parse the value of a name TLV: a run of segment TLVs.
    pub fn from_wire(buf: &[u8]) -> Result<Self, Error> {
        let mut segments = Vec::new();
        let mut it = TlvIter::new(buf, Extent::new(0, buf.len()));
        while !it.is_done() {
            let (label, value) = it.next_tlv()?;
            segments.push(Segment::new(label, Bytes::copy_from_slice(&buf[value.range()])));
        }
        Ok(Self::from_segments(segments))
    }

    /// Encode as the value of a name TLV.
    pub fn to_wire(&self) -> Bytes {
        let mut enc = TlvEncoder::new();
        for segment in self.iter() {
            enc.append_tlv(segment.label, &segment.value);
        }
        enc.finish()
    }

    pub fn segment_count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        if index < self.count {
            self.segments.get(index)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments[..self.count].iter()
    }

    /// The first `k` segments, sharing storage with `self`.
    pub fn prefix(&self, k: usize) -> Self {
        assert!(k <= self.count, "prefix {k} of {}-segment name", self.count);
        Self {
            segments: Arc::clone(&self.segments),
            prefix_hashes: Arc::clone(&self.prefix_hashes),
            count: k,
        }
    }

    /// Stable 64-bit hash of the first `k` segments.
    pub fn hash_prefix(&self, k: usize) -> u64 {
        assert!(k <= self.count, "hash_prefix {k} of {}-segment name", self.count);
        self.prefix_hashes[k]
    }

    /// Hash over all segments.
    pub fn full_hash(&self) -> u64 {
        self.prefix_hashes[self.count]
    }

    /// Segment-wise equality over the first `k` segments of both names.
    pub fn equals_prefix(&self, other: &Self, k: usize) -> bool {
        if k > self.count || k > other.count {
            return false;
        }
        self.hash_prefix(k) == other.hash_prefix(k)
            && self.segments[..k] == other.segments[..k]
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count
            && self.full_hash() == other.full_hash()
            && self.segments[..self.count] == other.segments[..other.count]
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.full_hash());
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lci:")?;
        if self.is_empty() {
            return write!(f, "/");
        }
        for segment in self.iter() {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

fn percent_decode(raw: &str) -> Result<Vec<u8>, Error> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| Error::NameParse(format!("bad escape in {raw:?}")))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_parses_labels_and_escapes() {
        let name = Name::from_uri("lci:/3=cool/data/%41%2Fb").unwrap();
        assert_eq!(name.segment_count(), 3);
        assert_eq!(name.get(0).unwrap().label(), 3);
        assert_eq!(name.get(0).unwrap().value(), b"cool");
        assert_eq!(name.get(1).unwrap().label(), LABEL_GENERIC);
        assert_eq!(name.get(1).unwrap().value(), b"data");
        assert_eq!(name.get(2).unwrap().value(), b"A/b");
    }

    #[test]
    fn zero_segment_name_is_valid() {
        let root = Name::from_uri("lci:/").unwrap();
        assert_eq!(root.segment_count(), 0);
        assert_eq!(root.hash_prefix(0), Name::root().hash_prefix(0));
    }

    #[test]
    fn prefix_shares_hashes() {
        let name = Name::from_uri("lci:/a/b/c").unwrap();
        let prefix = name.prefix(2);
        assert_eq!(prefix.segment_count(), 2);
        assert_eq!(prefix.full_hash(), name.hash_prefix(2));
        assert_eq!(prefix, Name::from_uri("lci:/a/b").unwrap());
    }

    #[test]
    fn hash_prefix_stable_across_construction_paths() {
        let name = Name::from_uri("lci:/a/b/c").unwrap();
        let rewired = Name::from_wire(&name.to_wire()).unwrap();
        for k in 0..=3 {
            assert_eq!(name.hash_prefix(k), rewired.hash_prefix(k));
        }
        assert_eq!(name, rewired);
    }

    #[test]
    fn equals_prefix_matches_hashes() {
        let a = Name::from_uri("lci:/a/b/c").unwrap();
        let b = Name::from_uri("lci:/a/b/z").unwrap();
        assert!(a.equals_prefix(&b, 2));
        assert!(!a.equals_prefix(&b, 3));
        assert!(a.equals_prefix(&b, 0));
        assert_ne!(a, b);
    }

    #[test]
    fn labels_distinguish_equal_values() {
        let generic = Name::from_uri("lci:/chunk").unwrap();
        let labelled = Name::from_uri("lci:/16=chunk").unwrap();
        assert_ne!(generic, labelled);
        assert_ne!(generic.full_hash(), labelled.full_hash());
    }

    #[test]
    fn display_round_trips() {
        let name = Name::from_uri("lci:/3=cool/a%20b").unwrap();
        let shown = name.to_string();
        assert_eq!(Name::from_uri(&shown).unwrap(), name);
    }
}
