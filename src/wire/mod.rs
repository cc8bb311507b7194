//! Wire Codec (spec §4.H): versioned, length-prefixed pack/unpack shared by
//! client RPC, daemon↔accounting-store RPC, and the on-disk state-file
//! format (`SPEC_FULL.md` §B — one encoder/decoder pair serves both).
//!
//! Encoding rules are fixed, not negotiable per record type: integers
//! are big-endian fixed width, strings are `u32`-length-prefixed
//! with `0xFFFFFFFF` meaning "absent", and lists are count-prefixed with
//! element layout implied by the enclosing message. Every top-level record
//! carries its own 16-bit version tag so a decoder can refuse (or, for
//! `update_object`, skip) a frame it doesn't understand.

use crate::error::{ClusterError, ClusterResult};

/// Sentinel length marking an absent (not zero-length) string.
pub const ABSENT_STRING_LEN: u32 = 0xFFFF_FFFF;

/// Highest RPC/on-disk version this build understands.
pub const CURRENT_VERSION: u16 = 1;

/// Append-only byte writer implementing the fixed encoding rules above.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    /// `None` encodes as the absent-string sentinel length with no bytes.
    pub fn put_str(&mut self, v: Option<&str>) {
        match v {
            None => self.put_u32(ABSENT_STRING_LEN),
            Some(s) => {
                self.put_u32(s.len() as u32);
                self.buf.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Count-prefixed list; `encode_one` writes one element's bytes.
    pub fn put_list<T>(&mut self, items: &[T], mut encode_one: impl FnMut(&mut Self, &T)) {
        self.put_u32(items.len() as u32);
        for item in items {
            encode_one(self, item);
        }
    }

    /// A length-prefixed opaque byte frame — the shape a decoder can skip
    /// without understanding its contents (used by `update_object`).
    pub fn put_frame(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-based reader enforcing the same encoding rules on decode.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> ClusterResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(ClusterError::InvalidInput("wire frame truncated".to_string()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u16(&mut self) -> ClusterResult<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn get_u32(&mut self) -> ClusterResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_u64(&mut self) -> ClusterResult<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_i64(&mut self) -> ClusterResult<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_f64(&mut self) -> ClusterResult<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take(8)?.try_into().unwrap())))
    }

    pub fn get_bool(&mut self) -> ClusterResult<bool> {
        Ok(self.take(1)?[0] != 0)
    }

    pub fn get_str(&mut self) -> ClusterResult<Option<String>> {
        let len = self.get_u32()?;
        if len == ABSENT_STRING_LEN {
            return Ok(None);
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|e| ClusterError::InvalidInput(format!("non-utf8 string in wire frame: {e}")))
    }

    pub fn get_list<T>(&mut self, mut decode_one: impl FnMut(&mut Self) -> ClusterResult<T>) -> ClusterResult<Vec<T>> {
        let count = self.get_u32()?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(decode_one(self)?);
        }
        Ok(items)
    }

    /// Read a length-prefixed opaque frame without interpreting it — how
    /// an unrecognized `update_object` kind is skipped (spec §4.H).
    pub fn skip_frame(&mut self) -> ClusterResult<()> {
        let len = self.get_u32()?;
        self.take(len as usize)?;
        Ok(())
    }

    pub fn get_frame(&mut self) -> ClusterResult<&'a [u8]> {
        let len = self.get_u32()?;
        self.take(len as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

/// A record type with a fixed wire layout, decodable at a specific
/// protocol version. Every field addition bumps `CURRENT_VERSION`, never
/// changes the layout a past version already committed to.
pub trait WireRecord: Sized {
    fn encode(&self, w: &mut Writer);
    fn decode(r: &mut Reader) -> ClusterResult<Self>;
}

/// Pack a record with its version tag in front: `[version:u16][body]`.
pub fn pack_v<T: WireRecord>(version: u16, record: &T) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u16(version);
    record.encode(&mut w);
    w.into_bytes()
}

/// Unpack a versioned record, rejecting anything newer than this build
/// understands.
pub fn unpack_v<T: WireRecord>(bytes: &[u8]) -> ClusterResult<T> {
    let mut r = Reader::new(bytes);
    let version = r.get_u16()?;
    if version > CURRENT_VERSION {
        return Err(ClusterError::ProtocolVersion { got: version, max_supported: CURRENT_VERSION });
    }
    T::decode(&mut r)
}

pub mod records;
pub mod update;

pub use records::{AssocUsageRecord, JobSummaryRecord, NodeRecordWire, PartitionRecordWire, QosUsageRecord};
pub use update::{UpdateKind, UpdateObject};

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Sample {
        id: u32,
        name: Option<String>,
        tags: Vec<String>,
    }

    impl WireRecord for Sample {
        fn encode(&self, w: &mut Writer) {
            w.put_u32(self.id);
            w.put_str(self.name.as_deref());
            w.put_list(&self.tags, |w, t| w.put_str(Some(t)));
        }

        fn decode(r: &mut Reader) -> ClusterResult<Self> {
            let id = r.get_u32()?;
            let name = r.get_str()?;
            let tags = r.get_list(|r| Ok(r.get_str()?.unwrap()))?;
            Ok(Self { id, name, tags })
        }
    }

    #[test]
    fn round_trip_with_absent_string_and_list() {
        let s = Sample { id: 7, name: None, tags: vec!["gpu".to_string(), "fast".to_string()] };
        let bytes = pack_v(CURRENT_VERSION, &s);
        let back: Sample = unpack_v(&bytes).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn round_trip_with_present_string_and_empty_list() {
        let s = Sample { id: 1, name: Some("lx0".to_string()), tags: Vec::new() };
        let bytes = pack_v(CURRENT_VERSION, &s);
        let back: Sample = unpack_v(&bytes).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn future_version_is_rejected() {
        let s = Sample { id: 1, name: None, tags: Vec::new() };
        let bytes = pack_v(CURRENT_VERSION + 1, &s);
        let err = unpack_v::<Sample>(&bytes).unwrap_err();
        assert!(matches!(err, ClusterError::ProtocolVersion { .. }));
    }

    #[test]
    fn truncated_buffer_errors_instead_of_panicking() {
        let mut w = Writer::new();
        w.put_u16(CURRENT_VERSION);
        w.put_u32(99); // claims a 99-byte string that was never written
        assert!(unpack_v::<Sample>(&w.into_bytes()).is_err());
    }
}
