//! `update_object`: the Update Bus's wire shape (spec §4.H/§4.I). Each
//! message names one kind from a closed set and carries a list of
//! payloads of that kind's element type, framed so a decoder that doesn't
//! recognize the kind (an older build facing a newer peer) can skip the
//! whole payload rather than fail the connection.

use super::{Reader, Writer};
use crate::error::{ClusterError, ClusterResult};

/// The closed set of update kinds the accounting store commits and
/// broadcasts. Unrecognized kind values decode as `Unknown` instead of
/// erroring, so a forward-compatible peer can skip them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    AddUser,
    ModifyUser,
    RemoveUser,
    AddAssoc,
    ModifyAssoc,
    RemoveAssoc,
    AddQos,
    ModifyQos,
    RemoveQos,
    Unknown(u16),
}

impl UpdateKind {
    fn to_u16(self) -> u16 {
        match self {
            Self::AddUser => 1,
            Self::ModifyUser => 2,
            Self::RemoveUser => 3,
            Self::AddAssoc => 4,
            Self::ModifyAssoc => 5,
            Self::RemoveAssoc => 6,
            Self::AddQos => 7,
            Self::ModifyQos => 8,
            Self::RemoveQos => 9,
            Self::Unknown(raw) => raw,
        }
    }

    fn from_u16(raw: u16) -> Self {
        match raw {
            1 => Self::AddUser,
            2 => Self::ModifyUser,
            3 => Self::RemoveUser,
            4 => Self::AddAssoc,
            5 => Self::ModifyAssoc,
            6 => Self::RemoveAssoc,
            7 => Self::AddQos,
            8 => Self::ModifyQos,
            9 => Self::RemoveQos,
            other => Self::Unknown(other),
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// One batched commit from the accounting store: a kind discriminator and
/// a list of opaque, kind-specific payload frames. The Update Bus decodes
/// each payload according to `kind` once it reaches the subscriber that
/// understands it (`assoc`/`qos` apply their own typed payload layout);
/// this envelope only owns framing, not interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateObject {
    pub version: u16,
    pub kind: u16,
    pub payloads: Vec<Vec<u8>>,
}

impl UpdateObject {
    pub fn new(kind: UpdateKind, payloads: Vec<Vec<u8>>) -> Self {
        Self { version: super::CURRENT_VERSION, kind: kind.to_u16(), payloads }
    }

    pub fn kind(&self) -> UpdateKind {
        UpdateKind::from_u16(self.kind)
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u16(self.version);
        w.put_u16(self.kind);
        w.put_list(&self.payloads, |w, p| w.put_frame(p));
    }

    /// Decode one `update_object`. An unknown kind is NOT an error: every
    /// payload frame is still self-delimiting, so the caller can skip the
    /// whole message by simply not acting on `kind()` — this is what makes
    /// in-place upgrades forward-compatible.
    pub fn decode(r: &mut Reader) -> ClusterResult<Self> {
        let version = r.get_u16()?;
        let kind = r.get_u16()?;
        let payloads = r.get_list(|r| Ok(r.get_frame()?.to_vec()))?;
        Ok(Self { version, kind, payloads })
    }

    /// Skip this message entirely without allocating its payloads — what a
    /// decoder does when `kind()` is `Unknown` and there's nothing useful
    /// to do with the bytes (spec §4.H: "reject unknown kinds... by
    /// skipping a length-prefixed frame").
    pub fn skip(r: &mut Reader) -> ClusterResult<()> {
        let _version = r.get_u16()?;
        let _kind = r.get_u16()?;
        let count = r.get_u32()?;
        for _ in 0..count {
            r.skip_frame()?;
        }
        Ok(())
    }
}

pub fn encode_update(obj: &UpdateObject) -> Vec<u8> {
    let mut w = Writer::new();
    obj.encode(&mut w);
    w.into_bytes()
}

pub fn decode_update(bytes: &[u8]) -> ClusterResult<UpdateObject> {
    let mut r = Reader::new(bytes);
    let obj = UpdateObject::decode(&mut r)?;
    if !r.is_empty() {
        return Err(ClusterError::InvalidInput("trailing bytes after update_object".to_string()));
    }
    Ok(obj)
}
