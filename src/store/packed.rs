//! On-disk framing of one object: kind byte followed by a zstd body

use crate::model::{content_hash, Hash, Object, ObjectKind};
use crate::{Error, Result};

/// An encoded object as the file store frames it
#[derive(Clone, Debug)]
pub struct PackedObject {
    pub kind: ObjectKind,
    /// Canonical body (uncompressed)
    pub body: Vec<u8>,
}

impl PackedObject {
    pub fn from_object(object: &Object) -> Result<Self> {
        Ok(PackedObject {
            kind: object.kind(),
            body: object.encode()?,
        })
    }

    pub fn hash(&self) -> Hash {
        content_hash(self.kind, &self.body)
    }

    /// Compress for storage
    pub fn compress(&self, level: i32) -> Result<Vec<u8>> {
        let mut output = vec![self.kind.as_byte()];
        output.extend(zstd::encode_all(self.body.as_slice(), level)?);
        Ok(output)
    }

    /// Inverse of [`PackedObject::compress`]
    pub fn decompress(data: &[u8]) -> Result<Self> {
        let (&tag, rest) = data
            .split_first()
            .ok_or_else(|| Error::CorruptObject("Empty object data".into()))?;

        let kind = ObjectKind::from_byte(tag)
            .ok_or_else(|| Error::CorruptObject(format!("Invalid object kind: {}", tag)))?;

        let body = zstd::decode_all(rest)
            .map_err(|e| Error::CorruptObject(format!("Undecompressable object: {}", e)))?;

        Ok(PackedObject { kind, body })
    }

    /// Decode, failing with `CorruptObject` unless the body hashes to `expected`
    pub fn into_object(self, expected: &Hash) -> Result<Object> {
        Object::decode_verified(expected, self.kind, &self.body)
    }
}
