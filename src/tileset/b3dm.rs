//! Batched 3D Model (b3dm) header codec.
//!
//! Layout of a b3dm tile:
//!
//! ```text
//! ┌───────┬─────────┬────────────┬──────────┬──────────┬──────────┬──────────┐
//! │ magic │ version │ byteLength │ FT json  │ FT bin   │ BT json  │ BT bin   │  28 bytes
//! └───────┴─────────┴────────────┴──────────┴──────────┴──────────┴──────────┘
//! │ feature table json │ feature table bin │ batch table json │ batch table bin │
//! │ embedded glb ...                                                         │
//! ```
//!
//! All header fields are little-endian u32. The filters never look inside
//! the tables; they only need to cut the glb out and put a new one back.

use bytes::{Bytes, BytesMut};

use crate::error::TilesetError;

/// Magic bytes at the start of every b3dm tile.
pub const B3DM_MAGIC: &[u8; 4] = b"b3dm";

/// Size of the fixed header in bytes.
pub const B3DM_HEADER_LEN: usize = 28;

/// Offset of the total length field.
const BYTE_LENGTH_OFFSET: usize = 8;

/// Little-endian u32 at `offset`, `None` when the slice ends first.
#[inline]
fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset.checked_add(4)?)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

fn too_small(len: usize) -> TilesetError {
    TilesetError::InvalidArgument(format!(
        "b3dm tile too small: need {} bytes, got {}",
        B3DM_HEADER_LEN, len
    ))
}

/// Parsed b3dm header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct B3dmHeader {
    pub version: u32,
    pub byte_length: u32,
    pub feature_table_json_len: u32,
    pub feature_table_binary_len: u32,
    pub batch_table_json_len: u32,
    pub batch_table_binary_len: u32,
}

impl B3dmHeader {
    /// Parse the fixed header.
    pub fn parse(data: &[u8]) -> Result<Self, TilesetError> {
        if data.len() < B3DM_HEADER_LEN {
            return Err(too_small(data.len()));
        }
        if &data[0..4] != B3DM_MAGIC {
            return Err(TilesetError::InvalidArgument(format!(
                "invalid b3dm magic: {:02X?}",
                &data[0..4]
            )));
        }

        let field = |offset: usize| read_u32_le(data, offset).ok_or_else(|| too_small(data.len()));
        Ok(Self {
            version: field(4)?,
            byte_length: field(BYTE_LENGTH_OFFSET)?,
            feature_table_json_len: field(12)?,
            feature_table_binary_len: field(16)?,
            batch_table_json_len: field(20)?,
            batch_table_binary_len: field(24)?,
        })
    }

    /// Offset of the embedded glb.
    pub fn glb_offset(&self) -> usize {
        B3DM_HEADER_LEN
            + self.feature_table_json_len as usize
            + self.feature_table_binary_len as usize
            + self.batch_table_json_len as usize
            + self.batch_table_binary_len as usize
    }
}

/// Whether `data` starts with the b3dm magic.
pub fn is_b3dm(data: &[u8]) -> bool {
    data.len() >= B3DM_HEADER_LEN && &data[0..4] == B3DM_MAGIC
}

/// Split a tile into `(header + tables, glb)`.
pub fn split_b3dm(data: &Bytes) -> Result<(Bytes, Bytes), TilesetError> {
    let header = B3dmHeader::parse(data)?;
    let offset = header.glb_offset();
    if offset > data.len() {
        return Err(TilesetError::InvalidArgument(format!(
            "b3dm tables end at byte {} but the tile has {} bytes",
            offset,
            data.len()
        )));
    }
    Ok((data.slice(..offset), data.slice(offset..)))
}

/// Put a new glb behind `prefix` (header + tables) and patch the total length.
pub fn recombine_b3dm(prefix: &[u8], glb: &[u8]) -> Result<Bytes, TilesetError> {
    B3dmHeader::parse(prefix)?;

    let total = prefix.len() + glb.len();
    let total_u32 = u32::try_from(total).map_err(|_| {
        TilesetError::InvalidArgument(format!("b3dm tile of {} bytes exceeds 4 GiB", total))
    })?;

    let mut out = BytesMut::with_capacity(total);
    out.extend_from_slice(prefix);
    out.extend_from_slice(glb);
    out[BYTE_LENGTH_OFFSET..BYTE_LENGTH_OFFSET + 4].copy_from_slice(&total_u32.to_le_bytes());
    Ok(out.freeze())
}

#[cfg(test)]
pub(crate) fn build_b3dm(feature_table_json: &[u8], glb: &[u8]) -> Bytes {
    let mut out = Vec::new();
    out.extend_from_slice(B3DM_MAGIC);
    out.extend_from_slice(&1u32.to_le_bytes());
    let total = (B3DM_HEADER_LEN + feature_table_json.len() + glb.len()) as u32;
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(&(feature_table_json.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(feature_table_json);
    out.extend_from_slice(glb);
    Bytes::from(out)
}
