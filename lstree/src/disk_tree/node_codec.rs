//! Fixed-layout binary encoding of tree nodes.
//!
//! Leaf page layout (little endian):
//!
//! ```text
//! +------+-------+------+-----------------------------------------+
//! | kind | count | next | records[count]                          |
//! | u8=1 | u32   | i64  | id[25] lon f32 lat f32 ts[29] key u64 d u8 |
//! +------+-------+------+-----------------------------------------+
//! ```
//!
//! Internal page layout, used only when internal nodes are persisted:
//!
//! ```text
//! +------+----------+--------------+-------------+----------------------------+
//! | kind | num_keys | subtree_size | keys[n] u64 | children[n+1] (tag u8, u64) |
//! | u8=0 | u32      | u64          |             |                            |
//! +------+----------+--------------+-------------+----------------------------+
//! ```
//!
//! Strings are NUL padded to their field width. `next == -1` means no next leaf.

use bytes::{Buf, BufMut, BytesMut};

use super::tree_constants::{
    ID_FIELD_SIZE, INVALID_PAGE, MAX_INTERNAL_KEYS, MAX_LEAF_RECORDS, PAGE_SIZE,
    TIMESTAMP_FIELD_SIZE,
};
use super::tree_types::{IndexError, IndexResult, LeafNode, PageId};
use crate::record::{HilbertKey, Record};

const KIND_INTERNAL: u8 = 0;
const KIND_LEAF: u8 = 1;

const TAG_INTERNAL: u8 = 0;
const TAG_LEAF: u8 = 1;

/// Bytes before the first record of a leaf page
pub const LEAF_HEADER_SIZE: usize = 1 + 4 + 8;

/// Bytes taken by one encoded record
pub const RECORD_SIZE: usize = ID_FIELD_SIZE + 4 + 4 + TIMESTAMP_FIELD_SIZE + 8 + 1;

/// Bytes before the first key of an internal page
pub const INTERNAL_HEADER_SIZE: usize = 1 + 4 + 8;

const CHILD_SIZE: usize = 1 + 8;

const _: () = assert!(LEAF_HEADER_SIZE + MAX_LEAF_RECORDS * RECORD_SIZE <= PAGE_SIZE);
const _: () = assert!(
    INTERNAL_HEADER_SIZE + MAX_INTERNAL_KEYS * 8 + (MAX_INTERNAL_KEYS + 1) * CHILD_SIZE
        <= PAGE_SIZE
);

/// A child slot as written in a persisted internal page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskChild {
    Leaf(PageId),
    Internal(PageId),
}

/// Decoded internal page.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskInternal {
    pub keys: Vec<HilbertKey>,
    pub children: Vec<DiskChild>,
    pub subtree_size: u64,
}

fn corrupted(page: PageId, reason: impl Into<String>) -> IndexError {
    IndexError::CorruptedPage {
        page,
        reason: reason.into(),
    }
}

fn put_fixed_str(buf: &mut BytesMut, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(width - 1);
    buf.put_slice(&bytes[..len]);
    buf.put_bytes(0, width - len);
}

fn get_fixed_str(buf: &mut &[u8], width: usize, page: PageId) -> IndexResult<String> {
    let field = &buf[..width];
    let end = field.iter().position(|b| *b == 0).unwrap_or(width);
    let value = std::str::from_utf8(&field[..end])
        .map_err(|e| corrupted(page, format!("invalid string field: {}", e)))?
        .to_string();
    buf.advance(width);
    Ok(value)
}

/// Encodes a leaf into at most one page of bytes.
pub fn encode_leaf(leaf: &LeafNode) -> IndexResult<Vec<u8>> {
    if leaf.records.len() > MAX_LEAF_RECORDS {
        return Err(IndexError::InvalidOperation(format!(
            "Leaf holds {} records (max {})",
            leaf.records.len(),
            MAX_LEAF_RECORDS
        )));
    }

    let mut buf = BytesMut::with_capacity(LEAF_HEADER_SIZE + leaf.records.len() * RECORD_SIZE);
    buf.put_u8(KIND_LEAF);
    buf.put_u32_le(leaf.records.len() as u32);
    buf.put_i64_le(leaf.next_leaf.map_or(INVALID_PAGE, |p| p as i64));

    for record in &leaf.records {
        put_fixed_str(&mut buf, record.id(), ID_FIELD_SIZE);
        buf.put_f32_le(record.lon());
        buf.put_f32_le(record.lat());
        put_fixed_str(&mut buf, record.timestamp(), TIMESTAMP_FIELD_SIZE);
        buf.put_u64_le(record.hilbert());
        buf.put_u8(record.is_disabled() as u8);
    }
    Ok(buf.to_vec())
}

/// Decodes the leaf stored in `page`.
pub fn decode_leaf(page: PageId, bytes: &[u8]) -> IndexResult<LeafNode> {
    if bytes.len() < LEAF_HEADER_SIZE {
        return Err(corrupted(page, "truncated leaf header"));
    }
    let mut buf = bytes;
    let kind = buf.get_u8();
    if kind != KIND_LEAF {
        return Err(corrupted(page, format!("expected leaf page, found kind {}", kind)));
    }
    let count = buf.get_u32_le() as usize;
    if count > MAX_LEAF_RECORDS {
        return Err(corrupted(page, format!("leaf record count {} out of range", count)));
    }
    let next = buf.get_i64_le();
    if buf.remaining() < count * RECORD_SIZE {
        return Err(corrupted(page, "truncated leaf records"));
    }
    let next_leaf = match next {
        INVALID_PAGE => None,
        n if n >= 0 => Some(n as PageId),
        n => return Err(corrupted(page, format!("invalid next leaf {}", n))),
    };

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let id = get_fixed_str(&mut buf, ID_FIELD_SIZE, page)?;
        let lon = buf.get_f32_le();
        let lat = buf.get_f32_le();
        let timestamp = get_fixed_str(&mut buf, TIMESTAMP_FIELD_SIZE, page)?;
        let hilbert = buf.get_u64_le();
        let disabled = buf.get_u8() != 0;
        records.push(Record::new(&id, lon, lat, &timestamp, hilbert).with_disabled(disabled));
    }

    Ok(LeafNode { records, next_leaf })
}

/// Encodes a persisted internal node.
pub fn encode_internal(node: &DiskInternal) -> IndexResult<Vec<u8>> {
    let n = node.keys.len();
    if n > MAX_INTERNAL_KEYS || node.children.len() != n + 1 {
        return Err(IndexError::InvalidOperation(format!(
            "Internal node with {} keys and {} children cannot be encoded",
            n,
            node.children.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(INTERNAL_HEADER_SIZE + n * 8 + (n + 1) * CHILD_SIZE);
    buf.put_u8(KIND_INTERNAL);
    buf.put_u32_le(n as u32);
    buf.put_u64_le(node.subtree_size);
    for key in &node.keys {
        buf.put_u64_le(*key);
    }
    for child in &node.children {
        match child {
            DiskChild::Leaf(page) => {
                buf.put_u8(TAG_LEAF);
                buf.put_u64_le(*page);
            }
            DiskChild::Internal(page) => {
                buf.put_u8(TAG_INTERNAL);
                buf.put_u64_le(*page);
            }
        }
    }
    Ok(buf.to_vec())
}

/// Decodes the internal node stored in `page`.
pub fn decode_internal(page: PageId, bytes: &[u8]) -> IndexResult<DiskInternal> {
    if bytes.len() < INTERNAL_HEADER_SIZE {
        return Err(corrupted(page, "truncated internal header"));
    }
    let mut buf = bytes;
    let kind = buf.get_u8();
    if kind != KIND_INTERNAL {
        return Err(corrupted(
            page,
            format!("expected internal page, found kind {}", kind),
        ));
    }
    let n = buf.get_u32_le() as usize;
    if n > MAX_INTERNAL_KEYS {
        return Err(corrupted(page, format!("key count {} out of range", n)));
    }
    let subtree_size = buf.get_u64_le();
    if buf.remaining() < n * 8 + (n + 1) * CHILD_SIZE {
        return Err(corrupted(page, "truncated internal body"));
    }

    let keys = (0..n).map(|_| buf.get_u64_le()).collect();
    let mut children = Vec::with_capacity(n + 1);
    for _ in 0..=n {
        let tag = buf.get_u8();
        let child = buf.get_u64_le();
        children.push(match tag {
            TAG_LEAF => DiskChild::Leaf(child),
            TAG_INTERNAL => DiskChild::Internal(child),
            other => return Err(corrupted(page, format!("unknown child tag {}", other))),
        });
    }

    Ok(DiskInternal {
        keys,
        children,
        subtree_size,
    })
}

/// True if the page bytes hold a leaf.
pub fn is_leaf_page(bytes: &[u8]) -> bool {
    bytes.first() == Some(&KIND_LEAF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_leaf() -> LeafNode {
        LeafNode {
            records: vec![
                Record::new("user-1", -73.98, 40.75, "2008-10-23 02:53:04", 17),
                Record::new("user-2", 116.3, 39.98, "2009-01-01 00:00:00", 42).with_disabled(true),
            ],
            next_leaf: Some(9),
        }
    }

    #[test]
    fn test_leaf_round_trip() {
        let leaf = sample_leaf();
        let mut bytes = encode_leaf(&leaf).unwrap();
        assert_eq!(bytes.len(), LEAF_HEADER_SIZE + 2 * RECORD_SIZE);

        // pages come back zero padded
        bytes.resize(PAGE_SIZE, 0);
        assert!(is_leaf_page(&bytes));
        let decoded = decode_leaf(4, &bytes).unwrap();
        assert_eq!(decoded, leaf);
    }

    #[test]
    fn test_leaf_without_next_uses_sentinel() {
        let leaf = LeafNode::new();
        let bytes = encode_leaf(&leaf).unwrap();
        assert_eq!(&bytes[5..13], &INVALID_PAGE.to_le_bytes());
        assert_eq!(decode_leaf(0, &bytes).unwrap().next_leaf, None);
    }

    #[test]
    fn test_full_leaf_fits_in_page() {
        let leaf = LeafNode {
            records: (0..MAX_LEAF_RECORDS as u64)
                .map(|k| Record::new(&"i".repeat(30), 1.0, 2.0, &"t".repeat(40), k))
                .collect(),
            next_leaf: None,
        };
        let bytes = encode_leaf(&leaf).unwrap();
        assert!(bytes.len() <= PAGE_SIZE);
        assert_eq!(decode_leaf(1, &bytes).unwrap().len(), MAX_LEAF_RECORDS);
    }

    #[test]
    fn test_zeroed_page_is_not_a_leaf() {
        let zeroed = vec![0u8; PAGE_SIZE];
        assert!(!is_leaf_page(&zeroed));
        let err = decode_leaf(3, &zeroed).unwrap_err();
        assert!(matches!(err, IndexError::CorruptedPage { page: 3, .. }));
    }

    #[test]
    fn test_bad_record_count_is_rejected() {
        let mut bytes = encode_leaf(&sample_leaf()).unwrap();
        bytes[1..5].copy_from_slice(&1000u32.to_le_bytes());
        assert!(decode_leaf(0, &bytes).is_err());
    }

    #[test]
    fn test_internal_round_trip() {
        let node = DiskInternal {
            keys: vec![10, 20],
            children: vec![
                DiskChild::Leaf(0),
                DiskChild::Internal(7),
                DiskChild::Leaf(3),
            ],
            subtree_size: 250,
        };
        let bytes = encode_internal(&node).unwrap();
        assert!(!is_leaf_page(&bytes));
        assert_eq!(decode_internal(7, &bytes).unwrap(), node);
        assert!(decode_leaf(7, &bytes).is_err());
    }

    #[test]
    fn test_internal_shape_is_checked() {
        let node = DiskInternal {
            keys: vec![1],
            children: vec![DiskChild::Leaf(0)],
            subtree_size: 0,
        };
        assert!(encode_internal(&node).is_err());
    }
}
