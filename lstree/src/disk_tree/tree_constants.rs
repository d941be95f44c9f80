//! Constants for the paged Hilbert tree.

/// Size of one persisted page
pub const PAGE_SIZE: usize = 8000;

/// Maximum number of records a leaf page can hold
pub const MAX_LEAF_RECORDS: usize = 100;

/// Maximum separator keys per internal node (fanout 16)
pub const MAX_INTERNAL_KEYS: usize = 15;

/// On-disk sentinel for "no page" in the next-leaf link
pub const INVALID_PAGE: i64 = -1;

/// Default number of records kept in an internal node's sample buffer
pub const DEFAULT_SAMPLE_SIZE: usize = 64;

/// Default leaf cache size in pages
pub const DEFAULT_CACHE_PAGES: usize = 256;

/// Bytes reserved for a record identifier, including the trailing NUL
pub const ID_FIELD_SIZE: usize = 25;

/// Bytes reserved for a record timestamp, including the trailing NUL
pub const TIMESTAMP_FIELD_SIZE: usize = 29;

/// Name of the root metadata file used by the persisted-root mode
pub const ROOT_META_FILE: &str = "root.meta";

/// Magic number for root metadata identification
pub const META_MAGIC: u32 = 0x4C53_5452; // "LSTR"

/// Root metadata format version
pub const META_VERSION: u32 = 1;
