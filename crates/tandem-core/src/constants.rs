//! Global constants used throughout the Tandem codebase
//!
//! This module contains compile-time constants that are shared across
//! multiple modules to ensure consistency and avoid magic numbers.

/// User id owning the document root and every other node bound before any
/// replica allocated anything.
pub const ROOT_USER: u64 = 0;

/// Actor id owning the document root.
pub const ROOT_ACTOR: u64 = 0;

/// Sequence number of the document root.
pub const ROOT_SEQ: u64 = 1;

/// User id the authoritative sequencer allocates and commits as.
///
/// Client replicas must use a non-zero user id.
pub const SERVER_USER: u64 = 0;

/// Actor id the authoritative sequencer allocates and commits as.
pub const SERVER_ACTOR: u64 = 1;

/// Number of random bytes appended to every generated fractional key.
///
/// Two replicas inserting between the same neighbours at the same time
/// end up with distinct keys unless these bytes also match.
pub const FLOAT_KEY_ENTROPY: usize = 2;

/// Length of an unordered container key in bytes (160 bits)
pub const RANDOM_KEY_LENGTH: usize = 20;

/// Magic token opening every binary snapshot
pub const BINARY_MAGIC: &[u8; 4] = b"TNDM";

/// Binary snapshot layout version
pub const BINARY_FORMAT_VERSION: u8 = 1;

/// First line of every text snapshot
pub const TEXT_HEADER: &str = "tandem-text 1";

/// Metadata key holding a transaction label
pub const LABEL_KEY: &str = "label";

/// Deepest object nesting accepted when decoding a snapshot.
///
/// Schemas nest a handful of levels; anything past this is treated as
/// malformed input rather than decoded recursively.
pub const MAX_DEPTH: usize = 256;
