//! Block-history generation.
//!
//! A chain history is split in segments: the base timeline plus one new
//! timeline per configured jump. Every segment covers the full block range
//! of the chain so a jump can land anywhere in it.

use crate::crypto::{random::random_hash, Hash, HASH_SIZE};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

/// One timeline branch: the hash of each block of the range, in order
pub type Segment = Vec<Hash>;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BlockGenerationStrategy {
    // Every hash is drawn independently from the OS RNG
    Random,
    // Hashes encode (segment, index) so they sort in production order
    InOrder,
}

impl FromStr for BlockGenerationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "random" | "0" => Self::Random,
            "in-order" | "in_order" | "1" => Self::InOrder,
            _ => return Err(format!("Invalid block generation strategy '{}'", s)),
        })
    }
}

impl Serialize for BlockGenerationStrategy {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'a> Deserialize<'a> for BlockGenerationStrategy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let s = String::deserialize(deserializer)?;
        BlockGenerationStrategy::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Display for BlockGenerationStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match &self {
            Self::Random => "random",
            Self::InOrder => "in-order",
        };
        write!(f, "{}", str)
    }
}

/// Generate `segments` sequences of `range_size` random hashes.
///
/// Collisions within or across segments are possible in theory but
/// require a 256-bit coincidence.
pub fn generate_random_hashes(range_size: usize, segments: usize) -> Vec<Segment> {
    (0..segments)
        .map(|_| (0..range_size).map(|_| random_hash()).collect())
        .collect()
}

/// Generate `segments` sequences of `range_size` hashes ordered by position.
///
/// The first 8 bytes hold the segment index and the last 8 bytes the block
/// index, both big-endian, so byte order equals production order and two
/// segments never share a hash. Identical inputs give identical output.
pub fn generate_in_order_block_hashes(range_size: usize, segments: usize) -> Vec<Segment> {
    (0..segments)
        .map(|segment| {
            (0..range_size)
                .map(|index| in_order_hash(segment as u64, index as u64))
                .collect()
        })
        .collect()
}

/// Generate a block history with the requested strategy
pub fn generate_block_history(
    strategy: BlockGenerationStrategy,
    range_size: usize,
    segments: usize,
) -> Vec<Segment> {
    match strategy {
        BlockGenerationStrategy::Random => generate_random_hashes(range_size, segments),
        BlockGenerationStrategy::InOrder => generate_in_order_block_hashes(range_size, segments),
    }
}

fn in_order_hash(segment: u64, index: u64) -> Hash {
    let mut bytes = [0u8; HASH_SIZE];
    bytes[..8].copy_from_slice(&segment.to_be_bytes());
    bytes[HASH_SIZE - 8..].copy_from_slice(&index.to_be_bytes());
    Hash::new(bytes)
}
