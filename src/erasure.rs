//! Erasure-coding and bitrot checksum descriptions.
//!
//! Only the *parameters* live here; encoding and hashing are done elsewhere.
//! Algorithm identifiers are closed enums with an `Unknown` escape hatch so a
//! code written by a newer server survives a load/store cycle unchanged.

use crate::part::ceil_div;

/// Erasure coding algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErasureAlgo {
    #[default]
    ReedSolomon,
    Unknown(u8),
}

impl ErasureAlgo {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ErasureAlgo::ReedSolomon,
            other => ErasureAlgo::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ErasureAlgo::ReedSolomon => 1,
            ErasureAlgo::Unknown(v) => v,
        }
    }

    /// Name used by the legacy JSON layout.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rs-vandermonde" | "klauspost/reedsolomon/vandermonde" => Some(ErasureAlgo::ReedSolomon),
            _ => None,
        }
    }
}

/// Bitrot checksum algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgo {
    Sha256,
    Blake2b512,
    HighwayHash256,
    /// Streaming HighwayHash256, hashes interleaved with shard blocks.
    #[default]
    HighwayHash256S,
    Unknown(u8),
}

impl ChecksumAlgo {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ChecksumAlgo::Sha256,
            2 => ChecksumAlgo::Blake2b512,
            3 => ChecksumAlgo::HighwayHash256,
            4 => ChecksumAlgo::HighwayHash256S,
            other => ChecksumAlgo::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ChecksumAlgo::Sha256 => 1,
            ChecksumAlgo::Blake2b512 => 2,
            ChecksumAlgo::HighwayHash256 => 3,
            ChecksumAlgo::HighwayHash256S => 4,
            ChecksumAlgo::Unknown(v) => v,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(ChecksumAlgo::Sha256),
            "blake2b" => Some(ChecksumAlgo::Blake2b512),
            "highwayhash256" => Some(ChecksumAlgo::HighwayHash256),
            "highwayhash256S" => Some(ChecksumAlgo::HighwayHash256S),
            _ => None,
        }
    }

    /// Streaming algorithms keep their hashes inside the shard files.
    pub fn is_streaming(self) -> bool {
        matches!(self, ChecksumAlgo::HighwayHash256S)
    }
}

/// Bitrot checksum for one part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChecksumInfo {
    pub part_number: i32,
    pub algorithm: ChecksumAlgo,
    /// Opaque hash bytes; absent for streaming algorithms.
    pub hash: Option<Vec<u8>>,
}

/// How an object version is split into data and parity shards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErasureInfo {
    pub algorithm: ErasureAlgo,
    pub data_blocks: i32,
    pub parity_blocks: i32,
    pub block_size: i64,
    /// 1-based position of this disk within `distribution`.
    pub index: i32,
    pub distribution: Vec<u8>,
    pub checksums: Vec<ChecksumInfo>,
}

impl ErasureInfo {
    /// Shard counts are legal and the distribution, when present, covers
    /// every shard.
    pub fn is_valid(&self) -> bool {
        is_erasure_info_valid(self.data_blocks, self.parity_blocks)
            && (self.distribution.is_empty() || self.distribution.len() == self.total_shards())
    }

    /// Size of each shard for a given block: ceil(block_size / data_blocks)
    pub fn shard_size(&self) -> i64 {
        if self.data_blocks <= 0 {
            return 0;
        }
        ceil_div(self.block_size, i64::from(self.data_blocks))
    }

    /// Total number of shards (data + parity)
    pub fn total_shards(&self) -> usize {
        (self.data_blocks.max(0) + self.parity_blocks.max(0)) as usize
    }

    /// Checksum recorded for `part_number`, if any.
    pub fn checksum_for(&self, part_number: i32) -> Option<&ChecksumInfo> {
        self.checksums.iter().find(|c| c.part_number == part_number)
    }
}

/// Parity may never exceed the data shard count; zero parity is legal.
pub fn is_erasure_info_valid(data: i32, parity: i32) -> bool {
    data >= 1 && parity >= 0 && parity <= data
}
