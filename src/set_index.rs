use crate::address;
use serde::{Deserialize, Serialize};

/// Cache-line address to set index mapping.
///
/// All variants are pure: the same line address always lands in the same
/// set, which is what lets a single last-use map serve every set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mapping {
    /// Low line-address bits, no hash.
    Linear,
    /// XOR of the low line-address bits with the next group up.
    BitwiseXor,
    /// Fermi's L1 hash.
    #[default]
    Fermi,
}

impl Mapping {
    #[must_use]
    pub fn set_index(&self, line_addr: address, num_sets: u64) -> u64 {
        match self {
            Mapping::Linear => linear::set_index(line_addr, num_sets),
            Mapping::BitwiseXor => bitwise_xor::set_index(line_addr, num_sets),
            Mapping::Fermi => fermi::set_index(line_addr, num_sets),
        }
    }
}

pub mod linear {
    use crate::address;

    #[must_use]
    pub fn set_index(line_addr: address, num_sets: u64) -> u64 {
        line_addr % num_sets
    }
}

pub mod bitwise_xor {
    use crate::address;

    #[must_use]
    pub fn set_index(line_addr: address, num_sets: u64) -> u64 {
        ((line_addr % num_sets) ^ ((line_addr / num_sets) % num_sets)) % num_sets
    }
}

pub mod fermi {
    use crate::address;

    /// Fermi set hash over the little-endian bits of the line address:
    /// two 5-bit groups are XORed and bit 5 selects the upper half.
    #[must_use]
    pub fn set_index(line_addr: address, num_sets: u64) -> u64 {
        let bit = |i: u32| (line_addr >> i) & 1;
        let g1 = bit(0) + 2 * bit(1) + 4 * bit(2) + 8 * bit(3) + 16 * bit(4);
        let g2 = bit(6) + 2 * bit(7) + 4 * bit(8) + 8 * bit(10) + 16 * bit(12);
        debug_assert!(g1 < 32);
        debug_assert!(g2 < 32);
        ((g1 ^ g2) + 32 * bit(5)) % num_sets
    }
}
