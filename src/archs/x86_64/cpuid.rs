// SPDX-License-Identifier: Unlicense

//! CPUID results cached for emulation inside the domain.
//!
//! `cpuid` cannot execute inside the domain. The runtime reads a fixed set
//! of leaves from the host once, when the domain is created, and answers
//! later requests from that copy. Leaves outside the set are not emulated
//! and reach the vectored handlers as illegal instructions.

/// `(leaf, subleaf)` pairs captured for emulation.
pub const CPUID_LEAVES: [(u32, u32); 12] = [
    (0x0, 0),
    (0x1, 0),
    (0x4, 0),
    (0x4, 1),
    (0x4, 2),
    (0x4, 3),
    (0x7, 0),
    (0xd, 0),
    (0xd, 1),
    (0x8000_0000, 0),
    (0x8000_0001, 0),
    (0x8000_0008, 0),
];

/// Cached `[eax, ebx, ecx, edx]` per `(leaf, subleaf)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuidTable {
    entries: Vec<((u32, u32), [u32; 4])>,
}

impl CpuidTable {
    /// Table from explicit entries.
    pub fn from_entries(entries: impl IntoIterator<Item = ((u32, u32), [u32; 4])>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Cached result for `leaf`/`subleaf`.
    pub fn lookup(&self, leaf: u32, subleaf: u32) -> Option<[u32; 4]> {
        self.entries
            .iter()
            .find(|(key, _)| *key == (leaf, subleaf))
            .map(|(_, regs)| *regs)
    }

    /// Number of cached leaves.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing can be emulated.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read the supported leaves from the host processor.
    #[cfg(target_arch = "x86_64")]
    #[allow(unused_unsafe)]
    pub fn capture() -> Self {
        use std::arch::x86_64::__cpuid_count;

        let read = |leaf, subleaf| {
            let r = unsafe { __cpuid_count(leaf, subleaf) };
            [r.eax, r.ebx, r.ecx, r.edx]
        };
        let max_basic = read(0, 0)[0];
        let max_extended = read(0x8000_0000, 0)[0];

        let entries = CPUID_LEAVES
            .iter()
            .filter(|(leaf, _)| {
                if *leaf >= 0x8000_0000 {
                    *leaf <= max_extended
                } else {
                    *leaf <= max_basic
                }
            })
            .map(|&(leaf, subleaf)| ((leaf, subleaf), read(leaf, subleaf)))
            .collect::<Vec<_>>();
        debug!("captured {} cpuid leaves", entries.len());
        Self { entries }
    }

    /// Synthetic leaves for hosts without `cpuid`.
    #[cfg(not(target_arch = "x86_64"))]
    pub fn capture() -> Self {
        // "SimDomainCPU" in ebx, edx, ecx order
        let vendor = *b"SimDomainCPU";
        let word = |i: usize| {
            u32::from_le_bytes([vendor[i], vendor[i + 1], vendor[i + 2], vendor[i + 3]])
        };

        Self::from_entries(vec![
            ((0x0, 0), [0xd, word(0), word(8), word(4)]),
            ((0x1, 0), [0x0006_06a6, 0x0001_0800, 0x0000_0201, 0x0780_8141]),
            ((0x7, 0), [0, 0, 0, 0]),
            ((0x8000_0000, 0), [0x8000_0008, 0, 0, 0]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_leaf_and_subleaf() {
        let table = CpuidTable::from_entries(vec![((1, 0), [1, 2, 3, 4]), ((4, 1), [5, 6, 7, 8])]);
        assert_eq!(table.lookup(1, 0), Some([1, 2, 3, 4]));
        assert_eq!(table.lookup(4, 1), Some([5, 6, 7, 8]));
        assert_none!(table.lookup(4, 0));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn capture_includes_basic_leaves() {
        let table = CpuidTable::capture();
        assert_some!(table.lookup(0, 0));
        assert_some!(table.lookup(1, 0));
    }
}
