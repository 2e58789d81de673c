use crate::alignment::cigar::{PositionInfo, PositionKind, DELETED_BASE};
use crate::alignment::record::AlignmentRecord;
use std::collections::BTreeMap;
use std::fmt;

/// Candidate SNPs of one alignment keyed by 0-based reference position. Each list is ordered
/// by insert index.
pub type SnpMap = BTreeMap<u32, Vec<NtSnp>>;

/// Identity of a SNP within one alignment, as extracted from the CIGAR walk. Stays stable
/// when the SNP's insert index is later renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnpId {
    pub ref_position: u32,
    pub insert_index: u32,
}

/// A nucleotide mismatch between one read and the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtSnp {
    pub id: SnpId,
    pub reference_name: String,
    pub read_name: String,
    pub position: PositionInfo,
    pub insert_index: u32,
    pub reference_base: u8,
    pub read_base: u8,
}

impl NtSnp {
    pub fn last_ref_position(&self) -> u32 {
        self.position.ref_position
    }

    pub fn is_insertion(&self) -> bool {
        self.position.kind == PositionKind::Insertion
    }

    pub fn is_deletion(&self) -> bool {
        self.position.kind == PositionKind::Deletion
    }

    pub fn is_indel(&self) -> bool {
        self.position.is_indel()
    }

    pub fn read_base_string(&self) -> String {
        (self.read_base as char).to_string()
    }

    pub fn reference_base_string(&self) -> String {
        (self.reference_base as char).to_string()
    }

    /// Same SNP with a different insert index.
    pub fn with_insert_index(&self, insert_index: u32) -> Self {
        Self {
            insert_index,
            ..self.clone()
        }
    }
}

impl fmt::Display for NtSnp {
    /// `A123G`, or `-123.1T` for inserted bases. Positions are 1-based.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.reference_base as char, self.last_ref_position() + 1)?;
        if self.insert_index > 0 {
            write!(f, ".{}", self.insert_index)?;
        }
        write!(f, "{}", self.read_base as char)
    }
}

/// Reference base for a (position, insert index) pair. Inserted positions have no
/// reference base and compare as a gap.
pub fn reference_base_at(reference: &[u8], position: u32, insert_index: u32) -> u8 {
    if insert_index > 0 {
        return DELETED_BASE;
    }
    reference
        .get(position as usize)
        .map(|b| b.to_ascii_uppercase())
        .unwrap_or(b'N')
}

/// Walks `record` against `reference` and collects every counted position whose read base
/// differs from the reference base.
pub fn extract_snps(record: &AlignmentRecord, reference: &[u8]) -> SnpMap {
    let mut snps = SnpMap::new();
    let Some(reference_name) = record.reference_name.as_deref() else {
        return snps;
    };

    for pi in record.positions().filter(PositionInfo::include_in_snp_count) {
        let reference_base = reference_base_at(reference, pi.ref_position, pi.insert_index);
        let read_base = pi.read_base.to_ascii_uppercase();
        if reference_base == read_base {
            continue;
        }

        snps.entry(pi.ref_position).or_default().push(NtSnp {
            id: SnpId {
                ref_position: pi.ref_position,
                insert_index: pi.insert_index,
            },
            reference_name: reference_name.to_string(),
            read_name: record.name.clone(),
            position: pi,
            insert_index: pi.insert_index,
            reference_base,
            read_base,
        });
    }

    for list in snps.values_mut() {
        list.sort_by_key(|snp| (snp.last_ref_position(), snp.insert_index));
    }
    snps
}

/// Renumbers the inserted SNPs of one position densely from 1, keeping their order.
/// Filtering can remove bases from the middle of an insertion, leaving gaps.
pub fn renumber_insert_indices(snps: &[NtSnp]) -> Vec<NtSnp> {
    let mut idx = 0;
    snps.iter()
        .map(|snp| {
            if snp.insert_index == 0 {
                return snp.clone();
            }
            idx += 1;
            if idx != snp.insert_index {
                snp.with_insert_index(idx)
            } else {
                snp.clone()
            }
        })
        .collect()
}
