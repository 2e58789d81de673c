use crate::alignment::{NtSnp, SnpMap};
use crate::reference::{PeptideModel, ReferenceSequence};
use crate::translation::codon::{complement, translate_read_residue};
use log::error;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Longest codon string reported as a single amino acid call. Longer ones are split into
/// codon-sized pieces, each with its own AA insert index.
const MAX_SINGLE_CODON_LEN: usize = 4;

/// An amino acid call derived from the NT SNPs of one read.
#[derive(Debug, Clone, PartialEq)]
pub struct AaSnp {
    /// SNP whose translation produced this call.
    pub nt_snp: NtSnp,
    pub peptide_id: i64,
    pub peptide_name: String,
    pub ref_nt_id: i64,
    /// 1-based position in the peptide.
    pub aa_position: u32,
    pub aa_insert_index: u32,
    /// Read bases of the codon on the coding strand, gaps included.
    pub codon: String,
    pub frame: u32,
    /// Every NT SNP that fell inside the codon.
    pub contributing: Vec<NtSnp>,
    pub reference_residue: String,
    pub read_residue: String,
}

impl AaSnp {
    /// `T4A;-5.1G` style list of the SNPs behind this call.
    pub fn nt_position_string(&self) -> String {
        let mut snps: Vec<&NtSnp> = self.contributing.iter().collect();
        snps.sort_by_key(|s| (s.last_ref_position(), s.insert_index));
        snps.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(";")
    }

    pub fn is_synonymous(&self) -> bool {
        self.read_residue == self.reference_residue
    }
}

/// Translates NT SNPs of one reference into AA calls for the peptides annotated on it.
pub struct TranslatingReferenceSequence {
    ref_nt_id: i64,
    reference: Rc<ReferenceSequence>,
    peptides: Vec<PeptideModel>,
}

impl TranslatingReferenceSequence {
    pub fn new(ref_nt_id: i64, reference: Rc<ReferenceSequence>, peptides: Vec<PeptideModel>) -> Self {
        Self {
            ref_nt_id,
            reference,
            peptides,
        }
    }

    pub fn ref_nt_id(&self) -> i64 {
        self.ref_nt_id
    }

    pub fn reference_name(&self) -> &str {
        &self.reference.name
    }

    /// One call per (SNP, peptide exon) overlap. SNPs sharing a codon give calls with the same
    /// codon, which callers merge.
    pub fn translate_snps_for_read(&self, snps: &SnpMap) -> Vec<AaSnp> {
        let mut calls = Vec::new();
        for snp in snps.values().flatten() {
            for peptide in &self.peptides {
                self.translate_snp(snp, peptide, snps, &mut calls);
            }
        }
        calls
    }

    fn reference_base(&self, position1: i64) -> u8 {
        if position1 < 1 {
            return b'N';
        }
        self.reference.base_at((position1 - 1) as u32).unwrap_or(b'N')
    }

    fn translate_snp(&self, snp: &NtSnp, peptide: &PeptideModel, snps: &SnpMap, calls: &mut Vec<AaSnp>) {
        let r_pos1 = i64::from(snp.last_ref_position()) + 1;

        let mut nt_offset: i64 = 0;
        for &(exon_start, exon_end) in &peptide.exons {
            let (exon_start, exon_end) = (i64::from(exon_start), i64::from(exon_end));
            if exon_start <= r_pos1 && r_pos1 <= exon_end {
                let nt_pos = if peptide.complement {
                    exon_end - r_pos1 + nt_offset
                } else {
                    r_pos1 - exon_start + nt_offset
                };
                let aa_position = (nt_pos / 3 + 1) as u32;
                let frame = (nt_pos % 3) as u32;

                if aa_position as usize > peptide.len() {
                    error!(
                        "AA Position exceeds peptide length for peptide {}: {} / {}",
                        peptide.name,
                        aa_position,
                        peptide.len()
                    );
                }

                let positions = codon_positions(r_pos1, frame, peptide.complement);
                self.push_calls(snp, peptide, snps, positions, aa_position, frame, calls);
            }
            nt_offset += exon_end - exon_start + 1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_calls(
        &self,
        snp: &NtSnp,
        peptide: &PeptideModel,
        snps: &SnpMap,
        positions: [i64; 3],
        aa_position: u32,
        frame: u32,
        calls: &mut Vec<AaSnp>,
    ) {
        let mut codon: Vec<u8> = Vec::with_capacity(3);
        let mut slots: BTreeMap<usize, &NtSnp> = BTreeMap::new();
        let mut position_in_codon: Option<usize> = None;

        for position1 in positions {
            let at_position = if position1 >= 1 {
                snps.get(&((position1 - 1) as u32))
            } else {
                None
            };

            let Some(others) = at_position else {
                codon.push(self.reference_base(position1));
                continue;
            };

            let mut by_index: Vec<&NtSnp> = others.iter().collect();
            by_index.sort_by_key(|s| s.insert_index);

            let mut segment: Vec<u8> = Vec::new();
            let mut segment_slots: Vec<(usize, &NtSnp)> = Vec::new();
            let mut position_in_segment: Option<usize> = None;

            if !by_index.iter().any(|s| s.insert_index == 0) {
                segment.push(self.reference_base(position1));
            }
            for other in by_index {
                segment_slots.push((segment.len(), other));
                if other.id == snp.id {
                    position_in_segment = Some(segment.len());
                }
                segment.push(other.read_base);
            }

            if peptide.complement {
                let last = segment.len() - 1;
                segment.reverse();
                for slot in segment_slots.iter_mut() {
                    slot.0 = last - slot.0;
                }
                position_in_segment = position_in_segment.map(|p| last - p);
            }

            let offset = codon.len();
            for (idx, other) in segment_slots {
                slots.insert(offset + idx, other);
            }
            if let Some(p) = position_in_segment {
                position_in_codon = Some(offset + p);
            }
            codon.extend_from_slice(&segment);
        }

        if peptide.complement {
            for base in codon.iter_mut() {
                *base = complement(*base);
            }
        }

        let (aa_insert_index, range) = if codon.len() <= MAX_SINGLE_CODON_LEN {
            (0, 0..codon.len())
        } else {
            let aa_insert_index = position_in_codon.unwrap_or(0) / 3;
            let start = aa_insert_index * 3;
            let stop = if codon.len() - start <= MAX_SINGLE_CODON_LEN {
                codon.len()
            } else {
                start + 3
            };
            (aa_insert_index as u32, start..stop)
        };

        let codon_string = String::from_utf8_lossy(&codon[range.clone()]).into_owned();
        let contributing: Vec<NtSnp> = slots
            .range(range)
            .map(|(_, s)| (*s).clone())
            .collect();

        let reference_residue = if aa_insert_index > 0 {
            "-".to_string()
        } else {
            peptide
                .residue_at(aa_position)
                .map(|c| c.to_string())
                .unwrap_or_else(|| "X".to_string())
        };

        calls.push(AaSnp {
            nt_snp: snp.clone(),
            peptide_id: peptide.id,
            peptide_name: peptide.name.clone(),
            ref_nt_id: self.ref_nt_id,
            aa_position,
            aa_insert_index,
            read_residue: translate_read_residue(&codon_string),
            codon: codon_string,
            frame,
            contributing,
            reference_residue,
        });
    }
}

/// 1-based reference positions of the codon holding `r_pos1`, in coding order.
fn codon_positions(r_pos1: i64, frame: u32, complement: bool) -> [i64; 3] {
    match (complement, frame) {
        (false, 0) => [r_pos1, r_pos1 + 1, r_pos1 + 2],
        (false, 1) => [r_pos1 - 1, r_pos1, r_pos1 + 1],
        (false, _) => [r_pos1 - 2, r_pos1 - 1, r_pos1],
        (true, 0) => [r_pos1, r_pos1 - 1, r_pos1 - 2],
        (true, 1) => [r_pos1 + 1, r_pos1, r_pos1 - 1],
        (true, _) => [r_pos1 + 2, r_pos1 + 1, r_pos1],
    }
}
