use crate::alignment::cigar::Positions;
use rust_htslib::bam::{self, record::Cigar, HeaderView};
use rust_htslib::htslib::{
    BAM_FDUP, BAM_FMUNMAP, BAM_FPAIRED, BAM_FREAD1, BAM_FREVERSE, BAM_FSECONDARY,
    BAM_FSUPPLEMENTARY, BAM_FUNMAP,
};

/// Owned copy of the parts of a BAM record the aggregators need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    pub name: String,
    pub tid: i32,
    pub reference_name: Option<String>,
    /// 0-based leftmost reference position.
    pub pos: i64,
    pub cigar: Vec<Cigar>,
    /// Upper-cased read bases.
    pub bases: Vec<u8>,
    pub quals: Vec<u8>,
    pub flags: u16,
    pub mapq: u8,
}

impl AlignmentRecord {
    pub fn from_bam(record: &bam::Record, header: &HeaderView) -> Self {
        let tid = record.tid();
        let reference_name = if tid >= 0 {
            Some(String::from_utf8_lossy(header.tid2name(tid as u32)).into_owned())
        } else {
            None
        };

        Self {
            name: String::from_utf8_lossy(record.qname()).into_owned(),
            tid,
            reference_name,
            pos: record.pos(),
            cigar: record.cigar().iter().cloned().collect(),
            bases: record.seq().as_bytes().to_ascii_uppercase(),
            quals: record.qual().to_vec(),
            flags: record.flags(),
            mapq: record.mapq(),
        }
    }

    fn has_flag(&self, flag: u32) -> bool {
        (self.flags as u32) & flag != 0
    }

    pub fn is_unmapped(&self) -> bool {
        self.has_flag(BAM_FUNMAP) || self.tid < 0
    }

    pub fn is_paired(&self) -> bool {
        self.has_flag(BAM_FPAIRED)
    }

    pub fn is_first_in_pair(&self) -> bool {
        self.has_flag(BAM_FREAD1)
    }

    pub fn is_mate_unmapped(&self) -> bool {
        self.has_flag(BAM_FMUNMAP)
    }

    pub fn is_reverse(&self) -> bool {
        self.has_flag(BAM_FREVERSE)
    }

    pub fn is_duplicate(&self) -> bool {
        self.has_flag(BAM_FDUP)
    }

    pub fn is_secondary_or_supplementary(&self) -> bool {
        self.has_flag(BAM_FSECONDARY) || self.has_flag(BAM_FSUPPLEMENTARY)
    }

    /// Number of reference bases spanned by the alignment.
    pub fn reference_length(&self) -> u32 {
        self.cigar
            .iter()
            .map(|op| match op {
                Cigar::Match(len)
                | Cigar::Equal(len)
                | Cigar::Diff(len)
                | Cigar::Del(len)
                | Cigar::RefSkip(len) => *len,
                _ => 0,
            })
            .sum()
    }

    /// Walks the CIGAR, yielding one [`PositionInfo`](crate::alignment::PositionInfo) per
    /// aligned, inserted, deleted or soft-clipped base. Each call starts a fresh walk.
    pub fn positions(&self) -> Positions<'_> {
        Positions::new(self)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::record;

    #[test]
    fn copies_fields_from_bam_record() {
        let rec = record("read1\t1107\tchr1\t11\t42\t2S4M1D3M\t*\t0\t0\tacgtacgtt\tIIIIIIIII");
        assert_eq!(rec.name, "read1");
        assert_eq!(rec.reference_name.as_deref(), Some("chr1"));
        assert_eq!(rec.pos, 10);
        assert_eq!(rec.bases, b"ACGTACGTT".to_vec());
        assert_eq!(rec.mapq, 42);
        assert_eq!(rec.reference_length(), 8);
        assert!(rec.is_paired());
        assert!(rec.is_reverse());
        assert!(rec.is_duplicate());
        assert!(!rec.is_unmapped());
    }

    #[test]
    fn unmapped_record_has_no_reference() {
        let rec = record("lost\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII");
        assert!(rec.is_unmapped());
        assert!(rec.reference_name.is_none());
        assert_eq!(rec.positions().count(), 0);
    }
}
