use crate::alignment::record::AlignmentRecord;
use rust_htslib::bam::record::Cigar;

/// Read base used for reference positions removed by a deletion.
pub const DELETED_BASE: u8 = b'-';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionKind {
    Aligned,
    Insertion,
    Deletion,
    SoftClip,
}

/// One (reference position, insert index) event from a CIGAR walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PositionInfo {
    pub kind: PositionKind,
    /// 0-based reference position. Inserted bases carry the last reference position
    /// preceding them; an insertion before any reference-consuming operation is anchored
    /// on the base before the alignment start (or 0).
    pub ref_position: u32,
    /// 0 for reference bases, 1.. for the bases of an insertion.
    pub insert_index: u32,
    /// Offset of the read base. For deletions this is the last read base consumed before
    /// the deletion.
    pub read_position: usize,
    /// Read offset whose base represents `ref_position` itself. Differs from
    /// `read_position` only for insertions.
    pub anchor_read_position: usize,
    pub read_base: u8,
    pub quality: u8,
    /// 1-based offset inside the current insertion or deletion, 0 otherwise.
    pub indel_offset: u32,
}

impl PositionInfo {
    /// Soft-clipped bases are walked but never contribute to SNP statistics.
    pub fn include_in_snp_count(&self) -> bool {
        self.kind != PositionKind::SoftClip
    }

    pub fn is_indel(&self) -> bool {
        matches!(self.kind, PositionKind::Insertion | PositionKind::Deletion)
    }
}

/// Iterator over the [`PositionInfo`] events of one alignment.
pub struct Positions<'a> {
    record: &'a AlignmentRecord,
    op_index: usize,
    op_offset: u32,
    ref_pos: u32,
    read_pos: usize,
    consumed_ref: bool,
    last_aligned_read: Option<usize>,
}

impl<'a> Positions<'a> {
    pub(crate) fn new(record: &'a AlignmentRecord) -> Self {
        // unmapped reads may still carry a CIGAR; they have no reference coordinates
        let op_index = if record.is_unmapped() { record.cigar.len() } else { 0 };
        Self {
            record,
            op_index,
            op_offset: 0,
            ref_pos: record.pos.max(0) as u32,
            read_pos: 0,
            consumed_ref: false,
            last_aligned_read: None,
        }
    }

    fn base_at(&self, offset: usize) -> u8 {
        self.record.bases.get(offset).copied().unwrap_or(b'N')
    }

    fn qual_at(&self, offset: usize) -> u8 {
        self.record.quals.get(offset).copied().unwrap_or(0)
    }

    fn anchor_ref_position(&self) -> u32 {
        self.ref_pos.saturating_sub(1)
    }
}

impl Iterator for Positions<'_> {
    type Item = PositionInfo;

    fn next(&mut self) -> Option<PositionInfo> {
        loop {
            let op = *self.record.cigar.get(self.op_index)?;
            let len = op.len();
            if self.op_offset >= len {
                self.op_index += 1;
                self.op_offset = 0;
                continue;
            }

            let offset = self.op_offset;
            self.op_offset += 1;

            match op {
                Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) => {
                    let info = PositionInfo {
                        kind: PositionKind::Aligned,
                        ref_position: self.ref_pos,
                        insert_index: 0,
                        read_position: self.read_pos,
                        anchor_read_position: self.read_pos,
                        read_base: self.base_at(self.read_pos),
                        quality: self.qual_at(self.read_pos),
                        indel_offset: 0,
                    };
                    self.last_aligned_read = Some(self.read_pos);
                    self.ref_pos += 1;
                    self.read_pos += 1;
                    self.consumed_ref = true;
                    return Some(info);
                }
                Cigar::Ins(_) => {
                    let info = PositionInfo {
                        kind: PositionKind::Insertion,
                        ref_position: self.anchor_ref_position(),
                        insert_index: offset + 1,
                        read_position: self.read_pos,
                        anchor_read_position: self.last_aligned_read.unwrap_or(self.read_pos),
                        read_base: self.base_at(self.read_pos),
                        quality: self.qual_at(self.read_pos),
                        indel_offset: offset + 1,
                    };
                    self.read_pos += 1;
                    return Some(info);
                }
                Cigar::Del(_) => {
                    let last_read = self.read_pos.saturating_sub(1);
                    let info = PositionInfo {
                        kind: PositionKind::Deletion,
                        ref_position: self.ref_pos,
                        insert_index: 0,
                        read_position: last_read,
                        anchor_read_position: last_read,
                        read_base: DELETED_BASE,
                        quality: self.qual_at(last_read),
                        indel_offset: offset + 1,
                    };
                    self.ref_pos += 1;
                    self.consumed_ref = true;
                    return Some(info);
                }
                Cigar::SoftClip(_) => {
                    let ref_position = if self.consumed_ref {
                        self.anchor_ref_position()
                    } else {
                        self.ref_pos
                    };
                    let info = PositionInfo {
                        kind: PositionKind::SoftClip,
                        ref_position,
                        insert_index: 0,
                        read_position: self.read_pos,
                        anchor_read_position: self.read_pos,
                        read_base: self.base_at(self.read_pos),
                        quality: self.qual_at(self.read_pos),
                        indel_offset: 0,
                    };
                    self.read_pos += 1;
                    return Some(info);
                }
                Cigar::RefSkip(_) => {
                    self.ref_pos += len - offset;
                    self.op_offset = len;
                    self.consumed_ref = true;
                }
                Cigar::HardClip(_) | Cigar::Pad(_) => {
                    self.op_offset = len;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::record::fixtures::record;

    fn walk(sam: &str) -> Vec<PositionInfo> {
        record(sam).positions().collect()
    }

    #[test]
    fn plain_match_walks_reference_positions() {
        let positions = walk("r\t0\tchr1\t5\t60\t4M\t*\t0\t0\tACGT\tABCD");
        let refs: Vec<u32> = positions.iter().map(|p| p.ref_position).collect();
        assert_eq!(refs, vec![4, 5, 6, 7]);
        assert!(positions.iter().all(|p| p.insert_index == 0 && p.include_in_snp_count()));
        assert_eq!(positions[2].read_base, b'G');
        assert_eq!(positions[2].quality, b'C' - 33);
    }

    #[test]
    fn insertion_numbers_bases_after_anchor() {
        let positions = walk("r\t0\tchr1\t5\t60\t2M3I2M\t*\t0\t0\tACTTTGT\tIIIIIII");
        let events: Vec<(u32, u32)> = positions.iter().map(|p| (p.ref_position, p.insert_index)).collect();
        assert_eq!(events, vec![(4, 0), (5, 0), (5, 1), (5, 2), (5, 3), (6, 0), (7, 0)]);
        assert_eq!(positions[3].kind, PositionKind::Insertion);
        assert_eq!(positions[3].anchor_read_position, 1);
        assert_eq!(positions[3].indel_offset, 2);
    }

    #[test]
    fn deletion_emits_gap_with_preceding_quality() {
        let positions = walk("r\t0\tchr1\t1\t60\t2M2D1M\t*\t0\t0\tACG\t#5I");
        let dels: Vec<&PositionInfo> = positions.iter().filter(|p| p.kind == PositionKind::Deletion).collect();
        assert_eq!(dels.len(), 2);
        assert_eq!(dels[0].ref_position, 2);
        assert_eq!(dels[1].ref_position, 3);
        assert!(dels.iter().all(|p| p.read_base == DELETED_BASE && p.insert_index == 0));
        assert_eq!(dels[0].quality, b'5' - 33);
        assert_eq!(positions.last().map(|p| p.ref_position), Some(4));
    }

    #[test]
    fn soft_clips_are_walked_but_excluded() {
        let positions = walk("r\t0\tchr1\t10\t60\t2S3M1S\t*\t0\t0\tNNACGN\tIIIIII");
        assert_eq!(positions.len(), 6);
        assert_eq!(positions.iter().filter(|p| p.include_in_snp_count()).count(), 3);
        assert_eq!(positions[2].ref_position, 9);
        assert_eq!(positions[2].read_position, 2);
    }

    #[test]
    fn hard_clips_and_skips_consume_no_read_bases() {
        let positions = walk("r\t0\tchr1\t10\t60\t3H2M5N2M2H\t*\t0\t0\tACGT\tIIII");
        let events: Vec<(u32, usize)> = positions.iter().map(|p| (p.ref_position, p.read_position)).collect();
        assert_eq!(events, vec![(9, 0), (10, 1), (16, 2), (17, 3)]);
    }

    #[test]
    fn leading_insertion_at_reference_start_does_not_underflow() {
        let positions = walk("r\t0\tchr1\t1\t60\t2I3M\t*\t0\t0\tTTACG\tIIIII");
        assert_eq!(positions[0].ref_position, 0);
        assert_eq!(positions[0].insert_index, 1);
        assert_eq!(positions[1].insert_index, 2);
        assert_eq!(positions[1].anchor_read_position, 1);
        assert_eq!(positions[2].ref_position, 0);
        assert_eq!(positions[2].insert_index, 0);
    }

    #[test]
    fn trailing_insertion_is_anchored_on_last_base() {
        let positions = walk("r\t0\tchr1\t20\t60\t3M2I\t*\t0\t0\tACGTT\tIIIII");
        let last = positions.last().copied().unwrap();
        assert_eq!((last.ref_position, last.insert_index), (21, 2));
        assert_eq!(last.anchor_read_position, 2);
    }

    #[test]
    fn walk_is_restartable() {
        let rec = record("r\t0\tchr1\t5\t60\t2M1I2M\t*\t0\t0\tACTGT\tIIIII");
        let first: Vec<PositionInfo> = rec.positions().collect();
        let second: Vec<PositionInfo> = rec.positions().collect();
        assert_eq!(first, second);
    }
}
