pub mod cigar;
pub mod record;
pub mod snp;

pub use cigar::{PositionInfo, PositionKind, Positions};
pub use record::AlignmentRecord;
pub use snp::{extract_snps, renumber_insert_indices, NtSnp, SnpId, SnpMap};
