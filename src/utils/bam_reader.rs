// src/utils/bam_reader.rs
use crate::error::{PipelineError, Result};
use rust_htslib::bam;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub struct BamReaderFactory;

impl BamReaderFactory {
    /// Opens a coordinate-sorted BAM through its index. A missing index is an error.
    pub fn open_indexed(bam_path: &Path) -> Result<bam::IndexedReader> {
        let index = Self::require_bam_index(bam_path)?;
        Ok(bam::IndexedReader::from_path_and_index(bam_path, index.as_path())?)
    }

    /// `<file>.bai`, `<stem>.bai` or `<file>.csi`, whichever exists first.
    pub fn find_bam_index(bam_path: &Path) -> Option<PathBuf> {
        let candidates = [
            append_extension(bam_path, "bai"),
            bam_path.with_extension("bai"),
            append_extension(bam_path, "csi"),
        ];
        candidates.into_iter().find(|p| p.exists())
    }

    pub fn require_bam_index(bam_path: &Path) -> Result<PathBuf> {
        Self::find_bam_index(bam_path).ok_or_else(|| PipelineError::MissingIndex {
            kind: "BAM",
            expected: append_extension(bam_path, "bai"),
        })
    }

    pub fn require_fasta_index(fasta_path: &Path) -> Result<PathBuf> {
        let fai = append_extension(fasta_path, "fai");
        if fai.exists() {
            Ok(fai)
        } else {
            Err(PipelineError::MissingIndex {
                kind: "FASTA",
                expected: fai,
            })
        }
    }
}

/// Target id of `ref_name`. An exact match wins, otherwise names are compared
/// case-insensitively.
pub fn find_tid(header: &bam::HeaderView, ref_name: &str) -> Option<u32> {
    header.tid(ref_name.as_bytes()).or_else(|| {
        (0..header.target_count())
            .find(|tid| String::from_utf8_lossy(header.tid2name(*tid)).eq_ignore_ascii_case(ref_name))
    })
}

fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn header(names: &[&str]) -> bam::HeaderView {
        let mut header = bam::Header::new();
        for name in names {
            let mut sq = bam::header::HeaderRecord::new(b"SQ");
            sq.push_tag(b"SN", *name);
            sq.push_tag(b"LN", 100);
            header.push_record(&sq);
        }
        bam::HeaderView::from_header(&header)
    }

    #[test]
    fn reference_names_resolve_ignoring_case() {
        let header = header(&["chr1", "Chr1", "ref2"]);
        assert_eq!(find_tid(&header, "chr1"), Some(0));
        assert_eq!(find_tid(&header, "Chr1"), Some(1));
        assert_eq!(find_tid(&header, "REF2"), Some(2));
        assert_eq!(find_tid(&header, "chrUn"), None);
    }

    #[test]
    fn reports_expected_bai_path() {
        let dir = tempfile::tempdir().unwrap();
        let bam = dir.path().join("sample.bam");
        fs::write(&bam, b"").unwrap();

        let err = BamReaderFactory::require_bam_index(&bam).unwrap_err();
        assert!(err.to_string().contains("sample.bam.bai"));

        fs::write(dir.path().join("sample.bai"), b"").unwrap();
        assert_eq!(
            BamReaderFactory::require_bam_index(&bam).unwrap(),
            dir.path().join("sample.bai")
        );
    }

    #[test]
    fn fasta_index_sits_next_to_fasta() {
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("ref.fasta");
        assert!(matches!(
            BamReaderFactory::require_fasta_index(&fasta),
            Err(PipelineError::MissingIndex { kind: "FASTA", .. })
        ));

        fs::write(dir.path().join("ref.fasta.fai"), b"").unwrap();
        assert!(BamReaderFactory::require_fasta_index(&fasta).is_ok());
    }
}
