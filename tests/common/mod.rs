#![allow(dead_code)]

use rust_htslib::bam::{self, header::HeaderRecord, Header, HeaderView};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// An indexed BAM and FASTA written into a temporary directory.
pub struct Fixture {
    pub dir: TempDir,
    pub bam: PathBuf,
    pub fasta: PathBuf,
}

impl Fixture {
    /// `records` must already be coordinate sorted, unmapped reads last.
    pub fn new(references: &[(&str, &str)], records: &[&str]) -> Self {
        let fixture = Self::unindexed(references, records);
        bam::index::build(&fixture.bam, None, bam::index::Type::Bai, 1).unwrap();
        fixture
    }

    /// Same as [`new`](Self::new) without the `.bai`.
    pub fn unindexed(references: &[(&str, &str)], records: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("ref.fasta");
        let bam_path = dir.path().join("sample.bam");

        let mut fa = String::new();
        let mut fai = String::new();
        for (name, bases) in references {
            let header_line = format!(">{}\n", name);
            let offset = fa.len() + header_line.len();
            fa.push_str(&header_line);
            fa.push_str(bases);
            fa.push('\n');
            fai.push_str(&format!("{}\t{}\t{}\t{}\t{}\n", name, bases.len(), offset, bases.len(), bases.len() + 1));
        }
        fs::write(&fasta, fa).unwrap();
        fs::write(dir.path().join("ref.fasta.fai"), fai).unwrap();

        let mut header = Header::new();
        for (name, bases) in references {
            header.push_record(
                HeaderRecord::new(b"SQ")
                    .push_tag(b"SN", *name)
                    .push_tag(b"LN", bases.len()),
            );
        }
        let view = HeaderView::from_header(&header);
        {
            let mut writer = bam::Writer::from_path(&bam_path, &header, bam::Format::Bam).unwrap();
            for line in records {
                let record = bam::Record::from_sam(&view, line.as_bytes()).unwrap();
                writer.write(&record).unwrap();
            }
        }

        Self {
            dir,
            bam: bam_path,
            fasta,
        }
    }

    /// Writes `<fasta stem>.idKey.txt`.
    pub fn with_id_key(self, ids: &[(i64, &str)]) -> Self {
        let mut key = String::from("RowId\tName\n");
        for (id, name) in ids {
            key.push_str(&format!("{}\t{}\n", id, name));
        }
        fs::write(self.dir.path().join("ref.idKey.txt"), key).unwrap();
        self
    }
}
