//! PCAP sidecar spill file. Frames are written with their original
//! capture metadata so a batch the API refused can be replayed later
//! with the `send` command.

use super::Query;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const MAGIC: u32 = 0xa1b2_c3d4;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;
const SNAPLEN: u32 = 65536;
const LINKTYPE_ETHERNET: u32 = 1;

/// Append-only writer in classic PCAP format, native byte order.
#[derive(Debug)]
pub struct SidecarWriter {
    file: File,
    path: PathBuf,
}

impl SidecarWriter {
    /// Open for appending. The global header is written only when the
    /// file is new or empty; a restart keeps appending to the same
    /// capture.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let needs_header = match std::fs::metadata(path) {
            Ok(meta) => meta.len() == 0,
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(err) => return Err(err),
        };

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if needs_header {
            file.write_all(&file_header())?;
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the raw frames of a batch in order. Errors surface to the
    /// caller; partial writes are not retried here.
    pub fn write(&mut self, queries: &[Query]) -> io::Result<()> {
        for query in queries {
            let info = query.capture_info();
            let mut record = Vec::with_capacity(16 + query.raw().len());
            record.extend_from_slice(&(info.ts_sec as u32).to_ne_bytes());
            record.extend_from_slice(&(info.ts_usec as u32).to_ne_bytes());
            record.extend_from_slice(&(query.raw().len() as u32).to_ne_bytes());
            record.extend_from_slice(&info.len.to_ne_bytes());
            record.extend_from_slice(query.raw());
            self.file.write_all(&record)?;
        }
        self.file.flush()
    }
}

fn file_header() -> [u8; 24] {
    let mut header = [0u8; 24];
    header[0..4].copy_from_slice(&MAGIC.to_ne_bytes());
    header[4..6].copy_from_slice(&VERSION_MAJOR.to_ne_bytes());
    header[6..8].copy_from_slice(&VERSION_MINOR.to_ne_bytes());
    // thiszone and sigfigs stay zero
    header[16..20].copy_from_slice(&SNAPLEN.to_ne_bytes());
    header[20..24].copy_from_slice(&LINKTYPE_ETHERNET.to_ne_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::super::testutil::query_from;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_file_receives_a_global_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed.pcap");
        SidecarWriter::open(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 24);
        assert_eq!(bytes[0..4], MAGIC.to_ne_bytes());
        assert_eq!(bytes[16..20], SNAPLEN.to_ne_bytes());
        assert_eq!(bytes[20..24], LINKTYPE_ETHERNET.to_ne_bytes());
    }

    #[test]
    fn reopening_does_not_rewrite_the_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed.pcap");

        let mut writer = SidecarWriter::open(&path).unwrap();
        let query = query_from([10, 0, 0, 5], "example.com", 1);
        writer.write(std::slice::from_ref(&query)).unwrap();
        let written = std::fs::metadata(&path).unwrap().len();
        assert_eq!(written, 24 + 16 + query.raw().len() as u64);
        drop(writer);

        let mut writer = SidecarWriter::open(&path).unwrap();
        writer.write(std::slice::from_ref(&query)).unwrap();
        let grown = std::fs::metadata(&path).unwrap().len();
        assert_eq!(grown, written + 16 + query.raw().len() as u64);
    }

    #[test]
    fn zero_length_file_is_treated_as_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed.pcap");
        std::fs::write(&path, b"").unwrap();
        SidecarWriter::open(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 24);
    }

    #[test]
    fn records_keep_capture_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed.pcap");
        let mut writer = SidecarWriter::open(&path).unwrap();
        let query = query_from([10, 0, 0, 5], "example.com", 1);
        writer.write(std::slice::from_ref(&query)).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let record = &bytes[24..];
        assert_eq!(record[0..4], (query.capture_info().ts_sec as u32).to_ne_bytes());
        assert_eq!(record[4..8], (query.capture_info().ts_usec as u32).to_ne_bytes());
        assert_eq!(record[8..12], (query.raw().len() as u32).to_ne_bytes());
        assert_eq!(&record[16..], query.raw());
    }
}
