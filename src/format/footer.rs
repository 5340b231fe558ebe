//! Commit footers and the backward footer scanner.
//!
//! A footer anchors one commit. Layout (64 bytes):
//!
//! ```text
//! Offset  Size  Field
//! 0       8     magic: b"MV2SFOOT"
//! 8       8     toc_len: u64 (TOC body length, excluding trailing digest)
//! 16      32    toc_sha256
//! 48      8     generation: u64
//! 56      8     wal_committed_seq: u64
//! ```
//!
//! The TOC region sits immediately before its footer:
//! `[toc body][sha256(toc body)][footer]`.

use memchr::memmem;

use crate::checksum::{sha256, Digest32, DIGEST_SIZE};
use crate::codec::limits;
use crate::error::{Result, WaxError};
use crate::io::StoreFile;

use super::{FOOTER_SIZE, MAGIC_FOOTER};

/// One decoded footer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub toc_len: u64,
    pub toc_sha256: Digest32,
    pub generation: u64,
    pub wal_committed_seq: u64,
}

impl Footer {
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..8].copy_from_slice(&MAGIC_FOOTER);
        buf[8..16].copy_from_slice(&self.toc_len.to_le_bytes());
        buf[16..48].copy_from_slice(self.toc_sha256.as_bytes());
        buf[48..56].copy_from_slice(&self.generation.to_le_bytes());
        buf[56..64].copy_from_slice(&self.wal_committed_seq.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FOOTER_SIZE {
            return Err(WaxError::InvalidFooter(format!(
                "footer truncated: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..8] != MAGIC_FOOTER {
            return Err(WaxError::InvalidFooter("bad footer magic".into()));
        }
        Ok(Self {
            toc_len: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            toc_sha256: Digest32::from_slice(&bytes[16..48]).unwrap(),
            generation: u64::from_le_bytes(bytes[48..56].try_into().unwrap()),
            wal_committed_seq: u64::from_le_bytes(bytes[56..64].try_into().unwrap()),
        })
    }
}

/// A validated footer, with the file offsets of the footer itself and
/// the TOC body it names.
#[derive(Debug, Clone, Copy)]
pub struct ValidFooter {
    pub footer: Footer,
    pub footer_offset: u64,
    pub toc_offset: u64,
}

/// Read and fully validate the footer at a known offset (the normal
/// open path, driven by the header's `footer_offset`). Returns the
/// verified TOC body bytes along with the footer.
pub fn read_at(file: &StoreFile, footer_offset: u64) -> Result<(ValidFooter, Vec<u8>)> {
    let bytes = file.read_exactly(FOOTER_SIZE, footer_offset)?;
    let footer = Footer::decode(&bytes)?;
    let toc_body = verify_toc(file, footer_offset, &footer)?;
    Ok((
        ValidFooter {
            footer,
            footer_offset,
            toc_offset: footer_offset - DIGEST_SIZE as u64 - footer.toc_len,
        },
        toc_body,
    ))
}

/// Re-read the TOC named by `footer` and check both the trailing digest
/// and the footer's copy.
fn verify_toc(file: &StoreFile, footer_offset: u64, footer: &Footer) -> Result<Vec<u8>> {
    if footer.toc_len > limits::MAX_TOC_BYTES {
        return Err(WaxError::InvalidToc(format!(
            "toc length {} exceeds cap {}",
            footer.toc_len,
            limits::MAX_TOC_BYTES
        )));
    }
    let region_len = footer.toc_len + DIGEST_SIZE as u64;
    if footer_offset < region_len {
        return Err(WaxError::InvalidToc(format!(
            "toc of {} bytes cannot precede footer at offset {}",
            region_len, footer_offset
        )));
    }
    let toc_offset = footer_offset - region_len;
    let region = file.read_exactly(region_len as usize, toc_offset)?;
    let (body, trailing) = region.split_at(footer.toc_len as usize);
    let actual = sha256(body);
    if actual != footer.toc_sha256 {
        return Err(WaxError::InvalidToc(format!(
            "toc checksum mismatch at offset {toc_offset}: footer names {}, actual {actual}",
            footer.toc_sha256
        )));
    }
    if trailing != actual.as_bytes() {
        return Err(WaxError::InvalidToc(format!(
            "trailing toc digest mismatch at offset {toc_offset}"
        )));
    }
    Ok(body.to_vec())
}

/// Scan backward from the end of the file for the latest valid footer.
///
/// Candidates are every `MV2SFOOT` occurrence within the last
/// `max_footer_scan_bytes` of the file. A candidate is valid when its
/// TOC re-reads and re-hashes cleanly. Among valid candidates the winner
/// has the highest generation; ties break on highest committed seq,
/// then largest offset. This is the recovery path when both header
/// pages are damaged.
pub fn scan_back(file: &StoreFile) -> Result<(ValidFooter, Vec<u8>)> {
    let file_len = file.len()?;
    if file_len < FOOTER_SIZE as u64 {
        return Err(WaxError::InvalidFooter(format!(
            "file of {file_len} bytes cannot hold a footer"
        )));
    }
    let window_len = file_len.min(limits::MAX_FOOTER_SCAN_BYTES) as usize;
    let window_start = file_len - window_len as u64;
    let window = file.read_exactly(window_len, window_start)?;

    let mut best: Option<(ValidFooter, Vec<u8>)> = None;
    for pos in memmem::rfind_iter(&window, &MAGIC_FOOTER) {
        if pos + FOOTER_SIZE > window.len() {
            continue;
        }
        let footer_offset = window_start + pos as u64;
        let footer = match Footer::decode(&window[pos..pos + FOOTER_SIZE]) {
            Ok(f) => f,
            Err(_) => continue,
        };
        let toc_body = match verify_toc(file, footer_offset, &footer) {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!(
                    footer.offset = footer_offset,
                    footer.generation = footer.generation,
                    error = %err,
                    "footer candidate rejected"
                );
                continue;
            }
        };
        let candidate = ValidFooter {
            footer,
            footer_offset,
            toc_offset: footer_offset - DIGEST_SIZE as u64 - footer.toc_len,
        };
        let replace = match &best {
            None => true,
            Some((current, _)) => {
                let cur = (
                    current.footer.generation,
                    current.footer.wal_committed_seq,
                    current.footer_offset,
                );
                let new = (
                    footer.generation,
                    footer.wal_committed_seq,
                    footer_offset,
                );
                new > cur
            }
        };
        if replace {
            best = Some((candidate, toc_body));
        }
    }

    best.ok_or_else(|| {
        WaxError::InvalidFooter(format!(
            "no valid footer within the last {window_len} bytes"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LockMode;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, StoreFile) {
        let dir = TempDir::new().unwrap();
        let file = StoreFile::open(&dir.path().join("f.mv2s"), LockMode::Exclusive, true).unwrap();
        (dir, file)
    }

    /// Append `[toc body][digest][footer]` at `offset`, returning the
    /// offset one past the footer.
    fn append_commit(file: &StoreFile, offset: u64, body: &[u8], generation: u64, seq: u64) -> u64 {
        let digest = sha256(body);
        file.write_all_at(body, offset).unwrap();
        file.write_all_at(digest.as_bytes(), offset + body.len() as u64)
            .unwrap();
        let footer = Footer {
            toc_len: body.len() as u64,
            toc_sha256: digest,
            generation,
            wal_committed_seq: seq,
        };
        let footer_offset = offset + body.len() as u64 + DIGEST_SIZE as u64;
        file.write_all_at(&footer.encode(), footer_offset).unwrap();
        footer_offset + FOOTER_SIZE as u64
    }

    #[test]
    fn test_footer_encode_decode_roundtrip() {
        let footer = Footer {
            toc_len: 123,
            toc_sha256: sha256(b"toc"),
            generation: 7,
            wal_committed_seq: 42,
        };
        let decoded = Footer::decode(&footer.encode()).unwrap();
        assert_eq!(decoded, footer);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = Footer {
            toc_len: 0,
            toc_sha256: Digest32::ZERO,
            generation: 1,
            wal_committed_seq: 0,
        }
        .encode();
        bytes[0] = b'X';
        assert!(matches!(
            Footer::decode(&bytes),
            Err(WaxError::InvalidFooter(_))
        ));
    }

    #[test]
    fn test_read_at_verifies_toc() {
        let (_dir, file) = open_temp();
        let end = append_commit(&file, 0x100, b"toc-body-one", 1, 5);
        let footer_offset = end - FOOTER_SIZE as u64;

        let (valid, toc_body) = read_at(&file, footer_offset).unwrap();
        assert_eq!(valid.footer.generation, 1);
        assert_eq!(toc_body, b"toc-body-one");
        assert_eq!(valid.toc_offset, 0x100);
    }

    #[test]
    fn test_read_at_flags_corrupt_toc() {
        let (_dir, file) = open_temp();
        let end = append_commit(&file, 0x100, b"toc-body-one", 1, 5);
        let footer_offset = end - FOOTER_SIZE as u64;

        // Flip one byte inside the TOC body.
        file.write_all_at(b"X", 0x104).unwrap();
        let err = read_at(&file, footer_offset).unwrap_err();
        assert!(matches!(err, WaxError::InvalidToc(_)));
    }

    #[test]
    fn test_scan_finds_latest_generation() {
        let (_dir, file) = open_temp();
        let end1 = append_commit(&file, 0x100, b"generation-one", 1, 1);
        let _end2 = append_commit(&file, end1, b"generation-two", 2, 2);

        let (valid, toc_body) = scan_back(&file).unwrap();
        assert_eq!(valid.footer.generation, 2);
        assert_eq!(toc_body, b"generation-two");
    }

    #[test]
    fn test_scan_skips_corrupt_newest_toc() {
        // Two commits, one corrupted byte in the newer TOC: the
        // scanner must fall back to the older generation.
        let (_dir, file) = open_temp();
        let end1 = append_commit(&file, 0x100, b"generation-one", 1, 1);
        let _end2 = append_commit(&file, end1, b"generation-two", 2, 2);

        // end1 is where the second TOC body begins.
        file.write_all_at(b"?", end1 + 3).unwrap();

        let (valid, toc_body) = scan_back(&file).unwrap();
        assert_eq!(valid.footer.generation, 1);
        assert_eq!(valid.footer.wal_committed_seq, 1);
        assert_eq!(toc_body, b"generation-one");
    }

    #[test]
    fn test_scan_generation_tie_prefers_higher_seq() {
        let (_dir, file) = open_temp();
        let end1 = append_commit(&file, 0x100, b"same-gen-low", 3, 1);
        let _end2 = append_commit(&file, end1, b"same-gen-high", 3, 9);

        let (valid, toc_body) = scan_back(&file).unwrap();
        assert_eq!(valid.footer.wal_committed_seq, 9);
        assert_eq!(toc_body, b"same-gen-high");
    }

    #[test]
    fn test_scan_with_no_footer_fails() {
        let (_dir, file) = open_temp();
        file.write_all_at(&[0xAB; 4096], 0).unwrap();
        let err = scan_back(&file).unwrap_err();
        assert!(matches!(err, WaxError::InvalidFooter(_)));
    }

    #[test]
    fn test_scan_rejects_oversized_toc_claim() {
        let (_dir, file) = open_temp();
        // A footer whose toc_len is over the cap must be skipped.
        let footer = Footer {
            toc_len: limits::MAX_TOC_BYTES + 1,
            toc_sha256: Digest32::ZERO,
            generation: 9,
            wal_committed_seq: 9,
        };
        file.write_all_at(&footer.encode(), 0x200).unwrap();
        let err = scan_back(&file).unwrap_err();
        assert!(matches!(err, WaxError::InvalidFooter(_)));
    }
}
