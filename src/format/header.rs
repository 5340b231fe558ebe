//! Twin 4 KiB header pages.
//!
//! Page layout (body is self-checksummed; digest sits in the last 32
//! bytes of the page):
//!
//! ```text
//! Offset  Size  Field
//! 0       4     magic: b"MV2S"
//! 4       2     spec_version: u16 = 0x0100
//! 6       2     reserved: 0x0000
//! 8       8     header_page_generation: u64
//! 16      8     file_generation: u64
//! 24      8     footer_offset: u64
//! 32      8     wal_offset: u64
//! 40      8     wal_size: u64
//! 48      8     wal_write_pos: u64
//! 56      8     wal_checkpoint_pos: u64
//! 64      8     wal_committed_seq: u64
//! 72      32    toc_checksum
//! 104     3960  zero padding
//! 4064    32    self-SHA256 over bytes [0, 4064)
//! ```

use crate::checksum::{sha256, Digest32, DIGEST_SIZE};
use crate::error::{HeaderPage, Result, WaxError};
use crate::io::StoreFile;

use super::{
    HEADER_PAGE_A_OFFSET, HEADER_PAGE_B_OFFSET, HEADER_PAGE_SIZE, MAGIC_HEADER, SPEC_VERSION,
};

const CHECKSUM_OFFSET: usize = HEADER_PAGE_SIZE - DIGEST_SIZE;

/// The mutable header fields rewritten on every commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderState {
    pub file_generation: u64,
    pub footer_offset: u64,
    pub wal_offset: u64,
    pub wal_size: u64,
    pub wal_write_pos: u64,
    pub wal_checkpoint_pos: u64,
    pub wal_committed_seq: u64,
    pub toc_checksum: Digest32,
}

/// Encode one header page with the given page generation.
pub fn encode_page(state: &HeaderState, page_generation: u64) -> [u8; HEADER_PAGE_SIZE] {
    let mut page = [0u8; HEADER_PAGE_SIZE];
    page[0..4].copy_from_slice(&MAGIC_HEADER);
    page[4..6].copy_from_slice(&SPEC_VERSION.to_le_bytes());
    page[8..16].copy_from_slice(&page_generation.to_le_bytes());
    page[16..24].copy_from_slice(&state.file_generation.to_le_bytes());
    page[24..32].copy_from_slice(&state.footer_offset.to_le_bytes());
    page[32..40].copy_from_slice(&state.wal_offset.to_le_bytes());
    page[40..48].copy_from_slice(&state.wal_size.to_le_bytes());
    page[48..56].copy_from_slice(&state.wal_write_pos.to_le_bytes());
    page[56..64].copy_from_slice(&state.wal_checkpoint_pos.to_le_bytes());
    page[64..72].copy_from_slice(&state.wal_committed_seq.to_le_bytes());
    page[72..104].copy_from_slice(state.toc_checksum.as_bytes());
    let digest = sha256(&page[..CHECKSUM_OFFSET]);
    page[CHECKSUM_OFFSET..].copy_from_slice(digest.as_bytes());
    page
}

fn read_u64_at(page: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(page[offset..offset + 8].try_into().unwrap())
}

/// Decode one header page. Returns `(state, page_generation)`, or `None`
/// when the page fails its magic, version, or self-checksum.
pub fn decode_page(page: &[u8]) -> Option<(HeaderState, u64)> {
    if page.len() != HEADER_PAGE_SIZE {
        return None;
    }
    if page[0..4] != MAGIC_HEADER {
        return None;
    }
    if u16::from_le_bytes(page[4..6].try_into().unwrap()) != SPEC_VERSION {
        return None;
    }
    let stored = Digest32::from_slice(&page[CHECKSUM_OFFSET..])?;
    if sha256(&page[..CHECKSUM_OFFSET]) != stored {
        return None;
    }

    let page_generation = read_u64_at(page, 8);
    let state = HeaderState {
        file_generation: read_u64_at(page, 16),
        footer_offset: read_u64_at(page, 24),
        wal_offset: read_u64_at(page, 32),
        wal_size: read_u64_at(page, 40),
        wal_write_pos: read_u64_at(page, 48),
        wal_checkpoint_pos: read_u64_at(page, 56),
        wal_committed_seq: read_u64_at(page, 64),
        toc_checksum: Digest32::from_slice(&page[72..104])?,
    };
    Some((state, page_generation))
}

/// Read both pages and select the live one: the valid page with the
/// higher `header_page_generation` wins, ties go to page A.
///
/// Returns `corrupted_header(both)` when neither page validates; the
/// caller may then fall back to the footer scanner.
pub fn read_selected(file: &StoreFile) -> Result<(HeaderState, u64)> {
    let page_a = file.read_exactly(HEADER_PAGE_SIZE, HEADER_PAGE_A_OFFSET)?;
    let page_b = file.read_exactly(HEADER_PAGE_SIZE, HEADER_PAGE_B_OFFSET)?;

    let a = decode_page(&page_a);
    let b = decode_page(&page_b);

    match (a, b) {
        (Some((state_a, gen_a)), Some((_, gen_b))) if gen_a >= gen_b => Ok((state_a, gen_a)),
        (Some(_), Some((state_b, gen_b))) => Ok((state_b, gen_b)),
        (Some((state_a, gen_a)), None) => {
            tracing::warn!(page = "B", "header page failed validation, using twin");
            Ok((state_a, gen_a))
        }
        (None, Some((state_b, gen_b))) => {
            tracing::warn!(page = "A", "header page failed validation, using twin");
            Ok((state_b, gen_b))
        }
        (None, None) => Err(WaxError::CorruptedHeader(HeaderPage::Both)),
    }
}

/// Stage both pages: write A, fsync, write B, fsync. A crash between the
/// two fsyncs leaves one intact page at the previous or next generation.
pub fn write_pair(file: &StoreFile, state: &HeaderState, page_generation: u64) -> Result<()> {
    let page = encode_page(state, page_generation);
    file.write_all_at(&page, HEADER_PAGE_A_OFFSET)?;
    file.fsync()?;
    file.write_all_at(&page, HEADER_PAGE_B_OFFSET)?;
    file.fsync()?;
    tracing::debug!(
        header.page_generation = page_generation,
        header.file_generation = state.file_generation,
        header.footer_offset = state.footer_offset,
        "header pages staged"
    );
    Ok(())
}
