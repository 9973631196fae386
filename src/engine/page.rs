//! Fixed-size 4096-byte page: typed header, CRC32 over the whole page with
//! the CRC field zeroed, and a 4061-byte payload. A commit is one aligned
//! write, so a torn page is always caught by CRC on the next read.

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32Hasher;

use crate::stream::ByteStream;
use crate::types::{
    DocumentId, NO_PAGE, PAGE_HEADER_SIZE, PAGE_PAYLOAD_SIZE, PAGE_RAW_SIZE, PageId, page_offset,
};
use crate::utils::errors::DbError;

/// Bit 7 of the type byte marks a freed variant of any page type.
const FREE_FLAG: u8 = 0x80;
const TYPE_MASK: u8 = 0x7F;

/// Header field offsets in the serialized page.
const OFF_DID: usize = 0;
const OFF_FIRST: usize = 16;
const OFF_TYPE: usize = 20;
const OFF_SEQ: usize = 21;
const OFF_PREV: usize = 23;
const OFF_NEXT: usize = 27;
const OFF_CRC: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Invalid,
    Root,
    Index,
    FreeList,
    PathLookup,
    Data,
}

impl PageType {
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Root => 1,
            Self::Index => 2,
            Self::FreeList => 3,
            Self::PathLookup => 4,
            Self::Data => 5,
        }
    }

    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        match b & TYPE_MASK {
            1 => Self::Root,
            2 => Self::Index,
            3 => Self::FreeList,
            4 => Self::PathLookup,
            5 => Self::Data,
            _ => Self::Invalid,
        }
    }
}

/// One page, materialised transiently in memory.
#[derive(Debug, Clone)]
pub struct Page {
    pid: PageId,
    pub did: DocumentId,
    pub first_page_id: PageId,
    pub page_type: PageType,
    pub free: bool,
    pub sequence: u16,
    pub prev_page_id: PageId,
    pub next_page_id: PageId,
    payload: Box<[u8]>,
}

impl Page {
    #[must_use]
    pub fn new(pid: PageId) -> Self {
        Self {
            pid,
            did: DocumentId::nil(),
            first_page_id: pid,
            page_type: PageType::Invalid,
            free: false,
            sequence: 0,
            prev_page_id: NO_PAGE,
            next_page_id: NO_PAGE,
            payload: vec![0u8; PAGE_PAYLOAD_SIZE].into_boxed_slice(),
        }
    }

    #[must_use]
    pub const fn pid(&self) -> PageId {
        self.pid
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    pub fn zero_payload(&mut self) {
        self.payload.fill(0);
    }

    /// Used payload length. Interior chain pages carry a forward pointer
    /// and are full; the final page encodes its used length in the next
    /// field as `-1 - used`.
    #[must_use]
    pub fn used_len(&self) -> usize {
        if self.next_page_id >= 0 {
            PAGE_PAYLOAD_SIZE
        } else {
            (-1 - self.next_page_id) as usize
        }
    }

    /// Turn this page into a chain tail holding `used` payload bytes.
    pub fn set_end_marker(&mut self, used: usize) {
        debug_assert!(used <= PAGE_PAYLOAD_SIZE);
        self.next_page_id = -1 - used as i32;
    }

    /// Whether this page is the final page of its chain.
    #[must_use]
    pub const fn is_chain_end(&self) -> bool {
        self.next_page_id < 0
    }

    /// Read and validate the page at `pid`. Fails with `CorruptPage` when
    /// the stored CRC does not match the page image.
    pub fn read<S: ByteStream>(stream: &mut S, pid: PageId) -> Result<Self, DbError> {
        if pid < 0 {
            return Err(DbError::InvalidPageId(pid));
        }
        let mut raw = vec![0u8; PAGE_RAW_SIZE];
        stream.seek(page_offset(pid))?;
        stream.read_exact(&mut raw)?;
        Self::from_raw(pid, &raw)
    }

    /// Whether a raw page image's stored CRC matches its contents.
    #[must_use]
    pub fn validate_crc(raw: &[u8]) -> bool {
        LittleEndian::read_u32(&raw[OFF_CRC..OFF_CRC + 4]) == compute_crc(raw)
    }

    /// Parse a raw 4096-byte image, validating the CRC.
    pub fn from_raw(pid: PageId, raw: &[u8]) -> Result<Self, DbError> {
        debug_assert_eq!(raw.len(), PAGE_RAW_SIZE);
        if !Self::validate_crc(raw) {
            return Err(DbError::CorruptPage(pid));
        }
        let mut did = [0u8; 16];
        did.copy_from_slice(&raw[OFF_DID..OFF_DID + 16]);
        let type_byte = raw[OFF_TYPE];
        let mut payload = vec![0u8; PAGE_PAYLOAD_SIZE].into_boxed_slice();
        payload.copy_from_slice(&raw[PAGE_HEADER_SIZE..]);
        Ok(Self {
            pid,
            did: DocumentId::from_bytes(did),
            first_page_id: LittleEndian::read_i32(&raw[OFF_FIRST..OFF_FIRST + 4]),
            page_type: PageType::from_byte(type_byte),
            free: type_byte & FREE_FLAG != 0,
            sequence: LittleEndian::read_u16(&raw[OFF_SEQ..OFF_SEQ + 2]),
            prev_page_id: LittleEndian::read_i32(&raw[OFF_PREV..OFF_PREV + 4]),
            next_page_id: LittleEndian::read_i32(&raw[OFF_NEXT..OFF_NEXT + 4]),
            payload,
        })
    }

    /// Serialize to the on-disk image with a freshly computed CRC.
    #[must_use]
    pub fn to_raw(&self) -> Vec<u8> {
        let mut raw = vec![0u8; PAGE_RAW_SIZE];
        raw[OFF_DID..OFF_DID + 16].copy_from_slice(self.did.as_bytes());
        LittleEndian::write_i32(&mut raw[OFF_FIRST..OFF_FIRST + 4], self.first_page_id);
        raw[OFF_TYPE] = self.page_type.to_byte() | if self.free { FREE_FLAG } else { 0 };
        LittleEndian::write_u16(&mut raw[OFF_SEQ..OFF_SEQ + 2], self.sequence);
        LittleEndian::write_i32(&mut raw[OFF_PREV..OFF_PREV + 4], self.prev_page_id);
        LittleEndian::write_i32(&mut raw[OFF_NEXT..OFF_NEXT + 4], self.next_page_id);
        raw[PAGE_HEADER_SIZE..].copy_from_slice(&self.payload);
        let crc = compute_crc(&raw);
        LittleEndian::write_u32(&mut raw[OFF_CRC..OFF_CRC + 4], crc);
        raw
    }

    /// Update the CRC and write the page in place as a single aligned
    /// write. Durability comes from the caller: releasing a write lease
    /// flushes, as does an explicit stream flush.
    pub fn commit<S: ByteStream>(&self, stream: &mut S) -> Result<(), DbError> {
        let raw = self.to_raw();
        stream.seek(page_offset(self.pid))?;
        stream.write(&raw).map_err(DbError::from_write)?;
        Ok(())
    }
}

/// CRC-32 (polynomial 0xEDB88320, seed and final XOR 0xFFFFFFFF) over the
/// full page image with the CRC field treated as zero.
#[must_use]
pub fn compute_crc(raw: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(&raw[..OFF_CRC]);
    hasher.update(&[0u8; 4]);
    hasher.update(&raw[OFF_CRC + 4..]);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ByteStream, memory};

    #[test]
    fn round_trips_through_raw_image() {
        let mut page = Page::new(7);
        page.did = DocumentId::new();
        page.page_type = PageType::Data;
        page.sequence = 3;
        page.prev_page_id = 6;
        page.set_end_marker(151);
        page.payload_mut()[..5].copy_from_slice(b"hello");

        let raw = page.to_raw();
        let back = Page::from_raw(7, &raw).unwrap();
        assert_eq!(back.did, page.did);
        assert_eq!(back.page_type, PageType::Data);
        assert_eq!(back.sequence, 3);
        assert_eq!(back.prev_page_id, 6);
        assert_eq!(back.used_len(), 151);
        assert_eq!(&back.payload()[..5], b"hello");
    }

    #[test]
    fn crc_covers_every_byte() {
        let mut page = Page::new(0);
        page.page_type = PageType::Data;
        let mut raw = page.to_raw();
        for idx in [0usize, 20, 40, 4095] {
            raw[idx] ^= 0xFF;
            assert!(matches!(Page::from_raw(0, &raw), Err(DbError::CorruptPage(0))));
            raw[idx] ^= 0xFF;
        }
        assert!(Page::from_raw(0, &raw).is_ok());
    }

    #[test]
    fn commit_writes_at_page_offset() {
        let mut stream = memory();
        let mut page = Page::new(2);
        page.page_type = PageType::FreeList;
        page.commit(&mut stream).unwrap();
        assert_eq!(stream.len().unwrap(), page_offset(2) + PAGE_RAW_SIZE as u64);
        let back = Page::read(&mut stream, 2).unwrap();
        assert_eq!(back.page_type, PageType::FreeList);
        assert!(!back.free);
    }

    #[test]
    fn free_flag_survives_round_trip() {
        let mut page = Page::new(9);
        page.page_type = PageType::Data;
        page.free = true;
        let back = Page::from_raw(9, &page.to_raw()).unwrap();
        assert_eq!(back.page_type, PageType::Data);
        assert!(back.free);
    }

    #[test]
    fn end_marker_encodes_used_length() {
        let mut page = Page::new(1);
        page.set_end_marker(0);
        assert_eq!(page.next_page_id, -1);
        assert_eq!(page.used_len(), 0);
        page.set_end_marker(PAGE_PAYLOAD_SIZE);
        assert_eq!(page.used_len(), PAGE_PAYLOAD_SIZE);
        page.next_page_id = 12;
        assert_eq!(page.used_len(), PAGE_PAYLOAD_SIZE);
    }
}
