//! `BID -> location` directory, one fixed-width record per BID
//! (`SPEC_FULL.md` §4.7).
//!
//! Field widths are computed once from workload bounds via
//! [`crate::bitcodec::required_bytes`] and then used for every
//! subsequent `get`/`put`, so the directory as a whole is exactly
//! `n_max * record_width` bytes: sized, allocated, and never resized.

use crate::bitcodec::{read_uint, write_uint};

/// `BID -> (size_class, offset)` for the heap-backed (MF) engine.
/// `size_class == 0` is the "unallocated" sentinel (I3 in `SPEC_FULL.md`
/// §3); live classes are stored as `1 + table_index`.
#[derive(Debug)]
pub struct MfBlockDirectory {
    buf: Vec<u8>,
    class_width: u8,
    offset_width: u8,
    record_width: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfRecord {
    pub class: u32,
    pub offset: u32,
}

impl MfRecord {
    pub const UNALLOCATED: MfRecord = MfRecord { class: 0, offset: 0 };

    pub fn is_live(&self) -> bool {
        self.class != 0
    }
}

impl MfBlockDirectory {
    /// `num_classes` is the size-class table length; `max_offset` an
    /// upper bound on any block manager's object count (`n_max` is a
    /// safe, always-correct choice).
    pub fn new(
        n_max: u32,
        num_classes: usize,
        max_offset: u32,
        metadata_mode: crate::config::MetadataMode,
    ) -> Self {
        let class_width = crate::bitcodec::field_width(
            crate::bitcodec::required_bytes((num_classes + 1) as u64),
            metadata_mode,
        );
        let offset_width = crate::bitcodec::field_width(
            crate::bitcodec::required_bytes((max_offset as u64).max(1)),
            metadata_mode,
        );
        let record_width = class_width as usize + offset_width as usize;
        MfBlockDirectory {
            buf: vec![0u8; record_width * n_max as usize],
            class_width,
            offset_width,
            record_width,
        }
    }

    pub fn record_width(&self) -> usize {
        self.record_width
    }

    fn slice(&self, bid: u32) -> &[u8] {
        let start = bid as usize * self.record_width;
        &self.buf[start..start + self.record_width]
    }

    fn slice_mut(&mut self, bid: u32) -> &mut [u8] {
        let start = bid as usize * self.record_width;
        &mut self.buf[start..start + self.record_width]
    }

    pub fn get(&self, bid: u32) -> MfRecord {
        let rec = self.slice(bid);
        let class = read_uint(rec, self.class_width) as u32;
        let offset = read_uint(&rec[self.class_width as usize..], self.offset_width) as u32;
        MfRecord { class, offset }
    }

    pub fn is_live(&self, bid: u32) -> bool {
        self.get(bid).is_live()
    }

    pub fn put(&mut self, bid: u32, class: u32, offset: u32) {
        let cw = self.class_width;
        let ow = self.offset_width;
        let rec = self.slice_mut(bid);
        write_uint(rec, cw, class as u64);
        write_uint(&mut rec[cw as usize..], ow, offset as u64);
    }

    pub fn put_offset(&mut self, bid: u32, offset: u32) {
        let cw = self.class_width;
        let ow = self.offset_width;
        let rec = self.slice_mut(bid);
        write_uint(&mut rec[cw as usize..], ow, offset as u64);
    }

    pub fn put_class(&mut self, bid: u32, class: u32) {
        let cw = self.class_width;
        let rec = self.slice_mut(bid);
        write_uint(rec, cw, class as u64);
    }

    pub fn clear(&mut self, bid: u32) {
        self.put(bid, 0, 0);
    }
}

/// `BID -> (offset, logical_page_id)` for the page-mapped (VMF) engine.
#[derive(Debug)]
pub struct VmfBlockDirectory {
    buf: Vec<u8>,
    offset_width: u8,
    page_width: u8,
    record_width: usize,
}

/// A raw directory record. `page` is stored truncated to this
/// directory's configured page width, so whether it denotes "live" can
/// only be judged against that directory's own `null_page()` sentinel
/// (see [`VmfBlockDirectory::is_live`]) — there is no width-independent
/// sentinel value to compare against directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmfRecord {
    pub offset: u32,
    pub page: u32,
}

impl VmfBlockDirectory {
    /// `page_max` is an upper bound on live logical-page ids (`P_max`);
    /// the encoded width must also be able to hold the all-ones sentinel
    /// truncated to that width, so the width is computed from
    /// `page_max + 1` and the directory always stores the *truncated*
    /// all-ones pattern for that width as the sentinel (see
    /// [`VmfBlockDirectory::null_page`]).
    pub fn new(
        n_max: u32,
        page_size: usize,
        page_max: u32,
        metadata_mode: crate::config::MetadataMode,
    ) -> Self {
        let offset_width =
            crate::bitcodec::field_width(crate::bitcodec::required_bytes(page_size as u64), metadata_mode);
        let page_width = crate::bitcodec::field_width(
            crate::bitcodec::required_bytes((page_max as u64) + 1),
            metadata_mode,
        );
        let record_width = offset_width as usize + page_width as usize;
        let mut dir = VmfBlockDirectory {
            buf: vec![0u8; record_width * n_max as usize],
            offset_width,
            page_width,
            record_width,
        };
        for bid in 0..n_max {
            dir.put(bid, 0, dir.null_page());
        }
        dir
    }

    /// The all-ones pattern for this directory's page width, used as
    /// the "unallocated" sentinel.
    pub fn null_page(&self) -> u32 {
        let bits = self.page_width as u32 * 8;
        if bits >= 32 {
            u32::MAX
        } else {
            (1u32 << bits) - 1
        }
    }

    pub fn record_width(&self) -> usize {
        self.record_width
    }

    fn slice(&self, bid: u32) -> &[u8] {
        let start = bid as usize * self.record_width;
        &self.buf[start..start + self.record_width]
    }

    fn slice_mut(&mut self, bid: u32) -> &mut [u8] {
        let start = bid as usize * self.record_width;
        &mut self.buf[start..start + self.record_width]
    }

    pub fn get(&self, bid: u32) -> VmfRecord {
        let rec = self.slice(bid);
        let offset = read_uint(rec, self.offset_width) as u32;
        let page = read_uint(&rec[self.offset_width as usize..], self.page_width) as u32;
        VmfRecord { offset, page }
    }

    pub fn is_live(&self, bid: u32) -> bool {
        self.get(bid).page != self.null_page()
    }

    pub fn put(&mut self, bid: u32, offset: u32, page: u32) {
        let ow = self.offset_width;
        let pw = self.page_width;
        let rec = self.slice_mut(bid);
        write_uint(rec, ow, offset as u64);
        write_uint(&mut rec[ow as usize..], pw, page as u64);
    }

    pub fn put_page(&mut self, bid: u32, page: u32) {
        let ow = self.offset_width;
        let pw = self.page_width;
        let rec = self.slice_mut(bid);
        write_uint(&mut rec[ow as usize..], pw, page as u64);
    }

    pub fn clear(&mut self, bid: u32) {
        let null = self.null_page();
        self.put(bid, 0, null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mf_fresh_directory_is_all_unallocated() {
        let dir = MfBlockDirectory::new(16, 10, 16, crate::config::MetadataMode::Packed);
        for bid in 0..16 {
            assert!(!dir.is_live(bid));
        }
    }

    #[test]
    fn mf_put_get_round_trip() {
        let mut dir = MfBlockDirectory::new(16, 10, 16, crate::config::MetadataMode::Packed);
        dir.put(5, 3, 7);
        let r = dir.get(5);
        assert_eq!(r, MfRecord { class: 3, offset: 7 });
        assert!(r.is_live());
        dir.clear(5);
        assert!(!dir.get(5).is_live());
    }

    #[test]
    fn mf_put_offset_preserves_class() {
        let mut dir = MfBlockDirectory::new(4, 10, 16, crate::config::MetadataMode::Packed);
        dir.put(0, 2, 1);
        dir.put_offset(0, 9);
        assert_eq!(dir.get(0), MfRecord { class: 2, offset: 9 });
    }

    #[test]
    fn vmf_fresh_directory_is_all_unallocated() {
        let dir = VmfBlockDirectory::new(16, 4096, 64, crate::config::MetadataMode::Packed);
        for bid in 0..16 {
            assert!(!dir.is_live(bid));
        }
    }

    #[test]
    fn vmf_put_get_round_trip_and_sentinel() {
        let mut dir = VmfBlockDirectory::new(8, 4096, 64, crate::config::MetadataMode::Packed);
        dir.put(2, 100, 5);
        let r = dir.get(2);
        assert_eq!(r, VmfRecord { offset: 100, page: 5 });
        assert!(dir.is_live(2));
        dir.clear(2);
        assert!(!dir.is_live(2));
        assert_eq!(dir.get(2).page, dir.null_page());
    }
}
