//! `logical-page-id -> {prev, next, free-offset, size-class}`, VMF
//! only; owns the stack of free logical-page ids (`SPEC_FULL.md` §4.3,
//! entity "LogicalPage", and §2 "PageDirectory").

use crate::bitcodec::{read_uint, write_uint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRecord {
    pub prev: u32,
    pub next: u32,
    pub free_offset: u32,
    pub size_class: u32,
}

#[derive(Debug)]
pub struct PageDirectory {
    buf: Vec<u8>,
    link_width: u8,
    offset_width: u8,
    class_width: u8,
    record_width: usize,
    free_stack: Vec<u32>,
    page_max: u32,
}

impl PageDirectory {
    /// `page_max` bounds the number of live logical pages (`P_max`);
    /// `physical_page_size` bounds `free_offset`; `num_classes` bounds
    /// `size_class`.
    pub fn new(
        page_max: u32,
        physical_page_size: usize,
        num_classes: usize,
        metadata_mode: crate::config::MetadataMode,
    ) -> Self {
        let link_width = crate::bitcodec::field_width(
            crate::bitcodec::required_bytes((page_max as u64) + 1),
            metadata_mode,
        );
        let offset_width = crate::bitcodec::field_width(
            crate::bitcodec::required_bytes(physical_page_size as u64),
            metadata_mode,
        );
        let class_width = crate::bitcodec::field_width(
            crate::bitcodec::required_bytes(num_classes.max(1) as u64),
            metadata_mode,
        );
        let record_width =
            link_width as usize * 2 + offset_width as usize + class_width as usize;
        let free_stack = (0..page_max).rev().collect();
        PageDirectory {
            buf: vec![0u8; record_width * page_max.max(1) as usize],
            link_width,
            offset_width,
            class_width,
            record_width,
            free_stack,
            page_max,
        }
    }

    /// All-ones pattern for the link width; the sentinel for "no page"
    /// (`SPEC_FULL.md` §9.1 resolution of Open Question (c)).
    pub fn null_id(&self) -> u32 {
        let bits = self.link_width as u32 * 8;
        if bits >= 32 {
            u32::MAX
        } else {
            (1u32 << bits) - 1
        }
    }

    pub fn page_max(&self) -> u32 {
        self.page_max
    }

    fn slice(&self, id: u32) -> &[u8] {
        let start = id as usize * self.record_width;
        &self.buf[start..start + self.record_width]
    }

    fn slice_mut(&mut self, id: u32) -> &mut [u8] {
        let start = id as usize * self.record_width;
        &mut self.buf[start..start + self.record_width]
    }

    pub fn get(&self, id: u32) -> PageRecord {
        let rec = self.slice(id);
        let lw = self.link_width as usize;
        let ow = self.offset_width as usize;
        let prev = read_uint(rec, self.link_width) as u32;
        let next = read_uint(&rec[lw..], self.link_width) as u32;
        let free_offset = read_uint(&rec[2 * lw..], self.offset_width) as u32;
        let size_class = read_uint(&rec[2 * lw + ow..], self.class_width) as u32;
        PageRecord { prev, next, free_offset, size_class }
    }

    pub fn put(&mut self, id: u32, rec: PageRecord) {
        let lw = self.link_width;
        let ow = self.offset_width;
        let cw = self.class_width;
        let lwu = lw as usize;
        let owu = ow as usize;
        let buf = self.slice_mut(id);
        write_uint(buf, lw, rec.prev as u64);
        write_uint(&mut buf[lwu..], lw, rec.next as u64);
        write_uint(&mut buf[2 * lwu..], ow, rec.free_offset as u64);
        write_uint(&mut buf[2 * lwu + owu..], cw, rec.size_class as u64);
    }

    pub fn set_free_offset(&mut self, id: u32, free_offset: u32) {
        let mut rec = self.get(id);
        rec.free_offset = free_offset;
        self.put(id, rec);
    }

    pub fn set_links(&mut self, id: u32, prev: u32, next: u32) {
        let mut rec = self.get(id);
        rec.prev = prev;
        rec.next = next;
        self.put(id, rec);
    }

    /// Pop a never-used or freed logical-page id.
    pub fn pop_free(&mut self) -> Option<u32> {
        self.free_stack.pop()
    }

    /// Return a logical-page id to the free stack for later reuse.
    pub fn push_free(&mut self, id: u32) {
        debug_assert!(id < self.page_max);
        self.free_stack.push(id);
    }
}
