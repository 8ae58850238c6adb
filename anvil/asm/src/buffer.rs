//! The multi-section output buffer with deferred symbolic linkage.

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::isa::Machine;
use crate::label::Label;
use crate::reloc::{Fixup, Linkage};

bitflags::bitflags! {
    /// Memory protection of one output section; maps 1:1 onto an ELF LOAD
    /// program header's flag bits and onto `mprotect` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionFlags: u8 {
        const R = 0b001;
        const W = 0b010;
        const X = 0b100;
    }
}

impl SectionFlags {
    /// Mixed-use default assigned to the section every fresh buffer starts
    /// with.
    pub const DEFAULT: SectionFlags = SectionFlags::all();

    /// Parse a textual `section` directive flag string (any mix of the
    /// characters `r`, `w` and `x`).
    pub fn parse(text: &str) -> Option<SectionFlags> {
        let mut flags = SectionFlags::empty();
        for ch in text.chars() {
            match ch.to_ascii_lowercase() {
                'r' => flags |= SectionFlags::R,
                'w' => flags |= SectionFlags::W,
                'x' => flags |= SectionFlags::X,
                _ => return None,
            }
        }
        Some(flags)
    }

    /// Section name used when the caller does not supply one.
    pub fn default_name(self) -> &'static str {
        if self.contains(SectionFlags::X) {
            ".text"
        } else if self.contains(SectionFlags::W) {
            ".data"
        } else if self.contains(SectionFlags::R) {
            ".rodata"
        } else {
            ".seg"
        }
    }
}

/// A stable `(section, offset)` pair identifying one location in the
/// buffer. Offsets within a section are append-only, so markers survive
/// any further emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMarker {
    pub section: u32,
    pub offset: u32,
}

/// Export visibility of a symbol, mapped by the ELF serializer onto
/// binding + visibility pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Private,
    Public,
    Weak,
}

/// A label the object serializer should expose in the symbol table.
#[derive(Debug, Clone)]
pub struct ExportSymbol {
    pub label: Label,
    pub size: u64,
    pub visibility: Visibility,
}

/// One contiguous track in the [`SegmentedBuffer`].
#[derive(Debug, Clone)]
pub struct BufferSegment {
    pub index: u32,
    pub flags: SectionFlags,
    pub name: String,
    /// Byte used to fill the alignment tail.
    pub padder: u8,
    pub bytes: Vec<u8>,
    /// File/memory offset of this segment, valid only after `align()`.
    pub start: i64,
    /// Padding appended after `bytes` to reach the page boundary, valid
    /// only after `align()`.
    pub tail: i64,
}

impl BufferSegment {
    fn new(index: u32, flags: SectionFlags, name: String) -> BufferSegment {
        BufferSegment {
            index,
            flags,
            name,
            padder: 0,
            bytes: Vec::new(),
            start: 0,
            tail: 0,
        }
    }

    /// Size of this segment including the alignment tail.
    pub fn size(&self) -> usize {
        self.bytes.len() + self.tail as usize
    }

    /// True when no data was emitted; empty segments are skipped by
    /// downstream consumers.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Marker of the next byte to be written.
    pub fn current(&self) -> BufferMarker {
        BufferMarker {
            section: self.index,
            offset: self.bytes.len() as u32,
        }
    }

    /// Fix the start offset and compute the tail padding; returns the
    /// offset just past this segment.
    fn align(&mut self, start: u64, page: u64) -> u64 {
        self.start = start as i64;
        let bytes = self.bytes.len() as u64;
        let aligned = bytes.div_ceil(page) * page;
        self.tail = (aligned - bytes) as i64;
        start + aligned
    }
}

/// The segmented output buffer.
///
/// Owns an insertion-ordered list of sections with one selected for
/// writes, the label table, the pending linkage list, and the export
/// list. Lives from the first emit until it is consumed by the runtime
/// mapper or the ELF serializer.
pub struct SegmentedBuffer {
    selected: usize,
    sections: Vec<BufferSegment>,
    labels: FxHashMap<Label, BufferMarker>,
    linkages: Vec<Linkage>,
    exports: Vec<ExportSymbol>,
    sealed: bool,
    /// Stamped by whichever ISA assembler binds to this buffer; consumed
    /// by the ELF serializer.
    pub machine: Machine,
}

impl SegmentedBuffer {
    /// Create a buffer with a single mixed-use section selected.
    pub fn new() -> SegmentedBuffer {
        let mut buffer = SegmentedBuffer {
            selected: 0,
            sections: Vec::new(),
            labels: FxHashMap::default(),
            linkages: Vec::new(),
            exports: Vec::new(),
            sealed: false,
            machine: Machine::None,
        };
        buffer.use_section(SectionFlags::DEFAULT, None);
        buffer
    }

    /// Select the section whose flag set equals `flags`, creating it if
    /// none exists yet. The name applies only on creation and defaults
    /// per flag set.
    pub fn use_section(&mut self, flags: SectionFlags, name: Option<&str>) {
        if let Some(index) = self.sections.iter().position(|s| s.flags == flags) {
            self.selected = index;
            return;
        }

        assert!(!self.sealed, "cannot create sections after align()");
        let index = self.sections.len();
        let name = name
            .map(str::to_owned)
            .unwrap_or_else(|| flags.default_name().to_owned());
        self.sections.push(BufferSegment::new(index as u32, flags, name));
        self.selected = index;
    }

    /// Marker at the next byte to be written in the selected section.
    pub fn current(&self) -> BufferMarker {
        self.sections[self.selected].current()
    }

    /// Append a single byte to the selected section.
    pub fn push(&mut self, byte: u8) {
        assert!(!self.sealed, "write after align()");
        self.sections[self.selected].bytes.push(byte);
    }

    /// Append arbitrary bytes to the selected section.
    pub fn insert(&mut self, bytes: &[u8]) {
        assert!(!self.sealed, "write after align()");
        self.sections[self.selected].bytes.extend_from_slice(bytes);
    }

    /// Append `count` copies of `value` to the selected section.
    pub fn fill(&mut self, count: usize, value: u8) {
        assert!(!self.sealed, "write after align()");
        let section = &mut self.sections[self.selected];
        section.bytes.resize(section.bytes.len() + count, value);
    }

    /// True once `align()` has sealed the buffer.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Bind `label` to the current position of the selected section.
    pub fn add_label(&mut self, label: &Label) -> Result<(), Error> {
        if self.labels.contains_key(label) {
            return Err(Error::LabelRedefinition(label.clone()));
        }
        let marker = self.current();
        trace!("label '{label}' bound at section {} offset {}", marker.section, marker.offset);
        self.labels.insert(label.clone(), marker);
        Ok(())
    }

    /// Check whether `label` has been bound.
    pub fn has_label(&self, label: &Label) -> bool {
        self.labels.contains_key(label)
    }

    /// Marker the label was bound to.
    pub fn get_label(&self, label: &Label) -> Result<BufferMarker, Error> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::LabelUndefined(label.clone()))
    }

    /// Enqueue a fix-up whose target marker is the current position of the
    /// selected section shifted by `shift` bytes.
    pub fn add_linkage(&mut self, label: &Label, shift: i32, kind: Fixup, addend: i64) {
        let current = self.current();
        let target = BufferMarker {
            section: current.section,
            offset: current.offset.wrapping_add_signed(shift),
        };
        self.linkages.push(Linkage {
            label: label.clone(),
            target,
            kind,
            addend,
        });
    }

    /// Record an export; only text labels survive into the symbol table.
    pub fn add_export(&mut self, label: &Label, visibility: Visibility, size: u64) {
        self.exports.push(ExportSymbol {
            label: label.clone(),
            size,
            visibility,
        });
    }

    /// Assign every section its final start offset and tail padding, and
    /// seal the buffer against further writes. Recomputing with the same
    /// page size is idempotent.
    pub fn align(&mut self, page: usize) {
        assert!(page.is_power_of_two(), "page size must be a power of two");
        let mut offset = 0;
        for section in &mut self.sections {
            offset = section.align(offset, page as u64);
        }
        self.sealed = true;
    }

    /// Execute all linkages against the given base address. Errors are
    /// passed to `handler` when one is supplied; otherwise the first
    /// failure aborts linking.
    pub fn link(
        &mut self,
        base: u64,
        mut handler: Option<&mut dyn FnMut(&Linkage, &Error)>,
    ) -> Result<(), Error> {
        assert!(self.sealed, "align() must be called before link()");
        debug!("linking {} fixups at base {base:#x}", self.linkages.len());

        let linkages = std::mem::take(&mut self.linkages);
        let mut result = Ok(());

        for linkage in &linkages {
            if let Err(error) = linkage.resolve(self, base) {
                match handler.as_mut() {
                    Some(handler) => handler(linkage, &error),
                    None => {
                        result = Err(error);
                        break;
                    }
                }
            }
        }

        self.linkages = linkages;
        result
    }

    /// Offset of the marker in the final contiguous image; requires
    /// `align()` for markers outside the first section.
    pub fn get_offset(&self, marker: BufferMarker) -> i64 {
        self.sections[marker.section as usize].start + i64::from(marker.offset)
    }

    /// Total size in bytes of the aligned image.
    pub fn total(&self) -> usize {
        match self.sections.last() {
            Some(last) => (last.start as usize) + last.size(),
            None => 0,
        }
    }

    /// All sections in creation order.
    pub fn segments(&self) -> &[BufferSegment] {
        &self.sections
    }

    /// Recorded exports in insertion order.
    pub fn exports(&self) -> &[ExportSymbol] {
        &self.exports
    }

    /// Snapshot of the label table as absolute image offsets.
    pub fn resolved_labels(&self) -> FxHashMap<Label, u64> {
        self.labels
            .iter()
            .map(|(label, marker)| (label.clone(), self.get_offset(*marker) as u64))
            .collect()
    }

    pub(crate) fn patch(&mut self, marker: BufferMarker, bytes: &[u8]) {
        let offset = marker.offset as usize;
        let section = &mut self.sections[marker.section as usize];
        section.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub(crate) fn read_u32(&self, marker: BufferMarker) -> u32 {
        let offset = marker.offset as usize;
        let bytes = &self.sections[marker.section as usize].bytes[offset..offset + 4];
        u32::from_le_bytes(bytes.try_into().expect("four bytes"))
    }

    pub(crate) fn write_u32(&mut self, marker: BufferMarker, value: u32) {
        self.patch(marker, &value.to_le_bytes());
    }
}

impl Default for SegmentedBuffer {
    fn default() -> SegmentedBuffer {
        SegmentedBuffer::new()
    }
}

/// Raw data emission shared by the ISA assemblers; this is the back-end of
/// the front-end's `d8`/`d16`/`d32`/`d64` data directives.
pub trait DataSink {
    fn buffer_mut(&mut self) -> &mut SegmentedBuffer;

    fn put_byte(&mut self, value: u8) {
        self.buffer_mut().push(value);
    }

    fn put_word(&mut self, value: u16) {
        self.buffer_mut().insert(&value.to_le_bytes());
    }

    fn put_dword(&mut self, value: u32) {
        self.buffer_mut().insert(&value.to_le_bytes());
    }

    fn put_qword(&mut self, value: u64) {
        self.buffer_mut().insert(&value.to_le_bytes());
    }

    fn put_f32(&mut self, value: f32) {
        self.buffer_mut().insert(&value.to_le_bytes());
    }

    fn put_f64(&mut self, value: f64) {
        self.buffer_mut().insert(&value.to_le_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buffer_mut().insert(bytes);
    }

    /// Write a string followed by its terminating null byte.
    fn put_cstr(&mut self, text: &str) {
        self.buffer_mut().insert(text.as_bytes());
        self.buffer_mut().push(0);
    }

    fn put_space(&mut self, count: usize, fill: u8) {
        self.buffer_mut().fill(count, fill);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_selected_by_flags() {
        let mut buffer = SegmentedBuffer::new();
        buffer.use_section(SectionFlags::R | SectionFlags::X, None);
        buffer.push(0x90);
        buffer.use_section(SectionFlags::R | SectionFlags::W, None);
        buffer.push(0x01);
        buffer.use_section(SectionFlags::R | SectionFlags::X, None);
        buffer.push(0xC3);

        assert_eq!(buffer.segments().len(), 3);
        assert_eq!(buffer.segments()[1].bytes, vec![0x90, 0xC3]);
        assert_eq!(buffer.segments()[1].name, ".text");
        assert_eq!(buffer.segments()[2].name, ".data");
    }

    #[test]
    fn labels_are_unique() {
        let mut buffer = SegmentedBuffer::new();
        let label = Label::new("start");
        buffer.add_label(&label).unwrap();
        assert!(matches!(
            buffer.add_label(&label),
            Err(Error::LabelRedefinition(_))
        ));
        assert!(buffer.has_label(&label));
        assert!(!buffer.has_label(&Label::new("other")));
    }

    #[test]
    fn align_assigns_page_multiples() {
        let mut buffer = SegmentedBuffer::new();
        buffer.fill(5, 0xAA);
        buffer.use_section(SectionFlags::R | SectionFlags::W, None);
        buffer.fill(4097, 0xBB);
        buffer.align(4096);

        let segments = buffer.segments();
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments[0].tail, 4091);
        assert_eq!(segments[1].start, 4096);
        assert_eq!(segments[1].tail, 4095);
        assert_eq!(buffer.total(), 3 * 4096);

        // recomputing with the same page changes nothing
        buffer.align(4096);
        assert_eq!(buffer.segments()[1].start, 4096);
        assert_eq!(buffer.total(), 3 * 4096);
    }

    #[test]
    #[should_panic(expected = "write after align()")]
    fn writes_after_seal_panic() {
        let mut buffer = SegmentedBuffer::new();
        buffer.align(4096);
        buffer.push(0);
    }

    #[test]
    fn relative_fixup_round_trip() {
        let mut buffer = SegmentedBuffer::new();
        let label = Label::new("target");

        // rel32 placeholder at offset 0, then the label at offset 8
        buffer.add_linkage(&label, 0, Fixup::Rel { width: 4 }, -4);
        buffer.fill(4, 0);
        buffer.fill(4, 0x90);
        buffer.add_label(&label).unwrap();
        buffer.align(4096);
        buffer.link(0, None).unwrap();

        let bytes = &buffer.segments()[0].bytes;
        let disp = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        // 8 (label) - 4 (end of field)
        assert_eq!(disp, 4);

        // linking again at the same base produces the same image
        let before = buffer.segments()[0].bytes.clone();
        buffer.link(0, None).unwrap();
        assert_eq!(before, buffer.segments()[0].bytes);
    }

    #[test]
    fn undefined_label_reported_through_handler() {
        let mut buffer = SegmentedBuffer::new();
        buffer.add_linkage(&Label::new("nowhere"), 0, Fixup::Rel { width: 4 }, -4);
        buffer.fill(4, 0);
        buffer.align(4096);

        assert!(matches!(buffer.link(0, None), Err(Error::LabelUndefined(_))));

        let mut seen = 0;
        let mut handler = |linkage: &Linkage, error: &Error| {
            assert_eq!(linkage.label.as_str(), "nowhere");
            assert!(matches!(error, Error::LabelUndefined(_)));
            seen += 1;
        };
        buffer.link(0, Some(&mut handler)).unwrap();
        assert_eq!(seen, 1);
    }
}
