//! A tree of size-deferred chunks.
//!
//! Chunks hold raw byte regions interleaved with sub-chunks, each with
//! its own alignment and endianness. Sizes and offsets are only known
//! once the whole tree is assembled; "links" reserve a span of bytes and
//! provide a writer that runs after the layout freeze, when every offset
//! and count is final.
//!
//! The tree is an arena: a flat vector of nodes addressed by [`ChunkId`],
//! children referenced by index. The freeze pass walks top-down and
//! caches sizes and offsets into a [`Layout`]; baking then writes the
//! tree preorder into one flat vector and runs the deferred links
//! against their reserved spans.

use std::ops::Range;

/// Byte order of the scalar writers of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Index of one chunk in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkId(usize);

/// The root chunk, present in every tree.
pub const ROOT: ChunkId = ChunkId(0);

enum Region {
    /// A range of the owning node's byte store.
    Bytes(Range<usize>),
    Child(ChunkId),
}

struct ChunkNode {
    align: usize,
    endian: Endian,
    bytes: Vec<u8>,
    regions: Vec<Region>,
    children: usize,
}

impl ChunkNode {
    fn new(align: usize, endian: Endian) -> ChunkNode {
        ChunkNode {
            align,
            endian,
            bytes: Vec::new(),
            regions: Vec::new(),
            children: 0,
        }
    }

    /// Extend the trailing byte region, or start a new one after a child.
    fn append(&mut self, data: &[u8]) {
        let start = self.bytes.len();
        self.bytes.extend_from_slice(data);

        if let Some(Region::Bytes(range)) = self.regions.last_mut() {
            range.end = self.bytes.len();
        } else {
            self.regions.push(Region::Bytes(start..self.bytes.len()));
        }
    }
}

/// The span a deferred link writes into, with the endianness of its
/// owning chunk.
pub struct LinkField<'a> {
    bytes: &'a mut [u8],
    endian: Endian,
}

impl LinkField<'_> {
    pub fn put_u16(&mut self, offset: usize, value: u16) {
        self.put(offset, &value.to_le_bytes(), &value.to_be_bytes());
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) {
        self.put(offset, &value.to_le_bytes(), &value.to_be_bytes());
    }

    pub fn put_u64(&mut self, offset: usize, value: u64) {
        self.put(offset, &value.to_le_bytes(), &value.to_be_bytes());
    }

    pub fn put_u8(&mut self, offset: usize, value: u8) {
        self.bytes[offset] = value;
    }

    pub fn put_bytes(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    fn put(&mut self, offset: usize, little: &[u8], big: &[u8]) {
        let data = match self.endian {
            Endian::Little => little,
            Endian::Big => big,
        };
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}

/// The frozen sizes and offsets of a tree, handed to link writers.
pub struct Layout<'a> {
    tree: &'a ChunkTree,
    sizes: Vec<usize>,
    offsets: Vec<usize>,
}

impl Layout<'_> {
    /// Offset of the first content byte of a chunk in the flat image.
    pub fn offset(&self, chunk: ChunkId) -> u64 {
        self.offsets[chunk.0] as u64
    }

    /// Total size of a chunk including its sub-chunks and their inner
    /// alignment padding.
    pub fn size(&self, chunk: ChunkId) -> u64 {
        self.sizes[chunk.0] as u64
    }

    /// Number of direct sub-chunks.
    pub fn children(&self, chunk: ChunkId) -> u64 {
        self.tree.nodes[chunk.0].children as u64
    }

    /// Raw content bytes of the chunk itself, excluding sub-chunks.
    pub fn content_bytes(&self, chunk: ChunkId) -> u64 {
        self.tree.nodes[chunk.0].bytes.len() as u64
    }
}

type LinkFn = Box<dyn Fn(&Layout<'_>, &mut LinkField<'_>)>;

struct Link {
    chunk: ChunkId,
    /// Offset into the chunk's byte store.
    offset: usize,
    len: usize,
    write: LinkFn,
}

/// The chunk arena.
pub struct ChunkTree {
    nodes: Vec<ChunkNode>,
    links: Vec<Link>,
}

impl ChunkTree {
    /// A tree with a little-endian, unaligned root.
    pub fn new() -> ChunkTree {
        ChunkTree {
            nodes: vec![ChunkNode::new(1, Endian::Little)],
            links: Vec::new(),
        }
    }

    /// Append a sub-chunk, inheriting the parent's endianness.
    pub fn chunk(&mut self, parent: ChunkId, align: usize) -> ChunkId {
        let endian = self.nodes[parent.0].endian;
        self.chunk_with_endian(parent, align, endian)
    }

    /// Append a sub-chunk with an explicit endianness.
    pub fn chunk_with_endian(&mut self, parent: ChunkId, align: usize, endian: Endian) -> ChunkId {
        assert!(align.is_power_of_two(), "chunk alignment must be a power of two");
        let id = ChunkId(self.nodes.len());
        self.nodes.push(ChunkNode::new(align, endian));
        let node = &mut self.nodes[parent.0];
        node.regions.push(Region::Child(id));
        node.children += 1;
        id
    }

    /// Append raw bytes to a chunk.
    pub fn write(&mut self, chunk: ChunkId, data: &[u8]) {
        self.nodes[chunk.0].append(data);
    }

    /// Append `count` copies of `value`.
    pub fn push(&mut self, chunk: ChunkId, count: usize, value: u8) {
        let node = &mut self.nodes[chunk.0];
        let start = node.bytes.len();
        node.bytes.resize(start + count, value);
        if let Some(Region::Bytes(range)) = node.regions.last_mut() {
            range.end = node.bytes.len();
        } else {
            node.regions.push(Region::Bytes(start..node.bytes.len()));
        }
    }

    /// Append a string including its terminating null byte.
    pub fn write_cstr(&mut self, chunk: ChunkId, text: &str) {
        self.write(chunk, text.as_bytes());
        self.write(chunk, &[0]);
    }

    pub fn put_u8(&mut self, chunk: ChunkId, value: u8) {
        self.write(chunk, &[value]);
    }

    pub fn put_u16(&mut self, chunk: ChunkId, value: u16) {
        let data = match self.nodes[chunk.0].endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.write(chunk, &data);
    }

    pub fn put_u32(&mut self, chunk: ChunkId, value: u32) {
        let data = match self.nodes[chunk.0].endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.write(chunk, &data);
    }

    pub fn put_u64(&mut self, chunk: ChunkId, value: u64) {
        let data = match self.nodes[chunk.0].endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.write(chunk, &data);
    }

    /// Current content byte count of a chunk, the offset the next write
    /// will land at. String tables use this for name offsets.
    pub fn bytes(&self, chunk: ChunkId) -> usize {
        self.nodes[chunk.0].bytes.len()
    }

    /// Number of direct sub-chunks.
    pub fn children(&self, chunk: ChunkId) -> usize {
        self.nodes[chunk.0].children
    }

    /// Reserve `len` zeroed bytes and register a writer that fills them
    /// after the layout freeze.
    pub fn add_link(
        &mut self,
        chunk: ChunkId,
        len: usize,
        write: impl Fn(&Layout<'_>, &mut LinkField<'_>) + 'static,
    ) {
        let offset = self.nodes[chunk.0].bytes.len();
        self.push(chunk, len, 0);
        self.links.push(Link {
            chunk,
            offset,
            len,
            write: Box::new(write),
        });
    }

    /// The freeze pass: resolve every chunk's size and flat offset.
    pub fn layout(&self) -> Layout<'_> {
        let mut sizes = vec![0usize; self.nodes.len()];
        let mut offsets = vec![0usize; self.nodes.len()];
        self.measure(ROOT, &mut sizes);
        self.place(ROOT, 0, &sizes, &mut offsets);
        Layout {
            tree: self,
            sizes,
            offsets,
        }
    }

    fn measure(&self, id: ChunkId, sizes: &mut Vec<usize>) -> usize {
        let node = &self.nodes[id.0];
        let mut cursor = 0;

        for region in &node.regions {
            match region {
                Region::Bytes(range) => cursor += range.len(),
                Region::Child(child) => {
                    let child_size = self.measure(*child, sizes);
                    cursor = align_up(cursor, self.nodes[child.0].align);
                    cursor += child_size;
                }
            }
        }

        sizes[id.0] = cursor;
        cursor
    }

    fn place(&self, id: ChunkId, offset: usize, sizes: &[usize], offsets: &mut Vec<usize>) {
        offsets[id.0] = offset;
        let node = &self.nodes[id.0];
        let mut cursor = offset;

        for region in &node.regions {
            match region {
                Region::Bytes(range) => cursor += range.len(),
                Region::Child(child) => {
                    cursor = align_up(cursor, self.nodes[child.0].align);
                    self.place(*child, cursor, sizes, offsets);
                    cursor += sizes[child.0];
                }
            }
        }
    }

    /// Bake the tree into a flat byte vector: freeze the layout, write
    /// preorder, then run every deferred link against its reserved span.
    pub fn bake(&self) -> Vec<u8> {
        let layout = self.layout();
        let mut output = Vec::with_capacity(layout.sizes[ROOT.0]);
        self.render(ROOT, &layout, &mut output);

        for link in &self.links {
            let node = &self.nodes[link.chunk.0];
            let position = self.flat_position(link.chunk, link.offset, &layout);
            let mut field = LinkField {
                bytes: &mut output[position..position + link.len],
                endian: node.endian,
            };
            (link.write)(&layout, &mut field);
        }

        output
    }

    fn render(&self, id: ChunkId, layout: &Layout<'_>, output: &mut Vec<u8>) {
        let node = &self.nodes[id.0];
        debug_assert!(output.len() <= layout.offsets[id.0]);
        output.resize(layout.offsets[id.0], 0);

        for region in &node.regions {
            match region {
                Region::Bytes(range) => output.extend_from_slice(&node.bytes[range.clone()]),
                Region::Child(child) => {
                    output.resize(layout.offsets[child.0], 0);
                    self.render(*child, layout, output);
                }
            }
        }
    }

    /// Map an offset in a chunk's byte store to its flat image position.
    fn flat_position(&self, id: ChunkId, byte_offset: usize, layout: &Layout<'_>) -> usize {
        let node = &self.nodes[id.0];
        let mut cursor = layout.offsets[id.0];

        for region in &node.regions {
            match region {
                Region::Bytes(range) => {
                    if range.contains(&byte_offset) {
                        return cursor + (byte_offset - range.start);
                    }
                    cursor += range.len();
                }
                Region::Child(child) => {
                    cursor = align_up(cursor, self.nodes[child.0].align);
                    cursor += layout.sizes[child.0];
                }
            }
        }

        panic!("link offset {byte_offset} is outside chunk {}", id.0);
    }
}

impl Default for ChunkTree {
    fn default() -> ChunkTree {
        ChunkTree::new()
    }
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preorder_layout_with_alignment() {
        let mut tree = ChunkTree::new();
        tree.write(ROOT, &[1, 2, 3]);
        let aligned = tree.chunk(ROOT, 8);
        tree.write(aligned, &[9, 9]);
        tree.write(ROOT, &[4]);

        let baked = tree.bake();
        assert_eq!(baked, vec![1, 2, 3, 0, 0, 0, 0, 0, 9, 9, 4]);
    }

    #[test]
    fn nested_chunks_and_sizes() {
        let mut tree = ChunkTree::new();
        let a = tree.chunk(ROOT, 1);
        let b = tree.chunk(a, 4);
        tree.write(a, &[1]);
        tree.write(b, &[2, 2]);
        tree.write(a, &[3]);

        // note: within `a`, region order is [b, bytes 1+3]; appends to a
        // chunk land after its existing children
        let layout = tree.layout();
        assert_eq!(layout.size(b), 2);
        assert_eq!(layout.size(a), 4);
        assert_eq!(layout.children(a), 1);

        assert_eq!(tree.bake(), vec![2, 2, 1, 3]);
    }

    #[test]
    fn links_run_after_freeze() {
        let mut tree = ChunkTree::new();
        let header = tree.chunk(ROOT, 1);
        let payload = tree.chunk(ROOT, 4);

        // the header records the payload's offset and size before either
        // is known
        tree.add_link(header, 8, move |layout, field| {
            field.put_u32(0, layout.offset(payload) as u32);
            field.put_u32(4, layout.size(payload) as u32);
        });
        tree.write(payload, b"payload");

        let baked = tree.bake();
        assert_eq!(u32::from_le_bytes(baked[0..4].try_into().unwrap()), 8);
        assert_eq!(u32::from_le_bytes(baked[4..8].try_into().unwrap()), 7);
        assert_eq!(&baked[8..15], b"payload");
    }

    #[test]
    fn big_endian_links() {
        let mut tree = ChunkTree::new();
        let chunk = tree.chunk_with_endian(ROOT, 1, Endian::Big);
        tree.add_link(chunk, 2, |_, field| field.put_u16(0, 0x1234));
        assert_eq!(tree.bake(), vec![0x12, 0x34]);
    }

    #[test]
    fn string_table_offsets() {
        let mut tree = ChunkTree::new();
        assert_eq!(tree.bytes(ROOT), 0);
        tree.write_cstr(ROOT, "");
        assert_eq!(tree.bytes(ROOT), 1);
        tree.write_cstr(ROOT, ".text");
        assert_eq!(tree.bytes(ROOT), 7);
        assert_eq!(tree.bake(), b"\0.text\0".to_vec());
    }
}
