//! ELF-64 serialization of assembled programs.
//!
//! [`to_elf`] consumes a finished
//! [`SegmentedBuffer`](anvil_asm::SegmentedBuffer): it aligns the buffer
//! to the host page size, links it against the chosen load address, and
//! assembles an ELF image in a [`ChunkTree`](chunk::ChunkTree) — file
//! header, section and program headers, one page-aligned LOAD segment per
//! non-empty section, the section name table, and a symbol table when
//! exports exist. The result can be saved as an executable file or run
//! directly through a sealed memfd.

pub mod chunk;
pub mod elf;
pub mod run;

use log::debug;

use anvil_asm::buffer::{SegmentedBuffer, Visibility};
use anvil_asm::isa::Machine;
use anvil_asm::label::Label;
use anvil_asm::reloc::Linkage;
use anvil_asm::{Error as AsmError, SectionFlags};

use crate::chunk::{ChunkId, ChunkTree, ROOT};
pub use crate::elf::DEFAULT_MOUNT;
pub use crate::run::{RunResult, RunStatus};

/// Failures of the serializer.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    /// The requested entry point label was never bound.
    #[error("entrypoint '{0}' not defined")]
    MissingEntry(Label),

    /// Linking the buffer against the load address failed.
    #[error(transparent)]
    Link(#[from] AsmError),

    /// Writing the output file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Whether the serialized file is an executable or a relocatable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfType {
    Rel,
    Exec,
}

/// `sh_info` of a section header: a fixed value, or the number of local
/// symbols in a symbol chunk, known only at bake time.
#[derive(Clone, Copy)]
enum ShInfo {
    Value(u32),
    LocalSymbolCount(ChunkId),
}

/// Parameters of a section definition.
struct SectionInfo {
    link: u32,
    info: ShInfo,
    entry_size: u64,
    alignment: u64,
    flags: u64,
    address: u64,
    /// Place the data chunk inside this segment instead of the loose
    /// sections area.
    segment: Option<ChunkId>,
}

impl Default for SectionInfo {
    fn default() -> SectionInfo {
        SectionInfo {
            link: 0,
            info: ShInfo::Value(0),
            entry_size: 0,
            alignment: 0,
            flags: 0,
            address: 0,
            segment: None,
        }
    }
}

/// An ELF-64 image under construction.
pub struct ElfFile {
    tree: ChunkTree,
    section_headers: ChunkId,
    segment_headers: ChunkId,
    segments: ChunkId,
    sections: ChunkId,
    shstrtab: ChunkId,
    has_sections: bool,
    symbols: Option<SymbolTables>,
    page: usize,
}

struct SymbolTables {
    strings: ChunkId,
    locals: ChunkId,
    others: ChunkId,
}

impl ElfFile {
    /// Create the fixed file skeleton: the header plus the four ordered
    /// areas it back-links into.
    pub fn new(machine: Machine, kind: ElfType, entry: u64) -> ElfFile {
        let mut tree = ChunkTree::new();

        let header = tree.chunk(ROOT, 1);
        let section_headers = tree.chunk(ROOT, 1);
        let segment_headers = tree.chunk(ROOT, 1);
        let segments = tree.chunk(ROOT, 1);
        let sections = tree.chunk(ROOT, 1);
        let shstrtab = tree.chunk(sections, 1);

        tree.add_link(header, usize::from(elf::EHDR_SIZE), move |layout, field| {
            field.put_bytes(0, &elf::MAGIC);
            field.put_u8(4, elf::CLASS_64);
            field.put_u8(5, elf::DATA_LSB);
            field.put_u8(6, elf::VERSION);
            // abi, abi version and padding stay zero

            let has_segments = layout.children(segment_headers) > 0;
            let has_sections = layout.children(section_headers) > 0;

            field.put_u16(16, match kind {
                ElfType::Rel => elf::ET_REL,
                ElfType::Exec => elf::ET_EXEC,
            });
            field.put_u16(18, elf::machine_value(machine));
            field.put_u32(20, u32::from(elf::VERSION));
            field.put_u64(24, entry);
            field.put_u64(32, if has_segments { layout.offset(segment_headers) } else { 0 });
            field.put_u64(40, if has_sections { layout.offset(section_headers) } else { 0 });
            field.put_u32(48, 0);
            field.put_u16(52, elf::EHDR_SIZE);
            field.put_u16(54, if has_segments { elf::PHDR_SIZE } else { 0 });
            field.put_u16(56, layout.children(segment_headers) as u16);
            field.put_u16(58, if has_sections { elf::SHDR_SIZE } else { 0 });
            field.put_u16(60, layout.children(section_headers) as u16);
            field.put_u16(62, if has_sections { 1 } else { 0 });
        });

        ElfFile {
            tree,
            section_headers,
            segment_headers,
            segments,
            sections,
            shstrtab,
            has_sections: false,
            symbols: None,
            page: page_size(),
        }
    }

    /// Add a LOAD segment mapped at `vaddr`; returns its data chunk.
    pub fn segment(&mut self, flags: SectionFlags, vaddr: u64) -> ChunkId {
        let region = self.tree.chunk(self.segments, self.page);
        let header = self.tree.chunk(self.segment_headers, 1);
        let align = self.page as u64;

        self.tree.add_link(header, usize::from(elf::PHDR_SIZE), move |layout, field| {
            let size = layout.size(region);
            field.put_u32(0, elf::PT_LOAD);
            field.put_u32(4, elf::segment_flags(flags));
            field.put_u64(8, layout.offset(region));
            field.put_u64(16, vaddr);
            field.put_u64(24, 0);
            field.put_u64(32, size);
            field.put_u64(40, size);
            field.put_u64(48, align);
        });

        region
    }

    /// Add a named section; returns its data chunk and header index.
    pub fn section(&mut self, name: &str, sh_type: u32, info: SectionInfo) -> (ChunkId, u32) {
        if !self.has_sections {
            self.has_sections = true;
            // index 0 is the null section, index 1 the name table
            self.define_section("", None, elf::SHT_NULL, SectionInfo::default());
            let shstrtab = self.shstrtab;
            self.define_section(".shstrtab", Some(shstrtab), elf::SHT_STRTAB, SectionInfo::default());
        }

        let parent = info.segment.unwrap_or(self.sections);
        let align = info.alignment.max(1) as usize;
        let region = self.tree.chunk(parent, align);
        let index = self.define_section(name, Some(region), sh_type, info);
        (region, index)
    }

    fn define_section(
        &mut self,
        name: &str,
        region: Option<ChunkId>,
        sh_type: u32,
        info: SectionInfo,
    ) -> u32 {
        let header = self.tree.chunk(self.section_headers, 1);
        let index = self.tree.children(self.section_headers) as u32 - 1;
        let name_offset = self.tree.bytes(self.shstrtab) as u32;

        self.tree.add_link(header, usize::from(elf::SHDR_SIZE), move |layout, field| {
            field.put_u32(0, name_offset);
            field.put_u32(4, sh_type);
            field.put_u64(8, info.flags);
            field.put_u64(16, info.address);

            match region {
                Some(region) => {
                    field.put_u64(24, layout.offset(region));
                    field.put_u64(32, layout.size(region));
                }
                None => {
                    field.put_u64(24, 0);
                    field.put_u64(32, 0);
                }
            }

            field.put_u32(40, info.link);
            field.put_u32(44, match info.info {
                ShInfo::Value(value) => value,
                ShInfo::LocalSymbolCount(chunk) => {
                    (layout.content_bytes(chunk) / u64::from(elf::SYM_SIZE)) as u32
                }
            });
            field.put_u64(48, info.alignment);
            field.put_u64(56, info.entry_size);
        });

        self.tree.write_cstr(self.shstrtab, name);
        index
    }

    /// Record an export in `.symtab`/`.strtab`, creating both on first
    /// use. Local symbols collect ahead of the non-local ones, which
    /// fixes the table's `sh_info`.
    pub fn symbol(
        &mut self,
        name: &str,
        sym_type: u8,
        binding: u8,
        visibility: u8,
        section_index: u32,
        value: u64,
        size: u64,
    ) {
        if self.symbols.is_none() {
            let (strings, strtab_index) =
                self.section(".strtab", elf::SHT_STRTAB, SectionInfo::default());

            // the symtab region is built by hand so that its local and
            // non-local sub-chunks exist before the header closure that
            // counts them
            let region = self.tree.chunk(self.sections, 8);
            let locals = self.tree.chunk(region, 1);
            let others = self.tree.chunk(region, 1);

            let info = SectionInfo {
                link: strtab_index,
                info: ShInfo::LocalSymbolCount(locals),
                entry_size: u64::from(elf::SYM_SIZE),
                alignment: 8,
                ..SectionInfo::default()
            };
            self.define_section(".symtab", Some(region), elf::SHT_SYMTAB, info);

            // the string table starts with a null byte, the symbol table
            // with the undefined symbol
            self.tree.put_u8(strings, 0);
            self.tree.push(locals, usize::from(elf::SYM_SIZE), 0);

            self.symbols = Some(SymbolTables {
                strings,
                locals,
                others,
            });
        }

        let tables = self.symbols.as_ref().expect("symbol tables exist");
        let target = if binding == elf::STB_LOCAL {
            tables.locals
        } else {
            tables.others
        };
        let strings = tables.strings;

        let name_offset = self.tree.bytes(strings) as u32;
        self.tree.put_u32(target, name_offset);
        self.tree.put_u8(target, binding << 4 | (sym_type & 0xF));
        self.tree.put_u8(target, visibility);
        self.tree.put_u16(target, section_index as u16);
        self.tree.put_u64(target, value);
        self.tree.put_u64(target, size);
        self.tree.write_cstr(strings, name);
    }

    /// Serialize the image to a flat byte vector.
    pub fn bytes(&self) -> Vec<u8> {
        self.tree.bake()
    }

    /// Write the image to disk and mark it executable for everyone.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), ObjectError> {
        let path = path.as_ref();
        std::fs::write(path, self.bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = std::fs::metadata(path)?.permissions();
            permissions.set_mode(permissions.mode() | 0o111);
            std::fs::set_permissions(path, permissions)?;
        }

        Ok(())
    }

    /// Execute the image through a sealed memfd and collect the child's
    /// exit status.
    #[cfg(target_os = "linux")]
    pub fn execute(&self, args: &[&str]) -> RunResult {
        run::execute(&self.bytes(), args)
    }
}

/// Serialize a finished buffer: align to the page size, link at `mount`,
/// lay out one LOAD segment per non-empty section, and emit exported
/// symbols. An entry label makes the file an executable, no entry makes
/// it a relocatable object.
pub fn to_elf(
    buffer: &mut SegmentedBuffer,
    entry: Option<&Label>,
    mount: u64,
    handler: Option<&mut dyn FnMut(&Linkage, &AsmError)>,
) -> Result<ElfFile, ObjectError> {
    let page = page_size();
    buffer.align(page);
    buffer.link(mount, handler)?;

    let (kind, entry_address) = match entry {
        Some(label) => {
            let marker = buffer
                .get_label(label)
                .map_err(|_| ObjectError::MissingEntry(label.clone()))?;
            (ElfType::Exec, mount + buffer.get_offset(marker) as u64)
        }
        None => (ElfType::Rel, 0),
    };

    debug!(
        "serializing {:?} image, {} sections, entry {entry_address:#x}",
        buffer.machine,
        buffer.segments().len()
    );

    let mut elf = ElfFile::new(buffer.machine, kind, entry_address);

    // section index and flags per source section, for the symbol pass
    let mut placed: Vec<Option<(u32, SectionFlags)>> = vec![None; buffer.segments().len()];

    for segment in buffer.segments() {
        if segment.is_empty() {
            continue;
        }

        let address = mount + segment.start as u64;
        let region = elf.segment(segment.flags, address);

        let info = SectionInfo {
            flags: elf::section_flags(segment.flags),
            address,
            segment: Some(region),
            ..SectionInfo::default()
        };
        let (section, index) = elf.section(&segment.name, elf::SHT_PROGBITS, info);

        elf.tree.write(section, &segment.bytes);
        elf.tree.push(region, segment.tail as usize, segment.padder);

        placed[segment.index as usize] = Some((index, segment.flags));
    }

    for export in buffer.exports() {
        if !export.label.is_text() {
            continue;
        }

        let marker = buffer.get_label(&export.label)?;
        let Some((index, flags)) = placed[marker.section as usize] else {
            continue;
        };

        let (binding, visibility) = match export.visibility {
            Visibility::Private => (elf::STB_LOCAL, elf::STV_HIDDEN),
            Visibility::Public => (elf::STB_GLOBAL, elf::STV_PROTECTED),
            Visibility::Weak => (elf::STB_WEAK, elf::STV_PROTECTED),
        };

        let offset = buffer.get_offset(marker) as u64;
        let value = match kind {
            ElfType::Exec => mount + offset,
            ElfType::Rel => offset,
        };

        elf.symbol(
            export.label.as_str(),
            elf::symbol_type(flags),
            binding,
            visibility,
            index,
            value,
            export.size,
        );
    }

    Ok(elf)
}

fn page_size() -> usize {
    #[cfg(unix)]
    {
        rustix::param::page_size()
    }
    #[cfg(not(unix))]
    {
        4096
    }
}
