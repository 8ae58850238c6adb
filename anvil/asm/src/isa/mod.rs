//! Architecture back-ends.

pub mod aarch64;
pub mod x64;

/// Target machine a buffer was emitted for; consumed by the ELF
/// serializer when picking `e_machine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Machine {
    #[default]
    None,
    X86_64,
    Aarch64,
}

/// One registered back-end: the name used by the front-end's `lang`
/// directive and the machine it emits for. The host matches on the
/// machine to construct the concrete assembler.
///
/// The registry is built explicitly by the host program; there is no
/// pre-main global module map.
pub struct IsaEntry {
    pub name: &'static str,
    pub machine: Machine,
}

/// Explicit name → back-end registry for front-end dispatch.
pub struct IsaRegistry {
    entries: Vec<IsaEntry>,
}

impl IsaRegistry {
    /// An empty registry.
    pub fn new() -> IsaRegistry {
        IsaRegistry { entries: Vec::new() }
    }

    /// A registry with both built-in back-ends.
    pub fn builtin() -> IsaRegistry {
        let mut registry = IsaRegistry::new();
        registry.register(IsaEntry { name: "x86_64", machine: Machine::X86_64 });
        registry.register(IsaEntry { name: "aarch64", machine: Machine::Aarch64 });
        registry
    }

    pub fn register(&mut self, entry: IsaEntry) {
        self.entries.push(entry);
    }

    /// Look up a back-end by `lang` name.
    pub fn lookup(&self, name: &str) -> Option<&IsaEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }
}

impl Default for IsaRegistry {
    fn default() -> IsaRegistry {
        IsaRegistry::builtin()
    }
}
