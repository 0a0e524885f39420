//! Instance-class catalogs.
//!
//! Two ordered tables, one per hardware family, listing the supported
//! database instance classes from smallest to largest together with the
//! memory each class provides. The family of a class is inferred from its
//! name alone: any class containing [`GRAVITON_MARKER`] belongs to the
//! Graviton table.

use serde::{Deserialize, Serialize};

/// Substring that identifies the Graviton (ARM) class-name convention.
pub const GRAVITON_MARKER: &str = "g.";

/// Hardware family of an instance class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    Standard,
    Graviton,
}

impl Architecture {
    /// Infer the family from a class name.
    pub fn of(class: &str) -> Self {
        if class.contains(GRAVITON_MARKER) {
            Architecture::Graviton
        } else {
            Architecture::Standard
        }
    }

    /// The catalog for this family.
    pub fn catalog(self) -> &'static Catalog {
        match self {
            Architecture::Standard => &STANDARD,
            Architecture::Graviton => &GRAVITON,
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Architecture::Standard => f.write_str("standard"),
            Architecture::Graviton => f.write_str("graviton"),
        }
    }
}

/// One row of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassEntry {
    pub class: &'static str,
    /// Memory capacity in bytes.
    pub memory_bytes: u64,
}

const fn entry(class: &'static str, memory_bytes: u64) -> ClassEntry {
    ClassEntry {
        class,
        memory_bytes,
    }
}

/// An ordered (small → large) list of instance classes for one family.
#[derive(Debug)]
pub struct Catalog {
    entries: &'static [ClassEntry],
}

const GIB: u64 = 1024 * 1024 * 1024;

static STANDARD: Catalog = Catalog {
    entries: &[
        entry("db.t3.medium", 4 * GIB),
        entry("db.t3.large", 8 * GIB),
        entry("db.r5.large", 16 * GIB),
        entry("db.r5.xlarge", 32 * GIB),
        entry("db.r5.2xlarge", 64 * GIB),
        entry("db.r5.4xlarge", 128 * GIB),
        entry("db.r5.8xlarge", 256 * GIB),
        entry("db.r5.12xlarge", 384 * GIB),
        entry("db.r5.16xlarge", 512 * GIB),
        entry("db.r5.24xlarge", 768 * GIB),
    ],
};

static GRAVITON: Catalog = Catalog {
    entries: &[
        entry("db.t4g.small", 2 * GIB),
        entry("db.t4g.medium", 4 * GIB),
        entry("db.t4g.large", 8 * GIB),
        entry("db.r6g.large", 16 * GIB),
        entry("db.r6g.xlarge", 32 * GIB),
        entry("db.r6g.2xlarge", 64 * GIB),
        entry("db.r6g.4xlarge", 128 * GIB),
        entry("db.r6g.8xlarge", 256 * GIB),
        entry("db.r6g.12xlarge", 384 * GIB),
        entry("db.r6g.16xlarge", 512 * GIB),
        entry("db.r6g.24xlarge", 768 * GIB),
    ],
};

impl Catalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &'static [ClassEntry] {
        self.entries
    }

    /// Position of `class` in this catalog (exact match).
    pub fn index_of(&self, class: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.class == class)
    }

    /// Class name at `index`, if in range.
    pub fn class_at(&self, index: usize) -> Option<&'static str> {
        self.entries.get(index).map(|e| e.class)
    }

    /// Memory capacity of `class` in bytes.
    pub fn memory_bytes(&self, class: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.class == class)
            .map(|e| e.memory_bytes)
    }
}
