//! Page-geometry collaborator seam.
//!
//! Converting pen-unit coordinates to display space needs the physical
//! extent of the page being written on.  That lookup is external to the
//! driver (a paper-catalog service, bundled tables, or a cache); the
//! session only ever sees this trait.

use std::collections::HashMap;

use inkwire_core::{NoteId, PageAddress, PaperBounds};

/// Resolves the physical bounds of a page in pen coordinate units.
pub trait PageGeometry: Send + Sync {
    /// Returns `None` when the paper product is unknown.
    fn bounds(&self, page: &PageAddress) -> Option<PaperBounds>;
}

/// Table-backed geometry, keyed per note.  All pages of a note share one
/// bound on every paper product shipped so far.
#[derive(Debug, Default)]
pub struct StaticGeometry {
    notes: HashMap<NoteId, PaperBounds>,
}

impl StaticGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, note: NoteId, bounds: PaperBounds) {
        self.notes.insert(note, bounds);
    }
}

impl PageGeometry for StaticGeometry {
    fn bounds(&self, page: &PageAddress) -> Option<PaperBounds> {
        self.notes.get(&page.note_id()).copied()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
