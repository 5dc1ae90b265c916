//! Canvas state model: placed glyphs, compositions, and minimized windows.
//!
//! Each collection is keyed by a stable entity id and is the unit of merge
//! during startup reconciliation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A glyph placed on the canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedElement {
    pub id: String,
    pub symbol: String,
    pub x: i32,
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    /// JSON-encoded result for result glyphs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<String>,
}

/// A directed edge between two melded glyphs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionEdge {
    pub from: String,
    pub to: String,
    pub direction: String,
    #[serde(default)]
    pub position: i32,
}

/// A composition of melded glyphs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
    pub id: String,
    #[serde(default)]
    pub edges: Vec<CompositionEdge>,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

impl Composition {
    /// Member glyph ids, in first-seen edge order, without duplicates.
    pub fn members(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut members = Vec::new();
        for edge in &self.edges {
            for id in [edge.from.as_str(), edge.to.as_str()] {
                if seen.insert(id) {
                    members.push(id);
                }
            }
        }
        members
    }
}

/// Wire form of a full canvas: the server's `/api/canvas/state` response and
/// the on-disk layout of the local snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    #[serde(default)]
    pub glyphs: Vec<PlacedElement>,
    #[serde(default)]
    pub compositions: Vec<Composition>,
    #[serde(default)]
    pub minimized_windows: Vec<String>,
}

/// In-memory canvas state, keyed by entity id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanvasState {
    pub glyphs: BTreeMap<String, PlacedElement>,
    pub compositions: BTreeMap<String, Composition>,
    pub minimized: BTreeSet<String>,
}

impl CanvasState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty() && self.compositions.is_empty() && self.minimized.is_empty()
    }

    /// Total number of entities across all three collections.
    pub fn len(&self) -> usize {
        self.glyphs.len() + self.compositions.len() + self.minimized.len()
    }

    pub fn upsert_glyph(&mut self, glyph: PlacedElement) {
        self.glyphs.insert(glyph.id.clone(), glyph);
    }

    pub fn upsert_composition(&mut self, composition: Composition) {
        self.compositions.insert(composition.id.clone(), composition);
    }

    pub fn mark_minimized(&mut self, id: impl Into<String>) {
        self.minimized.insert(id.into());
    }

    pub fn to_snapshot(&self) -> CanvasSnapshot {
        CanvasSnapshot {
            glyphs: self.glyphs.values().cloned().collect(),
            compositions: self.compositions.values().cloned().collect(),
            minimized_windows: self.minimized.iter().cloned().collect(),
        }
    }
}

impl From<CanvasSnapshot> for CanvasState {
    /// Later duplicates of an id replace earlier ones.
    fn from(snapshot: CanvasSnapshot) -> Self {
        let mut state = CanvasState::new();
        for glyph in snapshot.glyphs {
            state.upsert_glyph(glyph);
        }
        for composition in snapshot.compositions {
            state.upsert_composition(composition);
        }
        state.minimized.extend(snapshot.minimized_windows);
        state
    }
}
