//! Local canvas persistence: one JSON snapshot file per sync directory.

use std::path::{Path, PathBuf};

use tracing::debug;

use canvas_link_core::canvas::{CanvasSnapshot, CanvasState};
use canvas_link_core::error::{CanvasLinkError, Result};

/// File-backed store for the local canvas.
///
/// Layout: `<dir>/canvas.json`, a [`CanvasSnapshot`].
pub struct CanvasStore {
    path: PathBuf,
}

impl CanvasStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join("canvas.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the local canvas. A missing file is an empty canvas.
    pub async fn load(&self) -> Result<CanvasState> {
        if !self.path.exists() {
            return Ok(CanvasState::new());
        }
        let data = tokio::fs::read_to_string(&self.path).await?;
        let snapshot: CanvasSnapshot = serde_json::from_str(&data).map_err(|e| {
            CanvasLinkError::Store(format!("corrupt canvas file {}: {e}", self.path.display()))
        })?;
        let state = CanvasState::from(snapshot);
        debug!(path = %self.path.display(), entities = state.len(), "Loaded local canvas");
        Ok(state)
    }

    pub async fn save(&self, state: &CanvasState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string_pretty(&state.to_snapshot())?;
        // Atomic write: write to temp then rename
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), entities = state.len(), "Saved local canvas");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use canvas_link_core::canvas::PlacedElement;

    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty_canvas() {
        let dir = tempfile::tempdir().unwrap();
        let store = CanvasStore::new(dir.path());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CanvasStore::new(dir.path().join("nested"));

        let mut state = CanvasState::new();
        state.upsert_glyph(PlacedElement {
            id: "g1".into(),
            symbol: "ix".into(),
            x: 40,
            y: -8,
            width: Some(120),
            height: None,
            result_data: None,
        });
        state.mark_minimized("w1");
        store.save(&state).await.unwrap();

        assert_eq!(store.load().await.unwrap(), state);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CanvasStore::new(dir.path());
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.load().await, Err(CanvasLinkError::Store(_))));
    }
}
