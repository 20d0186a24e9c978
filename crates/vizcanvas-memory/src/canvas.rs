use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vizcanvas_schema::{CanvasEdge, CanvasNode};

/// Persisted nodes and edges of one canvas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    #[serde(default)]
    pub nodes: Vec<CanvasNode>,
    #[serde(default)]
    pub edges: Vec<CanvasEdge>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct CanvasStore {
    path: PathBuf,
}

impl CanvasStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: root.as_ref().join("canvas.json"),
        }
    }

    /// Store at an explicit file path instead of `<root>/canvas.json`.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored canvas; a missing file is an empty canvas.
    pub async fn load(&self) -> Result<CanvasSnapshot> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse canvas file: {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CanvasSnapshot::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, nodes: &[CanvasNode], edges: &[CanvasEdge]) -> Result<CanvasSnapshot> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let snapshot = CanvasSnapshot {
            nodes: nodes.to_vec(),
            edges: edges.to_vec(),
            updated_at: Some(Utc::now()),
        };
        let body = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&self.path, body)
            .await
            .with_context(|| format!("failed to write canvas file: {}", self.path.display()))?;
        tracing::debug!(
            nodes = snapshot.nodes.len(),
            edges = snapshot.edges.len(),
            "canvas saved"
        );
        Ok(snapshot)
    }

    /// Returns true if a stored canvas was removed.
    pub async fn clear(&self) -> Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vizcanvas_schema::{ChartDirective, ChartKind, Point, Size};

    fn node(id: &str) -> CanvasNode {
        CanvasNode {
            id: id.into(),
            position: Point::new(100.0, 100.0),
            size: Size::new(400.0, 300.0),
            label: "Bar Chart".into(),
            chart_directive: Some(ChartDirective::empty(ChartKind::Bar)),
        }
    }

    #[tokio::test]
    async fn load_missing_is_empty() {
        let tmp = TempDir::new().expect("tempdir");
        let store = CanvasStore::new(tmp.path());
        let snapshot = store.load().await.expect("load");
        assert!(snapshot.nodes.is_empty());
        assert!(snapshot.updated_at.is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let tmp = TempDir::new().expect("tempdir");
        let store = CanvasStore::new(tmp.path());
        let edges = vec![CanvasEdge {
            id: "edge-a-b".into(),
            source_id: "a".into(),
            target_id: "b".into(),
            animated: true,
        }];

        let saved = store.save(&[node("a"), node("b")], &edges).await.expect("save");
        assert!(saved.updated_at.is_some());

        let loaded = store.load().await.expect("load");
        assert_eq!(loaded, saved);
    }

    #[tokio::test]
    async fn clear_removes_file() {
        let tmp = TempDir::new().expect("tempdir");
        let store = CanvasStore::at_path(tmp.path().join("nested/board.json"));
        assert!(!store.clear().await.expect("clear missing"));

        store.save(&[node("a")], &[]).await.expect("save");
        assert!(store.path().exists());
        assert!(store.clear().await.expect("clear"));
        assert!(store.load().await.expect("load").nodes.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let tmp = TempDir::new().expect("tempdir");
        let store = CanvasStore::new(tmp.path());
        tokio::fs::write(store.path(), "[not a canvas").await.expect("write");
        let err = store.load().await.unwrap_err();
        assert!(err.to_string().contains("failed to parse canvas file"));
    }
}
