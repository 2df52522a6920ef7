//! File-backed vector collections with cosine search
//!
//! Each collection is a directory under the store root holding one
//! `points.json`. Every write rewrites the whole file under the
//! collection's write lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ordered_float::OrderedFloat;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{LablabError, Result};

const POINTS_FILE: &str = "points.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub payload: BTreeMap<String, String>,
}

pub trait VectorStore: Send + Sync {
    fn ensure_collection(&self, collection: &str) -> Result<()>;

    fn upsert(&self, collection: &str, id: &str, vector: Vec<f32>, payload: BTreeMap<String, String>) -> Result<()>;

    /// Returns whether the point existed
    fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// Best `max(1, top_k)` matches, highest score first
    fn search(&self, collection: &str, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>>;
}

/// Keeps letters, digits, `-`, `_` and `.`; names left empty or all dots are rejected
pub fn sanitize(name: &str) -> Result<String> {
    let clean: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    if clean.chars().all(|c| c == '.') {
        return Err(LablabError::Storage(format!("Invalid collection name: {:?}", name)));
    }
    Ok(clean)
}

/// Cosine similarity given the query's norm; mismatched or zero vectors score -1
pub fn cosine(query: &[f32], query_norm: f32, other: &[f32]) -> f32 {
    if query.len() != other.len() {
        return -1.0;
    }
    let mut dot = 0.0f32;
    let mut norm_sq = 0.0f32;
    for (a, b) in query.iter().zip(other) {
        dot += a * b;
        norm_sq += b * b;
    }
    let norm = norm_sq.sqrt();
    if norm == 0.0 {
        return -1.0;
    }
    dot / (query_norm * norm)
}

pub struct FileVectorStore {
    root: PathBuf,
    locks: Mutex<BTreeMap<String, Arc<RwLock<()>>>>,
}

impl FileVectorStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, collection: &str) -> Result<PathBuf> {
        Ok(self.root.join(sanitize(collection)?))
    }

    fn points_path(&self, collection: &str) -> Result<PathBuf> {
        Ok(self.collection_path(collection)?.join(POINTS_FILE))
    }

    fn lock_for(&self, collection: &str) -> Result<Arc<RwLock<()>>> {
        Ok(self
            .locks
            .lock()
            .entry(sanitize(collection)?)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone())
    }

    fn read_points(path: &Path) -> Result<BTreeMap<String, VectorPoint>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(path)?;
        let points: Vec<VectorPoint> = serde_json::from_str(&text)?;
        Ok(points.into_iter().map(|p| (p.id.clone(), p)).collect())
    }

    fn write_points(path: &Path, points: &BTreeMap<String, VectorPoint>) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let list: Vec<&VectorPoint> = points.values().collect();
        std::fs::write(path, serde_json::to_string_pretty(&list)?)?;
        Ok(())
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let lock = self.lock_for(collection)?;
        let _guard = lock.read();
        Ok(Self::read_points(&self.points_path(collection)?)?.len())
    }
}

impl VectorStore for FileVectorStore {
    fn ensure_collection(&self, collection: &str) -> Result<()> {
        std::fs::create_dir_all(self.collection_path(collection)?)?;
        Ok(())
    }

    fn upsert(&self, collection: &str, id: &str, vector: Vec<f32>, payload: BTreeMap<String, String>) -> Result<()> {
        self.ensure_collection(collection)?;
        let path = self.points_path(collection)?;
        let lock = self.lock_for(collection)?;
        let _guard = lock.write();

        let mut points = Self::read_points(&path)?;
        points.insert(
            id.to_string(),
            VectorPoint {
                id: id.to_string(),
                vector,
                payload,
            },
        );
        Self::write_points(&path, &points)?;
        debug!(collection, id, total = points.len(), "Upserted vector");
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let path = self.points_path(collection)?;
        let lock = self.lock_for(collection)?;
        let _guard = lock.write();

        let mut points = Self::read_points(&path)?;
        if points.remove(id).is_none() {
            return Ok(false);
        }
        Self::write_points(&path, &points)?;
        Ok(true)
    }

    fn search(&self, collection: &str, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        let path = self.points_path(collection)?;
        let lock = self.lock_for(collection)?;
        let _guard = lock.read();

        let points = Self::read_points(&path)?;
        if points.is_empty() {
            return Ok(Vec::new());
        }
        let query_norm = query.iter().map(|v| v * v).sum::<f32>().sqrt();
        if query_norm == 0.0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<SearchResult> = points
            .into_values()
            .map(|p| SearchResult {
                score: cosine(query, query_norm, &p.vector),
                id: p.id,
                payload: p.payload,
            })
            .collect();
        scored.sort_by_key(|r| std::cmp::Reverse(OrderedFloat(r.score)));
        scored.truncate(top_k.max(1));
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> FileVectorStore {
        let root = std::env::temp_dir().join(format!("lablab-vectors-{}", uuid::Uuid::new_v4()));
        FileVectorStore::new(root).unwrap()
    }

    fn payload(text: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("text".to_string(), text.to_string())])
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("npc/../memories v1").unwrap(), "npc..memoriesv1");
        assert_eq!(sanitize("boss_goblin-king.2").unwrap(), "boss_goblin-king.2");
        for bad in ["", ".", "..", "../", "/.. /", "///"] {
            assert!(sanitize(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_dot_collections_stay_inside_root() {
        let base = std::env::temp_dir().join(format!("lablab-vectors-{}", uuid::Uuid::new_v4()));
        let store = FileVectorStore::new(base.join("store")).unwrap();
        assert!(store.upsert("..", "a", vec![1.0], BTreeMap::new()).is_err());
        assert!(store.upsert(".", "a", vec![1.0], BTreeMap::new()).is_err());
        assert!(store.search("..", &[1.0], 1).is_err());
        assert!(!base.join(POINTS_FILE).exists());
        assert!(!base.join("store").join(POINTS_FILE).exists());
        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine(&[1.0, 0.0], 1.0, &[1.0]), -1.0);
        assert_eq!(cosine(&[1.0, 0.0], 1.0, &[0.0, 0.0]), -1.0);
        assert!((cosine(&[1.0, 0.0], 1.0, &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let store = temp_store();
        store.upsert("memories", "east", vec![1.0, 0.0], payload("east")).unwrap();
        store.upsert("memories", "north", vec![0.0, 1.0], payload("north")).unwrap();
        store.upsert("memories", "northeast", vec![1.0, 1.0], payload("ne")).unwrap();
        store.upsert("memories", "short", vec![1.0], payload("bad")).unwrap();

        let results = store.search("memories", &[1.0, 0.1], 2).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["east", "northeast"]);
        assert_eq!(results[0].payload["text"], "east");

        let all = store.search("memories", &[1.0, 0.1], 10).unwrap();
        assert_eq!(all.last().unwrap().id, "short");
        assert_eq!(all.last().unwrap().score, -1.0);

        std::fs::remove_dir_all(store.root()).unwrap();
    }

    #[test]
    fn test_zero_query_and_min_top_k() {
        let store = temp_store();
        store.upsert("c", "a", vec![1.0, 0.0], BTreeMap::new()).unwrap();
        assert!(store.search("c", &[0.0, 0.0], 5).unwrap().is_empty());
        assert_eq!(store.search("c", &[1.0, 0.0], 0).unwrap().len(), 1);
        assert!(store.search("empty", &[1.0], 3).unwrap().is_empty());
        std::fs::remove_dir_all(store.root()).unwrap();
    }

    #[test]
    fn test_upsert_replaces_and_delete() {
        let store = temp_store();
        store.upsert("c", "a", vec![1.0], payload("one")).unwrap();
        store.upsert("c", "a", vec![1.0], payload("two")).unwrap();
        assert_eq!(store.count("c").unwrap(), 1);
        assert_eq!(store.search("c", &[1.0], 1).unwrap()[0].payload["text"], "two");

        assert!(store.delete("c", "a").unwrap());
        assert!(!store.delete("c", "a").unwrap());
        assert_eq!(store.count("c").unwrap(), 0);
        std::fs::remove_dir_all(store.root()).unwrap();
    }
}
