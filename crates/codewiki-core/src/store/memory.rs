//! In-memory [`Store`] implementation for tests and embedding in other
//! programs.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Similarity search is
//! brute-force cosine over the unit's stored vectors.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::models::{AnalysisUnit, Passage, RepoRef, ScoredPassage, Topic, UnitStatus};

use super::Store;

struct StoredPassage {
    passage: Passage,
    vector: Vec<f32>,
}

/// In-memory store.
pub struct InMemoryStore {
    units: RwLock<HashMap<String, AnalysisUnit>>,
    topics: RwLock<Vec<Topic>>,
    passages: RwLock<Vec<StoredPassage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            units: RwLock::new(HashMap::new()),
            topics: RwLock::new(Vec::new()),
            passages: RwLock::new(Vec::new()),
        }
    }

    fn update_unit(&self, unit_id: &str, f: impl FnOnce(&mut AnalysisUnit)) -> Result<()> {
        let mut units = self.units.write().map_err(|_| poisoned())?;
        let unit = units
            .get_mut(unit_id)
            .ok_or_else(|| anyhow!("Unknown analysis unit: {}", unit_id))?;
        f(unit);
        unit.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_unit(&self, repo: &RepoRef) -> Result<AnalysisUnit> {
        let mut units = self.units.write().map_err(|_| poisoned())?;
        if let Some(u) = units
            .values()
            .find(|u| u.owner == repo.owner && u.name == repo.name)
        {
            return Ok(u.clone());
        }
        let now = chrono::Utc::now().timestamp();
        let unit = AnalysisUnit {
            id: Uuid::new_v4().to_string(),
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            default_branch: None,
            description: None,
            status: UnitStatus::Pending,
            overview: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        units.insert(unit.id.clone(), unit.clone());
        Ok(unit)
    }

    async fn get_unit(&self, id: &str) -> Result<Option<AnalysisUnit>> {
        let units = self.units.read().map_err(|_| poisoned())?;
        Ok(units.get(id).cloned())
    }

    async fn find_unit(&self, repo: &RepoRef) -> Result<Option<AnalysisUnit>> {
        let units = self.units.read().map_err(|_| poisoned())?;
        Ok(units
            .values()
            .find(|u| u.owner == repo.owner && u.name == repo.name)
            .cloned())
    }

    async fn list_units(&self) -> Result<Vec<AnalysisUnit>> {
        let units = self.units.read().map_err(|_| poisoned())?;
        let mut all: Vec<AnalysisUnit> = units.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }

    async fn set_status(&self, unit_id: &str, status: UnitStatus, message: Option<&str>) -> Result<()> {
        self.update_unit(unit_id, |u| {
            u.status = status;
            u.error_message = message.map(str::to_string);
        })
    }

    async fn set_unit_details(
        &self,
        unit_id: &str,
        default_branch: &str,
        description: Option<&str>,
    ) -> Result<()> {
        self.update_unit(unit_id, |u| {
            u.default_branch = Some(default_branch.to_string());
            u.description = description.map(str::to_string);
        })
    }

    async fn set_overview(&self, unit_id: &str, overview: &str) -> Result<()> {
        self.update_unit(unit_id, |u| u.overview = Some(overview.to_string()))
    }

    async fn clear_unit(&self, unit_id: &str) -> Result<()> {
        self.topics
            .write()
            .map_err(|_| poisoned())?
            .retain(|t| t.unit_id != unit_id);
        self.passages
            .write()
            .map_err(|_| poisoned())?
            .retain(|p| p.passage.unit_id != unit_id);
        self.update_unit(unit_id, |u| u.overview = None)
    }

    async fn insert_topic(&self, topic: &Topic) -> Result<()> {
        let mut topics = self.topics.write().map_err(|_| poisoned())?;
        topics.push(topic.clone());
        Ok(())
    }

    async fn list_topics(&self, unit_id: &str) -> Result<Vec<Topic>> {
        let topics = self.topics.read().map_err(|_| poisoned())?;
        let mut out: Vec<Topic> = topics
            .iter()
            .filter(|t| t.unit_id == unit_id)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.position);
        Ok(out)
    }

    async fn insert_passages(&self, passages: &[Passage], vectors: &[Vec<f32>], _model: &str) -> Result<()> {
        if passages.len() != vectors.len() {
            bail!(
                "Passage/vector count mismatch: {} passages, {} vectors",
                passages.len(),
                vectors.len()
            );
        }
        let mut stored = self.passages.write().map_err(|_| poisoned())?;
        for (p, v) in passages.iter().zip(vectors) {
            stored.push(StoredPassage {
                passage: p.clone(),
                vector: v.clone(),
            });
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        unit_id: &str,
        query_vec: &[f32],
        k: usize,
        threshold: f64,
    ) -> Result<Vec<ScoredPassage>> {
        let stored = self.passages.read().map_err(|_| poisoned())?;
        let mut scored: Vec<ScoredPassage> = stored
            .iter()
            .filter(|s| s.passage.unit_id == unit_id)
            .map(|s| ScoredPassage {
                passage: s.passage.clone(),
                score: cosine_similarity(query_vec, &s.vector) as f64,
            })
            .filter(|s| s.score > threshold)
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count_passages(&self, unit_id: &str) -> Result<usize> {
        let stored = self.passages.read().map_err(|_| poisoned())?;
        Ok(stored.iter().filter(|s| s.passage.unit_id == unit_id).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PassageKind;

    fn passage(unit_id: &str, content: &str, position: i64) -> Passage {
        Passage {
            id: Uuid::new_v4().to_string(),
            unit_id: unit_id.to_string(),
            kind: PassageKind::Code,
            topic_id: None,
            source_file: Some("src/lib.rs".to_string()),
            content: content.to_string(),
            hash: String::new(),
            position,
        }
    }

    #[tokio::test]
    async fn test_upsert_unit_is_idempotent() {
        let store = InMemoryStore::new();
        let repo = RepoRef::new("a", "b");
        let first = store.upsert_unit(&repo).await.unwrap();
        let second = store.upsert_unit(&repo).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.status, UnitStatus::Pending);
        assert_eq!(store.list_units().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_similarity_search_threshold_and_order() {
        let store = InMemoryStore::new();
        let unit = store.upsert_unit(&RepoRef::new("a", "b")).await.unwrap();
        let ps = vec![passage(&unit.id, "x", 0), passage(&unit.id, "y", 1), passage(&unit.id, "z", 2)];
        let vs = vec![vec![1.0, 0.0], vec![0.8, 0.6], vec![0.0, 1.0]];
        store.insert_passages(&ps, &vs, "m").await.unwrap();

        let hits = store
            .similarity_search(&unit.id, &[1.0, 0.0], 5, 0.3)
            .await
            .unwrap();
        let contents: Vec<_> = hits.iter().map(|h| h.passage.content.as_str()).collect();
        assert_eq!(contents, vec!["x", "y"]);

        let top1 = store
            .similarity_search(&unit.id, &[1.0, 0.0], 1, 0.0)
            .await
            .unwrap();
        assert_eq!(top1.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_passages_length_mismatch() {
        let store = InMemoryStore::new();
        let err = store
            .insert_passages(&[passage("u", "x", 0)], &[], "m")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }

    #[tokio::test]
    async fn test_clear_unit_removes_outputs() {
        let store = InMemoryStore::new();
        let unit = store.upsert_unit(&RepoRef::new("a", "b")).await.unwrap();
        store
            .insert_passages(&[passage(&unit.id, "x", 0)], &[vec![1.0]], "m")
            .await
            .unwrap();
        store.set_overview(&unit.id, "overview").await.unwrap();
        store.clear_unit(&unit.id).await.unwrap();

        assert_eq!(store.count_passages(&unit.id).await.unwrap(), 0);
        assert!(store.get_unit(&unit.id).await.unwrap().unwrap().overview.is_none());
    }
}
