//! SQLite-backed [`Store`] implementation.
//!
//! Vectors are stored as little-endian f32 BLOBs next to their passage;
//! similarity search loads the unit's vectors and ranks them in Rust with
//! [`cosine_similarity`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use codewiki_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use codewiki_core::models::{
    AnalysisUnit, Passage, PassageKind, RepoRef, ScoredPassage, Topic, UnitStatus,
};
use codewiki_core::store::Store;

use crate::config::Config;
use crate::{db, migrate};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

const UNIT_COLUMNS: &str = "id, owner, name, default_branch, description, status, overview, \
                            error_message, created_at, updated_at";

fn unit_from_row(row: &SqliteRow) -> Result<AnalysisUnit> {
    let status: String = row.get("status");
    Ok(AnalysisUnit {
        id: row.get("id"),
        owner: row.get("owner"),
        name: row.get("name"),
        default_branch: row.get("default_branch"),
        description: row.get("description"),
        status: UnitStatus::parse(&status)?,
        overview: row.get("overview"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn topic_from_row(row: &SqliteRow) -> Result<Topic> {
    let entry_points: String = row.get("entry_points_json");
    let citations: String = row.get("citations_json");
    Ok(Topic {
        id: row.get("id"),
        unit_id: row.get("unit_id"),
        slug: row.get("slug"),
        title: row.get("title"),
        summary: row.get("summary"),
        body: row.get("body"),
        entry_points: serde_json::from_str(&entry_points)?,
        citations: serde_json::from_str(&citations)?,
        position: row.get("position"),
    })
}

fn passage_from_row(row: &SqliteRow) -> Result<Passage> {
    let kind: String = row.get("kind");
    Ok(Passage {
        id: row.get("id"),
        unit_id: row.get("unit_id"),
        kind: PassageKind::parse(&kind)?,
        topic_id: row.get("topic_id"),
        source_file: row.get("source_file"),
        content: row.get("content"),
        hash: row.get("hash"),
        position: row.get("position"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_unit(&self, repo: &RepoRef) -> Result<AnalysisUnit> {
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO analysis_units (id, owner, name, status, created_at, updated_at)
            VALUES (?, ?, ?, 'pending', ?, ?)
            ON CONFLICT(owner, name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&repo.owner)
        .bind(&repo.name)
        .bind(ts)
        .bind(ts)
        .execute(&self.pool)
        .await?;

        match self.find_unit(repo).await? {
            Some(unit) => Ok(unit),
            None => bail!("Failed to create analysis unit for {}", repo),
        }
    }

    async fn get_unit(&self, id: &str) -> Result<Option<AnalysisUnit>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM analysis_units WHERE id = ?",
            UNIT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(unit_from_row).transpose()
    }

    async fn find_unit(&self, repo: &RepoRef) -> Result<Option<AnalysisUnit>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM analysis_units WHERE owner = ? AND name = ?",
            UNIT_COLUMNS
        ))
        .bind(&repo.owner)
        .bind(&repo.name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(unit_from_row).transpose()
    }

    async fn list_units(&self) -> Result<Vec<AnalysisUnit>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM analysis_units ORDER BY updated_at DESC",
            UNIT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(unit_from_row).collect()
    }

    async fn set_status(&self, unit_id: &str, status: UnitStatus, message: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE analysis_units SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(message)
        .bind(now())
        .bind(unit_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_unit_details(
        &self,
        unit_id: &str,
        default_branch: &str,
        description: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE analysis_units SET default_branch = ?, description = ?, updated_at = ? WHERE id = ?",
        )
        .bind(default_branch)
        .bind(description)
        .bind(now())
        .bind(unit_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_overview(&self, unit_id: &str, overview: &str) -> Result<()> {
        sqlx::query("UPDATE analysis_units SET overview = ?, updated_at = ? WHERE id = ?")
            .bind(overview)
            .bind(now())
            .bind(unit_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_unit(&self, unit_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM passages WHERE unit_id = ?")
            .bind(unit_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM topics WHERE unit_id = ?")
            .bind(unit_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE analysis_units SET overview = NULL, updated_at = ? WHERE id = ?")
            .bind(now())
            .bind(unit_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_topic(&self, topic: &Topic) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO topics (id, unit_id, slug, title, summary, body,
                                entry_points_json, citations_json, position)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&topic.id)
        .bind(&topic.unit_id)
        .bind(&topic.slug)
        .bind(&topic.title)
        .bind(&topic.summary)
        .bind(&topic.body)
        .bind(serde_json::to_string(&topic.entry_points)?)
        .bind(serde_json::to_string(&topic.citations)?)
        .bind(topic.position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_topics(&self, unit_id: &str) -> Result<Vec<Topic>> {
        let rows = sqlx::query(
            r#"
            SELECT id, unit_id, slug, title, summary, body,
                   entry_points_json, citations_json, position
            FROM topics WHERE unit_id = ? ORDER BY position
            "#,
        )
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(topic_from_row).collect()
    }

    async fn insert_passages(&self, passages: &[Passage], vectors: &[Vec<f32>], model: &str) -> Result<()> {
        if passages.len() != vectors.len() {
            bail!(
                "Passage/vector count mismatch: {} passages, {} vectors",
                passages.len(),
                vectors.len()
            );
        }

        let mut tx = self.pool.begin().await?;
        for (p, v) in passages.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO passages (id, unit_id, kind, topic_id, source_file, content,
                                      hash, position, model, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&p.id)
            .bind(&p.unit_id)
            .bind(p.kind.as_str())
            .bind(&p.topic_id)
            .bind(&p.source_file)
            .bind(&p.content)
            .bind(&p.hash)
            .bind(p.position)
            .bind(model)
            .bind(v.len() as i64)
            .bind(vec_to_blob(v))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn similarity_search(
        &self,
        unit_id: &str,
        query_vec: &[f32],
        k: usize,
        threshold: f64,
    ) -> Result<Vec<ScoredPassage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, unit_id, kind, topic_id, source_file, content, hash, position, embedding
            FROM passages WHERE unit_id = ?
            "#,
        )
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::new();
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
            if score > threshold {
                scored.push(ScoredPassage {
                    passage: passage_from_row(row)?,
                    score,
                });
            }
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count_passages(&self, unit_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM passages WHERE unit_id = ?")
            .bind(unit_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use codewiki_core::models::{Citation, EntryPoint};

    async fn open(dir: &tempfile::TempDir) -> SqliteStore {
        let path = dir.path().join("wiki.sqlite");
        let config = parse_config(&format!("[db]\npath = {:?}\n", path.display().to_string())).unwrap();
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn passage(unit_id: &str, n: i64) -> Passage {
        Passage {
            id: Uuid::new_v4().to_string(),
            unit_id: unit_id.to_string(),
            kind: PassageKind::Code,
            topic_id: None,
            source_file: Some(format!("src/f{n}.rs")),
            content: format!("fn f{n}() {{}}"),
            hash: format!("h{n}"),
            position: n,
        }
    }

    #[tokio::test]
    async fn test_unit_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let repo = RepoRef::new("tokio-rs", "axum");

        let unit = store.upsert_unit(&repo).await.unwrap();
        assert_eq!(store.upsert_unit(&repo).await.unwrap().id, unit.id);

        store
            .set_unit_details(&unit.id, "main", Some("web framework"))
            .await
            .unwrap();
        store
            .set_status(&unit.id, UnitStatus::Error, Some("boom"))
            .await
            .unwrap();

        let got = store.get_unit(&unit.id).await.unwrap().unwrap();
        assert_eq!(got.default_branch.as_deref(), Some("main"));
        assert_eq!(got.status, UnitStatus::Error);
        assert_eq!(got.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_topics_roundtrip_in_position_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let unit = store.upsert_unit(&RepoRef::new("a", "b")).await.unwrap();

        for position in [2i64, 0, 1] {
            store
                .insert_topic(&Topic {
                    id: Uuid::new_v4().to_string(),
                    unit_id: unit.id.clone(),
                    slug: format!("t{position}"),
                    title: format!("Topic {position}"),
                    summary: "s".into(),
                    body: "b".into(),
                    entry_points: vec![EntryPoint {
                        file: "src/lib.rs".into(),
                        line: 3,
                        symbol: "run".into(),
                        url: String::new(),
                    }],
                    citations: vec![Citation {
                        file: "src/lib.rs".into(),
                        start_line: 1,
                        end_line: 9,
                        url: String::new(),
                    }],
                    position,
                })
                .await
                .unwrap();
        }

        let topics = store.list_topics(&unit.id).await.unwrap();
        let slugs: Vec<_> = topics.iter().map(|t| t.slug.as_str()).collect();
        assert_eq!(slugs, vec!["t0", "t1", "t2"]);
        assert_eq!(topics[0].entry_points[0].symbol, "run");
        assert_eq!(topics[0].citations[0].end_line, 9);
    }

    #[tokio::test]
    async fn test_similarity_search_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let unit = store.upsert_unit(&RepoRef::new("a", "b")).await.unwrap();

        store
            .insert_passages(
                &[passage(&unit.id, 0), passage(&unit.id, 1)],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                "test-model",
            )
            .await
            .unwrap();
        assert_eq!(store.count_passages(&unit.id).await.unwrap(), 2);

        let hits = store
            .similarity_search(&unit.id, &[1.0, 0.1], 5, 0.3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].passage.source_file.as_deref(), Some("src/f0.rs"));

        store.clear_unit(&unit.id).await.unwrap();
        assert_eq!(store.count_passages(&unit.id).await.unwrap(), 0);
        assert!(store.list_topics(&unit.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_passages_rejects_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let unit = store.upsert_unit(&RepoRef::new("a", "b")).await.unwrap();
        assert!(store
            .insert_passages(&[passage(&unit.id, 0)], &[], "m")
            .await
            .is_err());
    }
}
