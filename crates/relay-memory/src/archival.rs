use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;
use crate::types::{ArchivalHit, ArchivalMemory};

const DEFAULT_CANDIDATE_LIMIT: usize = 600;
const DEFAULT_TOP_K: usize = 8;
const MAX_TOP_K: usize = 50;

/// Vector store for one mode's archival (long-term, search-only) memories.
pub struct ArchivalStore {
    mode_id: String,
    db: Mutex<Connection>,
}

impl ArchivalStore {
    pub fn new(mode_id: impl Into<String>, conn: Connection) -> Self {
        Self {
            mode_id: mode_id.into(),
            db: Mutex::new(conn),
        }
    }

    /// Upsert by `memory_id` (generating one if absent). Returns
    /// `(memory_id, created)` — `created=false` means an existing row was
    /// overwritten.
    pub fn upsert(
        &self,
        memory_id: Option<&str>,
        name: &str,
        description: &str,
        detail: &str,
        embedding: Vec<f32>,
        metadata_json: Option<&str>,
    ) -> Result<(String, bool)> {
        let memory_id = memory_id
            .map(|s| s.to_string())
            .unwrap_or_else(relay_core::ids::new_id);
        let now = relay_core::ids::now_rfc3339();
        let norm = l2_norm(&embedding);
        let dim = embedding.len();
        let blob = encode_embedding(&embedding);

        let db = self.db.lock().unwrap();
        let existed: bool = db
            .query_row(
                "SELECT 1 FROM archival_memory WHERE memory_id = ?1 AND mode_id = ?2",
                rusqlite::params![memory_id, self.mode_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        db.execute(
            "INSERT INTO archival_memory
                (memory_id, mode_id, name, description, detail, embedding, embedding_dim,
                 embedding_norm, metadata_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(memory_id) DO UPDATE SET
                name = excluded.name, description = excluded.description,
                detail = excluded.detail, embedding = excluded.embedding,
                embedding_dim = excluded.embedding_dim, embedding_norm = excluded.embedding_norm,
                metadata_json = excluded.metadata_json, updated_at = excluded.updated_at",
            rusqlite::params![
                memory_id, self.mode_id, name, description, detail, blob, dim as i64, norm,
                metadata_json, now,
            ],
        )?;

        Ok((memory_id, !existed))
    }

    pub fn delete(&self, memory_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM archival_memory WHERE memory_id = ?1 AND mode_id = ?2",
            rusqlite::params![memory_id, self.mode_id],
        )?;
        Ok(())
    }

    pub fn search(
        &self,
        query_embedding: &[f32],
        top_k: Option<usize>,
        candidate_limit: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<Vec<ArchivalHit>> {
        let top_k = top_k.unwrap_or(DEFAULT_TOP_K).min(MAX_TOP_K);
        let candidate_limit = candidate_limit.unwrap_or(DEFAULT_CANDIDATE_LIMIT);
        let min_score = min_score.unwrap_or(f32::NEG_INFINITY);
        let query_dim = query_embedding.len();
        let query_norm = l2_norm(query_embedding);

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT memory_id, name, description, detail, embedding, embedding_norm
             FROM archival_memory
             WHERE mode_id = ?1 AND embedding_dim = ?2
             ORDER BY updated_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![self.mode_id, query_dim as i64, candidate_limit as i64],
            |row| {
                let memory_id: String = row.get(0)?;
                let name: String = row.get(1)?;
                let description: String = row.get(2)?;
                let detail: String = row.get(3)?;
                let blob: Vec<u8> = row.get(4)?;
                let norm: f32 = row.get(5)?;
                Ok((memory_id, name, description, detail, blob, norm))
            },
        )?;

        let mut hits: Vec<ArchivalHit> = Vec::new();
        for row in rows {
            let (memory_id, name, description, detail, blob, norm) = row?;
            let embedding = decode_embedding(&blob);
            let score = cosine(query_embedding, query_norm, &embedding, norm);
            if !score.is_finite() || score < min_score {
                continue;
            }
            hits.push(ArchivalHit {
                memory_id,
                name,
                description,
                detail: Some(detail),
                score,
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    pub fn get(&self, memory_id: &str) -> Result<Option<ArchivalMemory>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT memory_id, mode_id, name, description, detail, embedding, embedding_dim,
                        embedding_norm, metadata_json, created_at, updated_at
                 FROM archival_memory WHERE memory_id = ?1 AND mode_id = ?2",
                rusqlite::params![memory_id, self.mode_id],
                |row| {
                    let blob: Vec<u8> = row.get(5)?;
                    Ok(ArchivalMemory {
                        memory_id: row.get(0)?,
                        mode_id: row.get(1)?,
                        name: row.get(2)?,
                        description: row.get(3)?,
                        detail: row.get(4)?,
                        embedding: decode_embedding(&blob),
                        embedding_dim: row.get::<_, i64>(6)? as usize,
                        embedding_norm: row.get(7)?,
                        metadata_json: row.get(8)?,
                        created_at: row.get(9)?,
                        updated_at: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 || a.len() != b.len() {
        return f32::NEG_INFINITY;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archival() -> ArchivalStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_archival_db(&conn).unwrap();
        ArchivalStore::new("m1", conn)
    }

    #[test]
    fn upsert_same_id_twice_is_not_created_second_time() {
        let a = archival();
        let (id, created) = a.upsert(Some("x1"), "N", "D", "T", vec![1.0, 0.0], None).unwrap();
        assert!(created);
        let (id2, created2) = a.upsert(Some("x1"), "N2", "D2", "T2", vec![1.0, 0.0], None).unwrap();
        assert_eq!(id, id2);
        assert!(!created2);
    }

    #[test]
    fn search_ranks_identical_vector_first() {
        let a = archival();
        a.upsert(Some("x1"), "A", "a", "a", vec![1.0, 0.0, 0.0], None).unwrap();
        a.upsert(Some("x2"), "B", "b", "b", vec![0.0, 1.0, 0.0], None).unwrap();
        let hits = a.search(&[1.0, 0.0, 0.0], Some(5), None, None).unwrap();
        assert_eq!(hits[0].memory_id, "x1");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn search_ignores_mismatched_dimension() {
        let a = archival();
        a.upsert(Some("x1"), "A", "a", "a", vec![1.0, 0.0], None).unwrap();
        let hits = a.search(&[1.0, 0.0, 0.0], Some(5), None, None).unwrap();
        assert!(hits.is_empty());
    }
}
