use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

pub const CORE_DESCRIPTION_MAX: usize = 1000;
pub const CORE_DETAIL_MAX: usize = 3000;
pub const CURATED_DESCRIPTION_MAX: usize = 500;
pub const CURATED_DETAIL_MAX: usize = 3000;

pub(crate) fn check_len(field: &'static str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len > max {
        return Err(MemoryError::FieldTooLong { field, len, max });
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreMemory {
    pub mode_id: String,
    pub name: String,
    pub description: String,
    pub detail: String,
    pub updated_at: String,
}

impl CoreMemory {
    pub fn validate(&self) -> Result<()> {
        check_len("description", &self.description, CORE_DESCRIPTION_MAX)?;
        check_len("detail", &self.detail, CORE_DETAIL_MAX)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratedMemory {
    pub mode_id: String,
    pub memory_id: String,
    pub name: String,
    pub description: String,
    pub detail: String,
    pub is_deleted: bool,
    pub updated_at: String,
}

impl CuratedMemory {
    pub fn validate(&self) -> Result<()> {
        check_len("description", &self.description, CURATED_DESCRIPTION_MAX)?;
        check_len("detail", &self.detail, CURATED_DETAIL_MAX)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryEventType {
    CoreUpsert,
    CuratedUpsert,
    CuratedDelete,
}

impl std::fmt::Display for MemoryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemoryEventType::CoreUpsert => "core_upsert",
            MemoryEventType::CuratedUpsert => "curated_upsert",
            MemoryEventType::CuratedDelete => "curated_delete",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MemoryEventType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "core_upsert" => Ok(MemoryEventType::CoreUpsert),
            "curated_upsert" => Ok(MemoryEventType::CuratedUpsert),
            "curated_delete" => Ok(MemoryEventType::CuratedDelete),
            other => Err(MemoryError::InvalidModeId(format!(
                "unknown event type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub id: i64,
    pub mode_id: String,
    pub rev: i64,
    pub event_type: MemoryEventType,
    pub memory_id: Option<String>,
    pub payload_json: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrepareMode {
    Full,
    Delta,
    None,
}

impl std::fmt::Display for PrepareMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PrepareMode::Full => "full",
            PrepareMode::Delta => "delta",
            PrepareMode::None => "none",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareTurn {
    pub prepare_id: String,
    pub session_key: String,
    pub mode_id: String,
    pub from_revision: i64,
    pub to_revision: i64,
    pub mode: PrepareMode,
    pub created_at: String,
    pub acked_at: Option<String>,
    pub ack_status: Option<AckStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedXml {
    pub prepare_id: String,
    pub mode: PrepareMode,
    pub from_revision: i64,
    pub to_revision: i64,
    pub xml: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivalMemory {
    pub memory_id: String,
    pub mode_id: String,
    pub name: String,
    pub description: String,
    pub detail: String,
    pub embedding: Vec<f32>,
    pub embedding_dim: usize,
    pub embedding_norm: f32,
    pub metadata_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivalHit {
    pub memory_id: String,
    pub name: String,
    pub description: String,
    pub detail: Option<String>,
    pub score: f32,
}
