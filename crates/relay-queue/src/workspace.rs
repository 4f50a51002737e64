use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::error::QueueError;
use crate::types::Attachment;

static SEQ: AtomicU64 = AtomicU64::new(0);

/// An allocated `dataDir/turn-work/{ts}-{pid}-{seq}-{sanitized_task_key}`
/// directory with `input/`/`output/` subdirs, removed on drop via
/// [`TurnWorkspace::cleanup`] (explicit, not `Drop`, since cleanup is async).
pub struct TurnWorkspace {
    pub root: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TurnWorkspace {
    pub async fn allocate(base_dir: &Path, task_key: &str) -> Result<Self, QueueError> {
        let ts = chrono::Utc::now().timestamp_millis();
        let pid = std::process::id();
        let seq = SEQ.fetch_add(1, Ordering::SeqCst);
        let sanitized = sanitize_task_key(task_key);
        let root = base_dir
            .join("turn-work")
            .join(format!("{ts}-{pid}-{seq}-{sanitized}"));
        let input_dir = root.join("input");
        let output_dir = root.join("output");

        tokio::fs::create_dir_all(&input_dir)
            .await
            .map_err(|e| QueueError::Workspace(e.to_string()))?;
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| QueueError::Workspace(e.to_string()))?;

        Ok(Self {
            root,
            input_dir,
            output_dir,
        })
    }

    pub async fn cleanup(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.root.display(), error = %e, "failed to remove turn workspace");
            }
        }
    }

    /// Harvest non-empty, non-oversized files from `output/`, skipping the
    /// restart-directive file by name.
    pub async fn harvest_output(
        &self,
        restart_directive_filename: &str,
        max_bytes: u64,
    ) -> Vec<Attachment> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.output_dir).await {
            Ok(e) => e,
            Err(_) => return out,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let filename = entry.file_name().to_string_lossy().to_string();
            if filename == restart_directive_filename {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !meta.is_file() || meta.len() == 0 || meta.len() > max_bytes {
                continue;
            }
            out.push(Attachment { path, filename });
        }
        out.sort_by(|a, b| a.filename.cmp(&b.filename));
        out
    }
}

/// Move every file in `shared_input_dir` matching `task_key`'s staging
/// convention into `turn.input_dir`, renaming on collision. Falls back to
/// copy+unlink when `rename` fails across a filesystem boundary.
pub async fn stage_input_files(
    shared_input_dir: &Path,
    turn_input_dir: &Path,
    staged: &[PathBuf],
    max_bytes: u64,
) -> Vec<Attachment> {
    let mut out = Vec::new();
    for src in staged {
        let Some(name) = src.file_name().map(|n| n.to_owned()) else {
            continue;
        };
        if let Ok(meta) = tokio::fs::metadata(src).await {
            if meta.len() > max_bytes {
                debug!(src = %src.display(), bytes = meta.len(), "skipping oversized attachment");
                continue;
            }
        }
        let mut dest = turn_input_dir.join(&name);
        let mut collision = 1u32;
        while dest.exists() {
            let stem = Path::new(&name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let ext = Path::new(&name)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            dest = turn_input_dir.join(format!("{stem}-{collision}{ext}"));
            collision += 1;
        }

        match tokio::fs::rename(src, &dest).await {
            Ok(()) => {}
            Err(_) => {
                if let Err(e) = tokio::fs::copy(src, &dest).await {
                    warn!(src = %src.display(), error = %e, "failed to stage input file");
                    continue;
                }
                let _ = tokio::fs::remove_file(src).await;
            }
        }

        let filename = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        debug!(filename, "staged input file into turn workspace");
        out.push(Attachment { path: dest, filename });
    }
    let _ = shared_input_dir; // retained for call-site symmetry with the output dir API
    out
}

fn sanitize_task_key(task_key: &str) -> String {
    task_key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Split `text` into chunks no longer than `max_chars`, preferring to break
/// at a closing code fence or blank line boundary so a multi-chunk reply
/// doesn't split a fenced code block across messages.
pub fn split_reply_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            chunks.push(remaining.to_string());
            break;
        }

        let window = &remaining[..max_chars];
        let split_at = window
            .rfind("\n```\n")
            .map(|i| i + 4)
            .or_else(|| window.rfind("\n\n"))
            .or_else(|| window.rfind('\n'))
            .unwrap_or(max_chars);
        let split_at = if split_at == 0 { max_chars } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches('\n');
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_reply_chunks_passthrough_when_short() {
        let chunks = split_reply_chunks("hello", 1990);
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[test]
    fn split_reply_chunks_breaks_on_blank_line() {
        let text = format!("{}\n\n{}", "a".repeat(50), "b".repeat(50));
        let chunks = split_reply_chunks(&text, 60);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.len() <= 60 || !c.contains("\n\n")));
    }

    #[tokio::test]
    async fn workspace_allocates_input_and_output_dirs() {
        let base = tempfile::tempdir().unwrap();
        let ws = TurnWorkspace::allocate(base.path(), "user:1:context:2").await.unwrap();
        assert!(ws.input_dir.is_dir());
        assert!(ws.output_dir.is_dir());
        ws.cleanup().await;
        assert!(!ws.root.exists());
    }

    #[tokio::test]
    async fn harvest_output_skips_restart_file_and_empty_files() {
        let base = tempfile::tempdir().unwrap();
        let ws = TurnWorkspace::allocate(base.path(), "user:1:context:2").await.unwrap();
        tokio::fs::write(ws.output_dir.join("report.txt"), b"hello")
            .await
            .unwrap();
        tokio::fs::write(ws.output_dir.join("restart.json"), b"{}").await.unwrap();
        tokio::fs::write(ws.output_dir.join("empty.txt"), b"").await.unwrap();

        let files = ws.harvest_output("restart.json", 25 * 1024 * 1024).await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "report.txt");
    }
}
