use std::path::Path;

use tracing::debug;

use crate::types::RestartDirective;

/// Walk the directive-discovery order and return the first directive that
/// carries a restart signal: the named dotfile, then any other JSON object
/// file in `output_dir`, then the final reply text.
pub async fn discover_directive(
    output_dir: &Path,
    directive_filename: &str,
    reply_text: &str,
) -> Option<RestartDirective> {
    if let Some(d) = read_named_file(output_dir, directive_filename).await {
        if d.has_restart_signal() {
            return Some(d);
        }
    }

    if let Some(d) = scan_other_json_files(output_dir, directive_filename).await {
        if d.has_restart_signal() {
            return Some(d);
        }
    }

    if let Some(d) = parse_reply_text(reply_text) {
        if d.has_restart_signal() {
            return Some(d);
        }
    }

    None
}

async fn read_named_file(output_dir: &Path, filename: &str) -> Option<RestartDirective> {
    let path = output_dir.join(filename);
    let bytes = tokio::fs::read(&path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

async fn scan_other_json_files(
    output_dir: &Path,
    directive_filename: &str,
) -> Option<RestartDirective> {
    let mut entries = tokio::fs::read_dir(output_dir).await.ok()?;
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        names.push(entry.file_name());
    }
    names.sort();

    for name in names {
        let name_str = name.to_string_lossy().to_string();
        if name_str == directive_filename || !name_str.ends_with(".json") {
            continue;
        }
        let Ok(bytes) = tokio::fs::read(output_dir.join(&name)).await else {
            continue;
        };
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
            continue;
        };
        if !value.is_object() {
            continue;
        }
        if let Ok(directive) = serde_json::from_value::<RestartDirective>(value) {
            if directive.has_restart_signal() {
                debug!(file = %name_str, "restart directive found in output file");
                return Some(directive);
            }
        }
    }
    None
}

/// Whole-text JSON first, else the first fenced code block (```json or bare
/// ```) that parses as an object.
fn parse_reply_text(reply_text: &str) -> Option<RestartDirective> {
    let trimmed = reply_text.trim();
    if let Ok(d) = serde_json::from_str::<RestartDirective>(trimmed) {
        return Some(d);
    }

    let block = extract_first_fence(reply_text)?;
    serde_json::from_str(&block).ok()
}

fn extract_first_fence(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_open = start + 3;
    let rest = &text[after_open..];
    let first_line_end = rest.find('\n').unwrap_or(0);
    let first_line = &rest[..first_line_end];
    let body_start = if first_line.trim().eq_ignore_ascii_case("json") || first_line.trim().is_empty() {
        after_open + first_line_end + 1
    } else {
        after_open
    };
    let body = &text[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn named_file_wins_over_other_json() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join(".mecho-restart.json"),
            r#"{"restart":true,"reason":"update"}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("other.json"), r#"{"restart":true}"#)
            .await
            .unwrap();

        let d = discover_directive(dir.path(), ".mecho-restart.json", "")
            .await
            .unwrap();
        assert_eq!(d.reason.as_deref(), Some("update"));
    }

    #[tokio::test]
    async fn falls_back_to_other_json_object() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("result.json"), r#"{"selfRestart":true}"#)
            .await
            .unwrap();

        let d = discover_directive(dir.path(), ".mecho-restart.json", "")
            .await
            .unwrap();
        assert!(d.self_restart);
    }

    #[tokio::test]
    async fn falls_back_to_reply_text_whole_json() {
        let dir = tempfile::tempdir().unwrap();
        let d = discover_directive(dir.path(), ".mecho-restart.json", r#"{"delaySec":5}"#)
            .await
            .unwrap();
        assert_eq!(d.delay_sec, Some(5));
    }

    #[tokio::test]
    async fn falls_back_to_fenced_json_block() {
        let dir = tempfile::tempdir().unwrap();
        let reply = "Applied the update.\n```json\n{\"restartRequired\": true, \"resumePrompt\": \"continue\"}\n```\n";
        let d = discover_directive(dir.path(), ".mecho-restart.json", reply)
            .await
            .unwrap();
        assert!(d.restart_required);
        assert_eq!(d.resume_prompt.as_deref(), Some("continue"));
    }

    #[tokio::test]
    async fn no_signal_anywhere_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let d = discover_directive(dir.path(), ".mecho-restart.json", "just a normal reply").await;
        assert!(d.is_none());
    }

    #[test]
    fn signal_detection_covers_every_trigger() {
        assert!(RestartDirective {
            restart: true,
            ..Default::default()
        }
        .has_restart_signal());
        assert!(RestartDirective {
            reason: Some("because".into()),
            ..Default::default()
        }
        .has_restart_signal());
        assert!(RestartDirective {
            delay_sec: Some(3),
            ..Default::default()
        }
        .has_restart_signal());
        assert!(!RestartDirective {
            delay_sec: Some(0),
            reason: Some("  ".into()),
            ..Default::default()
        }
        .has_restart_signal());
    }

    #[test]
    fn clamp_bounds_delay() {
        let d = RestartDirective {
            delay_sec: Some(9000),
            ..Default::default()
        };
        assert_eq!(d.clamped_delay(), 600);
        let d = RestartDirective {
            delay_sec: Some(-5),
            ..Default::default()
        };
        assert_eq!(d.clamped_delay(), 1);
    }
}
