use anyhow::{anyhow, Context, Result};
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Writes `content` beside `target` and renames it into place, so readers see
/// either the previous file or the complete new one.
pub async fn write_atomic(target: &Path, content: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = target
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("Invalid file name in path: {}", target.display()))?;

    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("Failed to create directory {}", parent.display()))?;

    let tmp_path = parent.join(format!(
        ".{}.tmp.{}",
        file_name,
        uuid::Uuid::new_v4().simple()
    ));

    let written: std::io::Result<()> = async {
        let mut tmp_file = tokio::fs::File::create(&tmp_path).await?;
        tmp_file.write_all(content).await?;
        tmp_file.sync_all().await?;
        tokio::fs::rename(&tmp_path, target).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e).with_context(|| format!("Failed to write {}", target.display()));
    }
    Ok(())
}

/// Returns whether a file was actually removed.
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Inserts `fragment` right after the opening `<body ...>` tag, or prepends it.
pub fn insert_after_body_open(html: &str, fragment: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let insert_at = lower
        .find("<body")
        .and_then(|start| lower[start..].find('>').map(|end| start + end + 1))
        .unwrap_or(0);

    let mut out = String::with_capacity(html.len() + fragment.len());
    out.push_str(&html[..insert_at]);
    out.push_str(fragment);
    out.push_str(&html[insert_at..]);
    out
}

/// Inserts `fragment` before `</head>`, or prepends it.
pub fn insert_before_head_close(html: &str, fragment: &str) -> String {
    let insert_at = html.to_ascii_lowercase().find("</head>").unwrap_or(0);

    let mut out = String::with_capacity(html.len() + fragment.len());
    out.push_str(&html[..insert_at]);
    out.push_str(fragment);
    out.push_str(&html[insert_at..]);
    out
}
