//! Session export: one pretty-printed JSON document per session, named after its title and date.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use crate::session::Session;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Lowercased title with each run of whitespace replaced by `-`.
pub fn slugify(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut in_space = false;
    for c in title.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('-');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        match c {
            '/' | '\\' => out.push('-'),
            _ => out.extend(c.to_lowercase()),
        }
    }
    out
}

/// `chat-<slug>-<YYYY-MM-DD>.json`.
pub fn export_file_name(title: &str, date: NaiveDate) -> String {
    format!("chat-{}-{}.json", slugify(title), date.format("%Y-%m-%d"))
}

pub fn render_export(session: &Session) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(session)?)
}

pub fn parse_export(s: &str) -> Result<Session, ExportError> {
    Ok(serde_json::from_str(s)?)
}

/// Write the artifact into `dir` (created if needed) and return its path.
pub async fn write_export(
    session: &Session,
    dir: &Path,
    date: NaiveDate,
) -> Result<PathBuf, ExportError> {
    let json = render_export(session)?;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(export_file_name(&session.title, date));
    tokio::fs::write(&path, json).await?;
    log::info!("exported session {} to {}", session.id, path.display());
    Ok(path)
}

pub async fn import_session(path: &Path) -> Result<Session, ExportError> {
    let s = tokio::fs::read_to_string(path).await?;
    parse_export(&s)
}
