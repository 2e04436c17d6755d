//! Append-only, human-readable log of answered questions.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

use crate::models::Reference;

fn format_entry(timestamp: &str, question: &str, summary: &str, references: &[Reference]) -> String {
    let sources: Vec<String> = references
        .iter()
        .map(|r| {
            let pages = if r.pages.is_empty() {
                "p.?".to_string()
            } else {
                r.pages
                    .iter()
                    .map(|p| format!("p.{}", p))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            if r.quote.trim().is_empty() {
                format!("- {} — {}", r.title, pages)
            } else {
                format!("- {} — {} — \"{}\"", r.title, pages, r.quote.trim())
            }
        })
        .collect();

    format!(
        "=====================\n{ts}\n=====================\n\n\
         Query:\n{question}\n\n\
         Answer:\n{summary}\n\n\
         Sources Used:\n{sources}\n\n\
         -------------------------------------------------------------\n\n",
        ts = timestamp,
        question = question,
        summary = summary,
        sources = sources.join("\n"),
    )
}

pub fn append(path: &Path, question: &str, summary: &str, references: &[Reference]) -> Result<()> {
    let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let entry = format_entry(&ts, question, summary, references);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open Q/A log {}", path.display()))?;
    file.write_all(entry.as_bytes())?;
    Ok(())
}
