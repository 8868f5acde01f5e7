//! Artifact generation listing and rollback

use super::Workspace;
use crate::output::{color_r2, color_status, print_json, print_success, print_table, OutputFormat};
use anyhow::{Context, Result};
use engine_lib::store::GenerationManifest;
use serde::Serialize;
use tabled::Tabled;

/// Row for the generations table
#[derive(Tabled)]
struct GenerationRow {
    #[tabled(rename = "Generation")]
    id: String,
    #[tabled(rename = "Created")]
    created_at: String,
    #[tabled(rename = "Origin")]
    origin: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "RMSE")]
    rmse: String,
    #[tabled(rename = "R²")]
    r2: String,
    #[tabled(rename = "Current")]
    current: String,
}

#[derive(Serialize)]
struct GenerationListing<'a> {
    current: Option<&'a str>,
    generations: &'a [GenerationManifest],
}

/// List committed generations, oldest first
pub fn list(ws: &Workspace) -> Result<()> {
    let current = ws.store.current_id().context("Failed to read CURRENT pointer")?;
    let generations = ws.store.list_generations().context("Failed to list generations")?;

    match ws.format {
        OutputFormat::Json => print_json(&GenerationListing {
            current: current.as_deref(),
            generations: &generations,
        })?,
        OutputFormat::Table => {
            let rows: Vec<GenerationRow> = generations
                .iter()
                .map(|m| GenerationRow {
                    id: m.id.clone(),
                    created_at: m.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    origin: color_status(&m.origin.to_string()),
                    parent: m.parent.clone().unwrap_or_else(|| "-".to_string()),
                    rmse: m
                        .evaluation
                        .as_ref()
                        .map(|e| format!("{:.3}", e.rmse))
                        .unwrap_or_else(|| "-".to_string()),
                    r2: m
                        .evaluation
                        .as_ref()
                        .map(|e| color_r2(e.r2))
                        .unwrap_or_else(|| "-".to_string()),
                    current: if current.as_deref() == Some(m.id.as_str()) {
                        color_status("current")
                    } else {
                        String::new()
                    },
                })
                .collect();
            print_table(rows);
        }
    }
    Ok(())
}

/// Point CURRENT back at the previous generation
pub fn rollback(ws: &Workspace) -> Result<()> {
    let previous = ws.store.current_id().context("Failed to read CURRENT pointer")?;
    let target = ws.store.rollback().context("Rollback failed")?;

    match ws.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "from": previous,
            "current": target,
        }))?,
        OutputFormat::Table => {
            print_success(&format!(
                "Rolled back from {} to {}",
                previous.as_deref().unwrap_or("-"),
                target
            ));
        }
    }
    Ok(())
}
