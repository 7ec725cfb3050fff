// src/config.rs

//! Configuration and work-queue loading utilities.

use std::path::Path;

use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::Config;

/// Load and validate configuration from a TOML file.
///
/// Unlike `Config::load_or_default`, a missing or invalid file is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(path)
        .map_err(|e| AppError::config(format!("Failed to load {}: {}", path.display(), e)))?;
    config.validate()?;
    log::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Load the id work queue.
///
/// Accepts a JSON array of strings or numbers, or plain text with one id
/// per line. Blank entries are dropped; order is preserved.
pub fn load_ids(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let ids = parse_ids(&content).map_err(|e| AppError::corrupt(path, e))?;
    log::info!("Loaded {} ids from {}", ids.len(), path.display());
    Ok(ids)
}

fn parse_ids(content: &str) -> std::result::Result<Vec<String>, String> {
    let trimmed = content.trim_start();
    if !trimmed.starts_with('[') {
        return Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect());
    }

    let values: Vec<Value> = serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
    let mut ids = Vec::with_capacity(values.len());
    for value in values {
        let id = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            other => return Err(format!("unsupported id entry: {other}")),
        };
        if !id.is_empty() {
            ids.push(id);
        }
    }
    Ok(ids)
}
