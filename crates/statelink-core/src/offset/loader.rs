use std::fs;
use std::path::Path;

use tracing::info;

use super::OffsetTable;
use crate::error::Result;

/// Load an offset table from a JSON file.
pub fn load_offsets<P: AsRef<Path>>(path: P) -> Result<OffsetTable> {
    let content = fs::read_to_string(&path)?;
    let table: OffsetTable = serde_json::from_str(&content)?;
    info!(
        "Loaded {} offsets ({}) from {}",
        table.len(),
        table.version,
        path.as_ref().display()
    );
    Ok(table)
}

pub fn save_offsets<P: AsRef<Path>>(path: P, table: &OffsetTable) -> Result<()> {
    let content = serde_json::to_string_pretty(table)?;
    fs::write(&path, content)?;
    info!("Saved offsets to {}", path.as_ref().display());
    Ok(())
}
