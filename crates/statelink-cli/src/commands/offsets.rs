//! Offset table command implementation.

use std::path::Path;

use anyhow::Result;
use statelink_core::{OffsetTable, OffsetTableId, save_offsets};

pub fn run(version: OffsetTableId, dump: Option<&Path>) -> Result<()> {
    let table = OffsetTable::for_version(version);

    if let Some(path) = dump {
        save_offsets(path, &table)?;
        println!("Wrote {} offsets ({}) to {}", table.len(), version, path.display());
        return Ok(());
    }

    println!("Offset table: {}", version);
    println!();
    for entry in table.entries() {
        if entry.cached_value != 0 {
            println!(
                "  {:<18} 0x{:08X}  size {}  value {}",
                entry.name, entry.offset, entry.size, entry.cached_value
            );
        } else {
            println!("  {:<18} 0x{:08X}  size {}", entry.name, entry.offset, entry.size);
        }
    }
    Ok(())
}
