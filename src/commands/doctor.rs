// src/commands/doctor.rs
//! Consistency report for the installed world

use super::{load_config, open_db};
use anyhow::Result;
use quarry::filesystem::path::safe_join_entry;
use quarry::installer::find_incomplete;
use std::path::{Path, PathBuf};

/// Report journals of interrupted transactions and tracked files missing
/// from the rootfs
pub fn cmd_doctor(config_path: &Path, rootfs: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path, rootfs)?;
    let db = open_db(&config)?;
    let mut problems = 0usize;

    let journal_dir = config.state_dir().join("journal");
    for tx in find_incomplete(&journal_dir)? {
        problems += 1;
        let state = if tx.failed { "failed" } else { "interrupted" };
        println!(
            "Transaction {} ({}) {}: {}",
            tx.tx_uuid.as_deref().unwrap_or("?"),
            tx.description.as_deref().unwrap_or("unknown"),
            state,
            tx.path.display()
        );
        for op in tx.pending() {
            println!("    not applied: {} {}", op.kind, op.package);
        }
    }

    for stone in db.stones()? {
        let missing: Vec<&String> = stone
            .files
            .iter()
            .filter(|file| {
                safe_join_entry(&config.system.rootfs, file)
                    .map(|p| p.symlink_metadata().is_err())
                    .unwrap_or(true)
            })
            .collect();
        if missing.is_empty() {
            continue;
        }
        problems += 1;
        println!("{}: {} file(s) missing", stone, missing.len());
        for file in missing {
            println!("    /{}", file);
        }
    }

    if problems == 0 {
        println!("No problems found");
    } else {
        println!("{} problem(s) found; re-run the interrupted commands to repair", problems);
    }
    Ok(())
}
