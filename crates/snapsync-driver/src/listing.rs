//! Parsing of `btrfs subvolume list` output

use crate::naming::SnapshotNamer;
use snapsync_types::{CommandFailure, Inventory, InventoryEntry};
use std::path::Path;

/// One line of `btrfs subvolume list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubvolumeEntry {
    /// Subvolume id
    pub id: u64,
    /// Generation counter
    pub generation: u64,
    /// Id of the parent tree
    pub top_level: u64,
    /// Path relative to the filesystem's top-level subvolume
    pub path: String,
}

impl SubvolumeEntry {
    fn parse(line: &str) -> Result<Self, String> {
        let (header, path) = line
            .split_once(" path ")
            .ok_or_else(|| format!("missing path field in '{}'", line))?;

        let mut id = None;
        let mut generation = None;
        let mut top_level = None;

        let mut tokens = header.split_whitespace();
        while let Some(key) = tokens.next() {
            let key = if key == "top" {
                match tokens.next() {
                    Some("level") => "top level",
                    _ => return Err(format!("expected 'top level' in '{}'", line)),
                }
            } else {
                key
            };

            let value = tokens
                .next()
                .ok_or_else(|| format!("missing value for '{}' in '{}'", key, line))?;
            let parsed = value
                .parse::<u64>()
                .map_err(|_| format!("invalid value '{}' for '{}' in '{}'", value, key, line));

            match key {
                "ID" => id = Some(parsed?),
                "gen" => generation = Some(parsed?),
                "top level" => top_level = Some(parsed?),
                // Extra columns such as `cgen` or `parent` from other flags
                _ => {}
            }
        }

        match (id, generation, top_level) {
            (Some(id), Some(generation), Some(top_level)) if !path.is_empty() => Ok(Self {
                id,
                generation,
                top_level,
                path: path.to_string(),
            }),
            _ => Err(format!("incomplete subvolume line '{}'", line)),
        }
    }
}

/// Parse the full output of `btrfs subvolume list`
///
/// Blank lines are ignored; any other line that does not parse fails the
/// whole listing.
pub fn parse_subvolume_list(output: &str) -> Result<Vec<SubvolumeEntry>, CommandFailure> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| SubvolumeEntry::parse(line).map_err(|message| CommandFailure::Malformed { message }))
        .collect()
}

/// Subvolume id reported by `btrfs subvolume show`
pub fn parse_subvolume_id(output: &str) -> Result<u64, CommandFailure> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Subvolume ID:"))
        .ok_or_else(|| CommandFailure::Malformed {
            message: "no 'Subvolume ID' in subvolume details".to_string(),
        })?
        .trim()
        .parse::<u64>()
        .map_err(|e| CommandFailure::Malformed {
            message: format!("invalid subvolume id: {}", e),
        })
}

/// Keep the entries whose parent subvolume is `container_id`
///
/// Listed paths are relative to the filesystem's top level and may belong to
/// any subvolume on it, so membership is decided by the parent id rather
/// than by path.
pub fn build_inventory(
    entries: &[SubvolumeEntry],
    container_id: u64,
    namer: &SnapshotNamer,
) -> Inventory {
    entries
        .iter()
        .filter(|entry| entry.top_level == container_id)
        .filter_map(|entry| {
            let name = Path::new(&entry.path).file_name()?.to_string_lossy().into_owned();
            let managed = namer.is_managed(&name);
            Some(InventoryEntry { name, managed })
        })
        .collect()
}
