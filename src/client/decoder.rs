//! Interprets a reassembled payload as a zip archive of YAML metadata
//! documents and pulls `info.title` out of each entry.

use crate::error::{PushError, Result};
use serde::Deserialize;
use std::io::{Cursor, Read};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct Metadata {
    info: Info,
}

#[derive(Debug, Deserialize)]
struct Info {
    title: Option<String>,
}

/// One archive entry and what its metadata yielded
#[derive(Debug)]
pub struct EntryReport {
    pub name: String,
    pub size: u64,
    pub title: Result<String>,
}

#[derive(Debug, Default)]
pub struct DecodedArchive {
    pub entries: Vec<EntryReport>,
}

impl DecodedArchive {
    /// Titles of entries that parsed, in archive order.
    pub fn titles(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| e.title.as_deref().ok())
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|e| e.title.is_err()).count()
    }
}

/// Extract `info.title` from a YAML metadata document.
pub fn parse_title(entry: &str, data: &[u8]) -> Result<String> {
    let metadata: Metadata = serde_yaml::from_slice(data).map_err(|e| PushError::Metadata {
        entry: entry.to_string(),
        reason: e.to_string(),
    })?;
    metadata.info.title.ok_or_else(|| PushError::Metadata {
        entry: entry.to_string(),
        reason: "missing info.title".into(),
    })
}

/// Open `payload` as a zip archive and report every file entry.
///
/// Fails as a whole only when the container itself is unreadable; a bad
/// entry is recorded in its report and the rest are still processed.
pub fn decode_archive(payload: &[u8]) -> Result<DecodedArchive> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(payload)).map_err(|e| PushError::Decode(e.to_string()))?;

    let mut decoded = DecodedArchive::default();
    for index in 0..archive.len() {
        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(e) => {
                decoded.entries.push(EntryReport {
                    name: format!("#{}", index),
                    size: 0,
                    title: Err(PushError::Decode(e.to_string())),
                });
                continue;
            }
        };
        if file.is_dir() {
            continue;
        }

        let name = file.name().to_string();
        let size = file.size();
        // Declared size is untrusted; let the buffer grow with what inflates
        let mut data = Vec::new();
        let title = match file.read_to_end(&mut data) {
            Ok(_) => parse_title(&name, &data),
            Err(e) => Err(PushError::Decode(format!("{}: {}", name, e))),
        };

        decoded.entries.push(EntryReport { name, size, title });
    }

    Ok(decoded)
}

/// Log what a client received, one line per entry.
pub fn report(client_id: &str, archive: &DecodedArchive) {
    for entry in &archive.entries {
        match &entry.title {
            Ok(title) => info!(client_id, entry = %entry.name, %title, "title"),
            Err(e) => warn!(client_id, entry = %entry.name, error = %e, "failed to read metadata"),
        }
    }
}
