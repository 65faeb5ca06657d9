use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{error::RegistryError, write::atomic_write};

/// Sidecar metadata written alongside each backup file (§4.3, §6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMeta {
    pub timestamp: String,
    #[serde(rename = "sourceFile")]
    pub source_file: String,
    #[serde(rename = "backupFile")]
    pub backup_file: String,
    #[serde(rename = "clientCount")]
    pub client_count: usize,
    #[serde(rename = "contentHash")]
    pub content_hash: String,
    pub id: String,
}

/// Write a timestamped, content-hash-named backup of `content` (the current
/// `authorized_clients.json` bytes) into `backup_dir`, then rotate to keep
/// only the `keep_n` most recent backups (§4.3).
pub fn create_backup(
    backup_dir: &Path,
    source_file: &str,
    content: &[u8],
    client_count: usize,
    keep_n: usize,
) -> Result<PathBuf, RegistryError> {
    std::fs::create_dir_all(backup_dir)?;

    let full_hash = hex_encode(&Sha256::digest(content));
    let short_hash = &full_hash[..8];
    let timestamp = dashed_timestamp();
    let file_name = format!("clients_{timestamp}_{short_hash}.json");
    let backup_path = backup_dir.join(&file_name);

    atomic_write(&backup_path, content)?;

    let meta = BackupMeta {
        timestamp: timestamp.clone(),
        source_file: source_file.to_string(),
        backup_file: file_name.clone(),
        client_count,
        content_hash: full_hash,
        id: random_id(),
    };
    let meta_path = backup_dir.join(format!("clients_{timestamp}_{short_hash}.meta.json"));
    atomic_write(&meta_path, serde_json::to_string_pretty(&meta)?.as_bytes())?;

    rotate_backups(backup_dir, keep_n)?;
    Ok(backup_path)
}

/// Keep the `keep_n` most recent backups (by mtime) and delete the rest,
/// along with their `.meta.json` sidecars (§4.3, §8 scenario 6).
pub fn rotate_backups(backup_dir: &Path, keep_n: usize) -> Result<(), RegistryError> {
    let mut entries: Vec<(PathBuf, std::time::SystemTime)> = std::fs::read_dir(backup_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .is_some_and(|ext| ext == "json")
                && e.file_name().to_string_lossy().starts_with("clients_")
                && !e.file_name().to_string_lossy().ends_with(".meta.json")
        })
        .filter_map(|e| {
            let mtime = e.metadata().ok()?.modified().ok()?;
            Some((e.path(), mtime))
        })
        .collect();

    entries.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in entries.into_iter().skip(keep_n) {
        let _ = std::fs::remove_file(&path);
        let meta_path = path.with_extension("").with_extension("meta.json");
        let _ = std::fs::remove_file(&meta_path);
    }
    Ok(())
}

fn dashed_timestamp() -> String {
    // ISO-8601 with colons and dots replaced by dashes so the name is a
    // valid filename on every target filesystem.
    let now = chrono::Utc::now();
    now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        .replace(':', "-")
        .replace('.', "-")
}

fn random_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_writes_file_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_backup(dir.path(), "authorized_clients.json", b"[]", 0, 10).unwrap();
        assert!(path.exists());
        let meta_path = path.with_extension("").with_extension("meta.json");
        assert!(meta_path.exists());
    }

    #[test]
    fn rotation_keeps_n_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12 {
            let content = format!("[{i}]");
            create_backup(dir.path(), "authorized_clients.json", content.as_bytes(), i, 100)
                .unwrap();
            // Ensure distinct mtimes across iterations.
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        rotate_backups(dir.path(), 10).unwrap();

        let jsons: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.ends_with(".json") && !name.ends_with(".meta.json")
            })
            .collect();
        let metas: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".meta.json"))
            .collect();

        assert_eq!(jsons.len(), 10);
        assert_eq!(metas.len(), 10);
    }
}
