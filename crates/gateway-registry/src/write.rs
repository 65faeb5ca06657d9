use std::{fs::File, io::Write as _, path::Path};

/// Atomically replace `path`'s contents with `bytes` (C10, §4.2, §8 "Atomic
/// writes"): serialize into a temp file in the same directory, `fsync` it,
/// rename over the target, then `fsync` the directory so the rename itself
/// is durable. If the process dies anywhere before the rename, the target
/// file is left untouched — there is no window where it contains partial
/// data.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    tmp.persist(path).map_err(|e| e.error)?;

    fsync_dir(dir)?;
    Ok(())
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    let f = File::open(dir)?;
    f.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> std::io::Result<()> {
    // Directory fsync has no equivalent on non-Unix targets; the rename
    // itself is still atomic at the filesystem level.
    Ok(())
}

/// Read `path` if present, otherwise `None` — never errors on missing file.
pub fn read_if_exists(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.json");
        atomic_write(&path, b"[1,2,3]").unwrap();
        let back = read_if_exists(&path).unwrap().unwrap();
        assert_eq!(back, b"[1,2,3]");
    }

    #[test]
    fn atomic_write_overwrites_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.json");
        atomic_write(&path, b"old").unwrap();
        atomic_write(&path, b"new").unwrap();
        assert_eq!(read_if_exists(&path).unwrap().unwrap(), b"new");
    }

    #[test]
    fn read_if_exists_returns_none_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(read_if_exists(&path).unwrap().is_none());
    }
}
