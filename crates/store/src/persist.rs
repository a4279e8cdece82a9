//! Datastore persistence
//!
//! A datastore is persisted as a single XML file named `<store>_db` under
//! the configured directory, with a `<config>` root. Stores are replaced
//! atomically with the write-fsync-rename pattern:
//!
//! 1. Write to a temporary file (`.<store>_db.tmp`)
//! 2. fsync the temporary file
//! 3. Atomic rename to the final path
//! 4. fsync the parent directory
//!
//! Either the complete new file is visible or the previous one is; a
//! failure never leaves a partial update. Files are group-readable.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path as FsPath, PathBuf};

use trellis_core::{xml, Result, RpcError, Tree};

/// On-disk file mode for datastore files (owner rw, group r)
#[cfg(unix)]
const DB_FILE_MODE: u32 = 0o640;

/// Validate a datastore name for use as a file-name component
pub fn check_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(RpcError::invalid_value(format!(
            "bad datastore name: {:?}",
            name
        )))
    }
}

/// Path of the persisted file for datastore `name`
pub fn db_path(dir: &FsPath, name: &str) -> PathBuf {
    dir.join(format!("{}_db", name))
}

fn tmp_path(dir: &FsPath, name: &str) -> PathBuf {
    dir.join(format!(".{}_db.tmp", name))
}

/// Load a datastore from disk
///
/// Returns `Ok(None)` when no file exists: the store is absent, which is
/// not an error at this layer.
pub fn load(dir: &FsPath, name: &str) -> Result<Option<Tree>> {
    check_name(name)?;
    let path = db_path(dir, name);
    let text = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if text.trim().is_empty() {
        return Ok(Some(Tree::new()));
    }
    let tree = xml::parse(&text).map_err(|e| {
        RpcError::operation_failed(format!(
            "corrupt datastore file {}: {}",
            path.display(),
            e.message.unwrap_or_default()
        ))
    })?;
    Ok(Some(tree))
}

/// Store a datastore to disk atomically
pub fn store(dir: &FsPath, name: &str, tree: &Tree) -> Result<()> {
    check_name(name)?;
    fs::create_dir_all(dir)?;
    let tmp = tmp_path(dir, name);
    let final_path = db_path(dir, name);

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    file.write_all(xml::to_string_pretty(tree).as_bytes())?;
    file.sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(DB_FILE_MODE))?;
    }
    drop(file);

    fs::rename(&tmp, &final_path)?;
    let dirf = File::open(dir)?;
    dirf.sync_all()?;
    Ok(())
}

/// Remove the persisted file for `name`, silent when already absent
pub fn remove(dir: &FsPath, name: &str) -> Result<()> {
    check_name(name)?;
    match fs::remove_file(db_path(dir, name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove temporary files left behind by an interrupted store
///
/// Called once at engine start, before any datastore is loaded.
pub fn cleanup_temp_files(dir: &FsPath) -> Result<usize> {
    let mut count = 0;
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let fname = entry.file_name().to_string_lossy().to_string();
        if fname.starts_with('.') && fname.ends_with("_db.tmp") {
            fs::remove_file(entry.path())?;
            count += 1;
        }
    }
    Ok(count)
}

/// Names of every datastore with a persisted file under `dir`
pub fn list(dir: &FsPath) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let fname = entry.file_name().to_string_lossy().to_string();
        if let Some(name) = fname.strip_suffix("_db") {
            if !name.is_empty() && !fname.starts_with('.') {
                out.push(name.to_string());
            }
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::QName;

    #[test]
    fn test_load_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path(), "running").unwrap().is_none());
    }

    #[test]
    fn test_store_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = Tree::new();
        let sys = tree.add_child(tree.root(), QName::local("system"));
        let h = tree.add_child(sys, QName::local("hostname"));
        tree.set_body(h, Some("edge-1".to_string()));

        store(dir.path(), "running", &tree).unwrap();
        let loaded = load(dir.path(), "running").unwrap().unwrap();
        assert!(tree.content_eq(&loaded));

        // Serialize-after-load equals what was written.
        let on_disk = std::fs::read_to_string(db_path(dir.path(), "running")).unwrap();
        assert_eq!(on_disk, xml::to_string_pretty(&loaded));
    }

    #[test]
    fn test_store_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Tree::new();
        a.add_child(a.root(), QName::local("a"));
        store(dir.path(), "running", &a).unwrap();

        let mut b = Tree::new();
        b.add_child(b.root(), QName::local("b"));
        store(dir.path(), "running", &b).unwrap();

        let loaded = load(dir.path(), "running").unwrap().unwrap();
        assert!(b.content_eq(&loaded));
        // No temp file remains after a successful store.
        assert!(!tmp_path(dir.path(), "running").exists());
    }

    #[test]
    fn test_cleanup_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(tmp_path(dir.path(), "running"), b"junk").unwrap();
        std::fs::write(db_path(dir.path(), "startup"), b"<config/>").unwrap();
        assert_eq!(cleanup_temp_files(dir.path()).unwrap(), 1);
        assert!(db_path(dir.path(), "startup").exists());
    }

    #[test]
    fn test_list() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), "running", &Tree::new()).unwrap();
        store(dir.path(), "startup", &Tree::new()).unwrap();
        assert_eq!(list(dir.path()).unwrap(), vec!["running", "startup"]);
    }

    #[test]
    fn test_bad_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path(), "../evil", &Tree::new()).is_err());
        assert!(load(dir.path(), "", ).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode_group_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), "running", &Tree::new()).unwrap();
        let mode = std::fs::metadata(db_path(dir.path(), "running"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o640);
    }
}
