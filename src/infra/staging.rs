// ============================================================
// Layer 6 — Staged Directory Writes
// ============================================================
// Artefact directories (adapters, merged models) are written in
// full to a sibling staging directory and only then renamed into
// place, so a reader never sees a half-written directory and a
// failed write leaves the previous contents intact.
//
//   parent/
//     .adapter.staging-XXXX   ← written here first
//     adapter                 ← renamed to .adapter.old-XXXX
//     adapter                 ← staging renamed into place
//
// Reference: tempfile::Builder::tempdir_in

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Write a directory at `dest` via `fill(staging_dir)` and swap it in.
///
/// `dest` is replaced only if `fill` succeeds.
pub fn replace_dir<F>(dest: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let parent = parent_of(dest);
    fs::create_dir_all(&parent)
        .with_context(|| format!("Cannot create '{}'", parent.display()))?;

    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artefact".to_string());

    // Dropped (and deleted) on any early return below
    let staging = tempfile::Builder::new()
        .prefix(&format!(".{name}.staging-"))
        .tempdir_in(&parent)
        .with_context(|| format!("Cannot create staging directory in '{}'", parent.display()))?;

    fill(staging.path())?;

    let staged = staging.keep();
    if dest.exists() {
        let old = tempfile::Builder::new()
            .prefix(&format!(".{name}.old-"))
            .tempdir_in(&parent)?
            .keep();
        // rename() onto an existing dir needs it gone; park it inside `old`
        let parked = old.join(&name);
        fs::rename(dest, &parked)
            .with_context(|| format!("Cannot move aside '{}'", dest.display()))?;
        if let Err(e) = fs::rename(&staged, dest) {
            // Put the previous contents back before reporting
            let _ = fs::rename(&parked, dest);
            let _ = fs::remove_dir_all(&staged);
            let _ = fs::remove_dir_all(&old);
            return Err(e).with_context(|| format!("Cannot move new contents into '{}'", dest.display()));
        }
        fs::remove_dir_all(&old)
            .with_context(|| format!("Cannot remove previous '{}'", old.display()))?;
    } else {
        fs::rename(&staged, dest)
            .with_context(|| format!("Cannot move new contents into '{}'", dest.display()))?;
    }

    tracing::debug!("Replaced '{}'", dest.display());
    Ok(())
}

fn parent_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_then_replaces() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("artefact");

        replace_dir(&dest, |d| Ok(fs::write(d.join("a.txt"), "one")?)).unwrap();
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "one");

        replace_dir(&dest, |d| Ok(fs::write(d.join("b.txt"), "two")?)).unwrap();
        assert!(!dest.join("a.txt").exists());
        assert_eq!(fs::read_to_string(dest.join("b.txt")).unwrap(), "two");

        // Only the artefact itself remains next to it
        let entries: Vec<_> = fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_failed_fill_keeps_previous_contents() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("artefact");
        replace_dir(&dest, |d| Ok(fs::write(d.join("a.txt"), "one")?)).unwrap();

        let result = replace_dir(&dest, |_| anyhow::bail!("disk full"));
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "one");
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }
}
