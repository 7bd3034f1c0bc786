use std::io::Write;
use std::path::{Path, PathBuf};

use models::{eyre, Error, ErrorKind, ResultExt};

/// Hidden sibling used while `path` is being written.
pub fn to_tmp_path(path: impl AsRef<Path>) -> Result<PathBuf, Error> {
    let path = path.as_ref();
    if let (Some(parent), Some(file_name)) =
        (path.parent(), path.file_name().and_then(|f| f.to_str()))
    {
        Ok(parent.join(format!(".{}.tmp", file_name)))
    } else {
        Err(Error::new(
            eyre!("invalid path: {}", path.display()),
            ErrorKind::Filesystem,
        ))
    }
}

/// Writes `contents` next to `path` and renames it into place, so readers
/// never observe a half-written file.
pub fn write_atomic(path: impl AsRef<Path>, contents: &str) -> Result<(), Error> {
    let path = path.as_ref();
    let tmp = to_tmp_path(path)?;
    if let Some(parent) = tmp.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_ctx(|_| (ErrorKind::Filesystem, parent.display().to_string()))?;
    }
    let mut file = std::fs::File::create(&tmp)
        .with_ctx(|_| (ErrorKind::Filesystem, tmp.display().to_string()))?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path).with_ctx(|_| {
        (
            ErrorKind::Filesystem,
            format!("{} -> {}", tmp.display(), path.display()),
        )
    })?;
    tracing::debug!("wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmp_path_is_hidden_sibling() {
        assert_eq!(
            to_tmp_path("out/node_snapshot.cc").unwrap(),
            PathBuf::from("out/.node_snapshot.cc.tmp")
        );
        assert_eq!(to_tmp_path("/").unwrap_err().kind, ErrorKind::Filesystem);
    }

    #[test]
    fn write_replaces_target() {
        let dir = std::env::temp_dir().join(format!("snapshot-creator-output-{}", std::process::id()));
        let path = dir.join("gen").join("snapshot.cc");
        write_atomic(&path, "first").unwrap();
        write_atomic(&path, "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!to_tmp_path(&path).unwrap().exists());
    }
}
