use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A file staged next to its target and swapped into place with one rename.
///
/// Dropping a `StagedFile` without calling [`StagedFile::commit`] deletes the
/// temporary file; the target is never observed half-written.
pub struct StagedFile {
    target: PathBuf,
    temp: NamedTempFile,
}

impl StagedFile {
    pub fn create(target: &Path) -> Result<Self> {
        let dir = parent_dir(target);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let temp = tempfile::Builder::new()
            .prefix(".staged-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .with_context(|| format!("failed to stage a file in {}", dir.display()))?;

        Ok(Self {
            target: target.to_path_buf(),
            temp,
        })
    }

    pub fn commit(self) -> Result<PathBuf> {
        let StagedFile { target, mut temp } = self;

        temp.as_file_mut()
            .flush()
            .and_then(|_| temp.as_file().sync_all())
            .with_context(|| format!("failed to flush staged file for {}", target.display()))?;
        match_permissions(&temp, &target)
            .with_context(|| format!("failed to set permissions for {}", target.display()))?;

        temp.persist(&target)
            .map_err(|e| e.error)
            .with_context(|| format!("failed to replace {}", target.display()))?;

        sync_dir(&parent_dir(&target));
        debug!("Committed {}", target.display());
        Ok(target)
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

/// Replace `path` with a CSV made of `header` and `rows`.
/// The header is written even when there are no rows.
pub fn write_csv<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
    let mut staged = StagedFile::create(path)?;
    {
        let mut writer = csv_writer(&mut staged);
        writer.write_record(header)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    staged.commit()?;
    Ok(())
}

/// Append `rows` to the CSV at `path` by staging existing content plus the new
/// rows and swapping the result in. Returns the number of rows appended.
///
/// With no rows the target is left untouched (and is not created).
pub fn append_csv<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }

    let existing = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };

    let mut staged = StagedFile::create(path)?;
    if !existing.is_empty() {
        check_header(path, &existing, header);
        staged.write_all(&existing)?;
        if !existing.ends_with(b"\n") {
            warn!("{} did not end with a newline; repairing", path.display());
            staged.write_all(b"\n")?;
        }
    }
    {
        let mut writer = csv_writer(&mut staged);
        if existing.is_empty() {
            writer.write_record(header)?;
        }
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    staged.commit()?;
    Ok(rows.len())
}

fn csv_writer<W: Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(inner)
}

fn check_header(path: &Path, existing: &[u8], header: &[&str]) {
    let first_line = existing
        .split(|b| *b == b'\n')
        .next()
        .map(|line| String::from_utf8_lossy(line).trim_end().to_string())
        .unwrap_or_default();
    let expected = header.join(",");
    if first_line != expected {
        warn!(
            "{} header is '{}', expected '{}'; appending by column position",
            path.display(),
            first_line,
            expected
        );
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Staged files start out owner-only; give them the target's mode, or 0644
/// for a new file, so a rename does not tighten access to the dataset.
#[cfg(unix)]
fn match_permissions(temp: &NamedTempFile, target: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = match fs::metadata(target) {
        Ok(meta) => meta.permissions(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::Permissions::from_mode(0o644),
        Err(e) => return Err(e),
    };
    temp.as_file().set_permissions(permissions)
}

#[cfg(not(unix))]
fn match_permissions(_temp: &NamedTempFile, _target: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir) {
        if let Err(e) = handle.sync_all() {
            debug!("Could not sync directory {}: {e}", dir.display());
        }
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
