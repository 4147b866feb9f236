//! Recovery of the diagnostic report buried in a vendor bug-report bundle.
//!
//! A bundle is a zip whose entries may include another `bugreport*.zip`,
//! which may in turn hold another, until a level finally contains the
//! `bugreport*.txt` report. [`extract`] walks the levels with a bounded loop,
//! unpacking each one into its own subdirectory of a scratch directory that
//! is removed on every exit path, then copies the report into an output
//! subdirectory named after the bundle's content digest. Bundles whose
//! reports share a file name (different phones captured in the same
//! second) therefore never overwrite each other.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use bugreport_battery_core::{ARCHIVE_EXTENSION, REPORT_EXTENSION, VENDOR_PREFIX};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

/// Deepest nesting level followed before giving up.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Hex digits of the bundle digest used to name its output subdirectory.
const DIGEST_DIR_LEN: usize = 16;

/// Errors from [`extract`].
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The path is not a regular `bugreport*.zip` file. Nothing was unpacked.
    #[error("invalid input {}: {reason}", path.display())]
    InvalidInput { path: PathBuf, reason: String },

    /// The archive (or a nested one) is not a readable zip container.
    #[error("bad archive {}: {source}", path.display())]
    BadArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// No nested bundle and no report were found.
    #[error("extraction failed for {}: {reason}", path.display())]
    ExtractionFailed { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// A recovered report and the bundle it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedReport {
    pub report_path: PathBuf,
    pub archive_path: PathBuf,
}

/// Returns `true` when `file_name` looks like `bugreport*.<extension>`.
pub fn is_vendor_file_name(file_name: &str, extension: &str) -> bool {
    let path = Path::new(file_name);
    let stem_ok = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.starts_with(VENDOR_PREFIX));
    let ext_ok = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
    stem_ok && ext_ok
}

/// Recovers the innermost report of `archive` into
/// `output_dir/<digest prefix>/<report name>`.
///
/// Scratch files live in a fresh directory under `temp_root`, so concurrent
/// calls for different bundles never share paths. The report is staged in
/// its output subdirectory and renamed into place; extracting the same
/// bundle again replaces it.
///
/// # Errors
///
/// - [`ArchiveError::InvalidInput`] if `archive` is not a regular
///   `bugreport*.zip` file.
/// - [`ArchiveError::BadArchive`] if any level cannot be opened as a zip.
/// - [`ArchiveError::ExtractionFailed`] if a level holds neither a nested
///   bundle nor a report, or nesting exceeds [`MAX_NESTING_DEPTH`].
pub fn extract(archive: &Path, output_dir: &Path, temp_root: &Path) -> Result<ExtractedReport> {
    check_input(archive)?;

    fs::create_dir_all(temp_root)?;
    let scratch = tempfile::Builder::new()
        .prefix("extract-")
        .tempdir_in(temp_root)?;

    let mut current = archive.to_path_buf();
    for depth in 0..=MAX_NESTING_DEPTH {
        let mut zip = open_zip(&current)?;
        let level_dir = scratch.path().join(format!("level-{depth}"));

        if let Some(name) = find_entry(&zip, ARCHIVE_EXTENSION) {
            debug!(archive = %archive.display(), depth, entry = %name, "Found nested bundle");
            current = unpack_entry(&mut zip, &name, &level_dir, &current)?;
            continue;
        }

        let Some(name) = find_entry(&zip, REPORT_EXTENSION) else {
            return Err(ArchiveError::ExtractionFailed {
                path: archive.to_path_buf(),
                reason: format!(
                    "no {VENDOR_PREFIX}*.{ARCHIVE_EXTENSION} or {VENDOR_PREFIX}*.{REPORT_EXTENSION} \
                     entry at depth {depth}"
                ),
            });
        };

        let unpacked = unpack_entry(&mut zip, &name, &level_dir, &current)?;
        let digest = content_digest(archive)?;
        let report_dir = output_dir.join(&digest[..DIGEST_DIR_LEN]);
        fs::create_dir_all(&report_dir)?;
        let report_path = report_dir.join(entry_file_name(&name));

        let mut staged = NamedTempFile::new_in(&report_dir)?;
        io::copy(&mut File::open(&unpacked)?, staged.as_file_mut())?;
        staged.persist(&report_path).map_err(|e| e.error)?;

        debug!(
            archive = %archive.display(),
            depth,
            report = %report_path.display(),
            "Recovered report"
        );
        return Ok(ExtractedReport {
            report_path,
            archive_path: archive.to_path_buf(),
        });
    }

    Err(ArchiveError::ExtractionFailed {
        path: archive.to_path_buf(),
        reason: format!("bundles nested deeper than {MAX_NESTING_DEPTH} levels"),
    })
}

/// SHA-256 of a file's content, hex encoded.
pub fn content_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn check_input(archive: &Path) -> Result<()> {
    let invalid = |reason: &str| ArchiveError::InvalidInput {
        path: archive.to_path_buf(),
        reason: reason.to_string(),
    };

    let file_name = archive
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| invalid("path has no file name"))?;
    if !is_vendor_file_name(file_name, ARCHIVE_EXTENSION) {
        return Err(invalid(&format!(
            "expected a {VENDOR_PREFIX}*.{ARCHIVE_EXTENSION} file name"
        )));
    }

    match fs::metadata(archive) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(invalid("not a regular file")),
        Err(e) => Err(invalid(&e.to_string())),
    }
}

fn open_zip(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(|source| ArchiveError::BadArchive {
        path: path.to_path_buf(),
        source,
    })
}

/// First file entry whose base name matches the vendor pattern.
fn find_entry(zip: &ZipArchive<File>, extension: &str) -> Option<String> {
    zip.file_names()
        .filter(|name| !name.ends_with('/'))
        .find(|name| is_vendor_file_name(&entry_file_name(name), extension))
        .map(str::to_string)
}

/// Base name of an entry, with separators and parent references removed.
fn entry_file_name(entry: &str) -> String {
    entry
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(entry)
        .replace("..", "_")
}

fn unpack_entry(
    zip: &mut ZipArchive<File>,
    name: &str,
    dest_dir: &Path,
    container: &Path,
) -> Result<PathBuf> {
    let mut entry = zip.by_name(name).map_err(|source| ArchiveError::BadArchive {
        path: container.to_path_buf(),
        source,
    })?;

    fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(entry_file_name(name));
    let mut out = File::create(&dest)?;
    io::copy(&mut entry, &mut out)?;
    Ok(dest)
}
