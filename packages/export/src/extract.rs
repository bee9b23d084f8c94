//! Export archive extraction.
//!
//! An export archive is a zip with a single top-level folder named after
//! the project (all digits). Under it sit gzipped hourly JSON files such as
//! `187/187_2024-11-01_5#0.json.gz`. Extraction gunzips each of those and
//! drops the `.gz` suffix; everything else in the zip is ignored.

use std::io::{Cursor, Read, Seek};
use std::path::Path;

use flate2::read::MultiGzDecoder;

/// Errors from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Archive file not found.
    #[error("Archive not found: {0}")]
    ArchiveNotFound(String),

    /// The zip has no top-level folder with a numeric name.
    #[error("No numeric day folder found in {0}")]
    NoDayFolder(String),

    /// The zip container could not be read.
    #[error("Invalid zip archive {path}: {source}")]
    Zip {
        /// Archive that failed.
        path: String,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },

    /// I/O error while decompressing or writing.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// One decompressed file from an export archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Basename with the `.gz` suffix removed, e.g. `187_2024-11-01_5#0.json`.
    pub name: String,
    /// Decompressed bytes.
    pub contents: Vec<u8>,
}

/// Decompresses every `.gz` file under the archive's numeric folder.
///
/// Results are sorted by name.
///
/// # Errors
///
/// Returns [`ExtractError::ArchiveNotFound`] if `archive_path` doesn't
/// exist, [`ExtractError::NoDayFolder`] if the zip lacks a numeric top-level
/// folder, and [`ExtractError::Zip`] / [`ExtractError::Io`] on corrupt input.
pub fn extract(archive_path: &Path) -> Result<Vec<ExtractedFile>, ExtractError> {
    let (file, label) = open_archive(archive_path)?;
    extract_from_reader(file, &label)
}

/// Same as [`extract`] for an archive already held in memory.
///
/// # Errors
///
/// See [`extract`].
pub fn extract_bytes(bytes: &[u8]) -> Result<Vec<ExtractedFile>, ExtractError> {
    extract_from_reader(Cursor::new(bytes), "<in-memory archive>")
}

/// Extracts the archive into `out_dir` (created if absent) and returns the
/// number of files written. Existing files with the same name are
/// overwritten.
///
/// Each entry is streamed from the zip through the gzip decoder straight
/// into its output file, so memory use stays flat regardless of archive
/// size. Use [`extract`] when the contents are wanted in memory.
///
/// # Errors
///
/// See [`extract`]; also returns [`ExtractError::Io`] if a file can't be
/// written.
pub fn extract_to_dir(archive_path: &Path, out_dir: &Path) -> Result<u64, ExtractError> {
    let (file, label) = open_archive(archive_path)?;

    std::fs::create_dir_all(out_dir).map_err(|e| ExtractError::Io {
        path: out_dir.display().to_string(),
        source: e,
    })?;

    let count = visit_entries(file, &label, |name, decoder| {
        let path = out_dir.join(name);
        let io_err = |e: std::io::Error| ExtractError::Io {
            path: path.display().to_string(),
            source: e,
        };
        let mut out = std::fs::File::create(&path).map_err(io_err)?;
        std::io::copy(decoder, &mut out).map_err(io_err)?;
        Ok(())
    })?;

    log::info!("Extracted {count} JSON files to {}", out_dir.display());
    Ok(count)
}

fn open_archive(archive_path: &Path) -> Result<(std::fs::File, String), ExtractError> {
    if !archive_path.exists() {
        return Err(ExtractError::ArchiveNotFound(
            archive_path.display().to_string(),
        ));
    }

    let label = archive_path.display().to_string();
    let file = std::fs::File::open(archive_path).map_err(|e| ExtractError::Io {
        path: label.clone(),
        source: e,
    })?;
    Ok((file, label))
}

fn extract_from_reader<R: Read + Seek>(
    reader: R,
    label: &str,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    let mut files = Vec::new();

    visit_entries(reader, label, |name, decoder| {
        let mut contents = Vec::new();
        decoder
            .read_to_end(&mut contents)
            .map_err(|e| ExtractError::Io {
                path: format!("{label}!{name}"),
                source: e,
            })?;
        files.push(ExtractedFile {
            name: name.to_string(),
            contents,
        });
        Ok(())
    })?;

    files.sort_by(|a, b| a.name.cmp(&b.name));
    log::info!("{label}: decompressed {} files", files.len());

    Ok(files)
}

/// Hands every `.gz` entry under the day folder to `visit` as a gunzipping
/// reader, along with its output name. Returns how many entries were
/// visited.
fn visit_entries<R, F>(reader: R, label: &str, mut visit: F) -> Result<u64, ExtractError>
where
    R: Read + Seek,
    F: FnMut(&str, &mut dyn Read) -> Result<(), ExtractError>,
{
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| ExtractError::Zip {
        path: label.to_string(),
        source: e,
    })?;

    let day = find_day_folder(archive.file_names())
        .ok_or_else(|| ExtractError::NoDayFolder(label.to_string()))?;
    let prefix = format!("{day}/");
    log::debug!("{label}: using day folder {day}");

    let mut count = 0u64;

    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| ExtractError::Zip {
            path: label.to_string(),
            source: e,
        })?;

        if entry.is_dir() || !entry.name().starts_with(&prefix) {
            continue;
        }
        let Some(json_name) = entry
            .name()
            .rsplit('/')
            .next()
            .and_then(|base| base.strip_suffix(".gz"))
            .filter(|n| !n.is_empty())
            .map(str::to_string)
        else {
            continue;
        };

        visit(&json_name, &mut MultiGzDecoder::new(entry))?;
        count += 1;
    }

    Ok(count)
}

/// Picks the numeric top-level folder. Only components followed by `/` count
/// as folders; when several qualify the smallest name wins.
fn find_day_folder<'a>(names: impl Iterator<Item = &'a str>) -> Option<String> {
    names
        .filter_map(|name| name.split_once('/').map(|(top, _)| top))
        .filter(|top| !top.is_empty() && top.bytes().all(|b| b.is_ascii_digit()))
        .min()
        .map(str::to_string)
}
