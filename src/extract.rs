//! Extraction driver: list, test and extract whole archives.
//!
//! Every entry name goes through a [`NameDecoder`] before it touches the
//! filesystem. Fatal problems abort the archive and come back as
//! `anyhow::Error` (typed ones as [`ExtractError`] / [`ConvertError`] inside).
//! Failing to restore a file's mode or timestamps only produces a
//! [`Warning`] in the [`Report`].

use std::fmt;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use filetime::FileTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{ByteWindow, ConvertError, ExtractError};
use crate::iconv::{ConvReader, DEFAULT_CHUNK_SIZE};
use crate::io::ReadAt;
use crate::zip::{NameDecoder, ZipArchive, ZipFileEntry};

/// Extra permission bits granted to every directory created on extraction.
const DIR_MODE_BITS: u32 = 0o770;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Charset of entry names without the UTF-8 flag
    pub charset: String,
    /// Decode file contents from this charset to UTF-8
    pub content_charset: Option<String>,
    pub dest: PathBuf,
    /// Extract into a temporary directory and move the result into `dest`
    /// only once everything succeeded
    pub staged: bool,
    /// Leave the staging directory behind on failure
    pub keep_partial: bool,
    pub chunk_size: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            charset: "gb18030".to_string(),
            content_charset: None,
            dest: PathBuf::from("."),
            staged: true,
            keep_partial: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Non-fatal problems met while restoring file metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    Permissions { path: PathBuf, message: String },
    Timestamps { path: PathBuf, message: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Permissions { path, message } => {
                write!(f, "cannot set mode of {}: {}", path.display(), message)
            }
            Warning::Timestamps { path, message } => {
                write!(f, "cannot set times of {}: {}", path.display(), message)
            }
        }
    }
}

/// Outcome of a successful extraction.
#[derive(Debug, Default)]
pub struct Report {
    /// Final locations of the files written
    pub files: Vec<PathBuf>,
    pub warnings: Vec<Warning>,
}

/// An entry together with its decoded name.
#[derive(Debug, Clone)]
pub struct NamedEntry {
    pub name: String,
    pub entry: ZipFileEntry,
}

/// Decode the names of all entries.
///
/// # Arguments
///
/// * `reader` - Random-access source holding the archive
/// * `opts` - Name charset and converter chunk size are used
///
/// # Returns
///
/// Every entry with its decoded name, in Central Directory order, or the
/// first name that fails to decode.
pub async fn list_archive<R: ReadAt>(
    reader: Arc<R>,
    opts: &ExtractOptions,
) -> Result<Vec<NamedEntry>> {
    let archive = ZipArchive::new(reader);
    let mut names = NameDecoder::with_chunk_size(&opts.charset, opts.chunk_size)?;

    archive
        .entries()
        .await?
        .into_iter()
        .map(|entry| {
            let name = decode_name(&mut names, &entry)?;
            Ok::<_, anyhow::Error>(NamedEntry { name, entry })
        })
        .collect()
}

/// Decode every name and read every file without writing anything.
///
/// CRCs are checked, and contents are decoded when `opts.content_charset`
/// is set. Returns the number of files checked.
pub async fn test_archive<R: ReadAt>(reader: Arc<R>, opts: &ExtractOptions) -> Result<usize> {
    let archive = ZipArchive::new(reader);
    let mut names = NameDecoder::with_chunk_size(&opts.charset, opts.chunk_size)?;
    let mut contents = content_converter(opts)?;

    let mut checked = 0;
    for entry in archive.entries().await? {
        let name = decode_name(&mut names, &entry)?;
        check_path(&name)?;
        if entry.is_directory() {
            continue;
        }
        let data = archive.read_data(&entry, &name).await?;
        if let Some(conv) = contents.as_mut() {
            decode_contents(conv, &name, data)?;
        }
        debug!(name = %name, "ok");
        checked += 1;
    }
    Ok(checked)
}

/// Extract the archive into `opts.dest`.
///
/// With `opts.staged` the entries are written into a temporary directory
/// inside the destination and only moved into place once all of them
/// succeeded. On failure that directory is removed, or kept when
/// `opts.keep_partial` is set.
///
/// # Arguments
///
/// * `reader` - Random-access source holding the archive
/// * `label` - Name of the archive (usually its file name), prefixes the
///   staging directory
/// * `opts` - Charsets, destination and staging behavior
///
/// # Returns
///
/// The extracted files (final paths) and any metadata warnings.
pub async fn extract_archive<R: ReadAt>(
    reader: Arc<R>,
    label: &str,
    opts: &ExtractOptions,
) -> Result<Report> {
    // Resolve charsets and read the directory before touching the disk
    let archive = ZipArchive::new(reader);
    let mut names = NameDecoder::with_chunk_size(&opts.charset, opts.chunk_size)?;
    let mut contents = content_converter(opts)?;
    let entries = archive.entries().await?;

    fs::create_dir_all(&opts.dest)
        .await
        .with_context(|| format!("Cannot create {}", opts.dest.display()))?;

    info!(archive = label, entries = entries.len(), staged = opts.staged, "extracting");

    // Direct mode: write straight into the destination
    if !opts.staged {
        let mut report = Report::default();
        write_entries(
            &archive,
            &entries,
            &opts.dest,
            false,
            &mut names,
            &mut contents,
            &mut report,
        )
        .await?;
        return Ok(report);
    }

    let stage = tempfile::Builder::new()
        .prefix(&format!("{label}."))
        .tempdir_in(&opts.dest)
        .with_context(|| format!("Cannot create staging directory in {}", opts.dest.display()))?;
    debug!(path = %stage.path().display(), "staging");

    // Staged mode: everything lands in the staging directory first, then the
    // top-level names are promoted in one pass
    let mut report = Report::default();
    let result = async {
        write_entries(
            &archive,
            &entries,
            stage.path(),
            true,
            &mut names,
            &mut contents,
            &mut report,
        )
        .await?;
        promote(stage.path(), &opts.dest).await
    }
    .await;

    if let Err(err) = result {
        if opts.keep_partial {
            let kept = stage.keep();
            warn!(path = %kept.display(), "keeping partial output");
        }
        return Err(err);
    }

    // Report final locations rather than staging paths
    for file in &mut report.files {
        if let Ok(rest) = file.strip_prefix(stage.path()) {
            *file = opts.dest.join(rest);
        }
    }
    Ok(report)
}

/// Write `entries` below `root`, in archive order.
///
/// # Arguments
///
/// * `archive` - Archive the entry data is read from
/// * `entries` - Central Directory entries to write
/// * `root` - Directory the decoded names are resolved against
/// * `staged` - Whether `root` is a fresh staging directory; existing files
///   are only a conflict when it is not
/// * `names` - Decoder for entry names, reset per entry
/// * `contents` - Content converter, if contents are decoded
/// * `report` - Collects written files and metadata warnings
async fn write_entries<R: ReadAt>(
    archive: &ZipArchive<R>,
    entries: &[ZipFileEntry],
    root: &Path,
    staged: bool,
    names: &mut NameDecoder,
    contents: &mut Option<ConvReader<Cursor<Vec<u8>>>>,
    report: &mut Report,
) -> Result<()> {
    for entry in entries {
        let name = decode_name(names, entry)?;
        let relative = check_path(&name)?;
        let path = root.join(&relative);
        let dir_mode = entry.mode() | DIR_MODE_BITS;

        // Directory entries only need creating
        if entry.is_directory() {
            debug!(name = %name, "mkdir");
            create_dir(&path, dir_mode).await?;
            continue;
        }
        if let Some(parent) = path.parent() {
            create_dir(parent, dir_mode).await?;
        }

        // Read, verify and optionally decode the payload
        info!(name = %name, "extracting file");
        let mut data = archive.read_data(entry, &name).await?;
        if let Some(conv) = contents.as_mut() {
            data = decode_contents(conv, &name, data)?;
        }
        // a staging directory starts out empty, so only direct writes can
        // collide with existing files
        write_file(&path, &name, &data, staged).await?;

        restore_metadata(&path, entry, report).await;
        report.files.push(path);
    }
    Ok(())
}

fn decode_name(names: &mut NameDecoder, entry: &ZipFileEntry) -> Result<String> {
    names.decode(entry).map_err(|source| {
        anyhow::Error::from(ExtractError::Name {
            raw: ByteWindow::new(&entry.raw_name),
            source,
        })
    })
}

/// Relative path for a decoded name, refusing anything that could land
/// outside the extraction root.
fn check_path(name: &str) -> Result<PathBuf, ExtractError> {
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractError::UnsafePath(name.to_string()));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(ExtractError::UnsafePath(name.to_string()));
    }
    Ok(out)
}

fn content_converter(opts: &ExtractOptions) -> Result<Option<ConvReader<Cursor<Vec<u8>>>>> {
    if opts.chunk_size == 0 {
        return Err(ConvertError::InvalidChunkSize.into());
    }
    let Some(charset) = &opts.content_charset else {
        return Ok(None);
    };
    let conv =
        ConvReader::with_chunk_size(Cursor::new(Vec::new()), charset, "utf-8", opts.chunk_size)?;
    Ok(Some(conv))
}

fn decode_contents(
    conv: &mut ConvReader<Cursor<Vec<u8>>>,
    name: &str,
    data: Vec<u8>,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    conv.reset(Cursor::new(data));
    conv.read_all_into(&mut out).map_err(|source| ExtractError::Content {
        name: name.to_string(),
        source,
    })?;
    Ok(out)
}

async fn create_dir(path: &Path, mode: u32) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;
    builder
        .create(path)
        .await
        .with_context(|| format!("Cannot create directory {}", path.display()))
}

async fn write_file(path: &Path, name: &str, data: &[u8], overwrite: bool) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    let mut file = match options.open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(ExtractError::Conflict(name.to_string()).into());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Cannot create {}", path.display()));
        }
    };
    file.write_all(data)
        .await
        .with_context(|| format!("Cannot write {}", path.display()))?;
    file.flush().await?;
    Ok(())
}

/// Best-effort chmod and utimes.
async fn restore_metadata(path: &Path, entry: &ZipFileEntry, report: &mut Report) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let perms = std::fs::Permissions::from_mode(entry.mode());
        if let Err(err) = fs::set_permissions(path, perms).await {
            warn!(
                path = %path.display(),
                mode = %format!("{:o}", entry.mode()),
                error = %err,
                "cannot set mode"
            );
            report.warnings.push(Warning::Permissions {
                path: path.to_path_buf(),
                message: err.to_string(),
            });
        }
    }

    let Some(modified) = entry.modified() else {
        debug!(path = %path.display(), "entry has no usable timestamp");
        return;
    };
    let time = FileTime::from_unix_time(modified.timestamp(), modified.timestamp_subsec_nanos());
    if let Err(err) = filetime::set_file_times(path, time, time) {
        warn!(path = %path.display(), %modified, error = %err, "cannot set times");
        report.warnings.push(Warning::Timestamps {
            path: path.to_path_buf(),
            message: err.to_string(),
        });
    }
}

/// Move every top-level name from `stage` into `dest`.
///
/// # Arguments
///
/// * `stage` - Staging directory holding the extracted tree
/// * `dest` - Final destination directory
///
/// # Returns
///
/// [`ExtractError::Conflict`] for the first name that already exists in
/// `dest`. All names are checked before anything is moved, so a conflict
/// leaves `dest` untouched.
async fn promote(stage: &Path, dest: &Path) -> Result<()> {
    // Collect top-level names in a stable order
    let mut names = Vec::new();
    let mut dir = fs::read_dir(stage).await?;
    while let Some(entry) = dir.next_entry().await? {
        names.push(entry.file_name());
    }
    names.sort();

    // Check every name first; a dangling symlink counts as existing
    for name in &names {
        if fs::symlink_metadata(dest.join(name)).await.is_ok() {
            return Err(ExtractError::Conflict(name.to_string_lossy().into_owned()).into());
        }
    }
    // Nothing conflicts, move them in
    for name in &names {
        let target = dest.join(name);
        fs::rename(stage.join(name), &target)
            .await
            .with_context(|| format!("Cannot move {} into place", target.display()))?;
    }
    debug!(count = names.len(), dest = %dest.display(), "promoted");
    Ok(())
}
