//! Archive snapshots: JSON arrays, optionally gzip-compressed.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sightline_core::{TraceEvent, TraceSession};

use crate::errors::Result;

/// One archived trace with its events.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ArchivedTrace {
    /// Session as stored.
    pub trace: TraceSession,
    /// Events in sequence order.
    pub events: Vec<TraceEvent>,
}

/// A written archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Where it was written.
    pub path: PathBuf,
    /// Records it holds.
    pub records: usize,
    /// Size on disk.
    pub bytes: u64,
}

/// Write `records` to `<dir>/<stem>_YYYYmmdd_HHMMSS.json[.gz]`.
///
/// A numeric suffix is added when a file for the same second already exists.
pub fn write_archive<T: Serialize>(
    dir: &Path,
    stem: &str,
    records: &[T],
    compress: bool,
    now: DateTime<Utc>,
) -> Result<ArchiveFile> {
    fs::create_dir_all(dir)?;
    let ext = if compress { "json.gz" } else { "json" };
    let base = format!("{stem}_{}", now.format("%Y%m%d_%H%M%S"));
    let (path, file) = create_unique(dir, &base, ext)?;

    let mut out = BufWriter::new(file);
    if compress {
        let mut encoder = GzEncoder::new(&mut out, Compression::default());
        serde_json::to_writer(&mut encoder, records)?;
        let _ = encoder.finish()?;
    } else {
        serde_json::to_writer_pretty(&mut out, records)?;
    }
    out.flush()?;
    drop(out);

    let bytes = fs::metadata(&path)?.len();
    Ok(ArchiveFile { path, records: records.len(), bytes })
}

/// Read an archive back, transparently decompressing `.gz` files.
pub fn read_archive<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut raw = Vec::new();
    let file = File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        let _ = GzDecoder::new(file).read_to_end(&mut raw)?;
    } else {
        let mut file = file;
        let _ = file.read_to_end(&mut raw)?;
    }
    Ok(serde_json::from_slice(&raw)?)
}

fn create_unique(dir: &Path, base: &str, ext: &str) -> Result<(PathBuf, File)> {
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{base}.{ext}")
        } else {
            format!("{base}_{attempt}.{ext}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
