use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use harvest_logging::harvest_debug;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::persist::{ensure_output_dir, AtomicFileWriter, PersistError};

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("mirror source {0:?} is not a directory")]
    MissingSource(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub copied: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Make `dst` a copy of `src`, recursively.
///
/// Files whose SHA-256 digest already matches are left alone, changed files are
/// replaced atomically and, with `delete_extraneous`, anything in `dst` that
/// is not in `src` is removed.
pub fn sync_directory(
    src: &Path,
    dst: &Path,
    delete_extraneous: bool,
) -> Result<MirrorReport, MirrorError> {
    if !src.is_dir() {
        return Err(MirrorError::MissingSource(src.to_path_buf()));
    }
    let mut report = MirrorReport::default();
    sync_into(src, dst, delete_extraneous, &mut report)?;
    harvest_debug!(
        "Mirrored {:?} -> {:?}: {} copied, {} unchanged, {} removed",
        src,
        dst,
        report.copied,
        report.unchanged,
        report.removed
    );
    Ok(report)
}

fn sync_into(
    src: &Path,
    dst: &Path,
    delete_extraneous: bool,
    report: &mut MirrorReport,
) -> Result<(), MirrorError> {
    ensure_output_dir(dst)?;
    let writer = AtomicFileWriter::new(dst.to_path_buf());
    let mut seen: HashSet<OsString> = HashSet::new();

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let target = dst.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if target.is_file() {
                fs::remove_file(&target)?;
            }
            sync_into(&entry.path(), &target, delete_extraneous, report)?;
        } else if file_type.is_file() {
            if target.is_dir() {
                fs::remove_dir_all(&target)?;
            }
            let content = fs::read(entry.path())?;
            if same_content(&target, &content)? {
                report.unchanged += 1;
            } else {
                let Some(file_name) = name.to_str() else {
                    harvest_debug!("Skipping non UTF-8 file name {:?}", name);
                    continue;
                };
                writer.write(file_name, &content)?;
                report.copied += 1;
            }
        } else {
            continue;
        }
        seen.insert(name);
    }

    if delete_extraneous {
        for entry in fs::read_dir(dst)? {
            let entry = entry?;
            if seen.contains(&entry.file_name()) {
                continue;
            }
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
            report.removed += 1;
        }
    }
    Ok(())
}

fn same_content(path: &Path, content: &[u8]) -> Result<bool, MirrorError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() == content.len() as u64 => {
            Ok(digest(&fs::read(path)?) == digest(content))
        }
        Ok(_) => Ok(false),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn digest(content: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.finalize().into()
}
