use crate::error::PatchError;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Exclusively owned scratch directory for one patch run.
///
/// Removed by [`WorkDir::cleanup`] on the success path and by drop on every
/// other path.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
    entry_order: Vec<String>,
    source_permissions: Option<fs::Permissions>,
}

impl WorkDir {
    pub fn create(scratch_root: Option<&Path>) -> Result<Self, PatchError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("frame-patch-");
        let dir = match scratch_root {
            Some(root) => {
                fs::create_dir_all(root).map_err(|err| {
                    PatchError::io(format!("failed to create {}", root.display()), err)
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|err| PatchError::io("failed to create scratch directory", err))?;

        Ok(Self {
            dir,
            entry_order: Vec::new(),
            source_permissions: None,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Entry names in the order the source container listed them.
    pub fn entry_order(&self) -> &[String] {
        &self.entry_order
    }

    /// Permissions of the unpacked source, applied to the repacked container.
    pub fn source_permissions(&self) -> Option<&fs::Permissions> {
        self.source_permissions.as_ref()
    }

    pub fn cleanup(self) -> Result<(), PatchError> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|err| PatchError::io(format!("failed to remove {}", path.display()), err))
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>, PatchError> {
    let file = File::open(path)
        .map_err(|err| PatchError::io(format!("failed to open {}", path.display()), err))?;
    ZipArchive::new(file).map_err(|err| zip_error(path, err))
}

fn zip_error(path: &Path, err: ZipError) -> PatchError {
    match err {
        ZipError::Io(io_err) => {
            PatchError::io(format!("failed to read container {}", path.display()), io_err)
        }
        other => PatchError::ArchiveFormat {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

fn entry_name(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

/// Extracts every entry of `source` into `work` and checks that the markup
/// file is present at the container root.
pub fn unpack(source: &Path, work: &mut WorkDir, markup_entry: &str) -> Result<usize, PatchError> {
    let mut archive = open_archive(source)?;
    let metadata = fs::metadata(source)
        .map_err(|err| PatchError::io(format!("failed to stat {}", source.display()), err))?;
    work.source_permissions = Some(metadata.permissions());
    let mut extracted = 0usize;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|err| zip_error(source, err))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(PatchError::ArchiveFormat {
                path: source.to_path_buf(),
                reason: format!("entry `{}` escapes the container root", entry.name()),
            });
        };
        let target = work.path().join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| {
                PatchError::io(format!("failed to create {}", target.display()), err)
            })?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                PatchError::io(format!("failed to create {}", parent.display()), err)
            })?;
        }
        let mut out = File::create(&target)
            .map_err(|err| PatchError::io(format!("failed to create {}", target.display()), err))?;
        io::copy(&mut entry, &mut out).map_err(|err| {
            PatchError::io(format!("failed to extract {}", entry.name()), err)
        })?;

        if let Some(name) = entry_name(&relative) {
            work.entry_order.push(name);
        }
        extracted += 1;
    }

    if !work.path().join(markup_entry).is_file() {
        return Err(PatchError::MalformedDocument(format!(
            "container {} has no {markup_entry} at its root",
            source.display()
        )));
    }

    Ok(extracted)
}

fn collect_files(work: &WorkDir) -> Result<Vec<(String, PathBuf)>, PatchError> {
    let mut found = BTreeMap::new();
    for entry in WalkDir::new(work.path()).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let context = format!("failed to walk {}", work.path().display());
            match err.into_io_error() {
                Some(io_err) => PatchError::io(context, io_err),
                None => PatchError::io(context, io::Error::other("directory loop")),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(work.path()) else {
            continue;
        };
        let Some(name) = entry_name(relative) else {
            continue;
        };
        found.insert(name, entry.path().to_path_buf());
    }

    let mut ordered = Vec::with_capacity(found.len());
    for name in work.entry_order() {
        if let Some(path) = found.remove(name) {
            ordered.push((name.clone(), path));
        }
    }
    ordered.extend(found);
    Ok(ordered)
}

/// Writes every file under the scratch directory into a new container at
/// `destination`. The container is built next to the destination and renamed
/// into place, so the destination never holds a partial write.
pub fn repack(work: &WorkDir, destination: &Path) -> Result<usize, PatchError> {
    let files = collect_files(work)?;
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let staged = NamedTempFile::new_in(&parent).map_err(|err| {
        PatchError::io(format!("destination directory {} is not writable", parent.display()), err)
    })?;

    let write_failed = |err: ZipError| match err {
        ZipError::Io(io_err) => {
            PatchError::io(format!("failed to write {}", destination.display()), io_err)
        }
        other => PatchError::io(
            format!("failed to write {}", destination.display()),
            io::Error::other(other.to_string()),
        ),
    };

    let mut zip = ZipWriter::new(staged.reopen().map_err(|err| {
        PatchError::io(format!("failed to open staged {}", staged.path().display()), err)
    })?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, path) in &files {
        zip.start_file(name.as_str(), options).map_err(write_failed)?;
        let mut input = File::open(path)
            .map_err(|err| PatchError::io(format!("failed to read {}", path.display()), err))?;
        io::copy(&mut input, &mut zip)
            .map_err(|err| PatchError::io(format!("failed to pack {name}"), err))?;
    }
    zip.finish().map_err(write_failed)?;

    // staged files start out owner-only
    if let Some(permissions) = work.source_permissions() {
        staged
            .as_file()
            .set_permissions(permissions.clone())
            .map_err(|err| {
                PatchError::io(
                    format!("failed to set permissions on {}", destination.display()),
                    err,
                )
            })?;
    }

    staged.persist(destination).map_err(|err| {
        PatchError::io(format!("failed to move container to {}", destination.display()), err.error)
    })?;
    Ok(files.len())
}

fn entry_digests(path: &Path) -> Result<BTreeMap<String, String>, PatchError> {
    let mut archive = open_archive(path)?;
    let mut out = BTreeMap::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|err| zip_error(path, err))?;
        if entry.is_dir() {
            continue;
        }
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = entry
                .read(&mut buf)
                .map_err(|err| PatchError::io(format!("failed to read {}", entry.name()), err))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        out.insert(entry.name().to_string(), format!("{:x}", hasher.finalize()));
    }
    Ok(out)
}

/// Confirms that `repacked` carries every entry of `source` unchanged, except
/// the markup file which only has to be present. Returns the number of
/// entries compared byte-for-byte.
pub fn verify_repack(
    source: &Path,
    repacked: &Path,
    markup_entry: &str,
) -> Result<usize, PatchError> {
    let before = entry_digests(source)?;
    let after = entry_digests(repacked)?;

    if !after.contains_key(markup_entry) {
        return Err(PatchError::VerificationFailed(format!(
            "{markup_entry} missing from {}",
            repacked.display()
        )));
    }

    let mut compared = 0usize;
    for (name, digest) in &before {
        if name == markup_entry {
            continue;
        }
        match after.get(name) {
            Some(other) if other == digest => compared += 1,
            Some(_) => {
                return Err(PatchError::VerificationFailed(format!(
                    "entry `{name}` changed content"
                )));
            }
            None => {
                return Err(PatchError::VerificationFailed(format!(
                    "entry `{name}` was dropped"
                )));
            }
        }
    }
    if let Some(extra) = after.keys().find(|name| !before.contains_key(*name)) {
        return Err(PatchError::VerificationFailed(format!(
            "unexpected entry `{extra}`"
        )));
    }
    Ok(compared)
}
