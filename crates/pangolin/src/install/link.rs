//! Linking a package from its extracted cache directory into a prefix.

use std::path::{Path, PathBuf};

use pangolin_types::history::PREFIX_META_DIR;
use pangolin_types::{strip_archive_extension, PackageInfo, PackageType};

use super::{PrefixRecord, TransactionContext};

/// An error that can occur while linking a package into a prefix.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The extracted package directory is missing from the cache.
    #[error("package {0} is not extracted in the package cache")]
    NotExtracted(String),

    /// A file the package wants to create already exists in the prefix.
    #[error("file already exists in prefix: {0}")]
    FileConflict(PathBuf),

    /// A file could not be linked or copied into the prefix.
    #[error("failed to link {0}")]
    LinkFailed(PathBuf, #[source] std::io::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Materializes the package into the prefix and writes its prefix record.
///
/// The package payload is enumerated from `info/files` when the package ships
/// one, otherwise by walking the extracted tree. Files are hard-linked out of
/// the cache with a copy fallback for filesystems that refuse the link.
pub fn link_package(
    pkg: &PackageInfo,
    cache_root: &Path,
    ctx: &TransactionContext,
) -> Result<(), LinkError> {
    let package_dir = strip_archive_extension(&pkg.file_name)
        .map(|stem| cache_root.join(stem))
        .filter(|dir| dir.is_dir())
        .ok_or_else(|| LinkError::NotExtracted(pkg.to_string()))?;

    let files = collect_payload_files(&package_dir)?;
    tracing::debug!("linking {} files for {}", files.len(), pkg);

    let mut linked = Vec::with_capacity(files.len());
    for relative_path in files {
        let source = package_dir.join(&relative_path);
        let destination_rel = remap_target_path(relative_path, pkg, ctx);
        let destination = ctx.target_prefix.join(&destination_rel);

        if destination.exists() {
            return Err(LinkError::FileConflict(destination));
        }
        if let Some(parent) = destination.parent() {
            fs_err::create_dir_all(parent)?;
        }
        link_file(&source, &destination)?;
        linked.push(destination_rel);
    }

    let meta_dir = ctx.target_prefix.join(PREFIX_META_DIR);
    fs_err::create_dir_all(&meta_dir)?;
    let record = PrefixRecord {
        package_info: pkg.clone(),
        files: linked,
    };
    record.write_to_path(&meta_dir.join(PrefixRecord::file_name(pkg)))?;

    Ok(())
}

/// Enumerates the prefix-relative payload paths of an extracted package.
fn collect_payload_files(package_dir: &Path) -> Result<Vec<PathBuf>, LinkError> {
    let files_manifest = package_dir.join("info").join("files");
    if files_manifest.is_file() {
        let contents = fs_err::read_to_string(&files_manifest)?;
        return Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect());
    }

    // No manifest; everything outside of info/ is payload.
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(package_dir) {
        let entry = entry.map_err(|e| LinkError::IoError(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(package_dir)
            .expect("walkdir yields paths under its root")
            .to_path_buf();
        if relative.starts_with("info") {
            continue;
        }
        files.push(relative);
    }
    files.sort();
    Ok(files)
}

/// Rewrites the target path of architecture-neutral interpreter packages:
/// their `site-packages/` payload lands in the interpreter's site-packages
/// directory of the prefix.
fn remap_target_path(
    relative_path: PathBuf,
    pkg: &PackageInfo,
    ctx: &TransactionContext,
) -> PathBuf {
    if pkg.package_type != PackageType::InterpreterNoarch {
        return relative_path;
    }
    match (
        relative_path.strip_prefix("site-packages"),
        ctx.site_packages_dir(),
    ) {
        (Ok(tail), Some(site_packages)) => site_packages.join(tail),
        _ => relative_path,
    }
}

fn link_file(source: &Path, destination: &Path) -> Result<(), LinkError> {
    if std::fs::hard_link(source, destination).is_ok() {
        return Ok(());
    }
    fs_err::copy(source, destination)
        .map(|_| ())
        .map_err(|e| LinkError::LinkFailed(destination.to_path_buf(), e))
}
