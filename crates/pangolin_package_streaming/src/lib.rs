#![deny(missing_docs)]

//! Extraction of pangolin package archives into a cache directory.
//!
//! Two archive forms exist. A `.tar.bz2` archive is a bzip2 compressed
//! tarball holding the `info/` metadata directory and the package payload
//! side by side. A `.conda` archive is a zip file whose components are zstd
//! compressed tarballs: an `info-*.tar.zst` with the metadata, a
//! `pkg-*.tar.zst` with the payload, and a `metadata.json` that carries no
//! package content. Extraction unpacks either form entry by entry into the
//! destination directory, refusing entries whose paths would escape it.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use pangolin_types::ArchiveType;

/// An error that can occur when extracting a package archive.
#[derive(thiserror::Error, Debug)]
#[allow(missing_docs)]
pub enum ExtractError {
    #[error("an io error occurred")]
    IoError(#[from] std::io::Error),

    #[error("could not create the destination path")]
    CouldNotCreateDestination(#[source] std::io::Error),

    #[error("invalid zip archive")]
    ZipError(#[from] zip::result::ZipError),

    #[error("archive entry escapes the destination directory: {0}")]
    EntryOutsideDestination(PathBuf),

    #[error("unsupported package archive format")]
    UnsupportedArchiveType,
}

/// Extracts a package archive to a directory.
///
/// The archive form is determined from the file extension; an unrecognized
/// extension falls back to sniffing the leading magic bytes, so renamed or
/// extension-less archives still extract.
pub fn extract(archive: &Path, destination: &Path) -> Result<(), ExtractError> {
    let archive_type = ArchiveType::try_from(archive)
        .or_else(|| sniff_archive_type(archive))
        .ok_or(ExtractError::UnsupportedArchiveType)?;
    match archive_type {
        ArchiveType::TarBz2 => extract_tar_bz2(archive, destination),
        ArchiveType::Conda => extract_conda(archive, destination),
    }
}

/// Extracts a `.tar.bz2` package archive to a directory.
pub fn extract_tar_bz2(archive: &Path, destination: &Path) -> Result<(), ExtractError> {
    let reader = BufReader::new(File::open(archive)?);
    unpack_entries(
        tar::Archive::new(bzip2::read::BzDecoder::new(reader)),
        destination,
    )
}

/// Extracts a `.conda` package archive to a directory.
///
/// Only the `info-*`/`pkg-*` tarball components are unpacked; other zip
/// members (`metadata.json`) carry no package content and are skipped.
pub fn extract_conda(archive: &Path, destination: &Path) -> Result<(), ExtractError> {
    let mut reader = BufReader::new(File::open(archive)?);
    while let Some(component) = zip::read::read_zipfile_from_stream(&mut reader)? {
        if !is_conda_component(component.name()) {
            continue;
        }
        unpack_entries(
            tar::Archive::new(zstd::stream::read::Decoder::new(component)?),
            destination,
        )?;
    }
    Ok(())
}

/// Returns whether a zip member of a `.conda` archive carries package
/// content.
fn is_conda_component(name: &str) -> bool {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let Some(stem) = file_name.strip_suffix(".tar.zst") else {
        return false;
    };
    stem.starts_with("info-") || stem.starts_with("pkg-")
}

/// Determines the archive form from the leading magic bytes of the file.
fn sniff_archive_type(archive: &Path) -> Option<ArchiveType> {
    let mut magic = [0u8; 4];
    File::open(archive).ok()?.read_exact(&mut magic).ok()?;
    ArchiveType::try_from_magic_bytes(magic)
}

/// Unpacks every entry of a tar archive into the destination, entry by
/// entry. An entry whose path points outside the destination (absolute, or
/// escaping through `..`) fails the extraction instead of being written.
fn unpack_entries<R: Read>(
    mut archive: tar::Archive<R>,
    destination: &Path,
) -> Result<(), ExtractError> {
    std::fs::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.unpack_in(destination)? {
            return Err(ExtractError::EntryOutsideDestination(
                entry.path()?.into_owned(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    use assert_matches::assert_matches;

    use super::{extract, is_conda_component, ExtractError};

    /// Builds a small `.tar.bz2` package archive from the given entries.
    fn write_test_archive(path: &Path, entries: &[(&str, &[u8])]) {
        let encoder = bzip2::write::BzEncoder::new(
            File::create(path).unwrap(),
            bzip2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);

        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, *contents).unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap().flush().unwrap();
    }

    const PACKAGE_ENTRIES: &[(&str, &[u8])] = &[
        ("info/index.json", b"{\"name\": \"testpkg\"}"),
        ("info/files", b"bin/testpkg\n"),
        ("bin/testpkg", b"#!/bin/sh\necho ok\n"),
    ];

    #[test]
    fn extract_tar_bz2_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("testpkg-0.1.0-0.tar.bz2");
        write_test_archive(&archive, PACKAGE_ENTRIES);

        let destination = dir.path().join("testpkg-0.1.0-0");
        extract(&archive, &destination).unwrap();

        assert!(destination.join("info/index.json").is_file());
        assert!(destination.join("info/files").is_file());
        assert!(destination.join("bin/testpkg").is_file());
        assert_eq!(
            std::fs::read_to_string(destination.join("info/index.json")).unwrap(),
            "{\"name\": \"testpkg\"}"
        );
    }

    #[test]
    fn unrecognized_extension_falls_back_to_magic_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("download.partial");
        write_test_archive(&archive, PACKAGE_ENTRIES);

        let destination = dir.path().join("out");
        extract(&archive, &destination).unwrap();
        assert!(destination.join("bin/testpkg").is_file());
    }

    #[test]
    fn unrecognizable_content_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("testpkg.zipfile");
        std::fs::write(&archive, b"not a package").unwrap();

        assert_matches!(
            extract(&archive, &dir.path().join("out")),
            Err(ExtractError::UnsupportedArchiveType)
        );
    }

    #[test]
    fn escaping_entry_fails_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil-0.1.0-0.tar.bz2");
        write_test_archive(&archive, &[("../evil", b"outside")]);

        let destination = dir.path().join("evil-0.1.0-0");
        assert_matches!(
            extract(&archive, &destination),
            Err(ExtractError::EntryOutsideDestination(_))
        );
        assert!(!dir.path().join("evil").exists());
    }

    #[test]
    fn conda_component_names() {
        assert!(is_conda_component("info-testpkg-0.1.0-0.tar.zst"));
        assert!(is_conda_component("pkg-testpkg-0.1.0-0.tar.zst"));
        assert!(is_conda_component("nested/pkg-testpkg-0.1.0-0.tar.zst"));
        assert!(!is_conda_component("metadata.json"));
        assert!(!is_conda_component("pkg-testpkg-0.1.0-0.tar.bz2"));
        assert!(!is_conda_component("payload.tar.zst"));
    }
}
