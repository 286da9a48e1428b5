use std::fmt::{Display, Formatter};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Describes the type of a pangolin package archive.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveType {
    /// A file with the `.tar.bz2` extension.
    TarBz2,

    /// A file with the `.conda` extension.
    Conda,
}

impl ArchiveType {
    /// Tries to determine the type of archive from its filename.
    pub fn try_from(path: impl AsRef<Path>) -> Option<ArchiveType> {
        Self::split_str(path.as_ref().to_string_lossy().as_ref())
            .map(|(_, archive_type)| archive_type)
    }

    /// Returns the file extension for this archive type.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveType::TarBz2 => ".tar.bz2",
            ArchiveType::Conda => ".conda",
        }
    }

    /// Tries to determine the type of an archive from its magic bytes.
    pub fn try_from_magic_bytes<T: AsRef<[u8]>>(bytes: T) -> Option<ArchiveType> {
        // https://en.wikipedia.org/wiki/List_of_file_signatures
        let bytes = bytes.as_ref();
        if bytes.len() >= 4 {
            match bytes[0..4] {
                // zip magic number
                [0x50, 0x4B, 0x03, 0x04] | [0x50, 0x4B, 0x05, 0x06] | [0x50, 0x4B, 0x07, 0x08] => {
                    Some(ArchiveType::Conda)
                }
                // bz2 magic number
                [0x42, 0x5a, 0x68, _] => Some(ArchiveType::TarBz2),
                _ => None,
            }
        } else {
            None
        }
    }

    /// Split the given string into its filename and archive type, removing the
    /// extension.
    #[allow(clippy::manual_map)]
    pub fn split_str(path: &str) -> Option<(&str, ArchiveType)> {
        if let Some(path) = path.strip_suffix(".conda") {
            Some((path, ArchiveType::Conda))
        } else if let Some(path) = path.strip_suffix(".tar.bz2") {
            Some((path, ArchiveType::TarBz2))
        } else {
            None
        }
    }
}

/// A package archive identifier contains the `name`, `version`, `build_string` and
/// `archive_type` of a package archive. This information can be derived from the
/// filename of a package archive using the [`ArchiveIdentifier::try_from_filename`]
/// function.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ArchiveIdentifier {
    /// The name of the package.
    pub name: String,
    /// The version of the package.
    pub version: String,
    /// The build string of the package.
    pub build_string: String,
    /// The archive type of the package (tar.bz2 or conda).
    pub archive_type: ArchiveType,
}

impl ArchiveIdentifier {
    /// Converts the archive identifier back into a filename.
    pub fn to_file_name(&self) -> String {
        self.to_string()
    }

    /// Tries to convert the specified filename into an [`ArchiveIdentifier`].
    ///
    /// Since package archives have a fixed format for file names
    /// (`<name>-<version>-<build>.<ext>`) we can reverse engineer the information
    /// that went into it. This function tries to do just that.
    pub fn try_from_filename(filename: &str) -> Option<Self> {
        // Strip the suffix from the filename
        let (filename_without_ext, archive_type) = ArchiveType::split_str(filename)?;

        // Filename is in the form of: <name>-<version>-<build>
        let mut iter = filename_without_ext.rsplitn(3, '-');
        let build_string = iter.next()?;
        let version = iter.next()?;
        let name = iter.next()?;

        Some(Self {
            name: name.to_owned(),
            version: version.to_owned(),
            build_string: build_string.to_owned(),
            archive_type,
        })
    }

    /// Tries to convert the specified path into an [`ArchiveIdentifier`].
    pub fn try_from_path(path: impl AsRef<Path>) -> Option<Self> {
        Self::try_from_filename(path.as_ref().file_name()?.to_str()?)
    }
}

impl Display for ArchiveIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}{}",
            &self.name,
            &self.version,
            &self.build_string,
            self.archive_type.extension()
        )
    }
}

/// Returns the archive filename with its recognized extension removed, or `None`
/// if the filename does not carry a recognized package extension.
pub fn strip_archive_extension(file_name: &str) -> Option<&str> {
    ArchiveType::split_str(file_name).map(|(stem, _)| stem)
}

#[cfg(test)]
mod test {
    use super::{strip_archive_extension, ArchiveIdentifier, ArchiveType};

    #[test]
    fn test_archive_type() {
        assert_eq!(
            ArchiveType::split_str("my-package.conda"),
            Some(("my-package", ArchiveType::Conda))
        );
        assert_eq!(
            ArchiveType::split_str("my-package.tar.bz2"),
            Some(("my-package", ArchiveType::TarBz2))
        );
        assert_eq!(ArchiveType::split_str("my-package.zip"), None);
    }

    #[test]
    fn test_try_from_filename() {
        assert_eq!(
            ArchiveIdentifier::try_from_filename(
                "ros-noetic-rosbridge-suite-0.11.14-py39h6fdeb60_14.tar.bz2"
            ),
            Some(ArchiveIdentifier {
                name: String::from("ros-noetic-rosbridge-suite"),
                version: String::from("0.11.14"),
                build_string: String::from("py39h6fdeb60_14"),
                archive_type: ArchiveType::TarBz2
            })
        );

        assert_eq!(
            ArchiveIdentifier::try_from_filename("clangdev-9.0.1-cling_v0.9_hd1e6b3a_3.conda"),
            Some(ArchiveIdentifier {
                name: String::from("clangdev"),
                version: String::from("9.0.1"),
                build_string: String::from("cling_v0.9_hd1e6b3a_3"),
                archive_type: ArchiveType::Conda
            })
        );

        assert_eq!(ArchiveIdentifier::try_from_filename("no-extension"), None);
    }

    #[test]
    fn test_filename_roundtrip() {
        assert_eq!(
            ArchiveIdentifier::try_from_filename("clangdev-9.0.1-cling_v0.9_hd1e6b3a_3.conda")
                .unwrap()
                .to_file_name(),
            "clangdev-9.0.1-cling_v0.9_hd1e6b3a_3.conda"
        );
    }

    #[test]
    fn test_try_from_magic_bytes() {
        assert_eq!(
            ArchiveType::try_from_magic_bytes([0x50, 0x4B, 0x03, 0x04, 0x01]),
            Some(ArchiveType::Conda)
        );
        assert_eq!(
            ArchiveType::try_from_magic_bytes([0x42, 0x5a, 0x68, 0x12]),
            Some(ArchiveType::TarBz2)
        );
        assert_eq!(
            ArchiveType::try_from_magic_bytes([0x11, 0x11, 0x11, 0x11]),
            None
        );
        assert_eq!(ArchiveType::try_from_magic_bytes([]), None);
    }

    #[test]
    fn test_strip_archive_extension() {
        assert_eq!(
            strip_archive_extension("foo-1.0-0.tar.bz2"),
            Some("foo-1.0-0")
        );
        assert_eq!(strip_archive_extension("foo-1.0-0.conda"), Some("foo-1.0-0"));
        assert_eq!(strip_archive_extension("foo-1.0-0.txt"), None);
    }
}
