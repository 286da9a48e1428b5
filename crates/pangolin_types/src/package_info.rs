use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::archive::ArchiveType;

/// Distinguishes how a package's payload relates to the host it is installed
/// on.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    /// A regular package whose payload is linked as-is.
    #[default]
    Generic,

    /// An architecture-neutral package that requires post-link compilation
    /// against the interpreter found in the target prefix.
    InterpreterNoarch,

    /// A synthetic package reflecting a host capability (OS family, GPU
    /// driver). Virtual packages are consulted by the solver but never
    /// fetched or linked.
    VirtualSystem,
}

/// An error that can occur when validating the fields of a [`PackageInfo`].
#[derive(Debug, thiserror::Error)]
pub enum PackageInfoError {
    /// The package name is empty.
    #[error("package name must not be empty")]
    EmptyName,

    /// The MD5 checksum does not consist of 32 lowercase hex characters.
    #[error("invalid md5 checksum for {0}: expected 32 lowercase hex characters")]
    InvalidMd5(String),

    /// The SHA256 checksum does not consist of 64 lowercase hex characters.
    #[error("invalid sha256 checksum for {0}: expected 64 lowercase hex characters")]
    InvalidSha256(String),

    /// The archive filename does not have the canonical
    /// `<name>-<version>-<build_string>.<ext>` form.
    #[error("archive filename '{0}' does not match '<name>-<version>-<build_string>.<ext>'")]
    NonCanonicalFileName(String),
}

/// An immutable descriptor of one specific package build.
///
/// A `PackageInfo` is always a value copy derived from a solver handle or a
/// repository metadata record, never an alias into solver-owned memory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageInfo {
    /// The name of the package.
    pub name: String,

    /// The version of the package.
    pub version: String,

    /// The build string of the package.
    pub build_string: String,

    /// The build number of the package.
    #[serde(default)]
    pub build_number: u64,

    /// The base URL of the repository the package originates from.
    pub channel: String,

    /// The platform tag of the repository subdirectory.
    pub subdir: String,

    /// The archive filename, canonically `<name>-<version>-<build_string>.<ext>`.
    #[serde(rename = "fn")]
    pub file_name: String,

    /// The full download URL, `<channel>/<subdir>/<fn>`.
    pub url: String,

    /// The size of the archive payload in bytes.
    #[serde(default)]
    pub size: u64,

    /// The timestamp the package was created.
    #[serde(default)]
    pub timestamp: u64,

    /// The MD5 checksum of the archive, 32 lowercase hex characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,

    /// The SHA256 checksum of the archive, 64 lowercase hex characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// The dependency match-spec strings of the package, in order.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Constraints on other packages that do not pull them in.
    #[serde(default)]
    pub constrains: Vec<String>,

    /// The license of the package, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// How the package payload relates to the host.
    #[serde(default, skip_serializing_if = "is_generic")]
    pub package_type: PackageType,
}

fn is_generic(package_type: &PackageType) -> bool {
    *package_type == PackageType::Generic
}

impl PackageInfo {
    /// Constructs a new `PackageInfo` from its identifying parts, deriving the
    /// archive filename and download URL.
    pub fn from_parts(
        name: impl Into<String>,
        version: impl Into<String>,
        build_string: impl Into<String>,
        build_number: u64,
        channel: impl Into<String>,
        subdir: impl Into<String>,
        archive_type: ArchiveType,
    ) -> Self {
        let name = name.into();
        let version = version.into();
        let build_string = build_string.into();
        let channel = channel.into();
        let subdir = subdir.into();
        let file_name = format!(
            "{name}-{version}-{build_string}{}",
            archive_type.extension()
        );
        let url = format!("{channel}/{subdir}/{file_name}");
        Self {
            name,
            version,
            build_string,
            build_number,
            channel,
            subdir,
            file_name,
            url,
            size: 0,
            timestamp: 0,
            md5: None,
            sha256: None,
            depends: Vec::new(),
            constrains: Vec::new(),
            license: None,
            package_type: PackageType::Generic,
        }
    }

    /// The canonical long form of the package,
    /// `<channel>/<subdir>::<name>-<version>-<build_string>`.
    pub fn long_str(&self) -> String {
        format!("{}/{}::{}", self.channel, self.subdir, self)
    }

    /// Checks the field invariants: non-empty name, well-formed checksums when
    /// present, and a canonical archive filename.
    pub fn validate(&self) -> Result<(), PackageInfoError> {
        if self.name.is_empty() {
            return Err(PackageInfoError::EmptyName);
        }
        if let Some(md5) = &self.md5 {
            if !is_lower_hex(md5, 32) {
                return Err(PackageInfoError::InvalidMd5(self.to_string()));
            }
        }
        if let Some(sha256) = &self.sha256 {
            if !is_lower_hex(sha256, 64) {
                return Err(PackageInfoError::InvalidSha256(self.to_string()));
            }
        }
        let canonical = ArchiveType::split_str(&self.file_name)
            .map(|(stem, _)| stem == format!("{self}"))
            .unwrap_or(false);
        if !canonical {
            return Err(PackageInfoError::NonCanonicalFileName(
                self.file_name.clone(),
            ));
        }
        Ok(())
    }
}

/// Two `PackageInfo` are considered equivalent when their identity fields
/// match; metadata-only differences (e.g. a repatched `depends` list) do not
/// distinguish two builds of the same content.
impl PartialEq for PackageInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.build_string == other.build_string
            && self.build_number == other.build_number
            && self.sha256 == other.sha256
    }
}

impl Eq for PackageInfo {}

impl Display for PackageInfo {
    /// The canonical short form, `<name>-<version>-<build_string>`.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.build_string)
    }
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
