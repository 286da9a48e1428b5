//! Reader and writer for the per-prefix transaction history journal.
//!
//! Every executed transaction appends one entry to
//! `<prefix>/pangolin-meta/history`. An entry records the specs the user asked
//! for and the package distributions that were linked into or unlinked from
//! the prefix. The format is line based: a `==> <timestamp> <==` header,
//! comment lines carrying the requested specs, and one `+`/`-` prefixed
//! distribution string per linked/unlinked package.

use std::io::Write;
use std::path::{Path, PathBuf};

/// The directory under the prefix that holds pangolin metadata, including the
/// history journal and per-package prefix records.
pub const PREFIX_META_DIR: &str = "pangolin-meta";

/// A single journal entry describing one executed transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryEntry {
    /// The timestamp of the transaction, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,

    /// The install specs the user requested.
    pub requested_specs: Vec<String>,

    /// The remove specs the user requested.
    pub removed_specs: Vec<String>,

    /// Long-form dist strings of every package linked by the transaction.
    pub link_dists: Vec<String>,

    /// Long-form dist strings of every package unlinked by the transaction.
    pub unlink_dists: Vec<String>,
}

/// Errors that can occur when reading or writing the history journal.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// An I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Provides append and read access to the history journal of a prefix.
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    /// Creates a new `History` pointing at `<prefix>/pangolin-meta/history`.
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        Self {
            path: prefix.as_ref().join(PREFIX_META_DIR).join("history"),
        }
    }

    /// Creates a `History` from an explicit path to a journal file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path to the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a single entry to the journal, creating the file and its parent
    /// directory on first use.
    pub fn add_entry(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "==> {} <==", entry.timestamp)?;
        writeln!(file, "# install specs: {}", format_specs(&entry.requested_specs))?;
        writeln!(file, "# remove specs: {}", format_specs(&entry.removed_specs))?;
        for dist in &entry.unlink_dists {
            writeln!(file, "-{dist}")?;
        }
        for dist in &entry.link_dists {
            writeln!(file, "+{dist}")?;
        }

        Ok(())
    }

    /// Parses the journal into its entries.
    ///
    /// Returns an empty list if the file does not exist. Lines appearing
    /// before the first entry header are silently ignored.
    pub fn parse(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs_err::read_to_string(&self.path)?;
        Ok(Self::parse_str(&contents))
    }

    /// Parses journal text into entries.
    pub fn parse_str(s: &str) -> Vec<HistoryEntry> {
        let header_re = lazy_regex::regex!(r"^==>\s*(.+?)\s*<==$");
        let specs_re = lazy_regex::regex!(r"^#\s*(install|remove)\s*specs:\s*(.*)$");

        let mut entries: Vec<HistoryEntry> = Vec::new();

        for line in s.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(caps) = header_re.captures(line) {
                entries.push(HistoryEntry {
                    timestamp: caps[1].to_string(),
                    ..Default::default()
                });
                continue;
            }

            let Some(entry) = entries.last_mut() else {
                continue;
            };

            if let Some(caps) = specs_re.captures(line) {
                let specs = parse_specs(caps.get(2).map_or("", |m| m.as_str()));
                match &caps[1] {
                    "install" => entry.requested_specs = specs,
                    "remove" => entry.removed_specs = specs,
                    _ => unreachable!("the regex only matches install/remove"),
                }
            } else if let Some(dist) = line.strip_prefix('+') {
                entry.link_dists.push(dist.to_string());
            } else if let Some(dist) = line.strip_prefix('-') {
                entry.unlink_dists.push(dist.to_string());
            }
        }

        entries
    }

    /// Returns the last entry of the journal, if any.
    pub fn last_entry(&self) -> Result<Option<HistoryEntry>, HistoryError> {
        Ok(self.parse()?.pop())
    }
}

/// Renders a spec list as a bracketed, single-quoted list, e.g. `['a', 'b>=2']`.
fn format_specs(specs: &[String]) -> String {
    let quoted: Vec<String> = specs.iter().map(|s| format!("'{s}'")).collect();
    format!("[{}]", quoted.join(", "))
}

/// Parses a spec list written by [`format_specs`].
///
/// A version qualifier (`>=`, `<`, ...) after a comma belongs to the previous
/// spec, not a new one: `['bar >=2.0,<3']` is a single spec.
fn parse_specs(s: &str) -> Vec<String> {
    let mut specs: Vec<String> = Vec::new();
    for part in s
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
    {
        let part = part.trim().trim_matches('\'').trim_matches('"');
        if part.is_empty() {
            continue;
        }
        match specs.last_mut() {
            Some(last) if part.starts_with(['>', '<', '=', '!']) => {
                *last = format!("{last},{part}");
            }
            _ => specs.push(part.to_string()),
        }
    }
    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> HistoryEntry {
        HistoryEntry {
            timestamp: String::from("2024-01-15 10:30:00"),
            requested_specs: vec![String::from("foo"), String::from("bar >=2.0")],
            removed_specs: vec![String::from("baz")],
            link_dists: vec![
                String::from("https://repo.example.com/main/linux-64::foo-1.0-0"),
                String::from("https://repo.example.com/main/linux-64::bar-2.1-1"),
            ],
            unlink_dists: vec![String::from(
                "https://repo.example.com/main/linux-64::baz-0.3-0",
            )],
        }
    }

    #[test]
    fn parse_empty() {
        assert!(History::parse_str("").is_empty());
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path());

        let entry = sample_entry();
        history.add_entry(&entry).unwrap();

        let parsed = history.parse().unwrap();
        assert_eq!(parsed, vec![entry]);
    }

    #[test]
    fn roundtrip_multiple_entries() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path());

        let first = sample_entry();
        let second = HistoryEntry {
            timestamp: String::from("2024-01-16 09:00:00"),
            requested_specs: Vec::new(),
            removed_specs: vec![String::from("foo")],
            link_dists: Vec::new(),
            unlink_dists: vec![String::from(
                "https://repo.example.com/main/linux-64::foo-1.0-0",
            )],
        };
        history.add_entry(&first).unwrap();
        history.add_entry(&second).unwrap();

        let parsed = history.parse().unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], first);
        assert_eq!(parsed[1], second);
        assert_eq!(history.last_entry().unwrap(), Some(second));
    }

    #[test]
    fn parse_ignores_lines_before_first_header() {
        let input = "stray line\n# install specs: ['x']\n==> 2024-01-01 00:00:00 <==\n+ch/sub::pkg-1.0-0\n";
        let parsed = History::parse_str(input);
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].requested_specs.is_empty());
        assert_eq!(parsed[0].link_dists, vec!["ch/sub::pkg-1.0-0"]);
    }

    #[test]
    fn specs_with_version_constraints_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path());

        let entry = HistoryEntry {
            timestamp: String::from("2024-03-01 12:00:00"),
            requested_specs: vec![String::from("param >=1.5.1,<2.0"), String::from("python")],
            ..Default::default()
        };
        history.add_entry(&entry).unwrap();
        assert_eq!(history.parse().unwrap(), vec![entry]);
    }

    #[test]
    fn parse_nonexistent_file() {
        let history = History::from_path("/nonexistent/path/history");
        assert!(history.parse().unwrap().is_empty());
    }

    #[test]
    fn empty_spec_lists() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path());

        let entry = HistoryEntry {
            timestamp: String::from("2024-02-01 08:00:00"),
            ..Default::default()
        };
        history.add_entry(&entry).unwrap();
        assert_eq!(history.parse().unwrap(), vec![entry]);
    }
}
