//! Downloading, validating, and extracting package archives.
//!
//! Each package to install is represented by a [`FetchExtractTarget`] that
//! walks `Planned → Downloading → Validating → Extracted`, short-circuiting
//! to `Extracted` on a cache hit and ending in `Failed` on any transfer,
//! integrity, or extraction error. Transfers run concurrently on the async
//! runtime through the [`MultiDownloader`]; validation and extraction run on
//! the blocking pool, with the extraction portion serialized by a shared
//! lock because the archive decoders must not run concurrently over the same
//! cache root.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use indicatif::HumanBytes;
use pangolin_cache::{MultiCache, URLS_FILE};
use pangolin_digest::{compute_file_digest, Sha256};
use pangolin_types::{strip_archive_extension, PackageInfo};
use serde::Serialize;
use std::io::Write as _;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::console::{Console, ProgressHandle};
use crate::context::InterruptFlag;

/// How many transfers are driven concurrently.
const CONCURRENT_TRANSFERS: usize = 5;

/// The lock serializing archive extraction. One instance is shared by every
/// target of a transaction.
pub type ExtractLock = Arc<Mutex<()>>;

/// An error that can occur while fetching and extracting a package.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The transfer did not complete.
    #[error("failed to transfer {0}")]
    TransferFailed(String, #[source] reqwest::Error),

    /// The downloaded file does not have the expected size.
    #[error("file not valid: file size doesn't match expectation ({0})")]
    InvalidSize(PathBuf),

    /// The downloaded file does not have the expected SHA256 digest.
    #[error("file not valid: SHA256 sum doesn't match expectation ({0})")]
    InvalidSha256(PathBuf),

    /// The package metadata carries no SHA256 digest to validate against.
    #[error("no sha256 checksum recorded for {0}")]
    MissingSha256(String),

    /// Unpacking the archive failed.
    #[error(transparent)]
    ExtractError(#[from] pangolin_package_streaming::ExtractError),

    /// An I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The repodata record could not be serialized.
    #[error("failed to write repodata record")]
    SerializeError(#[from] serde_json::Error),

    /// The fetch phase observed the interrupt flag.
    #[error("the fetch phase was interrupted")]
    Interrupted,
}

/// Describes one pending transfer: where to download from, where the archive
/// lands, and the progress bar reporting it.
pub struct DownloadTicket {
    /// The URL to download.
    pub url: String,
    /// The expected payload size in bytes.
    pub expected_size: u64,
    /// The destination path of the archive, `<cache root>/<fn>`.
    pub destination: PathBuf,
    /// The progress bar of this transfer.
    pub bar: ProgressHandle,
}

/// The lifecycle of one package on its way into the cache.
pub struct FetchExtractTarget {
    pkg: PackageInfo,
    extract_lock: ExtractLock,
    cache_path: PathBuf,
    tarball_path: PathBuf,
    bar: Option<ProgressHandle>,
    finalize: Option<JoinHandle<Result<(), FetchError>>>,
}

impl FetchExtractTarget {
    /// Creates a target for the given package. The extract lock is shared
    /// between all targets of a transaction.
    pub fn new(pkg: PackageInfo, extract_lock: ExtractLock) -> Self {
        Self {
            pkg,
            extract_lock,
            cache_path: PathBuf::new(),
            tarball_path: PathBuf::new(),
            bar: None,
            finalize: None,
        }
    }

    /// The package this target fetches.
    pub fn package(&self) -> &PackageInfo {
        &self.pkg
    }

    /// Materializes the target's plan against the cache.
    ///
    /// If any cache already holds a usable copy the target short-circuits and
    /// no ticket is produced; a validated raw archive that was never unpacked
    /// still gets an extraction job. Otherwise the returned ticket describes
    /// the download the multi-transfer driver must perform.
    pub fn prepare(
        &mut self,
        cache_path: &Path,
        caches: &MultiCache,
        console: &Console,
    ) -> Option<DownloadTicket> {
        self.cache_path = cache_path.to_path_buf();
        self.tarball_path = cache_path.join(&self.pkg.file_name);

        if caches.query(&self.pkg) {
            tracing::info!("using cached {}", self.pkg);
            let dest_dir = strip_archive_extension(&self.pkg.file_name)
                .map(|stem| cache_path.join(stem));
            if let Some(dest_dir) = dest_dir.filter(|d| !d.exists()) {
                if self.tarball_path.is_file() {
                    // The hit is the raw archive in this root; unpack it so the
                    // link step finds the extracted form.
                    self.dispatch_extract(dest_dir);
                }
            }
            return None;
        }

        tracing::info!("adding {} with {}", self.pkg.name, self.pkg.url);
        let bar = console.add_bar(&self.pkg.name);
        self.bar = Some(bar.clone());
        Some(DownloadTicket {
            url: self.pkg.url.clone(),
            expected_size: self.pkg.size,
            destination: self.tarball_path.clone(),
            bar,
        })
    }

    /// Invoked by the transfer driver when this target's download completed;
    /// dispatches validation and extraction to the blocking pool.
    pub fn finalize_download(&mut self, downloaded: u64) {
        let bar = self
            .bar
            .clone()
            .expect("a download ticket was produced for this target");
        bar.set_progress(100);
        bar.set_postfix("Validating...");

        let pkg = self.pkg.clone();
        let cache_path = self.cache_path.clone();
        let tarball_path = self.tarball_path.clone();
        let extract_lock = self.extract_lock.clone();
        self.finalize = Some(tokio::task::spawn_blocking(move || {
            validate_and_extract(&pkg, downloaded, &tarball_path, &cache_path, &extract_lock, &bar)
        }));
    }

    fn dispatch_extract(&mut self, dest_dir: PathBuf) {
        let pkg = self.pkg.clone();
        let cache_path = self.cache_path.clone();
        let tarball_path = self.tarball_path.clone();
        let extract_lock = self.extract_lock.clone();
        self.finalize = Some(tokio::task::spawn_blocking(move || {
            let _guard = extract_lock.lock().unwrap_or_else(|e| e.into_inner());
            extract_into_cache(&pkg, &tarball_path, &dest_dir, &cache_path)
        }));
    }

    /// Resolves once validation and extraction have either succeeded or
    /// failed. Targets that short-circuited on a cache hit resolve
    /// immediately.
    pub async fn wait_finished(&mut self) -> Result<(), FetchError> {
        let Some(handle) = self.finalize.take() else {
            return Ok(());
        };
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                if let Ok(panic) = e.try_into_panic() {
                    std::panic::resume_unwind(panic);
                }
                Err(FetchError::Interrupted)
            }
        }
    }
}

/// Drives a set of transfers concurrently and hands each completed download
/// back to its target for finalization.
pub struct MultiDownloader {
    client: reqwest::Client,
}

impl MultiDownloader {
    /// Creates a downloader over the given HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Downloads every ticket, at most [`CONCURRENT_TRANSFERS`] at a time.
    /// As each transfer completes, the owning target's validation and
    /// extraction is dispatched. The first failed transfer aborts the phase;
    /// the interrupt flag is polled between completions.
    pub async fn download_all(
        &self,
        work: Vec<(usize, DownloadTicket)>,
        targets: &mut [FetchExtractTarget],
        interrupt: &InterruptFlag,
    ) -> Result<(), FetchError> {
        let mut transfers = futures::stream::iter(work.into_iter().map(|(index, ticket)| {
            let client = self.client.clone();
            async move {
                let result = download_to_file(&client, &ticket).await;
                (index, result)
            }
        }))
        .buffer_unordered(CONCURRENT_TRANSFERS);

        while let Some((index, result)) = transfers.next().await {
            let downloaded = result?;
            if interrupt.is_interrupted() {
                return Err(FetchError::Interrupted);
            }
            targets[index].finalize_download(downloaded);
        }
        Ok(())
    }
}

/// Streams one archive to disk, reporting percentage progress to the
/// ticket's bar.
async fn download_to_file(
    client: &reqwest::Client,
    ticket: &DownloadTicket,
) -> Result<u64, FetchError> {
    let response = client
        .get(&ticket.url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| FetchError::TransferFailed(ticket.url.clone(), e))?;

    if let Some(parent) = ticket.destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(&ticket.destination).await?;

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::TransferFailed(ticket.url.clone(), e))?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        if ticket.expected_size > 0 {
            let percent = downloaded.min(ticket.expected_size) * 100 / ticket.expected_size;
            ticket.bar.set_progress(percent as i8);
        } else {
            ticket.bar.set_progress(-1);
        }
    }
    file.flush().await?;

    Ok(downloaded)
}

/// The finalize path of a freshly downloaded archive: size and SHA256
/// validation, then extraction under the shared lock. A failed validation
/// discards the partial artifact.
fn validate_and_extract(
    pkg: &PackageInfo,
    downloaded: u64,
    tarball_path: &Path,
    cache_path: &Path,
    extract_lock: &Mutex<()>,
    bar: &ProgressHandle,
) -> Result<(), FetchError> {
    // A size of zero means the metadata did not carry one; only a recorded
    // size can mismatch.
    if pkg.size > 0 && downloaded != pkg.size {
        let _ = fs_err::remove_file(tarball_path);
        return Err(FetchError::InvalidSize(tarball_path.to_path_buf()));
    }
    let Some(expected_sha256) = pkg.sha256.as_deref() else {
        let _ = fs_err::remove_file(tarball_path);
        return Err(FetchError::MissingSha256(pkg.to_string()));
    };
    let digest = compute_file_digest::<Sha256>(tarball_path)?;
    if format!("{digest:x}") != expected_sha256 {
        let _ = fs_err::remove_file(tarball_path);
        return Err(FetchError::InvalidSha256(tarball_path.to_path_buf()));
    }

    bar.set_postfix("Waiting...");
    {
        let _guard = extract_lock.lock().unwrap_or_else(|e| e.into_inner());
        bar.set_postfix("Decompressing...");
        let dest_dir = strip_archive_extension(&pkg.file_name)
            .map(|stem| cache_path.join(stem))
            .ok_or(pangolin_package_streaming::ExtractError::UnsupportedArchiveType)?;
        extract_into_cache(pkg, tarball_path, &dest_dir, cache_path)?;
    }

    bar.complete(format!(
        "Finished {:<30} {:>8}",
        pkg.name,
        HumanBytes(pkg.size).to_string()
    ));
    Ok(())
}

/// Unpacks the archive and records it in the cache root: the extracted tree
/// gets its `repodata_record.json` and the archive URL is appended to
/// `urls.txt`. Callers hold the extract lock.
fn extract_into_cache(
    pkg: &PackageInfo,
    tarball_path: &Path,
    dest_dir: &Path,
    cache_path: &Path,
) -> Result<(), FetchError> {
    pangolin_package_streaming::extract(tarball_path, dest_dir)?;
    write_repodata_record(dest_dir, pkg)?;
    append_url(cache_path, &pkg.url)?;
    Ok(())
}

/// Writes `info/repodata_record.json`: the package's own `info/index.json`
/// preserved verbatim, augmented with the solver-derived metadata, with
/// `url`, `channel` and `fn` overriding any same-named keys.
fn write_repodata_record(dest_dir: &Path, pkg: &PackageInfo) -> Result<(), FetchError> {
    let info_dir = dest_dir.join("info");
    let index: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&fs_err::read_to_string(info_dir.join("index.json"))?)?;

    let mut record = index;
    if let serde_json::Value::Object(fields) = serde_json::to_value(pkg)? {
        for (key, value) in fields {
            record.entry(key).or_insert(value);
        }
    }
    record.insert("url".into(), serde_json::Value::String(pkg.url.clone()));
    record.insert(
        "channel".into(),
        serde_json::Value::String(pkg.channel.clone()),
    );
    record.insert(
        "fn".into(),
        serde_json::Value::String(pkg.file_name.clone()),
    );

    let file = fs_err::File::create(info_dir.join("repodata_record.json"))?;
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(file, formatter);
    record.serialize(&mut serializer)?;
    Ok(())
}

/// Appends the archive URL as a new line to `urls.txt` in the cache root.
fn append_url(cache_path: &Path, url: &str) -> Result<(), FetchError> {
    let mut file = fs_err::OpenOptions::new()
        .create(true)
        .append(true)
        .open(cache_path.join(URLS_FILE))?;
    writeln!(file, "{url}")?;
    Ok(())
}
