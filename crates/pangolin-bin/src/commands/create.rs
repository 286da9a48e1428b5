use std::env;
use std::path::PathBuf;

use anyhow::Context as _;
use pangolin::console::Console;
use pangolin::context::{Context, InterruptFlag};
use pangolin::solver::{Pool, Solution, StepKind, TransactionStep};
use pangolin::transaction::Transaction;
use pangolin::virtual_packages;
use pangolin_cache::MultiCache;
use pangolin_types::{ArchiveIdentifier, PackageInfo};
use url::Url;

use crate::global_multi_progress;

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// Explicit package archive URLs to install, each anchored with its
    /// checksum: `https://.../foo-1.0-0.tar.bz2#<sha256>`. With no specs an
    /// empty prefix is created.
    specs: Vec<String>,

    /// The prefix to install into. Defaults to `./.prefix`.
    #[clap(long)]
    prefix: Option<PathBuf>,

    /// Package cache directories, in priority order.
    #[clap(long = "pkgs-dir")]
    pkgs_dirs: Vec<PathBuf>,

    /// Path to a configuration file.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Plan and print the transaction without fetching or linking.
    #[clap(long)]
    dry_run: bool,

    /// Answer every prompt with yes.
    #[clap(short, long)]
    yes: bool,

    /// Suppress output and progress bars.
    #[clap(short, long)]
    quiet: bool,

    /// Machine-readable output; requires --yes.
    #[clap(long)]
    json: bool,

    /// Keep normal output but disable progress bars.
    #[clap(long)]
    no_progress_bars: bool,
}

pub async fn create(opt: Opt) -> anyhow::Result<()> {
    let mut ctx = Context::load(opt.config.as_deref())?;

    // Command line flags override the configuration file.
    if let Some(prefix) = opt.prefix {
        ctx.target_prefix = prefix;
    }
    if ctx.target_prefix.as_os_str().is_empty() {
        ctx.target_prefix = env::current_dir()?.join(".prefix");
    }
    if !opt.pkgs_dirs.is_empty() {
        ctx.pkgs_dirs = opt.pkgs_dirs;
    }
    if ctx.pkgs_dirs.is_empty() {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| {
                anyhow::anyhow!("could not determine cache directory for current platform")
            })?
            .join("pangolin/pkgs");
        ctx.pkgs_dirs = vec![cache_dir];
    }
    ctx.dry_run |= opt.dry_run;
    ctx.always_yes |= opt.yes;
    ctx.quiet |= opt.quiet;
    ctx.json |= opt.json;
    ctx.no_progress_bars |= opt.no_progress_bars;
    ctx.validate()?;

    // Raise the interrupt flag on ctrl-c; long phases poll it between units
    // of work.
    let interrupt = InterruptFlag::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.interrupt();
            }
        });
    }
    let console = Console::with_multi_progress(global_multi_progress(), &ctx, interrupt.clone());

    fs_err::create_dir_all(&ctx.target_prefix)?;
    if opt.specs.is_empty() {
        console.print(format!(
            "{} Created empty prefix at {}",
            console::style(console::Emoji("✔", "")).green(),
            ctx.target_prefix.display()
        ));
        return Ok(());
    }

    let solution = solve_explicit_specs(&opt.specs)?;
    let caches = MultiCache::new(ctx.pkgs_dirs.clone());
    let mut transaction = Transaction::from_solution(&solution, &caches)?;

    if !transaction.prompt(&ctx, &console) {
        anyhow::bail!("transaction aborted");
    }
    if ctx.dry_run {
        tracing::info!(dry_run = true, prefix = %ctx.target_prefix.display(), "dry run finished");
        return Ok(());
    }

    let cache = caches.first_writable()?;
    let client = reqwest::Client::builder()
        .build()
        .context("failed to create download client")?;
    transaction
        .fetch_extract_packages(cache, &client, &console, &interrupt)
        .await?;
    transaction.execute(&ctx, cache.path(), &console)?;

    console.print(format!(
        "{} Successfully updated {}",
        console::style(console::Emoji("✔", "")).green(),
        ctx.target_prefix.display()
    ));
    Ok(())
}

/// Builds a solved state directly from explicit archive URLs. Explicit
/// installs bypass the dependency solver: every URL becomes one install step,
/// ordered as given. The host's virtual packages are reported as installed.
fn solve_explicit_specs(specs: &[String]) -> anyhow::Result<Solution> {
    let mut pool = Pool::new();
    for pkg in virtual_packages::get_virtual_packages() {
        pool.add_installed(pkg);
    }

    let mut steps = Vec::new();
    for spec in specs {
        let url = Url::parse(spec).with_context(|| {
            format!("'{spec}' is not a package archive URL; only explicit installs are supported")
        })?;
        let pkg = package_from_explicit_url(&url)?;
        let id = pool.add_solvable(pkg);
        steps.push(TransactionStep {
            kind: StepKind::Install,
            solvable: id,
            obsoleted: None,
        });
    }
    Ok(Solution::new(pool, steps, specs.to_vec(), Vec::new()))
}

/// Derives the package metadata from an explicit archive URL of the form
/// `<channel>/<subdir>/<name>-<version>-<build>.<ext>#<checksum>`. The
/// fragment carries the SHA256 (64 hex characters) or, for reusing cached
/// archives, the MD5 (32 hex characters).
fn package_from_explicit_url(url: &Url) -> anyhow::Result<PackageInfo> {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.collect())
        .unwrap_or_default();
    let [channel_segments @ .., subdir, file_name] = segments.as_slice() else {
        anyhow::bail!("'{url}' does not look like <channel>/<subdir>/<filename>");
    };

    let identifier = ArchiveIdentifier::try_from_filename(file_name)
        .with_context(|| format!("'{file_name}' is not a recognized package archive name"))?;

    let mut channel = format!(
        "{}://{}",
        url.scheme(),
        url.host_str().unwrap_or_default()
    );
    if let Some(port) = url.port() {
        channel.push_str(&format!(":{port}"));
    }
    for segment in channel_segments {
        channel.push('/');
        channel.push_str(segment);
    }

    let mut download_url = url.clone();
    download_url.set_fragment(None);

    let mut pkg = PackageInfo {
        name: identifier.name.clone(),
        version: identifier.version.clone(),
        build_string: identifier.build_string.clone(),
        build_number: 0,
        channel,
        subdir: (*subdir).to_string(),
        file_name: (*file_name).to_string(),
        url: download_url.to_string(),
        size: 0,
        timestamp: 0,
        md5: None,
        sha256: None,
        depends: Vec::new(),
        constrains: Vec::new(),
        license: None,
        package_type: Default::default(),
    };

    match url.fragment() {
        Some(fragment) if fragment.len() == 64 => pkg.sha256 = Some(fragment.to_lowercase()),
        Some(fragment) if fragment.len() == 32 => pkg.md5 = Some(fragment.to_lowercase()),
        _ => anyhow::bail!(
            "'{url}' misses its checksum anchor; append '#<sha256>' to the archive URL"
        ),
    }
    Ok(pkg)
}
