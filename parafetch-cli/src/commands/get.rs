//! Get command - download one or more URLs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use console::{style, Term};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};
use indicatif::HumanBytes;
use parafetch::config::{parse_size, ConfigFile};
use parafetch::{
    Choice, Cookie, DestinationChooser, DownloadError, DownloadOptions, Downloader, Outcome,
};
use tracing::{debug, warn};

use crate::error::CliError;
use crate::ui::TransferBar;

/// Arguments for the get command.
#[derive(Debug, Args)]
pub struct GetArgs {
    /// URLs to download (http, https or ftp)
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Directory to save into
    #[arg(short, long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Prefix for saved file names
    #[arg(long)]
    pub prefix: Option<String>,

    /// Maximum parallel connections per download
    #[arg(short = 't', long, value_name = "N", value_parser = parse_threads)]
    pub threads: Option<usize>,

    /// Smallest range given to one connection (e.g. 512K, 4M)
    #[arg(long, value_name = "SIZE", value_parser = parse_chunk_size)]
    pub min_chunk: Option<u64>,

    /// Replace existing files instead of saving as name(N).ext
    #[arg(long)]
    pub overwrite: bool,

    /// Cookie sent with every request (repeatable)
    #[arg(short = 'c', long = "cookie", value_name = "NAME=VALUE")]
    pub cookies: Vec<Cookie>,

    /// Time budget for each download, in seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Ask where to save each file before downloading
    #[arg(long)]
    pub ask: bool,

    /// Use one plain request instead of parallel ranges
    #[arg(long)]
    pub single: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

fn parse_threads(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!("'{}' is not a positive number of threads", s)),
    }
}

fn parse_chunk_size(s: &str) -> Result<u64, String> {
    match parse_size(s) {
        Some(n) if n > 0 => Ok(n),
        _ => Err(format!("'{}' is not a size like 512K or 4M", s)),
    }
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Build job options: CLI > config file > defaults.
pub fn resolve_options(args: &GetArgs, config: &ConfigFile) -> DownloadOptions {
    let mut options = config.apply(DownloadOptions::default());

    if let Some(dir) = &args.dir {
        options.dir = dir.clone();
    }
    options.dir = expand_home(&options.dir);
    if let Some(prefix) = &args.prefix {
        options.file_name_prefix = prefix.clone();
    }
    if let Some(threads) = args.threads {
        options.max_workers = threads;
    }
    if let Some(size) = args.min_chunk {
        options.min_chunk_size = size;
    }
    if args.overwrite {
        options.overwrite = true;
    }
    if let Some(secs) = args.timeout {
        options.timeout = Duration::from_secs(secs);
    }
    options.confirm_destination = args.ask;
    options.cookies.extend(args.cookies.iter().cloned());

    options
}

/// Interactive chooser used with `--ask`.
struct PromptChooser {
    bar: Arc<TransferBar>,
}

impl DestinationChooser for PromptChooser {
    fn choose(&self, suggested: &Path) -> Choice {
        self.bar.suspend(|| match prompt_destination(suggested) {
            Ok(choice) => choice,
            Err(e) => {
                warn!(error = %e, "Prompt failed, skipping download");
                Choice::Declined
            }
        })
    }
}

fn prompt_destination(suggested: &Path) -> dialoguer::Result<Choice> {
    let theme = ColorfulTheme::default();

    let proceed = Confirm::with_theme(&theme)
        .with_prompt(format!("Download to {}?", suggested.display()))
        .default(true)
        .interact()?;
    if !proceed {
        return Ok(Choice::Declined);
    }

    let path: String = Input::with_theme(&theme)
        .with_prompt("Save as")
        .with_initial_text(suggested.display().to_string())
        .allow_empty(true)
        .interact_text()?;
    Ok(to_choice(&path))
}

fn to_choice(input: &str) -> Choice {
    let input = input.trim();
    if input.is_empty() {
        Choice::Declined
    } else {
        Choice::Accepted(expand_home(Path::new(input)))
    }
}

/// Run the get command.
pub fn run(args: GetArgs, config_path: Option<&Path>) -> Result<(), CliError> {
    let config = match config_path {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    let options = resolve_options(&args, &config);
    debug!(
        dir = %options.dir.display(),
        workers = options.max_workers,
        min_chunk = options.min_chunk_size,
        timeout_secs = options.timeout.as_secs(),
        "Resolved download options"
    );

    let bar = Arc::new(TransferBar::new(
        !args.no_progress && Term::stderr().is_term(),
    ));
    let reporter = Arc::clone(&bar);
    let mut downloader = Downloader::new(options)?.on_progress(move |p| reporter.update(p));
    if args.ask {
        downloader = downloader.with_chooser(PromptChooser {
            bar: Arc::clone(&bar),
        });
    }

    let token = downloader.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received interrupt, cancelling...");
        token.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let total = args.urls.len();
    let mut failed = 0;

    for url in &args.urls {
        bar.begin(url);
        let result = if args.single {
            downloader.download_single(url)
        } else {
            downloader.download(url)
        };
        bar.finish();

        match result {
            Ok(Outcome::Completed { path, bytes }) => {
                println!(
                    "{} {} ({})",
                    style("✓").green(),
                    path.display(),
                    HumanBytes(bytes)
                );
            }
            Ok(Outcome::Cancelled) => {
                println!("{} {} skipped", style("-").yellow(), url);
            }
            Err(DownloadError::Interrupted) => return Err(CliError::Interrupted),
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", style("✗").red(), url, e);
            }
        }
    }

    if failed > 0 {
        return Err(CliError::Failed { failed, total });
    }
    Ok(())
}
