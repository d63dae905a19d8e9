use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::Parser;
use feedwatch::config::{self, Config, Overrides};
use feedwatch::monitor::{Consumer, Generation, Monitor};
use feedwatch::util::{fit_width, single_line};
use feedwatch::{Article, HttpFetcher, WorkingSet};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Columns allotted to an article title in plain output.
const TITLE_WIDTH: usize = 96;

#[derive(Parser, Debug)]
#[command(
    name = "feedwatch",
    version,
    about = "Watch RSS/Atom feeds and print new articles as they appear"
)]
struct Args {
    /// Config file (default: ~/.config/feedwatch/config.toml or ~/.feedwatch.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Comma separated list of feed URLs, added to those in the config file
    #[arg(short = 'n', long, value_name = "URLS", value_delimiter = ',')]
    feeds: Vec<String>,

    /// Refresh interval in seconds
    #[arg(short, long, value_name = "SECS")]
    interval: Option<u64>,

    /// Oldest date to fetch news ("YYYY-MM-DD" or "YYYY-MM-DD HH:MM:SS")
    #[arg(short, long, value_name = "DATE", value_parser = parse_last_date)]
    last_date: Option<DateTime<Utc>>,

    /// Number of concurrent fetch workers (1-8)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Print each article as a JSON line
    #[arg(long)]
    json: bool,

    /// Write debug logs to feedwatch-log-YYYY-MM-DD.log
    #[arg(long)]
    debug: bool,
}

fn parse_last_date(s: &str) -> Result<DateTime<Utc>, String> {
    config::parse_date(s).map_err(|e| e.to_string())
}

/// Log destination shared with the subscriber. Starts on stderr and moves
/// to the dated debug file once the config asks for it.
#[derive(Clone, Default)]
struct LogSink {
    file: Arc<Mutex<Option<File>>>,
}

impl LogSink {
    fn redirect(&self, file: File) {
        *self.file.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
    }
}

enum LogWriter<'a> {
    Stderr(io::Stderr),
    File(MutexGuard<'a, Option<File>>),
}

impl Write for LogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogWriter::Stderr(w) => w.write(buf),
            LogWriter::File(guard) => match guard.as_mut() {
                Some(file) => file.write(buf),
                None => io::stderr().write(buf),
            },
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogWriter::Stderr(w) => w.flush(),
            LogWriter::File(guard) => match guard.as_mut() {
                Some(file) => file.flush(),
                None => Ok(()),
            },
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        let guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            LogWriter::File(guard)
        } else {
            LogWriter::Stderr(io::stderr())
        }
    }
}

/// Install the tracing subscriber on `sink`, filtered by `RUST_LOG`.
///
/// Returns a function that swaps the filter, used when debug logging is
/// switched on by the config file.
fn init_logging(sink: LogSink) -> impl Fn(EnvFilter) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_writer(sink)
        .with_filter_reloading();
    let handle = builder.reload_handle();
    builder.init();

    move |filter| {
        handle
            .reload(filter)
            .context("Failed to reload log filter")
    }
}

/// Open `feedwatch-log-YYYY-MM-DD.log` in `dir` for appending.
fn open_debug_log(dir: &Path) -> Result<File> {
    let path = dir.join(format!(
        "feedwatch-log-{}.log",
        Local::now().format("%Y-%m-%d")
    ));
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to create log file '{}'", path.display()))
}

fn load_config(args: &Args) -> Result<Config> {
    let path = args.config.clone().or_else(Config::discover);
    let mut config = match &path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    config.apply(Overrides {
        feeds: args
            .feeds
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect(),
        refresh_interval_secs: args.interval,
        last_date: args.last_date,
        workers: args.workers,
        debug: args.debug,
    });
    config.validate()?;
    Ok(config)
}

fn format_article(article: &Article, json: bool) -> Result<String> {
    if json {
        return serde_json::to_string(article).context("Failed to serialize article");
    }
    let time = article.published.with_timezone(&Local).format("%H:%M");
    let source = single_line(&article.source_title);
    let title = single_line(&article.title);
    Ok(format!(
        "{}  [{}] {}",
        time,
        source,
        fit_width(&title, TITLE_WIDTH)
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let sink = LogSink::default();
    let set_filter = init_logging(sink.clone());

    let config = load_config(&args)?;
    if config.debug {
        sink.redirect(open_debug_log(Path::new("."))?);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("feedwatch=debug"));
        set_filter(filter)?;
        tracing::debug!(feeds = config.feeds.len(), "Debug logging enabled");
    }

    let monitor_config = config.monitor_config(Utc::now());
    eprintln!(
        "Watching {} feeds every {}s (articles since {})",
        monitor_config.sources.len(),
        monitor_config.refresh_interval.as_secs(),
        monitor_config.window.lower_bound().with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );

    // The consumer runs on the dispatcher; hand articles to this task, which
    // is the only writer of the working set.
    let (article_tx, mut article_rx) = mpsc::unbounded_channel::<(Article, Generation)>();
    let consumer: Consumer = Arc::new(move |article, generation| {
        if article_tx.send((article, generation)).is_err() {
            tracing::debug!("Article receiver dropped");
        }
    });

    let fetcher = HttpFetcher::new().context("Failed to build HTTP client")?;
    let mut monitor = Monitor::new(monitor_config, Arc::new(fetcher), consumer);
    let mut errors = monitor
        .take_errors()
        .context("Error sink already claimed")?;
    let generation = monitor.start().await?;

    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt())?;

    let mut working_set = WorkingSet::new();
    let stdout = std::io::stdout();

    loop {
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        #[cfg(unix)]
        let sigint_fut = sigint.recv();
        #[cfg(not(unix))]
        let sigint_fut = tokio::signal::ctrl_c();

        tokio::select! {
            biased;

            _ = sigterm_fut => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                break;
            }

            _ = sigint_fut => {
                tracing::info!("Received SIGINT, shutting down gracefully");
                break;
            }

            Some((article, article_generation)) = article_rx.recv() => {
                if article_generation != generation || working_set.contains(&article) {
                    continue;
                }
                let line = format_article(&article, args.json)?;
                working_set.insert(article);
                if writeln!(stdout.lock(), "{}", line).is_err() {
                    // Output closed (e.g. piped into `head`)
                    break;
                }
            }

            Some(error) = errors.recv() => {
                eprintln!("error: {}", error);
            }
        }
    }

    monitor.shutdown().await;
    tracing::info!(articles = working_set.len(), "Exiting");
    Ok(())
}
