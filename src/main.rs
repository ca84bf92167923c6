use farcaster_watcher::config::{self, Config, Settings, DEFAULT_CONFIG_FILE, DEFAULT_LOG_FILE};
use farcaster_watcher::feed::neynar::NeynarFeed;
use farcaster_watcher::notify::telegram::TelegramNotifier;
use farcaster_watcher::retry::RetryPolicy;
use farcaster_watcher::shutdown::{self, Shutdown};
use farcaster_watcher::store::SeenStore;
use farcaster_watcher::watcher::Watcher;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Log to stderr and append to `log_file`. Falls back to stderr alone if
/// the file cannot be opened.
fn init_logging(log_file: &Path) {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("farcaster_watcher=info"))
    };

    let opened = log_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)
        });

    match opened {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .init();
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .init();
            tracing::warn!(path = %log_file.display(), error = %e, "cannot open log file, logging to stderr only");
        }
    }
}

/// Prompt on a plain thread so a blocked stdin read never holds up exit.
async fn prompt_for_fid(mut shutdown: Shutdown) -> std::io::Result<Option<u64>> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let _ = tx.send(config::prompt_fid(stdin.lock(), std::io::stdout()));
    });
    tokio::select! {
        answer = rx => answer.unwrap_or(Ok(None)),
        _ = shutdown.requested() => Ok(None),
    }
}

fn print_banner(settings: &Settings, fid: u64, log_file: &Path) {
    let watch = &settings.config.watch;
    println!();
    println!("  Farcaster Watcher v{}", env!("CARGO_PKG_VERSION"));
    println!("  ========================");
    println!();
    println!("  Watching FID : {}", fid);
    println!("  Interval     : {} sec", watch.poll_interval_s);
    println!("  Last N casts : {}", watch.last_n);
    println!("  Output       : Telegram chat {}", settings.credentials.telegram_chat_id);
    println!("  Log file     : {}", log_file.display());
    println!("  Data file    : {}", watch.seen_file.display());
    println!();
    println!("  Press Ctrl+C to stop gracefully");
    println!();
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load saved keys from .env (real env vars take precedence)
    Config::load_env_file();

    let log_file = PathBuf::from(std::env::var("LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string()));
    init_logging(&log_file);

    let config_path =
        PathBuf::from(std::env::var("WATCHER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string()));
    let args: Vec<String> = std::env::args().skip(1).collect();

    let settings = match Settings::resolve(&config_path, &args, |key| std::env::var(key).ok()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("configuration errors found ({}):", e);
            for item in e.errors() {
                tracing::error!("  - {}", item);
            }
            tracing::error!("please check your .env file, {} or environment variables", config_path.display());
            return ExitCode::FAILURE;
        }
    };

    let (trigger, shutdown) = shutdown::channel();
    let _signals = shutdown::listen_for_signals(trigger);

    let fid = match settings.fid {
        Some(fid) => fid,
        None => match prompt_for_fid(shutdown.clone()).await {
            Ok(Some(fid)) => fid,
            Ok(None) => {
                tracing::info!("exiting by user request");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read FID from stdin");
                return ExitCode::FAILURE;
            }
        },
    };

    let config = &settings.config;
    let retry = RetryPolicy::from_config(&config.retry);
    let creds = &settings.credentials;

    let feed = match NeynarFeed::new(creds.neynar_api_key.clone(), &config.neynar, retry.clone()) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    let notifier = match TelegramNotifier::new(
        creds.telegram_bot_token.clone(),
        creds.telegram_chat_id.clone(),
        &config.telegram,
        retry,
    ) {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = SeenStore::new(config.watch.seen_file.clone());
    let mut watcher = Watcher::new(feed, notifier, store, fid, &config.watch, shutdown);

    print_banner(&settings, fid, &log_file);

    let summary = watcher.run().await;
    tracing::info!(
        delivered = summary.delivered,
        seen = summary.seen,
        "farcaster watcher stopped"
    );
    ExitCode::SUCCESS
}
