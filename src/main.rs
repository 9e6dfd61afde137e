use anyhow::Result;
use clap::Parser;
use ihw_backend::config::BackendConfig;
use ihw_backend::{rpc, AppContext};
use tracing::info;

/// Local file-processing backend speaking line-delimited JSON-RPC 2.0
/// over stdin/stdout.
#[derive(Parser)]
#[command(name = "ihatework-backend", version, about)]
struct Args {
    /// Log level filter (e.g. info, debug, ihw_backend=trace)
    #[arg(long, env = "IHW_LOG")]
    log: Option<String>,

    /// Also write logs to this file (daily rolling)
    #[arg(long, env = "IHW_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,

    /// Path to the ffmpeg binary (default: search PATH)
    #[arg(long, env = "FFMPEG_PATH")]
    ffmpeg_path: Option<std::path::PathBuf>,

    /// Path to the ffprobe binary (default: next to ffmpeg, then PATH)
    #[arg(long, env = "FFPROBE_PATH")]
    ffprobe_path: Option<std::path::PathBuf>,

    /// Path to the yt-dlp binary (default: search PATH)
    #[arg(long, env = "YTDLP_PATH")]
    ytdlp_path: Option<std::path::PathBuf>,

    /// Path to the qpdf binary (default: search PATH)
    #[arg(long, env = "QPDF_PATH")]
    qpdf_path: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Init once — must happen before any tracing calls.
    let log_level = args.log.as_deref().unwrap_or("info").to_owned();
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref());

    let config = BackendConfig {
        ffmpeg_path: args.ffmpeg_path,
        ffprobe_path: args.ffprobe_path,
        ytdlp_path: args.ytdlp_path,
        qpdf_path: args.qpdf_path,
    };

    info!(version = env!("CARGO_PKG_VERSION"), "backend starting");
    let ctx = AppContext::new(config);
    rpc::run(ctx).await
}

/// Initialize the tracing subscriber. All console logs go to **stderr**:
/// stdout carries the wire protocol and must stay clean. If `log_file` is
/// set, logs also go to a daily-rolling file; the returned `WorkerGuard`
/// must stay alive for the process lifetime.
///
/// If the log directory cannot be created, falls back to stderr-only
/// logging with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("ihatework-backend.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stderr",
                dir.display()
            );
            tracing_subscriber::fmt()
                .with_env_filter(log_level)
                .with_writer(std::io::stderr)
                .compact()
                .init();
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(EnvFilter::new(log_level))
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .with(fmt::layer().with_writer(non_blocking))
            .init();

        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .with_writer(std::io::stderr)
            .compact()
            .init();
        None
    }
}
