use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    filter::Directive,
    fmt::{format::Writer, format::FmtSpan, time::FormatTime},
    EnvFilter,
};

/// Log target prefix of every span and event this crate emits.
pub const LOG_TARGET: &str = "bulk_upsert";

struct UtcTimer;

impl FormatTime for UtcTimer {
    fn format_time(&self, writer: &mut Writer<'_>) -> std::fmt::Result {
        write!(writer, "{}", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

fn crate_directive(log_level: LevelFilter) -> Option<Directive> {
    format!("{}={}", LOG_TARGET, log_level).parse().ok()
}

/// Installs a global fmt subscriber logging this crate at `log_level` and
/// everything else at WARN, unless `RUST_LOG` says otherwise. Closed
/// `upsert` spans are logged with their timing.
///
/// Returns `false` when a global subscriber was already installed.
pub fn setup_logger(log_level: LevelFilter) -> bool {
    let mut filter =
        EnvFilter::builder().with_default_directive(LevelFilter::WARN.into()).from_env_lossy();
    if let Some(directive) = crate_directive(log_level) {
        filter = filter.add_directive(directive);
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTimer)
        .with_span_events(FmtSpan::CLOSE)
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}

pub fn setup_info_logger() -> bool {
    setup_logger(LevelFilter::INFO)
}
