use once_cell::sync::OnceCell;
use storefront_core::util::{env_bool, env_string};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// How often the rolling feed log starts a new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

impl Rotation {
    /// Unknown values fall back to daily.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        }
    }
}

/// Rolling file settings read from `STOREFRONT_LOG_*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLog {
    pub dir: String,
    pub prefix: String,
    pub rotation: Rotation,
}

impl FileLog {
    /// `None` unless `STOREFRONT_LOG_ROLL` is switched on.
    pub fn from_env() -> Option<Self> {
        if !env_bool("STOREFRONT_LOG_ROLL").unwrap_or(false) {
            return None;
        }
        Some(Self {
            dir: env_string("STOREFRONT_LOG_DIR").unwrap_or_else(|| "logs".to_string()),
            prefix: env_string("STOREFRONT_LOG_PREFIX").unwrap_or_else(|| "feed".to_string()),
            rotation: Rotation::parse(
                &env_string("STOREFRONT_LOG_ROTATION").unwrap_or_else(|| "daily".into()),
            ),
        })
    }

    fn writer(&self) -> tracing_appender::rolling::RollingFileAppender {
        if std::fs::create_dir_all(&self.dir).is_err() {
            tracing::warn!(directory = %self.dir, "failed to create feed log directory");
        }
        match self.rotation {
            Rotation::Hourly => tracing_appender::rolling::hourly(&self.dir, &self.prefix),
            Rotation::Minutely => tracing_appender::rolling::minutely(&self.dir, &self.prefix),
            Rotation::Daily => tracing_appender::rolling::daily(&self.dir, &self.prefix),
        }
    }
}

/// Install the global subscriber: stderr console output filtered by
/// `RUST_LOG` (default `info`), plus an optional rolling file that records
/// the controller's own events.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(console.with_filter(filter));
    match FileLog::from_env() {
        Some(file) => {
            let (nb, guard) = tracing_appender::non_blocking(file.writer());
            let _ = FILE_GUARD.set(guard);
            let targets = Targets::new()
                .with_target("storefront_core", tracing::Level::DEBUG)
                .with_target("storefront", tracing::Level::INFO);
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(nb)
                .with_filter(targets);
            let _ = registry.with(file_layer).try_init();
        }
        None => {
            let _ = registry.try_init();
        }
    }
}
