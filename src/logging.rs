//! stderr logging. Installed at INFO before the settings file is read, then
//! narrowed or widened to the configured level.

use tracing::{Level, Subscriber, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

pub struct LogHandle(reload::Handle<EnvFilter, Registry>);

pub fn init() -> LogHandle {
    let (subscriber, handle) = build(std::io::stderr);
    subscriber.init();
    handle
}

fn build<W>(writer: W) -> (impl Subscriber + Send + Sync + 'static, LogHandle)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter, handle) = reload::Layer::new(filter_for(Level::INFO));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_target(false));
    (subscriber, LogHandle(handle))
}

impl LogHandle {
    /// `RUST_LOG` directives keep applying on top of `level`.
    pub fn set_level(&self, level: &str) {
        if let Err(e) = self.0.reload(filter_for(parse_level(level))) {
            warn!("failed to apply log level {level}: {e}");
        }
    }
}

/// Unknown names fall back to INFO.
pub fn parse_level(level: &str) -> Level {
    level.parse().unwrap_or_else(|_| {
        warn!("unknown log level {level:?}, using info");
        Level::INFO
    })
}

fn filter_for(level: Level) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(level.into())
}
