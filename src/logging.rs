use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter (e.g. `asset_cache=debug`).
const LOG_ENV: &str = "ASSET_CACHE_LOG";

/// Install the global subscriber: stderr always, plus a daily-rolling file
/// when `log_dir` is set. Keep the returned guard alive until exit so the
/// file writer is flushed.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
  let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

  match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "asset-cache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

      Ok(None)
    }
  }
}

/// Route logs through the test harness; repeated calls are no-ops.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_test_writer()
    .try_init();
}
