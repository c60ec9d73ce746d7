//! Tracing setup: stderr always, plus a per-run log file once the
//! checkpoint directory is known.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

type FileLayer = Box<dyn Layer<Registry> + Send + Sync>;

pub struct LogHandle {
    file_layer: reload::Handle<Option<FileLayer>, Registry>,
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str) -> Result<LogHandle> {
    let level: Level = level.parse().with_context(|| format!("Invalid log level '{level}'"))?;
    let (file_layer, handle) = reload::Layer::new(None::<FileLayer>);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(fmt::layer().without_time().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogHandle { file_layer: handle })
}

impl LogHandle {
    /// Mirror all further log output into `path`, truncating it first.
    pub fn attach_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path).with_context(|| format!("Failed to create log file {}", path.display()))?;
        let layer = fmt::layer().with_ansi(false).with_target(false).with_writer(Mutex::new(file)).boxed();
        self.file_layer.reload(Some(layer)).context("Failed to attach log file")?;
        Ok(())
    }
}
