//! Configuration file watcher for hot-reloading suspension intervals.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};
use tracing::{info, warn};

use keepup_scheduler::SuspensionScheduler;

/// Start watching the config file for changes.
/// Returns a JoinHandle that can be used to abort the watcher.
pub fn start_config_watcher(
    suspension: Arc<SuspensionScheduler>,
) -> Option<tokio::task::JoinHandle<()>> {
    let config_path = match keepup_config::config_file_path() {
        Ok(p) => p,
        Err(e) => {
            warn!("Cannot resolve config path for watching: {e}");
            return None;
        }
    };

    let watch_dir = match config_path.parent() {
        Some(dir) if dir.exists() => dir.to_path_buf(),
        Some(dir) => {
            info!(
                "Config directory {} does not exist yet, skipping watcher",
                dir.display()
            );
            return None;
        }
        None => return None,
    };

    let handle = tokio::task::spawn_blocking(move || {
        run_watcher(watch_dir, config_path, suspension);
    });

    Some(handle)
}

fn run_watcher(watch_dir: PathBuf, config_path: PathBuf, suspension: Arc<SuspensionScheduler>) {
    let (tx, rx) = std::sync::mpsc::channel();

    let mut debouncer = match new_debouncer(Duration::from_secs(1), tx) {
        Ok(d) => d,
        Err(e) => {
            warn!("Failed to create file watcher: {e}");
            return;
        }
    };

    if let Err(e) = debouncer
        .watcher()
        .watch(&watch_dir, notify::RecursiveMode::NonRecursive)
    {
        warn!("Failed to watch config directory: {e}");
        return;
    }

    info!("Config watcher started: watching {}", watch_dir.display());

    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let config_changed = events.iter().any(|event| {
                    event.kind == DebouncedEventKind::Any && event.path == config_path
                });

                if config_changed {
                    info!("Config file changed, reloading suspension intervals");
                    reload_suspension(&config_path, &suspension);
                }
            }
            Ok(Err(e)) => {
                warn!("Config watcher error: {e:?}");
            }
            Err(_) => {
                info!("Config watcher channel closed, stopping");
                break;
            }
        }
    }
}

/// Apply the suspension section of the config at `config_path`.
/// Other sections take effect on the next start.
fn reload_suspension(config_path: &Path, suspension: &SuspensionScheduler) {
    match keepup_config::load_config_from(config_path) {
        Ok(config) => {
            let intervals = config.suspension.active_intervals();
            info!("Suspension intervals reloaded: {} active", intervals.len());
            suspension.set_intervals(intervals);
        }
        Err(e) => {
            warn!("Failed to reload config: {e}");
        }
    }
}
