use anyhow::Result;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc::channel;
use std::time::Duration;
use tracing::{error, info};

/// Watches the configuration file and invokes a reload callback on change.
/// The watcher thread lives as long as this struct is held.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    pub fn new<F>(paths: Vec<String>, on_change: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (tx, rx) = channel();

        let mut watcher = RecommendedWatcher::new(tx, Config::default())?;

        for path in &paths {
            if Path::new(path).exists() {
                watcher.watch(Path::new(path), RecursiveMode::NonRecursive)?;
                info!("Watching configuration path: {}", path);
            } else {
                tracing::warn!("Configuration path does not exist, skipping: {}", path);
            }
        }

        std::thread::spawn(move || loop {
            match rx.recv() {
                Ok(Ok(_event)) => {
                    // Editors often write in several bursts; settle briefly
                    std::thread::sleep(Duration::from_millis(100));
                    info!("Configuration change detected, reloading...");
                    on_change();
                }
                Ok(Err(e)) => error!("Watch error: {:?}", e),
                Err(e) => {
                    error!("Watch channel error: {:?}", e);
                    break;
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}
