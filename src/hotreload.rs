//! Plugin directory watcher
//!
//! We watch the plugin **directory** (not individual libraries) because installing a plugin is
//! usually copy-into-temp + rename, and removing one deletes the whole folder. Any event only
//! marks the directory dirty; the owner thread rescans once events go quiet and then loads new
//! plugin folders and unloads vanished ones.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use ledmatrix_engine::manager::plugin_library_in;
use ledmatrix_engine::{PluginManager, RuntimeFlags};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::{logi, logw};

const TAG: &str = "HOTRELOAD";

/// Quiet period before a burst of file events is acted on.
const SETTLE: Duration = Duration::from_millis(500);

pub struct PluginWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<()>,
}

impl PluginWatcher {
    pub fn new(dir: &Path) -> anyhow::Result<Self> {
        let (tx, rx) = unbounded::<()>();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if res.is_ok() {
                    let _ = tx.send(());
                }
            },
            Config::default().with_poll_interval(Duration::from_millis(250)),
        )?;
        watcher.watch(dir, RecursiveMode::Recursive)?;
        Ok(Self { _watcher: watcher, rx })
    }

    /// Block until a burst of changes has settled. `false` when the watcher is gone or
    /// `flags` asked the runtime to stop.
    pub fn wait_for_change(&self, flags: &RuntimeFlags) -> bool {
        loop {
            match self.rx.recv_timeout(Duration::from_millis(200)) {
                Ok(()) => break,
                Err(RecvTimeoutError::Timeout) if flags.is_interrupted() => return false,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        // drain until quiet
        loop {
            match self.rx.recv_timeout(SETTLE) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => return true,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}

/// Plugin folders the watcher has seen, by folder path.
#[derive(Debug, Default)]
pub struct PluginDirState {
    known: BTreeMap<PathBuf, String>,
}

impl PluginDirState {
    /// Record folders whose plugins are already loaded.
    pub fn scan(manager: &PluginManager) -> Self {
        let mut known = BTreeMap::new();
        for dir in plugin_dirs(manager.plugin_dir()) {
            if let Some(name) = manager.plugin_at(&dir) {
                known.insert(dir, name);
            }
        }
        Self { known }
    }

    /// Load new folders and unload vanished ones. Returns `(loaded, unloaded)`.
    pub fn sync(&mut self, manager: &PluginManager) -> (usize, usize) {
        let present = plugin_dirs(manager.plugin_dir());

        let gone: Vec<PathBuf> = self
            .known
            .keys()
            .filter(|d| !present.contains(d) || plugin_library_in(d).is_none())
            .cloned()
            .collect();
        let mut unloaded = 0;
        for dir in gone {
            if let Some(name) = self.known.remove(&dir) {
                match manager.unload_plugin(&name) {
                    Ok(()) => unloaded += 1,
                    Err(e) => logw!(TAG, "unload '{name}': {e}"),
                }
            }
        }

        let mut loaded = 0;
        for dir in present {
            if self.known.contains_key(&dir) {
                continue;
            }
            let Some(lib) = plugin_library_in(&dir) else {
                continue;
            };
            match manager.load_plugin(&lib) {
                Ok(name) => {
                    self.known.insert(dir, name);
                    loaded += 1;
                }
                Err(e) => logw!(TAG, "load {}: {e}", lib.display()),
            }
        }
        (loaded, unloaded)
    }
}

fn plugin_dirs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Watch loop for the `plugin-watcher` thread.
pub fn run(watcher: PluginWatcher, manager: Arc<PluginManager>, flags: Arc<RuntimeFlags>) {
    let mut state = PluginDirState::scan(&manager);
    logi!(TAG, "watching {} ({} plugin folders)", manager.plugin_dir().display(), state.known.len());
    while watcher.wait_for_change(&flags) {
        let (loaded, unloaded) = state.sync(&manager);
        if loaded + unloaded > 0 {
            logi!(TAG, "plugins changed: +{loaded} -{unloaded}");
            flags.request_reload();
        }
    }
}
