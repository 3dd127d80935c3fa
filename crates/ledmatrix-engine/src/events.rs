use std::path::PathBuf;

use crossbeam_channel::Sender;

/// Why a scene stopped being displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `render()` returned false.
    Finished,
    /// The scene's duration elapsed.
    DurationElapsed,
    /// `skip_image` was raised.
    Skipped,
    /// Process shutdown.
    Interrupted,
    /// The config changed and the active preset is being reloaded.
    Reload,
    /// `render()` failed or panicked.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A plugin module (or in-process plugin) was registered.
    PluginLoaded { name: String, path: Option<PathBuf> },

    /// A plugin module could not be loaded and was skipped.
    PluginFailed { path: PathBuf, error: String },

    PluginUnloaded { name: String },

    /// The render loop switched to a preset.
    PresetActivated { id: String, scheduled: bool },

    SceneStarted { preset: String, scene: String, uuid: String },

    SceneStopped { scene: String, uuid: String, reason: StopReason },

    /// A scene errored and was replaced by the fallback scene.
    SceneFailed { scene: String, uuid: String, error: String },

    ConfigSaved { path: PathBuf },

    ConfigSaveFailed { path: PathBuf, error: String },
}

/// Optional fan-out for runtime events. Sending never blocks and never fails the caller.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<EngineEvent>>,
}

impl EventSink {
    pub fn new(tx: Sender<EngineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(event);
        }
    }
}
