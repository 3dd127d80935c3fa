//! The persisted `config.json` document and its live, in-memory form.
//!
//! ```json
//! {
//!   "presets": { "<id>": { "scenes": [ {"type", "arguments", "uuid"} ] } },
//!   "curr": "<id>",
//!   "spotify": { "access_token", "refresh_token", "expires_at" },
//!   "pluginConfigs": { "<plugin>": "<opaque string>" },
//!   "schedules": { "<id>": { ... } },
//!   "scheduling_enabled": false
//! }
//! ```
//!
//! Every mutation marks the document dirty and asks the render loop to reload; the autosave
//! thread persists dirty documents with [`MainConfig::save`].

pub mod preset;
pub mod schedule;
pub mod spotify;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Map, Value};

use crate::clock::{LocalClock, LocalTime};
use crate::context::RuntimeFlags;
use crate::envelope::fragment;
use crate::error::{ConfigError, EngineError};
use crate::events::{EngineEvent, EventSink};
use crate::manager::Registry;
use crate::paths::{load_json_value, write_json_atomic};

pub use preset::{Preset, SharedScene};
pub use schedule::Schedule;
pub use spotify::SpotifyData;

pub const DEFAULT_PRESET: &str = "Default";

/// Parsed contents of `config.json`.
pub struct Root {
    pub presets: BTreeMap<String, Arc<Preset>>,
    pub curr: String,
    pub spotify: SpotifyData,
    pub plugin_configs: BTreeMap<String, String>,
    pub schedules: BTreeMap<String, Schedule>,
    pub scheduling_enabled: bool,
}

fn typed<T: serde::de::DeserializeOwned>(j: &Value, what: &'static str) -> Result<Option<T>, ConfigError> {
    match j.get(what) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| ConfigError::Malformed {
                what,
                reason: e.to_string(),
            }),
    }
}

impl Root {
    pub fn from_json(j: &Value, registry: &Registry) -> Result<Self, ConfigError> {
        if !j.is_object() {
            return Err(ConfigError::Malformed {
                what: "config",
                reason: format!("expected an object, got {}", fragment(j)),
            });
        }

        let presets = match j.get("presets") {
            None | Some(Value::Null) => {
                log::info!(target: "CONFIG", "no presets found; creating '{DEFAULT_PRESET}'");
                BTreeMap::from([(DEFAULT_PRESET.to_string(), Arc::new(Preset::create_default(registry)))])
            }
            Some(Value::Object(map)) => {
                let mut presets = BTreeMap::new();
                for (id, p) in map {
                    let preset = Preset::from_json(p, registry)?;
                    log::debug!(target: "CONFIG", "preset '{id}' with {} scene(s)", preset.len());
                    presets.insert(id.clone(), Arc::new(preset));
                }
                presets
            }
            Some(other) => {
                return Err(ConfigError::MissingField {
                    field: "presets",
                    fragment: fragment(other),
                })
            }
        };

        let curr = match j.get("curr") {
            None | Some(Value::Null) => DEFAULT_PRESET.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(ConfigError::MissingField {
                    field: "curr",
                    fragment: fragment(other),
                })
            }
        };

        let mut schedules: BTreeMap<String, Schedule> = typed(j, "schedules")?.unwrap_or_default();
        for (id, s) in schedules.iter_mut() {
            if s.id.is_empty() {
                s.id = id.clone();
            }
            s.validate()?;
        }

        Ok(Self {
            presets,
            curr,
            spotify: typed(j, "spotify")?.unwrap_or_default(),
            plugin_configs: typed(j, "pluginConfigs")?.unwrap_or_default(),
            schedules,
            scheduling_enabled: typed(j, "scheduling_enabled")?.unwrap_or(false),
        })
    }

    pub fn to_json(&self) -> Value {
        let presets: Map<String, Value> = self
            .presets
            .iter()
            .map(|(id, p)| (id.clone(), p.to_json()))
            .collect();
        json!({
            "presets": presets,
            "curr": self.curr,
            "spotify": self.spotify,
            "pluginConfigs": self.plugin_configs,
            "schedules": self.schedules,
            "scheduling_enabled": self.scheduling_enabled,
        })
    }

    fn active_scheduled_preset_at(&self, at: LocalTime) -> Option<String> {
        if !self.scheduling_enabled {
            return None;
        }
        schedule::active_preset(&self.schedules, at).map(str::to_string)
    }
}

/// The live config: a [`Root`] behind a lock plus the path it is saved to.
pub struct MainConfig {
    path: PathBuf,
    root: RwLock<Root>,
    dirty: AtomicBool,
    flags: Arc<RuntimeFlags>,
    events: EventSink,
}

impl MainConfig {
    /// Load `path`, writing an empty document first when the file does not exist.
    pub fn load(path: impl Into<PathBuf>, registry: &Registry, flags: Arc<RuntimeFlags>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            log::info!(target: "CONFIG", "{} does not exist; creating it", path.display());
            std::fs::write(&path, "{}").map_err(|source| EngineError::Io {
                path: path.clone(),
                source,
            })?;
        }
        let j = load_json_value(&path)?;
        let root = Root::from_json(&j, registry)?;
        log::info!(
            target: "CONFIG",
            "loaded {} ({} preset(s), {} schedule(s), current '{}')",
            path.display(),
            root.presets.len(),
            root.schedules.len(),
            root.curr
        );
        Ok(Self::from_root(path, root, flags))
    }

    pub fn from_root(path: impl Into<PathBuf>, root: Root, flags: Arc<RuntimeFlags>) -> Self {
        Self {
            path: path.into(),
            root: RwLock::new(root),
            dirty: AtomicBool::new(false),
            flags,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Root) -> R) -> R {
        let out = {
            let mut root = self.root.write();
            f(&mut *root)
        };
        self.mark_dirty();
        out
    }

    /// Like `mutate`, but the check and the change happen under one write lock and nothing is
    /// marked dirty when `f` fails.
    fn try_mutate<R>(&self, f: impl FnOnce(&mut Root) -> Result<R, ConfigError>) -> Result<R, ConfigError> {
        let out = {
            let mut root = self.root.write();
            f(&mut *root)?
        };
        self.mark_dirty();
        Ok(out)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.flags.request_reload();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    // presets

    pub fn curr_id(&self) -> String {
        self.root.read().curr.clone()
    }

    pub fn curr(&self) -> Option<Arc<Preset>> {
        let root = self.root.read();
        root.presets.get(&root.curr).cloned()
    }

    pub fn preset(&self, id: &str) -> Option<Arc<Preset>> {
        self.root.read().presets.get(id).cloned()
    }

    pub fn presets(&self) -> BTreeMap<String, Arc<Preset>> {
        self.root.read().presets.clone()
    }

    pub fn preset_ids(&self) -> Vec<String> {
        self.root.read().presets.keys().cloned().collect()
    }

    pub fn set_curr(&self, id: &str) -> Result<(), ConfigError> {
        self.try_mutate(|root| {
            if !root.presets.contains_key(id) {
                return Err(ConfigError::UnknownPreset { id: id.to_string() });
            }
            root.curr = id.to_string();
            Ok(())
        })?;
        log::info!(target: "CONFIG", "current preset is now '{id}'");
        Ok(())
    }

    /// Insert or replace a preset.
    pub fn set_preset(&self, id: &str, preset: Preset) {
        self.mutate(|root| root.presets.insert(id.to_string(), Arc::new(preset)));
    }

    /// Insert a preset under a new id.
    pub fn add_preset(&self, id: &str, preset: Preset) -> Result<(), ConfigError> {
        self.try_mutate(|root| {
            if root.presets.contains_key(id) {
                return Err(ConfigError::PresetExists { id: id.to_string() });
            }
            root.presets.insert(id.to_string(), Arc::new(preset));
            Ok(())
        })
    }

    /// Remove a preset. The current preset cannot be deleted.
    pub fn delete_preset(&self, id: &str) -> Result<(), ConfigError> {
        self.try_mutate(|root| {
            if root.curr == id {
                return Err(ConfigError::PresetInUse { id: id.to_string() });
            }
            root.presets
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| ConfigError::UnknownPreset { id: id.to_string() })
        })
    }

    // spotify

    pub fn spotify(&self) -> SpotifyData {
        self.root.read().spotify.clone()
    }

    pub fn set_spotify(&self, data: SpotifyData) {
        self.mutate(|root| root.spotify = data);
    }

    // plugin configs

    pub fn plugin_configs(&self) -> BTreeMap<String, String> {
        self.root.read().plugin_configs.clone()
    }

    pub fn plugin_config(&self, plugin: &str) -> Option<String> {
        self.root.read().plugin_configs.get(plugin).cloned()
    }

    pub fn set_plugin_config(&self, plugin: &str, value: String) {
        self.mutate(|root| root.plugin_configs.insert(plugin.to_string(), value));
    }

    // schedules

    pub fn schedules(&self) -> BTreeMap<String, Schedule> {
        self.root.read().schedules.clone()
    }

    pub fn schedule(&self, id: &str) -> Option<Schedule> {
        self.root.read().schedules.get(id).cloned()
    }

    pub fn set_schedule(&self, schedule: Schedule) -> Result<(), ConfigError> {
        if schedule.id.is_empty() {
            return Err(ConfigError::InvalidSchedule {
                id: String::new(),
                reason: "id must not be empty".into(),
            });
        }
        schedule.validate()?;
        self.mutate(|root| root.schedules.insert(schedule.id.clone(), schedule));
        Ok(())
    }

    pub fn delete_schedule(&self, id: &str) -> Result<(), ConfigError> {
        self.try_mutate(|root| {
            root.schedules
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| ConfigError::UnknownSchedule { id: id.to_string() })
        })
    }

    pub fn is_scheduling_enabled(&self) -> bool {
        self.root.read().scheduling_enabled
    }

    pub fn set_scheduling_enabled(&self, enabled: bool) {
        self.mutate(|root| root.scheduling_enabled = enabled);
    }

    /// Preset chosen by the most specific active schedule, or `None` when scheduling is off or
    /// nothing matches.
    pub fn active_scheduled_preset_at(&self, at: LocalTime) -> Option<String> {
        self.root.read().active_scheduled_preset_at(at)
    }

    pub fn active_scheduled_preset(&self, clock: &LocalClock) -> Option<String> {
        self.active_scheduled_preset_at(clock.now())
    }

    /// The scheduled preset when one is active, otherwise `curr`.
    pub fn effective_preset_id_at(&self, at: LocalTime) -> (String, bool) {
        let root = self.root.read();
        match root.active_scheduled_preset_at(at) {
            Some(id) => (id, true),
            None => (root.curr.clone(), false),
        }
    }

    pub fn effective_preset_id(&self, clock: &LocalClock) -> (String, bool) {
        self.effective_preset_id_at(clock.now())
    }

    // persistence

    pub fn to_json(&self) -> Value {
        self.root.read().to_json()
    }

    /// Write the document to disk. Failures are logged and reported, never propagated, and the
    /// document stays dirty so the next autosave retries.
    pub fn save(&self) -> bool {
        self.dirty.store(false, Ordering::SeqCst);
        let j = self.to_json();
        match write_json_atomic(&self.path, &j) {
            Ok(()) => {
                log::debug!(target: "CONFIG", "saved {}", self.path.display());
                self.events.emit(EngineEvent::ConfigSaved {
                    path: self.path.clone(),
                });
                true
            }
            Err(e) => {
                log::error!(target: "CONFIG", "could not save config: {e}");
                self.dirty.store(true, Ordering::SeqCst);
                self.events.emit(EngineEvent::ConfigSaveFailed {
                    path: self.path.clone(),
                    error: e.to_string(),
                });
                false
            }
        }
    }
}
