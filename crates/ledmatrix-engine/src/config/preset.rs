use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::envelope::{fragment, instance_to_json, scene_from_json};
use crate::error::ConfigError;
use crate::manager::Registry;
use crate::scene::Scene;
use crate::wrapper::SceneInstance;

/// A scene shared between the render thread and config readers. The render loop locks it
/// per frame, never for a whole activation.
pub type SharedScene = Arc<Mutex<SceneInstance>>;

/// Ordered list of live scenes.
pub struct Preset {
    scenes: Vec<SharedScene>,
}

impl Preset {
    pub fn new(scenes: Vec<SceneInstance>) -> Self {
        Self {
            scenes: scenes.into_iter().map(|s| Arc::new(Mutex::new(s))).collect(),
        }
    }

    /// One default-configured scene per registered scene type.
    pub fn create_default(registry: &Registry) -> Self {
        let mut scenes = Vec::new();
        for wrapper in registry.scenes.all() {
            match wrapper.instantiate(&json!({})) {
                Ok(scene) => {
                    log::debug!(target: "CONFIG", "creating default scene '{}'", wrapper.name());
                    scenes.push(scene);
                }
                Err(e) => log::warn!(target: "CONFIG", "no default for scene '{}': {e}", wrapper.name()),
            }
        }
        if scenes.is_empty() {
            log::warn!(target: "CONFIG", "no scene types registered; default preset is empty");
        }
        Self::new(scenes)
    }

    /// Parse `{"scenes": [...]}`. A missing or empty list yields the default preset.
    pub fn from_json(j: &Value, registry: &Registry) -> Result<Self, ConfigError> {
        let items = match j.get("scenes") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(items),
            Some(_) => {
                return Err(ConfigError::MissingField {
                    field: "scenes",
                    fragment: fragment(j),
                })
            }
        };
        match items {
            Some(items) if !items.is_empty() => {
                let scenes = items
                    .iter()
                    .map(|item| scene_from_json(item, registry))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::new(scenes))
            }
            _ => {
                log::info!(target: "CONFIG", "preset has no scenes; adding defaults");
                Ok(Self::create_default(registry))
            }
        }
    }

    pub fn to_json(&self) -> Value {
        let scenes: Vec<Value> = self
            .scenes
            .iter()
            .map(|s| instance_to_json::<dyn Scene>(&**s.lock()))
            .collect();
        json!({ "scenes": scenes })
    }

    pub fn scenes(&self) -> &[SharedScene] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use crate::manager::{PluginManager, Registry};
    use crate::plugin::BasicPlugin;
    use crate::scene::testing::{Behavior, Probe, TestScene};
    use crate::wrapper::SceneWrapper;

    pub struct TwoScenes;

    impl BasicPlugin for TwoScenes {
        fn create_scenes(&self) -> Vec<SceneWrapper> {
            ["fire", "clock"]
                .into_iter()
                .map(|name| SceneWrapper::scene(move || TestScene::new(name, Behavior::Forever, Arc::new(Probe::default()))))
                .collect()
        }
    }

    pub fn registry() -> Arc<Registry> {
        manager().registry()
    }

    pub fn manager() -> PluginManager {
        let manager = PluginManager::new("unused");
        manager
            .register_static("fixture", Box::new(TwoScenes))
            .expect("fixture registers");
        manager
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::fixtures::registry;
    use super::*;

    #[test]
    fn test_round_trip_keeps_uuids_and_values() {
        let registry = registry();
        let input = json!({"scenes": [
            {"type": "fire", "arguments": {"weight": 2, "duration": 15000, "speed": 7}, "uuid": "a"},
            {"type": "clock", "arguments": {"color": 0x112233}},
        ]});
        let preset = Preset::from_json(&input, &registry).unwrap();
        let dumped = preset.to_json();
        let again = Preset::from_json(&dumped, &registry).unwrap();

        assert_eq!(again.len(), 2);
        for (a, b) in preset.scenes().iter().zip(again.scenes()) {
            let (a, b) = (a.lock(), b.lock());
            assert_eq!(a.name(), b.name());
            assert_eq!(a.base().uuid(), b.base().uuid());
            assert_eq!(a.to_json(), b.to_json());
        }
        assert_eq!(dumped["scenes"][0]["uuid"], json!("a"));
        assert_eq!(again.scenes()[0].lock().duration(), 15000);
    }

    #[test]
    fn test_empty_preset_gets_defaults() {
        let registry = registry();
        let preset = Preset::from_json(&json!({}), &registry).unwrap();
        assert_eq!(preset.len(), 2);
        let preset = Preset::from_json(&json!({"scenes": []}), &registry).unwrap();
        assert_eq!(preset.len(), 2);
    }

    #[test]
    fn test_bad_scene_fails_whole_preset() {
        let registry = registry();
        let input = json!({"scenes": [{"type": "fire"}, {"type": "starfield"}]});
        assert!(matches!(
            Preset::from_json(&input, &registry),
            Err(ConfigError::UnknownType { .. })
        ));
        assert!(Preset::from_json(&json!({"scenes": 3}), &registry).is_err());
    }
}
