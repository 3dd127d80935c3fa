use serde_json::{json, Value};

use crate::canvas::Matrix;
use crate::scene::{Scene, SceneBase};

/// Inert stand-in for a scene that failed to load, initialize or render.
///
/// It keeps the original type name, arguments and uuid so the preset still persists exactly
/// what the user configured, and it never takes part in rotation (weight −1).
pub struct FallbackScene {
    base: SceneBase,
    name: String,
    arguments: Value,
}

impl FallbackScene {
    pub const NAME: &'static str = "fallback";

    pub fn new() -> Self {
        Self::standing_in_for(Self::NAME, json!({}), "")
    }

    pub fn standing_in_for(name: impl Into<String>, arguments: Value, uuid: impl Into<String>) -> Self {
        let mut base = SceneBase::new();
        base.set_uuid(uuid);
        Self {
            base,
            name: name.into(),
            arguments,
        }
    }

    /// Build a stand-in carrying `scene`'s identity and current arguments.
    ///
    /// The name, arguments and uuid of the failed scene are kept, so saving the preset still
    /// writes back what the user configured rather than an empty fallback entry.
    pub fn replacing(scene: &dyn Scene) -> Self {
        Self::standing_in_for(scene.name(), scene.to_json(), scene.base().uuid())
    }
}

impl Default for FallbackScene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene for FallbackScene {
    fn base(&self) -> &SceneBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SceneBase {
        &mut self.base
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn default_weight(&self) -> i64 {
        -1
    }

    fn default_duration(&self) -> u64 {
        0
    }

    fn render(&mut self, _matrix: &mut dyn Matrix) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn weight(&self) -> i64 {
        -1
    }

    fn duration(&self) -> u64 {
        0
    }

    fn to_json(&self) -> Value {
        self.arguments.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::canvas::MemoryMatrix;
    use crate::scene::prepare_scene;
    use crate::scene::testing::{Behavior, Probe, TestScene};

    #[test]
    fn test_fallback_is_inert() {
        let mut scene = FallbackScene::new();
        let mut matrix = MemoryMatrix::new(2, 2);
        assert_eq!(scene.weight(), -1);
        assert_eq!(scene.duration(), 0);
        assert!(!scene.render(&mut matrix).unwrap());
        assert_eq!(matrix.swap_count(), 0);
    }

    #[test]
    fn test_replacement_keeps_identity() {
        let mut original = TestScene::new("fire", Behavior::Fail, Arc::new(Probe::default()));
        prepare_scene(&mut original).unwrap();
        original.load_properties(&json!({"speed": 4})).unwrap();
        original.base_mut().set_uuid("abc");

        let fallback = FallbackScene::replacing(&original);
        assert_eq!(fallback.name(), "fire");
        assert_eq!(fallback.base().uuid(), "abc");
        assert_eq!(fallback.to_json()["speed"], json!(4));
    }
}
