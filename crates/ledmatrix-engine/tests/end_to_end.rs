use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ledmatrix_engine::api::{handle, ApiRequest};
use ledmatrix_engine::builtin::{BuiltinPlugin, BUILTIN_PLUGIN};
use ledmatrix_engine::{
    AppContext, BasicPlugin, Color, MainConfig, Matrix, MemoryMatrix, PluginManager, Property, PropertyError,
    RenderLoop, RuntimeFlags, Scene, SceneBase, SceneWrapper,
};
use serde_json::json;

struct Fire {
    base: SceneBase,
    heat: Property<u8>,
}

impl Fire {
    fn new() -> Self {
        Self {
            base: SceneBase::new(),
            heat: Property::new("heat", 200u8),
        }
    }
}

impl Scene for Fire {
    fn base(&self) -> &SceneBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SceneBase {
        &mut self.base
    }

    fn name(&self) -> String {
        "fire".into()
    }

    fn register_properties(&mut self) -> Result<(), PropertyError> {
        self.base.add_property(&self.heat)
    }

    fn render(&mut self, matrix: &mut dyn Matrix) -> anyhow::Result<bool> {
        let heat = self.heat.get()?;
        if let Some(canvas) = self.base.canvas_mut() {
            canvas.fill(Color::new(heat, heat / 4, 0));
        }
        self.base.swap(matrix);
        Ok(true)
    }
}

struct FirePlugin;

impl BasicPlugin for FirePlugin {
    fn create_scenes(&self) -> Vec<SceneWrapper> {
        vec![SceneWrapper::scene(Fire::new)]
    }
}

fn manager() -> Arc<PluginManager> {
    let manager = PluginManager::new("does-not-exist");
    manager.register_static(BUILTIN_PLUGIN, Box::new(BuiltinPlugin)).unwrap();
    manager.register_static("fire", Box::new(FirePlugin)).unwrap();
    assert_eq!(manager.initialize(), 0);
    Arc::new(manager)
}

#[test]
fn test_persisted_preset_loads_single_fire_scene() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{"presets":{"A":{"scenes":[{"type":"fire","arguments":{"weight":1,"duration":15000}}]}},"curr":"A"}"#,
    )
    .unwrap();

    let manager = manager();
    let config = MainConfig::load(&path, &manager.registry(), RuntimeFlags::new()).unwrap();
    let curr = config.curr().unwrap();
    assert_eq!(curr.len(), 1);
    let scene = curr.scenes()[0].lock();
    assert_eq!(scene.name(), "fire");
    assert_eq!(scene.duration(), 15000);
    assert_eq!(scene.weight(), 1);
}

#[test]
fn test_runtime_round_trip_through_api_and_render_loop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let manager = manager();
    let flags = RuntimeFlags::new();
    let config = Arc::new(MainConfig::load(&path, &manager.registry(), Arc::clone(&flags)).unwrap());
    let ctx = AppContext::new(Arc::clone(&manager), Arc::clone(&config), Arc::clone(&flags));

    let body = json!({"scenes": [{"type": "fire", "arguments": {"heat": 120}, "uuid": "f"}]}).to_string();
    assert!(handle(&ctx, &ApiRequest::post("/add_preset?id=Hot", body)).is_success());
    assert!(handle(&ctx, &ApiRequest::get("/set_preset?id=Hot")).is_success());

    let stopper = {
        let flags = Arc::clone(&flags);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            flags.interrupt();
        })
    };
    let mut matrix = MemoryMatrix::new(4, 2);
    RenderLoop::new(ctx.clone()).run(&mut matrix);
    stopper.join().unwrap();

    assert!(matrix.swap_count() > 0);
    assert_eq!(matrix.front().pixel(0, 0), Some(Color::new(120, 30, 0)));

    assert!(config.save());
    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["curr"], json!("Hot"));
    assert_eq!(saved["presets"]["Hot"]["scenes"][0]["uuid"], json!("f"));
    assert_eq!(saved["presets"]["Hot"]["scenes"][0]["arguments"]["heat"], json!(120));

    manager.terminate();
    assert!(manager.plugin_names().is_empty());
}
