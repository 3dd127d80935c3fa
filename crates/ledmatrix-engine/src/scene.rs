//! Scene lifecycle.
//!
//! A scene is constructed by its wrapper, declares its properties once, receives a property bag
//! from the preset, and is then activated by the render loop:
//!
//!   initialize(matrix, canvas) -> render(matrix)* -> after_render_stop(matrix)
//!
//! `initialize` only does work the first time. The canvas is handed to the scene for each
//! activation and taken back afterwards; the scene never owns it between activations.

use serde_json::Value;

use crate::canvas::{FrameCanvas, Matrix};
use crate::clock;
use crate::error::PropertyError;
use crate::property::{Property, PropertySet, PropertyValue};

pub const DEFAULT_WEIGHT: i64 = 1;
pub const DEFAULT_DURATION_MS: u64 = 5000;
pub const DEFAULT_TARGET_FPS: u32 = 60;

/// State shared by every scene: properties, activation state and frame pacing.
pub struct SceneBase {
    properties: PropertySet,
    weight: Property<i64>,
    duration: Property<u64>,
    properties_registered: bool,
    initialized: bool,
    matrix_width: u32,
    matrix_height: u32,
    offscreen_canvas: Option<Box<dyn FrameCanvas>>,
    uuid: String,
    target_fps: u32,
    last_render_time: Option<u64>,
}

impl Default for SceneBase {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneBase {
    pub fn new() -> Self {
        let weight = Property::new("weight", DEFAULT_WEIGHT);
        let duration = Property::new("duration", DEFAULT_DURATION_MS);
        let mut properties = PropertySet::default();
        properties.push_unchecked(&weight);
        properties.push_unchecked(&duration);

        Self {
            properties,
            weight,
            duration,
            properties_registered: false,
            initialized: false,
            matrix_width: 0,
            matrix_height: 0,
            offscreen_canvas: None,
            uuid: String::new(),
            target_fps: DEFAULT_TARGET_FPS,
            last_render_time: None,
        }
    }

    /// Declare a scene-specific property. Fails on a duplicate name.
    pub fn add_property<T: PropertyValue>(&mut self, property: &Property<T>) -> Result<(), PropertyError> {
        self.properties.add(property)
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    pub fn weight_property(&self) -> &Property<i64> {
        &self.weight
    }

    pub fn duration_property(&self) -> &Property<u64> {
        &self.duration
    }

    pub(crate) fn properties_registered(&self) -> bool {
        self.properties_registered
    }

    pub(crate) fn mark_properties_registered(&mut self) {
        self.properties_registered = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn matrix_width(&self) -> u32 {
        self.matrix_width
    }

    pub fn matrix_height(&self) -> u32 {
        self.matrix_height
    }

    /// Capture the display size and canvas. Returns false (and drops `canvas`) when the scene
    /// was already initialized.
    pub fn initialize(&mut self, matrix: &dyn Matrix, canvas: Box<dyn FrameCanvas>) -> bool {
        if self.initialized {
            return false;
        }
        self.matrix_width = matrix.width();
        self.matrix_height = matrix.height();
        self.offscreen_canvas = Some(canvas);
        self.initialized = true;
        true
    }

    pub fn attach_canvas(&mut self, canvas: Box<dyn FrameCanvas>) {
        self.offscreen_canvas = Some(canvas);
    }

    pub fn detach_canvas(&mut self) -> Option<Box<dyn FrameCanvas>> {
        self.offscreen_canvas.take()
    }

    pub fn canvas(&self) -> Option<&dyn FrameCanvas> {
        self.offscreen_canvas.as_deref()
    }

    pub fn canvas_mut(&mut self) -> Option<&mut dyn FrameCanvas> {
        self.offscreen_canvas.as_deref_mut().map(|c| c as &mut dyn FrameCanvas)
    }

    /// Hand the drawn canvas to the driver and keep the one it returns for the next frame.
    pub fn swap(&mut self, matrix: &mut dyn Matrix) -> bool {
        match self.offscreen_canvas.take() {
            Some(canvas) => {
                self.offscreen_canvas = Some(matrix.swap_on_vsync(canvas));
                true
            }
            None => false,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn set_uuid(&mut self, uuid: impl Into<String>) {
        self.uuid = uuid.into();
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn set_target_fps(&mut self, fps: u32) {
        self.target_fps = fps.max(1);
    }

    fn frame_interval(&self) -> u64 {
        1000 / u64::from(self.target_fps.max(1))
    }

    /// True once a full frame interval has passed since the last rendered frame.
    pub fn should_render_frame(&mut self) -> bool {
        let now = clock::millis();
        match self.last_render_time {
            Some(last) if now.saturating_sub(last) < self.frame_interval() => false,
            _ => {
                self.last_render_time = Some(now);
                true
            }
        }
    }

    /// Milliseconds left before `should_render_frame` turns true again.
    pub fn time_until_next_frame(&self) -> u64 {
        match self.last_render_time {
            Some(last) => (last + self.frame_interval()).saturating_sub(clock::millis()),
            None => 0,
        }
    }

    /// Sleep out the rest of the current frame interval. A slow frame is not compensated.
    pub fn wait_until_next_frame(&mut self) {
        if let Some(last) = self.last_render_time {
            let next = last + self.frame_interval();
            let now = clock::millis();
            if next > now {
                clock::sleep_millis(next - now);
            }
        }
        self.last_render_time = Some(clock::millis());
    }
}

/// A renderable unit contributed by a plugin.
pub trait Scene: Send {
    fn base(&self) -> &SceneBase;
    fn base_mut(&mut self) -> &mut SceneBase;

    /// Dispatch key matched against the `type` of a persisted entry.
    fn name(&self) -> String;

    fn default_weight(&self) -> i64 {
        DEFAULT_WEIGHT
    }

    fn default_duration(&self) -> u64 {
        DEFAULT_DURATION_MS
    }

    /// Install the scene's weight/duration defaults before the first load.
    fn update_default_properties(&mut self) {
        let (weight, duration) = (self.default_weight(), self.default_duration());
        self.base().weight_property().set_value(weight);
        self.base().duration_property().set_value(duration);
    }

    /// Declare scene-specific properties via `base_mut().add_property(..)`.
    fn register_properties(&mut self) -> Result<(), PropertyError> {
        Ok(())
    }

    fn load_properties(&mut self, args: &Value) -> Result<(), PropertyError> {
        self.base().properties().load_from_json(args)
    }

    /// First activation only. Scenes that allocate per-resolution buffers override this and
    /// call through to `base_mut().initialize(..)`.
    fn initialize(&mut self, matrix: &dyn Matrix, canvas: Box<dyn FrameCanvas>) -> anyhow::Result<()> {
        self.base_mut().initialize(matrix, canvas);
        Ok(())
    }

    /// Draw one frame. `Ok(false)` asks the render loop to rotate to the next scene.
    fn render(&mut self, matrix: &mut dyn Matrix) -> anyhow::Result<bool>;

    /// Runs exactly once each time the scene is rotated out.
    fn after_render_stop(&mut self, _matrix: &mut dyn Matrix) {}

    fn weight(&self) -> i64 {
        self.base().weight_property().value()
    }

    fn duration(&self) -> u64 {
        self.base().duration_property().value()
    }

    /// Live property values. The `{type, arguments, uuid}` envelope is added by the preset.
    fn to_json(&self) -> Value {
        self.base().properties().to_json()
    }
}

/// Install defaults and declare properties, once per instance.
pub fn prepare_scene(scene: &mut dyn Scene) -> Result<(), PropertyError> {
    if scene.base().properties_registered() {
        return Ok(());
    }
    scene.update_default_properties();
    scene.register_properties()?;
    scene.base_mut().mark_properties_registered();
    Ok(())
}
