use ledmatrix_engine::clock;
use ledmatrix_engine::{Choice, Color, Matrix, Property, PropertyEnum, PropertyError, Scene, SceneBase};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PulseMode {
    Breathe,
    Blink,
    Solid,
}

impl PropertyEnum for PulseMode {
    const TYPE_NAME: &'static str = "PulseMode";

    fn variants() -> &'static [Self] {
        &[PulseMode::Breathe, PulseMode::Blink, PulseMode::Solid]
    }

    fn as_str(&self) -> &'static str {
        match self {
            PulseMode::Breathe => "breathe",
            PulseMode::Blink => "blink",
            PulseMode::Solid => "solid",
        }
    }
}

/// Brightness in 0..=1 for a position `t` (0..1) in the period.
pub fn brightness(mode: PulseMode, t: f32) -> f32 {
    match mode {
        PulseMode::Breathe => 0.5 - 0.5 * (t * std::f32::consts::TAU).cos(),
        PulseMode::Blink => {
            if t < 0.5 {
                1.0
            } else {
                0.0
            }
        }
        PulseMode::Solid => 1.0,
    }
}

/// Fills the panel with one color whose brightness follows `mode`.
pub struct ColorPulse {
    base: SceneBase,
    color: Property<Color>,
    mode: Property<Choice<PulseMode>>,
    period: Property<u64>,
    gamma: Property<f32>,
}

impl ColorPulse {
    pub const NAME: &'static str = "color_pulse";

    pub fn new() -> Self {
        Self {
            base: SceneBase::new(),
            color: Property::new("color", Color::new(0xff, 0x40, 0x00)),
            mode: Property::new("mode", Choice(PulseMode::Breathe)),
            period: Property::new("period", 2000u64).with_range(100, 60_000),
            gamma: Property::new("gamma", 2.2f32).with_range(1.0, 3.0),
        }
    }
}

impl Default for ColorPulse {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene for ColorPulse {
    fn base(&self) -> &SceneBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SceneBase {
        &mut self.base
    }

    fn name(&self) -> String {
        Self::NAME.into()
    }

    fn default_duration(&self) -> u64 {
        10_000
    }

    fn register_properties(&mut self) -> Result<(), PropertyError> {
        self.base.add_property(&self.color)?;
        self.base.add_property(&self.mode)?;
        self.base.add_property(&self.period)?;
        self.base.add_property(&self.gamma)
    }

    fn render(&mut self, matrix: &mut dyn Matrix) -> anyhow::Result<bool> {
        let period = self.period.get()?.max(1);
        let t = (clock::millis() % period) as f32 / period as f32;
        let level = brightness(self.mode.get()?.0, t).powf(self.gamma.get()?);
        let color = self.color.get()?.scaled(level);
        if let Some(canvas) = self.base.canvas_mut() {
            canvas.fill(color);
        }
        self.base.swap(matrix);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use ledmatrix_engine::{MemoryMatrix, SceneWrapper};

    #[test]
    fn test_brightness_curves() {
        assert!(brightness(PulseMode::Breathe, 0.0).abs() < 1e-6);
        assert!((brightness(PulseMode::Breathe, 0.5) - 1.0).abs() < 1e-6);
        assert_eq!(brightness(PulseMode::Blink, 0.25), 1.0);
        assert_eq!(brightness(PulseMode::Blink, 0.75), 0.0);
        assert_eq!(brightness(PulseMode::Solid, 0.9), 1.0);
    }

    #[test]
    fn test_describe_lists_enum_and_ranges() {
        let info = SceneWrapper::scene(ColorPulse::new).describe().unwrap();
        let j = serde_json::to_value(&info).unwrap();
        let mode = j["properties"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["name"] == json!("mode"))
            .unwrap()
            .clone();
        assert_eq!(mode["type_id"], json!("enum"));
        assert_eq!(mode["default_value"], json!("breathe"));
        assert_eq!(mode["enum_values"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_solid_render_fills_panel() {
        let wrapper = SceneWrapper::scene(ColorPulse::new);
        let mut scene = wrapper
            .instantiate(&json!({"mode": "solid", "gamma": 1.0, "color": 0x204060, "period": 5}))
            .unwrap();
        let mut matrix = MemoryMatrix::new(3, 3);
        let canvas = matrix.create_frame_canvas();
        scene.initialize(&matrix, canvas).unwrap();

        assert!(scene.render(&mut matrix).unwrap());
        assert_eq!(matrix.front().pixel(2, 2), Some(Color::new(0x20, 0x40, 0x60)));
        // clamped to the lower bound
        assert_eq!(scene.to_json()["period"], json!(100));
        assert_eq!(scene.duration(), 10_000);
    }
}
