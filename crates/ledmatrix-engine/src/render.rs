//! The render thread: picks a scene from the effective preset, drives it frame by frame and
//! rotates when it finishes, its duration elapses or something outside asks it to stop.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::canvas::{FrameCanvas, Matrix};
use crate::clock::{millis, sleep_millis};
use crate::config::{Preset, SharedScene};
use crate::context::AppContext;
use crate::events::{EngineEvent, StopReason};
use crate::fallback::FallbackScene;

const TAG: &str = "RENDER";

/// Weights at or above this demand immediate display.
pub const PRIORITY_WEIGHT: i64 = 100;

const TURNED_OFF_IDLE_MS: u64 = 1000;
const NO_SCENE_IDLE_MS: u64 = 300;
const IDLE_STEP_MS: u64 = 20;

/// Pick an index from the current scene weights.
///
/// The first weight at or above [`PRIORITY_WEIGHT`] wins outright. Otherwise the choice is
/// weighted random over the positive weights; a weight of zero or less never wins.
pub fn select_scene<R: Rng>(weights: &[i64], rng: &mut R) -> Option<usize> {
    if let Some(i) = weights.iter().position(|&w| w >= PRIORITY_WEIGHT) {
        return Some(i);
    }
    let total = weights
        .iter()
        .filter(|&&w| w > 0)
        .fold(0i64, |acc, &w| acc.saturating_add(w));
    if total <= 0 {
        return None;
    }
    let mut pick = rng.random_range(0..total);
    for (i, &w) in weights.iter().enumerate() {
        if w <= 0 {
            continue;
        }
        if pick < w {
            return Some(i);
        }
        pick -= w;
    }
    None
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

pub struct RenderLoop<R: Rng = StdRng> {
    ctx: AppContext,
    rng: R,
    // Canvas released by the last scene, handed to the next one.
    spare: Option<Box<dyn FrameCanvas>>,
    missing_preset: Option<String>,
}

impl RenderLoop<StdRng> {
    pub fn new(ctx: AppContext) -> Self {
        Self::with_rng(ctx, StdRng::from_os_rng())
    }
}

impl<R: Rng> RenderLoop<R> {
    pub fn with_rng(ctx: AppContext, rng: R) -> Self {
        Self {
            ctx,
            rng,
            spare: None,
            missing_preset: None,
        }
    }

    /// Sleep up to `ms`, waking early on interrupt.
    fn idle(&self, ms: u64) {
        let until = millis() + ms;
        while !self.ctx.flags.is_interrupted() {
            let now = millis();
            if now >= until {
                break;
            }
            sleep_millis(IDLE_STEP_MS.min(until - now));
        }
    }

    /// Run until the interrupt flag is raised.
    pub fn run(&mut self, matrix: &mut dyn Matrix) {
        log::info!(target: TAG, "render loop started on a {}x{} matrix", matrix.width(), matrix.height());
        while !self.ctx.flags.is_interrupted() {
            if self.ctx.flags.is_turned_off() {
                matrix.clear();
                self.idle(TURNED_OFF_IDLE_MS);
                continue;
            }

            self.ctx.flags.take_reload();
            let (id, scheduled) = self.ctx.effective_preset();
            let Some(preset) = self.ctx.config.preset(&id) else {
                if self.missing_preset.as_deref() != Some(id.as_str()) {
                    log::error!(target: TAG, "preset '{id}' does not exist; nothing to show");
                    self.missing_preset = Some(id);
                }
                self.idle(NO_SCENE_IDLE_MS);
                continue;
            };
            self.missing_preset = None;

            log::info!(
                target: TAG,
                "activating preset '{id}'{}",
                if scheduled { " (scheduled)" } else { "" }
            );
            self.ctx.events.emit(EngineEvent::PresetActivated {
                id: id.clone(),
                scheduled,
            });
            self.update_canvas(matrix, &id, &preset);
        }
        log::info!(target: TAG, "render loop stopped");
    }

    /// Rotate through the scenes of `preset` until a reload, a schedule change, turn-off or
    /// interrupt.
    fn update_canvas(&mut self, matrix: &mut dyn Matrix, id: &str, preset: &Preset) {
        let flags = self.ctx.flags.clone();
        loop {
            if flags.is_interrupted() || flags.reload_requested() || flags.is_turned_off() {
                return;
            }
            let (effective, _) = self.ctx.effective_preset();
            if effective != id {
                log::info!(target: "SCHEDULE", "switching from preset '{id}' to '{effective}'");
                return;
            }

            let weights: Vec<i64> = preset.scenes().iter().map(|s| s.lock().weight()).collect();
            let Some(index) = select_scene(&weights, &mut self.rng) else {
                log::error!(target: TAG, "preset '{id}' has no scene eligible for display");
                self.idle(NO_SCENE_IDLE_MS);
                continue;
            };
            self.show(matrix, id, &preset.scenes()[index]);
        }
    }

    fn take_canvas(&mut self, matrix: &mut dyn Matrix) -> Box<dyn FrameCanvas> {
        match self.spare.take() {
            Some(canvas) if canvas.width() == matrix.width() && canvas.height() == matrix.height() => canvas,
            _ => matrix.create_frame_canvas(),
        }
    }

    /// Hand a canvas to the scene, initializing it on first activation.
    fn activate(&mut self, matrix: &mut dyn Matrix, scene: &SharedScene) -> Result<(), String> {
        let canvas = self.take_canvas(matrix);
        let mut guard = scene.lock();
        if guard.base().is_initialized() {
            guard.base_mut().attach_canvas(canvas);
            return Ok(());
        }
        let matrix_ref: &dyn Matrix = matrix;
        match catch_unwind(AssertUnwindSafe(|| guard.initialize(matrix_ref, canvas))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(payload) => Err(panic_message(payload)),
        }
    }

    /// Drive one activation of `scene` and return why it ended.
    fn show(&mut self, matrix: &mut dyn Matrix, preset: &str, scene: &SharedScene) -> StopReason {
        let (name, uuid) = {
            let guard = scene.lock();
            (guard.name(), guard.base().uuid().to_string())
        };

        if let Err(error) = self.activate(matrix, scene) {
            self.fail(scene, &name, &uuid, error);
            return StopReason::Failed;
        }
        log::debug!(target: TAG, "showing '{name}' ({uuid})");
        self.ctx.events.emit(EngineEvent::SceneStarted {
            preset: preset.to_string(),
            scene: name.clone(),
            uuid: uuid.clone(),
        });

        let flags = self.ctx.flags.clone();
        let start = millis();
        let mut failure = None;
        let reason = loop {
            if flags.is_interrupted() || flags.is_turned_off() {
                break StopReason::Interrupted;
            }
            if flags.reload_requested() {
                break StopReason::Reload;
            }
            if flags.take_skip() {
                break StopReason::Skipped;
            }

            let wait = {
                let mut guard = scene.lock();
                let duration = guard.duration();
                if duration > 0 && millis().saturating_sub(start) > duration {
                    break StopReason::DurationElapsed;
                }
                if guard.base_mut().should_render_frame() {
                    match catch_unwind(AssertUnwindSafe(|| guard.render(&mut *matrix))) {
                        Ok(Ok(true)) => {}
                        Ok(Ok(false)) => break StopReason::Finished,
                        Ok(Err(e)) => {
                            failure = Some(format!("{e:#}"));
                            break StopReason::Failed;
                        }
                        Err(payload) => {
                            failure = Some(panic_message(payload));
                            break StopReason::Failed;
                        }
                    }
                }
                guard.base().time_until_next_frame()
            };
            if wait > 0 {
                sleep_millis(wait);
            }
        };

        {
            let mut guard = scene.lock();
            if catch_unwind(AssertUnwindSafe(|| guard.after_render_stop(&mut *matrix))).is_err() {
                log::error!(target: TAG, "'{name}' panicked in after_render_stop");
            }
            self.spare = guard.base_mut().detach_canvas();
        }
        log::debug!(target: TAG, "'{name}' stopped: {reason:?}");
        self.ctx.events.emit(EngineEvent::SceneStopped {
            scene: name.clone(),
            uuid: uuid.clone(),
            reason,
        });

        if let Some(error) = failure {
            self.fail(scene, &name, &uuid, error);
        }
        reason
    }

    /// Swap a broken scene for an inert stand-in that keeps its identity and arguments.
    fn fail(&mut self, scene: &SharedScene, name: &str, uuid: &str, error: String) {
        log::error!(target: TAG, "scene '{name}' failed, replacing it with a fallback: {error}");
        {
            let mut guard = scene.lock();
            if let Some(canvas) = guard.base_mut().detach_canvas() {
                self.spare = Some(canvas);
            }
            let fallback = FallbackScene::replacing(&**guard);
            guard.replace(Box::new(fallback));
        }
        self.ctx.events.emit(EngineEvent::SceneFailed {
            scene: name.to_string(),
            uuid: uuid.to_string(),
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crossbeam_channel::Receiver;
    use serde_json::{json, Value};

    use super::*;
    use crate::canvas::MemoryMatrix;
    use crate::config::MainConfig;
    use crate::context::RuntimeFlags;
    use crate::events::EventSink;
    use crate::manager::PluginManager;
    use crate::plugin::BasicPlugin;
    use crate::scene::testing::{Behavior, Probe, TestScene};
    use crate::wrapper::SceneWrapper;

    struct Scenes(Vec<(&'static str, Behavior, Arc<Probe>)>);

    impl BasicPlugin for Scenes {
        fn create_scenes(&self) -> Vec<SceneWrapper> {
            self.0
                .iter()
                .map(|(name, behavior, probe)| {
                    let (name, behavior, probe) = (*name, *behavior, Arc::clone(probe));
                    SceneWrapper::scene(move || TestScene::new(name, behavior, Arc::clone(&probe)))
                })
                .collect()
        }
    }

    struct Harness {
        ctx: AppContext,
        events: Receiver<EngineEvent>,
        _dir: tempfile::TempDir,
    }

    fn harness(scenes: Vec<(&'static str, Behavior, Arc<Probe>)>, doc: Value) -> Harness {
        let manager = Arc::new(PluginManager::new("unused"));
        manager.register_static("test", Box::new(Scenes(scenes))).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, doc.to_string()).unwrap();
        let flags = RuntimeFlags::new();
        let config = Arc::new(MainConfig::load(&path, &manager.registry(), flags.clone()).unwrap());
        let (tx, events) = crossbeam_channel::unbounded();
        let ctx = AppContext::new(manager, config, flags).with_events(EventSink::new(tx));
        Harness {
            ctx,
            events,
            _dir: dir,
        }
    }

    fn run_for(ctx: &AppContext, ms: u64) -> MemoryMatrix {
        let flags = Arc::clone(&ctx.flags);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(ms));
            flags.interrupt();
        });
        let mut matrix = MemoryMatrix::new(8, 4);
        RenderLoop::with_rng(ctx.clone(), StdRng::seed_from_u64(7)).run(&mut matrix);
        stopper.join().unwrap();
        matrix
    }

    fn stops(events: &Receiver<EngineEvent>) -> Vec<StopReason> {
        events
            .try_iter()
            .filter_map(|e| match e {
                EngineEvent::SceneStopped { reason, .. } => Some(reason),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_weighted_selection_frequencies() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0usize; 3];
        for _ in 0..20_000 {
            let i = select_scene(&[0, 5, 15], &mut rng).unwrap();
            counts[i] += 1;
        }
        assert_eq!(counts[0], 0);
        let ratio = counts[2] as f64 / counts[1] as f64;
        assert!((2.7..3.3).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn test_priority_weight_wins_in_order() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(select_scene(&[5, 100, 250, 1], &mut rng), Some(1));
        }
        assert_eq!(select_scene(&[0, -1], &mut rng), None);
        assert_eq!(select_scene(&[], &mut rng), None);
    }

    #[test]
    fn test_finished_scenes_rotate_and_stop_once() {
        let probe = Arc::new(Probe::default());
        let h = harness(
            vec![("blink", Behavior::Frames(2), Arc::clone(&probe))],
            json!({"presets": {"A": {"scenes": [{"type": "blink"}]}}, "curr": "A"}),
        );
        let matrix = run_for(&h.ctx, 300);

        let all: Vec<EngineEvent> = h.events.try_iter().collect();
        let started = all.iter().filter(|e| matches!(e, EngineEvent::SceneStarted { .. })).count();
        let stopped: Vec<StopReason> = all
            .iter()
            .filter_map(|e| match e {
                EngineEvent::SceneStopped { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect();
        assert!(started >= 2);
        assert_eq!(started, stopped.len());
        assert_eq!(probe.stops(), stopped.len());
        assert!(stopped.contains(&StopReason::Finished));
        assert!(probe.renders() <= 2 * probe.stops());
        assert!(matrix.swap_count() >= 2);
    }

    #[test]
    fn test_duration_elapses() {
        let probe = Arc::new(Probe::default());
        let h = harness(
            vec![("steady", Behavior::Forever, probe)],
            json!({"presets": {"A": {"scenes": [{"type": "steady", "arguments": {"duration": 40}}]}}, "curr": "A"}),
        );
        run_for(&h.ctx, 250);
        assert!(stops(&h.events).contains(&StopReason::DurationElapsed));
    }

    #[test]
    fn test_skip_rotates_indefinite_scene() {
        let probe = Arc::new(Probe::default());
        let h = harness(
            vec![("steady", Behavior::Forever, probe)],
            json!({"presets": {"A": {"scenes": [{"type": "steady", "arguments": {"duration": 0}}]}}, "curr": "A"}),
        );
        let flags = Arc::clone(&h.ctx.flags);
        let skipper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            flags.skip();
        });
        run_for(&h.ctx, 200);
        skipper.join().unwrap();

        let reasons = stops(&h.events);
        assert_eq!(reasons.first(), Some(&StopReason::Skipped));
        assert_eq!(reasons.last(), Some(&StopReason::Interrupted));
        assert!(!reasons.contains(&StopReason::DurationElapsed));
    }

    #[test]
    fn test_failing_scenes_are_replaced_by_fallback() {
        let h = harness(
            vec![
                ("broken", Behavior::Fail, Arc::new(Probe::default())),
                ("panicky", Behavior::Panic, Arc::new(Probe::default())),
            ],
            json!({"presets": {"A": {"scenes": [
                {"type": "broken", "arguments": {"speed": 9}, "uuid": "b"},
                {"type": "panicky", "uuid": "p"}
            ]}}, "curr": "A"}),
        );
        run_for(&h.ctx, 200);

        let failed: Vec<String> = h
            .events
            .try_iter()
            .filter_map(|e| match e {
                EngineEvent::SceneFailed { uuid, .. } => Some(uuid),
                _ => None,
            })
            .collect();
        assert!(failed.contains(&"b".to_string()));
        assert!(failed.contains(&"p".to_string()));

        let preset = h.ctx.config.curr().unwrap();
        for scene in preset.scenes() {
            assert_eq!(scene.lock().weight(), -1);
        }
        let saved = preset.to_json();
        assert_eq!(saved["scenes"][0]["type"], json!("broken"));
        assert_eq!(saved["scenes"][0]["arguments"]["speed"], json!(9));
        assert_eq!(saved["scenes"][1]["uuid"], json!("p"));
    }

    #[test]
    fn test_config_change_reloads_preset() {
        let probe = Arc::new(Probe::default());
        let h = harness(
            vec![("steady", Behavior::Forever, probe)],
            json!({"presets": {"A": {}, "B": {}}, "curr": "A"}),
        );
        let config = Arc::clone(&h.ctx.config);
        let switcher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            config.set_curr("B").unwrap();
        });
        run_for(&h.ctx, 200);
        switcher.join().unwrap();

        let activated: Vec<String> = h
            .events
            .try_iter()
            .filter_map(|e| match e {
                EngineEvent::PresetActivated { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(activated, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_turned_off_shows_nothing() {
        let probe = Arc::new(Probe::default());
        let h = harness(
            vec![("steady", Behavior::Forever, Arc::clone(&probe))],
            json!({"presets": {"A": {}}, "curr": "A"}),
        );
        h.ctx.flags.set_turned_off(true);
        let matrix = run_for(&h.ctx, 100);
        assert_eq!(probe.renders(), 0);
        assert_eq!(matrix.swap_count(), 0);
        assert!(h.events.try_iter().next().is_none());
    }
}
