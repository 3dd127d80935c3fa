//! Shows whatever track title a media player last wrote to a text file.
//!
//! The file is read on a background task so `render()` and `weight()` never block on disk.
//! A title change bumps the scene to priority weight until it has been rendered once.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ledmatrix_engine::clock;
use ledmatrix_engine::render::PRIORITY_WEIGHT;
use ledmatrix_engine::task::{BackgroundTask, TaskState};
use ledmatrix_engine::{Color, Matrix, Property, PropertyError, Scene, SceneBase};
use parking_lot::Mutex;

const TAG: &str = "NOW_PLAYING";

/// Last known title plus the in-flight read.
pub struct TitleFeed {
    current: Mutex<Option<String>>,
    changed: AtomicBool,
    task: Mutex<BackgroundTask<Option<String>>>,
    last_poll: AtomicU64,
}

impl TitleFeed {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            changed: AtomicBool::new(false),
            task: Mutex::new(BackgroundTask::new("now-playing")),
            last_poll: AtomicU64::new(0),
        }
    }

    pub fn title(&self) -> Option<String> {
        self.current.lock().clone()
    }

    pub fn has_unseen_change(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    pub fn mark_seen(&self) {
        self.changed.store(false, Ordering::Release);
    }

    /// Collect a finished read, or start a new one once `interval_ms` has passed.
    pub fn refresh(&self, source: PathBuf, interval_ms: u64) {
        let mut task = self.task.lock();
        match task.poll() {
            TaskState::Pending => return,
            TaskState::Ready(title) => {
                self.store(title);
                return;
            }
            TaskState::Failed(_) | TaskState::Idle => {}
        }

        let now = clock::millis();
        let last = self.last_poll.load(Ordering::Acquire);
        if last != 0 && now.saturating_sub(last) < interval_ms {
            return;
        }
        self.last_poll.store(now.max(1), Ordering::Release);
        if let Err(e) = task.spawn(move || read_title(&source)) {
            log::warn!(target: TAG, "could not start reader: {e}");
        }
    }

    fn store(&self, title: Option<String>) {
        let mut current = self.current.lock();
        if *current == title {
            return;
        }
        match &title {
            Some(t) => log::info!(target: TAG, "now playing '{t}'"),
            None => log::info!(target: TAG, "playback stopped"),
        }
        if title.is_some() {
            self.changed.store(true, Ordering::Release);
        }
        *current = title;
    }
}

impl Default for TitleFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// A missing file means nothing is playing.
fn read_title(path: &std::path::Path) -> anyhow::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let line = text.lines().next().unwrap_or("").trim();
            Ok((!line.is_empty()).then(|| line.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::anyhow!("read {}: {e}", path.display())),
    }
}

/// Stable color for a title, so each track gets its own backdrop.
pub fn title_color(title: &str) -> Color {
    // FNV-1a
    let mut h: u32 = 0x811c_9dc5;
    for b in title.bytes() {
        h ^= u32::from(b);
        h = h.wrapping_mul(0x0100_0193);
    }
    let c = Color::from_packed(h & 0xff_ff_ff);
    // keep it bright enough to read on a panel
    Color::new(c.r | 0x40, c.g | 0x40, c.b | 0x40)
}

pub struct NowPlaying {
    base: SceneBase,
    source: Property<String>,
    poll_interval: Property<u64>,
    feed: TitleFeed,
}

impl NowPlaying {
    pub const NAME: &'static str = "now_playing";

    pub fn new() -> Self {
        Self {
            base: SceneBase::new(),
            source: Property::new("source", "now_playing.txt".to_string()),
            poll_interval: Property::new("poll_interval", 2000u64).with_min(50),
            feed: TitleFeed::new(),
        }
    }

    pub fn feed(&self) -> &TitleFeed {
        &self.feed
    }

    fn refresh(&self) {
        self.feed
            .refresh(PathBuf::from(self.source.value()), self.poll_interval.value());
    }
}

impl Default for NowPlaying {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene for NowPlaying {
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
        8000
    }

    fn register_properties(&mut self) -> Result<(), PropertyError> {
        self.base.add_property(&self.source)?;
        self.base.add_property(&self.poll_interval)
    }

    fn weight(&self) -> i64 {
        self.refresh();
        if self.feed.has_unseen_change() {
            PRIORITY_WEIGHT
        } else if self.feed.title().is_some() {
            self.base.weight_property().value()
        } else {
            0
        }
    }

    fn render(&mut self, matrix: &mut dyn Matrix) -> anyhow::Result<bool> {
        self.refresh();
        let Some(title) = self.feed.title() else {
            return Ok(false);
        };
        self.feed.mark_seen();
        if let Some(canvas) = self.base.canvas_mut() {
            canvas.fill(title_color(&title));
        }
        self.base.swap(matrix);
        Ok(true)
    }
}
