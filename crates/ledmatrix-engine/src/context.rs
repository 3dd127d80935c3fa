use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::clock::LocalClock;
use crate::config::MainConfig;
use crate::events::EventSink;
use crate::manager::PluginManager;

/// Process-wide switches shared by the render loop, the API and background threads.
#[derive(Debug, Default)]
pub struct RuntimeFlags {
    exit_canvas_update: AtomicBool,
    skip_image: AtomicBool,
    turned_off: AtomicBool,
    interrupt: AtomicBool,
}

impl RuntimeFlags {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask the render loop to drop the active preset and rebuild it from the config.
    pub fn request_reload(&self) {
        self.exit_canvas_update.store(true, Ordering::SeqCst);
    }

    pub fn reload_requested(&self) -> bool {
        self.exit_canvas_update.load(Ordering::SeqCst)
    }

    pub fn take_reload(&self) -> bool {
        self.exit_canvas_update.swap(false, Ordering::SeqCst)
    }

    pub fn skip(&self) {
        self.skip_image.store(true, Ordering::SeqCst);
    }

    pub fn skip_requested(&self) -> bool {
        self.skip_image.load(Ordering::SeqCst)
    }

    pub fn take_skip(&self) -> bool {
        self.skip_image.swap(false, Ordering::SeqCst)
    }

    pub fn set_turned_off(&self, off: bool) {
        self.turned_off.store(off, Ordering::SeqCst);
    }

    pub fn is_turned_off(&self) -> bool {
        self.turned_off.load(Ordering::SeqCst)
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }
}

/// Everything the render loop and request handlers need, passed explicitly instead of living
/// in globals.
#[derive(Clone)]
pub struct AppContext {
    pub plugins: Arc<PluginManager>,
    pub config: Arc<MainConfig>,
    pub flags: Arc<RuntimeFlags>,
    pub clock: LocalClock,
    pub events: EventSink,
}

impl AppContext {
    pub fn new(plugins: Arc<PluginManager>, config: Arc<MainConfig>, flags: Arc<RuntimeFlags>) -> Self {
        Self {
            plugins,
            config,
            flags,
            clock: LocalClock::utc(),
            events: EventSink::disabled(),
        }
    }

    pub fn with_clock(mut self, clock: LocalClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// The preset that should be on screen right now, and whether a schedule picked it.
    pub fn effective_preset(&self) -> (String, bool) {
        self.config.effective_preset_id(&self.clock)
    }
}
