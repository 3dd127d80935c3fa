//! ledmatrix runtime: loads plugins and the persisted config, then drives an emulated panel.

mod hotreload;
mod logging;
mod presenter;
mod validate;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use crossbeam_channel::{bounded, Receiver};
use ledmatrix_engine::builtin::{BuiltinPlugin, BUILTIN_PLUGIN};
use ledmatrix_engine::clock::LocalClock;
use ledmatrix_engine::events::{EngineEvent, EventSink};
use ledmatrix_engine::paths::{load_json_value, RuntimePaths};
use ledmatrix_engine::{AppContext, MainConfig, MemoryMatrix, PluginManager, RenderLoop, RuntimeFlags};

use crate::presenter::{NullPresenter, Presenter, TerminalPresenter};

const DEMO_PLUGIN: &str = "demo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PreviewMode {
    /// ANSI truecolor preview on stdout.
    Terminal,
    /// Headless.
    None,
}

#[derive(Debug, Parser)]
#[command(name = "ledmatrix", version, about = "LED matrix runtime with an emulated panel")]
struct Args {
    /// Persisted config document.
    #[arg(long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Directory scanned for plugin folders.
    #[arg(long, env = "PLUGIN_DIR")]
    plugin_dir: Option<PathBuf>,

    #[arg(long, env = "LEDMATRIX_WIDTH", default_value_t = 64)]
    width: u32,

    #[arg(long, env = "LEDMATRIX_HEIGHT", default_value_t = 32)]
    height: u32,

    #[arg(long, value_enum, default_value_t = PreviewMode::None)]
    preview: PreviewMode,

    /// Cap for terminal preview refreshes.
    #[arg(long, default_value_t = 20)]
    preview_fps: u32,

    /// Append every log line to this file as well.
    #[arg(long, env = "LEDMATRIX_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Stop after this many seconds instead of running until killed.
    #[arg(long)]
    run_for: Option<u64>,

    /// Do not watch the plugin directory for added/removed plugins.
    #[arg(long)]
    no_watch: bool,

    /// Seconds between saves of a changed config.
    #[arg(long, default_value_t = 30)]
    autosave_secs: u64,
}

fn main() {
    let args = Args::parse();

    let run_id = logging::init(args.log_file.clone(), logging::level_from_env());
    logi!("INIT", "run_id={run_id}");

    // `init` read the local offset while this was the only thread
    let clock = LocalClock::with_offset(logging::utc_offset());
    logi!("INIT", "local offset {}", clock.offset());

    if let Err(e) = run(args, clock) {
        loge!("INIT", "{e:#}");
        log::logger().flush();
        std::process::exit(1);
    }
}

fn run(args: Args, clock: LocalClock) -> anyhow::Result<()> {
    let paths = RuntimePaths::resolve(args.config.clone(), args.plugin_dir.clone());
    logi!("INIT", "config: {}", paths.config().display());
    logi!("INIT", "plugin dir: {}", paths.plugin_dir().display());

    let (event_tx, event_rx) = bounded::<EngineEvent>(256);
    let events = EventSink::new(event_tx);
    spawn_named("events", move || log_events(event_rx))?;

    let manager = PluginManager::new(paths.plugin_dir()).with_events(events.clone());
    manager.register_static(BUILTIN_PLUGIN, Box::new(BuiltinPlugin))?;
    manager.register_static(DEMO_PLUGIN, Box::new(demo_scenes::DemoPlugin::default()))?;
    let loaded = manager.initialize();
    let manager = Arc::new(manager);
    logi!("INIT", "plugins: {} ({loaded} from disk)", manager.plugin_names().join(", "));

    manager.before_server_init()?;

    let registry = manager.registry();
    if paths.config().exists() {
        let raw = load_json_value(paths.config())?;
        let issues = validate::validate_config_json(&raw, &registry);
        validate::emit_issues("VALIDATE", &issues);
        validate::emit_summary("VALIDATE", &paths.config().display().to_string(), &issues);
        if validate::has_errors(&issues) {
            loge!("VALIDATE", "config has errors; loading it will likely fail");
        }
    }

    let flags = RuntimeFlags::new();
    let config = Arc::new(MainConfig::load(paths.config(), &registry, Arc::clone(&flags))?.with_events(events.clone()));
    logi!("INIT", "presets: {} (current '{}')", config.preset_ids().join(", "), config.curr_id());

    manager.after_server_init()?;

    let ctx = AppContext::new(Arc::clone(&manager), Arc::clone(&config), Arc::clone(&flags))
        .with_clock(clock)
        .with_events(events);

    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    if !args.no_watch && manager.plugin_dir().is_dir() {
        match hotreload::PluginWatcher::new(manager.plugin_dir()) {
            Ok(watcher) => {
                let (m, f) = (Arc::clone(&manager), Arc::clone(&flags));
                workers.push(spawn_named("plugin-watcher", move || hotreload::run(watcher, m, f))?);
            }
            Err(e) => logw!("HOTRELOAD", "watcher disabled: {e:#}"),
        }
    }
    {
        let (c, f) = (Arc::clone(&config), Arc::clone(&flags));
        let every = Duration::from_secs(args.autosave_secs.max(1));
        workers.push(spawn_named("autosave", move || autosave(&c, &f, every))?);
    }
    if let Some(secs) = args.run_for {
        let f = Arc::clone(&flags);
        spawn_named("run-timer", move || {
            thread::sleep(Duration::from_secs(secs));
            logi!("INIT", "run time of {secs}s reached");
            f.interrupt();
        })?;
    }

    let mut presenter = match args.preview {
        PreviewMode::Terminal => {
            // clear once; frames then redraw from the cursor home position
            print!("\x1b[2J");
            Presenter::Terminal(TerminalPresenter::new(args.preview_fps))
        }
        PreviewMode::None => Presenter::Null(NullPresenter),
    };
    logi!(
        "INIT",
        "preview: {}",
        if presenter.is_enabled() { "terminal" } else { "headless" }
    );
    let mut matrix = MemoryMatrix::new(args.width, args.height).with_observer(move |canvas| presenter.present(canvas));

    logi!("INIT", "ready (run_id={}) {}x{}", logging::run_id(), args.width, args.height);
    RenderLoop::new(ctx).run(&mut matrix);
    logi!("INIT", "render loop stopped after {} frames", matrix.swap_count());

    flags.interrupt();
    for w in workers {
        let _ = w.join();
    }
    manager.terminate();
    if config.is_dirty() && !config.save() {
        anyhow::bail!("final save of {} failed", config.path().display());
    }
    Ok(())
}

fn spawn_named(name: &str, f: impl FnOnce() + Send + 'static) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name.to_string()).spawn(f)
}

/// Save the config whenever it is dirty, checking every `every`.
fn autosave(config: &MainConfig, flags: &RuntimeFlags, every: Duration) {
    let mut next = Instant::now() + every;
    while !flags.is_interrupted() {
        thread::sleep(Duration::from_millis(100));
        if Instant::now() < next {
            continue;
        }
        next = Instant::now() + every;
        if config.is_dirty() {
            config.save();
        }
    }
}

fn log_events(rx: Receiver<EngineEvent>) {
    for event in rx {
        match &event {
            EngineEvent::PluginFailed { .. } | EngineEvent::SceneFailed { .. } | EngineEvent::ConfigSaveFailed { .. } => {
                logw!("EVENT", "{event:?}")
            }
            _ => log::debug!(target: "EVENT", "{event:?}"),
        }
    }
}
