//! Plugin discovery, lifecycle and the aggregated scene/provider registry.
//!
//! Layout on disk: `<plugin_dir>/<Name>/<platform library file for Name>`, e.g.
//! `plugins/demo_scenes/libdemo_scenes.so`. A module that fails to load is logged and skipped.
//!
//! Every wrapper a module contributes holds a clone of the module's guard, and so does every
//! object those wrappers create. `terminate()` therefore only has to run the `pre_exit` hooks,
//! drop the registries and destroy each plugin through its own destroy symbol; the library is
//! unmapped once the last object it produced is gone.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use parking_lot::RwLock;

use crate::api::{ApiRequest, ApiResponse};
use crate::error::PluginError;
use crate::events::{EngineEvent, EventSink};
use crate::plugin::{
    create_symbol, destroy_symbol, library_name, BasicPlugin, CreatePluginFn, DestroyPluginFn, PluginBox,
};
use crate::provider::{ImageProvider, ShaderProvider};
use crate::scene::Scene;
use crate::wrapper::{Entity, ModuleGuard, Wrapper};

const TAG: &str = "PLUGIN";

/// Plugin created by a loaded module. Freed through the module's own destroy symbol.
struct DynamicPlugin {
    raw: *mut PluginBox,
    destroy: DestroyPluginFn,
    // Released after `drop` has called `destroy`.
    _library: ModuleGuard,
}

// SAFETY: `raw` points at a `Box<dyn BasicPlugin>`, which is Send + Sync, and is only ever
// borrowed immutably until `drop` frees it.
unsafe impl Send for DynamicPlugin {}
unsafe impl Sync for DynamicPlugin {}

impl DynamicPlugin {
    fn plugin(&self) -> &dyn BasicPlugin {
        // SAFETY: non-null (checked at load) and alive until `drop`.
        unsafe { &**self.raw }
    }
}

impl Drop for DynamicPlugin {
    fn drop(&mut self) {
        // SAFETY: `raw` came from the create symbol of the same library and is freed once.
        unsafe { (self.destroy)(self.raw) }
    }
}

enum PluginHandle {
    Static(PluginBox),
    Dynamic(DynamicPlugin),
}

impl PluginHandle {
    fn plugin(&self) -> &dyn BasicPlugin {
        match self {
            PluginHandle::Static(p) => p.as_ref(),
            PluginHandle::Dynamic(p) => p.plugin(),
        }
    }
}

struct LoadedPlugin {
    name: String,
    location: Option<PathBuf>,
    // Wrappers are dropped before the plugin that produced them.
    scenes: Vec<Arc<Wrapper<dyn Scene>>>,
    image_providers: Vec<Arc<Wrapper<dyn ImageProvider>>>,
    shader_providers: Vec<Arc<Wrapper<dyn ShaderProvider>>>,
    handle: PluginHandle,
}

fn attach<E: ?Sized + Entity>(wrappers: Vec<Wrapper<E>>, module: Option<&ModuleGuard>) -> Vec<Arc<Wrapper<E>>> {
    wrappers
        .into_iter()
        .map(|w| match module {
            Some(m) => Arc::new(w.with_module(Arc::clone(m))),
            None => Arc::new(w),
        })
        .collect()
}

impl LoadedPlugin {
    fn new(name: String, location: Option<PathBuf>, handle: PluginHandle, module: Option<ModuleGuard>) -> Self {
        let plugin = handle.plugin();
        let scenes = attach(plugin.create_scenes(), module.as_ref());
        let image_providers = attach(plugin.create_image_providers(), module.as_ref());
        let shader_providers = attach(plugin.create_shader_providers(), module.as_ref());
        Self {
            name,
            location,
            scenes,
            image_providers,
            shader_providers,
            handle,
        }
    }
}

/// Wrappers of one kind with a name index. The first registration of a name wins.
pub struct Catalog<E: ?Sized + Entity> {
    items: Vec<Arc<Wrapper<E>>>,
    index: HashMap<String, usize>,
}

impl<E: ?Sized + Entity> Default for Catalog<E> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<E: ?Sized + Entity> Catalog<E> {
    fn push(&mut self, plugin: &str, wrapper: &Arc<Wrapper<E>>) {
        let name = wrapper.name().to_string();
        if self.index.contains_key(&name) {
            log::warn!(target: TAG, "plugin '{plugin}' registers {} '{name}' again; keeping the first one", E::KIND);
            return;
        }
        self.index.insert(name, self.items.len());
        self.items.push(Arc::clone(wrapper));
    }

    pub fn all(&self) -> &[Arc<Wrapper<E>>] {
        &self.items
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Wrapper<E>>> {
        self.index.get(name).map(|&i| &self.items[i])
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|w| w.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Snapshot of every registered wrapper, rebuilt after load/unload.
#[derive(Default)]
pub struct Registry {
    pub scenes: Catalog<dyn Scene>,
    pub image_providers: Catalog<dyn ImageProvider>,
    pub shader_providers: Catalog<dyn ShaderProvider>,
}

impl Registry {
    fn build(plugins: &[LoadedPlugin]) -> Self {
        let mut registry = Registry::default();
        for p in plugins {
            for w in &p.scenes {
                registry.scenes.push(&p.name, w);
            }
            for w in &p.image_providers {
                registry.image_providers.push(&p.name, w);
            }
            for w in &p.shader_providers {
                registry.shader_providers.push(&p.name, w);
            }
        }
        registry
    }
}

#[derive(Default)]
struct ManagerState {
    plugins: Vec<LoadedPlugin>,
    registry: Option<Arc<Registry>>,
}

pub struct PluginManager {
    plugin_dir: PathBuf,
    state: RwLock<ManagerState>,
    events: EventSink,
}

impl PluginManager {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            state: RwLock::new(ManagerState::default()),
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Load every plugin module found in the plugin directory. Returns how many loaded.
    pub fn initialize(&self) -> usize {
        let entries = match std::fs::read_dir(&self.plugin_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!(target: TAG, "plugin directory {} not readable: {e}", self.plugin_dir.display());
                return 0;
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        let mut loaded = 0;
        for dir in dirs {
            let Some(lib) = plugin_library_in(&dir) else {
                log::debug!(target: TAG, "no plugin library in {}", dir.display());
                continue;
            };
            match self.load_plugin(&lib) {
                Ok(_) => loaded += 1,
                Err(e) => {
                    log::error!(target: TAG, "skipping plugin {}: {e}", lib.display());
                    self.events.emit(EngineEvent::PluginFailed {
                        path: lib,
                        error: e.to_string(),
                    });
                }
            }
        }
        log::info!(target: TAG, "loaded {loaded} plugin module(s) from {}", self.plugin_dir.display());
        loaded
    }

    /// Open a plugin module, resolve its create/destroy pair and register the plugin.
    pub fn load_plugin(&self, path: &Path) -> Result<String, PluginError> {
        let name = library_name(path).ok_or_else(|| PluginError::InvalidName {
            path: path.to_path_buf(),
        })?;
        if self.is_loaded(&name) {
            return Err(PluginError::Duplicate { name });
        }

        // SAFETY: loading a library runs its initializers; plugin modules are trusted code.
        let library = unsafe { Library::new(path) }.map_err(|source| PluginError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let (create, destroy) = {
            let create_name = create_symbol(&name);
            let destroy_name = destroy_symbol(&name);
            // SAFETY: the symbol types match what `declare_plugin!` exports.
            let create = unsafe { library.get::<CreatePluginFn>(create_name.as_bytes()) }.map_err(|source| {
                PluginError::MissingSymbol {
                    path: path.to_path_buf(),
                    symbol: create_name.clone(),
                    source,
                }
            })?;
            let destroy = unsafe { library.get::<DestroyPluginFn>(destroy_name.as_bytes()) }.map_err(|source| {
                PluginError::MissingSymbol {
                    path: path.to_path_buf(),
                    symbol: destroy_name.clone(),
                    source,
                }
            })?;
            (*create, *destroy)
        };

        // SAFETY: `create` was resolved from `library`, which stays loaded via the guard below.
        let raw = unsafe { create() };
        if raw.is_null() {
            return Err(PluginError::NullPlugin {
                path: path.to_path_buf(),
            });
        }

        let module: ModuleGuard = Arc::new(library);
        let handle = PluginHandle::Dynamic(DynamicPlugin {
            raw,
            destroy,
            _library: Arc::clone(&module),
        });
        let loaded = LoadedPlugin::new(name.clone(), Some(path.to_path_buf()), handle, Some(module));
        self.insert(loaded)?;
        Ok(name)
    }

    /// Register a plugin compiled into the running executable.
    pub fn register_static(&self, name: &str, plugin: PluginBox) -> Result<(), PluginError> {
        if self.is_loaded(name) {
            return Err(PluginError::Duplicate { name: name.to_string() });
        }
        let loaded = LoadedPlugin::new(name.to_string(), None, PluginHandle::Static(plugin), None);
        self.insert(loaded)
    }

    fn insert(&self, loaded: LoadedPlugin) -> Result<(), PluginError> {
        let name = loaded.name.clone();
        let path = loaded.location.clone();
        let summary = format!(
            "{} scenes, {} image providers, {} shader providers",
            loaded.scenes.len(),
            loaded.image_providers.len(),
            loaded.shader_providers.len()
        );
        {
            let mut state = self.state.write();
            if state.plugins.iter().any(|p| p.name == name) {
                return Err(PluginError::Duplicate { name });
            }
            state.plugins.push(loaded);
            state.registry = None;
        }
        log::info!(target: TAG, "registered plugin '{name}' ({summary})");
        self.events.emit(EngineEvent::PluginLoaded { name, path });
        Ok(())
    }

    /// Remove one plugin. Its `pre_exit` hook runs before it is destroyed.
    pub fn unload_plugin(&self, name: &str) -> Result<(), PluginError> {
        let removed = {
            let mut state = self.state.write();
            let idx = state
                .plugins
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| PluginError::NotLoaded { name: name.to_string() })?;
            state.registry = None;
            state.plugins.remove(idx)
        };
        removed.handle.plugin().pre_exit();
        drop(removed);
        log::info!(target: TAG, "unloaded plugin '{name}'");
        self.events.emit(EngineEvent::PluginUnloaded { name: name.to_string() });
        Ok(())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state.read().plugins.iter().any(|p| p.name == name)
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.state.read().plugins.iter().map(|p| p.name.clone()).collect()
    }

    /// Name of the plugin loaded from `path`, if any.
    pub fn plugin_at(&self, path: &Path) -> Option<String> {
        self.state
            .read()
            .plugins
            .iter()
            .find(|p| p.location.as_deref().is_some_and(|l| l.starts_with(path) || path.starts_with(l)))
            .map(|p| p.name.clone())
    }

    /// Aggregated registry, built on first use after every load/unload.
    pub fn registry(&self) -> Arc<Registry> {
        let cached = self.state.read().registry.clone();
        if let Some(registry) = cached {
            return registry;
        }
        let mut state = self.state.write();
        if let Some(registry) = &state.registry {
            return Arc::clone(registry);
        }
        let registry = Arc::new(Registry::build(&state.plugins));
        state.registry = Some(Arc::clone(&registry));
        registry
    }

    pub fn refresh_scenes_cache(&self) {
        self.state.write().registry = None;
    }

    pub fn before_server_init(&self) -> Result<(), PluginError> {
        self.run_hook("before_server_init", |p| p.before_server_init())
    }

    pub fn after_server_init(&self) -> Result<(), PluginError> {
        self.run_hook("after_server_init", |p| p.after_server_init())
    }

    fn run_hook(
        &self,
        hook: &'static str,
        f: impl Fn(&dyn BasicPlugin) -> Result<(), String>,
    ) -> Result<(), PluginError> {
        let state = self.state.read();
        for p in &state.plugins {
            f(p.handle.plugin()).map_err(|message| PluginError::Hook {
                plugin: p.name.clone(),
                hook,
                message,
            })?;
        }
        Ok(())
    }

    /// Offer a UDP packet to each plugin until one consumes it.
    pub fn dispatch_udp(&self, packet_type: u8, payload: &[u8]) -> bool {
        let state = self.state.read();
        state.plugins.iter().any(|p| p.handle.plugin().on_udp_packet(packet_type, payload))
    }

    pub fn dispatch_websocket(&self, message: &str) -> bool {
        let state = self.state.read();
        state.plugins.iter().any(|p| p.handle.plugin().on_websocket_message(message))
    }

    pub fn dispatch_request(&self, request: &ApiRequest) -> Option<ApiResponse> {
        let state = self.state.read();
        state.plugins.iter().find_map(|p| p.handle.plugin().handle_request(request))
    }

    /// Run every `pre_exit` hook, then destroy all plugins in load order.
    pub fn terminate(&self) {
        {
            let state = self.state.read();
            for p in &state.plugins {
                log::debug!(target: TAG, "pre_exit '{}'", p.name);
                p.handle.plugin().pre_exit();
            }
        }

        let plugins = {
            let mut state = self.state.write();
            state.registry = None;
            std::mem::take(&mut state.plugins)
        };
        for p in plugins {
            log::debug!(target: TAG, "destroying '{}'", p.name);
            drop(p);
        }
        log::info!(target: TAG, "all plugins terminated");
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        if !self.state.get_mut().plugins.is_empty() {
            self.terminate();
        }
    }
}

/// `<dir>/<platform library filename of dir's name>`, when it exists.
pub fn plugin_library_in(dir: &Path) -> Option<PathBuf> {
    let name = dir.file_name()?;
    let lib = dir.join(libloading::library_filename(name));
    lib.is_file().then_some(lib)
}
