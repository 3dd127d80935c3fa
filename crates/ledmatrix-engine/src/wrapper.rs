//! Factory façade in front of every scene and provider type.
//!
//! A wrapper lazily builds one memoized "default" instance that only answers metadata
//! questions (property names, types, defaults). Live objects always come from `create()` /
//! `instantiate()`, which return a fresh `Instance`.
//!
//! Objects built by a plugin's factory carry a clone of that plugin's module guard, so the
//! library stays mapped until the last object it produced has been dropped. They are freed
//! through a destroy hook compiled into the crate that defined the factory, never by the host.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock};

use libloading::Library;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::PropertyError;
use crate::property::{PropertyInfo, PropertySet};
use crate::provider::{prepare_image_provider, prepare_shader_provider, ImageProvider, ShaderProvider};
use crate::scene::{prepare_scene, Scene};

/// Keeps a plugin library loaded while anything it produced is alive.
pub type ModuleGuard = Arc<Library>;

/// What the wrapper layer needs from scenes and providers.
pub trait Entity: Send {
    /// Used in error messages ("unknown scene type ...").
    const KIND: &'static str;

    fn entity_name(&self) -> String;
    fn prepare(&mut self) -> Result<(), PropertyError>;
    fn load(&mut self, args: &Value) -> Result<(), PropertyError>;
    fn properties(&self) -> &PropertySet;
    fn uuid(&self) -> &str;
    fn set_uuid(&mut self, uuid: String);
    fn arguments(&self) -> Value;
}

impl Entity for dyn Scene {
    const KIND: &'static str = "scene";

    fn entity_name(&self) -> String {
        self.name()
    }

    fn prepare(&mut self) -> Result<(), PropertyError> {
        prepare_scene(self)
    }

    fn load(&mut self, args: &Value) -> Result<(), PropertyError> {
        self.load_properties(args)
    }

    fn properties(&self) -> &PropertySet {
        self.base().properties()
    }

    fn uuid(&self) -> &str {
        self.base().uuid()
    }

    fn set_uuid(&mut self, uuid: String) {
        self.base_mut().set_uuid(uuid);
    }

    fn arguments(&self) -> Value {
        self.to_json()
    }
}

impl Entity for dyn ImageProvider {
    const KIND: &'static str = "image provider";

    fn entity_name(&self) -> String {
        self.name()
    }

    fn prepare(&mut self) -> Result<(), PropertyError> {
        prepare_image_provider(self)
    }

    fn load(&mut self, args: &Value) -> Result<(), PropertyError> {
        self.load_properties(args)
    }

    fn properties(&self) -> &PropertySet {
        self.base().properties()
    }

    fn uuid(&self) -> &str {
        self.base().uuid()
    }

    fn set_uuid(&mut self, uuid: String) {
        self.base_mut().set_uuid(uuid);
    }

    fn arguments(&self) -> Value {
        self.to_json()
    }
}

impl Entity for dyn ShaderProvider {
    const KIND: &'static str = "shader provider";

    fn entity_name(&self) -> String {
        self.name()
    }

    fn prepare(&mut self) -> Result<(), PropertyError> {
        prepare_shader_provider(self)
    }

    fn load(&mut self, args: &Value) -> Result<(), PropertyError> {
        self.load_properties(args)
    }

    fn properties(&self) -> &PropertySet {
        self.base().properties()
    }

    fn uuid(&self) -> &str {
        self.base().uuid()
    }

    fn set_uuid(&mut self, uuid: String) {
        self.base_mut().set_uuid(uuid);
    }

    fn arguments(&self) -> Value {
        self.to_json()
    }
}

/// Frees an object through the crate that allocated it.
pub type Destroy<E> = fn(Box<E>);

/// Instantiated once per factory type `F`, so the code (and the allocator it frees with) lives
/// in the crate that defined the factory.
fn destroy_in<F, E: ?Sized>(object: Box<E>) {
    drop(object);
}

/// A uniquely owned scene/provider plus the guard of the module that allocated it.
pub struct Instance<E: ?Sized> {
    inner: ManuallyDrop<Box<E>>,
    destroy: Destroy<E>,
    // Released after `drop` has run `destroy`, so the module's code is still mapped.
    module: Option<ModuleGuard>,
}

impl<E: ?Sized> Instance<E> {
    /// Wrap an object allocated by the running executable.
    pub fn new(inner: Box<E>) -> Self {
        Self {
            inner: ManuallyDrop::new(inner),
            destroy: destroy_in::<(), E>,
            module: None,
        }
    }

    /// Swap in an object allocated by the running executable. The previous object is destroyed
    /// by its own module before the module guard is released.
    pub fn replace(&mut self, inner: Box<E>) {
        let old = std::mem::replace(&mut *self.inner, inner);
        (self.destroy)(old);
        self.destroy = destroy_in::<(), E>;
        self.module = None;
    }

    pub fn is_from_module(&self) -> bool {
        self.module.is_some()
    }
}

impl<E: ?Sized> Drop for Instance<E> {
    fn drop(&mut self) {
        // SAFETY: `inner` is never touched again after this point.
        let inner = unsafe { ManuallyDrop::take(&mut self.inner) };
        (self.destroy)(inner);
    }
}

impl<E: ?Sized> Deref for Instance<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.inner
    }
}

impl<E: ?Sized> DerefMut for Instance<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.inner
    }
}

type Factory<E> = Box<dyn Fn() -> Box<E> + Send + Sync>;

pub struct Wrapper<E: ?Sized + Entity> {
    factory: Factory<E>,
    destroy: Destroy<E>,
    default: Mutex<Option<Box<E>>>,
    name: OnceLock<String>,
    module: Option<ModuleGuard>,
}

pub type SceneWrapper = Wrapper<dyn Scene>;
pub type ImageProviderWrapper = Wrapper<dyn ImageProvider>;
pub type ShaderProviderWrapper = Wrapper<dyn ShaderProvider>;

pub type SceneInstance = Instance<dyn Scene>;
pub type ImageProviderInstance = Instance<dyn ImageProvider>;
pub type ShaderProviderInstance = Instance<dyn ShaderProvider>;

/// Name plus property metadata, as listed by the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct EntityInfo {
    pub name: String,
    pub properties: Vec<PropertyInfo>,
}

impl<E: ?Sized + Entity> Wrapper<E> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Box<E> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            destroy: destroy_in::<F, E>,
            default: Mutex::new(None),
            name: OnceLock::new(),
            module: None,
        }
    }

    /// Replace the hook that frees objects built by this wrapper.
    pub fn with_destroy(mut self, destroy: Destroy<E>) -> Self {
        self.destroy = destroy;
        self
    }

    pub(crate) fn with_module(mut self, module: ModuleGuard) -> Self {
        self.module = Some(module);
        self
    }

    /// Dispatch key, computed once.
    pub fn name(&self) -> &str {
        self.name.get_or_init(|| self.create().entity_name())
    }

    /// A fresh, unprepared object.
    pub fn create(&self) -> Instance<E> {
        Instance {
            inner: ManuallyDrop::new((self.factory)()),
            destroy: self.destroy,
            module: self.module.clone(),
        }
    }

    /// A fresh object with its properties declared, `args` loaded and a new uuid.
    pub fn instantiate(&self, args: &Value) -> Result<Instance<E>, PropertyError> {
        let mut instance = self.create();
        instance.prepare()?;
        instance.load(args)?;
        instance.set_uuid(Uuid::new_v4().to_string());
        Ok(instance)
    }

    /// Run `f` against the memoized default object. Never hand this object to a renderer.
    pub fn with_default<R>(&self, f: impl FnOnce(&E) -> R) -> Result<R, PropertyError> {
        let mut slot = self.default.lock();
        let entity = match slot.take() {
            Some(entity) => entity,
            None => {
                let mut entity = (self.factory)();
                if let Err(e) = entity.prepare() {
                    (self.destroy)(entity);
                    return Err(e);
                }
                entity
            }
        };
        let out = f(&entity);
        *slot = Some(entity);
        Ok(out)
    }

    pub fn describe(&self) -> Result<EntityInfo, PropertyError> {
        let properties = self.with_default(|e| e.properties().describe())?;
        Ok(EntityInfo {
            name: self.name().to_string(),
            properties,
        })
    }
}

impl<E: ?Sized + Entity> Drop for Wrapper<E> {
    fn drop(&mut self) {
        if let Some(entity) = self.default.get_mut().take() {
            (self.destroy)(entity);
        }
    }
}

impl<E: ?Sized + Entity> fmt::Debug for Wrapper<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapper")
            .field("kind", &E::KIND)
            .field("name", &self.name.get())
            .field("from_module", &self.module.is_some())
            .finish()
    }
}

impl Wrapper<dyn Scene> {
    pub fn scene<S: Scene + 'static>(make: impl Fn() -> S + Send + Sync + 'static) -> Self {
        Self::new(move || Box::new(make()) as Box<dyn Scene>)
    }
}

impl Wrapper<dyn ImageProvider> {
    pub fn image_provider<P: ImageProvider + 'static>(make: impl Fn() -> P + Send + Sync + 'static) -> Self {
        Self::new(move || Box::new(make()) as Box<dyn ImageProvider>)
    }
}

impl Wrapper<dyn ShaderProvider> {
    pub fn shader_provider<P: ShaderProvider + 'static>(make: impl Fn() -> P + Send + Sync + 'static) -> Self {
        Self::new(move || Box::new(make()) as Box<dyn ShaderProvider>)
    }
}
