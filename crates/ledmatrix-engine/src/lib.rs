//! LED matrix runtime core: typed properties, scenes and providers, the plugin ABI and
//! manager, the persisted config, the render loop and the transport-free HTTP routes.

pub mod api;
pub mod builtin;
pub mod canvas;
pub mod clock;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod events;
pub mod fallback;
pub mod manager;
pub mod paths;
pub mod plugin;
pub mod property;
pub mod provider;
pub mod render;
pub mod scene;
pub mod task;
pub mod wrapper;

pub use canvas::{Color, FrameCanvas, Matrix, MemoryCanvas, MemoryMatrix};
pub use config::{MainConfig, Preset, Schedule};
pub use context::{AppContext, RuntimeFlags};
pub use error::{ConfigError, EngineError, PluginError, PropertyError, ProviderError};
pub use manager::{PluginManager, Registry};
pub use plugin::BasicPlugin;
pub use property::{Choice, Property, PropertyEnum};
pub use render::RenderLoop;
pub use scene::{Scene, SceneBase};
pub use wrapper::{ImageProviderWrapper, SceneWrapper, ShaderProviderWrapper};
