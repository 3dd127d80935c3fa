//! Plugin capability set and the symbol-pair ABI.
//!
//! A plugin module exports two C symbols derived from its library name (`libfoo.so` -> `foo`):
//!
//!   create<foo>()  -> *mut PluginBox
//!   destroy<foo>(*mut PluginBox)
//!
//! `declare_plugin!` generates both. The manager only ever frees a plugin through the destroy
//! symbol of the module that created it. Both sides must be built against the same
//! `ledmatrix-engine` with the same compiler, since the boxed trait object crosses the boundary.

use std::path::Path;

use crate::api::{ApiRequest, ApiResponse};
use crate::wrapper::{ImageProviderWrapper, SceneWrapper, ShaderProviderWrapper};

pub trait BasicPlugin: Send + Sync {
    fn create_scenes(&self) -> Vec<SceneWrapper> {
        Vec::new()
    }

    fn create_image_providers(&self) -> Vec<ImageProviderWrapper> {
        Vec::new()
    }

    fn create_shader_providers(&self) -> Vec<ShaderProviderWrapper> {
        Vec::new()
    }

    /// Runs before the HTTP surface starts. An error aborts startup.
    fn before_server_init(&self) -> Result<(), String> {
        Ok(())
    }

    fn after_server_init(&self) -> Result<(), String> {
        Ok(())
    }

    /// Runs before any plugin module is unloaded.
    fn pre_exit(&self) {}

    /// Return true when the packet was consumed.
    fn on_udp_packet(&self, _packet_type: u8, _payload: &[u8]) -> bool {
        false
    }

    fn on_websocket_message(&self, _message: &str) -> bool {
        false
    }

    /// Serve a route the core does not know.
    fn handle_request(&self, _request: &ApiRequest) -> Option<ApiResponse> {
        None
    }
}

pub type PluginBox = Box<dyn BasicPlugin>;
pub type CreatePluginFn = unsafe extern "C" fn() -> *mut PluginBox;
pub type DestroyPluginFn = unsafe extern "C" fn(*mut PluginBox);

/// `libfoo.so` / `foo.dll` / `libfoo.dylib` -> `foo`.
pub fn library_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let name = stem.strip_prefix("lib").unwrap_or(stem);
    (!name.is_empty()).then(|| name.to_string())
}

pub fn create_symbol(library_name: &str) -> String {
    format!("create{library_name}")
}

pub fn destroy_symbol(library_name: &str) -> String {
    format!("destroy{library_name}")
}

/// Export the create/destroy pair for a plugin crate.
///
/// ```ignore
/// ledmatrix_engine::declare_plugin!(DemoPlugin::default(), createdemo_scenes, destroydemo_scenes);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($ctor:expr, $create:ident, $destroy:ident) => {
        #[no_mangle]
        #[allow(non_snake_case)]
        pub extern "C" fn $create() -> *mut $crate::plugin::PluginBox {
            match ::std::panic::catch_unwind(|| -> $crate::plugin::PluginBox { Box::new($ctor) }) {
                Ok(plugin) => Box::into_raw(Box::new(plugin)),
                Err(_) => ::std::ptr::null_mut(),
            }
        }

        /// # Safety
        /// `plugin` must come from the matching create function and be freed only once.
        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn $destroy(plugin: *mut $crate::plugin::PluginBox) {
            if !plugin.is_null() {
                drop(Box::from_raw(plugin));
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_library_name_strips_prefix_and_extension() {
        assert_eq!(library_name(&PathBuf::from("plugins/fx/libfx.so")), Some("fx".into()));
        assert_eq!(library_name(&PathBuf::from("fx.dll")), Some("fx".into()));
        assert_eq!(library_name(&PathBuf::from("lib.so")), None);
        assert_eq!(create_symbol("fx"), "createfx");
        assert_eq!(destroy_symbol("fx"), "destroyfx");
    }

    struct Nothing;
    impl BasicPlugin for Nothing {}

    crate::declare_plugin!(Nothing, createnothing, destroynothing);

    #[test]
    fn test_declared_symbols_round_trip() {
        let raw = createnothing();
        assert!(!raw.is_null());
        // SAFETY: pointer comes straight from the matching create function.
        unsafe {
            assert!((*raw).create_scenes().is_empty());
            destroynothing(raw);
        }
    }
}
