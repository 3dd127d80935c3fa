//! Providers that ship with the engine itself.

use crate::plugin::BasicPlugin;
use crate::provider::{ImageCollection, ShaderCollection};
use crate::wrapper::{ImageProviderWrapper, ShaderProviderWrapper};

pub const BUILTIN_PLUGIN: &str = "builtin";

#[derive(Debug, Default)]
pub struct BuiltinPlugin;

impl BasicPlugin for BuiltinPlugin {
    fn create_image_providers(&self) -> Vec<ImageProviderWrapper> {
        vec![ImageProviderWrapper::image_provider(ImageCollection::new)]
    }

    fn create_shader_providers(&self) -> Vec<ShaderProviderWrapper> {
        vec![ShaderProviderWrapper::shader_provider(ShaderCollection::new)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::PluginManager;

    #[test]
    fn test_builtin_registers_both_collections() {
        let manager = PluginManager::new("unused");
        manager.register_static(BUILTIN_PLUGIN, Box::new(BuiltinPlugin)).unwrap();
        let registry = manager.registry();
        assert_eq!(registry.image_providers.names(), vec![ImageCollection::NAME]);
        assert_eq!(registry.shader_providers.names(), vec![ShaderCollection::NAME]);
        assert!(registry.scenes.is_empty());
    }
}
