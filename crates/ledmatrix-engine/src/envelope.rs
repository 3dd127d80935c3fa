//! `{type, arguments, uuid}` envelopes used to persist scenes and providers.
//!
//! `type` is matched against the registered wrapper names, `arguments` is the property bag and
//! `uuid` is kept when present so identities survive save/load.

use serde_json::{json, Value};

use crate::error::ConfigError;
use crate::manager::{Catalog, Registry};
use crate::provider::{ImageProvider, ShaderProvider};
use crate::scene::Scene;
use crate::wrapper::{Entity, ImageProviderInstance, Instance, SceneInstance, ShaderProviderInstance};

const FRAGMENT_LIMIT: usize = 200;

/// Compact JSON for error messages.
pub fn fragment(j: &Value) -> String {
    let s = j.to_string();
    if s.len() <= FRAGMENT_LIMIT {
        return s;
    }
    let mut end = FRAGMENT_LIMIT;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

pub fn instance_from_json<E: ?Sized + Entity>(j: &Value, catalog: &Catalog<E>) -> Result<Instance<E>, ConfigError> {
    let ty = j
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::MissingField {
            field: "type",
            fragment: fragment(j),
        })?;
    let wrapper = catalog.get(ty).ok_or_else(|| ConfigError::UnknownType {
        kind: E::KIND,
        name: ty.to_string(),
        fragment: fragment(j),
    })?;

    let args = j.get("arguments").unwrap_or(&Value::Null);
    let mut instance = wrapper.instantiate(args).map_err(|source| ConfigError::Property {
        entity: ty.to_string(),
        source,
    })?;
    if let Some(uuid) = j.get("uuid").and_then(Value::as_str).filter(|u| !u.is_empty()) {
        instance.set_uuid(uuid.to_string());
    }
    Ok(instance)
}

pub fn instance_to_json<E: ?Sized + Entity>(entity: &E) -> Value {
    json!({
        "type": entity.entity_name(),
        "arguments": entity.arguments(),
        "uuid": entity.uuid(),
    })
}

pub fn scene_from_json(j: &Value, registry: &Registry) -> Result<SceneInstance, ConfigError> {
    instance_from_json::<dyn Scene>(j, &registry.scenes)
}

pub fn image_provider_from_json(j: &Value, registry: &Registry) -> Result<ImageProviderInstance, ConfigError> {
    instance_from_json::<dyn ImageProvider>(j, &registry.image_providers)
}

pub fn shader_provider_from_json(j: &Value, registry: &Registry) -> Result<ShaderProviderInstance, ConfigError> {
    instance_from_json::<dyn ShaderProvider>(j, &registry.shader_providers)
}
