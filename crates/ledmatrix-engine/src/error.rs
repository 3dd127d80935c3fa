use std::path::PathBuf;

use thiserror::Error;

/// File-level failures (reading/writing the persisted config, plugin directories).
#[derive(Debug, Error)]
pub enum EngineError {
    /// I/O error for a file.
    #[error("I/O error for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON parse error for a file.
    #[error("JSON parse error for {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// JSON-to-typed deserialization error (when the JSON is already parsed).
    #[error("JSON deserialize error for {}: {source}", .path.display())]
    JsonValue {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Config is syntactically valid but semantically invalid.
    #[error("Invalid config {}: {msg}", .path.display())]
    InvalidConfig { path: PathBuf, msg: String },
}

/// Errors raised while declaring or loading typed properties.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PropertyError {
    #[error("property '{name}' is registered twice")]
    Duplicate { name: String },

    #[error("required property '{name}' is missing")]
    MissingRequired { name: String },

    #[error("property '{name}' has an invalid value: {reason}")]
    InvalidValue { name: String, reason: String },

    /// `get()` was called before a document was loaded into the property.
    #[error("property '{name}' was read before it was loaded")]
    NotRegistered { name: String },

    #[error("property arguments must be a JSON object, got {found}")]
    NotAnObject { found: String },
}

/// Errors turning persisted JSON into live presets, scenes and schedules.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The `type` of an envelope does not match any registered wrapper.
    #[error("unknown {kind} type '{name}' in {fragment}")]
    UnknownType {
        kind: &'static str,
        name: String,
        fragment: String,
    },

    #[error("missing or invalid field '{field}' in {fragment}")]
    MissingField {
        field: &'static str,
        fragment: String,
    },

    /// A typed block (`spotify`, `schedules`, ...) does not have the expected shape.
    #[error("malformed '{what}': {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("invalid arguments for '{entity}': {source}")]
    Property {
        entity: String,
        source: PropertyError,
    },

    #[error("invalid schedule '{id}': {reason}")]
    InvalidSchedule { id: String, reason: String },

    #[error("preset '{id}' already exists")]
    PresetExists { id: String },

    #[error("preset '{id}' is the current preset")]
    PresetInUse { id: String },

    #[error("preset '{id}' does not exist")]
    UnknownPreset { id: String },

    #[error("schedule '{id}' does not exist")]
    UnknownSchedule { id: String },
}

/// Errors opening, resolving or driving a plugin module.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("could not open plugin library {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        source: libloading::Error,
    },

    #[error("plugin library {} does not export '{symbol}': {source}", .path.display())]
    MissingSymbol {
        path: PathBuf,
        symbol: String,
        source: libloading::Error,
    },

    #[error("plugin library {} returned a null plugin", .path.display())]
    NullPlugin { path: PathBuf },

    #[error("cannot derive a plugin name from {}", .path.display())]
    InvalidName { path: PathBuf },

    #[error("a plugin named '{name}' is already loaded")]
    Duplicate { name: String },

    #[error("no plugin named '{name}' is loaded")]
    NotLoaded { name: String },

    #[error("plugin '{plugin}' failed in {hook}: {message}")]
    Hook {
        plugin: String,
        hook: &'static str,
        message: String,
    },
}

/// Content supplier failures. Callers treat both as "no content yet".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("no more content available")]
    Exhausted,

    #[error("fetch failed: {0}")]
    Fetch(String),
}
