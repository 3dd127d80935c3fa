use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::EngineError;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Where the runtime keeps its persisted config and looks for plugin modules.
///
/// This is the canonical way to pass file locations into the engine, keeping path resolution
/// consistent between the runtime binary and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    config: PathBuf,
    plugin_dir: PathBuf,
}

impl RuntimePaths {
    pub fn new(config: impl Into<PathBuf>, plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: config.into(),
            plugin_dir: plugin_dir.into(),
        }
    }

    /// Resolution order for each path:
    /// 1) explicit value (CLI)
    /// 2) `CONFIG_PATH` / `PLUGIN_DIR` env var
    /// 3) `config.json` in the working directory / `plugins/` next to the executable
    pub fn resolve(config: Option<PathBuf>, plugin_dir: Option<PathBuf>) -> Self {
        let config = config
            .or_else(|| std::env::var_os("CONFIG_PATH").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let plugin_dir = plugin_dir
            .or_else(|| std::env::var_os("PLUGIN_DIR").map(PathBuf::from))
            .unwrap_or_else(|| exe_dir().join("plugins"));
        Self { config, plugin_dir }
    }

    pub fn config(&self) -> &Path {
        &self.config
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }
}

/// Directory of the running executable, or `.` when it cannot be determined.
pub fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Read a UTF-8 file into a String (Result-based).
pub fn read_to_string_result(path: &Path) -> Result<String, EngineError> {
    std::fs::read_to_string(path).map_err(|e| EngineError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Parse a JSON file into an untyped value.
pub fn load_json_value(path: &Path) -> Result<Value, EngineError> {
    let s = read_to_string_result(path)?;
    serde_json::from_str(&s).map_err(|e| EngineError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Write pretty JSON through a sibling temp file and rename it into place, so a crash never
/// leaves a half-written document.
pub fn write_json_atomic(path: &Path, value: &Value) -> Result<(), EngineError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| EngineError::JsonValue {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let io = |source: std::io::Error| EngineError::Io {
        path: path.to_path_buf(),
        source,
    };
    std::fs::write(&tmp, text).map_err(io)?;
    std::fs::rename(&tmp, path).map_err(io)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_explicit_paths_win() {
        let p = RuntimePaths::resolve(Some("a.json".into()), Some("mods".into()));
        assert_eq!(p.config(), Path::new("a.json"));
        assert_eq!(p.plugin_dir(), Path::new("mods"));
    }

    #[test]
    fn test_write_then_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_json_atomic(&path, &json!({"curr": "A"})).unwrap();
        assert_eq!(load_json_value(&path).unwrap(), json!({"curr": "A"}));
        assert!(!dir.path().join("config.json.tmp").exists());
    }

    #[test]
    fn test_errors_carry_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = load_json_value(&path).unwrap_err();
        assert!(matches!(err, EngineError::Json { .. }));
        assert!(err.to_string().contains("broken.json"));

        let missing = dir.path().join("missing.json");
        assert!(matches!(load_json_value(&missing), Err(EngineError::Io { .. })));
    }
}
