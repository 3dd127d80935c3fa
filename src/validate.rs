//! Config validation (friendly errors)
//!
//! Runs over the raw `config.json` before it is loaded, so every problem is reported at once
//! with a JSON-pointer path and a hint, instead of the loader stopping at the first one.

use std::collections::BTreeSet;

use ledmatrix_engine::config::DEFAULT_PRESET;
use ledmatrix_engine::Registry;
use serde_json::Value;

use crate::{loge, logi, logw};

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub level: IssueLevel,
    pub path: String,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    Warn,
    Error,
}

impl ValidationIssue {
    pub fn warn(path: impl Into<String>, message: impl Into<String>, hint: Option<String>) -> Self {
        Self { level: IssueLevel::Warn, path: path.into(), message: message.into(), hint }
    }
    pub fn error(path: impl Into<String>, message: impl Into<String>, hint: Option<String>) -> Self {
        Self { level: IssueLevel::Error, path: path.into(), message: message.into(), hint }
    }
}

pub fn emit_issues(tag: &str, issues: &[ValidationIssue]) {
    for it in issues {
        let hint = it.hint.as_deref().map(|h| format!(" (hint: {h})")).unwrap_or_default();
        match it.level {
            IssueLevel::Warn => logw!(tag, "{}: {}{hint}", it.path, it.message),
            IssueLevel::Error => loge!(tag, "{}: {}{hint}", it.path, it.message),
        }
    }
}

/// One summary line even when there are zero issues, so the log shows validation ran.
pub fn emit_summary(tag: &str, label: &str, issues: &[ValidationIssue]) {
    let warns = issues.iter().filter(|i| i.level == IssueLevel::Warn).count();
    let errs = issues.iter().filter(|i| i.level == IssueLevel::Error).count();
    if errs == 0 && warns == 0 {
        logi!(tag, "validation: {label} OK (0 issues)");
    } else {
        logw!(tag, "validation: {label} issues found (errors={errs} warnings={warns})");
    }
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(|i| i.level == IssueLevel::Error)
}

/// Check presets against the registered scene types, and `curr`/schedules against the presets.
pub fn validate_config_json(config: &Value, registry: &Registry) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let Some(root) = config.as_object() else {
        issues.push(ValidationIssue::error(
            "config.json:",
            "top level is not an object",
            Some("expected something like { \"presets\": { ... }, \"curr\": \"Default\" }".into()),
        ));
        return issues;
    };

    let mut preset_ids = BTreeSet::new();
    match root.get("presets") {
        None | Some(Value::Null) => {
            preset_ids.insert(DEFAULT_PRESET.to_string());
        }
        Some(Value::Object(presets)) => {
            for (id, preset) in presets {
                preset_ids.insert(id.clone());
                validate_preset(&format!("config.json:/presets/{}", escape_ptr(id)), preset, registry, &mut issues);
            }
        }
        Some(_) => issues.push(ValidationIssue::error(
            "config.json:/presets",
            "'presets' is not an object",
            Some("map preset ids to { \"scenes\": [...] }".into()),
        )),
    }

    match root.get("curr") {
        None | Some(Value::Null) => {}
        Some(Value::String(curr)) if !preset_ids.contains(curr) => issues.push(ValidationIssue::warn(
            "config.json:/curr",
            format!("current preset '{curr}' does not exist"),
            Some(format!("pick one of: {}", join(&preset_ids))),
        )),
        Some(Value::String(_)) => {}
        Some(_) => issues.push(ValidationIssue::error("config.json:/curr", "'curr' is not a string", None)),
    }

    if let Some(schedules) = root.get("schedules").filter(|v| !v.is_null()) {
        match schedules.as_object() {
            Some(map) => {
                for (id, s) in map {
                    validate_schedule(&format!("config.json:/schedules/{}", escape_ptr(id)), s, &preset_ids, &mut issues);
                }
            }
            None => issues.push(ValidationIssue::error(
                "config.json:/schedules",
                "'schedules' is not an object",
                Some("map schedule ids to schedule objects".into()),
            )),
        }
    }

    issues
}

fn validate_preset(base: &str, preset: &Value, registry: &Registry, issues: &mut Vec<ValidationIssue>) {
    let scenes = match preset.get("scenes") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Array(scenes)) => scenes.as_slice(),
        Some(_) => {
            issues.push(ValidationIssue::error(
                format!("{base}/scenes"),
                "'scenes' is not an array",
                Some("a preset is { \"scenes\": [ {\"type\": ..., \"arguments\": {...}} ] }".into()),
            ));
            return;
        }
    };
    if scenes.is_empty() {
        issues.push(ValidationIssue::warn(
            format!("{base}/scenes"),
            "preset has no scenes; defaults will be used",
            Some("one default-configured scene of every registered type is added on load".into()),
        ));
    }
    for (i, scene) in scenes.iter().enumerate() {
        let path = format!("{base}/scenes/{i}/type");
        match scene.get("type").and_then(Value::as_str) {
            None => issues.push(ValidationIssue::error(path, "missing or non-string scene type", None)),
            Some(ty) if registry.scenes.get(ty).is_none() => issues.push(ValidationIssue::error(
                path,
                format!("unknown scene type '{ty}'"),
                Some(format!("registered scene types: {}", registry.scenes.names().join(", "))),
            )),
            Some(_) => {}
        }
    }
}

fn validate_schedule(base: &str, s: &Value, presets: &BTreeSet<String>, issues: &mut Vec<ValidationIssue>) {
    match s.get("preset_id").and_then(Value::as_str) {
        None => issues.push(ValidationIssue::error(format!("{base}/preset_id"), "missing preset_id", None)),
        Some(p) if !presets.contains(p) => issues.push(ValidationIssue::warn(
            format!("{base}/preset_id"),
            format!("schedule points at missing preset '{p}'"),
            Some("the schedule is ignored until that preset exists".into()),
        )),
        Some(_) => {}
    }
    for (field, max) in [("start_hour", 23), ("end_hour", 23), ("start_minute", 59), ("end_minute", 59)] {
        match s.get(field).and_then(Value::as_u64) {
            Some(v) if v <= max => {}
            Some(v) => issues.push(ValidationIssue::error(
                format!("{base}/{field}"),
                format!("{v} is outside 0..={max}"),
                None,
            )),
            None => issues.push(ValidationIssue::error(
                format!("{base}/{field}"),
                "missing or non-integer field",
                None,
            )),
        }
    }
    match s.get("days_of_week").and_then(Value::as_array) {
        Some(days) => {
            for (i, d) in days.iter().enumerate() {
                if d.as_u64().map_or(true, |d| d > 6) {
                    issues.push(ValidationIssue::error(
                        format!("{base}/days_of_week/{i}"),
                        format!("{d} is not a day of week"),
                        Some("use 0 = Sunday .. 6 = Saturday".into()),
                    ));
                }
            }
        }
        None => issues.push(ValidationIssue::error(
            format!("{base}/days_of_week"),
            "missing or non-array days_of_week",
            None,
        )),
    }
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// RFC 6901 escaping for a single pointer segment.
fn escape_ptr(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use ledmatrix_engine::builtin::{BuiltinPlugin, BUILTIN_PLUGIN};
    use ledmatrix_engine::PluginManager;
    use serde_json::json;

    use super::*;

    fn registry() -> std::sync::Arc<Registry> {
        let manager = PluginManager::new("does-not-exist");
        manager.register_static(BUILTIN_PLUGIN, Box::new(BuiltinPlugin)).unwrap();
        manager
            .register_static("demo", Box::new(demo_scenes::DemoPlugin::default()))
            .unwrap();
        manager.registry()
    }

    #[test]
    fn test_clean_config_has_no_issues() {
        let cfg = json!({
            "presets": {"A": {"scenes": [{"type": "color_pulse", "arguments": {}}]}},
            "curr": "A",
            "schedules": {"n": {"preset_id": "A", "start_hour": 22, "start_minute": 0,
                                "end_hour": 6, "end_minute": 30, "days_of_week": [0, 6]}}
        });
        assert!(validate_config_json(&cfg, &registry()).is_empty());
        assert!(validate_config_json(&json!({}), &registry()).is_empty());
    }

    #[test]
    fn test_presets_without_scenes_only_warn() {
        let registry = registry();
        for preset in [json!({}), json!({"scenes": []}), json!({"scenes": null})] {
            let cfg = json!({"presets": {"A": preset}, "curr": "A"});
            let issues = validate_config_json(&cfg, &registry);
            assert!(!has_errors(&issues), "{issues:?}");
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].path, "config.json:/presets/A/scenes");
            assert!(issues[0].message.contains("defaults will be used"));
        }

        let issues = validate_config_json(&json!({"presets": {"A": {"scenes": 3}}}), &registry);
        assert!(has_errors(&issues));
    }

    #[test]
    fn test_reports_every_problem_with_pointer_paths() {
        let cfg = json!({
            "presets": {"a/b": {"scenes": [{"type": "nope"}]}},
            "curr": "missing",
            "schedules": {"s": {"preset_id": "ghost", "start_hour": 24, "start_minute": 0,
                                "end_hour": 1, "end_minute": 0, "days_of_week": [7]}}
        });
        let issues = validate_config_json(&cfg, &registry());
        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"config.json:/presets/a~1b/scenes/0/type"));
        assert!(paths.contains(&"config.json:/curr"));
        assert!(paths.contains(&"config.json:/schedules/s/preset_id"));
        assert!(paths.contains(&"config.json:/schedules/s/start_hour"));
        assert!(paths.contains(&"config.json:/schedules/s/days_of_week/0"));
        assert!(has_errors(&issues));
    }
}
