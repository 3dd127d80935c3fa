//! Transport-free HTTP surface.
//!
//! A server front-end turns each request into an [`ApiRequest`] and writes back the
//! [`ApiResponse`] from [`handle`]. Errors are `{"error": "..."}` with a 4xx status, successes
//! carry `{"success": "..."}` plus route-specific fields. Routes the core does not know are
//! offered to the loaded plugins before answering 404.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::config::{Preset, Schedule};
use crate::context::AppContext;
use crate::envelope::instance_to_json;
use crate::error::ConfigError;
use crate::scene::Scene;
use crate::wrapper::{Entity, EntityInfo, Wrapper};

const TAG: &str = "API";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Set when the query string could not be decoded; `handle` answers 400.
    pub query_error: Option<String>,
    pub body: String,
}

impl ApiRequest {
    /// Build a request from a target such as `/schedule?id=night`.
    pub fn new(method: Method, target: &str, body: impl Into<String>) -> Self {
        let (path, parsed) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, Ok(HashMap::new())),
        };
        let (query, query_error) = match parsed {
            Ok(query) => (query, None),
            Err(e) => (HashMap::new(), Some(e)),
        };
        Self {
            method,
            path: path.to_string(),
            query,
            query_error,
            body: body.into(),
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::Get, target, "")
    }

    pub fn post(target: &str, body: impl Into<String>) -> Self {
        Self::new(Method::Post, target, body)
    }

    pub fn delete(target: &str) -> Self {
        Self::new(Method::Delete, target, "")
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Parse the body as JSON. An empty body is `None`.
    pub fn json(&self) -> Option<Result<Value, serde_json::Error>> {
        if self.body.trim().is_empty() {
            return None;
        }
        Some(serde_json::from_str(&self.body))
    }
}

/// `application/x-www-form-urlencoded` pairs. Keys or values that are not UTF-8 after
/// decoding make the whole query malformed.
fn parse_query(query: &str) -> Result<HashMap<String, String>, String> {
    let field = |raw: &str| {
        urlencoding::decode(&raw.replace('+', " "))
            .map(|s| s.into_owned())
            .map_err(|e| format!("'{raw}' is not valid UTF-8 after decoding: {e}"))
    };
    query
        .split('&')
        .filter(|kv| !kv.is_empty())
        .map(|kv| match kv.split_once('=') {
            Some((k, v)) => Ok((field(k)?, field(v)?)),
            None => Ok((field(kv)?, String::new())),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn success(message: &str) -> Self {
        Self::ok(json!({ "success": message }))
    }

    /// `{"success": message}` merged with the fields of `extra`.
    pub fn success_with(message: &str, extra: Value) -> Self {
        let mut body = Map::new();
        body.insert("success".into(), Value::from(message));
        if let Value::Object(fields) = extra {
            body.extend(fields);
        }
        Self::ok(Value::Object(body))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::error_with_status(400, message)
    }

    pub fn error_with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    pub fn not_found() -> Self {
        Self::error_with_status(404, "Not found")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Route one request.
pub fn handle(ctx: &AppContext, req: &ApiRequest) -> ApiResponse {
    log::debug!(target: TAG, "{:?} {}", req.method, req.path);
    if let Some(e) = &req.query_error {
        log::warn!(target: TAG, "malformed query for {}: {e}", req.path);
        return ApiResponse::error("Malformed query string");
    }
    let response = match (req.method, req.path.as_str()) {
        (Method::Get, "/list_scenes") => list(ctx.plugins.registry().scenes.all()),
        (Method::Get, "/list_providers") => list(ctx.plugins.registry().image_providers.all()),
        (Method::Get, "/list_shader_providers") => list(ctx.plugins.registry().shader_providers.all()),
        (Method::Get, "/get_curr") => get_curr(ctx),
        (Method::Get, "/presets") => presets(ctx, req),
        (Method::Get, "/list_presets") => {
            let all: Map<String, Value> = ctx
                .config
                .presets()
                .iter()
                .map(|(id, p)| (id.clone(), p.to_json()))
                .collect();
            ApiResponse::ok(Value::Object(all))
        }
        (Method::Get, "/set_preset") => set_preset(ctx, req),
        (Method::Get, "/status") => ApiResponse::ok(json!({
            "turned_off": ctx.flags.is_turned_off(),
            "current": ctx.config.curr_id(),
        })),
        (Method::Get, "/toggle") => {
            ctx.flags.set_turned_off(!ctx.flags.is_turned_off());
            ctx.flags.request_reload();
            ApiResponse::ok(json!({ "turned_off": ctx.flags.is_turned_off() }))
        }
        (Method::Get, "/set_enabled") => match req.param("enabled") {
            None => ApiResponse::error("No enabled given"),
            Some(enabled) => {
                ctx.flags.set_turned_off(enabled == "false");
                ctx.flags.request_reload();
                ApiResponse::ok(json!({ "turned_off": ctx.flags.is_turned_off() }))
            }
        },
        (Method::Get, "/skip") => {
            ctx.flags.skip();
            ApiResponse::success("Skipped")
        }
        (Method::Get, "/schedules") => ApiResponse::ok(json!(ctx.config.schedules())),
        (Method::Get, "/schedule") => match req.param("id") {
            None => ApiResponse::error("No schedule ID given"),
            Some(id) => match ctx.config.schedule(id) {
                Some(schedule) => ApiResponse::ok(json!(schedule)),
                None => ApiResponse::error("Schedule not found"),
            },
        },
        (Method::Get, "/scheduling_status") => ApiResponse::ok(json!({
            "enabled": ctx.config.is_scheduling_enabled(),
            "active_preset": ctx.config.active_scheduled_preset(&ctx.clock).unwrap_or_else(|| "none".into()),
        })),
        (Method::Post, "/scheduling_status") => match req.json() {
            Some(Ok(body)) => match body.get("enabled").and_then(Value::as_bool) {
                Some(enabled) => {
                    ctx.config.set_scheduling_enabled(enabled);
                    ApiResponse::ok(json!({ "enabled": enabled }))
                }
                None => ApiResponse::error("No enabled parameter given"),
            },
            _ => ApiResponse::error("Invalid json payload"),
        },
        (Method::Post, "/schedule") => post_schedule(ctx, req),
        (Method::Post, "/add_preset") => add_preset(ctx, req),
        (Method::Post, "/preset") => post_preset(ctx, req),
        (Method::Delete, "/preset") => match req.param("id") {
            None => ApiResponse::error("Id not given"),
            Some(id) => match ctx.config.delete_preset(id) {
                Ok(()) => ApiResponse::success("Preset has been deleted"),
                Err(ConfigError::PresetInUse { .. }) => ApiResponse::error("Can not delete current preset"),
                Err(e) => ApiResponse::error(e.to_string()),
            },
        },
        (Method::Delete, "/schedule") => match req.param("id") {
            None => ApiResponse::error("No schedule ID given"),
            Some(id) => match ctx.config.delete_schedule(id) {
                Ok(()) => ApiResponse::success("Schedule deleted"),
                Err(_) => ApiResponse::error("Schedule not found"),
            },
        },
        _ => match ctx.plugins.dispatch_request(req) {
            Some(response) => response,
            None => ApiResponse::not_found(),
        },
    };
    if !response.is_success() {
        log::debug!(target: TAG, "{} -> {}: {}", req.path, response.status, response.body);
    }
    response
}

fn list<E: ?Sized + Entity>(wrappers: &[Arc<Wrapper<E>>]) -> ApiResponse {
    let infos: Vec<EntityInfo> = wrappers
        .iter()
        .filter_map(|w| match w.describe() {
            Ok(info) => Some(info),
            Err(e) => {
                log::warn!(target: TAG, "cannot describe '{}': {e}", w.name());
                None
            }
        })
        .collect();
    ApiResponse::ok(json!(infos))
}

fn get_curr(ctx: &AppContext) -> ApiResponse {
    let Some(preset) = ctx.config.curr() else {
        return ApiResponse::error("Current preset does not exist");
    };
    let scenes: Vec<Value> = preset
        .scenes()
        .iter()
        .map(|s| {
            let scene = s.lock();
            let envelope = instance_to_json::<dyn Scene>(&**scene);
            json!({
                "name": envelope["type"],
                "properties": envelope["arguments"],
                "uuid": envelope["uuid"],
            })
        })
        .collect();
    ApiResponse::ok(json!(scenes))
}

fn presets(ctx: &AppContext, req: &ApiRequest) -> ApiResponse {
    match req.param("id") {
        None => ApiResponse::ok(json!(ctx.config.preset_ids())),
        Some(id) => match ctx.config.preset(id) {
            Some(preset) => ApiResponse::ok(preset.to_json()),
            None => ApiResponse::error("Could not find id"),
        },
    }
}

fn set_preset(ctx: &AppContext, req: &ApiRequest) -> ApiResponse {
    let Some(id) = req.param("id") else {
        return ApiResponse::error("No Id given");
    };
    match ctx.config.set_curr(id) {
        Ok(()) => ApiResponse::success("Preset selected"),
        Err(_) => ApiResponse::error("Invalid id"),
    }
}

/// Parse the request body as a preset. An empty body yields the default preset.
fn preset_from_body(ctx: &AppContext, req: &ApiRequest) -> Result<Preset, ApiResponse> {
    let registry = ctx.plugins.registry();
    match req.json() {
        None => Ok(Preset::create_default(&registry)),
        Some(Err(e)) => {
            log::warn!(target: TAG, "invalid json payload: {e}");
            Err(ApiResponse::error("Invalid json payload"))
        }
        Some(Ok(body)) => Preset::from_json(&body, &registry).map_err(|e| {
            log::warn!(target: TAG, "invalid preset: {e}");
            ApiResponse::error(format!("Could not serialize json: {e}"))
        }),
    }
}

fn add_preset(ctx: &AppContext, req: &ApiRequest) -> ApiResponse {
    let Some(id) = req.param("id") else {
        return ApiResponse::error("Id not given");
    };
    if id.is_empty() {
        return ApiResponse::error("Id empty");
    }
    let preset = match preset_from_body(ctx, req) {
        Ok(preset) => preset,
        Err(response) => return response,
    };
    match ctx.config.add_preset(id, preset) {
        Ok(()) => ApiResponse::success_with("Preset has been added", json!({ "id": id })),
        Err(e) => ApiResponse::error(e.to_string()),
    }
}

fn post_preset(ctx: &AppContext, req: &ApiRequest) -> ApiResponse {
    let Some(id) = req.param("id") else {
        return ApiResponse::error("Id not given");
    };
    if id.is_empty() {
        return ApiResponse::error("Id empty");
    }
    let preset = match preset_from_body(ctx, req) {
        Ok(preset) => preset,
        Err(response) => return response,
    };
    ctx.config.set_preset(id, preset);
    if !ctx.config.save() {
        return ApiResponse::error_with_status(500, "Preset was set but could not be saved");
    }
    ApiResponse::success_with("Preset has been set", json!({ "id": id }))
}

fn post_schedule(ctx: &AppContext, req: &ApiRequest) -> ApiResponse {
    let id = match req.param("id") {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    };
    let body = match req.json() {
        Some(Ok(body)) => body,
        _ => return ApiResponse::error("Invalid json payload"),
    };
    let mut schedule: Schedule = match serde_json::from_value(body) {
        Ok(schedule) => schedule,
        Err(e) => {
            log::warn!(target: TAG, "invalid schedule data: {e}");
            return ApiResponse::error("Could not parse schedule data");
        }
    };
    schedule.id = id.clone();
    if ctx.config.preset(&schedule.preset_id).is_none() {
        return ApiResponse::error("Preset not found");
    }
    match ctx.config.set_schedule(schedule) {
        Ok(()) => ApiResponse::success_with("Schedule saved", json!({ "id": id })),
        Err(e) => ApiResponse::error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::preset::fixtures;
    use crate::config::{MainConfig, Root};
    use crate::context::RuntimeFlags;
    use crate::plugin::BasicPlugin;

    struct Echo;

    impl BasicPlugin for Echo {
        fn handle_request(&self, request: &ApiRequest) -> Option<ApiResponse> {
            (request.path == "/echo").then(|| ApiResponse::ok(json!({ "echo": request.param("say") })))
        }
    }

    fn context(dir: &tempfile::TempDir) -> AppContext {
        let manager = Arc::new(fixtures::manager());
        manager.register_static("echo", Box::new(Echo)).unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"presets": {"A": {}, "B": {}}, "curr": "A"}"#).unwrap();
        let flags = RuntimeFlags::new();
        let config = Arc::new(MainConfig::load(&path, &manager.registry(), flags.clone()).unwrap());
        AppContext::new(manager, config, flags)
    }

    #[test]
    fn test_query_parsing() {
        let req = ApiRequest::get("/schedule?id=late%20night&x=a+b&flag");
        assert_eq!(req.path, "/schedule");
        assert_eq!(req.param("id"), Some("late night"));
        assert_eq!(req.param("x"), Some("a b"));
        assert_eq!(req.param("flag"), Some(""));
        assert_eq!(ApiRequest::get("/a?bad=%zz").param("bad"), Some("%zz"));
        assert_eq!(ApiRequest::get("/a?plus=%2B").param("plus"), Some("+"));
        assert!(req.query_error.is_none());
    }

    #[test]
    fn test_non_utf8_query_is_rejected() {
        let req = ApiRequest::get("/schedule?id=%FF");
        assert!(req.query_error.is_some());
        assert_eq!(req.param("id"), None);

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let res = handle(&ctx, &req);
        assert_eq!(res.status, 400);
        assert_eq!(res.body["error"], json!("Malformed query string"));
    }

    #[test]
    fn test_post_preset_reports_failed_save() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(fixtures::manager());
        let root = Root::from_json(&json!({}), &manager.registry()).unwrap();
        let flags = RuntimeFlags::new();
        // the parent directory does not exist, so the write cannot succeed
        let config = Arc::new(MainConfig::from_root(dir.path().join("missing/config.json"), root, flags.clone()));
        let ctx = AppContext::new(manager, Arc::clone(&config), flags);

        let body = json!({"scenes": [{"type": "fire", "arguments": {}}]}).to_string();
        let res = handle(&ctx, &ApiRequest::post("/preset?id=C", body));
        assert_eq!(res.status, 500);
        assert!(config.preset("C").is_some());
        assert!(config.is_dirty());
    }

    #[test]
    fn test_list_scenes_describes_properties() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let res = handle(&ctx, &ApiRequest::get("/list_scenes"));
        assert_eq!(res.status, 200);
        let scenes = res.body.as_array().unwrap();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0]["name"], json!("fire"));
        let props = scenes[0]["properties"].as_array().unwrap();
        let speed = props.iter().find(|p| p["name"] == json!("speed")).unwrap();
        assert_eq!(speed["type_id"], json!("int"));
        assert_eq!(speed["default_value"], json!(3));
    }

    #[test]
    fn test_preset_routes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);

        let ids = handle(&ctx, &ApiRequest::get("/presets")).body;
        assert_eq!(ids, json!(["A", "B"]));
        assert_eq!(handle(&ctx, &ApiRequest::get("/presets?id=Z")).status, 400);

        let res = handle(&ctx, &ApiRequest::get("/set_preset?id=B"));
        assert!(res.is_success());
        assert_eq!(ctx.config.curr_id(), "B");
        assert_eq!(handle(&ctx, &ApiRequest::get("/set_preset?id=Z")).body, json!({"error": "Invalid id"}));

        let body = r#"{"scenes": [{"type": "fire", "arguments": {"duration": 15000}}]}"#;
        let res = handle(&ctx, &ApiRequest::post("/add_preset?id=C", body));
        assert_eq!(res.body["success"], json!("Preset has been added"));
        assert_eq!(ctx.config.preset("C").unwrap().len(), 1);
        assert_eq!(handle(&ctx, &ApiRequest::post("/add_preset?id=C", body)).status, 400);
        assert_eq!(handle(&ctx, &ApiRequest::post("/add_preset?id=", body)).status, 400);
        assert_eq!(
            handle(&ctx, &ApiRequest::post("/add_preset?id=D", "{oops")).body,
            json!({"error": "Invalid json payload"})
        );
        let unknown = r#"{"scenes": [{"type": "maze"}]}"#;
        assert_eq!(handle(&ctx, &ApiRequest::post("/preset?id=D", unknown)).status, 400);

        let res = handle(&ctx, &ApiRequest::post("/preset?id=A", body));
        assert_eq!(res.body["id"], json!("A"));
        assert!(!ctx.config.is_dirty());

        assert_eq!(
            handle(&ctx, &ApiRequest::delete("/preset?id=B")).body,
            json!({"error": "Can not delete current preset"})
        );
        assert!(handle(&ctx, &ApiRequest::delete("/preset?id=C")).is_success());
        assert!(ctx.config.preset("C").is_none());
    }

    #[test]
    fn test_get_curr_lists_live_scenes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let body = handle(&ctx, &ApiRequest::get("/get_curr")).body;
        let scenes = body.as_array().unwrap();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[1]["name"], json!("clock"));
        assert_eq!(scenes[1]["properties"]["weight"], json!(1));
    }

    #[test]
    fn test_schedule_routes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let night = r#"{"preset_id": "B", "start_hour": 23, "start_minute": 0,
                        "end_hour": 1, "end_minute": 0, "days_of_week": [0,1,2,3,4,5,6]}"#;

        let res = handle(&ctx, &ApiRequest::post("/schedule?id=night", night));
        assert_eq!(res.body, json!({"success": "Schedule saved", "id": "night"}));
        let generated = handle(&ctx, &ApiRequest::post("/schedule", night));
        assert!(!generated.body["id"].as_str().unwrap().is_empty());

        let got = handle(&ctx, &ApiRequest::get("/schedule?id=night")).body;
        assert_eq!(got["start_hour"], json!(23));
        assert_eq!(handle(&ctx, &ApiRequest::get("/schedules")).body.as_object().unwrap().len(), 2);

        let bad_hour = night.replace("23", "24");
        assert_eq!(handle(&ctx, &ApiRequest::post("/schedule?id=x", bad_hour)).status, 400);
        let bad_preset = night.replace("\"B\"", "\"Z\"");
        assert_eq!(
            handle(&ctx, &ApiRequest::post("/schedule?id=x", bad_preset)).body,
            json!({"error": "Preset not found"})
        );

        let status = handle(&ctx, &ApiRequest::get("/scheduling_status")).body;
        assert_eq!(status, json!({"enabled": false, "active_preset": "none"}));
        let res = handle(&ctx, &ApiRequest::post("/scheduling_status", r#"{"enabled": true}"#));
        assert_eq!(res.body, json!({"enabled": true}));
        assert!(ctx.config.is_scheduling_enabled());
        assert_eq!(handle(&ctx, &ApiRequest::post("/scheduling_status", "{}")).status, 400);

        assert!(handle(&ctx, &ApiRequest::delete("/schedule?id=night")).is_success());
        assert_eq!(
            handle(&ctx, &ApiRequest::delete("/schedule?id=night")).body,
            json!({"error": "Schedule not found"})
        );
    }

    #[test]
    fn test_display_switches() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        assert_eq!(handle(&ctx, &ApiRequest::get("/toggle")).body, json!({"turned_off": true}));
        assert!(ctx.flags.take_reload());
        assert_eq!(
            handle(&ctx, &ApiRequest::get("/set_enabled?enabled=true")).body,
            json!({"turned_off": false})
        );
        handle(&ctx, &ApiRequest::get("/skip"));
        assert!(ctx.flags.take_skip());
        assert_eq!(
            handle(&ctx, &ApiRequest::get("/status")).body,
            json!({"turned_off": false, "current": "A"})
        );
    }

    #[test]
    fn test_unknown_routes_go_to_plugins_then_404() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        assert_eq!(handle(&ctx, &ApiRequest::get("/echo?say=hi")).body, json!({"echo": "hi"}));
        assert_eq!(handle(&ctx, &ApiRequest::get("/nope")).status, 404);
    }
}
