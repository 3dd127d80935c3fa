//! Demo plugin: a color pulse and a "now playing" scene.
//!
//! Built as `libdemo_scenes.so` it is discovered by the plugin manager like any third-party
//! module; the runtime binary also links it in-process through `register_static`.

pub mod now_playing;
pub mod pulse;

use std::sync::atomic::{AtomicU64, Ordering};

use ledmatrix_engine::api::{ApiRequest, ApiResponse, Method};
use ledmatrix_engine::{BasicPlugin, SceneWrapper};
use serde_json::json;

pub use now_playing::NowPlaying;
pub use pulse::{ColorPulse, PulseMode};

const TAG: &str = "DEMO";

#[derive(Default)]
pub struct DemoPlugin {
    packets: AtomicU64,
}

impl BasicPlugin for DemoPlugin {
    fn create_scenes(&self) -> Vec<SceneWrapper> {
        vec![
            SceneWrapper::scene(ColorPulse::new),
            SceneWrapper::scene(NowPlaying::new),
        ]
    }

    fn before_server_init(&self) -> Result<(), String> {
        log::info!(target: TAG, "demo scenes ready");
        Ok(())
    }

    fn pre_exit(&self) {
        log::info!(target: TAG, "saw {} udp packets", self.packets.load(Ordering::Relaxed));
    }

    fn on_udp_packet(&self, packet_type: u8, payload: &[u8]) -> bool {
        log::debug!(target: TAG, "udp packet type={packet_type} len={}", payload.len());
        self.packets.fetch_add(1, Ordering::Relaxed);
        false
    }

    fn handle_request(&self, request: &ApiRequest) -> Option<ApiResponse> {
        match (request.method, request.path.as_str()) {
            (Method::Get, "/demo/info") => Some(ApiResponse::ok(json!({
                "scenes": [ColorPulse::NAME, NowPlaying::NAME],
                "udp_packets": self.packets.load(Ordering::Relaxed),
            }))),
            _ => None,
        }
    }
}

ledmatrix_engine::declare_plugin!(DemoPlugin::default(), createdemo_scenes, destroydemo_scenes);
