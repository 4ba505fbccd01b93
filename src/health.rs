//! # Status Report
//!
//! A JSON snapshot of the running companion: session indicator, pipeline
//! counters, and process memory. Logged at shutdown and on demand.

use crate::config::AppConfig;
use crate::state::{AppState, VoiceMetrics};
use crate::voice::SessionState;
use serde_json::json;
use std::process;

pub fn status_report(state: &AppState, session: SessionState, live_segments: usize) -> serde_json::Value {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();

    json!({
        "status": session.indicator(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "voice_model": config.voice.model,
            "chat_model": config.chat.model
        },
        "session": {
            "state": session.as_str(),
            "live_segments": live_segments
        },
        "metrics": metrics,
        "pipeline": pipeline_status(&config, &metrics),
        "memory": get_memory_info()
    })
}

fn pipeline_status(config: &AppConfig, metrics: &VoiceMetrics) -> serde_json::Value {
    // Every evicted frame was counted as sent first.
    let drop_rate = if metrics.frames_sent > 0 {
        metrics.frames_dropped as f64 / metrics.frames_sent as f64
    } else {
        0.0
    };

    let status = if drop_rate > 0.1 {
        "congested"
    } else if drop_rate > 0.0 {
        "lagging"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "frame_drop_percent": (drop_rate * 100.0).round(),
        "outbound_queue_frames": config.audio.outbound_queue_frames,
        "warnings": if drop_rate > 0.1 {
            vec!["Uplink is dropping microphone audio - check the network"]
        } else {
            vec![]
        }
    })
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let field = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };
            return json!({
                "resident_memory_bytes": field("VmRSS:"),
                "virtual_memory_bytes": field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "pid": process::id(),
        "available": false
    })
}
