//! `get_session_state`, answered from the cached host snapshot.
//!
//! When nothing has been pushed yet the tool declines, and the call goes to
//! the external executor for a fresh read.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dawpilot_core::message::{ToolCallRequest, ToolCallResult};
use dawpilot_core::session::{ContextDepth, SessionStore};
use dawpilot_core::tool::LocalTool;
use serde_json::{Map, Value};

use crate::catalog::GET_SESSION_STATE;

const MINIMAL_TRACK_FIELDS: &[&str] = &["index", "name", "type", "mute", "solo", "arm"];
const STANDARD_DEVICE_FIELDS: &[&str] = &["index", "name", "type", "class_name"];
const STANDARD_CLIP_FIELDS: &[&str] = &["index", "name", "length", "is_playing"];

pub struct SessionStateTool {
    store: Arc<SessionStore>,
    default_depth: RwLock<ContextDepth>,
}

impl SessionStateTool {
    pub fn new(store: Arc<SessionStore>, default_depth: ContextDepth) -> Self {
        Self {
            store,
            default_depth: RwLock::new(default_depth),
        }
    }

    pub fn default_depth(&self) -> ContextDepth {
        *self.default_depth.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_default_depth(&self, depth: ContextDepth) {
        *self.default_depth.write().unwrap_or_else(|e| e.into_inner()) = depth;
    }

    fn requested_depth(&self, args: &Value) -> ContextDepth {
        match args.get("depth").and_then(Value::as_str) {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring depth argument");
                self.default_depth()
            }),
            None => self.default_depth(),
        }
    }
}

#[async_trait]
impl LocalTool for SessionStateTool {
    fn name(&self) -> &str {
        GET_SESSION_STATE
    }

    async fn resolve(&self, call: &ToolCallRequest) -> Option<ToolCallResult> {
        let snapshot = self.store.snapshot();
        let state = snapshot.state.as_ref()?;

        let depth = self.requested_depth(&call.arguments);
        let filter = track_filter(&call.arguments);
        tracing::debug!(depth = %depth, filtered = filter.is_some(), "Serving session state from cache");

        Some(ToolCallResult::ok(
            &call.id,
            project(state, depth, filter.as_deref()),
        ))
    }
}

fn track_filter(args: &Value) -> Option<Vec<i64>> {
    args.get("track_filter")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
}

/// Project a state tree down to `depth`, keeping only the listed tracks.
///
/// Tracks are matched on their `index` field, or on their position when the
/// field is missing. Anything outside `tracks` passes through untouched.
pub fn project(state: &Value, depth: ContextDepth, track_filter: Option<&[i64]>) -> Value {
    let Some(root) = state.as_object() else {
        return state.clone();
    };
    let mut out = root.clone();

    if let Some(Value::Array(tracks)) = out.get_mut("tracks") {
        if let Some(keep) = track_filter {
            let mut position = 0i64;
            tracks.retain(|track| {
                let index = track.get("index").and_then(Value::as_i64).unwrap_or(position);
                position += 1;
                keep.contains(&index)
            });
        }
        for track in tracks.iter_mut() {
            project_track(track, depth);
        }
    }

    Value::Object(out)
}

fn project_track(track: &mut Value, depth: ContextDepth) {
    let Some(fields) = track.as_object_mut() else {
        return;
    };

    match depth {
        ContextDepth::Minimal => {
            fields.retain(|key, _| MINIMAL_TRACK_FIELDS.contains(&key.as_str()));
        }
        ContextDepth::Standard => {
            map_items(fields, "devices", |item| keep_only(item, STANDARD_DEVICE_FIELDS));
            map_items(fields, "clips", |item| keep_only(item, STANDARD_CLIP_FIELDS));
        }
        ContextDepth::Detailed => {
            map_items(fields, "clips", |item| {
                item.remove("notes");
            });
        }
        ContextDepth::Full => {}
    }
}

fn map_items(fields: &mut Map<String, Value>, key: &str, mut apply: impl FnMut(&mut Map<String, Value>)) {
    if let Some(Value::Array(items)) = fields.get_mut(key) {
        items
            .iter_mut()
            .filter_map(Value::as_object_mut)
            .for_each(&mut apply);
    }
}

fn keep_only(item: &mut Map<String, Value>, allowed: &[&str]) {
    item.retain(|key, _| allowed.contains(&key.as_str()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_state() -> Value {
        json!({
            "tempo": 120.0,
            "tracks": [
                {
                    "index": 0, "name": "Drums", "type": "midi",
                    "mute": false, "solo": false, "arm": false, "volume": 0.85,
                    "devices": [{ "index": 0, "name": "Drum Rack", "type": "instrument", "class_name": "DrumGroupDevice", "parameters": [{ "name": "Macro 1" }] }],
                    "clips": [{ "index": 0, "name": "Beat", "length": 4.0, "is_playing": true, "color": 3, "notes": [{ "pitch": 36 }] }]
                },
                {
                    "index": 1, "name": "Bass", "type": "midi",
                    "mute": true, "solo": false, "arm": true, "volume": 0.7,
                    "devices": [], "clips": []
                }
            ]
        })
    }

    fn call(args: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "toolu_1".into(),
            name: GET_SESSION_STATE.into(),
            arguments: args,
        }
    }

    #[test]
    fn minimal_keeps_identity_fields() {
        let out = project(&sample_state(), ContextDepth::Minimal, None);
        let track = &out["tracks"][0];
        assert_eq!(track["name"], "Drums");
        assert!(track.get("devices").is_none());
        assert!(track.get("volume").is_none());
        assert_eq!(out["tempo"], 120.0);
    }

    #[test]
    fn standard_trims_devices_and_clips() {
        let out = project(&sample_state(), ContextDepth::Standard, None);
        let track = &out["tracks"][0];
        assert_eq!(track["volume"], 0.85);
        assert_eq!(track["devices"][0]["class_name"], "DrumGroupDevice");
        assert!(track["devices"][0].get("parameters").is_none());
        assert_eq!(track["clips"][0]["is_playing"], true);
        assert!(track["clips"][0].get("color").is_none());
    }

    #[test]
    fn detailed_drops_only_notes() {
        let out = project(&sample_state(), ContextDepth::Detailed, None);
        let clip = &out["tracks"][0]["clips"][0];
        assert!(clip.get("notes").is_none());
        assert_eq!(clip["color"], 3);
        assert!(out["tracks"][0]["devices"][0].get("parameters").is_some());
    }

    #[test]
    fn full_is_unmodified() {
        let state = sample_state();
        assert_eq!(project(&state, ContextDepth::Full, None), state);
    }

    #[test]
    fn tiers_are_nested() {
        let state = sample_state();
        let size = |d| project(&state, d, None).to_string().len();
        assert!(size(ContextDepth::Minimal) < size(ContextDepth::Standard));
        assert!(size(ContextDepth::Standard) < size(ContextDepth::Detailed));
        assert!(size(ContextDepth::Detailed) < size(ContextDepth::Full));
    }

    #[test]
    fn track_filter_selects_indices() {
        let out = project(&sample_state(), ContextDepth::Full, Some(&[1]));
        let tracks = out["tracks"].as_array().unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0]["name"], "Bass");
    }

    #[test]
    fn non_object_state_passes_through() {
        let state = json!("not a tree");
        assert_eq!(project(&state, ContextDepth::Minimal, None), state);
    }

    #[tokio::test]
    async fn cache_miss_declines() {
        let tool = SessionStateTool::new(Arc::new(SessionStore::new()), ContextDepth::Standard);
        assert!(tool.resolve(&call(json!({}))).await.is_none());
    }

    #[tokio::test]
    async fn resolves_with_argument_depth() {
        let store = Arc::new(SessionStore::new());
        store.set_state(sample_state());
        let tool = SessionStateTool::new(store, ContextDepth::Full);

        let result = tool
            .resolve(&call(json!({ "depth": "minimal", "track_filter": [0] })))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.id, "toolu_1");
        assert_eq!(result.payload["tracks"].as_array().unwrap().len(), 1);
        assert!(result.payload["tracks"][0].get("clips").is_none());
    }

    #[tokio::test]
    async fn falls_back_to_default_depth() {
        let store = Arc::new(SessionStore::new());
        store.set_state(sample_state());
        let tool = SessionStateTool::new(store, ContextDepth::Full);
        tool.set_default_depth(ContextDepth::Detailed);

        let result = tool.resolve(&call(json!({ "depth": "bogus" }))).await.unwrap();
        assert!(result.payload["tracks"][0]["clips"][0].get("notes").is_none());
        assert_eq!(tool.default_depth(), ContextDepth::Detailed);
    }
}
