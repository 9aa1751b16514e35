//! The DAW tool catalog sent to the model.
//!
//! Destructive tools carry a required `confirmed` flag; the agent's gate
//! refuses them unless the model sets it to `true`.

use dawpilot_core::tool::{ToolRegistry, ToolSpec};
use serde_json::{Value, json};

/// Name of the session-state query tool.
pub const GET_SESSION_STATE: &str = "get_session_state";
/// Name of the library search tool.
pub const SEARCH_LIBRARY: &str = "search_library";

fn track_index() -> Value {
    json!({ "type": "integer", "description": "Index of the track (0-based)" })
}

fn clip_index() -> Value {
    json!({ "type": "integer", "description": "Index of the clip slot (0-based, matches the scene index)" })
}

fn confirmed(action: &str) -> Value {
    json!({
        "type": "boolean",
        "description": format!("Must be true. Only set after the user explicitly confirms the {action}.")
    })
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn track_toggle(field: &str, on: &str, off: &str) -> Value {
    object(
        json!({
            "track_index": track_index(),
            field: { "type": "boolean", "description": format!("True to {on}, false to {off}") },
        }),
        &["track_index", field],
    )
}

fn track_specs() -> Vec<ToolSpec> {
    let new_track = object(
        json!({
            "index": { "type": "integer", "description": "Position to insert the track (-1 for end)" },
            "name": { "type": "string", "description": "Name for the new track" },
        }),
        &[],
    );

    vec![
        ToolSpec::new(
            "create_midi_track",
            "Create a new MIDI track in the session. Use index -1 to append at the end.",
            new_track.clone(),
        ),
        ToolSpec::new(
            "create_audio_track",
            "Create a new audio track in the session. Use index -1 to append at the end.",
            new_track,
        ),
        ToolSpec::new(
            "set_track_name",
            "Rename an existing track.",
            object(
                json!({
                    "track_index": track_index(),
                    "name": { "type": "string", "description": "New name for the track" },
                }),
                &["track_index", "name"],
            ),
        ),
        ToolSpec::new(
            "delete_track",
            "Delete a track from the session. DESTRUCTIVE: requires confirmed=true after getting explicit user consent.",
            object(
                json!({ "track_index": track_index(), "confirmed": confirmed("deletion") }),
                &["track_index", "confirmed"],
            ),
        )
        .destructive(),
        ToolSpec::new(
            "set_track_volume",
            "Set the volume of a track (0.0 = -inf dB, 0.85 = 0 dB, 1.0 = +6 dB).",
            object(
                json!({
                    "track_index": track_index(),
                    "volume": { "type": "number", "minimum": 0, "maximum": 1, "description": "Volume value (0.0 to 1.0, 0.85 is 0 dB)" },
                }),
                &["track_index", "volume"],
            ),
        ),
        ToolSpec::new(
            "set_track_pan",
            "Set the pan position of a track (-1.0 = full left, 0.0 = center, 1.0 = full right).",
            object(
                json!({
                    "track_index": track_index(),
                    "pan": { "type": "number", "minimum": -1, "maximum": 1, "description": "Pan position (-1.0 to 1.0)" },
                }),
                &["track_index", "pan"],
            ),
        ),
        ToolSpec::new("set_track_mute", "Mute or unmute a track.", track_toggle("mute", "mute", "unmute")),
        ToolSpec::new("set_track_solo", "Solo or unsolo a track.", track_toggle("solo", "solo", "unsolo")),
        ToolSpec::new(
            "set_track_arm",
            "Arm or disarm a track for recording.",
            track_toggle("arm", "arm", "disarm"),
        ),
    ]
}

fn device_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "load_instrument",
            "Load an instrument or preset onto a track from the browser. The URI identifies the item in the content library.",
            object(
                json!({
                    "track_index": track_index(),
                    "uri": { "type": "string", "description": "Browser URI of the instrument or preset (e.g. from search_library results)" },
                }),
                &["track_index", "uri"],
            ),
        ),
        ToolSpec::new(
            "load_effect",
            "Load an audio effect onto a track. The effect is appended to the end of the device chain.",
            object(
                json!({
                    "track_index": track_index(),
                    "uri": { "type": "string", "description": "Browser URI of the audio effect" },
                }),
                &["track_index", "uri"],
            ),
        ),
        ToolSpec::new(
            "set_device_parameter",
            "Set a parameter value on a device. Values are in the device's own parameter range.",
            object(
                json!({
                    "track_index": track_index(),
                    "device_index": { "type": "integer", "description": "Index of the device in the track's chain (0-based)" },
                    "parameter_name": { "type": "string", "description": "Name of the parameter to set (must match exactly)" },
                    "value": { "type": "number", "description": "Value within the parameter's min/max range" },
                }),
                &["track_index", "device_index", "parameter_name", "value"],
            ),
        ),
        ToolSpec::new(
            "remove_device",
            "Remove a device from a track's device chain. DESTRUCTIVE: requires confirmed=true after getting explicit user consent.",
            object(
                json!({
                    "track_index": track_index(),
                    "device_index": { "type": "integer", "description": "Index of the device to remove (0-based)" },
                    "confirmed": confirmed("removal"),
                }),
                &["track_index", "device_index", "confirmed"],
            ),
        )
        .destructive(),
    ]
}

fn clip_specs() -> Vec<ToolSpec> {
    let slot = |extra: Value, required: &[&str]| {
        let mut props = json!({ "track_index": track_index(), "clip_index": clip_index() });
        if let (Some(props), Some(extra)) = (props.as_object_mut(), extra.as_object()) {
            props.extend(extra.clone());
        }
        let mut req = vec!["track_index", "clip_index"];
        req.extend_from_slice(required);
        object(props, &req)
    };

    vec![
        ToolSpec::new(
            "create_clip",
            "Create an empty MIDI clip in a track's clip slot. Populate it afterwards with add_notes_to_clip.",
            slot(
                json!({
                    "length": { "type": "number", "description": "Length of the clip in beats (4 = one bar in 4/4)" },
                    "name": { "type": "string", "description": "Optional name for the clip" },
                }),
                &["length"],
            ),
        ),
        ToolSpec::new(
            "add_notes_to_clip",
            "Add MIDI notes to an existing clip. Each note has pitch (MIDI number), start_time and duration in beats, and optional velocity.",
            slot(
                json!({
                    "notes": {
                        "type": "array",
                        "description": "MIDI notes to add",
                        "items": {
                            "type": "object",
                            "properties": {
                                "pitch": { "type": "integer", "minimum": 0, "maximum": 127, "description": "MIDI note number (60 = middle C)" },
                                "start_time": { "type": "number", "minimum": 0, "description": "Start time in beats" },
                                "duration": { "type": "number", "minimum": 0, "description": "Duration in beats" },
                                "velocity": { "type": "integer", "minimum": 1, "maximum": 127, "description": "Velocity (default 100)" },
                            },
                            "required": ["pitch", "start_time", "duration"],
                        },
                    },
                }),
                &["notes"],
            ),
        ),
        ToolSpec::new(
            "remove_notes_from_clip",
            "Remove MIDI notes from a clip within a time and pitch range. DESTRUCTIVE: requires confirmed=true after getting explicit user consent.",
            slot(
                json!({
                    "from_time": { "type": "number", "description": "Start of the time range in beats (default 0)" },
                    "to_time": { "type": "number", "description": "End of the time range in beats (default: clip length)" },
                    "from_pitch": { "type": "integer", "minimum": 0, "maximum": 127, "description": "Lowest pitch to remove (default 0)" },
                    "to_pitch": { "type": "integer", "minimum": 0, "maximum": 127, "description": "Highest pitch to remove (default 127)" },
                    "confirmed": confirmed("removal"),
                }),
                &["confirmed"],
            ),
        )
        .destructive(),
        ToolSpec::new(
            "set_clip_name",
            "Rename a clip.",
            slot(
                json!({ "name": { "type": "string", "description": "New name for the clip" } }),
                &["name"],
            ),
        ),
        ToolSpec::new(
            "delete_clip",
            "Delete a clip from a clip slot. DESTRUCTIVE: requires confirmed=true after getting explicit user consent.",
            slot(json!({ "confirmed": confirmed("deletion") }), &["confirmed"]),
        )
        .destructive(),
        ToolSpec::new(
            "duplicate_clip",
            "Duplicate a clip to the next empty clip slot on the same track.",
            slot(json!({}), &[]),
        ),
    ]
}

fn transport_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "set_tempo",
            "Set the session tempo in BPM.",
            object(
                json!({ "bpm": { "type": "number", "minimum": 20, "maximum": 999, "description": "Tempo in beats per minute (20-999)" } }),
                &["bpm"],
            ),
        ),
        ToolSpec::new(
            "set_time_signature",
            "Set the time signature of the session.",
            object(
                json!({
                    "numerator": { "type": "integer", "minimum": 1, "maximum": 99, "description": "Numerator (4 for 4/4)" },
                    "denominator": { "type": "integer", "enum": [1, 2, 4, 8, 16], "description": "Denominator (4 for 4/4)" },
                }),
                &["numerator", "denominator"],
            ),
        ),
        ToolSpec::new("start_playback", "Start transport playback from the current position.", object(json!({}), &[])),
        ToolSpec::new("stop_playback", "Stop transport playback.", object(json!({}), &[])),
        ToolSpec::new(
            "fire_clip",
            "Launch a clip in Session View. It starts according to the global quantization setting.",
            object(
                json!({ "track_index": track_index(), "clip_index": clip_index() }),
                &["track_index", "clip_index"],
            ),
        ),
        ToolSpec::new(
            "stop_clip",
            "Stop a playing clip.",
            object(
                json!({ "track_index": track_index(), "clip_index": clip_index() }),
                &["track_index", "clip_index"],
            ),
        ),
        ToolSpec::new(
            "fire_scene",
            "Launch an entire scene (every clip in that row across all tracks).",
            object(
                json!({ "scene_index": { "type": "integer", "description": "Index of the scene (0-based)" } }),
                &["scene_index"],
            ),
        ),
    ]
}

fn library_spec() -> ToolSpec {
    ToolSpec::new(
        SEARCH_LIBRARY,
        "Search the sound library for instruments, presets, samples or effects matching a description. Returns matching items with URIs that can be loaded onto tracks.",
        object(
            json!({
                "query": { "type": "string", "description": "Search query (e.g. 'warm analog pad', 'punchy 808 kick')" },
                "category": {
                    "type": "string",
                    "enum": ["instruments", "sounds", "drums", "audio_effects", "midi_effects", "samples", "all"],
                    "description": "Category to search within",
                },
            }),
            &["query"],
        ),
    )
}

fn send_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "create_return_track",
            "Create a new return track in the session.",
            object(
                json!({ "name": { "type": "string", "description": "Name for the return track" } }),
                &[],
            ),
        ),
        ToolSpec::new(
            "set_track_send",
            "Set the send level from a track to a return track.",
            object(
                json!({
                    "track_index": track_index(),
                    "send_index": { "type": "integer", "description": "Index of the send/return (0-based, A=0, B=1)" },
                    "level": { "type": "number", "minimum": 0, "maximum": 1, "description": "Send level (0.0 to 1.0)" },
                }),
                &["track_index", "send_index", "level"],
            ),
        ),
    ]
}

fn session_spec() -> ToolSpec {
    ToolSpec::new(
        GET_SESSION_STATE,
        "Get a snapshot of the current session state. Use it when you need up-to-date information that may have changed since the last state update.",
        object(
            json!({
                "depth": {
                    "type": "string",
                    "enum": ["minimal", "standard", "detailed", "full"],
                    "description": "Level of detail to retrieve",
                },
                "track_filter": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "Track indices to include (omit for all tracks)",
                },
            }),
            &[],
        ),
    )
}

/// The full DAW tool registry.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    track_specs()
        .into_iter()
        .chain(device_specs())
        .chain(clip_specs())
        .chain(transport_specs())
        .chain(std::iter::once(library_spec()))
        .chain(send_specs())
        .chain(std::iter::once(session_spec()))
        .for_each(|spec| registry.register(spec));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_complete() {
        let registry = default_registry();
        assert_eq!(registry.len(), 30);
        assert_eq!(registry.names()[0], "create_midi_track");
        assert_eq!(registry.names()[29], GET_SESSION_STATE);
        assert!(registry.contains(SEARCH_LIBRARY));
    }

    #[test]
    fn destructive_set_is_exact() {
        let registry = default_registry();
        let mut destructive = registry.destructive_names();
        destructive.sort_unstable();
        assert_eq!(
            destructive,
            vec!["delete_clip", "delete_track", "remove_device", "remove_notes_from_clip"]
        );
    }

    #[test]
    fn destructive_tools_require_confirmed() {
        let registry = default_registry();
        for spec in registry.specs().iter().filter(|s| s.destructive) {
            assert_eq!(
                spec.parameters["properties"]["confirmed"]["type"], "boolean",
                "{} lacks a confirmed flag",
                spec.name
            );
            let required = spec.parameters["required"].as_array().unwrap();
            assert!(required.iter().any(|r| r == "confirmed"), "{}", spec.name);
        }
    }

    #[test]
    fn every_schema_is_an_object() {
        for def in default_registry().definitions() {
            assert_eq!(def.parameters["type"], "object", "{}", def.name);
            assert!(def.parameters["properties"].is_object(), "{}", def.name);
            assert!(!def.description.is_empty());
        }
    }

    #[test]
    fn clip_tools_share_slot_fields() {
        let registry = default_registry();
        let spec = registry.get("remove_notes_from_clip").unwrap();
        let props = spec.parameters["properties"].as_object().unwrap();
        assert!(props.contains_key("track_index"));
        assert!(props.contains_key("clip_index"));
        assert!(props.contains_key("to_pitch"));
    }
}
