//! System prompt assembly.

use dawpilot_core::session::{ContextDepth, SessionContext};
use dawpilot_tools::session_state::project;

const INTRO: &str = "You are an AI music production assistant embedded in the user's digital audio workstation. \
You have direct access to the user's session and can both analyze it and make changes through tool calls.";

const CAPABILITIES: &str = "Your capabilities:
- Read the current session state (tracks, devices, clips, parameters, tempo, time signature)
- Create and manage tracks (MIDI and audio)
- Load instruments, effects and presets from the built-in library
- Set device parameters (every knob on every device)
- Create MIDI clips and add/remove notes
- Control transport (play, stop, tempo, time signature)
- Launch and stop clips and scenes in Session View
- Search the sound library for instruments, presets and samples
- Manage sends/returns for effect routing";

const GUIDELINES: &str = "Guidelines:
- Be concise but informative. Producers value efficiency.
- When suggesting sounds or presets, prefer the built-in content first.
- Explain your reasoning when making production suggestions.
- When creating MIDI content, use musically appropriate values (correct scales, rhythms, velocities).
- If you need current session information, use the get_session_state tool.
- Reference specific tracks by name and index for clarity.
- Use music theory terminology appropriate for the user's apparent skill level.
- When writing MIDI notes, remember: middle C = 60, each semitone = 1, each octave = 12.";

/// The confirmation protocol for destructive tools.
pub fn confirmation_protocol(destructive: &[&str]) -> String {
    format!(
        "Destructive action safety:\n\
Tools marked DESTRUCTIVE ({}) require a \"confirmed\" parameter set to true. You MUST:\n\
1. Tell the user exactly what will be deleted (track name, clip name, device name, etc.).\n\
2. Wait for the user to explicitly confirm (e.g., \"yes\", \"go ahead\", \"do it\").\n\
3. Only then call the tool with confirmed: true.\n\
Never set confirmed: true without explicit user approval in the current conversation.",
        destructive.join(", ")
    )
}

/// Build the system prompt for one model invocation.
///
/// The cached session state is embedded at `depth`; summary and audio
/// analysis are appended verbatim when present.
pub fn build_system_prompt(
    context: &SessionContext,
    destructive: &[&str],
    depth: ContextDepth,
) -> String {
    let mut parts = vec![
        INTRO.to_string(),
        CAPABILITIES.to_string(),
        GUIDELINES.to_string(),
        confirmation_protocol(destructive),
    ];

    if let Some(summary) = &context.summary {
        parts.push(format!("Session Summary (cached):\n{summary}"));
    }

    if let Some(analysis) = &context.audio_analysis {
        parts.push(format!("Real-time Audio Analysis:\n{}", pretty(analysis)));
    }

    if let Some(state) = &context.state {
        parts.push(format!(
            "Current Session State:\n{}",
            pretty(&project(state, depth, None))
        ));
    }

    parts.join("\n\n")
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DESTRUCTIVE: &[&str] = &["delete_track", "delete_clip"];

    #[test]
    fn always_contains_confirmation_protocol() {
        let prompt = build_system_prompt(&SessionContext::default(), DESTRUCTIVE, ContextDepth::Standard);
        assert!(prompt.contains("confirmed: true"));
        assert!(prompt.contains("delete_track, delete_clip"));
        assert!(!prompt.contains("Current Session State"));
        assert!(!prompt.contains("Session Summary"));
    }

    #[test]
    fn embeds_context_sections() {
        let context = SessionContext {
            state: Some(json!({
                "tempo": 124,
                "tracks": [{ "index": 0, "name": "Keys", "type": "midi", "volume": 0.5 }]
            })),
            summary: Some("Deep house sketch in A minor".into()),
            audio_analysis: Some(json!({ "rms": -12.5 })),
        };
        let prompt = build_system_prompt(&context, DESTRUCTIVE, ContextDepth::Minimal);

        assert!(prompt.contains("Deep house sketch in A minor"));
        assert!(prompt.contains("\"rms\": -12.5"));
        assert!(prompt.contains("\"Keys\""));
        // Minimal depth drops per-track mixer values.
        assert!(!prompt.contains("\"volume\""));
    }
}
