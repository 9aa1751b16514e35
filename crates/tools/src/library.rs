//! Content library index and the `search_library` tool.
//!
//! Ships with the native instruments and effects; the host can push its
//! scanned browser contents on top via [`LibraryIndex::ingest`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dawpilot_core::message::{ToolCallRequest, ToolCallResult};
use dawpilot_core::tool::LocalTool;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::catalog::SEARCH_LIBRARY;

/// Maximum number of results returned by a search.
pub const DEFAULT_LIMIT: usize = 15;
pub const MAX_LIMIT: usize = 100;

/// Valid values for the `category` argument.
pub const CATEGORIES: &[&str] = &[
    "instruments",
    "sounds",
    "drums",
    "audio_effects",
    "midi_effects",
    "samples",
    "all",
];

/// One browsable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Browser URI usable with `load_instrument` / `load_effect`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl LibraryItem {
    fn builtin(name: &str, category: &str, tags: &[&str], description: Option<&str>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            description: description.map(Into::into),
            path: None,
            uri: None,
        }
    }

    fn key(&self) -> String {
        format!("{}|{}", self.name, self.category)
    }

    fn score(&self, tokens: &[String]) -> u32 {
        let name = self.name.to_lowercase();
        let tags: Vec<String> = self.tags.iter().map(|t| t.to_lowercase()).collect();
        let tag_text = tags.join(" ");
        let haystack = [
            name.as_str(),
            self.category.as_str(),
            self.description.as_deref().unwrap_or_default(),
            tag_text.as_str(),
            self.path.as_deref().unwrap_or_default(),
        ]
        .join(" ")
        .to_lowercase();

        tokens
            .iter()
            .map(|token| {
                let token = token.as_str();
                if name == token {
                    10
                } else if name.contains(token) {
                    5
                } else if tags.iter().any(|t| t == token) {
                    4
                } else if tags.iter().any(|t| t.contains(token)) {
                    2
                } else if haystack.contains(token) {
                    1
                } else {
                    0
                }
            })
            .sum()
    }
}

#[derive(Debug, Default)]
struct Entries {
    items: Vec<LibraryItem>,
    by_key: HashMap<String, usize>,
}

impl Entries {
    fn upsert(&mut self, item: LibraryItem) -> bool {
        let key = item.key();
        match self.by_key.get(&key) {
            Some(&pos) => {
                self.items[pos] = item;
                false
            }
            None => {
                self.by_key.insert(key, self.items.len());
                self.items.push(item);
                true
            }
        }
    }
}

/// Static + host-supplied content index.
#[derive(Debug)]
pub struct LibraryIndex {
    entries: RwLock<Entries>,
}

impl Default for LibraryIndex {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl LibraryIndex {
    /// An index with no entries at all.
    pub fn empty() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
        }
    }

    /// An index preloaded with the native devices.
    pub fn with_builtin() -> Self {
        let index = Self::empty();
        index.ingest(builtin_items());
        index
    }

    /// Merge items into the index. Items are keyed by `name|category`; a later
    /// item replaces an earlier one with the same key. Returns how many new
    /// keys were added.
    pub fn ingest(&self, items: impl IntoIterator<Item = LibraryItem>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        items
            .into_iter()
            .filter(|item| !item.name.trim().is_empty())
            .map(|item| entries.upsert(item))
            .filter(|added| *added)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Score every item against the whitespace-separated query tokens.
    ///
    /// Results are ordered by score, then by name, and capped at `limit`.
    pub fn search(&self, query: &str, category: Option<&str>, limit: usize) -> Vec<LibraryItem> {
        let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if tokens.is_empty() {
            return Vec::new();
        }
        let category = category.filter(|c| *c != "all");

        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut scored: Vec<(u32, &LibraryItem)> = entries
            .items
            .iter()
            .filter(|item| category.is_none_or(|c| item.category == c))
            .map(|item| (item.score(&tokens), item))
            .filter(|(score, _)| *score > 0)
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.name.cmp(&b.name)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect()
    }

    /// All items of one category, sorted by name.
    pub fn list_category(&self, category: &str) -> Vec<LibraryItem> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut items: Vec<LibraryItem> = entries
            .items
            .iter()
            .filter(|item| item.category == category)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }
}

/// Answers `search_library` from a shared [`LibraryIndex`].
pub struct SearchLibraryTool {
    index: Arc<LibraryIndex>,
}

impl SearchLibraryTool {
    pub fn new(index: Arc<LibraryIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl LocalTool for SearchLibraryTool {
    fn name(&self) -> &str {
        SEARCH_LIBRARY
    }

    async fn resolve(&self, call: &ToolCallRequest) -> Option<ToolCallResult> {
        let args = &call.arguments;
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return Some(ToolCallResult::error(&call.id, "Missing required parameter 'query'"));
        };
        let category = args.get("category").and_then(Value::as_str).unwrap_or("all");
        if !CATEGORIES.contains(&category) {
            return Some(ToolCallResult::error(
                &call.id,
                format!("Unknown category '{category}'. Use one of: {}", CATEGORIES.join(", ")),
            ));
        }
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| (l as usize).clamp(1, MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);

        let results = self.index.search(query, Some(category), limit);
        tracing::debug!(query, category, hits = results.len(), "Library search");

        let note = if results.is_empty() {
            "No matches found. Try broader terms or a different category."
        } else {
            "Use load_instrument or load_effect with the item's uri to load it onto a track."
        };

        Some(ToolCallResult::ok(
            &call.id,
            json!({
                "status": "ok",
                "query": query,
                "category": category,
                "results_count": results.len(),
                "results": results,
                "note": note,
            }),
        ))
    }
}

fn builtin_items() -> Vec<LibraryItem> {
    const INSTRUMENTS: &[(&str, &[&str], &str)] = &[
        ("Analog", &["synth", "subtractive", "analog", "warm", "classic", "bass", "lead", "pad"], "Analog-modeled subtractive synth with two oscillators, filters and amp envelopes"),
        ("Collision", &["physical modeling", "mallet", "percussion", "bell", "metallic", "resonant"], "Physical model combining mallet and resonator sections"),
        ("Drift", &["synth", "subtractive", "wavetable", "organic", "evolving", "warm", "lo-fi"], "Subtractive synth with a slightly unstable, organic character"),
        ("Electric", &["electric piano", "keys", "rhodes", "wurlitzer", "vintage", "warm"], "Electric piano physical model"),
        ("Operator", &["synth", "fm", "digital", "bass", "lead", "pad", "bell", "metallic", "versatile"], "Four-operator FM synth with filter and LFO"),
        ("Sampler", &["sampler", "multisampled", "zone", "layer", "modulation"], "Multisampling instrument with zone editing and a modulation matrix"),
        ("Simpler", &["sampler", "simple", "one-shot", "slice", "warp"], "Streamlined sampler with classic, one-shot and slicing modes"),
        ("Tension", &["physical modeling", "string", "pluck", "bow", "guitar", "organic"], "Physical model of plucked, bowed and hammered strings"),
        ("Wavetable", &["synth", "wavetable", "digital", "evolving", "modern", "pad", "lead", "bass", "movement"], "Two-oscillator wavetable synth with deep modulation"),
        ("Drum Rack", &["drums", "percussion", "kit", "sampler", "beat", "rhythm"], "Pad-based drum sampler with per-pad chains"),
        ("Instrument Rack", &["rack", "layer", "split", "macro", "chain"], "Container for layering and splitting instruments behind macros"),
    ];

    const AUDIO_EFFECTS: &[(&str, &[&str])] = &[
        ("Auto Filter", &["filter", "envelope follower", "lfo", "resonance", "sweep"]),
        ("Auto Pan", &["pan", "tremolo", "lfo", "stereo", "movement"]),
        ("Beat Repeat", &["glitch", "stutter", "repeat", "creative", "rhythmic"]),
        ("Cabinet", &["amp", "cabinet", "guitar", "distortion", "warmth"]),
        ("Channel EQ", &["eq", "equalizer", "simple", "3-band", "mixing"]),
        ("Chorus-Ensemble", &["chorus", "ensemble", "modulation", "width", "lush"]),
        ("Compressor", &["compressor", "dynamics", "punch", "glue", "mixing", "sidechain"]),
        ("Corpus", &["resonator", "physical modeling", "metallic", "tuned", "body"]),
        ("Delay", &["delay", "echo", "time", "feedback", "stereo"]),
        ("Drum Buss", &["drums", "bus", "distortion", "compression", "transient", "boom"]),
        ("Dynamic Tube", &["saturation", "tube", "warmth", "distortion", "analog"]),
        ("Echo", &["delay", "echo", "modulation", "reverb", "feedback", "creative"]),
        ("EQ Eight", &["eq", "equalizer", "8-band", "parametric", "mixing", "surgical"]),
        ("EQ Three", &["eq", "equalizer", "3-band", "dj", "kill", "simple"]),
        ("Erosion", &["distortion", "noise", "lo-fi", "digital", "creative"]),
        ("Filter Delay", &["delay", "filter", "creative", "3-tap", "stereo"]),
        ("Flanger", &["flanger", "modulation", "sweep", "jet", "metallic"]),
        ("Frequency Shifter", &["frequency", "shift", "ring mod", "creative", "experimental"]),
        ("Gate", &["gate", "dynamics", "noise gate", "sidechain", "mixing"]),
        ("Glue Compressor", &["compressor", "glue", "bus", "ssl", "mixing", "mastering", "sidechain"]),
        ("Grain Delay", &["delay", "granular", "pitch", "texture", "creative"]),
        ("Hybrid Reverb", &["reverb", "convolution", "algorithmic", "space", "large", "creative"]),
        ("Limiter", &["limiter", "dynamics", "mastering", "loudness", "ceiling"]),
        ("Looper", &["looper", "recording", "overdub", "live", "performance"]),
        ("Multiband Dynamics", &["multiband", "compressor", "expander", "dynamics", "mastering"]),
        ("Overdrive", &["distortion", "overdrive", "saturation", "drive", "warmth"]),
        ("Pedal", &["distortion", "overdrive", "fuzz", "guitar", "pedal"]),
        ("Phaser-Flanger", &["phaser", "flanger", "modulation", "sweep", "space"]),
        ("Redux", &["bitcrusher", "downsample", "lo-fi", "digital", "retro"]),
        ("Resonators", &["resonator", "tuned", "harmonic", "tonal", "creative"]),
        ("Reverb", &["reverb", "space", "room", "hall", "ambient"]),
        ("Saturator", &["saturation", "warmth", "distortion", "analog", "color"]),
        ("Shifter", &["pitch shift", "frequency", "creative", "harmonizer"]),
        ("Spectral Resonator", &["spectral", "resonator", "creative", "experimental", "sidechain"]),
        ("Spectral Time", &["spectral", "delay", "freeze", "creative", "experimental"]),
        ("Tuner", &["tuner", "pitch", "utility", "reference"]),
        ("Utility", &["utility", "gain", "pan", "phase", "mono", "width", "mixing"]),
        ("Vinyl Distortion", &["vinyl", "distortion", "lo-fi", "crackle", "warmth", "creative"]),
        ("Vocoder", &["vocoder", "voice", "carrier", "modulator", "creative", "robotic"]),
    ];

    const MIDI_EFFECTS: &[(&str, &[&str])] = &[
        ("Arpeggiator", &["arpeggiator", "arp", "sequence", "pattern", "rhythmic"]),
        ("Chord", &["chord", "harmony", "interval", "layer"]),
        ("Note Length", &["note length", "gate", "duration", "trigger"]),
        ("Pitch", &["pitch", "transpose", "octave", "semitone"]),
        ("Random", &["random", "chance", "probability", "generative"]),
        ("Scale", &["scale", "key", "quantize", "constrain", "music theory"]),
        ("Velocity", &["velocity", "dynamics", "random", "range", "expression"]),
    ];

    INSTRUMENTS
        .iter()
        .map(|(name, tags, desc)| LibraryItem::builtin(name, "instruments", tags, Some(desc)))
        .chain(
            AUDIO_EFFECTS
                .iter()
                .map(|(name, tags)| LibraryItem::builtin(name, "audio_effects", tags, None)),
        )
        .chain(
            MIDI_EFFECTS
                .iter()
                .map(|(name, tags)| LibraryItem::builtin(name, "midi_effects", tags, None)),
        )
        .collect()
}
