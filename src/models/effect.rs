//! Process effect matching: classifying a command line as a known agent.
//!
//! A matched effect supplies the idle timeout and display label the
//! activity detector uses for that session. Matching is a pure function
//! over a static profile table; sessions whose command matches nothing
//! never toggle `agent_working`.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// A recognized agent/tool profile.
#[derive(Debug)]
pub struct ProcessEffect {
    /// Stable identifier stored on the session.
    pub id: &'static str,
    /// Human-readable label for display surfaces.
    pub label: &'static str,
    /// How long meaningful output must be absent before the agent is
    /// considered idle again.
    pub idle_timeout: Duration,
    pattern: &'static str,
}

/// Known agent profiles, checked in order; first match wins.
static EFFECTS: &[ProcessEffect] = &[
    ProcessEffect {
        id: "claude",
        label: "Claude Code",
        idle_timeout: Duration::from_millis(2000),
        pattern: r"(?:^|[/\s])claude(?:\s|$)",
    },
    ProcessEffect {
        id: "codex",
        label: "Codex",
        idle_timeout: Duration::from_millis(2000),
        pattern: r"(?:^|[/\s])codex(?:\s|$)",
    },
    ProcessEffect {
        id: "aider",
        label: "Aider",
        idle_timeout: Duration::from_millis(2500),
        pattern: r"(?:^|[/\s])aider(?:\s|$)",
    },
    ProcessEffect {
        id: "goose",
        label: "Goose",
        idle_timeout: Duration::from_millis(2000),
        pattern: r"(?:^|[/\s])goose(?:\s|$)",
    },
    ProcessEffect {
        id: "gemini",
        label: "Gemini CLI",
        idle_timeout: Duration::from_millis(2000),
        pattern: r"(?:^|[/\s])gemini(?:\s|$)",
    },
];

fn compiled() -> &'static Vec<(Regex, &'static ProcessEffect)> {
    static COMPILED: OnceLock<Vec<(Regex, &'static ProcessEffect)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        EFFECTS
            .iter()
            .filter_map(|effect| Regex::new(effect.pattern).ok().map(|re| (re, effect)))
            .collect()
    })
}

/// Classify a command line as a known agent profile.
///
/// Returns the first profile whose pattern matches the command, or `None`
/// for plain shells and unrecognized tools.
#[must_use]
pub fn match_effect(command: &str) -> Option<&'static ProcessEffect> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return None;
    }
    compiled()
        .iter()
        .find(|(re, _)| re.is_match(trimmed))
        .map(|(_, effect)| *effect)
}

/// Look up a profile by its stable identifier.
#[must_use]
pub fn effect_by_id(id: &str) -> Option<&'static ProcessEffect> {
    EFFECTS.iter().find(|effect| effect.id == id)
}
