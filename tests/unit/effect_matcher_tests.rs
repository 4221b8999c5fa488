//! Unit tests for the process effect matcher.

use maestro_term::models::effect::{effect_by_id, match_effect};

#[test]
fn matches_bare_agent_command() {
    let effect = match_effect("claude").expect("claude should match");
    assert_eq!(effect.id, "claude");
    assert_eq!(effect.label, "Claude Code");
}

#[test]
fn matches_agent_with_arguments() {
    let effect = match_effect("codex --full-auto").expect("codex should match");
    assert_eq!(effect.id, "codex");
}

#[test]
fn matches_agent_behind_absolute_path() {
    let effect = match_effect("/usr/local/bin/claude --continue").expect("path should match");
    assert_eq!(effect.id, "claude");
}

#[test]
fn plain_shell_does_not_match() {
    assert!(match_effect("/bin/zsh -l").is_none());
    assert!(match_effect("bash").is_none());
}

#[test]
fn substring_of_another_word_does_not_match() {
    // "claudette" must not be classified as the claude agent.
    assert!(match_effect("claudette --help").is_none());
}

#[test]
fn empty_and_whitespace_commands_do_not_match() {
    assert!(match_effect("").is_none());
    assert!(match_effect("   ").is_none());
}

#[test]
fn effect_lookup_by_id_round_trips() {
    let effect = match_effect("aider --model gpt").expect("aider should match");
    let by_id = effect_by_id(effect.id).expect("lookup should succeed");
    assert_eq!(by_id.id, effect.id);
    assert_eq!(by_id.idle_timeout, effect.idle_timeout);
}

#[test]
fn unknown_effect_id_yields_none() {
    assert!(effect_by_id("vim").is_none());
}

#[test]
fn idle_timeouts_are_positive() {
    for id in ["claude", "codex", "aider", "goose", "gemini"] {
        let effect = effect_by_id(id).expect("known effect");
        assert!(!effect.idle_timeout.is_zero(), "{id} has zero idle timeout");
    }
}
