//! Deterministic artifact file names.

const FALLBACK_TEMPLATE: &str = "template";
const EXTENSION: &str = "pdf";

/// Replaces whitespace runs with `_` and strips characters unsafe in file names.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_component(raw: &str) -> Option<String> {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|ch| ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.'))
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_owned())
    }
}

/// Builds `<owner>_<template>.pdf`, falling back to `fallback_base` for a missing owner.
pub fn artifact_filename(owner: Option<&str>, template: &str, fallback_base: &str) -> String {
    let base = owner
        .and_then(sanitize_component)
        .or_else(|| sanitize_component(fallback_base))
        .unwrap_or_else(|| "Resume".to_owned());
    let template = sanitize_component(template).unwrap_or_else(|| FALLBACK_TEMPLATE.to_owned());
    format!("{base}_{template}.{EXTENSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_and_template_are_joined() {
        assert_eq!(
            artifact_filename(Some("Ada Lovelace"), "oslo", "Resume"),
            "Ada_Lovelace_oslo.pdf"
        );
    }

    #[test]
    fn whitespace_runs_collapse_and_unsafe_characters_are_stripped() {
        assert_eq!(
            artifact_filename(Some("  Jean-Luc \t Picard/../ "), "star*fleet", "Resume"),
            "Jean-Luc_Picard_starfleet.pdf"
        );
        assert_eq!(sanitize_component("José Núñez"), Some("José_Núñez".to_owned()));
    }

    #[test]
    fn missing_owner_uses_fallback_base() {
        assert_eq!(artifact_filename(None, "oslo", "Resume"), "Resume_oslo.pdf");
        assert_eq!(
            artifact_filename(Some(" <> "), "", "My CV"),
            "My_CV_template.pdf"
        );
    }
}
