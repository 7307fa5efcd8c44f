//! Phrases that ask for a dramatized worked example.
//!
//! The list is data: `RoleplayConfig.triggers` overrides it. Matching is a
//! case-sensitive substring test against the learner's message.

/// Default trigger phrases ("how", "when", "example", "in practice", ...).
const DEFAULT_TRIGGERS: &[&str] = &[
    "어떻게",
    "언제",
    "예시",
    "실제",
    "어떻게 사용",
    "언제 쓰",
    "실제로",
    "개발에서",
    "프로젝트에서",
    "어떻게 해",
];

/// Returns the default trigger list as owned strings.
#[must_use]
pub fn default_triggers() -> Vec<String> {
    DEFAULT_TRIGGERS.iter().map(ToString::to_string).collect()
}

/// Returns the first trigger contained in `message`, if any.
#[must_use]
pub fn find_trigger<'a>(triggers: &'a [String], message: &str) -> Option<&'a str> {
    triggers
        .iter()
        .map(String::as_str)
        .find(|t| !t.is_empty() && message.contains(t))
}
