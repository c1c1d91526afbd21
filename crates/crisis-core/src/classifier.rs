//! **Keyword classification** for emergency detection and confirmation replies.
//!
//! Detection is a pure function of the input text so it can be tested in isolation:
//! `classify_emergency` maps an utterance to an `EmergencyType` (or nothing) and
//! `classify_reply` maps an answer to the confirmation prompt to a `ReplyIntent`.
//! Matching is case-insensitive and respects word boundaries ("scared" is not "car").

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of a detected emergency. Set once at detection and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyType {
    Fire,
    Medical,
    Danger,
    General,
}

impl EmergencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyType::Fire => "fire",
            EmergencyType::Medical => "medical",
            EmergencyType::Danger => "danger",
            EmergencyType::General => "general",
        }
    }
}

impl fmt::Display for EmergencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmergencyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fire" => Ok(EmergencyType::Fire),
            "medical" => Ok(EmergencyType::Medical),
            "danger" => Ok(EmergencyType::Danger),
            "general" => Ok(EmergencyType::General),
            other => Err(format!("Invalid emergency type: {}", other)),
        }
    }
}

/// How an answer to the confirmation prompt should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyIntent {
    /// Explicit cancel command; valid in every non-terminal state.
    Cancel,
    Negative,
    Affirmative,
    /// Neither, or both at once ("yes, no time"): ask again.
    Unclear,
}

const FIRE_KEYWORDS: &[&str] = &["fire", "burning", "smoke", "flames?", "blaze"];

const MEDICAL_KEYWORDS: &[&str] = &[
    "heart",
    "chest pain",
    "cardiac",
    "breathing",
    "choking",
    "asthma",
    "injury",
    "injured",
    "hurt",
    "bleeding",
    "broken",
    "fracture",
    "unconscious",
    "not breathing",
    "medical emergency",
];

const DANGER_KEYWORDS: &[&str] = &[
    "danger",
    "threat",
    "someone behind",
    "following",
    "attack",
    "attacked",
    "intruder",
    "unsafe",
    "scared",
    "fear",
    "help",
    "emergency",
    "crisis",
];

const GENERAL_KEYWORDS: &[&str] = &["accident", "crash", "collision", "car", "vehicle"];

const CANCEL_PHRASES: &[&str] = &["cancel", "abort", "false alarm", "never ?mind", "nevermind"];

const HESITANT_PHRASES: &[&str] = &[
    "not sure",
    "unsure",
    "don'?t know",
    "do not know",
    "not certain",
    "maybe",
    "perhaps",
    "wait",
    "hold on",
    "let me think",
    "i guess",
];

// Longer phrases first: the alternation is leftmost-first.
const NEGATIVE_PHRASES: &[&str] = &[
    "don'?t call",
    "do not call",
    "no need",
    "not now",
    "i'?m fine",
    "i am fine",
    "i'?m (?:ok|okay)",
    "i am (?:ok|okay)",
    "all good",
    "don'?t",
    "do not",
    "no",
    "nope",
    "nah",
];

const AFFIRMATIVE_PHRASES: &[&str] = &[
    "yes",
    "yeah",
    "yep",
    "yup",
    "sure",
    "okay",
    "ok",
    "correct",
    "right",
    "true",
    "confirmed?",
    "please",
    "do it",
    "go ahead",
    "please call",
    "call (?:them|now|for help|911|emergency services|someone|an ambulance|the fire (?:department|brigade))",
];

fn keyword_regex(words: &[&str]) -> Regex {
    let pattern = format!(r"(?i)\b(?:{})\b", words.join("|"));
    // The word lists are static; a bad pattern is a programming error caught by the tests below.
    Regex::new(&pattern).unwrap_or_else(|e| panic!("invalid keyword pattern {}: {}", pattern, e))
}

static EMERGENCY_SETS: Lazy<Vec<(EmergencyType, Regex)>> = Lazy::new(|| {
    vec![
        (EmergencyType::Fire, keyword_regex(FIRE_KEYWORDS)),
        (EmergencyType::Medical, keyword_regex(MEDICAL_KEYWORDS)),
        (EmergencyType::Danger, keyword_regex(DANGER_KEYWORDS)),
        (EmergencyType::General, keyword_regex(GENERAL_KEYWORDS)),
    ]
});

static CANCEL_RE: Lazy<Regex> = Lazy::new(|| keyword_regex(CANCEL_PHRASES));
static HESITANT_RE: Lazy<Regex> = Lazy::new(|| keyword_regex(HESITANT_PHRASES));
static NEGATIVE_RE: Lazy<Regex> = Lazy::new(|| keyword_regex(NEGATIVE_PHRASES));
static AFFIRMATIVE_RE: Lazy<Regex> = Lazy::new(|| keyword_regex(AFFIRMATIVE_PHRASES));

fn normalize(text: &str) -> String {
    text.replace(['\u{2019}', '\u{2018}'], "'")
}

/// Map an utterance to the emergency it describes, if any.
///
/// Sets are checked in priority order fire → medical → danger → general, so
/// "help, my kitchen is on fire" is a fire rather than a generic call for help.
pub fn classify_emergency(text: &str) -> Option<EmergencyType> {
    let text = normalize(text);
    EMERGENCY_SETS
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map(|(kind, _)| *kind)
}

/// Read an answer to "should I call emergency services?".
///
/// Only an unhedged statement counts as consent. Hesitation ("I'm not sure")
/// and questions ("who will you call?") are unclear and get re-asked.
/// Negative phrases are removed before the affirmative check so that
/// "I'm okay" is a refusal, while "yes, no time to lose" stays ambiguous.
pub fn classify_reply(text: &str) -> ReplyIntent {
    let text = normalize(text);
    if CANCEL_RE.is_match(&text) {
        return ReplyIntent::Cancel;
    }
    if HESITANT_RE.is_match(&text) {
        return ReplyIntent::Unclear;
    }
    let negative = NEGATIVE_RE.is_match(&text);
    let residue = NEGATIVE_RE.replace_all(&text, " ");
    let affirmative = AFFIRMATIVE_RE.is_match(&residue) && !text.trim_end().ends_with('?');
    match (negative, affirmative) {
        (true, false) => ReplyIntent::Negative,
        (false, true) => ReplyIntent::Affirmative,
        _ => ReplyIntent::Unclear,
    }
}
