//! Canned utterances.

use rand::seq::SliceRandom;

pub const GREETING: &[&str] = &[
    "Hi!",
    "Hello!",
    "Hey there!",
    "Good to see you!",
    "Greetings!",
    "Howdy!",
];

pub const GOODBYE: &[&str] = &[
    "Bye",
    "Goodbye",
    "Bye bye",
    "See you",
    "See you later",
    "Take care",
    "Farewell",
];

/// Generic acknowledgements used when no contentful reply is available.
pub const ELOQUENCE: &[&str] = &[
    "I see",
    "Interesting",
    "Good to know",
    "I understand",
    "Okay",
    "Noted",
    "Hmm, let me think about that",
];

/// Small-talk responses of the default replier.
pub const RESPONSES: &[&str] = &[
    "That makes my day.",
    "Don't tell it to the professor.",
    "Oh dear, I hope the professor does not hear about this.",
    "Why is life so complicated?",
    "Humans are confusing.",
];

/// Pick a random sentence. Empty lists yield an empty string.
pub fn choose(sentences: &[&str]) -> String {
    sentences
        .choose(&mut rand::thread_rng())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

/// Lower-case and drop everything but `a-z`, for keyword matching.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase())
        .collect()
}

/// Whether `text` contains one of the greetings, ignoring case and punctuation.
pub fn contains_greeting(text: &str) -> bool {
    let utterance = normalize(text);
    GREETING
        .iter()
        .map(|g| normalize(g))
        .any(|g| !g.is_empty() && utterance.contains(&g))
}

/// Whether `text` equals a goodbye phrase, ignoring case.
pub fn is_goodbye(text: &str) -> bool {
    GOODBYE.iter().any(|bye| bye.to_lowercase() == text.to_lowercase())
}
