//! Instruction parsing: free-text task string → (target, anchor) concepts.
//!
//! Two layers, most specific first: an ordered table of task templates for
//! the known benchmark phrasings, then a heuristic token fallback. Parsing
//! never fails: an unintelligible instruction degrades to the generic
//! `"object"` target so a long evaluation sweep cannot crash on a prompt.

use std::sync::LazyLock;

use regex::Regex;

/// Generic target used when nothing can be extracted.
pub const FALLBACK_TARGET: &str = "object";

/// Concepts appended to a query prompt when the robot should be segmented.
const ROBOT_CONCEPTS: &str = "robot arm. robot gripper";

/// Parsed manipulation instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInstruction {
    /// Object to manipulate.
    pub target: String,
    /// Destination/reference object, when the phrasing names one.
    pub anchor: Option<String>,
}

struct Template {
    pattern: Regex,
    /// Literal override; `None` means "read capture groups `t`/`a`".
    literal: Option<(&'static str, Option<&'static str>)>,
}

static TEMPLATES: LazyLock<Vec<Template>> = LazyLock::new(|| {
    let lit = |pat: &str, t: &'static str, a: Option<&'static str>| Template {
        pattern: Regex::new(pat).expect("static template pattern"),
        literal: Some((t, a)),
    };
    let cap = |pat: &str| Template {
        pattern: Regex::new(pat).expect("static template pattern"),
        literal: None,
    };
    vec![
        // Known benchmark tasks, pinned to exact concept names.
        lit(r"spoon.*towel", "spoon", Some("towel")),
        lit(r"carrot.*plate", "carrot", Some("plate")),
        lit(r"eggplant.*basket", "eggplant", Some("basket")),
        lit(
            r"green\s+block.*yellow\s+block",
            "green block",
            Some("yellow block"),
        ),
        // Generic phrasings, anchored so the anchor noun is the final word.
        cap(r"^put\s+(?:the\s+)?(?P<t>[a-z][a-z ]*?)\s+(?:on|onto|in|into)\s+(?:the\s+)?(?P<a>[a-z][a-z ]*)$"),
        cap(r"^(?:place|move)\s+(?:the\s+)?(?P<t>[a-z][a-z ]*?)\s+(?:on|onto|in|into|to|near)\s+(?:the\s+)?(?P<a>[a-z][a-z ]*)$"),
        cap(r"^stack\s+(?:the\s+)?(?P<t>[a-z][a-z ]*?)\s+on(?:\s+top\s+of)?\s+(?:the\s+)?(?P<a>[a-z][a-z ]*)$"),
        cap(r"^(?:pick\s+up|grasp|lift)\s+(?:the\s+)?(?P<t>[a-z][a-z ]*)$"),
    ]
});

const STOP_WORDS: &[&str] = &[
    "put", "pick", "place", "move", "stack", "grasp", "lift", "push", "take", "the", "a", "an",
    "up", "please", "and", "then", "to", "of",
];

const ANCHOR_PREPOSITIONS: &[&str] = &["on", "onto", "in", "into", "near", "beside", "next"];

/// Parse an instruction into target and optional anchor concepts.
pub fn parse(instruction: &str) -> ParsedInstruction {
    let text = normalize(instruction);

    for template in TEMPLATES.iter() {
        if let Some(caps) = template.pattern.captures(&text) {
            let (target, anchor) = match template.literal {
                Some((t, a)) => (t.to_string(), a.map(str::to_string)),
                None => {
                    let t = caps.name("t").map(|m| m.as_str().trim().to_string());
                    let a = caps.name("a").map(|m| m.as_str().trim().to_string());
                    match t {
                        Some(t) if !t.is_empty() => (t, a.filter(|s| !s.is_empty())),
                        _ => continue,
                    }
                }
            };
            return ParsedInstruction { target, anchor };
        }
    }

    heuristic_parse(&text)
}

/// Heuristic fallback: first content word is the target; a preposition
/// followed by a noun names the anchor.
fn heuristic_parse(text: &str) -> ParsedInstruction {
    let tokens: Vec<&str> = text.split_whitespace().collect();

    let target = tokens
        .iter()
        .find(|t| !STOP_WORDS.contains(t) && !ANCHOR_PREPOSITIONS.contains(t))
        .map(|t| t.to_string());

    let mut anchor = None;
    if let Some(prep_idx) = tokens
        .iter()
        .position(|t| ANCHOR_PREPOSITIONS.contains(t))
    {
        anchor = tokens[prep_idx + 1..]
            .iter()
            .find(|t| !STOP_WORDS.contains(t) && !ANCHOR_PREPOSITIONS.contains(t))
            .map(|t| t.to_string());
    }

    // A "target" found only after the preposition is the anchor, not the target.
    let target = match (&target, &anchor) {
        (Some(t), Some(a)) if t == a => None,
        _ => target,
    };

    ParsedInstruction {
        target: target.unwrap_or_else(|| FALLBACK_TARGET.to_string()),
        anchor,
    }
}

fn normalize(instruction: &str) -> String {
    instruction
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the exact query string handed to the segmentation backend: concepts
/// joined with `". "`, the robot concepts appended on request.
pub fn concept_prompt(target: &str, anchor: Option<&str>, include_robot: bool) -> String {
    let mut parts: Vec<&str> = vec![target];
    if let Some(anchor) = anchor {
        parts.push(anchor);
    }
    if include_robot {
        parts.push(ROBOT_CONCEPTS);
    }
    parts.join(". ")
}

/// Prompt for a standalone robot query.
pub fn robot_prompt() -> &'static str {
    ROBOT_CONCEPTS
}
