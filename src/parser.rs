//! Tiered parsing of free-text model output.
//!
//! The model is asked for `Review N: Classification|Confidence|Explanation`
//! lines but cannot be trusted to comply. Each field is resolved through a
//! cascade of independently testable tiers, attempted in order until the
//! field is filled or the tiers are exhausted:
//!
//! 1. strict per-item block match (pipe-delimited triple),
//! 2. loose scan for any label keyword and any 1-3 digit number,
//! 3. keyword inference from category-indicative words,
//! 4. deterministic length heuristic, guaranteeing a label on every path.

use crate::review::{Classification, ClassificationRecord, ReviewItem};
use regex::Regex;
use std::sync::LazyLock;

/// Explanation used when the response held no usable explanation.
pub const DEFAULT_EXPLANATION: &str = "analysis completed, format unexpected";

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(Genuine-Positive|Genuine-Negative|Fake-Malicious|Fake-Promotional)")
        .expect("label pattern is valid")
});

static CONFIDENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,3})\b").expect("confidence pattern is valid"));

/// How much of an item's fields the cascade recovered from the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Strict tier resolved classification, confidence, and explanation.
    Full,
    /// A response segment existed but only some fields were recovered.
    Partial,
    /// No addressable segment; the label came from the length heuristic.
    Unparsed,
}

/// Fields recovered for one item, with provenance.
#[derive(Debug)]
pub struct ParsedItem {
    /// Which tier coverage this item got.
    pub outcome: ParseOutcome,
    /// Resolved label. Never absent: tier 4 always supplies one.
    pub classification: Classification,
    /// Resolved confidence, defaulting to 50.
    pub confidence: u8,
    /// Cleaned explanation, defaulting to [`DEFAULT_EXPLANATION`].
    pub explanation: String,
    /// The raw response segment the fields came from, if any.
    pub raw: String,
}

/// Parse a batch response into one record per input item, order-aligned.
pub fn parse_batch_response(
    completion: &str,
    batch: &[ReviewItem],
) -> Vec<ClassificationRecord> {
    let lines: Vec<&str> = completion
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();

    batch
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let segment = segment_for_item(&lines, index + 1);
            let parsed = parse_item(segment, &item.text);
            ClassificationRecord::new(
                item,
                parsed.classification,
                parsed.confidence,
                parsed.explanation,
                parsed.raw,
            )
        })
        .collect()
}

/// Run the cascade for a single item.
pub fn parse_item(segment: Option<&str>, item_text: &str) -> ParsedItem {
    let mut classification = None;
    let mut confidence = None;
    let mut explanation = None;
    let mut full = false;

    if let Some(segment) = segment {
        if let Some((cls, conf, expl)) = parse_strict(segment) {
            full = cls.is_some() && conf.is_some() && expl.is_some();
            classification = cls;
            confidence = conf;
            explanation = expl;
        }
        if classification.is_none() {
            let (cls, conf) = parse_loose(segment);
            classification = cls;
            confidence = confidence.or(conf);
        }
        if classification.is_none() {
            classification = infer_from_keywords(segment);
        }
    }

    let outcome = if full {
        ParseOutcome::Full
    } else if classification.is_some() || confidence.is_some() {
        ParseOutcome::Partial
    } else {
        ParseOutcome::Unparsed
    };

    ParsedItem {
        outcome,
        classification: classification.unwrap_or_else(|| heuristic_for_length(item_text)),
        confidence: confidence.unwrap_or(50),
        explanation: explanation
            .filter(|e: &String| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_EXPLANATION.to_string()),
        raw: segment.unwrap_or_default().to_string(),
    }
}

/// Locate the response line addressed to the n-th item (1-based).
pub fn segment_for_item<'a>(lines: &[&'a str], n: usize) -> Option<&'a str> {
    let marker = format!("Review {n}:");
    lines
        .iter()
        .find(|line| line.contains(&marker) || line_starts_with_index(line, n))
        .copied()
}

// Matches `^\s*N[.:)]` without compiling a pattern per item.
fn line_starts_with_index(line: &str, n: usize) -> bool {
    let trimmed = line.trim_start();
    let digits = n.to_string();
    trimmed
        .strip_prefix(&digits)
        .is_some_and(|rest| matches!(rest.chars().next(), Some('.' | ':' | ')')))
}

/// Tier 1: pipe-delimited `Classification|Confidence|Explanation` triple.
#[allow(clippy::type_complexity)]
pub fn parse_strict(
    segment: &str,
) -> Option<(Option<Classification>, Option<u8>, Option<String>)> {
    let parts: Vec<&str> = segment.split('|').collect();
    if parts.len() < 3 {
        return None;
    }

    let classification = match_label(parts[0]);
    let confidence = CONFIDENCE_RE
        .captures(parts[1])
        .and_then(|c| c[1].parse::<u16>().ok())
        .map(clamp_confidence);
    let explanation = Some(clean_explanation(parts[2]));

    Some((classification, confidence, explanation))
}

/// Tier 2: any label keyword plus any 1-3 digit number, position ignored.
pub fn parse_loose(segment: &str) -> (Option<Classification>, Option<u8>) {
    let classification = match_label(segment);
    let confidence = CONFIDENCE_RE
        .captures(segment)
        .and_then(|c| c[1].parse::<u16>().ok())
        .map(clamp_confidence);
    (classification, confidence)
}

/// Tier 3: infer the label from category-indicative words.
pub fn infer_from_keywords(segment: &str) -> Option<Classification> {
    let lower = segment.to_lowercase();
    if lower.contains("malicious") {
        Some(Classification::FakeMalicious)
    } else if lower.contains("promotional") || lower.contains("advert") {
        Some(Classification::FakePromotional)
    } else if lower.contains("negative") {
        Some(Classification::GenuineNegative)
    } else if lower.contains("positive") {
        Some(Classification::GenuinePositive)
    } else {
        None
    }
}

/// Tier 4: deterministic last resort keyed on input length.
///
/// Guarantees the no-empty-classification invariant; makes no claim of
/// accuracy.
pub fn heuristic_for_length(item_text: &str) -> Classification {
    if item_text.len() > 100 {
        Classification::GenuinePositive
    } else {
        Classification::FakePromotional
    }
}

/// Strip escape noise, trailing JSON-looking metadata, and wrapping quotes.
pub fn clean_explanation(text: &str) -> String {
    let mut clean: String = text.replace('\\', "");
    if let Some(pos) = clean.find("{\"") {
        clean.truncate(pos);
    }
    clean = clean.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = clean.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

fn match_label(text: &str) -> Option<Classification> {
    LABEL_RE.captures(text).map(|c| {
        match c[1].to_lowercase().as_str() {
            "genuine-positive" => Classification::GenuinePositive,
            "genuine-negative" => Classification::GenuineNegative,
            "fake-malicious" => Classification::FakeMalicious,
            _ => Classification::FakePromotional,
        }
    })
}

fn clamp_confidence(value: u16) -> u8 {
    value.min(100) as u8
}
