//! Splits text extracted from an audit report into numbered observation
//! paragraphs.
//!
//! Two tiers: when the "Para No. Audit's Observations" heading is present,
//! everything after it is cut at line-leading paragraph numbers (`1. `,
//! `4.1. `). Otherwise the whole text is cut at blank lines. Fragments of
//! twenty characters or fewer are treated as noise in both tiers.
//!
//! This is a heuristic. Reports with unusual numbering will misparse; the
//! operator corrects them afterwards with split and resync.

use once_cell::sync::Lazy;
use regex::Regex;

/// Paragraphs of this many characters or fewer are dropped.
pub const MIN_PARAGRAPH_CHARS: usize = 20;

static RE_OBSERVATIONS_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Para\s+No\.\s*Audit(?:['ʼ’`]\s?)s\s+Observations")
        .expect("valid observations marker regex")
});

// `^` is only the start of the haystack here, never a line start; line starts
// are matched through the explicit `\n`.
static RE_PARA_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\n)\s*([0-9]+(?:\.[0-9]+)?\.\s+)").expect("valid paragraph number regex")
});

static RE_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\r?\n){2,}").expect("valid blank line regex"));

/// Segments raw PDF text into ordered paragraph strings.
///
/// Never fails: empty or garbage input yields an empty vector.
pub fn segment(text: &str) -> Vec<String> {
    match RE_OBSERVATIONS_MARKER.find(text) {
        Some(marker) => split_numbered(&text[marker.start()..]),
        None => split_on_blank_lines(text),
    }
}

/// Returns true when the observations heading occurs in `text`.
pub fn has_observations_marker(text: &str) -> bool {
    RE_OBSERVATIONS_MARKER.is_match(text)
}

fn split_numbered(section: &str) -> Vec<String> {
    let tokens: Vec<(usize, usize, &str)> = RE_PARA_NUMBER
        .captures_iter(section)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1)?;
            Some((whole.start(), whole.end(), number.as_str().trim()))
        })
        .collect();

    tokens
        .iter()
        .enumerate()
        .filter_map(|(idx, (_, body_start, number))| {
            let body_end = tokens
                .get(idx + 1)
                .map(|(next_start, _, _)| *next_start)
                .unwrap_or(section.len());
            let body = section[*body_start..body_end].trim();
            let paragraph = format!("{number} {body}");
            is_substantial(&paragraph).then_some(paragraph)
        })
        .collect()
}

fn split_on_blank_lines(text: &str) -> Vec<String> {
    RE_BLANK_LINES
        .split(text)
        .map(str::trim)
        .filter(|piece| is_substantial(piece))
        .map(str::to_string)
        .collect()
}

fn is_substantial(paragraph: &str) -> bool {
    paragraph.chars().count() > MIN_PARAGRAPH_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Railway Audit Report 2023\nIntroduction text that precedes the section.\n\n";

    #[test]
    fn splits_numbered_observations_after_marker() {
        let text = format!(
            "{HEADER}Para No. Audit's Observations\n1. Foo bar baz qux quux corge\n2. Another observation text\n3. Third para with more than twenty chars"
        );
        let paragraphs = segment(&text);
        assert_eq!(
            paragraphs,
            vec![
                "1. Foo bar baz qux quux corge",
                "2. Another observation text",
                "3. Third para with more than twenty chars",
            ]
        );
    }

    #[test]
    fn accepts_typographic_apostrophe_and_case() {
        let text = "PARA NO. AUDITʼS OBSERVATIONS\n1. Expenditure booked without sanction\n";
        assert_eq!(segment(text), vec!["1. Expenditure booked without sanction"]);
    }

    #[test]
    fn ignores_text_before_marker() {
        let text = "1. This numbered line is part of the preface text\n\nPara No. Audit's Observations\n1. The only observation in the section body";
        assert_eq!(
            segment(text),
            vec!["1. The only observation in the section body"]
        );
    }

    #[test]
    fn handles_sub_numbered_paragraphs_and_multiline_bodies() {
        let text = "Para No. Audit's Observations\n4. Stores procurement was irregular\nacross two depots.\n4.1. Tender committee did not record reasons\n";
        assert_eq!(
            segment(text),
            vec![
                "4. Stores procurement was irregular\nacross two depots.",
                "4.1. Tender committee did not record reasons",
            ]
        );
    }

    #[test]
    fn does_not_split_on_amounts_mid_sentence() {
        let text = "Para No. Audit's Observations\n1. An excess of Rs. 4.5 lakhs was paid to the contractor 2. twice\n2. A second observation long enough";
        let paragraphs = segment(text);
        assert_eq!(paragraphs.len(), 2);
        assert!(paragraphs[0].contains("Rs. 4.5 lakhs"));
        assert!(paragraphs[0].ends_with("2. twice"));
    }

    #[test]
    fn drops_short_numbered_fragments() {
        let text = "Para No. Audit's Observations\n1. Short\n2. This one is comfortably long enough";
        assert_eq!(segment(text), vec!["2. This one is comfortably long enough"]);
    }

    #[test]
    fn falls_back_to_blank_line_split_without_marker() {
        let text = "First paragraph has plenty of words in it.\n\n\nshort\n\r\n\r\nSecond paragraph also has plenty of words.";
        assert_eq!(
            segment(text),
            vec![
                "First paragraph has plenty of words in it.",
                "Second paragraph also has plenty of words.",
            ]
        );
    }

    #[test]
    fn single_block_without_marker_or_blank_lines() {
        assert_eq!(
            segment("one block of text\nwith only single newlines"),
            vec!["one block of text\nwith only single newlines"]
        );
        assert!(segment("tiny block").is_empty());
    }

    #[test]
    fn exactly_twenty_characters_is_noise() {
        let twenty = "a".repeat(MIN_PARAGRAPH_CHARS);
        assert!(segment(&twenty).is_empty());
        let twenty_one = "a".repeat(MIN_PARAGRAPH_CHARS + 1);
        assert_eq!(segment(&twenty_one), vec![twenty_one.clone()]);
    }

    #[test]
    fn empty_and_garbage_input_degrade_to_empty() {
        assert!(segment("").is_empty());
        assert!(segment("\n\n\n\n").is_empty());
        assert!(segment("Para No. Audit's Observations").is_empty());
        assert!(segment("Para No. Audit's Observations\n\u{0}\u{1}").is_empty());
    }

    #[test]
    fn output_is_deterministic() {
        let text = format!(
            "{HEADER}Para No. Audit's Observations\n1. Foo bar baz qux quux corge\n2. Another observation text"
        );
        assert_eq!(segment(&text), segment(&text));
    }

    #[test]
    fn detects_marker() {
        assert!(has_observations_marker("x Para No. Audit's Observations y"));
        assert!(!has_observations_marker("Para 1 observations"));
    }
}
