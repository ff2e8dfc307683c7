//! Collector stdout parsing.
//!
//! Well-behaved collectors print a delimited JSON block between
//! [`RESULT_BEGIN`] and [`RESULT_END`]. Older collectors only print
//! human-readable counter lines (`new: 12`, `duplicate: 3`); those are
//! scraped by pattern as a clearly-flagged degraded path — downstream
//! statistics may undercount on it, and consumers can tell.

use noticeharvest_shared::CandidateItem;
use regex::Regex;
use serde::Deserialize;

/// Line marking the start of the structured result block.
pub const RESULT_BEGIN: &str = "---COLLECT-RESULT-BEGIN---";
/// Line marking the end of the structured result block.
pub const RESULT_END: &str = "---COLLECT-RESULT-END---";

/// Structured result block a collector emits on stdout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorReport {
    /// Items the collector saw for the first time.
    #[serde(default)]
    pub new: u64,
    /// Items the collector recognized as already collected.
    #[serde(default)]
    pub duplicate: u64,
    /// The discovered items themselves.
    #[serde(default)]
    pub items: Vec<CandidateItem>,
}

/// Summary counters, exact or fallback-scraped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryCounters {
    pub new_items: u64,
    pub duplicate_items: u64,
}

/// What stdout parsing produced.
#[derive(Debug, Clone)]
pub enum ParsedOutput {
    /// A valid structured block was present.
    Structured(CollectorReport),
    /// No block; counters were scraped from free-form text.
    Fallback(SummaryCounters),
    /// Neither a block nor recognizable counters.
    Nothing,
}

/// Parse collector stdout, preferring the structured block.
pub fn parse_stdout(stdout: &str) -> ParsedOutput {
    if let Some(report) = extract_structured(stdout) {
        return ParsedOutput::Structured(report);
    }
    match fallback_counters(stdout) {
        Some(counters) => ParsedOutput::Fallback(counters),
        None => ParsedOutput::Nothing,
    }
}

/// Extract and decode the delimited JSON block, if present and valid.
fn extract_structured(stdout: &str) -> Option<CollectorReport> {
    let begin = stdout.find(RESULT_BEGIN)?;
    let after_begin = begin + RESULT_BEGIN.len();
    let end = stdout[after_begin..].find(RESULT_END)? + after_begin;
    let body = stdout[after_begin..end].trim();

    match serde_json::from_str::<CollectorReport>(body) {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::warn!(error = %e, "malformed structured result block, falling back");
            None
        }
    }
}

/// Best-effort counter scrape from free-form output.
///
/// Returns `Some` when at least one counter line was found; the other
/// counter defaults to zero, which is why this path is lossy.
fn fallback_counters(stdout: &str) -> Option<SummaryCounters> {
    let new_re = Regex::new(r"(?im)\bnew\s*:\s*(\d+)").ok()?;
    let dup_re = Regex::new(r"(?im)\bduplicates?\s*:\s*(\d+)").ok()?;

    let new_items = new_re
        .captures(stdout)
        .and_then(|c| c.get(1)?.as_str().parse().ok());
    let duplicate_items = dup_re
        .captures(stdout)
        .and_then(|c| c.get(1)?.as_str().parse().ok());

    if new_items.is_none() && duplicate_items.is_none() {
        return None;
    }

    Some(SummaryCounters {
        new_items: new_items.unwrap_or(0),
        duplicate_items: duplicate_items.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_block_parses() {
        let stdout = format!(
            "starting collection for a01\n{RESULT_BEGIN}\n{}\n{RESULT_END}\ndone\n",
            r#"{"new": 2, "duplicate": 1, "items": [
                {"origin_url": "https://x.example.kr/view?seq=1", "title": "notice one"},
                {"origin_url": "https://x.example.kr/view?seq=2"}
            ]}"#
        );

        match parse_stdout(&stdout) {
            ParsedOutput::Structured(report) => {
                assert_eq!(report.new, 2);
                assert_eq!(report.duplicate, 1);
                assert_eq!(report.items.len(), 2);
                assert_eq!(report.items[0].title.as_deref(), Some("notice one"));
            }
            other => panic!("expected structured, got {other:?}"),
        }
    }

    #[test]
    fn fallback_counters_scraped() {
        let stdout = "scanning board pages...\nnew: 7\nDuplicate: 12\nfinished\n";
        match parse_stdout(stdout) {
            ParsedOutput::Fallback(counters) => {
                assert_eq!(counters.new_items, 7);
                assert_eq!(counters.duplicate_items, 12);
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn partial_fallback_defaults_missing_counter() {
        let stdout = "new: 3\n";
        match parse_stdout(stdout) {
            ParsedOutput::Fallback(counters) => {
                assert_eq!(counters.new_items, 3);
                assert_eq!(counters.duplicate_items, 0);
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn malformed_block_falls_back() {
        let stdout = format!("{RESULT_BEGIN}\nnot json at all\n{RESULT_END}\nnew: 4\n");
        match parse_stdout(&stdout) {
            ParsedOutput::Fallback(counters) => assert_eq!(counters.new_items, 4),
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn nothing_recognizable() {
        assert!(matches!(
            parse_stdout("collector crashed before printing anything"),
            ParsedOutput::Nothing
        ));
    }
}
