//! Line diff of two normalized captures and the noise-collapsing pass run
//! over it.

use serde::Serialize;
use similar::{Algorithm, ChangeTag, TextDiff};

use crate::normalize::NormalizedText;

/// Prefix of an address literal operand. Case sensitive.
const ADDRESS_PREFIX: &str = "0x";

/// Classification of one diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Inserted,
    Deleted,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub text: String,
    pub kind: ChangeKind,
}

impl DiffLine {
    pub fn new(kind: ChangeKind, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    fn first_token(&self) -> &str {
        split_first(&self.text).0
    }

    fn second_token(&self) -> &str {
        split_first(&self.text).1
    }

    fn has_address_operand(&self) -> bool {
        self.second_token().starts_with(ADDRESS_PREFIX)
    }

    fn unchanged(self) -> Self {
        Self {
            kind: ChangeKind::Unchanged,
            ..self
        }
    }

    /// Real instruction lines start lowercase; labels start uppercase.
    fn is_instruction(&self) -> bool {
        self.text.chars().next().is_some_and(char::is_lowercase)
    }
}

/// Ordered line classification of two texts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub lines: Vec<DiffLine>,
}

/// Line-level diff of two normalized captures, Myers' algorithm.
pub fn diff(old: &NormalizedText, new: &NormalizedText) -> DiffResult {
    let old = old.to_text();
    let new = new.to_text();
    let text_diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(old.as_str(), new.as_str());

    let lines = text_diff
        .iter_all_changes()
        .map(|change| {
            let kind = match change.tag() {
                ChangeTag::Delete => ChangeKind::Deleted,
                ChangeTag::Insert => ChangeKind::Inserted,
                ChangeTag::Equal => ChangeKind::Unchanged,
            };
            DiffLine::new(kind, change.value().trim_end_matches(['\n', '\r']))
        })
        .collect();

    DiffResult { lines }
}

/// A diff after collapsing address-only changes, with its change counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    pub lines: Vec<DiffLine>,
    /// Inserted instruction lines, labels excluded
    pub additions: usize,
    /// Deleted instruction lines, labels excluded
    pub deletions: usize,
}

impl DiffReport {
    pub fn is_clean(&self) -> bool {
        self.additions == 0 && self.deletions == 0
    }

    /// `+ `, `- ` or two spaces before each line, then the summary.
    pub fn render(&self) -> String {
        let mut out = String::new();

        for line in &self.lines {
            out.push_str(match line.kind {
                ChangeKind::Inserted => "+ ",
                ChangeKind::Deleted => "- ",
                ChangeKind::Unchanged => "  ",
            });
            out.push_str(&line.text);
            out.push('\n');
        }

        out.push('\n');
        if self.is_clean() {
            out.push_str("no differences\n");
        } else {
            out.push_str(&format!("{} additions & {} deletions\n", self.additions, self.deletions));
        }
        out
    }
}

/// Collapse delete/insert pairs that differ only in an address operand.
///
/// Rule 1 folds `- op 0x..` followed by `+ op 0x..`; rule 2 then folds two
/// deletions followed by two insertions with matching first tokens, all four
/// carrying address operands. Collapsed lines become unchanged and keep the
/// inserted text. Empty lines are dropped.
pub fn postprocess(result: DiffResult) -> DiffReport {
    let lines: Vec<DiffLine> = result
        .lines
        .into_iter()
        .filter(|line| !line.text.is_empty())
        .collect();

    let lines = collapse_pairs(lines);
    let lines = collapse_double_pairs(lines);

    let count = |kind: ChangeKind| {
        lines
            .iter()
            .filter(|line| line.kind == kind && line.is_instruction())
            .count()
    };
    let additions = count(ChangeKind::Inserted);
    let deletions = count(ChangeKind::Deleted);

    DiffReport {
        lines,
        additions,
        deletions,
    }
}

fn collapse_pairs(lines: Vec<DiffLine>) -> Vec<DiffLine> {
    let mut out = Vec::with_capacity(lines.len());
    let mut iter = lines.into_iter().peekable();

    while let Some(line) = iter.next() {
        if line.kind == ChangeKind::Deleted {
            if let Some(next) = iter.peek() {
                if next.kind == ChangeKind::Inserted && same_shape(&line, next) {
                    if let Some(next) = iter.next() {
                        out.push(next.unchanged());
                    }
                    continue;
                }
            }
        }
        out.push(line);
    }

    out
}

fn collapse_double_pairs(lines: Vec<DiffLine>) -> Vec<DiffLine> {
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        if let [d0, d1, i0, i1] = &lines[i..lines.len().min(i + 4)] {
            let kinds_match = d0.kind == ChangeKind::Deleted
                && d1.kind == ChangeKind::Deleted
                && i0.kind == ChangeKind::Inserted
                && i1.kind == ChangeKind::Inserted;

            if kinds_match && same_shape(d0, i0) && same_shape(d1, i1) {
                out.push(i0.clone().unchanged());
                out.push(i1.clone().unchanged());
                i += 4;
                continue;
            }
        }
        out.push(lines[i].clone());
        i += 1;
    }

    out
}

/// Same first token, and both operands are address literals.
fn same_shape(old: &DiffLine, new: &DiffLine) -> bool {
    old.first_token() == new.first_token() && old.has_address_operand() && new.has_address_operand()
}

fn split_first(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim_start()),
        None => (text, ""),
    }
}
