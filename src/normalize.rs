//! Rewrites a capture into diff input that ignores where the code happened
//! to be placed.
//!
//! Stage A replaces intra-function branch targets with `LOC_<n>` labels and
//! bare call targets with `CALL_<m>`. Stage B drops the address and byte
//! columns. Both counters restart at 1 for every capture, so identical
//! instruction sequences always normalize to identical text.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::format::{Listing, ListingLine};
use crate::Address;

/// Output of stage A: instruction rows with rewritten operands, interleaved
/// with the labels of branch targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabeledLine {
    /// Label placed immediately above its target instruction
    Label(String),
    Instruction(ListingLine),
}

/// Diff input: one `mnemonic operands` or `LABEL:` string per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedText {
    lines: Vec<String>,
}

impl NormalizedText {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Newline-terminated text as fed to the diff engine.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Run both stages on a capture. The listing itself is left untouched.
pub fn normalize(listing: &Listing) -> NormalizedText {
    strip(&label(&listing.lines))
}

/// Stage A: symbolic labeling.
///
/// An instruction address that some other instruction names as a whole
/// operand is a branch target; every occurrence becomes `LOC_<n>`, numbered
/// in order of first appearance. A call whose whole operand is a bare
/// address outside those targets is pointed at `CALL_<m>`, numbered per call
/// site.
pub fn label(lines: &[ListingLine]) -> Vec<LabeledLine> {
    let targets = branch_targets(lines);
    let mut names: HashMap<Address, String> = HashMap::new();
    let mut next_loc = 1usize;
    let mut next_call = 1usize;
    let mut out = Vec::with_capacity(lines.len());

    let mut name_of = |addr: Address| -> String {
        names
            .entry(addr)
            .or_insert_with(|| {
                let name = format!("LOC_{}", next_loc);
                next_loc += 1;
                name
            })
            .clone()
    };

    for line in lines {
        if targets.contains(&line.addr) {
            out.push(LabeledLine::Label(name_of(line.addr)));
        }

        let operands = match address_literal(line.operands.trim()) {
            Some(target) if is_call(line) && !targets.contains(&target) => {
                let name = format!("CALL_{}", next_call);
                next_call += 1;
                name
            }
            _ => rewrite_operands(&line.operands, |tok| {
                address_literal(tok)
                    .filter(|addr| targets.contains(addr))
                    .map(&mut name_of)
            }),
        };

        out.push(LabeledLine::Instruction(ListingLine {
            operands,
            ..line.clone()
        }));
    }

    out
}

/// Stage B: keep only `mnemonic operands` and label lines.
pub fn strip(lines: &[LabeledLine]) -> NormalizedText {
    let lines = lines
        .iter()
        .map(|line| match line {
            LabeledLine::Label(name) => format!("{}:", name),
            LabeledLine::Instruction(insn) if insn.operands.is_empty() => insn.mnemonic.clone(),
            LabeledLine::Instruction(insn) => format!("{} {}", insn.mnemonic, insn.operands),
        })
        .collect();

    NormalizedText { lines }
}

fn branch_targets(lines: &[ListingLine]) -> HashSet<Address> {
    let addrs: HashSet<Address> = lines.iter().map(|l| l.addr).collect();

    lines
        .iter()
        .flat_map(|line| {
            operand_tokens(&line.operands)
                .filter_map(address_literal)
                .filter(move |target| *target != line.addr)
        })
        .filter(|target| addrs.contains(target))
        .collect()
}

fn is_call(line: &ListingLine) -> bool {
    line.base_mnemonic() == "call"
}

fn operand_tokens(operands: &str) -> impl Iterator<Item = &str> {
    operands.split(',').map(str::trim).filter(|t| !t.is_empty())
}

/// Value of a bare `0x`-prefixed hex token.
fn address_literal(token: &str) -> Option<Address> {
    let digits = token.strip_prefix("0x")?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Address::from_str_radix(digits, 16).ok()
}

/// Replace whole operand tokens for which `f` returns a substitute. Operand
/// text without a substitution is returned as-is.
fn rewrite_operands(operands: &str, mut f: impl FnMut(&str) -> Option<String>) -> String {
    let mut changed = false;
    let tokens: Vec<String> = operand_tokens(operands)
        .map(|tok| match f(tok) {
            Some(new) => {
                changed = true;
                new
            }
            None => tok.to_string(),
        })
        .collect();

    if changed {
        tokens.join(", ")
    } else {
        operands.to_string()
    }
}
