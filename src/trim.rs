//! Cuts the decoded stream back to the function's real end.
//!
//! The extractor over-reads into alignment filler and sometimes the start of
//! the next function. Epilogues end in a single-byte `ret`, an `int3`, or a
//! `jmp`; the stream is cut after the *last* of those so early returns in the
//! middle of the body survive.

use crate::{CaptureWarning, InstructionStream};

/// Result of trimming: the kept stream and any warning raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trimmed {
    pub stream: InstructionStream,
    pub warning: Option<CaptureWarning>,
}

/// Truncate `stream` to end at its last sentinel instruction, inclusive.
///
/// Without a sentinel the stream is returned whole together with
/// `CaptureWarning::NoTerminatorFound`.
pub fn trim(stream: InstructionStream) -> Trimmed {
    match stream.insns().iter().rposition(|insn| insn.is_sentinel()) {
        Some(last) => {
            log::debug!(
                "trimmed {} trailing instructions after 0x{:x}",
                stream.len() - last - 1,
                stream.insns()[last].addr
            );
            Trimmed {
                stream: stream.truncate(last + 1),
                warning: None,
            }
        }
        None => {
            let warning = CaptureWarning::NoTerminatorFound {
                instructions: stream.len(),
            };
            log::warn!("{}", warning);
            Trimmed {
                stream,
                warning: Some(warning),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Insn;

    fn stream(rows: &[(&[u8], &str, &str)]) -> InstructionStream {
        let mut addr = 0x1000;
        let mut insns = Vec::new();
        for (bytes, mnemonic, operands) in rows {
            let insn = Insn::new(addr, bytes, mnemonic, operands);
            addr = insn.end_address();
            insns.push(insn);
        }
        InstructionStream::new(insns).unwrap()
    }

    #[test]
    fn test_trim_cuts_after_last_sentinel() {
        let input = stream(&[
            (&[0x55], "push", "rbp"),
            (&[0x74, 0x01], "je", "0x1004"),
            (&[0xc3], "ret", ""),
            (&[0x31, 0xc0], "xor", "eax, eax"),
            (&[0xc3], "ret", ""),
            (&[0x00, 0x00], "add", "byte ptr [rax], al"),
            (&[0x00, 0x00], "add", "byte ptr [rax], al"),
        ]);

        let trimmed = trim(input);
        assert_eq!(trimmed.warning, None);
        assert_eq!(trimmed.stream.len(), 5);
        assert_eq!(trimmed.stream.last().unwrap().addr, 0x1006);
    }

    #[test]
    fn test_trap_and_jump_are_sentinels() {
        let input = stream(&[
            (&[0xe9, 0x00, 0x00, 0x00, 0x00], "jmp", "0x1005"),
            (&[0xcc], "int3", ""),
            (&[0x90], "nop", ""),
        ]);

        let trimmed = trim(input);
        assert_eq!(trimmed.stream.len(), 2);
        assert!(trimmed.stream.last().unwrap().is_trap());
    }

    #[test]
    fn test_multi_byte_ret_is_not_a_sentinel() {
        let input = stream(&[
            (&[0xc3], "ret", ""),
            (&[0xc2, 0x08, 0x00], "ret", "8"),
        ]);

        let trimmed = trim(input);
        assert_eq!(trimmed.stream.len(), 1);
    }

    #[test]
    fn test_no_sentinel_keeps_everything() {
        let input = stream(&[
            (&[0x55], "push", "rbp"),
            (&[0x48, 0x89, 0xe5], "mov", "rbp, rsp"),
        ]);

        let trimmed = trim(input.clone());
        assert_eq!(trimmed.stream, input);
        assert_eq!(
            trimmed.warning,
            Some(CaptureWarning::NoTerminatorFound { instructions: 2 })
        );
    }
}
