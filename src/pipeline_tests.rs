#[cfg(test)]
#[cfg(target_pointer_width = "64")]
mod tests {
    use std::fs;

    use rstest::rstest;

    use crate::{
        capture::{capture_and_diff, CaptureOutcome},
        config::CaptureConfig,
        format::Listing,
        normalize::normalize,
        platform::CompiledFunctionHandle,
        CaptureError, CaptureWarning,
    };

    // push rbp; mov rbp, rsp; test edi, edi; je +7; call +0x1000; jmp +2;
    // xor eax, eax; pop rbp; ret
    const SUM_BODY: &[u8] = &[
        0x55, 0x48, 0x89, 0xe5, 0x85, 0xff, 0x74, 0x07, 0xe8, 0x00, 0x10, 0x00, 0x00, 0xeb, 0x02,
        0x31, 0xc0, 0x5d, 0xc3,
    ];

    const SUM_NORMALIZED: &[&str] = &[
        "push rbp",
        "mov rbp, rsp",
        "test edi, edi",
        "je LOC_1",
        "call CALL_1",
        "jmp LOC_2",
        "LOC_1:",
        "xor eax, eax",
        "LOC_2:",
        "pop rbp",
        "ret",
    ];

    /// A descriptor chain laid out like a compiled dynamic method, living on
    /// the test's own heap.
    struct FakeRuntime {
        code: Vec<u8>,
        _header: Vec<u64>,
        descriptor: Vec<u64>,
    }

    impl FakeRuntime {
        fn compiled(body: &[u8]) -> Self {
            let mut code = body.to_vec();
            // Pad to a word boundary, then two zero words of allocator padding.
            code.resize(body.len().div_ceil(8) * 8 + 16, 0);
            Self::with_entry(code, true)
        }

        fn uncompiled() -> Self {
            Self::with_entry(vec![0u8; 32], false)
        }

        fn with_entry(code: Vec<u8>, compiled: bool) -> Self {
            let mut header = vec![0u64; 12];
            if compiled {
                header[11] = code.as_ptr() as u64;
            }
            let mut descriptor = vec![0u64; 8];
            descriptor[4] = header.as_ptr() as u64;

            Self {
                code,
                _header: header,
                descriptor,
            }
        }

        fn handle(&self, name: &str) -> CompiledFunctionHandle {
            CompiledFunctionHandle::new(name, self.descriptor.as_ptr() as u64, 4)
        }

        fn capture(&self, name: &str, config: &CaptureConfig) -> Result<CaptureOutcome, CaptureError> {
            // SAFETY: every pointer in the chain targets a live allocation owned by self.
            unsafe { capture_and_diff(&self.handle(name), config) }
        }
    }

    fn normalized_lines(path: &std::path::Path) -> Vec<String> {
        let text = fs::read_to_string(path).unwrap();
        normalize(&Listing::parse(&text).unwrap()).lines().to_vec()
    }

    #[test]
    fn test_first_capture_has_no_diff() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::new(dir.path());
        let runtime = FakeRuntime::compiled(SUM_BODY);

        let outcome = runtime.capture("Sum", &config).unwrap();
        println!("Captured {}", outcome.snapshot_path.display());

        assert_eq!(outcome.index, 0);
        assert!(outcome.diff.is_none());
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.snapshot_path, dir.path().join("Sum_0.txt"));
        assert_eq!(normalized_lines(&outcome.snapshot_path), SUM_NORMALIZED);
    }

    #[test]
    fn test_capture_text_records_real_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::new(dir.path());
        let runtime = FakeRuntime::compiled(SUM_BODY);

        let outcome = runtime.capture("Sum", &config).unwrap();
        let text = fs::read_to_string(&outcome.snapshot_path).unwrap();
        let listing = Listing::parse(&text).unwrap();

        assert_eq!(listing.function, "Sum");
        assert_eq!(listing.descriptor, runtime.descriptor.as_ptr() as u64);
        assert_eq!(listing.start, runtime.code.as_ptr() as u64);
        assert_eq!(listing.byte_count(), SUM_BODY.len());
        assert_eq!(listing.lines[4].operands, format!("0x{:x}", listing.start + 0x100d));
        assert!(text.ends_with("| Size 19 (0x13) bytes | 9 instructions\n"));
    }

    #[test]
    fn test_recapture_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::new(dir.path());
        let runtime = FakeRuntime::compiled(SUM_BODY);

        runtime.capture("Sum", &config).unwrap();
        let outcome = runtime.capture("Sum", &config).unwrap();

        assert_eq!(outcome.index, 1);
        let diff = outcome.diff.unwrap();
        assert_eq!(diff.path, dir.path().join("Sum_01.diff"));
        assert_eq!((diff.additions, diff.deletions), (0, 0));

        let rendered = fs::read_to_string(&diff.path).unwrap();
        assert!(rendered.starts_with("  push rbp\n"));
        assert!(rendered.ends_with("\nno differences\n"));
    }

    #[test]
    fn test_relocated_code_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::new(dir.path());
        let first = FakeRuntime::compiled(SUM_BODY);
        let moved = FakeRuntime::compiled(SUM_BODY);
        assert_ne!(first.code.as_ptr(), moved.code.as_ptr());

        first.capture("Sum", &config).unwrap();
        let outcome = moved.capture("Sum", &config).unwrap();

        let diff = outcome.diff.unwrap();
        assert_eq!((diff.additions, diff.deletions), (0, 0));
    }

    #[test]
    fn test_changed_body_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::new(dir.path());
        let mut changed = SUM_BODY.to_vec();
        // xor eax, eax -> xor edx, edx
        changed[16] = 0xd2;

        FakeRuntime::compiled(SUM_BODY).capture("Sum", &config).unwrap();
        let outcome = FakeRuntime::compiled(&changed).capture("Sum", &config).unwrap();

        let diff = outcome.diff.unwrap();
        assert_eq!((diff.additions, diff.deletions), (1, 1));

        let rendered = fs::read_to_string(&diff.path).unwrap();
        assert!(rendered.contains("- xor eax, eax\n"));
        assert!(rendered.contains("+ xor edx, edx\n"));
        assert!(rendered.ends_with("\n1 additions & 1 deletions\n"));
    }

    #[test]
    fn test_diffs_always_use_oldest_capture() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::new(dir.path());
        let runtime = FakeRuntime::compiled(SUM_BODY);

        runtime.capture("Sum", &config).unwrap();
        fs::rename(dir.path().join("Sum_0.txt"), dir.path().join("Sum_3.txt")).unwrap();
        fs::copy(dir.path().join("Sum_3.txt"), dir.path().join("Sum_5.txt")).unwrap();

        let outcome = runtime.capture("Sum", &config).unwrap();

        assert_eq!(outcome.index, 6);
        let diff = outcome.diff.unwrap();
        assert_eq!(diff.baseline_index, 3);
        assert_eq!(diff.path, dir.path().join("Sum_36.diff"));
    }

    #[test]
    fn test_uncompiled_function_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let config = CaptureConfig::new(&root);

        let err = FakeRuntime::uncompiled().capture("Sum", &config).unwrap_err();

        assert!(matches!(err, CaptureError::NotYetCompiled { ref function } if function == "Sum"));
        assert!(!root.exists());
    }

    #[rstest]
    #[case::trap(&[0x31, 0xc0, 0xcc], "int3")]
    #[case::indirect_jump(&[0x31, 0xc0, 0xff, 0xe0], "jmp")]
    #[case::short_return(&[0x31, 0xc0, 0xc3], "ret")]
    fn test_capture_ends_at_terminator(#[case] body: &[u8], #[case] last: &str) {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::new(dir.path());

        let outcome = FakeRuntime::compiled(body).capture("Term", &config).unwrap();
        let listing = Listing::parse(&fs::read_to_string(&outcome.snapshot_path).unwrap()).unwrap();

        assert!(outcome.warnings.is_empty());
        assert_eq!(listing.lines.len(), 2);
        assert_eq!(listing.lines[1].mnemonic, last);
        assert_eq!(listing.byte_count(), body.len());
    }

    #[test]
    fn test_missing_terminator_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::new(dir.path());
        // xor eax, eax; xor edx, edx; nop x4
        let body = [0x31, 0xc0, 0x31, 0xd2, 0x90, 0x90, 0x90, 0x90];

        let outcome = FakeRuntime::compiled(&body).capture("Open", &config).unwrap();

        assert_eq!(
            outcome.warnings,
            vec![CaptureWarning::NoTerminatorFound { instructions: 6 }]
        );
        assert!(outcome.snapshot_path.exists());
    }

    #[test]
    fn test_malformed_baseline_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::new(dir.path());
        let runtime = FakeRuntime::compiled(SUM_BODY);

        runtime.capture("Sum", &config).unwrap();
        fs::write(dir.path().join("Sum_0.txt"), "this is not a capture\n").unwrap();

        let err = runtime.capture("Sum", &config).unwrap_err();
        match err {
            CaptureError::MalformedSnapshot { function, index, baseline, current, .. } => {
                assert_eq!(function, "Sum");
                assert_eq!(index, 0);
                assert_eq!((baseline, current), (0, 1));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!dir.path().join("Sum_1.txt").exists());
    }
}
