//! Property tests for the pure helper layers: offset wrapping, message
//! normalization, output redaction and the draw bounds.

use std::path::Path;

use proptest::prelude::*;

use fsdiff_engine::admin::redact;
use fsdiff_engine::exec::{relative_target, wrap_offset};
use fsdiff_engine::oracle::Oracle;
use fsdiff_engine::strategy::{Draws, MAX_ENTRY_NAME, MAX_FILE_SIZE};

proptest! {
    #[test]
    fn wrapped_offset_is_always_in_range(size in 0u64..1 << 40, offset in 0u64..1 << 40) {
        let wrapped = wrap_offset(size, offset);
        if size == 0 {
            prop_assert_eq!(wrapped, 0);
        } else {
            prop_assert!(wrapped < size);
        }
    }

    #[test]
    fn wrapping_is_idempotent(size in 1u64..1 << 20, offset in 0u64..1 << 40) {
        let once = wrap_offset(size, offset);
        prop_assert_eq!(wrap_offset(size, once), once);
    }

    #[test]
    fn in_range_offsets_pass_through(size in 1u64..1 << 20, offset in 0u64..1 << 20) {
        prop_assume!(offset < size);
        prop_assert_eq!(wrap_offset(size, offset), offset);
    }

    #[test]
    fn normalize_is_idempotent(msg in "\\PC{0,200}") {
        let oracle = Oracle::new(Path::new("/r/a"), Path::new("/r/b"), false);
        let once = oracle.normalize("/r/a", &msg);
        prop_assert_eq!(oracle.normalize("/r/a", &once), once.clone());
    }

    #[test]
    fn normalize_drops_both_sides_roots(tail in "[a-z]{1,12}") {
        let oracle = Oracle::new(Path::new("/r/a"), Path::new("/r/b"), false);
        let left = oracle.normalize("/r/a", &format!("open /r/a/{tail}: denied"));
        let right = oracle.normalize("/r/b", &format!("open /r/b/{tail}: denied"));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn normalize_sorts_lines_stably(mut lines in proptest::collection::vec("[a-z]{1,10}", 2..6)) {
        let oracle = Oracle::new(Path::new("/r/a"), Path::new("/r/b"), false);
        let forward = oracle.normalize("/r/a", &lines.join("\n"));
        lines.reverse();
        let backward = oracle.normalize("/r/a", &lines.join("\n"));
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn redact_is_idempotent(text in "\\PC{0,200}") {
        let once = redact(&text);
        prop_assert_eq!(redact(&once), once.clone());
    }

    #[test]
    fn relative_target_never_escapes_past_the_root(
        target in "[a-z]{1,3}(/[a-z]{1,3}){0,3}",
        link in "[a-z]{1,3}(/[a-z]{1,3}){0,3}",
    ) {
        let rel = relative_target(&target, &link);
        let depth = link.matches('/').count();
        let ups = rel.split('/').filter(|p| *p == "..").count();
        prop_assert!(ups <= depth);
    }

    #[test]
    fn relative_target_resolves_back_to_the_target(
        target in "[a-z]{1,3}(/[a-z]{1,3}){0,3}",
        link in "[a-z]{1,3}(/[a-z]{1,3}){0,3}",
    ) {
        let rel = relative_target(&target, &link);
        // resolve rel against the link's parent directory
        let mut parts: Vec<&str> = match link.rsplit_once('/') {
            Some((dir, _)) => dir.split('/').collect(),
            None => Vec::new(),
        };
        for step in rel.split('/') {
            match step {
                "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        prop_assert_eq!(parts.join("/"), target);
    }

    #[test]
    fn draws_stay_inside_their_bounds(seed in any::<u64>()) {
        let mut draws = Draws::new(seed);
        for _ in 0..32 {
            let name = draws.entry_name();
            prop_assert!((1..=MAX_ENTRY_NAME).contains(&name.len()));
            prop_assert!(draws.file_content().len() <= MAX_FILE_SIZE);
            prop_assert!(draws.mode() <= 0o777);
            prop_assert!((2..=32).contains(&draws.vdirs()));
        }
    }
}
