//! Properties of the relative-path arithmetic behind link rewriting.

use std::path::PathBuf;

use proptest::prelude::*;

use kb_migrate::links::{relative_path, resolve, to_slash};

fn dir() -> impl Strategy<Value = PathBuf> {
    prop::collection::vec("[a-c]{1,2}", 0..4).prop_map(|segs| segs.iter().collect())
}

fn file() -> impl Strategy<Value = PathBuf> {
    (dir(), "[a-c]{1,3}\\.md").prop_map(|(d, name)| d.join(name))
}

proptest! {
    #[test]
    fn relative_path_resolves_back_to_target(from in dir(), to in file()) {
        let rel = relative_path(&from, &to);
        prop_assert!(!rel.is_empty());
        prop_assert!(!rel.starts_with('/'));
        prop_assert_eq!(resolve(&from, &rel), Some(to.clone()), "rel = {}", rel);
    }

    #[test]
    fn relative_path_never_has_redundant_segments(from in dir(), to in file()) {
        let rel = relative_path(&from, &to);
        let segs: Vec<&str> = rel.split('/').collect();
        prop_assert!(segs.iter().all(|s| !s.is_empty() && *s != "."));
        // All parent steps come first.
        let ups = segs.iter().take_while(|s| **s == "..").count();
        prop_assert!(segs[ups..].iter().all(|s| *s != ".."));
        prop_assert_eq!(to_slash(&to).ends_with(segs[ups..].join("/").as_str()), true);
    }
}
