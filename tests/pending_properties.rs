use std::collections::HashSet;
use std::path::PathBuf;
use std::time::SystemTime;

use proptest::prelude::*;

use treewatch::pending::{PendingChanges, PendingFlags};

/// Paths drawn from a tiny alphabet so prefixes collide often.
fn arb_path() -> impl Strategy<Value = PathBuf> {
    proptest::collection::vec(prop_oneof!["a", "b", "c"], 1..5).prop_map(|segments| {
        let mut path = PathBuf::from("/w");
        for segment in segments {
            path.push(segment);
        }
        path
    })
}

fn arb_flags() -> impl Strategy<Value = PendingFlags> {
    prop_oneof![
        Just(PendingFlags::VIA_NOTIFY),
        Just(PendingFlags::RECURSIVE),
        Just(PendingFlags::VIA_NOTIFY | PendingFlags::RECURSIVE),
        Just(PendingFlags::CRAWL_ONLY),
    ]
}

proptest! {
    /// After any sequence of adds:
    /// - no queued entry is a strict descendant of a queued recursive entry;
    /// - every added path is still covered, either by an entry for the path
    ///   itself or by a recursive ancestor;
    /// - paths are unique.
    #[test]
    fn coalescing_preserves_coverage_without_redundancy(
        ops in proptest::collection::vec((arb_path(), arb_flags()), 1..50)
    ) {
        let mut changes = PendingChanges::default();
        for (path, flags) in &ops {
            changes.add(path, SystemTime::now(), *flags);
        }

        let items: Vec<_> = changes.steal_items().into_iter().collect();

        let mut seen = HashSet::new();
        for item in &items {
            prop_assert!(seen.insert(item.path.clone()), "duplicate path {:?}", item.path);
        }

        for a in &items {
            for b in &items {
                if a.path != b.path && b.flags.contains(PendingFlags::RECURSIVE) {
                    prop_assert!(
                        !a.path.starts_with(&b.path),
                        "{:?} is shadowed by recursive {:?}",
                        a.path,
                        b.path
                    );
                }
            }
        }

        for (path, _) in &ops {
            let covered = items.iter().any(|item| {
                item.path == *path
                    || (item.flags.contains(PendingFlags::RECURSIVE)
                        && path.starts_with(&item.path))
            });
            prop_assert!(covered, "{:?} lost by coalescing", path);
        }
    }
}
