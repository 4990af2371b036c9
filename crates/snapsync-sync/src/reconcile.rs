//! Inventory comparison

use snapsync_types::Reconciliation;
use std::collections::HashSet;

/// Compare the caller's inventory with the peer's
///
/// Every name present in exactly one input lands in one of the two result
/// sets. Both sets keep the order of the input they came from.
///
/// Duplicate names are passed through as they are. Names are expected to be
/// unique per volume; with duplicates the result is still computed but
/// carries no meaning.
///
/// # Examples
///
/// ```rust
/// use snapsync_sync::reconcile;
///
/// let mine = vec!["s1".to_string(), "s2".to_string()];
/// let theirs = vec!["s2".to_string(), "s3".to_string()];
///
/// let result = reconcile(&mine, &theirs);
/// assert_eq!(result.caller_missing, vec!["s3"]);
/// assert_eq!(result.peer_missing, vec!["s1"]);
/// ```
pub fn reconcile(mine: &[String], theirs: &[String]) -> Reconciliation {
    let mine_set: HashSet<&str> = mine.iter().map(String::as_str).collect();
    let theirs_set: HashSet<&str> = theirs.iter().map(String::as_str).collect();

    Reconciliation {
        caller_missing: theirs
            .iter()
            .filter(|name| !mine_set.contains(name.as_str()))
            .cloned()
            .collect(),
        peer_missing: mine
            .iter()
            .filter(|name| !theirs_set.contains(name.as_str()))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn inventory() -> impl Strategy<Value = Vec<String>> {
        vec("s[0-9]{1,2}", 0..40)
    }

    proptest! {
        #[test]
        fn test_swap_symmetry(a in inventory(), b in inventory()) {
            let forward = reconcile(&a, &b);
            let backward = reconcile(&b, &a);

            prop_assert_eq!(&forward.caller_missing, &backward.peer_missing);
            prop_assert_eq!(&forward.peer_missing, &backward.caller_missing);
        }

        #[test]
        fn test_identity_is_in_sync(a in inventory()) {
            prop_assert!(reconcile(&a, &a).is_in_sync());
        }

        #[test]
        fn test_disjoint_inventories(a in vec("a[0-9]{1,3}", 0..30), b in vec("b[0-9]{1,3}", 0..30)) {
            let result = reconcile(&a, &b);

            prop_assert_eq!(result.peer_missing, a);
            prop_assert_eq!(result.caller_missing, b);
        }

        #[test]
        fn test_matches_symmetric_difference(a in inventory(), b in inventory()) {
            let result = reconcile(&a, &b);

            for name in &result.peer_missing {
                prop_assert!(a.contains(name) && !b.contains(name));
            }
            for name in &result.caller_missing {
                prop_assert!(b.contains(name) && !a.contains(name));
            }
            for name in a.iter().chain(b.iter()) {
                let exactly_one = a.contains(name) != b.contains(name);
                let reported = result.symmetric_difference().contains(name);
                prop_assert_eq!(exactly_one, reported);
            }
        }
    }

    #[test]
    fn test_client_server_scenario() {
        let result = reconcile(&names(&["s1", "s2"]), &names(&["s2", "s3"]));

        assert_eq!(result.caller_missing, names(&["s3"]));
        assert_eq!(result.peer_missing, names(&["s1"]));
    }

    #[test]
    fn test_duplicates_pass_through() {
        let result = reconcile(&names(&["s1", "s1", "s2"]), &names(&["s2"]));
        assert_eq!(result.peer_missing, names(&["s1", "s1"]));
        assert!(result.caller_missing.is_empty());
    }

    #[test]
    fn test_empty_inputs() {
        assert!(reconcile(&[], &[]).is_in_sync());

        let result = reconcile(&[], &names(&["s1"]));
        assert_eq!(result.caller_missing, names(&["s1"]));
        assert!(result.peer_missing.is_empty());
    }

    #[test]
    fn test_order_follows_input() {
        let result = reconcile(&names(&["c", "a", "b"]), &names(&["z", "y"]));
        assert_eq!(result.peer_missing, names(&["c", "a", "b"]));
        assert_eq!(result.caller_missing, names(&["z", "y"]));
    }
}
