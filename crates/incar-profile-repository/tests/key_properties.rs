//! Property tests for profile keys

use incar_profile_repository::ProfileKey;
use proptest::prelude::*;

proptest! {
    #[test]
    fn file_stem_is_path_safe(car in "\\PC{0,40}", track in "\\PC{0,40}") {
        let stem = ProfileKey::new(&car, &track).file_stem();
        prop_assert!(!stem.contains('/'));
        prop_assert!(!stem.contains('\\'));
        prop_assert!(!stem.contains(".."));
        prop_assert!(!stem.contains(':'));
    }

    #[test]
    fn distinct_keys_have_distinct_stems(
        a in "[A-Za-z0-9 ]{1,12}",
        b in "[A-Za-z0-9 ]{1,12}",
        c in "[A-Za-z0-9 ]{1,12}",
    ) {
        let first = ProfileKey::new(&a, &b);
        let second = ProfileKey::new(&a, &c);
        prop_assume!(first != second);
        prop_assert_ne!(first.file_stem(), second.file_stem());
    }

    #[test]
    fn key_is_stable_under_resanitizing(car in "\\PC{0,40}", track in "\\PC{0,40}") {
        let key = ProfileKey::new(&car, &track);
        let again = ProfileKey::new(&key.car_name, &key.track_name);
        prop_assert_eq!(key, again);
    }
}
