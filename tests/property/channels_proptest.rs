//! Property-based tests for channel naming

use proptest::prelude::*;
use xfbackplane::backend::channels::{ChannelKind, ChannelNamer};

fn kind() -> impl Strategy<Value = ChannelKind> {
    prop_oneof![
        Just(ChannelKind::All),
        Just(ChannelKind::GroupManagement),
        Just(ChannelKind::Connection),
        Just(ChannelKind::Group),
        Just(ChannelKind::User),
        Just(ChannelKind::Ack),
        Just(ChannelKind::ReturnResults),
    ]
}

fn takes_discriminator(kind: ChannelKind) -> bool {
    !matches!(kind, ChannelKind::All | ChannelKind::GroupManagement)
}

proptest! {
    #[test]
    fn test_names_are_deterministic(prefix in "[a-z]{1,10}", kind in kind(), id in ".{0,20}") {
        let first = ChannelNamer::new(prefix.clone()).name(kind, &id);
        let second = ChannelNamer::new(prefix.clone()).name(kind, &id);
        prop_assert_eq!(&first, &second);
        let expected_start = format!("{}:", prefix);
        prop_assert!(first.starts_with(&expected_start));
    }

    #[test]
    fn test_distinct_targets_get_distinct_channels(
        prefix in "[a-z]{1,10}",
        a in (kind(), ".{0,20}"),
        b in (kind(), ".{0,20}"),
    ) {
        let namer = ChannelNamer::new(prefix);
        let same_target = a.0 == b.0 && (!takes_discriminator(a.0) || a.1 == b.1);
        prop_assert_eq!(namer.name(a.0, &a.1) == namer.name(b.0, &b.1), same_target);
    }

    #[test]
    fn test_discriminator_is_appended_verbatim(kind in kind(), id in ".{1,20}") {
        prop_assume!(takes_discriminator(kind));
        let name = ChannelNamer::new("p").name(kind, &id);
        prop_assert!(name.ends_with(&id));
    }
}
