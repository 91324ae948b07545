//! Property-based tests for destination parsing, key decoding and the
//! quarantine tag check.

use bucketmirror_core::event::{decode_key, EventKind};
use bucketmirror_core::quarantine::{is_infected_value, tags_are_clean};
use bucketmirror_core::store::{escape_copy_source, Tag};
use bucketmirror_core::DestinationSpec;
use proptest::prelude::*;

/// Bucket-name-like strings.
fn any_bucket() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9.-]{2,30}"
}

/// Region-like strings.
fn any_region() -> impl Strategy<Value = String> {
    "[a-z]{2}-[a-z]{4,9}-[1-9]"
}

proptest! {
    /// A `bucket@region` destination always splits back into its parts.
    #[test]
    fn test_destination_with_region_splits(bucket in any_bucket(), region in any_region()) {
        let spec: DestinationSpec = format!("{}@{}", bucket, region).parse().unwrap();
        prop_assert_eq!(spec.bucket(), bucket.as_str());
        prop_assert_eq!(spec.region(), Some(region.as_str()));
    }

    /// A bare bucket never carries a region.
    #[test]
    fn test_destination_without_region(bucket in any_bucket()) {
        let spec: DestinationSpec = bucket.parse().unwrap();
        prop_assert_eq!(spec.region(), None);
        prop_assert_eq!(spec.to_string(), bucket);
    }

    /// Decoding undoes percent-encoding for any key.
    #[test]
    fn test_decode_inverts_encoding(key in "\\PC{1,64}") {
        let encoded = urlencoding::encode(&key);
        prop_assert_eq!(decode_key(&encoded).unwrap(), key);
    }

    /// Trailing newlines never hide an infected marker.
    #[test]
    fn test_trailing_newlines_ignored(suffix in "[\r\n]{0,4}") {
        let value = format!("infected{}", suffix);
        prop_assert!(is_infected_value(&value));
        prop_assert!(!tags_are_clean(&[Tag::new("av", value)]));
    }

    /// Values other than the marker are always clean.
    #[test]
    fn test_other_values_clean(value in "[a-zA-Z ]{0,16}") {
        prop_assume!(value != "infected");
        prop_assert!(tags_are_clean(&[Tag::new("av", value)]));
    }

    /// The copy source never contains a raw slash or space.
    #[test]
    fn test_copy_source_escaped(bucket in any_bucket(), key in "[a-z /]{1,32}") {
        let source = escape_copy_source(&bucket, &key);
        prop_assert!(!source.contains('/'));
        prop_assert!(!source.contains(' '));
    }

    /// Names outside the handled set classify as `Other`, even under a
    /// handled namespace and with the `s3:` prefix.
    #[test]
    fn test_unknown_events_are_other(
        namespace in prop_oneof![
            Just("ObjectCreated"),
            Just("ObjectRemoved"),
            Just("ObjectTagging"),
            Just("ObjectRestore"),
            Just("Replication"),
        ],
        operation in "[A-Za-z]{1,24}",
        prefixed in any::<bool>(),
    ) {
        prop_assume!(!KNOWN_EVENTS.contains(&format!("{}:{}", namespace, operation).as_str()));
        let name = format!("{}{}:{}", if prefixed { "s3:" } else { "" }, namespace, operation);

        let kind = EventKind::from_event_name(&name);
        prop_assert_eq!(kind, EventKind::Other);
        prop_assert!(kind.action().is_none());
    }
}

/// Event names the replicator acts on.
const KNOWN_EVENTS: &[&str] = &[
    "ObjectCreated:Put",
    "ObjectCreated:Copy",
    "ObjectCreated:Post",
    "ObjectCreated:CompleteMultipartUpload",
    "ObjectRemoved:DeleteMarkerCreated",
    "ObjectTagging:Put",
    "ObjectTagging:Delete",
];
