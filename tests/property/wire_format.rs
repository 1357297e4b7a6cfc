//! Property tests for the sync wire format.
//!
//! Uses proptest to verify:
//! 1. Random bytes never cause a panic in either decoder.
//! 2. Task id normalization is idempotent and case-insensitive for UUIDs.
//! 3. Any create intent decodes to the intent that was encoded.
//! 4. Patches with unknown keys are always rejected.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use taskboard_proto::codec;
use taskboard_proto::sync::{ClientIntent, CorrelationId};
use taskboard_proto::task::{Category, Column, NewTask, Priority, TaskId};
use uuid::Uuid;

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop::sample::select(Priority::ALL.to_vec())
}

fn arb_column() -> impl Strategy<Value = Column> {
    prop::sample::select(Column::ALL.to_vec())
}

fn arb_category() -> impl Strategy<Value = Option<Category>> {
    prop::option::of(prop::sample::select(Category::ALL.to_vec()))
}

fn arb_new_task() -> impl Strategy<Value = NewTask> {
    (
        "[^\x00]{1,64}",
        prop::option::of("[^\x00]{0,128}"),
        arb_priority(),
        arb_column(),
        arb_category(),
    )
        .prop_map(|(title, description, priority, column, category)| NewTask {
            title,
            description,
            priority,
            column,
            category,
        })
}

proptest! {
    #[test]
    fn decode_intent_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_intent(&bytes);
    }

    #[test]
    fn decode_event_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_event(&bytes);
    }

    #[test]
    fn task_id_normalization_is_idempotent(raw in ".{0,64}") {
        let once = TaskId::new(raw);
        let twice = TaskId::new(once.as_str());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn uuid_ids_ignore_case_and_format(n in any::<u128>()) {
        let uuid = Uuid::from_u128(n);
        let canonical = TaskId::new(uuid.hyphenated().to_string());
        prop_assert_eq!(&TaskId::new(uuid.simple().to_string()), &canonical);
        prop_assert_eq!(&TaskId::new(uuid.hyphenated().to_string().to_uppercase()), &canonical);
        prop_assert_eq!(&TaskId::new(format!("  {}  ", uuid.braced())), &canonical);
    }

    #[test]
    fn create_intent_survives_the_wire(task in arb_new_task(), n in any::<u128>()) {
        let intent = ClientIntent::Create {
            task,
            correlation: Some(CorrelationId::from_uuid(Uuid::from_u128(n))),
        };
        let frame = codec::encode_intent(&intent).unwrap();
        prop_assert_eq!(codec::decode_intent(frame.as_bytes()).unwrap(), intent);
    }

    #[test]
    fn patch_with_unknown_key_is_rejected(key in "[a-z]{3,12}") {
        prop_assume!(!["title", "description", "priority", "column", "category"].contains(&key.as_str()));
        let frame = format!(
            r#"{{"event":"task:update","data":{{"id":"x","updates":{{"{key}":1}}}}}}"#
        );
        prop_assert!(codec::decode_intent(frame.as_bytes()).is_err());
    }
}
