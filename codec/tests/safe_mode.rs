//! Decoding of hostile streams.

mod common;

use common::{init_tracing, link, new_node, node_type};
use graph_codec::{
    varint, Array, Collection, Comparer, DataType, Error, ErrorKind, Options, Record, Serializer,
    TypeDescriptor, Value, DEFAULT_MAX_DEPTH,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    cmp::Ordering,
    time::{Duration, Instant},
};

/// Replaces the single byte at `at` with the varint encoding of `value`.
fn splice_varint(bytes: &[u8], at: usize, value: u64) -> Vec<u8> {
    let mut encoded = Vec::new();
    varint::write(value, &mut encoded);
    let mut spliced = bytes[..at].to_vec();
    spliced.extend_from_slice(&encoded);
    spliced.extend_from_slice(&bytes[at + 1..]);
    spliced
}

fn int_array() -> Vec<u8> {
    let root = Value::object(Array::new(
        DataType::I32,
        vec![Value::I32(1), Value::I32(2), Value::I32(3)],
    ));
    Serializer::new(Options::SERIALIZE)
        .serialize(&root)
        .unwrap()
        .to_vec()
}

// Version, tag and one type code precede the payload.
const PAYLOAD: usize = 4;

#[test]
fn test_array_length_laundering() {
    init_tracing();
    let bytes = int_array();
    // The payload starts with the rank, followed by the length of the only dimension.
    assert_eq!(bytes[PAYLOAD], 1);
    assert_eq!(bytes[PAYLOAD + 1], 3);
    let hostile = splice_varint(&bytes, PAYLOAD + 1, u64::from(u32::MAX));

    let err = Serializer::new(Options::SAFE_MODE)
        .deserialize(&hostile, 0)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::LengthMismatch {
            declared,
            ..
        } if declared == u64::from(u32::MAX)
    ));
    assert_eq!(err.kind(), ErrorKind::Argument);
    // The message does not echo the declared length.
    assert!(!err.to_string().contains(&u32::MAX.to_string()));

    // Without safe mode the length is trusted, and the read runs out of data.
    let err = Serializer::new(Options::empty())
        .deserialize(&hostile, 0)
        .unwrap_err();
    assert!(matches!(err, Error::EndOfBuffer));
}

#[test]
fn test_modest_length_lie() {
    let bytes = int_array();
    let hostile = splice_varint(&bytes, PAYLOAD + 1, 4);
    assert!(matches!(
        Serializer::new(Options::SAFE_MODE).deserialize(&hostile, 0),
        Err(Error::LengthMismatch { declared: 4, .. })
    ));
}

#[test]
fn test_collection_count_laundering() {
    let list = Value::object(
        Collection::list(DataType::I32).with_items([Value::I32(5), Value::I32(6)]),
    );
    let bytes = Serializer::new(Options::empty()).serialize(&list).unwrap();
    // The payload is the capacity hint, then the count.
    assert_eq!(&bytes[PAYLOAD..PAYLOAD + 2], &[2, 2]);

    let hostile = splice_varint(&bytes, PAYLOAD + 1, u64::MAX);
    assert!(matches!(
        Serializer::new(Options::SAFE_MODE).deserialize(&hostile, 0),
        Err(Error::LengthMismatch { .. })
    ));
}

#[test]
fn test_capacity_hint_is_ignored() {
    let list = Value::object(
        Collection::list(DataType::I32).with_items([Value::I32(5), Value::I32(6)]),
    );
    let bytes = Serializer::new(Options::empty()).serialize(&list).unwrap();
    let hostile = splice_varint(&bytes, PAYLOAD, u64::MAX);

    let decoded = Serializer::new(Options::SAFE_MODE)
        .deserialize(&hostile, 0)
        .unwrap();
    assert!(decoded.graph_eq(&list));
}

#[test]
fn test_expected_types_required() {
    let ty = node_type("test.safe.Unlisted");
    let bytes = Serializer::default().serialize(&new_node(&ty, "x")).unwrap();

    let err = Serializer::default().deserialize(&bytes, 0).unwrap_err();
    assert!(matches!(err, Error::ExpectedTypesRequired));
    assert_eq!(err.kind(), ErrorKind::Security);
    assert!(err.to_string().contains("expected types"));
}

#[test]
fn test_type_not_allowed() {
    let ty = node_type("test.safe.Intruder");
    let other = node_type("test.safe.Listed");
    let bytes = Serializer::default().serialize(&new_node(&ty, "x")).unwrap();

    let err = Serializer::default()
        .with_expected_types([other])
        .deserialize(&bytes, 0)
        .unwrap_err();
    assert!(matches!(err, Error::TypeNotAllowed));
    assert_eq!(err.kind(), ErrorKind::Security);
    // The rejected name is not echoed back.
    assert!(!err.to_string().contains("Intruder"));

    // Outside of safe mode the process-wide registry resolves it.
    let decoded = Serializer::new(Options::empty())
        .deserialize(&bytes, 0)
        .unwrap();
    assert_eq!(decoded.type_name(), "test.safe.Intruder");
}

#[test]
fn test_declared_member_types_are_allowed() {
    let engine = TypeDescriptor::reference("test.safe.Engine")
        .member("power", DataType::U32)
        .build();
    let car = TypeDescriptor::reference("test.safe.Car")
        .member("engine", DataType::named(engine.clone()))
        .member("spare", DataType::list(DataType::named(engine.clone())))
        .build();
    let root = Value::object(
        Record::new(car.clone())
            .with("engine", Value::object(Record::new(engine.clone()).with("power", 90u32)))
            .with(
                "spare",
                Value::object(
                    Collection::list(DataType::named(engine.clone())).with_items([Value::object(
                        Record::new(engine).with("power", 60u32),
                    )]),
                ),
            ),
    );
    let bytes = Serializer::default().serialize(&root).unwrap();
    let decoded = Serializer::default()
        .with_expected_types([car])
        .deserialize(&bytes, 0)
        .unwrap();
    assert!(decoded.graph_eq(&root));
}

#[test]
fn test_truncated_streams_never_panic() {
    let ty = node_type("test.safe.Truncated");
    let a = new_node(&ty, "a");
    let b = new_node(&ty, "b");
    link(&a, &b);
    link(&b, &a);
    let root = Value::object(
        Collection::map(DataType::STRING, DataType::OBJECT)
            .with_entries([("a".into(), a), ("b".into(), b)]),
    );
    let bytes = Serializer::default().serialize(&root).unwrap();
    let serializer = Serializer::default().with_expected_types([ty]);

    assert!(serializer.deserialize(&bytes, 0).is_ok());
    for len in 0..bytes.len() {
        let err = serializer.deserialize(&bytes[..len], 0).unwrap_err();
        // A count cut off from its items is reported as a length mismatch.
        assert!(
            matches!(err.kind(), ErrorKind::Corrupt | ErrorKind::Argument),
            "prefix of {len} bytes: {err}"
        );
    }
}

#[test]
fn test_random_input_never_panics() {
    let mut rng = StdRng::seed_from_u64(1);
    let serializer = Serializer::new(Options::SAFE_MODE).with_max_depth(64);
    for _ in 0..2_000 {
        let len = rng.gen_range(0..64);
        let mut data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        if let Some(first) = data.first_mut() {
            *first = graph_codec::FORMAT_VERSION;
        }
        let _ = serializer.deserialize(&data, 0);
    }
}

#[test]
fn test_large_set_decodes_in_linear_time() {
    let set =
        Value::object(Collection::set(DataType::I32).with_items((0..100_000).map(Value::I32)));
    let map = Value::object(Collection::map(DataType::STRING, DataType::I64).with_entries(
        (0..50_000i64).map(|key| (Value::String(format!("key-{key}")), Value::I64(key))),
    ));
    for value in [set, map] {
        let bytes = Serializer::default().serialize(&value).unwrap();
        let start = Instant::now();
        let decoded = Serializer::new(Options::SAFE_MODE)
            .deserialize(&bytes, 0)
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(decoded.graph_eq(&value));
    }
}

#[test]
fn test_sorted_set_in_reverse_stream_order() {
    let items = || (0..100_000).map(Value::I32);
    let ascending = Serializer::default()
        .serialize(&Value::object(Collection::sorted_set(DataType::I32).with_items(items())))
        .unwrap();
    let mut descending = Serializer::default()
        .serialize(&Value::object(
            Collection::sorted_set(DataType::I32)
                .with_comparer(Comparer::Reverse)
                .with_items(items()),
        ))
        .unwrap()
        .to_vec();
    // Claim the default comparer for items stored largest first.
    let at = ascending
        .iter()
        .zip(&descending)
        .position(|(a, b)| a != b)
        .unwrap();
    assert_eq!(descending[at], Comparer::Reverse.wire_id().unwrap());
    descending[at] = Comparer::Default.wire_id().unwrap();

    let start = Instant::now();
    let decoded = Serializer::new(Options::SAFE_MODE)
        .deserialize(&descending, 0)
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));
    let decoded = decoded.as_object().unwrap().borrow();
    let set = decoded.as_collection().unwrap();
    assert_eq!(set.len(), 100_000);
    assert_eq!(set.values()[0], Value::I32(0));
    assert!(set.contains(&Value::I32(99_999)));
}

#[test]
fn test_repeated_keys_collapse() {
    // Every key is distinct under the custom comparer, which is written as the default one.
    let distinct = || Comparer::custom("never-equal", |_, _| Ordering::Less);
    let set = Collection::set(DataType::STRING)
        .with_comparer(distinct())
        .with_items((0..2_000).map(|_| Value::from("same")));
    let map = Collection::map(DataType::STRING, DataType::I32)
        .with_comparer(distinct())
        .with_entries((0..2_000).map(|i| (Value::from("same"), Value::I32(i))));
    assert_eq!((set.len(), map.len()), (2_000, 2_000));

    let forced = Serializer::new(Options::FORCE_RECURSIVE_FALLBACK);
    let decode = |collection: Collection| {
        let bytes = forced.serialize(&Value::object(collection)).unwrap();
        let decoded = Serializer::new(Options::SAFE_MODE)
            .deserialize(&bytes, 0)
            .unwrap();
        let object = decoded.as_object().unwrap().borrow();
        object.as_collection().unwrap().clone()
    };
    assert_eq!(decode(set).values(), &[Value::from("same")]);
    assert_eq!(
        decode(map).entries(),
        &[(Value::from("same"), Value::I32(1_999))]
    );
}

/// Runs `f` on a thread with the default stack size of spawned threads.
fn on_small_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    std::thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(f)
        .unwrap()
        .join()
        .unwrap()
}

fn nested_lists(depth: usize) -> Value {
    let mut value = Value::U8(7);
    for _ in 0..depth {
        value = Value::object(Collection::list(DataType::OBJECT).with_items([value]));
    }
    value
}

#[test]
fn test_default_depth_fits_small_stack() {
    on_small_stack(|| {
        let value = nested_lists(DEFAULT_MAX_DEPTH - 1);
        let bytes = Serializer::default().serialize(&value).unwrap();
        let decoded = Serializer::new(Options::SAFE_MODE)
            .deserialize(&bytes, 0)
            .unwrap();
        assert!(decoded.graph_eq(&value));

        let ty = node_type("test.safe_mode.Chain");
        let head = new_node(&ty, "0");
        let mut tail = head.clone();
        for i in 1..DEFAULT_MAX_DEPTH - 1 {
            let next = new_node(&ty, &i.to_string());
            link(&tail, &next);
            tail = next;
        }
        let bytes = Serializer::default().serialize(&head).unwrap();
        let decoded = Serializer::new(Options::SAFE_MODE)
            .with_expected_types([ty])
            .deserialize(&bytes, 0)
            .unwrap();
        assert!(decoded.graph_eq(&head));
    });
}

#[test]
fn test_deep_stream_rejected_on_small_stack() {
    // Written by an encoder allowed to nest far deeper, on a stack large enough for it.
    let bytes = std::thread::Builder::new()
        .stack_size(256 * 1024 * 1024)
        .spawn(|| {
            Serializer::default()
                .with_max_depth(4 * 1024)
                .serialize(&nested_lists(1_000))
                .unwrap()
                .to_vec()
        })
        .unwrap()
        .join()
        .unwrap();

    let rejected = on_small_stack(move || {
        let err = Serializer::new(Options::SAFE_MODE)
            .deserialize(&bytes, 0)
            .unwrap_err();
        matches!(err, Error::DepthExceeded(DEFAULT_MAX_DEPTH))
    });
    assert!(rejected);
}
