#![no_main]

use arbitrary::Arbitrary;
use graph_codec::{DataType, Options, Serializer, TypeDescriptor, FORMAT_VERSION};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    compact: bool,
    expect_node: bool,
    data: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let point = TypeDescriptor::value("fuzz.Point")
        .member("x", DataType::I32)
        .member("y", DataType::I32)
        .build();
    let node = TypeDescriptor::reference("fuzz.Node")
        .member("label", DataType::STRING)
        .member("next", DataType::OBJECT)
        .member("items", DataType::list(DataType::named(point)))
        .build();

    let mut options = Options::SAFE_MODE;
    if input.compact {
        options |= Options::COMPACT_VALUE_TYPES;
    }
    let mut serializer = Serializer::new(options);
    if input.expect_node {
        serializer = serializer.with_expected_types([node]);
    }

    let mut data = input.data;
    if let Some(first) = data.first_mut() {
        *first = FORMAT_VERSION;
    }
    let Ok(value) = serializer.deserialize(&data, 0) else {
        return;
    };

    // Whatever decodes must encode again and decode to an equivalent graph.
    let Ok(bytes) = serializer.serialize(&value) else {
        return;
    };
    let decoded = serializer
        .deserialize(&bytes, 0)
        .expect("re-encoded graph must decode");
    assert!(decoded.graph_eq(&value));
});
