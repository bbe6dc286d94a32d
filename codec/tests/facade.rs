//! Entry points: buffers, streams, encoding-bound writers and readers, the value-type
//! fast path and per-call configuration.

mod common;

use bytemuck::{Pod, Zeroable};
use common::{init_tracing, link, member, new_node, node_type};
use graph_codec::{
    deserialize, deserialize_as, deserialize_from_stream, deserialize_value_array,
    deserialize_value_type, serialize, serialize_to_stream, serialize_value_array,
    serialize_value_type, try_deserialize_value_type, BinaryReader, BinaryWriter, Collection,
    DataType, Error, ErrorKind, Options, Record, Serializer, TextEncoding, TypeRegistry,
    TypeResolver, Value,
};
use std::{
    io::{Cursor, Seek, SeekFrom, Write},
    sync::Arc,
    thread,
};

#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Sample {
    id: u32,
    level: f32,
}

#[test]
fn test_value_type_fast_path() {
    let sample = Sample { id: 7, level: 0.5 };
    let bytes = serialize_value_type(&sample);
    assert_eq!(bytes.len(), 8);
    assert_eq!(deserialize_value_type::<Sample>(&bytes).unwrap(), sample);
    assert_eq!(try_deserialize_value_type::<Sample>(&bytes[..7]), None);
    assert!(matches!(
        deserialize_value_type::<Sample>(&bytes[..3]),
        Err(Error::DataTooShort {
            found: 3,
            required: 8
        })
    ));
}

#[test]
fn test_value_array_fast_path() {
    let samples: Vec<Sample> = (0..5)
        .map(|i| Sample {
            id: i,
            level: i as f32 / 2.0,
        })
        .collect();
    let mut bytes = vec![0xEE; 2];
    bytes.extend(serialize_value_array(&samples));

    assert_eq!(deserialize_value_array::<Sample>(&bytes, 2, 5).unwrap(), samples);
    assert_eq!(deserialize_value_array::<Sample>(&bytes, 10, 4).unwrap(), samples[1..]);
    let err = deserialize_value_array::<Sample>(&bytes, 2, 6).unwrap_err();
    assert!(matches!(err, Error::DataTooShort { .. }));
    assert_eq!(err.kind(), ErrorKind::Argument);
    assert!(matches!(
        deserialize_value_array::<Sample>(&bytes, bytes.len() + 1, 0),
        Err(Error::InvalidOffset { .. })
    ));
}

#[test]
fn test_free_functions() {
    init_tracing();
    let ty = node_type("test.facade.Free");
    let root = new_node(&ty, "free");
    link(&root, &root);

    let bytes = serialize(&root, Options::SERIALIZE).unwrap();
    let decoded = deserialize(&bytes, 0, Options::DESERIALIZE, &[ty.clone()]).unwrap();
    assert!(decoded.graph_eq(&root));

    let record: Option<graph_codec::ObjectRef> =
        deserialize_as(&bytes, 0, Options::DESERIALIZE, &[ty]).unwrap();
    assert!(record.is_some());

    let null = serialize(&Value::Null, Options::SERIALIZE).unwrap();
    let none: Option<String> = deserialize_as(&null, 0, Options::DESERIALIZE, &[]).unwrap();
    assert_eq!(none, None);
}

#[test]
fn test_stream_is_not_consumed_past_payload() {
    let ty = node_type("test.facade.Streamed");
    let first = new_node(&ty, "first");
    let mut stream = Cursor::new(Vec::new());
    stream.write_all(b"header").unwrap();
    serialize_to_stream(&first, &mut stream, Options::SERIALIZE).unwrap();
    let end_of_first = stream.position();
    serialize_to_stream(&Value::U32(2), &mut stream, Options::SERIALIZE).unwrap();
    stream.write_all(b"trailer").unwrap();

    stream.seek(SeekFrom::Start(6)).unwrap();
    let decoded = deserialize_from_stream(&mut stream, Options::DESERIALIZE, &[ty]).unwrap();
    assert_eq!(member(&decoded, "label"), Value::from("first"));
    assert_eq!(stream.position(), end_of_first);

    let decoded = deserialize_from_stream(&mut stream, Options::DESERIALIZE, &[]).unwrap();
    assert_eq!(decoded, Value::U32(2));
    let mut rest = Vec::new();
    std::io::Read::read_to_end(&mut stream, &mut rest).unwrap();
    assert_eq!(rest, b"trailer");
}

#[test]
fn test_failed_stream_decode_reports_io_class() {
    struct Broken;
    impl std::io::Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk on fire"))
        }
    }
    impl Seek for Broken {
        fn seek(&mut self, _: SeekFrom) -> std::io::Result<u64> {
            Ok(0)
        }
    }
    let err = deserialize_from_stream(&mut Broken, Options::DESERIALIZE, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_writer_and_reader_share_an_encoding() {
    let text = Value::object(
        Collection::list(DataType::STRING).with_items(["naïve".into(), "日本".into()]),
    );
    let serializer = Serializer::default();
    for encoding in [TextEncoding::Utf8, TextEncoding::Utf16Le] {
        let mut writer = BinaryWriter::new(Vec::new(), encoding);
        writer.write_string("prefix").unwrap();
        serializer.serialize_to_writer(&text, &mut writer).unwrap();
        let bytes = writer.into_inner();

        let mut reader = BinaryReader::new(Cursor::new(bytes), encoding);
        assert_eq!(reader.read_string().unwrap(), "prefix");
        let decoded = serializer.deserialize_from_reader(&mut reader).unwrap();
        assert!(decoded.graph_eq(&text));
    }
}

#[test]
fn test_mixed_encodings_corrupt_text() {
    let text = Value::from("naïve");
    let serializer = Serializer::default();
    let mut writer = BinaryWriter::new(Vec::new(), TextEncoding::Utf16Le);
    serializer.serialize_to_writer(&text, &mut writer).unwrap();

    let mut reader = BinaryReader::new(Cursor::new(writer.into_inner()), TextEncoding::Utf8);
    match serializer.deserialize_from_reader(&mut reader) {
        Ok(decoded) => assert_ne!(decoded, text),
        Err(err) => assert_eq!(err.kind(), ErrorKind::Corrupt),
    }
}

#[test]
fn test_resolver_is_per_serializer() {
    let registry = Arc::new(TypeRegistry::new());
    let ty = node_type("test.facade.Private");
    let writer = Serializer::new(Options::empty()).with_resolver(registry.clone());
    let bytes = writer.serialize(&new_node(&ty, "p")).unwrap();
    assert!(registry.resolve("test.facade.Private").is_some());

    // Trusted decoding resolves names through the configured registry.
    let decoded = writer.deserialize(&bytes, 0).unwrap();
    assert_eq!(member(&decoded, "label"), Value::from("p"));

    let elsewhere = Serializer::new(Options::empty()).with_resolver(Arc::new(TypeRegistry::new()));
    assert!(matches!(
        elsewhere.deserialize(&bytes, 0),
        Err(Error::UnknownType(_))
    ));
}

#[test]
fn test_concurrent_calls() {
    let ty = node_type("test.facade.Concurrent");
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ty = ty.clone();
            thread::spawn(move || {
                for round in 0..50 {
                    let label = format!("{i}-{round}");
                    let root = new_node(&ty, &label);
                    link(&root, &root);
                    let bytes = Serializer::default().serialize(&root).unwrap();
                    let decoded = Serializer::default()
                        .with_expected_types([ty.clone()])
                        .deserialize(&bytes, 0)
                        .unwrap();
                    assert!(decoded.graph_eq(&root));
                    assert_eq!(member(&decoded, "label"), Value::from(label.as_str()));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_typed_conversion_of_record() {
    let ty = graph_codec::TypeDescriptor::value("test.facade.Pair")
        .member("a", DataType::U8)
        .member("b", DataType::U8)
        .build();
    let value = Value::Struct(Record::new(ty.clone()).with("a", 1u8).with("b", 2u8));
    let bytes = Serializer::default().serialize(&value).unwrap();
    let record: Record = Serializer::default()
        .with_expected_types([ty])
        .deserialize_as(&bytes, 0)
        .unwrap();
    assert_eq!(record.get("b"), Some(&Value::U8(2)));
}
