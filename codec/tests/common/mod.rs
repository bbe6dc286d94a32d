//! Helpers shared by the integration tests.

#![allow(dead_code)]

use graph_codec::{DataType, Record, TypeDescriptor, Value};
use std::sync::Arc;

/// Routes `tracing` output to the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A reference type with a label and an untyped link.
pub fn node_type(name: &str) -> Arc<TypeDescriptor> {
    TypeDescriptor::reference(name)
        .member("label", DataType::STRING)
        .member("next", DataType::OBJECT)
        .build()
}

/// Points the `next` member of `from` at `to`.
pub fn link(from: &Value, to: &Value) {
    if let Some(object) = from.as_object() {
        if let Some(record) = object.borrow_mut().as_record_mut() {
            record.set("next", to.clone());
        }
    }
}

/// Value of member `name` of the record behind `value`.
pub fn member(value: &Value, name: &str) -> Value {
    match value {
        Value::Ref(object) => object
            .borrow()
            .as_record()
            .and_then(|record| record.get(name).cloned())
            .unwrap_or(Value::Null),
        Value::Struct(record) => record.get(name).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Creates a record of `ty` behind a new reference.
pub fn new_node(ty: &Arc<TypeDescriptor>, label: &str) -> Value {
    Value::object(Record::new(ty.clone()).with("label", label))
}
