// Recovery mode: failed fields become Error nodes and decoding continues

use format_lang::{
    decode, decode_with_recovery, DecodeErrorKind, DecodeMode, DecodedValue, FormatDefinition,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn schema(value: serde_json::Value) -> FormatDefinition {
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_static_size_field_resumes_after_its_extent() {
    init_tracing();
    let schema = schema(json!({
        "name": "t", "root": "r",
        "structs": {"r": {"fields": [
            {"name": "head", "type": "bytes", "size": 4, "if": "{missing == 1}"},
            {"name": "tail", "type": "u8"}
        ]}}
    }));
    let data = [1, 2, 3, 4, 5];

    let err = decode(&data, &schema).unwrap_err();
    assert_eq!(err.kind, DecodeErrorKind::Expression);

    let (root, errors) = decode_with_recovery(&data, &schema, DecodeMode::Recover).unwrap();
    let head = root.child("head").unwrap();
    assert!(head.is_error());
    assert_eq!(head.offset, 0);
    assert_eq!(head.size, 4);
    assert_eq!(root.child("tail").and_then(|n| n.int_value()), Some(5));

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].path, "head");
    assert_eq!(errors[0].offset, 0);
    assert!(errors[0].message.contains("missing"));
}

#[test]
fn test_dynamic_size_failure_abandons_rest_of_struct() {
    init_tracing();
    let schema = schema(json!({
        "name": "t", "root": "r",
        "structs": {
            "r": {"fields": [
                {"name": "rec", "type": "struct", "struct": "rec"},
                {"name": "after", "type": "u8"}
            ]},
            "rec": {"fields": [
                {"name": "len", "type": "u8"},
                {"name": "body", "type": "bytes", "size": "{len}"},
                {"name": "trailer", "type": "u8"}
            ]}
        }
    }));
    let (root, errors) = decode_with_recovery(&[10, 0xAA], &schema, DecodeMode::Recover).unwrap();

    let rec = root.child("rec").unwrap();
    let names: Vec<&str> = rec.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["len", "body"]);
    assert!(rec.child("body").unwrap().is_error());
    assert_eq!(rec.child("body").unwrap().size, 0);
    assert_eq!(rec.size, 1);
    // Unbounded struct: cursor went back to where body started
    assert_eq!(root.child("after").and_then(|n| n.int_value()), Some(0xAA));

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].path, "rec.body");
    assert_eq!(errors[0].offset, 1);
    assert!(errors[0].message.starts_with("bounds error"));
}

#[test]
fn test_abandoned_sized_struct_resumes_parent_at_its_end() {
    init_tracing();
    let schema = schema(json!({
        "name": "t", "root": "r",
        "structs": {
            "r": {"fields": [
                {"name": "rec", "type": "struct", "struct": "rec", "size": 3},
                {"name": "after", "type": "u8"}
            ]},
            "rec": {"fields": [
                {"name": "len", "type": "u8"},
                {"name": "body", "type": "bytes", "size": "{len}"},
                {"name": "trailer", "type": "u8"}
            ]}
        }
    }));
    let (root, errors) =
        decode_with_recovery(&[10, 0xAA, 0xBB, 0x07], &schema, DecodeMode::Recover).unwrap();

    let rec = root.child("rec").unwrap();
    assert!(rec.child("body").unwrap().is_error());
    assert!(rec.child("trailer").is_none());
    assert_eq!(rec.size, 3);
    assert_eq!(root.child("after").and_then(|n| n.int_value()), Some(0x07));
    assert_eq!(root.size, 4);

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].path, "rec.body");
}

#[test]
fn test_strict_mode_through_recovery_entry_point() {
    let schema = schema(json!({
        "name": "t", "root": "r",
        "structs": {"r": {"fields": [{"name": "v", "type": "u32"}]}}
    }));
    let err = decode_with_recovery(&[1, 2], &schema, DecodeMode::Strict).unwrap_err();
    assert_eq!(err.kind, DecodeErrorKind::Bounds);
}

#[test]
fn test_schema_errors_stay_fatal() {
    let schema = schema(json!({
        "name": "t", "root": "r",
        "structs": {
            "r": {"fields": [
                {"name": "tag", "type": "u8"},
                {"name": "body", "type": "switch", "switch": {
                    "discriminant": "{tag}",
                    "cases": [{"value": "{1}", "target": "one"}]
                }}
            ]},
            "one": {"fields": [{"name": "a", "type": "u8"}]}
        }
    }));
    let err = decode_with_recovery(&[2, 0], &schema, DecodeMode::Recover).unwrap_err();
    assert_eq!(err.kind, DecodeErrorKind::Schema);

    let bad_width = self::schema(json!({
        "name": "t", "root": "r",
        "structs": {"r": {"fields": [
            {"name": "bits", "type": "bitfield", "size": 3, "bitfield": []}
        ]}}
    }));
    let err = decode_with_recovery(&[0; 4], &bad_width, DecodeMode::Recover).unwrap_err();
    assert_eq!(err.kind, DecodeErrorKind::Schema);
}

#[test]
fn test_truncated_element_in_open_ended_array() {
    init_tracing();
    let schema = schema(json!({
        "name": "t", "root": "r",
        "structs": {
            "r": {"fields": [
                {"name": "items", "type": "struct", "struct": "item", "repeat": "until_eof"}
            ]},
            "item": {"fields": [{"name": "v", "type": "u16"}]}
        }
    }));
    let (root, errors) = decode_with_recovery(&[1, 0, 2], &schema, DecodeMode::Recover).unwrap();

    let items = root.child("items").unwrap().elements();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].child("v").and_then(|n| n.int_value()), Some(1));
    assert!(items[1].child("v").unwrap().is_error());
    assert_eq!(root.size, 3);

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].path, "items[1].v");
    assert_eq!(errors[0].offset, 2);
}

#[test]
fn test_oversized_scope_resumes_at_scope_end() {
    let schema = schema(json!({
        "name": "t", "root": "r",
        "structs": {
            "r": {"fields": [
                {"name": "inner", "type": "struct", "struct": "inner", "size": 8},
                {"name": "after", "type": "u8"}
            ]},
            "inner": {"fields": [{"name": "v", "type": "u8"}]}
        }
    }));
    let (root, errors) = decode_with_recovery(&[7, 9], &schema, DecodeMode::Recover).unwrap();
    let inner = root.child("inner").unwrap();
    assert!(inner.is_error());
    assert_eq!(inner.size, 2);
    // Resumption is clamped to the end of the buffer, leaving nothing for `after`
    assert!(root.child("after").unwrap().is_error());
    assert_eq!(root.size, 2);
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[1].path, "after");
}

#[test]
fn test_error_node_serializes_message() {
    let schema = schema(json!({
        "name": "t", "root": "r",
        "structs": {"r": {"fields": [{"name": "v", "type": "u32"}]}}
    }));
    let (root, _) = decode_with_recovery(&[1], &schema, DecodeMode::Recover).unwrap();
    let v = root.child("v").unwrap();
    assert!(matches!(&v.value, DecodedValue::Error(msg) if !msg.is_empty()));
    let json = serde_json::to_value(&root).unwrap();
    assert_eq!(json["children"][0]["value"]["kind"], "error");
}
