// Schemas assembled in code rather than loaded from JSON

use format_lang::checksum::crc32;
use format_lang::schema::{
    ChecksumSpec, EnumDefinition, EnumEntry, Endianness, FlagEntry, FlagsDefinition, SizeSpec,
    SwitchCase, SwitchSpec,
};
use format_lang::{
    DecodeMode, DecodeOptions, DecodedValue, Decoder, Expression, FieldDefinition, FieldType,
    FormatDefinition, StructDefinition,
};

fn expr(source: &str) -> Expression {
    Expression::parse(source).unwrap()
}

fn record_schema() -> FormatDefinition {
    let kinds = EnumDefinition {
        name: "kind".into(),
        entries: vec![EnumEntry { value: 1, name: "word".into(), description: None }],
    };
    let modes = FlagsDefinition {
        name: "mode".into(),
        flags: vec![
            FlagEntry { bit: 0, name: "read_only".into(), description: None },
            FlagEntry { bit: 1, name: "hidden".into(), description: None },
            FlagEntry { bit: 2, name: "system".into(), description: None },
        ],
    };

    let mut crc = FieldDefinition::new("crc", FieldType::U32).with_checksum(ChecksumSpec {
        algorithm: "crc32".into(),
        fields: vec!["magic".into()],
    });
    crc.description = Some("CRC-32 of the magic bytes".into());

    let record = StructDefinition::new(
        "record",
        vec![
            FieldDefinition::new("magic", FieldType::Bytes)
                .with_size(SizeSpec::Fixed(2))
                .with_expected([0xCA, 0xFE]),
            FieldDefinition::new("kind", FieldType::U8).with_enum("kind"),
            FieldDefinition::new("mode", FieldType::U8).with_flags("mode"),
            FieldDefinition::new("extra", FieldType::U8).with_condition(expr("{kind == 2}")),
            FieldDefinition::new("body", FieldType::Switch).with_switch(SwitchSpec {
                discriminant: expr("{kind}"),
                cases: vec![SwitchCase { value: expr("{1}"), target: "word".into() }],
                default: None,
            }),
            crc,
        ],
    );
    let word = StructDefinition::new("word", vec![FieldDefinition::new("w", FieldType::U16)]);

    FormatDefinition::new("record", "record")
        .with_endianness(Endianness::Big)
        .with_enum("kind", kinds)
        .with_flags("mode", modes)
        .with_struct(record)
        .with_struct(word)
}

fn record_bytes() -> Vec<u8> {
    let mut data = vec![0xCA, 0xFE, 0x01, 0x03, 0x00, 0x2A];
    data.extend_from_slice(&crc32(&[0xCA, 0xFE]).to_be_bytes());
    data
}

#[test]
fn test_built_schema_decodes() {
    let schema = record_schema();
    let decoder = Decoder::new(&schema, DecodeOptions::recovering());
    assert_eq!(decoder.options().mode, DecodeMode::Recover);

    let decoded = decoder.decode(&record_bytes()).unwrap();
    assert!(decoded.errors.is_empty());
    let root = decoded.root;
    assert_eq!(root.size, 10);

    match &root.child("magic").unwrap().value {
        DecodedValue::Bytes { matches_expected, .. } => assert_eq!(*matches_expected, Some(true)),
        other => panic!("expected bytes, got {:?}", other),
    }
    assert_eq!(root.child("kind").unwrap().enum_label(), Some("word"));
    match &root.child("mode").unwrap().value {
        DecodedValue::Flags { raw, flags } => {
            assert_eq!(*raw, 3);
            let set: Vec<&str> =
                flags.iter().filter(|f| f.set).map(|f| f.name.as_str()).collect();
            assert_eq!(set, vec!["read_only", "hidden"]);
        }
        other => panic!("expected flags, got {:?}", other),
    }
    assert!(root.child("extra").is_none());
    assert_eq!(root.path("body.w").and_then(|n| n.int_value()), Some(0x2A));

    let crc = root.child("crc").unwrap();
    assert_eq!(crc.attributes.description.as_deref(), Some("CRC-32 of the magic bytes"));
    match &crc.value {
        DecodedValue::Integer(int) => assert_eq!(int.checksum.map(|c| c.valid), Some(true)),
        other => panic!("expected integer, got {:?}", other),
    }
}

#[test]
fn test_built_schema_endianness_applies() {
    let schema = record_schema().with_endianness(Endianness::Little);
    let root = Decoder::new(&schema, DecodeOptions::default())
        .decode(&record_bytes())
        .unwrap()
        .root;
    assert_eq!(root.path("body.w").and_then(|n| n.int_value()), Some(0x2A00));
    match &root.child("crc").unwrap().value {
        DecodedValue::Integer(int) => assert_eq!(int.checksum.map(|c| c.valid), Some(false)),
        other => panic!("expected integer, got {:?}", other),
    }
}
