// DecodedNode: output tree describing every decoded region of the buffer

use serde::Serialize;

use crate::encoding::TextEncoding;

use super::value::Value;

/// A node in the decode result tree.
/// Each node covers `size` bytes starting at `offset` in the buffer.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedNode {
    /// Field name (element index for array items)
    pub name: String,
    /// Declared type tag or struct name (e.g., "u32", "IHDR")
    pub type_name: String,
    /// Byte offset in the buffer
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
    pub value: DecodedValue,
    /// Struct members, array elements, or the struct inside a compressed stream
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DecodedNode>,
    pub attributes: NodeAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Number {
    Unsigned(u64),
    Signed(i64),
}

impl Number {
    /// The value as bound for expressions (unsigned values wrap)
    pub fn as_i64(self) -> i64 {
        match self {
            Number::Unsigned(v) => v as i64,
            Number::Signed(v) => v,
        }
    }
}

/// Outcome of a checksum comparison; `expected` is set only on mismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChecksumOutcome {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlagState {
    pub name: String,
    pub bit: u32,
    pub set: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BitfieldValue {
    pub name: String,
    pub high: u32,
    pub low: u32,
    pub value: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegerValue {
    pub value: Number,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumOutcome>,
    /// Text resolved through a string table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_ref: Option<String>,
}

impl IntegerValue {
    pub fn new(value: Number) -> Self {
        Self {
            value,
            enum_label: None,
            enum_description: None,
            checksum: None,
            string_ref: None,
        }
    }
}

/// Decoded value of a node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DecodedValue {
    /// Children hold the members
    Struct,
    /// Children hold the elements
    Array,
    Integer(IntegerValue),
    Float(f64),
    String {
        text: String,
        encoding: TextEncoding,
        /// Same bytes read as a big-endian flag register
        #[serde(skip_serializing_if = "Option::is_none")]
        flags: Option<Vec<FlagState>>,
    },
    Bytes {
        #[serde(with = "crate::hex")]
        data: Vec<u8>,
        /// Outcome of the expected-bytes comparison, if one was declared
        #[serde(skip_serializing_if = "Option::is_none")]
        matches_expected: Option<bool>,
    },
    Bitfield {
        raw: u64,
        fields: Vec<BitfieldValue>,
    },
    Flags {
        raw: u64,
        flags: Vec<FlagState>,
    },
    /// With a struct reference the decoded struct is the single child;
    /// otherwise the decompressed bytes are kept in `raw`.
    Compressed {
        algorithm: String,
        compressed_size: u64,
        decompressed_size: u64,
        #[serde(
            with = "crate::hex::option",
            skip_serializing_if = "Option::is_none"
        )]
        raw: Option<Vec<u8>>,
    },
    /// Computed value with no backing bytes
    Virtual(Value),
    /// Placeholder for a field that failed in recovery mode
    Error(String),
}

/// Per-node annotations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub padding: bool,
    /// Outcome of the field's validation expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
}

impl DecodedNode {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        offset: u64,
        size: u64,
        value: DecodedValue,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            offset,
            size,
            value,
            children: Vec::new(),
            attributes: NodeAttributes::default(),
        }
    }

    pub fn error(
        name: impl Into<String>,
        type_name: impl Into<String>,
        offset: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::new(name, type_name, offset, 0, DecodedValue::Error(message.into()))
    }

    /// Add a child node
    pub fn with_child(mut self, child: DecodedNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: Vec<DecodedNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.attributes.description = description;
        self
    }

    /// Direct child with the given name
    pub fn child(&self, name: &str) -> Option<&DecodedNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Follow a dotted path; numeric segments index into arrays.
    /// `node.path("chunks.0.data.width")`
    pub fn path(&self, dotted: &str) -> Option<&DecodedNode> {
        dotted.split('.').try_fold(self, |node, segment| {
            match (&node.value, segment.parse::<usize>()) {
                (DecodedValue::Array, Ok(idx)) => node.children.get(idx),
                _ => node.child(segment),
            }
        })
    }

    /// Elements of an array node (empty for anything else)
    pub fn elements(&self) -> &[DecodedNode] {
        match self.value {
            DecodedValue::Array => &self.children,
            _ => &[],
        }
    }

    /// This node plus all descendants
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.node_count()).sum::<usize>()
    }

    pub fn is_error(&self) -> bool {
        matches!(self.value, DecodedValue::Error(_))
    }

    /// Integer, bitfield or flags raw value
    pub fn int_value(&self) -> Option<i64> {
        match &self.value {
            DecodedValue::Integer(int) => Some(int.value.as_i64()),
            DecodedValue::Bitfield { raw, .. } | DecodedValue::Flags { raw, .. } => {
                Some(*raw as i64)
            }
            DecodedValue::Virtual(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.value {
            DecodedValue::String { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn enum_label(&self) -> Option<&str> {
        match &self.value {
            DecodedValue::Integer(int) => int.enum_label.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(name: &str, offset: u64, v: u64) -> DecodedNode {
        DecodedNode::new(
            name,
            "u8",
            offset,
            1,
            DecodedValue::Integer(IntegerValue::new(Number::Unsigned(v))),
        )
    }

    fn sample() -> DecodedNode {
        let element = DecodedNode::new("0", "Entry", 0, 2, DecodedValue::Struct)
            .with_child(int("a", 0, 1))
            .with_child(int("b", 1, 2));
        let array = DecodedNode::new("entries", "struct", 0, 2, DecodedValue::Array)
            .with_child(element);
        DecodedNode::new("root", "Root", 0, 2, DecodedValue::Struct).with_child(array)
    }

    #[test]
    fn test_path_lookup() {
        let root = sample();
        assert_eq!(root.path("entries.0.b").and_then(|n| n.int_value()), Some(2));
        assert!(root.path("entries.1.b").is_none());
        assert!(root.path("missing").is_none());
    }

    #[test]
    fn test_elements_and_count() {
        let root = sample();
        assert_eq!(root.child("entries").map(|n| n.elements().len()), Some(1));
        assert!(root.elements().is_empty());
        assert_eq!(root.node_count(), 5);
    }

    #[test]
    fn test_number_as_i64() {
        assert_eq!(Number::Unsigned(u64::MAX).as_i64(), -1);
        assert_eq!(Number::Signed(-5).as_i64(), -5);
    }

    #[test]
    fn test_serialize_bytes_as_hex() {
        let node = DecodedNode::new(
            "magic",
            "bytes",
            0,
            2,
            DecodedValue::Bytes {
                data: vec![0x4D, 0x5A],
                matches_expected: Some(true),
            },
        );
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["value"]["kind"], "bytes");
        assert_eq!(json["value"]["value"]["data"], "4d5a");
        assert_eq!(json["value"]["value"]["matches_expected"], true);
    }
}
