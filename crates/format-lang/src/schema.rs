//! Schema model consumed by the decoder
//!
//! A `FormatDefinition` is produced by an external loader and treated as
//! read-only for the duration of a decode. Every type here derives serde, so
//! a loader can build the model straight from JSON or TOML; expressions are
//! parsed when they are deserialized.

use crate::encoding::TextEncoding;
use crate::eval::node::FlagState;
use crate::expression::Expression;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Definitions stored in a keyed table; the key names an unnamed entry
trait Named {
    fn name_mut(&mut self) -> &mut String;
}

/// Deserialize a definition table, filling empty names from the keys
fn named_table<'de, D, T>(deserializer: D) -> Result<FxHashMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Named,
{
    let mut table = FxHashMap::<String, T>::deserialize(deserializer)?;
    for (key, def) in table.iter_mut() {
        let name = def.name_mut();
        if name.is_empty() {
            name.clone_from(key);
        }
    }
    Ok(table)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// Declared type tag of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bytes,
    Ascii,
    Utf8,
    #[serde(rename = "utf16le")]
    Utf16Le,
    #[serde(rename = "utf16be")]
    Utf16Be,
    ShiftJis,
    Latin1,
    #[serde(rename = "asciiz")]
    AsciiZ,
    #[serde(rename = "utf8z")]
    Utf8Z,
    Struct,
    Switch,
    Bitfield,
    Virtual,
    Compressed,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::U8 => "u8",
            FieldType::U16 => "u16",
            FieldType::U32 => "u32",
            FieldType::U64 => "u64",
            FieldType::I8 => "i8",
            FieldType::I16 => "i16",
            FieldType::I32 => "i32",
            FieldType::I64 => "i64",
            FieldType::F32 => "f32",
            FieldType::F64 => "f64",
            FieldType::Bytes => "bytes",
            FieldType::Ascii => "ascii",
            FieldType::Utf8 => "utf8",
            FieldType::Utf16Le => "utf16le",
            FieldType::Utf16Be => "utf16be",
            FieldType::ShiftJis => "shift_jis",
            FieldType::Latin1 => "latin1",
            FieldType::AsciiZ => "asciiz",
            FieldType::Utf8Z => "utf8z",
            FieldType::Struct => "struct",
            FieldType::Switch => "switch",
            FieldType::Bitfield => "bitfield",
            FieldType::Virtual => "virtual",
            FieldType::Compressed => "compressed",
        }
    }

    /// Byte width and signedness of integer types
    pub fn integer_layout(self) -> Option<(usize, bool)> {
        match self {
            FieldType::U8 => Some((1, false)),
            FieldType::U16 => Some((2, false)),
            FieldType::U32 => Some((4, false)),
            FieldType::U64 => Some((8, false)),
            FieldType::I8 => Some((1, true)),
            FieldType::I16 => Some((2, true)),
            FieldType::I32 => Some((4, true)),
            FieldType::I64 => Some((8, true)),
            _ => None,
        }
    }

    /// Size of types whose width does not depend on the data
    pub fn fixed_width(self) -> Option<u64> {
        match self {
            FieldType::F32 => Some(4),
            FieldType::F64 => Some(8),
            FieldType::Virtual => Some(0),
            _ => self.integer_layout().map(|(w, _)| w as u64),
        }
    }

    /// Encoding of fixed-length text types
    pub fn text_encoding(self) -> Option<TextEncoding> {
        match self {
            FieldType::Ascii => Some(TextEncoding::Ascii),
            FieldType::Utf8 => Some(TextEncoding::Utf8),
            FieldType::Utf16Le => Some(TextEncoding::Utf16Le),
            FieldType::Utf16Be => Some(TextEncoding::Utf16Be),
            FieldType::ShiftJis => Some(TextEncoding::ShiftJis),
            FieldType::Latin1 => Some(TextEncoding::Latin1),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many bytes a field occupies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SizeRepr", into = "SizeRepr")]
pub enum SizeSpec {
    Fixed(u64),
    /// Everything left in the current scope
    Remaining,
    Expr(Expression),
}

/// Wire form of `SizeSpec`: an integer, `"remaining"`, or expression text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeRepr {
    Fixed(u64),
    Text(String),
}

impl TryFrom<SizeRepr> for SizeSpec {
    type Error = crate::error::Error;

    fn try_from(repr: SizeRepr) -> Result<Self, Self::Error> {
        match repr {
            SizeRepr::Fixed(n) => Ok(SizeSpec::Fixed(n)),
            SizeRepr::Text(s) if s.trim() == "remaining" => Ok(SizeSpec::Remaining),
            SizeRepr::Text(s) => Expression::parse(&s).map(SizeSpec::Expr),
        }
    }
}

impl From<SizeSpec> for SizeRepr {
    fn from(spec: SizeSpec) -> Self {
        match spec {
            SizeSpec::Fixed(n) => SizeRepr::Fixed(n),
            SizeSpec::Remaining => SizeRepr::Text("remaining".to_string()),
            SizeSpec::Expr(e) => SizeRepr::Text(e.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    None,
    Count(Expression),
    UntilEof,
    /// At least one element; stop when the expression holds or the scope ends
    UntilValue(Expression),
}

impl RepeatMode {
    pub fn is_none(&self) -> bool {
        matches!(self, RepeatMode::None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    pub value: Expression,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchSpec {
    pub discriminant: Expression,
    #[serde(default)]
    pub cases: Vec<SwitchCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Named bit range; bit 0 is the least significant bit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitfieldEntry {
    pub name: String,
    pub high: u32,
    pub low: u32,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumSpec {
    pub algorithm: String,
    /// Sibling fields whose raw bytes are hashed, in order
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumEntry {
    pub value: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnumDefinition {
    #[serde(default)]
    pub name: String,
    pub entries: Vec<EnumEntry>,
}

impl Named for EnumDefinition {
    fn name_mut(&mut self) -> &mut String {
        &mut self.name
    }
}

impl EnumDefinition {
    pub fn lookup(&self, value: i64) -> Option<&EnumEntry> {
        self.entries.iter().find(|e| e.value == value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagEntry {
    pub bit: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagsDefinition {
    #[serde(default)]
    pub name: String,
    pub flags: Vec<FlagEntry>,
}

impl Named for FlagsDefinition {
    fn name_mut(&mut self) -> &mut String {
        &mut self.name
    }
}

impl FlagsDefinition {
    /// State of every declared flag in `raw`
    pub fn resolve(&self, raw: u64) -> Vec<FlagState> {
        self.flags
            .iter()
            .map(|flag| FlagState {
                name: flag.name.clone(),
                bit: flag.bit,
                set: flag.bit < 64 && (raw >> flag.bit) & 1 == 1,
                description: flag.description.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeSpec>,
    /// Per-element size, used only when the field is repeated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_size: Option<SizeSpec>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_ref: Option<String>,
    #[serde(rename = "flags", default, skip_serializing_if = "Option::is_none")]
    pub flags_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_table: Option<String>,
    #[serde(rename = "struct", default, skip_serializing_if = "Option::is_none")]
    pub struct_ref: Option<String>,
    #[serde(default, skip_serializing_if = "RepeatMode::is_none")]
    pub repeat: RepeatMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch: Option<SwitchSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bitfield: Vec<BitfieldEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumSpec>,
    #[serde(
        default,
        with = "crate::hex::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected: Option<Vec<u8>>,
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seek: Option<Expression>,
    /// Return to the pre-seek position after decoding
    #[serde(default)]
    pub restore: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<u64>,
    /// Display hint only
    #[serde(default)]
    pub padding: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Expression>,
    /// `zlib` (default), `deflate`, `gzip` or `none`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            size: None,
            element_size: None,
            enum_ref: None,
            flags_ref: None,
            string_table: None,
            struct_ref: None,
            repeat: RepeatMode::None,
            switch: None,
            bitfield: Vec::new(),
            checksum: None,
            expected: None,
            condition: None,
            seek: None,
            restore: false,
            align: None,
            padding: false,
            validate: None,
            value: None,
            compression: None,
            description: None,
        }
    }

    pub fn with_size(mut self, size: SizeSpec) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_struct(mut self, name: impl Into<String>) -> Self {
        self.struct_ref = Some(name.into());
        self
    }

    pub fn with_enum(mut self, name: impl Into<String>) -> Self {
        self.enum_ref = Some(name.into());
        self
    }

    pub fn with_flags(mut self, name: impl Into<String>) -> Self {
        self.flags_ref = Some(name.into());
        self
    }

    pub fn with_repeat(mut self, repeat: RepeatMode) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_condition(mut self, condition: Expression) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_bitfield(mut self, entries: Vec<BitfieldEntry>) -> Self {
        self.bitfield = entries;
        self
    }

    pub fn with_switch(mut self, switch: SwitchSpec) -> Self {
        self.switch = Some(switch);
        self
    }

    pub fn with_expected(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.expected = Some(bytes.into());
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumSpec) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Size known without decoding anything, if there is one.
    pub fn static_size(&self) -> Option<u64> {
        if !self.repeat.is_none() || self.seek.is_some() || self.align.is_some() {
            return None;
        }
        match &self.size {
            Some(SizeSpec::Fixed(n)) => Some(*n),
            Some(_) => None,
            None => self.ty.fixed_width(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDefinition {
    #[serde(default)]
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endianness: Option<Endianness>,
    /// Pad the cursor to this multiple after the struct body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<u64>,
    #[serde(default)]
    pub is_string_table: bool,
}

impl Named for StructDefinition {
    fn name_mut(&mut self) -> &mut String {
        &mut self.name
    }
}

impl StructDefinition {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            name: name.into(),
            fields,
            endianness: None,
            align: None,
            is_string_table: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDefinition {
    pub name: String,
    #[serde(default)]
    pub endianness: Endianness,
    #[serde(default, deserialize_with = "named_table")]
    pub enums: FxHashMap<String, EnumDefinition>,
    #[serde(default, deserialize_with = "named_table")]
    pub flags: FxHashMap<String, FlagsDefinition>,
    #[serde(deserialize_with = "named_table")]
    pub structs: FxHashMap<String, StructDefinition>,
    pub root: String,
}

impl FormatDefinition {
    pub fn new(name: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endianness: Endianness::Little,
            enums: FxHashMap::default(),
            flags: FxHashMap::default(),
            structs: FxHashMap::default(),
            root: root.into(),
        }
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn with_struct(mut self, def: StructDefinition) -> Self {
        self.structs.insert(def.name.clone(), def);
        self
    }

    pub fn with_enum(mut self, name: impl Into<String>, def: EnumDefinition) -> Self {
        self.enums.insert(name.into(), def);
        self
    }

    pub fn with_flags(mut self, name: impl Into<String>, def: FlagsDefinition) -> Self {
        self.flags.insert(name.into(), def);
        self
    }
}
