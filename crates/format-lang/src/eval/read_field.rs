// Per-type field decoding for the decoder
use super::*;

use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

use crate::checksum::{self, Crc32};
use crate::encoding::{decode_text, TextEncoding};
use crate::schema::{ChecksumSpec, FieldType};
use node::{BitfieldValue, ChecksumOutcome, IntegerValue, Number};

/// Inflate a compressed stream with the named algorithm
fn decompress(algorithm: &str, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    let result = match algorithm.to_ascii_lowercase().as_str() {
        "zlib" => ZlibDecoder::new(data).read_to_end(&mut out),
        "deflate" => DeflateDecoder::new(data).read_to_end(&mut out),
        "gzip" => GzDecoder::new(data).read_to_end(&mut out),
        "none" => {
            out.extend_from_slice(data);
            Ok(data.len())
        }
        other => {
            return Err(DecodeError::schema(format!(
                "unknown compression '{}'",
                other
            )))
        }
    };
    result.map_err(|e| DecodeError::data(format!("{} stream is corrupt: {}", algorithm, e)))?;
    Ok(out)
}

/// First four bytes packed big-endian, as used for text fields that double
/// as flag registers
fn pack_be(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(4)
        .fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

impl<'s, 'd> DecodeState<'s, 'd> {
    /// Decode one occurrence of a field. `siblings` is `None` for array
    /// elements, which disables checksum verification.
    pub(crate) fn decode_single_field(
        &mut self,
        field: &FieldDefinition,
        siblings: Option<&[DecodedNode]>,
    ) -> Result<DecodedNode, DecodeError> {
        let start = self.ctx.cursor();
        match field.ty {
            FieldType::U8
            | FieldType::U16
            | FieldType::U32
            | FieldType::U64
            | FieldType::I8
            | FieldType::I16
            | FieldType::I32
            | FieldType::I64 => self.read_integer_field(field, siblings),
            FieldType::F32 => {
                let v = self.ctx.read_f32()?;
                Ok(self.leaf(field, start, DecodedValue::Float(v as f64)))
            }
            FieldType::F64 => {
                let v = self.ctx.read_f64()?;
                Ok(self.leaf(field, start, DecodedValue::Float(v)))
            }
            FieldType::Bytes => self.read_bytes_field(field),
            FieldType::Ascii => self.read_ascii_field(field),
            FieldType::Utf8
            | FieldType::Utf16Le
            | FieldType::Utf16Be
            | FieldType::ShiftJis
            | FieldType::Latin1 => {
                let encoding = field.ty.text_encoding().unwrap_or(TextEncoding::Utf8);
                let size = self.resolve_size(field)?;
                let text = self.ctx.read_text(size, encoding)?;
                Ok(self.text_node(field, start, text, encoding, None))
            }
            FieldType::AsciiZ | FieldType::Utf8Z => {
                let encoding = if field.ty == FieldType::AsciiZ {
                    TextEncoding::Ascii
                } else {
                    TextEncoding::Utf8
                };
                let text = self.ctx.read_cstring(encoding)?;
                Ok(self.text_node(field, start, text, encoding, None))
            }
            FieldType::Struct => {
                let name = field.struct_ref.as_deref().ok_or_else(|| {
                    DecodeError::schema(format!("struct field '{}' names no struct", field.name))
                })?;
                let def = self.lookup_struct(name)?;
                self.decode_struct_field(field, def)
            }
            FieldType::Switch => self.read_switch_field(field),
            FieldType::Bitfield => self.read_bitfield_field(field),
            FieldType::Virtual => {
                let expr = field.value.as_ref().ok_or_else(|| {
                    DecodeError::schema(format!(
                        "virtual field '{}' has no value expression",
                        field.name
                    ))
                })?;
                let value = self.eval(expr)?;
                self.ctx.set_var(field.name.as_str(), value.clone());
                Ok(self.leaf(field, start, DecodedValue::Virtual(value)))
            }
            FieldType::Compressed => self.read_compressed_field(field),
        }
    }

    /// Node covering `start..cursor`
    fn leaf(&self, field: &FieldDefinition, start: u64, value: DecodedValue) -> DecodedNode {
        let size = self.ctx.cursor().saturating_sub(start);
        DecodedNode::new(field.name.as_str(), field.ty.as_str(), start, size, value)
    }

    fn text_node(
        &mut self,
        field: &FieldDefinition,
        start: u64,
        text: String,
        encoding: TextEncoding,
        flags: Option<Vec<node::FlagState>>,
    ) -> DecodedNode {
        self.ctx
            .set_var(field.name.as_str(), Value::Text(text.clone()));
        self.leaf(
            field,
            start,
            DecodedValue::String {
                text,
                encoding,
                flags,
            },
        )
    }

    fn read_integer_field(
        &mut self,
        field: &FieldDefinition,
        siblings: Option<&[DecodedNode]>,
    ) -> Result<DecodedNode, DecodeError> {
        let start = self.ctx.cursor();
        let (width, signed) = field.ty.integer_layout().ok_or_else(|| {
            DecodeError::schema(format!("{} is not an integer type", field.ty))
        })?;
        let number = if signed {
            Number::Signed(self.ctx.read_int(width)?)
        } else {
            Number::Unsigned(self.ctx.read_uint(width)?)
        };
        let value = number.as_i64();
        self.ctx.set_var(field.name.as_str(), Value::Int(value));

        if let Some(flags_ref) = &field.flags_ref {
            let def = self.lookup_flags(flags_ref)?;
            let raw = value as u64;
            return Ok(self.leaf(
                field,
                start,
                DecodedValue::Flags {
                    raw,
                    flags: def.resolve(raw),
                },
            ));
        }

        let mut int = IntegerValue::new(number);
        if let Some(enum_ref) = &field.enum_ref {
            if let Some(entry) = self.lookup_enum(enum_ref)?.lookup(value) {
                int.enum_label = Some(entry.name.clone());
                int.enum_description = entry.description.clone();
            }
        }
        if let Some(table) = &field.string_table {
            int.string_ref = self.ctx.string_at(table, value as u64);
        }
        if let (Some(spec), Some(siblings)) = (&field.checksum, siblings) {
            int.checksum = Some(self.verify_checksum(spec, value as u64, siblings));
        }
        Ok(self.leaf(field, start, DecodedValue::Integer(int)))
    }

    /// Hash the original bytes of the named siblings and compare with `actual`.
    /// Unknown sibling names are skipped; unknown algorithms always pass.
    pub(crate) fn verify_checksum(
        &self,
        spec: &ChecksumSpec,
        actual: u64,
        siblings: &[DecodedNode],
    ) -> ChecksumOutcome {
        if !checksum::is_supported(&spec.algorithm) {
            return ChecksumOutcome {
                valid: true,
                expected: None,
            };
        }
        let mut crc = Crc32::new();
        for name in &spec.fields {
            if let Some(sibling) = siblings.iter().find(|s| &s.name == name) {
                crc.update(self.ctx.slice(sibling.offset, sibling.size));
            }
        }
        let computed = crc.finish() as u64;
        if computed == actual {
            ChecksumOutcome {
                valid: true,
                expected: None,
            }
        } else {
            debug!(
                path = %self.path_string(),
                stored = actual,
                computed,
                "checksum mismatch"
            );
            ChecksumOutcome {
                valid: false,
                expected: Some(computed),
            }
        }
    }

    fn read_bytes_field(&mut self, field: &FieldDefinition) -> Result<DecodedNode, DecodeError> {
        let start = self.ctx.cursor();
        let size = self.resolve_size(field)?;
        let data = self.ctx.read_bytes(size)?.to_vec();
        let matches_expected = field.expected.as_ref().map(|expected| *expected == data);
        if matches_expected == Some(false) {
            debug!(path = %self.path_string(), offset = start, "expected bytes mismatch");
        }
        Ok(self.leaf(
            field,
            start,
            DecodedValue::Bytes {
                data,
                matches_expected,
            },
        ))
    }

    /// Fixed ASCII text; with a flags reference the same bytes are also
    /// decoded as a flag register on the same node
    fn read_ascii_field(&mut self, field: &FieldDefinition) -> Result<DecodedNode, DecodeError> {
        let start = self.ctx.cursor();
        let size = self.resolve_size(field)?;
        let bytes = self.ctx.read_bytes(size)?;
        let text = decode_text(bytes, TextEncoding::Ascii);
        let flags = match &field.flags_ref {
            Some(flags_ref) => Some(self.lookup_flags(flags_ref)?.resolve(pack_be(bytes))),
            None => None,
        };
        Ok(self.text_node(field, start, text, TextEncoding::Ascii, flags))
    }

    /// Nested struct: bounded by the field's size when it declares one,
    /// otherwise its own consumption decides the size
    fn decode_struct_field(
        &mut self,
        field: &FieldDefinition,
        def: &'s StructDefinition,
    ) -> Result<DecodedNode, DecodeError> {
        if field.size.is_none() {
            return self.decode_struct(def, &field.name);
        }
        let start = self.ctx.cursor();
        let size = self.resolve_size(field)?;
        self.ctx.push_bounded_scope(size)?;
        let mut node = self.decode_struct(def, &field.name)?;
        self.ctx.pop_scope()?;
        node.offset = start;
        node.size = size;
        Ok(node)
    }

    fn read_switch_field(&mut self, field: &FieldDefinition) -> Result<DecodedNode, DecodeError> {
        let spec = field.switch.as_ref().ok_or_else(|| {
            DecodeError::schema(format!("switch field '{}' has no switch spec", field.name))
        })?;
        let discriminant = self.eval(&spec.discriminant)?;

        let mut target = None;
        for case in &spec.cases {
            if discriminant.loose_eq(&self.eval(&case.value)?) {
                target = Some(case.target.as_str());
                break;
            }
        }
        let target = target.or(spec.default.as_deref()).ok_or_else(|| {
            DecodeError::schema(format!(
                "no switch case matches {} '{}' and no default is declared",
                discriminant.type_name(),
                discriminant
            ))
        })?;
        trace!(path = %self.path_string(), case = target, "switch resolved");

        let def = self.lookup_struct(target)?;
        self.decode_struct_field(field, def)
    }

    fn read_bitfield_field(&mut self, field: &FieldDefinition) -> Result<DecodedNode, DecodeError> {
        let start = self.ctx.cursor();
        let size = self.resolve_size(field)?;
        if !matches!(size, 1 | 2 | 4) {
            return Err(DecodeError::schema(format!(
                "bitfield '{}' must be 1, 2 or 4 bytes, got {}",
                field.name, size
            )));
        }
        let raw = self.ctx.read_uint(size as usize)?;
        self.ctx.set_var(field.name.as_str(), Value::Int(raw as i64));

        let mut fields = Vec::with_capacity(field.bitfield.len());
        for entry in &field.bitfield {
            if entry.low > entry.high || entry.high >= 64 {
                return Err(DecodeError::schema(format!(
                    "bit range [{}:{}] of '{}' is invalid",
                    entry.high, entry.low, entry.name
                )));
            }
            let width = entry.high - entry.low + 1;
            let mask = if width >= 64 {
                u64::MAX
            } else {
                (1u64 << width) - 1
            };
            let value = (raw >> entry.low) & mask;
            let enum_label = match &entry.enum_ref {
                Some(enum_ref) => self
                    .lookup_enum(enum_ref)?
                    .lookup(value as i64)
                    .map(|e| e.name.clone()),
                None => None,
            };
            fields.push(BitfieldValue {
                name: entry.name.clone(),
                high: entry.high,
                low: entry.low,
                value,
                enum_label,
            });
        }
        Ok(self.leaf(field, start, DecodedValue::Bitfield { raw, fields }))
    }

    /// Decompress the field's bytes; with a struct reference the result is
    /// decoded in a fresh context over the decompressed buffer
    fn read_compressed_field(&mut self, field: &FieldDefinition) -> Result<DecodedNode, DecodeError> {
        let start = self.ctx.cursor();
        let size = self.resolve_size(field)?;
        let compressed = self.ctx.read_bytes(size)?;
        let algorithm = field.compression.as_deref().unwrap_or("zlib");
        let decompressed = decompress(algorithm, compressed)?;
        trace!(
            path = %self.path_string(),
            algorithm,
            compressed = size,
            decompressed = decompressed.len(),
            "stream inflated"
        );

        let mut node = DecodedNode::new(
            field.name.as_str(),
            field.ty.as_str(),
            start,
            size,
            DecodedValue::Compressed {
                algorithm: algorithm.to_string(),
                compressed_size: size,
                decompressed_size: decompressed.len() as u64,
                raw: None,
            },
        );
        match &field.struct_ref {
            Some(name) => {
                let def = self.lookup_struct(name)?;
                let inner = self.decode_nested_buffer(&decompressed, def, &field.name)?;
                node.children.push(inner);
            }
            None => {
                if let DecodedValue::Compressed { raw, .. } = &mut node.value {
                    *raw = Some(decompressed);
                }
            }
        }
        Ok(node)
    }

    /// Decode `def` over a separate buffer with the same schema, options and
    /// default endianness. Offsets inside refer to that buffer.
    fn decode_nested_buffer(
        &mut self,
        data: &[u8],
        def: &'s StructDefinition,
        name: &str,
    ) -> Result<DecodedNode, DecodeError> {
        let mut inner = DecodeState::new(self.schema, self.options, data);
        inner.path = self.path.clone();
        inner.depth = self.depth;
        inner.total_nodes = self.total_nodes;
        let result = inner.decode_struct(def, name);
        self.total_nodes = inner.total_nodes;
        self.errors.append(&mut inner.errors);
        result
    }
}
