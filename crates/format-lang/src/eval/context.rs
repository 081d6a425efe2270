// Decode context: buffer, cursor, scope stack and bounded primitive reads

use rustc_hash::FxHashMap;

use crate::encoding::{decode_text, TextEncoding};
use crate::error::DecodeError;
use crate::schema::Endianness;

use super::expr::Environment;
use super::value::Value;

/// One byte-range window on the scope stack
#[derive(Debug, Clone)]
pub struct ScopeFrame {
    pub start: u64,
    pub end: u64,
    pub endian: Option<Endianness>,
    /// Overlay scopes only change endianness; popping one leaves the cursor
    pub overlay: bool,
    variables: FxHashMap<String, Value>,
}

impl ScopeFrame {
    fn new(start: u64, end: u64, endian: Option<Endianness>, overlay: bool) -> Self {
        Self {
            start,
            end,
            endian,
            overlay,
            variables: FxHashMap::default(),
        }
    }
}

/// Build a fixed-size array from a slice already checked for length
fn to_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N], DecodeError> {
    bytes
        .try_into()
        .map_err(|_| DecodeError::bounds(format!("expected {} bytes, got {}", N, bytes.len())))
}

macro_rules! read_primitive {
    ($name:ident, $ty:ty, $size:literal) => {
        pub fn $name(&mut self) -> Result<$ty, DecodeError> {
            let endian = self.endianness();
            let arr = to_array::<$size>(self.read_bytes($size)?)?;
            Ok(match endian {
                Endianness::Little => <$ty>::from_le_bytes(arr),
                Endianness::Big => <$ty>::from_be_bytes(arr),
            })
        }
    };
}

/// Mutable state of one decode call.
///
/// The root scope spans the whole buffer and is never popped. Every read
/// checks the innermost scope's remaining bytes, not just the buffer.
pub struct DecodeContext<'a> {
    data: &'a [u8],
    cursor: u64,
    root: ScopeFrame,
    scopes: Vec<ScopeFrame>,
    default_endian: Endianness,
    string_tables: FxHashMap<String, (u64, u64)>,
}

impl<'a> DecodeContext<'a> {
    pub fn new(data: &'a [u8], default_endian: Endianness) -> Self {
        Self {
            data,
            cursor: 0,
            root: ScopeFrame::new(0, data.len() as u64, None, false),
            scopes: Vec::new(),
            default_endian,
            string_tables: FxHashMap::default(),
        }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Move the cursor without any bounds check (used to undo a failed field)
    pub(crate) fn reset_cursor(&mut self, pos: u64) {
        self.cursor = pos;
    }

    fn top(&self) -> &ScopeFrame {
        self.scopes.last().unwrap_or(&self.root)
    }

    fn top_mut(&mut self) -> &mut ScopeFrame {
        match self.scopes.last_mut() {
            Some(frame) => frame,
            None => &mut self.root,
        }
    }

    fn frames(&self) -> impl Iterator<Item = &ScopeFrame> {
        self.scopes.iter().rev().chain(std::iter::once(&self.root))
    }

    pub fn scope_start(&self) -> u64 {
        self.top().start
    }

    pub fn scope_end(&self) -> u64 {
        self.top().end
    }

    /// Bytes left in the innermost scope
    pub fn remaining(&self) -> u64 {
        self.top().end.saturating_sub(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Innermost endianness override, else the buffer default
    pub fn endianness(&self) -> Endianness {
        self.frames()
            .find_map(|frame| frame.endian)
            .unwrap_or(self.default_endian)
    }

    // ========== Scope stack ==========

    /// Nested scope from the cursor spanning `size` bytes; it may not extend
    /// past the enclosing scope.
    pub fn push_bounded_scope(&mut self, size: u64) -> Result<(), DecodeError> {
        let parent_end = self.scope_end();
        let end = self
            .cursor
            .checked_add(size)
            .filter(|end| *end <= parent_end)
            .ok_or_else(|| {
                DecodeError::bounds(format!(
                    "scope of {} bytes at {:#x} exceeds enclosing scope ending at {:#x}",
                    size, self.cursor, parent_end
                ))
            })?;
        self.scopes
            .push(ScopeFrame::new(self.cursor, end, None, false));
        Ok(())
    }

    /// Scope over the same range as the current one that only overrides endianness
    pub fn push_overlay_scope(&mut self, endian: Endianness) {
        let (start, end) = (self.top().start, self.top().end);
        self.scopes
            .push(ScopeFrame::new(start, end, Some(endian), true));
    }

    /// Pop the innermost scope. A bounded scope moves the cursor to its end;
    /// an overlay hands its bindings to the enclosing frame.
    pub fn pop_scope(&mut self) -> Result<(), DecodeError> {
        let frame = self
            .scopes
            .pop()
            .ok_or_else(|| DecodeError::schema("cannot pop the root scope"))?;
        if frame.overlay {
            self.top_mut().variables.extend(frame.variables);
        } else {
            self.cursor = frame.end;
        }
        Ok(())
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Drop scopes above `depth` without moving the cursor
    pub(crate) fn truncate_scopes(&mut self, depth: usize) {
        self.scopes.truncate(depth);
    }

    // ========== Variables ==========

    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.top_mut().variables.insert(name.into(), value);
    }

    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.frames().find_map(|frame| frame.variables.get(name))
    }

    // ========== Reads ==========

    pub fn read_bytes(&mut self, len: u64) -> Result<&'a [u8], DecodeError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(DecodeError::bounds(format!(
                "read of {} bytes exceeds scope ({} remaining)",
                len, remaining
            )));
        }
        let start = self.cursor as usize;
        let bytes = self
            .data
            .get(start..start + len as usize)
            .ok_or_else(|| DecodeError::bounds("read past end of buffer"))?;
        self.cursor += len;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.read_u8()? as i8)
    }

    read_primitive!(read_u16, u16, 2);
    read_primitive!(read_u32, u32, 4);
    read_primitive!(read_u64, u64, 8);
    read_primitive!(read_i16, i16, 2);
    read_primitive!(read_i32, i32, 4);
    read_primitive!(read_i64, i64, 8);
    read_primitive!(read_f32, f32, 4);
    read_primitive!(read_f64, f64, 8);

    /// Unsigned integer of 1, 2, 4 or 8 bytes
    pub fn read_uint(&mut self, width: usize) -> Result<u64, DecodeError> {
        match width {
            1 => self.read_u8().map(u64::from),
            2 => self.read_u16().map(u64::from),
            4 => self.read_u32().map(u64::from),
            8 => self.read_u64(),
            _ => Err(DecodeError::schema(format!(
                "unsupported integer width {}",
                width
            ))),
        }
    }

    /// Sign-extended integer of 1, 2, 4 or 8 bytes
    pub fn read_int(&mut self, width: usize) -> Result<i64, DecodeError> {
        match width {
            1 => self.read_i8().map(i64::from),
            2 => self.read_i16().map(i64::from),
            4 => self.read_i32().map(i64::from),
            8 => self.read_i64(),
            _ => Err(DecodeError::schema(format!(
                "unsupported integer width {}",
                width
            ))),
        }
    }

    pub fn read_text(&mut self, len: u64, encoding: TextEncoding) -> Result<String, DecodeError> {
        let bytes = self.read_bytes(len)?;
        Ok(decode_text(bytes, encoding))
    }

    /// Text up to and including a NUL byte; without one, the rest of the scope
    pub fn read_cstring(&mut self, encoding: TextEncoding) -> Result<String, DecodeError> {
        let window = self.peek_scope();
        let (text_len, consumed) = match memchr::memchr(0, window) {
            Some(pos) => (pos, pos as u64 + 1),
            None => (window.len(), window.len() as u64),
        };
        let bytes = self.read_bytes(consumed)?;
        Ok(decode_text(&bytes[..text_len], encoding))
    }

    /// Unread bytes of the innermost scope
    fn peek_scope(&self) -> &'a [u8] {
        let data = self.data;
        let start = (self.cursor as usize).min(data.len());
        let end = (self.top().end as usize).clamp(start, data.len());
        &data[start..end]
    }

    /// Original bytes at an absolute range, independent of cursor and scope
    pub fn slice(&self, offset: u64, len: u64) -> &'a [u8] {
        let start = offset as usize;
        self.data
            .get(start..start.saturating_add(len as usize))
            .unwrap_or(&[])
    }

    // ========== Positioning ==========

    /// Absolute move, checked against the whole buffer
    pub fn seek(&mut self, offset: u64) -> Result<(), DecodeError> {
        if offset > self.data.len() as u64 {
            return Err(DecodeError::bounds(format!(
                "seek to {:#x} beyond buffer of {} bytes",
                offset,
                self.data.len()
            )));
        }
        self.cursor = offset;
        Ok(())
    }

    /// Advance to the next multiple of `alignment`; returns the padding skipped
    pub fn align(&mut self, alignment: u64) -> Result<u64, DecodeError> {
        if alignment <= 1 {
            return Ok(0);
        }
        let padding = (alignment - self.cursor % alignment) % alignment;
        if self.cursor + padding > self.scope_end() {
            return Err(DecodeError::bounds(format!(
                "alignment to {} needs {} bytes past scope end",
                alignment,
                self.cursor + padding - self.scope_end()
            )));
        }
        self.cursor += padding;
        Ok(padding)
    }

    /// Distance from the cursor to `marker` inside the current scope, or the
    /// remaining byte count when it does not occur
    pub fn find_marker(&self, marker: &[u8]) -> u64 {
        let window = self.peek_scope();
        match memchr::memmem::find(window, marker) {
            Some(pos) => pos as u64,
            None => window.len() as u64,
        }
    }

    // ========== String tables ==========

    /// Register a named byte range; later registrations of the same name are ignored
    pub fn register_string_table(&mut self, name: &str, start: u64, end: u64) {
        self.string_tables
            .entry(name.to_string())
            .or_insert((start, end));
    }

    pub fn has_string_table(&self, name: &str) -> bool {
        self.string_tables.contains_key(name)
    }

    /// NUL-terminated text at `offset` inside a registered table
    pub fn string_at(&self, table: &str, offset: u64) -> Option<String> {
        let &(start, end) = self.string_tables.get(table)?;
        let pos = start.checked_add(offset).filter(|pos| *pos < end)?;
        let window = self.slice(pos, end - pos);
        let len = memchr::memchr(0, window).unwrap_or(window.len());
        Some(decode_text(&window[..len], TextEncoding::Utf8))
    }
}

impl Environment for DecodeContext<'_> {
    fn get_var(&self, name: &str) -> Option<&Value> {
        DecodeContext::get_var(self, name)
    }

    fn remaining(&self) -> u64 {
        DecodeContext::remaining(self)
    }

    fn find_marker(&self, marker: &[u8]) -> u64 {
        DecodeContext::find_marker(self, marker)
    }
}
