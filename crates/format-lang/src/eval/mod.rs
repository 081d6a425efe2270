// Schema-driven binary decoder

pub mod context;
pub mod expr;
pub mod node;
mod read_field;
pub mod value;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{DecodeError, DecodeErrorKind};
use crate::expression::Expression;
use crate::options::{DecodeMode, DecodeOptions};
use crate::schema::{
    EnumDefinition, FieldDefinition, FlagsDefinition, FormatDefinition, RepeatMode, SizeSpec,
    StructDefinition,
};
use context::DecodeContext;
use expr::eval_expr;
use node::{DecodedNode, DecodedValue};
use value::Value;

/// A field failure that recovery mode replaced with an Error node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveredError {
    pub offset: u64,
    /// Dotted field path, e.g. `chunks[1].data.width`
    pub path: String,
    pub message: String,
}

/// Result of one decode call
#[derive(Debug, Clone, Serialize)]
pub struct Decoded {
    pub root: DecodedNode,
    /// Empty unless decoding in recovery mode
    pub errors: Vec<RecoveredError>,
}

/// Decodes buffers against one schema.
///
/// The schema is only read, so one decoder can serve many buffers, and
/// decoders over the same schema can run on separate threads.
pub struct Decoder<'s> {
    schema: &'s FormatDefinition,
    options: DecodeOptions,
}

impl<'s> Decoder<'s> {
    pub fn new(schema: &'s FormatDefinition, options: DecodeOptions) -> Self {
        Self { schema, options }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    pub fn decode(&self, data: &[u8]) -> Result<Decoded, DecodeError> {
        debug!(
            format = %self.schema.name,
            bytes = data.len(),
            mode = ?self.options.mode,
            "decode started"
        );
        let mut state = DecodeState::new(self.schema, &self.options, data);
        let def = state.lookup_struct(&self.schema.root)?;
        let root = state.decode_struct(def, &self.schema.name)?;
        debug!(
            format = %self.schema.name,
            consumed = root.size,
            nodes = state.total_nodes,
            errors = state.errors.len(),
            "decode finished"
        );
        Ok(Decoded {
            root,
            errors: state.errors,
        })
    }
}

/// Per-call mutable state: context, diagnostic path, counters
pub(crate) struct DecodeState<'s, 'd> {
    schema: &'s FormatDefinition,
    options: &'s DecodeOptions,
    ctx: DecodeContext<'d>,
    /// Field names from the root to the current field; diagnostics only
    path: Vec<String>,
    depth: u32,
    total_nodes: u64,
    errors: Vec<RecoveredError>,
}

impl<'s, 'd> DecodeState<'s, 'd> {
    fn new(schema: &'s FormatDefinition, options: &'s DecodeOptions, data: &'d [u8]) -> Self {
        Self {
            schema,
            options,
            ctx: DecodeContext::new(data, schema.endianness),
            path: Vec::new(),
            depth: 0,
            total_nodes: 1,
            errors: Vec::new(),
        }
    }

    fn recovering(&self) -> bool {
        self.options.mode == DecodeMode::Recover
    }

    // ========== Schema lookups ==========

    fn lookup_struct(&self, name: &str) -> Result<&'s StructDefinition, DecodeError> {
        self.schema
            .structs
            .get(name)
            .ok_or_else(|| DecodeError::schema(format!("unknown struct '{}'", name)))
    }

    fn lookup_enum(&self, name: &str) -> Result<&'s EnumDefinition, DecodeError> {
        self.schema
            .enums
            .get(name)
            .ok_or_else(|| DecodeError::schema(format!("unknown enum '{}'", name)))
    }

    fn lookup_flags(&self, name: &str) -> Result<&'s FlagsDefinition, DecodeError> {
        self.schema
            .flags
            .get(name)
            .ok_or_else(|| DecodeError::schema(format!("unknown flags '{}'", name)))
    }

    // ========== Expressions ==========

    fn eval(&self, expr: &Expression) -> Result<Value, DecodeError> {
        eval_expr(expr.root(), &self.ctx).map_err(DecodeError::from)
    }

    fn eval_int(&self, expr: &Expression) -> Result<i64, DecodeError> {
        Ok(self.eval(expr)?.to_int()?)
    }

    /// Evaluate an expression that must produce a byte count or offset
    fn eval_u64(&self, expr: &Expression, what: &str) -> Result<u64, DecodeError> {
        let v = self.eval_int(expr)?;
        u64::try_from(v).map_err(|_| {
            DecodeError::new(
                DecodeErrorKind::Expression,
                format!("{} '{}' evaluated to negative value {}", what, expr, v),
            )
        })
    }

    fn resolve_size(&self, field: &FieldDefinition) -> Result<u64, DecodeError> {
        match &field.size {
            Some(SizeSpec::Fixed(n)) => Ok(*n),
            Some(SizeSpec::Remaining) => Ok(self.ctx.remaining()),
            Some(SizeSpec::Expr(expr)) => self.eval_u64(expr, "size"),
            None => Err(DecodeError::schema(format!(
                "field '{}' of type {} needs a size",
                field.name, field.ty
            ))),
        }
    }

    // ========== Limits and diagnostics ==========

    fn path_string(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            if !out.is_empty() && !segment.starts_with('[') {
                out.push('.');
            }
            out.push_str(segment);
        }
        out
    }

    fn count_nodes(&mut self, n: u64) -> Result<(), DecodeError> {
        self.total_nodes += n;
        let max = self.options.max_total_nodes;
        if max > 0 && self.total_nodes > max {
            return Err(DecodeError::new(
                DecodeErrorKind::Limit,
                format!("total node limit exceeded (max {})", max),
            ));
        }
        Ok(())
    }

    fn check_array_limit(&self, count: u64) -> Result<(), DecodeError> {
        let max = self.options.max_array_elements;
        if max > 0 && count > max {
            return Err(DecodeError::new(
                DecodeErrorKind::Limit,
                format!("array element limit exceeded ({} > max {})", count, max),
            ));
        }
        Ok(())
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        self.depth += 1;
        if self.depth > self.options.max_depth {
            return Err(DecodeError::new(
                DecodeErrorKind::Limit,
                format!("nesting depth exceeded (max {})", self.options.max_depth),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ========== Structs ==========

    /// Decode a struct at the cursor. An endianness override applies to the
    /// body through an overlay scope.
    pub(crate) fn decode_struct(
        &mut self,
        def: &'s StructDefinition,
        name: &str,
    ) -> Result<DecodedNode, DecodeError> {
        self.enter()?;
        let start = self.ctx.cursor();
        if let Some(endian) = def.endianness {
            self.ctx.push_overlay_scope(endian);
        }
        let children = self.decode_struct_body(def)?;
        if def.endianness.is_some() {
            self.ctx.pop_scope()?;
        }
        if def.is_string_table && !self.ctx.has_string_table(&def.name) {
            trace!(table = %def.name, start, end = self.ctx.cursor(), "string table registered");
            self.ctx
                .register_string_table(&def.name, start, self.ctx.cursor());
        }
        if let Some(align) = def.align {
            self.ctx.align(align)?;
        }
        self.leave();
        let size = self.ctx.cursor().saturating_sub(start);
        Ok(
            DecodedNode::new(name, def.name.as_str(), start, size, DecodedValue::Struct)
                .with_children(children),
        )
    }

    fn decode_struct_body(
        &mut self,
        def: &'s StructDefinition,
    ) -> Result<Vec<DecodedNode>, DecodeError> {
        let mut children: Vec<DecodedNode> = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            self.options.check_cancelled()?;
            let field_start = self.ctx.cursor();
            let scope_depth = self.ctx.scope_depth();
            let (depth, path_len) = (self.depth, self.path.len());

            match self.decode_field(field, &children) {
                Ok(Some(node)) => {
                    self.count_nodes(1)?;
                    children.push(node);
                }
                Ok(None) => {}
                Err(err) if self.recovering() && err.is_recoverable() => {
                    self.ctx.truncate_scopes(scope_depth);
                    self.depth = depth;
                    self.path.truncate(path_len);
                    let resume = field
                        .static_size()
                        .map(|size| field_start.saturating_add(size).min(self.ctx.scope_end()));
                    let skipped = resume.map_or(0, |pos| pos.saturating_sub(field_start));
                    let node = self.record_failure(field, field_start, skipped, err);
                    self.count_nodes(1)?;
                    children.push(node);
                    match resume {
                        Some(pos) => self.ctx.reset_cursor(pos),
                        None => {
                            // Unknown extent: the rest of this struct is unreadable
                            self.ctx.reset_cursor(field_start);
                            break;
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(children)
    }

    fn record_failure(
        &mut self,
        field: &FieldDefinition,
        field_start: u64,
        skipped: u64,
        err: DecodeError,
    ) -> DecodedNode {
        let offset = err.offset.unwrap_or(field_start);
        let path = err.path.clone().unwrap_or_else(|| {
            let mut p = self.path_string();
            if !p.is_empty() {
                p.push('.');
            }
            p.push_str(&field.name);
            p
        });
        warn!(path = %path, offset, kind = %err.kind, "recovered from field failure: {}", err.message);
        self.errors.push(RecoveredError {
            offset,
            path,
            message: err.to_string(),
        });
        let mut node =
            DecodedNode::error(field.name.as_str(), field.ty.as_str(), field_start, err.message);
        node.size = skipped;
        node
    }

    // ========== Fields ==========

    /// Decode one field. `None` means its guard was false and nothing was read.
    fn decode_field(
        &mut self,
        field: &FieldDefinition,
        siblings: &[DecodedNode],
    ) -> Result<Option<DecodedNode>, DecodeError> {
        self.path.push(field.name.clone());
        let result = self.decode_field_inner(field, siblings).map_err(|e| {
            e.with_context_if_none(self.ctx.cursor(), &self.path_string(), field.ty)
        });
        self.path.pop();
        result
    }

    fn decode_field_inner(
        &mut self,
        field: &FieldDefinition,
        siblings: &[DecodedNode],
    ) -> Result<Option<DecodedNode>, DecodeError> {
        trace!(path = %self.path_string(), offset = self.ctx.cursor(), ty = %field.ty, "field");

        if let Some(condition) = &field.condition {
            if !self.eval(condition)?.to_bool() {
                return Ok(None);
            }
        }

        let saved = match &field.seek {
            Some(seek) => {
                let target = self.eval_u64(seek, "seek")?;
                let saved = self.ctx.cursor();
                self.ctx.seek(target)?;
                Some(saved)
            }
            None => None,
        };

        if let Some(align) = field.align {
            self.ctx.align(align)?;
        }

        let mut node = if field.repeat.is_none() {
            self.decode_single_field(field, Some(siblings))?
        } else {
            self.decode_repeated_field(field)?
        }
        .with_description(field.description.clone());

        if let Some(validate) = &field.validate {
            let valid = self.eval(validate)?.to_bool();
            if !valid {
                debug!(path = %self.path_string(), expr = %validate, "validation failed");
            }
            node.attributes.valid = Some(valid);
        }
        node.attributes.padding = field.padding;

        if let (Some(saved), true) = (saved, field.restore) {
            self.ctx.reset_cursor(saved);
        }
        Ok(Some(node))
    }

    /// Array of single-field decodes on a copy of the field with repeat
    /// cleared and `element_size` (if any) as its size.
    fn decode_repeated_field(&mut self, field: &FieldDefinition) -> Result<DecodedNode, DecodeError> {
        let start = self.ctx.cursor();
        let mut element = field.clone();
        element.repeat = RepeatMode::None;
        if let Some(element_size) = &field.element_size {
            element.size = Some(element_size.clone());
        }

        let mut elements = Vec::new();
        match &field.repeat {
            RepeatMode::None => {}
            RepeatMode::Count(count) => {
                let n = self.eval_u64(count, "repeat count")?;
                self.check_array_limit(n)?;
                for i in 0..n {
                    elements.push(self.decode_element(&element, i)?);
                }
            }
            RepeatMode::UntilEof => {
                while !self.ctx.is_exhausted() {
                    let i = elements.len() as u64;
                    self.check_array_limit(i + 1)?;
                    let (node, stalled) = self.decode_open_ended_element(&element, i)?;
                    elements.push(node);
                    if stalled {
                        break;
                    }
                }
            }
            RepeatMode::UntilValue(stop) => loop {
                let i = elements.len() as u64;
                self.check_array_limit(i + 1)?;
                let (node, stalled) = self.decode_open_ended_element(&element, i)?;
                elements.push(node);
                if stalled || self.eval(stop)?.to_bool() || self.ctx.is_exhausted() {
                    break;
                }
            },
        }

        let size = self.ctx.cursor().saturating_sub(start);
        Ok(
            DecodedNode::new(field.name.as_str(), field.ty.as_str(), start, size, DecodedValue::Array)
                .with_children(elements),
        )
    }

    /// Element of an EOF- or value-terminated array. Reports a stall when the
    /// element consumed no bytes (a zero-width element or a recovered failure
    /// that reset the cursor); repeating it could never reach the end.
    fn decode_open_ended_element(
        &mut self,
        element: &FieldDefinition,
        index: u64,
    ) -> Result<(DecodedNode, bool), DecodeError> {
        let before = self.ctx.cursor();
        let node = self.decode_element(element, index)?;
        let stalled = self.ctx.cursor() == before;
        if stalled {
            debug!(path = %self.path_string(), offset = before, "open-ended array made no progress");
        }
        Ok((node, stalled))
    }

    /// Elements get no sibling list, so their checksums are not verified
    fn decode_element(
        &mut self,
        element: &FieldDefinition,
        index: u64,
    ) -> Result<DecodedNode, DecodeError> {
        self.options.check_cancelled()?;
        self.path.push(format!("[{}]", index));
        let result = self.decode_single_field(element, None).map_err(|e| {
            e.with_context_if_none(self.ctx.cursor(), &self.path_string(), element.ty)
        });
        self.path.pop();
        let mut node = result?;
        node.name = format!("[{}]", index);
        self.count_nodes(1)?;
        Ok(node)
    }
}
