//! Cursor over a flattened type tree.

use super::TypeCode;
use crate::{util::at_least, Error};
use bytes::Buf;

/// Maximum nesting of composite codes within one type tree.
pub const MAX_TYPE_DEPTH: usize = 64;

/// A cursor over a pre-order sequence of [TypeCode]s.
///
/// The walker starts before the first code. [TypeCodeWalker::advance] consumes codes one
/// at a time; [TypeCodeWalker::descend_into_element] steps into the element embedded in a
/// composite code without consuming anything. Cursor states can be saved and restored in
/// LIFO order with [TypeCodeWalker::checkpoint] and [TypeCodeWalker::rewind].
#[derive(Clone, Debug)]
pub struct TypeCodeWalker {
    codes: Vec<TypeCode>,
    position: usize,
    current: TypeCode,
    restore_points: Vec<(TypeCode, usize)>,
}

impl TypeCodeWalker {
    pub fn new(codes: Vec<TypeCode>) -> Self {
        Self {
            codes,
            position: 0,
            current: TypeCode::NULL,
            restore_points: Vec::new(),
        }
    }

    /// All codes of the sequence.
    pub fn codes(&self) -> &[TypeCode] {
        &self.codes
    }

    /// The code under the cursor ([TypeCode::NULL] before the first advance or at the end).
    pub fn current(&self) -> TypeCode {
        self.current
    }

    /// Returns true once every code has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.position >= self.codes.len()
    }

    /// Moves to the next code and returns it, or [TypeCode::NULL] when exhausted.
    pub fn advance(&mut self) -> TypeCode {
        self.current = match self.codes.get(self.position) {
            Some(code) => {
                self.position += 1;
                *code
            }
            None => TypeCode::NULL,
        };
        self.current
    }

    /// Moves inside the element of the current composite code.
    ///
    /// When the element is embedded in the current code the cursor lands on it without
    /// consuming a code; the next [TypeCodeWalker::advance] continues after the composite.
    /// Otherwise (the element follows, or the current code is a leaf) this is an advance.
    pub fn descend_into_element(&mut self) -> TypeCode {
        let element = self.current.element();
        if element.is_null() {
            return self.advance();
        }
        self.current = element;
        self.current
    }

    /// Saves the cursor state.
    pub fn checkpoint(&mut self) {
        self.restore_points.push((self.current, self.position));
    }

    /// Restores the most recently saved cursor state. Returns false if none is open.
    pub fn rewind(&mut self) -> bool {
        match self.restore_points.pop() {
            Some((current, position)) => {
                self.current = current;
                self.position = position;
                true
            }
            None => false,
        }
    }

    /// Consumes exactly one complete type tree starting at the next code and returns it as
    /// an independent walker. The cursor is left before the first code of the next tree.
    pub fn extract_subtree(&mut self) -> Result<TypeCodeWalker, Error> {
        // A lone code names itself.
        if self.position == 0 && self.codes.len() == 1 {
            let code = self.advance();
            return Ok(TypeCodeWalker::new(vec![code]));
        }

        let mut outstanding = 1usize;
        let mut extracted = Vec::new();
        while outstanding > 0 {
            let code = self.advance();
            if code.is_null() {
                return Err(Error::TruncatedTypeCodes);
            }
            extracted.push(code);
            outstanding = outstanding - 1 + code.pending_slots();
        }
        Ok(TypeCodeWalker::new(extracted))
    }

    /// Like [TypeCodeWalker::extract_subtree] but leaves the cursor where it was.
    pub fn extract_current_segment(&mut self) -> Result<TypeCodeWalker, Error> {
        self.checkpoint();
        let segment = self.extract_subtree();
        self.rewind();
        segment
    }
}

/// Reads one complete type tree from `buf`.
///
/// Codes are read until every composite has received all of its element trees. Fails
/// with [Error::DepthExceeded] when composites nest deeper than [MAX_TYPE_DEPTH].
pub fn read_tree(buf: &mut impl Buf) -> Result<TypeCodeWalker, Error> {
    let mut codes = Vec::new();

    // Remaining element slots of each open composite, innermost last.
    let mut open: Vec<usize> = Vec::new();
    loop {
        at_least(buf, 2)?;
        let code = TypeCode::from_u16(buf.get_u16())?;
        codes.push(code);

        if let Some(remaining) = open.last_mut() {
            *remaining -= 1;
        }
        let pending = code.pending_slots();
        if pending > 0 {
            if open.len() == MAX_TYPE_DEPTH {
                return Err(Error::DepthExceeded(MAX_TYPE_DEPTH));
            }
            open.push(pending);
        }
        while open.last() == Some(&0) {
            open.pop();
        }
        if open.is_empty() {
            return Ok(TypeCodeWalker::new(codes));
        }
    }
}
