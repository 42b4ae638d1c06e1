/*!
# Input buffer and position tracking

[`Input`] holds the bytes which have been handed to the parser and not yet
been dropped. Offsets inside the buffer are relative to its start; `base`
is the absolute offset of the first byte, so absolute offsets stay valid
when consumed bytes are compacted away.

Line and column numbers are not maintained while tokenizing. [`Position`]
computes them on request by scanning forward from a remembered mark.
*/
use std::cell::Cell;
use std::sync::Arc;

use crate::alloc::{Account, Allocator};
use crate::encoding::{Decoded, Encoding};
use crate::error::{Error, Result};

/// Number of consumed bytes kept before the oldest position still needed,
/// for [`Parser::input_context`](crate::Parser::input_context).
pub(crate) const CONTEXT_BYTES: usize = 1024;

const MAX_BUFFER: usize = i32::MAX as usize;

pub(crate) struct Input {
	pub buf: Vec<u8>,
	/// Start of the unconsumed bytes.
	pub pos: usize,
	/// Absolute offset of `buf[0]`.
	pub base: u64,
	pub is_final: bool,
	pub enc: Encoding,
	/// Length of the byte order mark.
	pub bom: usize,
	pub detected: bool,
	/// Region handed out by [`Input::get_buffer`] and not yet committed.
	pending: Option<(usize, usize)>,
	account: Account,
}

impl Input {
	pub(crate) fn new(alloc: Arc<dyn Allocator>) -> Input {
		Input {
			buf: Vec::new(),
			pos: 0,
			base: 0,
			is_final: false,
			enc: Encoding::Utf8,
			bom: 0,
			detected: false,
			pending: None,
			account: Account::new(alloc),
		}
	}

	pub(crate) fn abs(&self, rel: usize) -> u64 {
		self.base + rel as u64
	}

	/// Absolute offset of the end of the received data.
	pub(crate) fn end(&self) -> u64 {
		self.abs(self.buf.len())
	}

	pub(crate) fn unconsumed(&self) -> &[u8] {
		&self.buf[self.pos..]
	}

	/// Drop bytes before `keep_from` (absolute), minus some context.
	pub(crate) fn compact(&mut self, keep_from: u64, pos: &Position) {
		let keep_from = keep_from.min(self.abs(self.pos));
		let drop_to = keep_from.saturating_sub(CONTEXT_BYTES as u64);
		if drop_to <= self.base {
			return;
		}
		pos.rebase(self, drop_to);
		let n = (drop_to - self.base) as usize;
		self.buf.drain(..n);
		self.pos -= n;
		self.base = drop_to;
	}

	fn check_total(&self, additional: usize) -> Result<()> {
		match self.buf.len().checked_add(additional) {
			Some(total) if total <= MAX_BUFFER => Ok(()),
			_ => Err(Error::NoMemory),
		}
	}

	/// Copy `data` to the end of the buffer.
	pub(crate) fn append(&mut self, data: &[u8]) -> Result<()> {
		self.pending = None;
		if data.is_empty() {
			return Ok(());
		}
		self.check_total(data.len())?;
		self.account.grow_vec(&mut self.buf, data.len())?;
		self.buf.extend_from_slice(data);
		Ok(())
	}

	/// Hand out `len` bytes at the end of the buffer for the caller to fill.
	pub(crate) fn get_buffer(&mut self, len: usize) -> Result<&mut [u8]> {
		if let Some((start, _)) = self.pending.take() {
			self.buf.truncate(start);
		}
		self.check_total(len)?;
		self.account.grow_vec(&mut self.buf, len)?;
		let start = self.buf.len();
		self.buf.resize(start + len, 0);
		self.pending = Some((start, len));
		Ok(&mut self.buf[start..])
	}

	/// Keep the first `len` bytes of the region from
	/// [`Input::get_buffer`].
	pub(crate) fn commit_buffer(&mut self, len: usize) -> Result<()> {
		match self.pending {
			Some((start, max)) if len <= max => {
				self.buf.truncate(start + len);
				self.pending = None;
				Ok(())
			}
			None if len == 0 => Ok(()),
			_ => Err(Error::InvalidArgument),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Mark {
	off: u64,
	line: u64,
	col: u64,
	after_cr: bool,
}

/**
Line and column of absolute offsets.

Lines start at 1, columns at 0. `\r\n`, `\r` and `\n` each end a line.
Columns count characters, not bytes.

Queries are answered by scanning from the last answer if the offset lies
after it, and from the anchor otherwise. The anchor only moves when the
input is compacted.
*/
#[derive(Debug, Default)]
pub(crate) struct Position {
	anchor: Cell<Mark>,
	cur: Cell<Mark>,
}

impl Position {
	/// Start counting at `off`.
	pub(crate) fn start_at(&self, off: u64) {
		let m = Mark {
			off,
			line: 1,
			col: 0,
			after_cr: false,
		};
		self.anchor.set(m);
		self.cur.set(m);
	}

	fn walk(input: &Input, mut m: Mark, to: u64) -> Mark {
		let end = to.min(input.end());
		while m.off < end {
			let at = (m.off - input.base) as usize;
			let stop = (end - input.base) as usize;
			let (c, n) = match input.enc.decode(&input.buf[at..stop]) {
				Decoded::Char(c, n) => (Some(c), n),
				Decoded::Incomplete => break,
				Decoded::Invalid => (None, 1),
			};
			match c {
				Some('\n') if m.after_cr => m.after_cr = false,
				Some('\n') => {
					m.line += 1;
					m.col = 0;
				}
				Some('\r') => {
					m.line += 1;
					m.col = 0;
					m.after_cr = true;
				}
				_ => {
					m.col += 1;
					m.after_cr = false;
				}
			}
			m.off += n as u64;
		}
		m
	}

	/// Return `(line, column)` of `off`.
	pub(crate) fn locate(&self, input: &Input, off: u64) -> (u64, u64) {
		let anchor = self.anchor.get();
		if off <= anchor.off {
			return (anchor.line, anchor.col);
		}
		let cur = self.cur.get();
		let from = if cur.off <= off { cur } else { anchor };
		let m = Self::walk(input, from, off);
		self.cur.set(m);
		(m.line, m.col)
	}

	/// Move the anchor to `off` before the bytes before it are dropped.
	pub(crate) fn rebase(&self, input: &Input, off: u64) {
		let anchor = self.anchor.get();
		if off <= anchor.off {
			return;
		}
		let cur = self.cur.get();
		let from = if cur.off <= off { cur } else { anchor };
		let m = Self::walk(input, from, off);
		self.anchor.set(m);
		if self.cur.get().off < m.off {
			self.cur.set(m);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alloc::{system, FailingAllocator};

	fn input(data: &[u8]) -> Input {
		let mut i = Input::new(system());
		i.append(data).unwrap();
		i
	}

	#[test]
	fn locate_counts_line_breaks_once() {
		let i = input(b"a\r\nb\rc\nd");
		let p = Position::default();
		p.start_at(0);
		assert_eq!(p.locate(&i, 0), (1, 0));
		assert_eq!(p.locate(&i, 1), (1, 1));
		assert_eq!(p.locate(&i, 3), (2, 0));
		assert_eq!(p.locate(&i, 5), (3, 0));
		assert_eq!(p.locate(&i, 7), (4, 0));
		assert_eq!(p.locate(&i, 8), (4, 1));
		// backwards queries rescan from the anchor
		assert_eq!(p.locate(&i, 4), (2, 1));
	}

	#[test]
	fn columns_count_characters() {
		let i = input("äöü<".as_bytes());
		let p = Position::default();
		p.start_at(0);
		assert_eq!(p.locate(&i, 6), (1, 3));
	}

	#[test]
	fn compaction_keeps_positions() {
		let mut data = Vec::new();
		for _ in 0..100 {
			data.extend_from_slice(b"0123456789012345678\n");
		}
		let mut i = input(&data);
		let p = Position::default();
		p.start_at(0);
		i.pos = 1500;
		i.compact(1500, &p);
		assert_eq!(i.base, 1500 - CONTEXT_BYTES as u64);
		assert_eq!(i.pos, CONTEXT_BYTES);
		assert_eq!(p.locate(&i, 1500), (76, 0));
		assert_eq!(p.locate(&i, 1505), (76, 5));
	}

	#[test]
	fn get_buffer_and_commit() {
		let mut i = Input::new(system());
		{
			let b = i.get_buffer(4).unwrap();
			b.copy_from_slice(b"<a/>");
		}
		match i.commit_buffer(5) {
			Err(Error::InvalidArgument) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		i.commit_buffer(3).unwrap();
		assert_eq!(i.unconsumed(), b"<a/");
		match i.commit_buffer(1) {
			Err(Error::InvalidArgument) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn oversized_buffers_are_refused() {
		let mut i = Input::new(system());
		match i.get_buffer(usize::MAX) {
			Err(Error::NoMemory) => (),
			other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
		}
		let mut i = Input::new(Arc::new(FailingAllocator::fail_after(0)));
		match i.append(b"x") {
			Err(Error::NoMemory) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}
}
