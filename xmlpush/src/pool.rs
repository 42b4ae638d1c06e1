/*!
# String pools

Append-only text buffers. Strings are built piecewise at the end of the pool
and either committed ([`StringPool::finish`]) or thrown away
([`StringPool::discard`]). Committed strings are addressed by [`PoolStr`]
handles, which stay valid until the pool is truncated below them or cleared.
*/
use std::fmt;
use std::sync::Arc;

use crate::alloc::{Account, Allocator};
use crate::error::Result;

/// Handle to a committed string inside a [`StringPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct PoolStr {
	start: usize,
	end: usize,
}

pub(crate) struct StringPool {
	buf: String,
	start: usize,
	account: Account,
}

impl StringPool {
	pub(crate) fn new(alloc: Arc<dyn Allocator>) -> StringPool {
		StringPool {
			buf: String::new(),
			start: 0,
			account: Account::new(alloc),
		}
	}

	pub(crate) fn push_str(&mut self, s: &str) -> Result<()> {
		self.account.grow_string(&mut self.buf, s.len())?;
		self.buf.push_str(s);
		Ok(())
	}

	pub(crate) fn push(&mut self, c: char) -> Result<()> {
		self.account.grow_string(&mut self.buf, c.len_utf8())?;
		self.buf.push(c);
		Ok(())
	}

	/// Append `s`, folding `\r\n` and lone `\r` into `\n`.
	pub(crate) fn push_normalized(&mut self, s: &str) -> Result<()> {
		if !s.contains('\r') {
			return self.push_str(s);
		}
		self.account.grow_string(&mut self.buf, s.len())?;
		let mut chars = s.chars().peekable();
		while let Some(c) = chars.next() {
			if c == '\r' {
				if chars.peek() == Some(&'\n') {
					chars.next();
				}
				self.buf.push('\n');
			} else {
				self.buf.push(c);
			}
		}
		Ok(())
	}

	/// The string under construction.
	pub(crate) fn current(&self) -> &str {
		&self.buf[self.start..]
	}

	/// Remove the last char of the string under construction.
	pub(crate) fn pop(&mut self) -> Option<char> {
		if self.buf.len() > self.start {
			self.buf.pop()
		} else {
			None
		}
	}

	/// Commit the string under construction.
	pub(crate) fn finish(&mut self) -> PoolStr {
		let r = PoolStr {
			start: self.start,
			end: self.buf.len(),
		};
		self.start = self.buf.len();
		r
	}

	/// Drop the string under construction.
	pub(crate) fn discard(&mut self) {
		self.buf.truncate(self.start);
	}

	pub(crate) fn get(&self, s: PoolStr) -> &str {
		&self.buf[s.start..s.end]
	}

	/// Drop all strings from `s` onwards, including the one under
	/// construction.
	pub(crate) fn truncate(&mut self, s: PoolStr) {
		self.buf.truncate(s.start);
		self.start = s.start;
	}

	pub(crate) fn clear(&mut self) {
		self.buf.clear();
		self.start = 0;
	}
}

impl fmt::Debug for StringPool {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("StringPool")
			.field("len", &self.buf.len())
			.field("start", &self.start)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alloc::{FailingAllocator, SystemAllocator};
	use crate::error::Error;

	#[test]
	fn finish_and_get() {
		let mut p = StringPool::new(Arc::new(SystemAllocator));
		p.push_str("foo").unwrap();
		let a = p.finish();
		p.push_str("bar").unwrap();
		p.push('!').unwrap();
		let b = p.finish();
		assert_eq!(p.get(a), "foo");
		assert_eq!(p.get(b), "bar!");
		p.truncate(b);
		assert_eq!(p.get(a), "foo");
		assert_eq!(p.current(), "");
	}

	#[test]
	fn discard_only_drops_current() {
		let mut p = StringPool::new(Arc::new(SystemAllocator));
		p.push_str("keep").unwrap();
		let a = p.finish();
		p.push_str("drop").unwrap();
		p.discard();
		assert_eq!(p.current(), "");
		assert_eq!(p.get(a), "keep");
	}

	#[test]
	fn newline_normalization() {
		let mut p = StringPool::new(Arc::new(SystemAllocator));
		p.push_normalized("a\r\nb\rc\n").unwrap();
		assert_eq!(p.current(), "a\nb\nc\n");
	}

	#[test]
	fn refused_growth_is_reported() {
		let mut p = StringPool::new(Arc::new(FailingAllocator::fail_after(0)));
		match p.push_str("x") {
			Err(Error::NoMemory) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		assert_eq!(p.current(), "");
	}
}
