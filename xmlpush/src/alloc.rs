/*!
# Allocation accounting

Every buffer which grows with the input (the input buffer, the string pools,
the element and namespace stacks and the DTD tables) asks an [`Allocator`]
for permission before it grows. A refused request surfaces as
[`Error::NoMemory`] at the operation which needed the space; data which has
already been committed is left untouched.

The default [`SystemAllocator`] never refuses. [`FailingAllocator`] is meant
for tests which want to check that the parser fails cleanly at every
allocation point.
*/
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Capacity the first growth of a buffer jumps to.
const MIN_CAPACITY: usize = 16;

/**
# Permission source for memory growth

Implementations decide whether a buffer may grow by `size` bytes. They do not
allocate themselves; the actual allocation is performed by the global
allocator after permission has been granted.
*/
pub trait Allocator: Send + Sync {
	/// Ask for permission to allocate `size` additional bytes.
	fn allocate(&self, size: usize) -> bool;

	/// Notify the allocator that `size` bytes are no longer in use.
	fn release(&self, _size: usize) {}
}

/// Allocator which grants every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
	fn allocate(&self, _size: usize) -> bool {
		true
	}
}

/**
# Allocator which fails on purpose

Either refuses every request after the first `n` ones
([`FailingAllocator::fail_after`]), or refuses requests which would push the
total amount of memory in use above a limit ([`FailingAllocator::limit`]).

```
use std::sync::Arc;
use xmlpush::{FailingAllocator, Allocator};

let alloc = FailingAllocator::fail_after(1);
assert!(alloc.allocate(10));
assert!(!alloc.allocate(10));
assert_eq!(alloc.calls(), 2);
```
*/
pub struct FailingAllocator {
	allowed_calls: Option<usize>,
	limit: Option<usize>,
	calls: AtomicUsize,
	in_use: AtomicUsize,
}

impl FailingAllocator {
	/// Grant the first `n` requests and refuse all later ones.
	pub fn fail_after(n: usize) -> FailingAllocator {
		FailingAllocator {
			allowed_calls: Some(n),
			limit: None,
			calls: AtomicUsize::new(0),
			in_use: AtomicUsize::new(0),
		}
	}

	/// Refuse requests which would exceed `bytes` bytes in use.
	pub fn limit(bytes: usize) -> FailingAllocator {
		FailingAllocator {
			allowed_calls: None,
			limit: Some(bytes),
			calls: AtomicUsize::new(0),
			in_use: AtomicUsize::new(0),
		}
	}

	/// Number of requests seen so far (granted or not).
	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	/// Number of bytes granted and not yet released.
	pub fn in_use(&self) -> usize {
		self.in_use.load(Ordering::SeqCst)
	}
}

impl fmt::Debug for FailingAllocator {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("FailingAllocator")
			.field("allowed_calls", &self.allowed_calls)
			.field("limit", &self.limit)
			.field("calls", &self.calls())
			.field("in_use", &self.in_use())
			.finish()
	}
}

impl Allocator for FailingAllocator {
	fn allocate(&self, size: usize) -> bool {
		let n = self.calls.fetch_add(1, Ordering::SeqCst);
		if let Some(max) = self.allowed_calls {
			if n >= max {
				return false;
			}
		}
		if let Some(limit) = self.limit {
			let current = self.in_use.load(Ordering::SeqCst);
			match current.checked_add(size) {
				Some(total) if total <= limit => (),
				_ => return false,
			}
		}
		self.in_use.fetch_add(size, Ordering::SeqCst);
		true
	}

	fn release(&self, size: usize) {
		let _ = self
			.in_use
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
				Some(v.saturating_sub(size))
			});
	}
}

/// Return a shared handle to the default allocator.
pub(crate) fn system() -> Arc<dyn Allocator> {
	Arc::new(SystemAllocator)
}

fn grown_capacity(current: usize, needed: usize) -> Result<usize> {
	let mut cap = current.max(MIN_CAPACITY);
	while cap < needed {
		cap = cap.checked_mul(2).ok_or(Error::NoMemory)?;
	}
	Ok(cap)
}

/**
Bookkeeping of the bytes one buffer owner has been granted.

The owner calls [`Account::grow_vec`] or [`Account::grow_string`] before
appending; the granted bytes are handed back to the allocator on drop.
*/
pub(crate) struct Account {
	alloc: Arc<dyn Allocator>,
	bytes: usize,
}

impl Account {
	pub(crate) fn new(alloc: Arc<dyn Allocator>) -> Account {
		Account { alloc, bytes: 0 }
	}

	fn request(&mut self, bytes: usize) -> Result<()> {
		if !self.alloc.allocate(bytes) {
			return Err(Error::NoMemory);
		}
		self.bytes = self.bytes.saturating_add(bytes);
		Ok(())
	}

	/// Make room for `additional` more elements in `v`.
	pub(crate) fn grow_vec<T>(&mut self, v: &mut Vec<T>, additional: usize) -> Result<()> {
		let needed = v.len().checked_add(additional).ok_or(Error::NoMemory)?;
		if needed <= v.capacity() {
			return Ok(());
		}
		let new_cap = grown_capacity(v.capacity(), needed)?;
		let delta = (new_cap - v.capacity())
			.checked_mul(mem::size_of::<T>().max(1))
			.ok_or(Error::NoMemory)?;
		self.request(delta)?;
		if v.try_reserve_exact(new_cap - v.len()).is_err() {
			self.alloc.release(delta);
			self.bytes -= delta;
			return Err(Error::NoMemory);
		}
		Ok(())
	}

	/// Make room for `additional` more bytes in `s`.
	pub(crate) fn grow_string(&mut self, s: &mut String, additional: usize) -> Result<()> {
		let needed = s.len().checked_add(additional).ok_or(Error::NoMemory)?;
		if needed <= s.capacity() {
			return Ok(());
		}
		let new_cap = grown_capacity(s.capacity(), needed)?;
		let delta = new_cap - s.capacity();
		self.request(delta)?;
		if s.try_reserve_exact(new_cap - s.len()).is_err() {
			self.alloc.release(delta);
			self.bytes -= delta;
			return Err(Error::NoMemory);
		}
		Ok(())
	}

	/// Make room for one more entry in `map`.
	pub(crate) fn grow_map<K: Eq + Hash, V, S: BuildHasher>(
		&mut self,
		map: &mut HashMap<K, V, S>,
	) -> Result<()> {
		if map.len() < map.capacity() {
			return Ok(());
		}
		let new_cap = grown_capacity(map.capacity(), map.len() + 1)?;
		let delta = (new_cap - map.capacity())
			.checked_mul(mem::size_of::<(K, V)>().max(1))
			.ok_or(Error::NoMemory)?;
		self.request(delta)?;
		if map.try_reserve(new_cap - map.len()).is_err() {
			self.alloc.release(delta);
			self.bytes -= delta;
			return Err(Error::NoMemory);
		}
		Ok(())
	}

	/// Ask for a one-off allocation of `bytes` which is not tied to a
	/// growing buffer (e.g. a shared entity text).
	pub(crate) fn charge(&mut self, bytes: usize) -> Result<()> {
		self.request(bytes)
	}
}

impl Drop for Account {
	fn drop(&mut self) {
		if self.bytes > 0 {
			self.alloc.release(self.bytes);
		}
	}
}

impl fmt::Debug for Account {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		write!(f, "Account({} bytes)", self.bytes)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fail_after_counts_calls() {
		let a = FailingAllocator::fail_after(2);
		assert!(a.allocate(1));
		assert!(a.allocate(1));
		assert!(!a.allocate(1));
		assert!(!a.allocate(1));
		assert_eq!(a.calls(), 4);
	}

	#[test]
	fn limit_tracks_releases() {
		let a = FailingAllocator::limit(100);
		assert!(a.allocate(60));
		assert!(!a.allocate(60));
		a.release(60);
		assert!(a.allocate(60));
		assert_eq!(a.in_use(), 60);
	}

	#[test]
	fn account_grows_and_releases() {
		let fa = Arc::new(FailingAllocator::limit(1024));
		{
			let mut acc = Account::new(fa.clone());
			let mut v: Vec<u8> = Vec::new();
			acc.grow_vec(&mut v, 10).unwrap();
			assert!(v.capacity() >= 16);
			assert!(fa.in_use() >= 16);
			v.extend_from_slice(b"0123456789");
			acc.grow_vec(&mut v, 1).unwrap();
			assert_eq!(fa.calls(), 1);
		}
		assert_eq!(fa.in_use(), 0);
	}

	#[test]
	fn account_refusal_keeps_data() {
		let fa = Arc::new(FailingAllocator::fail_after(1));
		let mut acc = Account::new(fa.clone());
		let mut s = String::new();
		acc.grow_string(&mut s, 4).unwrap();
		s.push_str("abcd");
		match acc.grow_string(&mut s, 100) {
			Err(Error::NoMemory) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		assert_eq!(s, "abcd");
	}
}
