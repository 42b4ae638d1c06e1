/*!
# Namespace URI sharing

With the `shared_ns` feature, namespace URIs are interned in a [`UriCache`]
so that parsers which see the same namespaces over and over again hold one
copy of each URI. Without the feature, the cache is a no-op and every
binding owns its URI.
*/
use std::fmt;

#[cfg(all(feature = "shared_ns", not(feature = "mt")))]
use std::cell::{RefCell, RefMut};
#[cfg(all(feature = "shared_ns", not(feature = "mt")))]
use std::rc::Weak;
#[cfg(all(feature = "shared_ns", feature = "mt"))]
use std::sync::{Mutex, MutexGuard, Weak};

use crate::parser::RcPtr;

#[cfg(feature = "shared_ns")]
type UriWeakSet = weak_table::WeakHashSet<Weak<str>>;

/**
# Shared store of namespace URIs

The cache can be handed to any number of parsers through
[`ParserOptions::uri_cache`](crate::ParserOptions::uri_cache); subordinate
parsers always share the cache of their parent.

Even though the cache is internally mutable, it can safely be shared with an
immutable reference. If the crate is built with the `mt` feature, the cache
is Send and Sync, otherwise it is neither.
*/
pub struct UriCache {
	#[cfg(all(feature = "shared_ns", feature = "mt"))]
	uris: Mutex<UriWeakSet>,
	#[cfg(all(feature = "shared_ns", not(feature = "mt")))]
	uris: RefCell<UriWeakSet>,
}

impl UriCache {
	/// Create an empty cache.
	pub fn new() -> UriCache {
		UriCache {
			#[cfg(all(feature = "shared_ns", feature = "mt"))]
			uris: Mutex::new(weak_table::WeakHashSet::new()),
			#[cfg(all(feature = "shared_ns", not(feature = "mt")))]
			uris: RefCell::new(weak_table::WeakHashSet::new()),
		}
	}

	#[cfg(all(feature = "shared_ns", feature = "mt"))]
	fn lock(&self) -> MutexGuard<'_, UriWeakSet> {
		// a poisoned set still holds valid weak pointers
		match self.uris.lock() {
			Ok(g) => g,
			Err(poisoned) => poisoned.into_inner(),
		}
	}

	#[cfg(all(feature = "shared_ns", not(feature = "mt")))]
	fn lock(&self) -> RefMut<'_, UriWeakSet> {
		self.uris.borrow_mut()
	}

	/// Return a shared pointer to `uri`.
	///
	/// With `shared_ns`, the same pointer is returned for equal strings as
	/// long as any copy of it is still referenced.
	pub fn intern(&self, uri: &str) -> RcPtr<str> {
		#[cfg(feature = "shared_ns")]
		{
			let mut uris = self.lock();
			if let Some(ptr) = uris.get(uri) {
				return ptr;
			}
			let ptr: RcPtr<str> = RcPtr::from(uri);
			uris.insert(ptr.clone());
			ptr
		}
		#[cfg(not(feature = "shared_ns"))]
		RcPtr::from(uri)
	}

	/// Drop unreferenced URIs and shrink the storage.
	pub fn release_temporaries(&self) {
		#[cfg(feature = "shared_ns")]
		{
			let mut uris = self.lock();
			uris.remove_expired();
			uris.shrink_to_fit();
		}
	}

	/// Number of URIs held, including expired ones which have not been
	/// removed yet.
	///
	/// Always zero without `shared_ns`.
	pub fn len(&self) -> usize {
		#[cfg(feature = "shared_ns")]
		{
			self.lock().len()
		}
		#[cfg(not(feature = "shared_ns"))]
		0
	}
}

impl Default for UriCache {
	fn default() -> UriCache {
		UriCache::new()
	}
}

impl fmt::Debug for UriCache {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		let mut f = f.debug_struct("UriCache");
		f.field("instance", &(self as *const UriCache));
		#[cfg(feature = "shared_ns")]
		{
			let uris = self.lock();
			f.field("capacity", &uris.capacity()).field("len", &uris.len());
		}
		f.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn intern_returns_equal_text() {
		let cache = UriCache::new();
		let a = cache.intern("urn:a");
		let b = cache.intern("urn:a");
		assert_eq!(&*a, "urn:a");
		assert_eq!(a, b);
	}

	#[cfg(feature = "shared_ns")]
	#[test]
	fn intern_shares_pointers_while_alive() {
		let cache = UriCache::new();
		let a = cache.intern("urn:a");
		let b = cache.intern("urn:a");
		assert!(RcPtr::ptr_eq(&a, &b));
		assert_eq!(cache.len(), 1);
		drop(a);
		drop(b);
		cache.release_temporaries();
		assert_eq!(cache.len(), 0);
	}
}
