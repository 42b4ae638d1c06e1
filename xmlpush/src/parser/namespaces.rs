/*!
# Namespace bindings

The stack of prefix bindings in scope. Start tags push the bindings they
declare; end tags pop them again. Bindings inherited by a subordinate parser
are never popped by it.
*/
use std::fmt;
use std::sync::Arc;

use smartstring::alias::String as SmartString;

use xmlpush_validation::validate_ncname;

use super::common::{RcPtr, XMLNS_XML, XMLNS_XMLNS};
use crate::alloc::{Account, Allocator};
use crate::error::{Error, Result};
use crate::intern::UriCache;

#[derive(Clone)]
struct Binding {
	/// Empty for the default namespace.
	prefix: SmartString,
	/// `None` undeclares the default namespace.
	uri: Option<RcPtr<str>>,
}

pub(crate) struct NamespaceStack {
	bindings: Vec<Binding>,
	cache: RcPtr<UriCache>,
	xml: RcPtr<str>,
	account: Account,
}

/// A qualified name split at its colon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QName<'x> {
	pub prefix: Option<&'x str>,
	pub local: &'x str,
}

/// Split a qualified name. Names with more than one colon or an empty part
/// are rejected.
pub(crate) fn split_qname(name: &str) -> Result<QName<'_>> {
	match name.find(':') {
		None => Ok(QName {
			prefix: None,
			local: name,
		}),
		Some(i) => {
			let (prefix, local) = (&name[..i], &name[i + 1..]);
			if validate_ncname(prefix).is_err() || validate_ncname(local).is_err() {
				return Err(Error::InvalidToken);
			}
			Ok(QName {
				prefix: Some(prefix),
				local,
			})
		}
	}
}

impl NamespaceStack {
	pub(crate) fn new(alloc: Arc<dyn Allocator>, cache: RcPtr<UriCache>) -> NamespaceStack {
		let xml = cache.intern(XMLNS_XML);
		NamespaceStack {
			bindings: Vec::new(),
			cache,
			xml,
			account: Account::new(alloc),
		}
	}

	/// Copy the bindings in scope for a subordinate parser.
	pub(crate) fn inherit(&self, alloc: Arc<dyn Allocator>) -> Result<NamespaceStack> {
		let mut account = Account::new(alloc);
		let mut bindings = Vec::new();
		account.grow_vec(&mut bindings, self.bindings.len())?;
		bindings.extend(self.bindings.iter().cloned());
		Ok(NamespaceStack {
			bindings,
			cache: self.cache.clone(),
			xml: self.xml.clone(),
			account,
		})
	}

	pub(crate) fn cache(&self) -> &RcPtr<UriCache> {
		&self.cache
	}

	/// Declare a binding.
	///
	/// `prefix` is `None` for the default namespace; an empty `uri`
	/// undeclares the default namespace.
	pub(crate) fn bind(&mut self, prefix: Option<&str>, uri: &str) -> Result<()> {
		let is_xml_uri = uri == XMLNS_XML;
		let is_xmlns_uri = uri == XMLNS_XMLNS;
		match prefix {
			Some("xmlns") => return Err(Error::ReservedPrefixXmlns),
			Some("xml") => {
				if !is_xml_uri {
					return Err(Error::ReservedPrefixXml);
				}
			}
			Some(_) if uri.is_empty() => return Err(Error::UndeclaringPrefix),
			_ => {
				if is_xml_uri || is_xmlns_uri {
					return Err(Error::ReservedNamespaceUri);
				}
			}
		}
		let uri = if uri.is_empty() {
			None
		} else {
			Some(self.cache.intern(uri))
		};
		self.account.grow_vec(&mut self.bindings, 1)?;
		self.bindings.push(Binding {
			prefix: prefix.unwrap_or("").into(),
			uri,
		});
		Ok(())
	}

	/// Prefix of the binding `depth` entries below the top, for
	/// end-of-scope notifications.
	pub(crate) fn prefix_from_top(&self, depth: usize) -> Option<&str> {
		let b = &self.bindings[self.bindings.len() - 1 - depth];
		if b.prefix.is_empty() {
			None
		} else {
			Some(b.prefix.as_str())
		}
	}

	/// URI of the binding `depth` entries below the top.
	pub(crate) fn uri_from_top(&self, depth: usize) -> Option<&str> {
		self.bindings[self.bindings.len() - 1 - depth].uri.as_deref()
	}

	/// Drop the `n` most recent bindings.
	pub(crate) fn pop(&mut self, n: usize) {
		let keep = self.bindings.len().saturating_sub(n);
		self.bindings.truncate(keep);
	}

	/// Resolve a prefix.
	///
	/// `None` looks up the default namespace, which may be unbound.
	/// Unbound prefixes are an error.
	pub(crate) fn lookup(&self, prefix: Option<&str>) -> Result<Option<&str>> {
		match prefix {
			None => {
				for b in self.bindings.iter().rev() {
					if b.prefix.is_empty() {
						return Ok(b.uri.as_deref());
					}
				}
				Ok(None)
			}
			Some("xml") => Ok(Some(&*self.xml)),
			Some(prefix) => {
				for b in self.bindings.iter().rev() {
					if b.prefix == prefix {
						return Ok(b.uri.as_deref());
					}
				}
				Err(Error::UnboundPrefix)
			}
		}
	}
}

impl fmt::Debug for NamespaceStack {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_list()
			.entries(
				self.bindings
					.iter()
					.map(|b| (b.prefix.as_str(), b.uri.as_deref())),
			)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alloc::system;

	fn stack() -> NamespaceStack {
		NamespaceStack::new(system(), RcPtr::new(UriCache::new()))
	}

	#[test]
	fn lookup_prefers_innermost_binding() {
		let mut ns = stack();
		ns.bind(Some("a"), "urn:outer").unwrap();
		ns.bind(None, "urn:default").unwrap();
		ns.bind(Some("a"), "urn:inner").unwrap();
		assert_eq!(ns.lookup(Some("a")).unwrap(), Some("urn:inner"));
		assert_eq!(ns.lookup(None).unwrap(), Some("urn:default"));
		ns.pop(1);
		assert_eq!(ns.lookup(Some("a")).unwrap(), Some("urn:outer"));
		ns.bind(None, "").unwrap();
		assert_eq!(ns.lookup(None).unwrap(), None);
	}

	#[test]
	fn unbound_prefix() {
		let ns = stack();
		match ns.lookup(Some("p")) {
			Err(Error::UnboundPrefix) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		assert_eq!(ns.lookup(Some("xml")).unwrap(), Some(XMLNS_XML));
		assert_eq!(ns.lookup(None).unwrap(), None);
	}

	#[test]
	fn reserved_bindings() {
		let mut ns = stack();
		ns.bind(Some("xml"), XMLNS_XML).unwrap();
		match ns.bind(Some("xml"), "urn:x") {
			Err(Error::ReservedPrefixXml) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match ns.bind(Some("xmlns"), XMLNS_XMLNS) {
			Err(Error::ReservedPrefixXmlns) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match ns.bind(Some("p"), XMLNS_XML) {
			Err(Error::ReservedNamespaceUri) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match ns.bind(None, XMLNS_XMLNS) {
			Err(Error::ReservedNamespaceUri) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match ns.bind(Some("p"), "") {
			Err(Error::UndeclaringPrefix) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn qname_splitting() {
		assert_eq!(
			split_qname("a:b").unwrap(),
			QName {
				prefix: Some("a"),
				local: "b"
			}
		);
		assert_eq!(split_qname("b").unwrap().prefix, None);
		for bad in &["a:", ":b", "a:b:c"] {
			match split_qname(bad) {
				Err(Error::InvalidToken) => (),
				other => panic!("unexpected result for {:?}: {:?}", bad, other),
			}
		}
	}

	#[test]
	fn inherited_bindings_are_copied() {
		let mut ns = stack();
		ns.bind(Some("a"), "urn:a").unwrap();
		let child = ns.inherit(system()).unwrap();
		ns.pop(1);
		assert_eq!(child.lookup(Some("a")).unwrap(), Some("urn:a"));
	}
}
