/*!
# Validator functions for XML-related strings

This is a supplementary crate for [`xmlpush`](../xmlpush/index.html). It holds
the character classes of XML 1.0 and checks for the small string productions
(names, public identifiers, encoding names, version numbers) which the parser
needs to verify on the fly.
*/
use std::fmt;

pub mod selectors;

use selectors::CharSelector;

/**
Error condition from validating an XML string.
*/
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
	/// A Name, NCName or Nmtoken was empty.
	EmptyName,
	/// An invalid character was encountered.
	///
	/// This variant contains the character as data.
	InvalidChar(char),
}

impl fmt::Display for Error {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::EmptyName => f.write_str("Name and NCName must not be empty"),
			Self::InvalidChar(c) => write!(f, "character U+{:04x} is not allowed", *c as u32),
		}
	}
}

impl std::error::Error for Error {}

/**
Check whether a str is a valid XML 1.0 Name

# Example

```rust
use xmlpush_validation::{validate_name, Error};

assert!(validate_name("foobar").is_ok());
assert!(validate_name("foo:bar").is_ok());
assert!(matches!(validate_name("foo bar"), Err(Error::InvalidChar(' '))));
assert!(matches!(validate_name(""), Err(Error::EmptyName)));
```
*/
pub fn validate_name(s: &str) -> Result<(), Error> {
	let mut chars = s.chars();
	match chars.next() {
		None => return Err(Error::EmptyName),
		Some(c) => {
			if !selectors::is_name_start(c) {
				return Err(Error::InvalidChar(c));
			}
		}
	}
	for ch in chars {
		if !selectors::is_name_char(ch) {
			return Err(Error::InvalidChar(ch));
		}
	}
	Ok(())
}

/**
Check whether a str is a valid XML 1.0 Name, without colons.

# Example

```rust
use xmlpush_validation::{validate_ncname, Error};

assert!(validate_ncname("foobar").is_ok());
assert!(matches!(validate_ncname("foo:bar"), Err(Error::InvalidChar(':'))));
assert!(matches!(validate_ncname(""), Err(Error::EmptyName)));
```
*/
pub fn validate_ncname(s: &str) -> Result<(), Error> {
	let mut chars = s.chars();
	match chars.next() {
		None => return Err(Error::EmptyName),
		Some(c) => {
			if !selectors::is_name_start(c) || c == ':' {
				return Err(Error::InvalidChar(c));
			}
		}
	}
	for ch in chars {
		if !selectors::is_name_char(ch) || ch == ':' {
			return Err(Error::InvalidChar(ch));
		}
	}
	Ok(())
}

/// Check whether a str is a valid `Nmtoken` (one or more name characters).
pub fn validate_nmtoken(s: &str) -> Result<(), Error> {
	if s.is_empty() {
		return Err(Error::EmptyName);
	}
	match s.chars().find(|c| !selectors::is_name_char(*c)) {
		Some(c) => Err(Error::InvalidChar(c)),
		None => Ok(()),
	}
}

/**
Check whether a str is valid XML 1.0 CData

# Example

```rust
use xmlpush_validation::{validate_cdata, Error};

assert!(validate_cdata("foo bar baz <fnord!>").is_ok());
assert!(matches!(validate_cdata("\x01"), Err(Error::InvalidChar('\x01'))));
```
*/
pub fn validate_cdata(s: &str) -> Result<(), Error> {
	match s.chars().find(|c| !selectors::is_xml_char(*c)) {
		Some(c) => Err(Error::InvalidChar(c)),
		None => Ok(()),
	}
}

/// Check whether a str only contains characters allowed in a public
/// identifier literal.
pub fn validate_pubid(s: &str) -> Result<(), Error> {
	match s.chars().find(|c| !selectors::CLASS_XML_PUBID.select(*c)) {
		Some(c) => Err(Error::InvalidChar(c)),
		None => Ok(()),
	}
}

/**
Check whether a str matches the `EncName` production of XML 1.0 § 4.3.3.

```rust
use xmlpush_validation::validate_encoding_name;

assert!(validate_encoding_name("ISO-8859-1").is_ok());
assert!(validate_encoding_name("utf_8").is_ok());
assert!(validate_encoding_name("8859").is_err());
```
*/
pub fn validate_encoding_name(s: &str) -> Result<(), Error> {
	let mut chars = s.chars();
	match chars.next() {
		None => return Err(Error::EmptyName),
		Some(c) if !c.is_ascii_alphabetic() => return Err(Error::InvalidChar(c)),
		Some(_) => (),
	}
	match chars.find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))) {
		Some(c) => Err(Error::InvalidChar(c)),
		None => Ok(()),
	}
}

/// Check whether a str matches the `VersionNum` production.
///
/// This is the permissive form from the first four editions of XML 1.0,
/// which accepts any combination of ASCII letters, digits and `_.:-`.
pub fn validate_version_num(s: &str) -> Result<(), Error> {
	if s.is_empty() {
		return Err(Error::EmptyName);
	}
	match s
		.chars()
		.find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')))
	{
		Some(c) => Err(Error::InvalidChar(c)),
		None => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cdata_smoketest() {
		assert!(validate_cdata("foo bar baz http://<xyz>").is_ok());
		assert!(validate_cdata("\u{ffff}").is_err());
	}

	#[test]
	fn test_name_smoketest() {
		assert!(validate_name("foobar").is_ok());
		assert!(validate_name("foo:bar").is_ok());
		assert!(validate_name("").is_err());
		assert!(validate_name("foo bar baz http://<xyz>").is_err());
		assert!(validate_name("\u{ffff}").is_err());
		assert!(validate_name("1abc").is_err());
	}

	#[test]
	fn test_ncname_smoketest() {
		assert!(validate_ncname("foobar").is_ok());
		assert!(validate_ncname("foo:bar").is_err());
		assert!(validate_ncname("").is_err());
		assert!(validate_ncname("foo bar baz http://<xyz>").is_err());
		assert!(validate_ncname("\u{ffff}").is_err());
	}

	#[test]
	fn test_nmtoken_allows_leading_digits() {
		assert!(validate_nmtoken("1abc").is_ok());
		assert!(validate_nmtoken("-.x").is_ok());
		assert!(validate_nmtoken("").is_err());
		assert_eq!(validate_nmtoken("a b"), Err(Error::InvalidChar(' ')));
	}

	#[test]
	fn test_pubid_rejects_quotes_and_tabs() {
		assert!(validate_pubid("-//W3C//DTD XHTML 1.0 Strict//EN").is_ok());
		assert_eq!(validate_pubid("a\"b"), Err(Error::InvalidChar('"')));
		assert_eq!(validate_pubid("a\tb"), Err(Error::InvalidChar('\t')));
	}

	#[test]
	fn test_version_num() {
		assert!(validate_version_num("1.0").is_ok());
		assert!(validate_version_num("1.1").is_ok());
		assert!(validate_version_num("").is_err());
		assert!(validate_version_num("1 0").is_err());
	}
}
