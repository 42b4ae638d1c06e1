/*!
# Codepoint classes of XML 1.0

The contents of this module are implementation details of `xmlpush` and
`xmlpush_validation` and should not be relied upon.
*/
use std::fmt;

/**
# Predicate trait for matching chars
*/
pub trait CharSelector {
	/// Return true if the given char is selected by the selector
	fn select(&self, c: char) -> bool;
}

/// Selects all chars
#[derive(Debug, Copy, Clone)]
pub struct AllChars();

impl CharSelector for char {
	fn select(&self, c: char) -> bool {
		*self == c
	}
}

impl CharSelector for &'_ [char] {
	fn select(&self, c: char) -> bool {
		self.iter().any(|r| *r == c)
	}
}

impl CharSelector for AllChars {
	fn select(&self, _c: char) -> bool {
		true
	}
}

// start to end (incl., because some of our edge points are not valid chars
// in rust)
/// Selects all chars from a range (including both ends)
#[derive(Debug, Clone, Copy)]
pub struct CodepointRange(pub char, pub char);

impl CodepointRange {
	pub fn contains(&self, c: char) -> bool {
		(self.0 <= c) && (c <= self.1)
	}
}

/// Valid codepoints for character data (XML 1.0 § 2.2)
pub const VALID_XML_CDATA_RANGES: &'static [CodepointRange] = &[
	CodepointRange('\x09', '\x0a'),
	CodepointRange('\x0d', '\x0d'),
	CodepointRange('\u{0020}', '\u{d7ff}'),
	CodepointRange('\u{e000}', '\u{fffd}'),
	CodepointRange('\u{10000}', '\u{10ffff}'),
];

const VALID_XML_NAME_START_RANGES: &'static [CodepointRange] = &[
	CodepointRange(':', ':'),
	CodepointRange('A', 'Z'),
	CodepointRange('_', '_'),
	CodepointRange('a', 'z'),
	CodepointRange('\u{c0}', '\u{d6}'),
	CodepointRange('\u{d8}', '\u{f6}'),
	CodepointRange('\u{f8}', '\u{2ff}'),
	CodepointRange('\u{370}', '\u{37d}'),
	CodepointRange('\u{37f}', '\u{1fff}'),
	CodepointRange('\u{200c}', '\u{200d}'),
	CodepointRange('\u{2070}', '\u{218f}'),
	CodepointRange('\u{2c00}', '\u{2fef}'),
	CodepointRange('\u{3001}', '\u{d7ff}'),
	CodepointRange('\u{f900}', '\u{fdcf}'),
	CodepointRange('\u{fdf0}', '\u{fffd}'),
	CodepointRange('\u{10000}', '\u{effff}'),
];

const VALID_XML_NAME_RANGES: &'static [CodepointRange] = &[
	CodepointRange('-', '.'),
	CodepointRange('0', ':'),
	CodepointRange('A', 'Z'),
	CodepointRange('_', '_'),
	CodepointRange('a', 'z'),
	CodepointRange('\u{b7}', '\u{b7}'),
	CodepointRange('\u{c0}', '\u{d6}'),
	CodepointRange('\u{d8}', '\u{f6}'),
	CodepointRange('\u{f8}', '\u{37d}'),
	CodepointRange('\u{37f}', '\u{1fff}'),
	CodepointRange('\u{200c}', '\u{200d}'),
	CodepointRange('\u{203f}', '\u{2040}'),
	CodepointRange('\u{2070}', '\u{218f}'),
	CodepointRange('\u{2c00}', '\u{2fef}'),
	CodepointRange('\u{3001}', '\u{d7ff}'),
	CodepointRange('\u{f900}', '\u{fdcf}'),
	CodepointRange('\u{fdf0}', '\u{fffd}'),
	CodepointRange('\u{10000}', '\u{effff}'),
];

/// Characters allowed in public identifiers besides ASCII alphanumerics
/// (XML 1.0 § 2.3 \[13\])
const PUBID_PUNCTUATION: &'static [char] = &[
	' ', '\r', '\n', '-', '\'', '(', ')', '+', ',', '.', '/', ':', '=', '?', ';', '!', '*', '#',
	'@', '$', '_', '%',
];

/// Selects all chars from any of the contained ranges
///
/// The ranges must be sorted and must not overlap; lookup is a binary search.
#[derive(Copy, Clone)]
pub struct CodepointRanges(pub &'static [CodepointRange]);

/// Valid non-first characters for an XML Name (XML 1.0 § 2.3 \[4a\])
pub static CLASS_XML_NAME: CodepointRanges = CodepointRanges(VALID_XML_NAME_RANGES);

/// Valid first characters for an XML Name (XML 1.0 § 2.3 \[4\])
pub static CLASS_XML_NAMESTART: CodepointRanges = CodepointRanges(VALID_XML_NAME_START_RANGES);

/// Valid characters anywhere in an XML document (XML 1.0 § 2.2 \[2\])
pub static CLASS_XML_CHAR: CodepointRanges = CodepointRanges(VALID_XML_CDATA_RANGES);

/// Characters valid in a public identifier literal
#[derive(Debug, Clone, Copy)]
pub struct PubidChars();

/// Whitespace as defined by XML 1.0 § 2.3 \[3\]
#[derive(Debug, Clone, Copy)]
pub struct Whitespace();

pub static CLASS_XML_PUBID: PubidChars = PubidChars();

pub static CLASS_XML_SPACE: Whitespace = Whitespace();

impl CharSelector for CodepointRange {
	fn select(&self, c: char) -> bool {
		self.contains(c)
	}
}

impl CharSelector for CodepointRanges {
	fn select(&self, c: char) -> bool {
		contained_in_ranges(c, self.0)
	}
}

impl CharSelector for PubidChars {
	fn select(&self, c: char) -> bool {
		c.is_ascii_alphanumeric() || PUBID_PUNCTUATION.contains(&c)
	}
}

impl CharSelector for Whitespace {
	fn select(&self, c: char) -> bool {
		matches!(c, ' ' | '\t' | '\r' | '\n')
	}
}

pub fn contained_in_ranges(c: char, rs: &[CodepointRange]) -> bool {
	rs.binary_search_by(|r| {
		if r.1 < c {
			std::cmp::Ordering::Less
		} else if r.0 > c {
			std::cmp::Ordering::Greater
		} else {
			std::cmp::Ordering::Equal
		}
	})
	.is_ok()
}

/// Return true if `c` may start an XML Name.
#[inline]
pub fn is_name_start(c: char) -> bool {
	if c.is_ascii() {
		c.is_ascii_alphabetic() || c == '_' || c == ':'
	} else {
		CLASS_XML_NAMESTART.select(c)
	}
}

/// Return true if `c` may occur inside an XML Name.
#[inline]
pub fn is_name_char(c: char) -> bool {
	if c.is_ascii() {
		c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-' | '.')
	} else {
		CLASS_XML_NAME.select(c)
	}
}

/// Return true if `c` is an XML `Char`.
#[inline]
pub fn is_xml_char(c: char) -> bool {
	if (c as u32) < 0x20 {
		matches!(c, '\t' | '\n' | '\r')
	} else {
		(c as u32) < 0xd800 || CLASS_XML_CHAR.select(c)
	}
}

impl fmt::Debug for CodepointRanges {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		write!(f, "CodepointRanges(<{} ranges>)", self.0.len())
	}
}

impl PartialEq for CodepointRanges {
	fn eq(&self, other: &CodepointRanges) -> bool {
		std::ptr::eq(self.0, other.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn linear(c: char, rs: &[CodepointRange]) -> bool {
		rs.iter().any(|r| r.contains(c))
	}

	#[test]
	fn binary_search_agrees_with_linear_scan() {
		for table in [
			VALID_XML_CDATA_RANGES,
			VALID_XML_NAME_RANGES,
			VALID_XML_NAME_START_RANGES,
		] {
			for cp in 0x0..=0x10ffffu32 {
				if let Some(ch) = std::char::from_u32(cp) {
					assert_eq!(
						contained_in_ranges(ch, table),
						linear(ch, table),
						"disagreement at U+{:x}",
						cp
					);
				}
			}
		}
	}

	#[test]
	fn ascii_fast_paths_agree_with_tables() {
		for cp in 0u8..0x80 {
			let ch = cp as char;
			assert_eq!(is_name_start(ch), CLASS_XML_NAMESTART.select(ch), "{:?}", ch);
			assert_eq!(is_name_char(ch), CLASS_XML_NAME.select(ch), "{:?}", ch);
			assert_eq!(is_xml_char(ch), CLASS_XML_CHAR.select(ch), "{:?}", ch);
		}
	}

	#[test]
	fn surrogate_adjacent_chars() {
		assert!(is_xml_char('\u{d7ff}'));
		assert!(is_xml_char('\u{e000}'));
		assert!(!is_xml_char('\u{fffe}'));
		assert!(!is_xml_char('\u{ffff}'));
		assert!(is_xml_char('\u{10000}'));
	}

	#[test]
	fn pubid_class() {
		assert!(CLASS_XML_PUBID.select('a'));
		assert!(CLASS_XML_PUBID.select('%'));
		assert!(!CLASS_XML_PUBID.select('"'));
		assert!(!CLASS_XML_PUBID.select('\t'));
		assert!(!CLASS_XML_PUBID.select('ä'));
	}
}
