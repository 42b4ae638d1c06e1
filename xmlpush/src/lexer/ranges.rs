/*!
# ASCII byte classes

Byte selectors for the fast paths of the tokenizer. They only ever select
bytes below 0x80, so they are usable with every encoding which represents
ASCII as single bytes. Anything else goes through the decoder.
*/

pub trait ByteSelect {
	fn select(&self, b: u8) -> bool;
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ByteRange(pub u8, pub u8);

impl ByteSelect for ByteRange {
	fn select(&self, b: u8) -> bool {
		self.0 <= b && b <= self.1
	}
}

impl ByteSelect for u8 {
	fn select(&self, b: u8) -> bool {
		b == *self
	}
}

impl ByteSelect for &'_ [ByteRange] {
	fn select(&self, b: u8) -> bool {
		self.iter().any(|r| r.select(b))
	}
}

/// Selects bytes which are not the given delimiter, excluding control
/// characters and non-ASCII bytes.
#[derive(Debug, Clone, Copy)]
pub struct AsciiExcept<'x>(pub &'x [u8]);

impl ByteSelect for AsciiExcept<'_> {
	fn select(&self, b: u8) -> bool {
		(b >= 0x20 || matches!(b, b'\t' | b'\n' | b'\r')) && b < 0x80 && !self.0.contains(&b)
	}
}

/// Character data outside markup, stopping at `<`, `&` and `]`.
pub static CLASS_DATA: AsciiExcept<'static> = AsciiExcept(b"<&]");

/// CDATA section contents, stopping at `]`.
pub static CLASS_CDATA_SECTION: AsciiExcept<'static> = AsciiExcept(b"]");

/// Comment contents, stopping at `-`.
pub static CLASS_COMMENT: AsciiExcept<'static> = AsciiExcept(b"-");

/// Processing instruction contents, stopping at `?`.
pub static CLASS_PI: AsciiExcept<'static> = AsciiExcept(b"?");

pub static CLASS_ATT_QUOT: AsciiExcept<'static> = AsciiExcept(b"\"<&");

pub static CLASS_ATT_APOS: AsciiExcept<'static> = AsciiExcept(b"'<&");

/// ASCII bytes which may appear in an XML Name after the first character.
pub static CLASS_NAME_BYTE: &'static [ByteRange] = &[
	ByteRange(b'-', b'.'),
	ByteRange(b'0', b':'),
	ByteRange(b'A', b'Z'),
	ByteRange(b'_', b'_'),
	ByteRange(b'a', b'z'),
];

/// XML whitespace
pub static CLASS_SPACE_BYTE: &'static [ByteRange] = &[
	ByteRange(b'\t', b'\n'),
	ByteRange(b'\r', b'\r'),
	ByteRange(b' ', b' '),
];
