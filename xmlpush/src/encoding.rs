/*!
# Byte encodings

This module turns the bytes handed to the parser into characters. The built-in
encodings are UTF-8, UTF-16 (both byte orders), ISO-8859-1 and US-ASCII;
anything else can be supplied by the application as an [`EncodingMap`] from
[`Handler::unknown_encoding`](crate::Handler::unknown_encoding).

Decoding is done one character at a time ([`Encoding::decode`]), which lets
the tokenizer distinguish between input which merely ends in the middle of a
character and input which can never become valid.
*/
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pool::StringPool;

/// Result of decoding a single character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
	/// A character and the number of bytes it occupied.
	Char(char, usize),
	/// The buffer ends inside a character.
	Incomplete,
	/// The bytes can never form a valid character.
	Invalid,
}

type Converter = Box<dyn Fn(&[u8]) -> Option<char> + Send + Sync>;

/**
# Application-supplied single-byte encoding

A table of 256 entries mapping each byte to a Unicode scalar value:

* `0..=0xffff`: the byte stands for that codepoint.
* `-1`: the byte is invalid.
* `-2`, `-3`, `-4`: the byte starts a sequence of that many bytes, which is
  passed to the converter.

Bytes in the ASCII range which are significant to XML must map to
themselves.

```
use xmlpush::EncodingMap;

let mut map = [0i32; 256];
for (i, slot) in map.iter_mut().enumerate() {
	*slot = i as i32;
}
// pretend 0xa4 is the euro sign
map[0xa4] = 0x20ac;
let enc = EncodingMap::new(map);
```
*/
pub struct EncodingMap {
	map: [i32; 256],
	converter: Option<Converter>,
}

impl EncodingMap {
	pub fn new(map: [i32; 256]) -> EncodingMap {
		EncodingMap {
			map,
			converter: None,
		}
	}

	/// Create a map whose multi-byte sequences are decoded by `convert`.
	///
	/// The converter receives exactly as many bytes as the lead byte
	/// announces and returns `None` for invalid sequences.
	pub fn with_converter<F>(map: [i32; 256], convert: F) -> EncodingMap
	where
		F: Fn(&[u8]) -> Option<char> + Send + Sync + 'static,
	{
		EncodingMap {
			map,
			converter: Some(Box::new(convert)),
		}
	}

	/// Check the table for consistency.
	pub(crate) fn validate(&self) -> Result<()> {
		for (i, v) in self.map.iter().enumerate() {
			let v = *v;
			if v < -4 || v > 0xffff {
				return Err(Error::UnknownEncoding);
			}
			if v <= -2 && self.converter.is_none() {
				return Err(Error::UnknownEncoding);
			}
			if i < 0x80 && is_significant_ascii(i as u8) && v != i as i32 {
				return Err(Error::UnknownEncoding);
			}
			if i >= 0x80 && (0..0x80).contains(&v) && is_significant_ascii(v as u8) {
				return Err(Error::UnknownEncoding);
			}
		}
		Ok(())
	}

	fn decode(&self, b: &[u8]) -> Decoded {
		let v = self.map[b[0] as usize];
		if v >= 0 {
			return match std::char::from_u32(v as u32) {
				Some(c) => Decoded::Char(c, 1),
				// surrogates
				None => Decoded::Invalid,
			};
		}
		if v == -1 {
			return Decoded::Invalid;
		}
		let n = (-v) as usize;
		if b.len() < n {
			return Decoded::Incomplete;
		}
		match self.converter.as_ref().and_then(|f| f(&b[..n])) {
			Some(c) => Decoded::Char(c, n),
			None => Decoded::Invalid,
		}
	}
}

impl fmt::Debug for EncodingMap {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("EncodingMap")
			.field("converter", &self.converter.is_some())
			.finish()
	}
}

fn is_significant_ascii(b: u8) -> bool {
	matches!(b, b'\t' | b'\n' | b'\r' | 0x20..=0x7e)
}

/// Byte encoding of an entity.
#[derive(Clone)]
pub enum Encoding {
	Utf8,
	Utf16Le,
	Utf16Be,
	Latin1,
	Ascii,
	Custom(Arc<EncodingMap>),
}

/// Encoding of replacement texts, which are stored as UTF-8.
pub(crate) static UTF8: Encoding = Encoding::Utf8;

/// Encoding names known without asking the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KnownName {
	Utf8,
	/// UTF-16 with the byte order taken from the byte order mark.
	Utf16,
	Utf16Le,
	Utf16Be,
	Latin1,
	Ascii,
}

impl KnownName {
	pub(crate) fn lookup(name: &str) -> Option<KnownName> {
		const NAMES: &[(&str, KnownName)] = &[
			("UTF-8", KnownName::Utf8),
			("UTF-16", KnownName::Utf16),
			("UTF-16LE", KnownName::Utf16Le),
			("UTF-16BE", KnownName::Utf16Be),
			("ISO-8859-1", KnownName::Latin1),
			("US-ASCII", KnownName::Ascii),
		];
		NAMES
			.iter()
			.find(|(n, _)| n.eq_ignore_ascii_case(name))
			.map(|(_, k)| *k)
	}
}

impl Encoding {
	/// Number of bytes of the smallest character.
	pub fn min_len(&self) -> usize {
		match self {
			Self::Utf16Le | Self::Utf16Be => 2,
			_ => 1,
		}
	}

	/// True if ASCII characters are encoded as single ASCII bytes and no
	/// byte below 0x80 is part of a multi-byte sequence.
	pub(crate) fn ascii_transparent(&self) -> bool {
		matches!(self, Self::Utf8 | Self::Latin1 | Self::Ascii)
	}

	pub(crate) fn is_utf16(&self) -> bool {
		self.min_len() == 2
	}

	pub fn name(&self) -> &'static str {
		match self {
			Self::Utf8 => "UTF-8",
			Self::Utf16Le => "UTF-16LE",
			Self::Utf16Be => "UTF-16BE",
			Self::Latin1 => "ISO-8859-1",
			Self::Ascii => "US-ASCII",
			Self::Custom(_) => "(custom)",
		}
	}

	/// Decode the character at the start of `b`.
	pub fn decode(&self, b: &[u8]) -> Decoded {
		if b.is_empty() {
			return Decoded::Incomplete;
		}
		match self {
			Self::Utf8 => decode_utf8(b),
			Self::Utf16Le => decode_utf16(b, u16::from_le_bytes),
			Self::Utf16Be => decode_utf16(b, u16::from_be_bytes),
			Self::Latin1 => Decoded::Char(b[0] as char, 1),
			Self::Ascii => {
				if b[0] < 0x80 {
					Decoded::Char(b[0] as char, 1)
				} else {
					Decoded::Invalid
				}
			}
			Self::Custom(map) => map.decode(b),
		}
	}

	/// Return the number of trailing bytes of `b` which form an incomplete
	/// character.
	///
	/// `b` must start on a character boundary.
	pub fn incomplete_tail(&self, b: &[u8]) -> usize {
		let mut pos = 0;
		while pos < b.len() {
			match self.decode(&b[pos..]) {
				Decoded::Char(_, n) => pos += n,
				Decoded::Incomplete => return b.len() - pos,
				Decoded::Invalid => pos += 1,
			}
		}
		0
	}

	/// Decode a span which is known to be valid.
	///
	/// Undecodable bytes are replaced with U+FFFD.
	pub fn decode_str<'b>(&self, b: &'b [u8]) -> Cow<'b, str> {
		if let Self::Utf8 = self {
			return String::from_utf8_lossy(b);
		}
		let mut out = String::with_capacity(b.len());
		let mut pos = 0;
		while pos < b.len() {
			match self.decode(&b[pos..]) {
				Decoded::Char(c, n) => {
					out.push(c);
					pos += n;
				}
				_ => {
					out.push('\u{fffd}');
					pos += 1;
				}
			}
		}
		Cow::Owned(out)
	}

	/// Decode a span into the string under construction of `pool`.
	///
	/// With `normalize`, line breaks (`\r\n`, `\r`) are folded into `\n`.
	pub(crate) fn decode_into(&self, b: &[u8], pool: &mut StringPool, normalize: bool) -> Result<()> {
		if let Self::Utf8 = self {
			if let Ok(s) = std::str::from_utf8(b) {
				return if normalize {
					pool.push_normalized(s)
				} else {
					pool.push_str(s)
				};
			}
		}
		let mut pos = 0;
		let mut after_cr = false;
		while pos < b.len() {
			let (c, n) = match self.decode(&b[pos..]) {
				Decoded::Char(c, n) => (c, n),
				_ => ('\u{fffd}', 1),
			};
			pos += n;
			if normalize {
				if c == '\n' && after_cr {
					after_cr = false;
					continue;
				}
				after_cr = c == '\r';
				if after_cr {
					pool.push('\n')?;
					continue;
				}
			}
			pool.push(c)?;
		}
		Ok(())
	}
}

impl fmt::Debug for Encoding {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl PartialEq for Encoding {
	fn eq(&self, other: &Encoding) -> bool {
		match (self, other) {
			(Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
			(a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
		}
	}
}

fn is_cont(b: u8) -> bool {
	b & 0xc0 == 0x80
}

fn decode_utf8(b: &[u8]) -> Decoded {
	let lead = b[0];
	let (n, lo, hi) = match lead {
		0x00..=0x7f => return Decoded::Char(lead as char, 1),
		0xc2..=0xdf => (2, 0x80, 0xbf),
		0xe0 => (3, 0xa0, 0xbf),
		0xed => (3, 0x80, 0x9f),
		0xe1..=0xef => (3, 0x80, 0xbf),
		0xf0 => (4, 0x90, 0xbf),
		0xf4 => (4, 0x80, 0x8f),
		0xf1..=0xf3 => (4, 0x80, 0xbf),
		_ => return Decoded::Invalid,
	};
	if b.len() > 1 && !(lo..=hi).contains(&b[1]) {
		return Decoded::Invalid;
	}
	for &c in b.iter().take(n).skip(2) {
		if !is_cont(c) {
			return Decoded::Invalid;
		}
	}
	if b.len() < n {
		return Decoded::Incomplete;
	}
	let mut cp = (lead as u32) & (0x7f >> n);
	for &c in &b[1..n] {
		cp = (cp << 6) | (c as u32 & 0x3f);
	}
	match std::char::from_u32(cp) {
		Some(c) => Decoded::Char(c, n),
		None => Decoded::Invalid,
	}
}

fn decode_utf16(b: &[u8], unit: fn([u8; 2]) -> u16) -> Decoded {
	if b.len() < 2 {
		return Decoded::Incomplete;
	}
	let u = unit([b[0], b[1]]);
	match u {
		0xd800..=0xdbff => {
			if b.len() < 4 {
				return Decoded::Incomplete;
			}
			let l = unit([b[2], b[3]]);
			if !(0xdc00..=0xdfff).contains(&l) {
				return Decoded::Invalid;
			}
			let cp = 0x10000 + (((u as u32) - 0xd800) << 10) + ((l as u32) - 0xdc00);
			match std::char::from_u32(cp) {
				Some(c) => Decoded::Char(c, 4),
				None => Decoded::Invalid,
			}
		}
		0xdc00..=0xdfff => Decoded::Invalid,
		_ => match std::char::from_u32(u as u32) {
			Some(c) => Decoded::Char(c, 2),
			None => Decoded::Invalid,
		},
	}
}

/// Outcome of looking at the first bytes of an entity.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sniff {
	/// More bytes are needed to decide.
	Need,
	/// The encoding and the length of the byte order mark.
	Found(Encoding, usize),
}

/// Auto-detect the encoding family of an entity from its first bytes.
pub(crate) fn sniff(b: &[u8], is_final: bool) -> Sniff {
	const BOM8: &[u8] = b"\xef\xbb\xbf";
	if b.len() >= 2 {
		match (b[0], b[1]) {
			(0xfe, 0xff) => return Sniff::Found(Encoding::Utf16Be, 2),
			(0xff, 0xfe) => return Sniff::Found(Encoding::Utf16Le, 2),
			(0x3c, 0x00) => return Sniff::Found(Encoding::Utf16Le, 0),
			(0x00, 0x3c) => return Sniff::Found(Encoding::Utf16Be, 0),
			_ => (),
		}
	}
	if b.starts_with(BOM8) {
		return Sniff::Found(Encoding::Utf8, 3);
	}
	if !is_final {
		let short = b.len() < BOM8.len() && BOM8.starts_with(b)
			|| b.len() < 2 && matches!(b.first(), None | Some(0xfe) | Some(0xff) | Some(0x3c) | Some(0x00));
		if short {
			return Sniff::Need;
		}
	}
	Sniff::Found(Encoding::Utf8, 0)
}

/// Resolve an encoding forced by the application before parsing.
///
/// Returns `None` if the name is not built in.
pub(crate) fn resolve_override(name: &str, b: &[u8], is_final: bool) -> Option<Sniff> {
	let known = KnownName::lookup(name)?;
	let bom16 = |b: &[u8]| -> Option<(Encoding, usize)> {
		match b {
			[0xfe, 0xff, ..] => Some((Encoding::Utf16Be, 2)),
			[0xff, 0xfe, ..] => Some((Encoding::Utf16Le, 2)),
			_ => None,
		}
	};
	if b.len() < 3 && !is_final && known != KnownName::Latin1 && known != KnownName::Ascii {
		return Some(Sniff::Need);
	}
	Some(match known {
		KnownName::Utf8 => {
			if b.starts_with(b"\xef\xbb\xbf") {
				Sniff::Found(Encoding::Utf8, 3)
			} else {
				Sniff::Found(Encoding::Utf8, 0)
			}
		}
		KnownName::Utf16 => match bom16(b) {
			Some((enc, n)) => Sniff::Found(enc, n),
			None => Sniff::Found(Encoding::Utf16Be, 0),
		},
		KnownName::Utf16Le => match bom16(b) {
			Some((Encoding::Utf16Le, n)) => Sniff::Found(Encoding::Utf16Le, n),
			_ => Sniff::Found(Encoding::Utf16Le, 0),
		},
		KnownName::Utf16Be => match bom16(b) {
			Some((Encoding::Utf16Be, n)) => Sniff::Found(Encoding::Utf16Be, n),
			_ => Sniff::Found(Encoding::Utf16Be, 0),
		},
		KnownName::Latin1 => Sniff::Found(Encoding::Latin1, 0),
		KnownName::Ascii => Sniff::Found(Encoding::Ascii, 0),
	})
}

/// Decide which encoding a declaration switches to.
///
/// `current` is the detected encoding, `bom` whether it was detected from a
/// byte order mark. Returns `Ok(None)` if the name is not built in and has
/// to be resolved by the application.
pub(crate) fn switch_for_declaration(
	name: &str,
	current: &Encoding,
	bom: bool,
) -> Result<Option<Encoding>> {
	let known = match KnownName::lookup(name) {
		Some(k) => k,
		None => return Ok(None),
	};
	let declared = match known {
		KnownName::Utf8 => Encoding::Utf8,
		KnownName::Utf16 => {
			return if current.is_utf16() {
				Ok(Some(current.clone()))
			} else {
				Err(Error::IncorrectEncoding)
			}
		}
		KnownName::Utf16Le => Encoding::Utf16Le,
		KnownName::Utf16Be => Encoding::Utf16Be,
		KnownName::Latin1 => Encoding::Latin1,
		KnownName::Ascii => Encoding::Ascii,
	};
	if declared.min_len() != current.min_len() {
		return Err(Error::IncorrectEncoding);
	}
	if declared.is_utf16() && declared != *current {
		return Err(Error::IncorrectEncoding);
	}
	if bom && *current == Encoding::Utf8 && declared != Encoding::Utf8 {
		return Err(Error::IncorrectEncoding);
	}
	Ok(Some(declared))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alloc::SystemAllocator;

	#[test]
	fn utf8_rejects_overlong_and_surrogates() {
		assert_eq!(decode_utf8(b"\xc0\x80"), Decoded::Invalid);
		assert_eq!(decode_utf8(b"\xe0\x80\x80"), Decoded::Invalid);
		assert_eq!(decode_utf8(b"\xed\xa0\x80"), Decoded::Invalid);
		assert_eq!(decode_utf8(b"\xf4\x90\x80\x80"), Decoded::Invalid);
		assert_eq!(decode_utf8(b"\xc3\xa9"), Decoded::Char('é', 2));
		assert_eq!(decode_utf8(b"\xf0\x9f\x98\x80"), Decoded::Char('😀', 4));
	}

	#[test]
	fn utf8_incomplete_vs_invalid() {
		assert_eq!(decode_utf8(b"\xe2\x82"), Decoded::Incomplete);
		assert_eq!(decode_utf8(b"\xe2"), Decoded::Incomplete);
		assert_eq!(decode_utf8(b"\xe2\x41"), Decoded::Invalid);
		assert_eq!(decode_utf8(b"\xf0\x9f\x41"), Decoded::Invalid);
	}

	#[test]
	fn utf16_surrogates() {
		let enc = Encoding::Utf16Le;
		assert_eq!(enc.decode(b"\x3d\xd8\x00\xde"), Decoded::Char('😀', 4));
		assert_eq!(enc.decode(b"\x3d\xd8"), Decoded::Incomplete);
		assert_eq!(enc.decode(b"\x00\xdc\x41\x00"), Decoded::Invalid);
		assert_eq!(enc.decode(b"\x3d\xd8\x41\x00"), Decoded::Invalid);
		assert_eq!(Encoding::Utf16Be.decode(b"\x00\x41"), Decoded::Char('A', 2));
	}

	#[test]
	fn incomplete_tail() {
		assert_eq!(Encoding::Utf8.incomplete_tail(b"ab\xc3"), 1);
		assert_eq!(Encoding::Utf8.incomplete_tail(b"ab\xc3\xa9"), 0);
		assert_eq!(Encoding::Utf16Be.incomplete_tail(b"\x00a\x00"), 1);
	}

	#[test]
	fn sniffing() {
		assert_eq!(sniff(b"\xfe\xff\x00<", false), Sniff::Found(Encoding::Utf16Be, 2));
		assert_eq!(sniff(b"\xff\xfe<\x00", false), Sniff::Found(Encoding::Utf16Le, 2));
		assert_eq!(sniff(b"<\x00a\x00", false), Sniff::Found(Encoding::Utf16Le, 0));
		assert_eq!(sniff(b"\xef\xbb\xbf<a/>", false), Sniff::Found(Encoding::Utf8, 3));
		assert_eq!(sniff(b"\xef\xbb", false), Sniff::Need);
		assert_eq!(sniff(b"<", false), Sniff::Need);
		assert_eq!(sniff(b"<", true), Sniff::Found(Encoding::Utf8, 0));
		assert_eq!(sniff(b"<a", false), Sniff::Found(Encoding::Utf8, 0));
		assert_eq!(sniff(b"", false), Sniff::Need);
	}

	#[test]
	fn declared_encodings() {
		assert_eq!(
			switch_for_declaration("iso-8859-1", &Encoding::Utf8, false),
			Ok(Some(Encoding::Latin1))
		);
		assert_eq!(
			switch_for_declaration("utf-16", &Encoding::Utf8, false),
			Err(Error::IncorrectEncoding)
		);
		assert_eq!(
			switch_for_declaration("UTF-16", &Encoding::Utf16Le, true),
			Ok(Some(Encoding::Utf16Le))
		);
		assert_eq!(
			switch_for_declaration("UTF-16BE", &Encoding::Utf16Le, true),
			Err(Error::IncorrectEncoding)
		);
		assert_eq!(
			switch_for_declaration("ISO-8859-1", &Encoding::Utf8, true),
			Err(Error::IncorrectEncoding)
		);
		assert_eq!(switch_for_declaration("x-klingon", &Encoding::Utf8, false), Ok(None));
	}

	#[test]
	fn custom_map_validation() {
		let mut map = [0i32; 256];
		for (i, slot) in map.iter_mut().enumerate() {
			*slot = i as i32;
		}
		assert!(EncodingMap::new(map).validate().is_ok());

		let mut bad = map;
		bad[b'<' as usize] = 0x41;
		assert_eq!(EncodingMap::new(bad).validate(), Err(Error::UnknownEncoding));

		let mut multi = map;
		multi[0x81] = -2;
		assert_eq!(EncodingMap::new(multi).validate(), Err(Error::UnknownEncoding));
		let enc = EncodingMap::with_converter(multi, |b| match b {
			[0x81, 0x40] => Some('\u{3000}'),
			_ => None,
		});
		assert!(enc.validate().is_ok());
		assert_eq!(enc.decode(b"\x81\x40"), Decoded::Char('\u{3000}', 2));
		assert_eq!(enc.decode(b"\x81"), Decoded::Incomplete);
		assert_eq!(enc.decode(b"\x81\x41"), Decoded::Invalid);
	}

	#[test]
	fn decode_into_normalizes_across_encodings() {
		let mut pool = StringPool::new(Arc::new(SystemAllocator));
		Encoding::Latin1
			.decode_into(b"a\r\n\xe9\rb", &mut pool, true)
			.unwrap();
		assert_eq!(pool.current(), "a\n\u{e9}\nb");
	}
}
