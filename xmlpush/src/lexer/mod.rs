/*!
# XML 1.0 Tokenizer

The tokenizer works directly on the encoded bytes of an entity. A [`Scanner`]
is created over the unconsumed part of a buffer and produces one token per
call. Tokens carry byte ranges into that buffer; decoding the text of a
token is left to the parser, which only does so when the text is needed.

A token which runs into the end of the buffer yields [`Stop::Partial`]. The
caller either waits for more input or, if the input is final, turns this
into the appropriate error. A byte sequence which can never become a valid
token yields [`Stop::Invalid`] with the offending position right away.

Two token sets exist: [`ContentToken`] for element content and
[`PrologToken`] for the prolog, the epilog and DTD subsets. A few helpers
scan the inside of literals (entity values and attribute values) once the
surrounding token has been recognized.
*/
use std::fmt;
use std::ops::Range;

pub(crate) mod ranges;
pub(crate) mod read;

use xmlpush_validation::selectors::{is_name_char, is_name_start, is_xml_char};
use xmlpush_validation::{validate_encoding_name, validate_version_num};

use crate::alloc::Account;
use crate::encoding::{Decoded, Encoding};
use crate::error::Error;
use ranges::*;
use read::skip_matching_bytes;

/// Reasons for a token not being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stop {
	/// The buffer ends inside the token.
	Partial,
	/// The final buffer ends inside a character.
	PartialChar,
	/// Invalid input at the given offset.
	Invalid(usize),
	/// The final buffer ends inside a CDATA section.
	UnclosedCdata,
	/// The allocator refused scratch space.
	NoMemory,
}

pub(crate) type Scan<T> = Result<T, Stop>;

/// `?`, `*` or `+` after a content particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
	One,
	Optional,
	ZeroOrMore,
	OneOrMore,
}

impl Quantifier {
	fn from_char(c: char) -> Option<Quantifier> {
		match c {
			'?' => Some(Quantifier::Optional),
			'*' => Some(Quantifier::ZeroOrMore),
			'+' => Some(Quantifier::OneOrMore),
			_ => None,
		}
	}

	pub(crate) fn as_str(&self) -> &'static str {
		match self {
			Self::One => "",
			Self::Optional => "?",
			Self::ZeroOrMore => "*",
			Self::OneOrMore => "+",
		}
	}
}

/// Attribute of a start tag as found in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawAttr {
	pub name: Range<usize>,
	/// Value without the delimiters.
	pub value: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ContentToken {
	/// A run of character data, spanning the whole token.
	Data,
	CharRef(u32),
	EntityRef(Range<usize>),
	/// A start tag; the attributes are returned separately.
	StartTag {
		name: Range<usize>,
		empty: bool,
	},
	EndTag(Range<usize>),
	Comment(Range<usize>),
	Pi {
		target: Range<usize>,
		data: Range<usize>,
		xml: bool,
	},
	Cdata(Range<usize>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PrologToken {
	S,
	Pi {
		target: Range<usize>,
		data: Range<usize>,
		xml: bool,
	},
	Comment(Range<usize>),
	/// `<!KEYWORD`, with the range of the keyword.
	DeclOpen(Range<usize>),
	/// `<![`
	CondSectOpen,
	/// `<` followed by a name start character; nothing is consumed.
	InstanceStart,
	PeRef(Range<usize>),
	/// `%` followed by whitespace.
	Percent,
	/// `#KEYWORD`, with the range of the keyword.
	PoundName(Range<usize>),
	/// A quoted literal, with the range of its contents.
	Literal(Range<usize>),
	OpenBracket,
	CloseBracket,
	/// `]]>`
	CondSectClose,
	OpenParen,
	CloseParen(Quantifier),
	Or,
	Comma,
	Close,
	Name(Range<usize>, Quantifier),
	Nmtoken(Range<usize>),
}

/// A piece of an entity value literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ValuePart {
	Data(Range<usize>),
	CharRef(u32),
	/// General entity reference: the whole reference and the name.
	EntityRef(Range<usize>, Range<usize>),
	PeRef(Range<usize>),
}

/// A piece of an attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttrPart {
	Data(Range<usize>),
	CharRef(u32),
	EntityRef(Range<usize>),
}

enum Ref {
	Char(u32),
	Entity(Range<usize>),
}

struct DebugBytes<'a>(&'a [u8]);

impl<'a> fmt::Debug for DebugBytes<'a> {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.write_str("b\"")?;
		for b in self.0.iter().take(32) {
			match *b {
				b'"' => f.write_str("\\\"")?,
				0x20..=0x7e => write!(f, "{}", *b as char)?,
				other => write!(f, "\\x{:02x}", other)?,
			}
		}
		if self.0.len() > 32 {
			f.write_str("...")?;
		}
		f.write_str("\"")
	}
}

fn is_space(c: char) -> bool {
	matches!(c, ' ' | '\t' | '\r' | '\n')
}

/**
# Tokenizer over one buffer

The scanner starts at `pos` and advances it over every token it returns.
On error, `pos` is unspecified and the scanner should be discarded.
*/
pub(crate) struct Scanner<'b> {
	buf: &'b [u8],
	enc: &'b Encoding,
	pub(crate) pos: usize,
	is_final: bool,
	ns: bool,
	unit: usize,
	fast: bool,
	in_data: bool,
}

impl<'b> fmt::Debug for Scanner<'b> {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Scanner")
			.field("enc", self.enc)
			.field("pos", &self.pos)
			.field("is_final", &self.is_final)
			.field("ahead", &DebugBytes(&self.buf[self.pos.min(self.buf.len())..]))
			.finish()
	}
}

impl<'b> Scanner<'b> {
	pub(crate) fn new(
		buf: &'b [u8],
		enc: &'b Encoding,
		pos: usize,
		is_final: bool,
		ns: bool,
	) -> Scanner<'b> {
		Scanner {
			buf,
			enc,
			pos,
			is_final,
			ns,
			unit: enc.min_len(),
			fast: enc.ascii_transparent(),
			in_data: false,
		}
	}

	/// True if the last token attempted was a run of character data.
	///
	/// After [`Stop::Partial`], `pos` then marks how far the run has been
	/// checked already; see [`Scanner::data_from`].
	pub(crate) fn in_data(&self) -> bool {
		self.in_data
	}

	pub(crate) fn at_end(&self) -> bool {
		self.pos >= self.buf.len()
	}

	fn peek_at(&self, at: usize) -> Scan<Option<(char, usize)>> {
		if at >= self.buf.len() {
			return Ok(None);
		}
		let b = self.buf[at];
		if self.fast && b < 0x80 {
			return if is_xml_char(b as char) {
				Ok(Some((b as char, 1)))
			} else {
				Err(Stop::Invalid(at))
			};
		}
		match self.enc.decode(&self.buf[at..]) {
			Decoded::Char(c, n) => {
				if is_xml_char(c) {
					Ok(Some((c, n)))
				} else {
					Err(Stop::Invalid(at))
				}
			}
			Decoded::Incomplete => {
				if self.is_final {
					Err(Stop::PartialChar)
				} else {
					Err(Stop::Partial)
				}
			}
			Decoded::Invalid => Err(Stop::Invalid(at)),
		}
	}

	fn peek(&self) -> Scan<Option<(char, usize)>> {
		self.peek_at(self.pos)
	}

	fn need(&self) -> Scan<(char, usize)> {
		match self.peek()? {
			Some(v) => Ok(v),
			None => Err(Stop::Partial),
		}
	}

	fn eat(&mut self, c: char) -> Scan<bool> {
		let (d, n) = self.need()?;
		if d == c {
			self.pos += n;
			Ok(true)
		} else {
			Ok(false)
		}
	}

	fn expect(&mut self, c: char) -> Scan<()> {
		if self.eat(c)? {
			Ok(())
		} else {
			Err(Stop::Invalid(self.pos))
		}
	}

	fn expect_str(&mut self, s: &str) -> Scan<()> {
		for c in s.chars() {
			self.expect(c)?;
		}
		Ok(())
	}

	/// Check whether the input at the current position starts with `s`
	/// without consuming anything.
	///
	/// At the end of a final buffer, this is simply false.
	fn lookahead(&self, s: &str) -> Scan<bool> {
		let mut at = self.pos;
		for c in s.chars() {
			match self.peek_at(at)? {
				Some((d, n)) if d == c => at += n,
				Some(_) => return Ok(false),
				None if self.is_final => return Ok(false),
				None => return Err(Stop::Partial),
			}
		}
		Ok(true)
	}

	/// True if an XML or text declaration starts at the current position.
	pub(crate) fn at_xml_decl(&self) -> Scan<bool> {
		let mut at = self.pos;
		for c in "<?xml".chars() {
			match self.peek_at(at)? {
				Some((d, n)) if d == c => at += n,
				Some(_) => return Ok(false),
				None if self.is_final => return Ok(false),
				None => return Err(Stop::Partial),
			}
		}
		match self.peek_at(at)? {
			Some((c, _)) => Ok(is_space(c) || c == '?'),
			None if self.is_final => Ok(false),
			None => Err(Stop::Partial),
		}
	}

	fn skip_fast<B: ByteSelect>(&mut self, class: &B) {
		if self.fast && self.pos < self.buf.len() {
			let (n, _) = skip_matching_bytes(&self.buf[self.pos..], class);
			self.pos += n;
		}
	}

	fn skip_space(&mut self) -> Scan<bool> {
		let start = self.pos;
		loop {
			self.skip_fast(&CLASS_SPACE_BYTE);
			match self.peek()? {
				Some((c, n)) if is_space(c) => self.pos += n,
				_ => return Ok(self.pos != start),
			}
		}
	}

	fn name_tail(&mut self, start: usize) -> Scan<Range<usize>> {
		loop {
			self.skip_fast(&CLASS_NAME_BYTE);
			match self.peek()? {
				Some((c, n)) if is_name_char(c) => self.pos += n,
				Some(_) => return Ok(start..self.pos),
				None if self.is_final => return Ok(start..self.pos),
				None => return Err(Stop::Partial),
			}
		}
	}

	fn name(&mut self) -> Scan<Range<usize>> {
		let start = self.pos;
		let (c, n) = self.need()?;
		if !is_name_start(c) {
			return Err(Stop::Invalid(start));
		}
		self.pos += n;
		self.name_tail(start)
	}

	fn nmtoken(&mut self) -> Scan<Range<usize>> {
		let start = self.pos;
		let (c, n) = self.need()?;
		if !is_name_char(c) {
			return Err(Stop::Invalid(start));
		}
		self.pos += n;
		self.name_tail(start)
	}

	/// Compare the characters of a span against an ASCII string.
	///
	/// Returns `(exact, ignoring_case)`.
	fn span_matches(&self, r: Range<usize>, s: &str) -> (bool, bool) {
		let mut at = r.start;
		let mut exact = true;
		let mut chars = s.chars();
		while at < r.end {
			let c = match self.enc.decode(&self.buf[at..r.end]) {
				Decoded::Char(c, n) => {
					at += n;
					c
				}
				_ => return (false, false),
			};
			match chars.next() {
				Some(d) if d == c => (),
				Some(d) if d.eq_ignore_ascii_case(&c) => exact = false,
				_ => return (false, false),
			}
		}
		if chars.next().is_some() {
			return (false, false);
		}
		(exact, true)
	}

	fn span_contains(&self, r: Range<usize>, needle: char) -> bool {
		let mut at = r.start;
		while at < r.end {
			match self.enc.decode(&self.buf[at..r.end]) {
				Decoded::Char(c, n) => {
					if c == needle {
						return true;
					}
					at += n;
				}
				_ => return false,
			}
		}
		false
	}

	/// Scan a reference; the position is at the `&`.
	fn reference(&mut self) -> Scan<Ref> {
		self.pos += self.unit;
		if !self.eat('#')? {
			let name = self.name()?;
			if !self.eat(';')? {
				return Err(Stop::Invalid(self.pos));
			}
			return Ok(Ref::Entity(name));
		}
		let hex = self.eat('x')?;
		let radix = if hex { 16 } else { 10 };
		let mut value: u32 = 0;
		let mut digits = 0usize;
		loop {
			let (c, n) = self.need()?;
			if c == ';' && digits > 0 {
				self.pos += n;
				return Ok(Ref::Char(value));
			}
			match c.to_digit(radix) {
				Some(d) => {
					value = value.saturating_mul(radix).saturating_add(d);
					digits += 1;
					self.pos += n;
				}
				None => return Err(Stop::Invalid(self.pos)),
			}
		}
	}

	/// Scan a processing instruction; the position is after `<?`.
	fn pi(&mut self) -> Scan<(Range<usize>, Range<usize>, bool)> {
		let target = self.name()?;
		let (exact, like_xml) = self.span_matches(target.clone(), "xml");
		if like_xml && !exact {
			return Err(Stop::Invalid(target.end));
		}
		if self.ns && self.span_contains(target.clone(), ':') {
			return Err(Stop::Invalid(target.end));
		}
		let (c, n) = self.need()?;
		if c == '?' {
			self.pos += n;
			self.expect('>')?;
			let end = self.pos - 2 * self.unit;
			return Ok((target, end..end, exact));
		}
		if !is_space(c) {
			return Err(Stop::Invalid(self.pos));
		}
		self.skip_space()?;
		let start = self.pos;
		loop {
			self.skip_fast(&CLASS_PI);
			let (c, n) = self.need()?;
			if c == '?' && self.lookahead("?>")? {
				let data = start..self.pos;
				self.pos += 2 * self.unit;
				return Ok((target, data, exact));
			}
			self.pos += n;
		}
	}

	/// Scan a comment; the position is after `<!-`.
	fn comment(&mut self) -> Scan<Range<usize>> {
		self.expect('-')?;
		let start = self.pos;
		loop {
			self.skip_fast(&CLASS_COMMENT);
			let (c, n) = self.need()?;
			if c == '-' && self.lookahead("--")? {
				let end = self.pos;
				self.pos += 2 * self.unit;
				if !self.eat('>')? {
					return Err(Stop::Invalid(self.pos));
				}
				return Ok(start..end);
			}
			self.pos += n;
		}
	}

	fn data(&mut self) -> Scan<ContentToken> {
		self.in_data = true;
		loop {
			self.skip_fast(&CLASS_DATA);
			match self.peek()? {
				None if self.is_final => return Ok(ContentToken::Data),
				None => return Err(Stop::Partial),
				Some(('<', _)) | Some(('&', _)) => return Ok(ContentToken::Data),
				Some((']', n)) => {
					if self.lookahead("]]>")? {
						return Err(Stop::Invalid(self.pos + 2 * self.unit));
					}
					self.pos += n;
				}
				Some((_, n)) => self.pos += n,
			}
		}
	}

	fn cdata_section(&mut self) -> Scan<ContentToken> {
		let start = self.pos;
		loop {
			self.skip_fast(&CLASS_CDATA_SECTION);
			match self.peek()? {
				None if self.is_final => return Err(Stop::UnclosedCdata),
				None => return Err(Stop::Partial),
				Some((']', n)) => {
					if self.lookahead("]]>")? {
						let end = self.pos;
						self.pos += 3 * self.unit;
						return Ok(ContentToken::Cdata(start..end));
					}
					self.pos += n;
				}
				Some((_, n)) => self.pos += n,
			}
		}
	}

	fn attribute_value(&mut self, quote: char) -> Scan<Range<usize>> {
		let start = self.pos;
		loop {
			if quote == '"' {
				self.skip_fast(&CLASS_ATT_QUOT);
			} else {
				self.skip_fast(&CLASS_ATT_APOS);
			}
			let (c, n) = self.need()?;
			if c == quote {
				let end = self.pos;
				self.pos += n;
				return Ok(start..end);
			}
			match c {
				'<' => return Err(Stop::Invalid(self.pos)),
				'&' => {
					self.reference()?;
				}
				_ => self.pos += n,
			}
		}
	}

	fn start_tag(
		&mut self,
		attrs: &mut Vec<RawAttr>,
		account: &mut Account,
	) -> Scan<ContentToken> {
		let name = self.name()?;
		loop {
			let had_space = self.skip_space()?;
			let (c, n) = self.need()?;
			match c {
				'>' => {
					self.pos += n;
					return Ok(ContentToken::StartTag { name, empty: false });
				}
				'/' => {
					self.pos += n;
					self.expect('>')?;
					return Ok(ContentToken::StartTag { name, empty: true });
				}
				c if is_name_start(c) => {
					if !had_space {
						return Err(Stop::Invalid(self.pos));
					}
					let att = self.name()?;
					self.skip_space()?;
					self.expect('=')?;
					self.skip_space()?;
					let (q, n) = self.need()?;
					if q != '"' && q != '\'' {
						return Err(Stop::Invalid(self.pos));
					}
					self.pos += n;
					let value = self.attribute_value(q)?;
					account.grow_vec(attrs, 1).map_err(|_| Stop::NoMemory)?;
					attrs.push(RawAttr { name: att, value });
				}
				_ => return Err(Stop::Invalid(self.pos)),
			}
		}
	}

	/// Return the next token of element content.
	///
	/// Returns `None` at the end of the buffer. Attributes of start tags
	/// are appended to `attrs`, which the caller clears.
	pub(crate) fn content_token(
		&mut self,
		attrs: &mut Vec<RawAttr>,
		account: &mut Account,
	) -> Scan<Option<ContentToken>> {
		let (c, n) = match self.peek()? {
			None => return Ok(None),
			Some(v) => v,
		};
		match c {
			'<' => (),
			'&' => {
				return Ok(Some(match self.reference()? {
					Ref::Char(v) => ContentToken::CharRef(v),
					Ref::Entity(name) => ContentToken::EntityRef(name),
				}))
			}
			_ => return self.data().map(Some),
		}
		self.pos += n;
		let (c, n) = self.need()?;
		let tok = match c {
			'/' => {
				self.pos += n;
				let name = self.name()?;
				self.skip_space()?;
				self.expect('>')?;
				ContentToken::EndTag(name)
			}
			'?' => {
				self.pos += n;
				let (target, data, xml) = self.pi()?;
				ContentToken::Pi { target, data, xml }
			}
			'!' => {
				self.pos += n;
				let (c, n) = self.need()?;
				match c {
					'-' => {
						self.pos += n;
						ContentToken::Comment(self.comment()?)
					}
					'[' => {
						self.pos += n;
						self.expect_str("CDATA[")?;
						self.cdata_section()?
					}
					_ => return Err(Stop::Invalid(self.pos)),
				}
			}
			c if is_name_start(c) => self.start_tag(attrs, account)?,
			_ => return Err(Stop::Invalid(self.pos)),
		};
		Ok(Some(tok))
	}

	/// Continue a run of character data which has been checked up to `at`.
	pub(crate) fn data_from(&mut self, at: usize) -> Scan<Option<ContentToken>> {
		self.pos = at;
		self.data().map(Some)
	}

	/// Require a delimiter after a name or literal in the prolog.
	fn prolog_delimiter(&self, allowed: &str) -> Scan<()> {
		match self.peek()? {
			None if self.is_final => Ok(()),
			None => Err(Stop::Partial),
			Some((c, _)) if is_space(c) || allowed.contains(c) => Ok(()),
			Some(_) => Err(Stop::Invalid(self.pos)),
		}
	}

	fn quantifier(&mut self) -> Scan<Quantifier> {
		match self.peek()? {
			Some((c, n)) => match Quantifier::from_char(c) {
				Some(q) => {
					self.pos += n;
					Ok(q)
				}
				None => Ok(Quantifier::One),
			},
			None if self.is_final => Ok(Quantifier::One),
			None => Err(Stop::Partial),
		}
	}

	/// Return the next token of the prolog, the epilog or a DTD subset.
	///
	/// Returns `None` at the end of the buffer.
	pub(crate) fn prolog_token(&mut self) -> Scan<Option<PrologToken>> {
		let (c, n) = match self.peek()? {
			None => return Ok(None),
			Some(v) => v,
		};
		let start = self.pos;
		let tok = match c {
			c if is_space(c) => {
				self.skip_space()?;
				if self.at_end() && !self.is_final {
					return Err(Stop::Partial);
				}
				PrologToken::S
			}
			'<' => {
				self.pos += n;
				let (c, n) = self.need()?;
				match c {
					'?' => {
						self.pos += n;
						let (target, data, xml) = self.pi()?;
						PrologToken::Pi { target, data, xml }
					}
					'!' => {
						self.pos += n;
						let (c, n) = self.need()?;
						match c {
							'-' => {
								self.pos += n;
								PrologToken::Comment(self.comment()?)
							}
							'[' => {
								self.pos += n;
								PrologToken::CondSectOpen
							}
							c if c.is_ascii_uppercase() => {
								let kw = self.pos;
								loop {
									match self.need()? {
										(c, n) if c.is_ascii_uppercase() => self.pos += n,
										(c, _) if is_space(c) || c == '%' => break,
										_ => return Err(Stop::Invalid(self.pos)),
									}
								}
								PrologToken::DeclOpen(kw..self.pos)
							}
							_ => return Err(Stop::Invalid(self.pos)),
						}
					}
					c if is_name_start(c) => {
						self.pos = start;
						PrologToken::InstanceStart
					}
					_ => return Err(Stop::Invalid(self.pos)),
				}
			}
			'%' => {
				self.pos += n;
				match self.peek()? {
					Some((c, _)) if is_space(c) => PrologToken::Percent,
					Some((c, _)) if is_name_start(c) => {
						let name = self.name()?;
						if !self.eat(';')? {
							return Err(Stop::Invalid(self.pos));
						}
						PrologToken::PeRef(name)
					}
					None if !self.is_final => return Err(Stop::Partial),
					_ => return Err(Stop::Invalid(self.pos)),
				}
			}
			'#' => {
				self.pos += n;
				let name = self.name()?;
				self.prolog_delimiter(">)|,%")?;
				PrologToken::PoundName(name)
			}
			'"' | '\'' => {
				self.pos += n;
				let lit = self.pos;
				loop {
					let (d, m) = self.need()?;
					if d == c {
						let r = lit..self.pos;
						self.pos += m;
						self.prolog_delimiter(">%[")?;
						break PrologToken::Literal(r);
					}
					self.pos += m;
				}
			}
			'[' => {
				self.pos += n;
				PrologToken::OpenBracket
			}
			']' => {
				if self.lookahead("]]>")? {
					self.pos += 3 * self.unit;
					PrologToken::CondSectClose
				} else {
					self.pos += n;
					PrologToken::CloseBracket
				}
			}
			'(' => {
				self.pos += n;
				PrologToken::OpenParen
			}
			')' => {
				self.pos += n;
				let q = self.quantifier()?;
				self.prolog_delimiter(">,|)%")?;
				PrologToken::CloseParen(q)
			}
			'|' => {
				self.pos += n;
				PrologToken::Or
			}
			',' => {
				self.pos += n;
				PrologToken::Comma
			}
			'>' => {
				self.pos += n;
				PrologToken::Close
			}
			c if is_name_start(c) => {
				let name = self.name()?;
				let q = self.quantifier()?;
				self.prolog_delimiter(">)|,[%")?;
				PrologToken::Name(name, q)
			}
			c if is_name_char(c) => {
				let tok = self.nmtoken()?;
				self.prolog_delimiter(">)|,[%")?;
				PrologToken::Nmtoken(tok)
			}
			_ => return Err(Stop::Invalid(self.pos)),
		};
		Ok(Some(tok))
	}

	/// Skip the contents of an ignored conditional section, including the
	/// closing `]]>`. Nested sections are balanced.
	pub(crate) fn ignore_section(&mut self) -> Scan<()> {
		let mut depth = 1usize;
		loop {
			let (c, n) = self.need()?;
			match c {
				'<' if self.lookahead("<![")? => {
					depth += 1;
					self.pos += 3 * self.unit;
				}
				']' if self.lookahead("]]>")? => {
					depth -= 1;
					self.pos += 3 * self.unit;
					if depth == 0 {
						return Ok(());
					}
				}
				_ => self.pos += n,
			}
		}
	}

	/// Return the next piece of an entity value.
	///
	/// The scanner must be limited to the literal's contents.
	pub(crate) fn entity_value_part(&mut self) -> Scan<Option<ValuePart>> {
		let start = self.pos;
		match self.peek()? {
			None => return Ok(None),
			Some(('&', _)) => {
				return Ok(Some(match self.reference()? {
					Ref::Char(v) => ValuePart::CharRef(v),
					Ref::Entity(name) => ValuePart::EntityRef(start..self.pos, name),
				}))
			}
			Some(('%', n)) => {
				self.pos += n;
				let name = self.name()?;
				if !self.eat(';')? {
					return Err(Stop::Invalid(self.pos));
				}
				return Ok(Some(ValuePart::PeRef(name)));
			}
			Some(_) => (),
		}
		loop {
			match self.peek()? {
				None | Some(('&', _)) | Some(('%', _)) => {
					return Ok(Some(ValuePart::Data(start..self.pos)))
				}
				Some((_, n)) => self.pos += n,
			}
		}
	}

	/// Return the next piece of an attribute value.
	///
	/// The scanner must be limited to the value.
	pub(crate) fn attr_value_part(&mut self) -> Scan<Option<AttrPart>> {
		let start = self.pos;
		match self.peek()? {
			None => return Ok(None),
			Some(('&', _)) => {
				return Ok(Some(match self.reference()? {
					Ref::Char(v) => AttrPart::CharRef(v),
					Ref::Entity(name) => AttrPart::EntityRef(name),
				}))
			}
			Some(_) => (),
		}
		loop {
			match self.peek()? {
				None | Some(('&', _)) => return Ok(Some(AttrPart::Data(start..self.pos))),
				Some(('<', _)) => return Err(Stop::Invalid(self.pos)),
				Some((_, n)) => self.pos += n,
			}
		}
	}
}

/// Parsed XML or text declaration.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct XmlDeclInfo {
	pub version: Option<String>,
	pub encoding: Option<String>,
	pub standalone: Option<bool>,
}

/// Parse the pseudo-attributes of an XML declaration (`is_text_decl` false)
/// or a text declaration, given the full `<?xml ... ?>` text.
pub(crate) fn parse_xml_decl(text: &str, is_text_decl: bool) -> Result<XmlDeclInfo, Error> {
	let bad = || {
		if is_text_decl {
			Error::TextDecl
		} else {
			Error::XmlDecl
		}
	};
	let mut rest = text
		.strip_prefix("<?xml")
		.and_then(|s| s.strip_suffix("?>"))
		.ok_or_else(bad)?;
	let mut info = XmlDeclInfo::default();
	// 0: version allowed, 1: encoding allowed, 2: standalone allowed
	let mut stage = 0;
	loop {
		let trimmed = rest.trim_start_matches(is_space);
		let had_space = trimmed.len() != rest.len();
		rest = trimmed;
		if rest.is_empty() {
			break;
		}
		if !had_space {
			return Err(bad());
		}
		let name_end = rest
			.find(|c: char| c == '=' || is_space(c))
			.ok_or_else(bad)?;
		let name = &rest[..name_end];
		rest = rest[name_end..].trim_start_matches(is_space);
		rest = rest.strip_prefix('=').ok_or_else(bad)?;
		rest = rest.trim_start_matches(is_space);
		let quote = match rest.chars().next() {
			Some(q) if q == '"' || q == '\'' => q,
			_ => return Err(bad()),
		};
		rest = &rest[1..];
		let value_end = rest.find(quote).ok_or_else(bad)?;
		let value = &rest[..value_end];
		rest = &rest[value_end + 1..];
		match name {
			"version" if stage == 0 => {
				validate_version_num(value).map_err(|_| bad())?;
				info.version = Some(value.to_string());
				stage = 1;
			}
			"encoding" if stage <= 1 && (is_text_decl || info.version.is_some()) => {
				validate_encoding_name(value).map_err(|_| bad())?;
				info.encoding = Some(value.to_string());
				stage = 2;
			}
			"standalone" if !is_text_decl && info.version.is_some() && stage <= 2 => {
				info.standalone = Some(match value {
					"yes" => true,
					"no" => false,
					_ => return Err(bad()),
				});
				stage = 3;
			}
			_ => return Err(bad()),
		}
	}
	if is_text_decl && info.encoding.is_none() {
		return Err(bad());
	}
	if !is_text_decl && info.version.is_none() {
		return Err(bad());
	}
	Ok(info)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alloc::{system, Account};
	use crate::encoding::UTF8;

	fn content(src: &[u8], is_final: bool) -> (Scan<Option<ContentToken>>, usize, Vec<RawAttr>) {
		let mut attrs = Vec::new();
		let mut account = Account::new(system());
		let mut s = Scanner::new(src, &UTF8, 0, is_final, false);
		let r = s.content_token(&mut attrs, &mut account);
		(r, s.pos, attrs)
	}

	fn prolog(src: &[u8], is_final: bool) -> (Scan<Option<PrologToken>>, usize) {
		let mut s = Scanner::new(src, &UTF8, 0, is_final, false);
		let r = s.prolog_token();
		(r, s.pos)
	}

	#[test]
	fn data_runs_wait_for_markup() {
		match content(b"hello", false).0 {
			Err(Stop::Partial) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"hello<", false) {
			(Ok(Some(ContentToken::Data)), 5, _) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"hello", true) {
			(Ok(Some(ContentToken::Data)), 5, _) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn data_rejects_cdata_end() {
		match content(b"a]]>b<", false).0 {
			Err(Stop::Invalid(3)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"a]]b<", false) {
			(Ok(Some(ContentToken::Data)), 4, _) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn start_tag_with_attributes() {
		match content(b"<a x='1' y=\"2&amp;\"/>", false) {
			(Ok(Some(ContentToken::StartTag { name, empty: true })), 21, attrs) => {
				assert_eq!(name, 1..2);
				assert_eq!(attrs.len(), 2);
				assert_eq!(attrs[0].name, 3..4);
				assert_eq!(attrs[0].value, 6..7);
				assert_eq!(attrs[1].value, 12..18);
			}
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn attributes_need_separating_space() {
		match content(b"<a x='1'y='2'>", false).0 {
			Err(Stop::Invalid(8)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn lt_in_attribute_value_is_invalid() {
		match content(b"<a x='<'>", false).0 {
			Err(Stop::Invalid(6)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn char_refs() {
		match content(b"&#x41;", false).0 {
			Ok(Some(ContentToken::CharRef(0x41))) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"&#65;", false).0 {
			Ok(Some(ContentToken::CharRef(65))) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"&#;", false).0 {
			Err(Stop::Invalid(2)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"&#99999999999;", false).0 {
			Ok(Some(ContentToken::CharRef(v))) => assert!(v > 0x10ffff),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn comments() {
		match content(b"<!-- x -->", false) {
			(Ok(Some(ContentToken::Comment(r))), 10, _) => assert_eq!(r, 4..7),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"<!-- x -- y -->", false).0 {
			Err(Stop::Invalid(9)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"<!-- x -", false).0 {
			Err(Stop::Partial) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn processing_instructions() {
		match content(b"<?pi data here?>", false).0 {
			Ok(Some(ContentToken::Pi { target, data, xml: false })) => {
				assert_eq!(target, 2..4);
				assert_eq!(data, 5..14);
			}
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"<?xml version='1.0'?>", false).0 {
			Ok(Some(ContentToken::Pi { xml: true, .. })) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"<?XmL?>", false).0 {
			Err(Stop::Invalid(5)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"<?xmlfoo?>", false).0 {
			Ok(Some(ContentToken::Pi { xml: false, .. })) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn cdata_sections() {
		match content(b"<![CDATA[a]]b]]>", false) {
			(Ok(Some(ContentToken::Cdata(r))), 16, _) => assert_eq!(r, 9..13),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"<![CDATA[abc", true).0 {
			Err(Stop::UnclosedCdata) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"<![CDATX[", false).0 {
			Err(Stop::Invalid(7)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn invalid_markup_is_reported_immediately() {
		match content(b"<!x", false).0 {
			Err(Stop::Invalid(2)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match content(b"< a>", false).0 {
			Err(Stop::Invalid(1)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn non_xml_chars_are_invalid() {
		match content(b"a\x01b<", false).0 {
			Err(Stop::Invalid(1)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn utf16_start_tag() {
		let src: Vec<u8> = "<doc a='x'>"
			.encode_utf16()
			.flat_map(|u| u.to_le_bytes().to_vec())
			.collect();
		let enc = Encoding::Utf16Le;
		let mut attrs = Vec::new();
		let mut account = Account::new(system());
		let mut s = Scanner::new(&src, &enc, 0, false, false);
		match s.content_token(&mut attrs, &mut account) {
			Ok(Some(ContentToken::StartTag { name, empty: false })) => {
				assert_eq!(name, 2..8);
				assert_eq!(attrs[0].value, 16..18);
			}
			other => panic!("unexpected result: {:?}", other),
		}
		assert_eq!(s.pos, src.len());
	}

	#[test]
	fn prolog_declarations() {
		match prolog(b"<!DOCTYPE doc>", false) {
			(Ok(Some(PrologToken::DeclOpen(r))), 9) => assert_eq!(r, 2..9),
			other => panic!("unexpected result: {:?}", other),
		}
		match prolog(b"<!doctype doc>", false).0 {
			Err(Stop::Invalid(2)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match prolog(b"<doc>", false) {
			(Ok(Some(PrologToken::InstanceStart)), 0) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn prolog_names_need_delimiters() {
		match prolog(b"doc>", false) {
			(Ok(Some(PrologToken::Name(r, Quantifier::One))), 3) => assert_eq!(r, 0..3),
			other => panic!("unexpected result: {:?}", other),
		}
		match prolog(b"doc*,", false) {
			(Ok(Some(PrologToken::Name(_, Quantifier::ZeroOrMore))), 4) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match prolog(b"doc\"", false).0 {
			Err(Stop::Invalid(3)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match prolog(b"doc", false).0 {
			Err(Stop::Partial) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match prolog(b"doc", true) {
			(Ok(Some(PrologToken::Name(..))), 3) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn prolog_whitespace_is_held_back() {
		match prolog(b"  ", false).0 {
			Err(Stop::Partial) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match prolog(b"  <", false) {
			(Ok(Some(PrologToken::S)), 2) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn prolog_references_and_literals() {
		match prolog(b"%pe; ", false) {
			(Ok(Some(PrologToken::PeRef(r))), 4) => assert_eq!(r, 1..3),
			other => panic!("unexpected result: {:?}", other),
		}
		match prolog(b"% pe", false) {
			(Ok(Some(PrologToken::Percent)), 1) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match prolog(b"'a b'>", false) {
			(Ok(Some(PrologToken::Literal(r))), 5) => assert_eq!(r, 1..4),
			other => panic!("unexpected result: {:?}", other),
		}
		match prolog(b"]]>", false) {
			(Ok(Some(PrologToken::CondSectClose)), 3) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match prolog(b"]>", false) {
			(Ok(Some(PrologToken::CloseBracket)), 1) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn ignore_sections_nest() {
		let src = b"a <![ IGNORE [ b ]]> c ]]>rest";
		let mut s = Scanner::new(src, &UTF8, 0, false, false);
		s.ignore_section().unwrap();
		assert_eq!(&src[s.pos..], b"rest");
	}

	#[test]
	fn entity_value_parts() {
		let src = b"a&#66;&e;%p;c";
		let mut s = Scanner::new(src, &UTF8, 0, true, false);
		let mut parts = Vec::new();
		while let Some(p) = s.entity_value_part().unwrap() {
			parts.push(p);
		}
		assert_eq!(
			parts,
			vec![
				ValuePart::Data(0..1),
				ValuePart::CharRef(66),
				ValuePart::EntityRef(6..9, 7..8),
				ValuePart::PeRef(10..11),
				ValuePart::Data(12..13),
			]
		);
	}

	#[test]
	fn xml_decl_parsing() {
		let info = parse_xml_decl("<?xml version='1.0' encoding=\"latin1\" standalone='yes'?>", false).unwrap();
		assert_eq!(info.version.as_deref(), Some("1.0"));
		assert_eq!(info.encoding.as_deref(), Some("latin1"));
		assert_eq!(info.standalone, Some(true));
		assert_eq!(parse_xml_decl("<?xml encoding='utf-8'?>", false), Err(Error::XmlDecl));
		assert_eq!(
			parse_xml_decl("<?xml version='1.0' standalone='yes' encoding='utf-8'?>", false),
			Err(Error::XmlDecl)
		);
		assert_eq!(parse_xml_decl("<?xml version='1.0' standalone='maybe'?>", false), Err(Error::XmlDecl));
		assert!(parse_xml_decl("<?xml encoding='utf-8'?>", true).is_ok());
		assert_eq!(parse_xml_decl("<?xml version='1.0'?>", true), Err(Error::TextDecl));
		assert_eq!(
			parse_xml_decl("<?xml version='1.0' encoding='a' standalone='no'?>", true),
			Err(Error::TextDecl)
		);
	}

	#[test]
	fn xml_decl_detection() {
		let at = |src: &[u8], is_final: bool| Scanner::new(src, &UTF8, 0, is_final, false).at_xml_decl();
		assert_eq!(at(b"<?xml version='1.0'?>", false), Ok(true));
		assert_eq!(at(b"<?xml?>", false), Ok(true));
		assert_eq!(at(b"<?xml-stylesheet?>", false), Ok(false));
		assert_eq!(at(b"<?xm", false), Err(Stop::Partial));
		assert_eq!(at(b"<?xml", false), Err(Stop::Partial));
		assert_eq!(at(b"<?xml", true), Ok(false));
		assert_eq!(at(b"<doc/>", false), Ok(false));
	}
}
