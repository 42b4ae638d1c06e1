/*!
# Prolog, DTD and epilog

Everything outside the document element: the XML or text declaration, the
document type declaration with its internal subset, external subsets and
parameter entities, and the misc items after the document element.

Markup declarations are collected token by token and interpreted once the
closing `>` has been read. Entity values are the exception: parameter
entity references in them are expanded as they are read.
*/
use std::ops::Range;
use std::sync::Arc;

use log::debug;
use smartstring::alias::String as SmartString;

use super::content::{att_value, scan_error};
use super::{char_ref, scanner, view, Core, Mode, ParamEntityParsing, Phase, RcPtr, Raw, Src, Step};
use crate::dtd::{AttributeDef, Entity};
use crate::encoding::{resolve_override, sniff, switch_for_declaration, Encoding, Sniff, UTF8};
use crate::error::{Error, Result};
use crate::handler::{ContentKind, ContentModel, EntityDecl, ExternalEntity, Handler, Quantifier};
use crate::lexer::{parse_xml_decl, PrologToken, Scanner, Stop, ValuePart};
use crate::pool::{PoolStr, StringPool};

/// Position within the prolog or a DTD subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prolog {
	/// Before the document type declaration.
	Misc,
	InternalSubset,
	/// After the `]` which closes the internal subset.
	AfterSubset,
	AfterDoctype,
	/// Top level of an external subset or external parameter entity.
	ExternalSubset,
	/// Between `<![` and the `[` after the keyword.
	CondSect,
	/// Inside an ignored conditional section.
	Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeclKind {
	Doctype,
	Entity,
	Attlist,
	Element,
	Notation,
}

/// A markup declaration being read.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Decl {
	kind: DeclKind,
	/// Whether declarations were still processed when this one started.
	keep: bool,
}

/// Token of a markup declaration; text lives in the declaration pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeclTok {
	Name(PoolStr, Quantifier),
	Nmtoken(PoolStr),
	Literal(PoolStr),
	Pound(PoolStr),
	Percent,
	OpenParen,
	CloseParen(Quantifier),
	Or,
	Comma,
}

#[derive(Debug, Clone)]
pub(crate) struct Doctype {
	name: RcPtr<str>,
	system_id: Option<RcPtr<str>>,
	public_id: Option<RcPtr<str>>,
}

struct AttDecl {
	name: String,
	att_type: String,
	/// Default value as written.
	default: Option<String>,
	required: bool,
}

enum Parsed {
	Doctype {
		name: String,
		system_id: Option<String>,
		public_id: Option<String>,
	},
	Entity {
		name: String,
		is_param: bool,
		value: Option<String>,
		system_id: Option<String>,
		public_id: Option<String>,
		notation: Option<String>,
	},
	Notation {
		name: String,
		system_id: Option<String>,
		public_id: Option<String>,
	},
	Element {
		name: String,
		model: ContentModel,
	},
	Attlist {
		element: String,
		atts: Vec<AttDecl>,
	},
}

const ATT_TYPES: &[&str] = &[
	"CDATA", "ID", "IDREF", "IDREFS", "ENTITY", "ENTITIES", "NMTOKEN", "NMTOKENS",
];

/// Check a public identifier and collapse its whitespace.
fn public_id(raw: &str) -> Result<String> {
	let valid = raw
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || " \r\n-'()+,./:=?;!*#@$_%".contains(c));
	if !valid {
		return Err(Error::Publicid);
	}
	Ok(raw
		.split(|c| c == ' ' || c == '\r' || c == '\n')
		.filter(|s| !s.is_empty())
		.collect::<Vec<_>>()
		.join(" "))
}

struct Toks<'x> {
	toks: &'x [DeclTok],
	pool: &'x StringPool,
	at: usize,
}

impl<'x> Toks<'x> {
	fn peek(&self) -> Option<DeclTok> {
		self.toks.get(self.at).copied()
	}

	fn next(&mut self) -> Result<DeclTok> {
		let t = self.peek().ok_or(Error::Syntax)?;
		self.at += 1;
		Ok(t)
	}

	fn name(&mut self) -> Result<&'x str> {
		match self.next()? {
			DeclTok::Name(s, Quantifier::One) => Ok(self.pool.get(s)),
			_ => Err(Error::Syntax),
		}
	}

	fn literal(&mut self) -> Result<&'x str> {
		match self.next()? {
			DeclTok::Literal(s) => Ok(self.pool.get(s)),
			_ => Err(Error::Syntax),
		}
	}

	fn keyword(&mut self, kw: &str) -> bool {
		match self.peek() {
			Some(DeclTok::Name(s, Quantifier::One)) if self.pool.get(s) == kw => {
				self.at += 1;
				true
			}
			_ => false,
		}
	}

	fn end(&self) -> Result<()> {
		if self.at >= self.toks.len() {
			Ok(())
		} else {
			Err(Error::Syntax)
		}
	}

	/// `SYSTEM` or `PUBLIC` identifiers; returns `(system, public)`.
	///
	/// With `public_only`, the system literal after `PUBLIC` is optional.
	fn external_id(&mut self, public_only: bool) -> Result<(Option<String>, Option<String>)> {
		if self.keyword("SYSTEM") {
			return Ok((Some(self.literal()?.to_string()), None));
		}
		if !self.keyword("PUBLIC") {
			return Ok((None, None));
		}
		let public = public_id(self.literal()?)?;
		let system = match self.peek() {
			Some(DeclTok::Literal(_)) => Some(self.literal()?.to_string()),
			_ if public_only => None,
			_ => return Err(Error::Syntax),
		};
		Ok((system, Some(public)))
	}

	/// `(a|b)` after the opening parenthesis.
	fn enumeration(&mut self, out: &mut String) -> Result<()> {
		out.push('(');
		loop {
			match self.next()? {
				DeclTok::Name(s, Quantifier::One) | DeclTok::Nmtoken(s) => out.push_str(self.pool.get(s)),
				_ => return Err(Error::Syntax),
			}
			match self.next()? {
				DeclTok::Or => out.push('|'),
				DeclTok::CloseParen(Quantifier::One) => {
					out.push(')');
					return Ok(());
				}
				_ => return Err(Error::Syntax),
			}
		}
	}

	fn particle(&mut self) -> Result<ContentModel> {
		match self.next()? {
			DeclTok::Name(s, quant) => Ok(ContentModel {
				kind: ContentKind::Name,
				quant,
				name: Some(self.pool.get(s).to_string()),
				children: Vec::new(),
			}),
			DeclTok::OpenParen => self.group(),
			_ => Err(Error::Syntax),
		}
	}

	/// Choice or sequence after the opening parenthesis.
	fn group(&mut self) -> Result<ContentModel> {
		let mut kind = None;
		let mut children = vec![self.particle()?];
		loop {
			let sep = match self.next()? {
				DeclTok::Comma => ContentKind::Seq,
				DeclTok::Or => ContentKind::Choice,
				DeclTok::CloseParen(quant) => {
					return Ok(ContentModel {
						kind: kind.unwrap_or(ContentKind::Seq),
						quant,
						name: None,
						children,
					})
				}
				_ => return Err(Error::Syntax),
			};
			match kind {
				Some(k) if k != sep => return Err(Error::Syntax),
				_ => kind = Some(sep),
			}
			children.push(self.particle()?);
		}
	}

	fn content_model(&mut self) -> Result<ContentModel> {
		match self.next()? {
			DeclTok::Name(s, Quantifier::One) if self.pool.get(s) == "EMPTY" => {
				Ok(ContentModel::leaf(ContentKind::Empty))
			}
			DeclTok::Name(s, Quantifier::One) if self.pool.get(s) == "ANY" => {
				Ok(ContentModel::leaf(ContentKind::Any))
			}
			DeclTok::OpenParen => match self.peek() {
				Some(DeclTok::Pound(s)) if self.pool.get(s) == "PCDATA" => {
					self.at += 1;
					let mut mixed = ContentModel::leaf(ContentKind::Mixed);
					loop {
						match self.next()? {
							DeclTok::Or => {
								let name = self.name()?;
								mixed.children.push(ContentModel {
									kind: ContentKind::Name,
									quant: Quantifier::One,
									name: Some(name.to_string()),
									children: Vec::new(),
								});
							}
							DeclTok::CloseParen(Quantifier::ZeroOrMore) => {
								mixed.quant = Quantifier::ZeroOrMore;
								return Ok(mixed);
							}
							DeclTok::CloseParen(Quantifier::One) if mixed.children.is_empty() => {
								return Ok(mixed)
							}
							_ => return Err(Error::Syntax),
						}
					}
				}
				_ => self.group(),
			},
			_ => Err(Error::Syntax),
		}
	}

	fn attlist(&mut self) -> Result<Parsed> {
		let element = self.name()?.to_string();
		let mut atts = Vec::new();
		while self.peek().is_some() {
			let name = self.name()?.to_string();
			let mut att_type = String::new();
			match self.next()? {
				DeclTok::Name(s, Quantifier::One) if self.pool.get(s) == "NOTATION" => {
					att_type.push_str("NOTATION");
					if self.next()? != DeclTok::OpenParen {
						return Err(Error::Syntax);
					}
					self.enumeration(&mut att_type)?;
				}
				DeclTok::Name(s, Quantifier::One) if ATT_TYPES.contains(&self.pool.get(s)) => {
					att_type.push_str(self.pool.get(s));
				}
				DeclTok::OpenParen => self.enumeration(&mut att_type)?,
				_ => return Err(Error::Syntax),
			}
			let (default, required) = match self.next()? {
				DeclTok::Pound(s) => match self.pool.get(s) {
					"REQUIRED" => (None, true),
					"IMPLIED" => (None, false),
					"FIXED" => (Some(self.literal()?.to_string()), true),
					_ => return Err(Error::Syntax),
				},
				DeclTok::Literal(s) => (Some(self.pool.get(s).to_string()), false),
				_ => return Err(Error::Syntax),
			};
			atts.push(AttDecl {
				name,
				att_type,
				default,
				required,
			});
		}
		Ok(Parsed::Attlist { element, atts })
	}

	fn parse(mut self, kind: DeclKind) -> Result<Parsed> {
		let parsed = match kind {
			DeclKind::Doctype => {
				let name = self.name()?.to_string();
				let (system_id, public_id) = self.external_id(false)?;
				Parsed::Doctype {
					name,
					system_id,
					public_id,
				}
			}
			DeclKind::Entity => {
				let is_param = self.peek() == Some(DeclTok::Percent);
				if is_param {
					self.at += 1;
				}
				let name = self.name()?.to_string();
				if let Some(DeclTok::Literal(_)) = self.peek() {
					let value = Some(self.literal()?.to_string());
					Parsed::Entity {
						name,
						is_param,
						value,
						system_id: None,
						public_id: None,
						notation: None,
					}
				} else {
					let (system_id, public_id) = self.external_id(false)?;
					if system_id.is_none() {
						return Err(Error::Syntax);
					}
					let notation = if self.keyword("NDATA") {
						if is_param {
							return Err(Error::Syntax);
						}
						Some(self.name()?.to_string())
					} else {
						None
					};
					Parsed::Entity {
						name,
						is_param,
						value: None,
						system_id,
						public_id,
						notation,
					}
				}
			}
			DeclKind::Notation => {
				let name = self.name()?.to_string();
				let (system_id, public_id) = self.external_id(true)?;
				if system_id.is_none() && public_id.is_none() {
					return Err(Error::Syntax);
				}
				Parsed::Notation {
					name,
					system_id,
					public_id,
				}
			}
			DeclKind::Element => {
				let name = self.name()?.to_string();
				let model = self.content_model()?;
				Parsed::Element { name, model }
			}
			DeclKind::Attlist => self.attlist()?,
		};
		self.end()?;
		Ok(parsed)
	}
}

fn custom_encoding<H: Handler + ?Sized>(h: &mut H, name: &str) -> Result<Encoding> {
	match h.unknown_encoding(name) {
		Some(map) => {
			map.validate().map_err(|_| Error::UnknownEncoding)?;
			debug!("using application-provided decoder for {:?}", name);
			Ok(Encoding::Custom(Arc::new(map)))
		}
		None => Err(Error::UnknownEncoding),
	}
}

impl<'d> Core<'d> {
	/// Detect the encoding and read the XML or text declaration.
	pub(super) fn start_step<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<Step> {
		if !self.input.detected {
			let is_final = self.input.is_final;
			let forced = self.opts.encoding.clone();
			let found = match forced.as_deref() {
				Some(name) => match resolve_override(name, self.input.unconsumed(), is_final) {
					Some(s) => s,
					None => Sniff::Found(custom_encoding(h, name)?, 0),
				},
				None => sniff(self.input.unconsumed(), is_final),
			};
			let (enc, bom) = match found {
				Sniff::Need => return Ok(Step::NeedMore),
				Sniff::Found(enc, bom) => (enc, bom),
			};
			debug!("detected encoding {} ({} byte BOM)", enc.name(), bom);
			self.input.enc = enc;
			self.input.bom = bom;
			self.input.pos += bom;
			self.input.detected = true;
			self.pos.start_at(self.input.abs(self.input.pos));
		}
		let start = self.input.pos;
		let is_final = self.input.is_final;
		let at_decl = {
			let s = Scanner::new(&self.input.buf, &self.input.enc, start, is_final, false);
			s.at_xml_decl()
		};
		let has_decl = match at_decl {
			Ok(v) => v,
			Err(Stop::Partial) if !is_final => return Ok(Step::NeedMore),
			Err(_) => false,
		};
		if has_decl {
			let (result, end) = {
				let mut s = Scanner::new(&self.input.buf, &self.input.enc, start, is_final, false);
				let r = s.prolog_token();
				(r, s.pos)
			};
			match result {
				Ok(Some(PrologToken::Pi { xml: true, .. })) => (),
				Ok(_) => return Err(self.error_at(&Src::Input, start, Error::InvalidToken)),
				Err(Stop::Partial) if !is_final => return Ok(Step::NeedMore),
				Err(e) => return Err(self.stop_error(&Src::Input, e, start)),
			}
			self.xml_decl(h, start, end)?;
		}
		self.doc.phase = match self.mode {
			Mode::Document => {
				self.doc.prolog = Prolog::Misc;
				Phase::Prolog
			}
			Mode::Content => Phase::Content,
			Mode::Subset => {
				self.doc.prolog = Prolog::ExternalSubset;
				Phase::Prolog
			}
		};
		Ok(Step::Continue)
	}

	fn xml_decl<H: Handler + ?Sized>(&mut self, h: &mut H, start: usize, end: usize) -> Result<()> {
		let text = self.input.enc.decode_str(&self.input.buf[start..end]).into_owned();
		let info = match parse_xml_decl(&text, self.mode != Mode::Document) {
			Ok(info) => info,
			Err(e) => return Err(self.error_at(&Src::Input, start, e)),
		};
		self.input.pos = end;
		self.set_event(&Src::Input, start, end);
		if self.mode == Mode::Document && info.standalone == Some(true) {
			self.dtd.get_mut().standalone = true;
			if self.opts.pe_parsing == ParamEntityParsing::UnlessStandalone {
				self.opts.pe_parsing = ParamEntityParsing::Never;
			}
		}
		emit!(self, h, &Raw::Input(start..end), |cx| h.xml_decl(
			&mut cx,
			info.version.as_deref(),
			info.encoding.as_deref(),
			info.standalone
		));
		if self.opts.encoding.is_some() {
			return Ok(());
		}
		let name = match info.encoding.as_deref() {
			Some(name) => name,
			None => return Ok(()),
		};
		let enc = match switch_for_declaration(name, &self.input.enc, self.input.bom > 0) {
			Ok(Some(enc)) => enc,
			Ok(None) if self.input.enc.is_utf16() => {
				return Err(self.error_at(&Src::Input, start, Error::IncorrectEncoding))
			}
			Ok(None) => match custom_encoding(h, name) {
				Ok(enc) => enc,
				Err(e) => return Err(self.error_at(&Src::Input, start, e)),
			},
			Err(e) => return Err(self.error_at(&Src::Input, start, e)),
		};
		if enc != self.input.enc {
			debug!("switching encoding from {} to {}", self.input.enc.name(), enc.name());
		}
		self.input.enc = enc;
		Ok(())
	}

	pub(super) fn prolog_step<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<Step> {
		if self.doc.prolog == Prolog::Ignore {
			return self.ignore_step(h);
		}
		let (src, start) = self.top_src();
		let ns = self.opts.separator.is_some();
		let (result, end) = {
			let mut s = scanner(&self.input, &src, start, ns);
			let r = s.prolog_token();
			(r, s.pos)
		};
		let tok = match result {
			Ok(Some(t)) => t,
			Ok(None) => return self.prolog_end(&src),
			Err(Stop::Partial) if matches!(src, Src::Input) && !self.input.is_final => {
				return Ok(Step::NeedMore)
			}
			Err(e) => return Err(self.stop_error(&src, e, start)),
		};
		self.advance(&src, end);
		self.set_event(&src, start, end);
		let raw = Raw::of(&src, start..end);
		if let Some(decl) = self.doc.decl {
			self.decl_token(h, &src, start..end, decl, tok, &raw)?;
			return Ok(Step::Continue);
		}
		match self.doc.prolog {
			Prolog::Misc | Prolog::AfterDoctype => self.misc_token(h, &src, start..end, tok, &raw),
			Prolog::InternalSubset | Prolog::ExternalSubset => {
				self.subset_token(h, &src, start..end, tok, &raw)?;
				Ok(Step::Continue)
			}
			Prolog::AfterSubset => match tok {
				PrologToken::S => {
					self.push_decl_raw(&src, start..end)?;
					Ok(Step::Continue)
				}
				PrologToken::Close => {
					self.push_decl_raw(&src, start..end)?;
					self.close_doctype(h)?;
					Ok(Step::Continue)
				}
				_ => Err(self.error_at(&src, start, Error::Syntax)),
			},
			Prolog::CondSect => {
				self.cond_sect_token(h, &src, start..end, tok, &raw)?;
				Ok(Step::Continue)
			}
			Prolog::Ignore => Err(self.error_at(&src, start, Error::Syntax)),
		}
	}

	/// Decode a token into the declaration pool.
	fn decl_str(&mut self, src: &Src, r: Range<usize>) -> Result<PoolStr> {
		let (buf, enc) = view(&self.input, src);
		enc.decode_into(&buf[r], &mut self.sc.decl_pool, false)?;
		Ok(self.sc.decl_pool.finish())
	}

	fn push_decl_raw(&mut self, src: &Src, r: Range<usize>) -> Result<()> {
		let (buf, enc) = view(&self.input, src);
		enc.decode_into(&buf[r], &mut self.sc.decl_raw, false)
	}

	fn push_tok(&mut self, t: DeclTok) -> Result<()> {
		self.sc.account.grow_vec(&mut self.sc.decl_toks, 1)?;
		self.sc.decl_toks.push(t);
		Ok(())
	}

	fn keyword(&self, src: &Src, r: Range<usize>) -> SmartString {
		let (buf, enc) = view(&self.input, src);
		SmartString::from(&*enc.decode_str(&buf[r]))
	}

	fn open_decl(&mut self, src: &Src, r: Range<usize>, kind: DeclKind) -> Result<()> {
		self.sc.decl_toks.clear();
		self.sc.decl_pool.clear();
		self.sc.decl_raw.clear();
		self.push_decl_raw(src, r)?;
		self.doc.decl = Some(Decl {
			kind,
			keep: self.dtd.get().keep_processing,
		});
		Ok(())
	}

	fn misc_token<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		src: &Src,
		r: Range<usize>,
		tok: PrologToken,
		raw: &Raw,
	) -> Result<Step> {
		match tok {
			PrologToken::S => self.report_default(h, raw)?,
			PrologToken::Pi { xml: true, .. } => {
				return Err(self.error_at(src, r.start, Error::MisplacedXmlPi))
			}
			PrologToken::Pi { target, data, .. } => self.emit_pi(h, src, r.start, r.end, target, data)?,
			PrologToken::Comment(text) => self.emit_comment(h, src, r.start, r.end, text)?,
			PrologToken::DeclOpen(kw)
				if self.doc.prolog == Prolog::Misc
					&& self.keyword(src, kw.clone()).as_str() == "DOCTYPE" =>
			{
				self.open_decl(src, r, DeclKind::Doctype)?;
			}
			PrologToken::InstanceStart => {
				if self.doc.prolog == Prolog::Misc && self.opts.foreign_dtd {
					self.external_subset(h, None, None)?;
				}
				self.doc.phase = Phase::Content;
			}
			_ => return Err(self.error_at(src, r.start, Error::Syntax)),
		}
		Ok(Step::Continue)
	}

	fn subset_token<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		src: &Src,
		r: Range<usize>,
		tok: PrologToken,
		raw: &Raw,
	) -> Result<()> {
		let internal = self.doc.prolog == Prolog::InternalSubset;
		match tok {
			PrologToken::S => self.report_default(h, raw),
			PrologToken::Pi { xml: true, .. } => Err(self.error_at(src, r.start, Error::MisplacedXmlPi)),
			PrologToken::Pi { target, data, .. } => self.emit_pi(h, src, r.start, r.end, target, data),
			PrologToken::Comment(text) => self.emit_comment(h, src, r.start, r.end, text),
			PrologToken::DeclOpen(kw) => {
				let kind = match self.keyword(src, kw).as_str() {
					"ENTITY" => DeclKind::Entity,
					"ATTLIST" => DeclKind::Attlist,
					"ELEMENT" => DeclKind::Element,
					"NOTATION" => DeclKind::Notation,
					_ => return Err(self.error_at(src, r.start, Error::Syntax)),
				};
				self.open_decl(src, r, kind)
			}
			PrologToken::PeRef(name) => {
				if self.param_ref(h, src, r.start, name, true, raw)? {
					self.report_default(h, raw)?;
				}
				Ok(())
			}
			PrologToken::CloseBracket if internal && self.doc.frames.is_empty() => {
				self.sc.decl_raw.clear();
				self.push_decl_raw(src, r)?;
				self.doc.prolog = Prolog::AfterSubset;
				Ok(())
			}
			PrologToken::CondSectOpen if !internal => {
				self.doc.cond_keyword = None;
				self.doc.prolog = Prolog::CondSect;
				self.report_default(h, raw)
			}
			PrologToken::CondSectClose if !internal && self.doc.include_depth > 0 => {
				self.doc.include_depth -= 1;
				self.report_default(h, raw)
			}
			_ => Err(self.error_at(src, r.start, Error::Syntax)),
		}
	}

	fn cond_sect_token<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		src: &Src,
		r: Range<usize>,
		tok: PrologToken,
		raw: &Raw,
	) -> Result<()> {
		match tok {
			PrologToken::S => (),
			PrologToken::PeRef(name) => {
				if !self.param_ref(h, src, r.start, name, false, raw)? {
					return Ok(());
				}
			}
			PrologToken::Name(kw, Quantifier::One) if self.doc.cond_keyword.is_none() => {
				let include = match self.keyword(src, kw).as_str() {
					"INCLUDE" => true,
					"IGNORE" => false,
					_ => return Err(self.error_at(src, r.start, Error::Syntax)),
				};
				self.doc.cond_keyword = Some(include);
			}
			PrologToken::OpenBracket => match self.doc.cond_keyword {
				Some(true) => {
					self.doc.include_depth += 1;
					self.doc.prolog = Prolog::ExternalSubset;
				}
				Some(false) => self.doc.prolog = Prolog::Ignore,
				None => return Err(self.error_at(src, r.start, Error::Syntax)),
			},
			_ => return Err(self.error_at(src, r.start, Error::Syntax)),
		}
		self.report_default(h, raw)
	}

	fn ignore_step<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<Step> {
		let (src, start) = self.top_src();
		let (result, end) = {
			let mut s = scanner(&self.input, &src, start, false);
			let r = s.ignore_section();
			(r, s.pos)
		};
		match result {
			Ok(()) => (),
			Err(Stop::Partial) if matches!(src, Src::Input) && !self.input.is_final => {
				return Ok(Step::NeedMore)
			}
			Err(Stop::Partial) if matches!(src, Src::Text(_)) => {
				return Err(self.error_at(&src, start, Error::IncompletePe))
			}
			Err(e) => return Err(self.stop_error(&src, e, start)),
		}
		self.advance(&src, end);
		self.set_event(&src, start, end);
		self.doc.prolog = Prolog::ExternalSubset;
		self.report_default(h, &Raw::of(&src, start..end))?;
		Ok(Step::Continue)
	}

	/// The current source ran out in the prolog or a DTD subset.
	fn prolog_end(&mut self, src: &Src) -> Result<Step> {
		if let Src::Text(_) = src {
			let between = self.doc.frames.last().map(|f| f.between_decl).unwrap_or(false);
			let open = self.doc.decl.is_some()
				|| matches!(
					self.doc.prolog,
					Prolog::CondSect | Prolog::Ignore | Prolog::AfterSubset
				);
			if between && open {
				let at = self.doc.frames.first().map(|f| f.ref_loc);
				self.ev.start = at;
				self.ev.len = 0;
				return Err(Error::IncompletePe);
			}
			self.pop_frame();
			return Ok(Step::Continue);
		}
		if !self.input.is_final {
			return Ok(Step::NeedMore);
		}
		let at = self.input.buf.len();
		match self.mode {
			Mode::Subset
				if self.doc.prolog == Prolog::ExternalSubset
					&& self.doc.include_depth == 0
					&& self.doc.decl.is_none() =>
			{
				Ok(Step::Done)
			}
			Mode::Subset => Err(self.error_at(src, at, Error::IncompletePe)),
			_ => Err(self.error_at(src, at, Error::NoElements)),
		}
	}

	fn decl_token<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		src: &Src,
		r: Range<usize>,
		decl: Decl,
		tok: PrologToken,
		raw: &Raw,
	) -> Result<()> {
		if let PrologToken::PeRef(name) = &tok {
			if self.mode == Mode::Document {
				return Err(self.error_at(src, r.start, Error::ParamEntityRef));
			}
			if self.param_ref(h, src, r.start, name.clone(), false, raw)? {
				self.push_decl_raw(src, r)?;
			}
			return Ok(());
		}
		self.push_decl_raw(src, r.clone())?;
		let t = match tok {
			PrologToken::S => return Ok(()),
			PrologToken::Close => return self.close_decl(h, decl),
			PrologToken::OpenBracket if decl.kind == DeclKind::Doctype => {
				return self.open_internal_subset(h)
			}
			PrologToken::Literal(lit) => {
				let is_value = decl.kind == DeclKind::Entity
					&& matches!(
						self.sc.decl_toks.as_slice(),
						[DeclTok::Name(..)] | [DeclTok::Percent, DeclTok::Name(..)]
					);
				if is_value {
					if decl.keep {
						self.store_value(h, src, lit)?;
					}
					DeclTok::Literal(self.sc.decl_pool.finish())
				} else {
					DeclTok::Literal(self.decl_str(src, lit)?)
				}
			}
			PrologToken::Name(n, q) => DeclTok::Name(self.decl_str(src, n)?, q),
			PrologToken::Nmtoken(n) => DeclTok::Nmtoken(self.decl_str(src, n)?),
			PrologToken::PoundName(n) => DeclTok::Pound(self.decl_str(src, n)?),
			PrologToken::Percent => DeclTok::Percent,
			PrologToken::OpenParen => DeclTok::OpenParen,
			PrologToken::CloseParen(q) => DeclTok::CloseParen(q),
			PrologToken::Or => DeclTok::Or,
			PrologToken::Comma => DeclTok::Comma,
			_ => return Err(self.error_at(src, r.start, Error::Syntax)),
		};
		self.push_tok(t)
	}

	fn parse_decl(&mut self, kind: DeclKind) -> Result<Parsed> {
		let toks = Toks {
			toks: &self.sc.decl_toks,
			pool: &self.sc.decl_pool,
			at: 0,
		};
		toks.parse(kind)
	}

	fn finish_decl(&mut self) {
		self.doc.decl = None;
		self.sc.decl_toks.clear();
		self.sc.decl_pool.clear();
		self.sc.decl_raw.clear();
	}

	fn open_internal_subset<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<()> {
		let parsed = self.parse_decl(DeclKind::Doctype)?;
		self.begin_doctype(h, parsed, true)?;
		self.finish_decl();
		self.doc.prolog = Prolog::InternalSubset;
		Ok(())
	}

	fn begin_doctype<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		parsed: Parsed,
		has_internal: bool,
	) -> Result<()> {
		let (name, system_id, public_id) = match parsed {
			Parsed::Doctype {
				name,
				system_id,
				public_id,
			} => (name, system_id, public_id),
			_ => return Err(Error::Syntax),
		};
		let dtd = self.dtd.get_mut();
		let doctype = Doctype {
			name: dtd.store(&name)?,
			system_id: system_id.as_deref().map(|s| dtd.store(s)).transpose()?,
			public_id: public_id.as_deref().map(|s| dtd.store(s)).transpose()?,
		};
		if doctype.system_id.is_some()
			&& !self.dtd.get().standalone
			&& self.opts.pe_parsing == ParamEntityParsing::Never
		{
			self.not_standalone(h)?;
		}
		emit!(self, h, &Raw::Decl, |cx| h.start_doctype(
			&mut cx,
			&doctype.name,
			doctype.system_id.as_deref(),
			doctype.public_id.as_deref(),
			has_internal
		));
		self.doc.doctype = Some(doctype);
		self.sc.decl_raw.clear();
		Ok(())
	}

	/// The `>` of the document type declaration.
	fn close_doctype<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<()> {
		let (system_id, public_id) = match self.doc.doctype.as_ref() {
			Some(d) => (d.system_id.clone(), d.public_id.clone()),
			None => (None, None),
		};
		if system_id.is_some() || self.opts.foreign_dtd {
			self.external_subset(h, system_id, public_id)?;
		}
		emit!(self, h, &Raw::Decl, |cx| h.end_doctype(&mut cx));
		self.finish_decl();
		self.doc.prolog = Prolog::AfterDoctype;
		Ok(())
	}

	/// Ask for the external DTD subset, named or foreign.
	fn external_subset<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		system_id: Option<RcPtr<str>>,
		public_id: Option<RcPtr<str>>,
	) -> Result<()> {
		let named = system_id.is_some();
		let had = self.dtd.get().has_param_entity_refs;
		self.dtd.get_mut().has_param_entity_refs = true;
		if self.opts.pe_parsing != ParamEntityParsing::Never {
			self.dtd.get_mut().param_entity_read = false;
			let entity = ExternalEntity {
				name: None,
				is_param: true,
				base: self.opts.base.as_deref().map(|s| s.to_string()),
				system_id: system_id.as_deref().map(|s| s.to_string()),
				public_id: public_id.as_deref().map(|s| s.to_string()),
			};
			debug!("requesting external subset {:?}", entity.system_id);
			self.external_ref(h, &entity, &Raw::None)?;
			if self.dtd.get().param_entity_read {
				self.check_standalone(h)?;
			} else if !named {
				self.dtd.get_mut().has_param_entity_refs = had;
			}
		}
		self.opts.foreign_dtd = false;
		Ok(())
	}

	fn check_standalone<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<()> {
		if self.dtd.get().standalone {
			Ok(())
		} else {
			self.not_standalone(h)
		}
	}

	fn stop_processing(&mut self) {
		let dtd = self.dtd.get_mut();
		dtd.keep_processing = dtd.standalone;
	}

	/**
	Handle a parameter entity reference.

	`between` is true for references between markup declarations. Returns
	true if the reference was neither expanded nor reported, in which case
	the caller passes its text on to the default handler.
	*/
	fn param_ref<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		src: &Src,
		start: usize,
		name: Range<usize>,
		between: bool,
		raw: &Raw,
	) -> Result<bool> {
		let name = self.keyword(src, name);
		self.dtd.get_mut().has_param_entity_refs = true;
		if self.opts.pe_parsing == ParamEntityParsing::Never {
			self.stop_processing();
			self.check_standalone(h)?;
			return Ok(true);
		}
		let check = self.mode == Mode::Document
			&& self.dtd.get().standalone
			&& self.doc.frames.is_empty();
		let e = match self.dtd.get().entity(&name, true) {
			Some(e) => e.clone(),
			None if check => return Err(self.error_at(src, start, Error::UndefinedEntity)),
			None => {
				self.stop_processing();
				if between {
					emit!(self, h, raw, |cx| h.skipped_entity(&mut cx, &name, true));
					return Ok(false);
				}
				return Ok(true);
			}
		};
		if check && !e.is_internal {
			return Err(self.error_at(src, start, Error::EntityDeclaredInPe));
		}
		if e.open {
			return Err(self.error_at(src, start, Error::RecursiveEntityRef));
		}
		if let Some(text) = e.text {
			let loc = self.loc(src, start);
			self.push_frame(e.name.clone(), text, true, between, loc)?;
			return Ok(false);
		}
		if self.read_external_param(h, &e, raw)? {
			self.check_standalone(h)?;
		}
		Ok(false)
	}

	/// Ask for an external parameter entity; returns whether it was read.
	fn read_external_param<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		e: &Entity,
		raw: &Raw,
	) -> Result<bool> {
		self.dtd.get_mut().param_entity_read = false;
		let entity = ExternalEntity {
			name: Some(e.name.to_string()),
			is_param: true,
			base: e.base.as_deref().map(|s| s.to_string()),
			system_id: e.system_id.as_deref().map(|s| s.to_string()),
			public_id: e.public_id.as_deref().map(|s| s.to_string()),
		};
		self.dtd.get_mut().set_open(&e.name, true, true);
		let r = self.external_ref(h, &entity, raw);
		self.dtd.get_mut().set_open(&e.name, true, false);
		r?;
		if self.dtd.get().param_entity_read {
			Ok(true)
		} else {
			self.stop_processing();
			Ok(false)
		}
	}

	/**
	Append the replacement text of an entity value literal to the string
	under construction in the declaration pool.

	Returns false if an undeclared parameter entity was referenced; the
	value read so far is kept.
	*/
	fn store_value<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		src: &Src,
		range: Range<usize>,
	) -> Result<bool> {
		let mut parts = Vec::new();
		{
			let (buf, enc) = view(&self.input, src);
			let mut s = Scanner::new(&buf[..range.end], enc, range.start, true, false);
			loop {
				match s.entity_value_part() {
					Ok(Some(p)) => {
						self.sc.account.grow_vec(&mut parts, 1)?;
						parts.push(p);
					}
					Ok(None) => break,
					Err(e) => return Err(scan_error(e)),
				}
			}
		}
		for part in parts {
			match part {
				ValuePart::Data(r) => {
					let (buf, enc) = view(&self.input, src);
					enc.decode_into(&buf[r], &mut self.sc.decl_pool, true)?;
				}
				ValuePart::CharRef(v) => {
					let c = char_ref(v).ok_or(Error::BadCharRef)?;
					self.sc.decl_pool.push(c)?;
				}
				ValuePart::EntityRef(whole, _) => {
					let (buf, enc) = view(&self.input, src);
					enc.decode_into(&buf[whole], &mut self.sc.decl_pool, false)?;
				}
				ValuePart::PeRef(r) => {
					if self.mode == Mode::Document && matches!(src, Src::Input) {
						return Err(Error::ParamEntityRef);
					}
					let name = self.keyword(src, r);
					let e = match self.dtd.get().entity(&name, true) {
						Some(e) => e.clone(),
						None => {
							self.stop_processing();
							return Ok(false);
						}
					};
					if e.open {
						return Err(Error::RecursiveEntityRef);
					}
					match e.text.clone() {
						Some(text) => {
							log::trace!("expanding parameter entity {:?} in entity value", name);
							self.dtd.get_mut().set_open(&name, true, true);
							let r = self.store_value(h, &Src::Text(text.clone()), 0..text.len());
							self.dtd.get_mut().set_open(&name, true, false);
							if !r? {
								return Ok(false);
							}
						}
						None => {
							self.read_external_param(h, &e, &Raw::None)?;
						}
					}
				}
			}
		}
		Ok(true)
	}

	fn close_decl<H: Handler + ?Sized>(&mut self, h: &mut H, decl: Decl) -> Result<()> {
		let parsed = self.parse_decl(decl.kind)?;
		match parsed {
			Parsed::Doctype { .. } => {
				self.begin_doctype(h, parsed, false)?;
				return self.close_doctype(h);
			}
			Parsed::Entity {
				name,
				is_param,
				value,
				system_id,
				public_id,
				notation,
			} => {
				let declared = if decl.keep {
					let is_internal = self.mode == Mode::Document && self.doc.frames.is_empty();
					let base = self.opts.base.clone();
					let dtd = self.dtd.get_mut();
					let entity = Entity {
						name: dtd.store(&name)?,
						text: value.as_deref().map(|s| dtd.store(s)).transpose()?,
						system_id: system_id.as_deref().map(|s| dtd.store(s)).transpose()?,
						public_id: public_id.as_deref().map(|s| dtd.store(s)).transpose()?,
						base,
						notation: notation.as_deref().map(|s| dtd.store(s)).transpose()?,
						is_param,
						is_internal,
						open: false,
					};
					dtd.declare_entity(entity)?
				} else {
					false
				};
				if declared {
					emit!(self, h, &Raw::Decl, |cx| h.entity_decl(
						&mut cx,
						&EntityDecl {
							name: &name,
							is_param,
							value: value.as_deref(),
							base: self.opts.base.as_deref(),
							system_id: system_id.as_deref(),
							public_id: public_id.as_deref(),
							notation: notation.as_deref(),
						}
					));
				} else {
					self.report_default(h, &Raw::Decl)?;
				}
			}
			Parsed::Notation {
				name,
				system_id,
				public_id,
			} => {
				emit!(self, h, &Raw::Decl, |cx| h.notation_decl(
					&mut cx,
					&name,
					self.opts.base.as_deref(),
					system_id.as_deref(),
					public_id.as_deref()
				));
			}
			Parsed::Element { name, model } => {
				emit!(self, h, &Raw::Decl, |cx| h.element_decl(&mut cx, &name, &model));
			}
			Parsed::Attlist { element, atts } => {
				if !decl.keep || atts.is_empty() {
					self.report_default(h, &Raw::Decl)?;
				} else {
					self.attlist(h, &element, atts)?;
				}
			}
		}
		self.finish_decl();
		Ok(())
	}

	fn attlist<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		element: &str,
		atts: Vec<AttDecl>,
	) -> Result<()> {
		let check = {
			let dtd = self.dtd.get();
			self.mode == Mode::Document
				&& if dtd.standalone {
					self.doc.frames.is_empty()
				} else {
					!dtd.has_param_entity_refs
				}
		};
		let mut want = false;
		for a in atts.iter() {
			let is_cdata = a.att_type == "CDATA";
			let default = match a.default.as_deref() {
				Some(raw) => {
					att_value(
						self.dtd.get(),
						&mut self.sc.value_pool,
						raw.as_bytes(),
						&UTF8,
						0..raw.len(),
						is_cdata,
						check,
					)?;
					let v = self.sc.value_pool.current().to_string();
					self.sc.value_pool.clear();
					Some(v)
				}
				None => None,
			};
			let dtd = self.dtd.get_mut();
			let def = AttributeDef {
				name: dtd.store(&a.name)?,
				is_cdata,
				is_id: a.att_type == "ID",
				default: default.as_deref().map(|s| dtd.store(s)).transpose()?,
			};
			dtd.define_attribute(element, def)?;
			want |= invoke!(self, |cx| h.attlist_decl(
				&mut cx,
				element,
				&a.name,
				&a.att_type,
				default.as_deref(),
				a.required
			));
		}
		if want {
			self.report_default(h, &Raw::Decl)?;
		}
		Ok(())
	}

	/// Misc items after the document element.
	pub(super) fn epilog_step<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<Step> {
		let start = self.input.pos;
		let ns = self.opts.separator.is_some();
		let (result, end) = {
			let mut s = scanner(&self.input, &Src::Input, start, ns);
			let r = s.prolog_token();
			(r, s.pos)
		};
		let tok = match result {
			Ok(Some(t)) => t,
			Ok(None) if self.input.is_final => return Ok(Step::Done),
			Ok(None) => return Ok(Step::NeedMore),
			Err(Stop::Partial) if !self.input.is_final => return Ok(Step::NeedMore),
			Err(e) => return Err(self.stop_error(&Src::Input, e, start)),
		};
		self.advance(&Src::Input, end);
		self.set_event(&Src::Input, start, end);
		match tok {
			PrologToken::S => self.report_default(h, &Raw::Input(start..end))?,
			PrologToken::Pi { xml: true, .. } => {
				return Err(self.error_at(&Src::Input, start, Error::MisplacedXmlPi))
			}
			PrologToken::Pi { target, data, .. } => {
				self.emit_pi(h, &Src::Input, start, end, target, data)?
			}
			PrologToken::Comment(text) => self.emit_comment(h, &Src::Input, start, end, text)?,
			_ => return Err(self.error_at(&Src::Input, start, Error::JunkAfterDocElement)),
		}
		Ok(Step::Continue)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alloc::system;

	fn toks(pool: &mut StringPool, src: &[&str]) -> Vec<DeclTok> {
		src.iter()
			.map(|t| match *t {
				"(" => DeclTok::OpenParen,
				")" => DeclTok::CloseParen(Quantifier::One),
				")*" => DeclTok::CloseParen(Quantifier::ZeroOrMore),
				")+" => DeclTok::CloseParen(Quantifier::OneOrMore),
				"|" => DeclTok::Or,
				"," => DeclTok::Comma,
				"%" => DeclTok::Percent,
				t if t.starts_with('#') => {
					pool.push_str(&t[1..]).unwrap();
					DeclTok::Pound(pool.finish())
				}
				t if t.starts_with('\'') => {
					pool.push_str(&t[1..]).unwrap();
					DeclTok::Literal(pool.finish())
				}
				t if t.ends_with('?') => {
					pool.push_str(&t[..t.len() - 1]).unwrap();
					DeclTok::Name(pool.finish(), Quantifier::Optional)
				}
				t => {
					pool.push_str(t).unwrap();
					DeclTok::Name(pool.finish(), Quantifier::One)
				}
			})
			.collect()
	}

	fn parse(kind: DeclKind, src: &[&str]) -> Result<Parsed> {
		let mut pool = StringPool::new(system());
		let toks = toks(&mut pool, src);
		Toks {
			toks: &toks,
			pool: &pool,
			at: 0,
		}
		.parse(kind)
	}

	fn model(src: &[&str]) -> String {
		match parse(DeclKind::Element, src) {
			Ok(Parsed::Element { model, .. }) => model.to_string(),
			Ok(_) => panic!("not an element declaration"),
			Err(e) => panic!("unexpected error: {:?}", e),
		}
	}

	#[test]
	fn content_models() {
		assert_eq!(model(&["doc", "EMPTY"]), "EMPTY");
		assert_eq!(model(&["doc", "(", "#PCDATA", ")"]), "(#PCDATA)");
		assert_eq!(model(&["doc", "(", "#PCDATA", "|", "em", ")*"]), "(#PCDATA|em)*");
		assert_eq!(
			model(&["doc", "(", "a", ",", "(", "b?", "|", "c", ")+", ")"]),
			"(a,(b?|c)+)"
		);
	}

	#[test]
	fn mixed_separators_are_rejected() {
		match parse(DeclKind::Element, &["doc", "(", "a", ",", "b", "|", "c", ")"]) {
			Err(Error::Syntax) => (),
			Err(e) => panic!("unexpected error: {:?}", e),
			Ok(_) => panic!("accepted mixed separators"),
		}
		match parse(DeclKind::Element, &["doc", "(", "#PCDATA", "|", "a", ")"]) {
			Err(Error::Syntax) => (),
			Err(e) => panic!("unexpected error: {:?}", e),
			Ok(_) => panic!("accepted mixed content without star"),
		}
	}

	#[test]
	fn entity_declarations() {
		match parse(DeclKind::Entity, &["%", "pe", "'text"]) {
			Ok(Parsed::Entity {
				is_param: true,
				value: Some(v),
				..
			}) => assert_eq!(v, "text"),
			Ok(_) => panic!("wrong declaration"),
			Err(e) => panic!("unexpected error: {:?}", e),
		}
		match parse(DeclKind::Entity, &["img", "PUBLIC", "'-//A//B", "'a.gif", "NDATA", "gif"]) {
			Ok(Parsed::Entity {
				public_id: Some(p),
				system_id: Some(s),
				notation: Some(n),
				..
			}) => {
				assert_eq!(p, "-//A//B");
				assert_eq!(s, "a.gif");
				assert_eq!(n, "gif");
			}
			Ok(_) => panic!("wrong declaration"),
			Err(e) => panic!("unexpected error: {:?}", e),
		}
		match parse(DeclKind::Entity, &["%", "pe", "SYSTEM", "'x", "NDATA", "gif"]) {
			Err(Error::Syntax) => (),
			Err(e) => panic!("unexpected error: {:?}", e),
			Ok(_) => panic!("accepted unparsed parameter entity"),
		}
	}

	#[test]
	fn attribute_lists() {
		match parse(
			DeclKind::Attlist,
			&["el", "a", "CDATA", "#IMPLIED", "b", "(", "x", "|", "y", ")", "'x", "c", "ID", "#REQUIRED", "d", "NOTATION", "(", "n", ")", "#FIXED", "'n"],
		) {
			Ok(Parsed::Attlist { element, atts }) => {
				assert_eq!(element, "el");
				let summary: Vec<_> = atts
					.iter()
					.map(|a| (a.name.as_str(), a.att_type.as_str(), a.default.as_deref(), a.required))
					.collect();
				assert_eq!(
					summary,
					vec![
						("a", "CDATA", None, false),
						("b", "(x|y)", Some("x"), false),
						("c", "ID", None, true),
						("d", "NOTATION(n)", Some("n"), true),
					]
				);
			}
			Ok(_) => panic!("wrong declaration"),
			Err(e) => panic!("unexpected error: {:?}", e),
		}
	}

	#[test]
	fn public_ids_are_checked_and_normalized() {
		assert_eq!(public_id("  -//A//B  \n C ").unwrap(), "-//A//B C");
		match public_id("a{b}") {
			Err(Error::Publicid) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}
}
