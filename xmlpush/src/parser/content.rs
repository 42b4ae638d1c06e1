/*!
# Element content

Character data, references, tags, comments, processing instructions and
CDATA sections, read either from the input or from the replacement text of
an internal entity.
*/
use std::ops::Range;

use smartstring::alias::String as SmartString;

use super::namespaces::split_qname;
use super::{
	char_ref, predefined_entity, scanner, view, AttSlot, Core, Event, Mode, NameSlot, OpenTag,
	PendingAtt, Phase, RcPtr, Raw, Scratch, Src, Step,
};
use crate::dtd::Dtd;
use crate::encoding::{Encoding, UTF8};
use crate::error::{Error, Result};
use crate::handler::{Attributes, ExternalEntity, Handler, Name};
use crate::lexer::{AttrPart, ContentToken, Scanner, Stop};
use crate::pool::StringPool;

pub(super) fn scan_error(stop: Stop) -> Error {
	match stop {
		Stop::Invalid(_) => Error::InvalidToken,
		Stop::PartialChar => Error::PartialChar,
		Stop::UnclosedCdata => Error::UnclosedCdataSection,
		Stop::NoMemory => Error::NoMemory,
		Stop::Partial => Error::UnclosedToken,
	}
}

fn ends_in_space(out: &StringPool) -> bool {
	let cur = out.current();
	cur.is_empty() || cur.ends_with(' ')
}

/// Replacement text of an entity referenced from an attribute value.
struct AttFrame {
	name: RcPtr<str>,
	text: RcPtr<str>,
	pos: usize,
}

fn append_att_value(
	dtd: &Dtd,
	out: &mut StringPool,
	buf: &[u8],
	enc: &Encoding,
	range: Range<usize>,
	is_cdata: bool,
	check: bool,
) -> Result<()> {
	let mut pos = range.start;
	let mut frames: Vec<AttFrame> = Vec::new();
	loop {
		let (part, next) = {
			let mut s = match frames.last() {
				Some(f) => Scanner::new(f.text.as_bytes(), &UTF8, f.pos, true, false),
				None => Scanner::new(&buf[..range.end], enc, pos, true, false),
			};
			(s.attr_value_part(), s.pos)
		};
		let part = match part {
			Ok(Some(p)) => p,
			Ok(None) => match frames.pop() {
				Some(_) => continue,
				None => return Ok(()),
			},
			Err(e) => return Err(scan_error(e)),
		};
		match frames.last_mut() {
			Some(f) => f.pos = next,
			None => pos = next,
		}
		let (src, src_enc): (&[u8], &Encoding) = match frames.last() {
			Some(f) => (f.text.as_bytes(), &UTF8),
			None => (buf, enc),
		};
		match part {
			AttrPart::Data(r) => {
				let mut after_cr = false;
				for c in src_enc.decode_str(&src[r]).chars() {
					match c {
						'\n' if after_cr => after_cr = false,
						' ' | '\t' | '\n' | '\r' => {
							after_cr = c == '\r';
							if is_cdata || !ends_in_space(out) {
								out.push(' ')?;
							}
						}
						c => {
							after_cr = false;
							out.push(c)?;
						}
					}
				}
			}
			AttrPart::CharRef(v) => {
				let c = char_ref(v).ok_or(Error::BadCharRef)?;
				if c == ' ' && !is_cdata && ends_in_space(out) {
					continue;
				}
				out.push(c)?;
			}
			AttrPart::EntityRef(r) => {
				let name = src_enc.decode_str(&src[r]).to_string();
				if let Some(c) = predefined_entity(&name) {
					out.push(c)?;
					continue;
				}
				let e = match dtd.entity(&name, false) {
					Some(e) => e,
					None if check => return Err(Error::UndefinedEntity),
					None => continue,
				};
				if check && !e.is_internal {
					return Err(Error::EntityDeclaredInPe);
				}
				if e.open || frames.iter().any(|f| *f.name == *e.name) {
					return Err(Error::RecursiveEntityRef);
				}
				if e.notation.is_some() {
					return Err(Error::BinaryEntityRef);
				}
				let text = match e.text.as_ref() {
					Some(t) => t.clone(),
					None => return Err(Error::AttributeExternalEntityRef),
				};
				frames.push(AttFrame {
					name: e.name.clone(),
					text,
					pos: 0,
				});
			}
		}
	}
}

/**
Normalize an attribute value into the string under construction of `out`.

References are replaced, whitespace characters become spaces and, for
attributes not of type `CDATA`, runs of spaces are collapsed and leading
and trailing spaces dropped. With `check`, references to undeclared
entities are errors; otherwise they are dropped.
*/
pub(super) fn att_value(
	dtd: &Dtd,
	out: &mut StringPool,
	buf: &[u8],
	enc: &Encoding,
	range: Range<usize>,
	is_cdata: bool,
	check: bool,
) -> Result<()> {
	append_att_value(dtd, out, buf, enc, range, is_cdata, check)?;
	if !is_cdata && out.current().ends_with(' ') {
		out.pop();
	}
	Ok(())
}

/// Write `uri`, `sep`, `local` and optionally `sep`, `prefix` to `pool`.
fn format_name(
	pool: &mut StringPool,
	uri: &str,
	sep: char,
	local: &str,
	prefix: Option<&str>,
) -> Result<NameSlot> {
	pool.push_str(uri)?;
	pool.push(sep)?;
	let ls = uri.len() + sep.len_utf8();
	pool.push_str(local)?;
	let le = ls + local.len();
	let prefix = match prefix {
		Some(p) => {
			pool.push(sep)?;
			let ps = le + sep.len_utf8();
			pool.push_str(p)?;
			Some((ps, ps + p.len()))
		}
		None => None,
	};
	Ok(NameSlot {
		text: pool.finish(),
		namespace: Some((0, uri.len())),
		local: (ls, le),
		prefix,
	})
}

fn same_expanded(pool: &StringPool, a: &NameSlot, b: &NameSlot) -> bool {
	match (a.namespace, b.namespace) {
		(Some(na), Some(nb)) => {
			let (ta, tb) = (pool.get(a.text), pool.get(b.text));
			ta[na.0..na.1] == tb[nb.0..nb.1] && ta[a.local.0..a.local.1] == tb[b.local.0..b.local.1]
		}
		_ => false,
	}
}

impl<'d> Core<'d> {
	pub(super) fn content_step<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<Step> {
		let (src, start) = self.top_src();
		let ns = self.opts.separator.is_some();
		self.sc.raw_attrs.clear();
		let hint = match (&src, self.doc.data_hint.take()) {
			(Src::Input, Some(at)) if at >= self.input.abs(start) => Some((at - self.input.base) as usize),
			_ => None,
		};
		let (result, end, in_data) = {
			let mut s = scanner(&self.input, &src, start, ns);
			let r = match hint {
				Some(at) => s.data_from(at),
				None => s.content_token(&mut self.sc.raw_attrs, &mut self.sc.account),
			};
			(r, s.pos, s.in_data())
		};
		let tok = match result {
			Ok(Some(t)) => t,
			Ok(None) => return self.content_end(&src),
			Err(Stop::Partial) if matches!(src, Src::Input) && !self.input.is_final => {
				if in_data {
					self.doc.data_hint = Some(self.input.abs(end));
				}
				return Ok(Step::NeedMore);
			}
			Err(e) => return Err(self.stop_error(&src, e, start)),
		};
		self.advance(&src, end);
		self.set_event(&src, start, end);
		let raw = Raw::of(&src, start..end);
		match tok {
			ContentToken::Data => {
				let t = {
					let (buf, enc) = view(&self.input, &src);
					enc.decode_into(&buf[start..end], &mut self.sc.data_pool, true)?;
					self.sc.data_pool.finish()
				};
				emit!(self, h, &raw, |cx| h.characters(&mut cx, self.sc.data_pool.get(t)));
				self.sc.data_pool.clear();
			}
			ContentToken::CharRef(v) => {
				let c = match char_ref(v) {
					Some(c) => c,
					None => return Err(self.error_at(&src, start, Error::BadCharRef)),
				};
				let mut b = [0u8; 4];
				emit!(self, h, &raw, |cx| h.characters(&mut cx, c.encode_utf8(&mut b)));
			}
			ContentToken::EntityRef(r) => {
				let name: SmartString = {
					let (buf, enc) = view(&self.input, &src);
					SmartString::from(&*enc.decode_str(&buf[r]))
				};
				match predefined_entity(&name) {
					Some(c) => {
						let mut b = [0u8; 4];
						emit!(self, h, &raw, |cx| h.characters(&mut cx, c.encode_utf8(&mut b)));
					}
					None => self.entity_ref(h, &src, start, &name, &raw)?,
				}
			}
			ContentToken::StartTag { name, empty } => {
				self.start_tag(h, &src, start, end, name, empty, &raw)?;
			}
			ContentToken::EndTag(name) => {
				let base = self.doc.frames.last().map(|f| f.tag_level).unwrap_or(0);
				if self.doc.tags.len() <= base {
					return Err(self.error_at(&src, start, Error::AsyncEntity));
				}
				let matches = {
					let top = &self.doc.tags[self.doc.tags.len() - 1];
					let (buf, enc) = view(&self.input, &src);
					enc.decode_str(&buf[name.clone()]) == self.sc.tag_pool.get(top.raw)
				};
				if !matches {
					return Err(self.error_at(&src, name.start, Error::TagMismatch));
				}
				self.end_element(h, &raw)?;
			}
			ContentToken::Comment(text) => self.emit_comment(h, &src, start, end, text)?,
			ContentToken::Pi { target, data, xml } => {
				if xml {
					return Err(self.error_at(&src, start, Error::MisplacedXmlPi));
				}
				self.emit_pi(h, &src, start, end, target, data)?;
			}
			ContentToken::Cdata(text) => {
				emit!(self, h, &Raw::of(&src, start..text.start), |cx| h
					.start_cdata_section(&mut cx));
				let t = {
					let (buf, enc) = view(&self.input, &src);
					enc.decode_into(&buf[text.clone()], &mut self.sc.data_pool, true)?;
					self.sc.data_pool.finish()
				};
				if !self.sc.data_pool.get(t).is_empty() {
					emit!(self, h, &Raw::of(&src, text.clone()), |cx| h
						.characters(&mut cx, self.sc.data_pool.get(t)));
				}
				self.sc.data_pool.clear();
				emit!(self, h, &Raw::of(&src, text.end..end), |cx| h
					.end_cdata_section(&mut cx));
			}
		}
		Ok(Step::Continue)
	}

	/// The current source ran out while reading content.
	fn content_end(&mut self, src: &Src) -> Result<Step> {
		if let Src::Text(_) = src {
			let level = self.doc.frames.last().map(|f| f.tag_level).unwrap_or(0);
			if self.doc.tags.len() != level {
				let at = self.doc.frames.first().map(|f| f.ref_loc);
				self.ev = Event { start: at, len: 0 };
				return Err(Error::AsyncEntity);
			}
			self.pop_frame();
			return Ok(Step::Continue);
		}
		if !self.input.is_final {
			return Ok(Step::NeedMore);
		}
		let at = self.input.buf.len();
		match self.mode {
			Mode::Content if self.doc.tags.is_empty() => Ok(Step::Done),
			Mode::Content => Err(self.error_at(src, at, Error::AsyncEntity)),
			_ => Err(self.error_at(src, at, Error::NoElements)),
		}
	}

	/// Reference to a general entity other than the predefined ones.
	fn entity_ref<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		src: &Src,
		start: usize,
		name: &str,
		raw: &Raw,
	) -> Result<()> {
		let check = {
			let dtd = self.dtd.get();
			!dtd.has_param_entity_refs || dtd.standalone
		};
		let e = match self.dtd.get().entity(name, false) {
			Some(e) => e.clone(),
			None if check => return Err(self.error_at(src, start, Error::UndefinedEntity)),
			None => {
				emit!(self, h, raw, |cx| h.skipped_entity(&mut cx, name, false));
				return Ok(());
			}
		};
		if check && !e.is_internal {
			return Err(self.error_at(src, start, Error::EntityDeclaredInPe));
		}
		if e.open {
			return Err(self.error_at(src, start, Error::RecursiveEntityRef));
		}
		if e.notation.is_some() {
			return Err(self.error_at(src, start, Error::BinaryEntityRef));
		}
		match e.text {
			Some(text) => {
				if !self.opts.expand_internal {
					emit!(self, h, raw, |cx| h.skipped_entity(&mut cx, name, false));
					return Ok(());
				}
				let loc = self.loc(src, start);
				self.push_frame(e.name.clone(), text, false, false, loc)
			}
			None => {
				let entity = ExternalEntity {
					name: Some(name.to_string()),
					is_param: false,
					base: e.base.as_deref().map(|s| s.to_string()),
					system_id: e.system_id.as_deref().map(|s| s.to_string()),
					public_id: e.public_id.as_deref().map(|s| s.to_string()),
				};
				self.dtd.get_mut().set_open(name, false, true);
				let r = self.external_ref(h, &entity, raw);
				self.dtd.get_mut().set_open(name, false, false);
				r
			}
		}
	}

	fn start_tag<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		src: &Src,
		start: usize,
		end: usize,
		name: Range<usize>,
		empty: bool,
		raw: &Raw,
	) -> Result<()> {
		let check = {
			let dtd = self.dtd.get();
			!dtd.has_param_entity_refs || dtd.standalone
		};
		let tag = {
			let (buf, enc) = view(&self.input, src);
			enc.decode_into(&buf[name], &mut self.sc.tag_pool, false)?;
			self.sc.tag_pool.finish()
		};
		self.sc.att_pool.clear();
		self.sc.pending.clear();
		self.sc.atts.clear();

		// specified attributes, then defaults
		let mut duplicate = None;
		{
			let (buf, enc) = view(&self.input, src);
			let dtd = self.dtd.get();
			let Scratch {
				raw_attrs,
				pending,
				att_pool,
				tag_pool,
				account,
				..
			} = &mut self.sc;
			let el = dtd.element(tag_pool.get(tag));
			for ra in raw_attrs.iter() {
				enc.decode_into(&buf[ra.name.clone()], att_pool, false)?;
				let att = att_pool.finish();
				let att_name = att_pool.get(att);
				if pending.iter().any(|p| att_pool.get(p.raw) == att_name) {
					duplicate = Some(ra.name.start);
					break;
				}
				let def = el.and_then(|e| e.attribute(att_name));
				let (is_cdata, is_id) = match def {
					Some(d) => (d.is_cdata, d.is_id),
					None => (true, false),
				};
				att_value(dtd, att_pool, buf, enc, ra.value.clone(), is_cdata, check)?;
				let value = att_pool.finish();
				account.grow_vec(pending, 1)?;
				pending.push(PendingAtt {
					raw: att,
					value,
					is_id,
				});
			}
			if duplicate.is_none() {
				if let Some(el) = el {
					for def in el.attrs.iter() {
						let default = match def.default.as_ref() {
							Some(d) => d,
							None => continue,
						};
						if pending.iter().any(|p| att_pool.get(p.raw) == &*def.name) {
							continue;
						}
						att_pool.push_str(&def.name)?;
						let att = att_pool.finish();
						att_pool.push_str(default)?;
						let value = att_pool.finish();
						account.grow_vec(pending, 1)?;
						pending.push(PendingAtt {
							raw: att,
							value,
							is_id: def.is_id,
						});
					}
				}
			}
		}
		if let Some(at) = duplicate {
			return Err(self.error_at(src, at, Error::DuplicateAttribute));
		}
		let specified_raw = self.sc.raw_attrs.len();

		let mut bindings = 0;
		let mut specified = 0;
		let mut id = None;
		let element = match self.opts.separator {
			None => {
				for (i, p) in self.sc.pending.iter().enumerate() {
					let len = self.sc.att_pool.get(p.raw).len();
					if p.is_id && i < specified_raw && id.is_none() {
						id = Some(self.sc.atts.len());
					}
					self.sc.account.grow_vec(&mut self.sc.atts, 1)?;
					self.sc.atts.push(AttSlot {
						name: NameSlot::plain(p.raw, len),
						value: p.value,
					});
				}
				specified = specified_raw;
				NameSlot::plain(tag, self.sc.tag_pool.get(tag).len())
			}
			Some(sep) => {
				for p in self.sc.pending.iter() {
					let qn = split_qname(self.sc.att_pool.get(p.raw))?;
					let prefix = match (qn.prefix, qn.local) {
						(Some("xmlns"), local) => Some(local),
						(None, "xmlns") => None,
						_ => continue,
					};
					self.ns.bind(prefix, self.sc.att_pool.get(p.value))?;
					bindings += 1;
				}
				for k in (0..bindings).rev() {
					let _ = invoke!(self, |cx| h.start_namespace_decl(
						&mut cx,
						self.ns.prefix_from_top(k),
						self.ns.uri_from_top(k)
					));
				}
				let triplets = self.opts.triplets;
				for i in 0..self.sc.pending.len() {
					let p = self.sc.pending[i];
					let qname: SmartString = self.sc.att_pool.get(p.raw).into();
					let qn = split_qname(&qname)?;
					let slot = match qn.prefix {
						Some("xmlns") => continue,
						None if qn.local == "xmlns" => continue,
						Some(prefix) => {
							let uri = self.ns.lookup(Some(prefix))?.unwrap_or("");
							let prefix = if triplets { Some(prefix) } else { None };
							format_name(&mut self.sc.att_pool, uri, sep, qn.local, prefix)?
						}
						None => NameSlot::plain(p.raw, qname.len()),
					};
					if self
						.sc
						.atts
						.iter()
						.any(|a| same_expanded(&self.sc.att_pool, &a.name, &slot))
					{
						return Err(self.error_at(src, start, Error::DuplicateAttribute));
					}
					if i < specified_raw {
						specified += 1;
						if p.is_id && id.is_none() {
							id = Some(self.sc.atts.len());
						}
					}
					self.sc.account.grow_vec(&mut self.sc.atts, 1)?;
					self.sc.atts.push(AttSlot {
						name: slot,
						value: p.value,
					});
				}
				let qname: SmartString = self.sc.tag_pool.get(tag).into();
				let qn = split_qname(&qname)?;
				let uri = match qn.prefix {
					Some(prefix) => Some(self.ns.lookup(Some(prefix))?.unwrap_or("")),
					None => self.ns.lookup(None)?,
				};
				match uri {
					Some(uri) => {
						let prefix = if triplets { qn.prefix } else { None };
						format_name(&mut self.sc.tag_pool, uri, sep, qn.local, prefix)?
					}
					None => NameSlot::plain(tag, qname.len()),
				}
			}
		};
		self.doc.specified = specified;
		self.doc.id_index = id;

		emit!(self, h, raw, |cx| h.start_element(
			&mut cx,
			Name::view(&self.sc.tag_pool, &element),
			Attributes::new(&self.sc.att_pool, &self.sc.atts, specified, id)
		));
		self.doc.account.grow_vec(&mut self.doc.tags, 1)?;
		self.doc.tags.push(OpenTag {
			raw: tag,
			name: element,
			bindings,
		});
		if empty {
			self.ev = Event {
				start: Some(self.loc(src, end)),
				len: 0,
			};
			self.end_element(h, &Raw::None)?;
		}
		Ok(())
	}

	/// Report the end of the innermost open element and close its scope.
	fn end_element<H: Handler + ?Sized>(&mut self, h: &mut H, raw: &Raw) -> Result<()> {
		let top = match self.doc.tags.last() {
			Some(t) => *t,
			None => return Ok(()),
		};
		emit!(self, h, raw, |cx| h
			.end_element(&mut cx, Name::view(&self.sc.tag_pool, &top.name)));
		for k in 0..top.bindings {
			let _ = invoke!(self, |cx| h
				.end_namespace_decl(&mut cx, self.ns.prefix_from_top(k)));
		}
		self.ns.pop(top.bindings);
		self.doc.tags.pop();
		self.sc.tag_pool.truncate(top.raw);
		if self.doc.tags.is_empty() && self.mode == Mode::Document && self.doc.frames.is_empty() {
			self.doc.phase = Phase::Epilog;
		}
		Ok(())
	}
}
