/*!
# Push parser

[`Parser`] takes input in chunks of any size and reports what it finds to a
[`Handler`]. Tokens which are cut off by the end of a chunk are held back
until the next chunk arrives, so the sequence of events does not depend on
how the input is split.

Each call which processes input runs until the input is exhausted, an error
occurs or a handler suspends or stops the parser. A suspended parser picks
up where it left off with [`Parser::resume`].

External entities are not read by the parser itself. When one is
referenced, [`Handler::external_entity_ref`] is called, which may create an
[`ExternalEntityParser`] through [`Context::external_entity_parser`] and
feed it the entity's bytes. The subordinate parser shares the declarations
of its parent.
*/
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use log::debug;

use crate::alloc::{Account, Allocator};
use crate::dtd::Dtd;
use crate::encoding::{Encoding, UTF8};
use crate::error::{Error, Result};
use crate::handler::{ExternalEntity, Handler};
use crate::intern::UriCache;
use crate::lexer::{RawAttr, Scanner, Stop};
use crate::pool::{PoolStr, StringPool};

mod common;
mod input;
mod namespaces;

pub use common::{
	ParamEntityParsing, ParserOptions, ParsingStatus, RcPtr, RunState, Status, XMLNS_XML,
	XMLNS_XMLNS,
};
pub(crate) use common::{Control, Options};
use input::{Input, Position};
use namespaces::NamespaceStack;

/// Build a [`Context`] from the disjoint parts of a [`Core`].
macro_rules! context {
	($core:ident, $link:expr) => {
		$crate::parser::Context {
			ctl: &mut $core.ctl,
			pos: &$core.pos,
			ev: &$core.ev,
			input: &$core.input,
			opts: &$core.opts,
			ns: &$core.ns,
			alloc: &$core.alloc,
			link: $link,
			want_default: false,
		}
	};
}

/// Call a handler method; evaluates to whether the handler asked for the
/// event text.
macro_rules! invoke {
	($core:ident, |$cx:ident| $call:expr) => {{
		let mut $cx = context!($core, None);
		$call;
		$cx.want_default
	}};
}

/// Call a handler method and pass `$raw` on to the default handler if it
/// asks for it.
macro_rules! emit {
	($core:ident, $h:ident, $raw:expr, |$cx:ident| $call:expr) => {
		if invoke!($core, |$cx| $call) {
			$core.report_default($h, $raw)?;
		}
	};
}

mod content;
mod prolog;

use prolog::{Decl, DeclTok, Doctype, Prolog};

/// Name as handed out by [`Name`](crate::Name), stored in a pool.
///
/// The ranges are byte ranges into the pooled text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NameSlot {
	pub text: PoolStr,
	pub namespace: Option<(usize, usize)>,
	pub local: (usize, usize),
	pub prefix: Option<(usize, usize)>,
}

impl NameSlot {
	pub(crate) fn plain(text: PoolStr, len: usize) -> NameSlot {
		NameSlot {
			text,
			namespace: None,
			local: (0, len),
			prefix: None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AttSlot {
	pub name: NameSlot,
	pub value: PoolStr,
}

/// Byte range of the current event.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Event {
	/// Absolute offset; `None` before the first event.
	pub start: Option<u64>,
	pub len: usize,
}

/// Where a token was read from.
#[derive(Clone)]
pub(crate) enum Src {
	Input,
	/// Replacement text of an internal entity.
	Text(RcPtr<str>),
}

/// Text which is passed to the default handler on request.
pub(crate) enum Raw {
	None,
	Input(Range<usize>),
	Text(RcPtr<str>, Range<usize>),
	/// The markup declaration collected so far.
	Decl,
}

impl Raw {
	fn of(src: &Src, r: Range<usize>) -> Raw {
		match src {
			Src::Input => Raw::Input(r),
			Src::Text(t) => Raw::Text(t.clone(), r),
		}
	}
}

fn view<'x>(input: &'x Input, src: &'x Src) -> (&'x [u8], &'x Encoding) {
	match src {
		Src::Input => (&input.buf, &input.enc),
		Src::Text(t) => (t.as_bytes(), &UTF8),
	}
}

fn scanner<'x>(input: &'x Input, src: &'x Src, pos: usize, ns: bool) -> Scanner<'x> {
	match src {
		Src::Input => Scanner::new(&input.buf, &input.enc, pos, input.is_final, ns),
		Src::Text(t) => Scanner::new(t.as_bytes(), &UTF8, pos, true, ns),
	}
}

/// The character a reference stands for, if it is allowed in XML.
pub(crate) fn char_ref(v: u32) -> Option<char> {
	char::from_u32(v).filter(|c| xmlpush_validation::selectors::is_xml_char(*c))
}

pub(crate) fn predefined_entity(name: &str) -> Option<char> {
	match name {
		"lt" => Some('<'),
		"gt" => Some('>'),
		"amp" => Some('&'),
		"quot" => Some('"'),
		"apos" => Some('\''),
		_ => None,
	}
}

fn locate(pos: &Position, input: &Input, ev: &Event) -> (u64, u64) {
	match ev.start {
		Some(at) if input.detected => pos.locate(input, at),
		_ => (1, 0),
	}
}

fn input_context<'x>(input: &'x Input, ev: &Event) -> Option<(&'x [u8], usize)> {
	let at = ev.start?;
	if at < input.base {
		return None;
	}
	let off = ((at - input.base) as usize).min(input.buf.len());
	Some((&input.buf[..], off))
}

/// Which kind of entity a parser reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
	Document,
	/// External parsed general entity.
	Content,
	/// External DTD subset or external parameter entity.
	Subset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
	/// Before the encoding and the XML or text declaration are known.
	Start,
	Prolog,
	Content,
	Epilog,
}

enum Step {
	Continue,
	NeedMore,
	Done,
}

pub(crate) enum DtdSlot<'d> {
	Owned(Box<Dtd>),
	Borrowed(&'d mut Dtd),
}

impl DtdSlot<'_> {
	pub(crate) fn get(&self) -> &Dtd {
		match self {
			DtdSlot::Owned(d) => d,
			DtdSlot::Borrowed(d) => d,
		}
	}

	pub(crate) fn get_mut(&mut self) -> &mut Dtd {
		match self {
			DtdSlot::Owned(d) => d,
			DtdSlot::Borrowed(d) => d,
		}
	}
}

/// An element whose end tag has not been seen yet.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OpenTag {
	/// Qualified name as written; the pool is truncated here on close.
	raw: PoolStr,
	name: NameSlot,
	/// Number of namespace bindings declared by the start tag.
	bindings: usize,
}

/// Replacement text of an internal entity being expanded.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
	text: RcPtr<str>,
	pos: usize,
	name: RcPtr<str>,
	is_param: bool,
	/// Number of open elements when the expansion started.
	tag_level: usize,
	/// Parameter entity referenced between markup declarations.
	between_decl: bool,
	/// Position of the outermost reference in the input.
	ref_loc: u64,
}

/// Attribute of the start tag being processed, before namespace
/// resolution.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingAtt {
	raw: PoolStr,
	value: PoolStr,
	is_id: bool,
}

/// Buffers reused across tokens.
pub(crate) struct Scratch {
	raw_attrs: Vec<RawAttr>,
	pending: Vec<PendingAtt>,
	atts: Vec<AttSlot>,
	decl_toks: Vec<DeclTok>,
	account: Account,
	/// Names of open elements.
	tag_pool: StringPool,
	/// Names and values of the current start tag.
	att_pool: StringPool,
	/// Text of the current event.
	data_pool: StringPool,
	def_pool: StringPool,
	/// Names and literals of the current markup declaration.
	decl_pool: StringPool,
	/// Raw text of the current markup declaration.
	decl_raw: StringPool,
	/// Entity and default values being built.
	value_pool: StringPool,
}

impl Scratch {
	fn new(alloc: &Arc<dyn Allocator>) -> Scratch {
		Scratch {
			raw_attrs: Vec::new(),
			pending: Vec::new(),
			atts: Vec::new(),
			decl_toks: Vec::new(),
			account: Account::new(alloc.clone()),
			tag_pool: StringPool::new(alloc.clone()),
			att_pool: StringPool::new(alloc.clone()),
			data_pool: StringPool::new(alloc.clone()),
			def_pool: StringPool::new(alloc.clone()),
			decl_pool: StringPool::new(alloc.clone()),
			decl_raw: StringPool::new(alloc.clone()),
			value_pool: StringPool::new(alloc.clone()),
		}
	}
}

pub(crate) struct DocState {
	phase: Phase,
	prolog: Prolog,
	tags: Vec<OpenTag>,
	frames: Vec<Frame>,
	decl: Option<Decl>,
	/// Keyword of the conditional section being opened.
	cond_keyword: Option<bool>,
	include_depth: usize,
	doctype: Option<Doctype>,
	/// Absolute offset up to which a held-back data run has been checked.
	data_hint: Option<u64>,
	specified: usize,
	id_index: Option<usize>,
	account: Account,
}

impl DocState {
	fn new(alloc: &Arc<dyn Allocator>) -> DocState {
		DocState {
			phase: Phase::Start,
			prolog: Prolog::Misc,
			tags: Vec::new(),
			frames: Vec::new(),
			decl: None,
			cond_keyword: None,
			include_depth: 0,
			doctype: None,
			data_hint: None,
			specified: 0,
			id_index: None,
			account: Account::new(alloc.clone()),
		}
	}
}

/// State of one parser, document or subordinate.
pub(crate) struct Core<'d> {
	ctl: Control,
	pos: Position,
	ev: Event,
	input: Input,
	opts: Options,
	ns: NamespaceStack,
	alloc: Arc<dyn Allocator>,
	dtd: DtdSlot<'d>,
	mode: Mode,
	sc: Scratch,
	doc: DocState,
}

impl Core<'static> {
	fn document(opts: &ParserOptions, encoding: Option<String>) -> Core<'static> {
		let alloc = opts.alloc.clone();
		let cache = match opts.uri_cache.as_ref() {
			Some(c) => c.clone(),
			None => RcPtr::new(UriCache::new()),
		};
		let ns = NamespaceStack::new(alloc.clone(), cache);
		let dtd = DtdSlot::Owned(Box::new(Dtd::new(alloc.clone(), 0)));
		Core::build(
			Options::new(encoding, opts.separator),
			alloc,
			ns,
			dtd,
			Mode::Document,
		)
	}
}

impl<'d> Core<'d> {
	fn build(
		opts: Options,
		alloc: Arc<dyn Allocator>,
		ns: NamespaceStack,
		dtd: DtdSlot<'d>,
		mode: Mode,
	) -> Core<'d> {
		let pos = Position::default();
		pos.start_at(0);
		Core {
			ctl: Control::new(mode == Mode::Subset),
			pos,
			ev: Event::default(),
			input: Input::new(alloc.clone()),
			opts,
			ns,
			sc: Scratch::new(&alloc),
			doc: DocState::new(&alloc),
			alloc,
			dtd,
			mode,
		}
	}

	fn begin(&mut self) {
		if let DtdSlot::Owned(dtd) = &mut self.dtd {
			let salt = match self.opts.salt {
				Some(s) => s,
				None => rand::random(),
			};
			**dtd = Dtd::new(self.alloc.clone(), salt);
		}
		if self.mode == Mode::Subset {
			self.dtd.get_mut().param_entity_read = true;
		}
		self.ctl.state = RunState::Parsing;
	}

	fn start_run(&mut self, is_final: bool) {
		if self.ctl.state == RunState::Initialized {
			self.begin();
		}
		self.ctl.state = RunState::Parsing;
		self.ctl.final_buffer = is_final;
		self.input.is_final = is_final;
	}

	/// Drop consumed input which is no longer referenced.
	fn compact(&mut self) {
		let mut keep = self.input.abs(self.input.pos);
		if let Some(f) = self.doc.frames.first() {
			keep = keep.min(f.ref_loc);
		}
		if let Some(s) = self.ev.start {
			keep = keep.min(s);
		}
		self.input.compact(keep, &self.pos);
	}

	fn feed<H: Handler + ?Sized>(&mut self, h: &mut H, data: &[u8], is_final: bool) -> Result<Status> {
		self.ctl.check_feed()?;
		self.compact();
		if let Err(e) = self.input.append(data) {
			return Err(self.fail(e));
		}
		self.start_run(is_final);
		self.run(h)
	}

	fn get_buffer(&mut self, len: usize) -> Result<&mut [u8]> {
		self.ctl.check_feed()?;
		self.compact();
		self.input.get_buffer(len)
	}

	fn feed_buffer<H: Handler + ?Sized>(&mut self, h: &mut H, len: usize, is_final: bool) -> Result<Status> {
		self.ctl.check_feed()?;
		self.input.commit_buffer(len)?;
		self.start_run(is_final);
		self.run(h)
	}

	fn resume<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<Status> {
		if let Some(e) = self.ctl.error.as_ref() {
			return Err(e.clone());
		}
		if self.ctl.state != RunState::Suspended {
			return Err(Error::NotSuspended);
		}
		debug!("resuming parser");
		self.ctl.state = RunState::Parsing;
		self.run(h)
	}

	fn stop(&mut self, resumable: bool) -> Result<()> {
		self.ctl.stop(resumable)?;
		debug!("parser stopped (resumable: {})", resumable);
		Ok(())
	}

	/// Record a terminal error.
	fn fail(&mut self, e: Error) -> Error {
		if !e.is_api_misuse() {
			debug!("parse error: {}", e);
			self.ctl.error = Some(e.clone());
			self.ctl.state = RunState::Finished;
		}
		e
	}

	/// Point the current event at the resume position.
	fn settle(&mut self) {
		let at = match self.doc.frames.first() {
			Some(f) => f.ref_loc,
			None => self.input.abs(self.input.pos),
		};
		self.ev = Event {
			start: Some(at),
			len: 0,
		};
	}

	fn run<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<Status> {
		loop {
			let step = match self.step(h) {
				Ok(s) => s,
				Err(e) => return Err(self.fail(e)),
			};
			if self.ctl.aborted {
				return Err(self.fail(Error::Aborted));
			}
			match self.ctl.state {
				RunState::Suspended => {
					debug!("parser suspended");
					self.settle();
					return Ok(Status::Suspended);
				}
				RunState::Finished => {
					self.settle();
					return Ok(Status::Ok);
				}
				_ => (),
			}
			match step {
				Step::Continue => (),
				Step::NeedMore => {
					self.settle();
					return Ok(Status::Ok);
				}
				Step::Done => {
					self.ctl.state = RunState::Finished;
					self.settle();
					return Ok(Status::Ok);
				}
			}
		}
	}

	fn step<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<Step> {
		match self.doc.phase {
			Phase::Start => self.start_step(h),
			Phase::Prolog => self.prolog_step(h),
			Phase::Content => self.content_step(h),
			Phase::Epilog => self.epilog_step(h),
		}
	}

	/// The source tokens are currently read from and the position in it.
	fn top_src(&self) -> (Src, usize) {
		match self.doc.frames.last() {
			Some(f) => (Src::Text(f.text.clone()), f.pos),
			None => (Src::Input, self.input.pos),
		}
	}

	fn advance(&mut self, src: &Src, to: usize) {
		match src {
			Src::Input => self.input.pos = to,
			Src::Text(_) => {
				if let Some(f) = self.doc.frames.last_mut() {
					f.pos = to;
				}
			}
		}
	}

	/// Absolute position reported for offset `at` of `src`.
	fn loc(&self, src: &Src, at: usize) -> u64 {
		match (src, self.doc.frames.first()) {
			(Src::Text(_), Some(f)) => f.ref_loc,
			_ => self.input.abs(at),
		}
	}

	fn set_event(&mut self, src: &Src, start: usize, end: usize) {
		self.ev = match src {
			Src::Input => Event {
				start: Some(self.input.abs(start)),
				len: end - start,
			},
			Src::Text(_) => Event {
				start: Some(self.loc(src, start)),
				len: 0,
			},
		};
	}

	fn error_at(&mut self, src: &Src, at: usize, e: Error) -> Error {
		self.ev = Event {
			start: Some(self.loc(src, at)),
			len: 0,
		};
		e
	}

	/// Translate a tokenizer failure other than [`Stop::Partial`].
	fn stop_error(&mut self, src: &Src, stop: Stop, start: usize) -> Error {
		match stop {
			Stop::Invalid(at) => self.error_at(src, at, Error::InvalidToken),
			Stop::PartialChar => self.error_at(src, start, Error::PartialChar),
			Stop::UnclosedCdata => self.error_at(src, start, Error::UnclosedCdataSection),
			Stop::NoMemory => Error::NoMemory,
			Stop::Partial => self.error_at(src, start, Error::UnclosedToken),
		}
	}

	fn push_frame(
		&mut self,
		name: RcPtr<str>,
		text: RcPtr<str>,
		is_param: bool,
		between_decl: bool,
		ref_loc: u64,
	) -> Result<()> {
		let ref_loc = match self.doc.frames.first() {
			Some(f) => f.ref_loc,
			None => ref_loc,
		};
		self.doc.account.grow_vec(&mut self.doc.frames, 1)?;
		log::trace!("expanding entity {:?}", name);
		self.dtd.get_mut().set_open(&name, is_param, true);
		self.doc.frames.push(Frame {
			text,
			pos: 0,
			name,
			is_param,
			tag_level: self.doc.tags.len(),
			between_decl,
			ref_loc,
		});
		Ok(())
	}

	fn pop_frame(&mut self) -> Option<Frame> {
		let f = self.doc.frames.pop()?;
		log::trace!("leaving entity {:?}", f.name);
		self.dtd.get_mut().set_open(&f.name, f.is_param, false);
		Some(f)
	}

	/// Pass `raw` to the default handler.
	fn report_default<H: Handler + ?Sized>(&mut self, h: &mut H, raw: &Raw) -> Result<()> {
		self.sc.def_pool.clear();
		match raw {
			Raw::None => return Ok(()),
			Raw::Input(r) => {
				self.input
					.enc
					.decode_into(&self.input.buf[r.clone()], &mut self.sc.def_pool, false)?;
			}
			Raw::Text(t, r) => self.sc.def_pool.push_str(&t[r.clone()])?,
			Raw::Decl => {
				let text = self.sc.decl_raw.current();
				self.sc.def_pool.push_str(text)?;
			}
		}
		let text = self.sc.def_pool.finish();
		if self.sc.def_pool.get(text).is_empty() {
			return Ok(());
		}
		// asking for the default text from within the default handler has
		// no effect
		let _ = invoke!(self, |cx| h.default_text(&mut cx, self.sc.def_pool.get(text)));
		Ok(())
	}

	/// Call the external entity handler.
	///
	/// The handler may create a subordinate parser, which borrows the DTD.
	fn external_ref<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		entity: &ExternalEntity,
		raw: &Raw,
	) -> Result<()> {
		debug!(
			"external entity reference {:?} ({:?})",
			entity.name, entity.system_id
		);
		let (result, want_default) = {
			let link = Link {
				dtd: self.dtd.get_mut(),
				param: entity.is_param,
			};
			let mut cx = context!(self, Some(link));
			let r = h.external_entity_ref(&mut cx, entity);
			(r, cx.want_default)
		};
		if want_default {
			self.report_default(h, raw)?;
		}
		match result {
			Ok(()) => Ok(()),
			Err(e) => {
				debug!("external entity handler failed: {}", e);
				Err(Error::ExternalEntityHandling)
			}
		}
	}

	fn not_standalone<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<()> {
		let accepted = {
			let mut cx = context!(self, None);
			h.not_standalone(&mut cx)
		};
		if accepted {
			Ok(())
		} else {
			Err(Error::NotStandalone)
		}
	}

	fn emit_pi<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		src: &Src,
		start: usize,
		end: usize,
		target: Range<usize>,
		data: Range<usize>,
	) -> Result<()> {
		let (t, d) = {
			let (buf, enc) = view(&self.input, src);
			enc.decode_into(&buf[target], &mut self.sc.data_pool, false)?;
			let t = self.sc.data_pool.finish();
			enc.decode_into(&buf[data], &mut self.sc.data_pool, true)?;
			(t, self.sc.data_pool.finish())
		};
		emit!(self, h, &Raw::of(src, start..end), |cx| h
			.processing_instruction(
				&mut cx,
				self.sc.data_pool.get(t),
				self.sc.data_pool.get(d)
			));
		self.sc.data_pool.clear();
		Ok(())
	}

	fn emit_comment<H: Handler + ?Sized>(
		&mut self,
		h: &mut H,
		src: &Src,
		start: usize,
		end: usize,
		text: Range<usize>,
	) -> Result<()> {
		let t = {
			let (buf, enc) = view(&self.input, src);
			enc.decode_into(&buf[text], &mut self.sc.data_pool, true)?;
			self.sc.data_pool.finish()
		};
		emit!(self, h, &Raw::of(src, start..end), |cx| h
			.comment(&mut cx, self.sc.data_pool.get(t)));
		self.sc.data_pool.clear();
		Ok(())
	}

	fn location(&self) -> (u64, u64) {
		locate(&self.pos, &self.input, &self.ev)
	}

	fn byte_index(&self) -> i64 {
		match self.ev.start {
			Some(at) => at as i64,
			None => -1,
		}
	}
}

/// Access to the parser from within a [`Handler`] method.
pub(crate) struct Link<'a> {
	dtd: &'a mut Dtd,
	param: bool,
}

/**
# Parser access for handlers

Every [`Handler`] method receives a context, through which it can stop the
parser, query the position of the event and route the event's text to the
default handler.
*/
pub struct Context<'a> {
	ctl: &'a mut Control,
	pos: &'a Position,
	ev: &'a Event,
	input: &'a Input,
	opts: &'a Options,
	ns: &'a NamespaceStack,
	alloc: &'a Arc<dyn Allocator>,
	link: Option<Link<'a>>,
	want_default: bool,
}

impl<'a> Context<'a> {
	/// Stop the parser after the current event.
	///
	/// With `resumable`, the parser is suspended and the parse call returns
	/// [`Status::Suspended`]; otherwise it fails with
	/// [`Error::Aborted`].
	pub fn stop(&mut self, resumable: bool) -> Result<()> {
		self.ctl.stop(resumable)
	}

	/// Pass the text of the current event to [`Handler::default_text`] after the
	/// current method returns.
	pub fn default_current(&mut self) {
		self.want_default = true;
	}

	pub fn current_line_number(&self) -> u64 {
		locate(self.pos, self.input, self.ev).0
	}

	pub fn current_column_number(&self) -> u64 {
		locate(self.pos, self.input, self.ev).1
	}

	/// Offset of the current event in the input, or -1 before parsing.
	pub fn current_byte_index(&self) -> i64 {
		match self.ev.start {
			Some(at) => at as i64,
			None => -1,
		}
	}

	/// Number of input bytes of the current event; zero inside entity
	/// replacement text.
	pub fn current_byte_count(&self) -> usize {
		self.ev.len
	}

	/// The buffered input and the offset of the current event in it.
	pub fn input_context(&self) -> Option<(&[u8], usize)> {
		input_context(self.input, self.ev)
	}

	pub fn base(&self) -> Option<&str> {
		self.opts.base.as_deref()
	}

	pub fn parsing_status(&self) -> ParsingStatus {
		self.ctl.status()
	}

	/**
	Create a parser for the external entity being referenced.

	Only available inside [`Handler::external_entity_ref`]; elsewhere this
	fails with [`Error::UnexpectedState`]. `encoding` overrides the
	encoding of the entity like [`ParserOptions::encoding`].
	*/
	pub fn external_entity_parser(
		&mut self,
		encoding: Option<&str>,
	) -> Result<ExternalEntityParser<'_>> {
		let link = match self.link.as_mut() {
			Some(l) => l,
			None => return Err(Error::UnexpectedState),
		};
		let alloc = self.alloc.clone();
		let ns = self.ns.inherit(alloc.clone())?;
		let mut opts = self.opts.clone();
		opts.encoding = encoding.map(|e| e.to_string());
		opts.foreign_dtd = false;
		let mode = if link.param {
			Mode::Subset
		} else {
			Mode::Content
		};
		debug!("creating subordinate parser ({:?})", mode);
		Ok(ExternalEntityParser {
			core: Core::build(opts, alloc, ns, DtdSlot::Borrowed(&mut *link.dtd), mode),
		})
	}
}

impl fmt::Debug for Context<'_> {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Context")
			.field("state", &self.ctl.state)
			.field("event", self.ev)
			.field("external", &self.link.is_some())
			.finish()
	}
}

/**
# XML push parser

```
use xmlpush::{Context, Handler, Name, Attributes, Parser};

#[derive(Default)]
struct Count(usize);

impl Handler for Count {
	fn start_element(&mut self, _cx: &mut Context, _name: Name, _attrs: Attributes) {
		self.0 += 1;
	}
}

let mut p = Parser::new(Count::default());
p.feed(b"<doc><a/>", false).unwrap();
p.feed(b"<b/></doc>", true).unwrap();
assert_eq!(p.handler().0, 3);
```
*/
pub struct Parser<H> {
	handler: H,
	core: Core<'static>,
	opts: ParserOptions,
}

impl<H: Handler> Parser<H> {
	pub fn new(handler: H) -> Parser<H> {
		Parser::with_options(handler, ParserOptions::new())
	}

	/// Create a parser with namespace processing.
	pub fn with_namespaces(handler: H, separator: char) -> Parser<H> {
		Parser::with_options(handler, ParserOptions::new().namespaces(separator))
	}

	pub fn with_options(handler: H, opts: ParserOptions) -> Parser<H> {
		let core = Core::document(&opts, opts.encoding.clone());
		Parser {
			handler,
			core,
			opts,
		}
	}

	pub fn handler(&self) -> &H {
		&self.handler
	}

	pub fn handler_mut(&mut self) -> &mut H {
		&mut self.handler
	}

	pub fn into_handler(self) -> H {
		self.handler
	}

	/// Parse a chunk of the document.
	///
	/// `is_final` marks the last chunk; it may be empty.
	pub fn feed(&mut self, data: &[u8], is_final: bool) -> Result<Status> {
		self.core.feed(&mut self.handler, data, is_final)
	}

	/// Return a buffer of `len` bytes to be filled by the caller and passed
	/// to [`Parser::feed_buffer`].
	pub fn get_buffer(&mut self, len: usize) -> Result<&mut [u8]> {
		self.core.get_buffer(len)
	}

	/// Parse the first `len` bytes of the buffer from
	/// [`Parser::get_buffer`].
	pub fn feed_buffer(&mut self, len: usize, is_final: bool) -> Result<Status> {
		self.core.feed_buffer(&mut self.handler, len, is_final)
	}

	/// Continue after a suspension.
	pub fn resume(&mut self) -> Result<Status> {
		self.core.resume(&mut self.handler)
	}

	/// Stop or suspend the parser from outside a handler.
	pub fn stop(&mut self, resumable: bool) -> Result<()> {
		self.core.stop(resumable)
	}

	/// Return to the state right after construction, keeping the handler and
	/// the construction options; `encoding` replaces the encoding override.
	pub fn reset(&mut self, encoding: Option<&str>) {
		let encoding = encoding.map(|e| e.to_string());
		self.core = Core::document(&self.opts, encoding);
	}

	pub fn parsing_status(&self) -> ParsingStatus {
		self.core.ctl.status()
	}

	/// The error which ended parsing, if any.
	pub fn error(&self) -> Option<&Error> {
		self.core.ctl.error.as_ref()
	}

	pub fn current_line_number(&self) -> u64 {
		self.core.location().0
	}

	pub fn current_column_number(&self) -> u64 {
		self.core.location().1
	}

	pub fn current_byte_index(&self) -> i64 {
		self.core.byte_index()
	}

	pub fn current_byte_count(&self) -> usize {
		self.core.ev.len
	}

	pub fn input_context(&self) -> Option<(&[u8], usize)> {
		input_context(&self.core.input, &self.core.ev)
	}

	/// Number of attributes specified in the last start tag.
	pub fn specified_attribute_count(&self) -> usize {
		self.core.doc.specified
	}

	/// Index of the `ID` attribute of the last start tag.
	pub fn id_attribute_index(&self) -> Option<usize> {
		self.core.doc.id_index
	}

	/// Override the document encoding; only before parsing.
	pub fn set_encoding(&mut self, encoding: Option<&str>) -> Result<()> {
		self.core.ctl.check_unstarted()?;
		self.core.opts.encoding = encoding.map(|e| e.to_string());
		Ok(())
	}

	pub fn set_param_entity_parsing(&mut self, p: ParamEntityParsing) -> Result<()> {
		self.core.ctl.check_unstarted()?;
		self.core.opts.pe_parsing = p;
		Ok(())
	}

	/// Report prefixes as part of namespace-qualified names.
	pub fn set_return_ns_triplet(&mut self, triplets: bool) -> Result<()> {
		self.core.ctl.check_unstarted()?;
		self.core.opts.triplets = triplets;
		Ok(())
	}

	/// Ask for an external DTD subset even if the document does not name
	/// one.
	pub fn use_foreign_dtd(&mut self, enable: bool) -> Result<()> {
		self.core.ctl.check_unstarted()?;
		self.core.opts.foreign_dtd = enable;
		Ok(())
	}

	pub fn set_hash_salt(&mut self, salt: u64) -> Result<()> {
		self.core.ctl.check_unstarted()?;
		self.core.opts.salt = Some(salt);
		Ok(())
	}

	/// Set the base URI passed along with external entity references.
	pub fn set_base(&mut self, base: Option<&str>) {
		self.core.opts.base = base.map(RcPtr::from);
	}

	pub fn base(&self) -> Option<&str> {
		self.core.opts.base.as_deref()
	}

	/// With `false`, references to internal entities are not expanded but
	/// reported through [`Handler::skipped_entity`].
	pub fn set_expand_internal_entities(&mut self, expand: bool) {
		self.core.opts.expand_internal = expand;
	}

	/// Drop namespace URIs which are no longer referenced from the URI
	/// cache.
	pub fn release_temporaries(&mut self) {
		self.core.ns.cache().release_temporaries();
	}
}

impl<H: fmt::Debug> fmt::Debug for Parser<H> {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Parser")
			.field("handler", &self.handler)
			.field("state", &self.core.ctl.state)
			.field("phase", &self.core.doc.phase)
			.field("dtd", self.core.dtd.get())
			.finish()
	}
}

/**
# Parser for an external entity

Created by [`Context::external_entity_parser`]. It shares the declarations
and the namespace bindings in scope with its parent and reports to the
handler passed to each call, which usually is the parent's handler.
*/
pub struct ExternalEntityParser<'a> {
	core: Core<'a>,
}

impl<'a> ExternalEntityParser<'a> {
	pub fn feed<H: Handler + ?Sized>(&mut self, h: &mut H, data: &[u8], is_final: bool) -> Result<Status> {
		self.core.feed(h, data, is_final)
	}

	pub fn get_buffer(&mut self, len: usize) -> Result<&mut [u8]> {
		self.core.get_buffer(len)
	}

	pub fn feed_buffer<H: Handler + ?Sized>(&mut self, h: &mut H, len: usize, is_final: bool) -> Result<Status> {
		self.core.feed_buffer(h, len, is_final)
	}

	pub fn resume<H: Handler + ?Sized>(&mut self, h: &mut H) -> Result<Status> {
		self.core.resume(h)
	}

	pub fn stop(&mut self, resumable: bool) -> Result<()> {
		self.core.stop(resumable)
	}

	pub fn parsing_status(&self) -> ParsingStatus {
		self.core.ctl.status()
	}

	pub fn error(&self) -> Option<&Error> {
		self.core.ctl.error.as_ref()
	}

	pub fn current_line_number(&self) -> u64 {
		self.core.location().0
	}

	pub fn current_column_number(&self) -> u64 {
		self.core.location().1
	}

	pub fn current_byte_index(&self) -> i64 {
		self.core.byte_index()
	}

	pub fn set_base(&mut self, base: Option<&str>) {
		self.core.opts.base = base.map(RcPtr::from);
	}
}

impl fmt::Debug for ExternalEntityParser<'_> {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("ExternalEntityParser")
			.field("mode", &self.core.mode)
			.field("state", &self.core.ctl.state)
			.finish()
	}
}
