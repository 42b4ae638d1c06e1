#[cfg(not(feature = "mt"))]
use std::rc::Rc;
use std::sync::Arc;

use crate::alloc::{system, Allocator};
use crate::error::{Error, Result};
use crate::intern::UriCache;

/// Shared pointer around namespace URIs and declaration texts
///
/// In builds with the `mt` feature, this is a [`Arc`]. In non-`mt` builds,
/// this is a [`std::rc::Rc`]
#[cfg(feature = "mt")]
pub type RcPtr<T> = Arc<T>;
/// Shared pointer around namespace URIs and declaration texts
///
/// In builds with the `mt` feature, this is a [`std::sync::Arc`].
/// In non-`mt` builds, this is a [`Rc`].
#[cfg(not(feature = "mt"))]
pub type RcPtr<T> = Rc<T>;

/// XML core namespace URI (for the `xml:` prefix)
pub const XMLNS_XML: &str = "http://www.w3.org/XML/1998/namespace";
/// XML namespace URI (for the `xmlns:` prefix)
pub const XMLNS_XMLNS: &str = "http://www.w3.org/2000/xmlns/";

/// When parameter entities and the external DTD subset are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamEntityParsing {
	Never,
	/// Read them unless the document declares `standalone='yes'`.
	UnlessStandalone,
	Always,
}

impl Default for ParamEntityParsing {
	fn default() -> ParamEntityParsing {
		ParamEntityParsing::Never
	}
}

/// Outcome of a successful call which processed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
	/// All input handed over has been processed (or is held back because it
	/// ends inside a token).
	Ok,
	/// A handler suspended the parser; continue with
	/// [`Parser::resume`](crate::Parser::resume).
	Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
	/// No input has been processed yet.
	Initialized,
	Parsing,
	Suspended,
	/// The final input has been processed, or the parser failed or was
	/// stopped.
	Finished,
}

/// Snapshot of the run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsingStatus {
	pub state: RunState,
	/// The input being processed is the last one.
	pub final_buffer: bool,
}

/**
# Construction-time parser settings

```
use xmlpush::ParserOptions;

let opts = ParserOptions::new()
	.encoding("ISO-8859-1")
	.namespaces('\u{1}');
```
*/
#[derive(Clone)]
pub struct ParserOptions {
	pub(crate) encoding: Option<String>,
	pub(crate) separator: Option<char>,
	pub(crate) alloc: Arc<dyn Allocator>,
	pub(crate) uri_cache: Option<RcPtr<UriCache>>,
}

impl ParserOptions {
	pub fn new() -> ParserOptions {
		ParserOptions {
			encoding: None,
			separator: None,
			alloc: system(),
			uri_cache: None,
		}
	}

	/// Decode the document with the named encoding, ignoring byte order
	/// marks which contradict it and the encoding declaration.
	pub fn encoding(mut self, name: &str) -> ParserOptions {
		self.encoding = Some(name.to_string());
		self
	}

	/// Enable namespace processing.
	///
	/// Names in a namespace are reported as URI, `separator` and local name.
	pub fn namespaces(mut self, separator: char) -> ParserOptions {
		self.separator = Some(separator);
		self
	}

	/// Route all memory growth of the parser through `alloc`.
	pub fn allocator(mut self, alloc: Arc<dyn Allocator>) -> ParserOptions {
		self.alloc = alloc;
		self
	}

	/// Intern namespace URIs in a cache shared with other parsers.
	pub fn uri_cache(mut self, cache: RcPtr<UriCache>) -> ParserOptions {
		self.uri_cache = Some(cache);
		self
	}
}

impl Default for ParserOptions {
	fn default() -> ParserOptions {
		ParserOptions::new()
	}
}

/// Settings in effect for one parse.
#[derive(Debug, Clone)]
pub(crate) struct Options {
	pub encoding: Option<String>,
	pub separator: Option<char>,
	pub triplets: bool,
	pub pe_parsing: ParamEntityParsing,
	pub foreign_dtd: bool,
	pub salt: Option<u64>,
	pub base: Option<RcPtr<str>>,
	pub expand_internal: bool,
}

impl Options {
	pub(crate) fn new(encoding: Option<String>, separator: Option<char>) -> Options {
		Options {
			encoding,
			separator,
			triplets: false,
			pe_parsing: ParamEntityParsing::Never,
			foreign_dtd: false,
			salt: None,
			base: None,
			expand_internal: true,
		}
	}
}

/// Run state shared between the parse loop and the handler.
#[derive(Debug)]
pub(crate) struct Control {
	pub state: RunState,
	pub final_buffer: bool,
	pub aborted: bool,
	/// The parser reads an external parameter entity or DTD subset.
	pub param_child: bool,
	/// First non-API error; every later call returns it.
	pub error: Option<Error>,
}

impl Control {
	pub(crate) fn new(param_child: bool) -> Control {
		Control {
			state: RunState::Initialized,
			final_buffer: false,
			aborted: false,
			param_child,
			error: None,
		}
	}

	pub(crate) fn status(&self) -> ParsingStatus {
		ParsingStatus {
			state: self.state,
			final_buffer: self.final_buffer,
		}
	}

	/// Stop or suspend.
	pub(crate) fn stop(&mut self, resumable: bool) -> Result<()> {
		match self.state {
			RunState::Initialized => Err(Error::UnexpectedState),
			RunState::Finished => Err(Error::Finished),
			RunState::Suspended => {
				if resumable {
					Err(Error::Suspended)
				} else {
					self.state = RunState::Finished;
					Ok(())
				}
			}
			RunState::Parsing => {
				if resumable {
					if self.param_child {
						return Err(Error::SuspendPe);
					}
					self.state = RunState::Suspended;
				} else {
					self.state = RunState::Finished;
					self.aborted = true;
					self.error = Some(Error::Aborted);
				}
				Ok(())
			}
		}
	}

	/// Fail with the stored error, or with `err` if the parser cannot take
	/// input in its current state.
	pub(crate) fn check_feed(&self) -> Result<()> {
		if let Some(e) = self.error.as_ref() {
			return Err(e.clone());
		}
		match self.state {
			RunState::Suspended => Err(Error::Suspended),
			RunState::Finished => Err(Error::Finished),
			_ => Ok(()),
		}
	}

	/// Only allow a settings change before parsing.
	pub(crate) fn check_unstarted(&self) -> Result<()> {
		match self.state {
			RunState::Initialized => Ok(()),
			_ => Err(Error::CantChangeFeatureOnceParsing),
		}
	}
}
