/*!
# Incremental XML 1.0 parsing

This crate provides a non-blocking, resumable XML 1.0 parser in the style of
the classic event-callback parsers: input is pushed into the parser in
chunks of any size, and everything found in it is reported to a [`Handler`].

## Features

* Streamed parsing; the events do not depend on how the input is split
* Suspend, resume and stop from within callbacks
* UTF-8, UTF-16 (both byte orders), ISO-8859-1 and US-ASCII built in;
  further single- and multi-byte encodings through [`EncodingMap`]
* Document type declarations: internal and external subsets, conditional
  sections, general and parameter entities, attribute defaults
* External entities are never fetched by the parser; the application
  decides in [`Handler::external_entity_ref`] and feeds them to an
  [`ExternalEntityParser`]
* Namespace processing with expanded names (`uri SEP local [SEP prefix]`)
* Protection against recursive entity definitions
* Allocation through an injectable [`Allocator`]; out-of-memory is an
  ordinary, recoverable error
* Can be driven push- and pull-based, and asynchronously through tokio via
  the `async` feature

## Example

```
use xmlpush::{Attributes, Context, Handler, Name, Parser, Status};

#[derive(Default)]
struct Outline {
	depth: usize,
	lines: Vec<String>,
}

impl Handler for Outline {
	fn start_element(&mut self, _cx: &mut Context, name: Name, attrs: Attributes) {
		self.lines.push(format!("{}{} ({} attributes)", "  ".repeat(self.depth), name, attrs.len()));
		self.depth += 1;
	}

	fn end_element(&mut self, _cx: &mut Context, _name: Name) {
		self.depth -= 1;
	}
}

let mut p = Parser::new(Outline::default());
p.feed(b"<?xml version='1.0'?><doc a='1'><it", false).unwrap();
p.feed(b"em/></doc>", true).unwrap();
assert_eq!(p.handler().lines, vec!["doc (1 attributes)", "  item (0 attributes)"]);
```

## High-level usage

### Push-based usage

[`Parser::feed`] processes a chunk right away and returns once everything
which can be processed has been. [`Parser::get_buffer`] and
[`Parser::feed_buffer`] let the application read directly into the
parser's buffer.

### Pull-based usage

[`PullDriver`] reads from an [`std::io::BufRead`] and feeds the parser
until the input ends or a handler suspends the parser.

### Usage with Tokio

With the `async` feature, [`AsyncDriver`] does the same for a
[`tokio::io::AsyncBufRead`].
*/

pub mod alloc;
mod driver;
mod dtd;
pub mod encoding;
pub mod error;
#[cfg(feature = "async")]
mod future;
mod handler;
mod intern;
mod lexer;
pub mod parser;
mod pool;


#[doc(inline)]
pub use alloc::{Allocator, FailingAllocator, SystemAllocator};
pub use driver::{Feed, PullDriver, PullParser};
#[doc(inline)]
pub use encoding::{Encoding, EncodingMap};
#[doc(inline)]
pub use error::{error_string, Error, ErrorKind, Result};
#[cfg(feature = "async")]
pub use future::{AsyncDriver, AsyncParser, Run};
pub use handler::{
	Attribute, Attributes, ContentKind, ContentModel, EntityDecl, ExternalEntity, Handler, Name,
	Quantifier,
};
pub use intern::UriCache;
#[doc(inline)]
pub use parser::{
	Context, ExternalEntityParser, ParamEntityParsing, Parser, ParserOptions, ParsingStatus,
	RcPtr, RunState, Status, XMLNS_XML, XMLNS_XMLNS,
};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the XML specification implemented
pub const XML_VERSION: &str = "1.0";
