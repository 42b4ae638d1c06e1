/*!
Drivers which read input for a parser.

[`Parser`] is push-based: the caller hands it bytes. The drivers in this
module pull the bytes from a reader instead and feed them to anything
implementing [`Feed`], until the input is exhausted or a handler suspends
the parser.
*/

use std::io;

use crate::error::Result;
use crate::handler::Handler;
use crate::parser::{Parser, Status};

/**
# Chunked input sink

Implemented by [`Parser`]; the drivers are generic over it so that
wrappers around a parser can be driven as well.
*/
pub trait Feed {
	/// Process a chunk of input. See [`Parser::feed`].
	fn feed(&mut self, data: &[u8], is_final: bool) -> Result<Status>;

	/// Continue after a suspension. See [`Parser::resume`].
	fn resume(&mut self) -> Result<Status>;
}

impl<H: Handler> Feed for Parser<H> {
	fn feed(&mut self, data: &[u8], is_final: bool) -> Result<Status> {
		Parser::feed(self, data, is_final)
	}

	fn resume(&mut self) -> Result<Status> {
		Parser::resume(self)
	}
}

impl<T: Feed + ?Sized> Feed for &mut T {
	fn feed(&mut self, data: &[u8], is_final: bool) -> Result<Status> {
		(**self).feed(data, is_final)
	}

	fn resume(&mut self) -> Result<Status> {
		(**self).resume()
	}
}

/// Bookkeeping shared by the blocking and the asynchronous driver.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DriveState {
	pub suspended: bool,
	pub eof: bool,
}

impl DriveState {
	/// Resume the parser if it was suspended by the previous run.
	///
	/// Returns `Some` if the run is over before any input is read.
	pub(crate) fn enter<P: Feed + ?Sized>(&mut self, parser: &mut P) -> Result<Option<Status>> {
		if self.suspended {
			self.suspended = false;
			if parser.resume()? == Status::Suspended {
				self.suspended = true;
				return Ok(Some(Status::Suspended));
			}
		}
		if self.eof {
			return Ok(Some(Status::Ok));
		}
		Ok(None)
	}

	/// Feed one chunk; an empty chunk marks the end of the input.
	///
	/// Returns `Some` if the run is over.
	pub(crate) fn chunk<P: Feed + ?Sized>(&mut self, parser: &mut P, buf: &[u8]) -> Result<Option<Status>> {
		let is_final = buf.is_empty();
		if is_final {
			self.eof = true;
		}
		match parser.feed(buf, is_final)? {
			Status::Suspended => {
				self.suspended = true;
				Ok(Some(Status::Suspended))
			}
			Status::Ok if is_final => Ok(Some(Status::Ok)),
			Status::Ok => Ok(None),
		}
	}
}

/**
# Blocking driver for parsers

Reads from an [`io::BufRead`] and feeds everything it gets to the parser.
The end of the reader is fed as the final (empty) chunk.

## Example

```
use xmlpush::{Context, Handler, Name, Attributes, Parser, PullDriver, Status};

#[derive(Default)]
struct Names(Vec<String>);

impl Handler for Names {
	fn start_element(&mut self, _cx: &mut Context, name: Name, _attrs: Attributes) {
		self.0.push(name.as_str().to_string());
	}
}

let doc = &b"<?xml version='1.0'?><hello><world/></hello>"[..];
let mut driver = PullDriver::new(doc, Parser::new(Names::default()));
assert_eq!(driver.run().unwrap(), Status::Ok);
let (_, parser) = driver.into_inner();
assert_eq!(parser.into_handler().0, vec!["hello", "world"]);
```
*/
#[derive(Debug)]
pub struct PullDriver<R: io::BufRead, P: Feed> {
	inner: R,
	parser: P,
	state: DriveState,
}

impl<R: io::BufRead, P: Feed> PullDriver<R, P> {
	pub fn new(inner: R, parser: P) -> Self {
		Self {
			inner,
			parser,
			state: DriveState::default(),
		}
	}

	/// Feed the parser until the reader is exhausted or the parser is
	/// suspended.
	///
	/// After [`Status::Suspended`], calling `run` again resumes the parser
	/// and continues reading. Interrupted reads are retried; other I/O
	/// errors are returned as [`Error::IO`](crate::Error::IO) and may be
	/// retried as well.
	pub fn run(&mut self) -> Result<Status> {
		if let Some(status) = self.state.enter(&mut self.parser)? {
			return Ok(status);
		}
		loop {
			let buf = match self.inner.fill_buf() {
				Ok(buf) => buf,
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e.into()),
			};
			let n = buf.len();
			let done = self.state.chunk(&mut self.parser, buf)?;
			self.inner.consume(n);
			if let Some(status) = done {
				return Ok(status);
			}
		}
	}

	/// Access the inner BufRead
	pub fn get_inner(&self) -> &R {
		&self.inner
	}

	/// Access the inner BufRead, mutably
	pub fn get_inner_mut(&mut self) -> &mut R {
		&mut self.inner
	}

	/// Access the parser
	pub fn get_parser(&self) -> &P {
		&self.parser
	}

	/// Access the parser, mutably
	pub fn get_parser_mut(&mut self) -> &mut P {
		&mut self.parser
	}

	/// Decompose the driver into its parts
	pub fn into_inner(self) -> (R, P) {
		(self.inner, self.parser)
	}
}

/// A [`PullDriver`] for the default [`Parser`].
pub type PullParser<R, H> = PullDriver<R, Parser<H>>;

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::Error;
	use crate::parser::Context;

	struct Chunks<'a> {
		chunks: Vec<&'a [u8]>,
		fail_once: bool,
	}

	impl<'a> io::Read for Chunks<'a> {
		fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
			unreachable!()
		}
	}

	impl<'a> io::BufRead for Chunks<'a> {
		fn fill_buf(&mut self) -> io::Result<&[u8]> {
			if self.fail_once {
				self.fail_once = false;
				return Err(io::Error::new(io::ErrorKind::WouldBlock, "later"));
			}
			Ok(self.chunks.first().copied().unwrap_or(b""))
		}

		fn consume(&mut self, n: usize) {
			if n > 0 {
				assert_eq!(n, self.chunks[0].len());
				self.chunks.remove(0);
			}
		}
	}

	#[derive(Default)]
	struct Pausing {
		seen: Vec<String>,
	}

	impl Handler for Pausing {
		fn characters(&mut self, cx: &mut Context, text: &str) {
			self.seen.push(text.to_string());
			cx.stop(true).unwrap();
		}
	}

	#[test]
	fn io_errors_are_passed_on_and_retryable() {
		let src = Chunks {
			chunks: vec![b"<doc>", b"</doc>"],
			fail_once: true,
		};
		let mut d = PullDriver::new(src, Parser::new(Pausing::default()));
		match d.run() {
			Err(Error::IO(e)) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
			other => panic!("unexpected result: {:?}", other),
		}
		assert_eq!(d.run().unwrap(), Status::Ok);
	}

	#[test]
	fn suspension_ends_a_run() {
		let src = Chunks {
			chunks: vec![b"<doc>a<x/>", b"b</doc>"],
			fail_once: false,
		};
		let mut d = PullDriver::new(src, Parser::new(Pausing::default()));
		assert_eq!(d.run().unwrap(), Status::Suspended);
		assert_eq!(d.get_parser().handler().seen, vec!["a"]);
		assert_eq!(d.run().unwrap(), Status::Suspended);
		assert_eq!(d.get_parser().handler().seen, vec!["a", "b"]);
		assert_eq!(d.run().unwrap(), Status::Ok);
		assert_eq!(d.run().unwrap(), Status::Ok);
	}

	#[test]
	fn parse_errors_are_returned() {
		let mut d = PullDriver::new(&b"<doc></cod>"[..], Parser::new(Pausing::default()));
		match d.run() {
			Err(Error::TagMismatch) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}
}
