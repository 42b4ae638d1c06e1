use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncBufRead;

use crate::driver::{DriveState, Feed};
use crate::parser::{Parser, Status};
use crate::Result;

use pin_project_lite::pin_project;

pin_project! {
	/**
	# Asynchronous driver for parsers

	Works like [`PullDriver`](crate::PullDriver), but reads from a
	[`tokio::io::AsyncBufRead`] and yields to other tasks while the reader
	has no data.

	## Example

	```
	use xmlpush::{AsyncDriver, Context, Handler, Parser, Status};

	#[derive(Default)]
	struct Text(String);

	impl Handler for Text {
		fn characters(&mut self, _cx: &mut Context, text: &str) {
			self.0.push_str(text);
		}
	}

	# tokio_test::block_on(async {
	let doc = &b"<greeting>Hello</greeting>"[..];
	let mut driver = AsyncDriver::new(doc, Parser::new(Text::default()));
	assert_eq!(driver.run().await.unwrap(), Status::Ok);
	assert_eq!(driver.get_parser().handler().0, "Hello");
	# })
	```
	*/
	#[derive(Debug)]
	pub struct AsyncDriver<R, P> {
		#[pin]
		inner: R,
		parser: P,
		state: DriveState,
	}
}

impl<R: AsyncBufRead, P: Feed> AsyncDriver<R, P> {
	pub fn new(inner: R, parser: P) -> Self {
		Self {
			inner,
			parser,
			state: DriveState::default(),
		}
	}

	/// Poll a run: feed the parser until the reader is exhausted or the
	/// parser is suspended. See [`PullDriver::run`](crate::PullDriver::run).
	pub fn poll_run(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<Status>> {
		let mut this = self.project();
		if let Some(status) = this.state.enter(&mut *this.parser)? {
			return Poll::Ready(Ok(status));
		}
		loop {
			let buf = match this.inner.as_mut().poll_fill_buf(cx) {
				Poll::Pending => return Poll::Pending,
				Poll::Ready(Err(e)) => return Poll::Ready(Err(e.into())),
				Poll::Ready(Ok(buf)) => buf,
			};
			let n = buf.len();
			let done = this.state.chunk(&mut *this.parser, buf);
			this.inner.as_mut().consume(n);
			if let Some(status) = done? {
				return Poll::Ready(Ok(status));
			}
		}
	}

	/// Decompose the driver into its parts
	pub fn into_inner(self) -> (R, P) {
		(self.inner, self.parser)
	}

	/// Access the inner AsyncBufRead
	pub fn get_inner(&self) -> &R {
		&self.inner
	}

	/// Access the inner AsyncBufRead, mutably
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
}

impl<R: AsyncBufRead + Unpin, P: Feed> AsyncDriver<R, P> {
	/// Feed the parser until the reader is exhausted or the parser is
	/// suspended.
	///
	/// Equivalent to:
	///
	/// ```ignore
	/// async fn run(&mut self) -> Result<Status>;
	/// ```
	pub fn run(&mut self) -> Run<'_, R, P> {
		Run { driver: self }
	}
}

/// Future returned by [`AsyncDriver::run`].
#[derive(Debug)]
pub struct Run<'a, R, P> {
	driver: &'a mut AsyncDriver<R, P>,
}

impl<'a, R: AsyncBufRead + Unpin, P: Feed> Future for Run<'a, R, P> {
	type Output = Result<Status>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<Status>> {
		Pin::new(&mut *self.driver).poll_run(cx)
	}
}

/// An [`AsyncDriver`] for the default [`Parser`].
pub type AsyncParser<R, H> = AsyncDriver<R, Parser<H>>;

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::Error;
	use crate::handler::Handler;

	#[derive(Default)]
	struct Elements(usize);

	impl Handler for Elements {
		fn start_element(
			&mut self,
			_cx: &mut crate::parser::Context,
			_name: crate::Name,
			_attrs: crate::Attributes,
		) {
			self.0 += 1;
		}
	}

	#[tokio::test]
	async fn reads_chunks_as_they_arrive() {
		let reader = tokio_test::io::Builder::new()
			.read(b"<a><b/>")
			.read(b"<c/>")
			.read(b"</a>")
			.build();
		let reader = tokio::io::BufReader::new(reader);
		let mut d = AsyncParser::new(reader, Parser::new(Elements::default()));
		assert_eq!(d.run().await.unwrap(), Status::Ok);
		assert_eq!(d.get_parser().handler().0, 3);
	}

	#[tokio::test]
	async fn unfinished_documents_fail_at_eof() {
		let mut d = AsyncParser::new(&b"<a><b/>"[..], Parser::new(Elements::default()));
		match d.run().await {
			Err(Error::NoElements) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}
}
