#[macro_use]
extern crate afl;
extern crate xmlpush;

use xmlpush::{Attributes, Context, Handler, Name, Parser};

#[derive(Default)]
struct Events(Vec<String>);

impl Handler for Events {
	fn start_element(&mut self, _cx: &mut Context, name: Name, attrs: Attributes) {
		self.0.push(format!("<{} {:?}", name, attrs));
	}

	fn end_element(&mut self, _cx: &mut Context, name: Name) {
		self.0.push(format!("</{}", name));
	}

	fn characters(&mut self, _cx: &mut Context, text: &str) {
		match self.0.last_mut() {
			Some(last) if last.starts_with('T') => last.push_str(text),
			_ => self.0.push(format!("T{}", text)),
		}
	}

	fn comment(&mut self, _cx: &mut Context, text: &str) {
		self.0.push(format!("!{}", text));
	}

	fn processing_instruction(&mut self, _cx: &mut Context, target: &str, data: &str) {
		self.0.push(format!("?{} {}", target, data));
	}
}

fn parse_chunked(chunks: &[&[u8]]) -> (xmlpush::Result<()>, Vec<String>) {
	let mut parser = Parser::with_namespaces(Events::default(), ' ');
	for chunk in chunks {
		if let Err(e) = parser.feed(chunk, false) {
			return (Err(e), parser.into_handler().0);
		}
	}
	let result = parser.feed(b"", true).map(|_| ());
	(result, parser.into_handler().0)
}

fn main() {
	fuzz!(|data: &[u8]| {
		let mut chunks = Vec::<&[u8]>::new();
		let zero = &b"\0"[..];
		for chunk in data.split(|b| *b == b'\0') {
			if chunk.is_empty() {
				chunks.push(zero)
			} else {
				chunks.push(chunk)
			}
		}
		let (split_result, split_events) = parse_chunked(&chunks);
		let buf = chunks.concat();
		let (whole_result, whole_events) = parse_chunked(&[&buf]);

		if split_result.is_err() != whole_result.is_err() {
			panic!("error state depends on chunking")
		}
		if whole_result.is_ok() && split_events != whole_events {
			panic!("events depend on chunking")
		}
	});
}
