use super::ranges::ByteSelect;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Endbyte {
	Eof,
	Delimiter(u8),
}

fn find_first_not<B: ByteSelect>(src: &[u8], s: &B) -> Option<usize> {
	src.iter().position(|b| !s.select(*b))
}

/// Count the bytes at the start of `src` which are selected by `selector`.
///
/// The delimiter byte is returned but not counted.
pub fn skip_matching_bytes<B: ByteSelect>(src: &[u8], selector: &B) -> (usize, Endbyte) {
	match find_first_not(src, selector) {
		None => (src.len(), Endbyte::Eof),
		Some(p) => (p, Endbyte::Delimiter(src[p])),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::lexer::ranges::{CLASS_DATA, CLASS_NAME_BYTE};

	#[test]
	fn skip_matching_bytes_handles_eof() {
		let (n, result) = skip_matching_bytes(b"foobar2342", &CLASS_DATA);
		match result {
			Endbyte::Eof => (),
			other => panic!("unexpected result: {:?}", other),
		}
		assert_eq!(n, 10);
	}

	#[test]
	fn skip_matching_bytes_returns_delimiter() {
		let (n, result) = skip_matching_bytes(b"fff<nord", &CLASS_DATA);
		match result {
			Endbyte::Delimiter(b) if b == b'<' => (),
			other => panic!("unexpected result: {:?}", other),
		}
		assert_eq!(n, 3);
	}

	#[test]
	fn skip_matching_bytes_stops_at_non_ascii() {
		let (n, result) = skip_matching_bytes("ab\u{e9}".as_bytes(), &CLASS_NAME_BYTE);
		match result {
			Endbyte::Delimiter(0xc3) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		assert_eq!(n, 2);
	}
}
