/*!
# Error types

This module holds the error type returned by the parsers and drivers of this
crate, together with the numeric error codes and their explanatory strings.

All errors except [`Error::IO`] carry a stable numeric code (see
[`Error::code`]) which can be mapped back to a message with
[`error_string`].
*/
use std::error;
use std::fmt;
use std::io;
use std::ops::Deref;
use std::result::Result as StdResult;
use std::sync::Arc;

/// [`std::sync::Arc`]-based around [`std::io::Error`] to allow cloning.
#[derive(Clone)]
pub struct IOErrorWrapper(Arc<io::Error>);

impl IOErrorWrapper {
	fn wrap(e: io::Error) -> IOErrorWrapper {
		IOErrorWrapper(Arc::new(e))
	}
}

impl fmt::Debug for IOErrorWrapper {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(&**self, f)
	}
}

impl fmt::Display for IOErrorWrapper {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(&**self, f)
	}
}

impl PartialEq for IOErrorWrapper {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}

impl Deref for IOErrorWrapper {
	type Target = io::Error;

	fn deref(&self) -> &io::Error {
		&*self.0
	}
}

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Malformed tokens, unclosed constructs, invalid characters.
	Lexical,
	/// Unknown or mismatching encodings.
	Encoding,
	/// Violations of the XML 1.0 well-formedness constraints.
	WellFormedness,
	/// Violations of the Namespaces in XML 1.0 constraints.
	Namespace,
	/// Problems with entity declarations, references or external entities.
	Entity,
	/// The allocator refused a request.
	Resource,
	/// The parser was used in a way which is not allowed in its current
	/// state.
	Api,
	/// The byte source of a driver failed.
	IO,
}

macro_rules! xml_errors {
	(
		$(
			$(#[$meta:meta])*
			$name:ident = $code:literal => ($kind:ident, $msg:literal),
		)*
	) => {
		/// Error types which may be returned from the parsers and drivers.
		///
		/// With the exception of [`Error::IO`] and the API-misuse errors
		/// ([`ErrorKind::Api`]), all errors are terminal: the parser is
		/// poisoned and keeps returning the same error until it is reset.
		#[derive(Debug, Clone, PartialEq)]
		pub enum Error {
			$(
				$(#[$meta])*
				$name,
			)*
			/// The byte source feeding a driver failed.
			IO(IOErrorWrapper),
		}

		impl Error {
			/// Return the numeric code of this error.
			///
			/// I/O errors have no code.
			pub fn code(&self) -> Option<u32> {
				match self {
					$(Self::$name => Some($code),)*
					Self::IO(_) => None,
				}
			}

			/// Map a numeric code back to the error.
			pub fn from_code(code: u32) -> Option<Error> {
				match code {
					$($code => Some(Self::$name),)*
					_ => None,
				}
			}

			/// Classify the error.
			pub fn kind(&self) -> ErrorKind {
				match self {
					$(Self::$name => ErrorKind::$kind,)*
					Self::IO(_) => ErrorKind::IO,
				}
			}
		}

		/// Return the explanatory string for a numeric error code.
		///
		/// Returns `None` for codes which do not denote an error.
		///
		/// ```
		/// assert_eq!(xmlpush::error_string(7), Some("mismatched tag"));
		/// assert_eq!(xmlpush::error_string(0), None);
		/// assert_eq!(xmlpush::error_string(9999), None);
		/// ```
		pub fn error_string(code: u32) -> Option<&'static str> {
			match code {
				$($code => Some($msg),)*
				_ => None,
			}
		}
	};
}

xml_errors! {
	/// The allocator refused to provide memory.
	NoMemory = 1 => (Resource, "out of memory"),
	Syntax = 2 => (WellFormedness, "syntax error"),
	/// The input ended before a document element was complete.
	NoElements = 3 => (WellFormedness, "no element found"),
	InvalidToken = 4 => (Lexical, "not well-formed (invalid token)"),
	UnclosedToken = 5 => (Lexical, "unclosed token"),
	/// The final input ended in the middle of a multi-byte character.
	PartialChar = 6 => (Lexical, "partial character"),
	TagMismatch = 7 => (WellFormedness, "mismatched tag"),
	DuplicateAttribute = 8 => (WellFormedness, "duplicate attribute"),
	JunkAfterDocElement = 9 => (WellFormedness, "junk after document element"),
	/// Parameter entity reference inside a markup declaration or entity
	/// value of the internal subset.
	ParamEntityRef = 10 => (Entity, "illegal parameter entity reference"),
	UndefinedEntity = 11 => (Entity, "undefined entity"),
	RecursiveEntityRef = 12 => (Entity, "recursive entity reference"),
	/// An entity ended with unbalanced markup, or markup continued after
	/// an external entity finished.
	AsyncEntity = 13 => (Entity, "asynchronous entity"),
	BadCharRef = 14 => (Lexical, "reference to invalid character number"),
	BinaryEntityRef = 15 => (Entity, "reference to binary entity"),
	AttributeExternalEntityRef = 16 => (Entity, "reference to external entity in attribute"),
	MisplacedXmlPi = 17 => (WellFormedness, "XML or text declaration not at start of entity"),
	UnknownEncoding = 18 => (Encoding, "unknown encoding"),
	IncorrectEncoding = 19 => (Encoding, "encoding specified in XML declaration is incorrect"),
	UnclosedCdataSection = 20 => (Lexical, "unclosed CDATA section"),
	/// The external entity handler failed or returned an error from a
	/// subordinate parser.
	ExternalEntityHandling = 21 => (Entity, "error in processing external entity reference"),
	/// The not-standalone handler rejected the document.
	NotStandalone = 22 => (Entity, "document is not standalone"),
	UnexpectedState = 23 => (Api, "unexpected parser state"),
	EntityDeclaredInPe = 24 => (Entity, "entity declared in parameter entity"),
	FeatureRequiresXmlDtd = 25 => (Api, "requested feature requires DTD support"),
	CantChangeFeatureOnceParsing = 26 => (Api, "cannot change setting once parsing has begun"),
	UnboundPrefix = 27 => (Namespace, "unbound prefix"),
	UndeclaringPrefix = 28 => (Namespace, "must not undeclare prefix"),
	IncompletePe = 29 => (Entity, "incomplete markup in parameter entity"),
	XmlDecl = 30 => (WellFormedness, "XML declaration not well-formed"),
	TextDecl = 31 => (WellFormedness, "text declaration not well-formed"),
	Publicid = 32 => (WellFormedness, "illegal character(s) in public id"),
	Suspended = 33 => (Api, "parser suspended"),
	NotSuspended = 34 => (Api, "parser not suspended"),
	Aborted = 35 => (Api, "parsing aborted"),
	Finished = 36 => (Api, "parsing finished"),
	SuspendPe = 37 => (Api, "cannot suspend in external parameter entity"),
	ReservedPrefixXml = 38 => (Namespace, "reserved prefix (xml) must not be undeclared or bound to another namespace name"),
	ReservedPrefixXmlns = 39 => (Namespace, "reserved prefix (xmlns) must not be declared or undeclared"),
	ReservedNamespaceUri = 40 => (Namespace, "prefix must not be bound to one of the reserved namespace names"),
	InvalidArgument = 41 => (Api, "invalid argument"),
}

pub type Result<T> = StdResult<T, Error>;

impl Error {
	pub fn io(e: io::Error) -> Error {
		Error::IO(IOErrorWrapper::wrap(e))
	}

	/// True for errors which leave the parser usable, i.e. which are caused
	/// by calling an operation in the wrong state rather than by the
	/// document.
	pub fn is_api_misuse(&self) -> bool {
		self.kind() == ErrorKind::Api && !matches!(self, Error::Aborted)
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::io(e)
	}
}

impl fmt::Display for Error {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Error::IO(e) => write!(f, "I/O error: {}", e),
			other => match other.code().and_then(error_string) {
				Some(msg) => f.write_str(msg),
				None => f.write_str("unknown error"),
			},
		}
	}
}

impl error::Error for Error {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		match self {
			Error::IO(e) => Some(&**e),
			_ => None,
		}
	}
}
