/*!
# Callback interface

A [`Handler`] receives everything the parser finds in a document, one method
per kind of event. Every method has a default implementation, so a handler
only implements what it is interested in.

The default implementations of the content and declaration events pass the
markup which produced the event on to [`Handler::default_text`] (see
[`Context::default_current`]). A handler which only implements `default`
therefore sees the whole document text.
*/
use std::fmt;

use crate::encoding::EncodingMap;
use crate::error::Result;
use crate::parser::{AttSlot, Context, NameSlot};
use crate::pool::StringPool;

/**
# Element or attribute name

Without namespace processing, the name is the qualified name as written in
the document.

With namespace processing, names in a namespace are formatted as the
namespace URI, the separator and the local name; if namespace triplets are
enabled and the name carried a prefix, another separator and the prefix
follow. [`Name::as_str`] returns that text, the accessors return the parts.
*/
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Name<'a> {
	text: &'a str,
	namespace: Option<&'a str>,
	local: &'a str,
	prefix: Option<&'a str>,
}

impl<'a> Name<'a> {
	pub(crate) fn view(pool: &'a StringPool, slot: &NameSlot) -> Name<'a> {
		let text = pool.get(slot.text);
		Name {
			text,
			namespace: slot.namespace.map(|r| &text[r.0..r.1]),
			local: &text[slot.local.0..slot.local.1],
			prefix: slot.prefix.map(|r| &text[r.0..r.1]),
		}
	}

	/// The formatted name.
	pub fn as_str(&self) -> &'a str {
		self.text
	}

	/// The namespace URI, if the name is in a namespace.
	pub fn namespace(&self) -> Option<&'a str> {
		self.namespace
	}

	pub fn local_name(&self) -> &'a str {
		self.local
	}

	/// The prefix, only reported with namespace triplets.
	pub fn prefix(&self) -> Option<&'a str> {
		self.prefix
	}
}

impl fmt::Debug for Name<'_> {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(self.text, f)
	}
}

impl fmt::Display for Name<'_> {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.text)
	}
}

impl PartialEq<str> for Name<'_> {
	fn eq(&self, other: &str) -> bool {
		self.text == other
	}
}

impl PartialEq<&str> for Name<'_> {
	fn eq(&self, other: &&str) -> bool {
		self.text == *other
	}
}

/// One attribute of a start tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute<'a> {
	pub name: Name<'a>,
	/// The normalized value.
	pub value: &'a str,
}

/**
# Attributes of a start tag

Attributes specified in the tag come first, in document order, followed by
the defaults declared in the DTD. With namespace processing, namespace
declarations are not included.
*/
#[derive(Clone, Copy)]
pub struct Attributes<'a> {
	pool: &'a StringPool,
	slots: &'a [AttSlot],
	specified: usize,
	id: Option<usize>,
}

impl<'a> Attributes<'a> {
	pub(crate) fn new(
		pool: &'a StringPool,
		slots: &'a [AttSlot],
		specified: usize,
		id: Option<usize>,
	) -> Attributes<'a> {
		Attributes {
			pool,
			slots,
			specified,
			id,
		}
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	pub fn get(&self, i: usize) -> Option<Attribute<'a>> {
		let slot = self.slots.get(i)?;
		Some(Attribute {
			name: Name::view(self.pool, &slot.name),
			value: self.pool.get(slot.value),
		})
	}

	/// Return the value of the attribute with the given (formatted) name.
	pub fn value(&self, name: &str) -> Option<&'a str> {
		self.iter().find(|a| a.name == name).map(|a| a.value)
	}

	pub fn iter(&self) -> impl Iterator<Item = Attribute<'a>> + 'a {
		let pool = self.pool;
		self.slots.iter().map(move |slot| Attribute {
			name: Name::view(pool, &slot.name),
			value: pool.get(slot.value),
		})
	}

	/// Number of attributes which were specified in the tag, as opposed to
	/// defaulted from the DTD.
	pub fn specified_count(&self) -> usize {
		self.specified
	}

	/// Index of the attribute declared with type `ID`, if present.
	pub fn id_index(&self) -> Option<usize> {
		self.id
	}
}

impl fmt::Debug for Attributes<'_> {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_list().entries(self.iter()).finish()
	}
}

/// An entity declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDecl<'a> {
	pub name: &'a str,
	pub is_param: bool,
	/// Replacement text of internal entities.
	pub value: Option<&'a str>,
	pub base: Option<&'a str>,
	pub system_id: Option<&'a str>,
	pub public_id: Option<&'a str>,
	/// Notation of unparsed entities.
	pub notation: Option<&'a str>,
}

/**
# Reference to an external entity

Passed to [`Handler::external_entity_ref`]. `name` is `None` for the external
DTD subset. The system identifier is missing only for a DTD requested with
[`Parser::use_foreign_dtd`](crate::Parser::use_foreign_dtd) when the document
has no document type declaration of its own.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEntity {
	pub name: Option<String>,
	pub is_param: bool,
	pub base: Option<String>,
	pub system_id: Option<String>,
	pub public_id: Option<String>,
}

/// Kind of a content model or content particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
	Empty,
	Any,
	Mixed,
	Name,
	Choice,
	Seq,
}

pub use crate::lexer::Quantifier;

/**
# Content model of an element declaration

The root of the tree has the kind `Empty`, `Any`, `Mixed`, `Choice` or
`Seq`. `Mixed` models list the allowed element names as `Name` children.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentModel {
	pub kind: ContentKind,
	pub quant: Quantifier,
	/// Element name of `Name` particles.
	pub name: Option<String>,
	pub children: Vec<ContentModel>,
}

impl ContentModel {
	pub(crate) fn leaf(kind: ContentKind) -> ContentModel {
		ContentModel {
			kind,
			quant: Quantifier::One,
			name: None,
			children: Vec::new(),
		}
	}
}

impl fmt::Display for ContentModel {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self.kind {
			ContentKind::Empty => return f.write_str("EMPTY"),
			ContentKind::Any => return f.write_str("ANY"),
			ContentKind::Name => {
				f.write_str(self.name.as_deref().unwrap_or(""))?;
				return f.write_str(self.quant.as_str());
			}
			ContentKind::Mixed => {
				f.write_str("(#PCDATA")?;
				for child in self.children.iter() {
					write!(f, "|{}", child)?;
				}
				f.write_str(")")?;
			}
			ContentKind::Choice | ContentKind::Seq => {
				let sep = if self.kind == ContentKind::Choice {
					"|"
				} else {
					","
				};
				f.write_str("(")?;
				for (i, child) in self.children.iter().enumerate() {
					if i > 0 {
						f.write_str(sep)?;
					}
					write!(f, "{}", child)?;
				}
				f.write_str(")")?;
			}
		}
		f.write_str(self.quant.as_str())
	}
}

/**
# Receiver of parser events

All methods have default implementations. Those of the document and
declaration events call [`Context::default_current`], which routes the text
of the event to [`Handler::default_text`]; `default_text` itself and the namespace
declaration events do nothing.

Any method may stop or suspend the parser through [`Context::stop`].
*/
pub trait Handler {
	/// XML declaration, or text declaration of an external entity.
	fn xml_decl(
		&mut self,
		cx: &mut Context,
		_version: Option<&str>,
		_encoding: Option<&str>,
		_standalone: Option<bool>,
	) {
		cx.default_current();
	}

	fn start_element(&mut self, cx: &mut Context, _name: Name, _attrs: Attributes) {
		cx.default_current();
	}

	fn end_element(&mut self, cx: &mut Context, _name: Name) {
		cx.default_current();
	}

	/// Character data with line breaks normalized to `\n`.
	///
	/// Character references and predefined entities are delivered as
	/// separate events.
	fn characters(&mut self, cx: &mut Context, _text: &str) {
		cx.default_current();
	}

	fn processing_instruction(&mut self, cx: &mut Context, _target: &str, _data: &str) {
		cx.default_current();
	}

	fn comment(&mut self, cx: &mut Context, _text: &str) {
		cx.default_current();
	}

	fn start_cdata_section(&mut self, cx: &mut Context) {
		cx.default_current();
	}

	fn end_cdata_section(&mut self, cx: &mut Context) {
		cx.default_current();
	}

	/// Markup not reported otherwise, or passed on by another callback.
	fn default_text(&mut self, _cx: &mut Context, _text: &str) {}

	fn start_doctype(
		&mut self,
		cx: &mut Context,
		_name: &str,
		_system_id: Option<&str>,
		_public_id: Option<&str>,
		_has_internal_subset: bool,
	) {
		cx.default_current();
	}

	fn end_doctype(&mut self, cx: &mut Context) {
		cx.default_current();
	}

	fn entity_decl(&mut self, cx: &mut Context, _decl: &EntityDecl) {
		cx.default_current();
	}

	fn notation_decl(
		&mut self,
		cx: &mut Context,
		_name: &str,
		_base: Option<&str>,
		_system_id: Option<&str>,
		_public_id: Option<&str>,
	) {
		cx.default_current();
	}

	fn element_decl(&mut self, cx: &mut Context, _name: &str, _model: &ContentModel) {
		cx.default_current();
	}

	/// One attribute definition of an `ATTLIST` declaration.
	///
	/// `required` is true for `#REQUIRED` attributes and, together with a
	/// default, for `#FIXED` ones.
	fn attlist_decl(
		&mut self,
		cx: &mut Context,
		_element: &str,
		_attribute: &str,
		_att_type: &str,
		_default: Option<&str>,
		_required: bool,
	) {
		cx.default_current();
	}

	/// A namespace binding comes into scope; `None` stands for the default
	/// namespace or an empty URI.
	fn start_namespace_decl(&mut self, _cx: &mut Context, _prefix: Option<&str>, _uri: Option<&str>) {}

	fn end_namespace_decl(&mut self, _cx: &mut Context, _prefix: Option<&str>) {}

	/// A reference to an entity which has not been read.
	fn skipped_entity(&mut self, cx: &mut Context, _name: &str, _is_param: bool) {
		cx.default_current();
	}

	/// The document is not standalone; return false to reject it.
	fn not_standalone(&mut self, _cx: &mut Context) -> bool {
		true
	}

	/// An external entity or the external DTD subset is referenced.
	///
	/// The handler can parse it with a subordinate parser from
	/// [`Context::external_entity_parser`]. Returning an error makes the
	/// parser fail with [`Error::ExternalEntityHandling`](crate::Error::ExternalEntityHandling).
	fn external_entity_ref(&mut self, cx: &mut Context, _entity: &ExternalEntity) -> Result<()> {
		cx.default_current();
		Ok(())
	}

	/// Provide a decoder for an encoding the parser does not know.
	fn unknown_encoding(&mut self, _name: &str) -> Option<EncodingMap> {
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn name(kind: ContentKind, n: &str, quant: Quantifier) -> ContentModel {
		ContentModel {
			kind,
			quant,
			name: Some(n.to_string()),
			children: Vec::new(),
		}
	}

	#[test]
	fn content_model_display() {
		let mut seq = ContentModel::leaf(ContentKind::Seq);
		seq.children.push(name(ContentKind::Name, "a", Quantifier::One));
		let mut choice = ContentModel::leaf(ContentKind::Choice);
		choice.quant = Quantifier::ZeroOrMore;
		choice.children.push(name(ContentKind::Name, "b", Quantifier::Optional));
		choice.children.push(name(ContentKind::Name, "c", Quantifier::OneOrMore));
		seq.children.push(choice);
		assert_eq!(seq.to_string(), "(a,(b?|c+)*)");

		let mut mixed = ContentModel::leaf(ContentKind::Mixed);
		mixed.quant = Quantifier::ZeroOrMore;
		mixed.children.push(name(ContentKind::Name, "em", Quantifier::One));
		assert_eq!(mixed.to_string(), "(#PCDATA|em)*");
		assert_eq!(ContentModel::leaf(ContentKind::Empty).to_string(), "EMPTY");
	}
}
