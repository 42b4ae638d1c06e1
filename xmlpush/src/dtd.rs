/*!
# Declaration tables

Entities, element types with their attribute definitions, and the flags
which steer how undeclared entities are treated. One [`Dtd`] is owned by a
document parser and lent to the subordinate parsers it spawns, so that
declarations read from external subsets and parameter entities end up in the
same tables.

The hash tables are keyed with a per-parser salt, drawn when parsing starts.
*/
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;

use crate::alloc::{Account, Allocator};
use crate::error::{Error, Result};
use crate::parser::RcPtr;

/// [`BuildHasher`] which mixes a salt into every hash.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SaltedState {
	salt: u64,
}

impl SaltedState {
	pub(crate) fn new(salt: u64) -> SaltedState {
		SaltedState { salt }
	}
}

impl BuildHasher for SaltedState {
	type Hasher = DefaultHasher;

	fn build_hasher(&self) -> DefaultHasher {
		let mut h = DefaultHasher::new();
		h.write_u64(self.salt);
		h
	}
}

type Table<V> = HashMap<RcPtr<str>, V, SaltedState>;

/// A declared general or parameter entity.
#[derive(Debug, Clone)]
pub(crate) struct Entity {
	pub name: RcPtr<str>,
	/// Replacement text of internal entities.
	pub text: Option<RcPtr<str>>,
	pub system_id: Option<RcPtr<str>>,
	pub public_id: Option<RcPtr<str>>,
	pub base: Option<RcPtr<str>>,
	/// Notation of unparsed entities.
	pub notation: Option<RcPtr<str>>,
	pub is_param: bool,
	/// Declared in the internal subset of the document entity, outside of
	/// any parameter entity.
	pub is_internal: bool,
	/// Set while the entity is being expanded.
	pub open: bool,
}

/// Definition of one attribute from an `ATTLIST` declaration.
#[derive(Debug, Clone)]
pub(crate) struct AttributeDef {
	pub name: RcPtr<str>,
	pub is_cdata: bool,
	pub is_id: bool,
	/// Default or fixed value, already normalized.
	pub default: Option<RcPtr<str>>,
}

#[derive(Debug, Clone)]
pub(crate) struct ElementType {
	pub attrs: Vec<AttributeDef>,
	/// Index into `attrs` of the attribute declared with type `ID`.
	pub id_att: Option<usize>,
}

impl ElementType {
	pub(crate) fn attribute(&self, name: &str) -> Option<&AttributeDef> {
		self.attrs.iter().find(|a| &*a.name == name)
	}
}

pub(crate) struct Dtd {
	general: Table<Entity>,
	params: Table<Entity>,
	elements: Table<ElementType>,
	/// The document declared `standalone='yes'`.
	pub standalone: bool,
	/// The document has an external subset or references parameter
	/// entities, so declarations may be missing from what has been read.
	pub has_param_entity_refs: bool,
	/// False once a parameter entity could not be read; later declarations
	/// are then not processed.
	pub keep_processing: bool,
	/// Set by a subordinate parser reading an external subset or
	/// parameter entity.
	pub param_entity_read: bool,
	account: Account,
}

impl Dtd {
	pub(crate) fn new(alloc: Arc<dyn Allocator>, salt: u64) -> Dtd {
		let state = SaltedState::new(salt);
		Dtd {
			general: HashMap::with_hasher(state),
			params: HashMap::with_hasher(state),
			elements: HashMap::with_hasher(state),
			standalone: false,
			has_param_entity_refs: false,
			keep_processing: true,
			param_entity_read: false,
			account: Account::new(alloc),
		}
	}

	/// Copy a string into shared storage, charging the allocator.
	pub(crate) fn store(&mut self, s: &str) -> Result<RcPtr<str>> {
		self.account.charge(s.len().max(1))?;
		Ok(RcPtr::from(s))
	}

	fn table(&self, is_param: bool) -> &Table<Entity> {
		if is_param {
			&self.params
		} else {
			&self.general
		}
	}

	pub(crate) fn entity(&self, name: &str, is_param: bool) -> Option<&Entity> {
		self.table(is_param).get(name)
	}

	pub(crate) fn set_open(&mut self, name: &str, is_param: bool, open: bool) {
		let table = if is_param {
			&mut self.params
		} else {
			&mut self.general
		};
		if let Some(e) = table.get_mut(name) {
			e.open = open;
		}
	}

	/// Record an entity declaration.
	///
	/// Returns false if an entity of that name was declared before; the
	/// first declaration wins.
	pub(crate) fn declare_entity(&mut self, entity: Entity) -> Result<bool> {
		let table = if entity.is_param {
			&mut self.params
		} else {
			&mut self.general
		};
		if table.contains_key(&entity.name) {
			return Ok(false);
		}
		self.account.grow_map(table)?;
		table.insert(entity.name.clone(), entity);
		Ok(true)
	}

	pub(crate) fn element(&self, name: &str) -> Option<&ElementType> {
		self.elements.get(name)
	}

	/// Look up an element type, creating it if needed.
	pub(crate) fn element_mut(&mut self, name: &str) -> Result<&mut ElementType> {
		if !self.elements.contains_key(name) {
			let name = self.store(name)?;
			self.account.grow_map(&mut self.elements)?;
			self.elements.insert(
				name,
				ElementType {
					attrs: Vec::new(),
					id_att: None,
				},
			);
		}
		self.elements.get_mut(name).ok_or(Error::NoMemory)
	}

	/// Add an attribute definition to an element type.
	///
	/// The first definition of an attribute wins.
	pub(crate) fn define_attribute(&mut self, element: &str, def: AttributeDef) -> Result<()> {
		// reserve first so that a refusal leaves the table untouched
		if self.element(element).is_none() {
			self.element_mut(element)?;
		}
		let account = &mut self.account;
		let el = match self.elements.get_mut(element) {
			Some(el) => el,
			None => return Err(Error::NoMemory),
		};
		if el.attribute(&def.name).is_some() {
			return Ok(());
		}
		account.grow_vec(&mut el.attrs, 1)?;
		if def.is_id && el.id_att.is_none() {
			el.id_att = Some(el.attrs.len());
		}
		el.attrs.push(def);
		Ok(())
	}
}

impl fmt::Debug for Dtd {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Dtd")
			.field("general", &self.general.len())
			.field("params", &self.params.len())
			.field("elements", &self.elements.len())
			.field("standalone", &self.standalone)
			.field("has_param_entity_refs", &self.has_param_entity_refs)
			.field("keep_processing", &self.keep_processing)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::alloc::{system, FailingAllocator};

	fn internal(dtd: &mut Dtd, name: &str, text: &str) -> Entity {
		Entity {
			name: dtd.store(name).unwrap(),
			text: Some(dtd.store(text).unwrap()),
			system_id: None,
			public_id: None,
			base: None,
			notation: None,
			is_param: false,
			is_internal: true,
			open: false,
		}
	}

	#[test]
	fn first_declaration_wins() {
		let mut dtd = Dtd::new(system(), 1);
		let e = internal(&mut dtd, "e", "first");
		assert!(dtd.declare_entity(e).unwrap());
		let e = internal(&mut dtd, "e", "second");
		assert!(!dtd.declare_entity(e).unwrap());
		assert_eq!(dtd.entity("e", false).unwrap().text.as_deref(), Some("first"));
		assert!(dtd.entity("e", true).is_none());
	}

	#[test]
	fn open_flag() {
		let mut dtd = Dtd::new(system(), 2);
		let e = internal(&mut dtd, "e", "x");
		dtd.declare_entity(e).unwrap();
		dtd.set_open("e", false, true);
		assert!(dtd.entity("e", false).unwrap().open);
		dtd.set_open("e", false, false);
		assert!(!dtd.entity("e", false).unwrap().open);
	}

	#[test]
	fn attribute_definitions() {
		let mut dtd = Dtd::new(system(), 3);
		let a = AttributeDef {
			name: dtd.store("a").unwrap(),
			is_cdata: true,
			is_id: false,
			default: Some(dtd.store("x").unwrap()),
		};
		let id = AttributeDef {
			name: dtd.store("id").unwrap(),
			is_cdata: false,
			is_id: true,
			default: None,
		};
		let again = AttributeDef {
			name: dtd.store("a").unwrap(),
			is_cdata: false,
			is_id: false,
			default: None,
		};
		dtd.define_attribute("el", a).unwrap();
		dtd.define_attribute("el", id).unwrap();
		dtd.define_attribute("el", again).unwrap();
		let el = dtd.element("el").unwrap();
		assert_eq!(el.attrs.len(), 2);
		assert!(el.attribute("a").unwrap().is_cdata);
		assert_eq!(el.id_att, Some(1));
	}

	#[test]
	fn salt_changes_hashes() {
		use std::hash::{Hash, Hasher};
		let hash = |salt| {
			let mut h = SaltedState::new(salt).build_hasher();
			"name".hash(&mut h);
			h.finish()
		};
		assert_ne!(hash(1), hash(2));
		assert_eq!(hash(7), hash(7));
	}

	#[test]
	fn refused_table_growth() {
		let mut dtd = Dtd::new(Arc::new(FailingAllocator::fail_after(2)), 4);
		let e = internal(&mut dtd, "e", "x");
		match dtd.declare_entity(e) {
			Err(Error::NoMemory) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		assert!(dtd.entity("e", false).is_none());
	}
}
