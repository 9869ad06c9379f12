//! Document schema: classes, members and enumerations.
//!
//! A [`Schema`] is built once with [`SchemaBuilder`] and shared behind an
//! `Arc` by every replica of a document. Member offsets are derived from
//! the flattened class layout so every replica binds identical identifiers
//! to the members of a new object.

use std::collections::HashMap;
use std::fmt;
use serde::{Serialize, Deserialize};
use crate::types::error::{CoreError, CoreResult};
use crate::types::value::LeafKind;

/// Index of a class within its schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u32);

/// Index of an enumeration within its schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnumId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Flavour of a container member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    /// Fractional-key ordered sequence
    Ordered,
    /// Random-key set
    Unordered,
    /// Random-key set holding zero or one element
    Optional,
    /// Random-key set holding exactly one element
    Single,
}

impl ContainerKind {
    /// Whether slots are keyed by [`crate::types::keys::FloatKey`]
    pub fn is_ordered(&self) -> bool {
        matches!(self, ContainerKind::Ordered)
    }

    /// Name used in logs and the text codec
    pub fn name(&self) -> &'static str {
        match self {
            ContainerKind::Ordered => "ordered",
            ContainerKind::Unordered => "unordered",
            ContainerKind::Optional => "optional",
            ContainerKind::Single => "single",
        }
    }
}

/// What a member holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// Typed leaf value
    Leaf(LeafKind),
    /// Inline object of the given class
    Object(ClassId),
    /// Container of objects whose class is the given class or derives from it
    Container(ContainerKind, ClassId),
    /// Ephemeral message slot
    Message,
}

/// One member of a class, inherited members included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSpec {
    /// Member name, unique within the class
    pub name: String,
    /// What the member holds
    pub kind: MemberKind,
    /// Identifier offset from the owning object
    pub offset: u64,
}

/// A class of objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSpec {
    /// Index within the schema
    pub id: ClassId,
    /// Class name
    pub name: String,
    /// Base class
    pub parent: Option<ClassId>,
    /// Flattened members, base class members first
    pub members: Vec<MemberSpec>,
    /// Identifiers an instance occupies, itself included
    pub size: u64,
}

impl ClassSpec {
    /// Member by name
    pub fn member(&self, name: &str) -> Option<&MemberSpec> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// A named enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSpec {
    /// Index within the schema
    pub id: EnumId,
    /// Enumeration name
    pub name: String,
    /// Enumerator names, indexed by value
    pub enumerators: Vec<String>,
}

impl EnumSpec {
    /// Value of the named enumerator
    pub fn value_of(&self, enumerator: &str) -> Option<u32> {
        self.enumerators.iter().position(|e| e == enumerator).map(|i| i as u32)
    }
}

/// Immutable document schema
#[derive(Debug, Clone)]
pub struct Schema {
    version: String,
    classes: Vec<ClassSpec>,
    enums: Vec<EnumSpec>,
    class_names: HashMap<String, ClassId>,
    enum_names: HashMap<String, EnumId>,
    root: ClassId,
}

impl Schema {
    /// Start building a schema identified by `version`
    pub fn builder(version: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(version)
    }

    /// Version string, compared by peers on connection
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Class of the document root
    pub fn root(&self) -> &ClassSpec {
        &self.classes[self.root.0 as usize]
    }

    /// Class by id
    pub fn class(&self, id: ClassId) -> Option<&ClassSpec> {
        self.classes.get(id.0 as usize)
    }

    /// Class by name
    pub fn class_named(&self, name: &str) -> Option<&ClassSpec> {
        self.class_names.get(name).and_then(|id| self.class(*id))
    }

    /// Class by id, as a core error when missing
    pub fn require_class(&self, id: ClassId) -> CoreResult<&ClassSpec> {
        self.class(id).ok_or_else(|| CoreError::schema(format!("unknown {}", id)))
    }

    /// Enumeration by id
    pub fn enumeration(&self, id: EnumId) -> Option<&EnumSpec> {
        self.enums.get(id.0 as usize)
    }

    /// Enumeration by name
    pub fn enumeration_named(&self, name: &str) -> Option<&EnumSpec> {
        self.enum_names.get(name).and_then(|id| self.enumeration(*id))
    }

    /// All classes in declaration order
    pub fn classes(&self) -> &[ClassSpec] {
        &self.classes
    }

    /// All enumerations in declaration order
    pub fn enums(&self) -> &[EnumSpec] {
        &self.enums
    }

    /// Whether `class` is `base` or derives from it
    pub fn is_a(&self, class: ClassId, base: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == base {
                return true;
            }
            current = self.class(id).and_then(|c| c.parent);
        }
        false
    }
}

#[derive(Debug, Clone)]
enum PendingKind {
    Leaf(LeafKind),
    Enum(String),
    Object(String),
    Container(ContainerKind, String),
    Message,
}

#[derive(Debug, Clone)]
struct PendingClass {
    name: String,
    parent: Option<String>,
    members: Vec<(String, PendingKind)>,
}

/// Collects the members of one class
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    members: Vec<(String, PendingKind)>,
}

impl ClassBuilder {
    fn push(mut self, name: &str, kind: PendingKind) -> Self {
        self.members.push((name.to_string(), kind));
        self
    }

    /// Boolean member
    pub fn bool(self, name: &str) -> Self {
        self.push(name, PendingKind::Leaf(LeafKind::Bool))
    }

    /// Integer member
    pub fn int(self, name: &str) -> Self {
        self.push(name, PendingKind::Leaf(LeafKind::Int))
    }

    /// Float member
    pub fn float(self, name: &str) -> Self {
        self.push(name, PendingKind::Leaf(LeafKind::Float))
    }

    /// Blob member
    pub fn blob(self, name: &str) -> Self {
        self.push(name, PendingKind::Leaf(LeafKind::Blob))
    }

    /// String member
    pub fn string(self, name: &str) -> Self {
        self.push(name, PendingKind::Leaf(LeafKind::String))
    }

    /// Enum member of the named enumeration
    pub fn enumeration(self, name: &str, enumeration: &str) -> Self {
        self.push(name, PendingKind::Enum(enumeration.to_string()))
    }

    /// Object reference member
    pub fn reference(self, name: &str) -> Self {
        self.push(name, PendingKind::Leaf(LeafKind::ObjectRef))
    }

    /// Inline object member
    pub fn object(self, name: &str, class: &str) -> Self {
        self.push(name, PendingKind::Object(class.to_string()))
    }

    /// Ordered container member
    pub fn ordered(self, name: &str, class: &str) -> Self {
        self.push(name, PendingKind::Container(ContainerKind::Ordered, class.to_string()))
    }

    /// Unordered container member
    pub fn unordered(self, name: &str, class: &str) -> Self {
        self.push(name, PendingKind::Container(ContainerKind::Unordered, class.to_string()))
    }

    /// Zero-or-one container member
    pub fn optional(self, name: &str, class: &str) -> Self {
        self.push(name, PendingKind::Container(ContainerKind::Optional, class.to_string()))
    }

    /// Exactly-one container member
    pub fn single(self, name: &str, class: &str) -> Self {
        self.push(name, PendingKind::Container(ContainerKind::Single, class.to_string()))
    }

    /// Ephemeral message member
    pub fn message(self, name: &str) -> Self {
        self.push(name, PendingKind::Message)
    }
}

/// Builds a [`Schema`]; classes may reference classes declared later
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    version: String,
    enums: Vec<(String, Vec<String>)>,
    classes: Vec<PendingClass>,
    root: Option<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    Pending,
    Active,
    Done,
}

impl SchemaBuilder {
    /// Create an empty builder
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            enums: Vec::new(),
            classes: Vec::new(),
            root: None,
        }
    }

    /// Declare an enumeration
    pub fn enumeration<I, S>(mut self, name: &str, enumerators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enums
            .push((name.to_string(), enumerators.into_iter().map(Into::into).collect()));
        self
    }

    /// Declare a class
    pub fn class(self, name: &str, members: impl FnOnce(ClassBuilder) -> ClassBuilder) -> Self {
        self.declare(name, None, members)
    }

    /// Declare a class deriving from `parent`
    pub fn class_extending(
        self,
        name: &str,
        parent: &str,
        members: impl FnOnce(ClassBuilder) -> ClassBuilder,
    ) -> Self {
        self.declare(name, Some(parent), members)
    }

    fn declare(
        mut self,
        name: &str,
        parent: Option<&str>,
        members: impl FnOnce(ClassBuilder) -> ClassBuilder,
    ) -> Self {
        let built = members(ClassBuilder { members: Vec::new() });
        self.classes.push(PendingClass {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            members: built.members,
        });
        self
    }

    /// Name the class of the document root
    pub fn root(mut self, class: &str) -> Self {
        self.root = Some(class.to_string());
        self
    }

    /// Resolve names, flatten inheritance and compute member offsets
    pub fn build(self) -> CoreResult<Schema> {
        let mut enum_names = HashMap::new();
        let mut enums = Vec::with_capacity(self.enums.len());
        for (i, (name, enumerators)) in self.enums.into_iter().enumerate() {
            let id = EnumId(i as u32);
            if enum_names.insert(name.clone(), id).is_some() {
                return Err(CoreError::schema(format!("duplicate enumeration '{}'", name)));
            }
            if enumerators.is_empty() {
                return Err(CoreError::schema(format!("enumeration '{}' has no enumerators", name)));
            }
            enums.push(EnumSpec { id, name, enumerators });
        }

        let mut class_names = HashMap::new();
        for (i, class) in self.classes.iter().enumerate() {
            if class_names.insert(class.name.clone(), ClassId(i as u32)).is_some() {
                return Err(CoreError::schema(format!("duplicate class '{}'", class.name)));
            }
        }

        let mut layout = Layout {
            pending: &self.classes,
            class_names: &class_names,
            enum_names: &enum_names,
            visit: vec![Visit::Pending; self.classes.len()],
            resolved: vec![None; self.classes.len()],
        };
        for i in 0..self.classes.len() {
            layout.resolve(i)?;
        }

        let classes = layout
            .resolved
            .into_iter()
            .map(|c| c.ok_or_else(|| CoreError::schema("unresolved class")))
            .collect::<CoreResult<Vec<_>>>()?;

        let root_name = self.root.ok_or_else(|| CoreError::schema("no root class declared"))?;
        let root = *class_names
            .get(&root_name)
            .ok_or_else(|| CoreError::schema(format!("unknown root class '{}'", root_name)))?;

        Ok(Schema {
            version: self.version,
            classes,
            enums,
            class_names,
            enum_names,
            root,
        })
    }
}

struct Layout<'a> {
    pending: &'a [PendingClass],
    class_names: &'a HashMap<String, ClassId>,
    enum_names: &'a HashMap<String, EnumId>,
    visit: Vec<Visit>,
    resolved: Vec<Option<ClassSpec>>,
}

impl Layout<'_> {
    fn class_id(&self, name: &str, context: &str) -> CoreResult<ClassId> {
        self.class_names
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::schema(format!("unknown class '{}' in '{}'", name, context)))
    }

    fn resolve(&mut self, index: usize) -> CoreResult<()> {
        match self.visit[index] {
            Visit::Done => return Ok(()),
            Visit::Active => {
                return Err(CoreError::schema(format!(
                    "class '{}' contains itself through inheritance or inline objects",
                    self.pending[index].name
                )))
            }
            Visit::Pending => {}
        }
        self.visit[index] = Visit::Active;

        let pending = self.pending;
        let class = &pending[index];
        let mut members = Vec::new();
        let mut size = 1;
        let parent = match &class.parent {
            Some(parent_name) => {
                let parent = self.class_id(parent_name, &class.name)?;
                self.resolve(parent.0 as usize)?;
                if let Some(base) = &self.resolved[parent.0 as usize] {
                    members = base.members.clone();
                    size = base.size;
                }
                Some(parent)
            }
            None => None,
        };

        for (name, pending) in &class.members {
            if members.iter().any(|m: &MemberSpec| &m.name == name) {
                return Err(CoreError::schema(format!(
                    "duplicate member '{}' in class '{}'",
                    name, class.name
                )));
            }
            let (kind, member_size) = match pending {
                PendingKind::Leaf(kind) => (MemberKind::Leaf(*kind), 1),
                PendingKind::Enum(enum_name) => {
                    let id = self.enum_names.get(enum_name).copied().ok_or_else(|| {
                        CoreError::schema(format!("unknown enumeration '{}' in '{}'", enum_name, class.name))
                    })?;
                    (MemberKind::Leaf(LeafKind::Enum(id)), 1)
                }
                PendingKind::Object(class_name) => {
                    let id = self.class_id(class_name, &class.name)?;
                    self.resolve(id.0 as usize)?;
                    let inner = self.resolved[id.0 as usize]
                        .as_ref()
                        .map(|c| c.size)
                        .ok_or_else(|| CoreError::schema("unresolved inline class"))?;
                    (MemberKind::Object(id), inner)
                }
                PendingKind::Container(kind, class_name) => {
                    (MemberKind::Container(*kind, self.class_id(class_name, &class.name)?), 1)
                }
                PendingKind::Message => (MemberKind::Message, 1),
            };
            members.push(MemberSpec { name: name.clone(), kind, offset: size });
            size += member_size;
        }

        self.resolved[index] = Some(ClassSpec {
            id: ClassId(index as u32),
            name: class.name.clone(),
            parent,
            members,
            size,
        });
        self.visit[index] = Visit::Done;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Schemas shared by the unit tests of this crate

    use std::sync::Arc;
    use super::*;

    /// Patcher-like schema exercising every member kind
    pub(crate) fn patcher() -> Arc<Schema> {
        let schema = Schema::builder("test.patcher.1")
            .enumeration("Mode", ["Linear", "Log", "Exp"])
            .class("Point", |c| c.float("x").float("y"))
            .class("Object", |c| {
                c.string("text")
                    .object("position", "Point")
                    .int("inlets")
                    .bool("locked")
                    .blob("state")
                    .enumeration("mode", "Mode")
                    .ordered("children", "Object")
                    .message("events")
            })
            .class_extending("Comment", "Object", |c| c.string("body"))
            .class_extending("Slider", "Object", |c| c.single("range", "Point"))
            .class("Link", |c| c.reference("sender").int("outlet").reference("receiver").int("inlet"))
            .class("Patcher", |c| {
                c.unordered("objects", "Object")
                    .unordered("links", "Link")
                    .ordered("layers", "Object")
                    .optional("selection", "Object")
                    .string("name")
            })
            .root("Patcher")
            .build()
            .unwrap();
        Arc::new(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets_include_inline_objects() {
        let schema = fixtures::patcher();
        let object = schema.class_named("Object").unwrap();
        let offsets: Vec<(&str, u64)> = object.members.iter().map(|m| (m.name.as_str(), m.offset)).collect();
        assert_eq!(
            offsets,
            vec![
                ("text", 1),
                ("position", 2),
                ("inlets", 5),
                ("locked", 6),
                ("state", 7),
                ("mode", 8),
                ("children", 9),
                ("events", 10),
            ]
        );
        assert_eq!(object.size, 11);
    }

    #[test]
    fn test_inheritance_flattens_members() {
        let schema = fixtures::patcher();
        let object = schema.class_named("Object").unwrap().id;
        let comment = schema.class_named("Comment").unwrap();
        assert_eq!(comment.parent, Some(object));
        assert_eq!(comment.member("body").unwrap().offset, 11);
        assert_eq!(comment.size, 12);
        assert!(schema.is_a(comment.id, object));
        assert!(!schema.is_a(object, comment.id));
    }

    #[test]
    fn test_rejects_recursive_inline_object() {
        let result = Schema::builder("bad")
            .class("Node", |c| c.object("next", "Node"))
            .root("Node")
            .build();
        assert!(matches!(result, Err(CoreError::Schema(_))));
    }

    #[test]
    fn test_rejects_unknown_names() {
        assert!(Schema::builder("bad")
            .class("A", |c| c.unordered("items", "Missing"))
            .root("A")
            .build()
            .is_err());
        assert!(Schema::builder("bad")
            .class("A", |c| c.enumeration("mode", "Missing"))
            .root("A")
            .build()
            .is_err());
        assert!(Schema::builder("bad").class("A", |c| c).build().is_err());
        assert!(Schema::builder("bad")
            .class("A", |c| c.int("x").int("x"))
            .root("A")
            .build()
            .is_err());
    }

    #[test]
    fn test_enum_lookup() {
        let schema = fixtures::patcher();
        let mode = schema.enumeration_named("Mode").unwrap();
        assert_eq!(mode.value_of("Log"), Some(1));
        assert_eq!(mode.value_of("Cubic"), None);
    }
}
