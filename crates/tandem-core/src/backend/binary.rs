//! Compact binary snapshot codec.
//!
//! Layout: magic, format version, schema version, four name tables, then
//! the object tree. Integers are LEB128 varints; signed integers are
//! zigzag encoded first.

use std::collections::BTreeMap;
use bytes::{BufMut, BytesMut};
use crate::backend::ir::{IrDocument, IrNode, IrObject, NameTables};
use crate::constants::{BINARY_FORMAT_VERSION, BINARY_MAGIC, MAX_DEPTH, RANDOM_KEY_LENGTH};
use crate::types::error::CodecError;
use crate::types::ids::NodeId;
use crate::types::keys::{FloatKey, RandomKey};

const TAG_BOOL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_BLOB: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_ENUM: u8 = 5;
const TAG_REF: u8 = 6;
const TAG_OBJECT: u8 = 7;
const TAG_ORDERED: u8 = 8;
const TAG_UNORDERED: u8 = 9;
const TAG_MESSAGE: u8 = 10;

/// Interned name tables, positions in sorted order
struct Interner {
    typenames: BTreeMap<String, u64>,
    members: BTreeMap<String, u64>,
    enums: BTreeMap<String, u64>,
    enumerators: BTreeMap<String, u64>,
}

fn index_of(table: &std::collections::BTreeSet<String>) -> BTreeMap<String, u64> {
    table.iter().enumerate().map(|(i, name)| (name.clone(), i as u64)).collect()
}

impl Interner {
    fn new(tables: &NameTables) -> Self {
        Self {
            typenames: index_of(&tables.typenames),
            members: index_of(&tables.members),
            enums: index_of(&tables.enums),
            enumerators: index_of(&tables.enumerators),
        }
    }
}

/// Encode a document
pub fn encode(doc: &IrDocument) -> Vec<u8> {
    let tables = doc.names();
    let interner = Interner::new(&tables);
    let mut buf = BytesMut::with_capacity(256);
    buf.put_slice(BINARY_MAGIC);
    buf.put_u8(BINARY_FORMAT_VERSION);
    put_str(&mut buf, &doc.version);
    for table in [&tables.typenames, &tables.members, &tables.enums, &tables.enumerators] {
        put_varint(&mut buf, table.len() as u64);
        for name in table {
            put_str(&mut buf, name);
        }
    }
    put_object(&mut buf, &interner, &doc.root);
    buf.to_vec()
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    put_varint(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

fn put_str(buf: &mut BytesMut, s: &str) {
    put_bytes(buf, s.as_bytes());
}

fn put_id(buf: &mut BytesMut, id: NodeId) {
    put_varint(buf, id.user);
    put_varint(buf, id.actor);
    put_varint(buf, id.seq);
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

// Every name of the document is in the tables built from it.
fn interned(table: &BTreeMap<String, u64>, name: &str) -> u64 {
    table.get(name).copied().unwrap_or_default()
}

fn put_object(buf: &mut BytesMut, names: &Interner, object: &IrObject) {
    put_varint(buf, interned(&names.typenames, &object.class));
    put_id(buf, object.id);
    put_varint(buf, object.members.len() as u64);
    for (name, node) in &object.members {
        put_varint(buf, interned(&names.members, name));
        match node {
            IrNode::Bool(v) => {
                buf.put_u8(TAG_BOOL);
                buf.put_u8(u8::from(*v));
            }
            IrNode::Int(v) => {
                buf.put_u8(TAG_INT);
                put_varint(buf, zigzag(*v));
            }
            IrNode::Float(v) => {
                buf.put_u8(TAG_FLOAT);
                buf.put_u64_le(v.to_bits());
            }
            IrNode::Blob(v) => {
                buf.put_u8(TAG_BLOB);
                put_bytes(buf, v);
            }
            IrNode::String(v) => {
                buf.put_u8(TAG_STRING);
                put_str(buf, v);
            }
            IrNode::Enum { name, enumerator } => {
                buf.put_u8(TAG_ENUM);
                put_varint(buf, interned(&names.enums, name));
                put_varint(buf, interned(&names.enumerators, enumerator));
            }
            IrNode::ObjectRef(id) => {
                buf.put_u8(TAG_REF);
                put_id(buf, *id);
            }
            IrNode::Object(inner) => {
                buf.put_u8(TAG_OBJECT);
                put_object(buf, names, inner);
            }
            IrNode::Ordered(items) => {
                buf.put_u8(TAG_ORDERED);
                put_varint(buf, items.len() as u64);
                for (key, child) in items {
                    put_bytes(buf, key.as_bytes());
                    put_object(buf, names, child);
                }
            }
            IrNode::Unordered(items) => {
                buf.put_u8(TAG_UNORDERED);
                put_varint(buf, items.len() as u64);
                for (key, child) in items {
                    buf.put_slice(key.as_bytes());
                    put_object(buf, names, child);
                }
            }
            IrNode::Message => buf.put_u8(TAG_MESSAGE),
        }
    }
}

/// Decode a document
pub fn decode(data: &[u8]) -> Result<IrDocument, CodecError> {
    let mut reader = Reader { data, pos: 0 };
    if reader.take(BINARY_MAGIC.len())? != BINARY_MAGIC {
        return Err(CodecError::BadHeader("missing TNDM magic".into()));
    }
    let format = reader.u8()?;
    if format != BINARY_FORMAT_VERSION {
        return Err(CodecError::BadHeader(format!("unsupported format version {}", format)));
    }
    let version = reader.string()?;
    let mut tables: [Vec<String>; 4] = Default::default();
    for table in tables.iter_mut() {
        let count = reader.varint()?;
        for _ in 0..count {
            table.push(reader.string()?);
        }
    }
    let root = reader.object(&tables, 0)?;
    if reader.pos != data.len() {
        return Err(CodecError::TrailingBytes { count: data.len() - reader.pos });
    }
    Ok(IrDocument { version, root })
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

const TABLE_NAMES: [&str; 4] = ["typename", "member", "enum", "enumerator"];

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        let Some(end) = end else {
            return Err(CodecError::UnexpectedEof { offset: self.data.len() });
        };
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn varint(&mut self) -> Result<u64, CodecError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            if shift >= 64 {
                return Err(CodecError::BadHeader(format!("varint overflow at byte {}", self.pos)));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn len(&mut self) -> Result<usize, CodecError> {
        let len = self.varint()?;
        usize::try_from(len).map_err(|_| CodecError::UnexpectedEof { offset: self.data.len() })
    }

    fn bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.len()?;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    fn id(&mut self) -> Result<NodeId, CodecError> {
        Ok(NodeId::new(self.varint()?, self.varint()?, self.varint()?))
    }

    fn name(&mut self, tables: &[Vec<String>; 4], table: usize) -> Result<String, CodecError> {
        let index = self.varint()?;
        tables[table]
            .get(index as usize)
            .cloned()
            .ok_or(CodecError::UnknownName { table: TABLE_NAMES[table], index })
    }

    fn object(&mut self, tables: &[Vec<String>; 4], depth: usize) -> Result<IrObject, CodecError> {
        if depth >= MAX_DEPTH {
            return Err(CodecError::TooDeep { limit: MAX_DEPTH });
        }
        let class = self.name(tables, 0)?;
        let id = self.id()?;
        let count = self.varint()?;
        let mut members = Vec::new();
        for _ in 0..count {
            let name = self.name(tables, 1)?;
            let offset = self.pos;
            let node = match self.u8()? {
                TAG_BOOL => IrNode::Bool(self.u8()? != 0),
                TAG_INT => IrNode::Int(unzigzag(self.varint()?)),
                TAG_FLOAT => {
                    let mut bits = [0u8; 8];
                    bits.copy_from_slice(self.take(8)?);
                    IrNode::Float(f64::from_bits(u64::from_le_bytes(bits)))
                }
                TAG_BLOB => IrNode::Blob(self.bytes()?.to_vec()),
                TAG_STRING => IrNode::String(self.string()?),
                TAG_ENUM => IrNode::Enum { name: self.name(tables, 2)?, enumerator: self.name(tables, 3)? },
                TAG_REF => IrNode::ObjectRef(self.id()?),
                TAG_OBJECT => IrNode::Object(self.object(tables, depth + 1)?),
                TAG_ORDERED => {
                    let count = self.varint()?;
                    let mut items = BTreeMap::new();
                    for _ in 0..count {
                        let key = FloatKey::from_bytes(self.bytes()?.to_vec())
                            .map_err(|e| CodecError::InvalidKey(e.to_string()))?;
                        items.insert(key, self.object(tables, depth + 1)?);
                    }
                    IrNode::Ordered(items)
                }
                TAG_UNORDERED => {
                    let count = self.varint()?;
                    let mut items = BTreeMap::new();
                    for _ in 0..count {
                        let mut key = [0u8; RANDOM_KEY_LENGTH];
                        key.copy_from_slice(self.take(RANDOM_KEY_LENGTH)?);
                        items.insert(RandomKey::from_bytes(key), self.object(tables, depth + 1)?);
                    }
                    IrNode::Unordered(items)
                }
                TAG_MESSAGE => IrNode::Message,
                tag => return Err(CodecError::UnknownTag { tag, offset }),
            };
            members.push((name, node));
        }
        Ok(IrObject { id, class, members })
    }
}
