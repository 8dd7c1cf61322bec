use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub use codec::{PayloadDecoder, Value, decode, encode};

use crate::error::{Error, Result};

mod codec;

pub const OBJID_LEN: usize = 32;

const TAG_INODE: &str = "inode";
const TAG_TREE: &str = "tree";
const TAG_BLOB: &str = "blob";

/// Content address of an object: the BLAKE3 hash of its payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjId(#[serde(with = "hex::serde")] [u8; OBJID_LEN]);

impl ObjId {
    pub fn of(payload: &[u8]) -> Self {
        ObjId(*blake3::hash(payload).as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; OBJID_LEN]) -> Self {
        ObjId(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; OBJID_LEN]>::try_from(bytes).ok().map(ObjId)
    }

    pub fn as_bytes(&self) -> &[u8; OBJID_LEN] {
        &self.0
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId({self})")
    }
}

impl FromStr for ObjId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut bytes = [0u8; OBJID_LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(ObjId(bytes))
    }
}

/// Ownership, permission and timestamp metadata of a file or directory.
///
/// Timestamps are nanoseconds since the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectInfo {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub atime: i64,
    pub mtime: i64,
}

impl ObjectInfo {
    fn from_value(value: Value) -> Result<Self> {
        let Value::Map(entries) = value else {
            return Err(malformed(format!(
                "object metadata must be a map, found {}",
                value.kind()
            )));
        };

        let (mut uid, mut gid, mut mode, mut atime, mut mtime) = (None, None, None, None, None);
        for (key, value) in entries {
            let Value::Str(key) = key else {
                return Err(malformed("object metadata keys must be strings"));
            };
            let slot = match key.as_str() {
                "uid" => &mut uid,
                "gid" => &mut gid,
                "mode" => &mut mode,
                "atime" => &mut atime,
                "mtime" => &mut mtime,
                // Written by another version; not needed to restore.
                _ => continue,
            };
            match value {
                Value::Int(n) => *slot = Some(n),
                other => {
                    return Err(malformed(format!(
                        "metadata field {key:?} must be an integer, found {}",
                        other.kind()
                    )));
                }
            }
        }

        fn required(field: &str, value: Option<i64>) -> Result<i64> {
            value.ok_or_else(|| malformed(format!("metadata field {field:?} is missing")))
        }

        fn narrow(field: &str, value: Option<i64>) -> Result<u32> {
            let value = required(field, value)?;
            u32::try_from(value)
                .map_err(|_| malformed(format!("metadata field {field:?} out of range: {value}")))
        }

        Ok(ObjectInfo {
            uid: narrow("uid", uid)?,
            gid: narrow("gid", gid)?,
            mode: narrow("mode", mode)?,
            atime: required("atime", atime)?,
            mtime: required("mtime", mtime)?,
        })
    }

    fn to_value(self) -> Value {
        let field = |name: &str, n: i64| (Value::Str(name.to_string()), Value::Int(n));
        Value::Map(vec![
            field("uid", self.uid.into()),
            field("gid", self.gid.into()),
            field("mode", self.mode.into()),
            field("atime", self.atime),
            field("mtime", self.mtime),
        ])
    }
}

/// One piece of an inode: the blob stored at `objid` belongs at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub objid: ObjId,
}

/// One directory entry. Names are raw bytes and are not assumed to be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: Vec<u8>,
    pub objid: ObjId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Inode {
        info: ObjectInfo,
        chunks: Vec<Chunk>,
    },
    Tree {
        info: ObjectInfo,
        entries: Vec<TreeEntry>,
    },
    Blob {
        data: Vec<u8>,
    },
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Inode { .. } => TAG_INODE,
            Object::Tree { .. } => TAG_TREE,
            Object::Blob { .. } => TAG_BLOB,
        }
    }

    /// Decodes and validates a payload.
    ///
    /// A payload whose type tag is not recognised fails with
    /// [`Error::UnknownObjectType`]; every other deviation from the expected
    /// shape is [`Error::MalformedPayload`].
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let mut values = decode(payload);

        let tag = match values.expect_value("object type")? {
            Value::Str(tag) => tag,
            other => {
                return Err(malformed(format!(
                    "object type must be a string, found {}",
                    other.kind()
                )));
            }
        };

        let object = match tag.as_str() {
            TAG_INODE => {
                let info = ObjectInfo::from_value(values.expect_value("inode metadata")?)?;
                let chunks = pairs(values.expect_value("inode contents")?, "inode contents")?
                    .into_iter()
                    .map(|(offset, objid)| {
                        Ok(Chunk {
                            offset: offset_of(offset)?,
                            objid: objid_of(objid)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Object::Inode { info, chunks }
            }
            TAG_TREE => {
                let info = ObjectInfo::from_value(values.expect_value("tree metadata")?)?;
                let entries = pairs(values.expect_value("tree contents")?, "tree contents")?
                    .into_iter()
                    .map(|(name, objid)| {
                        let Value::Bytes(name) = name else {
                            return Err(malformed(format!(
                                "tree entry name must be bytes, found {}",
                                name.kind()
                            )));
                        };
                        Ok(TreeEntry {
                            name,
                            objid: objid_of(objid)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Object::Tree { info, entries }
            }
            TAG_BLOB => match values.expect_value("blob contents")? {
                Value::Bytes(data) => Object::Blob { data },
                other => {
                    return Err(malformed(format!(
                        "blob contents must be bytes, found {}",
                        other.kind()
                    )));
                }
            },
            _ => return Err(Error::UnknownObjectType(tag)),
        };

        if values.next().is_some() {
            return Err(malformed(format!(
                "{} payload has more values than expected",
                object.type_name()
            )));
        }
        values.finish()?;

        Ok(object)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let tag = Value::Str(self.type_name().to_string());
        match self {
            Object::Inode { info, chunks } => {
                let contents = chunks
                    .iter()
                    .map(|chunk| {
                        Value::Seq(vec![
                            Value::Int(chunk.offset as i64),
                            Value::Bytes(chunk.objid.as_bytes().to_vec()),
                        ])
                    })
                    .collect();
                encode(&[tag, info.to_value(), Value::Seq(contents)])
            }
            Object::Tree { info, entries } => {
                let contents = entries
                    .iter()
                    .map(|entry| {
                        Value::Seq(vec![
                            Value::Bytes(entry.name.clone()),
                            Value::Bytes(entry.objid.as_bytes().to_vec()),
                        ])
                    })
                    .collect();
                encode(&[tag, info.to_value(), Value::Seq(contents)])
            }
            Object::Blob { data } => encode(&[tag, Value::Bytes(data.clone())]),
        }
    }

    /// The object ids this object structurally references.
    pub fn children(&self) -> BTreeSet<ObjId> {
        match self {
            Object::Inode { chunks, .. } => chunks.iter().map(|c| c.objid).collect(),
            Object::Tree { entries, .. } => entries.iter().map(|e| e.objid).collect(),
            Object::Blob { .. } => BTreeSet::new(),
        }
    }
}

/// Derives the set of object ids referenced by an encoded object.
pub fn calculate_children(payload: &[u8]) -> Result<BTreeSet<ObjId>> {
    Ok(Object::from_payload(payload)?.children())
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::MalformedPayload(reason.into())
}

fn pairs(value: Value, what: &str) -> Result<Vec<(Value, Value)>> {
    let Value::Seq(items) = value else {
        return Err(malformed(format!(
            "{what} must be a sequence, found {}",
            value.kind()
        )));
    };

    items
        .into_iter()
        .map(|item| {
            let Value::Seq(pair) = item else {
                return Err(malformed(format!(
                    "{what} must hold pairs, found {}",
                    item.kind()
                )));
            };
            let [first, second]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
                malformed(format!("{what}: expected a pair, found {} values", pair.len()))
            })?;
            Ok((first, second))
        })
        .collect()
}

fn objid_of(value: Value) -> Result<ObjId> {
    match value {
        Value::Bytes(bytes) => ObjId::from_slice(&bytes).ok_or_else(|| {
            malformed(format!(
                "object id must be {OBJID_LEN} bytes, found {}",
                bytes.len()
            ))
        }),
        other => Err(malformed(format!(
            "object id must be bytes, found {}",
            other.kind()
        ))),
    }
}

fn offset_of(value: Value) -> Result<u64> {
    match value {
        Value::Int(n) => {
            u64::try_from(n).map_err(|_| malformed(format!("negative chunk offset {n}")))
        }
        other => Err(malformed(format!(
            "chunk offset must be an integer, found {}",
            other.kind()
        ))),
    }
}
