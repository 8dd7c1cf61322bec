use std::{
    collections::{BTreeSet, HashMap},
    io::{self, Read, Write},
};

use serde::{Deserialize, Serialize};

pub use self::bincode::BincodeStore;

use crate::{
    error::Result,
    object::{ObjId, Object},
};

mod bincode;

/// A tree or inode payload held in the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedObject {
    pub objid: ObjId,
    pub payload: Vec<u8>,
}

impl CachedObject {
    pub fn decode(&self) -> Result<Object> {
        Object::from_payload(&self.payload)
    }
}

/// Lookup side of the local cache, as used by restore.
pub trait ObjectIndex: Send + Sync {
    fn lookup(&self, objid: &ObjId) -> Option<CachedObject>;

    /// The child edges recorded when the object was cached.
    fn children(&self, objid: &ObjId) -> Option<BTreeSet<ObjId>>;
}

/// In-memory cache of tree and inode objects plus their parent-child edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalCache {
    objects: HashMap<ObjId, CachedObject>,
    edges: HashMap<ObjId, BTreeSet<ObjId>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `payload` under its content address with the given edges.
    /// The payload is trusted; it is not decoded here.
    pub fn insert(&mut self, payload: Vec<u8>, children: BTreeSet<ObjId>) -> ObjId {
        let objid = ObjId::of(&payload);
        self.objects.insert(objid, CachedObject { objid, payload });
        self.edges.insert(objid, children);
        objid
    }

    pub fn insert_object(&mut self, object: &Object) -> Result<ObjId> {
        Ok(self.insert(object.to_payload()?, object.children()))
    }

    pub fn remove(&mut self, objid: &ObjId) -> Option<CachedObject> {
        self.edges.remove(objid);
        self.objects.remove(objid)
    }

    pub fn contains(&self, objid: &ObjId) -> bool {
        self.objects.contains_key(objid)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CachedObject> {
        self.objects.values()
    }

    /// Cached objects reachable through the recorded edges of `objid`.
    /// Edges to objects that are not cached, such as blobs, are left out.
    pub fn enumerate_children(&self, objid: &ObjId) -> Vec<&CachedObject> {
        self.edges
            .get(objid)
            .into_iter()
            .flatten()
            .filter_map(|child| self.objects.get(child))
            .collect()
    }

    pub(crate) fn set_edges(&mut self, objid: ObjId, children: BTreeSet<ObjId>) {
        self.edges.insert(objid, children);
    }

    pub fn load<S: CacheStore, R: Read>(store: &S, reader: R) -> io::Result<Self> {
        store.open(reader)
    }

    pub fn save<S: CacheStore, W: Write>(&self, store: &S, writer: W) -> io::Result<()> {
        store.save(self, writer)
    }
}

impl ObjectIndex for LocalCache {
    fn lookup(&self, objid: &ObjId) -> Option<CachedObject> {
        self.objects.get(objid).cloned()
    }

    fn children(&self, objid: &ObjId) -> Option<BTreeSet<ObjId>> {
        self.edges.get(objid).cloned()
    }
}

pub trait CacheStore {
    fn open<R: Read>(&self, reader: R) -> io::Result<LocalCache>;
    fn save<W: Write>(&self, cache: &LocalCache, writer: W) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Chunk, ObjectInfo, TreeEntry};

    fn inode(data: &[u8]) -> Object {
        Object::Inode {
            info: ObjectInfo::default(),
            chunks: vec![Chunk {
                offset: 0,
                objid: ObjId::of(data),
            }],
        }
    }

    #[test]
    fn lookup_and_children() {
        let mut cache = LocalCache::new();
        let file = cache.insert_object(&inode(b"blob")).unwrap();
        let tree = cache
            .insert_object(&Object::Tree {
                info: ObjectInfo::default(),
                entries: vec![TreeEntry {
                    name: b"file".to_vec(),
                    objid: file,
                }],
            })
            .unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&tree).unwrap().objid, tree);
        assert_eq!(cache.children(&tree).unwrap(), BTreeSet::from([file]));

        let children = cache.enumerate_children(&tree);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].objid, file);

        // Blob edges are recorded but blobs themselves are not cached.
        assert!(cache.enumerate_children(&file).is_empty());
        assert_eq!(cache.children(&file).unwrap().len(), 1);
    }

    #[test]
    fn remove_forgets_object_and_edges() {
        let mut cache = LocalCache::new();
        let file = cache.insert_object(&inode(b"x")).unwrap();

        assert!(cache.remove(&file).is_some());
        assert!(cache.lookup(&file).is_none());
        assert!(cache.children(&file).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn persists_through_bincode() {
        let mut cache = LocalCache::new();
        let file = cache.insert_object(&inode(b"persisted")).unwrap();

        let mut buffer = Vec::new();
        cache.save(&BincodeStore, &mut buffer).unwrap();
        let reopened = LocalCache::load(&BincodeStore, buffer.as_slice()).unwrap();

        assert_eq!(reopened.lookup(&file), cache.lookup(&file));
        assert_eq!(reopened.children(&file), cache.children(&file));
    }

    #[test]
    fn garbage_cache_file_is_invalid_data() {
        let err = LocalCache::load(&BincodeStore, &b"\xff\xff\xff"[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
