use std::collections::HashSet;

use tracing::{debug, info, instrument};

use crate::{
    cache::LocalCache,
    crypto::PrivateKey,
    datastore::Datastore,
    error::{Error, Result},
    object::{ObjId, Object},
};

/// Builds a fresh cache from the datastore, holding every tree and inode
/// reachable from `roots`.
///
/// Blobs are not fetched. Any object that cannot be fetched or decoded
/// aborts the rebuild, as does a blob where a tree or inode was expected.
#[instrument(skip(datastore, key), fields(roots = roots.len()), err)]
pub async fn rebuild_cache(
    datastore: &Datastore,
    roots: &[ObjId],
    key: Option<&PrivateKey>,
) -> Result<LocalCache> {
    let mut cache = LocalCache::new();
    let mut seen: HashSet<ObjId> = HashSet::new();
    let mut stack: Vec<ObjId> = roots.to_vec();

    while let Some(objid) = stack.pop() {
        if !seen.insert(objid) {
            continue;
        }

        let payload = datastore.get_object(&objid, key).await?;
        let object = Object::from_payload(&payload)?;
        debug!(%objid, obj_type = object.type_name(), "fetched");

        match &object {
            Object::Tree { entries, .. } => {
                stack.extend(entries.iter().map(|entry| entry.objid));
            }
            Object::Inode { .. } => {}
            Object::Blob { .. } => {
                return Err(Error::UnsupportedObject {
                    objid,
                    obj_type: object.type_name(),
                });
            }
        }

        cache.insert(payload, object.children());
    }

    info!(objects = cache.len(), "cache rebuilt");
    Ok(cache)
}
