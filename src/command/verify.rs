use std::{collections::BTreeSet, fmt};

use tracing::{info, instrument, warn};

use crate::{
    cache::{LocalCache, ObjectIndex},
    error::{Error, Result},
    object::{ObjId, Object},
};

/// One way the local cache disagrees with itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// The cached payload does not decode.
    Undecodable { objid: ObjId, reason: String },
    /// The cached payload does not hash to the id it is stored under.
    HashMismatch { objid: ObjId, actual: ObjId },
    /// No child edges were recorded for the object.
    MissingEdges { objid: ObjId },
    /// Recorded edges differ from the references in the payload.
    EdgeMismatch {
        objid: ObjId,
        missing: BTreeSet<ObjId>,
        extra: BTreeSet<ObjId>,
    },
    /// A tree entry points at an object the cache does not hold.
    DanglingReference { objid: ObjId, child: ObjId },
}

impl Inconsistency {
    pub fn objid(&self) -> ObjId {
        match self {
            Inconsistency::Undecodable { objid, .. }
            | Inconsistency::HashMismatch { objid, .. }
            | Inconsistency::MissingEdges { objid }
            | Inconsistency::EdgeMismatch { objid, .. }
            | Inconsistency::DanglingReference { objid, .. } => *objid,
        }
    }
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::Undecodable { objid, reason } => {
                write!(f, "{objid}: payload does not decode: {reason}")
            }
            Inconsistency::HashMismatch { objid, actual } => {
                write!(f, "{objid}: payload hashes to {actual}")
            }
            Inconsistency::MissingEdges { objid } => write!(f, "{objid}: no recorded children"),
            Inconsistency::EdgeMismatch {
                objid,
                missing,
                extra,
            } => write!(
                f,
                "{objid}: recorded children differ ({} missing, {} extra)",
                missing.len(),
                extra.len()
            ),
            Inconsistency::DanglingReference { objid, child } => {
                write!(f, "{objid}: tree entry {child} is not cached")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub checked: usize,
    pub inconsistencies: Vec<Inconsistency>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.inconsistencies.is_empty()
    }

    /// Fails with [`Error::CorruptedRepository`] naming the first
    /// inconsistency, if any.
    pub fn into_result(self) -> Result<usize> {
        match self.inconsistencies.into_iter().next() {
            None => Ok(self.checked),
            Some(first) => Err(Error::corrupted(first.objid(), first.to_string())),
        }
    }
}

/// Checks every cached object: its payload decodes and hashes to its id,
/// its recorded edges equal the references in the payload, and every tree
/// entry is itself cached.
#[instrument(skip_all)]
pub fn verify_cache(cache: &LocalCache) -> VerifyReport {
    let mut objects: Vec<_> = cache.iter().collect();
    objects.sort_by_key(|object| object.objid);

    let mut report = VerifyReport::default();
    for object in objects {
        report.checked += 1;
        let objid = object.objid;

        let actual = ObjId::of(&object.payload);
        if actual != objid {
            report
                .inconsistencies
                .push(Inconsistency::HashMismatch { objid, actual });
        }

        let decoded = match object.decode() {
            Ok(decoded) => decoded,
            Err(e) => {
                report.inconsistencies.push(Inconsistency::Undecodable {
                    objid,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let expected = decoded.children();
        match cache.children(&objid) {
            None => report
                .inconsistencies
                .push(Inconsistency::MissingEdges { objid }),
            Some(recorded) if recorded != expected => {
                report.inconsistencies.push(Inconsistency::EdgeMismatch {
                    objid,
                    missing: expected.difference(&recorded).copied().collect(),
                    extra: recorded.difference(&expected).copied().collect(),
                })
            }
            Some(_) => {}
        }

        // Inode children are blobs, which live only in the datastore.
        if let Object::Tree { entries, .. } = decoded {
            for entry in entries {
                if !cache.contains(&entry.objid) {
                    report.inconsistencies.push(Inconsistency::DanglingReference {
                        objid,
                        child: entry.objid,
                    });
                }
            }
        }
    }

    for inconsistency in &report.inconsistencies {
        warn!(objid = %inconsistency.objid(), "{inconsistency}");
    }
    info!(
        checked = report.checked,
        inconsistencies = report.inconsistencies.len(),
        "cache verified"
    );

    report
}
