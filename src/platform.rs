//! Filesystem metadata capture and application, with the platform
//! differences kept in one place.

use std::{
    ffi::{OsStr, OsString},
    fs::Metadata,
    io,
    path::Path,
};

use filetime::FileTime;

use crate::object::ObjectInfo;

const NANOS_PER_SEC: i64 = 1_000_000_000;

pub fn object_info(metadata: &Metadata) -> ObjectInfo {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        ObjectInfo {
            uid: metadata.uid(),
            gid: metadata.gid(),
            mode: metadata.mode() & 0o7777,
            atime: metadata.atime() * NANOS_PER_SEC + metadata.atime_nsec(),
            mtime: metadata.mtime() * NANOS_PER_SEC + metadata.mtime_nsec(),
        }
    }

    #[cfg(not(unix))]
    {
        use std::time::{SystemTime, UNIX_EPOCH};

        let nanos = |time: io::Result<SystemTime>| {
            time.ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_nanos() as i64)
        };
        let readonly = metadata.permissions().readonly();
        let mode = match (metadata.is_dir(), readonly) {
            (true, true) => 0o555,
            (true, false) => 0o755,
            (false, true) => 0o444,
            (false, false) => 0o644,
        };

        ObjectInfo {
            uid: 0,
            gid: 0,
            mode,
            atime: nanos(metadata.accessed()),
            mtime: nanos(metadata.modified()),
        }
    }
}

pub fn name_bytes(name: &OsStr) -> Vec<u8> {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        name.as_bytes().to_vec()
    }

    #[cfg(not(unix))]
    {
        name.to_string_lossy().into_owned().into_bytes()
    }
}

/// Turns a stored entry name back into a native file name.
///
/// Lossless on unix. Elsewhere invalid UTF-8 is replaced rather than
/// rejected.
pub fn name_from_bytes(name: &[u8]) -> OsString {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        OsStr::from_bytes(name).to_os_string()
    }

    #[cfg(not(unix))]
    {
        OsString::from(String::from_utf8_lossy(name).into_owned())
    }
}

/// Whether `name` names a single entry inside its directory.
pub fn is_plain_name(name: &[u8]) -> bool {
    !name.is_empty()
        && name != b"."
        && name != b".."
        && !name.contains(&b'/')
        && !name.contains(&0)
        && !(cfg!(windows) && name.contains(&b'\\'))
}

pub async fn create_dir(path: &Path, mode: u32) -> io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    #[cfg(unix)]
    builder.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;

    builder.create(path).await
}

pub fn set_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))
    }

    #[cfg(not(unix))]
    {
        let _ = (path, uid, gid);
        Ok(())
    }
}

pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    {
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_readonly((mode & 0o200) == 0);
        std::fs::set_permissions(path, perms)
    }
}

pub fn set_times(path: &Path, atime: i64, mtime: i64) -> io::Result<()> {
    filetime::set_file_times(path, file_time(atime), file_time(mtime))
}

fn file_time(nanos: i64) -> FileTime {
    FileTime::from_unix_time(
        nanos.div_euclid(NANOS_PER_SEC),
        nanos.rem_euclid(NANOS_PER_SEC) as u32,
    )
}
