use std::io::{Cursor, Read};

use serde::{Deserialize, Serialize};

const TAG_NONE: u8 = 0x00;
const TAG_ZSTD: u8 = 0x01;

const ZSTD_LEVEL: i32 = 3;

/// Upper bound for a single decompressed object. Larger chunks are never
/// written by the chunker, so anything bigger is treated as damage.
pub const MAX_DECOMPRESS_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Zstd,
}

impl std::str::FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Compression::None),
            "zstd" => Ok(Compression::Zstd),
            other => Err(format!("unknown compression algorithm: {other}")),
        }
    }
}

/// Compresses `data` and prepends a 1-byte tag naming the codec.
pub fn compress(compression: Compression, data: &[u8]) -> std::io::Result<Vec<u8>> {
    match compression {
        Compression::None => {
            let mut out = Vec::with_capacity(1 + data.len());
            out.push(TAG_NONE);
            out.extend_from_slice(data);
            Ok(out)
        }
        Compression::Zstd => {
            let compressed = zstd::bulk::compress(data, ZSTD_LEVEL)?;
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(TAG_ZSTD);
            out.extend_from_slice(&compressed);
            Ok(out)
        }
    }
}

/// Reverses [`compress`], dispatching on the tag byte.
///
/// The codec is read from the data rather than from the repository settings,
/// so objects written under an older setting stay readable.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, String> {
    let Some((&tag, payload)) = data.split_first() else {
        return Err("empty data".to_string());
    };

    match tag {
        TAG_NONE => Ok(payload.to_vec()),
        TAG_ZSTD => {
            let mut decoder = zstd::stream::Decoder::new(Cursor::new(payload))
                .map_err(|e| format!("zstd init: {e}"))?;
            let mut output = Vec::new();
            decoder
                .by_ref()
                .take(MAX_DECOMPRESS_SIZE + 1)
                .read_to_end(&mut output)
                .map_err(|e| format!("zstd: {e}"))?;
            if output.len() as u64 > MAX_DECOMPRESS_SIZE {
                return Err(format!(
                    "zstd: decompressed size exceeds limit of {MAX_DECOMPRESS_SIZE} bytes"
                ));
            }
            Ok(output)
        }
        other => Err(format!("unknown compression tag {other:#04x}")),
    }
}
