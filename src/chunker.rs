//! Fixed-size chunk splitting and rejoining: read sequentially into
//! `chunk_size` buffers, last one short but non-empty, zero-padded ordinal
//! ids.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// A single chunk cut from a file: its ordinal-derived id and raw bytes.
pub type Chunk = (String, Vec<u8>);

fn chunk_id(ordinal: usize) -> String {
    format!("chunk_{ordinal:05}")
}

/// Splits `path` into ordered, fixed-size chunks. An empty input produces no
/// chunks.
pub fn split<P: AsRef<Path>>(path: P, chunk_size: usize) -> std::io::Result<Vec<Chunk>> {
    assert!(chunk_size > 0, "chunk_size must be positive");

    let mut file = File::open(path)?;
    let mut chunks = Vec::new();
    let mut ordinal = 0usize;

    loop {
        let mut buf = vec![0u8; chunk_size];
        let mut filled = 0usize;

        while filled < chunk_size {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            break;
        }

        buf.truncate(filled);
        chunks.push((chunk_id(ordinal), buf));
        ordinal += 1;

        if filled < chunk_size {
            break;
        }
    }

    Ok(chunks)
}

/// Concatenates chunk bytes, in the order given, into `output_path`. Joining
/// zero chunks yields an empty file.
pub fn join<P: AsRef<Path>>(output_path: P, chunks: &[Vec<u8>]) -> std::io::Result<()> {
    let mut out = File::create(output_path)?;
    for chunk in chunks {
        out.write_all(chunk)?;
    }
    out.flush()
}
