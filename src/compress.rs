// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.


use zstd::DEFAULT_COMPRESSION_LEVEL;

use crate::prelude::*;

/// Compress a raw payload for storage. Each column family value is compressed
/// independently so point reads never decompress sibling payloads.
pub fn compress(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() / 2 + 64);
    zstd::stream::copy_encode(input, &mut out, DEFAULT_COMPRESSION_LEVEL)
        .wrap_err("zstd compression failed")?;
    Ok(out)
}

pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 4);
    zstd::stream::copy_decode(input, &mut out).wrap_err("zstd decompression failed")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let payloads: [&[u8]; 4] = [
            b"",
            b"{}",
            br#"{"number":"0x1","transactions":[]}"#,
            &[0u8; 4096],
        ];
        for payload in payloads {
            let compressed = compress(payload).unwrap();
            assert_eq!(decompress(&compressed).unwrap(), payload);
        }
    }

    #[test]
    fn compresses_repetitive_payloads() {
        let payload = br#"{"gas":"0x5208"}"#.repeat(512);
        let compressed = compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());
    }
}
