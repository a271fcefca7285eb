// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

/// Swaps the two bytes of every 16-bit word in `buf`, in place.
///
/// This mirrors `dd conv=swab`: if `buf` has an odd length, the final byte is left untouched.
pub fn swab(buf: &mut [u8]) {
    for word in buf.chunks_exact_mut(2) {
        word.swap(0, 1);
    }
}

/// Writes one row of a hex dump: the offset, the bytes in hex, and their printable ASCII form.
pub fn dump_hex(w: &mut impl io::Write, offset: u64, bytes: &[u8]) -> io::Result<()> {
    writeln!(
        w,
        "{:08x}   {}   {}",
        offset,
        bytes
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<String>>()
            .join(" "),
        bytes
            .iter()
            .map(|byte| {
                if byte.is_ascii_graphic() {
                    char::from(*byte)
                } else {
                    '.'
                }
            })
            .collect::<String>(),
    )
}

/// Hex-dumps `bytes` in rows of 16, starting at `base`.
pub fn dump_hex_rows(w: &mut impl io::Write, base: u64, bytes: &[u8]) -> io::Result<()> {
    for (i, row) in bytes.chunks(16).enumerate() {
        dump_hex(w, base + (i as u64) * 16, row)?;
    }

    Ok(())
}
