// SPDX-License-Identifier: Apache-2.0

//! The length-delimited record envelope every persisted batch file uses:
//! each record is preceded by a 4-byte big-endian length, so a reader can
//! stream the file without a central index.

use bytes::{BufMut, BytesMut};

/// Encodes `records` as a contiguous length-delimited byte buffer.
#[must_use]
pub(crate) fn encode<'a>(records: impl IntoIterator<Item = &'a [u8]>) -> BytesMut {
    let mut buf = BytesMut::new();
    for record in records {
        buf.put_u32(record.len() as u32);
        buf.put_slice(record);
    }
    buf
}
