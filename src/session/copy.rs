//! `COPY IN` execution strategies.

use std::io::{Cursor, Read};

use futures_util::StreamExt;
use tokio::runtime::Handle;

use crate::driver::Connection;
use crate::error::PgSessionError;
use crate::session::work::CopySource;

/// Fixed header of a PostgreSQL binary-format `COPY` stream: the 11-byte
/// signature `PGCOPY\n\xff\r\n\0`, a 4-byte flags field of zero, and a 4-byte
/// header-extension length of zero.
pub const BINARY_COPY_PREAMBLE: [u8; 19] = [
    b'P', b'G', b'C', b'O', b'P', b'Y', b'\n', 0xff, b'\r', b'\n', 0x00, // signature
    0, 0, 0, 0, // flags
    0, 0, 0, 0, // header extension length
];

/// Drive one `COPY IN` to completion and return the server-reported row
/// count. The strategy is selected by the source variant; the caller owns
/// rollback on failure.
pub(super) fn run(
    conn: &mut dyn Connection,
    sql: &str,
    source: CopySource,
    runtime: Option<&Handle>,
) -> Result<u64, PgSessionError> {
    match source {
        CopySource::Buffered(bytes) => {
            let mut reader = BINARY_COPY_PREAMBLE.as_slice().chain(Cursor::new(bytes));
            conn.copy_in_reader(sql, &mut reader)
        }
        CopySource::Streaming(mut stream) => {
            let runtime = runtime.ok_or_else(|| {
                PgSessionError::Internal(
                    "streaming copy requires the session to be attached from a tokio runtime"
                        .to_string(),
                )
            })?;
            let mut copy = conn.copy_in(sql)?;
            copy.write(&BINARY_COPY_PREAMBLE)?;
            loop {
                // An early return drops the handle, aborting the copy on the
                // wire; a partially opened copy never outlives this function.
                match runtime.block_on(stream.next()) {
                    Some(Ok(buffer)) => copy.write(&buffer)?,
                    Some(Err(err)) => return Err(PgSessionError::CopySource(err)),
                    None => break,
                }
            }
            copy.finish()
        }
    }
}
