//! Binary patch format.
//!
//! A patch is a sequence of records terminated by `[0x0A][0x00][0x00]`:
//!
//! ```text
//! [prefix: u8][path length: u16 BE][path: UTF-8]
//!     [content length: u64 BE][content]      -- only for non-deleted records
//! ```
//!
//! There is no record count or checksum; readers consume records until they
//! meet the terminator.

pub mod builder;
pub mod reader;
pub mod writer;

use crate::encoding::{encode_byte, encode_utf};
use crate::error::Result;
use crate::resource::{CvsResource, TERMINATOR_PREFIX};

pub use builder::PatchBuilder;
pub use reader::{PatchReader, PatchRecord};
pub use writer::StreamingWriter;

/// Encode the header record of `resource`: prefix byte plus server path.
pub fn encode_header(resource: &CvsResource) -> Result<Vec<u8>> {
    let path = encode_utf(&resource.server_path)?;
    let mut out = Vec::with_capacity(1 + path.len());
    out.extend_from_slice(&encode_byte(u32::from(resource.prefix())));
    out.extend_from_slice(&path);
    Ok(out)
}

/// End-of-patch marker.
pub fn encode_terminator() -> [u8; 3] {
    [TERMINATOR_PREFIX, 0, 0]
}
