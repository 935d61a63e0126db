//! Block volume zero-fill planning.
//!
//! Block volumes are preallocated by writing zeros with dd: whole 1 MiB
//! chunks first, then one chunk covering the remainder.

use std::path::Path;

use diskport_shared::constants::storage::MIB;

use super::constants::DD_ZERO_SOURCE;

/// One dd invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroFillPass {
    pub block_size: i64,
    pub count: i64,
    pub offset: i64,
}

/// Split `size` bytes into dd passes.
pub fn zero_fill_plan(size: i64) -> Vec<ZeroFillPass> {
    let (count, remainder) = (size / MIB, size % MIB);
    let mut passes = Vec::with_capacity(2);
    if count > 0 {
        passes.push(ZeroFillPass {
            block_size: MIB,
            count,
            offset: 0,
        });
    }
    if remainder > 0 {
        passes.push(ZeroFillPass {
            block_size: remainder,
            count: 1,
            offset: count * MIB,
        });
    }
    passes
}

/// dd arguments for one pass; `direct` adds O_DIRECT writes.
pub fn dd_args(dest: &Path, pass: &ZeroFillPass, direct: bool) -> Vec<String> {
    let mut oflag = "oflag=seek_bytes".to_string();
    if direct {
        oflag.push_str(",direct");
    }
    vec![
        DD_ZERO_SOURCE.to_string(),
        format!("of={}", dest.display()),
        format!("bs={}", pass.block_size),
        format!("count={}", pass.count),
        format!("seek={}", pass.offset),
        oflag,
    ]
}
