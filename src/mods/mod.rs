pub mod decode;
pub mod table;

pub use decode::decode;
pub use table::{ModTable, ModTableEntry};

use serde::ser::{Serialize, SerializeTuple, Serializer};

use crate::record::ModTriple;

/// Probability at or above which a call counts as modified in windows.
pub const MODIFIED_THRESHOLD: u8 = 128;

/// One decoded modification call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModCall {
    /// Position in the stored sequence (reference orientation)
    pub seq_pos: u64,
    /// Aligned reference position; `None` for unmapped reads and inserted bases
    pub ref_pos: Option<u64>,
    pub prob: u8,
    pub base_qual: u8,
    pub triple: ModTriple,
}

impl ModCall {
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.prob >= MODIFIED_THRESHOLD
    }
}

// `[seq_pos, ref_pos, prob]`, the row shape of a mod table
impl Serialize for ModCall {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut t = serializer.serialize_tuple(3)?;
        t.serialize_element(&self.seq_pos)?;
        t.serialize_element(&self.ref_pos)?;
        t.serialize_element(&self.prob)?;
        t.end()
    }
}
