use goblin::pe::PE;

use super::{PeExport, PeImage};
use crate::error::{DumpulatorError, Result};

/// Owns the raw module bytes alongside the `goblin` parse of them, since
/// `goblin::pe::PE` borrows from its input buffer.
pub struct GoblinPe {
    raw: Vec<u8>,
}

impl GoblinPe {
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        PE::parse(&raw).map_err(|e| DumpulatorError::ConfigFault(format!("PE parse failed: {e}")))?;
        Ok(Self { raw })
    }

    fn pe(&self) -> PE<'_> {
        // Re-parsing is cheap relative to emulation and keeps `GoblinPe`
        // from needing a self-referential struct for the borrowed `PE<'a>`.
        PE::parse(&self.raw).expect("validated in GoblinPe::parse")
    }
}

impl PeImage for GoblinPe {
    fn exports(&self) -> Result<Vec<PeExport>> {
        let pe = self.pe();
        Ok(pe
            .exports
            .iter()
            .map(|export| PeExport {
                rva: export.rva as u32,
                ordinal: export.ordinal().unwrap_or(0) as u32,
                name: export.name.map(|s| s.to_string()),
                is_forwarder: export.reexport.is_some(),
            })
            .collect())
    }

    fn rva_to_file_offset(&self, rva: u32) -> Option<usize> {
        let pe = self.pe();
        for section in &pe.sections {
            let start = section.virtual_address;
            let end = start + section.virtual_size;
            if rva >= start && rva < end {
                let delta = rva - start;
                return Some((section.pointer_to_raw_data + delta) as usize);
            }
        }
        None
    }

    fn raw_data(&self) -> &[u8] {
        &self.raw
    }
}
