use anyhow::{Result, bail};
use indexmap::IndexMap;

mod codec;
mod listing;
mod table;

pub use codec::{decode_container, encode_container, read_container, write_container};
pub use listing::format_summary;
pub use table::{SiteConflict, SymbolTable};

/// Section receiving the instruction stream.
pub const CTRLTEXT: &str = ".ctrltext";
/// Section receiving the control-packet stream.
pub const CTRLDATA: &str = ".ctrldata";

/// Section holding the control packet of one program-memory load.
pub fn ctrlpkt_pm_section(pm_id: u8) -> String {
    format!(".ctrlpkt.pm.{pm_id}")
}

pub fn is_ctrlpkt_pm_section(name: &str) -> bool {
    name.starts_with(".ctrlpkt.pm.")
}

/// Patching schema applied by the loader at dispatch time. Encoded into the
/// container's relocation table; the numeric encoding is contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PatchSchema {
    /// `(value & mask) | (orig & !mask)` written at `offset`.
    Scalar32,
    /// 48-bit address added into BD words 1 and 2 at `offset + 4`.
    ShimDma48,
    /// As `ShimDma48`, plus bits 48..56 in the low 9 bits of word 8.
    ShimDma57,
    /// As `ShimDma48` shifted past an 8-byte control-packet header.
    ControlPacket48,
}

impl PatchSchema {
    pub const fn byte(self) -> u8 {
        match self {
            Self::Scalar32 => 0,
            Self::ShimDma48 => 1,
            Self::ShimDma57 => 2,
            Self::ControlPacket48 => 3,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Scalar32,
            1 => Self::ShimDma48,
            2 => Self::ShimDma57,
            3 => Self::ControlPacket48,
            _ => return None,
        })
    }

    /// Byte span the loader touches starting at the relocation offset, used
    /// to keep every patch site inside its section.
    pub const fn patch_window(self) -> u32 {
        match self {
            Self::Scalar32 => 4,
            Self::ShimDma48 => 12,
            Self::ShimDma57 => 36,
            Self::ControlPacket48 => 16,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Scalar32 => "scalar_32",
            Self::ShimDma48 => "shim_dma_48",
            Self::ShimDma57 => "shim_dma_57",
            Self::ControlPacket48 => "control_packet_48",
        }
    }
}

/// One loader patch site. `mask_or_length` is overloaded: a register bitmask
/// for `Scalar32`, the logical buffer length (loader bounds check) for the
/// shim and control-packet schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub symbol: String,
    pub section: String,
    pub offset: u32,
    pub schema: PatchSchema,
    pub addend: u32,
    pub mask_or_length: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Container {
    pub sections: IndexMap<String, Vec<u8>>,
    pub relocations: Vec<Relocation>,
    /// Device columns the stream was recorded against, from the transaction
    /// header; zero when the input carries no geometry.
    pub num_cols: u32,
}

pub fn validate_container(container: &Container) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for reloc in &container.relocations {
        let Some(section) = container.sections.get(&reloc.section) else {
            bail!(
                "relocation symbol '{}' references unknown section '{}'",
                reloc.symbol,
                reloc.section
            );
        };

        let end = reloc
            .offset
            .checked_add(reloc.schema.patch_window())
            .filter(|end| *end as usize <= section.len());
        if end.is_none() {
            bail!(
                "relocation site {:#X} ({}) is outside section '{}' of {} bytes",
                reloc.offset,
                reloc.schema.name(),
                reloc.section,
                section.len()
            );
        }

        if !seen.insert((reloc.section.clone(), reloc.offset)) {
            bail!(
                "duplicate relocation site {}+{:#X}",
                reloc.section,
                reloc.offset
            );
        }
    }
    Ok(())
}
