use npuasm_isa::{
    ARG_OFFSET, MAX_ARG_INDEX, MAX_ARGPLUS, MEM_BASE_ADDRESS_MASK, MEM_BUFFER_LENGTH_MASK,
    SHIM_BUFFER_LENGTH_MASK, is_mem_bd_word0, is_shim_bd_word0,
};
use npuasm_obj::{PatchSchema, Relocation, SymbolTable};

use crate::error::{Error, OffsetKind, Result};
use crate::metadata::ArgMap;

/// One classifier invocation: a patch site discovered by a walker.
/// `reg` is the tile-relative register address, `argidx` is already biased
/// by `ARG_OFFSET`, `offset` is section-relative.
#[derive(Debug, Clone)]
pub struct PatchRequest<'a> {
    pub section: &'a str,
    pub argname: Option<&'a str>,
    pub reg: u32,
    pub argidx: u32,
    pub offset: u32,
    pub buffer_length: u64,
    pub addend: u64,
}

pub fn validate_addend(addend: u64) -> Result<u32> {
    if addend > MAX_ARGPLUS {
        return Err(Error::AddendTooLarge { addend });
    }
    Ok(addend as u32)
}

pub fn validate_patch_bounds(offset: u64, size: u64, arg_index: u64, kind: OffsetKind) -> Result<()> {
    if offset > size {
        return Err(Error::PatchOffsetBeyondSection { kind, offset, size });
    }
    if arg_index > u64::from(MAX_ARG_INDEX) {
        return Err(Error::ArgIndexTooLarge { arg_index });
    }
    Ok(())
}

/// Decide the relocation schema for a patch site from the BD register it
/// targets, and record the symbol. Registers outside the four BD word
/// classes are not patchable and are ignored.
pub fn apply_patch(
    code: &mut [u8],
    request: &PatchRequest<'_>,
    args: &ArgMap,
    table: &mut SymbolTable,
) -> Result<()> {
    let addend = validate_addend(request.addend)?;

    // Mem-tile BD word 0 holds the buffer length.
    if is_mem_bd_word0(request.reg) {
        return add_symbol(table, Relocation {
            symbol: request.argidx.to_string(),
            section: request.section.to_string(),
            offset: request.offset,
            schema: PatchSchema::Scalar32,
            addend,
            mask_or_length: u64::from(MEM_BUFFER_LENGTH_MASK),
        });
    }

    // Mem-tile BD word 1 holds the base address.
    if request.reg >= 4 && is_mem_bd_word0(request.reg - 4) {
        return add_symbol(table, Relocation {
            symbol: request.argidx.to_string(),
            section: request.section.to_string(),
            offset: request.offset + 4,
            schema: PatchSchema::Scalar32,
            addend,
            mask_or_length: u64::from(MEM_BASE_ADDRESS_MASK),
        });
    }

    // Shim BD word 0 holds the buffer length.
    if is_shim_bd_word0(request.reg) {
        return add_symbol(table, Relocation {
            symbol: request.argidx.to_string(),
            section: request.section.to_string(),
            offset: request.offset,
            schema: PatchSchema::Scalar32,
            addend,
            mask_or_length: u64::from(SHIM_BUFFER_LENGTH_MASK),
        });
    }

    // Shim BD word 1 starts the 48-bit address field the loader adds into.
    if request.reg >= 4 && is_shim_bd_word0(request.reg - 4) {
        clear_shim_bd_address_bits(code, request.offset)?;

        let symbol = match request.argname {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => match args.get(request.argidx.wrapping_sub(ARG_OFFSET)) {
                Some(name) => name.to_string(),
                None => request.argidx.to_string(),
            },
        };
        return add_symbol(table, Relocation {
            symbol,
            section: request.section.to_string(),
            offset: request.offset,
            schema: PatchSchema::ShimDma48,
            addend,
            mask_or_length: request.buffer_length,
        });
    }

    Ok(())
}

/// Zero the 46-bit address field of a shim BD so the loader's additive patch
/// starts from a clean base. Word 1 keeps its two non-address LSBs; word 2's
/// low half is cleared outright.
pub fn clear_shim_bd_address_bits(code: &mut [u8], offset: u32) -> Result<()> {
    let base = offset as usize;
    let end = base + 10;
    if end > code.len() {
        return Err(Error::PatchSiteOutOfRange {
            offset,
            len: code.len(),
        });
    }

    code[base + 4] &= 0x03;
    code[base + 5] = 0;
    code[base + 6] = 0;
    code[base + 7] = 0;
    code[base + 8] = 0;
    code[base + 9] = 0;
    Ok(())
}

fn add_symbol(table: &mut SymbolTable, reloc: Relocation) -> Result<()> {
    table.add(reloc)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use npuasm_isa::{MEM_DMA_BD0_0, SHIM_DMA_BD0_0, SHIM_DMA_BD_SIZE};
    use npuasm_obj::CTRLTEXT;

    fn request(reg: u32, offset: u32) -> PatchRequest<'static> {
        PatchRequest {
            section: CTRLTEXT,
            argname: None,
            reg,
            argidx: 3,
            offset,
            buffer_length: 64,
            addend: 0,
        }
    }

    fn run(request: &PatchRequest<'_>, code: &mut [u8]) -> (SymbolTable, Result<()>) {
        let mut table = SymbolTable::new();
        let args = ArgMap::default();
        let result = apply_patch(code, request, &args, &mut table);
        (table, result)
    }

    #[test]
    fn mem_bd_word0_is_scalar_length_patch() {
        let mut code = vec![0u8; 64];
        let (table, result) = run(&request(MEM_DMA_BD0_0, 0), &mut code);
        result.expect("patch");
        let reloc = table.iter().next().expect("one symbol");
        assert_eq!(reloc.schema, PatchSchema::Scalar32);
        assert_eq!(reloc.offset, 0);
        assert_eq!(reloc.mask_or_length, u64::from(MEM_BUFFER_LENGTH_MASK));
        assert_eq!(reloc.symbol, "3");
    }

    #[test]
    fn mem_bd_word1_patch_lands_four_bytes_later() {
        let mut code = vec![0u8; 64];
        let (table, result) = run(&request(MEM_DMA_BD0_0 + 4, 8), &mut code);
        result.expect("patch");
        let reloc = table.iter().next().expect("one symbol");
        assert_eq!(reloc.offset, 12);
        assert_eq!(reloc.mask_or_length, u64::from(MEM_BASE_ADDRESS_MASK));
    }

    #[test]
    fn shim_bd_word0_is_scalar_length_patch() {
        let mut code = vec![0u8; 64];
        let (table, result) = run(&request(SHIM_DMA_BD0_0 + SHIM_DMA_BD_SIZE, 16), &mut code);
        result.expect("patch");
        let reloc = table.iter().next().expect("one symbol");
        assert_eq!(reloc.schema, PatchSchema::Scalar32);
        assert_eq!(reloc.mask_or_length, u64::from(SHIM_BUFFER_LENGTH_MASK));
    }

    #[test]
    fn shim_bd_word1_emits_shim_dma_and_sanitises() {
        let mut code = vec![0xFFu8; 64];
        let (table, result) = run(&request(SHIM_DMA_BD0_0 + 4, 16), &mut code);
        result.expect("patch");
        let reloc = table.iter().next().expect("one symbol");
        assert_eq!(reloc.schema, PatchSchema::ShimDma48);
        assert_eq!(reloc.offset, 16);
        assert_eq!(reloc.mask_or_length, 64);

        assert_eq!(code[20], 0x03);
        assert_eq!(&code[21..26], &[0, 0, 0, 0, 0]);
        assert_eq!(code[26], 0xFF);
    }

    #[test]
    fn shim_bd_word1_prefers_explicit_argname() {
        let mut code = vec![0u8; 64];
        let mut table = SymbolTable::new();
        let args = ArgMap::default();
        let mut req = request(SHIM_DMA_BD0_0 + 4, 0);
        req.argname = Some("scratch");
        apply_patch(&mut code, &req, &args, &mut table).expect("patch");
        assert_eq!(table.iter().next().expect("symbol").symbol, "scratch");
    }

    #[test]
    fn shim_bd_word1_uses_argument_map() {
        let mut code = vec![0u8; 64];
        let mut table = SymbolTable::new();
        let mut args = ArgMap::default();
        args.bind(0, "control-packet");
        let req = request(SHIM_DMA_BD0_0 + 4, 0);
        apply_patch(&mut code, &req, &args, &mut table).expect("patch");
        assert_eq!(table.iter().next().expect("symbol").symbol, "control-packet");
    }

    #[test]
    fn unmapped_register_is_ignored() {
        let mut code = vec![0u8; 64];
        let (table, result) = run(&request(0x2000, 0), &mut code);
        result.expect("no-op");
        assert!(table.is_empty());
    }

    #[test]
    fn oversized_addend_is_rejected() {
        let mut code = vec![0u8; 64];
        let mut req = request(SHIM_DMA_BD0_0, 0);
        req.addend = u64::from(u32::MAX) + 1;
        let (_, result) = run(&req, &mut code);
        assert!(matches!(result, Err(Error::AddendTooLarge { .. })));
    }

    #[test]
    fn sanitiser_is_idempotent() {
        let mut once = (0u8..64).collect::<Vec<u8>>();
        clear_shim_bd_address_bits(&mut once, 8).expect("first");
        let mut twice = once.clone();
        clear_shim_bd_address_bits(&mut twice, 8).expect("second");
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitiser_rejects_site_past_stream_end() {
        let mut code = vec![0u8; 12];
        let err = clear_shim_bd_address_bits(&mut code, 8).expect_err("short stream");
        assert!(matches!(err, Error::PatchSiteOutOfRange { .. }));
    }
}
