use npuasm_isa::{
    DPU_WRITEBD_HIGH_ROW_WORDS, DPU_WRITEBD_LOW_ROW_WORDS, DPU_WRITESHIMBD_WORDS, DpuOp,
    dpu_arg_name, dpu_opcode, dpu_row, dpu_shim_arg,
};
use npuasm_obj::{PatchSchema, Relocation, SymbolTable};

use crate::error::{Error, Result};

/// Walk a direct-DPU instruction stream (a sequence of 32-bit words) and
/// emit a shim-DMA symbol for every shim-BD write. The argument index is
/// carried in the instruction word and translated through the fixed name
/// table of the instruction set.
pub fn extract_dpu_symbols(code: &[u8], section: &str, table: &mut SymbolTable) -> Result<()> {
    let word_count = code.len() / 4;
    let mut pc = 0usize;

    while pc < word_count {
        let word = word_at(code, pc);
        let opcode = dpu_opcode(word);
        let op = DpuOp::from_byte(opcode).ok_or(Error::DpuUnknownOpcode { opcode, pc })?;

        let advance = match op {
            DpuOp::WriteShimBd => {
                patch_shim_bd(word, pc, section, table)?;
                DPU_WRITESHIMBD_WORDS
            }
            DpuOp::WriteBd => match dpu_row(word) {
                0 => {
                    patch_shim_bd(word, pc, section, table)?;
                    DPU_WRITEBD_LOW_ROW_WORDS
                }
                1 => DPU_WRITEBD_LOW_ROW_WORDS,
                _ => DPU_WRITEBD_HIGH_ROW_WORDS,
            },
            DpuOp::DumpRegister => {
                if pc + 1 >= word_count {
                    return Err(Error::DpuTruncated { pc });
                }
                let count = (word_at(code, pc + 1) & 0x00FF_FFFF) as usize;
                1 + 2 * count
            }
            other => other
                .size_words()
                .expect("fixed-size opcodes declare their word count"),
        };

        if pc + advance > word_count {
            return Err(Error::DpuTruncated { pc });
        }
        pc += advance;
    }

    Ok(())
}

fn patch_shim_bd(word: u32, pc: usize, section: &str, table: &mut SymbolTable) -> Result<()> {
    let arg = dpu_shim_arg(word);
    let name = dpu_arg_name(arg).ok_or(Error::DpuUnknownArg { arg })?;
    // The BD image starts at the word after the opcode.
    let offset = ((pc + 1) * 4) as u32;
    table.add(Relocation {
        symbol: name.to_string(),
        section: section.to_string(),
        offset,
        schema: PatchSchema::ShimDma48,
        addend: 0,
        mask_or_length: 0,
    })?;
    Ok(())
}

fn word_at(code: &[u8], pc: usize) -> u32 {
    let base = pc * 4;
    u32::from_le_bytes([code[base], code[base + 1], code[base + 2], code[base + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use npuasm_obj::CTRLTEXT;

    fn op_word(op: DpuOp, low: u32) -> u32 {
        (u32::from(op.byte()) << 24) | low
    }

    fn bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }

    fn walk(words: &[u32]) -> Result<SymbolTable> {
        let mut table = SymbolTable::new();
        extract_dpu_symbols(&bytes(words), CTRLTEXT, &mut table)?;
        Ok(table)
    }

    #[test]
    fn write_shim_bd_emits_symbol_after_opcode_word() {
        // Opcode word with argument index 2, seven BD words, then a no-op.
        let mut words = vec![op_word(DpuOp::WriteShimBd, 2 << 4)];
        words.extend_from_slice(&[0u32; 7]);
        words.push(op_word(DpuOp::NoOp, 0));

        let table = walk(&words).expect("walk");
        assert_eq!(table.len(), 1);
        let reloc = table.iter().next().expect("symbol");
        assert_eq!(reloc.symbol, "ofm");
        assert_eq!(reloc.offset, 4);
        assert_eq!(reloc.schema, PatchSchema::ShimDma48);
        assert_eq!(reloc.addend, 0);
    }

    #[test]
    fn write_bd_row0_patches_like_a_shim_bd() {
        let mut words = vec![op_word(DpuOp::WriteBd, 5 << 4)];
        words.extend_from_slice(&[0u32; 8]);

        let table = walk(&words).expect("walk");
        assert_eq!(table.iter().next().expect("symbol").symbol, "control-packet");
    }

    #[test]
    fn write_bd_nonzero_rows_advance_without_symbols() {
        let mut words = vec![op_word(DpuOp::WriteBd, 1 << 8)];
        words.extend_from_slice(&[0u32; 8]);
        words.push(op_word(DpuOp::WriteBd, 2 << 8));
        words.extend_from_slice(&[0u32; 6]);

        let table = walk(&words).expect("walk");
        assert!(table.is_empty());
    }

    #[test]
    fn dump_register_is_variable_length() {
        let mut words = vec![op_word(DpuOp::DumpRegister, 0)];
        // Count word says two register pairs; it is the first word of the
        // dumped region.
        words.push(2);
        words.extend_from_slice(&[0u32; 3]);
        words.push(op_word(DpuOp::NoOp, 0));

        let table = walk(&words).expect("walk");
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let err = walk(&[0xEE << 24]).expect_err("unknown opcode");
        assert!(matches!(err, Error::DpuUnknownOpcode { opcode: 0xEE, pc: 0 }));
    }

    #[test]
    fn unknown_argument_index_is_fatal() {
        let mut words = vec![op_word(DpuOp::WriteShimBd, 7 << 4)];
        words.extend_from_slice(&[0u32; 7]);
        let err = walk(&words).expect_err("unknown arg");
        assert!(matches!(err, Error::DpuUnknownArg { arg: 7 }));
    }

    #[test]
    fn truncated_record_is_fatal() {
        let words = vec![op_word(DpuOp::WriteShimBd, 0)];
        let err = walk(&words).expect_err("truncated");
        assert!(matches!(err, Error::DpuTruncated { pc: 0 }));
    }
}
