use rustc_hash::FxHashMap;

use npuasm_isa::{
    ARG_OFFSET, BYTES_PER_WORD, RecordError, SHIM_DMA_BD_SIZE, TXN_HEADER_LEN, TxnHeader,
    TxnRecord, bd_base, decode_txn_op, tile_register,
};
use npuasm_obj::{SymbolTable, ctrlpkt_pm_section};

use crate::error::{Error, Result};
use crate::metadata::ArgMap;
use crate::patch::{PatchRequest, apply_patch};

/// Walk a transaction stream, collecting patch symbols into `table` and
/// sanitising patched BDs in place. Returns the column count recorded in the
/// stream header.
///
/// The BD-write map lives and dies with this invocation: `BLOCKWRITE`
/// records populate it (keyed by register address aligned to the BD base)
/// and patch opcodes consume it.
pub fn extract_txn_symbols(
    code: &mut [u8],
    section: &str,
    argname: Option<&str>,
    args: &ArgMap,
    pm_ids: &[u8],
    table: &mut SymbolTable,
) -> Result<u32> {
    let header = TxnHeader::parse(code)?;
    if header.txn_size as usize > code.len() {
        return Err(Error::StreamTooShort {
            declared: header.txn_size,
            actual: code.len(),
        });
    }
    let version = header.version();

    let mut bd_writes: FxHashMap<u64, (u32, u64)> = FxHashMap::default();
    let mut cursor = TXN_HEADER_LEN;
    // Operations still covered by an open PM-load window.
    let mut pm_window: u32 = 0;
    let mut pm_id: u8 = 0;

    for _ in 0..header.num_ops {
        let decoded = decode_txn_op(version, &code[cursor..])?;
        let in_window = pm_window > 0;

        match decoded.record {
            TxnRecord::Advance => {}
            TxnRecord::PmLoad(pm) => {
                if !pm_ids.contains(&pm.pm_load_id) {
                    return Err(Error::UnknownPmId {
                        pm_id: pm.pm_load_id,
                    });
                }
                pm_window = pm.load_sequence_count + 1;
                pm_id = pm.pm_load_id;
                cursor += decoded.len;
                // The window covers the operations after this one.
                continue;
            }
            TxnRecord::BlockWrite(bw) => {
                let offset = (cursor + bw.payload_offset) as u32;
                let payload_start = cursor + bw.payload_offset;
                if in_window {
                    // The whole block programs one PM control-packet BD; its
                    // first word counts the words that follow.
                    let buffer_length =
                        u64::from(payload_word(code, payload_start, bw.payload_len, 0)?)
                            * u64::from(BYTES_PER_WORD);
                    let pm_section = ctrlpkt_pm_section(pm_id);
                    apply_patch(
                        code,
                        &PatchRequest {
                            section: &pm_section,
                            argname: None,
                            reg: tile_register(bw.reg_off) + 4,
                            argidx: 0,
                            offset,
                            buffer_length,
                            addend: 0,
                        },
                        args,
                        table,
                    )?;
                } else {
                    // One block write may program several BDs back to back;
                    // record each chunk so later patch opcodes can find it.
                    for chunk in (0..bw.payload_len).step_by(SHIM_DMA_BD_SIZE as usize) {
                        let buffer_length =
                            u64::from(payload_word(code, payload_start, bw.payload_len, chunk)?)
                                * u64::from(BYTES_PER_WORD);
                        bd_writes.insert(
                            bd_base(bw.reg_off + chunk as u64),
                            (offset + chunk as u32, buffer_length),
                        );
                    }
                }
            }
            TxnRecord::DdrPatch(op) => {
                if in_window {
                    return Err(Error::PatchInPmLoad);
                }
                let reg = bd_base(op.regaddr);
                let Some((offset, buffer_length)) = bd_writes.get(&reg).copied() else {
                    return Err(Error::PatchWithoutBlockWrite { reg });
                };
                let argidx = op
                    .argidx
                    .checked_add(u64::from(ARG_OFFSET))
                    .and_then(|biased| u32::try_from(biased).ok())
                    .ok_or(Error::ArgIndexTooLarge {
                        arg_index: op.argidx,
                    })?;
                apply_patch(
                    code,
                    &PatchRequest {
                        section,
                        argname,
                        reg: tile_register(op.regaddr),
                        argidx,
                        offset,
                        buffer_length,
                        addend: op.argplus,
                    },
                    args,
                    table,
                )?;
            }
        }

        cursor += decoded.len;
        if pm_window > 0 {
            pm_window -= 1;
        }
    }

    Ok(u32::from(header.num_cols))
}

fn payload_word(code: &[u8], payload_start: usize, payload_len: usize, at: usize) -> Result<u32> {
    if at + 4 > payload_len {
        return Err(Error::Framing(RecordError::Truncated {
            what: "block-write payload word",
            expected: at + 4,
            actual: payload_len,
        }));
    }
    let base = payload_start + at;
    Ok(u32::from_le_bytes([
        code[base],
        code[base + 1],
        code[base + 2],
        code[base + 3],
    ]))
}
