use std::collections::BTreeMap;

use npuasm_obj::{CTRLDATA, CTRLTEXT, Container, SymbolTable, ctrlpkt_pm_section};

use crate::dpu::extract_dpu_symbols;
use crate::error::{Error, Result};
use crate::metadata::{Binding, PatchRecord, bind_metadata, bind_patch_records};
use crate::state::assemble_source;
use crate::txn::extract_txn_symbols;

/// What the primary input buffer holds, selecting the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    BlobInstrDpu,
    BlobInstrPrepost,
    BlobInstrTransaction,
    BlobControlPacket,
    AsmAie2,
    AsmAie2ps,
}

impl BufferType {
    pub const fn is_asm(self) -> bool {
        matches!(self, Self::AsmAie2 | Self::AsmAie2ps)
    }
}

/// External-buffer patch description, in either accepted form.
#[derive(Debug, Clone)]
pub enum Metadata {
    /// A JSON document in one of the two §metadata dialects.
    Document(Vec<u8>),
    /// Pre-built patch records.
    Records(Vec<PatchRecord>),
}

#[derive(Debug)]
pub struct AssembleInput {
    pub buffer_type: BufferType,
    /// Instruction stream, control-packet blob, or assembly source.
    pub buffer: Vec<u8>,
    /// Optional control-packet stream, packaged as `.ctrldata`.
    pub control_packet: Option<Vec<u8>>,
    /// Per-PM control packets, packaged as `.ctrlpkt.pm.<id>`; their ids are
    /// the PM ids a transaction stream may load.
    pub pm_packets: BTreeMap<u8, Vec<u8>>,
    pub metadata: Option<Metadata>,
}

impl AssembleInput {
    pub fn new(buffer_type: BufferType, buffer: Vec<u8>) -> Self {
        Self {
            buffer_type,
            buffer,
            control_packet: None,
            pm_packets: BTreeMap::new(),
            metadata: None,
        }
    }
}

/// Assemble one input into a relocatable container.
pub fn assemble(input: AssembleInput) -> Result<Container> {
    if input.buffer_type.is_asm() {
        assemble_asm(input)
    } else {
        assemble_blob(input.buffer_type, input)
    }
}

fn assemble_asm(input: AssembleInput) -> Result<Container> {
    let source = String::from_utf8(input.buffer).map_err(|_| Error::SourceNotUtf8)?;
    let program = assemble_source(&source)?;

    let mut container = Container::default();
    container
        .sections
        .insert(CTRLTEXT.to_string(), program.text);
    if !program.data.is_empty() {
        container
            .sections
            .insert(CTRLDATA.to_string(), program.data);
    }
    for (pm_id, packet) in input.pm_packets {
        container.sections.insert(ctrlpkt_pm_section(pm_id), packet);
    }

    if let Some(metadata) = input.metadata {
        let ctrldata_len = container
            .sections
            .get(CTRLDATA)
            .map_or(0, |bytes| bytes.len() as u64);
        let mut table = SymbolTable::new();
        add_metadata_symbols(metadata, ctrldata_len, &mut table)?;
        container.relocations = table.into_relocations();
    }

    Ok(container)
}

fn assemble_blob(buffer_type: BufferType, input: AssembleInput) -> Result<Container> {
    // The control packet either rides along as the second buffer or is the
    // input itself.
    let (instructions, control_packet) = match buffer_type {
        BufferType::BlobControlPacket => (None, Some(input.buffer)),
        _ => (Some(input.buffer), input.control_packet),
    };

    let ctrldata_len = control_packet.as_ref().map_or(0, |bytes| bytes.len() as u64);
    let mut table = SymbolTable::new();
    let binding = match input.metadata {
        Some(metadata) => add_metadata_symbols(metadata, ctrldata_len, &mut table)?,
        None => Binding::default(),
    };

    let pm_ids: Vec<u8> = input.pm_packets.keys().copied().collect();
    let mut num_cols = 0;
    let text = match instructions {
        Some(mut text) => {
            match buffer_type {
                BufferType::BlobInstrTransaction => {
                    num_cols = extract_txn_symbols(
                        &mut text,
                        CTRLTEXT,
                        None,
                        &binding.args,
                        &pm_ids,
                        &mut table,
                    )?;
                }
                BufferType::BlobInstrDpu | BufferType::BlobInstrPrepost => {
                    extract_dpu_symbols(&text, CTRLTEXT, &mut table)?;
                }
                _ => {}
            }
            Some(text)
        }
        None => None,
    };

    let mut container = Container {
        num_cols,
        ..Container::default()
    };
    if let Some(text) = text {
        container.sections.insert(CTRLTEXT.to_string(), text);
    }
    if let Some(packet) = control_packet {
        container.sections.insert(CTRLDATA.to_string(), packet);
    }
    for (pm_id, packet) in input.pm_packets {
        container.sections.insert(ctrlpkt_pm_section(pm_id), packet);
    }
    container.relocations = table.into_relocations();

    Ok(container)
}

fn add_metadata_symbols(
    metadata: Metadata,
    ctrldata_len: u64,
    table: &mut SymbolTable,
) -> Result<Binding> {
    match metadata {
        Metadata::Document(bytes) => {
            let binding = bind_metadata(&bytes, ctrldata_len)?;
            for reloc in &binding.relocations {
                table.add(reloc.clone())?;
            }
            Ok(binding)
        }
        Metadata::Records(records) => {
            for reloc in bind_patch_records(&records) {
                table.add(reloc)?;
            }
            Ok(Binding::default())
        }
    }
}
