use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};

use npuasm_isa::ARG_OFFSET;
use npuasm_obj::{CTRLDATA, CTRLTEXT, PatchSchema, Relocation};

use crate::error::{Error, OffsetKind, Result};
use crate::patch::{validate_addend, validate_patch_bounds};

/// Reserved argument name marking the control-packet buffer itself.
pub const CONTROL_PACKET_ARG: &str = "control-packet";

/// Host argument index to symbolic buffer name, as declared by the metadata
/// document. Consulted by the patch classifier when a patch opcode names a
/// buffer by index.
#[derive(Debug, Clone, Default)]
pub struct ArgMap {
    entries: IndexMap<u32, String>,
}

impl ArgMap {
    pub fn bind(&mut self, index: u32, name: impl Into<String>) {
        self.entries.insert(index, name.into());
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.entries.get(&index).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries.iter().map(|(index, name)| (*index, name.as_str()))
    }
}

/// Result of binding a metadata document: the argument map plus the
/// control-packet patch sites the document pre-declares.
#[derive(Debug, Default)]
pub struct Binding {
    pub args: ArgMap,
    pub relocations: Vec<Relocation>,
}

/// Pre-built patch record, the non-JSON metadata input form.
#[derive(Debug, Clone)]
pub struct PatchRecord {
    pub symbol: String,
    pub buffer: PatchBufferKind,
    pub schema: PatchSchema,
    pub offsets: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchBufferKind {
    Instruction,
    ControlPacket,
}

impl PatchBufferKind {
    fn section(self) -> &'static str {
        match self {
            Self::Instruction => CTRLTEXT,
            Self::ControlPacket => CTRLDATA,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExternalBuffersDoc {
    external_buffers: IndexMap<String, ExternalBuffer>,
}

#[derive(Debug, Deserialize)]
struct ExternalBuffer {
    xrt_id: u32,
    #[serde(default)]
    size_in_bytes: u64,
    #[serde(default, deserialize_with = "truthy")]
    ctrl_pkt_buffer: bool,
    #[serde(default)]
    offset_in_bytes: u64,
    #[serde(rename = "coalesed_buffers")]
    coalesced_buffers: Option<Vec<CoalescedBuffer>>,
    #[serde(default)]
    control_packet_patch_locations: Vec<PatchLocation>,
}

#[derive(Debug, Deserialize)]
struct CoalescedBuffer {
    offset_in_bytes: u64,
    #[serde(default)]
    control_packet_patch_locations: Vec<PatchLocation>,
}

#[derive(Debug, Deserialize)]
struct PatchLocation {
    offset: u64,
}

#[derive(Debug, Deserialize)]
struct CtrlPktPatchDoc {
    ctrl_pkt_xrt_arg_idx: Option<u32>,
    #[serde(default)]
    ctrl_pkt_patch_info: Vec<CtrlPktPatchEntry>,
}

#[derive(Debug, Deserialize)]
struct CtrlPktPatchEntry {
    offset: u64,
    xrt_arg_idx: u32,
    bo_offset: u64,
}

/// Accepts a JSON bool or a nonzero number, the two spellings the metadata
/// producers use for flags.
fn truthy<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(flag) => flag,
        serde_json::Value::Number(number) => number.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    })
}

/// Parse a metadata document and bind it against a control-packet stream of
/// `ctrldata_len` bytes. Dialect is detected by root key; a document in
/// neither dialect binds nothing.
pub fn bind_metadata(bytes: &[u8], ctrldata_len: u64) -> Result<Binding> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;

    if value.get("external_buffers").is_some() {
        let doc: ExternalBuffersDoc = serde_json::from_value(value)?;
        return bind_external_buffers(doc, ctrldata_len);
    }
    if value.get("ctrl_pkt_patch_info").is_some() {
        let doc: CtrlPktPatchDoc = serde_json::from_value(value)?;
        return bind_ctrl_pkt_patch_info(doc, ctrldata_len);
    }
    Ok(Binding::default())
}

/// Convert a pre-built patch record list straight into relocations.
pub fn bind_patch_records(records: &[PatchRecord]) -> Vec<Relocation> {
    let mut relocations = Vec::new();
    for record in records {
        for offset in &record.offsets {
            relocations.push(Relocation {
                symbol: record.symbol.clone(),
                section: record.buffer.section().to_string(),
                offset: *offset,
                schema: record.schema,
                addend: 0,
                mask_or_length: 0,
            });
        }
    }
    relocations
}

fn argument_symbol(xrt_id: u32) -> String {
    (u64::from(xrt_id) + u64::from(ARG_OFFSET)).to_string()
}

fn bind_external_buffers(doc: ExternalBuffersDoc, ctrldata_len: u64) -> Result<Binding> {
    let mut binding = Binding::default();

    for buffer in doc.external_buffers.values() {
        let arg = buffer.xrt_id;
        let symbol = argument_symbol(arg);
        if buffer.ctrl_pkt_buffer {
            binding.args.bind(arg, CONTROL_PACKET_ARG);
        } else {
            binding.args.bind(arg, symbol.clone());
        }

        match &buffer.coalesced_buffers {
            Some(coalesced) => {
                for part in coalesced {
                    validate_patch_bounds(
                        part.offset_in_bytes,
                        buffer.size_in_bytes,
                        u64::from(arg),
                        OffsetKind::CoalescedBuffer,
                    )?;
                    emit_control_packet_patches(
                        &symbol,
                        arg,
                        part.offset_in_bytes,
                        &part.control_packet_patch_locations,
                        ctrldata_len,
                        &mut binding.relocations,
                    )?;
                }
            }
            None => {
                emit_control_packet_patches(
                    &symbol,
                    arg,
                    buffer.offset_in_bytes,
                    &buffer.control_packet_patch_locations,
                    ctrldata_len,
                    &mut binding.relocations,
                )?;
            }
        }
    }

    Ok(binding)
}

fn bind_ctrl_pkt_patch_info(doc: CtrlPktPatchDoc, ctrldata_len: u64) -> Result<Binding> {
    let mut binding = Binding::default();

    // This producer uses a fixed argument numbering.
    for index in 0..=4u32 {
        binding.args.bind(index, argument_symbol(index));
    }
    match doc.ctrl_pkt_xrt_arg_idx {
        Some(index) => binding.args.bind(index, CONTROL_PACKET_ARG),
        None => binding.args.bind(4, CONTROL_PACKET_ARG),
    }

    for entry in &doc.ctrl_pkt_patch_info {
        validate_patch_bounds(
            entry.offset,
            ctrldata_len,
            u64::from(entry.xrt_arg_idx),
            OffsetKind::ControlPacket,
        )?;
        let addend = validate_addend(entry.bo_offset)?;
        binding.relocations.push(Relocation {
            symbol: argument_symbol(entry.xrt_arg_idx),
            section: CTRLDATA.to_string(),
            offset: header_rebased(entry.offset)?,
            schema: PatchSchema::ControlPacket48,
            addend,
            mask_or_length: 0,
        });
    }

    Ok(binding)
}

fn emit_control_packet_patches(
    symbol: &str,
    arg: u32,
    region_offset: u64,
    locations: &[PatchLocation],
    ctrldata_len: u64,
    relocations: &mut Vec<Relocation>,
) -> Result<()> {
    let addend = validate_addend(region_offset)?;
    for location in locations {
        validate_patch_bounds(
            location.offset,
            ctrldata_len,
            u64::from(arg),
            OffsetKind::ControlPacket,
        )?;
        relocations.push(Relocation {
            symbol: symbol.to_string(),
            section: CTRLDATA.to_string(),
            offset: header_rebased(location.offset)?,
            schema: PatchSchema::ControlPacket48,
            addend,
            mask_or_length: 0,
        });
    }
    Ok(())
}

/// Control-packet patch offsets are reported past the 8-byte packet header;
/// rebasing unifies the direct and transaction patching schemes.
fn header_rebased(offset: u64) -> Result<u32> {
    let rebased = offset
        .checked_sub(8)
        .ok_or(Error::PatchOffsetUnderflow { offset })?;
    u32::try_from(rebased).map_err(|_| Error::PatchOffsetBeyondSection {
        kind: OffsetKind::ControlPacket,
        offset,
        size: u64::from(u32::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn external_buffers_with_coalesced_regions() {
        // One coalesced weights buffer carrying a single patch site.
        let doc = br#"{
            "external_buffers": {
                "buffer0": {
                    "xrt_id": 1,
                    "size_in_bytes": 345088,
                    "coalesed_buffers": [
                        {
                            "offset_in_bytes": 0,
                            "control_packet_patch_locations": [
                                { "offset": 17420, "size": 6, "operation": "read_add_write" }
                            ]
                        }
                    ]
                }
            }
        }"#;

        let binding = bind_metadata(doc, 20000).expect("bind");
        assert_eq!(binding.args.get(1), Some("4"));
        assert_eq!(binding.relocations.len(), 1);
        let reloc = &binding.relocations[0];
        assert_eq!(reloc.section, CTRLDATA);
        assert_eq!(reloc.offset, 17412);
        assert_eq!(reloc.symbol, "4");
        assert_eq!(reloc.schema, PatchSchema::ControlPacket48);
        assert_eq!(reloc.addend, 0);
    }

    #[test]
    fn coalesced_region_addend_is_its_offset() {
        let doc = br#"{
            "external_buffers": {
                "weights": {
                    "xrt_id": 2,
                    "size_in_bytes": 65536,
                    "coalesed_buffers": [
                        {
                            "offset_in_bytes": 37888,
                            "control_packet_patch_locations": [{ "offset": 64 }]
                        }
                    ]
                }
            }
        }"#;

        let binding = bind_metadata(doc, 4096).expect("bind");
        assert_eq!(binding.relocations.len(), 1);
        assert_eq!(binding.relocations[0].addend, 37888);
        assert_eq!(binding.relocations[0].symbol, "5");
    }

    #[test]
    fn control_packet_buffer_binds_reserved_name() {
        let doc = br#"{
            "external_buffers": {
                "runtime_control_packet": {
                    "xrt_id": 0,
                    "size_in_bytes": 60736,
                    "ctrl_pkt_buffer": 1
                }
            }
        }"#;

        let binding = bind_metadata(doc, 0).expect("bind");
        assert_eq!(binding.args.get(0), Some(CONTROL_PACKET_ARG));
        assert!(binding.relocations.is_empty());
    }

    #[test]
    fn coalesced_offset_beyond_buffer_size_fails() {
        let doc = br#"{
            "external_buffers": {
                "buffer0": {
                    "xrt_id": 1,
                    "size_in_bytes": 128,
                    "coalesed_buffers": [{ "offset_in_bytes": 256 }]
                }
            }
        }"#;

        let err = bind_metadata(doc, 0).expect_err("out of range");
        assert_eq!(err.kind(), ErrorKind::InvalidAsm);
        assert!(err.to_string().contains("coalesced buffer"));
    }

    #[test]
    fn patch_offset_beyond_ctrldata_fails() {
        let doc = br#"{
            "external_buffers": {
                "ifm": {
                    "xrt_id": 2,
                    "size_in_bytes": 1024,
                    "control_packet_patch_locations": [{ "offset": 512 }]
                }
            }
        }"#;

        let err = bind_metadata(doc, 100).expect_err("patch past ctrldata");
        assert!(err.to_string().contains("control packet"));
        assert!(err.to_string().contains("512"));
    }

    #[test]
    fn fixed_numbering_dialect_with_override() {
        let doc = br#"{
            "ctrl_pkt_xrt_arg_idx": 2,
            "ctrl_pkt_patch_info": [
                { "offset": 12, "xrt_arg_idx": 0, "bo_offset": 0 }
            ]
        }"#;

        let binding = bind_metadata(doc, 64).expect("bind");
        assert_eq!(binding.args.get(0), Some("3"));
        assert_eq!(binding.args.get(1), Some("4"));
        assert_eq!(binding.args.get(2), Some(CONTROL_PACKET_ARG));
        assert_eq!(binding.args.get(3), Some("6"));
        assert_eq!(binding.args.get(4), Some("7"));

        assert_eq!(binding.relocations.len(), 1);
        let reloc = &binding.relocations[0];
        assert_eq!(reloc.offset, 4);
        assert_eq!(reloc.symbol, "3");
        assert_eq!(reloc.addend, 0);
    }

    #[test]
    fn fixed_numbering_dialect_defaults_arg4_to_control_packet() {
        let doc = br#"{ "ctrl_pkt_patch_info": [] }"#;
        let binding = bind_metadata(doc, 0).expect("bind");
        assert_eq!(binding.args.get(4), Some(CONTROL_PACKET_ARG));
        assert_eq!(binding.args.get(3), Some("6"));
    }

    #[test]
    fn oversized_addend_is_rejected() {
        let doc = br#"{
            "ctrl_pkt_patch_info": [
                { "offset": 12, "xrt_arg_idx": 0, "bo_offset": 4294967297 }
            ]
        }"#;

        let err = bind_metadata(doc, 64).expect_err("addend too wide");
        assert!(matches!(err, Error::AddendTooLarge { .. }));
    }

    #[test]
    fn patch_offset_under_packet_header_is_rejected() {
        let doc = br#"{
            "ctrl_pkt_patch_info": [
                { "offset": 4, "xrt_arg_idx": 0, "bo_offset": 0 }
            ]
        }"#;

        let err = bind_metadata(doc, 64).expect_err("underflow");
        assert!(matches!(err, Error::PatchOffsetUnderflow { offset: 4 }));
    }

    #[test]
    fn unknown_dialect_binds_nothing() {
        let binding = bind_metadata(br#"{ "something_else": 1 }"#, 0).expect("bind");
        assert!(binding.args.is_empty());
        assert!(binding.relocations.is_empty());
    }

    #[test]
    fn patch_records_become_relocations() {
        let records = vec![PatchRecord {
            symbol: "scratch".to_string(),
            buffer: PatchBufferKind::Instruction,
            schema: PatchSchema::ShimDma48,
            offsets: vec![16, 48],
        }];
        let relocations = bind_patch_records(&records);
        assert_eq!(relocations.len(), 2);
        assert!(relocations.iter().all(|reloc| reloc.section == CTRLTEXT));
        assert_eq!(relocations[1].offset, 48);
    }
}
