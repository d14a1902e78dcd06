use crate::Container;

/// Human-readable container summary: section table, hex dump per section,
/// then the relocation table in its stored (grouped) order.
pub fn format_summary(container: &Container) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "container: {} section(s), {} relocation(s), {} column(s)\n",
        container.sections.len(),
        container.relocations.len(),
        container.num_cols,
    ));

    for (name, bytes) in &container.sections {
        out.push('\n');
        out.push_str(&format!("[{name}]  ({} bytes)\n", bytes.len()));
        for (row_index, row) in bytes.chunks(16).enumerate() {
            let mut hex = String::new();
            for (i, byte) in row.iter().enumerate() {
                if i > 0 {
                    hex.push(' ');
                }
                hex.push_str(&format!("{byte:02X}"));
            }
            out.push_str(&format!("{:06X}: {hex}\n", row_index * 16));
        }
    }

    if !container.relocations.is_empty() {
        out.push('\n');
        out.push_str("relocations:\n");
        for reloc in &container.relocations {
            out.push_str(&format!(
                "{}+{:#08X}  {:<17}  symbol '{}'  addend {:#X}  mask/length {:#X}\n",
                reloc.section,
                reloc.offset,
                reloc.schema.name(),
                reloc.symbol,
                reloc.addend,
                reloc.mask_or_length,
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CTRLDATA, PatchSchema, Relocation};
    use indexmap::IndexMap;

    #[test]
    fn summary_lists_sections_and_relocations() {
        let mut sections = IndexMap::new();
        sections.insert(CTRLDATA.to_string(), vec![0xEAu8; 20]);
        let container = Container {
            sections,
            relocations: vec![Relocation {
                symbol: "control-packet".to_string(),
                section: CTRLDATA.to_string(),
                offset: 4,
                schema: PatchSchema::ControlPacket48,
                addend: 0,
                mask_or_length: 64,
            }],
            num_cols: 1,
        };

        let summary = format_summary(&container);
        assert!(summary.contains("[.ctrldata]  (20 bytes)"));
        assert!(summary.contains("000000: EA EA"));
        assert!(summary.contains("control_packet_48"));
        assert!(summary.contains("symbol 'control-packet'"));
    }
}
