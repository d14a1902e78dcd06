use indexmap::IndexMap;
use thiserror::Error;

use crate::Relocation;

/// A relocation emitted at a site that already holds a different relocation.
#[derive(Debug, Error)]
#[error("conflicting relocation at {section}+{offset:#X}")]
pub struct SiteConflict {
    pub section: String,
    pub offset: u32,
}

/// Accumulates relocation records during symbol extraction. Each
/// `(section, offset)` site holds at most one record: re-adding an identical
/// record is a no-op, a differing one is rejected.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: IndexMap<(String, u32), Relocation>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, reloc: Relocation) -> Result<(), SiteConflict> {
        let key = (reloc.section.clone(), reloc.offset);
        match self.entries.get(&key) {
            None => {
                self.entries.insert(key, reloc);
                Ok(())
            }
            Some(existing) if *existing == reloc => Ok(()),
            Some(_) => Err(SiteConflict {
                section: reloc.section,
                offset: reloc.offset,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relocation> {
        self.entries.values()
    }

    /// Relocations grouped by `(section, schema)`, insertion order preserved
    /// within each group. This is the order the container's relocation table
    /// is written in.
    pub fn into_relocations(self) -> Vec<Relocation> {
        let mut relocs: Vec<Relocation> = self.entries.into_values().collect();
        relocs.sort_by(|lhs, rhs| {
            lhs.section
                .cmp(&rhs.section)
                .then_with(|| lhs.schema.cmp(&rhs.schema))
        });
        relocs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CTRLDATA, CTRLTEXT, PatchSchema};

    fn reloc(section: &str, offset: u32, schema: PatchSchema, symbol: &str) -> Relocation {
        Relocation {
            symbol: symbol.to_string(),
            section: section.to_string(),
            offset,
            schema,
            addend: 0,
            mask_or_length: 0,
        }
    }

    #[test]
    fn identical_records_deduplicate() {
        let mut table = SymbolTable::new();
        table.add(reloc(CTRLTEXT, 4, PatchSchema::ShimDma48, "3")).expect("add");
        table.add(reloc(CTRLTEXT, 4, PatchSchema::ShimDma48, "3")).expect("re-add");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn conflicting_site_is_rejected() {
        let mut table = SymbolTable::new();
        table.add(reloc(CTRLTEXT, 4, PatchSchema::ShimDma48, "3")).expect("add");
        let err = table
            .add(reloc(CTRLTEXT, 4, PatchSchema::ShimDma48, "4"))
            .expect_err("conflict");
        assert_eq!(err.offset, 4);
    }

    #[test]
    fn same_offset_in_different_sections_is_fine() {
        let mut table = SymbolTable::new();
        table.add(reloc(CTRLTEXT, 0, PatchSchema::Scalar32, "3")).expect("text");
        table.add(reloc(CTRLDATA, 0, PatchSchema::ControlPacket48, "3")).expect("data");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn relocations_come_out_grouped_by_section_and_schema() {
        let mut table = SymbolTable::new();
        table.add(reloc(CTRLTEXT, 0, PatchSchema::ShimDma48, "a")).expect("add");
        table.add(reloc(CTRLDATA, 8, PatchSchema::ControlPacket48, "b")).expect("add");
        table.add(reloc(CTRLTEXT, 32, PatchSchema::Scalar32, "c")).expect("add");
        table.add(reloc(CTRLTEXT, 64, PatchSchema::ShimDma48, "d")).expect("add");

        let groups: Vec<(String, PatchSchema)> = table
            .into_relocations()
            .iter()
            .map(|reloc| (reloc.section.clone(), reloc.schema))
            .collect();
        assert_eq!(
            groups,
            vec![
                (CTRLDATA.to_string(), PatchSchema::ControlPacket48),
                (CTRLTEXT.to_string(), PatchSchema::Scalar32),
                (CTRLTEXT.to_string(), PatchSchema::ShimDma48),
                (CTRLTEXT.to_string(), PatchSchema::ShimDma48),
            ]
        );
    }
}
