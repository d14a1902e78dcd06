use anyhow::{Context, Result, bail};
use indexmap::IndexMap;

use crate::{Container, PatchSchema, Relocation, validate_container};

const CONTAINER_MAGIC: &[u8; 6] = b"\x01\x00npuo";
const CONTAINER_VERSION: u16 = 1;

pub fn write_container(path: &std::path::Path, container: &Container) -> Result<()> {
    let bytes = encode_container(container)?;
    std::fs::write(path, bytes).with_context(|| format!("failed to write '{}'", path.display()))
}

pub fn read_container(path: &std::path::Path) -> Result<Container> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
    decode_container(&bytes).with_context(|| format!("failed to decode '{}'", path.display()))
}

pub fn encode_container(container: &Container) -> Result<Vec<u8>> {
    validate_container(container)?;

    let mut out = Vec::new();
    out.extend_from_slice(CONTAINER_MAGIC);
    write_u16(&mut out, CONTAINER_VERSION);
    write_u32(&mut out, container.num_cols);
    write_u32(&mut out, container.sections.len() as u32);
    write_u32(&mut out, container.relocations.len() as u32);

    for (name, bytes) in &container.sections {
        write_string(&mut out, name)?;
        write_bytes(&mut out, bytes)?;
    }

    for reloc in &container.relocations {
        write_string(&mut out, &reloc.section)?;
        write_u32(&mut out, reloc.offset);
        out.push(reloc.schema.byte());
        write_string(&mut out, &reloc.symbol)?;
        write_u32(&mut out, reloc.addend);
        out.extend_from_slice(&reloc.mask_or_length.to_le_bytes());
    }

    Ok(out)
}

pub fn decode_container(bytes: &[u8]) -> Result<Container> {
    let mut rd = Reader::new(bytes);
    let magic = rd.read_exact(CONTAINER_MAGIC.len())?;
    if magic != CONTAINER_MAGIC {
        bail!("invalid container magic");
    }
    let version = rd.read_u16()?;
    if version != CONTAINER_VERSION {
        bail!("unsupported container version: {version}");
    }

    let num_cols = rd.read_u32()?;
    let section_count = rd.read_u32()? as usize;
    let reloc_count = rd.read_u32()? as usize;

    let mut sections = IndexMap::new();
    for _ in 0..section_count {
        let name = rd.read_string()?;
        let bytes = rd.read_bytes()?;
        if sections.insert(name.clone(), bytes).is_some() {
            bail!("duplicate section '{name}'");
        }
    }

    let mut relocations = Vec::with_capacity(reloc_count);
    for _ in 0..reloc_count {
        let section = rd.read_string()?;
        let offset = rd.read_u32()?;
        let schema_byte = rd.read_u8()?;
        let schema = PatchSchema::from_byte(schema_byte)
            .with_context(|| format!("invalid patch schema: {schema_byte}"))?;
        let symbol = rd.read_string()?;
        let addend = rd.read_u32()?;
        let mask_or_length = rd.read_u64()?;
        relocations.push(Relocation {
            symbol,
            section,
            offset,
            schema,
            addend,
            mask_or_length,
        });
    }

    if !rd.is_eof() {
        bail!("container has trailing bytes");
    }

    let container = Container {
        sections,
        relocations,
        num_cols,
    };
    validate_container(&container)?;
    Ok(container)
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, value: &str) -> Result<()> {
    write_bytes(out, value.as_bytes())
}

fn write_bytes(out: &mut Vec<u8>, value: &[u8]) -> Result<()> {
    let len: u32 = value
        .len()
        .try_into()
        .context("byte array too long for container encoding")?;
    write_u32(out, len);
    out.extend_from_slice(value);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8> {
        let bytes = self.read_exact(1)?;
        Ok(bytes[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_exact(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_exact(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_exact(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        let value = std::str::from_utf8(&bytes).context("invalid utf-8 in container")?;
        Ok(value.to_string())
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.read_exact(len)?.to_vec())
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.saturating_add(len);
        if end > self.bytes.len() {
            bail!("unexpected EOF");
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn is_eof(&self) -> bool {
        self.pos == self.bytes.len()
    }
}
