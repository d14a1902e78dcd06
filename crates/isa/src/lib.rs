use thiserror::Error;

/// Bias added to a metadata argument index to obtain the kernel argument
/// index the runtime dispatch API uses.
pub const ARG_OFFSET: u32 = 3;
/// Largest kernel argument index the loader accepts.
pub const MAX_ARG_INDEX: u32 = 32;
/// Largest addend the loader can encode (32 bits).
pub const MAX_ARGPLUS: u64 = 0xFFFF_FFFF;

pub const BYTES_PER_WORD: u32 = 4;

/// First register of shim-tile DMA buffer descriptor 0, as a tile-relative
/// register address.
pub const SHIM_DMA_BD0_0: u32 = 0x1D000;
/// Byte stride between consecutive shim BDs (8 words).
pub const SHIM_DMA_BD_SIZE: u32 = 0x20;
pub const SHIM_DMA_BD_NUM: u32 = 16;

pub const MEM_DMA_BD0_0: u32 = 0xA0000;
pub const MEM_DMA_BD_SIZE: u32 = 0x20;
pub const MEM_DMA_BD_NUM: u32 = 48;

/// Field masks of the patchable BD registers. For mem-tile BDs the buffer
/// length and base address are bitfields inside their word; a shim BD's
/// buffer length occupies the whole word.
pub const MEM_BUFFER_LENGTH_MASK: u32 = 0x0001_FFFF;
pub const MEM_BASE_ADDRESS_MASK: u32 = 0x0007_FFFF;
pub const SHIM_BUFFER_LENGTH_MASK: u32 = 0xFFFF_FFFF;

/// Reduce a full register address to its tile-relative register index
/// (low 20 bits).
pub const fn tile_register(reg: u64) -> u32 {
    (reg & 0xF_FFFF) as u32
}

/// Align a patch register address down to the base of its BD.
pub const fn bd_base(reg: u64) -> u64 {
    reg & !0xF
}

const fn in_bd_table(reg: u32, base: u32, stride: u32, count: u32) -> bool {
    reg >= base && reg < base + stride * count && (reg - base) % stride == 0
}

/// True when `reg` is word 0 of a mem-tile DMA buffer descriptor.
pub const fn is_mem_bd_word0(reg: u32) -> bool {
    in_bd_table(reg, MEM_DMA_BD0_0, MEM_DMA_BD_SIZE, MEM_DMA_BD_NUM)
}

/// True when `reg` is word 0 of a shim-tile DMA buffer descriptor.
pub const fn is_shim_bd_word0(reg: u32) -> bool {
    in_bd_table(reg, SHIM_DMA_BD0_0, SHIM_DMA_BD_SIZE, SHIM_DMA_BD_NUM)
}

/// Tile coordinate operand encoding: 7 bits of column over 5 bits of row.
pub const fn tile_address(col: u32, row: u32) -> u32 {
    ((col & 0x7F) << 5) | (row & 0x1F)
}

/// DMA channel operand encoding. The six s2mm channels come first.
pub const fn s2mm_channel(index: u32) -> u32 {
    index
}

pub const fn mm2s_channel(index: u32) -> u32 {
    6 + index
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("unknown transaction opcode {opcode:#04X}")]
    UnknownOpcode { opcode: u8 },
    #[error("truncated {what} record: expected {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{what} record declares size {size} smaller than its {min}-byte header")]
    BadRecordSize {
        what: &'static str,
        size: u32,
        min: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderVersion {
    Legacy,
    Optimized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOpcode {
    Write,
    BlockWrite,
    MaskWrite,
    MaskPoll,
    NoOp,
    Preempt,
    MaskPollBusy,
    LoadPmStart,
    CustomOpTct,
    CustomOpDdrPatch,
    CustomOpReadRegs,
    CustomOpRecordTimer,
    CustomOpMergeSync,
}

pub const TXN_OP_WRITE: u8 = 0x00;
pub const TXN_OP_BLOCKWRITE: u8 = 0x01;
pub const TXN_OP_MASKWRITE: u8 = 0x03;
pub const TXN_OP_MASKPOLL: u8 = 0x04;
pub const TXN_OP_NOOP: u8 = 0x05;
pub const TXN_OP_PREEMPT: u8 = 0x06;
pub const TXN_OP_MASKPOLL_BUSY: u8 = 0x07;
pub const TXN_OP_LOAD_PM_START: u8 = 0x09;
pub const TXN_OP_CUSTOM_TCT: u8 = 0x80;
pub const TXN_OP_CUSTOM_DDR_PATCH: u8 = 0x81;
pub const TXN_OP_CUSTOM_READ_REGS: u8 = 0x82;
pub const TXN_OP_CUSTOM_RECORD_TIMER: u8 = 0x83;
pub const TXN_OP_CUSTOM_MERGE_SYNC: u8 = 0x84;

impl TxnOpcode {
    pub fn from_byte(opcode: u8) -> Option<Self> {
        Some(match opcode {
            TXN_OP_WRITE => Self::Write,
            TXN_OP_BLOCKWRITE => Self::BlockWrite,
            TXN_OP_MASKWRITE => Self::MaskWrite,
            TXN_OP_MASKPOLL => Self::MaskPoll,
            TXN_OP_NOOP => Self::NoOp,
            TXN_OP_PREEMPT => Self::Preempt,
            TXN_OP_MASKPOLL_BUSY => Self::MaskPollBusy,
            TXN_OP_LOAD_PM_START => Self::LoadPmStart,
            TXN_OP_CUSTOM_TCT => Self::CustomOpTct,
            TXN_OP_CUSTOM_DDR_PATCH => Self::CustomOpDdrPatch,
            TXN_OP_CUSTOM_READ_REGS => Self::CustomOpReadRegs,
            TXN_OP_CUSTOM_RECORD_TIMER => Self::CustomOpRecordTimer,
            TXN_OP_CUSTOM_MERGE_SYNC => Self::CustomOpMergeSync,
            _ => return None,
        })
    }

    pub const fn byte(self) -> u8 {
        match self {
            Self::Write => TXN_OP_WRITE,
            Self::BlockWrite => TXN_OP_BLOCKWRITE,
            Self::MaskWrite => TXN_OP_MASKWRITE,
            Self::MaskPoll => TXN_OP_MASKPOLL,
            Self::NoOp => TXN_OP_NOOP,
            Self::Preempt => TXN_OP_PREEMPT,
            Self::MaskPollBusy => TXN_OP_MASKPOLL_BUSY,
            Self::LoadPmStart => TXN_OP_LOAD_PM_START,
            Self::CustomOpTct => TXN_OP_CUSTOM_TCT,
            Self::CustomOpDdrPatch => TXN_OP_CUSTOM_DDR_PATCH,
            Self::CustomOpReadRegs => TXN_OP_CUSTOM_READ_REGS,
            Self::CustomOpRecordTimer => TXN_OP_CUSTOM_RECORD_TIMER,
            Self::CustomOpMergeSync => TXN_OP_CUSTOM_MERGE_SYNC,
        }
    }
}

pub const TXN_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnHeader {
    pub major: u8,
    pub minor: u8,
    pub dev_gen: u8,
    pub num_rows: u8,
    pub num_cols: u8,
    pub num_mem_tile_rows: u8,
    pub txn_size: u32,
    pub num_ops: u32,
}

impl TxnHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < TXN_HEADER_LEN {
            return Err(RecordError::Truncated {
                what: "transaction header",
                expected: TXN_HEADER_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            major: bytes[0],
            minor: bytes[1],
            dev_gen: bytes[2],
            num_rows: bytes[3],
            num_cols: bytes[4],
            num_mem_tile_rows: bytes[5],
            txn_size: read_u32(bytes, 8),
            num_ops: read_u32(bytes, 12),
        })
    }

    pub fn encode(&self) -> [u8; TXN_HEADER_LEN] {
        let mut out = [0u8; TXN_HEADER_LEN];
        out[0] = self.major;
        out[1] = self.minor;
        out[2] = self.dev_gen;
        out[3] = self.num_rows;
        out[4] = self.num_cols;
        out[5] = self.num_mem_tile_rows;
        out[8..12].copy_from_slice(&self.txn_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.num_ops.to_le_bytes());
        out
    }

    /// Header version (1, 0) selects the compact record layouts.
    pub const fn version(&self) -> HeaderVersion {
        if self.major == 1 && self.minor == 0 {
            HeaderVersion::Optimized
        } else {
            HeaderVersion::Legacy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWrite {
    pub reg_off: u64,
    /// Byte offset of the payload within the record.
    pub payload_offset: usize,
    pub payload_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmLoad {
    pub load_sequence_count: u32,
    pub pm_load_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchOp {
    pub action: u64,
    pub regaddr: u64,
    pub argidx: u64,
    pub argplus: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnRecord {
    /// Record carries nothing the symbol extractor cares about.
    Advance,
    BlockWrite(BlockWrite),
    PmLoad(PmLoad),
    DdrPatch(PatchOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedTxnOp {
    pub opcode: TxnOpcode,
    /// Total record length in bytes, header included.
    pub len: usize,
    pub record: TxnRecord,
}

const LEGACY_WRITE32_LEN: usize = 20;
const LEGACY_BLOCKWRITE_HEADER_LEN: usize = 16;
const LEGACY_MASKWRITE32_LEN: usize = 24;
const LEGACY_MASKPOLL32_LEN: usize = 24;
const OPT_WRITE32_LEN: usize = 12;
const OPT_BLOCKWRITE_HEADER_LEN: usize = 12;
const OPT_MASKWRITE32_LEN: usize = 16;
const OPT_MASKPOLL32_LEN: usize = 16;
const NOOP_LEN: usize = 4;
const PREEMPT_LEN: usize = 4;
const PM_LOAD_LEN: usize = 8;
const CUSTOM_OP_HEADER_LEN: usize = 8;
pub const PATCH_OP_LEN: usize = 32;

/// Decode one transaction record from the front of `bytes`. The walker
/// advances by the returned `len`; every opcode's advance is total by
/// construction of this table.
pub fn decode_txn_op(version: HeaderVersion, bytes: &[u8]) -> Result<DecodedTxnOp, RecordError> {
    let first = *bytes.first().ok_or(RecordError::Truncated {
        what: "transaction operation",
        expected: 1,
        actual: 0,
    })?;
    let opcode = TxnOpcode::from_byte(first).ok_or(RecordError::UnknownOpcode { opcode: first })?;

    let fixed = |what: &'static str, len: usize| -> Result<DecodedTxnOp, RecordError> {
        take(bytes, what, len)?;
        Ok(DecodedTxnOp {
            opcode,
            len,
            record: TxnRecord::Advance,
        })
    };

    match (opcode, version) {
        (TxnOpcode::Write, HeaderVersion::Legacy) => {
            let rec = take(bytes, "write", LEGACY_WRITE32_LEN)?;
            let len = sized(rec, "write", 16, LEGACY_WRITE32_LEN)?;
            take(bytes, "write", len)?;
            Ok(DecodedTxnOp {
                opcode,
                len,
                record: TxnRecord::Advance,
            })
        }
        (TxnOpcode::Write, HeaderVersion::Optimized) => fixed("write", OPT_WRITE32_LEN),
        (TxnOpcode::BlockWrite, _) => {
            let header_len = match version {
                HeaderVersion::Legacy => LEGACY_BLOCKWRITE_HEADER_LEN,
                HeaderVersion::Optimized => OPT_BLOCKWRITE_HEADER_LEN,
            };
            let header = take(bytes, "block-write", header_len)?;
            let (reg_off, size_at) = match version {
                HeaderVersion::Legacy => (read_u64(header, 4), 12),
                HeaderVersion::Optimized => (u64::from(read_u32(header, 4)), 8),
            };
            let len = sized(header, "block-write", size_at, header_len)?;
            take(bytes, "block-write payload", len)?;
            Ok(DecodedTxnOp {
                opcode,
                len,
                record: TxnRecord::BlockWrite(BlockWrite {
                    reg_off,
                    payload_offset: header_len,
                    payload_len: len - header_len,
                }),
            })
        }
        (TxnOpcode::MaskWrite, HeaderVersion::Legacy) => {
            let rec = take(bytes, "mask-write", LEGACY_MASKWRITE32_LEN)?;
            let len = sized(rec, "mask-write", 20, LEGACY_MASKWRITE32_LEN)?;
            take(bytes, "mask-write", len)?;
            Ok(DecodedTxnOp {
                opcode,
                len,
                record: TxnRecord::Advance,
            })
        }
        (TxnOpcode::MaskWrite, HeaderVersion::Optimized) => fixed("mask-write", OPT_MASKWRITE32_LEN),
        (TxnOpcode::MaskPoll | TxnOpcode::MaskPollBusy, HeaderVersion::Legacy) => {
            let rec = take(bytes, "mask-poll", LEGACY_MASKPOLL32_LEN)?;
            let len = sized(rec, "mask-poll", 20, LEGACY_MASKPOLL32_LEN)?;
            take(bytes, "mask-poll", len)?;
            Ok(DecodedTxnOp {
                opcode,
                len,
                record: TxnRecord::Advance,
            })
        }
        (TxnOpcode::MaskPoll | TxnOpcode::MaskPollBusy, HeaderVersion::Optimized) => {
            fixed("mask-poll", OPT_MASKPOLL32_LEN)
        }
        (TxnOpcode::NoOp, _) => fixed("no-op", NOOP_LEN),
        (TxnOpcode::Preempt, _) => fixed("preempt", PREEMPT_LEN),
        (TxnOpcode::LoadPmStart, _) => {
            let rec = take(bytes, "pm-load", PM_LOAD_LEN)?;
            let count =
                u32::from(rec[1]) | (u32::from(rec[2]) << 8) | (u32::from(rec[3]) << 16);
            Ok(DecodedTxnOp {
                opcode,
                len: PM_LOAD_LEN,
                record: TxnRecord::PmLoad(PmLoad {
                    load_sequence_count: count,
                    pm_load_id: rec[4],
                }),
            })
        }
        (
            TxnOpcode::CustomOpTct
            | TxnOpcode::CustomOpReadRegs
            | TxnOpcode::CustomOpRecordTimer
            | TxnOpcode::CustomOpMergeSync,
            _,
        ) => {
            let header = take(bytes, "custom op", CUSTOM_OP_HEADER_LEN)?;
            let len = sized(header, "custom op", 4, CUSTOM_OP_HEADER_LEN)?;
            take(bytes, "custom op", len)?;
            Ok(DecodedTxnOp {
                opcode,
                len,
                record: TxnRecord::Advance,
            })
        }
        (TxnOpcode::CustomOpDdrPatch, _) => {
            let header = take(bytes, "ddr-patch", CUSTOM_OP_HEADER_LEN)?;
            let len = sized(header, "ddr-patch", 4, CUSTOM_OP_HEADER_LEN + PATCH_OP_LEN)?;
            let rec = take(bytes, "ddr-patch payload", len)?;
            let op = &rec[CUSTOM_OP_HEADER_LEN..];
            Ok(DecodedTxnOp {
                opcode,
                len,
                record: TxnRecord::DdrPatch(PatchOp {
                    action: read_u64(op, 0),
                    regaddr: read_u64(op, 8),
                    argidx: read_u64(op, 16),
                    argplus: read_u64(op, 24),
                }),
            })
        }
    }
}

pub fn encode_write32(version: HeaderVersion, reg_off: u64, value: u32) -> Vec<u8> {
    match version {
        HeaderVersion::Legacy => {
            let mut out = vec![0u8; LEGACY_WRITE32_LEN];
            out[0] = TXN_OP_WRITE;
            out[4..12].copy_from_slice(&reg_off.to_le_bytes());
            out[12..16].copy_from_slice(&value.to_le_bytes());
            out[16..20].copy_from_slice(&(LEGACY_WRITE32_LEN as u32).to_le_bytes());
            out
        }
        HeaderVersion::Optimized => {
            let mut out = vec![0u8; OPT_WRITE32_LEN];
            out[0] = TXN_OP_WRITE;
            out[4..8].copy_from_slice(&(reg_off as u32).to_le_bytes());
            out[8..12].copy_from_slice(&value.to_le_bytes());
            out
        }
    }
}

pub fn encode_block_write32(version: HeaderVersion, reg_off: u64, payload: &[u8]) -> Vec<u8> {
    match version {
        HeaderVersion::Legacy => {
            let total = LEGACY_BLOCKWRITE_HEADER_LEN + payload.len();
            let mut out = vec![0u8; LEGACY_BLOCKWRITE_HEADER_LEN];
            out[0] = TXN_OP_BLOCKWRITE;
            out[4..12].copy_from_slice(&reg_off.to_le_bytes());
            out[12..16].copy_from_slice(&(total as u32).to_le_bytes());
            out.extend_from_slice(payload);
            out
        }
        HeaderVersion::Optimized => {
            let total = OPT_BLOCKWRITE_HEADER_LEN + payload.len();
            let mut out = vec![0u8; OPT_BLOCKWRITE_HEADER_LEN];
            out[0] = TXN_OP_BLOCKWRITE;
            out[4..8].copy_from_slice(&(reg_off as u32).to_le_bytes());
            out[8..12].copy_from_slice(&(total as u32).to_le_bytes());
            out.extend_from_slice(payload);
            out
        }
    }
}

pub fn encode_noop() -> Vec<u8> {
    let mut out = vec![0u8; NOOP_LEN];
    out[0] = TXN_OP_NOOP;
    out
}

pub fn encode_pm_load(load_sequence_count: u32, pm_load_id: u8) -> Vec<u8> {
    let mut out = vec![0u8; PM_LOAD_LEN];
    out[0] = TXN_OP_LOAD_PM_START;
    out[1] = (load_sequence_count & 0xFF) as u8;
    out[2] = ((load_sequence_count >> 8) & 0xFF) as u8;
    out[3] = ((load_sequence_count >> 16) & 0xFF) as u8;
    out[4] = pm_load_id;
    out
}

pub fn encode_custom_op(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let total = CUSTOM_OP_HEADER_LEN + payload.len();
    let mut out = vec![0u8; CUSTOM_OP_HEADER_LEN];
    out[0] = opcode;
    out[4..8].copy_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn encode_ddr_patch(op: &PatchOp) -> Vec<u8> {
    let mut payload = [0u8; PATCH_OP_LEN];
    payload[0..8].copy_from_slice(&op.action.to_le_bytes());
    payload[8..16].copy_from_slice(&op.regaddr.to_le_bytes());
    payload[16..24].copy_from_slice(&op.argidx.to_le_bytes());
    payload[24..32].copy_from_slice(&op.argplus.to_le_bytes());
    encode_custom_op(TXN_OP_CUSTOM_DDR_PATCH, &payload)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpuOp {
    NoOp,
    WriteBd,
    Write32,
    Sync,
    WriteBdExtendAieTile,
    Write32ExtendGeneral,
    WriteBdExtendShimTile,
    WriteBdExtendMemTile,
    Write32ExtendDiffBd,
    WriteBdExtendSameBdMemTile,
    DumpDdr,
    WriteShimBd,
    WriteMemBd,
    Write32Rtp,
    Read32,
    Read32Poll,
    RecordTimestamp,
    MergeSync,
    DumpRegister,
}

pub const DPU_WRITEBD_LOW_ROW_WORDS: usize = 9;
pub const DPU_WRITEBD_HIGH_ROW_WORDS: usize = 7;
pub const DPU_WRITESHIMBD_WORDS: usize = 8;

impl DpuOp {
    pub fn from_byte(opcode: u8) -> Option<Self> {
        Some(match opcode {
            0 => Self::NoOp,
            1 => Self::WriteBd,
            2 => Self::Write32,
            3 => Self::Sync,
            4 => Self::WriteBdExtendAieTile,
            5 => Self::Write32ExtendGeneral,
            6 => Self::WriteBdExtendShimTile,
            7 => Self::WriteBdExtendMemTile,
            8 => Self::Write32ExtendDiffBd,
            9 => Self::WriteBdExtendSameBdMemTile,
            10 => Self::DumpDdr,
            11 => Self::WriteShimBd,
            12 => Self::WriteMemBd,
            13 => Self::Write32Rtp,
            14 => Self::Read32,
            15 => Self::Read32Poll,
            16 => Self::RecordTimestamp,
            17 => Self::MergeSync,
            18 => Self::DumpRegister,
            _ => return None,
        })
    }

    pub const fn byte(self) -> u8 {
        match self {
            Self::NoOp => 0,
            Self::WriteBd => 1,
            Self::Write32 => 2,
            Self::Sync => 3,
            Self::WriteBdExtendAieTile => 4,
            Self::Write32ExtendGeneral => 5,
            Self::WriteBdExtendShimTile => 6,
            Self::WriteBdExtendMemTile => 7,
            Self::Write32ExtendDiffBd => 8,
            Self::WriteBdExtendSameBdMemTile => 9,
            Self::DumpDdr => 10,
            Self::WriteShimBd => 11,
            Self::WriteMemBd => 12,
            Self::Write32Rtp => 13,
            Self::Read32 => 14,
            Self::Read32Poll => 15,
            Self::RecordTimestamp => 16,
            Self::MergeSync => 17,
            Self::DumpRegister => 18,
        }
    }

    /// Record length in 32-bit words. `WriteBd` and `DumpRegister` are
    /// variable-length and resolved by the walker.
    pub const fn size_words(self) -> Option<usize> {
        Some(match self {
            Self::NoOp => 1,
            Self::Write32 => 3,
            Self::Sync => 2,
            Self::WriteBdExtendAieTile => 8,
            Self::Write32ExtendGeneral => 3,
            Self::WriteBdExtendShimTile => 10,
            Self::WriteBdExtendMemTile => 11,
            Self::Write32ExtendDiffBd => 4,
            Self::WriteBdExtendSameBdMemTile => 9,
            Self::DumpDdr => 44,
            Self::WriteShimBd => DPU_WRITESHIMBD_WORDS,
            Self::WriteMemBd => 9,
            Self::Write32Rtp => 3,
            Self::Read32 => 2,
            Self::Read32Poll => 4,
            Self::RecordTimestamp => 2,
            Self::MergeSync => 2,
            Self::WriteBd | Self::DumpRegister => return None,
        })
    }
}

/// Opcode lives in the word's most significant byte.
pub const fn dpu_opcode(word: u32) -> u8 {
    (word >> 24) as u8
}

/// Row field of a `WriteBd` word.
pub const fn dpu_row(word: u32) -> u8 {
    ((word >> 8) & 0xFF) as u8
}

/// Argument index of a shim-BD write word (upper nibble of the least
/// significant byte).
pub const fn dpu_shim_arg(word: u32) -> u32 {
    (word & 0xF0) >> 4
}

/// Fixed argument-index naming of the direct-DPU instruction set.
pub fn dpu_arg_name(arg: u32) -> Option<&'static str> {
    Some(match arg {
        0 => "ifm",
        1 => "param",
        2 => "ofm",
        3 => "inter",
        4 => "out2",
        5 => "control-packet",
        _ => return None,
    })
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn take<'a>(bytes: &'a [u8], what: &'static str, len: usize) -> Result<&'a [u8], RecordError> {
    if bytes.len() < len {
        return Err(RecordError::Truncated {
            what,
            expected: len,
            actual: bytes.len(),
        });
    }
    Ok(&bytes[..len])
}

fn sized(
    record: &[u8],
    what: &'static str,
    size_at: usize,
    min: usize,
) -> Result<usize, RecordError> {
    let size = read_u32(record, size_at);
    if (size as usize) < min {
        return Err(RecordError::BadRecordSize { what, size, min });
    }
    Ok(size as usize)
}
