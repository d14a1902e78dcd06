use thiserror::Error;

use npuasm_isa::{MAX_ARG_INDEX, RecordError};
use npuasm_obj::SiteConflict;

/// Coarse classification of assembly failures: malformed input versus a
/// state inconsistency inside the assembler itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidAsm,
    Internal,
}

/// Which bound a metadata patch offset was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetKind {
    ControlPacket,
    CoalescedBuffer,
}

impl std::fmt::Display for OffsetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ControlPacket => write!(f, "control packet"),
            Self::CoalescedBuffer => write!(f, "coalesced buffer"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} patch offset ({offset}) is greater than size ({size})")]
    PatchOffsetBeyondSection {
        kind: OffsetKind,
        offset: u64,
        size: u64,
    },
    #[error("argument index ({arg_index}) is greater than max argument index ({MAX_ARG_INDEX})")]
    ArgIndexTooLarge { arg_index: u64 },
    #[error("invalid addend ({addend:#X}) wider than 32 bits")]
    AddendTooLarge { addend: u64 },
    #[error("control packet patch offset ({offset}) is smaller than the 8-byte packet header")]
    PatchOffsetUnderflow { offset: u64 },
    #[error("invalid metadata document: {0}")]
    InvalidMetadata(#[from] serde_json::Error),

    #[error("invalid control code: {0}")]
    Framing(#[from] RecordError),
    #[error("transaction header declares {declared} bytes but the stream holds {actual}")]
    StreamTooShort { declared: u32, actual: usize },
    #[error("PM id {pm_id} has no corresponding PM control packet")]
    UnknownPmId { pm_id: u8 },
    #[error("patch opcode found inside a PM load sequence")]
    PatchInPmLoad,
    #[error(
        "invalid control code: no block-write opcode present before the patch opcode for address {reg:#X}"
    )]
    PatchWithoutBlockWrite { reg: u64 },
    #[error("patch site at offset {offset:#X} lies outside the {len}-byte stream")]
    PatchSiteOutOfRange { offset: u32, len: usize },

    #[error("invalid dpu opcode {opcode} at word {pc}")]
    DpuUnknownOpcode { opcode: u8, pc: usize },
    #[error("invalid dpu argument index {arg}")]
    DpuUnknownArg { arg: u32 },
    #[error("dpu stream truncated inside the record starting at word {pc}")]
    DpuTruncated { pc: usize },

    #[error("assembly source is not valid utf-8")]
    SourceNotUtf8,
    #[error("line {line}: unrecognised input '{text}'")]
    AsmParse { line: usize, text: String },
    #[error("'{mnemonic}' expects {expected} argument(s), got {got}")]
    WrongArgumentCount {
        mnemonic: String,
        expected: usize,
        got: usize,
    },
    #[error("'{mnemonic}' operand {value:#X} is out of range")]
    OperandOutOfRange { mnemonic: String, value: u64 },
    #[error("'{mnemonic}' expects a numeric argument, got '{text}'")]
    BadNumericArgument { mnemonic: String, text: String },
    #[error("unresolved symbol '{name}'")]
    UnresolvedSymbol { name: String },
    #[error("job {id} is already defined")]
    DuplicateJob { id: i64 },
    #[error("label '{name}' is already defined")]
    DuplicateLabel { name: String },
    #[error("job id {id} collides with the reserved sentinel range")]
    JobIdOutOfRange { id: i64 },
    #[error("'start_job {id}' while job {open} is still open")]
    NestedJob { id: i64, open: i64 },
    #[error("'end_job' without an open job")]
    EndWithoutJob,
    #[error("'{mnemonic}' outside any job")]
    OpOutsideJob { mnemonic: String },
    #[error("'launch_job {id}' references a job that is never declared")]
    LaunchTargetUndeclared { id: i64 },
    #[error("job {id} is still open at end of input")]
    UnterminatedJob { id: i64 },
    #[error("'word' is only valid in the data section")]
    WordOutsideData,

    #[error("invalid operation: {mnemonic}")]
    UnknownMnemonic { mnemonic: String },
    #[error(transparent)]
    SymbolConflict(#[from] SiteConflict),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownMnemonic { .. } | Self::SymbolConflict(_) => ErrorKind::Internal,
            _ => ErrorKind::InvalidAsm,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_split_user_input_from_state_errors() {
        assert_eq!(
            Error::AddendTooLarge { addend: 1 << 33 }.kind(),
            ErrorKind::InvalidAsm
        );
        assert_eq!(
            Error::UnknownMnemonic {
                mnemonic: "frobnicate".to_string()
            }
            .kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn messages_carry_offending_values() {
        let message = Error::PatchOffsetBeyondSection {
            kind: OffsetKind::ControlPacket,
            offset: 17420,
            size: 100,
        }
        .to_string();
        assert!(message.contains("17420"));
        assert!(message.contains("control packet"));

        let message = Error::PatchWithoutBlockWrite { reg: 0x1D000 }.to_string();
        assert!(message.contains("0x1D000"));
    }
}
