pub mod driver;
pub mod dpu;
pub mod error;
pub mod lexer;
pub mod metadata;
pub mod ops;
pub mod patch;
pub mod state;
pub mod txn;

pub use driver::{AssembleInput, BufferType, Metadata, assemble};
pub use error::{Error, ErrorKind};
pub use metadata::{ArgMap, Binding, PatchBufferKind, PatchRecord, bind_metadata};
