//! # Model container format
//!
//! The binary format a model is embedded as. It is read in place: the
//! metadata block is decoded once, constant tensor data is borrowed straight
//! from the (usually flash-resident) byte buffer.
//!
//! ## File Format Structure
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │  Header (10 bytes)               │
//! ├──────────────────────────────────┤
//! │  - Magic number (4 bytes)        │  0x464E4954 ("TINF" in LE)
//! │  - Version (2 bytes)             │  Schema version (3)
//! │  - Metadata size (4 bytes)       │  Size of CBOR metadata (u32)
//! ├──────────────────────────────────┤
//! │  Metadata (CBOR)                 │
//! ├──────────────────────────────────┤
//! │  - operators: [OperatorKind]     │  Operators the graph needs
//! │  - tensors: [TensorDescriptor]   │  dtype, shape, quantization,
//! │                                  │  optional constant data offsets
//! │  - nodes: [NodeDescriptor]       │  Execution order
//! │  - inputs / outputs: [u32]       │  Graph I/O tensor indices
//! ├──────────────────────────────────┤
//! │  Data Section                    │
//! ├──────────────────────────────────┤
//! │  [padding][tensor1][padding]...  │  Each buffer aligned to 16 bytes
//! │  Raw tensor bytes (little-endian)│
//! └──────────────────────────────────┘
//! ```
//!
//! Tensors without a constant buffer are computed at runtime; their storage
//! is planned in the interpreter's arena.

mod base;
mod reader;
mod writer;

pub use base::*;
pub use reader::Model;
pub use writer::ModelWriter;

#[cfg(test)]
mod tests;
