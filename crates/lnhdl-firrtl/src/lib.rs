//! LNHDL FIRRTL front-end
//!
//! This crate handles:
//! - The typed circuit message handed over by the upstream elaborator
//! - Flattening bundle/vector types into named scalar leaves
//! - Lowering each user module into one LNAST

pub mod error;
pub mod firrtl;
pub mod flatten;
pub mod lowering;

pub use error::{LoweringError, Result};
pub use firrtl::{
    BigInt, CMemory, CMemoryKind, Circuit, Direction, Expression, ExternalModule, Field,
    FirrtlDesign, Memory, MemoryDepth, MemoryPort, MemoryPortDirection, Module, Parameter,
    ParamValue, Port, PrimOpKind, ReadUnderWrite, Statement, Type, UserModule,
};
pub use flatten::{bit_count, flatten_type, FlatPort};
pub use lowering::FirrtlLowering;
