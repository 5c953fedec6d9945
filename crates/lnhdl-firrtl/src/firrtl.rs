//! Typed model of the serialized FIRRTL circuit
//!
//! This mirrors the protobuf schema the upstream elaborator emits, limited
//! to the entities the lowering consumes. The binary wire codec itself is
//! upstream; designs arrive here already decoded (the CLI loads the serde
//! form directly).

use serde::{Deserialize, Serialize};

/// One serialized design, holding one or more circuits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirrtlDesign {
    #[serde(default)]
    pub circuits: Vec<Circuit>,
}

/// A circuit: top module name(s) plus every module definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Circuit {
    #[serde(default)]
    pub top: Vec<String>,
    #[serde(default)]
    pub modules: Vec<Module>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Module {
    User(UserModule),
    External(ExternalModule),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserModule {
    pub id: String,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub statements: Vec<Statement>,
}

/// A black-box module; only its interface and parameters are known
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalModule {
    pub id: String,
    #[serde(default)]
    pub defined_name: String,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub id: String,
    pub value: ParamValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParamValue {
    Integer(BigInt),
    Double(f64),
    Str(String),
    RawStr(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub direction: Direction,
    pub tpe: Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Bundle-field flip: in <-> out
    pub fn flipped(self) -> Self {
        match self {
            Self::In => Self::Out,
            Self::Out => Self::In,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Type {
    UInt {
        #[serde(default)]
        width: u32,
    },
    SInt {
        #[serde(default)]
        width: u32,
    },
    Clock,
    Reset,
    AsyncReset,
    Bundle {
        fields: Vec<Field>,
    },
    Vector {
        tpe: Box<Type>,
        size: u32,
    },
    /// Fixed-point; recognized, not supported
    Fixed,
    /// Analog; recognized, not supported
    Analog {
        #[serde(default)]
        width: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    #[serde(default)]
    pub flipped: bool,
    pub tpe: Type,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Statement {
    Wire {
        id: String,
        tpe: Type,
    },
    Register {
        id: String,
        tpe: Type,
        clock: Expression,
        reset: Expression,
        init: Expression,
    },
    Memory(Memory),
    CMemory(CMemory),
    MemoryPort(MemoryPort),
    Instance {
        id: String,
        module_id: String,
    },
    /// A named intermediate in the circuit
    Node {
        id: String,
        expression: Expression,
    },
    When {
        predicate: Expression,
        #[serde(default)]
        consequent: Vec<Statement>,
        #[serde(default)]
        otherwise: Vec<Statement>,
    },
    Stop {
        return_value: i32,
        clk: Expression,
        en: Expression,
    },
    Printf {
        value: String,
        clk: Expression,
        en: Expression,
        #[serde(default)]
        args: Vec<Expression>,
    },
    Connect {
        location: Expression,
        expression: Expression,
    },
    PartialConnect {
        location: Expression,
        expression: Expression,
    },
    IsInvalid {
        expression: Expression,
    },
    Skip,
    /// Bidirectional attach; recognized, not supported
    Attach {
        #[serde(default)]
        expressions: Vec<Expression>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub tpe: Type,
    pub depth: MemoryDepth,
    #[serde(default)]
    pub write_latency: u32,
    #[serde(default)]
    pub read_latency: u32,
    #[serde(default)]
    pub read_under_write: ReadUnderWrite,
    #[serde(default)]
    pub reader_ids: Vec<String>,
    #[serde(default)]
    pub writer_ids: Vec<String>,
    #[serde(default)]
    pub readwriter_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MemoryDepth {
    Uint(u64),
    Bigint(BigInt),
}

/// Read-under-write forwarding policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadUnderWrite {
    #[default]
    Undefined,
    Old,
    New,
}

/// Chirrtl-style memory: data type and depth only, ports come later
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CMemory {
    pub id: String,
    pub kind: CMemoryKind,
    #[serde(default)]
    pub sync_read: bool,
    #[serde(default)]
    pub read_under_write: ReadUnderWrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CMemoryKind {
    Vector { tpe: Box<Type>, size: u32 },
    TypeAndDepth { data_type: Box<Type>, depth: BigInt },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPort {
    pub id: String,
    pub memory_id: String,
    /// Address expression
    pub memory_index: Expression,
    /// Clock expression
    pub expression: Expression,
    pub direction: MemoryPortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryPortDirection {
    Infer,
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expression {
    Reference {
        id: String,
    },
    UIntLiteral {
        value: String,
        #[serde(default)]
        width: u32,
    },
    SIntLiteral {
        value: String,
        #[serde(default)]
        width: u32,
    },
    /// Fixed-point literal; recognized, not supported
    FixedLiteral,
    ValidIf {
        condition: Box<Expression>,
        value: Box<Expression>,
    },
    Mux {
        condition: Box<Expression>,
        t_value: Box<Expression>,
        f_value: Box<Expression>,
    },
    SubField {
        expression: Box<Expression>,
        field: String,
    },
    SubIndex {
        expression: Box<Expression>,
        index: String,
    },
    SubAccess {
        expression: Box<Expression>,
        index: Box<Expression>,
    },
    PrimOp {
        op: PrimOpKind,
        #[serde(default)]
        args: Vec<Expression>,
        /// Literal immediates (shift amounts, bit positions, pad widths)
        #[serde(default)]
        consts: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimOpKind {
    Add,
    Sub,
    Times,
    Divide,
    Rem,
    DynamicShiftLeft,
    DynamicShiftRight,
    BitAnd,
    BitOr,
    BitXor,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Equal,
    NotEqual,
    Tail,
    Head,
    ShiftLeft,
    ShiftRight,
    BitNot,
    Concat,
    Pad,
    Neg,
    Convert,
    ExtractBits,
    AsUInt,
    AsSInt,
    AsClock,
    AsFixedPoint,
    AsAsyncReset,
    XorReduce,
    AndReduce,
    OrReduce,
    IncreasePrecision,
    DecreasePrecision,
    SetPrecision,
    Wrap,
    Clip,
    Squeeze,
    AsInterval,
}

impl PrimOpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Times => "mul",
            Self::Divide => "div",
            Self::Rem => "rem",
            Self::DynamicShiftLeft => "dshl",
            Self::DynamicShiftRight => "dshr",
            Self::BitAnd => "and",
            Self::BitOr => "or",
            Self::BitXor => "xor",
            Self::Less => "lt",
            Self::LessEq => "leq",
            Self::Greater => "gt",
            Self::GreaterEq => "geq",
            Self::Equal => "eq",
            Self::NotEqual => "neq",
            Self::Tail => "tail",
            Self::Head => "head",
            Self::ShiftLeft => "shl",
            Self::ShiftRight => "shr",
            Self::BitNot => "not",
            Self::Concat => "cat",
            Self::Pad => "pad",
            Self::Neg => "neg",
            Self::Convert => "cvt",
            Self::ExtractBits => "bits",
            Self::AsUInt => "asUInt",
            Self::AsSInt => "asSInt",
            Self::AsClock => "asClock",
            Self::AsFixedPoint => "asFixedPoint",
            Self::AsAsyncReset => "asAsyncReset",
            Self::XorReduce => "xorr",
            Self::AndReduce => "andr",
            Self::OrReduce => "orr",
            Self::IncreasePrecision => "incp",
            Self::DecreasePrecision => "decp",
            Self::SetPrecision => "setp",
            Self::Wrap => "wrap",
            Self::Clip => "clip",
            Self::Squeeze => "squz",
            Self::AsInterval => "asInterval",
        }
    }
}

/// Arbitrary-precision literal carried as a big-endian byte array
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigInt {
    #[serde(default)]
    pub value: Vec<u8>,
}

impl BigInt {
    pub fn new(value: Vec<u8>) -> Self {
        Self { value }
    }

    /// Render as a sized binary literal: each byte expanded MSB-first into
    /// `0b<bits>s<8n>bits`. The empty array renders as `0b0s1bit`.
    pub fn to_binary_literal(&self) -> String {
        if self.value.is_empty() {
            return "0b0s1bit".to_string();
        }
        let mut bits = String::with_capacity(self.value.len() * 8);
        for byte in &self.value {
            for j in (0..8).rev() {
                bits.push(if (byte >> j) & 1 == 1 { '1' } else { '0' });
            }
        }
        format!("0b{}s{}bits", bits, self.value.len() * 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bigint_is_one_zero_bit() {
        assert_eq!(BigInt::default().to_binary_literal(), "0b0s1bit");
    }

    #[test]
    fn bigint_expands_bytes_msb_first() {
        let b = BigInt::new(vec![0b1010_0001]);
        assert_eq!(b.to_binary_literal(), "0b10100001s8bits");

        let b2 = BigInt::new(vec![0x01, 0x80]);
        assert_eq!(b2.to_binary_literal(), "0b0000000110000000s16bits");
    }

    #[test]
    fn bigint_literal_round_trips() {
        let bytes = vec![0xde, 0xad, 0xbe, 0xef];
        let lit = BigInt::new(bytes.clone()).to_binary_literal();

        // Re-parse: 0b<bits>s<N>bits
        let body = lit.strip_prefix("0b").unwrap();
        let s_pos = body.find('s').unwrap();
        let bit_str = &body[..s_pos];
        assert_eq!(&body[s_pos..], "s32bits");

        let mut rebuilt = Vec::new();
        for chunk in bit_str.as_bytes().chunks(8) {
            let mut byte = 0u8;
            for &c in chunk {
                byte = (byte << 1) | (c - b'0');
            }
            rebuilt.push(byte);
        }
        assert_eq!(rebuilt, bytes);
    }

    #[test]
    fn design_round_trips_through_serde() {
        let design = FirrtlDesign {
            circuits: vec![Circuit {
                top: vec!["Add".to_string()],
                modules: vec![Module::User(UserModule {
                    id: "Add".to_string(),
                    ports: vec![Port {
                        id: "a".to_string(),
                        direction: Direction::In,
                        tpe: Type::UInt { width: 8 },
                    }],
                    statements: vec![Statement::Skip],
                })],
            }],
        };
        let json = serde_json::to_string(&design).unwrap();
        let back: FirrtlDesign = serde_json::from_str(&json).unwrap();
        assert_eq!(back.circuits.len(), 1);
        assert_eq!(back.circuits[0].top, ["Add"]);
    }
}
