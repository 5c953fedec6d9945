//! LNAST node types and tokens
//!
//! The tag set is closed and partitioned into three families:
//! tree-structural nodes, primitive operations, and leaves.

use serde::{Deserialize, Serialize};

use crate::tree::StringId;

/// Node tag for an LNAST node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LnastNodeType {
    // Tree-structural
    Top,
    Stmts,
    Cstmts,
    If,
    Cond,
    Uif,
    Elif,
    For,
    While,
    FuncDef,
    FuncCall,

    // Arithmetic
    Plus,
    Minus,
    Mult,
    Div,
    Mod,

    // Bitwise
    And,
    Or,
    Xor,
    Not,

    // Logical
    LogicalAnd,
    LogicalOr,
    LogicalNot,

    // Shifts
    LogicShr,
    ArithShr,
    ArithShl,
    RotateShr,
    RotateShl,
    DynamicShl,
    DynamicShr,

    // Comparisons
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,

    // Assignment and access
    Assign,
    DpAssign,
    As,
    Dot,
    Select,
    BitSelect,
    Tuple,
    TupleConcat,

    // Leaves
    Ref,
    Const,
}

impl LnastNodeType {
    /// Leaf nodes derive their textual identity from the token
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::Ref | Self::Const)
    }

    pub fn is_ref(self) -> bool {
        self == Self::Ref
    }

    pub fn is_const(self) -> bool {
        self == Self::Const
    }

    pub fn is_stmts(self) -> bool {
        self == Self::Stmts
    }

    pub fn is_cstmts(self) -> bool {
        self == Self::Cstmts
    }

    pub fn is_if(self) -> bool {
        self == Self::If
    }

    pub fn is_cond(self) -> bool {
        self == Self::Cond
    }

    pub fn is_assign(self) -> bool {
        self == Self::Assign
    }

    pub fn is_dp_assign(self) -> bool {
        self == Self::DpAssign
    }

    pub fn is_tuple(self) -> bool {
        self == Self::Tuple
    }

    pub fn is_tuple_concat(self) -> bool {
        self == Self::TupleConcat
    }

    pub fn is_func_call(self) -> bool {
        self == Self::FuncCall
    }

    pub fn is_func_def(self) -> bool {
        self == Self::FuncDef
    }

    /// Operations checked by the unary rule: lhs `ref`, a single rhs `ref`/`const`
    pub fn is_unary_group(self) -> bool {
        matches!(
            self,
            Self::Assign | Self::DpAssign | Self::Not | Self::LogicalNot | Self::As
        )
    }

    /// Operations checked by the n-ary rule: first child `ref`, rest `ref`/`const`
    pub fn is_nary_group(self) -> bool {
        matches!(
            self,
            Self::Plus
                | Self::Minus
                | Self::Mult
                | Self::Div
                | Self::Mod
                | Self::And
                | Self::Or
                | Self::Xor
                | Self::LogicalAnd
                | Self::LogicalOr
                | Self::LogicShr
                | Self::ArithShr
                | Self::ArithShl
                | Self::RotateShr
                | Self::RotateShl
                | Self::DynamicShl
                | Self::DynamicShr
                | Self::Eq
                | Self::Neq
                | Self::Lt
                | Self::Leq
                | Self::Gt
                | Self::Geq
                | Self::Dot
                | Self::Select
                | Self::BitSelect
                | Self::TupleConcat
        )
    }

    /// Any primitive operation (unary, n-ary, or tuple)
    pub fn is_primitive_op(self) -> bool {
        self.is_unary_group() || self.is_nary_group() || self.is_tuple()
    }

    /// Tree-structural constructs (everything the validator recurses into)
    pub fn is_tree_struct(self) -> bool {
        matches!(
            self,
            Self::Stmts
                | Self::Cstmts
                | Self::If
                | Self::Cond
                | Self::Uif
                | Self::Elif
                | Self::For
                | Self::While
                | Self::FuncCall
                | Self::FuncDef
        )
    }

    /// Lowercase tag name, used by the preorder dump
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Stmts => "stmts",
            Self::Cstmts => "cstmts",
            Self::If => "if",
            Self::Cond => "cond",
            Self::Uif => "uif",
            Self::Elif => "elif",
            Self::For => "for",
            Self::While => "while",
            Self::FuncDef => "func_def",
            Self::FuncCall => "func_call",
            Self::Plus => "plus",
            Self::Minus => "minus",
            Self::Mult => "mult",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Not => "not",
            Self::LogicalAnd => "logical_and",
            Self::LogicalOr => "logical_or",
            Self::LogicalNot => "logical_not",
            Self::LogicShr => "logic_shr",
            Self::ArithShr => "arith_shr",
            Self::ArithShl => "arith_shl",
            Self::RotateShr => "rotate_shr",
            Self::RotateShl => "rotate_shl",
            Self::DynamicShl => "dynamic_shl",
            Self::DynamicShr => "dynamic_shr",
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Lt => "lt",
            Self::Leq => "leq",
            Self::Gt => "gt",
            Self::Geq => "geq",
            Self::Assign => "assign",
            Self::DpAssign => "dp_assign",
            Self::As => "as",
            Self::Dot => "dot",
            Self::Select => "select",
            Self::BitSelect => "bit_select",
            Self::Tuple => "tuple",
            Self::TupleConcat => "tuple_concat",
            Self::Ref => "ref",
            Self::Const => "const",
        }
    }
}

/// Source token attached to a node
///
/// Carries position info plus the interned text. For `ref`/`const` leaves
/// the text is the node's identity; for internal nodes it is a debug label
/// (possibly empty).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnastToken {
    /// Line number (0 when synthesized)
    pub line: u32,
    /// Column number
    pub col: u32,
    /// Byte offset in source
    pub pos: u64,
    /// Token length in bytes
    pub len: u32,
    /// Interned token text
    pub text: StringId,
}

impl LnastToken {
    /// Synthesized token with no source position
    pub fn synthetic(text: StringId) -> Self {
        Self {
            line: 0,
            col: 0,
            pos: 0,
            len: 0,
            text,
        }
    }
}

/// A node record: tag plus token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnastNode {
    pub node_type: LnastNodeType,
    pub token: LnastToken,
}

impl LnastNode {
    pub fn new(node_type: LnastNodeType, token: LnastToken) -> Self {
        Self { node_type, token }
    }
}
