//! Type flattening
//!
//! Unfolds bundle/vector types into flat named leaves carrying direction,
//! width, and sign. Emission order matches declaration order; the module
//! registry depends on that when recording port signatures.

use std::collections::HashSet;

use crate::error::{LoweringError, Result};
use crate::firrtl::{Direction, Type};

/// One flattened leaf: dotted/indexed path plus direction, width, sign
///
/// Vector types additionally emit a zero-width marker leaf per index
/// carrying the vector's base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatPort {
    pub name: String,
    pub direction: Direction,
    pub bits: u32,
    pub signed: bool,
}

/// Width of a scalar type
///
/// Bundles and vectors have no single width; asking for one is an
/// upstream invariant violation.
pub fn bit_count(tpe: &Type) -> Result<u32> {
    match tpe {
        Type::UInt { width } => Ok(*width),
        Type::SInt { width } => Ok(*width),
        Type::Clock => Ok(1),
        Type::Reset => Ok(1),
        Type::AsyncReset => Ok(1),
        Type::Analog { width } => Ok(*width),
        Type::Fixed => Err(LoweringError::UnsupportedType("Fixed")),
        Type::Bundle { .. } | Type::Vector { .. } => Err(LoweringError::UnknownPortType),
    }
}

/// Recursively expand `tpe` rooted at `path` into `out`
///
/// Flipped bundle fields invert the direction; AsyncReset leaves record
/// their path into `async_resets`.
pub fn flatten_type(
    tpe: &Type,
    dir: Direction,
    path: &str,
    out: &mut Vec<FlatPort>,
    async_resets: &mut HashSet<String>,
) -> Result<()> {
    match tpe {
        Type::UInt { width } => out.push(FlatPort {
            name: path.to_string(),
            direction: dir,
            bits: *width,
            signed: false,
        }),
        Type::SInt { width } => out.push(FlatPort {
            name: path.to_string(),
            direction: dir,
            bits: *width,
            signed: true,
        }),
        Type::Clock | Type::Reset => out.push(FlatPort {
            name: path.to_string(),
            direction: dir,
            bits: 1,
            signed: false,
        }),
        Type::AsyncReset => {
            out.push(FlatPort {
                name: path.to_string(),
                direction: dir,
                bits: 1,
                signed: false,
            });
            async_resets.insert(path.to_string());
        }
        Type::Bundle { fields } => {
            for field in fields {
                let field_dir = if field.flipped { dir.flipped() } else { dir };
                let field_path = format!("{}.{}", path, field.id);
                flatten_type(&field.tpe, field_dir, &field_path, out, async_resets)?;
            }
        }
        Type::Vector { tpe, size } => {
            for i in 0..*size {
                out.push(FlatPort {
                    name: path.to_string(),
                    direction: dir,
                    bits: 0,
                    signed: false,
                });
                let elem_path = format!("{}[{}]", path, i);
                flatten_type(tpe, dir, &elem_path, out, async_resets)?;
            }
        }
        Type::Fixed => return Err(LoweringError::UnsupportedType("Fixed")),
        Type::Analog { .. } => return Err(LoweringError::UnsupportedType("Analog")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firrtl::Field;

    fn flatten(tpe: &Type, dir: Direction) -> (Vec<FlatPort>, HashSet<String>) {
        let mut out = Vec::new();
        let mut async_resets = HashSet::new();
        flatten_type(tpe, dir, "io", &mut out, &mut async_resets).unwrap();
        (out, async_resets)
    }

    #[test]
    fn scalar_types_emit_one_leaf() {
        let (out, _) = flatten(&Type::UInt { width: 8 }, Direction::In);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "io");
        assert_eq!(out[0].bits, 8);
        assert!(!out[0].signed);

        let (out, _) = flatten(&Type::SInt { width: 4 }, Direction::Out);
        assert!(out[0].signed);
    }

    #[test]
    fn bundle_paths_join_with_dots_and_flips_invert() {
        let tpe = Type::Bundle {
            fields: vec![
                Field {
                    id: "data".to_string(),
                    flipped: false,
                    tpe: Type::UInt { width: 16 },
                },
                Field {
                    id: "ready".to_string(),
                    flipped: true,
                    tpe: Type::UInt { width: 1 },
                },
            ],
        };
        let (out, _) = flatten(&tpe, Direction::In);
        assert_eq!(out[0].name, "io.data");
        assert_eq!(out[0].direction, Direction::In);
        assert_eq!(out[1].name, "io.ready");
        assert_eq!(out[1].direction, Direction::Out);
    }

    #[test]
    fn nested_bundle_depth_matches_separator_count() {
        let tpe = Type::Bundle {
            fields: vec![Field {
                id: "a".to_string(),
                flipped: false,
                tpe: Type::Bundle {
                    fields: vec![Field {
                        id: "b".to_string(),
                        flipped: false,
                        tpe: Type::UInt { width: 1 },
                    }],
                },
            }],
        };
        let (out, _) = flatten(&tpe, Direction::In);
        assert_eq!(out[0].name, "io.a.b");
        assert_eq!(out[0].name.matches('.').count(), 2);
    }

    #[test]
    fn vectors_emit_marker_then_indexed_leaves() {
        let tpe = Type::Vector {
            tpe: Box::new(Type::UInt { width: 2 }),
            size: 2,
        };
        let (out, _) = flatten(&tpe, Direction::In);
        // marker, io[0], marker, io[1]
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].name, "io");
        assert_eq!(out[0].bits, 0);
        assert_eq!(out[1].name, "io[0]");
        assert_eq!(out[1].bits, 2);
        assert_eq!(out[3].name, "io[1]");
    }

    #[test]
    fn async_reset_paths_are_recorded() {
        let (out, async_resets) = flatten(&Type::AsyncReset, Direction::In);
        assert_eq!(out[0].bits, 1);
        assert!(async_resets.contains("io"));
    }

    #[test]
    fn fixed_and_analog_are_rejected() {
        let mut out = Vec::new();
        let mut ar = HashSet::new();
        assert!(flatten_type(&Type::Fixed, Direction::In, "x", &mut out, &mut ar).is_err());
        assert!(
            flatten_type(&Type::Analog { width: 3 }, Direction::In, "x", &mut out, &mut ar)
                .is_err()
        );
    }
}
