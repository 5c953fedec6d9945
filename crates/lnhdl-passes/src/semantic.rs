//! Structural semantic validation of LNAST trees
//!
//! A post-order walk from `top -> stmts` enforcing node arity, per-type
//! child constraints, and single-assignment of `___` temporaries. Errors
//! are collected into a report rather than aborting, so the caller decides
//! fatality; running the pass twice over one tree yields identical reports.

use thiserror::Error;
use tracing::trace;

use lnhdl_lnast::{Lnast, LnastIndex, LnastNodeType};

/// Rule-specific structural violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemanticError {
    #[error("Temporary Variable Error: {0} must be written to only once")]
    TempMultipleWrite(String),

    #[error("Unary Operation Error: LHS Node must be Node type 'ref'")]
    UnaryLhsNotRef,
    #[error("Unary Operation Error: RHS Node must be Node type 'ref' or 'const'")]
    UnaryRhsNotRefOrConst,

    #[error("N-ary Operation Error: LHS Node must be Node type 'ref'")]
    NaryLhsNotRef,
    #[error("N-ary Operation Error: RHS Node(s) must be Node type 'ref' or 'const'")]
    NaryRhsNotRefOrConst,

    #[error("Tuple Operation Error: Missing Reference Node")]
    TupleMissingRef,
    #[error("Tuple Operation Error: Missing Assign Node(s)")]
    TupleMissingAssigns,

    #[error("Primitive Operation Error: Not a Valid Node Type")]
    PrimitiveInvalidNodeType,
    #[error("Primitive Operation Error: Requires at least 2 LNAST Nodes (lhs, rhs)")]
    PrimitiveTooFewNodes,

    #[error("If Operation Error: Condition must be Node type 'ref'")]
    IfCondNotRef,
    #[error("If Operation Error: Missing Condition Node")]
    IfMissingCond,
    #[error("If Operation Error: Missing Condition Statements Node")]
    IfMissingCstmts,
    #[error("If Operation Error: Missing Statements Node")]
    IfMissingStmts,
    #[error("If Operation Error: Not a Valid Node Type")]
    IfInvalidNodeType,

    #[error("For Operation Error: Missing Reference Node(s)")]
    ForMissingRefs,
    #[error("For Operation Error: Missing Statements Node")]
    ForMissingStmts,
    #[error("For Operation Error: Not a Valid Node Type")]
    ForInvalidNodeType,

    #[error("While Operation Error: Condition must be Node type 'ref'")]
    WhileCondNotRef,
    #[error("While Operation Error: Missing Condition Node")]
    WhileMissingCond,
    #[error("While Operation Error: Missing Statement Node")]
    WhileMissingStmts,
    #[error("While Operation Error: Not a Valid Node Type")]
    WhileInvalidNodeType,

    #[error("Func Def Operation Error: Condition must be Node type 'ref' or 'const'")]
    FuncDefCondNotRefOrConst,
    #[error("Func Def Operation Error: Missing Reference Node")]
    FuncDefMissingRef,
    #[error("Func Def Operation Error: Missing Condition Node")]
    FuncDefMissingCond,
    #[error("Func Def Operation Error: Missing Statement Node")]
    FuncDefMissingStmts,
    #[error("Func Def Operation Error: Not a Valid Node Type")]
    FuncDefInvalidNodeType,

    #[error("Func Call Operation Error: Children must be Node type 'ref'")]
    FuncCallNotRef,
    #[error("Func Call Operation Error: Missing Reference Node(s)")]
    FuncCallMissingRefs,
}

/// Validation outcome: fatal errors plus the names written but never read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemanticReport {
    pub errors: Vec<SemanticError>,
    /// Temporaries (and locals) written but never read; a warning, not fatal
    pub never_read: Vec<String>,
}

impl SemanticReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Warning text matching the pass output format, if any name went unread
    pub fn never_read_warning(&self) -> Option<String> {
        if self.never_read.is_empty() {
            return None;
        }
        Some(format!(
            "Temporary Variable Warning: {} were written but never read",
            self.never_read.join(", ")
        ))
    }
}

/// Validate one LNAST rooted at `top -> stmts`
pub fn semantic_check(lnast: &Lnast) -> SemanticReport {
    let mut checker = Checker::default();
    let top = lnast.get_root();
    if let Some(stmts) = lnast.get_first_child(top) {
        checker.check_statements(lnast, stmts);
    }
    SemanticReport {
        errors: checker.errors,
        never_read: checker.not_read_list,
    }
}

#[derive(Default)]
struct Checker {
    /// Temporaries already seen as an assignment LHS
    temp_list: Vec<String>,
    /// Names written but not read yet
    not_read_list: Vec<String>,
    /// Names that were read at least once
    have_read_list: Vec<String>,
    errors: Vec<SemanticError>,
}

fn is_temp_var(name: &str) -> bool {
    name.starts_with("___")
}

impl Checker {
    fn check_for_temp_var(&mut self, name: &str) {
        if !is_temp_var(name) {
            return;
        }
        if self.temp_list.iter().any(|t| t == name) {
            self.errors
                .push(SemanticError::TempMultipleWrite(name.to_string()));
        } else {
            self.temp_list.push(name.to_string());
        }
    }

    fn check_for_not_read(&mut self, name: &str) {
        if self.not_read_list.iter().any(|n| n == name) {
            trace!(name, "marking as read");
            self.not_read_list.retain(|n| n != name);
            self.have_read_list.push(name.to_string());
        } else if !self.have_read_list.iter().any(|n| n == name) && !name.starts_with('%') {
            trace!(name, "written, not yet read");
            self.not_read_list.push(name.to_string());
        }
    }

    /// A name appearing as a write target
    fn mark_written(&mut self, name: &str) {
        if !self.not_read_list.iter().any(|n| n == name) {
            self.check_for_not_read(name);
        }
    }

    /// A name appearing as a read operand
    fn mark_read(&mut self, name: &str) {
        if self.not_read_list.iter().any(|n| n == name) {
            self.check_for_not_read(name);
        }
    }

    fn check_statements(&mut self, ln: &Lnast, stmts: LnastIndex) {
        for stmt in ln.children(stmts) {
            let ntype = ln.get_data(stmt).node_type;
            if ntype.is_primitive_op() {
                self.check_primitive_ops(ln, stmt, ntype);
            } else {
                match ntype {
                    LnastNodeType::If | LnastNodeType::Uif => self.check_if_op(ln, stmt),
                    LnastNodeType::For => self.check_for_op(ln, stmt),
                    LnastNodeType::While => self.check_while_op(ln, stmt),
                    LnastNodeType::FuncCall => self.check_func_call(ln, stmt),
                    LnastNodeType::FuncDef => self.check_func_def(ln, stmt),
                    _ => {}
                }
            }
        }
    }

    fn check_primitive_ops(&mut self, ln: &Lnast, opr: LnastIndex, ntype: LnastNodeType) {
        if ln.has_single_child(opr) || ln.get_first_child(opr).is_none() {
            self.errors.push(SemanticError::PrimitiveTooFewNodes);
            return;
        }

        if ntype.is_unary_group() {
            let lhs = ln.get_first_child(opr).expect("checked above");
            let rhs = match ln.get_sibling_next(lhs) {
                Some(rhs) => rhs,
                None => {
                    self.errors.push(SemanticError::PrimitiveTooFewNodes);
                    return;
                }
            };
            let lhs_type = ln.get_data(lhs).node_type;
            let rhs_type = ln.get_data(rhs).node_type;

            if !lhs_type.is_ref() {
                self.errors.push(SemanticError::UnaryLhsNotRef);
            }
            if !rhs_type.is_ref() && !rhs_type.is_const() {
                self.errors.push(SemanticError::UnaryRhsNotRefOrConst);
            }
            let lhs_name = ln.get_name(lhs).to_string();
            self.check_for_temp_var(&lhs_name);
            self.mark_written(&lhs_name);
            let rhs_name = ln.get_name(rhs).to_string();
            self.mark_read(&rhs_name);
        } else if ntype.is_nary_group() {
            let first = ln.get_first_child(opr);
            for child in ln.children(opr) {
                let child_type = ln.get_data(child).node_type;
                let child_name = ln.get_name(child).to_string();

                if Some(child) == first {
                    if !child_type.is_ref() {
                        self.errors.push(SemanticError::NaryLhsNotRef);
                    }
                    self.check_for_temp_var(&child_name);
                    self.mark_written(&child_name);
                    continue;
                }
                if !child_type.is_ref() && !child_type.is_const() {
                    self.errors.push(SemanticError::NaryRhsNotRefOrConst);
                }
                self.mark_read(&child_name);
            }
        } else if ntype.is_tuple() {
            let mut num_refs = 0;
            let mut num_assigns = 0;
            for child in ln.children(opr) {
                let child_type = ln.get_data(child).node_type;
                if child_type.is_ref() {
                    num_refs += 1;
                    let name = ln.get_name(child).to_string();
                    self.check_for_temp_var(&name);
                    self.mark_written(&name);
                } else if child_type.is_assign() {
                    self.check_primitive_ops(ln, child, child_type);
                    num_assigns += 1;
                }
            }
            if num_refs != 1 {
                self.errors.push(SemanticError::TupleMissingRef);
            } else if num_assigns < 2 {
                self.errors.push(SemanticError::TupleMissingAssigns);
            }
        } else {
            self.errors.push(SemanticError::PrimitiveInvalidNodeType);
        }
    }

    fn check_if_op(&mut self, ln: &Lnast, opr: LnastIndex) {
        let mut has_cstmts = false;
        let mut has_cond = false;
        let mut has_stmts = false;
        for child in ln.children(opr) {
            let ntype = ln.get_data(child).node_type;
            if ntype.is_cstmts() || ntype.is_stmts() {
                if ntype.is_cstmts() {
                    has_cstmts = true;
                } else {
                    has_stmts = true;
                }
                self.check_statements(ln, child);
            } else if ntype.is_cond() {
                if ln.has_single_child(child) {
                    has_cond = true;
                    let cond = ln.get_first_child(child).expect("single child");
                    if !ln.get_data(cond).node_type.is_ref() {
                        self.errors.push(SemanticError::IfCondNotRef);
                    }
                    let name = ln.get_name(cond).to_string();
                    self.mark_read(&name);
                } else {
                    self.errors.push(SemanticError::IfMissingCond);
                }
            } else {
                self.errors.push(SemanticError::IfInvalidNodeType);
            }
        }
        if !has_cstmts {
            self.errors.push(SemanticError::IfMissingCstmts);
        } else if !has_cond {
            self.errors.push(SemanticError::IfMissingCond);
        } else if !has_stmts {
            self.errors.push(SemanticError::IfMissingStmts);
        }
    }

    fn check_for_op(&mut self, ln: &Lnast, opr: LnastIndex) {
        let mut has_stmts = false;
        let mut num_refs = 0;
        for child in ln.children(opr) {
            let ntype = ln.get_data(child).node_type;
            if ntype.is_stmts() {
                has_stmts = true;
                self.check_statements(ln, child);
            } else if ntype.is_ref() {
                num_refs += 1;
                let name = ln.get_name(child).to_string();
                self.mark_read(&name);
            } else {
                self.errors.push(SemanticError::ForInvalidNodeType);
            }
        }
        if num_refs < 2 {
            self.errors.push(SemanticError::ForMissingRefs);
        } else if !has_stmts {
            self.errors.push(SemanticError::ForMissingStmts);
        }
    }

    fn check_while_op(&mut self, ln: &Lnast, opr: LnastIndex) {
        let mut has_cond = false;
        let mut has_stmts = false;
        for child in ln.children(opr) {
            let ntype = ln.get_data(child).node_type;
            if ntype.is_cond() {
                has_cond = true;
                if ln.has_single_child(child) {
                    let cond = ln.get_first_child(child).expect("single child");
                    if !ln.get_data(cond).node_type.is_ref() {
                        self.errors.push(SemanticError::WhileCondNotRef);
                    }
                } else {
                    self.errors.push(SemanticError::WhileMissingCond);
                }
            } else if ntype.is_stmts() {
                has_stmts = true;
                self.check_statements(ln, child);
            } else {
                self.errors.push(SemanticError::WhileInvalidNodeType);
            }
        }
        if !has_cond {
            self.errors.push(SemanticError::WhileMissingCond);
        } else if !has_stmts {
            self.errors.push(SemanticError::WhileMissingStmts);
        }
    }

    fn check_func_def(&mut self, ln: &Lnast, opr: LnastIndex) {
        let mut num_refs = 0;
        let mut has_cond = false;
        let mut has_stmts = false;
        let first = ln.get_first_child(opr);
        for child in ln.children(opr) {
            let ntype = ln.get_data(child).node_type;
            if Some(child) == first {
                let name = ln.get_name(child).to_string();
                self.mark_written(&name);
            }
            if ntype.is_cstmts() || ntype.is_stmts() {
                if ntype.is_stmts() {
                    has_stmts = true;
                }
                self.check_statements(ln, child);
            } else if ntype.is_cond() {
                if ln.has_single_child(child) {
                    has_cond = true;
                    let cond = ln.get_first_child(child).expect("single child");
                    let cond_type = ln.get_data(cond).node_type;
                    if !cond_type.is_ref() && !cond_type.is_const() {
                        self.errors.push(SemanticError::FuncDefCondNotRefOrConst);
                    }
                } else {
                    self.errors.push(SemanticError::FuncDefMissingCond);
                }
            } else if ntype.is_ref() {
                num_refs += 1;
            } else {
                self.errors.push(SemanticError::FuncDefInvalidNodeType);
            }
        }
        if num_refs < 1 {
            self.errors.push(SemanticError::FuncDefMissingRef);
        } else if !has_cond {
            self.errors.push(SemanticError::FuncDefMissingCond);
        } else if !has_stmts {
            self.errors.push(SemanticError::FuncDefMissingStmts);
        }
    }

    fn check_func_call(&mut self, ln: &Lnast, opr: LnastIndex) {
        let mut num_refs = 0;
        for child in ln.children(opr) {
            if ln.get_data(child).node_type.is_ref() {
                num_refs += 1;
                let name = ln.get_name(child).to_string();
                self.mark_read(&name);
            } else {
                self.errors.push(SemanticError::FuncCallNotRef);
            }
        }
        if num_refs != 3 {
            self.errors.push(SemanticError::FuncCallMissingRefs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnhdl_lnast::{LnastNode, LnastNodeType as NT, LnastToken};

    fn new_tree() -> (Lnast, LnastIndex) {
        let mut ln = Lnast::new("test", "test.fir");
        let sid = ln.add_string("top");
        let root = ln.set_root(LnastNode::new(NT::Top, LnastToken::synthetic(sid)));
        let stmts = ln.append(root, NT::Stmts, "SEQ0");
        (ln, stmts)
    }

    fn add_assign(ln: &mut Lnast, parent: LnastIndex, lhs: &str, rhs: &str, rhs_const: bool) {
        let asg = ln.append(parent, NT::Assign, "");
        ln.append(asg, NT::Ref, lhs);
        ln.append(asg, if rhs_const { NT::Const } else { NT::Ref }, rhs);
    }

    #[test]
    fn double_write_to_temp_is_an_error() {
        let (mut ln, stmts) = new_tree();
        add_assign(&mut ln, stmts, "___t", "x", false);
        add_assign(&mut ln, stmts, "___t", "y", false);

        let report = semantic_check(&ln);
        assert_eq!(
            report.errors,
            vec![SemanticError::TempMultipleWrite("___t".to_string())]
        );
        assert_eq!(
            report.errors[0].to_string(),
            "Temporary Variable Error: ___t must be written to only once"
        );
    }

    #[test]
    fn single_write_then_read_is_clean() {
        let (mut ln, stmts) = new_tree();
        add_assign(&mut ln, stmts, "___t", "x", false);
        add_assign(&mut ln, stmts, "%out", "___t", false);

        let report = semantic_check(&ln);
        assert!(!report.has_errors());
        // x was read before any write; ___t was written then read
        assert!(!report.never_read.contains(&"___t".to_string()));
    }

    #[test]
    fn written_never_read_is_warned() {
        let (mut ln, stmts) = new_tree();
        add_assign(&mut ln, stmts, "___t", "1", true);

        let report = semantic_check(&ln);
        assert!(!report.has_errors());
        assert_eq!(report.never_read, vec!["___t".to_string()]);
        let warning = report.never_read_warning().unwrap();
        assert!(warning.contains("___t"));
        assert!(warning.contains("written but never read"));
    }

    #[test]
    fn assign_lhs_must_be_ref() {
        let (mut ln, stmts) = new_tree();
        let asg = ln.append(stmts, NT::Assign, "");
        ln.append(asg, NT::Const, "1");
        ln.append(asg, NT::Ref, "x");

        let report = semantic_check(&ln);
        assert!(report.errors.contains(&SemanticError::UnaryLhsNotRef));
    }

    #[test]
    fn nary_operands_must_be_ref_or_const() {
        let (mut ln, stmts) = new_tree();
        let plus = ln.append(stmts, NT::Plus, "");
        ln.append(plus, NT::Ref, "___s");
        ln.append(plus, NT::Ref, "a");
        let nested = ln.append(plus, NT::Plus, "");
        ln.append(nested, NT::Ref, "b");

        let report = semantic_check(&ln);
        assert!(report.errors.contains(&SemanticError::NaryRhsNotRefOrConst));
    }

    #[test]
    fn if_requires_cstmts_cond_stmts() {
        let (mut ln, stmts) = new_tree();
        let if_idx = ln.append(stmts, NT::If, "");
        let cond = ln.append(if_idx, NT::Cond, "");
        ln.append(cond, NT::Ref, "c");
        ln.append(if_idx, NT::Stmts, "SEQ1");

        let report = semantic_check(&ln);
        assert!(report.errors.contains(&SemanticError::IfMissingCstmts));
    }

    #[test]
    fn well_formed_if_passes() {
        let (mut ln, stmts) = new_tree();
        let if_idx = ln.append(stmts, NT::If, "");
        ln.append(if_idx, NT::Cstmts, "SEQ1");
        let cond = ln.append(if_idx, NT::Cond, "");
        ln.append(cond, NT::Ref, "c");
        let body = ln.append(if_idx, NT::Stmts, "SEQ2");
        add_assign(&mut ln, body, "%o", "a", false);

        let report = semantic_check(&ln);
        assert!(!report.has_errors(), "errors: {:?}", report.errors);
    }

    #[test]
    fn func_call_requires_three_refs() {
        let (mut ln, stmts) = new_tree();
        let call = ln.append(stmts, NT::FuncCall, "__fir_not");
        ln.append(call, NT::Ref, "___t");
        ln.append(call, NT::Ref, "a");

        let report = semantic_check(&ln);
        assert!(report.errors.contains(&SemanticError::FuncCallMissingRefs));
    }

    #[test]
    fn validator_is_idempotent() {
        let (mut ln, stmts) = new_tree();
        add_assign(&mut ln, stmts, "___t", "x", false);
        add_assign(&mut ln, stmts, "___t", "y", false);
        add_assign(&mut ln, stmts, "___u", "1", true);

        let first = semantic_check(&ln);
        let second = semantic_check(&ln);
        assert_eq!(first, second);
    }

    #[test]
    fn for_requires_two_refs_and_stmts() {
        let (mut ln, stmts) = new_tree();
        let for_idx = ln.append(stmts, NT::For, "");
        ln.append(for_idx, NT::Ref, "i");
        ln.append(for_idx, NT::Stmts, "SEQ1");

        let report = semantic_check(&ln);
        assert!(report.errors.contains(&SemanticError::ForMissingRefs));
    }

    #[test]
    fn while_cond_must_hold_single_ref() {
        let (mut ln, stmts) = new_tree();
        let while_idx = ln.append(stmts, NT::While, "");
        let cond = ln.append(while_idx, NT::Cond, "");
        ln.append(cond, NT::Const, "1");
        ln.append(while_idx, NT::Stmts, "SEQ1");

        let report = semantic_check(&ln);
        assert!(report.errors.contains(&SemanticError::WhileCondNotRef));
    }
}
