//! SAMM scope-injection analysis
//!
//! Decides, per function, whether the emitter brackets the body with
//! `samm_enter_scope`/`samm_exit_scope`. The heuristic: the function
//! contains a DIM or REDIM (or LOCAL) statement, or any natural loop
//! whose body allocates (NEW, a string literal, or a LIST literal).
//! Functions that never allocate pay zero overhead. Class methods and
//! the main program are always scoped; the caller enforces that part.

use crate::ast::{Ast, ExprId, ExprKind, StmtKind};
use crate::cfg::{Cfg, EdgeKind};
use std::collections::HashSet;

/// Pre-emission CFG walk implementing the scoping heuristic.
pub(super) fn needs_scope(cfg: &Cfg, ast: &Ast) -> bool {
    for block in &cfg.blocks {
        for &sid in &block.stmts {
            if matches!(
                ast.stmt(sid).kind,
                StmtKind::Dim { .. } | StmtKind::Redim { .. } | StmtKind::Local { .. }
            ) {
                return true;
            }
        }
    }

    // Any allocation inside a natural loop body
    for edge in &cfg.edges {
        if edge.kind != EdgeKind::BackEdge {
            continue;
        }
        let body = natural_loop(cfg, edge.from, edge.to);
        for &b in &body {
            for &sid in &cfg.blocks[b].stmts {
                if stmt_allocates(ast, &ast.stmt(sid).kind) {
                    return true;
                }
            }
        }
    }
    false
}

/// Blocks of the natural loop for a back edge `latch -> header`:
/// the header plus every block that reaches the latch without passing
/// through the header (reverse DFS over predecessors).
fn natural_loop(cfg: &Cfg, latch: usize, header: usize) -> HashSet<usize> {
    let mut body = HashSet::from([header, latch]);
    let mut stack = vec![latch];
    while let Some(b) = stack.pop() {
        if b == header {
            continue;
        }
        for &p in &cfg.blocks[b].preds {
            if body.insert(p) {
                stack.push(p);
            }
        }
    }
    body
}

fn stmt_allocates(ast: &Ast, kind: &StmtKind) -> bool {
    stmt_exprs(kind).iter().any(|&e| expr_allocates(ast, e))
}

fn expr_allocates(ast: &Ast, id: ExprId) -> bool {
    match &ast.expr(id).kind {
        ExprKind::New { .. } | ExprKind::StringLit { .. } | ExprKind::ListLit { .. } => true,
        ExprKind::Binary { lhs, rhs, .. } => expr_allocates(ast, *lhs) || expr_allocates(ast, *rhs),
        ExprKind::Unary { operand, .. } => expr_allocates(ast, *operand),
        ExprKind::FunctionCall { args, .. }
        | ExprKind::SuperCall { args, .. }
        | ExprKind::RegistryCall { args, .. } => args.iter().any(|&a| expr_allocates(ast, a)),
        ExprKind::MethodCall { object, args, .. } => {
            expr_allocates(ast, *object) || args.iter().any(|&a| expr_allocates(ast, a))
        }
        ExprKind::MemberAccess { object, .. } => expr_allocates(ast, *object),
        ExprKind::ArrayAccess { indices, .. } => {
            indices.iter().any(|&i| expr_allocates(ast, i))
        }
        ExprKind::StringSlice { base, start, end } => {
            expr_allocates(ast, *base) || expr_allocates(ast, *start) || expr_allocates(ast, *end)
        }
        ExprKind::Iif {
            cond,
            then_val,
            else_val,
        } => {
            expr_allocates(ast, *cond)
                || expr_allocates(ast, *then_val)
                || expr_allocates(ast, *else_val)
        }
        ExprKind::IsType { value, .. } => expr_allocates(ast, *value),
        _ => false,
    }
}

/// Expressions directly referenced by a leaf statement.
fn stmt_exprs(kind: &StmtKind) -> Vec<ExprId> {
    match kind {
        StmtKind::Print(args) | StmtKind::Console(args) => {
            args.items.iter().map(|i| i.expr).collect()
        }
        StmtKind::Let { target, value } => vec![*target, *value],
        StmtKind::Inc { target, amount } | StmtKind::Dec { target, amount } => {
            let mut v = vec![*target];
            v.extend(amount);
            v
        }
        StmtKind::Swap { a, b } => vec![*a, *b],
        StmtKind::Call { args, .. } | StmtKind::Worker { args, .. } => args.clone(),
        StmtKind::CallMethod { call } => vec![*call],
        StmtKind::Throw { code, line } => {
            let mut v = vec![*code];
            v.extend(line);
            v
        }
        StmtKind::Read { targets } | StmtKind::Input { targets, .. } => targets.clone(),
        StmtKind::Delete { target } => vec![*target],
        StmtKind::Await { target, .. } => target.iter().copied().collect(),
        StmtKind::Return { value } => value.iter().copied().collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfgs;
    use crate::diagnostics::DiagnosticSink;
    use crate::parser::Parser;

    fn main_cfg(source: &str) -> (crate::ast::Ast, Cfg) {
        let mut sink = DiagnosticSink::default();
        let parser = Parser::new(source, &mut sink);
        let (ast, program) = parser.parse();
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
        let r = build_cfgs(&ast, &program, &mut sink);
        (ast, r.main)
    }

    fn func_cfg(source: &str) -> (crate::ast::Ast, Cfg) {
        let mut sink = DiagnosticSink::default();
        let parser = Parser::new(source, &mut sink);
        let (ast, program) = parser.parse();
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
        let mut r = build_cfgs(&ast, &program, &mut sink);
        (ast, r.funcs.remove(0))
    }

    #[test]
    fn test_dim_forces_scope() {
        let (ast, cfg) = func_cfg("SUB S()\nDIM x AS INTEGER\nEND SUB\n");
        assert!(needs_scope(&cfg, &ast));
    }

    #[test]
    fn test_plain_arithmetic_needs_no_scope() {
        let (ast, cfg) = func_cfg("FUNCTION F(a)\nF = a * 2 + 1\nEND FUNCTION\n");
        assert!(!needs_scope(&cfg, &ast));
    }

    #[test]
    fn test_string_literal_outside_loop_needs_no_scope() {
        let (ast, cfg) = func_cfg("SUB S()\nPRINT \"once\"\nEND SUB\n");
        assert!(!needs_scope(&cfg, &ast));
    }

    #[test]
    fn test_string_literal_inside_loop_forces_scope() {
        let (ast, cfg) = func_cfg("SUB S()\nFOR i = 1 TO 3\nPRINT \"again\"\nNEXT i\nEND SUB\n");
        assert!(needs_scope(&cfg, &ast));
    }

    #[test]
    fn test_new_inside_while_forces_scope() {
        let src = "SUB S()\nWHILE x < 3\nx = x + 1\ny = NEW Thing()\nWEND\nEND SUB\n";
        let (ast, cfg) = func_cfg(src);
        assert!(needs_scope(&cfg, &ast));
    }

    #[test]
    fn test_main_loop_detection() {
        let (ast, cfg) = main_cfg("FOR i = 1 TO 3\ns$ = \"x\"\nNEXT i\n");
        assert!(needs_scope(&cfg, &ast));
    }
}
