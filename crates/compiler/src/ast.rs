//! Abstract syntax tree for FasterBASIC
//!
//! The AST is two arenas (`Vec<Stmt>`, `Vec<Expr>`) owned by [`Ast`].
//! Nodes reference each other by [`StmtId`]/[`ExprId`] indices, never by
//! pointer, so cross-references (label targets, CFG statement lists, the
//! semantic analyzer's per-expression type table) are plain integers.

use crate::diagnostics::SourceLoc;
use crate::types::BaseType;

/// Index of a statement in the [`Ast`] statement arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtId(pub u32);

/// Index of an expression in the [`Ast`] expression arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// Central arena owning every AST node of a translation unit.
#[derive(Debug, Default)]
pub struct Ast {
    stmts: Vec<Stmt>,
    exprs: Vec<Expr>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    pub fn alloc_stmt(&mut self, kind: StmtKind, loc: SourceLoc) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(Stmt { kind, loc });
        id
    }

    pub fn alloc_expr(&mut self, kind: ExprKind, loc: SourceLoc) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(Expr { kind, loc });
        id
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0 as usize]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn stmt_count(&self) -> usize {
        self.stmts.len()
    }

    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }
}

/// A parsed program: the ordered top-level statement list. Declarations
/// (functions, subs, classes, user types) appear in this list alongside
/// executable main-program statements.
#[derive(Debug, Default)]
pub struct Program {
    pub body: Vec<StmtId>,
}

#[derive(Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: SourceLoc,
}

#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: SourceLoc,
}

/// A type annotation as written in source. Resolved against the symbol
/// table during semantic analysis (a `Named` type may be a user record or
/// a class).
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedType {
    Base(BaseType),
    Named(String),
    ListOf(Box<ParsedType>),
    ArrayOf(Box<ParsedType>),
    Hashmap,
    Any,
}

/// One declarator in a DIM/LOCAL statement: `name [(dims)] [AS type] [= init]`.
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub ty: Option<ParsedType>,
    pub dims: Vec<ExprId>,
    pub init: Option<ExprId>,
}

/// Separator following a PRINT item. `;` juxtaposes, `,` advances to the
/// next tab stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintSep {
    Semi,
    Comma,
}

#[derive(Debug, Clone)]
pub struct PrintItem {
    pub expr: ExprId,
    pub sep: Option<PrintSep>,
}

/// PRINT/CONSOLE argument list. `trailing_sep` suppresses the final newline.
#[derive(Debug, Clone, Default)]
pub struct PrintArgs {
    pub items: Vec<PrintItem>,
    pub trailing_sep: bool,
}

/// DO/LOOP condition placement and polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoKind {
    PreWhile,
    PreUntil,
    PostWhile,
    PostUntil,
}

/// One label of a CASE arm: `CASE 1`, `CASE 1 TO 5`, `CASE IS < 3`.
#[derive(Debug, Clone)]
pub enum CaseLabel {
    Expr(ExprId),
    Range(ExprId, ExprId),
    Rel(BinOp, ExprId),
}

#[derive(Debug, Clone)]
pub struct CaseArm {
    pub labels: Vec<CaseLabel>,
    pub body: Vec<StmtId>,
}

#[derive(Debug, Clone)]
pub struct CatchArm {
    /// None is a catch-all arm
    pub code: Option<ExprId>,
    pub body: Vec<StmtId>,
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub ty: ParsedType,
    pub binding: String,
    pub body: Vec<StmtId>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Option<ParsedType>,
}

/// Shared declaration of FUNCTION/SUB/METHOD definitions.
#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<ParsedType>,
    pub body: Vec<StmtId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Normal,
    Constructor,
    Destructor,
}

#[derive(Debug, Clone)]
pub struct MethodDef {
    pub decl: FuncDecl,
    pub kind: MethodKind,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub ty: ParsedType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    For,
    While,
    Do,
    Function,
    Sub,
}

#[derive(Debug, Clone)]
pub enum OptionSetting {
    Explicit,
    Base(u32),
}

/// A literal in a DATA statement.
#[derive(Debug, Clone)]
pub enum DataValue {
    Number(f64),
    Str(String),
}

/// Statement variants. Control-flow statements own their bodies as
/// `Vec<StmtId>` into the arena.
#[derive(Debug)]
pub enum StmtKind {
    Print(PrintArgs),
    Console(PrintArgs),
    Let {
        target: ExprId,
        value: ExprId,
    },
    Dim {
        decls: Vec<VarDecl>,
    },
    Redim {
        name: String,
        dims: Vec<ExprId>,
    },
    If {
        cond: ExprId,
        then_body: Vec<StmtId>,
        elifs: Vec<(ExprId, Vec<StmtId>)>,
        else_body: Option<Vec<StmtId>>,
    },
    For {
        var: String,
        start: ExprId,
        end: ExprId,
        step: Option<ExprId>,
        body: Vec<StmtId>,
    },
    ForEach {
        /// Optional explicit tag binding: `FOR EACH T, E IN list`
        tag_var: Option<String>,
        var: String,
        list: ExprId,
        body: Vec<StmtId>,
    },
    While {
        cond: ExprId,
        body: Vec<StmtId>,
    },
    DoLoop {
        kind: DoKind,
        cond: ExprId,
        body: Vec<StmtId>,
    },
    Repeat {
        body: Vec<StmtId>,
        cond: ExprId,
    },
    SelectCase {
        selector: ExprId,
        arms: Vec<CaseArm>,
        else_body: Option<Vec<StmtId>>,
    },
    TryCatch {
        body: Vec<StmtId>,
        catches: Vec<CatchArm>,
        finally: Option<Vec<StmtId>>,
    },
    Throw {
        code: ExprId,
        line: Option<ExprId>,
    },
    FunctionDef(FuncDecl),
    SubDef(FuncDecl),
    Call {
        name: String,
        args: Vec<ExprId>,
    },
    /// A method call in statement position (`list.Append(1)`); the
    /// expression is always an `ExprKind::MethodCall`.
    CallMethod {
        call: ExprId,
    },
    Return {
        value: Option<ExprId>,
    },
    Goto {
        label: String,
    },
    Gosub {
        label: String,
    },
    OnGoto {
        selector: ExprId,
        targets: Vec<String>,
    },
    OnGosub {
        selector: ExprId,
        targets: Vec<String>,
    },
    Exit {
        kind: ExitKind,
    },
    End,
    Local {
        decls: Vec<VarDecl>,
    },
    Shared {
        names: Vec<String>,
    },
    Inc {
        target: ExprId,
        amount: Option<ExprId>,
    },
    Dec {
        target: ExprId,
        amount: Option<ExprId>,
    },
    Swap {
        a: ExprId,
        b: ExprId,
    },
    TypeDecl {
        name: String,
        fields: Vec<FieldDecl>,
    },
    ClassDecl {
        name: String,
        parent: Option<String>,
        fields: Vec<FieldDecl>,
        methods: Vec<MethodDef>,
    },
    Option(OptionSetting),
    Data {
        values: Vec<DataValue>,
    },
    Read {
        targets: Vec<ExprId>,
    },
    Restore {
        index: Option<ExprId>,
    },
    Input {
        prompt: Option<String>,
        targets: Vec<ExprId>,
    },
    MatchType {
        subject: ExprId,
        arms: Vec<MatchArm>,
        else_body: Option<Vec<StmtId>>,
    },
    Delete {
        target: ExprId,
    },
    Worker {
        name: String,
        func: String,
        args: Vec<ExprId>,
    },
    Await {
        worker: String,
        target: Option<ExprId>,
    },
    Label {
        name: String,
    },
}

/// Binary operators. `Concat` is the explicit `&` string concatenation;
/// `+` on strings resolves to it during analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// Expression variants.
#[derive(Debug)]
pub enum ExprKind {
    Number {
        value: f64,
        is_int: bool,
    },
    StringLit {
        value: String,
    },
    Variable {
        name: String,
    },
    Binary {
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Unary {
        op: UnOp,
        operand: ExprId,
    },
    FunctionCall {
        name: String,
        args: Vec<ExprId>,
    },
    MethodCall {
        object: ExprId,
        method: String,
        args: Vec<ExprId>,
    },
    MemberAccess {
        object: ExprId,
        field: String,
    },
    ArrayAccess {
        name: String,
        indices: Vec<ExprId>,
    },
    StringSlice {
        base: ExprId,
        start: ExprId,
        end: ExprId,
    },
    Iif {
        cond: ExprId,
        then_val: ExprId,
        else_val: ExprId,
    },
    New {
        class: String,
        args: Vec<ExprId>,
    },
    Me,
    Nothing,
    SuperCall {
        method: String,
        args: Vec<ExprId>,
    },
    IsType {
        value: ExprId,
        ty: ParsedType,
    },
    ListLit {
        elems: Vec<ExprId>,
    },
    Ready {
        worker: String,
    },
    RegistryCall {
        name: String,
        args: Vec<ExprId>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_ids_are_sequential() {
        let mut ast = Ast::new();
        let loc = SourceLoc::new(1, 1);
        let a = ast.alloc_expr(
            ExprKind::Number {
                value: 1.0,
                is_int: true,
            },
            loc,
        );
        let b = ast.alloc_expr(
            ExprKind::Number {
                value: 2.0,
                is_int: true,
            },
            loc,
        );
        assert_eq!(a, ExprId(0));
        assert_eq!(b, ExprId(1));
        let s = ast.alloc_stmt(StmtKind::End, loc);
        assert_eq!(s, StmtId(0));
        assert_eq!(ast.expr_count(), 2);
        assert_eq!(ast.stmt_count(), 1);
    }

    #[test]
    fn test_node_lookup() {
        let mut ast = Ast::new();
        let loc = SourceLoc::new(3, 7);
        let id = ast.alloc_expr(
            ExprKind::StringLit {
                value: "hi".to_string(),
            },
            loc,
        );
        match &ast.expr(id).kind {
            ExprKind::StringLit { value } => assert_eq!(value, "hi"),
            other => panic!("expected StringLit, got {:?}", other),
        }
        assert_eq!(ast.expr(id).loc.line, 3);
    }
}
