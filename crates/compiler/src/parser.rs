//! Recursive-descent parser for FasterBASIC
//!
//! Hand-tuned for the dialect's ambiguities:
//! - `v$(a TO b)` string slice vs `v$(i)` array/function reference is
//!   decided by scanning ahead for a `TO` keyword at paren depth 1.
//! - `LIST(...)` in expression position is a list literal (`LIST` is a
//!   reserved type keyword).
//! - `IF c THEN <newline>` opens a block; anything else after `THEN`
//!   parses a single inline statement.
//! - `obj.Name(` is a method call, `obj.Name` without `(` member access.
//!
//! Array references parse as `ArrayAccess` only for names the parser has
//! already seen declared with dimensions (DIM/LOCAL/REDIM); all other
//! `name(...)` forms parse as `FunctionCall` and the analyzer settles them.
//!
//! On a syntax error the parser records a diagnostic, skips to the next
//! statement boundary (newline or `:`), and continues.

use crate::ast::{
    Ast, BinOp, CaseArm, CaseLabel, CatchArm, DataValue, DoKind, ExitKind, ExprId, ExprKind,
    FieldDecl, FuncDecl, MatchArm, MethodDef, MethodKind, OptionSetting, Param, ParsedType,
    PrintArgs, PrintItem, PrintSep, Program, StmtId, StmtKind, UnOp, VarDecl,
};
use crate::diagnostics::{DiagCategory, DiagnosticSink, SourceLoc};
use crate::lexer::{Token, TokenKind, tokenize};
use crate::types::BaseType;
use std::collections::HashSet;

/// Keywords that close an `END <kw>` block form.
const END_CLOSERS: &[&str] = &[
    "IF",
    "SELECT",
    "TRY",
    "FUNCTION",
    "SUB",
    "TYPE",
    "CLASS",
    "METHOD",
    "CONSTRUCTOR",
    "DESTRUCTOR",
    "MATCH",
];

type PResult<T> = Result<T, ()>;

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    ast: Ast,
    sink: &'a mut DiagnosticSink,
    /// Uppercased names the parser has seen declared with dimensions
    declared_arrays: HashSet<String>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &str, sink: &'a mut DiagnosticSink) -> Self {
        let (tokens, lex_diags) = tokenize(source);
        for d in lex_diags {
            sink.report(d);
        }
        Parser {
            tokens,
            pos: 0,
            ast: Ast::new(),
            sink,
            declared_arrays: HashSet::new(),
        }
    }

    /// Parse the translation unit. Always returns the arena and program;
    /// the sink decides whether the result is usable.
    pub fn parse(mut self) -> (Ast, Program) {
        let mut program = Program::default();
        loop {
            self.skip_separators();
            if self.at_eof() {
                break;
            }
            match self.parse_statement() {
                Ok(id) => {
                    program.body.push(id);
                    self.expect_statement_boundary(id);
                }
                Err(()) => self.sync(),
            }
            if self.sink.at_cap() {
                break;
            }
        }
        (self.ast, program)
    }

    // ------------------------------------------------------------------
    // Cursor helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_ahead(&self, n: usize) -> &Token {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn loc(&self) -> SourceLoc {
        self.peek().loc
    }

    fn check_kw(&self, kw: &str) -> bool {
        self.peek().is_keyword(kw)
    }

    fn check_op(&self, op: &str) -> bool {
        self.peek().is_op(op)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        let loc = self.loc();
        self.sink.error(DiagCategory::Syntax, loc, message);
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            self.error(format!("expected {}, found '{}'", kw, self.peek().lexeme));
            Err(())
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            self.error(format!("expected '{}', found '{}'", op, self.peek().lexeme));
            Err(())
        }
    }

    fn expect_ident(&mut self) -> PResult<Token> {
        if self.peek().kind == TokenKind::Ident {
            Ok(self.advance())
        } else {
            self.error(format!(
                "expected identifier, found '{}'",
                self.peek().lexeme
            ));
            Err(())
        }
    }

    fn at_boundary(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) || self.check_op(":")
    }

    fn skip_separators(&mut self) {
        while self.peek().kind == TokenKind::Newline || self.check_op(":") {
            self.advance();
        }
    }

    /// Skip to the next statement boundary after an error.
    fn sync(&mut self) {
        while !self.at_boundary() {
            self.advance();
        }
    }

    fn expect_statement_boundary(&mut self, stmt: StmtId) {
        // A label may share its line with the labeled statement
        // (`10 PRINT X` style line numbers).
        if matches!(self.ast.stmt(stmt).kind, StmtKind::Label { .. }) {
            return;
        }
        if !self.at_boundary() {
            self.error(format!(
                "expected end of statement, found '{}'",
                self.peek().lexeme
            ));
            self.sync();
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> PResult<StmtId> {
        let loc = self.loc();
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Keyword => match tok.lexeme.as_str() {
                "PRINT" => self.parse_print(loc, false),
                "CONSOLE" => self.parse_print(loc, true),
                "LET" => {
                    self.advance();
                    let target = self.parse_postfix_expr()?;
                    self.expect_op("=")?;
                    let value = self.parse_expr()?;
                    Ok(self.ast.alloc_stmt(StmtKind::Let { target, value }, loc))
                }
                "DIM" => self.parse_dim(loc, false),
                "LOCAL" => self.parse_dim(loc, true),
                "REDIM" => self.parse_redim(loc),
                "IF" => self.parse_if(loc),
                "FOR" => self.parse_for(loc),
                "WHILE" => self.parse_while(loc),
                "DO" => self.parse_do(loc),
                "REPEAT" => self.parse_repeat(loc),
                "SELECT" => self.parse_select(loc),
                "TRY" => self.parse_try(loc),
                "THROW" => self.parse_throw(loc),
                "FUNCTION" => self.parse_function(loc, false),
                "SUB" => self.parse_function(loc, true),
                "CALL" => self.parse_call(loc),
                "RETURN" => {
                    self.advance();
                    let value = if self.at_boundary() {
                        None
                    } else {
                        Some(self.parse_expr()?)
                    };
                    Ok(self.ast.alloc_stmt(StmtKind::Return { value }, loc))
                }
                "GOTO" => {
                    self.advance();
                    let label = self.parse_label_name()?;
                    Ok(self.ast.alloc_stmt(StmtKind::Goto { label }, loc))
                }
                "GOSUB" => {
                    self.advance();
                    let label = self.parse_label_name()?;
                    Ok(self.ast.alloc_stmt(StmtKind::Gosub { label }, loc))
                }
                "ON" => self.parse_on(loc),
                "EXIT" => self.parse_exit(loc),
                "END" => {
                    // `END <closer>` reaching here means an unmatched block end
                    let next = self.peek_ahead(1).clone();
                    if next.kind == TokenKind::Keyword && END_CLOSERS.contains(&next.lexeme.as_str())
                    {
                        self.error(format!("END {} without matching {}", next.lexeme, next.lexeme));
                        self.advance();
                        self.advance();
                        return Err(());
                    }
                    self.advance();
                    Ok(self.ast.alloc_stmt(StmtKind::End, loc))
                }
                "SHARED" => self.parse_shared(loc),
                "INC" => self.parse_inc_dec(loc, true),
                "DEC" => self.parse_inc_dec(loc, false),
                "SWAP" => {
                    self.advance();
                    let a = self.parse_postfix_expr()?;
                    self.expect_op(",")?;
                    let b = self.parse_postfix_expr()?;
                    Ok(self.ast.alloc_stmt(StmtKind::Swap { a, b }, loc))
                }
                "TYPE" => self.parse_type_decl(loc),
                "CLASS" => self.parse_class(loc),
                "OPTION" => self.parse_option(loc),
                "DATA" => self.parse_data(loc),
                "READ" => {
                    self.advance();
                    let targets = self.parse_lvalue_list()?;
                    Ok(self.ast.alloc_stmt(StmtKind::Read { targets }, loc))
                }
                "RESTORE" => {
                    self.advance();
                    let index = if self.at_boundary() {
                        None
                    } else {
                        Some(self.parse_expr()?)
                    };
                    Ok(self.ast.alloc_stmt(StmtKind::Restore { index }, loc))
                }
                "INPUT" => self.parse_input(loc),
                "MATCH" => self.parse_match_type(loc),
                "DELETE" => {
                    self.advance();
                    let target = self.parse_postfix_expr()?;
                    Ok(self.ast.alloc_stmt(StmtKind::Delete { target }, loc))
                }
                "WORKER" => self.parse_worker(loc),
                "AWAIT" => self.parse_await(loc),
                "ME" => self.parse_assign_or_call(loc),
                other => {
                    self.error(format!("unexpected {} at start of statement", other));
                    Err(())
                }
            },
            TokenKind::Ident => {
                // `Name:` at statement start is a label
                if self.peek_ahead(1).is_op(":") {
                    let name = self.advance().lexeme;
                    return Ok(self.ast.alloc_stmt(StmtKind::Label { name }, loc));
                }
                self.parse_assign_or_call(loc)
            }
            TokenKind::Int => {
                // Classic numeric line label: `10 PRINT X`
                let name = self.advance().lexeme;
                Ok(self.ast.alloc_stmt(StmtKind::Label { name }, loc))
            }
            _ => {
                self.error(format!(
                    "unexpected '{}' at start of statement",
                    tok.lexeme
                ));
                Err(())
            }
        }
    }

    /// Assignment, sub call, or method call starting from an lvalue chain.
    fn parse_assign_or_call(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        let expr = self.parse_postfix_expr()?;
        if self.eat_op("=") {
            let value = self.parse_expr()?;
            return Ok(self
                .ast
                .alloc_stmt(StmtKind::Let { target: expr, value }, loc));
        }
        match &self.ast.expr(expr).kind {
            ExprKind::MethodCall { .. } => {
                Ok(self.ast.alloc_stmt(StmtKind::CallMethod { call: expr }, loc))
            }
            ExprKind::FunctionCall { name, args } => {
                let name = name.clone();
                let args = args.clone();
                Ok(self.ast.alloc_stmt(StmtKind::Call { name, args }, loc))
            }
            _ => {
                self.error("expected assignment or call");
                Err(())
            }
        }
    }

    fn parse_label_name(&mut self) -> PResult<String> {
        match self.peek().kind {
            TokenKind::Ident | TokenKind::Int => Ok(self.advance().lexeme),
            _ => {
                self.error("expected label name");
                Err(())
            }
        }
    }

    fn parse_print(&mut self, loc: SourceLoc, console: bool) -> PResult<StmtId> {
        self.advance();
        let mut args = PrintArgs::default();
        while !self.at_boundary() {
            let expr = self.parse_expr()?;
            let sep = if self.eat_op(";") {
                Some(PrintSep::Semi)
            } else if self.eat_op(",") {
                Some(PrintSep::Comma)
            } else {
                None
            };
            args.items.push(PrintItem { expr, sep });
            if sep.is_none() {
                break;
            }
            // A trailing separator suppresses the newline
            if self.at_boundary() {
                args.trailing_sep = true;
                break;
            }
        }
        let kind = if console {
            StmtKind::Console(args)
        } else {
            StmtKind::Print(args)
        };
        Ok(self.ast.alloc_stmt(kind, loc))
    }

    fn parse_dim(&mut self, loc: SourceLoc, local: bool) -> PResult<StmtId> {
        self.advance();
        let mut decls = Vec::new();
        loop {
            decls.push(self.parse_var_decl()?);
            if !self.eat_op(",") {
                break;
            }
        }
        let kind = if local {
            StmtKind::Local { decls }
        } else {
            StmtKind::Dim { decls }
        };
        Ok(self.ast.alloc_stmt(kind, loc))
    }

    fn parse_var_decl(&mut self) -> PResult<VarDecl> {
        let name_tok = self.expect_ident()?;
        let name = name_tok.lexeme;
        let mut dims = Vec::new();
        if self.eat_op("(") {
            loop {
                dims.push(self.parse_expr()?);
                if !self.eat_op(",") {
                    break;
                }
            }
            self.expect_op(")")?;
            self.declared_arrays.insert(name.to_ascii_uppercase());
        }
        let ty = if self.eat_kw("AS") {
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.eat_op("=") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(VarDecl {
            name,
            ty,
            dims,
            init,
        })
    }

    fn parse_redim(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let name = self.expect_ident()?.lexeme;
        self.expect_op("(")?;
        let mut dims = Vec::new();
        loop {
            dims.push(self.parse_expr()?);
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        self.declared_arrays.insert(name.to_ascii_uppercase());
        Ok(self.ast.alloc_stmt(StmtKind::Redim { name, dims }, loc))
    }

    fn parse_type(&mut self) -> PResult<ParsedType> {
        let tok = self.peek().clone();
        if tok.kind == TokenKind::Keyword {
            let base = match tok.lexeme.as_str() {
                "BYTE" => Some(BaseType::Byte),
                "UBYTE" => Some(BaseType::UByte),
                "SHORT" => Some(BaseType::Short),
                "USHORT" => Some(BaseType::UShort),
                "INTEGER" => Some(BaseType::Integer),
                "UINTEGER" => Some(BaseType::UInteger),
                "LONG" => Some(BaseType::Long),
                "ULONG" => Some(BaseType::ULong),
                "SINGLE" => Some(BaseType::Single),
                "DOUBLE" => Some(BaseType::Double),
                "STRING" => Some(BaseType::Str),
                _ => None,
            };
            if let Some(base) = base {
                self.advance();
                return Ok(ParsedType::Base(base));
            }
            match tok.lexeme.as_str() {
                "LIST" => {
                    self.advance();
                    self.expect_kw("OF")?;
                    let elem = self.parse_type()?;
                    return Ok(ParsedType::ListOf(Box::new(elem)));
                }
                "ARRAY" => {
                    self.advance();
                    self.expect_kw("OF")?;
                    let elem = self.parse_type()?;
                    return Ok(ParsedType::ArrayOf(Box::new(elem)));
                }
                "HASHMAP" => {
                    self.advance();
                    return Ok(ParsedType::Hashmap);
                }
                "ANY" => {
                    self.advance();
                    return Ok(ParsedType::Any);
                }
                _ => {}
            }
        }
        if tok.kind == TokenKind::Ident {
            self.advance();
            return Ok(ParsedType::Named(tok.lexeme));
        }
        self.error(format!("expected type name, found '{}'", tok.lexeme));
        Err(())
    }

    fn parse_if(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let cond = self.parse_expr()?;
        self.expect_kw("THEN")?;

        if self.peek().kind != TokenKind::Newline {
            // Single-line IF: one inline statement, optional inline ELSE
            let then_stmt = self.parse_statement()?;
            let else_body = if self.eat_kw("ELSE") {
                Some(vec![self.parse_statement()?])
            } else {
                None
            };
            return Ok(self.ast.alloc_stmt(
                StmtKind::If {
                    cond,
                    then_body: vec![then_stmt],
                    elifs: Vec::new(),
                    else_body,
                },
                loc,
            ));
        }

        let then_body = self.parse_stmt_list(&["ELSEIF", "ELSE"]);
        let mut elifs = Vec::new();
        while self.check_kw("ELSEIF") {
            self.advance();
            let c = self.parse_expr()?;
            self.expect_kw("THEN")?;
            let body = self.parse_stmt_list(&["ELSEIF", "ELSE"]);
            elifs.push((c, body));
        }
        let else_body = if self.eat_kw("ELSE") {
            Some(self.parse_stmt_list(&[]))
        } else {
            None
        };
        self.expect_kw("END")?;
        self.expect_kw("IF")?;
        Ok(self.ast.alloc_stmt(
            StmtKind::If {
                cond,
                then_body,
                elifs,
                else_body,
            },
            loc,
        ))
    }

    fn parse_for(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        if self.eat_kw("EACH") {
            let first = self.expect_ident()?.lexeme;
            let (tag_var, var) = if self.eat_op(",") {
                let second = self.expect_ident()?.lexeme;
                (Some(first), second)
            } else {
                (None, first)
            };
            self.expect_kw("IN")?;
            let list = self.parse_expr()?;
            let body = self.parse_stmt_list(&["NEXT"]);
            self.expect_kw("NEXT")?;
            if self.peek().kind == TokenKind::Ident {
                self.advance();
            }
            return Ok(self.ast.alloc_stmt(
                StmtKind::ForEach {
                    tag_var,
                    var,
                    list,
                    body,
                },
                loc,
            ));
        }

        let var = self.expect_ident()?.lexeme;
        self.expect_op("=")?;
        let start = self.parse_expr()?;
        self.expect_kw("TO")?;
        let end = self.parse_expr()?;
        let step = if self.eat_kw("STEP") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let body = self.parse_stmt_list(&["NEXT"]);
        self.expect_kw("NEXT")?;
        if self.peek().kind == TokenKind::Ident {
            self.advance();
        }
        Ok(self.ast.alloc_stmt(
            StmtKind::For {
                var,
                start,
                end,
                step,
                body,
            },
            loc,
        ))
    }

    fn parse_while(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let cond = self.parse_expr()?;
        let body = self.parse_stmt_list(&["WEND"]);
        self.expect_kw("WEND")?;
        Ok(self.ast.alloc_stmt(StmtKind::While { cond, body }, loc))
    }

    fn parse_do(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let pre = if self.eat_kw("WHILE") {
            Some((true, self.parse_expr()?))
        } else if self.eat_kw("UNTIL") {
            Some((false, self.parse_expr()?))
        } else {
            None
        };
        let body = self.parse_stmt_list(&["LOOP"]);
        self.expect_kw("LOOP")?;
        let post = if self.eat_kw("WHILE") {
            Some((true, self.parse_expr()?))
        } else if self.eat_kw("UNTIL") {
            Some((false, self.parse_expr()?))
        } else {
            None
        };

        let (kind, cond) = match (pre, post) {
            (Some(_), Some(_)) => {
                self.error("DO loop cannot have both a pre- and post-condition");
                return Err(());
            }
            (Some((true, c)), None) => (DoKind::PreWhile, c),
            (Some((false, c)), None) => (DoKind::PreUntil, c),
            (None, Some((true, c))) => (DoKind::PostWhile, c),
            (None, Some((false, c))) => (DoKind::PostUntil, c),
            (None, None) => {
                // Unconditional DO/LOOP runs forever (until EXIT DO)
                let one = self.ast.alloc_expr(
                    ExprKind::Number {
                        value: 1.0,
                        is_int: true,
                    },
                    loc,
                );
                (DoKind::PreWhile, one)
            }
        };
        Ok(self
            .ast
            .alloc_stmt(StmtKind::DoLoop { kind, cond, body }, loc))
    }

    fn parse_repeat(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let body = self.parse_stmt_list(&["UNTIL"]);
        self.expect_kw("UNTIL")?;
        let cond = self.parse_expr()?;
        Ok(self.ast.alloc_stmt(StmtKind::Repeat { body, cond }, loc))
    }

    fn parse_select(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        self.expect_kw("CASE")?;
        let selector = self.parse_expr()?;
        let mut arms = Vec::new();
        let mut else_body = None;
        loop {
            self.skip_separators();
            if self.check_kw("END") {
                break;
            }
            if !self.eat_kw("CASE") {
                self.error("expected CASE or END SELECT");
                return Err(());
            }
            if self.eat_kw("ELSE") {
                else_body = Some(self.parse_stmt_list(&["CASE"]));
                continue;
            }
            let mut labels = Vec::new();
            loop {
                labels.push(self.parse_case_label()?);
                if !self.eat_op(",") {
                    break;
                }
            }
            let body = self.parse_stmt_list(&["CASE"]);
            arms.push(CaseArm { labels, body });
        }
        self.expect_kw("END")?;
        self.expect_kw("SELECT")?;
        Ok(self.ast.alloc_stmt(
            StmtKind::SelectCase {
                selector,
                arms,
                else_body,
            },
            loc,
        ))
    }

    fn parse_case_label(&mut self) -> PResult<CaseLabel> {
        if self.eat_kw("IS") {
            let op = if self.eat_op("<") {
                BinOp::Lt
            } else if self.eat_op("<=") {
                BinOp::Le
            } else if self.eat_op(">") {
                BinOp::Gt
            } else if self.eat_op(">=") {
                BinOp::Ge
            } else if self.eat_op("=") {
                BinOp::Eq
            } else if self.eat_op("<>") {
                BinOp::Ne
            } else {
                self.error("expected comparison operator after IS");
                return Err(());
            };
            let rhs = self.parse_expr()?;
            return Ok(CaseLabel::Rel(op, rhs));
        }
        let lo = self.parse_expr()?;
        if self.eat_kw("TO") {
            let hi = self.parse_expr()?;
            Ok(CaseLabel::Range(lo, hi))
        } else {
            Ok(CaseLabel::Expr(lo))
        }
    }

    fn parse_try(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let body = self.parse_stmt_list(&["CATCH", "FINALLY"]);
        let mut catches = Vec::new();
        while self.check_kw("CATCH") {
            self.advance();
            let code = if self.at_boundary() {
                None
            } else {
                Some(self.parse_expr()?)
            };
            let arm_body = self.parse_stmt_list(&["CATCH", "FINALLY"]);
            catches.push(CatchArm {
                code,
                body: arm_body,
            });
        }
        let finally = if self.eat_kw("FINALLY") {
            Some(self.parse_stmt_list(&[]))
        } else {
            None
        };
        self.expect_kw("END")?;
        self.expect_kw("TRY")?;
        Ok(self.ast.alloc_stmt(
            StmtKind::TryCatch {
                body,
                catches,
                finally,
            },
            loc,
        ))
    }

    fn parse_throw(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let code = self.parse_expr()?;
        let line = if self.eat_op(",") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(self.ast.alloc_stmt(StmtKind::Throw { code, line }, loc))
    }

    fn parse_function(&mut self, loc: SourceLoc, is_sub: bool) -> PResult<StmtId> {
        self.advance();
        let decl = self.parse_func_decl(if is_sub { "SUB" } else { "FUNCTION" })?;
        let kind = if is_sub {
            StmtKind::SubDef(decl)
        } else {
            StmtKind::FunctionDef(decl)
        };
        Ok(self.ast.alloc_stmt(kind, loc))
    }

    fn parse_func_decl(&mut self, closer: &str) -> PResult<FuncDecl> {
        let name = self.expect_ident()?.lexeme;
        let params = self.parse_params()?;
        let ret = if self.eat_kw("AS") {
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = self.parse_stmt_list(&[]);
        self.expect_kw("END")?;
        self.expect_kw(closer)?;
        Ok(FuncDecl {
            name,
            params,
            ret,
            body,
        })
    }

    fn parse_params(&mut self) -> PResult<Vec<Param>> {
        let mut params = Vec::new();
        self.expect_op("(")?;
        if self.eat_op(")") {
            return Ok(params);
        }
        loop {
            let name = self.expect_ident()?.lexeme;
            let ty = if self.eat_kw("AS") {
                Some(self.parse_type()?)
            } else {
                None
            };
            params.push(Param { name, ty });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(params)
    }

    fn parse_call(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let name = self.expect_ident()?.lexeme;
        let mut args = Vec::new();
        if self.eat_op("(") {
            if !self.eat_op(")") {
                loop {
                    args.push(self.parse_expr()?);
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op(")")?;
            }
        }
        Ok(self.ast.alloc_stmt(StmtKind::Call { name, args }, loc))
    }

    fn parse_on(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let selector = self.parse_expr()?;
        let gosub = if self.eat_kw("GOTO") {
            false
        } else if self.eat_kw("GOSUB") {
            true
        } else {
            self.error("expected GOTO or GOSUB after ON <expr>");
            return Err(());
        };
        let mut targets = Vec::new();
        loop {
            targets.push(self.parse_label_name()?);
            if !self.eat_op(",") {
                break;
            }
        }
        let kind = if gosub {
            StmtKind::OnGosub { selector, targets }
        } else {
            StmtKind::OnGoto { selector, targets }
        };
        Ok(self.ast.alloc_stmt(kind, loc))
    }

    fn parse_exit(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let kind = if self.eat_kw("FOR") {
            ExitKind::For
        } else if self.eat_kw("WHILE") {
            ExitKind::While
        } else if self.eat_kw("DO") {
            ExitKind::Do
        } else if self.eat_kw("FUNCTION") {
            ExitKind::Function
        } else if self.eat_kw("SUB") {
            ExitKind::Sub
        } else {
            self.error("expected FOR, WHILE, DO, FUNCTION, or SUB after EXIT");
            return Err(());
        };
        Ok(self.ast.alloc_stmt(StmtKind::Exit { kind }, loc))
    }

    fn parse_shared(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let mut names = Vec::new();
        loop {
            names.push(self.expect_ident()?.lexeme);
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(self.ast.alloc_stmt(StmtKind::Shared { names }, loc))
    }

    fn parse_inc_dec(&mut self, loc: SourceLoc, inc: bool) -> PResult<StmtId> {
        self.advance();
        let target = self.parse_postfix_expr()?;
        let amount = if self.eat_op(",") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let kind = if inc {
            StmtKind::Inc { target, amount }
        } else {
            StmtKind::Dec { target, amount }
        };
        Ok(self.ast.alloc_stmt(kind, loc))
    }

    fn parse_type_decl(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let name = self.expect_ident()?.lexeme;
        let mut fields = Vec::new();
        loop {
            self.skip_separators();
            if self.check_kw("END") {
                break;
            }
            if self.at_eof() {
                self.error("unterminated TYPE block");
                return Err(());
            }
            let fname = self.expect_ident()?.lexeme;
            self.expect_kw("AS")?;
            let fty = self.parse_type()?;
            fields.push(FieldDecl {
                name: fname,
                ty: fty,
            });
        }
        self.expect_kw("END")?;
        self.expect_kw("TYPE")?;
        Ok(self.ast.alloc_stmt(StmtKind::TypeDecl { name, fields }, loc))
    }

    fn parse_class(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let name = self.expect_ident()?.lexeme;
        let parent = if self.eat_kw("EXTENDS") {
            Some(self.expect_ident()?.lexeme)
        } else {
            None
        };
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        loop {
            self.skip_separators();
            if self.check_kw("END") && self.peek_ahead(1).is_keyword("CLASS") {
                break;
            }
            if self.at_eof() {
                self.error("unterminated CLASS block");
                return Err(());
            }
            if self.eat_kw("DIM") {
                let fname = self.expect_ident()?.lexeme;
                self.expect_kw("AS")?;
                let fty = self.parse_type()?;
                fields.push(FieldDecl {
                    name: fname,
                    ty: fty,
                });
            } else if self.eat_kw("METHOD") {
                let decl = self.parse_func_decl("METHOD")?;
                methods.push(MethodDef {
                    decl,
                    kind: MethodKind::Normal,
                });
            } else if self.check_kw("CONSTRUCTOR") {
                self.advance();
                let params = self.parse_params()?;
                let body = self.parse_stmt_list(&[]);
                self.expect_kw("END")?;
                self.expect_kw("CONSTRUCTOR")?;
                methods.push(MethodDef {
                    decl: FuncDecl {
                        name: "CONSTRUCTOR".to_string(),
                        params,
                        ret: None,
                        body,
                    },
                    kind: MethodKind::Constructor,
                });
            } else if self.check_kw("DESTRUCTOR") {
                self.advance();
                let params = self.parse_params()?;
                if !params.is_empty() {
                    self.error("DESTRUCTOR takes no parameters");
                }
                let body = self.parse_stmt_list(&[]);
                self.expect_kw("END")?;
                self.expect_kw("DESTRUCTOR")?;
                methods.push(MethodDef {
                    decl: FuncDecl {
                        name: "DESTRUCTOR".to_string(),
                        params: Vec::new(),
                        ret: None,
                        body,
                    },
                    kind: MethodKind::Destructor,
                });
            } else {
                self.error(format!(
                    "expected DIM, METHOD, CONSTRUCTOR, or DESTRUCTOR in CLASS body, found '{}'",
                    self.peek().lexeme
                ));
                return Err(());
            }
        }
        self.expect_kw("END")?;
        self.expect_kw("CLASS")?;
        Ok(self.ast.alloc_stmt(
            StmtKind::ClassDecl {
                name,
                parent,
                fields,
                methods,
            },
            loc,
        ))
    }

    fn parse_option(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        if self.eat_kw("EXPLICIT") {
            return Ok(self
                .ast
                .alloc_stmt(StmtKind::Option(OptionSetting::Explicit), loc));
        }
        if self.eat_kw("BASE") {
            let tok = self.advance();
            let base = match tok.lexeme.parse::<u32>() {
                Ok(b @ (0 | 1)) => b,
                _ => {
                    self.error("OPTION BASE must be 0 or 1");
                    return Err(());
                }
            };
            return Ok(self
                .ast
                .alloc_stmt(StmtKind::Option(OptionSetting::Base(base)), loc));
        }
        self.error("expected EXPLICIT or BASE after OPTION");
        Err(())
    }

    fn parse_data(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let mut values = Vec::new();
        loop {
            let neg = self.eat_op("-");
            let tok = self.advance();
            let value = match tok.kind {
                TokenKind::Int | TokenKind::Float => {
                    let n: f64 = tok.lexeme.parse().unwrap_or(0.0);
                    DataValue::Number(if neg { -n } else { n })
                }
                TokenKind::Str if !neg => DataValue::Str(tok.lexeme),
                _ => {
                    self.error("expected number or string in DATA");
                    return Err(());
                }
            };
            values.push(value);
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(self.ast.alloc_stmt(StmtKind::Data { values }, loc))
    }

    fn parse_input(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let prompt = if self.peek().kind == TokenKind::Str {
            let p = self.advance().lexeme;
            if !self.eat_op(",") && !self.eat_op(";") {
                self.error("expected ',' or ';' after INPUT prompt");
                return Err(());
            }
            Some(p)
        } else {
            None
        };
        let targets = self.parse_lvalue_list()?;
        Ok(self
            .ast
            .alloc_stmt(StmtKind::Input { prompt, targets }, loc))
    }

    fn parse_lvalue_list(&mut self) -> PResult<Vec<ExprId>> {
        let mut targets = Vec::new();
        loop {
            targets.push(self.parse_postfix_expr()?);
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(targets)
    }

    fn parse_match_type(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        self.expect_kw("TYPE")?;
        let subject = self.parse_expr()?;
        let mut arms = Vec::new();
        let mut else_body = None;
        loop {
            self.skip_separators();
            if self.check_kw("END") {
                break;
            }
            let arm_loc = self.loc();
            if !self.eat_kw("CASE") {
                self.error("expected CASE or END MATCH");
                return Err(());
            }
            if self.eat_kw("ELSE") {
                else_body = Some(self.parse_stmt_list(&["CASE"]));
                continue;
            }
            let ty = self.parse_type()?;
            let binding = self.expect_ident()?.lexeme;
            let body = self.parse_stmt_list(&["CASE"]);
            arms.push(MatchArm {
                ty,
                binding,
                body,
                loc: arm_loc,
            });
        }
        self.expect_kw("END")?;
        self.expect_kw("MATCH")?;
        Ok(self.ast.alloc_stmt(
            StmtKind::MatchType {
                subject,
                arms,
                else_body,
            },
            loc,
        ))
    }

    fn parse_worker(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let name = self.expect_ident()?.lexeme;
        self.expect_op("=")?;
        let func = self.expect_ident()?.lexeme;
        let mut args = Vec::new();
        self.expect_op("(")?;
        if !self.eat_op(")") {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat_op(",") {
                    break;
                }
            }
            self.expect_op(")")?;
        }
        Ok(self
            .ast
            .alloc_stmt(StmtKind::Worker { name, func, args }, loc))
    }

    fn parse_await(&mut self, loc: SourceLoc) -> PResult<StmtId> {
        self.advance();
        let worker = self.expect_ident()?.lexeme;
        let target = if self.eat_op(",") {
            Some(self.parse_postfix_expr()?)
        } else {
            None
        };
        Ok(self
            .ast
            .alloc_stmt(StmtKind::Await { worker, target }, loc))
    }

    /// Parse statements until a stop keyword, an `END <closer>`, or EOF.
    /// Stop tokens are left unconsumed for the caller.
    fn parse_stmt_list(&mut self, stops: &[&str]) -> Vec<StmtId> {
        let mut out = Vec::new();
        loop {
            self.skip_separators();
            if self.at_eof() || self.at_block_end(stops) || self.sink.at_cap() {
                break;
            }
            match self.parse_statement() {
                Ok(id) => {
                    out.push(id);
                    if !matches!(self.ast.stmt(id).kind, StmtKind::Label { .. })
                        && !self.at_boundary()
                        && !self.at_block_end(stops)
                    {
                        self.error(format!(
                            "expected end of statement, found '{}'",
                            self.peek().lexeme
                        ));
                        self.sync();
                    }
                }
                Err(()) => self.sync(),
            }
        }
        out
    }

    fn at_block_end(&self, stops: &[&str]) -> bool {
        let tok = self.peek();
        if tok.kind != TokenKind::Keyword {
            return false;
        }
        if tok.lexeme != "END" && stops.contains(&tok.lexeme.as_str()) {
            return true;
        }
        if tok.lexeme == "END" {
            let next = self.peek_ahead(1);
            return next.kind == TokenKind::Keyword
                && END_CLOSERS.contains(&next.lexeme.as_str());
        }
        false
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> PResult<ExprId> {
        self.parse_logical_or()
    }

    fn parse_logical_or(&mut self) -> PResult<ExprId> {
        let mut lhs = self.parse_logical_and()?;
        loop {
            let loc = self.loc();
            let op = if self.eat_kw("OR") {
                BinOp::Or
            } else if self.eat_kw("XOR") {
                BinOp::Xor
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_logical_and()?;
            lhs = self.ast.alloc_expr(ExprKind::Binary { op, lhs, rhs }, loc);
        }
    }

    fn parse_logical_and(&mut self) -> PResult<ExprId> {
        let mut lhs = self.parse_not()?;
        while self.check_kw("AND") {
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_not()?;
            lhs = self.ast.alloc_expr(
                ExprKind::Binary {
                    op: BinOp::And,
                    lhs,
                    rhs,
                },
                loc,
            );
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> PResult<ExprId> {
        if self.check_kw("NOT") {
            let loc = self.loc();
            self.advance();
            let operand = self.parse_not()?;
            return Ok(self.ast.alloc_expr(
                ExprKind::Unary {
                    op: UnOp::Not,
                    operand,
                },
                loc,
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> PResult<ExprId> {
        let lhs = self.parse_concat()?;
        let loc = self.loc();
        if self.check_kw("IS") {
            self.advance();
            let ty = self.parse_type()?;
            return Ok(self
                .ast
                .alloc_expr(ExprKind::IsType { value: lhs, ty }, loc));
        }
        let op = if self.eat_op("=") {
            BinOp::Eq
        } else if self.eat_op("<>") {
            BinOp::Ne
        } else if self.eat_op("<=") {
            BinOp::Le
        } else if self.eat_op(">=") {
            BinOp::Ge
        } else if self.eat_op("<") {
            BinOp::Lt
        } else if self.eat_op(">") {
            BinOp::Gt
        } else {
            return Ok(lhs);
        };
        let rhs = self.parse_concat()?;
        Ok(self.ast.alloc_expr(ExprKind::Binary { op, lhs, rhs }, loc))
    }

    fn parse_concat(&mut self) -> PResult<ExprId> {
        let mut lhs = self.parse_additive()?;
        while self.check_op("&") {
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = self.ast.alloc_expr(
                ExprKind::Binary {
                    op: BinOp::Concat,
                    lhs,
                    rhs,
                },
                loc,
            );
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<ExprId> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let loc = self.loc();
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_multiplicative()?;
            lhs = self.ast.alloc_expr(ExprKind::Binary { op, lhs, rhs }, loc);
        }
    }

    fn parse_multiplicative(&mut self) -> PResult<ExprId> {
        let mut lhs = self.parse_unary()?;
        loop {
            let loc = self.loc();
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("\\") {
                BinOp::IntDiv
            } else if self.eat_kw("MOD") {
                BinOp::Mod
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary()?;
            lhs = self.ast.alloc_expr(ExprKind::Binary { op, lhs, rhs }, loc);
        }
    }

    fn parse_unary(&mut self) -> PResult<ExprId> {
        if self.check_op("-") {
            let loc = self.loc();
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(self.ast.alloc_expr(
                ExprKind::Unary {
                    op: UnOp::Neg,
                    operand,
                },
                loc,
            ));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> PResult<ExprId> {
        let lhs = self.parse_postfix_expr()?;
        if self.check_op("^") {
            let loc = self.loc();
            self.advance();
            // Right-associative; `-` binds looser on the right
            let rhs = self.parse_unary()?;
            return Ok(self.ast.alloc_expr(
                ExprKind::Binary {
                    op: BinOp::Pow,
                    lhs,
                    rhs,
                },
                loc,
            ));
        }
        Ok(lhs)
    }

    /// Primary expression plus member/method chain.
    fn parse_postfix_expr(&mut self) -> PResult<ExprId> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check_op(".") {
                let loc = self.loc();
                self.advance();
                let name = self.expect_ident()?.lexeme;
                if self.eat_op("(") {
                    let mut args = Vec::new();
                    if !self.eat_op(")") {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat_op(",") {
                                break;
                            }
                        }
                        self.expect_op(")")?;
                    }
                    expr = self.ast.alloc_expr(
                        ExprKind::MethodCall {
                            object: expr,
                            method: name,
                            args,
                        },
                        loc,
                    );
                } else {
                    expr = self.ast.alloc_expr(
                        ExprKind::MemberAccess {
                            object: expr,
                            field: name,
                        },
                        loc,
                    );
                }
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> PResult<ExprId> {
        let loc = self.loc();
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Int => {
                self.advance();
                let value: f64 = tok.lexeme.parse().map_err(|_| {
                    self.error(format!("invalid integer literal '{}'", tok.lexeme));
                })?;
                Ok(self
                    .ast
                    .alloc_expr(ExprKind::Number { value, is_int: true }, loc))
            }
            TokenKind::Float => {
                self.advance();
                let value: f64 = tok.lexeme.parse().map_err(|_| {
                    self.error(format!("invalid numeric literal '{}'", tok.lexeme));
                })?;
                Ok(self.ast.alloc_expr(
                    ExprKind::Number {
                        value,
                        is_int: false,
                    },
                    loc,
                ))
            }
            TokenKind::Str => {
                self.advance();
                Ok(self
                    .ast
                    .alloc_expr(ExprKind::StringLit { value: tok.lexeme }, loc))
            }
            TokenKind::Ident => {
                self.advance();
                if self.check_op("(") {
                    return self.parse_name_with_parens(tok.lexeme, loc);
                }
                Ok(self
                    .ast
                    .alloc_expr(ExprKind::Variable { name: tok.lexeme }, loc))
            }
            TokenKind::Op if tok.lexeme == "(" => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            TokenKind::Keyword => match tok.lexeme.as_str() {
                "IIF" => {
                    self.advance();
                    self.expect_op("(")?;
                    let cond = self.parse_expr()?;
                    self.expect_op(",")?;
                    let then_val = self.parse_expr()?;
                    self.expect_op(",")?;
                    let else_val = self.parse_expr()?;
                    self.expect_op(")")?;
                    Ok(self.ast.alloc_expr(
                        ExprKind::Iif {
                            cond,
                            then_val,
                            else_val,
                        },
                        loc,
                    ))
                }
                "NEW" | "CREATE" => {
                    self.advance();
                    let class = self.expect_ident()?.lexeme;
                    let mut args = Vec::new();
                    if self.eat_op("(") {
                        if !self.eat_op(")") {
                            loop {
                                args.push(self.parse_expr()?);
                                if !self.eat_op(",") {
                                    break;
                                }
                            }
                            self.expect_op(")")?;
                        }
                    }
                    Ok(self.ast.alloc_expr(ExprKind::New { class, args }, loc))
                }
                "ME" => {
                    self.advance();
                    Ok(self.ast.alloc_expr(ExprKind::Me, loc))
                }
                "NOTHING" => {
                    self.advance();
                    Ok(self.ast.alloc_expr(ExprKind::Nothing, loc))
                }
                "SUPER" => {
                    self.advance();
                    self.expect_op(".")?;
                    let method = self.expect_ident()?.lexeme;
                    let mut args = Vec::new();
                    self.expect_op("(")?;
                    if !self.eat_op(")") {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat_op(",") {
                                break;
                            }
                        }
                        self.expect_op(")")?;
                    }
                    Ok(self
                        .ast
                        .alloc_expr(ExprKind::SuperCall { method, args }, loc))
                }
                "LIST" => {
                    self.advance();
                    self.expect_op("(")?;
                    let mut elems = Vec::new();
                    if !self.eat_op(")") {
                        loop {
                            elems.push(self.parse_expr()?);
                            if !self.eat_op(",") {
                                break;
                            }
                        }
                        self.expect_op(")")?;
                    }
                    Ok(self.ast.alloc_expr(ExprKind::ListLit { elems }, loc))
                }
                "READY" => {
                    self.advance();
                    self.expect_op("(")?;
                    let worker = self.expect_ident()?.lexeme;
                    self.expect_op(")")?;
                    Ok(self.ast.alloc_expr(ExprKind::Ready { worker }, loc))
                }
                other => {
                    self.error(format!("unexpected {} in expression", other));
                    Err(())
                }
            },
            _ => {
                self.error(format!("unexpected '{}' in expression", tok.lexeme));
                Err(())
            }
        }
    }

    /// `name(` already seen: string slice, array access, or call.
    ///
    /// Slice detection scans ahead for a `TO` keyword at paren depth 1
    /// before committing to argument parsing.
    fn parse_name_with_parens(&mut self, name: String, loc: SourceLoc) -> PResult<ExprId> {
        if self.paren_group_has_to() {
            self.expect_op("(")?;
            let start = self.parse_expr()?;
            self.expect_kw("TO")?;
            let end = self.parse_expr()?;
            self.expect_op(")")?;
            let base = self.ast.alloc_expr(ExprKind::Variable { name }, loc);
            return Ok(self
                .ast
                .alloc_expr(ExprKind::StringSlice { base, start, end }, loc));
        }

        self.expect_op("(")?;
        let mut args = Vec::new();
        if !self.eat_op(")") {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat_op(",") {
                    break;
                }
            }
            self.expect_op(")")?;
        }
        let upper = name.to_ascii_uppercase();
        if self.declared_arrays.contains(&upper) {
            Ok(self
                .ast
                .alloc_expr(ExprKind::ArrayAccess { name, indices: args }, loc))
        } else if let Some(registry) = upper.strip_prefix("REGISTRY_") {
            let name = registry.to_string();
            Ok(self
                .ast
                .alloc_expr(ExprKind::RegistryCall { name, args }, loc))
        } else {
            Ok(self
                .ast
                .alloc_expr(ExprKind::FunctionCall { name, args }, loc))
        }
    }

    /// Look ahead from a `(` for a `TO` keyword that is not nested inside
    /// a deeper paren group.
    fn paren_group_has_to(&self) -> bool {
        debug_assert!(self.check_op("("));
        let mut depth = 0usize;
        let mut i = self.pos;
        while i < self.tokens.len() {
            let t = &self.tokens[i];
            match t.kind {
                TokenKind::Op if t.lexeme == "(" => depth += 1,
                TokenKind::Op if t.lexeme == ")" => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return false;
                    }
                }
                TokenKind::Keyword if t.lexeme == "TO" && depth == 1 => return true,
                TokenKind::Newline | TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticSink;

    fn parse_ok(source: &str) -> (Ast, Program) {
        let mut sink = DiagnosticSink::default();
        let parser = Parser::new(source, &mut sink);
        let result = parser.parse();
        assert!(
            !sink.has_errors(),
            "unexpected parse errors: {:?}",
            sink.diagnostics()
        );
        result
    }

    fn parse_err(source: &str) -> Vec<String> {
        let mut sink = DiagnosticSink::default();
        let parser = Parser::new(source, &mut sink);
        let _ = parser.parse();
        sink.diagnostics()
            .iter()
            .map(|d| d.message.clone())
            .collect()
    }

    #[test]
    fn test_parse_print_with_separators() {
        let (ast, program) = parse_ok("PRINT \"Caught: \"; 42; \" at \"\n");
        assert_eq!(program.body.len(), 1);
        match &ast.stmt(program.body[0]).kind {
            StmtKind::Print(args) => {
                assert_eq!(args.items.len(), 3);
                assert_eq!(args.items[0].sep, Some(PrintSep::Semi));
            }
            other => panic!("expected Print, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_single_line_if_else() {
        let (ast, program) =
            parse_ok("IF N <= 1 THEN Fact = 1 ELSE Fact = N * Fact(N-1)\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::If {
                then_body,
                else_body,
                elifs,
                ..
            } => {
                assert_eq!(then_body.len(), 1);
                assert_eq!(elifs.len(), 0);
                assert_eq!(else_body.as_ref().unwrap().len(), 1);
            }
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_block_if_with_elseif() {
        let src = "IF a THEN\nPRINT 1\nELSEIF b THEN\nPRINT 2\nELSE\nPRINT 3\nEND IF\n";
        let (ast, program) = parse_ok(src);
        match &ast.stmt(program.body[0]).kind {
            StmtKind::If { elifs, else_body, .. } => {
                assert_eq!(elifs.len(), 1);
                assert!(else_body.is_some());
            }
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_for_with_step() {
        let (ast, program) = parse_ok("FOR i = 10 TO 2 STEP -2\nPRINT i\nNEXT i\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::For { var, step, body, .. } => {
                assert_eq!(var, "i");
                assert!(step.is_some());
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected For, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_for_each() {
        let (ast, program) = parse_ok("FOR EACH e IN items\nPRINT e\nNEXT\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::ForEach { var, tag_var, .. } => {
                assert_eq!(var, "e");
                assert!(tag_var.is_none());
            }
            other => panic!("expected ForEach, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_do_loop_variants() {
        let srcs = [
            ("DO WHILE x < 3\nPRINT x\nLOOP\n", DoKind::PreWhile),
            ("DO UNTIL x = 3\nPRINT x\nLOOP\n", DoKind::PreUntil),
            ("DO\nPRINT x\nLOOP WHILE x < 3\n", DoKind::PostWhile),
            ("DO\nPRINT x\nLOOP UNTIL x = 3\n", DoKind::PostUntil),
        ];
        for (src, expected) in srcs {
            let (ast, program) = parse_ok(src);
            match &ast.stmt(program.body[0]).kind {
                StmtKind::DoLoop { kind, .. } => assert_eq!(*kind, expected, "{}", src),
                other => panic!("expected DoLoop, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_do_with_both_conditions_rejected() {
        let errs = parse_err("DO WHILE a\nPRINT 1\nLOOP UNTIL b\n");
        assert!(errs.iter().any(|m| m.contains("both")));
    }

    #[test]
    fn test_parse_select_case() {
        let src = "SELECT CASE n\nCASE 1\nPRINT 1\nCASE 2 TO 5\nPRINT 2\nCASE IS > 10\nPRINT 3\nCASE ELSE\nPRINT 0\nEND SELECT\n";
        let (ast, program) = parse_ok(src);
        match &ast.stmt(program.body[0]).kind {
            StmtKind::SelectCase { arms, else_body, .. } => {
                assert_eq!(arms.len(), 3);
                assert!(matches!(arms[0].labels[0], CaseLabel::Expr(_)));
                assert!(matches!(arms[1].labels[0], CaseLabel::Range(_, _)));
                assert!(matches!(arms[2].labels[0], CaseLabel::Rel(BinOp::Gt, _)));
                assert!(else_body.is_some());
            }
            other => panic!("expected SelectCase, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_try_catch_finally() {
        let src =
            "TRY\nTHROW 42, 100\nCATCH 42\nPRINT 1\nFINALLY\nPRINT 2\nEND TRY\n";
        let (ast, program) = parse_ok(src);
        match &ast.stmt(program.body[0]).kind {
            StmtKind::TryCatch {
                catches, finally, ..
            } => {
                assert_eq!(catches.len(), 1);
                assert!(catches[0].code.is_some());
                assert!(finally.is_some());
            }
            other => panic!("expected TryCatch, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_function_def() {
        let src = "FUNCTION Fact(N)\nIF N <= 1 THEN Fact = 1 ELSE Fact = N * Fact(N-1)\nEND FUNCTION\n";
        let (ast, program) = parse_ok(src);
        match &ast.stmt(program.body[0]).kind {
            StmtKind::FunctionDef(decl) => {
                assert_eq!(decl.name, "Fact");
                assert_eq!(decl.params.len(), 1);
                assert_eq!(decl.body.len(), 1);
            }
            other => panic!("expected FunctionDef, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_class_with_inheritance() {
        let src = "CLASS Dog EXTENDS Animal\nDIM age AS INTEGER\nMETHOD Speak() AS STRING\nRETURN \"Woof!\"\nEND METHOD\nEND CLASS\n";
        let (ast, program) = parse_ok(src);
        match &ast.stmt(program.body[0]).kind {
            StmtKind::ClassDecl {
                name,
                parent,
                fields,
                methods,
            } => {
                assert_eq!(name, "Dog");
                assert_eq!(parent.as_deref(), Some("Animal"));
                assert_eq!(fields.len(), 1);
                assert_eq!(methods.len(), 1);
                assert_eq!(methods[0].decl.name, "Speak");
            }
            other => panic!("expected ClassDecl, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_string_slice_vs_array_access() {
        // Slice: TO inside the paren group
        let (ast, program) = parse_ok("x$ = s$(2 TO 5)\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::Let { value, .. } => {
                assert!(matches!(
                    ast.expr(*value).kind,
                    ExprKind::StringSlice { .. }
                ));
            }
            other => panic!("expected Let, got {:?}", other),
        }

        // Declared array: index access
        let (ast, program) = parse_ok("DIM a$(10)\nx$ = a$(3)\n");
        match &ast.stmt(program.body[1]).kind {
            StmtKind::Let { value, .. } => {
                assert!(matches!(ast.expr(*value).kind, ExprKind::ArrayAccess { .. }));
            }
            other => panic!("expected Let, got {:?}", other),
        }

        // Unknown name: function call, settled by the analyzer
        let (ast, program) = parse_ok("x = F(3)\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::Let { value, .. } => {
                assert!(matches!(
                    ast.expr(*value).kind,
                    ExprKind::FunctionCall { .. }
                ));
            }
            other => panic!("expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_slice_nested_parens_not_confused() {
        // TO is nested in an inner group: outer is not a slice
        let (ast, program) = parse_ok("DIM a(10)\nx = a(F(2 TO 3))\n");
        match &ast.stmt(program.body[1]).kind {
            StmtKind::Let { value, .. } => match &ast.expr(*value).kind {
                ExprKind::ArrayAccess { indices, .. } => {
                    assert!(matches!(
                        ast.expr(indices[0]).kind,
                        ExprKind::StringSlice { .. }
                    ));
                }
                other => panic!("expected ArrayAccess, got {:?}", other),
            },
            other => panic!("expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_list_literal() {
        let (ast, program) = parse_ok("DIM items AS LIST OF ANY = LIST(42, \"hi\", 3.14)\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::Dim { decls } => {
                assert_eq!(decls[0].ty, Some(ParsedType::ListOf(Box::new(ParsedType::Any))));
                match &ast.expr(decls[0].init.unwrap()).kind {
                    ExprKind::ListLit { elems } => assert_eq!(elems.len(), 3),
                    other => panic!("expected ListLit, got {:?}", other),
                }
            }
            other => panic!("expected Dim, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_match_type() {
        let src = "MATCH TYPE e\nCASE INTEGER n%: PRINT n%\nCASE STRING s$: PRINT s$\nEND MATCH\n";
        let (ast, program) = parse_ok(src);
        match &ast.stmt(program.body[0]).kind {
            StmtKind::MatchType { arms, .. } => {
                assert_eq!(arms.len(), 2);
                assert_eq!(arms[0].binding, "n%");
                assert_eq!(arms[0].ty, ParsedType::Base(BaseType::Integer));
                assert_eq!(arms[1].binding, "s$");
            }
            other => panic!("expected MatchType, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_method_call_vs_member_access() {
        let (ast, program) = parse_ok("x = pet.Speak()\ny = pet.age\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::Let { value, .. } => {
                assert!(matches!(ast.expr(*value).kind, ExprKind::MethodCall { .. }));
            }
            other => panic!("expected Let, got {:?}", other),
        }
        match &ast.stmt(program.body[1]).kind {
            StmtKind::Let { value, .. } => {
                assert!(matches!(
                    ast.expr(*value).kind,
                    ExprKind::MemberAccess { .. }
                ));
            }
            other => panic!("expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_new_and_delete() {
        let (ast, program) = parse_ok("DIM pet AS Animal = NEW Dog()\nDELETE pet\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::Dim { decls } => {
                assert!(matches!(
                    ast.expr(decls[0].init.unwrap()).kind,
                    ExprKind::New { .. }
                ));
            }
            other => panic!("expected Dim, got {:?}", other),
        }
        assert!(matches!(
            ast.stmt(program.body[1]).kind,
            StmtKind::Delete { .. }
        ));
    }

    #[test]
    fn test_parse_goto_gosub_labels() {
        let (ast, program) = parse_ok("Start:\nGOTO Start\nGOSUB 100\n100 PRINT 1\nRETURN\n");
        assert!(matches!(
            ast.stmt(program.body[0]).kind,
            StmtKind::Label { .. }
        ));
        assert!(matches!(
            ast.stmt(program.body[1]).kind,
            StmtKind::Goto { .. }
        ));
        assert!(matches!(
            ast.stmt(program.body[2]).kind,
            StmtKind::Gosub { .. }
        ));
        match &ast.stmt(program.body[3]).kind {
            StmtKind::Label { name } => assert_eq!(name, "100"),
            other => panic!("expected Label, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_on_goto() {
        let (ast, program) = parse_ok("ON n GOTO a, b, c\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::OnGoto { targets, .. } => assert_eq!(targets.len(), 3),
            other => panic!("expected OnGoto, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_worker_await() {
        let (ast, program) = parse_ok("WORKER w = Compute(5)\nAWAIT w, result\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::Worker { name, func, args } => {
                assert_eq!(name, "w");
                assert_eq!(func, "Compute");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected Worker, got {:?}", other),
        }
        match &ast.stmt(program.body[1]).kind {
            StmtKind::Await { worker, target } => {
                assert_eq!(worker, "w");
                assert!(target.is_some());
            }
            other => panic!("expected Await, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_iif() {
        let (ast, program) = parse_ok("x = IIF(a > b, a, b)\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::Let { value, .. } => {
                assert!(matches!(ast.expr(*value).kind, ExprKind::Iif { .. }));
            }
            other => panic!("expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_recovers_to_next_statement() {
        let errs = parse_err("PRINT )\nPRINT 2\n");
        assert!(!errs.is_empty());
        // Second statement still parses: only the first error is reported
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn test_parse_data_read_restore() {
        let (ast, program) = parse_ok("DATA 1, -2.5, \"three\"\nREAD a, b$, c\nRESTORE\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::Data { values } => {
                assert_eq!(values.len(), 3);
                assert!(matches!(values[1], DataValue::Number(v) if v == -2.5));
                assert!(matches!(&values[2], DataValue::Str(s) if s == "three"));
            }
            other => panic!("expected Data, got {:?}", other),
        }
        assert!(matches!(
            ast.stmt(program.body[1]).kind,
            StmtKind::Read { .. }
        ));
    }

    #[test]
    fn test_parse_inc_dec_swap() {
        let (ast, program) = parse_ok("INC x\nDEC y, 2\nSWAP a, b\n");
        assert!(matches!(ast.stmt(program.body[0]).kind, StmtKind::Inc { .. }));
        match &ast.stmt(program.body[1]).kind {
            StmtKind::Dec { amount, .. } => assert!(amount.is_some()),
            other => panic!("expected Dec, got {:?}", other),
        }
        assert!(matches!(
            ast.stmt(program.body[2]).kind,
            StmtKind::Swap { .. }
        ));
    }

    #[test]
    fn test_parse_operator_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let (ast, program) = parse_ok("x = 1 + 2 * 3\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::Let { value, .. } => match &ast.expr(*value).kind {
                ExprKind::Binary { op: BinOp::Add, rhs, .. } => {
                    assert!(matches!(
                        ast.expr(*rhs).kind,
                        ExprKind::Binary { op: BinOp::Mul, .. }
                    ));
                }
                other => panic!("expected Add at top, got {:?}", other),
            },
            other => panic!("expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_binds_looser_than_comparison() {
        let (ast, program) = parse_ok("x = NOT a = b\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::Let { value, .. } => match &ast.expr(*value).kind {
                ExprKind::Unary { op: UnOp::Not, operand } => {
                    assert!(matches!(
                        ast.expr(*operand).kind,
                        ExprKind::Binary { op: BinOp::Eq, .. }
                    ));
                }
                other => panic!("expected Not at top, got {:?}", other),
            },
            other => panic!("expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_end_statement_inside_if_block() {
        let src = "IF x THEN\nEND\nEND IF\n";
        let (ast, program) = parse_ok(src);
        match &ast.stmt(program.body[0]).kind {
            StmtKind::If { then_body, .. } => {
                assert_eq!(then_body.len(), 1);
                assert!(matches!(ast.stmt(then_body[0]).kind, StmtKind::End));
            }
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_is_type_expression() {
        let (ast, program) = parse_ok("x = pet IS Dog\n");
        match &ast.stmt(program.body[0]).kind {
            StmtKind::Let { value, .. } => {
                assert!(matches!(ast.expr(*value).kind, ExprKind::IsType { .. }));
            }
            other => panic!("expected Let, got {:?}", other),
        }
    }
}
