//! CFG construction
//!
//! Lowers statement lists into basic blocks with typed edges, one CFG for
//! the main program and one per function, sub, and method body. Labels
//! resolve in a deferred pass so forward GOTOs work; unresolved targets
//! are resolution errors. After construction each CFG gets reachability,
//! RPO, and a structural invariant check.

use super::{BlockAux, BlockKind, Cfg, EdgeKind, LoopInfo};
use crate::ast::{
    Ast, CaseArm, CatchArm, DoKind, ExitKind, ExprId, MatchArm, Program, StmtId, StmtKind,
};
use crate::diagnostics::{DiagCategory, DiagnosticSink, SourceLoc};
use crate::semantics::{func_scope_key, method_scope_key};
use crate::symbols::key;
use std::collections::HashMap;

/// The CFGs of a translation unit: the main program plus one per
/// function/sub/method, named by scope key.
#[derive(Debug)]
pub struct BuildResult {
    pub main: Cfg,
    pub funcs: Vec<Cfg>,
}

pub fn build_cfgs(ast: &Ast, program: &Program, sink: &mut DiagnosticSink) -> BuildResult {
    let main_body: Vec<StmtId> = program
        .body
        .iter()
        .copied()
        .filter(|&sid| {
            !matches!(
                ast.stmt(sid).kind,
                StmtKind::FunctionDef(_)
                    | StmtKind::SubDef(_)
                    | StmtKind::ClassDecl { .. }
                    | StmtKind::TypeDecl { .. }
            )
        })
        .collect();
    let main = CfgBuilder::new(ast, sink, "", true).build(&main_body);

    let mut funcs = Vec::new();
    for &sid in &program.body {
        match &ast.stmt(sid).kind {
            StmtKind::FunctionDef(decl) | StmtKind::SubDef(decl) => {
                let name = func_scope_key(crate::semantics::base_name(&decl.name));
                funcs.push(CfgBuilder::new(ast, sink, &name, false).build(&decl.body));
            }
            StmtKind::ClassDecl { name, methods, .. } => {
                for m in methods {
                    let scope = method_scope_key(name, crate::semantics::base_name(&m.decl.name));
                    funcs.push(CfgBuilder::new(ast, sink, &scope, false).build(&m.decl.body));
                }
            }
            _ => {}
        }
    }
    BuildResult { main, funcs }
}

struct PendingJump {
    label: String,
    from: usize,
    kind: EdgeKind,
    loc: SourceLoc,
}

struct CfgBuilder<'a> {
    ast: &'a Ast,
    sink: &'a mut DiagnosticSink,
    cfg: Cfg,
    current: usize,
    terminated: bool,
    is_main: bool,
    /// Innermost-last stack of (loop kind, loop exit block)
    loop_ctx: Vec<(ExitKind, usize)>,
    labels: HashMap<String, usize>,
    pending: Vec<PendingJump>,
}

impl<'a> CfgBuilder<'a> {
    fn new(ast: &'a Ast, sink: &'a mut DiagnosticSink, name: &str, is_main: bool) -> Self {
        let cfg = Cfg::new(name);
        let entry = cfg.entry;
        CfgBuilder {
            ast,
            sink,
            cfg,
            current: entry,
            terminated: false,
            is_main,
            loop_ctx: Vec::new(),
            labels: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn build(mut self, body: &[StmtId]) -> Cfg {
        self.lower_body(body);
        if !self.terminated {
            self.link_term(self.cfg.exit, EdgeKind::Exit);
        }
        self.resolve_pending();
        self.resolve_gosub_returns();
        self.cfg.compute_rpo();
        let dead = self.cfg.unreachable_blocks();
        if !dead.is_empty() {
            self.sink.warning(
                DiagCategory::Semantic,
                SourceLoc::default(),
                format!(
                    "{}: {} unreachable block(s) retained",
                    if self.cfg.name.is_empty() {
                        "main program"
                    } else {
                        &self.cfg.name
                    },
                    dead.len()
                ),
            );
        }
        self.cfg.check_invariants(self.sink);
        self.cfg
    }

    // ------------------------------------------------------------------
    // Block plumbing
    // ------------------------------------------------------------------

    fn new_block(&mut self, kind: BlockKind) -> usize {
        self.cfg.add_block(kind)
    }

    fn new_block_aux(&mut self, kind: BlockKind, aux: BlockAux) -> usize {
        let b = self.cfg.add_block(kind);
        self.cfg.blocks[b].aux = aux;
        b
    }

    fn goto_block(&mut self, b: usize) {
        self.current = b;
        self.terminated = false;
    }

    fn link(&mut self, from: usize, to: usize, kind: EdgeKind) {
        self.cfg.add_edge(from, to, kind);
    }

    /// Terminate the current block with an explicit edge.
    fn link_term(&mut self, to: usize, kind: EdgeKind) {
        if !self.terminated {
            self.cfg.add_edge(self.current, to, kind);
            self.terminated = true;
        }
    }

    /// Fall through into `next` and continue there.
    fn seal_into(&mut self, next: usize) {
        self.link_term(next, EdgeKind::Fallthrough);
        self.goto_block(next);
    }

    fn emit(&mut self, sid: StmtId) {
        self.cfg.blocks[self.current].stmts.push(sid);
    }

    // ------------------------------------------------------------------
    // Lowering
    // ------------------------------------------------------------------

    fn lower_body(&mut self, body: &[StmtId]) {
        for &sid in body {
            if self.terminated {
                // Code after an unconditional transfer: a label resumes
                // reachable flow, anything else opens a retained
                // unreachable block.
                if !matches!(self.ast.stmt(sid).kind, StmtKind::Label { .. }) {
                    let b = self.new_block(BlockKind::Normal);
                    self.goto_block(b);
                }
            }
            self.lower_stmt(sid);
        }
    }

    fn lower_stmt(&mut self, sid: StmtId) {
        let stmt = self.ast.stmt(sid);
        let loc = stmt.loc;
        match &stmt.kind {
            // Leaf statements embed in the current block
            StmtKind::Print(_)
            | StmtKind::Console(_)
            | StmtKind::Let { .. }
            | StmtKind::Dim { .. }
            | StmtKind::Redim { .. }
            | StmtKind::Local { .. }
            | StmtKind::Inc { .. }
            | StmtKind::Dec { .. }
            | StmtKind::Swap { .. }
            | StmtKind::Call { .. }
            | StmtKind::CallMethod { .. }
            | StmtKind::Throw { .. }
            | StmtKind::Read { .. }
            | StmtKind::Restore { .. }
            | StmtKind::Input { .. }
            | StmtKind::Delete { .. }
            | StmtKind::Worker { .. }
            | StmtKind::Await { .. } => self.emit(sid),

            // No runtime footprint
            StmtKind::Shared { .. } | StmtKind::Option(_) | StmtKind::Data { .. } => {}

            // Declarations never reach a lowered body
            StmtKind::FunctionDef(_)
            | StmtKind::SubDef(_)
            | StmtKind::ClassDecl { .. }
            | StmtKind::TypeDecl { .. } => {}

            StmtKind::Label { name } => {
                let b = self.new_block(BlockKind::Normal);
                self.cfg.blocks[b].name = Some(name.clone());
                self.seal_into(b);
                if self.labels.insert(key(name), b).is_some() && !self.is_main {
                    // Main-program duplicates are caught in analysis
                    self.sink.error(
                        DiagCategory::Resolution,
                        loc,
                        format!("duplicate label {}", name),
                    );
                }
            }

            StmtKind::Goto { label } => {
                self.pending.push(PendingJump {
                    label: label.clone(),
                    from: self.current,
                    kind: EdgeKind::Jump,
                    loc,
                });
                self.terminated = true;
            }

            StmtKind::Gosub { label } => {
                let site = self.cfg.gosub_resume.len() as u32;
                let site_block =
                    self.new_block_aux(BlockKind::Normal, BlockAux::GosubSite { site });
                self.seal_into(site_block);
                self.pending.push(PendingJump {
                    label: label.clone(),
                    from: site_block,
                    kind: EdgeKind::GosubCall,
                    loc,
                });
                self.terminated = true;
                let resume = self.new_block(BlockKind::Normal);
                self.cfg.gosub_resume.push(resume);
                self.goto_block(resume);
            }

            StmtKind::OnGoto { selector, targets } => {
                self.lower_on_branch(*selector, targets, false, loc);
            }
            StmtKind::OnGosub { selector, targets } => {
                self.lower_on_branch(*selector, targets, true, loc);
            }

            StmtKind::Return { .. } => {
                if self.is_main {
                    // GOSUB return: dispatch over the recorded resume sites
                    let dispatch =
                        self.new_block_aux(BlockKind::Normal, BlockAux::GosubReturn);
                    self.seal_into(dispatch);
                    self.terminated = true;
                } else {
                    self.emit(sid);
                    self.link_term(self.cfg.exit, EdgeKind::Exit);
                }
            }

            StmtKind::Exit { kind } => match kind {
                ExitKind::For | ExitKind::While | ExitKind::Do => {
                    let target = self
                        .loop_ctx
                        .iter()
                        .rev()
                        .find(|(k, _)| k == kind)
                        .map(|(_, b)| *b);
                    match target {
                        Some(exit) => self.link_term(exit, EdgeKind::LoopExit),
                        None => {
                            // Analysis reported it; keep the block well formed
                            self.link_term(self.cfg.exit, EdgeKind::Exit);
                        }
                    }
                }
                ExitKind::Function | ExitKind::Sub => {
                    self.emit(sid);
                    self.link_term(self.cfg.exit, EdgeKind::Exit);
                }
            },

            StmtKind::End => {
                self.emit(sid);
                self.link_term(self.cfg.exit, EdgeKind::Exit);
            }

            StmtKind::If {
                cond,
                then_body,
                elifs,
                else_body,
            } => self.lower_if(*cond, then_body, elifs, else_body.as_deref()),

            StmtKind::While { cond, body } => {
                self.lower_pre_test_loop(*cond, body, false, ExitKind::While)
            }

            StmtKind::DoLoop { kind, cond, body } => match kind {
                DoKind::PreWhile => self.lower_pre_test_loop(*cond, body, false, ExitKind::Do),
                DoKind::PreUntil => self.lower_pre_test_loop(*cond, body, true, ExitKind::Do),
                DoKind::PostWhile => self.lower_post_test_loop(*cond, body, false),
                DoKind::PostUntil => self.lower_post_test_loop(*cond, body, true),
            },

            StmtKind::Repeat { body, cond } => {
                // Body runs once unconditionally; loop again while the
                // UNTIL condition is false
                self.lower_post_test_loop(*cond, body, true)
            }

            StmtKind::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                let info = LoopInfo::For {
                    var: var.clone(),
                    start: *start,
                    end: *end,
                    step: *step,
                };
                self.lower_counted_loop(info, body);
            }

            StmtKind::ForEach {
                tag_var,
                var,
                list,
                body,
            } => {
                let info = LoopInfo::ForEach {
                    tag_var: tag_var.clone(),
                    var: var.clone(),
                    list: *list,
                };
                self.lower_counted_loop(info, body);
            }

            StmtKind::SelectCase {
                selector,
                arms,
                else_body,
            } => self.lower_select(*selector, arms, else_body.as_deref()),

            StmtKind::MatchType {
                subject,
                arms,
                else_body,
            } => self.lower_match_type(*subject, arms, else_body.as_deref()),

            StmtKind::TryCatch {
                body,
                catches,
                finally,
            } => self.lower_try(body, catches, finally.as_deref()),
        }
    }

    fn lower_if(
        &mut self,
        cond: ExprId,
        then_body: &[StmtId],
        elifs: &[(ExprId, Vec<StmtId>)],
        else_body: Option<&[StmtId]>,
    ) {
        let join = self.new_block(BlockKind::Normal);

        let mut cond_block = self.current;
        self.cfg.blocks[cond_block].branch_cond = Some(cond);
        let mut arms: Vec<(usize, &[StmtId])> = Vec::new();

        let then_b = self.new_block(BlockKind::Normal);
        self.link(cond_block, then_b, EdgeKind::BranchTrue);
        arms.push((then_b, then_body));

        for (c, body) in elifs {
            let next_cond = self.new_block(BlockKind::Normal);
            self.link(cond_block, next_cond, EdgeKind::BranchFalse);
            self.cfg.blocks[next_cond].branch_cond = Some(*c);
            let body_b = self.new_block(BlockKind::Normal);
            self.link(next_cond, body_b, EdgeKind::BranchTrue);
            arms.push((body_b, body));
            cond_block = next_cond;
        }

        match else_body {
            Some(body) => {
                let else_b = self.new_block(BlockKind::Normal);
                self.link(cond_block, else_b, EdgeKind::BranchFalse);
                arms.push((else_b, body));
            }
            None => self.link(cond_block, join, EdgeKind::BranchFalse),
        }

        self.terminated = true;
        for (block, body) in arms {
            self.goto_block(block);
            self.lower_body(body);
            self.link_term(join, EdgeKind::Jump);
        }
        self.goto_block(join);
    }

    fn lower_pre_test_loop(
        &mut self,
        cond: ExprId,
        body: &[StmtId],
        invert: bool,
        kind: ExitKind,
    ) {
        let header = self.new_block_aux(BlockKind::LoopHeader, BlockAux::LoopCond { invert });
        self.seal_into(header);
        self.cfg.blocks[header].branch_cond = Some(cond);
        let body_b = self.new_block(BlockKind::LoopBody);
        let exit = self.new_block(BlockKind::LoopExit);
        self.link(header, body_b, EdgeKind::BranchTrue);
        self.link(header, exit, EdgeKind::BranchFalse);

        self.loop_ctx.push((kind, exit));
        self.goto_block(body_b);
        self.lower_body(body);
        self.link_term(header, EdgeKind::BackEdge);
        self.loop_ctx.pop();
        self.goto_block(exit);
    }

    fn lower_post_test_loop(&mut self, cond: ExprId, body: &[StmtId], invert: bool) {
        let body_entry = self.new_block(BlockKind::LoopHeader);
        self.seal_into(body_entry);
        let exit = self.new_block(BlockKind::LoopExit);

        self.loop_ctx.push((ExitKind::Do, exit));
        self.lower_body(body);
        let cond_b = self.new_block_aux(BlockKind::Normal, BlockAux::PostCond { invert });
        self.seal_into(cond_b);
        self.cfg.blocks[cond_b].branch_cond = Some(cond);
        self.link(cond_b, body_entry, EdgeKind::BackEdge);
        self.link(cond_b, exit, EdgeKind::LoopExit);
        self.terminated = true;
        self.loop_ctx.pop();
        self.goto_block(exit);
    }

    /// FOR and FOR EACH share the init/header/body/increment shape.
    fn lower_counted_loop(&mut self, info: LoopInfo, body: &[StmtId]) {
        let loop_id = self.cfg.loops.len();
        self.cfg.loops.push(info);

        let init = self.new_block_aux(BlockKind::Normal, BlockAux::Loop(loop_id));
        self.seal_into(init);
        let header = self.new_block_aux(BlockKind::LoopHeader, BlockAux::Loop(loop_id));
        self.link_term(header, EdgeKind::Fallthrough);

        let body_b = self.new_block_aux(BlockKind::LoopBody, BlockAux::Loop(loop_id));
        let incr = self.new_block_aux(BlockKind::LoopIncrement, BlockAux::Loop(loop_id));
        let exit = self.new_block(BlockKind::LoopExit);
        self.link(header, body_b, EdgeKind::BranchTrue);
        self.link(header, exit, EdgeKind::BranchFalse);

        self.loop_ctx.push((ExitKind::For, exit));
        self.goto_block(body_b);
        self.lower_body(body);
        self.link_term(incr, EdgeKind::Fallthrough);
        self.loop_ctx.pop();
        self.link(incr, header, EdgeKind::BackEdge);
        self.goto_block(exit);
    }

    fn lower_select(&mut self, selector: ExprId, arms: &[CaseArm], else_body: Option<&[StmtId]>) {
        let select_id = self.cfg.select_count;
        self.cfg.select_count += 1;

        let init = self.new_block_aux(
            BlockKind::Normal,
            BlockAux::SelectInit {
                select_id,
                selector,
            },
        );
        self.seal_into(init);
        let join = self.new_block(BlockKind::Normal);

        // Build the test chain, then fill arm bodies
        let mut chain_from: Option<usize> = None; // pending CaseNext source
        let mut arm_blocks: Vec<(usize, &[StmtId])> = Vec::new();
        for arm in arms {
            let body_b = self.new_block(BlockKind::CaseMatch);
            arm_blocks.push((body_b, &arm.body));
            for label in &arm.labels {
                let test = self.new_block_aux(
                    BlockKind::CaseTest,
                    BlockAux::CaseTest {
                        select_id,
                        label: label.clone(),
                    },
                );
                match chain_from.take() {
                    Some(prev) => self.link(prev, test, EdgeKind::CaseNext),
                    None => self.link(init, test, EdgeKind::Fallthrough),
                }
                self.link(test, body_b, EdgeKind::CaseMatch);
                chain_from = Some(test);
            }
        }

        // The unconditional tail: CASE ELSE or straight to the join
        let tail = match else_body {
            Some(body) => {
                let else_b = self.new_block(BlockKind::CaseMatch);
                arm_blocks.push((else_b, body));
                else_b
            }
            None => join,
        };
        match chain_from.take() {
            Some(prev) => self.link(prev, tail, EdgeKind::CaseNext),
            None => self.link(init, tail, EdgeKind::Fallthrough),
        }

        self.terminated = true;
        for (block, body) in arm_blocks {
            self.goto_block(block);
            self.lower_body(body);
            self.link_term(join, EdgeKind::Jump);
        }
        self.goto_block(join);
    }

    fn lower_match_type(
        &mut self,
        subject: ExprId,
        arms: &[MatchArm],
        else_body: Option<&[StmtId]>,
    ) {
        let join = self.new_block(BlockKind::Normal);
        let mut chain_from: Option<usize> = None;
        let mut arm_blocks: Vec<(usize, &[StmtId])> = Vec::new();

        for arm in arms {
            let test = self.new_block_aux(
                BlockKind::CaseTest,
                BlockAux::MatchTest {
                    subject,
                    arm_ty: arm.ty.clone(),
                },
            );
            match chain_from.take() {
                Some(prev) => self.link(prev, test, EdgeKind::CaseNext),
                None => self.seal_into(test),
            }
            let bind = self.new_block_aux(
                BlockKind::CaseMatch,
                BlockAux::MatchBind {
                    subject,
                    arm_ty: arm.ty.clone(),
                    binding: arm.binding.clone(),
                },
            );
            self.link(test, bind, EdgeKind::CaseMatch);
            arm_blocks.push((bind, &arm.body));
            chain_from = Some(test);
        }

        let tail = match else_body {
            Some(body) => {
                let else_b = self.new_block(BlockKind::CaseMatch);
                arm_blocks.push((else_b, body));
                else_b
            }
            None => join,
        };
        match chain_from.take() {
            Some(prev) => self.link(prev, tail, EdgeKind::CaseNext),
            None => self.seal_into(tail),
        }

        self.terminated = true;
        for (block, body) in arm_blocks {
            self.goto_block(block);
            self.lower_body(body);
            self.link_term(join, EdgeKind::Jump);
        }
        self.goto_block(join);
    }

    fn lower_try(&mut self, body: &[StmtId], catches: &[CatchArm], finally: Option<&[StmtId]>) {
        let te = self.new_block_aux(BlockKind::TryBlock, BlockAux::TryEntry);
        self.seal_into(te);
        let body_b = self.new_block(BlockKind::Normal);
        let dispatch = self.new_block_aux(BlockKind::CatchBlock, BlockAux::ExceptionPop);
        self.link(te, body_b, EdgeKind::Fallthrough);
        self.link(te, dispatch, EdgeKind::Exception);
        self.terminated = true;

        let finally_b = self.new_block(BlockKind::FinallyBlock);
        let join = self.new_block(BlockKind::Normal);

        // Normal path: body, pop the exception context, then FINALLY
        self.goto_block(body_b);
        self.lower_body(body);
        if !self.terminated {
            let pop = self.new_block_aux(BlockKind::Normal, BlockAux::ExceptionPop);
            self.link_term(pop, EdgeKind::Jump);
            self.link(pop, finally_b, EdgeKind::Finally);
        }

        // Exception path: the dispatch block popped the context; walk the
        // catch tests in order
        let mut chain_from = dispatch;
        let mut chain_kind = EdgeKind::Fallthrough;
        let mut catch_blocks: Vec<(usize, &[StmtId])> = Vec::new();
        let mut caught_all = false;
        for arm in catches {
            let body_block = self.new_block(BlockKind::CatchBlock);
            catch_blocks.push((body_block, &arm.body));
            match arm.code {
                Some(code) => {
                    let test = self.new_block_aux(
                        BlockKind::CaseTest,
                        BlockAux::CatchTest { code: Some(code) },
                    );
                    self.link(chain_from, test, chain_kind);
                    self.link(test, body_block, EdgeKind::CaseMatch);
                    chain_from = test;
                    chain_kind = EdgeKind::CaseNext;
                }
                None => {
                    // Catch-all terminates the chain
                    self.link(chain_from, body_block, chain_kind);
                    caught_all = true;
                    break;
                }
            }
        }
        if !caught_all {
            let rethrow = self.new_block_aux(BlockKind::Normal, BlockAux::Rethrow);
            self.link(chain_from, rethrow, chain_kind);
            self.link(rethrow, self.cfg.exit, EdgeKind::Exit);
        }

        for (block, arm_body) in catch_blocks {
            self.goto_block(block);
            self.lower_body(arm_body);
            self.link_term(finally_b, EdgeKind::Finally);
        }

        self.goto_block(finally_b);
        if let Some(f) = finally {
            self.lower_body(f);
        }
        self.link_term(join, EdgeKind::Fallthrough);
        self.goto_block(join);
    }

    fn lower_on_branch(
        &mut self,
        selector: ExprId,
        targets: &[String],
        gosub: bool,
        loc: SourceLoc,
    ) {
        let site = if gosub {
            Some(self.cfg.gosub_resume.len() as u32)
        } else {
            None
        };
        let dispatch = self.new_block_aux(
            BlockKind::Normal,
            BlockAux::OnBranch {
                selector,
                gosub,
                site,
            },
        );
        self.seal_into(dispatch);
        for t in targets {
            self.pending.push(PendingJump {
                label: t.clone(),
                from: dispatch,
                kind: EdgeKind::ComputedBranch,
                loc,
            });
        }
        let cont = self.new_block(BlockKind::Normal);
        self.link(dispatch, cont, EdgeKind::Fallthrough);
        if gosub {
            self.cfg.gosub_resume.push(cont);
        }
        self.terminated = true;
        self.goto_block(cont);
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    fn resolve_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for p in pending {
            match self.labels.get(&key(&p.label)) {
                Some(&target) => self.cfg.add_edge(p.from, target, p.kind),
                None => {
                    self.sink.error(
                        DiagCategory::Resolution,
                        p.loc,
                        format!("undefined label {}", p.label),
                    );
                    // Keep the block shape valid despite the error
                    self.cfg.add_edge(p.from, self.cfg.exit, p.kind);
                }
            }
        }
    }

    /// GOSUB-return dispatch blocks branch to every recorded resume site,
    /// with a program-exit fallback for an empty return stack.
    fn resolve_gosub_returns(&mut self) {
        let dispatches: Vec<usize> = self
            .cfg
            .blocks
            .iter()
            .filter(|b| matches!(b.aux, BlockAux::GosubReturn))
            .map(|b| b.index)
            .collect();
        for d in dispatches {
            for i in 0..self.cfg.gosub_resume.len() {
                let resume = self.cfg.gosub_resume[i];
                self.cfg.add_edge(d, resume, EdgeKind::GosubReturn);
            }
            let exit = self.cfg.exit;
            self.cfg.add_edge(d, exit, EdgeKind::Exit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn build(source: &str) -> BuildResult {
        let mut sink = DiagnosticSink::default();
        let parser = Parser::new(source, &mut sink);
        let (ast, program) = parser.parse();
        assert!(!sink.has_errors(), "parse failed: {:?}", sink.diagnostics());
        let result = build_cfgs(&ast, &program, &mut sink);
        assert!(
            !sink.has_errors(),
            "CFG build failed: {:?}",
            sink.diagnostics()
        );
        result
    }

    fn kinds_of(cfg: &Cfg, block: usize) -> Vec<EdgeKind> {
        cfg.out_edges(block).map(|e| e.kind).collect()
    }

    #[test]
    fn test_if_produces_branch_pair_and_join() {
        let r = build("IF x THEN\nPRINT 1\nELSE\nPRINT 2\nEND IF\nPRINT 3\n");
        let cond = r.main.entry;
        assert!(r.main.blocks[cond].branch_cond.is_some());
        let mut out = kinds_of(&r.main, cond);
        out.sort_by_key(|k| format!("{:?}", k));
        assert_eq!(out, vec![EdgeKind::BranchFalse, EdgeKind::BranchTrue]);
    }

    #[test]
    fn test_while_has_back_edge() {
        let r = build("WHILE x < 3\nx = x + 1\nWEND\n");
        let back: Vec<_> = r
            .main
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::BackEdge)
            .collect();
        assert_eq!(back.len(), 1);
        let header = back[0].to;
        assert_eq!(r.main.blocks[header].kind, BlockKind::LoopHeader);
        assert!(r.main.blocks[header].branch_cond.is_some());
    }

    #[test]
    fn test_for_loop_block_shape() {
        let r = build("FOR i = 1 TO 10\nPRINT i\nNEXT i\n");
        assert_eq!(r.main.loops.len(), 1);
        let header = r
            .main
            .blocks
            .iter()
            .find(|b| b.kind == BlockKind::LoopHeader)
            .unwrap();
        let incr = r
            .main
            .blocks
            .iter()
            .find(|b| b.kind == BlockKind::LoopIncrement)
            .unwrap();
        assert!(matches!(header.aux, BlockAux::Loop(0)));
        assert_eq!(
            r.main.edge_target(incr.index, EdgeKind::BackEdge),
            Some(header.index)
        );
        // Header branches between body and exit
        let mut out = kinds_of(&r.main, header.index);
        out.sort_by_key(|k| format!("{:?}", k));
        assert_eq!(out, vec![EdgeKind::BranchFalse, EdgeKind::BranchTrue]);
    }

    #[test]
    fn test_post_test_loop_shape() {
        let r = build("DO\nx = x + 1\nLOOP UNTIL x > 3\n");
        let cond = r
            .main
            .blocks
            .iter()
            .find(|b| matches!(b.aux, BlockAux::PostCond { invert: true }))
            .unwrap();
        let mut out = kinds_of(&r.main, cond.index);
        out.sort_by_key(|k| format!("{:?}", k));
        assert_eq!(out, vec![EdgeKind::BackEdge, EdgeKind::LoopExit]);
    }

    #[test]
    fn test_repeat_until_runs_body_first() {
        let r = build("REPEAT\nPRINT 1\nUNTIL done\n");
        // Entry falls through into the body, not into a condition
        let entry_succ = r.main.edge_target(r.main.entry, EdgeKind::Fallthrough).unwrap();
        assert_eq!(r.main.blocks[entry_succ].kind, BlockKind::LoopHeader);
        assert!(r.main.blocks[entry_succ].branch_cond.is_none());
    }

    #[test]
    fn test_select_case_chain() {
        let r = build("SELECT CASE n\nCASE 1\nPRINT 1\nCASE 2\nPRINT 2\nCASE ELSE\nPRINT 0\nEND SELECT\n");
        let tests: Vec<_> = r
            .main
            .blocks
            .iter()
            .filter(|b| b.kind == BlockKind::CaseTest)
            .collect();
        assert_eq!(tests.len(), 2);
        for t in &tests {
            let mut out = kinds_of(&r.main, t.index);
            out.sort_by_key(|k| format!("{:?}", k));
            assert_eq!(out, vec![EdgeKind::CaseMatch, EdgeKind::CaseNext]);
        }
    }

    #[test]
    fn test_exit_for_targets_loop_exit() {
        let r = build("FOR i = 1 TO 10\nIF i = 5 THEN\nEXIT FOR\nEND IF\nNEXT i\n");
        let exits: Vec<_> = r
            .main
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::LoopExit)
            .collect();
        assert_eq!(exits.len(), 1);
        assert_eq!(r.main.blocks[exits[0].to].kind, BlockKind::LoopExit);
    }

    #[test]
    fn test_goto_resolves_forward_and_backward() {
        let r = build("Start:\nGOTO Done\nPRINT 1\nDone:\nGOTO Start\n");
        let jumps: Vec<_> = r
            .main
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Jump)
            .collect();
        assert_eq!(jumps.len(), 2);
        // Both targets are label-named blocks
        for j in jumps {
            assert!(r.main.blocks[j.to].name.is_some());
        }
    }

    #[test]
    fn test_undefined_label_is_resolution_error() {
        let mut sink = DiagnosticSink::default();
        let parser = Parser::new("GOTO Nowhere\n", &mut sink);
        let (ast, program) = parser.parse();
        let _ = build_cfgs(&ast, &program, &mut sink);
        assert!(sink.has_errors());
        assert!(
            sink.diagnostics()
                .iter()
                .any(|d| d.message.contains("undefined label"))
        );
    }

    #[test]
    fn test_gosub_edges_and_resume() {
        let r = build("GOSUB Sub1\nPRINT 2\nEND\nSub1:\nPRINT 1\nRETURN\n");
        assert_eq!(r.main.gosub_resume.len(), 1);
        let calls: Vec<_> = r
            .main
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::GosubCall)
            .collect();
        assert_eq!(calls.len(), 1);
        let returns: Vec<_> = r
            .main
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::GosubReturn)
            .collect();
        assert_eq!(returns.len(), 1);
        assert_eq!(returns[0].to, r.main.gosub_resume[0]);
    }

    #[test]
    fn test_try_catch_edges() {
        let r = build("TRY\nTHROW 42\nCATCH 42\nPRINT 1\nFINALLY\nPRINT 2\nEND TRY\n");
        let te = r
            .main
            .blocks
            .iter()
            .find(|b| b.kind == BlockKind::TryBlock)
            .unwrap();
        let mut out = kinds_of(&r.main, te.index);
        out.sort_by_key(|k| format!("{:?}", k));
        assert_eq!(out, vec![EdgeKind::Exception, EdgeKind::Fallthrough]);
        // Both normal and catch paths reach FINALLY via finally edges
        let finally_in: Vec<_> = r
            .main
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Finally)
            .collect();
        assert_eq!(finally_in.len(), 2);
    }

    #[test]
    fn test_on_goto_computed_branches() {
        let r = build("ON n GOTO a, b\nPRINT 0\na:\nPRINT 1\nb:\nPRINT 2\n");
        let dispatch = r
            .main
            .blocks
            .iter()
            .find(|b| matches!(b.aux, BlockAux::OnBranch { .. }))
            .unwrap();
        let computed = kinds_of(&r.main, dispatch.index)
            .into_iter()
            .filter(|k| *k == EdgeKind::ComputedBranch)
            .count();
        assert_eq!(computed, 2);
        assert_eq!(
            kinds_of(&r.main, dispatch.index)
                .into_iter()
                .filter(|k| *k == EdgeKind::Fallthrough)
                .count(),
            1
        );
    }

    #[test]
    fn test_function_cfgs_built() {
        let r = build("FUNCTION F(x)\nF = x\nEND FUNCTION\nPRINT F(1)\n");
        assert_eq!(r.funcs.len(), 1);
        assert_eq!(r.funcs[0].name, "F");
        // RETURN-less function still reaches the exit block
        assert!(!r.funcs[0].rpo.is_empty());
    }

    #[test]
    fn test_unreachable_code_flagged_but_retained() {
        let mut sink = DiagnosticSink::default();
        let parser = Parser::new("GOTO L\nPRINT 99\nL:\nPRINT 1\n", &mut sink);
        let (ast, program) = parser.parse();
        let r = build_cfgs(&ast, &program, &mut sink);
        assert!(!sink.has_errors());
        assert!(
            sink.diagnostics()
                .iter()
                .any(|d| d.message.contains("unreachable"))
        );
        assert!(!r.main.unreachable_blocks().is_empty());
    }

    #[test]
    fn test_every_rpo_block_satisfies_edge_shapes() {
        // A composite program touching most lowering rules
        let src = "\
DIM t AS INTEGER
FOR i = 1 TO 3
  IF i = 2 THEN
    PRINT i
  END IF
NEXT i
WHILE t < 2
  t = t + 1
WEND
SELECT CASE t
CASE 1
  PRINT 1
CASE ELSE
  PRINT 0
END SELECT
TRY
  THROW 1
CATCH 1
  PRINT 1
END TRY
END
";
        let r = build(src);
        // check_invariants ran inside build() without errors; spot-check
        // that the exit block has no outgoing edges
        assert_eq!(r.main.out_edges(r.main.exit).count(), 0);
    }
}
