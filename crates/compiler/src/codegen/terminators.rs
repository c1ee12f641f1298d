//! Block preambles and terminators
//!
//! Control-flow structure is entirely encoded in the CFG edges. For each
//! block the emitter first runs the aux preamble (loop init/increment,
//! FOR EACH element fetch, exception pushes and pops), then the
//! statements, then a terminator selected from the outgoing edges:
//! unconditional `jmp`, conditional `jnz` (integer condition, doubles
//! truncated first), `ret`, or an explicit `jmp` standing in for
//! fallthrough.

use super::exprs::LValue;
use super::state::Value;
use super::{CodeGen, CodeGenError};
use crate::ast::{BinOp, CaseLabel, ExprId, ParsedType};
use crate::cfg::{BlockAux, BlockKind, Cfg, EdgeKind, LoopInfo};
use crate::types::{BaseType, TypeDesc};
use std::fmt::Write as _;

impl<'a> CodeGen<'a> {
    /// Hidden-slot names for counted loops.
    pub(super) fn for_end_slot(id: usize) -> String {
        format!("%for.end.{}", id)
    }
    pub(super) fn for_step_slot(id: usize) -> String {
        format!("%for.step.{}", id)
    }
    pub(super) fn fe_list_slot(id: usize) -> String {
        format!("%fe.list.{}", id)
    }
    pub(super) fn fe_idx_slot(id: usize) -> String {
        format!("%fe.idx.{}", id)
    }
    pub(super) fn fe_len_slot(id: usize) -> String {
        format!("%fe.len.{}", id)
    }
    pub(super) fn select_slot(id: u32) -> String {
        format!("%sel.{}", id)
    }

    pub(super) fn emit_block_preamble(
        &mut self,
        cfg: &Cfg,
        block: usize,
    ) -> Result<(), CodeGenError> {
        let aux = cfg.blocks[block].aux.clone();
        let kind = cfg.blocks[block].kind;
        match aux {
            BlockAux::Loop(id) => match kind {
                BlockKind::Normal => self.emit_loop_init(cfg, id),
                BlockKind::LoopIncrement => self.emit_loop_increment(cfg, id),
                BlockKind::LoopBody => self.emit_loop_body_preamble(cfg, id),
                _ => Ok(()), // header handled by the terminator
            },
            BlockAux::SelectInit {
                select_id,
                selector,
            } => self.emit_select_init(select_id, selector),
            BlockAux::MatchBind {
                subject,
                arm_ty,
                binding,
            } => self.emit_match_bind(subject, &arm_ty, &binding),
            BlockAux::ExceptionPop => {
                writeln!(&mut self.output, "\tcall $basic_exception_pop()")?;
                Ok(())
            }
            BlockAux::GosubSite { site } => {
                writeln!(&mut self.output, "\tcall $gosub_push(w {})", site)?;
                Ok(())
            }
            BlockAux::Rethrow => {
                let e = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w call $basic_err()", e)?;
                let l = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w call $basic_erl()", l)?;
                writeln!(&mut self.output, "\tcall $basic_throw(w {}, w {})", e, l)?;
                writeln!(&mut self.output, "\thlt")?;
                self.block_done = true;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub(super) fn emit_terminator(&mut self, cfg: &Cfg, block: usize) -> Result<(), CodeGenError> {
        if self.block_done {
            return Ok(());
        }
        let aux = cfg.blocks[block].aux.clone();
        match aux {
            BlockAux::TryEntry => return self.emit_try_entry(cfg, block),
            BlockAux::CaseTest { select_id, label } => {
                return self.emit_case_test(cfg, block, select_id, &label);
            }
            BlockAux::MatchTest { subject, arm_ty } => {
                return self.emit_match_test(cfg, block, subject, &arm_ty);
            }
            BlockAux::CatchTest { code } => return self.emit_catch_test(cfg, block, code),
            BlockAux::OnBranch {
                selector,
                gosub,
                site,
            } => return self.emit_on_branch(cfg, block, selector, gosub, site),
            BlockAux::GosubReturn => return self.emit_gosub_return(cfg, block),
            _ => {}
        }

        if cfg.blocks[block].kind == BlockKind::LoopHeader {
            if let BlockAux::Loop(id) = cfg.blocks[block].aux {
                return self.emit_loop_header(cfg, block, id);
            }
        }

        if let Some(cond) = cfg.blocks[block].branch_cond {
            let (true_to, false_to, invert) = match cfg.blocks[block].aux {
                BlockAux::LoopCond { invert } => (
                    cfg.edge_target(block, EdgeKind::BranchTrue),
                    cfg.edge_target(block, EdgeKind::BranchFalse),
                    invert,
                ),
                BlockAux::PostCond { invert } => (
                    cfg.edge_target(block, EdgeKind::BackEdge),
                    cfg.edge_target(block, EdgeKind::LoopExit),
                    invert,
                ),
                _ => (
                    cfg.edge_target(block, EdgeKind::BranchTrue),
                    cfg.edge_target(block, EdgeKind::BranchFalse),
                    false,
                ),
            };
            let (true_to, false_to) = (
                true_to.ok_or("conditional block without a true edge")?,
                false_to.ok_or("conditional block without a false edge")?,
            );
            let mut c = self.cond_int(cond)?;
            if invert {
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w ceqw {}, 0", t, c)?;
                c = t;
            }
            writeln!(
                &mut self.output,
                "\tjnz {}, {}, {}",
                c,
                Self::block_label(cfg, true_to),
                Self::block_label(cfg, false_to)
            )?;
            return Ok(());
        }

        // Unconditional: a single outgoing edge, emitted as explicit jmp
        let mut edges = cfg.out_edges(block);
        match (edges.next(), edges.next()) {
            (Some(e), None) => {
                writeln!(&mut self.output, "\tjmp {}", Self::block_label(cfg, e.to))?;
                Ok(())
            }
            (None, None) if block == cfg.exit => Ok(()),
            (None, None) => Err(CodeGenError::Logic(format!(
                "block {} has no terminator",
                block
            ))),
            _ => Err(CodeGenError::Logic(format!(
                "block {} has an ambiguous edge set",
                block
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Counted loops
    // ------------------------------------------------------------------

    fn emit_loop_init(&mut self, cfg: &Cfg, id: usize) -> Result<(), CodeGenError> {
        match cfg.loops[id].clone() {
            LoopInfo::For {
                var, start, end, step,
            } => {
                // FOR runs integer arithmetic; doubles truncate at init.
                // End and step evaluate once, into hidden slots.
                let s = self.to_int(start)?;
                let var_lv = LValue::Place(self.resolve_var(&var)?);
                let v = Value::new(s, TypeDesc::integer());
                self.store_raw(&var_lv, &v)?;
                let e = self.to_int(end)?;
                writeln!(&mut self.output, "\tstorew {}, {}", e, Self::for_end_slot(id))?;
                let st = match step {
                    Some(se) => self.to_int(se)?,
                    None => "1".to_string(),
                };
                writeln!(
                    &mut self.output,
                    "\tstorew {}, {}",
                    st,
                    Self::for_step_slot(id)
                )?;
                Ok(())
            }
            LoopInfo::ForEach { list, .. } => {
                let l = self.emit_expr(list)?;
                writeln!(
                    &mut self.output,
                    "\tstorel {}, {}",
                    l.repr,
                    Self::fe_list_slot(id)
                )?;
                writeln!(&mut self.output, "\tstorew 0, {}", Self::fe_idx_slot(id))?;
                let len = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =w call $list_length(l {})",
                    len, l.repr
                )?;
                writeln!(
                    &mut self.output,
                    "\tstorew {}, {}",
                    len,
                    Self::fe_len_slot(id)
                )?;
                Ok(())
            }
        }
    }

    /// FOR header: direction-checked continue condition. The stored step
    /// sign selects between `var <= end` and `var >= end`, combined with
    /// bitwise ops so the test stays branch-free.
    fn emit_loop_header(&mut self, cfg: &Cfg, block: usize, id: usize) -> Result<(), CodeGenError> {
        let true_to = cfg
            .edge_target(block, EdgeKind::BranchTrue)
            .ok_or("loop header without a body edge")?;
        let false_to = cfg
            .edge_target(block, EdgeKind::BranchFalse)
            .ok_or("loop header without an exit edge")?;
        let cont = match cfg.loops[id].clone() {
            LoopInfo::For { var, .. } => {
                let place = self.resolve_var(&var)?;
                let v = self.load_place(&place)?;
                let v = self.convert(v, &TypeDesc::integer())?;
                let end = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w loadw {}", end, Self::for_end_slot(id))?;
                let step = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =w loadw {}",
                    step,
                    Self::for_step_slot(id)
                )?;
                let neg = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w csltw {}, 0", neg, step)?;
                let le = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w cslew {}, {}", le, v.repr, end)?;
                let ge = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w csgew {}, {}", ge, v.repr, end)?;
                // cont = neg ? ge : le  ==  (neg & ge) | ((neg ^ 1) & le)
                let down = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w and {}, {}", down, neg, ge)?;
                let pos = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w xor {}, 1", pos, neg)?;
                let up = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w and {}, {}", up, pos, le)?;
                let cont = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w or {}, {}", cont, down, up)?;
                cont
            }
            LoopInfo::ForEach { .. } => {
                let idx = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w loadw {}", idx, Self::fe_idx_slot(id))?;
                let len = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w loadw {}", len, Self::fe_len_slot(id))?;
                let cont = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w csltw {}, {}", cont, idx, len)?;
                cont
            }
        };
        writeln!(
            &mut self.output,
            "\tjnz {}, {}, {}",
            cont,
            Self::block_label(cfg, true_to),
            Self::block_label(cfg, false_to)
        )?;
        Ok(())
    }

    fn emit_loop_increment(&mut self, cfg: &Cfg, id: usize) -> Result<(), CodeGenError> {
        match cfg.loops[id].clone() {
            LoopInfo::For { var, .. } => {
                let place = self.resolve_var(&var)?;
                let v = self.load_place(&place)?;
                let v = self.convert(v, &TypeDesc::integer())?;
                let step = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =w loadw {}",
                    step,
                    Self::for_step_slot(id)
                )?;
                let next = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w add {}, {}", next, v.repr, step)?;
                let lv = LValue::Place(self.resolve_var(&var)?);
                let nv = Value::new(next, TypeDesc::integer());
                self.store_raw(&lv, &nv)
            }
            LoopInfo::ForEach { .. } => {
                let idx = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w loadw {}", idx, Self::fe_idx_slot(id))?;
                let next = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w add {}, 1", next, idx)?;
                writeln!(
                    &mut self.output,
                    "\tstorew {}, {}",
                    next,
                    Self::fe_idx_slot(id)
                )?;
                Ok(())
            }
        }
    }

    /// FOR EACH body entry: fetch the current atom and bind the element
    /// variable. ANY elements copy tag and payload into the variable's
    /// twin slots; typed elements load the payload with the element
    /// type's load instruction.
    fn emit_loop_body_preamble(&mut self, cfg: &Cfg, id: usize) -> Result<(), CodeGenError> {
        let LoopInfo::ForEach { tag_var, var, list } = cfg.loops[id].clone() else {
            return Ok(());
        };
        let elem_ty = self
            .analysis
            .expr_type(list)
            .element
            .as_deref()
            .cloned()
            .unwrap_or_else(TypeDesc::unknown);

        let lp = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =l loadl {}", lp, Self::fe_list_slot(id))?;
        let idx = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =w loadw {}", idx, Self::fe_idx_slot(id))?;
        let atom = self.fresh_temp();
        writeln!(
            &mut self.output,
            "\t{} =l call $list_get_ptr(l {}, w {})",
            atom, lp, idx
        )?;
        let tag = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =l loadl {}", tag, atom)?;
        let vaddr = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =l add {}, 8", vaddr, atom)?;

        let place = self.resolve_var(&var)?;
        let slot = self.place_addr(&place)?;
        if slot.ty.base == BaseType::Unknown {
            let tag_addr = slot
                .tag_addr
                .clone()
                .ok_or("ANY element variable without a tag slot")?;
            let bits = self.fresh_temp();
            writeln!(&mut self.output, "\t{} =l loadl {}", bits, vaddr)?;
            writeln!(&mut self.output, "\tstorel {}, {}", tag, tag_addr)?;
            writeln!(&mut self.output, "\tstorel {}, {}", bits, slot.addr)?;
        } else {
            let v = self.fresh_temp();
            writeln!(
                &mut self.output,
                "\t{} ={} {} {}",
                v,
                slot.ty.base.abi(),
                elem_ty.base.load_op(),
                vaddr
            )?;
            writeln!(
                &mut self.output,
                "\t{} {}, {}",
                slot.ty.base.store_op(),
                v,
                slot.addr
            )?;
        }
        if let Some(tv) = tag_var {
            let place = self.resolve_var(&tv)?;
            let slot = self.place_addr(&place)?;
            let w = self.fresh_temp();
            writeln!(&mut self.output, "\t{} =w copy {}", w, tag)?;
            writeln!(&mut self.output, "\tstorew {}, {}", w, slot.addr)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // SELECT CASE
    // ------------------------------------------------------------------

    fn emit_select_init(&mut self, select_id: u32, selector: ExprId) -> Result<(), CodeGenError> {
        let v = self.emit_expr(selector)?;
        let ty = v.ty.clone();
        writeln!(
            &mut self.output,
            "\t{} {}, {}",
            ty.base.store_op(),
            v.repr,
            Self::select_slot(select_id)
        )?;
        self.select_types.insert(select_id, ty);
        Ok(())
    }

    fn load_selector(&mut self, select_id: u32) -> Result<Value, CodeGenError> {
        let ty = self
            .select_types
            .get(&select_id)
            .cloned()
            .unwrap_or_else(TypeDesc::integer);
        let t = self.fresh_temp();
        writeln!(
            &mut self.output,
            "\t{} ={} {} {}",
            t,
            ty.base.abi(),
            ty.base.load_op(),
            Self::select_slot(select_id)
        )?;
        Ok(Value::new(t, ty))
    }

    fn emit_case_test(
        &mut self,
        cfg: &Cfg,
        block: usize,
        select_id: u32,
        label: &CaseLabel,
    ) -> Result<(), CodeGenError> {
        let match_to = cfg
            .edge_target(block, EdgeKind::CaseMatch)
            .ok_or("case test without a match edge")?;
        let next_to = cfg
            .edge_target(block, EdgeKind::CaseNext)
            .ok_or("case test without a next edge")?;
        let cond = match label {
            CaseLabel::Expr(e) => {
                let sel = self.load_selector(select_id)?;
                let rhs = self.emit_expr(*e)?;
                self.compare_values(BinOp::Eq, sel, rhs)?
            }
            CaseLabel::Rel(op, e) => {
                let sel = self.load_selector(select_id)?;
                let rhs = self.emit_expr(*e)?;
                self.compare_values(*op, sel, rhs)?
            }
            CaseLabel::Range(lo, hi) => {
                let sel = self.load_selector(select_id)?;
                let lo_v = self.emit_expr(*lo)?;
                let ge = self.compare_values(BinOp::Ge, sel.clone(), lo_v)?;
                let hi_v = self.emit_expr(*hi)?;
                let le = self.compare_values(BinOp::Le, sel, hi_v)?;
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w and {}, {}", t, ge.repr, le.repr)?;
                Value::new(t, TypeDesc::integer())
            }
        };
        writeln!(
            &mut self.output,
            "\tjnz {}, {}, {}",
            cond.repr,
            Self::block_label(cfg, match_to),
            Self::block_label(cfg, next_to)
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // MATCH TYPE
    // ------------------------------------------------------------------

    pub(super) fn match_arm_type(&self, arm_ty: &ParsedType) -> TypeDesc {
        match arm_ty {
            ParsedType::Base(b) => TypeDesc::scalar(*b),
            ParsedType::Named(n) => TypeDesc::class(n.clone()),
            ParsedType::ListOf(_) => TypeDesc::list_of(TypeDesc::unknown()),
            _ => TypeDesc::unknown(),
        }
    }

    fn emit_match_test(
        &mut self,
        cfg: &Cfg,
        block: usize,
        subject: ExprId,
        arm_ty: &ParsedType,
    ) -> Result<(), CodeGenError> {
        let match_to = cfg
            .edge_target(block, EdgeKind::CaseMatch)
            .ok_or("match test without a match edge")?;
        let next_to = cfg
            .edge_target(block, EdgeKind::CaseNext)
            .ok_or("match test without a next edge")?;
        let tag_const = self
            .match_arm_type(arm_ty)
            .atom_tag()
            .ok_or("match arm type has no runtime tag")?;
        let subject_name = self.subject_var_name(subject)?;
        let place = self.resolve_var(&subject_name)?;
        let slot = self.place_addr(&place)?;
        let tag_addr = slot
            .tag_addr
            .clone()
            .ok_or("MATCH TYPE subject without a tag slot")?;
        let tag = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =l loadl {}", tag, tag_addr)?;
        let c = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =w ceql {}, {}", c, tag, tag_const)?;
        writeln!(
            &mut self.output,
            "\tjnz {}, {}, {}",
            c,
            Self::block_label(cfg, match_to),
            Self::block_label(cfg, next_to)
        )?;
        Ok(())
    }

    /// The fused typed load: the arm's tag test (above) and this load
    /// use the same arm type, so tag and load instruction cannot
    /// desynchronize.
    fn emit_match_bind(
        &mut self,
        subject: ExprId,
        arm_ty: &ParsedType,
        binding: &str,
    ) -> Result<(), CodeGenError> {
        let ty = self.match_arm_type(arm_ty);
        let subject_name = self.subject_var_name(subject)?;
        let place = self.resolve_var(&subject_name)?;
        let slot = self.place_addr(&place)?;

        let bind_place = self.resolve_var(binding)?;
        let bind_slot = self.place_addr(&bind_place)?;
        let v = self.fresh_temp();
        writeln!(
            &mut self.output,
            "\t{} ={} {} {}",
            v,
            ty.base.abi(),
            ty.base.load_op(),
            slot.addr
        )?;
        writeln!(
            &mut self.output,
            "\t{} {}, {}",
            ty.base.store_op(),
            v,
            bind_slot.addr
        )?;
        Ok(())
    }

    fn subject_var_name(&self, subject: ExprId) -> Result<String, CodeGenError> {
        match &self.ast.expr(subject).kind {
            crate::ast::ExprKind::Variable { name } => Ok(name.clone()),
            _ => Err("MATCH TYPE subject must be a variable".into()),
        }
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    /// TRY entry: the setjmp call comes straight from generated IR and
    /// the conditional branch on its return value is the immediately
    /// following instruction. Never wrap either in a helper.
    fn emit_try_entry(&mut self, cfg: &Cfg, block: usize) -> Result<(), CodeGenError> {
        let body_to = cfg
            .edge_target(block, EdgeKind::Fallthrough)
            .ok_or("try entry without a body edge")?;
        let catch_to = cfg
            .edge_target(block, EdgeKind::Exception)
            .ok_or("try entry without an exception edge")?;
        let ctx = self.fresh_temp();
        writeln!(
            &mut self.output,
            "\t{} =l call $basic_exception_push()",
            ctx
        )?;
        let rc = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =w call $setjmp(l {})", rc, ctx)?;
        writeln!(
            &mut self.output,
            "\tjnz {}, {}, {}",
            rc,
            Self::block_label(cfg, catch_to),
            Self::block_label(cfg, body_to)
        )?;
        Ok(())
    }

    fn emit_catch_test(
        &mut self,
        cfg: &Cfg,
        block: usize,
        code: Option<ExprId>,
    ) -> Result<(), CodeGenError> {
        let match_to = cfg
            .edge_target(block, EdgeKind::CaseMatch)
            .ok_or("catch test without a match edge")?;
        let code = code.ok_or("conditional catch test without a code")?;
        let next_to = cfg
            .edge_target(block, EdgeKind::CaseNext)
            .ok_or("catch test without a next edge")?;
        let err = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =w call $basic_err()", err)?;
        let want = self.to_int(code)?;
        let c = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =w ceqw {}, {}", c, err, want)?;
        writeln!(
            &mut self.output,
            "\tjnz {}, {}, {}",
            c,
            Self::block_label(cfg, match_to),
            Self::block_label(cfg, next_to)
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Computed branches
    // ------------------------------------------------------------------

    /// ON n GOTO/GOSUB: bounds-checked compare sequence; an out-of-range
    /// selector falls through to the statement after ON.
    fn emit_on_branch(
        &mut self,
        cfg: &Cfg,
        block: usize,
        selector: ExprId,
        gosub: bool,
        site: Option<u32>,
    ) -> Result<(), CodeGenError> {
        let targets: Vec<usize> = cfg
            .out_edges(block)
            .filter(|e| e.kind == EdgeKind::ComputedBranch)
            .map(|e| e.to)
            .collect();
        let fallthrough = cfg
            .edge_target(block, EdgeKind::Fallthrough)
            .ok_or("computed branch without a continuation")?;
        let sel = self.cond_int(selector)?;
        for (i, &target) in targets.iter().enumerate() {
            let c = self.fresh_temp();
            writeln!(&mut self.output, "\t{} =w ceqw {}, {}", c, sel, i + 1)?;
            let next = self.fresh_label("on.next");
            if gosub {
                let take = self.fresh_label("on.take");
                writeln!(&mut self.output, "\tjnz {}, {}, {}", c, take, next)?;
                self.emit_label(&take)?;
                let site = site.ok_or("ON GOSUB without a resume site")?;
                writeln!(&mut self.output, "\tcall $gosub_push(w {})", site)?;
                writeln!(&mut self.output, "\tjmp {}", Self::block_label(cfg, target))?;
            } else {
                writeln!(
                    &mut self.output,
                    "\tjnz {}, {}, {}",
                    c,
                    Self::block_label(cfg, target),
                    next
                )?;
            }
            self.emit_label(&next)?;
        }
        writeln!(
            &mut self.output,
            "\tjmp {}",
            Self::block_label(cfg, fallthrough)
        )?;
        Ok(())
    }

    /// RETURN in the main program: pop the resume index pushed by the
    /// matching GOSUB and branch back to its site.
    fn emit_gosub_return(&mut self, cfg: &Cfg, block: usize) -> Result<(), CodeGenError> {
        let resumes: Vec<usize> = cfg
            .out_edges(block)
            .filter(|e| e.kind == EdgeKind::GosubReturn)
            .map(|e| e.to)
            .collect();
        let exit_to = cfg
            .edge_target(block, EdgeKind::Exit)
            .ok_or("gosub return without an exit fallback")?;
        let idx = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =w call $gosub_pop()", idx)?;
        for (k, &resume) in resumes.iter().enumerate() {
            let c = self.fresh_temp();
            writeln!(&mut self.output, "\t{} =w ceqw {}, {}", c, idx, k)?;
            let next = self.fresh_label("gr.next");
            writeln!(
                &mut self.output,
                "\tjnz {}, {}, {}",
                c,
                Self::block_label(cfg, resume),
                next
            )?;
            self.emit_label(&next)?;
        }
        writeln!(&mut self.output, "\tjmp {}", Self::block_label(cfg, exit_to))?;
        Ok(())
    }
}
