//! Statement emission
//!
//! Leaf statements emit instructions directly into the current block;
//! control flow is entirely the CFG's business (see terminators.rs).

use super::exprs::{LValue, VarPlace};
use super::state::{SAMM_KIND_ARRAY_DESC, Value, abi_of, func_sym, is_string};
use super::{CodeGen, CodeGenError};
use crate::ast::{ExitKind, ExprId, PrintArgs, PrintSep, StmtId, StmtKind, VarDecl};
use crate::types::{BaseType, TypeDesc};
use std::fmt::Write as _;

impl<'a> CodeGen<'a> {
    pub(super) fn emit_stmt(&mut self, sid: StmtId) -> Result<(), CodeGenError> {
        let stmt = self.ast.stmt(sid);
        let line = stmt.loc.line;
        if line != self.last_line {
            writeln!(&mut self.output, "\tcall $basic_set_line(w {})", line)?;
            self.last_line = line;
        }
        match &self.ast.stmt(sid).kind {
            StmtKind::Print(args) => {
                let args = args.clone();
                self.emit_print(&args, "print")
            }
            StmtKind::Console(args) => {
                let args = args.clone();
                self.emit_print(&args, "console")
            }
            StmtKind::Let { target, value } => {
                let (target, value) = (*target, *value);
                self.emit_assign(target, value, false)
            }
            StmtKind::Dim { decls } | StmtKind::Local { decls } => {
                let decls = decls.clone();
                for d in &decls {
                    self.emit_var_decl(d)?;
                }
                Ok(())
            }
            StmtKind::Redim { name, dims } => {
                let (name, dims) = (name.clone(), dims.clone());
                let desc = self.array_desc_addr(&name)?;
                writeln!(&mut self.output, "\tcall $array_erase(l {})", desc)?;
                self.emit_array_create(&name, &dims)
            }
            StmtKind::Inc { target, amount } | StmtKind::Dec { target, amount } => {
                let negate = matches!(self.ast.stmt(sid).kind, StmtKind::Dec { .. });
                let (target, amount) = (*target, *amount);
                self.emit_inc_dec(target, amount, negate)
            }
            StmtKind::Swap { a, b } => {
                let (a, b) = (*a, *b);
                let lva = self.emit_lvalue(a)?;
                let lvb = self.emit_lvalue(b)?;
                let va = self.load_lvalue(&lva)?;
                let vb = self.load_lvalue(&lvb)?;
                // Pointer/value swap; refcounts are unchanged net
                self.store_raw(&lva, &vb)?;
                self.store_raw(&lvb, &va)?;
                Ok(())
            }
            StmtKind::Call { name, args } => {
                let (name, args) = (name.clone(), args.clone());
                self.emit_call(&name, &args).map(|_| ())
            }
            StmtKind::CallMethod { call } => {
                let call = *call;
                self.emit_expr(call).map(|_| ())
            }
            StmtKind::Throw { code, line: lexpr } => {
                let (code, lexpr) = (*code, *lexpr);
                let c = self.to_int(code)?;
                let l = match lexpr {
                    Some(e) => self.to_int(e)?,
                    None => format!("{}", line),
                };
                writeln!(&mut self.output, "\tcall $basic_throw(w {}, w {})", c, l)?;
                Ok(())
            }
            StmtKind::Read { targets } => {
                let targets = targets.clone();
                for &t in &targets {
                    self.emit_read_target(t)?;
                }
                Ok(())
            }
            StmtKind::Restore { index } => {
                let idx = match index {
                    Some(e) => {
                        let e = *e;
                        self.to_int(e)?
                    }
                    None => "0".to_string(),
                };
                writeln!(&mut self.output, "\tcall $basic_data_restore(w {})", idx)?;
                Ok(())
            }
            StmtKind::Input { prompt, targets } => {
                let (prompt, targets) = (prompt.clone(), targets.clone());
                self.emit_input(prompt.as_deref(), &targets)
            }
            StmtKind::Delete { target } => {
                let target = *target;
                self.emit_delete(target)
            }
            StmtKind::Worker { name, func, args } => {
                let (name, func, args) = (name.clone(), func.clone(), args.clone());
                self.emit_worker(&name, &func, &args)
            }
            StmtKind::Await { worker, target } => {
                let (worker, target) = (worker.clone(), *target);
                self.emit_await(&worker, target)
            }
            StmtKind::Return { value } => {
                let value = *value;
                self.emit_function_return(value)
            }
            StmtKind::Exit {
                kind: ExitKind::Function | ExitKind::Sub,
            } => self.emit_function_return(None),
            StmtKind::End => {
                if self.scope_key.is_some() {
                    writeln!(&mut self.output, "\tcall $basic_end()")?;
                }
                Ok(())
            }
            other => Err(CodeGenError::Logic(format!(
                "control-flow statement {:?} reached leaf emission",
                std::mem::discriminant(other)
            ))),
        }
    }

    // ------------------------------------------------------------------
    // PRINT / CONSOLE
    // ------------------------------------------------------------------

    fn emit_print(&mut self, args: &PrintArgs, family: &str) -> Result<(), CodeGenError> {
        for item in &args.items {
            let v = self.emit_expr(item.expr)?;
            match v.ty.base {
                BaseType::Str => {
                    writeln!(
                        &mut self.output,
                        "\tcall ${}_string(l {})",
                        family, v.repr
                    )?;
                }
                BaseType::Single | BaseType::Double => {
                    let v = self.convert(v, &TypeDesc::double())?;
                    writeln!(
                        &mut self.output,
                        "\tcall ${}_double(d {})",
                        family, v.repr
                    )?;
                }
                BaseType::Long | BaseType::ULong => {
                    writeln!(&mut self.output, "\tcall ${}_long(l {})", family, v.repr)?;
                }
                _ => {
                    writeln!(&mut self.output, "\tcall ${}_int(w {})", family, v.repr)?;
                }
            }
            if item.sep == Some(PrintSep::Comma) {
                writeln!(&mut self.output, "\tcall ${}_tab()", family)?;
            }
        }
        if !args.trailing_sep {
            writeln!(&mut self.output, "\tcall ${}_newline()", family)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    /// Assignment with the string reference discipline:
    /// retain(new) -> load(old) -> store(new) -> release(old), making
    /// self-assignment safe. `initial` skips the old-value release for
    /// first binds (DIM initializers).
    pub(super) fn emit_assign(
        &mut self,
        target: ExprId,
        value: ExprId,
        initial: bool,
    ) -> Result<(), CodeGenError> {
        // Whole-array assignment bypasses the scalar path entirely
        if let crate::ast::ExprKind::Variable { name } = &self.ast.expr(target).kind
            && self.resolve_var(name).is_err()
            && self.lookup_array_info(name).is_some()
        {
            let name = name.clone();
            return self.emit_array_assign(&name, value);
        }
        let lv = self.emit_lvalue(target)?;
        let v = self.emit_expr(value)?;
        self.store_value(&lv, v, initial)
    }

    /// `A = B <op> C` over arrays: one elementwise runtime call.
    /// `A = B` is the copy form (opcode 0).
    fn emit_array_assign(&mut self, name: &str, value: ExprId) -> Result<(), CodeGenError> {
        let dst = self.array_desc_addr(name)?;
        match &self.ast.expr(value).kind {
            crate::ast::ExprKind::Binary { op, lhs, rhs } => {
                let opcode = match op {
                    crate::ast::BinOp::Add => 1,
                    crate::ast::BinOp::Sub => 2,
                    crate::ast::BinOp::Mul => 3,
                    crate::ast::BinOp::Div => 4,
                    other => {
                        return Err(CodeGenError::Logic(format!(
                            "unsupported whole-array operator {:?}",
                            other
                        )));
                    }
                };
                let (lhs, rhs) = (*lhs, *rhs);
                let a = self.emit_expr(lhs)?;
                let b = self.emit_expr(rhs)?;
                writeln!(
                    &mut self.output,
                    "\tcall $array_binop(w {}, l {}, l {}, l {})",
                    opcode, dst, a.repr, b.repr
                )?;
                Ok(())
            }
            _ => {
                let src = self.emit_expr(value)?;
                writeln!(
                    &mut self.output,
                    "\tcall $array_binop(w 0, l {}, l {}, l {})",
                    dst, src.repr, src.repr
                )?;
                Ok(())
            }
        }
    }

    pub(super) fn store_value(
        &mut self,
        lv: &LValue,
        v: Value,
        initial: bool,
    ) -> Result<(), CodeGenError> {
        let target_ty = self.lvalue_type(lv);

        // ANY-typed destinations store tag and payload together
        if target_ty.base == BaseType::Unknown {
            return self.store_any(lv, v);
        }

        // UDT copy is a block transfer
        if target_ty.base == BaseType::UserDefined {
            let size = target_ty
                .object_name
                .as_deref()
                .and_then(|n| self.analysis.symbols.lookup_udt(n))
                .map(|u| u.size)
                .unwrap_or(0);
            let dst = self.lvalue_addr(lv)?;
            writeln!(&mut self.output, "\tblit {}, {}, {}", v.repr, dst, size)?;
            return Ok(());
        }

        let v = if target_ty.base.is_numeric() && v.ty.base.is_numeric() {
            self.convert(v, &target_ty)?
        } else {
            v
        };

        if is_string(&target_ty) && v.ty.base == BaseType::Str {
            writeln!(&mut self.output, "\tcall $string_retain(l {})", v.repr)?;
            if initial {
                self.store_raw(lv, &v)?;
            } else {
                let old = self.load_lvalue(lv)?;
                self.store_raw(lv, &v)?;
                writeln!(&mut self.output, "\tcall $string_release(l {})", old.repr)?;
            }
            return Ok(());
        }

        self.store_raw(lv, &v)
    }

    /// Copy an ANY value (tag + payload) or a typed value (constant tag)
    /// into an ANY destination.
    fn store_any(&mut self, lv: &LValue, v: Value) -> Result<(), CodeGenError> {
        let (val_addr, tag_addr) = self.any_slot_addrs(lv)?;
        match v.tag_operand() {
            Some(tag) => {
                let tag = tag.to_string();
                writeln!(&mut self.output, "\tstorel {}, {}", tag, tag_addr)?;
                writeln!(&mut self.output, "\tstorel {}, {}", v.repr, val_addr)?;
            }
            None => {
                let (tag, bits) = self.pack_atom(v)?;
                writeln!(&mut self.output, "\tstorel {}, {}", tag, tag_addr)?;
                writeln!(&mut self.output, "\tstorel {}, {}", bits, val_addr)?;
            }
        }
        Ok(())
    }

    fn any_slot_addrs(&mut self, lv: &LValue) -> Result<(String, String), CodeGenError> {
        match lv {
            LValue::Place(p) => {
                let slot = self.place_addr(p)?;
                let tag = slot
                    .tag_addr
                    .clone()
                    .ok_or("ANY-typed location without a tag slot")?;
                Ok((slot.addr, tag))
            }
            LValue::Mem { .. } => Err("ANY values live in variables only".into()),
        }
    }

    fn lvalue_type(&self, lv: &LValue) -> TypeDesc {
        match lv {
            LValue::Place(VarPlace::Slot(s)) => s.ty.clone(),
            LValue::Place(VarPlace::MeField { ty, .. }) => ty.clone(),
            LValue::Place(VarPlace::Result) => self.fn_ret.clone(),
            LValue::Mem { ty, .. } => ty.clone(),
        }
    }

    fn lvalue_addr(&mut self, lv: &LValue) -> Result<String, CodeGenError> {
        match lv {
            LValue::Place(p) => Ok(self.place_addr(p)?.addr),
            LValue::Mem { addr, .. } => Ok(addr.clone()),
        }
    }

    /// Plain typed store, no refcount traffic.
    pub(super) fn store_raw(&mut self, lv: &LValue, v: &Value) -> Result<(), CodeGenError> {
        let ty = self.lvalue_type(lv);
        let addr = self.lvalue_addr(lv)?;
        writeln!(
            &mut self.output,
            "\t{} {}, {}",
            ty.base.store_op(),
            v.repr,
            addr
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // DIM / LOCAL
    // ------------------------------------------------------------------

    fn emit_var_decl(&mut self, d: &VarDecl) -> Result<(), CodeGenError> {
        if !d.dims.is_empty() {
            self.emit_array_create(&d.name, &d.dims)?;
            return Ok(());
        }
        let lv = LValue::Place(self.resolve_var(&d.name)?);
        let ty = self.lvalue_type(&lv);

        match d.init {
            Some(init) => {
                let v = self.emit_expr(init)?;
                self.store_value(&lv, v, true)?;
            }
            None => match ty.base {
                BaseType::List => {
                    let tag = ty
                        .element
                        .as_deref()
                        .and_then(|e| e.atom_tag())
                        .unwrap_or(0);
                    let t = self.fresh_temp();
                    writeln!(&mut self.output, "\t{} =l call $list_new(w {})", t, tag)?;
                    let v = Value::new(t, ty.clone());
                    self.store_raw(&lv, &v)?;
                }
                BaseType::Hashmap => {
                    let t = self.fresh_temp();
                    writeln!(&mut self.output, "\t{} =l call $hashmap_new()", t)?;
                    let v = Value::new(t, ty.clone());
                    self.store_raw(&lv, &v)?;
                }
                // Scalars are already zeroed: globals by the data
                // section, locals by the prologue
                _ => {}
            },
        }
        Ok(())
    }

    fn emit_array_create(&mut self, name: &str, dims: &[ExprId]) -> Result<(), CodeGenError> {
        let info = self
            .lookup_array_info(name)
            .ok_or_else(|| format!("unresolved array {}", name))?;
        let desc = self.array_desc_addr(name)?;
        let elem_tag = info.element.atom_tag().unwrap_or(0);
        let elem_size = info.element.base.size().max(1);
        let base = self.analysis.option_base;

        // Extent of each declared bound, then the row-major total
        let mut extents = Vec::new();
        for &d in dims {
            let bound = self.to_int(d)?;
            let extent = self.fresh_temp();
            writeln!(
                &mut self.output,
                "\t{} =w add {}, {}",
                extent,
                bound,
                1 - base as i64
            )?;
            extents.push(extent);
        }
        let mut total = extents[0].clone();
        for e in &extents[1..] {
            let t = self.fresh_temp();
            writeln!(&mut self.output, "\t{} =w mul {}, {}", t, total, e)?;
            total = t;
        }
        writeln!(
            &mut self.output,
            "\tcall $array_create(l {}, w {}, w {}, w {})",
            desc, elem_tag, elem_size, total
        )?;
        for (i, e) in extents.iter().enumerate() {
            writeln!(
                &mut self.output,
                "\tcall $array_set_extent(l {}, w {}, w {})",
                desc, i, e
            )?;
        }
        writeln!(
            &mut self.output,
            "\tcall $samm_track(l {}, w {})",
            desc, SAMM_KIND_ARRAY_DESC
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Misc statements
    // ------------------------------------------------------------------

    fn emit_inc_dec(
        &mut self,
        target: ExprId,
        amount: Option<ExprId>,
        negate: bool,
    ) -> Result<(), CodeGenError> {
        let lv = self.emit_lvalue(target)?;
        let cur = self.load_lvalue(&lv)?;
        let ty = cur.ty.clone();
        let amt = match amount {
            Some(a) => {
                let v = self.emit_expr(a)?;
                self.convert(v, &ty)?.repr
            }
            None => match abi_of(&ty) {
                'd' => "d_1.0".to_string(),
                's' => "s_1.0".to_string(),
                _ => "1".to_string(),
            },
        };
        let t = self.fresh_temp();
        let op = if negate { "sub" } else { "add" };
        writeln!(
            &mut self.output,
            "\t{} ={} {} {}, {}",
            t,
            abi_of(&ty),
            op,
            cur.repr,
            amt
        )?;
        let v = Value::new(t, ty);
        self.store_raw(&lv, &v)
    }

    fn emit_read_target(&mut self, target: ExprId) -> Result<(), CodeGenError> {
        let lv = self.emit_lvalue(target)?;
        let ty = self.lvalue_type(&lv);
        if ty.base == BaseType::Str {
            let t = self.fresh_temp();
            writeln!(&mut self.output, "\t{} =l call $basic_data_read_string()", t)?;
            let v = Value::new(t, TypeDesc::string());
            return self.store_value(&lv, v, false);
        }
        let t = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =d call $basic_data_read_number()", t)?;
        let v = Value::new(t, TypeDesc::double());
        let v = self.convert(v, &ty)?;
        self.store_raw(&lv, &v)
    }

    fn emit_input(
        &mut self,
        prompt: Option<&str>,
        targets: &[ExprId],
    ) -> Result<(), CodeGenError> {
        let mut prompt_arg = match prompt {
            Some(p) => self.get_string_global(p)?,
            None => "0".to_string(),
        };
        for &target in targets {
            let lv = self.emit_lvalue(target)?;
            let ty = self.lvalue_type(&lv);
            if ty.base == BaseType::Str {
                let t = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =l call $input_string(l {})",
                    t, prompt_arg
                )?;
                let v = Value::new(t, TypeDesc::string());
                self.store_value(&lv, v, false)?;
            } else {
                let t = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =d call $input_number(l {})",
                    t, prompt_arg
                )?;
                let v = Value::new(t, TypeDesc::double());
                let v = self.convert(v, &ty)?;
                self.store_raw(&lv, &v)?;
            }
            // The prompt prints once, ahead of the first target
            prompt_arg = "0".to_string();
        }
        Ok(())
    }

    /// DELETE: release and clear, skipping when the variable is already
    /// NOTHING so a second DELETE is a no-op.
    fn emit_delete(&mut self, target: ExprId) -> Result<(), CodeGenError> {
        let lv = self.emit_lvalue(target)?;
        let obj = self.load_lvalue(&lv)?;
        let do_l = self.fresh_label("del.do");
        let end_l = self.fresh_label("del.end");
        writeln!(&mut self.output, "\tjnz {}, {}, {}", obj.repr, do_l, end_l)?;
        self.emit_label(&do_l)?;
        writeln!(&mut self.output, "\tcall $object_release(l {})", obj.repr)?;
        let nothing = Value::new("0", obj.ty.clone());
        self.store_raw(&lv, &nothing)?;
        writeln!(&mut self.output, "\tjmp {}", end_l)?;
        self.emit_label(&end_l)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------

    fn emit_worker(&mut self, name: &str, func: &str, args: &[ExprId]) -> Result<(), CodeGenError> {
        let f = self
            .analysis
            .symbols
            .lookup_function(crate::semantics::base_name(func))
            .cloned()
            .ok_or_else(|| format!("unresolved worker function {}", func))?;

        // One argument crosses the thread boundary as a 64-bit payload:
        // a marshalled block for UDTs, raw bits for scalars.
        let arg_bits = match args.first() {
            None => "0".to_string(),
            Some(&arg) => {
                let v = self.emit_expr(arg)?;
                match v.ty.base {
                    BaseType::UserDefined => {
                        let udt = v
                            .ty
                            .object_name
                            .as_deref()
                            .and_then(|n| self.analysis.symbols.lookup_udt(n))
                            .cloned()
                            .ok_or("worker argument has unknown record type")?;
                        let t = self.fresh_temp();
                        if udt.has_string_fields {
                            writeln!(
                                &mut self.output,
                                "\t{} =l call $marshall_udt_deep(l {}, l $udt_{}_info)",
                                t,
                                v.repr,
                                udt.name.to_ascii_uppercase()
                            )?;
                        } else {
                            writeln!(
                                &mut self.output,
                                "\t{} =l call $marshall_udt_flat(l {}, w {})",
                                t, v.repr, udt.size
                            )?;
                        }
                        t
                    }
                    b if b.is_numeric() => {
                        if abi_of(&v.ty) == 'd' || abi_of(&v.ty) == 's' {
                            let d = self.convert(v, &TypeDesc::double())?;
                            let bits = self.fresh_temp();
                            writeln!(&mut self.output, "\t{} =l cast {}", bits, d.repr)?;
                            bits
                        } else {
                            self.convert(v, &TypeDesc::long())?.repr
                        }
                    }
                    BaseType::Str => {
                        // Deep copy; no shared references cross threads
                        let t = self.fresh_temp();
                        writeln!(
                            &mut self.output,
                            "\t{} =l call $string_clone(l {})",
                            t, v.repr
                        )?;
                        t
                    }
                    _ => return Err("unsupported worker argument type".into()),
                }
            }
        };
        let wrapper = self.worker_wrapper(&f)?;
        let h = self.fresh_temp();
        writeln!(
            &mut self.output,
            "\t{} =l call $worker_spawn(l {}, l {})",
            h, wrapper, arg_bits
        )?;
        let lv = LValue::Place(self.resolve_var(name)?);
        let v = Value::new(h, TypeDesc::long());
        self.store_raw(&lv, &v)
    }

    /// A worker runs through a thunk with the fixed signature
    /// `l -> l`: the spawn payload is cast to the function's parameter
    /// class and the result back to 64 bits for AWAIT.
    fn worker_wrapper(
        &mut self,
        f: &crate::symbols::FuncInfo,
    ) -> Result<String, CodeGenError> {
        let sym = format!("$wkr_{}", f.name.to_ascii_uppercase());
        if self.worker_wrappers.contains(&sym) {
            return Ok(sym);
        }
        self.worker_wrappers.insert(sym.clone());
        let callee = func_sym(&f.name, f.is_sub);
        let mut w = String::new();
        writeln!(w, "function l {}(l %arg) {{", sym)?;
        writeln!(w, "@start")?;
        let call_args = match f.params.first().map(abi_of) {
            None => String::new(),
            Some('w') => {
                writeln!(w, "\t%a.0 =w copy %arg")?;
                "w %a.0".to_string()
            }
            Some('d') => {
                writeln!(w, "\t%a.0 =d cast %arg")?;
                "d %a.0".to_string()
            }
            Some('s') => {
                writeln!(w, "\t%a.1 =d cast %arg")?;
                writeln!(w, "\t%a.0 =s truncd %a.1")?;
                "s %a.0".to_string()
            }
            Some(_) => "l %arg".to_string(),
        };
        if f.is_sub || f.ret.base == BaseType::Void {
            writeln!(w, "\tcall {}({})", callee, call_args)?;
            writeln!(w, "\tret 0")?;
        } else {
            match abi_of(&f.ret) {
                'w' => {
                    writeln!(w, "\t%r.0 =w call {}({})", callee, call_args)?;
                    writeln!(w, "\t%r.1 =l extsw %r.0")?;
                    writeln!(w, "\tret %r.1")?;
                }
                'd' => {
                    writeln!(w, "\t%r.0 =d call {}({})", callee, call_args)?;
                    writeln!(w, "\t%r.1 =l cast %r.0")?;
                    writeln!(w, "\tret %r.1")?;
                }
                's' => {
                    writeln!(w, "\t%r.0 =s call {}({})", callee, call_args)?;
                    writeln!(w, "\t%r.1 =d exts %r.0")?;
                    writeln!(w, "\t%r.2 =l cast %r.1")?;
                    writeln!(w, "\tret %r.2")?;
                }
                _ => {
                    writeln!(w, "\t%r.0 =l call {}({})", callee, call_args)?;
                    writeln!(w, "\tret %r.0")?;
                }
            }
        }
        writeln!(w, "}}")?;
        writeln!(w)?;
        self.wrappers.push_str(&w);
        Ok(sym)
    }

    fn emit_await(&mut self, worker: &str, target: Option<ExprId>) -> Result<(), CodeGenError> {
        let place = self.resolve_var(worker)?;
        let h = self.load_place(&place)?;
        let r = self.fresh_temp();
        writeln!(
            &mut self.output,
            "\t{} =l call $worker_await(l {})",
            r, h.repr
        )?;
        if let Some(target) = target {
            let lv = self.emit_lvalue(target)?;
            let ty = self.lvalue_type(&lv);
            let v = match abi_of(&ty) {
                'd' => {
                    let t = self.fresh_temp();
                    writeln!(&mut self.output, "\t{} =d cast {}", t, r)?;
                    Value::new(t, TypeDesc::double())
                }
                's' => {
                    let d = self.fresh_temp();
                    writeln!(&mut self.output, "\t{} =d cast {}", d, r)?;
                    let v = Value::new(d, TypeDesc::double());
                    self.convert(v, &ty)?
                }
                'w' => {
                    let t = self.fresh_temp();
                    writeln!(&mut self.output, "\t{} =w copy {}", t, r)?;
                    Value::new(t, ty.clone())
                }
                _ => Value::new(r, ty.clone()),
            };
            if ty.base == BaseType::Str {
                return self.store_value(&lv, Value::new(v.repr, TypeDesc::string()), false);
            }
            self.store_raw(&lv, &v)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Function exit
    // ------------------------------------------------------------------

    /// RETURN (and EXIT FUNCTION/SUB): store the value, then run the
    /// shared exit path. Every exit pairs samm_enter_scope with
    /// samm_exit_scope; reference-typed results are promoted to the
    /// caller's scope first.
    pub(super) fn emit_function_return(&mut self, value: Option<ExprId>) -> Result<(), CodeGenError> {
        if let Some(v) = value {
            let lv = LValue::Place(VarPlace::Result);
            let val = self.emit_expr(v)?;
            self.store_value(&lv, val, false)?;
        }
        self.emit_default_return()?;
        self.block_done = true;
        Ok(())
    }
}
