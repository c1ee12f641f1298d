//! Expression emission
//!
//! Every helper returns a [`Value`]: the operand text of a fresh SSA
//! temporary (or an immediate) plus its type. ANY-typed values carry the
//! runtime tag in a companion operand so MATCH TYPE and ANY-variable
//! assignment can keep tag and payload in step.

use super::globals::fmt_double;
use super::state::{Slot, Value, abi_of, cmp_op, func_sym, global_sym, method_sym, vtable_sym};
use super::{CodeGen, CodeGenError};
use crate::ast::{BinOp, ExprId, ExprKind, UnOp};
use crate::semantics::base_name;
use crate::symbols::key;
use crate::types::{ATOM_DOUBLE, ATOM_INTEGER, ATOM_STRING, BaseType, TypeDesc};
use std::fmt::Write as _;

/// Where a named variable resolves.
pub(super) enum VarPlace {
    Slot(Slot),
    /// Unqualified class field inside a method (`ME`-relative)
    MeField { offset: u32, ty: TypeDesc },
    /// The enclosing FUNCTION's result variable
    Result,
}

/// An assignable location.
pub(super) enum LValue {
    Place(VarPlace),
    /// A computed memory address (member access, array element)
    Mem { addr: String, ty: TypeDesc },
}

impl<'a> CodeGen<'a> {
    pub(super) fn emit_expr(&mut self, id: ExprId) -> Result<Value, CodeGenError> {
        let expr = self.ast.expr(id);
        match &expr.kind {
            ExprKind::Number { value, is_int } => {
                if *is_int {
                    Ok(Value::new(format!("{}", *value as i64), TypeDesc::integer()))
                } else {
                    Ok(Value::new(format!("d_{}", fmt_double(*value)), TypeDesc::double()))
                }
            }
            ExprKind::StringLit { value } => {
                let value = value.clone();
                let sym = self.get_string_global(&value)?;
                Ok(Value::new(sym, TypeDesc::string()))
            }
            ExprKind::Variable { name } => {
                let name = name.clone();
                match self.resolve_var(&name) {
                    Ok(place) => self.load_place(&place),
                    Err(e) => match self.lookup_array_info(&name) {
                        // Bare array reference: the descriptor address
                        Some(info) => {
                            let desc = self.array_desc_addr(&name)?;
                            Ok(Value::new(desc, TypeDesc::array_of(info.element)))
                        }
                        None => Err(e),
                    },
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let (op, lhs, rhs) = (*op, *lhs, *rhs);
                self.emit_binary(op, lhs, rhs, id)
            }
            ExprKind::Unary { op, operand } => {
                let (op, operand) = (*op, *operand);
                self.emit_unary(op, operand)
            }
            ExprKind::FunctionCall { name, args } => {
                let (name, args) = (name.clone(), args.clone());
                self.emit_call(&name, &args)
            }
            ExprKind::MethodCall {
                object,
                method,
                args,
            } => {
                let (object, method, args) = (*object, method.clone(), args.clone());
                self.emit_method_call(object, &method, &args, id)
            }
            ExprKind::MemberAccess { .. } | ExprKind::ArrayAccess { .. } => {
                let lv = self.emit_lvalue(id)?;
                self.load_lvalue(&lv)
            }
            ExprKind::StringSlice { base, start, end } => {
                let (base, start, end) = (*base, *start, *end);
                let b = self.emit_expr(base)?;
                let s = self.to_int(start)?;
                let e = self.to_int(end)?;
                let t = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =l call $string_slice(l {}, w {}, w {})",
                    t, b.repr, s, e
                )?;
                Ok(Value::new(t, TypeDesc::string()))
            }
            ExprKind::Iif {
                cond,
                then_val,
                else_val,
            } => {
                let (cond, then_val, else_val) = (*cond, *then_val, *else_val);
                self.emit_iif(cond, then_val, else_val, id)
            }
            ExprKind::New { class, args } => {
                let (class, args) = (class.clone(), args.clone());
                self.emit_new(&class, &args)
            }
            ExprKind::Me => {
                let place = self.resolve_var("ME")?;
                self.load_place(&place)
            }
            ExprKind::Nothing => Ok(Value::new("0", TypeDesc::scalar(BaseType::ClassInstance))),
            ExprKind::SuperCall { method, args } => {
                let (method, args) = (method.clone(), args.clone());
                self.emit_super_call(&method, &args)
            }
            ExprKind::IsType { value, ty } => {
                let (value, ty) = (*value, ty.clone());
                let class = match &ty {
                    crate::ast::ParsedType::Named(n) => n.clone(),
                    _ => return Err("IS requires a class name".into()),
                };
                self.emit_is_type(value, &class)
            }
            ExprKind::ListLit { elems } => {
                let elems = elems.clone();
                let elem_ty = self
                    .analysis
                    .expr_type(id)
                    .element
                    .as_deref()
                    .cloned()
                    .unwrap_or_else(TypeDesc::unknown);
                self.emit_list_literal(&elems, &elem_ty)
            }
            ExprKind::Ready { worker } => {
                let worker = worker.clone();
                let place = self.resolve_var(&worker)?;
                let handle = self.load_place(&place)?;
                let t = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =w call $worker_ready(l {})",
                    t, handle.repr
                )?;
                Ok(Value::new(t, TypeDesc::integer()))
            }
            ExprKind::RegistryCall { name, .. } => Err(CodeGenError::Logic(format!(
                "registry function {} reached code generation",
                name
            ))),
        }
    }

    /// Evaluate an expression and coerce it to a 32-bit integer operand
    /// (doubles are truncated).
    pub(super) fn to_int(&mut self, id: ExprId) -> Result<String, CodeGenError> {
        let v = self.emit_expr(id)?;
        let v = self.convert(v, &TypeDesc::integer())?;
        Ok(v.repr)
    }

    /// Numeric conversion between QBE classes. Only widenings the
    /// analyzer allowed plus explicit truncation sites (FOR init, DELETE
    /// of conditions) reach this.
    pub(super) fn convert(&mut self, v: Value, target: &TypeDesc) -> Result<Value, CodeGenError> {
        let from = abi_of(&v.ty);
        let to = abi_of(target);
        if from == to {
            return Ok(Value::new(v.repr, target.clone()));
        }
        let t = self.fresh_temp();
        let op = match (from, to) {
            ('w', 'l') => "extsw",
            ('w', 'd') => "swtof",
            ('w', 's') => "swtof",
            ('l', 'd') => "sltof",
            ('l', 'w') => "copy",
            ('d', 'w') => "dtosi",
            ('d', 'l') => "dtosi",
            ('d', 's') => "truncd",
            ('s', 'd') => "exts",
            ('s', 'w') => "stosi",
            ('s', 'l') => "stosi",
            ('l', 's') => "sltof",
            _ => {
                return Err(CodeGenError::Logic(format!(
                    "unsupported conversion {} -> {}",
                    from, to
                )));
            }
        };
        writeln!(&mut self.output, "\t{} ={} {} {}", t, to, op, v.repr)?;
        Ok(Value::new(t, target.clone()))
    }

    /// Promote a value for use as a branch condition: integer class `w`,
    /// truncating doubles.
    pub(super) fn cond_int(&mut self, id: ExprId) -> Result<String, CodeGenError> {
        let v = self.emit_expr(id)?;
        match abi_of(&v.ty) {
            'w' => Ok(v.repr),
            _ => Ok(self.convert(v, &TypeDesc::integer())?.repr),
        }
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    /// Resolution mirrors the analyzer's lookup order: locals and
    /// parameters (including MATCH TYPE bindings), SHARED globals, class
    /// fields inside methods, then main-program globals.
    pub(super) fn resolve_var(&mut self, name: &str) -> Result<VarPlace, CodeGenError> {
        let k = key(name);
        if let Some(slot) = self.locals.get(&k) {
            return Ok(VarPlace::Slot(slot.clone()));
        }
        if let Some(scope_key) = &self.scope_key {
            if let Some(result) = &self.fn_result_name
                && key(base_name(name)) == *result
                && !self.fn_is_sub
            {
                return Ok(VarPlace::Result);
            }
            let scope = self.analysis.fn_scopes.get(scope_key);
            if let Some(scope) = scope
                && scope.shared.contains(&k)
                && let Some(g) = self.analysis.symbols.globals.get(&k)
            {
                return Ok(VarPlace::Slot(global_slot(&g.name, &g.ty)));
            }
            if let Some(class) = &self.current_class
                && let Some(f) = self
                    .analysis
                    .symbols
                    .lookup_class(class)
                    .and_then(|c| c.field(base_name(name)))
            {
                return Ok(VarPlace::MeField {
                    offset: f.offset,
                    ty: f.ty.clone(),
                });
            }
            return Err(CodeGenError::Logic(format!(
                "unresolved variable {} in {}",
                name, scope_key
            )));
        }
        if let Some(g) = self.analysis.symbols.globals.get(&k) {
            return Ok(VarPlace::Slot(global_slot(&g.name, &g.ty)));
        }
        Err(CodeGenError::Logic(format!("unresolved variable {}", name)))
    }

    /// Address and type of a place, computing `ME + offset` for fields.
    pub(super) fn place_addr(&mut self, place: &VarPlace) -> Result<Slot, CodeGenError> {
        match place {
            VarPlace::Slot(slot) => Ok(slot.clone()),
            VarPlace::MeField { offset, ty } => {
                let me = self.resolve_var("ME")?;
                let me_val = self.load_place(&me)?;
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =l add {}, {}", t, me_val.repr, offset)?;
                Ok(Slot {
                    addr: t,
                    ty: ty.clone(),
                    tag_addr: None,
                    indirect: false,
                })
            }
            VarPlace::Result => Ok(Slot {
                addr: "%retval".to_string(),
                ty: self.fn_ret.clone(),
                tag_addr: None,
                indirect: false,
            }),
        }
    }

    pub(super) fn load_place(&mut self, place: &VarPlace) -> Result<Value, CodeGenError> {
        let slot = self.place_addr(place)?;
        self.load_slot(&slot)
    }

    pub(super) fn load_slot(&mut self, slot: &Slot) -> Result<Value, CodeGenError> {
        // Record variables evaluate to their storage address; record
        // parameters hold that address indirectly
        if slot.ty.base == BaseType::UserDefined {
            if slot.indirect {
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =l loadl {}", t, slot.addr)?;
                return Ok(Value::new(t, slot.ty.clone()));
            }
            return Ok(Value::new(slot.addr.clone(), slot.ty.clone()));
        }
        if slot.ty.base == BaseType::ArrayDesc {
            return Ok(Value::new(slot.addr.clone(), slot.ty.clone()));
        }
        let t = self.fresh_temp();
        writeln!(
            &mut self.output,
            "\t{} ={} {} {}",
            t,
            abi_of(&slot.ty),
            slot.ty.base.load_op(),
            slot.addr
        )?;
        let mut v = Value::new(t, slot.ty.clone());
        if let Some(tag_addr) = &slot.tag_addr {
            let tag = self.fresh_temp();
            writeln!(&mut self.output, "\t{} =l loadl {}", tag, tag_addr)?;
            v.tag = Some(tag);
        }
        Ok(v)
    }

    // ------------------------------------------------------------------
    // Lvalues
    // ------------------------------------------------------------------

    pub(super) fn emit_lvalue(&mut self, id: ExprId) -> Result<LValue, CodeGenError> {
        let expr = self.ast.expr(id);
        match &expr.kind {
            ExprKind::Variable { name } => {
                let name = name.clone();
                Ok(LValue::Place(self.resolve_var(&name)?))
            }
            ExprKind::MemberAccess { object, field } => {
                let (object, field) = (*object, field.clone());
                let obj_ty = self.analysis.expr_type(object).clone();
                match obj_ty.base {
                    BaseType::UserDefined => {
                        let base = self.emit_expr(object)?; // storage address
                        let udt = obj_ty
                            .object_name
                            .as_deref()
                            .and_then(|n| self.analysis.symbols.lookup_udt(n))
                            .ok_or("member access on unknown record type")?;
                        let f = udt
                            .field(&field)
                            .ok_or_else(|| format!("unknown field {}", field))?;
                        let (offset, fty) = (f.offset, f.ty.clone());
                        let addr = self.offset_addr(&base.repr, offset)?;
                        Ok(LValue::Mem { addr, ty: fty })
                    }
                    BaseType::ClassInstance => {
                        let obj = self.emit_expr(object)?; // object pointer
                        let class = obj_ty
                            .object_name
                            .as_deref()
                            .and_then(|n| self.analysis.symbols.lookup_class(n))
                            .ok_or("member access on unknown class")?;
                        let f = class
                            .field(&field)
                            .ok_or_else(|| format!("unknown field {}", field))?;
                        let (offset, fty) = (f.offset, f.ty.clone());
                        let addr = self.offset_addr(&obj.repr, offset)?;
                        Ok(LValue::Mem { addr, ty: fty })
                    }
                    _ => Err("member access on a type without fields".into()),
                }
            }
            ExprKind::ArrayAccess { name, indices } => {
                let (name, indices) = (name.clone(), indices.clone());
                self.emit_array_element(&name, &indices)
            }
            ExprKind::FunctionCall { name, args } => {
                // An array reference the parser could not classify
                let (name, args) = (name.clone(), args.clone());
                self.emit_array_element(&name, &args)
            }
            _ => Err("expression is not assignable".into()),
        }
    }

    pub(super) fn load_lvalue(&mut self, lv: &LValue) -> Result<Value, CodeGenError> {
        match lv {
            LValue::Place(p) => self.load_place(p),
            LValue::Mem { addr, ty } => {
                if ty.base == BaseType::UserDefined {
                    return Ok(Value::new(addr.clone(), ty.clone()));
                }
                let t = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} ={} {} {}",
                    t,
                    abi_of(ty),
                    ty.base.load_op(),
                    addr
                )?;
                Ok(Value::new(t, ty.clone()))
            }
        }
    }

    fn offset_addr(&mut self, base: &str, offset: u32) -> Result<String, CodeGenError> {
        if offset == 0 {
            return Ok(base.to_string());
        }
        let t = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =l add {}, {}", t, base, offset)?;
        Ok(t)
    }

    /// Bounds-checked element address of an array reference: compute the
    /// row-major linear index, check it, ask the runtime for the slot.
    fn emit_array_element(
        &mut self,
        name: &str,
        indices: &[ExprId],
    ) -> Result<LValue, CodeGenError> {
        let info = self
            .lookup_array_info(name)
            .ok_or_else(|| format!("unresolved array {}", name))?;
        let desc = self.array_desc_addr(name)?;
        let base = self.analysis.option_base as i64;

        // linear = ((i0 * e1 + i1) * e2 + i2) ... with OPTION BASE folded
        // out of each index. Extents are re-read from the descriptor so
        // REDIM keeps accesses honest.
        let mut linear: Option<String> = None;
        for (dim, &idx) in indices.iter().enumerate() {
            let mut i = self.to_int(idx)?;
            if base != 0 {
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w sub {}, {}", t, i, base)?;
                i = t;
            }
            linear = Some(match linear {
                None => i,
                Some(prev) => {
                    let extent = self.fresh_temp();
                    // Extents live at desc+16, one word per dimension
                    let eaddr = self.fresh_temp();
                    writeln!(
                        &mut self.output,
                        "\t{} =l add {}, {}",
                        eaddr,
                        desc,
                        16 + 4 * dim
                    )?;
                    writeln!(&mut self.output, "\t{} =w loadw {}", extent, eaddr)?;
                    let scaled = self.fresh_temp();
                    writeln!(&mut self.output, "\t{} =w mul {}, {}", scaled, prev, extent)?;
                    let sum = self.fresh_temp();
                    writeln!(&mut self.output, "\t{} =w add {}, {}", sum, scaled, i)?;
                    sum
                }
            });
        }
        let linear = linear.ok_or("array access with no indices")?;
        writeln!(
            &mut self.output,
            "\tcall $array_bounds_check(l {}, w {})",
            desc, linear
        )?;
        let addr = self.fresh_temp();
        writeln!(
            &mut self.output,
            "\t{} =l call $array_element_addr(l {}, w {})",
            addr, desc, linear
        )?;
        Ok(LValue::Mem {
            addr,
            ty: info.element,
        })
    }

    pub(super) fn lookup_array_info(&self, name: &str) -> Option<crate::symbols::ArrayInfo> {
        let k = key(name);
        if let Some(scope_key) = &self.scope_key {
            let scope = self.analysis.fn_scopes.get(scope_key)?;
            if let Some(a) = scope.local_arrays.get(&k) {
                return Some(a.clone());
            }
            if scope.shared.contains(&k) {
                return self.analysis.symbols.global_arrays.get(&k).cloned();
            }
            return None;
        }
        self.analysis.symbols.global_arrays.get(&k).cloned()
    }

    pub(super) fn array_desc_addr(&mut self, name: &str) -> Result<String, CodeGenError> {
        let k = key(name);
        if let Some(addr) = self.local_arrays.get(&k) {
            return Ok(addr.clone());
        }
        if self.analysis.symbols.global_arrays.contains_key(&k) {
            return Ok(super::state::array_sym(name));
        }
        Err(CodeGenError::Logic(format!("unresolved array {}", name)))
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    fn emit_binary(
        &mut self,
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
        id: ExprId,
    ) -> Result<Value, CodeGenError> {
        let result_ty = self.analysis.expr_type(id).clone();
        let lt = self.analysis.expr_type(lhs).clone();
        let rt = self.analysis.expr_type(rhs).clone();
        let string_concat = op == BinOp::Concat
            || (op == BinOp::Add && (lt.base == BaseType::Str || rt.base == BaseType::Str));

        if string_concat {
            let l = self.emit_expr(lhs)?;
            let l = self.to_string_value(l)?;
            let r = self.emit_expr(rhs)?;
            let r = self.to_string_value(r)?;
            let t = self.fresh_temp();
            writeln!(
                &mut self.output,
                "\t{} =l call $string_concat(l {}, l {})",
                t, l.repr, r.repr
            )?;
            return Ok(Value::new(t, TypeDesc::string()));
        }

        if op.is_comparison() {
            return self.emit_comparison(op, lhs, rhs);
        }

        // Numeric: promote both sides to the operation class
        let op_ty = if lt.base.is_float() || rt.base.is_float() {
            match op {
                BinOp::IntDiv | BinOp::Mod | BinOp::And | BinOp::Or | BinOp::Xor => {
                    result_ty.clone()
                }
                BinOp::Pow => TypeDesc::double(),
                _ => TypeDesc::double(),
            }
        } else {
            result_ty.clone()
        };

        if op == BinOp::Pow {
            let l = self.emit_expr(lhs)?;
            let l = self.convert(l, &TypeDesc::double())?;
            let r = self.emit_expr(rhs)?;
            let r = self.convert(r, &TypeDesc::double())?;
            let t = self.fresh_temp();
            writeln!(
                &mut self.output,
                "\t{} =d call $basic_pow(d {}, d {})",
                t, l.repr, r.repr
            )?;
            return Ok(Value::new(t, TypeDesc::double()));
        }

        let l = self.emit_expr(lhs)?;
        let l = self.convert(l, &op_ty)?;
        let r = self.emit_expr(rhs)?;
        let r = self.convert(r, &op_ty)?;
        let class = abi_of(&op_ty);
        let unsigned = op_ty.base.is_unsigned();
        let mnemonic = match op {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div | BinOp::IntDiv => {
                if class == 'd' || class == 's' {
                    "div"
                } else if unsigned {
                    "udiv"
                } else {
                    "div"
                }
            }
            BinOp::Mod => {
                if unsigned {
                    "urem"
                } else {
                    "rem"
                }
            }
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            _ => return Err("unexpected operator".into()),
        };
        let t = self.fresh_temp();
        writeln!(
            &mut self.output,
            "\t{} ={} {} {}, {}",
            t, class, mnemonic, l.repr, r.repr
        )?;
        Ok(Value::new(t, op_ty))
    }

    /// Comparisons always yield a 32-bit integer (0/1). String compares
    /// call the runtime and test the result against zero.
    fn emit_comparison(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId) -> Result<Value, CodeGenError> {
        let l = self.emit_expr(lhs)?;
        let r = self.emit_expr(rhs)?;
        self.compare_values(op, l, r)
    }

    /// Compare two already-emitted values; shared with the SELECT CASE
    /// test emitter.
    pub(super) fn compare_values(
        &mut self,
        op: BinOp,
        l: Value,
        r: Value,
    ) -> Result<Value, CodeGenError> {
        if l.ty.base == BaseType::Str && r.ty.base == BaseType::Str {
            let c = self.fresh_temp();
            writeln!(
                &mut self.output,
                "\t{} =w call $string_compare(l {}, l {})",
                c, l.repr, r.repr
            )?;
            let t = self.fresh_temp();
            writeln!(
                &mut self.output,
                "\t{} =w {} {}, 0",
                t,
                cmp_op(op, 'w', false),
                c
            )?;
            return Ok(Value::new(t, TypeDesc::integer()));
        }

        if l.ty.base == BaseType::ClassInstance || r.ty.base == BaseType::ClassInstance {
            let t = self.fresh_temp();
            writeln!(
                &mut self.output,
                "\t{} =w {} {}, {}",
                t,
                cmp_op(op, 'l', false),
                l.repr,
                r.repr
            )?;
            return Ok(Value::new(t, TypeDesc::integer()));
        }

        // Numeric: compare in the wider class
        let cls_ty = if l.ty.base.is_float() || r.ty.base.is_float() {
            TypeDesc::double()
        } else if matches!(l.ty.base, BaseType::Long | BaseType::ULong)
            || matches!(r.ty.base, BaseType::Long | BaseType::ULong)
        {
            TypeDesc::long()
        } else {
            TypeDesc::integer()
        };
        let unsigned = l.ty.base.is_unsigned() && r.ty.base.is_unsigned();
        let l = self.convert(l, &cls_ty)?;
        let r = self.convert(r, &cls_ty)?;
        let t = self.fresh_temp();
        writeln!(
            &mut self.output,
            "\t{} =w {} {}, {}",
            t,
            cmp_op(op, abi_of(&cls_ty), unsigned),
            l.repr,
            r.repr
        )?;
        Ok(Value::new(t, TypeDesc::integer()))
    }

    fn emit_unary(&mut self, op: UnOp, operand: ExprId) -> Result<Value, CodeGenError> {
        match op {
            UnOp::Not => {
                let c = self.cond_int(operand)?;
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w ceqw {}, 0", t, c)?;
                Ok(Value::new(t, TypeDesc::integer()))
            }
            UnOp::Neg => {
                let v = self.emit_expr(operand)?;
                let class = abi_of(&v.ty);
                let t = self.fresh_temp();
                let zero = if class == 'd' {
                    "d_0.0"
                } else if class == 's' {
                    "s_0.0"
                } else {
                    "0"
                };
                writeln!(
                    &mut self.output,
                    "\t{} ={} sub {}, {}",
                    t, class, zero, v.repr
                )?;
                Ok(Value::new(t, v.ty))
            }
        }
    }

    /// Promote a scalar to a string for concatenation.
    fn to_string_value(&mut self, v: Value) -> Result<Value, CodeGenError> {
        match v.ty.base {
            BaseType::Str => Ok(v),
            b if b.is_numeric() => {
                let (callee, class) = match abi_of(&v.ty) {
                    'w' => ("string_from_int", 'w'),
                    'l' => ("string_from_long", 'l'),
                    _ => ("string_from_double", 'd'),
                };
                let v = if class == 'd' {
                    self.convert(v, &TypeDesc::double())?
                } else {
                    v
                };
                let t = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =l call ${}({} {})",
                    t, callee, class, v.repr
                )?;
                Ok(Value::new(t, TypeDesc::string()))
            }
            _ => Err("cannot convert value to string".into()),
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    pub(super) fn emit_call(&mut self, name: &str, args: &[ExprId]) -> Result<Value, CodeGenError> {
        // Array reference that parsed as a call
        if self.lookup_array_info(name).is_some() {
            let lv = self.emit_array_element(name, args)?;
            return self.load_lvalue(&lv);
        }
        if let Some(v) = self.emit_builtin(name, args)? {
            return Ok(v);
        }
        let f = self
            .analysis
            .symbols
            .lookup_function(base_name(name))
            .cloned()
            .ok_or_else(|| format!("unresolved function {}", name))?;
        let mut parts = Vec::new();
        for (arg, pty) in args.iter().zip(&f.params) {
            let v = self.emit_expr(*arg)?;
            let v = self.convert_arg(v, pty)?;
            parts.push(format!("{} {}", abi_of(pty), v.repr));
        }
        let callee = func_sym(&f.name, f.is_sub);
        if f.is_sub {
            writeln!(&mut self.output, "\tcall {}({})", callee, parts.join(", "))?;
            Ok(Value::new("0", TypeDesc::void()))
        } else {
            let t = self.fresh_temp();
            writeln!(
                &mut self.output,
                "\t{} ={} call {}({})",
                t,
                abi_of(&f.ret),
                callee,
                parts.join(", ")
            )?;
            Ok(Value::new(t, f.ret))
        }
    }

    fn convert_arg(&mut self, v: Value, pty: &TypeDesc) -> Result<Value, CodeGenError> {
        if pty.base.is_numeric() && v.ty.base.is_numeric() {
            self.convert(v, pty)
        } else {
            Ok(v)
        }
    }

    fn emit_builtin(&mut self, name: &str, args: &[ExprId]) -> Result<Option<Value>, CodeGenError> {
        let upper = key(name);
        let v = match upper.as_str() {
            "LEN" => {
                let s = self.emit_expr(args[0])?;
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w call $string_length(l {})", t, s.repr)?;
                Value::new(t, TypeDesc::integer())
            }
            "MID$" => {
                let s = self.emit_expr(args[0])?;
                let start = self.to_int(args[1])?;
                let count = if args.len() > 2 {
                    self.to_int(args[2])?
                } else {
                    "-1".to_string()
                };
                let t = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =l call $string_mid(l {}, w {}, w {})",
                    t, s.repr, start, count
                )?;
                Value::new(t, TypeDesc::string())
            }
            "LEFT$" | "RIGHT$" => {
                let callee = if upper == "LEFT$" {
                    "string_left"
                } else {
                    "string_right"
                };
                let s = self.emit_expr(args[0])?;
                let n = self.to_int(args[1])?;
                let t = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =l call ${}(l {}, w {})",
                    t, callee, s.repr, n
                )?;
                Value::new(t, TypeDesc::string())
            }
            "CHR$" => {
                let n = self.to_int(args[0])?;
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =l call $string_chr(w {})", t, n)?;
                Value::new(t, TypeDesc::string())
            }
            "STR$" => {
                let v = self.emit_expr(args[0])?;
                return Ok(Some(self.to_string_value(v)?));
            }
            "VAL" => {
                let s = self.emit_expr(args[0])?;
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =d call $string_val(l {})", t, s.repr)?;
                Value::new(t, TypeDesc::double())
            }
            "ABS" => {
                let v = self.emit_expr(args[0])?;
                let t = self.fresh_temp();
                if abi_of(&v.ty) == 'd' || abi_of(&v.ty) == 's' {
                    let v = self.convert(v, &TypeDesc::double())?;
                    writeln!(
                        &mut self.output,
                        "\t{} =d call $basic_abs_double(d {})",
                        t, v.repr
                    )?;
                    Value::new(t, TypeDesc::double())
                } else {
                    writeln!(
                        &mut self.output,
                        "\t{} =w call $basic_abs_int(w {})",
                        t, v.repr
                    )?;
                    Value::new(t, TypeDesc::integer())
                }
            }
            "INT" => {
                let v = self.emit_expr(args[0])?;
                return Ok(Some(self.convert(v, &TypeDesc::integer())?));
            }
            "ERR" => {
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w call $basic_err()", t)?;
                Value::new(t, TypeDesc::integer())
            }
            "ERL" => {
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w call $basic_erl()", t)?;
                Value::new(t, TypeDesc::integer())
            }
            _ => return Ok(None),
        };
        Ok(Some(v))
    }

    /// Virtual dispatch: load the vtable from the object header, index
    /// the resolved slot, call through the function pointer.
    fn emit_method_call(
        &mut self,
        object: ExprId,
        method: &str,
        args: &[ExprId],
        id: ExprId,
    ) -> Result<Value, CodeGenError> {
        let obj_ty = self.analysis.expr_type(object).clone();
        match obj_ty.base {
            BaseType::ClassInstance => {
                let class = obj_ty
                    .object_name
                    .as_deref()
                    .and_then(|n| self.analysis.symbols.lookup_class(n))
                    .ok_or("method call on unknown class")?;
                let m = class
                    .method(method)
                    .ok_or_else(|| format!("unknown method {}", method))?;
                let (slot, params, ret) = (m.slot, m.params.clone(), m.ret.clone());

                let obj = self.emit_expr(object)?;
                let vt = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =l loadl {}", vt, obj.repr)?;
                let slot_addr = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =l add {}, {}",
                    slot_addr,
                    vt,
                    8 * slot
                )?;
                let fnptr = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =l loadl {}", fnptr, slot_addr)?;

                let mut parts = vec![format!("l {}", obj.repr)];
                for (arg, pty) in args.iter().zip(&params) {
                    let v = self.emit_expr(*arg)?;
                    let v = self.convert_arg(v, pty)?;
                    parts.push(format!("{} {}", abi_of(pty), v.repr));
                }
                if ret.base == BaseType::Void {
                    writeln!(&mut self.output, "\tcall {}({})", fnptr, parts.join(", "))?;
                    Ok(Value::new("0", TypeDesc::void()))
                } else {
                    let t = self.fresh_temp();
                    writeln!(
                        &mut self.output,
                        "\t{} ={} call {}({})",
                        t,
                        abi_of(&ret),
                        fnptr,
                        parts.join(", ")
                    )?;
                    Ok(Value::new(t, ret))
                }
            }
            BaseType::List => self.emit_list_method(object, method, args, id),
            BaseType::Hashmap => self.emit_hashmap_method(object, method, args),
            _ => Err(CodeGenError::Logic(format!(
                "{} has no methods",
                obj_ty
            ))),
        }
    }

    fn emit_list_method(
        &mut self,
        object: ExprId,
        method: &str,
        args: &[ExprId],
        id: ExprId,
    ) -> Result<Value, CodeGenError> {
        let list_ty = self.analysis.expr_type(object).clone();
        let elem = list_ty
            .element
            .as_deref()
            .cloned()
            .unwrap_or_else(TypeDesc::unknown);
        let list = self.emit_expr(object)?;
        match key(method).as_str() {
            "APPEND" => {
                let v = self.emit_expr(args[0])?;
                self.emit_list_append(&list.repr, v)?;
                Ok(Value::new("0", TypeDesc::void()))
            }
            "LENGTH" => {
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w call $list_length(l {})", t, list.repr)?;
                Ok(Value::new(t, TypeDesc::integer()))
            }
            "GET" => {
                let i = self.to_int(args[0])?;
                let atom = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =l call $list_get_ptr(l {}, w {})",
                    atom, list.repr, i
                )?;
                if elem.base == BaseType::Unknown {
                    // Hand back tag and payload together
                    let tag = self.fresh_temp();
                    writeln!(&mut self.output, "\t{} =l loadl {}", tag, atom)?;
                    let vaddr = self.fresh_temp();
                    writeln!(&mut self.output, "\t{} =l add {}, 8", vaddr, atom)?;
                    let val = self.fresh_temp();
                    writeln!(&mut self.output, "\t{} =l loadl {}", val, vaddr)?;
                    let mut v = Value::new(val, self.analysis.expr_type(id).clone());
                    v.tag = Some(tag);
                    Ok(v)
                } else {
                    let vaddr = self.fresh_temp();
                    writeln!(&mut self.output, "\t{} =l add {}, 8", vaddr, atom)?;
                    let t = self.fresh_temp();
                    writeln!(
                        &mut self.output,
                        "\t{} ={} {} {}",
                        t,
                        abi_of(&elem),
                        elem.base.load_op(),
                        vaddr
                    )?;
                    Ok(Value::new(t, elem))
                }
            }
            other => Err(CodeGenError::Logic(format!("unknown LIST method {}", other))),
        }
    }

    pub(super) fn emit_list_append(&mut self, list: &str, v: Value) -> Result<(), CodeGenError> {
        match v.ty.base {
            b if b.is_integer() => {
                let v = self.convert(v, &TypeDesc::integer())?;
                writeln!(
                    &mut self.output,
                    "\tcall $list_append_int(l {}, w {})",
                    list, v.repr
                )?;
            }
            BaseType::Single | BaseType::Double => {
                let v = self.convert(v, &TypeDesc::double())?;
                writeln!(
                    &mut self.output,
                    "\tcall $list_append_float(l {}, d {})",
                    list, v.repr
                )?;
            }
            BaseType::Str => {
                writeln!(
                    &mut self.output,
                    "\tcall $list_append_string(l {}, l {})",
                    list, v.repr
                )?;
            }
            BaseType::List => {
                writeln!(
                    &mut self.output,
                    "\tcall $list_append_list(l {}, l {})",
                    list, v.repr
                )?;
            }
            BaseType::ClassInstance => {
                writeln!(
                    &mut self.output,
                    "\tcall $list_append_object(l {}, l {})",
                    list, v.repr
                )?;
            }
            _ => return Err("unsupported list element type".into()),
        }
        Ok(())
    }

    fn emit_hashmap_method(
        &mut self,
        object: ExprId,
        method: &str,
        args: &[ExprId],
    ) -> Result<Value, CodeGenError> {
        let h = self.emit_expr(object)?;
        match key(method).as_str() {
            "PUT" => {
                let k = self.emit_expr(args[0])?;
                let v = self.emit_expr(args[1])?;
                let (tag, bits) = self.pack_atom(v)?;
                writeln!(
                    &mut self.output,
                    "\tcall $hashmap_insert(l {}, l {}, w {}, l {})",
                    h.repr, k.repr, tag, bits
                )?;
                Ok(Value::new("0", TypeDesc::void()))
            }
            "GET" => {
                let k = self.emit_expr(args[0])?;
                let atom = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =l call $hashmap_lookup(l {}, l {})",
                    atom, h.repr, k.repr
                )?;
                let tag = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =l loadl {}", tag, atom)?;
                let vaddr = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =l add {}, 8", vaddr, atom)?;
                let val = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =l loadl {}", val, vaddr)?;
                let mut v = Value::new(val, TypeDesc::unknown());
                v.tag = Some(tag);
                Ok(v)
            }
            "CONTAINS" => {
                let k = self.emit_expr(args[0])?;
                let t = self.fresh_temp();
                writeln!(
                    &mut self.output,
                    "\t{} =w call $hashmap_contains(l {}, l {})",
                    t, h.repr, k.repr
                )?;
                Ok(Value::new(t, TypeDesc::integer()))
            }
            "REMOVE" => {
                let k = self.emit_expr(args[0])?;
                writeln!(
                    &mut self.output,
                    "\tcall $hashmap_remove(l {}, l {})",
                    h.repr, k.repr
                )?;
                Ok(Value::new("0", TypeDesc::void()))
            }
            "COUNT" => {
                let t = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =w call $hashmap_count(l {})", t, h.repr)?;
                Ok(Value::new(t, TypeDesc::integer()))
            }
            other => Err(CodeGenError::Logic(format!(
                "unknown HASHMAP method {}",
                other
            ))),
        }
    }

    /// Pack a typed value into (atom tag, 64-bit payload) operands.
    pub(super) fn pack_atom(&mut self, v: Value) -> Result<(u32, String), CodeGenError> {
        match v.ty.base {
            b if b.is_integer() => {
                let wide = self.convert(v, &TypeDesc::long())?;
                Ok((ATOM_INTEGER, wide.repr))
            }
            BaseType::Single | BaseType::Double => {
                let d = self.convert(v, &TypeDesc::double())?;
                let bits = self.fresh_temp();
                writeln!(&mut self.output, "\t{} =l cast {}", bits, d.repr)?;
                Ok((ATOM_DOUBLE, bits))
            }
            BaseType::Str => Ok((ATOM_STRING, v.repr)),
            _ => Err("value cannot carry a runtime type tag".into()),
        }
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    fn emit_new(&mut self, class_name: &str, args: &[ExprId]) -> Result<Value, CodeGenError> {
        let class = self
            .analysis
            .symbols
            .lookup_class(class_name)
            .cloned()
            .ok_or_else(|| format!("unknown class {}", class_name))?;
        let obj = self.fresh_temp();
        writeln!(
            &mut self.output,
            "\t{} =l call $samm_alloc_object(w {}, l {})",
            obj,
            class.object_size,
            vtable_sym(&class.name)
        )?;
        // Stamp the class id into the header word after the vtable
        let id_addr = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =l add {}, 8", id_addr, obj)?;
        writeln!(&mut self.output, "\tstorel {}, {}", class.class_id, id_addr)?;
        if class.has_ctor {
            let mut parts = vec![format!("l {}", obj)];
            for (arg, pty) in args.iter().zip(&class.ctor_params) {
                let v = self.emit_expr(*arg)?;
                let v = self.convert_arg(v, pty)?;
                parts.push(format!("{} {}", abi_of(pty), v.repr));
            }
            writeln!(
                &mut self.output,
                "\tcall {}({})",
                method_sym(&class.name, "CONSTRUCTOR"),
                parts.join(", ")
            )?;
        }
        Ok(Value::new(obj, TypeDesc::class(class.name)))
    }

    /// Closed-world IS check: compare the object's class id against the
    /// id of every class at or below the tested class.
    fn emit_is_type(&mut self, value: ExprId, class_name: &str) -> Result<Value, CodeGenError> {
        let obj = self.emit_expr(value)?;
        let id_addr = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =l add {}, 8", id_addr, obj.repr)?;
        let cid = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =l loadl {}", cid, id_addr)?;

        let mut matching: Vec<u32> = self
            .analysis
            .symbols
            .classes
            .values()
            .filter(|c| self.analysis.symbols.is_ancestor_or_same(&c.name, class_name))
            .map(|c| c.class_id)
            .collect();
        matching.sort_unstable();
        let mut acc: Option<String> = None;
        for cid_const in matching {
            let c = self.fresh_temp();
            writeln!(&mut self.output, "\t{} =w ceql {}, {}", c, cid, cid_const)?;
            acc = Some(match acc {
                None => c,
                Some(prev) => {
                    let t = self.fresh_temp();
                    writeln!(&mut self.output, "\t{} =w or {}, {}", t, prev, c)?;
                    t
                }
            });
        }
        let result = match acc {
            Some(r) => r,
            None => "0".to_string(),
        };
        Ok(Value::new(result, TypeDesc::integer()))
    }

    fn emit_super_call(&mut self, method: &str, args: &[ExprId]) -> Result<Value, CodeGenError> {
        let class = self
            .current_class
            .clone()
            .ok_or("SUPER outside a method")?;
        let parent = self
            .analysis
            .symbols
            .lookup_class(&class)
            .and_then(|c| c.parent.clone())
            .ok_or("SUPER in a class without a parent")?;
        let m = self
            .analysis
            .symbols
            .lookup_class(&parent)
            .and_then(|c| c.method(method))
            .cloned()
            .ok_or_else(|| format!("unknown parent method {}", method))?;
        let me = self.resolve_var("ME")?;
        let me = self.load_place(&me)?;
        let mut parts = vec![format!("l {}", me.repr)];
        for (arg, pty) in args.iter().zip(&m.params) {
            let v = self.emit_expr(*arg)?;
            let v = self.convert_arg(v, pty)?;
            parts.push(format!("{} {}", abi_of(pty), v.repr));
        }
        // SUPER dispatches statically to the parent implementation
        let callee = method_sym(&m.defined_in, &m.name);
        if m.ret.base == BaseType::Void {
            writeln!(&mut self.output, "\tcall {}({})", callee, parts.join(", "))?;
            Ok(Value::new("0", TypeDesc::void()))
        } else {
            let t = self.fresh_temp();
            writeln!(
                &mut self.output,
                "\t{} ={} call {}({})",
                t,
                abi_of(&m.ret),
                callee,
                parts.join(", ")
            )?;
            Ok(Value::new(t, m.ret))
        }
    }

    fn emit_list_literal(
        &mut self,
        elems: &[ExprId],
        elem_ty: &TypeDesc,
    ) -> Result<Value, CodeGenError> {
        let tag = elem_ty.atom_tag().unwrap_or(0);
        let list = self.fresh_temp();
        writeln!(&mut self.output, "\t{} =l call $list_new(w {})", list, tag)?;
        for &e in elems {
            let v = self.emit_expr(e)?;
            let v = if elem_ty.base != BaseType::Unknown && v.ty.base.is_numeric() {
                self.convert(v, elem_ty)?
            } else {
                v
            };
            self.emit_list_append(&list, v)?;
        }
        Ok(Value::new(list, TypeDesc::list_of(elem_ty.clone())))
    }

    /// IIF emits a self-contained micro-CFG and merges the arms with a
    /// phi on the result.
    fn emit_iif(
        &mut self,
        cond: ExprId,
        then_val: ExprId,
        else_val: ExprId,
        id: ExprId,
    ) -> Result<Value, CodeGenError> {
        let result_ty = self.analysis.expr_type(id).clone();
        let c = self.cond_int(cond)?;
        let t_label = self.fresh_label("iif.t");
        let f_label = self.fresh_label("iif.f");
        let done = self.fresh_label("iif.done");
        writeln!(&mut self.output, "\tjnz {}, {}, {}", c, t_label, f_label)?;

        self.emit_label(&t_label)?;
        let tv = self.emit_expr(then_val)?;
        let tv = self.convert(tv, &result_ty)?;
        let t_pred = self.cur_label.clone();
        writeln!(&mut self.output, "\tjmp {}", done)?;

        self.emit_label(&f_label)?;
        let fv = self.emit_expr(else_val)?;
        let fv = self.convert(fv, &result_ty)?;
        let f_pred = self.cur_label.clone();
        writeln!(&mut self.output, "\tjmp {}", done)?;

        self.emit_label(&done)?;
        let r = self.fresh_temp();
        writeln!(
            &mut self.output,
            "\t{} ={} phi {} {}, {} {}",
            r,
            abi_of(&result_ty),
            t_pred,
            tv.repr,
            f_pred,
            fv.repr
        )?;
        Ok(Value::new(r, result_ty))
    }

    /// Write a label and remember it as the active block for phi
    /// predecessors.
    pub(super) fn emit_label(&mut self, label: &str) -> Result<(), CodeGenError> {
        writeln!(&mut self.output, "{}", label)?;
        self.cur_label = label.to_string();
        Ok(())
    }
}

/// Slot describing a global variable.
pub(super) fn global_slot(name: &str, ty: &TypeDesc) -> Slot {
    if ty.base == BaseType::Unknown {
        Slot {
            addr: format!("{}_val", global_sym(name)),
            ty: ty.clone(),
            tag_addr: Some(format!("{}_tag", global_sym(name))),
            indirect: false,
        }
    } else {
        Slot {
            addr: global_sym(name),
            ty: ty.clone(),
            tag_addr: None,
            indirect: false,
        }
    }
}

impl Value {
    /// Runtime tag operand accompanying ANY-typed values.
    pub(super) fn tag_operand(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}
