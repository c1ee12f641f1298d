//! Program emission
//!
//! Walks the main CFG and every function CFG in reverse postorder and
//! assembles the final IR text: data section first (globals, interned
//! strings, vtables, descriptors, DATA pool), then `$main`, then every
//! function, sub, and method.

use super::globals::ARRAY_DESC_SIZE;
use super::samm::needs_scope;
use super::state::{abi_of, func_sym, method_sym};
use super::{CodeGen, CodeGenError};
use crate::cfg::{BlockAux, BuildResult, Cfg};
use crate::symbols::{FuncScope, key};
use crate::types::{BaseType, TypeDesc};
use std::fmt::Write as _;
use tracing::debug;

/// What kind of callable a CFG belongs to.
enum FnKind {
    Main,
    Free {
        name: String,
        param_names: Vec<String>,
        params: Vec<TypeDesc>,
        ret: TypeDesc,
        is_sub: bool,
    },
    Method {
        class: String,
        method: String,
        param_names: Vec<String>,
        params: Vec<TypeDesc>,
        ret: TypeDesc,
        is_dtor: bool,
    },
}

impl<'a> CodeGen<'a> {
    /// Emit the whole translation unit as QBE IR text.
    pub fn emit_program(&mut self, cfgs: &BuildResult) -> Result<String, CodeGenError> {
        let mut data = String::new();
        self.emit_data_section(&mut data)?;

        self.emit_function(&cfgs.main, FnKind::Main)?;
        for cfg in &cfgs.funcs {
            let kind = self.classify(cfg)?;
            self.emit_function(cfg, kind)?;
        }

        let mut ir = String::new();
        writeln!(&mut ir, "# generated by fbc")?;
        ir.push_str(&data);
        ir.push_str(&self.string_globals);
        writeln!(&mut ir)?;
        ir.push_str(&self.functions);
        ir.push_str(&self.wrappers);
        Ok(ir)
    }

    fn classify(&self, cfg: &Cfg) -> Result<FnKind, CodeGenError> {
        if let Some((class_key, method_key)) = cfg.name.split_once('.') {
            let class = self
                .analysis
                .symbols
                .classes
                .get(class_key)
                .ok_or_else(|| format!("unknown class for CFG {}", cfg.name))?;
            let (param_names, params, ret, is_dtor) = match method_key {
                "CONSTRUCTOR" => (
                    class.ctor_param_names.clone(),
                    class.ctor_params.clone(),
                    TypeDesc::void(),
                    false,
                ),
                "DESTRUCTOR" => (Vec::new(), Vec::new(), TypeDesc::void(), true),
                m => {
                    let method = class
                        .method(m)
                        .ok_or_else(|| format!("unknown method for CFG {}", cfg.name))?;
                    (
                        method.param_names.clone(),
                        method.params.clone(),
                        method.ret.clone(),
                        false,
                    )
                }
            };
            let method_name = match method_key {
                "CONSTRUCTOR" | "DESTRUCTOR" => method_key.to_string(),
                m => class.method(m).map(|mm| mm.name.clone()).unwrap_or_default(),
            };
            return Ok(FnKind::Method {
                class: class.name.clone(),
                method: method_name,
                param_names,
                params,
                ret,
                is_dtor,
            });
        }
        let f = self
            .analysis
            .symbols
            .functions
            .get(&cfg.name)
            .ok_or_else(|| format!("unknown function for CFG {}", cfg.name))?;
        Ok(FnKind::Free {
            name: f.name.clone(),
            param_names: f.param_names.clone(),
            params: f.params.clone(),
            ret: f.ret.clone(),
            is_sub: f.is_sub,
        })
    }

    fn emit_function(&mut self, cfg: &Cfg, kind: FnKind) -> Result<(), CodeGenError> {
        // Reset per-function state
        self.output.clear();
        self.locals.clear();
        self.local_arrays.clear();
        self.select_types.clear();
        self.last_line = 0;
        self.block_done = false;

        let (signature, scope_key, param_names, params, dtor_parent) = match &kind {
            FnKind::Main => {
                self.scope_key = None;
                self.current_class = None;
                self.fn_result_name = None;
                self.fn_ret = TypeDesc::integer();
                self.fn_is_sub = false;
                self.scoped = true;
                (
                    "export function w $main() {".to_string(),
                    None,
                    Vec::new(),
                    Vec::new(),
                    None,
                )
            }
            FnKind::Free {
                name,
                param_names,
                params,
                ret,
                is_sub,
            } => {
                self.scope_key = Some(cfg.name.clone());
                self.current_class = None;
                self.fn_result_name = if *is_sub { None } else { Some(key(name)) };
                self.fn_ret = ret.clone();
                self.fn_is_sub = *is_sub;
                self.scoped = needs_scope(cfg, self.ast);
                let args = param_sig(params);
                let sig = if *is_sub {
                    format!("function {}({}) {{", func_sym(name, true), args)
                } else {
                    format!(
                        "function {} {}({}) {{",
                        abi_of(ret),
                        func_sym(name, false),
                        args
                    )
                };
                (
                    sig,
                    Some(cfg.name.clone()),
                    param_names.clone(),
                    params.clone(),
                    None,
                )
            }
            FnKind::Method {
                class,
                method,
                param_names,
                params,
                ret,
                is_dtor,
            } => {
                self.scope_key = Some(cfg.name.clone());
                self.current_class = Some(class.clone());
                let is_sub = ret.base == BaseType::Void;
                self.fn_result_name = if is_sub { None } else { Some(key(method)) };
                self.fn_ret = ret.clone();
                self.fn_is_sub = is_sub;
                // Class methods are always scoped
                self.scoped = true;
                let args = param_sig(params);
                let args = if args.is_empty() {
                    "l %me".to_string()
                } else {
                    format!("l %me, {}", args)
                };
                let sig = if is_sub {
                    format!("function {}({}) {{", method_sym(class, method), args)
                } else {
                    format!(
                        "function {} {}({}) {{",
                        abi_of(ret),
                        method_sym(class, method),
                        args
                    )
                };
                // Chained cleanup: the child destructor ends with a call
                // to the parent's destructor
                let dtor_parent = if *is_dtor {
                    self.analysis
                        .symbols
                        .lookup_class(class)
                        .and_then(|c| c.parent.as_deref())
                        .and_then(|p| self.analysis.symbols.lookup_class(p))
                        .and_then(|p| self.analysis.symbols.destructor_owner(p))
                } else {
                    None
                };
                (
                    sig,
                    Some(cfg.name.clone()),
                    param_names.clone(),
                    params.clone(),
                    dtor_parent,
                )
            }
        };

        writeln!(&mut self.output, "{}", signature)?;
        self.emit_label("@start")?;
        self.emit_prologue(cfg, scope_key.as_deref(), &param_names, &params)?;
        if matches!(kind, FnKind::Main) {
            writeln!(&mut self.output, "\tcall $samm_init()")?;
            if self.config.samm_stats {
                writeln!(&mut self.output, "\tcall $samm_set_stats(1)")?;
            }
            writeln!(&mut self.output, "\tcall $samm_enter_scope()")?;
        } else if self.scoped {
            writeln!(&mut self.output, "\tcall $samm_enter_scope()")?;
        }
        writeln!(
            &mut self.output,
            "\tjmp {}",
            Self::block_label(cfg, cfg.entry)
        )?;

        // Reachable blocks in RPO, then retained unreachable blocks
        let mut order = cfg.rpo.clone();
        order.extend(cfg.unreachable_blocks());
        for block in order {
            self.block_done = false;
            let label = Self::block_label(cfg, block);
            self.emit_label(&label)?;
            if block == cfg.exit {
                self.emit_epilogue(&kind, dtor_parent.as_deref())?;
                continue;
            }
            self.emit_block_preamble(cfg, block)?;
            let stmts = cfg.blocks[block].stmts.clone();
            for sid in stmts {
                if self.block_done {
                    break; // statements after RETURN in the same block
                }
                self.emit_stmt(sid)?;
            }
            self.emit_terminator(cfg, block)?;
        }
        writeln!(&mut self.output, "}}")?;
        writeln!(&mut self.output)?;

        let fn_name = if cfg.name.is_empty() { "main" } else { cfg.name.as_str() };
        debug!(
            function = fn_name,
            scoped = self.scoped,
            blocks = cfg.blocks.len(),
            "emitted function"
        );
        self.functions.push_str(&self.output);
        self.output.clear();
        Ok(())
    }

    /// Stack slots, parameter spills, and zero-initialization.
    fn emit_prologue(
        &mut self,
        cfg: &Cfg,
        scope_key: Option<&str>,
        param_names: &[String],
        params: &[TypeDesc],
    ) -> Result<(), CodeGenError> {
        // ME pointer slot for methods
        if self.current_class.is_some() {
            self.alloc_local("ME", &TypeDesc::long(), false)?;
            writeln!(&mut self.output, "\tstorel %me, {}", self.locals[&key("ME")].addr)?;
        }

        // Parameters spill to slots so they behave like variables.
        // Record parameters arrive as a pointer and stay one.
        for (i, (name, ty)) in param_names.iter().zip(params).enumerate() {
            let indirect = ty.base == BaseType::UserDefined;
            self.alloc_local(name, ty, indirect)?;
            let slot = self.locals[&key(name)].clone();
            let store = if indirect { "storel" } else { ty.base.store_op() };
            writeln!(&mut self.output, "\t{} %p.{}, {}", store, i, slot.addr)?;
        }

        // Declared locals and local arrays
        if let Some(sk) = scope_key {
            let scope: Option<FuncScope> = self.analysis.fn_scopes.get(sk).cloned();
            if let Some(scope) = scope {
                let mut names: Vec<_> = scope.locals.keys().cloned().collect();
                names.sort();
                for k in names {
                    let v = &scope.locals[&k];
                    if !self.locals.contains_key(&k) {
                        let (name, ty) = (v.name.clone(), v.ty.clone());
                        self.alloc_local(&name, &ty, false)?;
                        self.zero_local(&name)?;
                    }
                }
                let mut arrays: Vec<_> = scope.local_arrays.keys().cloned().collect();
                arrays.sort();
                for k in arrays {
                    let a = &scope.local_arrays[&k];
                    let slot = format!("%arr.{}", super::state::mangle_var(&a.name));
                    writeln!(&mut self.output, "\t{} =l alloc8 {}", slot, ARRAY_DESC_SIZE)?;
                    self.local_arrays.insert(k.clone(), slot);
                }
            }
        }

        // MATCH TYPE bindings are arm-local; give each a typed slot
        for block in &cfg.blocks {
            if let BlockAux::MatchBind {
                arm_ty, binding, ..
            } = &block.aux
            {
                let k = key(binding);
                if !self.locals.contains_key(&k) {
                    let ty = self.match_arm_type(arm_ty);
                    let (binding, ty) = (binding.clone(), ty);
                    self.alloc_local(&binding, &ty, false)?;
                    self.zero_local(&binding)?;
                }
            }
        }

        // Hidden loop slots
        for (id, info) in cfg.loops.iter().enumerate() {
            match info {
                crate::cfg::LoopInfo::For { .. } => {
                    writeln!(&mut self.output, "\t{} =l alloc4 4", Self::for_end_slot(id))?;
                    writeln!(&mut self.output, "\t{} =l alloc4 4", Self::for_step_slot(id))?;
                }
                crate::cfg::LoopInfo::ForEach { .. } => {
                    writeln!(&mut self.output, "\t{} =l alloc8 8", Self::fe_list_slot(id))?;
                    writeln!(&mut self.output, "\t{} =l alloc4 4", Self::fe_idx_slot(id))?;
                    writeln!(&mut self.output, "\t{} =l alloc4 4", Self::fe_len_slot(id))?;
                }
            }
        }

        // SELECT CASE selector slots
        for id in 0..cfg.select_count {
            writeln!(&mut self.output, "\t{} =l alloc8 8", Self::select_slot(id))?;
        }

        // FUNCTION result slot
        if !self.fn_is_sub && self.scope_key.is_some() {
            writeln!(&mut self.output, "\t%retval =l alloc8 8")?;
            writeln!(&mut self.output, "\tstorel 0, %retval")?;
        }
        Ok(())
    }

    fn alloc_local(
        &mut self,
        name: &str,
        ty: &TypeDesc,
        indirect: bool,
    ) -> Result<(), CodeGenError> {
        let stem = super::state::mangle_var(name);
        let k = key(name);
        if ty.base == BaseType::Unknown {
            let val = format!("%v.{}.val", stem);
            let tag = format!("%v.{}.tag", stem);
            writeln!(&mut self.output, "\t{} =l alloc8 8", val)?;
            writeln!(&mut self.output, "\t{} =l alloc8 8", tag)?;
            self.locals.insert(
                k,
                super::state::Slot {
                    addr: val,
                    ty: ty.clone(),
                    tag_addr: Some(tag),
                    indirect: false,
                },
            );
            return Ok(());
        }
        let size = match ty.base {
            BaseType::UserDefined if indirect => 8,
            BaseType::UserDefined => ty
                .object_name
                .as_deref()
                .and_then(|n| self.analysis.symbols.lookup_udt(n))
                .map(|u| u.size.max(1))
                .unwrap_or(8),
            b => b.size().max(1),
        };
        let addr = format!("%v.{}", stem);
        let alloc = if size > 4 { "alloc8" } else { "alloc4" };
        writeln!(&mut self.output, "\t{} =l {} {}", addr, alloc, size)?;
        self.locals.insert(
            k,
            super::state::Slot {
                addr,
                ty: ty.clone(),
                tag_addr: None,
                indirect,
            },
        );
        Ok(())
    }

    /// Zero a local slot so implicit first reads (and the string-release
    /// half of the assignment discipline) see NOTHING rather than junk.
    fn zero_local(&mut self, name: &str) -> Result<(), CodeGenError> {
        let slot = self.locals[&key(name)].clone();
        match slot.ty.base {
            BaseType::Unknown => {
                writeln!(&mut self.output, "\tstorel 0, {}", slot.addr)?;
                if let Some(tag) = &slot.tag_addr {
                    writeln!(&mut self.output, "\tstorel 0, {}", tag)?;
                }
            }
            BaseType::UserDefined => {} // blit targets write every field
            BaseType::Single => writeln!(&mut self.output, "\tstores s_0.0, {}", slot.addr)?,
            BaseType::Double => writeln!(&mut self.output, "\tstored d_0.0, {}", slot.addr)?,
            b => {
                writeln!(
                    &mut self.output,
                    "\t{} 0, {}",
                    b.store_op(),
                    slot.addr
                )?;
            }
        }
        Ok(())
    }

    fn emit_epilogue(
        &mut self,
        kind: &FnKind,
        dtor_parent: Option<&str>,
    ) -> Result<(), CodeGenError> {
        match kind {
            FnKind::Main => {
                writeln!(&mut self.output, "\tcall $samm_exit_scope()")?;
                writeln!(&mut self.output, "\tcall $samm_shutdown()")?;
                writeln!(&mut self.output, "\tret 0")?;
            }
            FnKind::Method { is_dtor: true, .. } => {
                if self.scoped {
                    writeln!(&mut self.output, "\tcall $samm_exit_scope()")?;
                }
                if let Some(parent) = dtor_parent {
                    // Child cleanup ran; hand off to the parent chain
                    let me = self.resolve_var("ME")?;
                    let me = self.load_place(&me)?;
                    writeln!(
                        &mut self.output,
                        "\tcall {}(l {})",
                        method_sym(parent, "DESTRUCTOR"),
                        me.repr
                    )?;
                }
                writeln!(&mut self.output, "\tret")?;
            }
            _ => {
                // Default return path for fall-off-the-end exits
                self.emit_default_return()?;
            }
        }
        self.block_done = true;
        Ok(())
    }

    pub(super) fn emit_default_return(&mut self) -> Result<(), CodeGenError> {
        if self.fn_is_sub {
            if self.scoped {
                writeln!(&mut self.output, "\tcall $samm_exit_scope()")?;
            }
            writeln!(&mut self.output, "\tret")?;
        } else {
            let ret_ty = self.fn_ret.clone();
            let t = self.fresh_temp();
            writeln!(
                &mut self.output,
                "\t{} ={} {} %retval",
                t,
                abi_of(&ret_ty),
                ret_ty.base.load_op()
            )?;
            if self.scoped && ret_ty.base.is_reference() {
                writeln!(&mut self.output, "\tcall $samm_retain_parent(l {})", t)?;
            }
            if self.scoped {
                writeln!(&mut self.output, "\tcall $samm_exit_scope()")?;
            }
            writeln!(&mut self.output, "\tret {}", t)?;
        }
        Ok(())
    }
}

fn param_sig(params: &[TypeDesc]) -> String {
    params
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("{} %p.{}", abi_of(ty), i))
        .collect::<Vec<_>>()
        .join(", ")
}
