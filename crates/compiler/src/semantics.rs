//! Semantic analysis
//!
//! Two passes over the parsed program. Pass 1 registers every top-level
//! declaration (classes, user types, function and sub signatures, labels,
//! DATA items, OPTION settings) so forward references resolve. Pass 2
//! type-checks statement bodies with full symbol visibility and records a
//! resolved [`TypeDesc`] for every expression in a side table indexed by
//! `ExprId`.
//!
//! Variable type inference precedence: explicit `AS` clause, then suffix
//! character, then initializer type, then DOUBLE.

use crate::ast::{
    Ast, BinOp, CaseLabel, DataValue, ExitKind, ExprId, ExprKind, FuncDecl, MethodKind,
    OptionSetting, ParsedType, PrintArgs, Program, StmtId, StmtKind, UnOp, VarDecl,
};
use crate::config::CompilerConfig;
use crate::diagnostics::{DiagCategory, DiagnosticSink, SourceLoc};
use crate::symbols::{
    ArrayInfo, ClassInfo, FieldInfo, FuncInfo, FuncScope, MethodInfo, OBJECT_HEADER_SIZE,
    SymbolTable, UdtInfo, VTABLE_SLOT_METHODS, VarInfo, key, layout_fields,
};
use crate::types::{BaseType, TypeDesc};
use std::collections::{HashMap, HashSet};

/// Scope key of a free function or sub.
pub fn func_scope_key(name: &str) -> String {
    key(name)
}

/// Scope key of a class method.
pub fn method_scope_key(class: &str, method: &str) -> String {
    format!("{}.{}", key(class), key(method))
}

/// The immutable result of semantic analysis, consumed by the CFG builder
/// and the IR emitter.
#[derive(Debug)]
pub struct Analysis {
    pub symbols: SymbolTable,
    pub expr_types: Vec<TypeDesc>,
    pub fn_scopes: HashMap<String, FuncScope>,
    pub option_base: u32,
    pub data_values: Vec<DataValue>,
}

impl Analysis {
    pub fn expr_type(&self, id: ExprId) -> &TypeDesc {
        &self.expr_types[id.0 as usize]
    }
}

pub fn analyze(
    ast: &Ast,
    program: &Program,
    config: &CompilerConfig,
    sink: &mut DiagnosticSink,
) -> Analysis {
    let mut analyzer = Analyzer {
        ast,
        symbols: SymbolTable::new(),
        expr_types: vec![TypeDesc::void(); ast.expr_count()],
        fn_scopes: HashMap::new(),
        sink,
        option_base: 0,
        option_explicit: config.option_explicit,
        strict_match_type: config.strict_match_type,
        data_values: Vec::new(),
        current_key: None,
        current_scope: None,
        current_class: None,
        current_fn: None,
        loop_stack: Vec::new(),
        match_bindings: Vec::new(),
    };
    analyzer.register_pass(program);
    analyzer.check_pass(program);
    Analysis {
        symbols: analyzer.symbols,
        expr_types: analyzer.expr_types,
        fn_scopes: analyzer.fn_scopes,
        option_base: analyzer.option_base,
        data_values: analyzer.data_values,
    }
}

struct Analyzer<'a> {
    ast: &'a Ast,
    symbols: SymbolTable,
    expr_types: Vec<TypeDesc>,
    fn_scopes: HashMap<String, FuncScope>,
    sink: &'a mut DiagnosticSink,
    option_base: u32,
    option_explicit: bool,
    strict_match_type: bool,
    data_values: Vec<DataValue>,
    /// Scope key of the function/method being checked; None in main
    current_key: Option<String>,
    current_scope: Option<FuncScope>,
    current_class: Option<String>,
    /// (uppercased name, return type, is_sub) of the enclosing callable
    current_fn: Option<(String, TypeDesc, bool)>,
    loop_stack: Vec<ExitKind>,
    /// Active MATCH TYPE arm bindings (name key, type)
    match_bindings: Vec<(String, TypeDesc)>,
}

impl<'a> Analyzer<'a> {
    // ==================================================================
    // Pass 1: registration
    // ==================================================================

    fn register_pass(&mut self, program: &Program) {
        // OPTION settings apply program-wide, so pick them up first
        for &sid in &program.body {
            if let StmtKind::Option(setting) = &self.ast.stmt(sid).kind {
                match setting {
                    OptionSetting::Explicit => self.option_explicit = true,
                    OptionSetting::Base(b) => self.option_base = *b,
                }
            }
        }

        let mut class_decls = Vec::new();
        for &sid in &program.body {
            let stmt = self.ast.stmt(sid);
            let loc = stmt.loc;
            match &stmt.kind {
                StmtKind::FunctionDef(decl) => self.register_function(decl, false, loc),
                StmtKind::SubDef(decl) => self.register_function(decl, true, loc),
                StmtKind::TypeDecl { name, fields } => self.register_udt(name, fields, loc),
                StmtKind::ClassDecl { .. } => class_decls.push(sid),
                _ => {}
            }
        }
        self.resolve_classes(&class_decls);

        // Labels and DATA items live anywhere in the main body, including
        // nested control-flow blocks.
        let body: Vec<StmtId> = program.body.clone();
        self.collect_labels_and_data(&body, true);
    }

    fn register_function(&mut self, decl: &FuncDecl, is_sub: bool, loc: SourceLoc) {
        let k = key(base_name(&decl.name));
        if self.symbols.functions.contains_key(&k) {
            self.error(
                DiagCategory::Resolution,
                loc,
                format!("duplicate declaration of {}", decl.name),
            );
            return;
        }
        let mut params = Vec::new();
        let mut param_names = Vec::new();
        for p in &decl.params {
            params.push(self.declared_type(&p.ty, &p.name, None, loc));
            param_names.push(p.name.clone());
        }
        let ret = if is_sub {
            TypeDesc::void()
        } else {
            self.declared_type(&decl.ret, &decl.name, None, loc)
        };
        self.symbols.functions.insert(
            k,
            FuncInfo {
                name: base_name(&decl.name).to_string(),
                param_names,
                params,
                ret,
                is_sub,
            },
        );
    }

    fn register_udt(&mut self, name: &str, fields: &[crate::ast::FieldDecl], loc: SourceLoc) {
        let k = key(name);
        if self.symbols.user_types.contains_key(&k) {
            self.error(
                DiagCategory::Resolution,
                loc,
                format!("duplicate declaration of TYPE {}", name),
            );
            return;
        }
        let mut decls = Vec::new();
        let mut has_strings = false;
        for f in fields {
            let ty = self.resolve_parsed_type(&f.ty, loc);
            if ty.base == BaseType::Str {
                has_strings = true;
            }
            if ty.base == BaseType::UserDefined
                && let Some(nested) = ty
                    .object_name
                    .as_deref()
                    .and_then(|n| self.symbols.lookup_udt(n))
                && nested.has_string_fields
            {
                has_strings = true;
            }
            decls.push((f.name.clone(), ty));
        }
        let (fields, size) = layout_fields(&decls, 0, &self.symbols);
        self.symbols.user_types.insert(
            k,
            UdtInfo {
                name: name.to_string(),
                fields,
                size,
                has_string_fields: has_strings,
            },
        );
    }

    fn resolve_classes(&mut self, class_decls: &[StmtId]) {
        // Register names first so EXTENDS can reference any class
        let mut order = Vec::new();
        let mut by_name: HashMap<String, StmtId> = HashMap::new();
        for &sid in class_decls {
            if let StmtKind::ClassDecl { name, parent, .. } = &self.ast.stmt(sid).kind {
                let k = key(name);
                if by_name.contains_key(&k) {
                    let loc = self.ast.stmt(sid).loc;
                    self.error(
                        DiagCategory::Resolution,
                        loc,
                        format!("duplicate declaration of CLASS {}", name),
                    );
                    continue;
                }
                by_name.insert(k.clone(), sid);
                order.push((k, parent.clone()));
            }
        }

        // Cycle detection on the parent chain
        let parents: HashMap<String, Option<String>> = order
            .iter()
            .map(|(k, p)| (k.clone(), p.as_ref().map(|p| key(p))))
            .collect();
        for (k, _) in &order {
            let mut seen = HashSet::new();
            let mut cur = Some(k.clone());
            while let Some(c) = cur {
                if !seen.insert(c.clone()) {
                    let sid = by_name[k];
                    let loc = self.ast.stmt(sid).loc;
                    self.error(
                        DiagCategory::Semantic,
                        loc,
                        format!("inheritance cycle involving class {}", k),
                    );
                    break;
                }
                cur = parents.get(&c).cloned().flatten();
            }
        }

        // Process parents before children
        let mut done: HashSet<String> = HashSet::new();
        let mut remaining: Vec<String> = order.iter().map(|(k, _)| k.clone()).collect();
        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|k| match parents.get(*k).cloned().flatten() {
                    Some(p) => done.contains(&p) || !parents.contains_key(&p),
                    None => true,
                })
                .cloned()
                .collect();
            if ready.is_empty() {
                break; // cycle already reported
            }
            for k in ready {
                self.resolve_one_class(by_name[&k]);
                done.insert(k.clone());
                remaining.retain(|r| r != &k);
            }
        }
    }

    fn resolve_one_class(&mut self, sid: StmtId) {
        let stmt = self.ast.stmt(sid);
        let loc = stmt.loc;
        let StmtKind::ClassDecl {
            name,
            parent,
            fields,
            methods,
        } = &stmt.kind
        else {
            return;
        };

        let parent_info = match parent {
            Some(p) => match self.symbols.lookup_class(p) {
                Some(info) => Some(info.clone()),
                None => {
                    self.error(
                        DiagCategory::Resolution,
                        loc,
                        format!("unknown parent class {} for {}", p, name),
                    );
                    None
                }
            },
            None => None,
        };

        let base_offset = parent_info
            .as_ref()
            .map(|p| p.object_size)
            .unwrap_or(OBJECT_HEADER_SIZE);
        let mut field_decls = Vec::new();
        for f in fields {
            field_decls.push((f.name.clone(), self.resolve_parsed_type(&f.ty, loc)));
        }
        let (own_fields, object_size) = layout_fields(&field_decls, base_offset, &self.symbols);
        let mut all_fields: Vec<FieldInfo> = parent_info
            .as_ref()
            .map(|p| p.fields.clone())
            .unwrap_or_default();
        all_fields.extend(own_fields);

        let mut vtable: Vec<MethodInfo> = parent_info
            .as_ref()
            .map(|p| p.methods.clone())
            .unwrap_or_default();
        let mut has_ctor = false;
        let mut has_dtor = false;
        let mut ctor_params = Vec::new();
        let mut ctor_param_names = Vec::new();

        for m in methods {
            let mut params = Vec::new();
            let mut param_names = Vec::new();
            for p in &m.decl.params {
                params.push(self.declared_type(&p.ty, &p.name, None, loc));
                param_names.push(p.name.clone());
            }
            match m.kind {
                MethodKind::Constructor => {
                    has_ctor = true;
                    ctor_params = params;
                    ctor_param_names = param_names;
                }
                MethodKind::Destructor => {
                    has_dtor = true;
                }
                MethodKind::Normal => {
                    // A METHOD without an AS clause or suffix is sub-like
                    let ret = if m.decl.ret.is_none() && !has_suffix(&m.decl.name) {
                        TypeDesc::void()
                    } else {
                        self.declared_type(&m.decl.ret, &m.decl.name, None, loc)
                    };
                    let mname = base_name(&m.decl.name).to_string();
                    if let Some(existing) =
                        vtable.iter_mut().find(|v| v.name.eq_ignore_ascii_case(&mname))
                    {
                        // Override keeps the inherited slot
                        existing.defined_in = name.clone();
                        existing.params = params;
                        existing.param_names = param_names;
                        existing.ret = ret;
                    } else {
                        let slot = VTABLE_SLOT_METHODS + vtable.len();
                        vtable.push(MethodInfo {
                            name: mname,
                            param_names,
                            params,
                            ret,
                            slot,
                            defined_in: name.clone(),
                        });
                    }
                }
            }
        }

        let class_id = self.symbols.next_class_id();
        self.symbols.classes.insert(
            key(name),
            ClassInfo {
                name: name.clone(),
                parent: parent.clone(),
                fields: all_fields,
                methods: vtable,
                has_ctor,
                has_dtor,
                ctor_params,
                ctor_param_names,
                object_size,
                class_id,
            },
        );
    }

    fn collect_labels_and_data(&mut self, body: &[StmtId], register_labels: bool) {
        for &sid in body {
            let stmt = self.ast.stmt(sid);
            match &stmt.kind {
                StmtKind::Label { name } if register_labels => {
                    let k = key(name);
                    if self.symbols.labels.insert(k, stmt.loc).is_some() {
                        let loc = stmt.loc;
                        self.error(
                            DiagCategory::Resolution,
                            loc,
                            format!("duplicate label {}", name),
                        );
                    }
                }
                StmtKind::Data { values } => {
                    self.data_values.extend(values.iter().cloned());
                }
                _ => {}
            }
            // Recurse into nested bodies; function bodies keep their own
            // labels but contribute DATA to the shared pool.
            for child in child_bodies(&stmt.kind) {
                let nested_register = register_labels
                    && !matches!(
                        stmt.kind,
                        StmtKind::FunctionDef(_) | StmtKind::SubDef(_) | StmtKind::ClassDecl { .. }
                    );
                let child: Vec<StmtId> = child.to_vec();
                self.collect_labels_and_data(&child, nested_register);
            }
        }
    }

    // ==================================================================
    // Pass 2: type checking
    // ==================================================================

    fn check_pass(&mut self, program: &Program) {
        // Main-program statements first so globals exist before bodies
        for &sid in &program.body {
            let stmt = self.ast.stmt(sid);
            match &stmt.kind {
                StmtKind::FunctionDef(_)
                | StmtKind::SubDef(_)
                | StmtKind::ClassDecl { .. }
                | StmtKind::TypeDecl { .. } => {}
                _ => self.check_stmt(sid),
            }
            if self.sink.at_cap() {
                return;
            }
        }

        for &sid in &program.body {
            let stmt = self.ast.stmt(sid);
            match &stmt.kind {
                StmtKind::FunctionDef(decl) => self.check_function(decl, false, None),
                StmtKind::SubDef(decl) => self.check_function(decl, true, None),
                StmtKind::ClassDecl { name, methods, .. } => {
                    for m in methods {
                        let is_sub = m.kind != MethodKind::Normal
                            || m.decl.ret.is_none() && !has_suffix(&m.decl.name);
                        self.check_function(&m.decl, is_sub, Some(name.clone()));
                    }
                }
                _ => {}
            }
            if self.sink.at_cap() {
                return;
            }
        }
    }

    fn check_function(&mut self, decl: &FuncDecl, is_sub: bool, class: Option<String>) {
        let scope_key = match &class {
            Some(c) => method_scope_key(c, base_name(&decl.name)),
            None => func_scope_key(base_name(&decl.name)),
        };
        let mut scope = FuncScope::default();
        let (param_names, params, ret) = match &class {
            Some(c) => {
                let info = match self.symbols.lookup_class(c) {
                    Some(info) => info,
                    None => return,
                };
                match decl.name.as_str() {
                    "CONSTRUCTOR" => (
                        info.ctor_param_names.clone(),
                        info.ctor_params.clone(),
                        TypeDesc::void(),
                    ),
                    "DESTRUCTOR" => (Vec::new(), Vec::new(), TypeDesc::void()),
                    _ => match info.method(base_name(&decl.name)) {
                        Some(m) => (m.param_names.clone(), m.params.clone(), m.ret.clone()),
                        None => return,
                    },
                }
            }
            None => match self.symbols.lookup_function(base_name(&decl.name)) {
                Some(f) => (f.param_names.clone(), f.params.clone(), f.ret.clone()),
                None => return,
            },
        };
        for (name, ty) in param_names.iter().zip(&params) {
            scope.params.insert(
                key(name),
                VarInfo {
                    name: name.clone(),
                    ty: ty.clone(),
                },
            );
        }

        self.current_key = Some(scope_key.clone());
        self.current_scope = Some(scope);
        self.current_class = class;
        self.current_fn = Some((key(base_name(&decl.name)), ret, is_sub));
        for &sid in &decl.body {
            self.check_stmt(sid);
            if self.sink.at_cap() {
                break;
            }
        }
        let scope = self.current_scope.take().unwrap_or_default();
        self.fn_scopes.insert(scope_key, scope);
        self.current_key = None;
        self.current_class = None;
        self.current_fn = None;
    }

    fn check_body(&mut self, body: &[StmtId]) {
        for &sid in body {
            self.check_stmt(sid);
            if self.sink.at_cap() {
                return;
            }
        }
    }

    fn check_stmt(&mut self, sid: StmtId) {
        let stmt = self.ast.stmt(sid);
        let loc = stmt.loc;
        match &stmt.kind {
            StmtKind::Print(args) | StmtKind::Console(args) => self.check_print(args, loc),
            StmtKind::Let { target, value } => self.check_let(*target, *value, loc),
            StmtKind::Dim { decls } => {
                for d in decls {
                    self.check_var_decl(d, loc, self.current_key.is_some());
                }
            }
            StmtKind::Local { decls } => {
                if self.current_key.is_none() {
                    self.error(
                        DiagCategory::Semantic,
                        loc,
                        "LOCAL is only allowed inside FUNCTION or SUB",
                    );
                    return;
                }
                for d in decls {
                    self.check_var_decl(d, loc, true);
                }
            }
            StmtKind::Redim { name, dims } => {
                if self.lookup_array(name).is_none() {
                    self.error(
                        DiagCategory::Resolution,
                        loc,
                        format!("REDIM of undeclared array {}", name),
                    );
                }
                for &d in dims {
                    self.require_numeric(d, "array bound");
                }
            }
            StmtKind::If {
                cond,
                then_body,
                elifs,
                else_body,
            } => {
                self.require_numeric(*cond, "IF condition");
                self.check_body(then_body);
                for (c, body) in elifs {
                    self.require_numeric(*c, "ELSEIF condition");
                    self.check_body(body);
                }
                if let Some(body) = else_body {
                    self.check_body(body);
                }
            }
            StmtKind::For {
                var,
                start,
                end,
                step,
                body,
            } => self.check_for(var, *start, *end, *step, body, loc),
            StmtKind::ForEach {
                tag_var,
                var,
                list,
                body,
            } => self.check_for_each(tag_var.as_deref(), var, *list, body, loc),
            StmtKind::While { cond, body } => {
                self.require_numeric(*cond, "WHILE condition");
                self.loop_stack.push(ExitKind::While);
                self.check_body(body);
                self.loop_stack.pop();
            }
            StmtKind::DoLoop { cond, body, .. } => {
                self.require_numeric(*cond, "DO/LOOP condition");
                self.loop_stack.push(ExitKind::Do);
                self.check_body(body);
                self.loop_stack.pop();
            }
            StmtKind::Repeat { body, cond } => {
                self.loop_stack.push(ExitKind::Do);
                self.check_body(body);
                self.loop_stack.pop();
                self.require_numeric(*cond, "UNTIL condition");
            }
            StmtKind::SelectCase {
                selector,
                arms,
                else_body,
            } => self.check_select(*selector, arms, else_body.as_deref(), loc),
            StmtKind::TryCatch {
                body,
                catches,
                finally,
            } => {
                self.check_body(body);
                for c in catches {
                    if let Some(code) = c.code {
                        self.require_integer(code, "CATCH code");
                    }
                    self.check_body(&c.body);
                }
                if let Some(f) = finally {
                    self.check_body(f);
                }
            }
            StmtKind::Throw { code, line } => {
                self.require_integer(*code, "THROW code");
                if let Some(l) = line {
                    self.require_integer(*l, "THROW line");
                }
            }
            StmtKind::Call { name, args } => self.check_call(name, args, loc),
            StmtKind::CallMethod { call } => {
                self.check_expr(*call);
            }
            StmtKind::Return { value } => self.check_return(*value, loc),
            StmtKind::Goto { .. } | StmtKind::Gosub { .. } | StmtKind::Label { .. } => {
                // Targets resolve during CFG construction
            }
            StmtKind::OnGoto { selector, .. } | StmtKind::OnGosub { selector, .. } => {
                self.require_integer(*selector, "ON selector");
            }
            StmtKind::Exit { kind } => self.check_exit(*kind, loc),
            StmtKind::End => {}
            StmtKind::Shared { names } => self.check_shared(names, loc),
            StmtKind::Inc { target, amount } | StmtKind::Dec { target, amount } => {
                let ty = self.check_expr(*target);
                if !ty.base.is_numeric() {
                    let tloc = self.ast.expr(*target).loc;
                    self.error(
                        DiagCategory::Type,
                        tloc,
                        format!("INC/DEC target must be numeric, found {}", ty),
                    );
                }
                if let Some(a) = amount {
                    self.require_numeric(*a, "INC/DEC amount");
                }
            }
            StmtKind::Swap { a, b } => {
                let ta = self.check_expr(*a);
                let tb = self.check_expr(*b);
                if ta.base != tb.base {
                    self.error(
                        DiagCategory::Type,
                        loc,
                        format!("SWAP operands must have the same type ({} vs {})", ta, tb),
                    );
                }
            }
            StmtKind::TypeDecl { .. }
            | StmtKind::ClassDecl { .. }
            | StmtKind::FunctionDef(_)
            | StmtKind::SubDef(_) => {
                if self.current_key.is_some() {
                    self.error(
                        DiagCategory::Semantic,
                        loc,
                        "declarations must appear at the top level",
                    );
                }
            }
            StmtKind::Option(_) | StmtKind::Data { .. } => {} // handled in pass 1
            StmtKind::Read { targets } => {
                for &t in targets.clone().iter() {
                    let ty = self.check_store_target(t);
                    if !ty.base.is_numeric() && ty.base != BaseType::Str && ty.base != BaseType::Unknown {
                        let tloc = self.ast.expr(t).loc;
                        self.error(
                            DiagCategory::Type,
                            tloc,
                            "READ target must be numeric or string",
                        );
                    }
                }
            }
            StmtKind::Restore { index } => {
                if let Some(i) = index {
                    self.require_integer(*i, "RESTORE index");
                }
            }
            StmtKind::Input { targets, .. } => {
                for &t in targets.clone().iter() {
                    let ty = self.check_store_target(t);
                    if !ty.base.is_numeric() && ty.base != BaseType::Str && ty.base != BaseType::Unknown {
                        let tloc = self.ast.expr(t).loc;
                        self.error(
                            DiagCategory::Type,
                            tloc,
                            "INPUT target must be numeric or string",
                        );
                    }
                }
            }
            StmtKind::MatchType {
                subject,
                arms,
                else_body,
            } => self.check_match_type(*subject, arms, else_body.as_deref(), loc),
            StmtKind::Delete { target } => {
                let ty = self.check_expr(*target);
                if ty.base != BaseType::ClassInstance {
                    self.error(
                        DiagCategory::Type,
                        loc,
                        format!("DELETE target must be a class instance, found {}", ty),
                    );
                }
            }
            StmtKind::Worker { name, func, args } => self.check_worker(name, func, args, loc),
            StmtKind::Await { worker, target } => {
                if self.lookup_var_type(worker).is_none() {
                    self.error(
                        DiagCategory::Resolution,
                        loc,
                        format!("AWAIT of unknown worker {}", worker),
                    );
                }
                if let Some(t) = target {
                    self.check_store_target(*t);
                }
            }
        }
    }

    fn check_print(&mut self, args: &PrintArgs, _loc: SourceLoc) {
        for item in &args.items {
            let ty = self.check_expr(item.expr);
            if !ty.base.is_numeric() && ty.base != BaseType::Str {
                let loc = self.ast.expr(item.expr).loc;
                self.error(
                    DiagCategory::Type,
                    loc,
                    format!("cannot PRINT a value of type {}", ty),
                );
            }
        }
    }

    fn check_let(&mut self, target: ExprId, value: ExprId, loc: SourceLoc) {
        let value_ty = self.check_expr(value);

        // Implicit declaration of a new variable on first assignment
        // (whole-array targets resolve through the array tables instead)
        if let ExprKind::Variable { name } = &self.ast.expr(target).kind
            && self.lookup_var_type(name).is_none()
            && self.lookup_array(name).is_none()
            && !self.is_function_result_name(name)
        {
            if self.option_explicit {
                self.error_with_hint(
                    DiagCategory::Resolution,
                    loc,
                    format!("undeclared variable {} (OPTION EXPLICIT)", name),
                    "declare it with DIM",
                );
                self.set_type(target, TypeDesc::unknown());
                return;
            }
            let ty = infer_var_type(name, Some(&value_ty));
            self.declare_var(name, ty.clone(), loc);
            self.set_type(target, ty.clone());
            self.check_assignable(&value_ty, &ty, value, loc);
            return;
        }

        let target_ty = self.check_expr(target);
        let assignable = match &self.ast.expr(target).kind {
            ExprKind::Variable { .. }
            | ExprKind::MemberAccess { .. }
            | ExprKind::ArrayAccess { .. } => true,
            // An array reference the parser could not classify
            ExprKind::FunctionCall { name, .. } => self.lookup_array(name).is_some(),
            _ => false,
        };
        if !assignable {
            self.error(DiagCategory::Semantic, loc, "target is not assignable");
            return;
        }
        self.check_assignable(&value_ty, &target_ty, value, loc);
    }

    fn check_assignable(
        &mut self,
        value_ty: &TypeDesc,
        target_ty: &TypeDesc,
        value: ExprId,
        loc: SourceLoc,
    ) {
        // NOTHING assigns to any reference type
        if matches!(self.ast.expr(value).kind, ExprKind::Nothing) {
            return;
        }
        match (target_ty.base, value_ty.base) {
            (BaseType::Unknown, _) | (_, BaseType::Unknown) => {}
            (BaseType::Str, BaseType::Str) => {}
            (BaseType::ClassInstance, BaseType::ClassInstance) => {
                let t = target_ty.object_name.as_deref().unwrap_or("");
                let v = value_ty.object_name.as_deref().unwrap_or("");
                if !v.is_empty() && !t.is_empty() && !self.symbols.is_ancestor_or_same(v, t) {
                    self.error(
                        DiagCategory::Type,
                        loc,
                        format!("cannot assign {} to a variable of class {}", v, t),
                    );
                }
            }
            (BaseType::List, BaseType::List) => {
                let te = target_ty.element.as_deref();
                let ve = value_ty.element.as_deref();
                let target_any = te.map(|t| t.base == BaseType::Unknown).unwrap_or(true);
                // An empty LIST() literal adopts the receiver's element type
                if let ExprKind::ListLit { elems } = &self.ast.expr(value).kind
                    && elems.is_empty()
                {
                    self.set_type(value, target_ty.clone());
                    return;
                }
                if !target_any && te != ve {
                    self.error(
                        DiagCategory::Type,
                        loc,
                        format!("cannot assign {} to {}", value_ty, target_ty),
                    );
                }
            }
            (t, v) if t.is_numeric() && v.is_numeric() => {
                if !value_ty.widens_to(target_ty) && !self.literal_fits(value, target_ty) {
                    self.error_with_hint(
                        DiagCategory::Type,
                        loc,
                        format!("narrowing assignment from {} to {}", value_ty, target_ty),
                        "narrowing conversions must be explicit",
                    );
                }
            }
            (BaseType::Hashmap, BaseType::Hashmap) => {}
            (BaseType::ArrayDesc, BaseType::ArrayDesc)
                if target_ty.element == value_ty.element => {}
            (BaseType::UserDefined, BaseType::UserDefined)
                if target_ty.object_name == value_ty.object_name => {}
            _ => {
                self.error(
                    DiagCategory::Type,
                    loc,
                    format!("cannot assign {} to {}", value_ty, target_ty),
                );
            }
        }
    }

    fn check_var_decl(&mut self, d: &VarDecl, loc: SourceLoc, local: bool) {
        let explicit = d.ty.as_ref().map(|t| self.resolve_parsed_type(t, loc));
        let init_ty = d.init.map(|e| self.check_expr(e));

        if !d.dims.is_empty() {
            for &dim in &d.dims {
                self.require_numeric(dim, "array bound");
            }
            let element = explicit
                .or_else(|| suffix_type(&d.name))
                .unwrap_or_else(TypeDesc::double);
            let info = ArrayInfo {
                name: d.name.clone(),
                element,
                rank: d.dims.len(),
                is_global: !local,
            };
            let k = key(&d.name);
            let dup = if local {
                self.current_scope
                    .as_mut()
                    .map(|s| s.local_arrays.insert(k, info).is_some())
                    .unwrap_or(false)
            } else {
                self.symbols.global_arrays.insert(k, info).is_some()
            };
            if dup {
                self.error(
                    DiagCategory::Resolution,
                    loc,
                    format!("duplicate declaration of array {}", d.name),
                );
            }
            return;
        }

        let ty = explicit
            .or_else(|| suffix_type(&d.name))
            .or_else(|| init_ty.clone())
            .unwrap_or_else(TypeDesc::double);

        if self.var_declared_here(&d.name, local) {
            self.error(
                DiagCategory::Resolution,
                loc,
                format!("duplicate declaration of {}", d.name),
            );
            return;
        }
        if let (Some(init), Some(init_ty)) = (d.init, init_ty.as_ref()) {
            self.check_assignable(init_ty, &ty, init, loc);
        }
        self.declare_var(&d.name, ty, loc);
    }

    fn check_for(
        &mut self,
        var: &str,
        start: ExprId,
        end: ExprId,
        step: Option<ExprId>,
        body: &[StmtId],
        loc: SourceLoc,
    ) {
        match self.lookup_var_type(var) {
            Some(ty) if !ty.base.is_numeric() => {
                self.error(
                    DiagCategory::Type,
                    loc,
                    format!("FOR variable {} must be numeric, found {}", var, ty),
                );
            }
            Some(_) => {}
            None => {
                // FOR runs integer arithmetic; an implicit loop variable is
                // INTEGER regardless of the numeric default.
                let ty = suffix_type(var).unwrap_or_else(TypeDesc::integer);
                self.declare_var(var, ty, loc);
            }
        }
        self.require_numeric(start, "FOR start");
        self.require_numeric(end, "FOR end");
        if let Some(s) = step {
            self.require_numeric(s, "STEP");
            if let ExprKind::Number { value, .. } = &self.ast.expr(s).kind
                && *value == 0.0
            {
                self.sink.warning(
                    DiagCategory::Semantic,
                    self.ast.expr(s).loc,
                    "STEP 0 never terminates",
                );
            }
        }
        self.loop_stack.push(ExitKind::For);
        self.check_body(body);
        self.loop_stack.pop();
    }

    fn check_for_each(
        &mut self,
        tag_var: Option<&str>,
        var: &str,
        list: ExprId,
        body: &[StmtId],
        loc: SourceLoc,
    ) {
        let list_ty = self.check_expr(list);
        let elem_ty = match list_ty.base {
            BaseType::List => list_ty
                .element
                .as_deref()
                .cloned()
                .unwrap_or_else(TypeDesc::unknown),
            _ => {
                self.error(
                    DiagCategory::Type,
                    loc,
                    format!("FOR EACH requires a LIST, found {}", list_ty),
                );
                TypeDesc::unknown()
            }
        };
        if self.lookup_var_type(var).is_none() {
            self.declare_var(var, elem_ty, loc);
        }
        if let Some(tv) = tag_var
            && self.lookup_var_type(tv).is_none()
        {
            self.declare_var(tv, TypeDesc::integer(), loc);
        }
        self.loop_stack.push(ExitKind::For);
        self.check_body(body);
        self.loop_stack.pop();
    }

    fn check_select(
        &mut self,
        selector: ExprId,
        arms: &[crate::ast::CaseArm],
        else_body: Option<&[StmtId]>,
        _loc: SourceLoc,
    ) {
        let sel_ty = self.check_expr(selector);
        for arm in arms {
            for label in &arm.labels {
                match label {
                    CaseLabel::Expr(e) | CaseLabel::Rel(_, e) => {
                        self.check_case_operand(*e, &sel_ty);
                    }
                    CaseLabel::Range(lo, hi) => {
                        self.check_case_operand(*lo, &sel_ty);
                        self.check_case_operand(*hi, &sel_ty);
                    }
                }
            }
            self.check_body(&arm.body);
        }
        if let Some(body) = else_body {
            self.check_body(body);
        }
    }

    fn check_case_operand(&mut self, e: ExprId, sel_ty: &TypeDesc) {
        let ty = self.check_expr(e);
        let compatible = (ty.base.is_numeric() && sel_ty.base.is_numeric())
            || (ty.base == BaseType::Str && sel_ty.base == BaseType::Str);
        if !compatible {
            let loc = self.ast.expr(e).loc;
            self.error(
                DiagCategory::Type,
                loc,
                format!("CASE value of type {} does not match selector {}", ty, sel_ty),
            );
        }
    }

    fn check_match_type(
        &mut self,
        subject: ExprId,
        arms: &[crate::ast::MatchArm],
        else_body: Option<&[StmtId]>,
        loc: SourceLoc,
    ) {
        let subject_ty = self.check_expr(subject);
        if subject_ty.base != BaseType::Unknown {
            self.error_with_hint(
                DiagCategory::Semantic,
                loc,
                format!(
                    "MATCH TYPE subject must carry a runtime type tag, found {}",
                    subject_ty
                ),
                "MATCH TYPE works on LIST OF ANY elements",
            );
        }
        if !matches!(self.ast.expr(subject).kind, ExprKind::Variable { .. }) {
            self.error(
                DiagCategory::Semantic,
                loc,
                "MATCH TYPE subject must be a variable",
            );
        }

        let mut seen_tags = HashSet::new();
        for arm in arms {
            let arm_ty = self.resolve_parsed_type(&arm.ty, arm.loc);
            match arm_ty.atom_tag() {
                Some(tag) => {
                    if !seen_tags.insert(tag) {
                        self.error(
                            DiagCategory::Semantic,
                            arm.loc,
                            format!("duplicate MATCH TYPE arm for {}", arm_ty),
                        );
                    }
                }
                None => {
                    self.error(
                        DiagCategory::Semantic,
                        arm.loc,
                        format!("{} is not a valid MATCH TYPE arm type", arm_ty),
                    );
                }
            }
            // The binding's suffix must agree with the declared arm type
            if let Some(sty) = suffix_type(&arm.binding)
                && sty.base != arm_ty.base
                && !(sty.base.is_integer() && arm_ty.base.is_integer())
            {
                self.error(
                    DiagCategory::Type,
                    arm.loc,
                    format!(
                        "binding {} has suffix type {} but the arm declares {}",
                        arm.binding, sty, arm_ty
                    ),
                );
            }
            // The binding is visible in the arm body only
            self.match_bindings.push((key(&arm.binding), arm_ty));
            self.check_body(&arm.body);
            self.match_bindings.pop();
        }
        match else_body {
            Some(body) => self.check_body(body),
            None => {
                // Five runtime tags exist; fewer arms means silent
                // fall-through for the rest
                if self.strict_match_type && seen_tags.len() < 5 {
                    self.sink.warning(
                        DiagCategory::Semantic,
                        loc,
                        "MATCH TYPE covers only some runtime tags and has no CASE ELSE",
                    );
                }
            }
        }
    }

    fn check_call(&mut self, name: &str, args: &[ExprId], loc: SourceLoc) {
        let arg_tys: Vec<TypeDesc> = args.iter().map(|&a| self.check_expr(a)).collect();
        let Some(f) = self.symbols.lookup_function(base_name(name)).cloned() else {
            self.error(
                DiagCategory::Resolution,
                loc,
                format!("call to undeclared sub or function {}", name),
            );
            return;
        };
        self.check_args(&f.name, &f.params, &arg_tys, args, loc);
    }

    fn check_args(
        &mut self,
        name: &str,
        params: &[TypeDesc],
        arg_tys: &[TypeDesc],
        args: &[ExprId],
        loc: SourceLoc,
    ) {
        if params.len() != arg_tys.len() {
            self.error(
                DiagCategory::Type,
                loc,
                format!(
                    "{} expects {} argument(s), found {}",
                    name,
                    params.len(),
                    arg_tys.len()
                ),
            );
            return;
        }
        for ((p, a), &arg) in params.iter().zip(arg_tys).zip(args) {
            self.check_assignable(a, p, arg, self.ast.expr(arg).loc);
        }
    }

    fn check_return(&mut self, value: Option<ExprId>, loc: SourceLoc) {
        match (&self.current_fn.clone(), value) {
            (None, None) => {} // GOSUB return in the main program
            (None, Some(_)) => {
                self.error(
                    DiagCategory::Semantic,
                    loc,
                    "RETURN with a value is only allowed inside FUNCTION",
                );
            }
            (Some((_, _, true)), Some(_)) => {
                self.error(DiagCategory::Semantic, loc, "SUB cannot return a value");
            }
            (Some((_, ret, false)), Some(v)) => {
                let vty = self.check_expr(v);
                let ret = ret.clone();
                self.check_assignable(&vty, &ret, v, loc);
            }
            (Some(_), None) => {}
        }
    }

    fn check_exit(&mut self, kind: ExitKind, loc: SourceLoc) {
        match kind {
            ExitKind::For | ExitKind::While | ExitKind::Do => {
                if !self.loop_stack.contains(&kind) {
                    self.error(
                        DiagCategory::Semantic,
                        loc,
                        format!("EXIT {:?} outside a matching loop", kind).to_uppercase(),
                    );
                }
            }
            ExitKind::Function => {
                if !matches!(self.current_fn, Some((_, _, false))) {
                    self.error(DiagCategory::Semantic, loc, "EXIT FUNCTION outside FUNCTION");
                }
            }
            ExitKind::Sub => {
                if !matches!(self.current_fn, Some((_, _, true))) {
                    self.error(DiagCategory::Semantic, loc, "EXIT SUB outside SUB");
                }
            }
        }
    }

    fn check_shared(&mut self, names: &[String], loc: SourceLoc) {
        if self.current_key.is_none() {
            self.error(
                DiagCategory::Semantic,
                loc,
                "SHARED is only allowed inside FUNCTION or SUB",
            );
            return;
        }
        for name in names {
            let k = key(name);
            let known =
                self.symbols.globals.contains_key(&k) || self.symbols.global_arrays.contains_key(&k);
            if !known {
                self.error(
                    DiagCategory::Resolution,
                    loc,
                    format!("SHARED references unknown global {}", name),
                );
                continue;
            }
            if let Some(scope) = self.current_scope.as_mut() {
                scope.shared.insert(k);
            }
        }
    }

    fn check_worker(&mut self, name: &str, func: &str, args: &[ExprId], loc: SourceLoc) {
        let arg_tys: Vec<TypeDesc> = args.iter().map(|&a| self.check_expr(a)).collect();
        match self.symbols.lookup_function(func).cloned() {
            Some(f) => {
                self.check_args(&f.name, &f.params, &arg_tys, args, loc);
            }
            None => {
                self.error(
                    DiagCategory::Resolution,
                    loc,
                    format!("WORKER references undeclared function {}", func),
                );
            }
        }
        if args.len() > 1 {
            self.error(
                DiagCategory::Semantic,
                loc,
                "WORKER calls take at most one argument",
            );
        }
        // The worker handle behaves like a LONG variable
        if self.lookup_var_type(name).is_none() {
            self.declare_var(name, TypeDesc::long(), loc);
        }
    }

    // ==================================================================
    // Expressions
    // ==================================================================

    fn check_expr(&mut self, id: ExprId) -> TypeDesc {
        let ty = self.infer_expr(id);
        self.set_type(id, ty.clone());
        ty
    }

    fn infer_expr(&mut self, id: ExprId) -> TypeDesc {
        let expr = self.ast.expr(id);
        let loc = expr.loc;
        match &expr.kind {
            ExprKind::Number { is_int, .. } => {
                if *is_int {
                    TypeDesc::integer()
                } else {
                    TypeDesc::double()
                }
            }
            ExprKind::StringLit { .. } => TypeDesc::string(),
            ExprKind::Variable { name } => {
                let name = name.clone();
                match self.lookup_var_type(&name) {
                    Some(ty) => ty,
                    None => {
                        if self.is_function_result_name(&name) {
                            self.current_fn.as_ref().map(|(_, r, _)| r.clone()).unwrap()
                        } else if let Some(info) = self.lookup_array(&name) {
                            // Bare array reference (whole-array operations)
                            TypeDesc::array_of(info.element)
                        } else if let Some(f) = self.symbols.lookup_function(base_name(&name)) {
                            // Zero-argument function reference in expression
                            // position is a call
                            let f = f.clone();
                            if !f.params.is_empty() {
                                self.error(
                                    DiagCategory::Type,
                                    loc,
                                    format!("{} expects arguments", f.name),
                                );
                            }
                            f.ret
                        } else {
                            self.error(
                                DiagCategory::Resolution,
                                loc,
                                format!("undeclared identifier {}", name),
                            );
                            TypeDesc::unknown()
                        }
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let (op, lhs, rhs) = (*op, *lhs, *rhs);
                self.infer_binary(op, lhs, rhs, loc)
            }
            ExprKind::Unary { op, operand } => {
                let (op, operand) = (*op, *operand);
                let ty = self.check_expr(operand);
                match op {
                    UnOp::Not => {
                        if !ty.base.is_numeric() {
                            self.error(
                                DiagCategory::Type,
                                loc,
                                format!("NOT requires a numeric operand, found {}", ty),
                            );
                        }
                        TypeDesc::integer()
                    }
                    UnOp::Neg => {
                        if !ty.base.is_numeric() {
                            self.error(
                                DiagCategory::Type,
                                loc,
                                format!("unary minus requires a numeric operand, found {}", ty),
                            );
                            TypeDesc::double()
                        } else {
                            ty
                        }
                    }
                }
            }
            ExprKind::FunctionCall { name, args } => {
                let name = name.clone();
                let args = args.clone();
                self.infer_call_like(&name, &args, loc)
            }
            ExprKind::MethodCall {
                object,
                method,
                args,
            } => {
                let (object, method, args) = (*object, method.clone(), args.clone());
                self.infer_method_call(object, &method, &args, loc)
            }
            ExprKind::MemberAccess { object, field } => {
                let (object, field) = (*object, field.clone());
                let obj_ty = self.check_expr(object);
                self.infer_member(&obj_ty, &field, loc)
            }
            ExprKind::ArrayAccess { name, indices } => {
                let name = name.clone();
                let indices = indices.clone();
                for &i in &indices {
                    self.require_numeric(i, "array index");
                }
                match self.lookup_array(&name) {
                    Some(info) => {
                        if info.rank != indices.len() {
                            self.error(
                                DiagCategory::Type,
                                loc,
                                format!(
                                    "array {} has {} dimension(s), {} index(es) given",
                                    name,
                                    info.rank,
                                    indices.len()
                                ),
                            );
                        }
                        info.element
                    }
                    None => {
                        self.error(
                            DiagCategory::Resolution,
                            loc,
                            format!("undeclared array {}", name),
                        );
                        TypeDesc::unknown()
                    }
                }
            }
            ExprKind::StringSlice { base, start, end } => {
                let (base, start, end) = (*base, *start, *end);
                let base_ty = self.check_expr(base);
                if base_ty.base != BaseType::Str {
                    self.error(
                        DiagCategory::Type,
                        loc,
                        format!("slice base must be a string, found {}", base_ty),
                    );
                }
                self.require_integer(start, "slice start");
                self.require_integer(end, "slice end");
                TypeDesc::string()
            }
            ExprKind::Iif {
                cond,
                then_val,
                else_val,
            } => {
                let (cond, then_val, else_val) = (*cond, *then_val, *else_val);
                self.require_numeric(cond, "IIF condition");
                let t = self.check_expr(then_val);
                let e = self.check_expr(else_val);
                if t == e {
                    t
                } else if t.base.is_numeric() && e.base.is_numeric() {
                    TypeDesc::double()
                } else {
                    self.error(
                        DiagCategory::Type,
                        loc,
                        format!("IIF arms have incompatible types {} and {}", t, e),
                    );
                    t
                }
            }
            ExprKind::New { class, args } => {
                let (class, args) = (class.clone(), args.clone());
                let arg_tys: Vec<TypeDesc> = args.iter().map(|&a| self.check_expr(a)).collect();
                match self.symbols.lookup_class(&class).cloned() {
                    Some(info) => {
                        if info.has_ctor {
                            let params = info.ctor_params.clone();
                            self.check_args(&info.name, &params, &arg_tys, &args, loc);
                        } else if !args.is_empty() {
                            self.error(
                                DiagCategory::Type,
                                loc,
                                format!("class {} has no constructor", info.name),
                            );
                        }
                        TypeDesc::class(info.name)
                    }
                    None => {
                        self.error(
                            DiagCategory::Resolution,
                            loc,
                            format!("NEW of unknown class {}", class),
                        );
                        TypeDesc::unknown()
                    }
                }
            }
            ExprKind::Me => match &self.current_class {
                Some(c) => TypeDesc::class(c.clone()),
                None => {
                    self.error(DiagCategory::Semantic, loc, "ME outside a class method");
                    TypeDesc::unknown()
                }
            },
            ExprKind::Nothing => TypeDesc::scalar(BaseType::ClassInstance),
            ExprKind::SuperCall { method, args } => {
                let (method, args) = (method.clone(), args.clone());
                self.infer_super_call(&method, &args, loc)
            }
            ExprKind::IsType { value, ty } => {
                let (value, ty) = (*value, ty.clone());
                let vty = self.check_expr(value);
                if vty.base != BaseType::ClassInstance {
                    self.error(
                        DiagCategory::Type,
                        loc,
                        format!("IS requires a class instance, found {}", vty),
                    );
                }
                let checked = self.resolve_parsed_type(&ty, loc);
                if checked.base != BaseType::ClassInstance {
                    self.error(
                        DiagCategory::Type,
                        loc,
                        format!("IS requires a class name, found {}", checked),
                    );
                }
                TypeDesc::integer()
            }
            ExprKind::ListLit { elems } => {
                let elems = elems.clone();
                self.infer_list_literal(&elems)
            }
            ExprKind::Ready { worker } => {
                if self.lookup_var_type(worker).is_none() {
                    self.error(
                        DiagCategory::Resolution,
                        loc,
                        format!("READY of unknown worker {}", worker),
                    );
                }
                TypeDesc::integer()
            }
            ExprKind::RegistryCall { name, .. } => {
                let name = name.clone();
                self.error(
                    DiagCategory::Semantic,
                    loc,
                    format!("registry function {} is not supported in this build", name),
                );
                TypeDesc::unknown()
            }
        }
    }

    fn infer_binary(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId, loc: SourceLoc) -> TypeDesc {
        let lt = self.check_expr(lhs);
        let rt = self.check_expr(rhs);

        // Unknowns (MATCH TYPE fall-through paths) poison quietly
        if lt.base == BaseType::Unknown || rt.base == BaseType::Unknown {
            return TypeDesc::unknown();
        }

        // Elementwise whole-array arithmetic
        if lt.base == BaseType::ArrayDesc || rt.base == BaseType::ArrayDesc {
            let elementwise = lt.base == rt.base
                && lt.element == rt.element
                && lt.element
                    .as_deref()
                    .map(|e| e.base.is_numeric())
                    .unwrap_or(false)
                && matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div);
            if !elementwise {
                self.error(
                    DiagCategory::Type,
                    loc,
                    format!("cannot apply operator to {} and {}", lt, rt),
                );
            }
            return lt;
        }

        let string_involved = lt.base == BaseType::Str || rt.base == BaseType::Str;
        if op == BinOp::Concat || (op == BinOp::Add && string_involved) {
            // String concatenation promotes numeric operands to string
            let ok = |t: &TypeDesc| t.base == BaseType::Str || t.base.is_numeric();
            if !ok(&lt) || !ok(&rt) {
                self.error(
                    DiagCategory::Type,
                    loc,
                    format!("cannot concatenate {} and {}", lt, rt),
                );
            }
            return TypeDesc::string();
        }

        if op.is_comparison() {
            let compatible = (lt.base.is_numeric() && rt.base.is_numeric())
                || (lt.base == BaseType::Str && rt.base == BaseType::Str)
                || (lt.base == BaseType::ClassInstance
                    && rt.base == BaseType::ClassInstance
                    && matches!(op, BinOp::Eq | BinOp::Ne));
            if !compatible {
                self.error(
                    DiagCategory::Type,
                    loc,
                    format!("cannot compare {} and {}", lt, rt),
                );
            }
            return TypeDesc::integer();
        }

        // Arithmetic and bitwise operators
        if !lt.base.is_numeric() || !rt.base.is_numeric() {
            self.error(
                DiagCategory::Type,
                loc,
                format!("operator requires numeric operands, found {} and {}", lt, rt),
            );
            return TypeDesc::double();
        }
        match op {
            BinOp::Pow => TypeDesc::double(),
            BinOp::IntDiv | BinOp::Mod | BinOp::And | BinOp::Or | BinOp::Xor => {
                if is_long(&lt) || is_long(&rt) {
                    TypeDesc::long()
                } else {
                    TypeDesc::integer()
                }
            }
            _ => {
                if lt.base.is_float() || rt.base.is_float() {
                    TypeDesc::double()
                } else if is_long(&lt) || is_long(&rt) {
                    TypeDesc::long()
                } else {
                    TypeDesc::integer()
                }
            }
        }
    }

    fn infer_call_like(&mut self, name: &str, args: &[ExprId], loc: SourceLoc) -> TypeDesc {
        // The parser leaves `name(...)` as FunctionCall when it has not
        // seen a DIM; an array declared elsewhere resolves here.
        if let Some(info) = self.lookup_array(name) {
            for &i in args {
                self.require_numeric(i, "array index");
            }
            if info.rank != args.len() {
                self.error(
                    DiagCategory::Type,
                    loc,
                    format!(
                        "array {} has {} dimension(s), {} index(es) given",
                        name,
                        info.rank,
                        args.len()
                    ),
                );
            }
            return info.element;
        }

        let arg_tys: Vec<TypeDesc> = args.iter().map(|&a| self.check_expr(a)).collect();

        if let Some(ret) = self.check_builtin(name, &arg_tys, loc) {
            return ret;
        }

        match self.symbols.lookup_function(base_name(name)).cloned() {
            Some(f) => {
                if f.is_sub {
                    self.error(
                        DiagCategory::Type,
                        loc,
                        format!("SUB {} cannot be used in an expression", f.name),
                    );
                }
                self.check_args(&f.name, &f.params, &arg_tys, args, loc);
                f.ret
            }
            None => {
                self.error(
                    DiagCategory::Resolution,
                    loc,
                    format!("call to undeclared function {}", name),
                );
                TypeDesc::unknown()
            }
        }
    }

    /// Builtin function signatures. Returns None when `name` is not a
    /// builtin so user functions can be tried next.
    fn check_builtin(
        &mut self,
        name: &str,
        arg_tys: &[TypeDesc],
        loc: SourceLoc,
    ) -> Option<TypeDesc> {
        let upper = key(name);
        let (min, max, ret) = match upper.as_str() {
            "LEN" => (1, 1, TypeDesc::integer()),
            "MID$" => (2, 3, TypeDesc::string()),
            "LEFT$" | "RIGHT$" => (2, 2, TypeDesc::string()),
            "CHR$" => (1, 1, TypeDesc::string()),
            "STR$" => (1, 1, TypeDesc::string()),
            "VAL" => (1, 1, TypeDesc::double()),
            "ABS" => (1, 1, arg_tys.first().cloned().unwrap_or_else(TypeDesc::double)),
            "INT" => (1, 1, TypeDesc::integer()),
            "ERR" | "ERL" => (0, 0, TypeDesc::integer()),
            _ => return None,
        };
        if arg_tys.len() < min || arg_tys.len() > max {
            self.error(
                DiagCategory::Type,
                loc,
                format!("{} expects {}..{} argument(s)", name, min, max),
            );
            return Some(ret);
        }
        let string_args: &[usize] = match upper.as_str() {
            "LEN" | "VAL" => &[0],
            "MID$" | "LEFT$" | "RIGHT$" => &[0],
            _ => &[],
        };
        for (i, ty) in arg_tys.iter().enumerate() {
            let want_string = string_args.contains(&i);
            let ok = if want_string {
                ty.base == BaseType::Str
            } else {
                ty.base.is_numeric()
            };
            if !ok {
                self.error(
                    DiagCategory::Type,
                    loc,
                    format!(
                        "argument {} of {} must be {}, found {}",
                        i + 1,
                        name,
                        if want_string { "a string" } else { "numeric" },
                        ty
                    ),
                );
            }
        }
        Some(ret)
    }

    fn infer_method_call(
        &mut self,
        object: ExprId,
        method: &str,
        args: &[ExprId],
        loc: SourceLoc,
    ) -> TypeDesc {
        let obj_ty = self.check_expr(object);
        let arg_tys: Vec<TypeDesc> = args.iter().map(|&a| self.check_expr(a)).collect();
        match obj_ty.base {
            BaseType::ClassInstance => {
                let Some(class) = obj_ty.object_name.as_deref() else {
                    return TypeDesc::unknown();
                };
                match self
                    .symbols
                    .lookup_class(class)
                    .and_then(|c| c.method(method))
                    .cloned()
                {
                    Some(m) => {
                        self.check_args(&m.name, &m.params, &arg_tys, args, loc);
                        m.ret
                    }
                    None => {
                        self.error(
                            DiagCategory::Resolution,
                            loc,
                            format!("class {} has no method {}", class, method),
                        );
                        TypeDesc::unknown()
                    }
                }
            }
            BaseType::List => {
                let elem = obj_ty
                    .element
                    .as_deref()
                    .cloned()
                    .unwrap_or_else(TypeDesc::unknown);
                match key(method).as_str() {
                    "APPEND" => {
                        if arg_tys.len() != 1 {
                            self.error(DiagCategory::Type, loc, "Append expects one argument");
                        } else if elem.base != BaseType::Unknown
                            && !arg_tys[0].widens_to(&elem)
                        {
                            self.error(
                                DiagCategory::Type,
                                loc,
                                format!("cannot append {} to {}", arg_tys[0], obj_ty),
                            );
                        }
                        TypeDesc::void()
                    }
                    "LENGTH" => TypeDesc::integer(),
                    "GET" => {
                        if arg_tys.len() != 1 || !arg_tys[0].base.is_numeric() {
                            self.error(DiagCategory::Type, loc, "Get expects a numeric index");
                        }
                        elem
                    }
                    _ => {
                        self.error(
                            DiagCategory::Resolution,
                            loc,
                            format!("LIST has no method {}", method),
                        );
                        TypeDesc::unknown()
                    }
                }
            }
            BaseType::Hashmap => match key(method).as_str() {
                "PUT" => {
                    if arg_tys.len() != 2 || arg_tys[0].base != BaseType::Str {
                        self.error(
                            DiagCategory::Type,
                            loc,
                            "Put expects a string key and a value",
                        );
                    }
                    TypeDesc::void()
                }
                "GET" => {
                    if arg_tys.len() != 1 || arg_tys[0].base != BaseType::Str {
                        self.error(DiagCategory::Type, loc, "Get expects a string key");
                    }
                    TypeDesc::unknown()
                }
                "CONTAINS" => TypeDesc::integer(),
                "REMOVE" => TypeDesc::void(),
                "COUNT" => TypeDesc::integer(),
                _ => {
                    self.error(
                        DiagCategory::Resolution,
                        loc,
                        format!("HASHMAP has no method {}", method),
                    );
                    TypeDesc::unknown()
                }
            },
            _ => {
                self.error(
                    DiagCategory::Type,
                    loc,
                    format!("{} has no methods", obj_ty),
                );
                TypeDesc::unknown()
            }
        }
    }

    fn infer_member(&mut self, obj_ty: &TypeDesc, field: &str, loc: SourceLoc) -> TypeDesc {
        match obj_ty.base {
            BaseType::UserDefined => {
                let Some(name) = obj_ty.object_name.as_deref() else {
                    return TypeDesc::unknown();
                };
                match self.symbols.lookup_udt(name).and_then(|u| u.field(field)) {
                    Some(f) => f.ty.clone(),
                    None => {
                        self.error(
                            DiagCategory::Resolution,
                            loc,
                            format!("type {} has no field {}", name, field),
                        );
                        TypeDesc::unknown()
                    }
                }
            }
            BaseType::ClassInstance => {
                let Some(name) = obj_ty.object_name.as_deref() else {
                    return TypeDesc::unknown();
                };
                match self.symbols.lookup_class(name).and_then(|c| c.field(field)) {
                    Some(f) => f.ty.clone(),
                    None => {
                        self.error(
                            DiagCategory::Resolution,
                            loc,
                            format!("class {} has no field {}", name, field),
                        );
                        TypeDesc::unknown()
                    }
                }
            }
            _ => {
                self.error(
                    DiagCategory::Type,
                    loc,
                    format!("{} has no fields", obj_ty),
                );
                TypeDesc::unknown()
            }
        }
    }

    fn infer_super_call(&mut self, method: &str, args: &[ExprId], loc: SourceLoc) -> TypeDesc {
        let arg_tys: Vec<TypeDesc> = args.iter().map(|&a| self.check_expr(a)).collect();
        let Some(class) = self.current_class.clone() else {
            self.error(DiagCategory::Semantic, loc, "SUPER outside a class method");
            return TypeDesc::unknown();
        };
        let parent = self
            .symbols
            .lookup_class(&class)
            .and_then(|c| c.parent.clone());
        let Some(parent) = parent else {
            self.error(
                DiagCategory::Semantic,
                loc,
                format!("class {} has no parent class", class),
            );
            return TypeDesc::unknown();
        };
        match self
            .symbols
            .lookup_class(&parent)
            .and_then(|c| c.method(method))
            .cloned()
        {
            Some(m) => {
                self.check_args(&m.name, &m.params, &arg_tys, args, loc);
                m.ret
            }
            None => {
                self.error(
                    DiagCategory::Resolution,
                    loc,
                    format!("parent class {} has no method {}", parent, method),
                );
                TypeDesc::unknown()
            }
        }
    }

    /// `LIST(...)` literal typing: a shared element type if uniform,
    /// DOUBLE if the elements are mixed numerics, ANY otherwise.
    fn infer_list_literal(&mut self, elems: &[ExprId]) -> TypeDesc {
        if elems.is_empty() {
            // Adopts the receiving variable's type during assignment checks
            return TypeDesc::list_of(TypeDesc::unknown());
        }
        let tys: Vec<TypeDesc> = elems.iter().map(|&e| self.check_expr(e)).collect();
        let first = &tys[0];
        if tys.iter().all(|t| t == first) {
            return TypeDesc::list_of(first.clone());
        }
        if tys.iter().all(|t| t.base.is_numeric()) {
            return TypeDesc::list_of(TypeDesc::double());
        }
        TypeDesc::list_of(TypeDesc::unknown())
    }

    // ==================================================================
    // Helpers
    // ==================================================================

    fn error(&mut self, category: DiagCategory, loc: SourceLoc, message: impl Into<String>) {
        self.sink.error(category, loc, message);
    }

    fn error_with_hint(
        &mut self,
        category: DiagCategory,
        loc: SourceLoc,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.sink.error_with_hint(category, loc, message, hint);
    }

    fn set_type(&mut self, id: ExprId, ty: TypeDesc) {
        self.expr_types[id.0 as usize] = ty;
    }

    fn require_numeric(&mut self, id: ExprId, what: &str) {
        let ty = self.check_expr(id);
        if !ty.base.is_numeric() && ty.base != BaseType::Unknown {
            let loc = self.ast.expr(id).loc;
            self.error(
                DiagCategory::Type,
                loc,
                format!("{} must be numeric, found {}", what, ty),
            );
        }
    }

    fn require_integer(&mut self, id: ExprId, what: &str) {
        let ty = self.check_expr(id);
        if !ty.base.is_numeric() && ty.base != BaseType::Unknown {
            let loc = self.ast.expr(id).loc;
            self.error(
                DiagCategory::Type,
                loc,
                format!("{} must be an integer, found {}", what, ty),
            );
        }
    }

    /// Full lookup order for a variable reference.
    fn lookup_var_type(&self, name: &str) -> Option<TypeDesc> {
        let k = key(name);
        // Active MATCH TYPE binding shadows everything
        if let Some((_, ty)) = self.match_bindings.iter().rev().find(|(b, _)| *b == k) {
            return Some(ty.clone());
        }
        if let Some(scope) = &self.current_scope {
            if let Some(v) = scope.lookup_var(name) {
                return Some(v.ty.clone());
            }
            if scope.shared.contains(&k) {
                return self.symbols.globals.get(&k).map(|v| v.ty.clone());
            }
            // Class fields are visible unqualified inside methods
            if let Some(class) = &self.current_class
                && let Some(f) = self
                    .symbols
                    .lookup_class(class)
                    .and_then(|c| c.field(base_name(name)))
            {
                return Some(f.ty.clone());
            }
            return None;
        }
        self.symbols.globals.get(&k).map(|v| v.ty.clone())
    }

    fn lookup_array(&self, name: &str) -> Option<ArrayInfo> {
        let k = key(name);
        if let Some(scope) = &self.current_scope {
            if let Some(a) = scope.local_arrays.get(&k) {
                return Some(a.clone());
            }
            if scope.shared.contains(&k) {
                return self.symbols.global_arrays.get(&k).cloned();
            }
            return None;
        }
        self.symbols.global_arrays.get(&k).cloned()
    }

    fn var_declared_here(&self, name: &str, local: bool) -> bool {
        let k = key(name);
        if local {
            self.current_scope
                .as_ref()
                .map(|s| s.locals.contains_key(&k) || s.params.contains_key(&k))
                .unwrap_or(false)
        } else if self.current_key.is_some() {
            // DIM inside a function declares a local
            self.current_scope
                .as_ref()
                .map(|s| s.locals.contains_key(&k) || s.params.contains_key(&k))
                .unwrap_or(false)
        } else {
            self.symbols.globals.contains_key(&k)
        }
    }

    fn declare_var(&mut self, name: &str, ty: TypeDesc, _loc: SourceLoc) {
        let k = key(name);
        let info = VarInfo {
            name: name.to_string(),
            ty,
        };
        if let Some(scope) = self.current_scope.as_mut() {
            scope.locals.insert(k, info);
        } else {
            self.symbols.globals.insert(k, info);
        }
    }

    /// A whole-number literal narrows implicitly when it fits the
    /// target's range.
    fn literal_fits(&self, value: ExprId, target: &TypeDesc) -> bool {
        let ExprKind::Number { value: n, is_int: true } = &self.ast.expr(value).kind else {
            return false;
        };
        let n = *n as i64;
        match target.base {
            BaseType::Byte => (-128..=127).contains(&n),
            BaseType::UByte => (0..=255).contains(&n),
            BaseType::Short => (-32768..=32767).contains(&n),
            BaseType::UShort => (0..=65535).contains(&n),
            BaseType::UInteger | BaseType::ULong => n >= 0,
            _ => false,
        }
    }

    /// Type-check a READ/INPUT/AWAIT target, implicitly declaring a bare
    /// variable the way assignment does.
    fn check_store_target(&mut self, t: ExprId) -> TypeDesc {
        let loc = self.ast.expr(t).loc;
        if let ExprKind::Variable { name } = &self.ast.expr(t).kind
            && self.lookup_var_type(name).is_none()
            && self.lookup_array(name).is_none()
            && !self.is_function_result_name(name)
        {
            if self.option_explicit {
                let name = name.clone();
                self.error_with_hint(
                    DiagCategory::Resolution,
                    loc,
                    format!("undeclared variable {} (OPTION EXPLICIT)", name),
                    "declare it with DIM",
                );
                self.set_type(t, TypeDesc::unknown());
                return TypeDesc::unknown();
            }
            let ty = suffix_type(name).unwrap_or_else(TypeDesc::double);
            let name = name.clone();
            self.declare_var(&name, ty.clone(), loc);
            self.set_type(t, ty.clone());
            return ty;
        }
        self.check_expr(t)
    }

    /// In a FUNCTION body, assigning to the bare function name sets the
    /// return value.
    fn is_function_result_name(&self, name: &str) -> bool {
        match &self.current_fn {
            Some((fname, _, false)) => key(base_name(name)) == *fname,
            _ => false,
        }
    }

    fn resolve_parsed_type(&mut self, pt: &ParsedType, loc: SourceLoc) -> TypeDesc {
        match pt {
            ParsedType::Base(b) => TypeDesc::scalar(*b),
            ParsedType::Named(n) => {
                if let Some(c) = self.symbols.lookup_class(n) {
                    TypeDesc::class(c.name.clone())
                } else if let Some(u) = self.symbols.lookup_udt(n) {
                    TypeDesc::user(u.name.clone())
                } else {
                    self.error(
                        DiagCategory::Resolution,
                        loc,
                        format!("unknown type {}", n),
                    );
                    TypeDesc::unknown()
                }
            }
            ParsedType::ListOf(elem) => {
                let e = self.resolve_parsed_type(elem, loc);
                TypeDesc::list_of(e)
            }
            ParsedType::ArrayOf(elem) => {
                let e = self.resolve_parsed_type(elem, loc);
                TypeDesc::array_of(e)
            }
            ParsedType::Hashmap => TypeDesc::hashmap(),
            ParsedType::Any => TypeDesc::unknown(),
        }
    }

    /// Type of a declared name: explicit `AS` wins, then the suffix, then
    /// the fallback (initializer type or DOUBLE).
    fn declared_type(
        &mut self,
        explicit: &Option<ParsedType>,
        name: &str,
        fallback: Option<&TypeDesc>,
        loc: SourceLoc,
    ) -> TypeDesc {
        if let Some(pt) = explicit {
            return self.resolve_parsed_type(pt, loc);
        }
        if let Some(ty) = suffix_type(name) {
            return ty;
        }
        fallback.cloned().unwrap_or_else(TypeDesc::double)
    }
}

fn is_long(t: &TypeDesc) -> bool {
    matches!(t.base, BaseType::Long | BaseType::ULong)
}

/// Strip a trailing type-suffix character.
pub fn base_name(name: &str) -> &str {
    match name.chars().last() {
        Some('%' | '&' | '!' | '#' | '$' | '@' | '^') => &name[..name.len() - 1],
        _ => name,
    }
}

pub fn has_suffix(name: &str) -> bool {
    base_name(name).len() != name.len()
}

/// Type implied by a name's suffix, if any.
pub fn suffix_type(name: &str) -> Option<TypeDesc> {
    name.chars().last().and_then(TypeDesc::from_suffix)
}

fn infer_var_type(name: &str, value_ty: Option<&TypeDesc>) -> TypeDesc {
    if let Some(ty) = suffix_type(name) {
        return ty;
    }
    match value_ty {
        Some(ty) if ty.base != BaseType::Void => ty.clone(),
        _ => TypeDesc::double(),
    }
}

fn child_bodies(kind: &StmtKind) -> Vec<&[StmtId]> {
    match kind {
        StmtKind::If {
            then_body,
            elifs,
            else_body,
            ..
        } => {
            let mut out: Vec<&[StmtId]> = vec![then_body];
            for (_, b) in elifs {
                out.push(b);
            }
            if let Some(b) = else_body {
                out.push(b);
            }
            out
        }
        StmtKind::For { body, .. }
        | StmtKind::ForEach { body, .. }
        | StmtKind::While { body, .. }
        | StmtKind::DoLoop { body, .. }
        | StmtKind::Repeat { body, .. } => vec![body],
        StmtKind::SelectCase {
            arms, else_body, ..
        } => {
            let mut out: Vec<&[StmtId]> = arms.iter().map(|a| a.body.as_slice()).collect();
            if let Some(b) = else_body {
                out.push(b);
            }
            out
        }
        StmtKind::TryCatch {
            body,
            catches,
            finally,
        } => {
            let mut out: Vec<&[StmtId]> = vec![body];
            out.extend(catches.iter().map(|c| c.body.as_slice()));
            if let Some(f) = finally {
                out.push(f);
            }
            out
        }
        StmtKind::MatchType {
            arms, else_body, ..
        } => {
            let mut out: Vec<&[StmtId]> = arms.iter().map(|a| a.body.as_slice()).collect();
            if let Some(b) = else_body {
                out.push(b);
            }
            out
        }
        StmtKind::FunctionDef(decl) | StmtKind::SubDef(decl) => vec![&decl.body],
        StmtKind::ClassDecl { methods, .. } => {
            methods.iter().map(|m| m.decl.body.as_slice()).collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    // CompilerConfig comes in through super::*

    fn analyze_src(source: &str) -> (Analysis, Vec<String>, bool) {
        let mut sink = DiagnosticSink::default();
        let parser = Parser::new(source, &mut sink);
        let (ast, program) = parser.parse();
        assert!(!sink.has_errors(), "parse failed: {:?}", sink.diagnostics());
        let analysis = analyze(&ast, &program, &CompilerConfig::default(), &mut sink);
        let msgs = sink
            .diagnostics()
            .iter()
            .map(|d| d.message.clone())
            .collect();
        (analysis, msgs, sink.has_errors())
    }

    fn analyze_ok(source: &str) -> Analysis {
        let (analysis, msgs, has_errors) = analyze_src(source);
        assert!(!has_errors, "unexpected analysis errors: {:?}", msgs);
        analysis
    }

    fn analyze_errs(source: &str) -> Vec<String> {
        let (_, msgs, has_errors) = analyze_src(source);
        assert!(has_errors, "expected analysis errors, got none");
        msgs
    }

    #[test]
    fn test_suffix_inference() {
        let a = analyze_ok("s$ = \"hi\"\nn% = 3\nd = 1\n");
        assert_eq!(a.symbols.globals[&key("s$")].ty.base, BaseType::Str);
        assert_eq!(a.symbols.globals[&key("n%")].ty.base, BaseType::Integer);
        // No suffix: initializer type wins
        assert_eq!(a.symbols.globals[&key("d")].ty.base, BaseType::Integer);
    }

    #[test]
    fn test_as_clause_overrides_suffix_default() {
        let a = analyze_ok("DIM x AS DOUBLE\nx = 1\n");
        assert_eq!(a.symbols.globals[&key("x")].ty.base, BaseType::Double);
    }

    #[test]
    fn test_narrowing_rejected() {
        let errs = analyze_errs("DIM n AS INTEGER\nn = 3.5\n");
        assert!(errs.iter().any(|m| m.contains("narrowing")));
    }

    #[test]
    fn test_widening_accepted() {
        analyze_ok("DIM d AS DOUBLE\nDIM n AS INTEGER\nn = 1\nd = n\n");
    }

    #[test]
    fn test_option_explicit() {
        let errs = analyze_errs("OPTION EXPLICIT\nx = 1\n");
        assert!(errs.iter().any(|m| m.contains("undeclared variable")));
    }

    #[test]
    fn test_two_pass_forward_reference() {
        // F calls G before G's definition appears
        analyze_ok(
            "FUNCTION F(x)\nF = G(x) + 1\nEND FUNCTION\nFUNCTION G(y)\nG = y * 2\nEND FUNCTION\nPRINT F(1)\n",
        );
    }

    #[test]
    fn test_function_result_assignment() {
        analyze_ok("FUNCTION Fact(N)\nIF N <= 1 THEN Fact = 1 ELSE Fact = N * Fact(N-1)\nEND FUNCTION\nPRINT Fact(5)\n");
    }

    #[test]
    fn test_wrong_arity() {
        let errs = analyze_errs("FUNCTION F(x)\nF = x\nEND FUNCTION\nPRINT F(1, 2)\n");
        assert!(errs.iter().any(|m| m.contains("argument")));
    }

    #[test]
    fn test_class_registration_and_vtable_override() {
        let src = "CLASS Animal\nMETHOD Speak() AS STRING\nRETURN \"...\"\nEND METHOD\nEND CLASS\nCLASS Dog EXTENDS Animal\nMETHOD Speak() AS STRING\nRETURN \"Woof!\"\nEND METHOD\nEND CLASS\nDIM pet AS Animal = NEW Dog()\nPRINT pet.Speak()\n";
        let a = analyze_ok(src);
        let dog = a.symbols.lookup_class("Dog").unwrap();
        assert_eq!(dog.methods.len(), 1);
        assert_eq!(dog.methods[0].defined_in, "Dog");
        assert_eq!(dog.methods[0].slot, VTABLE_SLOT_METHODS);
        let animal = a.symbols.lookup_class("Animal").unwrap();
        assert_eq!(animal.methods[0].defined_in, "Animal");
        assert_eq!(animal.methods[0].slot, dog.methods[0].slot);
    }

    #[test]
    fn test_subclass_assignment_directions() {
        let base = "CLASS Animal\nEND CLASS\nCLASS Dog EXTENDS Animal\nEND CLASS\n";
        analyze_ok(&format!("{}DIM pet AS Animal = NEW Dog()\n", base));
        let errs = analyze_errs(&format!("{}DIM d AS Dog = NEW Animal()\n", base));
        assert!(errs.iter().any(|m| m.contains("cannot assign")));
    }

    #[test]
    fn test_inheritance_cycle_detected() {
        let errs = analyze_errs("CLASS A EXTENDS B\nEND CLASS\nCLASS B EXTENDS A\nEND CLASS\n");
        assert!(errs.iter().any(|m| m.contains("cycle")));
    }

    #[test]
    fn test_list_literal_typing() {
        let a = analyze_ok("DIM a AS LIST OF INTEGER = LIST(1, 2, 3)\nDIM b AS LIST OF DOUBLE = LIST(1, 2.5)\nDIM c AS LIST OF ANY = LIST(1, \"x\")\n");
        let b = &a.symbols.globals[&key("b")].ty;
        assert_eq!(b.element.as_ref().unwrap().base, BaseType::Double);
        let c = &a.symbols.globals[&key("c")].ty;
        assert_eq!(c.element.as_ref().unwrap().base, BaseType::Unknown);
    }

    #[test]
    fn test_typed_list_rejects_wrong_element() {
        let errs = analyze_errs("DIM a AS LIST OF INTEGER = LIST(1, \"two\")\n");
        assert!(errs.iter().any(|m| m.contains("cannot assign")));
    }

    #[test]
    fn test_empty_list_adopts_receiver_type() {
        let a = analyze_ok("DIM a AS LIST OF STRING = LIST()\n");
        assert_eq!(
            a.symbols.globals[&key("a")].ty.element.as_ref().unwrap().base,
            BaseType::Str
        );
    }

    #[test]
    fn test_match_type_suffix_agreement() {
        let good = "DIM items AS LIST OF ANY = LIST(1, \"x\")\nFOR EACH e IN items\nMATCH TYPE e\nCASE INTEGER n%\nPRINT n%\nCASE STRING s$\nPRINT s$\nEND MATCH\nNEXT\n";
        analyze_ok(good);
        let bad = "DIM items AS LIST OF ANY = LIST(1, \"x\")\nFOR EACH e IN items\nMATCH TYPE e\nCASE STRING n%\nPRINT n%\nEND MATCH\nNEXT\n";
        let errs = analyze_errs(bad);
        assert!(errs.iter().any(|m| m.contains("suffix")));
    }

    #[test]
    fn test_match_type_duplicate_arm() {
        let src = "DIM items AS LIST OF ANY = LIST(1)\nFOR EACH e IN items\nMATCH TYPE e\nCASE INTEGER a%\nPRINT a%\nCASE INTEGER b%\nPRINT b%\nEND MATCH\nNEXT\n";
        let errs = analyze_errs(src);
        assert!(errs.iter().any(|m| m.contains("duplicate MATCH TYPE arm")));
    }

    #[test]
    fn test_match_binding_scoped_to_arm() {
        let src = "DIM items AS LIST OF ANY = LIST(1)\nFOR EACH e IN items\nMATCH TYPE e\nCASE INTEGER n%\nPRINT n%\nEND MATCH\nNEXT\nPRINT n%\n";
        let errs = analyze_errs(src);
        assert!(errs.iter().any(|m| m.contains("undeclared identifier")));
    }

    #[test]
    fn test_for_step_zero_warns() {
        let (_, msgs, has_errors) = analyze_src("FOR i = 1 TO 10 STEP 0\nPRINT i\nNEXT\n");
        assert!(!has_errors);
        assert!(msgs.iter().any(|m| m.contains("never terminates")));
    }

    #[test]
    fn test_exit_outside_loop() {
        let errs = analyze_errs("EXIT FOR\n");
        assert!(errs.iter().any(|m| m.contains("EXIT")));
    }

    #[test]
    fn test_udt_fields_and_member_access() {
        let a = analyze_ok(
            "TYPE Point\nx AS DOUBLE\ny AS DOUBLE\nEND TYPE\nDIM p AS Point\np.x = 1.5\nPRINT p.x\n",
        );
        let udt = a.symbols.lookup_udt("Point").unwrap();
        assert_eq!(udt.size, 16);
        assert_eq!(udt.field("y").unwrap().offset, 8);
    }

    #[test]
    fn test_unknown_field() {
        let errs =
            analyze_errs("TYPE Point\nx AS DOUBLE\nEND TYPE\nDIM p AS Point\nPRINT p.z\n");
        assert!(errs.iter().any(|m| m.contains("no field")));
    }

    #[test]
    fn test_shared_visibility() {
        analyze_ok("DIM total AS DOUBLE\nSUB Bump()\nSHARED total\ntotal = total + 1\nEND SUB\nCALL Bump()\n");
        let errs = analyze_errs("SUB Bump()\nSHARED nope\nEND SUB\nCALL Bump()\n");
        assert!(errs.iter().any(|m| m.contains("unknown global")));
    }

    #[test]
    fn test_locals_do_not_leak() {
        let errs =
            analyze_errs("SUB S()\nLOCAL t AS INTEGER\nt = 1\nEND SUB\nCALL S()\nPRINT t%\n");
        assert!(errs.iter().any(|m| m.contains("undeclared")));
    }

    #[test]
    fn test_string_concat_promotes_numeric() {
        let a = analyze_ok("s$ = \"n=\" + 42\n");
        let ty = &a.symbols.globals[&key("s$")].ty;
        assert_eq!(ty.base, BaseType::Str);
    }

    #[test]
    fn test_comparison_yields_integer() {
        let src = "x% = 1 < 2\n";
        analyze_ok(src);
    }

    #[test]
    fn test_registry_function_rejected() {
        let errs = analyze_errs("x = REGISTRY_FOO(1)\n");
        assert!(errs.iter().any(|m| m.contains("not supported")));
    }

    #[test]
    fn test_builtin_signatures() {
        analyze_ok("PRINT LEN(\"abc\")\nPRINT MID$(\"hello\", 2, 3)\nPRINT STR$(42)\nPRINT VAL(\"1.5\")\n");
        let errs = analyze_errs("PRINT LEN(42)\n");
        assert!(errs.iter().any(|m| m.contains("must be a string")));
    }

    #[test]
    fn test_is_type_check() {
        analyze_ok("CLASS Animal\nEND CLASS\nCLASS Dog EXTENDS Animal\nEND CLASS\nDIM pet AS Animal = NEW Dog()\nIF pet IS Dog THEN\nPRINT 1\nEND IF\n");
    }

    #[test]
    fn test_whole_array_ops_typed() {
        analyze_ok("DIM a(5)\nDIM b(5)\nDIM c(5)\nc = a + b\n");
        let errs = analyze_errs("DIM a(5)\nDIM s$(5)\nDIM c(5)\nc = a + s$\n");
        assert!(errs.iter().any(|m| m.contains("cannot apply operator")));
    }

    #[test]
    fn test_strict_match_type_warns_on_partial_coverage() {
        let src = "DIM items AS LIST OF ANY = LIST(1)\nFOR EACH e IN items\nMATCH TYPE e\nCASE INTEGER n%\nPRINT n%\nEND MATCH\nNEXT\n";
        let mut sink = DiagnosticSink::default();
        let parser = Parser::new(src, &mut sink);
        let (ast, program) = parser.parse();
        let config = CompilerConfig::new().with_strict_match_type(true);
        let _ = analyze(&ast, &program, &config, &mut sink);
        assert!(!sink.has_errors());
        assert!(
            sink.diagnostics()
                .iter()
                .any(|d| d.message.contains("CASE ELSE"))
        );
    }

    #[test]
    fn test_worker_checks() {
        analyze_ok("FUNCTION Work(n)\nWork = n\nEND FUNCTION\nWORKER w = Work(5)\nAWAIT w, r\nPRINT r\n");
        let errs = analyze_errs("WORKER w = Missing(1)\n");
        assert!(errs.iter().any(|m| m.contains("undeclared function")));
    }
}
