//! CodeGen state and core types
//!
//! The emitter context owns every mutable table (interned strings, temp
//! and label counters, per-function slot maps) and is threaded through
//! the emission submodules as `&mut self`; nothing lives in globals or
//! thread-locals.

use crate::ast::Ast;
use crate::cfg::Cfg;
use crate::config::CompilerConfig;
use crate::semantics::Analysis;
use crate::types::{BaseType, TypeDesc};
use std::collections::HashMap;

/// An emitted SSA value: its textual operand (a `%t.N` temporary or an
/// immediate constant) plus the type it carries.
#[derive(Debug, Clone)]
pub struct Value {
    pub repr: String,
    pub ty: TypeDesc,
    /// Runtime type-tag operand for ANY-typed values (atom tag beside
    /// the payload bits)
    pub tag: Option<String>,
}

impl Value {
    pub fn new(repr: impl Into<String>, ty: TypeDesc) -> Self {
        Value {
            repr: repr.into(),
            ty,
            tag: None,
        }
    }
}

/// Where a variable lives: a global data symbol or a stack slot.
#[derive(Debug, Clone)]
pub struct Slot {
    /// Address operand (`$var_X` or an alloca temporary)
    pub addr: String,
    pub ty: TypeDesc,
    /// For ANY-typed variables: the companion tag slot address
    pub tag_addr: Option<String>,
    /// True when the slot holds a pointer to the value rather than the
    /// value itself (record parameters, which pass by reference)
    pub indirect: bool,
}

/// The IR emitter. One instance per compilation; per-function state is
/// reset by `begin_function`.
pub struct CodeGen<'a> {
    pub(super) ast: &'a Ast,
    pub(super) analysis: &'a Analysis,
    pub(super) config: &'a CompilerConfig,

    /// Body text of the function being emitted
    pub(super) output: String,
    /// Completed function definitions
    pub(super) functions: String,
    /// Interned string constants (data section)
    pub(super) string_globals: String,
    /// Worker thunks bridging the 64-bit spawn payload to real
    /// function signatures
    pub(super) wrappers: String,
    pub(super) worker_wrappers: std::collections::HashSet<String>,
    pub(super) string_constants: HashMap<String, String>,
    pub(super) string_counter: usize,

    pub(super) temp_counter: usize,
    pub(super) label_counter: usize,
    /// Label of the block currently receiving instructions; phi emission
    /// needs the real predecessor after nested control flow
    pub(super) cur_label: String,

    // ---- per-function context ----
    /// Scope key, or None while emitting the main program
    pub(super) scope_key: Option<String>,
    pub(super) current_class: Option<String>,
    /// Uppercased bare name of the current FUNCTION (result variable)
    pub(super) fn_result_name: Option<String>,
    pub(super) fn_ret: TypeDesc,
    pub(super) fn_is_sub: bool,
    /// Variable slots visible in the current function (params, locals,
    /// MATCH TYPE bindings)
    pub(super) locals: HashMap<String, Slot>,
    /// Local array descriptor slots
    pub(super) local_arrays: HashMap<String, String>,
    /// Whether SAMM scope calls bracket this function
    pub(super) scoped: bool,
    /// Selector type per SELECT CASE id (recorded at SelectInit)
    pub(super) select_types: HashMap<u32, TypeDesc>,
    /// Source line of the last emitted basic_set_line annotation
    pub(super) last_line: u32,
    /// True once the current block emitted its own terminator (ret)
    pub(super) block_done: bool,
}

impl<'a> CodeGen<'a> {
    pub fn new(ast: &'a Ast, analysis: &'a Analysis, config: &'a CompilerConfig) -> Self {
        CodeGen {
            ast,
            analysis,
            config,
            output: String::new(),
            functions: String::new(),
            string_globals: String::new(),
            wrappers: String::new(),
            worker_wrappers: std::collections::HashSet::new(),
            string_constants: HashMap::new(),
            string_counter: 0,
            temp_counter: 0,
            label_counter: 0,
            cur_label: String::new(),
            scope_key: None,
            current_class: None,
            fn_result_name: None,
            fn_ret: TypeDesc::void(),
            fn_is_sub: true,
            locals: HashMap::new(),
            local_arrays: HashMap::new(),
            scoped: false,
            select_types: HashMap::new(),
            last_line: 0,
            block_done: false,
        }
    }

    /// Fresh SSA temporary, assigned at most once.
    pub(super) fn fresh_temp(&mut self) -> String {
        let t = format!("%t.{}", self.temp_counter);
        self.temp_counter += 1;
        t
    }

    /// Fresh emitter-local label (IIF arms, DELETE null checks, computed
    /// branch chains) that has no CFG block behind it.
    pub(super) fn fresh_label(&mut self, hint: &str) -> String {
        let l = format!("@{}.{}", hint, self.label_counter);
        self.label_counter += 1;
        l
    }

    /// Label of a CFG block.
    pub(super) fn block_label(cfg: &Cfg, block: usize) -> String {
        let b = &cfg.blocks[block];
        let prefix = match b.kind {
            crate::cfg::BlockKind::Entry => "start",
            crate::cfg::BlockKind::ExitBlock => "end",
            crate::cfg::BlockKind::LoopHeader => "loop.head",
            crate::cfg::BlockKind::LoopBody => "loop.body",
            crate::cfg::BlockKind::LoopIncrement => "loop.inc",
            crate::cfg::BlockKind::LoopExit => "loop.exit",
            crate::cfg::BlockKind::CaseTest => "case.test",
            crate::cfg::BlockKind::CaseMatch => "case.body",
            crate::cfg::BlockKind::TryBlock => "try",
            crate::cfg::BlockKind::CatchBlock => "catch",
            crate::cfg::BlockKind::FinallyBlock => "finally",
            crate::cfg::BlockKind::Normal => "L",
        };
        format!("@{}.{}", prefix, block)
    }
}

/// Map a type-suffix character to its mangled tag.
fn suffix_tag(c: char) -> Option<&'static str> {
    match c {
        '%' => Some("i"),
        '&' => Some("l"),
        '!' => Some("f"),
        '#' => Some("d"),
        '$' => Some("s"),
        '@' => Some("b"),
        '^' => Some("h"),
        _ => None,
    }
}

/// Mangle a BASIC variable name into a symbol-safe stem:
/// uppercase, with the suffix character folded into a type tag
/// (`var_COUNT_i` for `count%`).
pub(super) fn mangle_var(name: &str) -> String {
    let upper = name.to_ascii_uppercase();
    match upper.chars().last().and_then(suffix_tag) {
        Some(tag) => format!("{}_{}", &upper[..upper.len() - 1], tag),
        None => upper,
    }
}

/// Global variable symbol.
pub(super) fn global_sym(name: &str) -> String {
    format!("$var_{}", mangle_var(name))
}

/// Global array descriptor symbol.
pub(super) fn array_sym(name: &str) -> String {
    format!("$arr_{}_desc", mangle_var(name))
}

/// Function symbol (`$func_NAME` / `$sub_NAME`).
pub(super) fn func_sym(name: &str, is_sub: bool) -> String {
    if is_sub {
        format!("$sub_{}", name.to_ascii_uppercase())
    } else {
        format!("$func_{}", name.to_ascii_uppercase())
    }
}

/// Method implementation symbol (`$Class__Method`).
pub(super) fn method_sym(class: &str, method: &str) -> String {
    format!("${}__{}", class, method)
}

/// VTable symbol for a class.
pub(super) fn vtable_sym(class: &str) -> String {
    format!("$vtable_{}", class)
}

/// Truncate a numeric value's ABI letter pair to a QBE class character.
pub(super) fn abi_of(ty: &TypeDesc) -> char {
    ty.base.abi()
}

/// SAMM allocation-kind tags shared with the runtime.
pub(super) const SAMM_KIND_OBJECT: u32 = 1;
pub(super) const SAMM_KIND_STRING: u32 = 2;
pub(super) const SAMM_KIND_LIST: u32 = 3;
pub(super) const SAMM_KIND_LIST_ATOM: u32 = 4;
pub(super) const SAMM_KIND_HASHMAP: u32 = 5;
pub(super) const SAMM_KIND_ARRAY_DESC: u32 = 6;

/// QBE comparison mnemonic for a binary comparison on the given class.
pub(super) fn cmp_op(op: crate::ast::BinOp, class: char, unsigned: bool) -> String {
    use crate::ast::BinOp::*;
    let base = match op {
        Eq => "eq",
        Ne => "ne",
        Lt => {
            if class == 'd' || class == 's' {
                "lt"
            } else if unsigned {
                "ult"
            } else {
                "slt"
            }
        }
        Le => {
            if class == 'd' || class == 's' {
                "le"
            } else if unsigned {
                "ule"
            } else {
                "sle"
            }
        }
        Gt => {
            if class == 'd' || class == 's' {
                "gt"
            } else if unsigned {
                "ugt"
            } else {
                "sgt"
            }
        }
        Ge => {
            if class == 'd' || class == 's' {
                "ge"
            } else if unsigned {
                "uge"
            } else {
                "sge"
            }
        }
        _ => "eq",
    };
    format!("c{}{}", base, class)
}

/// True when a value of this type participates in string refcounting.
pub(super) fn is_string(ty: &TypeDesc) -> bool {
    ty.base == BaseType::Str
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mangle_var_folds_suffix() {
        assert_eq!(mangle_var("count%"), "COUNT_i");
        assert_eq!(mangle_var("s$"), "S_s");
        assert_eq!(mangle_var("x"), "X");
        assert_eq!(mangle_var("b@"), "B_b");
    }

    #[test]
    fn test_symbols() {
        assert_eq!(global_sym("total"), "$var_TOTAL");
        assert_eq!(array_sym("a$"), "$arr_A_s_desc");
        assert_eq!(func_sym("Fact", false), "$func_FACT");
        assert_eq!(func_sym("Bump", true), "$sub_BUMP");
        assert_eq!(method_sym("Dog", "Speak"), "$Dog__Speak");
        assert_eq!(vtable_sym("Dog"), "$vtable_Dog");
    }

    #[test]
    fn test_samm_kind_tags_are_distinct() {
        let tags = [
            SAMM_KIND_OBJECT,
            SAMM_KIND_STRING,
            SAMM_KIND_LIST,
            SAMM_KIND_LIST_ATOM,
            SAMM_KIND_HASHMAP,
            SAMM_KIND_ARRAY_DESC,
        ];
        let unique: std::collections::HashSet<_> = tags.iter().collect();
        assert_eq!(unique.len(), tags.len());
    }

    #[test]
    fn test_cmp_op_selection() {
        use crate::ast::BinOp;
        assert_eq!(cmp_op(BinOp::Lt, 'w', false), "csltw");
        assert_eq!(cmp_op(BinOp::Lt, 'w', true), "cultw");
        assert_eq!(cmp_op(BinOp::Ge, 'd', false), "cged");
        assert_eq!(cmp_op(BinOp::Eq, 'l', false), "ceql");
    }
}
