//! Runtime symbol interface
//!
//! The emitter targets a fixed set of runtime function names with known
//! signatures, collected here in one data-driven table. QBE resolves
//! calls to undeclared symbols at link time, so the table is the single
//! source of truth for names and ABIs rather than a block of `declare`
//! lines; the driver links the matching `libfbrt`.
//!
//! Signature letters are QBE classes: `w` 32-bit int, `l` 64-bit
//! int/pointer, `d` double; `()` groups parameters, `->` the return.

/// One runtime entry point.
pub struct RuntimeSym {
    pub name: &'static str,
    pub sig: &'static str,
}

/// Every runtime symbol the emitter may reference.
pub static RUNTIME_SYMBOLS: &[RuntimeSym] = &[
    // I/O
    RuntimeSym { name: "print_int", sig: "(w)" },
    RuntimeSym { name: "print_long", sig: "(l)" },
    RuntimeSym { name: "print_double", sig: "(d)" },
    RuntimeSym { name: "print_string", sig: "(l)" },
    RuntimeSym { name: "print_newline", sig: "()" },
    RuntimeSym { name: "print_tab", sig: "()" },
    RuntimeSym { name: "console_int", sig: "(w)" },
    RuntimeSym { name: "console_long", sig: "(l)" },
    RuntimeSym { name: "console_double", sig: "(d)" },
    RuntimeSym { name: "console_string", sig: "(l)" },
    RuntimeSym { name: "console_newline", sig: "()" },
    RuntimeSym { name: "console_tab", sig: "()" },
    RuntimeSym { name: "input_string", sig: "(l) -> l" },
    RuntimeSym { name: "input_number", sig: "(l) -> d" },
    // Strings
    RuntimeSym { name: "string_concat", sig: "(l, l) -> l" },
    RuntimeSym { name: "string_compare", sig: "(l, l) -> w" },
    RuntimeSym { name: "string_length", sig: "(l) -> w" },
    RuntimeSym { name: "string_mid", sig: "(l, w, w) -> l" },
    RuntimeSym { name: "string_left", sig: "(l, w) -> l" },
    RuntimeSym { name: "string_right", sig: "(l, w) -> l" },
    RuntimeSym { name: "string_slice", sig: "(l, w, w) -> l" },
    RuntimeSym { name: "string_retain", sig: "(l)" },
    RuntimeSym { name: "string_release", sig: "(l)" },
    RuntimeSym { name: "string_from_int", sig: "(w) -> l" },
    RuntimeSym { name: "string_from_long", sig: "(l) -> l" },
    RuntimeSym { name: "string_from_double", sig: "(d) -> l" },
    RuntimeSym { name: "string_clone", sig: "(l) -> l" },
    RuntimeSym { name: "string_chr", sig: "(w) -> l" },
    RuntimeSym { name: "string_val", sig: "(l) -> d" },
    RuntimeSym { name: "string_literal", sig: "(l) -> l" },
    // Arrays
    RuntimeSym { name: "array_create", sig: "(l, w, w, w)" },
    RuntimeSym { name: "array_set_extent", sig: "(l, w, w)" },
    RuntimeSym { name: "array_bounds_check", sig: "(l, w)" },
    RuntimeSym { name: "array_element_addr", sig: "(l, w) -> l" },
    RuntimeSym { name: "array_erase", sig: "(l)" },
    // Objects
    RuntimeSym { name: "object_retain", sig: "(l)" },
    RuntimeSym { name: "object_release", sig: "(l)" },
    // SAMM
    RuntimeSym { name: "samm_init", sig: "()" },
    RuntimeSym { name: "samm_shutdown", sig: "()" },
    RuntimeSym { name: "samm_enter_scope", sig: "()" },
    RuntimeSym { name: "samm_exit_scope", sig: "()" },
    RuntimeSym { name: "samm_alloc_object", sig: "(w, l) -> l" },
    RuntimeSym { name: "samm_track", sig: "(l, w)" },
    RuntimeSym { name: "samm_retain_parent", sig: "(l)" },
    RuntimeSym { name: "samm_is_probably_freed", sig: "(l) -> w" },
    RuntimeSym { name: "samm_wait", sig: "()" },
    RuntimeSym { name: "samm_set_stats", sig: "(w)" },
    // Exceptions (setjmp is called directly; see terminators.rs)
    RuntimeSym { name: "basic_exception_push", sig: "() -> l" },
    RuntimeSym { name: "basic_exception_pop", sig: "()" },
    RuntimeSym { name: "basic_throw", sig: "(w, w)" },
    RuntimeSym { name: "basic_err", sig: "() -> w" },
    RuntimeSym { name: "basic_erl", sig: "() -> w" },
    RuntimeSym { name: "setjmp", sig: "(l) -> w" },
    // Lists
    RuntimeSym { name: "list_new", sig: "(w) -> l" },
    RuntimeSym { name: "list_length", sig: "(l) -> w" },
    RuntimeSym { name: "list_get_ptr", sig: "(l, w) -> l" },
    RuntimeSym { name: "list_append_int", sig: "(l, w)" },
    RuntimeSym { name: "list_append_float", sig: "(l, d)" },
    RuntimeSym { name: "list_append_string", sig: "(l, l)" },
    RuntimeSym { name: "list_append_list", sig: "(l, l)" },
    RuntimeSym { name: "list_append_object", sig: "(l, l)" },
    // Hashmaps
    RuntimeSym { name: "hashmap_new", sig: "() -> l" },
    RuntimeSym { name: "hashmap_insert", sig: "(l, l, w, l)" },
    RuntimeSym { name: "hashmap_lookup", sig: "(l, l) -> l" },
    RuntimeSym { name: "hashmap_contains", sig: "(l, l) -> w" },
    RuntimeSym { name: "hashmap_remove", sig: "(l, l)" },
    RuntimeSym { name: "hashmap_count", sig: "(l) -> w" },
    // GOSUB return stack
    RuntimeSym { name: "gosub_push", sig: "(w)" },
    RuntimeSym { name: "gosub_pop", sig: "() -> w" },
    // DATA pool
    RuntimeSym { name: "basic_data_read_number", sig: "() -> d" },
    RuntimeSym { name: "basic_data_read_string", sig: "() -> l" },
    RuntimeSym { name: "basic_data_restore", sig: "(w)" },
    // Diagnostics
    RuntimeSym { name: "basic_set_line", sig: "(w)" },
    RuntimeSym { name: "basic_end", sig: "()" },
    RuntimeSym { name: "basic_pow", sig: "(d, d) -> d" },
    RuntimeSym { name: "basic_abs_int", sig: "(w) -> w" },
    RuntimeSym { name: "basic_abs_double", sig: "(d) -> d" },
    // Marshalling
    RuntimeSym { name: "marshall_udt_flat", sig: "(l, w) -> l" },
    RuntimeSym { name: "marshall_udt_deep", sig: "(l, l) -> l" },
    RuntimeSym { name: "unmarshall_udt_flat", sig: "(l, l, w)" },
    RuntimeSym { name: "unmarshall_udt_deep", sig: "(l, l, l)" },
    // Workers
    RuntimeSym { name: "worker_spawn", sig: "(l, l) -> l" },
    RuntimeSym { name: "worker_await", sig: "(l) -> l" },
    RuntimeSym { name: "worker_ready", sig: "(l) -> w" },
];

/// True when `name` is a known runtime entry point.
pub fn is_runtime_symbol(name: &str) -> bool {
    RUNTIME_SYMBOLS.iter().any(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for s in RUNTIME_SYMBOLS {
            assert!(seen.insert(s.name), "duplicate runtime symbol {}", s.name);
        }
    }

    #[test]
    fn test_core_symbols_present() {
        for name in [
            "print_string",
            "string_retain",
            "string_release",
            "samm_enter_scope",
            "samm_exit_scope",
            "setjmp",
            "basic_throw",
            "list_get_ptr",
            "worker_spawn",
        ] {
            assert!(is_runtime_symbol(name), "missing {}", name);
        }
    }
}
