//! Symbol table
//!
//! All keys are uppercase-normalized (BASIC names are case-insensitive);
//! the stored info keeps the name as first written for error messages.
//! `a%` and `a$` are distinct variables, so the suffix character is part
//! of the key.
//!
//! Lookup order at a name reference is implemented by the analyzer:
//! current function's parameters, then its locals, then SHARED references,
//! then globals, then functions, then classes, then user types.

use crate::diagnostics::SourceLoc;
use crate::types::{BaseType, TypeDesc};
use std::collections::{HashMap, HashSet};

/// Uppercase-normalize a name for table lookup.
pub fn key(name: &str) -> String {
    name.to_ascii_uppercase()
}

#[derive(Debug, Clone)]
pub struct VarInfo {
    pub name: String,
    pub ty: TypeDesc,
}

#[derive(Debug, Clone)]
pub struct ArrayInfo {
    pub name: String,
    pub element: TypeDesc,
    pub rank: usize,
    pub is_global: bool,
}

#[derive(Debug, Clone)]
pub struct FuncInfo {
    pub name: String,
    pub param_names: Vec<String>,
    pub params: Vec<TypeDesc>,
    pub ret: TypeDesc,
    pub is_sub: bool,
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub ty: TypeDesc,
    pub offset: u32,
}

/// A user-defined record type with computed field offsets.
#[derive(Debug, Clone)]
pub struct UdtInfo {
    pub name: String,
    pub fields: Vec<FieldInfo>,
    pub size: u32,
    /// True when any field (including nested records) is a string;
    /// selects the deep marshalling path for worker transfers.
    pub has_string_fields: bool,
}

impl UdtInfo {
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Vtable slot reserved for the constructor.
pub const VTABLE_SLOT_CTOR: usize = 0;
/// Vtable slot reserved for the destructor.
pub const VTABLE_SLOT_DTOR: usize = 1;
/// First vtable slot for ordinary methods.
pub const VTABLE_SLOT_METHODS: usize = 2;

/// Object header: `[vtable_ptr 8B][class_id 8B]`, fields follow.
pub const OBJECT_HEADER_SIZE: u32 = 16;

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub param_names: Vec<String>,
    pub params: Vec<TypeDesc>,
    pub ret: TypeDesc,
    /// Absolute vtable slot (methods start at [`VTABLE_SLOT_METHODS`])
    pub slot: usize,
    /// Class that provides the implementation for this slot
    pub defined_in: String,
}

/// A class with inheritance-flattened field and method lists.
///
/// `fields` contains the parent's fields prefix-wise, so a child object
/// is layout-compatible with its parent. `methods` is in vtable order;
/// an override replaces the inherited entry in place, keeping its slot.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub parent: Option<String>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub has_ctor: bool,
    pub has_dtor: bool,
    pub ctor_params: Vec<TypeDesc>,
    pub ctor_param_names: Vec<String>,
    pub object_size: u32,
    pub class_id: u32,
}

impl ClassInfo {
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// Total vtable slot count (constructor + destructor + methods).
    pub fn vtable_len(&self) -> usize {
        VTABLE_SLOT_METHODS + self.methods.len()
    }
}

/// Per-function (or per-method) scope: parameters, locals, local arrays,
/// and names pulled in from the global scope via SHARED.
#[derive(Debug, Clone, Default)]
pub struct FuncScope {
    pub params: HashMap<String, VarInfo>,
    pub locals: HashMap<String, VarInfo>,
    pub local_arrays: HashMap<String, ArrayInfo>,
    pub shared: HashSet<String>,
}

impl FuncScope {
    pub fn lookup_var(&self, name: &str) -> Option<&VarInfo> {
        let k = key(name);
        self.params.get(&k).or_else(|| self.locals.get(&k))
    }
}

/// The program-wide symbol table built by semantic analysis pass 1 and
/// extended during pass 2 (implicit global variables).
#[derive(Debug, Default)]
pub struct SymbolTable {
    pub globals: HashMap<String, VarInfo>,
    pub global_arrays: HashMap<String, ArrayInfo>,
    pub functions: HashMap<String, FuncInfo>,
    pub classes: HashMap<String, ClassInfo>,
    pub user_types: HashMap<String, UdtInfo>,
    /// Main-program labels, for duplicate detection; the CFG builder owns
    /// the label-to-block mapping.
    pub labels: HashMap<String, SourceLoc>,
    next_class_id: u32,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn next_class_id(&mut self) -> u32 {
        self.next_class_id += 1;
        self.next_class_id
    }

    pub fn lookup_function(&self, name: &str) -> Option<&FuncInfo> {
        self.functions.get(&key(name))
    }

    pub fn lookup_class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(&key(name))
    }

    pub fn lookup_udt(&self, name: &str) -> Option<&UdtInfo> {
        self.user_types.get(&key(name))
    }

    /// Walk the parent chain from `class` upward. Returns true when
    /// `ancestor` is `class` itself or one of its ancestors.
    pub fn is_ancestor_or_same(&self, class: &str, ancestor: &str) -> bool {
        let mut cur = Some(key(class));
        let target = key(ancestor);
        while let Some(name) = cur {
            if name == target {
                return true;
            }
            cur = self
                .classes
                .get(&name)
                .and_then(|c| c.parent.as_ref())
                .map(|p| key(p));
        }
        false
    }

    /// The resolved vtable of a class: slot 0 the constructor symbol (or
    /// "0"), slot 1 the destructor (inherited when the class has none of
    /// its own), then method symbols in slot order.
    pub fn vtable_symbols(&self, class: &ClassInfo) -> Vec<String> {
        let mut slots = Vec::with_capacity(class.vtable_len());
        slots.push(if class.has_ctor {
            format!("${}__CONSTRUCTOR", class.name)
        } else {
            "0".to_string()
        });
        slots.push(match self.destructor_owner(class) {
            Some(owner) => format!("${}__DESTRUCTOR", owner),
            None => "0".to_string(),
        });
        for m in &class.methods {
            slots.push(format!("${}__{}", m.defined_in, m.name));
        }
        slots
    }

    /// The nearest class in the parent chain (including `class` itself)
    /// that defines a destructor.
    pub fn destructor_owner(&self, class: &ClassInfo) -> Option<String> {
        if class.has_dtor {
            return Some(class.name.clone());
        }
        let mut cur = class.parent.clone();
        while let Some(pname) = cur {
            match self.classes.get(&key(&pname)) {
                Some(p) if p.has_dtor => return Some(p.name.clone()),
                Some(p) => cur = p.parent.clone(),
                None => return None,
            }
        }
        None
    }
}

/// Natural alignment of a field type inside a record or object.
pub fn field_align(ty: &TypeDesc) -> u32 {
    match ty.base {
        BaseType::UserDefined => 8,
        b => b.size().max(1),
    }
}

/// Size of a field, looking through nested user-defined records.
pub fn field_size(ty: &TypeDesc, table: &SymbolTable) -> u32 {
    match ty.base {
        BaseType::UserDefined => ty
            .object_name
            .as_deref()
            .and_then(|n| table.lookup_udt(n))
            .map(|u| u.size)
            .unwrap_or(0),
        b => b.size(),
    }
}

/// Compute offsets for a field list starting at `base_offset`, returning
/// the laid-out fields and the total (alignment-padded) size.
pub fn layout_fields(
    decls: &[(String, TypeDesc)],
    base_offset: u32,
    table: &SymbolTable,
) -> (Vec<FieldInfo>, u32) {
    let mut fields = Vec::with_capacity(decls.len());
    let mut offset = base_offset;
    let mut max_align = 1u32;
    for (name, ty) in decls {
        let align = field_align(ty);
        let size = field_size(ty, table);
        max_align = max_align.max(align);
        offset = offset.next_multiple_of(align);
        fields.push(FieldInfo {
            name: name.clone(),
            ty: ty.clone(),
            offset,
        });
        offset += size;
    }
    (fields, offset.next_multiple_of(max_align))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalization() {
        assert_eq!(key("myVar$"), "MYVAR$");
        assert_ne!(key("a%"), key("a$"));
    }

    #[test]
    fn test_field_layout_with_padding() {
        let table = SymbolTable::new();
        let decls = vec![
            ("b".to_string(), TypeDesc::scalar(BaseType::Byte)),
            ("d".to_string(), TypeDesc::double()),
            ("s".to_string(), TypeDesc::scalar(BaseType::Short)),
        ];
        let (fields, size) = layout_fields(&decls, 0, &table);
        assert_eq!(fields[0].offset, 0);
        assert_eq!(fields[1].offset, 8); // padded to 8
        assert_eq!(fields[2].offset, 16);
        assert_eq!(size, 24); // rounded up to max align
    }

    #[test]
    fn test_class_fields_start_after_header() {
        let table = SymbolTable::new();
        let decls = vec![("x".to_string(), TypeDesc::integer())];
        let (fields, size) = layout_fields(&decls, OBJECT_HEADER_SIZE, &table);
        assert_eq!(fields[0].offset, 16);
        assert_eq!(size, 20);
    }

    #[test]
    fn test_vtable_inherited_slots_and_override() {
        let mut table = SymbolTable::new();
        let animal = ClassInfo {
            name: "Animal".to_string(),
            parent: None,
            fields: Vec::new(),
            methods: vec![MethodInfo {
                name: "Speak".to_string(),
                param_names: Vec::new(),
                params: Vec::new(),
                ret: TypeDesc::string(),
                slot: VTABLE_SLOT_METHODS,
                defined_in: "Animal".to_string(),
            }],
            has_ctor: false,
            has_dtor: true,
            ctor_params: Vec::new(),
            ctor_param_names: Vec::new(),
            object_size: OBJECT_HEADER_SIZE,
            class_id: 1,
        };
        // Dog overrides Speak in the same slot and has no own destructor
        let dog = ClassInfo {
            name: "Dog".to_string(),
            parent: Some("Animal".to_string()),
            fields: Vec::new(),
            methods: vec![MethodInfo {
                name: "Speak".to_string(),
                param_names: Vec::new(),
                params: Vec::new(),
                ret: TypeDesc::string(),
                slot: VTABLE_SLOT_METHODS,
                defined_in: "Dog".to_string(),
            }],
            has_ctor: false,
            has_dtor: false,
            ctor_params: Vec::new(),
            ctor_param_names: Vec::new(),
            object_size: OBJECT_HEADER_SIZE,
            class_id: 2,
        };
        table.classes.insert(key("Animal"), animal);
        table.classes.insert(key("Dog"), dog);

        let dog = table.lookup_class("Dog").unwrap();
        let slots = table.vtable_symbols(dog);
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[VTABLE_SLOT_CTOR], "0");
        // Destructor inherited from Animal
        assert_eq!(slots[VTABLE_SLOT_DTOR], "$Animal__DESTRUCTOR");
        assert_eq!(slots[VTABLE_SLOT_METHODS], "$Dog__Speak");

        let animal = table.lookup_class("Animal").unwrap();
        let slots = table.vtable_symbols(animal);
        assert_eq!(slots[VTABLE_SLOT_METHODS], "$Animal__Speak");
    }

    #[test]
    fn test_ancestor_chain() {
        let mut table = SymbolTable::new();
        for (name, parent) in [("A", None), ("B", Some("A")), ("C", Some("B"))] {
            table.classes.insert(
                key(name),
                ClassInfo {
                    name: name.to_string(),
                    parent: parent.map(str::to_string),
                    fields: Vec::new(),
                    methods: Vec::new(),
                    has_ctor: false,
                    has_dtor: false,
                    ctor_params: Vec::new(),
                    ctor_param_names: Vec::new(),
                    object_size: OBJECT_HEADER_SIZE,
                    class_id: 0,
                },
            );
        }
        assert!(table.is_ancestor_or_same("C", "A"));
        assert!(table.is_ancestor_or_same("C", "C"));
        assert!(!table.is_ancestor_or_same("A", "C"));
    }
}
