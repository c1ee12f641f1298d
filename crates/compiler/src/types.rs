//! The FasterBASIC type lattice
//!
//! A type is the triple `{base, object_name, element}`: scalar base kind,
//! the named record/class for user types, and the element type for
//! parameterized containers (`LIST OF T`, `ARRAY OF T`).
//!
//! Widening follows classic BASIC: narrower integers widen to wider ones,
//! any numeric widens to DOUBLE. Narrowing is always a compile error.

use std::fmt;

/// Scalar base kind of a type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Byte,
    UByte,
    Short,
    UShort,
    Integer,
    UInteger,
    Long,
    ULong,
    Single,
    Double,
    Str,
    UserDefined,
    ClassInstance,
    List,
    Hashmap,
    ArrayDesc,
    Void,
    /// LIST OF ANY elements, heterogeneous until a MATCH TYPE arm narrows them
    Unknown,
}

impl BaseType {
    /// Storage size in bytes. Reference kinds are pointers.
    pub fn size(self) -> u32 {
        match self {
            BaseType::Byte | BaseType::UByte => 1,
            BaseType::Short | BaseType::UShort => 2,
            BaseType::Integer | BaseType::UInteger | BaseType::Single => 4,
            BaseType::Long
            | BaseType::ULong
            | BaseType::Double
            | BaseType::Str
            | BaseType::ClassInstance
            | BaseType::List
            | BaseType::Hashmap
            | BaseType::ArrayDesc
            | BaseType::Unknown => 8,
            BaseType::UserDefined => 0, // layout comes from the symbol table
            BaseType::Void => 0,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            BaseType::Byte
                | BaseType::UByte
                | BaseType::Short
                | BaseType::UShort
                | BaseType::Integer
                | BaseType::UInteger
                | BaseType::Long
                | BaseType::ULong
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, BaseType::Single | BaseType::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            BaseType::UByte | BaseType::UShort | BaseType::UInteger | BaseType::ULong
        )
    }

    /// True for pointer-like kinds that live in the string pool / heap and
    /// participate in SAMM tracking.
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            BaseType::Str
                | BaseType::ClassInstance
                | BaseType::List
                | BaseType::Hashmap
                | BaseType::ArrayDesc
        )
    }

    /// QBE ABI letter for a value of this kind held in a temporary.
    /// Sub-word integers compute as `w`; pointers are `l`.
    pub fn abi(self) -> char {
        match self {
            BaseType::Byte
            | BaseType::UByte
            | BaseType::Short
            | BaseType::UShort
            | BaseType::Integer
            | BaseType::UInteger => 'w',
            BaseType::Long | BaseType::ULong => 'l',
            BaseType::Single => 's',
            BaseType::Double => 'd',
            _ => 'l',
        }
    }

    /// QBE instruction suffix for a load of this kind. Sub-word signed loads
    /// sign-extend into a 32-bit temp; unsigned loads zero-extend.
    pub fn load_op(self) -> &'static str {
        match self {
            BaseType::Byte => "loadsb",
            BaseType::UByte => "loadub",
            BaseType::Short => "loadsh",
            BaseType::UShort => "loaduh",
            BaseType::Integer | BaseType::UInteger => "loadw",
            BaseType::Single => "loads",
            BaseType::Double => "loadd",
            _ => "loadl",
        }
    }

    /// QBE store instruction for this kind.
    pub fn store_op(self) -> &'static str {
        match self {
            BaseType::Byte | BaseType::UByte => "storeb",
            BaseType::Short | BaseType::UShort => "storeh",
            BaseType::Integer | BaseType::UInteger => "storew",
            BaseType::Single => "stores",
            BaseType::Double => "stored",
            _ => "storel",
        }
    }
}

/// Full type descriptor: base kind plus the record/class name for user
/// types and the element type for parameterized containers.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDesc {
    pub base: BaseType,
    pub object_name: Option<String>,
    pub element: Option<Box<TypeDesc>>,
}

impl TypeDesc {
    pub fn scalar(base: BaseType) -> Self {
        TypeDesc {
            base,
            object_name: None,
            element: None,
        }
    }

    pub fn integer() -> Self {
        Self::scalar(BaseType::Integer)
    }

    pub fn long() -> Self {
        Self::scalar(BaseType::Long)
    }

    pub fn double() -> Self {
        Self::scalar(BaseType::Double)
    }

    pub fn single() -> Self {
        Self::scalar(BaseType::Single)
    }

    pub fn string() -> Self {
        Self::scalar(BaseType::Str)
    }

    pub fn void() -> Self {
        Self::scalar(BaseType::Void)
    }

    pub fn unknown() -> Self {
        Self::scalar(BaseType::Unknown)
    }

    pub fn class(name: impl Into<String>) -> Self {
        TypeDesc {
            base: BaseType::ClassInstance,
            object_name: Some(name.into()),
            element: None,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        TypeDesc {
            base: BaseType::UserDefined,
            object_name: Some(name.into()),
            element: None,
        }
    }

    pub fn list_of(element: TypeDesc) -> Self {
        TypeDesc {
            base: BaseType::List,
            object_name: None,
            element: Some(Box::new(element)),
        }
    }

    pub fn array_of(element: TypeDesc) -> Self {
        TypeDesc {
            base: BaseType::ArrayDesc,
            object_name: None,
            element: Some(Box::new(element)),
        }
    }

    pub fn hashmap() -> Self {
        Self::scalar(BaseType::Hashmap)
    }

    /// Type implied by an identifier suffix character, if any.
    /// `%` int32, `&` int64, `!` single, `#` double, `$` string,
    /// `@` byte, `^` short.
    pub fn from_suffix(c: char) -> Option<TypeDesc> {
        match c {
            '%' => Some(Self::integer()),
            '&' => Some(Self::long()),
            '!' => Some(Self::single()),
            '#' => Some(Self::double()),
            '$' => Some(Self::string()),
            '@' => Some(Self::scalar(BaseType::Byte)),
            '^' => Some(Self::scalar(BaseType::Short)),
            _ => None,
        }
    }

    /// Whether a value of `self` may be assigned where `target` is expected
    /// without narrowing. Integer widening ranks: byte < short < integer <
    /// long; every numeric widens to DOUBLE, SINGLE widens to DOUBLE.
    pub fn widens_to(&self, target: &TypeDesc) -> bool {
        if self == target {
            return true;
        }
        let (a, b) = (self.base, target.base);
        if a.is_integer() && b.is_integer() {
            return integer_rank(a) <= integer_rank(b);
        }
        if a.is_numeric() && b == BaseType::Double {
            return true;
        }
        if a.is_integer() && b == BaseType::Single {
            return integer_rank(a) <= 2;
        }
        false
    }

    /// Runtime atom tag for LIST elements of this type. Matches the tags the
    /// list runtime stamps on each atom.
    pub fn atom_tag(&self) -> Option<u32> {
        match self.base {
            b if b.is_integer() => Some(ATOM_INTEGER),
            BaseType::Single | BaseType::Double => Some(ATOM_DOUBLE),
            BaseType::Str => Some(ATOM_STRING),
            BaseType::List => Some(ATOM_LIST),
            BaseType::ClassInstance => Some(ATOM_OBJECT),
            _ => None,
        }
    }
}

/// Atom type tags shared with the list runtime.
pub const ATOM_INTEGER: u32 = 1;
pub const ATOM_DOUBLE: u32 = 2;
pub const ATOM_STRING: u32 = 3;
pub const ATOM_LIST: u32 = 4;
pub const ATOM_OBJECT: u32 = 5;

fn integer_rank(b: BaseType) -> u32 {
    match b {
        BaseType::Byte | BaseType::UByte => 1,
        BaseType::Short | BaseType::UShort => 2,
        BaseType::Integer | BaseType::UInteger => 3,
        BaseType::Long | BaseType::ULong => 4,
        _ => 0,
    }
}

// User-facing type names in diagnostics use BASIC spellings.
impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base {
            BaseType::Byte => f.write_str("BYTE"),
            BaseType::UByte => f.write_str("UBYTE"),
            BaseType::Short => f.write_str("SHORT"),
            BaseType::UShort => f.write_str("USHORT"),
            BaseType::Integer => f.write_str("INTEGER"),
            BaseType::UInteger => f.write_str("UINTEGER"),
            BaseType::Long => f.write_str("LONG"),
            BaseType::ULong => f.write_str("ULONG"),
            BaseType::Single => f.write_str("SINGLE"),
            BaseType::Double => f.write_str("DOUBLE"),
            BaseType::Str => f.write_str("STRING"),
            BaseType::UserDefined | BaseType::ClassInstance => {
                f.write_str(self.object_name.as_deref().unwrap_or("?"))
            }
            BaseType::List => match &self.element {
                Some(e) if e.base == BaseType::Unknown => f.write_str("LIST OF ANY"),
                Some(e) => write!(f, "LIST OF {}", e),
                None => f.write_str("LIST"),
            },
            BaseType::Hashmap => f.write_str("HASHMAP"),
            BaseType::ArrayDesc => match &self.element {
                Some(e) => write!(f, "ARRAY OF {}", e),
                None => f.write_str("ARRAY"),
            },
            BaseType::Void => f.write_str("VOID"),
            BaseType::Unknown => f.write_str("ANY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_types() {
        assert_eq!(TypeDesc::from_suffix('%').unwrap().base, BaseType::Integer);
        assert_eq!(TypeDesc::from_suffix('&').unwrap().base, BaseType::Long);
        assert_eq!(TypeDesc::from_suffix('!').unwrap().base, BaseType::Single);
        assert_eq!(TypeDesc::from_suffix('#').unwrap().base, BaseType::Double);
        assert_eq!(TypeDesc::from_suffix('$').unwrap().base, BaseType::Str);
        assert_eq!(TypeDesc::from_suffix('@').unwrap().base, BaseType::Byte);
        assert_eq!(TypeDesc::from_suffix('^').unwrap().base, BaseType::Short);
        assert_eq!(TypeDesc::from_suffix('a'), None);
    }

    #[test]
    fn test_widening_directions() {
        let short = TypeDesc::scalar(BaseType::Short);
        let int = TypeDesc::integer();
        let long = TypeDesc::long();
        let dbl = TypeDesc::double();

        assert!(short.widens_to(&int));
        assert!(int.widens_to(&long));
        assert!(int.widens_to(&dbl));
        assert!(TypeDesc::single().widens_to(&dbl));

        // Narrowing is never allowed
        assert!(!dbl.widens_to(&int));
        assert!(!long.widens_to(&int));
        assert!(!int.widens_to(&short));
    }

    #[test]
    fn test_string_never_widens_to_numeric() {
        assert!(!TypeDesc::string().widens_to(&TypeDesc::double()));
        assert!(!TypeDesc::double().widens_to(&TypeDesc::string()));
    }

    #[test]
    fn test_abi_letters() {
        assert_eq!(BaseType::Integer.abi(), 'w');
        assert_eq!(BaseType::Byte.abi(), 'w');
        assert_eq!(BaseType::Long.abi(), 'l');
        assert_eq!(BaseType::Str.abi(), 'l');
        assert_eq!(BaseType::Single.abi(), 's');
        assert_eq!(BaseType::Double.abi(), 'd');
    }

    #[test]
    fn test_subword_loads_sign_extend() {
        assert_eq!(BaseType::Byte.load_op(), "loadsb");
        assert_eq!(BaseType::Short.load_op(), "loadsh");
        assert_eq!(BaseType::UByte.load_op(), "loadub");
        assert_eq!(BaseType::Integer.load_op(), "loadw");
        assert_eq!(BaseType::Str.load_op(), "loadl");
    }

    #[test]
    fn test_display_spellings() {
        assert_eq!(TypeDesc::integer().to_string(), "INTEGER");
        assert_eq!(
            TypeDesc::list_of(TypeDesc::string()).to_string(),
            "LIST OF STRING"
        );
        assert_eq!(
            TypeDesc::list_of(TypeDesc::unknown()).to_string(),
            "LIST OF ANY"
        );
        assert_eq!(TypeDesc::class("Animal").to_string(), "Animal");
    }

    #[test]
    fn test_atom_tags() {
        assert_eq!(TypeDesc::integer().atom_tag(), Some(ATOM_INTEGER));
        assert_eq!(TypeDesc::double().atom_tag(), Some(ATOM_DOUBLE));
        assert_eq!(TypeDesc::string().atom_tag(), Some(ATOM_STRING));
        assert_eq!(TypeDesc::void().atom_tag(), None);
    }
}
