//! Type table entries.

use crate::typeref::TypeRef;

/// Kind of a type table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeKind {
    Integer = 1,
    Float = 2,
    Pointer = 3,
    Array = 4,
    Typedef = 5,
    Struct = 6,
    Union = 7,
    Enum = 8,
    Forward = 9,
}

impl TypeKind {
    /// Decode a serialized discriminant.
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Integer,
            2 => Self::Float,
            3 => Self::Pointer,
            4 => Self::Array,
            5 => Self::Typedef,
            6 => Self::Struct,
            7 => Self::Union,
            8 => Self::Enum,
            9 => Self::Forward,
            _ => return None,
        })
    }
}

/// Name namespace a type definition occupies.
///
/// Tagged kinds each get their own namespace, everything else shares the
/// ordinary one, so `struct list` and `typedef ... list` can coexist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    Ordinary,
    Struct,
    Union,
    Enum,
}

impl Namespace {
    pub fn of(kind: TypeKind) -> Self {
        match kind {
            TypeKind::Struct | TypeKind::Forward => Self::Struct,
            TypeKind::Union => Self::Union,
            TypeKind::Enum => Self::Enum,
            _ => Self::Ordinary,
        }
    }
}

/// A struct/union field or an enum constant.
///
/// Fields carry a type reference and a bit offset in `value`; enum constants
/// carry no type and their numeric value in `value`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub ty: Option<TypeRef>,
    pub value: u64,
}

/// One type table entry.
///
/// `reference` is the pointee, array element, or typedef target depending on
/// `kind`; `encoding` carries integer/float encoding bits and is zero for
/// other kinds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDef {
    pub name: Option<String>,
    pub kind: TypeKind,
    pub size: u32,
    pub encoding: u32,
    pub reference: Option<TypeRef>,
    pub members: Vec<Member>,
}

impl TypeDef {
    pub fn namespace(&self) -> Namespace {
        Namespace::of(self.kind)
    }
}
