//! Interned types.
//!
//! Two structurally-equal type expressions always yield the same [`TypeId`]:
//! every constructor consults the intern map through a canonical
//! [`TypeKey`], so type equality everywhere else in the compiler is handle
//! equality. Size, alignment, record fields, and variant member lists are
//! computed lazily and cached on the entry; lazy computation re-entering
//! itself is the type-recursion diagnostic.

use ahash::AHashMap;

use crate::ast::CallingConv;
use crate::error::{CompileResult, DiagnosticKind};
use crate::ids::{EnumId, NewTypeId, RecordId, TypeId, VariantId};
use crate::intern::StrId;
use crate::object::{Object, ObjectKey, object_key, print_object};
use crate::state::CompilerState;

#[derive(Debug, Clone)]
pub enum TypeKind {
    Bool,
    Integer { bits: u8, signed: bool },
    Float { bits: u8, imaginary: bool },
    Complex { bits: u8 },
    Pointer(TypeId),
    CodePointer {
        arg_types: Vec<TypeId>,
        return_is_ref: Vec<bool>,
        return_types: Vec<TypeId>,
    },
    CCodePointer {
        calling_conv: CallingConv,
        arg_types: Vec<TypeId>,
        has_var_args: bool,
        return_type: Option<TypeId>,
    },
    Array(TypeId, u64),
    Vector(TypeId, u64),
    Tuple(Vec<TypeId>),
    Union(Vec<TypeId>),
    Record {
        decl: RecordId,
        params: Vec<Object>,
    },
    Variant {
        decl: VariantId,
        params: Vec<Object>,
    },
    /// A singleton type lifted from an arbitrary compile-time object.
    Static(Box<Object>),
    Enum(EnumId),
    NewType(NewTypeId),
}

/// Canonical intern key; mirrors `TypeKind` with objects projected to keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TypeKey {
    Bool,
    Integer(u8, bool),
    Float(u8, bool),
    Complex(u8),
    Pointer(TypeId),
    CodePointer(Vec<TypeId>, Vec<bool>, Vec<TypeId>),
    CCodePointer(CallingConv, Vec<TypeId>, bool, Option<TypeId>),
    Array(TypeId, u64),
    Vector(TypeId, u64),
    Tuple(Vec<TypeId>),
    Union(Vec<TypeId>),
    Record(RecordId, Vec<ObjectKey>),
    Variant(VariantId, Vec<ObjectKey>),
    Static(ObjectKey),
    Enum(EnumId),
    NewType(NewTypeId),
}

/// Lazily-computed record layout.
#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub field_names: Vec<StrId>,
    pub field_types: Vec<TypeId>,
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct VariantInfo {
    pub member_types: Vec<TypeId>,
    /// Byte offset of the payload union following the tag.
    pub payload_offset: u64,
}

#[derive(Debug)]
pub struct TypeEntry {
    pub kind: TypeKind,
    size_align: Option<(u64, u64)>,
    computing: bool,
    pub record_info: Option<RecordInfo>,
    pub variant_info: Option<VariantInfo>,
}

impl TypeEntry {
    pub fn kind_is_bool(&self) -> bool {
        matches!(self.kind, TypeKind::Bool)
    }
}

/// Frequently-used interned types, created once at state construction.
#[derive(Debug, Clone, Copy)]
pub struct CoreTypes {
    pub bool_type: TypeId,
    pub int8: TypeId,
    pub int16: TypeId,
    pub int32: TypeId,
    pub int64: TypeId,
    pub uint8: TypeId,
    pub uint16: TypeId,
    pub uint32: TypeId,
    pub uint64: TypeId,
    pub float32: TypeId,
    pub float64: TypeId,
    /// `size_t` for the compile-time target; 64-bit like the host backend.
    pub size_type: TypeId,
    pub ptrdiff_type: TypeId,
    pub cint: TypeId,
}

#[derive(Debug, Default)]
pub struct TypeTable {
    entries: Vec<TypeEntry>,
    intern: AHashMap<TypeKey, TypeId>,
}

impl TypeTable {
    pub fn get(&self, id: TypeId) -> &TypeEntry {
        &self.entries[id.index()]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut TypeEntry {
        &mut self.entries[id.index()]
    }

    fn intern(&mut self, key: TypeKey, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.intern.get(&key) {
            return id;
        }
        let id = TypeId::new(self.entries.len());
        self.entries.push(TypeEntry {
            kind,
            size_align: None,
            computing: false,
            record_info: None,
            variant_info: None,
        });
        self.intern.insert(key, id);
        id
    }
}

/// Builds the always-present primitive types.
pub fn core_types(table: &mut TypeTable) -> CoreTypes {
    let bool_type = table.intern(TypeKey::Bool, TypeKind::Bool);
    let mut int = |bits: u8, signed: bool| {
        table.intern(
            TypeKey::Integer(bits, signed),
            TypeKind::Integer { bits, signed },
        )
    };
    let int8 = int(8, true);
    let int16 = int(16, true);
    let int32 = int(32, true);
    let int64 = int(64, true);
    let uint8 = int(8, false);
    let uint16 = int(16, false);
    let uint32 = int(32, false);
    let uint64 = int(64, false);
    let float32 = table.intern(
        TypeKey::Float(32, false),
        TypeKind::Float {
            bits: 32,
            imaginary: false,
        },
    );
    let float64 = table.intern(
        TypeKey::Float(64, false),
        TypeKind::Float {
            bits: 64,
            imaginary: false,
        },
    );
    CoreTypes {
        bool_type,
        int8,
        int16,
        int32,
        int64,
        uint8,
        uint16,
        uint32,
        uint64,
        float32,
        float64,
        size_type: uint64,
        ptrdiff_type: int64,
        cint: int32,
    }
}

impl CompilerState {
    pub fn integer_type(&mut self, bits: u8, signed: bool) -> TypeId {
        self.types.intern(
            TypeKey::Integer(bits, signed),
            TypeKind::Integer { bits, signed },
        )
    }

    pub fn float_type(&mut self, bits: u8, imaginary: bool) -> TypeId {
        self.types.intern(
            TypeKey::Float(bits, imaginary),
            TypeKind::Float { bits, imaginary },
        )
    }

    pub fn complex_type(&mut self, bits: u8) -> TypeId {
        self.types
            .intern(TypeKey::Complex(bits), TypeKind::Complex { bits })
    }

    pub fn pointer_type(&mut self, pointee: TypeId) -> TypeId {
        self.types
            .intern(TypeKey::Pointer(pointee), TypeKind::Pointer(pointee))
    }

    pub fn code_pointer_type(
        &mut self,
        arg_types: Vec<TypeId>,
        return_is_ref: Vec<bool>,
        return_types: Vec<TypeId>,
    ) -> TypeId {
        self.types.intern(
            TypeKey::CodePointer(arg_types.clone(), return_is_ref.clone(), return_types.clone()),
            TypeKind::CodePointer {
                arg_types,
                return_is_ref,
                return_types,
            },
        )
    }

    pub fn c_code_pointer_type(
        &mut self,
        calling_conv: CallingConv,
        arg_types: Vec<TypeId>,
        has_var_args: bool,
        return_type: Option<TypeId>,
    ) -> TypeId {
        self.types.intern(
            TypeKey::CCodePointer(calling_conv, arg_types.clone(), has_var_args, return_type),
            TypeKind::CCodePointer {
                calling_conv,
                arg_types,
                has_var_args,
                return_type,
            },
        )
    }

    pub fn array_type(&mut self, element: TypeId, size: u64) -> TypeId {
        self.types
            .intern(TypeKey::Array(element, size), TypeKind::Array(element, size))
    }

    pub fn vector_type(&mut self, element: TypeId, size: u64) -> TypeId {
        self.types.intern(
            TypeKey::Vector(element, size),
            TypeKind::Vector(element, size),
        )
    }

    pub fn tuple_type(&mut self, elements: Vec<TypeId>) -> TypeId {
        self.types
            .intern(TypeKey::Tuple(elements.clone()), TypeKind::Tuple(elements))
    }

    pub fn union_type(&mut self, members: Vec<TypeId>) -> TypeId {
        self.types
            .intern(TypeKey::Union(members.clone()), TypeKind::Union(members))
    }

    pub fn record_type(&mut self, decl: RecordId, params: Vec<Object>) -> CompileResult<TypeId> {
        let mut keys = Vec::with_capacity(params.len());
        for p in &params {
            match object_key(self, p) {
                Some(k) => keys.push(k),
                None => {
                    return Err(self.type_mismatch(
                        "record parameter",
                        "a static object",
                        &print_object(self, p),
                    ));
                }
            }
        }
        Ok(self.types.intern(
            TypeKey::Record(decl, keys),
            TypeKind::Record { decl, params },
        ))
    }

    pub fn variant_type(&mut self, decl: VariantId, params: Vec<Object>) -> CompileResult<TypeId> {
        let mut keys = Vec::with_capacity(params.len());
        for p in &params {
            match object_key(self, p) {
                Some(k) => keys.push(k),
                None => {
                    return Err(self.type_mismatch(
                        "variant parameter",
                        "a static object",
                        &print_object(self, p),
                    ));
                }
            }
        }
        Ok(self.types.intern(
            TypeKey::Variant(decl, keys),
            TypeKind::Variant { decl, params },
        ))
    }

    pub fn static_type(&mut self, obj: Object) -> CompileResult<TypeId> {
        match object_key(self, &obj) {
            Some(key) => Ok(self.types.intern(
                TypeKey::Static(key),
                TypeKind::Static(Box::new(obj)),
            )),
            None => Err(self.type_mismatch(
                "static type parameter",
                "a static object",
                &print_object(self, &obj),
            )),
        }
    }

    pub fn enum_type(&mut self, decl: EnumId) -> TypeId {
        self.types.intern(TypeKey::Enum(decl), TypeKind::Enum(decl))
    }

    pub fn newtype_type(&mut self, decl: NewTypeId) -> TypeId {
        self.types
            .intern(TypeKey::NewType(decl), TypeKind::NewType(decl))
    }

    /// The type a static object has when used as a value.
    pub fn static_object_type(&mut self, obj: &Object) -> CompileResult<TypeId> {
        match obj {
            Object::Value(v) => Ok(self.holders[v.index()].ty),
            Object::EnumMember { decl, .. } => Ok(self.enum_type(*decl)),
            _ => self.static_type(obj.clone()),
        }
    }

    //
    // layout
    //

    pub fn type_size(&mut self, id: TypeId) -> CompileResult<u64> {
        Ok(self.type_size_align(id)?.0)
    }

    pub fn type_alignment(&mut self, id: TypeId) -> CompileResult<u64> {
        Ok(self.type_size_align(id)?.1)
    }

    pub fn type_size_align(&mut self, id: TypeId) -> CompileResult<(u64, u64)> {
        if let Some(sa) = self.types.get(id).size_align {
            return Ok(sa);
        }
        if self.types.get(id).computing {
            let name = self.type_name(id);
            return Err(self.error(DiagnosticKind::Recursion {
                what: format!("type definition of {name}"),
            }));
        }
        self.types.get_mut(id).computing = true;
        let result = self.compute_size_align(id);
        self.types.get_mut(id).computing = false;
        let sa = result?;
        self.types.get_mut(id).size_align = Some(sa);
        Ok(sa)
    }

    fn compute_size_align(&mut self, id: TypeId) -> CompileResult<(u64, u64)> {
        let kind = self.types.get(id).kind.clone();
        Ok(match kind {
            TypeKind::Bool => (1, 1),
            TypeKind::Integer { bits, .. } => (u64::from(bits) / 8, u64::from(bits) / 8),
            TypeKind::Float { bits, .. } => (u64::from(bits) / 8, u64::from(bits) / 8),
            TypeKind::Complex { bits } => (u64::from(bits) / 4, u64::from(bits) / 8),
            TypeKind::Pointer(_)
            | TypeKind::CodePointer { .. }
            | TypeKind::CCodePointer { .. } => (8, 8),
            TypeKind::Array(element, n) | TypeKind::Vector(element, n) => {
                let (size, align) = self.type_size_align(element)?;
                (size * n, align)
            }
            TypeKind::Tuple(elements) => self.struct_layout(&elements)?.1,
            TypeKind::Union(members) => {
                let mut size = 0u64;
                let mut align = 1u64;
                for m in members {
                    let (s, a) = self.type_size_align(m)?;
                    size = size.max(s);
                    align = align.max(a);
                }
                (round_up(size, align), align)
            }
            TypeKind::Record { .. } => {
                let info = self.record_info(id)?;
                self.struct_layout(&info.field_types)?.1
            }
            TypeKind::Variant { .. } => {
                let info = self.variant_info(id)?;
                let mut payload_size = 0u64;
                let mut align = 4u64;
                for m in &info.member_types {
                    let (s, a) = self.type_size_align(*m)?;
                    payload_size = payload_size.max(s);
                    align = align.max(a);
                }
                let payload_offset = round_up(4, align.max(1));
                (round_up(payload_offset + payload_size, align), align)
            }
            TypeKind::Static(_) => (0, 1),
            TypeKind::Enum(_) => (4, 4),
            TypeKind::NewType(decl) => {
                let base = self.newtype_base(decl)?;
                self.type_size_align(base)?
            }
        })
    }

    /// C-style struct layout: `(offsets, (size, align))`.
    pub fn struct_layout(&mut self, fields: &[TypeId]) -> CompileResult<(Vec<u64>, (u64, u64))> {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0u64;
        let mut align = 1u64;
        for &f in fields {
            let (s, a) = self.type_size_align(f)?;
            offset = round_up(offset, a.max(1));
            offsets.push(offset);
            offset += s;
            align = align.max(a);
        }
        Ok((offsets, (round_up(offset, align), align)))
    }

    /// Scalars and aggregates of scalars can be destroyed bytewise; only
    /// record/variant values consult the prelude `destroy` operator.
    pub fn is_plain_data(&self, id: TypeId) -> bool {
        match &self.types.get(id).kind {
            TypeKind::Bool
            | TypeKind::Integer { .. }
            | TypeKind::Float { .. }
            | TypeKind::Complex { .. }
            | TypeKind::Pointer(_)
            | TypeKind::CodePointer { .. }
            | TypeKind::CCodePointer { .. }
            | TypeKind::Static(_)
            | TypeKind::Enum(_) => true,
            TypeKind::Array(element, _) | TypeKind::Vector(element, _) => {
                self.is_plain_data(*element)
            }
            TypeKind::Tuple(elements) => elements.iter().all(|&t| self.is_plain_data(t)),
            TypeKind::Union(_) => true,
            TypeKind::Record { .. } | TypeKind::Variant { .. } | TypeKind::NewType(_) => false,
        }
    }

    //
    // printing
    //

    pub fn type_name(&self, id: TypeId) -> String {
        match &self.types.get(id).kind {
            TypeKind::Bool => "Bool".to_owned(),
            TypeKind::Integer { bits, signed } => {
                format!("{}Int{bits}", if *signed { "" } else { "U" })
            }
            TypeKind::Float { bits, imaginary } => {
                if *imaginary {
                    format!("Imag{bits}")
                } else {
                    format!("Float{bits}")
                }
            }
            TypeKind::Complex { bits } => format!("Complex{bits}"),
            TypeKind::Pointer(p) => format!("Pointer[{}]", self.type_name(*p)),
            TypeKind::CodePointer {
                arg_types,
                return_types,
                ..
            } => format!(
                "CodePointer[({}), ({})]",
                self.type_name_list(arg_types),
                self.type_name_list(return_types)
            ),
            TypeKind::CCodePointer {
                arg_types,
                return_type,
                ..
            } => format!(
                "ExternalCodePointer[({}), ({})]",
                self.type_name_list(arg_types),
                return_type.map(|t| self.type_name(t)).unwrap_or_default()
            ),
            TypeKind::Array(e, n) => format!("Array[{}, {n}]", self.type_name(*e)),
            TypeKind::Vector(e, n) => format!("Vec[{}, {n}]", self.type_name(*e)),
            TypeKind::Tuple(elements) => format!("Tuple[{}]", self.type_name_list(elements)),
            TypeKind::Union(members) => format!("Union[{}]", self.type_name_list(members)),
            TypeKind::Record { decl, params } => {
                let name = self.interner.get(self.records[decl.index()].name);
                if params.is_empty() {
                    name.to_owned()
                } else {
                    format!("{name}[{}]", self.object_name_list(params))
                }
            }
            TypeKind::Variant { decl, params } => {
                let name = self.interner.get(self.variants[decl.index()].name);
                if params.is_empty() {
                    name.to_owned()
                } else {
                    format!("{name}[{}]", self.object_name_list(params))
                }
            }
            TypeKind::Static(obj) => format!("Static[{}]", print_object(self, obj)),
            TypeKind::Enum(decl) => self.interner.get(self.enums[decl.index()].name).to_owned(),
            TypeKind::NewType(decl) => self
                .interner
                .get(self.newtypes[decl.index()].name)
                .to_owned(),
        }
    }

    fn type_name_list(&self, types: &[TypeId]) -> String {
        types
            .iter()
            .map(|&t| self.type_name(t))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn object_name_list(&self, objects: &[Object]) -> String {
        objects
            .iter()
            .map(|o| print_object(self, o))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    debug_assert!(align > 0);
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::state::CompilerState;

    #[test]
    fn intern_canonicality() {
        let mut state = CompilerState::new();
        let int32 = state.core.int32;
        let a = state.pointer_type(int32);
        let b = state.pointer_type(int32);
        assert_eq!(a, b);
        let t1 = state.tuple_type(vec![int32, a]);
        let t2 = state.tuple_type(vec![int32, b]);
        assert_eq!(t1, t2);
        let u8t = state.core.uint8;
        assert_ne!(state.pointer_type(u8t), a);
    }

    #[test]
    fn scalar_layout() {
        let mut state = CompilerState::new();
        let int32 = state.core.int32;
        assert_eq!(state.type_size_align(int32).unwrap(), (4, 4));
        let bool_type = state.core.bool_type;
        assert_eq!(state.type_size_align(bool_type).unwrap(), (1, 1));
        let ptr = state.pointer_type(int32);
        assert_eq!(state.type_size_align(ptr).unwrap(), (8, 8));
    }

    #[test]
    fn tuple_layout_pads_between_fields() {
        let mut state = CompilerState::new();
        let u8t = state.core.uint8;
        let int32 = state.core.int32;
        let t = state.tuple_type(vec![u8t, int32]);
        assert_eq!(state.type_size_align(t).unwrap(), (8, 4));
        let (offsets, _) = state.struct_layout(&[u8t, int32]).unwrap();
        assert_eq!(offsets, vec![0, 4]);
    }

    #[test]
    fn array_and_union_layout() {
        let mut state = CompilerState::new();
        let int16 = state.core.int16;
        let arr = state.array_type(int16, 5);
        assert_eq!(state.type_size_align(arr).unwrap(), (10, 2));
        let int64 = state.core.int64;
        let u = state.union_type(vec![int16, int64]);
        assert_eq!(state.type_size_align(u).unwrap(), (8, 8));
    }
}
