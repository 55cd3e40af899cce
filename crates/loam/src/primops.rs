//! Primitive operations.
//!
//! The fixed set of compiler-provided operations exposed to user code
//! through the synthesized `__primitives__` module. Type-constructor prims
//! (`Pointer`, `Array`, `Tuple`, ...) double as pattern heads for the
//! unifier; value-level prims are executed directly by the evaluator and
//! typed directly by the analyzer.

use strum::{EnumIter, EnumString, IntoStaticStr};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, EnumIter,
)]
pub enum PrimOp {
    // reflection predicates and queries
    #[strum(serialize = "Type?")]
    TypeP,
    TypeSize,
    TypeAlignment,
    #[strum(serialize = "CallDefined?")]
    CallDefinedP,

    // bool
    #[strum(serialize = "boolNot")]
    BoolNot,

    // numeric
    #[strum(serialize = "numericEquals?")]
    NumericEqualsP,
    #[strum(serialize = "numericLesser?")]
    NumericLesserP,
    #[strum(serialize = "numericAdd")]
    NumericAdd,
    #[strum(serialize = "numericSubtract")]
    NumericSubtract,
    #[strum(serialize = "numericMultiply")]
    NumericMultiply,
    #[strum(serialize = "numericDivide")]
    NumericDivide,
    #[strum(serialize = "numericNegate")]
    NumericNegate,
    #[strum(serialize = "numericConvert")]
    NumericConvert,

    // integer
    #[strum(serialize = "integerRemainder")]
    IntegerRemainder,
    #[strum(serialize = "integerShiftLeft")]
    IntegerShiftLeft,
    #[strum(serialize = "integerShiftRight")]
    IntegerShiftRight,
    #[strum(serialize = "integerBitwiseAnd")]
    IntegerBitwiseAnd,
    #[strum(serialize = "integerBitwiseOr")]
    IntegerBitwiseOr,
    #[strum(serialize = "integerBitwiseXor")]
    IntegerBitwiseXor,
    #[strum(serialize = "integerBitwiseNot")]
    IntegerBitwiseNot,

    // pointers
    Pointer,
    #[strum(serialize = "addressOf")]
    AddressOf,
    #[strum(serialize = "pointerDereference")]
    PointerDereference,
    #[strum(serialize = "pointerEquals?")]
    PointerEqualsP,
    #[strum(serialize = "pointerLesser?")]
    PointerLesserP,
    #[strum(serialize = "pointerOffset")]
    PointerOffset,
    #[strum(serialize = "pointerToInt")]
    PointerToInt,
    #[strum(serialize = "intToPointer")]
    IntToPointer,

    // code pointers
    CodePointer,
    ExternalCodePointer,

    // arrays and vectors
    Array,
    #[strum(serialize = "arrayRef")]
    ArrayRef,
    Vec,

    // tuples
    Tuple,
    TupleElementCount,
    #[strum(serialize = "tupleRef")]
    TupleRef,
    #[strum(serialize = "tupleElements")]
    TupleElements,

    // unions
    Union,
    UnionMemberCount,

    // records
    #[strum(serialize = "Record?")]
    RecordP,
    RecordFieldCount,
    RecordFieldName,
    #[strum(serialize = "RecordWithField?")]
    RecordWithFieldP,
    #[strum(serialize = "recordFieldRef")]
    RecordFieldRef,
    #[strum(serialize = "recordFieldRefByName")]
    RecordFieldRefByName,

    // variants
    #[strum(serialize = "Variant?")]
    VariantP,
    VariantMemberIndex,
    VariantMemberCount,
    #[strum(serialize = "variantTag")]
    VariantTag,
    #[strum(serialize = "variantPayload")]
    VariantPayload,

    // statics
    Static,
    StaticName,
    #[strum(serialize = "staticIntegers")]
    StaticIntegers,
    ModuleName,

    // enums
    #[strum(serialize = "Enum?")]
    EnumP,
    EnumMemberCount,
    EnumMemberName,
    #[strum(serialize = "enumToInt")]
    EnumToInt,
    #[strum(serialize = "intToEnum")]
    IntToEnum,

    // identifiers
    #[strum(serialize = "Identifier?")]
    IdentifierP,
    IdentifierSize,
    IdentifierConcat,
    IdentifierSlice,
}

impl PrimOp {
    /// The name under which the op is published in `__primitives__`.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Type-constructor prims act as pattern heads in the unifier: a type
    /// built by one of these decomposes back into head + parameters.
    pub fn is_pattern_head(self) -> bool {
        matches!(
            self,
            Self::Pointer
                | Self::CodePointer
                | Self::ExternalCodePointer
                | Self::Array
                | Self::Vec
                | Self::Tuple
                | Self::Union
                | Self::Static
        )
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn surface_names_round_trip() {
        assert_eq!(PrimOp::from_str("Type?").unwrap(), PrimOp::TypeP);
        assert_eq!(PrimOp::from_str("numericAdd").unwrap(), PrimOp::NumericAdd);
        assert_eq!(PrimOp::TypeSize.name(), "TypeSize");
        assert!(PrimOp::from_str("no_such_prim").is_err());
    }

    #[test]
    fn pattern_heads() {
        assert!(PrimOp::Pointer.is_pattern_head());
        assert!(PrimOp::Static.is_pattern_head());
        assert!(!PrimOp::NumericAdd.is_pattern_head());
    }
}
