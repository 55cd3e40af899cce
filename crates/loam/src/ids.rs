//! Typed arena handles.
//!
//! Everything the compiler allocates for the duration of a compilation,
//! AST nodes, declarations, environments, types, pattern cells, invoke
//! entries included, lives in an arena on `CompilerState` addressed by one of
//! these `u32` newtypes. Cyclic references (module ↔ env ↔ declaration) are
//! representable because edges are indices, not owning pointers.

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub fn new(index: usize) -> Self {
                Self(u32::try_from(index).expect("arena overflow"))
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_id!(
    /// An expression node.
    ExprId
);
define_id!(
    /// A statement node.
    StmtId
);
define_id!(
    /// An interned type; equality of `TypeId`s is type equality.
    TypeId
);
define_id!(
    /// A record declaration.
    RecordId
);
define_id!(
    /// A variant declaration.
    VariantId
);
define_id!(
    /// An `instance` declaration extending an open variant.
    InstanceId
);
define_id!(
    /// An overload: a `(target, code)` pair.
    OverloadId
);
define_id!(
    /// An overloadable procedure symbol introduced by `define`.
    ProcId
);
define_id!(
    /// An enumeration declaration.
    EnumId
);
define_id!(
    /// A global variable declaration.
    GlobalId
);
define_id!(
    /// An instantiation of a (possibly parameterized) global variable.
    GvarInstanceId
);
define_id!(
    /// A global alias declaration.
    AliasId
);
define_id!(
    /// An external procedure declaration.
    ExternalProcId
);
define_id!(
    /// An external variable declaration.
    ExternalVarId
);
define_id!(
    /// A newtype declaration.
    NewTypeId
);
define_id!(
    /// A loaded module.
    ModuleId
);
define_id!(
    /// A lexical environment.
    EnvId
);
define_id!(
    /// A single-value pattern cell (unification variable).
    CellId
);
define_id!(
    /// A variadic pattern cell.
    MultiCellId
);
define_id!(
    /// A value holder: a typed compile-time byte buffer.
    ValueId
);
define_id!(
    /// A memoized overload-resolution set, keyed by callable and arg types.
    InvokeSetId
);
define_id!(
    /// A resolved specialization within an invoke set.
    InvokeEntryId
);
