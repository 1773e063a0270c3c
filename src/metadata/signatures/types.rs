use crate::metadata::token::Token;

/// Element type codes of ECMA-335 II.23.1.16
#[allow(non_snake_case, missing_docs)]
pub mod ELEMENT_TYPE {
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0A;
    pub const U8: u8 = 0x0B;
    pub const R4: u8 = 0x0C;
    pub const R8: u8 = 0x0D;
    pub const STRING: u8 = 0x0E;
    pub const PTR: u8 = 0x0F;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const FNPTR: u8 = 0x1B;
    pub const OBJECT: u8 = 0x1C;
    pub const SZARRAY: u8 = 0x1D;
    pub const MVAR: u8 = 0x1E;
    pub const CMOD_REQD: u8 = 0x1F;
    pub const CMOD_OPT: u8 = 0x20;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
}

/// Calling convention flags of a method signature (ECMA-335 II.23.2.1)
#[allow(non_snake_case, missing_docs)]
pub mod CALLING_CONVENTION {
    pub const DEFAULT: u8 = 0x00;
    pub const C: u8 = 0x01;
    pub const STDCALL: u8 = 0x02;
    pub const THISCALL: u8 = 0x03;
    pub const FASTCALL: u8 = 0x04;
    pub const VARARG: u8 = 0x05;
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
    pub const PROPERTY: u8 = 0x08;
    pub const GENERICINST: u8 = 0x0A;
    pub const GENERIC: u8 = 0x10;
    pub const HASTHIS: u8 = 0x20;
    pub const EXPLICITTHIS: u8 = 0x40;
    pub const KIND_MASK: u8 = 0x0F;
}

/// A type inside a signature blob.
///
/// Class and value types carry the `TypeDefOrRef` token exactly as encoded in the blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSignature {
    /// `void`
    Void,
    /// `bool`
    Boolean,
    /// `char`
    Char,
    /// `int8`
    I1,
    /// `unsigned int8`
    U1,
    /// `int16`
    I2,
    /// `unsigned int16`
    U2,
    /// `int32`
    I4,
    /// `unsigned int32`
    U4,
    /// `int64`
    I8,
    /// `unsigned int64`
    U8,
    /// `float32`
    R4,
    /// `float64`
    R8,
    /// `string`
    String,
    /// `native int`
    I,
    /// `native unsigned int`
    U,
    /// `object`
    Object,
    /// `typedref`
    TypedByRef,
    /// Unmanaged pointer
    Ptr(Box<TypeSignature>),
    /// Managed pointer
    ByRef(Box<TypeSignature>),
    /// Pinned local
    Pinned(Box<TypeSignature>),
    /// Value type, by `TypeDefOrRef` token
    ValueType(Token),
    /// Reference type, by `TypeDefOrRef` token
    Class(Token),
    /// Generic parameter of the enclosing type
    GenericParamType(u32),
    /// Generic parameter of the enclosing method
    GenericParamMethod(u32),
    /// General array
    Array(SignatureArray),
    /// Single-dimensional, zero-based array
    SzArray(Box<TypeSignature>),
    /// Generic instantiation of a class or value type
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    /// Function pointer
    FnPtr(Box<SignatureMethod>),
    /// Custom modifier applied to the following type
    Modified {
        /// `modreq` if true, `modopt` otherwise
        required: bool,
        /// The modifier type
        modifier: Token,
        /// The modified type
        base: Box<TypeSignature>,
    },
}

impl TypeSignature {
    /// True for `void`, looking through custom modifiers
    #[must_use]
    pub fn is_void(&self) -> bool {
        match self {
            TypeSignature::Void => true,
            TypeSignature::Modified { base, .. } => base.is_void(),
            _ => false,
        }
    }
}

/// General array shape (ECMA-335 II.23.2.13)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureArray {
    /// Element type
    pub base: Box<TypeSignature>,
    /// Number of dimensions
    pub rank: u32,
    /// Sizes of the leading dimensions
    pub sizes: Vec<u32>,
    /// Lower bounds of the leading dimensions
    pub lower_bounds: Vec<i32>,
}

/// Method signature (ECMA-335 II.23.2.1 - II.23.2.3)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureMethod {
    /// Instance method, `this` is passed as first argument
    pub has_this: bool,
    /// `this` is listed explicitly in the parameters
    pub explicit_this: bool,
    /// Calling convention kind (low 4 bits)
    pub calling_convention: u8,
    /// Number of generic parameters
    pub generic_param_count: u32,
    /// Return type
    pub return_type: TypeSignature,
    /// Parameter types, including vararg arguments after the sentinel
    pub params: Vec<TypeSignature>,
    /// Index into `params` where a vararg call site sentinel was placed
    pub sentinel: Option<usize>,
}

impl SignatureMethod {
    /// A static method with the default calling convention
    #[must_use]
    pub fn new_static(return_type: TypeSignature, params: Vec<TypeSignature>) -> Self {
        SignatureMethod {
            has_this: false,
            explicit_this: false,
            calling_convention: CALLING_CONVENTION::DEFAULT,
            generic_param_count: 0,
            return_type,
            params,
            sentinel: None,
        }
    }

    /// Number of stack slots a call pops, not counting a `this` pointer
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

/// Field signature (ECMA-335 II.23.2.4)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureField {
    /// The field type
    pub base: TypeSignature,
}

/// Local variable signature (ECMA-335 II.23.2.6)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureLocalVariables {
    /// Slot types in declaration order
    pub locals: Vec<TypeSignature>,
}

/// Method instantiation signature (ECMA-335 II.23.2.15)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureMethodSpec {
    /// Generic arguments
    pub generic_args: Vec<TypeSignature>,
}
