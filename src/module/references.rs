//! Handles and symbolic references used by instruction operands.
//!
//! Rows that are never removed (type references, type definitions, type specs, member references,
//! method specs and stand-alone signatures) are addressed by their metadata [`Token`]. Method and
//! field definitions can be removed from a module, so they are addressed by arena handles that
//! the writer lowers to fresh tokens.

use std::fmt;

use crate::metadata::token::Token;

/// Stable handle of a method definition inside a [`crate::Module`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub(crate) u32);

/// Stable handle of a field definition inside a [`crate::Module`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) u32);

/// Handle of a type definition, its 0-based `TypeDef` row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

impl MethodId {
    /// Arena index of the handle
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FieldId {
    /// Arena index of the handle
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TypeId {
    /// 0-based `TypeDef` row
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// `TypeDef` token of the type
    #[must_use]
    pub fn token(self) -> Token {
        Token::new(0x0200_0000 | (self.0 + 1))
    }
}

/// Identity of a referenced assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AssemblyName {
    /// Simple name, without extension
    pub name: String,
    /// Major, minor, build and revision
    pub version: [u16; 4],
    /// Public key or public key token, empty if not strong named
    pub public_key_or_token: Vec<u8>,
    /// True if `public_key_or_token` holds the full public key
    pub has_full_public_key: bool,
    /// Culture, empty for neutral
    pub culture: String,
}

impl AssemblyName {
    /// A name with version 0.0.0.0 and no public key
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        AssemblyName {
            name: name.into(),
            ..AssemblyName::default()
        }
    }

    /// Set the version
    #[must_use]
    pub fn with_version(mut self, version: [u16; 4]) -> Self {
        self.version = version;
        self
    }

    /// Set an 8-byte public key token
    #[must_use]
    pub fn with_public_key_token(mut self, token: [u8; 8]) -> Self {
        self.public_key_or_token = token.to_vec();
        self.has_full_public_key = false;
        self
    }
}

impl fmt::Display for AssemblyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, build, revision] = self.version;
        write!(f, "{}, Version={major}.{minor}.{build}.{revision}", self.name)
    }
}

/// A type named by assembly, namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeName {
    /// Simple name of the defining assembly
    pub assembly: String,
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Type name
    pub name: String,
}

impl TypeName {
    /// Build a type name from a dotted full name such as `System.IO.Directory`
    #[must_use]
    pub fn new(assembly: impl Into<String>, full_name: &str) -> Self {
        let (namespace, name) = split_full_name(full_name);
        TypeName {
            assembly: assembly.into(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Dotted full name
    #[must_use]
    pub fn full_name(&self) -> String {
        join_full_name(&self.namespace, &self.name)
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}", self.assembly, self.full_name())
    }
}

/// Split `Namespace.Name` at the last dot
#[must_use]
pub fn split_full_name(full_name: &str) -> (&str, &str) {
    match full_name.rfind('.') {
        Some(pos) => (&full_name[..pos], &full_name[pos + 1..]),
        None => ("", full_name),
    }
}

/// Join a namespace and a name into a dotted full name
#[must_use]
pub fn join_full_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

/// A module independent type used in symbolic method signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SigType {
    /// `void`
    Void,
    /// `bool`
    Boolean,
    /// `char`
    Char,
    /// `int8`
    I1,
    /// `uint8`
    U1,
    /// `int16`
    I2,
    /// `uint16`
    U2,
    /// `int32`
    I4,
    /// `uint32`
    U4,
    /// `int64`
    I8,
    /// `uint64`
    U8,
    /// `float32`
    R4,
    /// `float64`
    R8,
    /// `string`
    String,
    /// `object`
    Object,
    /// `native int`
    I,
    /// `native unsigned int`
    U,
    /// Single-dimensional zero-based array
    SzArray(Box<SigType>),
    /// Reference type
    Class(TypeName),
    /// Value type
    ValueType(TypeName),
}

impl fmt::Display for SigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigType::Void => f.write_str("void"),
            SigType::Boolean => f.write_str("bool"),
            SigType::Char => f.write_str("char"),
            SigType::I1 => f.write_str("int8"),
            SigType::U1 => f.write_str("uint8"),
            SigType::I2 => f.write_str("int16"),
            SigType::U2 => f.write_str("uint16"),
            SigType::I4 => f.write_str("int32"),
            SigType::U4 => f.write_str("uint32"),
            SigType::I8 => f.write_str("int64"),
            SigType::U8 => f.write_str("uint64"),
            SigType::R4 => f.write_str("float32"),
            SigType::R8 => f.write_str("float64"),
            SigType::String => f.write_str("string"),
            SigType::Object => f.write_str("object"),
            SigType::I => f.write_str("native int"),
            SigType::U => f.write_str("native uint"),
            SigType::SzArray(inner) => write!(f, "{inner}[]"),
            SigType::Class(name) | SigType::ValueType(name) => f.write_str(&name.full_name()),
        }
    }
}

/// Symbolic description of a method defined in another module.
///
/// Resolved against the module being edited on first use, which adds the needed assembly,
/// type and member references.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRefSpec {
    /// Defining assembly
    pub assembly: AssemblyName,
    /// Namespace of the declaring type
    pub namespace: String,
    /// Name of the declaring type
    pub type_name: String,
    /// Method name
    pub name: String,
    /// Instance method
    pub has_this: bool,
    /// Return type
    pub return_type: SigType,
    /// Parameter types
    pub params: Vec<SigType>,
}

impl MethodRefSpec {
    /// A static method of `full_type_name` in `assembly`
    #[must_use]
    pub fn new_static(
        assembly: AssemblyName,
        full_type_name: &str,
        name: impl Into<String>,
        return_type: SigType,
        params: Vec<SigType>,
    ) -> Self {
        let (namespace, type_name) = split_full_name(full_type_name);
        MethodRefSpec {
            assembly,
            namespace: namespace.to_string(),
            type_name: type_name.to_string(),
            name: name.into(),
            has_this: false,
            return_type,
            params,
        }
    }

    /// Dotted full name of the declaring type
    #[must_use]
    pub fn type_full_name(&self) -> String {
        join_full_name(&self.namespace, &self.type_name)
    }

    /// The declaring type as a [`TypeName`]
    #[must_use]
    pub fn declaring_type(&self) -> TypeName {
        TypeName {
            assembly: self.assembly.name.clone(),
            namespace: self.namespace.clone(),
            name: self.type_name.clone(),
        }
    }
}

impl fmt::Display for MethodRefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]{}::{}(",
            self.return_type,
            self.assembly.name,
            self.type_full_name(),
            self.name
        )?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// Target of a call, `ldftn` or `newobj`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodRef {
    /// Method defined in this module
    Def(MethodId),
    /// `MemberRef` row
    Member(Token),
    /// `MethodSpec` row
    Spec(Token),
    /// Not yet imported into the module
    Unresolved(Box<MethodRefSpec>),
}

impl MethodRef {
    /// True if the reference still has to be imported
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        matches!(self, MethodRef::Unresolved(_))
    }
}

impl From<MethodRefSpec> for MethodRef {
    fn from(spec: MethodRefSpec) -> Self {
        MethodRef::Unresolved(Box::new(spec))
    }
}

/// Target of a field access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// Field defined in this module
    Def(FieldId),
    /// `MemberRef` row
    Member(Token),
}

/// Operand of `ldtoken`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberToken {
    /// `TypeDef`, `TypeRef` or `TypeSpec`
    Type(Token),
    /// A method
    Method(MethodRef),
    /// A field
    Field(FieldRef),
}
