//! Owned rows of the module model.

use crate::{
    assembly::Body,
    metadata::{
        method::{MethodAttributes, MethodImplAttributes},
        token::Token,
    },
    module::{AssemblyName, FieldId, MethodId, MethodRef},
};

/// `AssemblyFlags.PublicKey`: the reference carries a full public key, not a token
pub const ASSEMBLY_FLAG_PUBLIC_KEY: u32 = 0x0001;

/// The module's own assembly identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyDef {
    /// Name, version, culture and public key
    pub name: AssemblyName,
    /// Hash algorithm of the manifest
    pub hash_alg_id: u32,
    /// `AssemblyFlags`
    pub flags: u32,
}

/// A row of the `AssemblyRef` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRefDef {
    /// Identity of the referenced assembly
    pub name: AssemblyName,
    /// `AssemblyFlags`
    pub flags: u32,
    /// Hash of the referenced file, usually empty
    pub hash_value: Vec<u8>,
}

/// A row of the `TypeRef` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRefDef {
    /// Resolution scope: a `Module`, `ModuleRef`, `AssemblyRef` or enclosing `TypeRef` token,
    /// null for exported types
    pub scope: Token,
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple name
    pub name: String,
}

/// A type definition with the members it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    /// `TypeAttributes`
    pub flags: u32,
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Base type, null for interfaces and `System.Object`
    pub extends: Token,
    /// Owned fields in declaration order
    pub fields: Vec<FieldId>,
    /// Owned methods in declaration order
    pub methods: Vec<MethodId>,
}

impl TypeDef {
    /// Dotted full name
    #[must_use]
    pub fn full_name(&self) -> String {
        super::join_full_name(&self.namespace, &self.name)
    }
}

/// A field definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// `FieldAttributes`
    pub flags: u16,
    /// Name
    pub name: String,
    /// Field signature blob
    pub signature: Vec<u8>,
}

/// A parameter row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDef {
    /// `ParamAttributes`
    pub flags: u16,
    /// 1-based position, 0 for the return value
    pub sequence: u16,
    /// Name
    pub name: String,
}

/// A method definition and its decoded body.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// `MethodAttributes`
    pub flags: MethodAttributes,
    /// `MethodImplAttributes`
    pub impl_flags: MethodImplAttributes,
    /// Name
    pub name: String,
    /// Method signature blob
    pub signature: Vec<u8>,
    /// Parameter rows
    pub params: Vec<ParamDef>,
    /// Body, `None` for abstract, runtime and P/Invoke methods
    pub body: Option<Body>,
    /// RVA of an implementation the model does not decode, such as native code of a mixed
    /// image; written back unchanged while `body` is `None`
    pub rva: u32,
}

/// Parent of a `MemberRef` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRefParent {
    /// `TypeDef`, `TypeRef`, `ModuleRef` or `TypeSpec` token
    Token(Token),
    /// Method definition, for call sites of vararg methods
    Method(MethodId),
}

/// A row of the `MemberRef` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRefDef {
    /// Declaring type or method
    pub parent: MemberRefParent,
    /// Member name
    pub name: String,
    /// Method or field signature blob
    pub signature: Vec<u8>,
}

impl MemberRefDef {
    /// True if the signature describes a field
    #[must_use]
    pub fn is_field(&self) -> bool {
        self.signature.first() == Some(&crate::metadata::signatures::CALLING_CONVENTION::FIELD)
    }
}

/// A row of the `MethodSpec` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpecDef {
    /// Generic method, a definition or a member reference
    pub method: MethodRef,
    /// Instantiation blob
    pub instantiation: Vec<u8>,
}
