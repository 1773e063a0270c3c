//! Importing symbolic references into a module.
//!
//! A [`MethodRefSpec`] names a method by assembly, type and signature. Importing it finds or
//! appends the `AssemblyRef`, `TypeRef` and `MemberRef` rows it needs, reusing existing rows
//! whenever one matches, so importing the same reference twice adds nothing.

use crate::{
    assembly::{Body, Operand},
    metadata::{
        signatures::{encode_method_signature, SignatureMethod, TypeSignature, CALLING_CONVENTION},
        tables::TableId,
        token::Token,
    },
    module::{
        AssemblyName, AssemblyRefDef, MemberRefDef, MemberRefParent, MemberToken, MethodId,
        MethodRef, MethodRefSpec, Module, SigType, TypeId, TypeName, TypeRefDef,
        ASSEMBLY_FLAG_PUBLIC_KEY,
    },
    Error, Result,
};

/// Simple names of assemblies that define the core types
pub const CORE_LIBRARIES: [&str; 4] = [
    "mscorlib",
    "netstandard",
    "System.Runtime",
    "System.Private.CoreLib",
];

const MSCORLIB_TOKEN: [u8; 8] = [0xB7, 0x7A, 0x5C, 0x56, 0x19, 0x34, 0xE0, 0x89];

#[allow(clippy::cast_possible_truncation)]
fn row_token(table: TableId, index: usize) -> Token {
    table.token(index as u32 + 1)
}

fn is_core_library(name: &str) -> bool {
    CORE_LIBRARIES
        .iter()
        .any(|core| core.eq_ignore_ascii_case(name))
}

impl Module {
    /// Simple name of the module's own assembly, the module name without extension otherwise
    pub(crate) fn own_assembly_name(&self) -> String {
        match &self.assembly {
            Some(assembly) => assembly.name.name.clone(),
            None => std::path::Path::new(&self.name)
                .file_stem()
                .map_or_else(|| self.name.clone(), |s| s.to_string_lossy().into_owned()),
        }
    }

    fn is_own_assembly(&self, name: &str) -> bool {
        self.own_assembly_name().eq_ignore_ascii_case(name)
    }

    /// `AssemblyRef` token of the assembly with simple name `name`
    #[must_use]
    pub fn find_assembly_ref(&self, name: &str) -> Option<Token> {
        self.assembly_refs
            .iter()
            .position(|r| r.name.name.eq_ignore_ascii_case(name))
            .map(|index| row_token(TableId::AssemblyRef, index))
    }

    /// Find or append an `AssemblyRef` row for `name`
    pub fn import_assembly_ref(&mut self, name: &AssemblyName) -> Token {
        if let Some(token) = self.find_assembly_ref(&name.name) {
            return token;
        }

        log::debug!("Adding assembly reference {}", name);
        self.assembly_refs.push(AssemblyRefDef {
            name: name.clone(),
            flags: if name.has_full_public_key {
                ASSEMBLY_FLAG_PUBLIC_KEY
            } else {
                0
            },
            hash_value: Vec::new(),
        });
        row_token(TableId::AssemblyRef, self.assembly_refs.len() - 1)
    }

    /// `AssemblyRef` token of the core library, adding `mscorlib` if none is referenced
    pub fn core_library(&mut self) -> Token {
        if let Some(index) = self
            .assembly_refs
            .iter()
            .position(|r| is_core_library(&r.name.name))
        {
            return row_token(TableId::AssemblyRef, index);
        }

        self.import_assembly_ref(
            &AssemblyName::new("mscorlib")
                .with_version([4, 0, 0, 0])
                .with_public_key_token(MSCORLIB_TOKEN),
        )
    }

    /// Find or append a reference to type `ty`.
    ///
    /// Types of the module's own assembly resolve to their `TypeDef` token.
    ///
    /// # Errors
    /// Returns [`Error::MissingDependencyType`] if `ty` names a type of this assembly that
    /// does not exist.
    pub fn import_type(&mut self, ty: &TypeName) -> Result<Token> {
        if self.is_own_assembly(&ty.assembly) {
            return self
                .find_type(&ty.full_name())
                .map(TypeId::token)
                .ok_or_else(|| Error::MissingDependencyType(ty.to_string()));
        }

        let scope = if is_core_library(&ty.assembly) {
            self.core_library()
        } else {
            match self.find_assembly_ref(&ty.assembly) {
                Some(token) => token,
                None => self.import_assembly_ref(&AssemblyName::new(ty.assembly.clone())),
            }
        };

        if let Some(index) = self
            .type_refs
            .iter()
            .position(|r| r.scope == scope && r.namespace == ty.namespace && r.name == ty.name)
        {
            return Ok(row_token(TableId::TypeRef, index));
        }

        log::debug!("Adding type reference {}", ty);
        self.type_refs.push(TypeRefDef {
            scope,
            namespace: ty.namespace.clone(),
            name: ty.name.clone(),
        });
        Ok(row_token(TableId::TypeRef, self.type_refs.len() - 1))
    }

    pub(crate) fn import_sig_type(&mut self, ty: &SigType) -> Result<TypeSignature> {
        Ok(match ty {
            SigType::Void => TypeSignature::Void,
            SigType::Boolean => TypeSignature::Boolean,
            SigType::Char => TypeSignature::Char,
            SigType::I1 => TypeSignature::I1,
            SigType::U1 => TypeSignature::U1,
            SigType::I2 => TypeSignature::I2,
            SigType::U2 => TypeSignature::U2,
            SigType::I4 => TypeSignature::I4,
            SigType::U4 => TypeSignature::U4,
            SigType::I8 => TypeSignature::I8,
            SigType::U8 => TypeSignature::U8,
            SigType::R4 => TypeSignature::R4,
            SigType::R8 => TypeSignature::R8,
            SigType::String => TypeSignature::String,
            SigType::Object => TypeSignature::Object,
            SigType::I => TypeSignature::I,
            SigType::U => TypeSignature::U,
            SigType::SzArray(inner) => TypeSignature::SzArray(Box::new(self.import_sig_type(inner)?)),
            SigType::Class(name) => TypeSignature::Class(self.import_type(name)?),
            SigType::ValueType(name) => TypeSignature::ValueType(self.import_type(name)?),
        })
    }

    /// Encode the signature of `spec` against this module's references
    fn import_signature(&mut self, spec: &MethodRefSpec) -> Result<Vec<u8>> {
        let return_type = self.import_sig_type(&spec.return_type)?;
        let params = spec
            .params
            .iter()
            .map(|param| self.import_sig_type(param))
            .collect::<Result<Vec<_>>>()?;

        let mut signature = SignatureMethod::new_static(return_type, params);
        signature.has_this = spec.has_this;
        encode_method_signature(&signature)
    }

    /// Find or append a reference to the method described by `spec`.
    ///
    /// # Errors
    /// Returns [`Error::TargetNotFound`] if `spec` names a method of this assembly that does
    /// not exist, or an error if a type of its signature can not be imported.
    pub fn import_method(&mut self, spec: &MethodRefSpec) -> Result<MethodRef> {
        if self.is_own_assembly(&spec.assembly.name) {
            let signature = self.import_signature(spec)?;
            let not_found = || Error::TargetNotFound {
                type_name: spec.type_full_name(),
                method: Some(spec.name.clone()),
            };
            let ty = self.find_type(&spec.type_full_name()).ok_or_else(not_found)?;
            return self
                .find_method(ty, &spec.name, |m| m.signature == signature)
                .map(MethodRef::Def)
                .ok_or_else(not_found);
        }

        if !is_core_library(&spec.assembly.name) {
            self.import_assembly_ref(&spec.assembly);
        }
        let parent = self.import_type(&spec.declaring_type())?;
        let signature = self.import_signature(spec)?;
        Ok(self.member_ref_row(MemberRefParent::Token(parent), &spec.name, signature))
    }

    /// Find or append a reference to method `name` of the type behind `parent`.
    ///
    /// `parent` is a `TypeRef`, `TypeDef` or `TypeSpec` token of this module.
    ///
    /// # Errors
    /// Returns an error if the signature can not be encoded.
    pub fn import_member(
        &mut self,
        parent: Token,
        name: &str,
        signature: &SignatureMethod,
    ) -> Result<MethodRef> {
        let signature = encode_method_signature(signature)?;
        Ok(self.member_ref_row(MemberRefParent::Token(parent), name, signature))
    }

    fn member_ref_row(&mut self, parent: MemberRefParent, name: &str, signature: Vec<u8>) -> MethodRef {
        if let Some(index) = self
            .member_refs
            .iter()
            .position(|m| m.parent == parent && m.name == name && m.signature == signature)
        {
            return MethodRef::Member(row_token(TableId::MemberRef, index));
        }

        log::debug!("Adding member reference {}", name);
        self.member_refs.push(MemberRefDef {
            parent,
            name: name.to_string(),
            signature,
        });
        MethodRef::Member(row_token(TableId::MemberRef, self.member_refs.len() - 1))
    }

    /// Replace every unresolved method operand of `body` with an imported reference
    pub(super) fn resolve_body(&mut self, body: &mut Body) -> Result<()> {
        for id in body.instructions.ids().to_vec() {
            let Some(instruction) = body.instructions.get_mut(id) else {
                continue;
            };
            let slot = match &mut instruction.operand {
                Operand::Method(method) | Operand::Token(MemberToken::Method(method)) => method,
                _ => continue,
            };
            if let MethodRef::Unresolved(spec) = slot {
                let spec = spec.clone();
                *slot = self.import_method(&spec)?;
            }
        }
        Ok(())
    }

    /// Assembly that defines the type behind a `TypeDef` or `TypeRef` token
    fn defining_assembly(&self, token: Token) -> Result<String> {
        match TableId::from_u8(token.table()) {
            Some(TableId::TypeDef) => Ok(self.own_assembly_name()),
            Some(TableId::TypeRef) => {
                let Some(type_ref) = self.type_ref(token) else {
                    return Err(Error::DanglingReference(format!("type reference {token}")));
                };
                match TableId::from_u8(type_ref.scope.table()) {
                    Some(TableId::AssemblyRef) => self
                        .assembly_ref(type_ref.scope)
                        .map(|r| r.name.name.clone())
                        .ok_or_else(|| {
                            Error::DanglingReference(format!("assembly reference {}", type_ref.scope))
                        }),
                    Some(TableId::Module) => Ok(self.own_assembly_name()),
                    _ => Err(Error::NotSupported),
                }
            }
            _ => Err(Error::NotSupported),
        }
    }

    fn sig_type(&self, ty: &TypeSignature) -> Result<SigType> {
        Ok(match ty {
            TypeSignature::Void => SigType::Void,
            TypeSignature::Boolean => SigType::Boolean,
            TypeSignature::Char => SigType::Char,
            TypeSignature::I1 => SigType::I1,
            TypeSignature::U1 => SigType::U1,
            TypeSignature::I2 => SigType::I2,
            TypeSignature::U2 => SigType::U2,
            TypeSignature::I4 => SigType::I4,
            TypeSignature::U4 => SigType::U4,
            TypeSignature::I8 => SigType::I8,
            TypeSignature::U8 => SigType::U8,
            TypeSignature::R4 => SigType::R4,
            TypeSignature::R8 => SigType::R8,
            TypeSignature::String => SigType::String,
            TypeSignature::Object => SigType::Object,
            TypeSignature::I => SigType::I,
            TypeSignature::U => SigType::U,
            TypeSignature::SzArray(inner) => SigType::SzArray(Box::new(self.sig_type(inner)?)),
            TypeSignature::Class(token) | TypeSignature::ValueType(token) => {
                let (namespace, name) = match TableId::from_u8(token.table()) {
                    Some(TableId::TypeDef) => {
                        let ty = self
                            .type_def(TypeId(token.row().saturating_sub(1)))
                            .ok_or_else(|| Error::DanglingReference(format!("type {token}")))?;
                        (ty.namespace.clone(), ty.name.clone())
                    }
                    _ => {
                        let ty = self
                            .type_ref(*token)
                            .ok_or_else(|| Error::DanglingReference(format!("type {token}")))?;
                        (ty.namespace.clone(), ty.name.clone())
                    }
                };
                let name = TypeName {
                    assembly: self.defining_assembly(*token)?,
                    namespace,
                    name,
                };
                if matches!(ty, TypeSignature::Class(_)) {
                    SigType::Class(name)
                } else {
                    SigType::ValueType(name)
                }
            }
            _ => return Err(Error::NotSupported),
        })
    }

    /// Describe method `method` of type `ty` so it can be imported into another module.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] for generic methods and signatures using types that have
    /// no [`SigType`] form, or [`Error::DanglingReference`] for unknown handles.
    pub fn method_ref_spec(&self, ty: TypeId, method: MethodId) -> Result<MethodRefSpec> {
        let Some(owner) = self.type_def(ty) else {
            return Err(Error::DanglingReference(format!("type {}", ty.index())));
        };
        let Some(def) = self.method(method) else {
            return Err(Error::DanglingReference(format!("method {}", method.index())));
        };

        let signature = self.method_signature(method)?;
        if signature.generic_param_count > 0
            || signature.calling_convention & CALLING_CONVENTION::KIND_MASK
                != CALLING_CONVENTION::DEFAULT
        {
            return Err(Error::NotSupported);
        }

        let name = self.assembly_name().cloned().unwrap_or_else(|| {
            AssemblyName::new(self.own_assembly_name())
        });
        Ok(MethodRefSpec {
            assembly: name,
            namespace: owner.namespace.clone(),
            type_name: owner.name.clone(),
            name: def.name.clone(),
            has_this: signature.has_this,
            return_type: self.sig_type(&signature.return_type)?,
            params: signature
                .params
                .iter()
                .map(|param| self.sig_type(param))
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::factories::{game_module, loader_module, ENTRY_METHOD, ENTRY_TYPE};

    fn directory_spec() -> MethodRefSpec {
        MethodRefSpec::new_static(
            AssemblyName::new("mscorlib"),
            "System.IO.Directory",
            "Exists",
            SigType::Boolean,
            vec![SigType::String],
        )
    }

    #[test]
    fn import_is_idempotent() {
        let mut module = game_module();
        let refs = module.assembly_refs().len();
        let types = module.type_refs().len();

        let first = module.import_method(&directory_spec()).unwrap();
        let members = module.member_refs().len();
        let second = module.import_method(&directory_spec()).unwrap();

        assert_eq!(first, second);
        assert_eq!(module.assembly_refs().len(), refs);
        assert_eq!(module.type_refs().len(), types + 1);
        assert_eq!(module.member_refs().len(), members);
        assert_eq!(
            module.method_ref_name(&first),
            "System.IO.Directory::Exists"
        );
    }

    #[test]
    fn core_library_is_added_once() {
        let mut module = Module::empty("Empty.dll");
        let core = module.core_library();
        assert_eq!(module.core_library(), core);
        assert_eq!(module.assembly_refs()[0].name.name, "mscorlib");
        assert_eq!(module.assembly_refs()[0].name.version, [4, 0, 0, 0]);
    }

    #[test]
    fn external_assembly_reference_keeps_identity() {
        let mut module = game_module();
        let loader = loader_module();
        let ty = loader.find_type(ENTRY_TYPE).unwrap();
        let entry = loader.find_method(ty, ENTRY_METHOD, |_| true).unwrap();
        let spec = loader.method_ref_spec(ty, entry).unwrap();
        assert_eq!(spec.to_string(), "void [SRML2]SRML2.Main::PreLoad()");

        let method = module.import_method(&spec).unwrap();
        assert!(matches!(method, MethodRef::Member(_)));
        let token = module.find_assembly_ref("srml2").unwrap();
        assert_eq!(module.assembly_ref(token).unwrap().name, spec.assembly);
    }

    #[test]
    fn own_assembly_resolves_to_definitions() {
        let mut loader = loader_module();
        let ty = loader.find_type(ENTRY_TYPE).unwrap();
        let entry = loader.find_method(ty, ENTRY_METHOD, |_| true).unwrap();
        let spec = loader.method_ref_spec(ty, entry).unwrap();
        assert_eq!(loader.import_method(&spec).unwrap(), MethodRef::Def(entry));

        let mut missing = spec.clone();
        missing.name = "Missing".to_string();
        assert!(matches!(
            loader.import_method(&missing),
            Err(Error::TargetNotFound { .. })
        ));
    }
}
