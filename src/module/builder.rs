//! Construction of new modules.

use crate::{
    assembly::Body,
    metadata::{
        method::{MethodAttributes, MethodImplAttributes},
        signatures::{encode_field_signature, encode_method_signature, SignatureMethod},
        token::Token,
    },
    module::{
        AssemblyDef, AssemblyName, FieldDef, FieldId, MethodDef, MethodId, Module, ParamDef,
        SigType, TypeDef, TypeId, TypeName,
    },
    Result,
};

/// `TypeAttributes` of a public class initialized before first field access
pub const TYPE_PUBLIC_CLASS: u32 = 0x0010_0001;
/// `TypeAttributes` of a public static class
pub const TYPE_STATIC_CLASS: u32 = 0x0010_0181;
/// `SHA1`, the hash algorithm id written by common compilers
const HASH_ALG_SHA1: u32 = 0x8004;

/// Builds a [`Module`] from scratch.
///
/// The builder starts with the `<Module>` type every module carries. Types, fields and methods
/// are then added through the handles the builder returns; references to other assemblies are
/// imported as the signatures that use them are added.
///
/// # Example
///
/// ```rust
/// use cilpatch::{
///     assembly::{Body, Instruction, OpCode},
///     metadata::method::MethodAttributes,
///     module::{AssemblyName, ModuleBuilder, SigType, TypeName},
/// };
///
/// let mut builder = ModuleBuilder::new("Plugin.dll")
///     .assembly(AssemblyName::new("Plugin").with_version([1, 0, 0, 0]));
/// let object = TypeName::new("mscorlib", "System.Object");
/// let ty = builder.class("Plugin.Main", Some(&object))?;
///
/// let mut body = Body::new();
/// body.instructions.push(Instruction::simple(OpCode::Ret));
/// builder.method(ty, "Run", MethodAttributes::PUBLIC | MethodAttributes::STATIC,
///     SigType::Void, vec![], Some(body))?;
///
/// let mut module = builder.build();
/// assert!(module.find_type("Plugin.Main").is_some());
/// let image = module.to_bytes()?;
/// assert!(!image.is_empty());
/// # Ok::<(), cilpatch::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Start a module named `name`
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut module = Module::empty(name);
        module.add_type(TypeDef {
            flags: 0,
            namespace: String::new(),
            name: "<Module>".to_string(),
            extends: Token::new(0),
            fields: Vec::new(),
            methods: Vec::new(),
        });
        ModuleBuilder { module }
    }

    /// Give the module an assembly manifest
    #[must_use]
    pub fn assembly(mut self, name: AssemblyName) -> Self {
        self.module.assembly = Some(AssemblyDef {
            name,
            hash_alg_id: HASH_ALG_SHA1,
            flags: 0,
        });
        self
    }

    /// Set the module version identifier
    #[must_use]
    pub fn mvid(mut self, mvid: uguid::Guid) -> Self {
        self.module.mvid = mvid;
        self
    }

    /// Reference an assembly up front, so its row comes before any added on demand
    #[must_use]
    pub fn reference(mut self, name: &AssemblyName) -> Self {
        self.module.import_assembly_ref(name);
        self
    }

    /// Add a public class named `full_name`, deriving from `base`.
    ///
    /// # Errors
    /// Returns an error if `base` names a missing type of this module.
    pub fn class(&mut self, full_name: &str, base: Option<&TypeName>) -> Result<TypeId> {
        self.add_type(full_name, TYPE_PUBLIC_CLASS, base)
    }

    /// Add a type with explicit `TypeAttributes`.
    ///
    /// # Errors
    /// Returns an error if `base` names a missing type of this module.
    pub fn add_type(&mut self, full_name: &str, flags: u32, base: Option<&TypeName>) -> Result<TypeId> {
        let extends = match base {
            Some(base) => self.module.import_type(base)?,
            None => Token::new(0),
        };
        let (namespace, name) = super::split_full_name(full_name);
        Ok(self.module.add_type(TypeDef {
            flags,
            namespace: namespace.to_string(),
            name: name.to_string(),
            extends,
            fields: Vec::new(),
            methods: Vec::new(),
        }))
    }

    /// Add a field of type `ty` to `owner`.
    ///
    /// # Errors
    /// Returns an error if `owner` does not exist or `ty` can not be imported.
    pub fn field(&mut self, owner: TypeId, name: &str, flags: u16, ty: &SigType) -> Result<FieldId> {
        let ty = self.module.import_sig_type(ty)?;
        let signature = encode_field_signature(&ty)?;
        self.module.add_field(
            owner,
            FieldDef {
                flags,
                name: name.to_string(),
                signature,
            },
        )
    }

    /// Add a method to `owner`.
    ///
    /// The method takes a `this` pointer unless `flags` contains [`MethodAttributes::STATIC`].
    /// Parameters are named `arg0`, `arg1` and so on.
    ///
    /// # Errors
    /// Returns an error if `owner` does not exist or a signature type can not be imported.
    pub fn method(
        &mut self,
        owner: TypeId,
        name: &str,
        flags: MethodAttributes,
        return_type: SigType,
        params: Vec<SigType>,
        body: Option<Body>,
    ) -> Result<MethodId> {
        let return_type = self.module.import_sig_type(&return_type)?;
        let mut param_types = Vec::with_capacity(params.len());
        for param in &params {
            param_types.push(self.module.import_sig_type(param)?);
        }

        let mut signature = SignatureMethod::new_static(return_type, param_types);
        signature.has_this = !flags.is_static();

        #[allow(clippy::cast_possible_truncation)]
        let param_defs = (0..params.len())
            .map(|index| ParamDef {
                flags: 0,
                sequence: index as u16 + 1,
                name: format!("arg{index}"),
            })
            .collect();

        self.module.add_method(
            owner,
            MethodDef {
                flags: flags | MethodAttributes::HIDE_BY_SIG,
                impl_flags: MethodImplAttributes::empty(),
                name: name.to_string(),
                signature: encode_method_signature(&signature)?,
                params: param_defs,
                body,
                rva: 0,
            },
        )
    }

    /// The module under construction, to import references while building bodies
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    /// Finish the module
    #[must_use]
    pub fn build(self) -> Module {
        self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{Instruction, OpCode};

    #[test]
    fn builds_a_loadable_module() {
        let mut builder = ModuleBuilder::new("Plugin.dll")
            .assembly(AssemblyName::new("Plugin").with_version([1, 2, 3, 4]));
        let object = TypeName::new("mscorlib", "System.Object");
        let ty = builder.class("Plugin.Main", Some(&object)).unwrap();
        builder
            .field(ty, "count", 0x0016, &SigType::I4)
            .unwrap();

        let mut body = Body::new();
        body.instructions.push(Instruction::simple(OpCode::Ret));
        let run = builder
            .method(
                ty,
                "Run",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                SigType::Void,
                vec![SigType::String],
                Some(body),
            )
            .unwrap();

        let mut module = builder.build();
        let loaded = Module::from_mem(module.to_bytes().unwrap()).unwrap();
        let ty = loaded.find_type("Plugin.Main").unwrap();
        assert_eq!(loaded.find_method(ty, "Run", |_| true), Some(run));
        assert_eq!(loaded.method(run).unwrap().params[0].name, "arg0");
        assert_eq!(loaded.assembly_name().unwrap().version, [1, 2, 3, 4]);
        assert_eq!(loaded.assembly_refs()[0].name.name, "mscorlib");
        assert_eq!(loaded.types().count(), 2);
        assert_eq!(loaded.type_def(ty).unwrap().fields.len(), 1);
    }
}
