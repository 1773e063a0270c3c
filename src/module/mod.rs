//! The owned, editable module model.
//!
//! A [`Module`] is built from a module image in one pass and keeps no reference to the file it
//! was loaded from, so the file can be renamed or deleted while the model lives. All edits
//! happen on the model; [`Module::write`] produces a new image.
//!
//! # Addressing
//!
//! Rows that are only ever appended to (`TypeRef`, `TypeDef`, `TypeSpec`, `AssemblyRef`,
//! `ModuleRef`, `MemberRef`, `MethodSpec`, `StandAloneSig`) are addressed by their metadata
//! token, which stays valid across edits and is safe to embed in signature blobs. The only
//! rows ever taken away are unreferenced ones at the end of a table, see
//! [`Module::trim_references`]. Method and
//! field definitions can be removed and are addressed by [`MethodId`] and [`FieldId`] handles;
//! the writer assigns them fresh rows. Rows of the remaining tables are kept as
//! [`RetainedRow`]s and written back with their references renumbered.
//!
//! A loaded module keeps a copy of its image. The writer reuses its PE headers and sections and
//! appends the new metadata and bodies in a section of their own.
//!
//! # Example
//!
//! ```rust,no_run
//! use cilpatch::Module;
//!
//! let module = Module::from_path("Assembly-CSharp.dll")?;
//! if let Some(anchor) = module.find_type("GameContext") {
//!     let awake = module.find_method(anchor, "Awake", |_| true);
//!     println!("Awake: {:?}", awake);
//! }
//! # Ok::<(), cilpatch::Error>(())
//! ```

mod builder;
mod import;
mod loader;
mod references;
mod resolver;
mod retained;
mod trim;
mod types;
mod writer;

pub use builder::{ModuleBuilder, TYPE_PUBLIC_CLASS, TYPE_STATIC_CLASS};
pub use import::CORE_LIBRARIES;
pub use references::{
    join_full_name, split_full_name, AssemblyName, FieldId, FieldRef, MemberToken, MethodId,
    MethodRef, MethodRefSpec, SigType, TypeId, TypeName,
};
pub use resolver::AssemblyResolver;
pub use retained::{Cell, RetainedRow, RowRef};
pub use types::{
    AssemblyDef, AssemblyRefDef, FieldDef, MemberRefDef, MemberRefParent, MethodDef,
    MethodSpecDef, ParamDef, TypeDef, TypeRefDef, ASSEMBLY_FLAG_PUBLIC_KEY,
};

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    file::{output::Output, File},
    metadata::{
        root::DEFAULT_RUNTIME_VERSION,
        signatures::{parse_method_signature, SignatureMethod},
        tables::TableId,
        token::Token,
    },
    Error, Result,
};

/// Bytes of the image a module was loaded from.
#[derive(Clone)]
pub(crate) struct BaseImage(pub(crate) Arc<[u8]>);

impl fmt::Debug for BaseImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BaseImage({} bytes)", self.0.len())
    }
}

/// A loaded module: its identity, references, types and method bodies.
#[derive(Debug, Clone)]
pub struct Module {
    pub(crate) name: String,
    pub(crate) mvid: uguid::Guid,
    pub(crate) generation: u16,
    pub(crate) runtime_version: String,
    pub(crate) assembly: Option<AssemblyDef>,
    pub(crate) assembly_refs: Vec<AssemblyRefDef>,
    pub(crate) module_refs: Vec<String>,
    pub(crate) type_refs: Vec<TypeRefDef>,
    pub(crate) types: Vec<TypeDef>,
    pub(crate) fields: Vec<Option<FieldDef>>,
    pub(crate) methods: Vec<Option<MethodDef>>,
    pub(crate) member_refs: Vec<MemberRefDef>,
    pub(crate) stand_alone_sigs: Vec<Vec<u8>>,
    pub(crate) type_specs: Vec<Vec<u8>>,
    pub(crate) method_specs: Vec<MethodSpecDef>,
    pub(crate) retained: BTreeMap<TableId, Vec<RetainedRow>>,
    pub(crate) entry_point: Option<MethodId>,
    pub(crate) image: Option<BaseImage>,
    path: Option<PathBuf>,
    resolver: AssemblyResolver,
}

impl PartialEq for Module {
    /// Structural equality of the metadata; the source image, path and resolver cache are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.mvid == other.mvid
            && self.generation == other.generation
            && self.runtime_version == other.runtime_version
            && self.assembly == other.assembly
            && self.assembly_refs == other.assembly_refs
            && self.module_refs == other.module_refs
            && self.type_refs == other.type_refs
            && self.types == other.types
            && self.fields == other.fields
            && self.methods == other.methods
            && self.member_refs == other.member_refs
            && self.stand_alone_sigs == other.stand_alone_sigs
            && self.type_specs == other.type_specs
            && self.method_specs == other.method_specs
            && self.retained == other.retained
            && self.entry_point == other.entry_point
    }
}

fn row_index(token: Token, table: TableId, rows: usize) -> Option<usize> {
    if token.table() != table as u8 || token.row() == 0 || token.row() as usize > rows {
        return None;
    }
    Some(token.row() as usize - 1)
}

impl Module {
    /// A module without any rows, named `name`
    pub(crate) fn empty(name: &str) -> Module {
        Module {
            name: name.to_string(),
            mvid: uguid::Guid::ZERO,
            generation: 0,
            runtime_version: DEFAULT_RUNTIME_VERSION.to_string(),
            assembly: None,
            assembly_refs: Vec::new(),
            module_refs: Vec::new(),
            type_refs: Vec::new(),
            types: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            member_refs: Vec::new(),
            stand_alone_sigs: Vec::new(),
            type_specs: Vec::new(),
            method_specs: Vec::new(),
            retained: BTreeMap::new(),
            entry_point: None,
            image: None,
            path: None,
            resolver: AssemblyResolver::default(),
        }
    }

    /// Load the module at `path`.
    ///
    /// Referenced assemblies are resolved from the directory containing `path`. The file is
    /// memory-mapped only while the model is built.
    ///
    /// # Errors
    /// Returns [`Error::Load`] if the file is missing, unreadable or not a valid module.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Module> {
        let path = path.as_ref();
        let mut module = File::from_file(path)
            .and_then(|file| loader::load(&file))
            .map_err(|error| error.into_load_error(path))?;

        module.path = Some(path.to_path_buf());
        if let Some(dir) = path.parent() {
            let dir = if dir.as_os_str().is_empty() {
                Path::new(".")
            } else {
                dir
            };
            module.resolver.add_search_dir(dir);
        }

        log::info!("Loaded {} from {}", module.name, path.display());
        Ok(module)
    }

    /// Load a module from an in-memory image.
    ///
    /// # Errors
    /// Returns an error if `data` is empty or not a valid module.
    pub fn from_mem(data: Vec<u8>) -> Result<Module> {
        let file = File::from_mem(data)?;
        loader::load(&file)
    }

    /// Module name, usually the file name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module version identifier
    #[must_use]
    pub fn mvid(&self) -> uguid::Guid {
        self.mvid
    }

    /// Path the module was loaded from
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The module's own assembly, if it carries a manifest
    #[must_use]
    pub fn assembly(&self) -> Option<&AssemblyDef> {
        self.assembly.as_ref()
    }

    /// Identity of the module's assembly
    #[must_use]
    pub fn assembly_name(&self) -> Option<&AssemblyName> {
        self.assembly.as_ref().map(|assembly| &assembly.name)
    }

    /// Resolver for referenced assemblies
    #[must_use]
    pub fn resolver(&self) -> &AssemblyResolver {
        &self.resolver
    }

    /// Mutable resolver, to add search directories or resolve assemblies
    pub fn resolver_mut(&mut self) -> &mut AssemblyResolver {
        &mut self.resolver
    }

    /// Type definitions with their handles, in table order
    pub fn types(&self) -> impl Iterator<Item = (TypeId, &TypeDef)> {
        #[allow(clippy::cast_possible_truncation)]
        self.types
            .iter()
            .enumerate()
            .map(|(index, ty)| (TypeId(index as u32), ty))
    }

    /// Look up a type definition
    #[must_use]
    pub fn type_def(&self, id: TypeId) -> Option<&TypeDef> {
        self.types.get(id.index())
    }

    /// Look up a type definition for modification
    pub fn type_def_mut(&mut self, id: TypeId) -> Option<&mut TypeDef> {
        self.types.get_mut(id.index())
    }

    /// Look up a live method definition
    #[must_use]
    pub fn method(&self, id: MethodId) -> Option<&MethodDef> {
        self.methods.get(id.index()).and_then(Option::as_ref)
    }

    /// Look up a live method definition for modification
    pub fn method_mut(&mut self, id: MethodId) -> Option<&mut MethodDef> {
        self.methods.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Live method definitions with their handles
    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &MethodDef)> {
        #[allow(clippy::cast_possible_truncation)]
        self.methods
            .iter()
            .enumerate()
            .filter_map(|(index, m)| m.as_ref().map(|m| (MethodId(index as u32), m)))
    }

    /// Look up a live field definition
    #[must_use]
    pub fn field(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.get(id.index()).and_then(Option::as_ref)
    }

    /// `TypeRef` rows in table order
    #[must_use]
    pub fn type_refs(&self) -> &[TypeRefDef] {
        &self.type_refs
    }

    /// Look up a `TypeRef` row by token
    #[must_use]
    pub fn type_ref(&self, token: Token) -> Option<&TypeRefDef> {
        row_index(token, TableId::TypeRef, self.type_refs.len()).map(|i| &self.type_refs[i])
    }

    /// `AssemblyRef` rows in table order
    #[must_use]
    pub fn assembly_refs(&self) -> &[AssemblyRefDef] {
        &self.assembly_refs
    }

    /// Look up an `AssemblyRef` row by token
    #[must_use]
    pub fn assembly_ref(&self, token: Token) -> Option<&AssemblyRefDef> {
        row_index(token, TableId::AssemblyRef, self.assembly_refs.len())
            .map(|i| &self.assembly_refs[i])
    }

    /// `MemberRef` rows in table order
    #[must_use]
    pub fn member_refs(&self) -> &[MemberRefDef] {
        &self.member_refs
    }

    /// Look up a `MemberRef` row by token
    #[must_use]
    pub fn member_ref(&self, token: Token) -> Option<&MemberRefDef> {
        row_index(token, TableId::MemberRef, self.member_refs.len()).map(|i| &self.member_refs[i])
    }

    /// Look up a `MethodSpec` row by token
    #[must_use]
    pub fn method_spec(&self, token: Token) -> Option<&MethodSpecDef> {
        row_index(token, TableId::MethodSpec, self.method_specs.len())
            .map(|i| &self.method_specs[i])
    }

    /// Rows of a table outside the model, empty if the module has none
    #[must_use]
    pub fn retained(&self, table: TableId) -> &[RetainedRow] {
        self.retained.get(&table).map_or(&[], Vec::as_slice)
    }

    /// Append a row to a table outside the model and return its token.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if `table` is part of the model or the row does not have
    /// one cell per column.
    pub fn add_retained(&mut self, table: TableId, row: RetainedRow) -> Result<Token> {
        if table.is_modeled() || row.0.len() != table.columns().len() {
            return Err(malformed_error!(
                "Row with {} cells does not fit table {}",
                row.0.len(),
                table
            ));
        }
        let rows = self.retained.entry(table).or_default();
        rows.push(row);
        #[allow(clippy::cast_possible_truncation)]
        Ok(table.token(rows.len() as u32))
    }

    /// Managed entry point, if the image names a method definition
    #[must_use]
    pub fn entry_point(&self) -> Option<MethodId> {
        self.entry_point
    }

    /// Look up a `StandAloneSig` blob by token
    #[must_use]
    pub fn stand_alone_sig(&self, token: Token) -> Option<&[u8]> {
        row_index(token, TableId::StandAloneSig, self.stand_alone_sigs.len())
            .map(|i| self.stand_alone_sigs[i].as_slice())
    }

    /// Find a type definition by dotted full name
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<TypeId> {
        let (namespace, name) = split_full_name(full_name);
        self.types()
            .find(|(_, ty)| ty.namespace == namespace && ty.name == name)
            .map(|(id, _)| id)
    }

    /// Find a method of `ty` named `name` that satisfies `predicate`
    pub fn find_method(
        &self,
        ty: TypeId,
        name: &str,
        predicate: impl Fn(&MethodDef) -> bool,
    ) -> Option<MethodId> {
        self.type_def(ty)?.methods.iter().copied().find(|id| {
            self.method(*id)
                .is_some_and(|method| method.name == name && predicate(method))
        })
    }

    /// Find a type reference by dotted full name
    #[must_use]
    pub fn find_type_ref(&self, full_name: &str) -> Option<Token> {
        let (namespace, name) = split_full_name(full_name);
        self.type_refs
            .iter()
            .position(|r| r.namespace == namespace && r.name == name)
            .map(|index| TableId::TypeRef.token(index as u32 + 1))
    }

    /// The type that owns method `id`
    #[must_use]
    pub fn declaring_type(&self, id: MethodId) -> Option<TypeId> {
        self.types()
            .find(|(_, ty)| ty.methods.contains(&id))
            .map(|(ty, _)| ty)
    }

    /// Parsed signature of method `id`.
    ///
    /// # Errors
    /// Returns [`Error::DanglingReference`] if the method was removed, or a parse error.
    pub fn method_signature(&self, id: MethodId) -> Result<SignatureMethod> {
        let Some(method) = self.method(id) else {
            return Err(Error::DanglingReference(format!(
                "method {} was removed",
                id.index()
            )));
        };
        parse_method_signature(&method.signature)
    }

    /// Display name `Type::Method` of a method reference, for logs and listings
    #[must_use]
    pub fn method_ref_name(&self, method: &MethodRef) -> String {
        match method {
            MethodRef::Def(id) => {
                let owner = self
                    .declaring_type(*id)
                    .and_then(|ty| self.type_def(ty))
                    .map(TypeDef::full_name)
                    .unwrap_or_default();
                let name = self.method(*id).map_or("<removed>", |m| m.name.as_str());
                format!("{owner}::{name}")
            }
            MethodRef::Member(token) => match self.member_ref(*token) {
                Some(member) => {
                    let owner = match member.parent {
                        MemberRefParent::Token(parent) => self.type_name_of(parent),
                        MemberRefParent::Method(id) => {
                            self.method_ref_name(&MethodRef::Def(id))
                        }
                    };
                    format!("{owner}::{}", member.name)
                }
                None => token.to_string(),
            },
            MethodRef::Spec(token) => match self.method_spec(*token) {
                Some(spec) => self.method_ref_name(&spec.method),
                None => token.to_string(),
            },
            MethodRef::Unresolved(spec) => format!("{}::{}", spec.type_full_name(), spec.name),
        }
    }

    /// Simple name of the method behind a reference, as used by call sites
    #[must_use]
    pub fn method_ref_simple_name(&self, method: &MethodRef) -> Option<String> {
        match method {
            MethodRef::Def(id) => self.method(*id).map(|m| m.name.clone()),
            MethodRef::Member(token) => self.member_ref(*token).map(|m| m.name.clone()),
            MethodRef::Spec(token) => self
                .method_spec(*token)
                .and_then(|spec| self.method_ref_simple_name(&spec.method)),
            MethodRef::Unresolved(spec) => Some(spec.name.clone()),
        }
    }

    /// Dotted name of a `TypeDef`, `TypeRef` or `TypeSpec` token
    #[must_use]
    pub fn type_name_of(&self, token: Token) -> String {
        match TableId::from_u8(token.table()) {
            Some(TableId::TypeDef) => self
                .type_def(TypeId(token.row().saturating_sub(1)))
                .map_or_else(|| token.to_string(), TypeDef::full_name),
            Some(TableId::TypeRef) => self
                .type_ref(token)
                .map_or_else(|| token.to_string(), |r| join_full_name(&r.namespace, &r.name)),
            _ => token.to_string(),
        }
    }

    /// Append a type definition and return its handle
    pub fn add_type(&mut self, ty: TypeDef) -> TypeId {
        #[allow(clippy::cast_possible_truncation)]
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    /// Add a method to type `owner` and return its handle.
    ///
    /// # Errors
    /// Returns [`Error::DanglingReference`] if `owner` does not exist.
    pub fn add_method(&mut self, owner: TypeId, method: MethodDef) -> Result<MethodId> {
        if self.type_def(owner).is_none() {
            return Err(Error::DanglingReference(format!(
                "type {} does not exist",
                owner.index()
            )));
        }

        #[allow(clippy::cast_possible_truncation)]
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(Some(method));
        if let Some(ty) = self.type_def_mut(owner) {
            ty.methods.push(id);
        }
        Ok(id)
    }

    /// Add a field to type `owner` and return its handle.
    ///
    /// # Errors
    /// Returns [`Error::DanglingReference`] if `owner` does not exist.
    pub fn add_field(&mut self, owner: TypeId, field: FieldDef) -> Result<FieldId> {
        if self.type_def(owner).is_none() {
            return Err(Error::DanglingReference(format!(
                "type {} does not exist",
                owner.index()
            )));
        }

        #[allow(clippy::cast_possible_truncation)]
        let id = FieldId(self.fields.len() as u32);
        self.fields.push(Some(field));
        if let Some(ty) = self.type_def_mut(owner) {
            ty.fields.push(id);
        }
        Ok(id)
    }

    /// Remove a method definition and detach it from its owner.
    ///
    /// Call sites that still name the method make the module unwritable until they are removed.
    ///
    /// # Errors
    /// Returns [`Error::DanglingReference`] if the method does not exist.
    pub fn remove_method(&mut self, id: MethodId) -> Result<MethodDef> {
        let Some(method) = self.methods.get_mut(id.index()).and_then(Option::take) else {
            return Err(Error::DanglingReference(format!(
                "method {} does not exist",
                id.index()
            )));
        };
        for ty in &mut self.types {
            ty.methods.retain(|other| *other != id);
        }
        Ok(method)
    }

    /// Import every unresolved method reference used by a body.
    ///
    /// # Errors
    /// Returns an error if a reference can not be imported.
    pub fn resolve_references(&mut self) -> Result<()> {
        for index in 0..self.methods.len() {
            let Some(mut body) = self.methods[index].as_mut().and_then(|m| m.body.take()) else {
                continue;
            };
            let result = self.resolve_body(&mut body);
            if let Some(Some(method)) = self.methods.get_mut(index) {
                method.body = Some(body);
            }
            result?;
        }
        Ok(())
    }

    /// Serialize the module into a new image.
    ///
    /// Unresolved references are imported first.
    ///
    /// # Errors
    /// Returns an error if a body fails validation or a reference can not be lowered.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        self.resolve_references()?;
        writer::write(self)
    }

    /// Write the module to `path` through a memory-mapped output file.
    ///
    /// # Errors
    /// Returns an error if serialization or any file operation fails; no partial file is left.
    pub fn write(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = self.to_bytes()?;
        Output::write_file(path, &data)?;
        log::debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{Instruction, OpCode},
        test::factories::{game_module, ANCHOR_METHOD, ANCHOR_TYPE},
    };

    #[test]
    fn lookups() {
        let module = game_module();
        let anchor = module.find_type(ANCHOR_TYPE).unwrap();
        let awake = module.find_method(anchor, ANCHOR_METHOD, |_| true).unwrap();
        assert_eq!(module.declaring_type(awake), Some(anchor));
        assert!(module.find_method(anchor, ANCHOR_METHOD, |m| m.flags.is_static()).is_none());
        assert!(module.find_type("Missing").is_none());

        let debug = module.find_type_ref("UnityEngine.Debug").unwrap();
        assert_eq!(module.type_name_of(debug), "UnityEngine.Debug");
        assert_eq!(module.method_ref_name(&MethodRef::Def(awake)), "GameContext::Awake");
    }

    #[test]
    fn add_and_remove_methods() {
        let mut module = game_module();
        let anchor = module.find_type(ANCHOR_TYPE).unwrap();
        let awake = module.find_method(anchor, ANCHOR_METHOD, |_| true).unwrap();
        let before = module.to_bytes().unwrap();

        let mut extra = module.method(awake).unwrap().clone();
        extra.name = "Extra".to_string();
        let id = module.add_method(anchor, extra).unwrap();
        assert_eq!(module.find_method(anchor, "Extra", |_| true), Some(id));

        let removed = module.remove_method(id).unwrap();
        assert_eq!(removed.name, "Extra");
        assert!(module.method(id).is_none());
        assert!(module.remove_method(id).is_err());
        assert_eq!(module.to_bytes().unwrap(), before);
    }

    #[test]
    fn call_to_removed_method_is_not_written() {
        let mut module = game_module();
        let anchor = module.find_type(ANCHOR_TYPE).unwrap();
        let awake = module.find_method(anchor, ANCHOR_METHOD, |_| true).unwrap();
        let mut extra = module.method(awake).unwrap().clone();
        extra.name = "Extra".to_string();
        let id = module.add_method(anchor, extra).unwrap();

        let body = module.method_mut(awake).unwrap().body.as_mut().unwrap();
        body.instructions.push_front(Instruction::call(MethodRef::Def(id)));
        module.remove_method(id).unwrap();

        assert!(matches!(
            module.to_bytes(),
            Err(Error::DanglingReference(_))
        ));
        let body = module.method_mut(awake).unwrap().body.as_mut().unwrap();
        let first = body.instructions.first().unwrap();
        body.instructions.remove(first).unwrap();
        assert_eq!(
            body.instructions.get(body.instructions.first().unwrap()).unwrap().opcode,
            OpCode::Ldstr
        );
        module.to_bytes().unwrap();
    }

    #[test]
    fn from_path_errors_are_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.dll");
        assert!(matches!(Module::from_path(&missing), Err(Error::Load { .. })));

        let garbage = dir.path().join("garbage.dll");
        std::fs::write(&garbage, [0x4D, 0x5A, 0x90, 0x00]).unwrap();
        assert!(matches!(Module::from_path(&garbage), Err(Error::Load { .. })));
    }

    #[test]
    fn from_path_sets_search_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Assembly-CSharp.dll");
        game_module().write(&path).unwrap();

        let module = Module::from_path(&path).unwrap();
        assert_eq!(module.path(), Some(path.as_path()));
        assert_eq!(module.resolver().search_dirs(), &[dir.path().to_path_buf()]);
        // the map is released, so the file can go away while the model lives
        std::fs::remove_file(&path).unwrap();
        assert_eq!(module.name(), "Assembly-CSharp.dll");
    }
}
