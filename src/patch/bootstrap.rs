//! Synthesis of the bootstrap routine.
//!
//! The generated routine is equivalent to:
//!
//! ```text
//! public static void LoadSRModLoader2()
//! {
//!     try
//!     {
//!         string[] files = Directory.GetFiles(pluginDir, pluginGlob, SearchOption.AllDirectories);
//!         for (int i = 0; i < files.Length; i++)
//!         {
//!             try { Assembly.LoadFrom(files[i]); } catch (Exception) { }   // LoadFailurePolicy::Continue
//!         }
//!         EntryPoint();
//!     }
//!     catch (Exception e)
//!     {
//!         Debug.Log(e);
//!         Application.Quit();
//!     }
//! }
//! ```
//!
//! With [`LoadFailurePolicy::Abort`] the inner `try` is left out and the first failing load
//! reaches the outer handler.

use crate::{
    assembly::{Body, ExceptionRegion, InstrId, Instruction, OpCode, RegionKind},
    metadata::{
        method::{MethodAttributes, MethodImplAttributes},
        signatures::{encode_method_signature, SignatureMethod, TypeSignature},
    },
    module::{
        AssemblyName, MethodDef, MethodId, MethodRef, MethodRefSpec, Module, SigType, TypeId,
        TypeName,
    },
    patch::{Anchor, LoadFailurePolicy, PatchConfig, CURRENT_MARKER},
    Error, Result,
};

const CORE: &str = "mscorlib";

fn core_spec(
    full_type_name: &str,
    name: &str,
    return_type: SigType,
    params: Vec<SigType>,
) -> MethodRefSpec {
    MethodRefSpec::new_static(
        AssemblyName::new(CORE),
        full_type_name,
        name,
        return_type,
        params,
    )
}

fn core_class(full_name: &str) -> SigType {
    SigType::Class(TypeName::new(CORE, full_name))
}

/// `string[] System.IO.Directory::GetFiles(string, string, System.IO.SearchOption)`
fn get_files() -> MethodRefSpec {
    core_spec(
        "System.IO.Directory",
        "GetFiles",
        SigType::SzArray(Box::new(SigType::String)),
        vec![
            SigType::String,
            SigType::String,
            SigType::ValueType(TypeName::new(CORE, "System.IO.SearchOption")),
        ],
    )
}

/// `System.Reflection.Assembly System.Reflection.Assembly::LoadFrom(string)`
fn load_from() -> MethodRefSpec {
    core_spec(
        "System.Reflection.Assembly",
        "LoadFrom",
        core_class("System.Reflection.Assembly"),
        vec![SigType::String],
    )
}

/// Builder of the bootstrap routine.
///
/// The three calls the routine makes into other code are passed in explicitly: the guarded
/// entry point, the routine that logs a caught exception and the routine that ends the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapBuilder {
    /// Name of the generated routine, the current marker by default
    pub name: String,
    /// Directory enumerated at runtime
    pub plugin_dir: String,
    /// File name pattern of plugin files
    pub plugin_glob: String,
    /// Search subdirectories as well
    pub recursive: bool,
    /// Handling of a plugin file that fails to load
    pub load_failure: LoadFailurePolicy,
    /// Called after all plugins are loaded
    pub entry_point: MethodRef,
    /// Static `void (object)` receiving the caught exception
    pub log: MethodRef,
    /// Static `void ()` ending the host after a failure
    pub terminate: MethodRef,
}

impl BootstrapBuilder {
    /// Create a builder using the plugin settings of `config`
    #[must_use]
    pub fn new(
        config: &PatchConfig,
        entry_point: MethodRef,
        log: MethodRef,
        terminate: MethodRef,
    ) -> Self {
        BootstrapBuilder {
            name: CURRENT_MARKER.to_string(),
            plugin_dir: config.plugin_dir.clone(),
            plugin_glob: config.plugin_glob.clone(),
            recursive: config.recursive,
            load_failure: config.load_failure,
            entry_point,
            log,
            terminate,
        }
    }

    /// Build the routine body against `module`, importing the references it uses.
    ///
    /// # Errors
    /// Returns an error if a reference can not be imported or the stream is inconsistent.
    pub fn body(&self, module: &mut Module) -> Result<Body> {
        let get_files = module.import_method(&get_files())?;
        let load_from = module.import_method(&load_from())?;
        let exception = module.import_type(&TypeName::new(CORE, "System.Exception"))?;

        let mut body = Body::new();
        let files = body.add_local(TypeSignature::SzArray(Box::new(TypeSignature::String)))?;
        let index = body.add_local(TypeSignature::I4)?;
        let code = &mut body.instructions;

        let first = code.push(Instruction::ldstr(&self.plugin_dir));
        code.push(Instruction::ldstr(&self.plugin_glob));
        code.push(Instruction::ldc_i4(i32::from(self.recursive)));
        code.push(Instruction::call(get_files));
        code.push(Instruction::stloc(files));
        code.push(Instruction::ldc_i4(0));
        code.push(Instruction::stloc(index));
        let enter_loop = code.push(Instruction::simple(OpCode::Nop));

        let load_start = code.push(Instruction::ldloc(files));
        code.push(Instruction::ldloc(index));
        code.push(Instruction::simple(OpCode::LdelemRef));
        code.push(Instruction::call(load_from));
        code.push(Instruction::simple(OpCode::Pop));

        let mut guard: Option<(InstrId, InstrId, InstrId)> = None;
        if self.load_failure == LoadFailurePolicy::Continue {
            let leave_try = code.push(Instruction::simple(OpCode::Nop));
            let discard = code.push(Instruction::simple(OpCode::Pop));
            let leave_handler = code.push(Instruction::simple(OpCode::Nop));
            guard = Some((leave_try, discard, leave_handler));
        }

        let next = code.push(Instruction::ldloc(index));
        code.push(Instruction::ldc_i4(1));
        code.push(Instruction::simple(OpCode::Add));
        code.push(Instruction::stloc(index));
        let condition = code.push(Instruction::ldloc(index));
        code.push(Instruction::ldloc(files));
        code.push(Instruction::simple(OpCode::Ldlen));
        code.push(Instruction::simple(OpCode::ConvI4));
        code.push(Instruction::branch(OpCode::BltS, load_start));

        code.push(Instruction::call(self.entry_point.clone()));
        let leave_main = code.push(Instruction::simple(OpCode::Nop));
        let log = code.push(Instruction::call(self.log.clone()));
        code.push(Instruction::call(self.terminate.clone()));
        let leave_log = code.push(Instruction::simple(OpCode::Nop));
        let ret = code.push(Instruction::simple(OpCode::Ret));

        // branch placeholders are patched once their targets exist
        let patches = [
            (enter_loop, Instruction::branch(OpCode::BrS, condition)),
            (leave_main, Instruction::branch(OpCode::LeaveS, ret)),
            (leave_log, Instruction::branch(OpCode::LeaveS, ret)),
        ];
        for (at, instruction) in patches {
            if let Some(slot) = code.get_mut(at) {
                *slot = instruction;
            }
        }

        if let Some((leave_try, discard, leave_handler)) = guard {
            for at in [leave_try, leave_handler] {
                if let Some(slot) = code.get_mut(at) {
                    *slot = Instruction::branch(OpCode::LeaveS, next);
                }
            }
            code.add_region(ExceptionRegion {
                kind: RegionKind::Catch(exception),
                try_start: load_start,
                try_end: leave_try,
                handler_start: discard,
                handler_end: leave_handler,
            })?;
        }

        code.add_region(ExceptionRegion {
            kind: RegionKind::Catch(exception),
            try_start: first,
            try_end: leave_main,
            handler_start: log,
            handler_end: leave_log,
        })?;

        code.validate()?;
        Ok(body)
    }

    /// Add the routine to type `owner`, or return the existing routine of the same name.
    ///
    /// # Errors
    /// Returns an error if the body can not be built.
    pub fn build(&self, module: &mut Module, owner: TypeId) -> Result<MethodId> {
        if let Some(existing) = module.find_method(owner, &self.name, |_| true) {
            log::debug!("{} already exists, keeping it", self.name);
            return Ok(existing);
        }

        let body = self.body(module)?;
        let signature =
            encode_method_signature(&SignatureMethod::new_static(TypeSignature::Void, Vec::new()))?;
        let id = module.add_method(
            owner,
            MethodDef {
                flags: MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                impl_flags: MethodImplAttributes::empty(),
                name: self.name.clone(),
                signature,
                params: Vec::new(),
                body: Some(body),
                rva: 0,
            },
        )?;

        log::info!("Added bootstrap routine {}", self.name);
        Ok(id)
    }
}

/// Resolve the host's log and terminate routines from the module's own type references.
///
/// # Errors
/// Returns [`Error::MissingDependencyType`] if either type is not referenced by the module.
pub fn host_routines(module: &mut Module, config: &PatchConfig) -> Result<(MethodRef, MethodRef)> {
    let Some(log_type) = module.find_type_ref(&config.log_type) else {
        return Err(Error::MissingDependencyType(config.log_type.clone()));
    };
    let Some(terminate_type) = module.find_type_ref(&config.terminate_type) else {
        return Err(Error::MissingDependencyType(config.terminate_type.clone()));
    };

    let log = module.import_member(
        log_type,
        &config.log_method,
        &SignatureMethod::new_static(TypeSignature::Void, vec![TypeSignature::Object]),
    )?;
    let terminate = module.import_member(
        terminate_type,
        &config.terminate_method,
        &SignatureMethod::new_static(TypeSignature::Void, Vec::new()),
    )?;
    Ok((log, terminate))
}

/// Add the bootstrap routine for `entry_point` to the anchor's type.
///
/// Idempotent: an existing routine named after the current marker is returned unchanged.
///
/// # Errors
/// Returns [`Error::MissingDependencyType`] if the host log or terminate type is not referenced.
pub fn build_injected_routine(
    module: &mut Module,
    anchor: &Anchor,
    entry_point: &MethodRefSpec,
    config: &PatchConfig,
) -> Result<MethodId> {
    if let Some(existing) = module.find_method(anchor.ty, CURRENT_MARKER, |_| true) {
        return Ok(existing);
    }

    let (log, terminate) = host_routines(module, config)?;
    let entry_point = module.import_method(entry_point)?;
    BootstrapBuilder::new(config, entry_point, log, terminate).build(module, anchor.ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Operand,
        patch::locate_anchor,
        test::factories::{entry_point, game_module, module_without_host_types},
    };

    fn listing(module: &Module, id: MethodId) -> Vec<String> {
        let body = module.method(id).unwrap().body.as_ref().unwrap();
        body.instructions
            .iter()
            .map(|(_, i)| i.opcode.to_string())
            .collect()
    }

    #[test]
    fn continue_policy_guards_each_load() {
        let mut module = game_module();
        let config = PatchConfig::default();
        let anchor = locate_anchor(&module, &config).unwrap();
        let id = build_injected_routine(&mut module, &anchor, &entry_point(), &config).unwrap();

        let method = module.method(id).unwrap();
        assert_eq!(method.name, CURRENT_MARKER);
        assert!(method.flags.is_static());
        let body = method.body.as_ref().unwrap();
        assert_eq!(
            body.local_types(),
            vec![TypeSignature::SzArray(Box::new(TypeSignature::String)), TypeSignature::I4]
        );
        assert_eq!(body.instructions.regions().len(), 2);

        let outer = body.instructions.regions()[1];
        assert_eq!(outer.try_start, body.instructions.first().unwrap());
        let handler = body.instructions.get(outer.handler_start).unwrap();
        assert_eq!(handler.method(), Some(&host_routines(&mut module.clone(), &config).unwrap().0));
        assert_eq!(
            listing(&module, id).last().map(String::as_str),
            Some("ret")
        );

        let reloaded = Module::from_mem(module.to_bytes().unwrap()).unwrap();
        let id = reloaded.find_method(anchor.ty, CURRENT_MARKER, |_| true).unwrap();
        assert_eq!(reloaded.method(id).unwrap().body.as_ref().unwrap().instructions.regions().len(), 2);
    }

    #[test]
    fn abort_policy_is_a_flat_loop() {
        let mut module = game_module();
        let config = PatchConfig::abort_on_load_failure();
        let anchor = locate_anchor(&module, &config).unwrap();
        let id = build_injected_routine(&mut module, &anchor, &entry_point(), &config).unwrap();

        let body = module.method(id).unwrap().body.as_ref().unwrap();
        assert_eq!(body.instructions.regions().len(), 1);
        assert_eq!(
            listing(&module, id),
            [
                "ldstr", "ldstr", "ldc.i4.1", "call", "stloc.0", "ldc.i4.0", "stloc.1", "br.s",
                "ldloc.0", "ldloc.1", "ldelem.ref", "call", "pop", "ldloc.1", "ldc.i4.1", "add",
                "stloc.1", "ldloc.1", "ldloc.0", "ldlen", "conv.i4", "blt.s", "call", "leave.s",
                "call", "call", "leave.s", "ret",
            ]
        );
    }

    #[test]
    fn existing_routine_is_reused() {
        let mut module = game_module();
        let config = PatchConfig::default();
        let anchor = locate_anchor(&module, &config).unwrap();
        let first = build_injected_routine(&mut module, &anchor, &entry_point(), &config).unwrap();
        let count = module.methods().count();
        let second = build_injected_routine(&mut module, &anchor, &entry_point(), &config).unwrap();
        assert_eq!(first, second);
        assert_eq!(module.methods().count(), count);
    }

    #[test]
    fn plugin_settings_are_embedded() {
        let mut module = game_module();
        let config = PatchConfig::default().with_plugins("Mods/Libs", "*.mod.dll");
        let anchor = locate_anchor(&module, &config).unwrap();
        let id = build_injected_routine(&mut module, &anchor, &entry_point(), &config).unwrap();

        let body = module.method(id).unwrap().body.as_ref().unwrap();
        let strings: Vec<String> = body
            .instructions
            .iter()
            .filter_map(|(_, i)| match &i.operand {
                Operand::String(s) => Some(s.to_string_lossy()),
                _ => None,
            })
            .collect();
        assert_eq!(strings, ["Mods/Libs", "*.mod.dll"]);
    }

    #[test]
    fn host_types_are_required() {
        let mut module = module_without_host_types();
        let config = PatchConfig::default();
        let anchor = locate_anchor(&module, &config).unwrap();
        let err = build_injected_routine(&mut module, &anchor, &entry_point(), &config).unwrap_err();
        assert!(matches!(err, Error::MissingDependencyType(name) if name == "UnityEngine.Debug"));
    }
}
