//! Dropping reference rows that nothing uses any more.
//!
//! Removing a routine can orphan the `MemberRef`, `TypeRef`, `AssemblyRef` and `StandAloneSig`
//! rows imported for it. Only rows at the end of their table are dropped, so the tokens of the
//! remaining rows stay valid.

use std::collections::HashSet;

use crate::{
    assembly::{Body, Operand, RegionKind},
    metadata::{
        signatures::{
            parse_field_signature, parse_local_var_signature, parse_method_signature,
            parse_method_spec_signature, parse_type_spec_signature, SignatureMethod,
            TypeSignature, CALLING_CONVENTION,
        },
        tables::TableId,
        token::Token,
    },
    module::{Cell, FieldRef, MemberRefParent, MemberToken, MethodRef, Module},
    Result,
};

fn kind(blob: &[u8]) -> Option<u8> {
    blob.first().map(|b| b & CALLING_CONVENTION::KIND_MASK)
}

#[derive(Default)]
struct Used(HashSet<Token>);

impl Used {
    fn token(&mut self, token: Token) {
        if !token.is_null() {
            self.0.insert(token);
        }
    }

    fn ty(&mut self, sig: &TypeSignature) {
        match sig {
            TypeSignature::Ptr(base)
            | TypeSignature::ByRef(base)
            | TypeSignature::Pinned(base)
            | TypeSignature::SzArray(base) => self.ty(base),
            TypeSignature::ValueType(token) | TypeSignature::Class(token) => self.token(*token),
            TypeSignature::Array(array) => self.ty(&array.base),
            TypeSignature::GenericInst(base, args) => {
                self.ty(base);
                args.iter().for_each(|arg| self.ty(arg));
            }
            TypeSignature::FnPtr(method) => self.method_sig(method),
            TypeSignature::Modified { modifier, base, .. } => {
                self.token(*modifier);
                self.ty(base);
            }
            _ => {}
        }
    }

    fn method_sig(&mut self, sig: &SignatureMethod) {
        self.ty(&sig.return_type);
        sig.params.iter().for_each(|param| self.ty(param));
    }

    fn method(&mut self, method: &MethodRef) {
        match method {
            MethodRef::Member(token) | MethodRef::Spec(token) => self.token(*token),
            MethodRef::Def(_) | MethodRef::Unresolved(_) => {}
        }
    }

    fn field(&mut self, field: &FieldRef) {
        if let FieldRef::Member(token) = field {
            self.token(*token);
        }
    }

    fn body(&mut self, body: &Body) {
        for (_, instruction) in body.instructions.iter() {
            match &instruction.operand {
                Operand::Method(method) | Operand::Token(MemberToken::Method(method)) => {
                    self.method(method);
                }
                Operand::Field(field) | Operand::Token(MemberToken::Field(field)) => {
                    self.field(field);
                }
                Operand::Type(token)
                | Operand::Signature(token)
                | Operand::Token(MemberToken::Type(token)) => self.token(*token),
                _ => {}
            }
        }
        for region in body.instructions.regions() {
            if let RegionKind::Catch(token) = region.kind {
                self.token(token);
            }
        }
        body.locals.iter().for_each(|slot| self.ty(&slot.ty));
        if let Some(token) = body.local_sig {
            self.token(token);
        }
    }

    /// A `MethodRefSig` or `FieldSig`, told apart by the calling convention byte
    fn member_sig(&mut self, blob: &[u8]) -> Result<()> {
        if kind(blob) == Some(CALLING_CONVENTION::FIELD) {
            self.ty(&parse_field_signature(blob)?.base);
        } else {
            self.method_sig(&parse_method_signature(blob)?);
        }
        Ok(())
    }

    /// A `StandAloneSig` blob, either local slots or a `calli` call site
    fn stand_alone_sig(&mut self, blob: &[u8]) -> Result<()> {
        if kind(blob) == Some(CALLING_CONVENTION::LOCAL_SIG) {
            parse_local_var_signature(blob)?
                .locals
                .iter()
                .for_each(|local| self.ty(local));
        } else {
            self.method_sig(&parse_method_signature(blob)?);
        }
        Ok(())
    }

    /// A `PropertySig`, laid out as a method signature apart from its calling convention
    fn property_sig(&mut self, blob: &[u8]) -> Result<()> {
        let mut method = blob.to_vec();
        if let Some(first) = method.first_mut() {
            *first &= !CALLING_CONVENTION::KIND_MASK;
        }
        self.method_sig(&parse_method_signature(&method)?);
        Ok(())
    }
}

impl Module {
    fn used_tokens(&self) -> Result<HashSet<Token>> {
        let mut used = Used::default();

        for ty in &self.types {
            used.token(ty.extends);
        }
        for field in self.fields.iter().flatten() {
            used.ty(&parse_field_signature(&field.signature)?.base);
        }
        for method in self.methods.iter().flatten() {
            used.method_sig(&parse_method_signature(&method.signature)?);
            if let Some(body) = &method.body {
                used.body(body);
            }
        }
        for member in &self.member_refs {
            if let MemberRefParent::Token(parent) = &member.parent {
                used.token(*parent);
            }
            used.member_sig(&member.signature)?;
        }
        for type_ref in &self.type_refs {
            used.token(type_ref.scope);
        }
        for blob in &self.type_specs {
            used.ty(&parse_type_spec_signature(blob)?);
        }
        for blob in &self.stand_alone_sigs {
            used.stand_alone_sig(blob)?;
        }
        for spec in &self.method_specs {
            used.method(&spec.method);
            parse_method_spec_signature(&spec.instantiation)?
                .generic_args
                .iter()
                .for_each(|arg| used.ty(arg));
        }
        for (table, rows) in &self.retained {
            for row in rows {
                row.tokens().for_each(|token| used.token(token));
                if *table == TableId::Property {
                    for cell in &row.0 {
                        if let Cell::Blob(blob) = cell {
                            used.property_sig(blob)?;
                        }
                    }
                }
            }
        }

        Ok(used.0)
    }

    /// Drop the trailing `MemberRef`, `StandAloneSig`, `TypeRef` and `AssemblyRef` rows that
    /// nothing in the module references, and return how many rows were dropped.
    ///
    /// A module with a signature blob that does not decode is left unchanged.
    pub fn trim_references(&mut self) -> usize {
        let mut dropped = 0;
        loop {
            let used = match self.used_tokens() {
                Ok(used) => used,
                Err(error) => {
                    log::debug!("Keeping reference rows of {}: {}", self.name, error);
                    return dropped;
                }
            };

            let round = trim_tail(&mut self.member_refs, TableId::MemberRef, &used)
                + trim_tail(&mut self.stand_alone_sigs, TableId::StandAloneSig, &used)
                + trim_tail(&mut self.type_refs, TableId::TypeRef, &used)
                + trim_tail(&mut self.assembly_refs, TableId::AssemblyRef, &used);
            if round == 0 {
                break;
            }
            dropped += round;
        }

        if dropped > 0 {
            log::debug!("Dropped {} unused reference row(s) from {}", dropped, self.name);
        }
        dropped
    }
}

#[allow(clippy::cast_possible_truncation)]
fn trim_tail<T>(rows: &mut Vec<T>, table: TableId, used: &HashSet<Token>) -> usize {
    let before = rows.len();
    while !rows.is_empty() && !used.contains(&table.token(rows.len() as u32)) {
        rows.pop();
    }
    before - rows.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Instruction,
        module::{AssemblyName, MethodRefSpec, RetainedRow, RowRef, SigType, TypeName},
        test::factories::game_module,
    };

    fn flush() -> MethodRefSpec {
        MethodRefSpec::new_static(
            AssemblyName::new("Telemetry"),
            "Telemetry.Session",
            "Flush",
            SigType::Void,
            vec![],
        )
    }

    #[test]
    fn clean_module_keeps_its_rows() {
        let mut module = game_module();
        let before = module.clone();
        assert_eq!(module.trim_references(), 0);
        assert_eq!(module, before);
    }

    #[test]
    fn orphaned_imports_are_dropped() {
        let original = game_module();
        let mut module = original.clone();
        module.import_method(&flush()).unwrap();
        assert_eq!(module.member_refs().len(), original.member_refs().len() + 1);
        assert_eq!(module.assembly_refs().len(), original.assembly_refs().len() + 1);

        assert_eq!(module.trim_references(), 3);
        assert_eq!(module.member_refs(), original.member_refs());
        assert_eq!(module.type_refs(), original.type_refs());
        assert_eq!(module.assembly_refs(), original.assembly_refs());
    }

    #[test]
    fn referenced_rows_are_kept() {
        let original = game_module();
        let mut module = original.clone();
        let flush = module.import_method(&flush()).unwrap();
        let ty = module.find_type("GameContext").unwrap();
        let awake = module.find_method(ty, "Awake", |_| true).unwrap();
        let body = module.method_mut(awake).unwrap().body.as_mut().unwrap();
        body.instructions.push_front(Instruction::call(flush));

        assert_eq!(module.trim_references(), 0);
        assert_eq!(module.member_refs().len(), original.member_refs().len() + 1);
    }

    #[test]
    fn retained_rows_keep_their_targets() {
        let original = game_module();
        let mut module = original.clone();
        let session = module
            .import_type(&TypeName::new("Telemetry", "Telemetry.Session"))
            .unwrap();
        let ty = module.find_type("GameContext").unwrap();
        module
            .add_retained(
                TableId::InterfaceImpl,
                RetainedRow(vec![
                    Cell::Ref(RowRef::Token(ty.token())),
                    Cell::Ref(RowRef::Token(session)),
                ]),
            )
            .unwrap();

        assert_eq!(module.trim_references(), 0);
        assert_eq!(module.type_refs().len(), original.type_refs().len() + 1);
    }

    #[test]
    fn gaps_are_left_in_place() {
        let mut module = game_module();
        module
            .import_type(&TypeName::new("Telemetry", "Telemetry.Unused"))
            .unwrap();
        let tail = module.import_method(&flush()).unwrap();
        let ty = module.find_type("GameContext").unwrap();
        let awake = module.find_method(ty, "Awake", |_| true).unwrap();
        let body = module.method_mut(awake).unwrap().body.as_mut().unwrap();
        body.instructions.push_front(Instruction::call(tail));
        let rows = module.type_refs().len();

        assert_eq!(module.trim_references(), 0);
        assert_eq!(module.type_refs().len(), rows);
        assert!(module.find_type_ref("Telemetry.Unused").is_some());
    }
}
