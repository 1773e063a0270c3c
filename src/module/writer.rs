//! Serializing a [`Module`] into a module image.
//!
//! Method, field and parameter definitions get fresh rows, numbered per owning type in
//! declaration order, and every body is re-encoded against that numbering. The other modeled
//! tables keep their row order, so tokens stored in signature blobs stay valid. Rows of the
//! retained tables follow their targets: a row that names a removed member is dropped, and the
//! tables ECMA-335 keeps sorted are sorted again by their new keys.
//!
//! The image is the loaded one with its sections untouched and one more section, `.cilmeta`,
//! holding the bodies followed by the metadata root. The CLR header is patched in place to
//! point at the new root. Heap entries are added in a fixed order, which makes the output a
//! pure function of the model and its base image.

use std::collections::BTreeMap;

use widestring::U16Str;

use crate::{
    assembly::{encode_body, OpCode, TokenProvider},
    file::{
        io::{pad_to, patch_u32},
        pe::{emit_section, skeleton, PeLayout},
    },
    metadata::{
        cor20header::{COR20_ENTRY_POINT, COR20_METADATA_RVA, COR20_METADATA_SIZE},
        root::Root,
        signatures::{
            encode_local_var_signature, parse_method_signature, SignatureLocalVariables,
            SignatureMethod,
        },
        streams::{BlobBuilder, GuidBuilder, StreamHeader, StringsBuilder, UserStringsBuilder},
        tables::{
            AssemblyRaw, AssemblyRefRaw, CodedIndex, CodedIndexType, Column, FieldRaw,
            MemberRefRaw, MethodDefRaw, MethodSpecRaw, ModuleRaw, ModuleRefRaw, ParamRaw,
            RetainedRaw, StandAloneSigRaw, TableId, TablesStream, TypeDefRaw, TypeRefRaw,
            TypeSpecRaw, HEAP_LARGE_BLOB, HEAP_LARGE_GUID, HEAP_LARGE_STRINGS, SORTED_TABLES,
        },
        token::Token,
    },
    module::{
        Cell, FieldId, FieldRef, MemberRefParent, MemberToken, MethodId, MethodRef, Module,
        RetainedRow, RowRef,
    },
    Error, Result,
};

/// Name of the section the writer appends
pub(crate) const METADATA_SECTION: [u8; 8] = *b".cilmeta";
/// `IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ`
const METADATA_CHARACTERISTICS: u32 = 0x4000_0040;

/// Order in which the sorted retained tables are numbered; every table comes after the tables
/// its key column can name
const SORTED_ORDER: [TableId; 14] = [
    TableId::InterfaceImpl,
    TableId::DeclSecurity,
    TableId::GenericParam,
    TableId::ClassLayout,
    TableId::FieldLayout,
    TableId::FieldMarshal,
    TableId::Constant,
    TableId::MethodSemantics,
    TableId::MethodImpl,
    TableId::ImplMap,
    TableId::FieldRVA,
    TableId::NestedClass,
    TableId::GenericParamConstraint,
    TableId::CustomAttribute,
];

fn coded(token: Token, ci_type: CodedIndexType) -> Result<CodedIndex> {
    if token.is_null() {
        return Ok(CodedIndex::null(ci_type));
    }
    match TableId::from_u8(token.table()) {
        Some(table) if ci_type.tables().contains(&table) => Ok(CodedIndex::new(table, token.row())),
        _ => Err(malformed_error!(
            "Token {} can not be stored as {:?}",
            token,
            ci_type
        )),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn row_count(len: usize) -> u32 {
    len as u32
}

struct Writer<'a> {
    module: &'a Module,
    /// 1-based `MethodDef` row of each live, owned method, by arena index
    method_rows: Vec<Option<u32>>,
    /// 1-based `Field` row of each live, owned field, by arena index
    field_rows: Vec<Option<u32>>,
    /// 1-based `Param` row of the first parameter of each live method, by arena index
    param_rows: Vec<Option<u32>>,
    /// New 1-based rows of the retained tables, by table and model position
    retained_rows: BTreeMap<TableId, Vec<Option<u32>>>,
    user_strings: UserStringsBuilder,
    stand_alone_sigs: Vec<Vec<u8>>,
}

impl Writer<'_> {
    /// New token of a retained row reference, `None` if its target is gone
    fn resolve(&self, target: &RowRef) -> Result<Option<Token>> {
        Ok(match target {
            RowRef::Method(id) => self
                .method_rows
                .get(id.index())
                .copied()
                .flatten()
                .map(|row| TableId::MethodDef.token(row)),
            RowRef::Field(id) => self
                .field_rows
                .get(id.index())
                .copied()
                .flatten()
                .map(|row| TableId::Field.token(row)),
            RowRef::Param(owner, position) => {
                let count = self.module.method(*owner).map_or(0, |m| m.params.len());
                match self.param_rows.get(owner.index()).copied().flatten() {
                    Some(first) if *position < count => {
                        Some(TableId::Param.token(first + row_count(*position)))
                    }
                    _ => None,
                }
            }
            RowRef::Token(token) => {
                let Some(table) = TableId::from_u8(token.table()) else {
                    return Err(malformed_error!("Invalid reference {}", token));
                };
                if table.is_modeled() || token.is_null() {
                    return Ok(Some(*token));
                }
                let Some(rows) = self.retained_rows.get(&table) else {
                    return Err(malformed_error!(
                        "Rows of {} are referenced before they are numbered",
                        table
                    ));
                };
                rows.get(token.row() as usize - 1)
                    .copied()
                    .flatten()
                    .map(|row| table.token(row))
            }
        })
    }

    fn method_row(&self, id: MethodId) -> Result<u32> {
        self.method_rows
            .get(id.index())
            .copied()
            .flatten()
            .ok_or_else(|| {
                Error::DanglingReference(format!("method {} is not part of the module", id.index()))
            })
    }

    fn field_row(&self, id: FieldId) -> Result<u32> {
        self.field_rows
            .get(id.index())
            .copied()
            .flatten()
            .ok_or_else(|| {
                Error::DanglingReference(format!("field {} is not part of the module", id.index()))
            })
    }

    /// Signature blob of the method a reference points at
    fn signature_of(&self, method: &MethodRef) -> Result<&[u8]> {
        match method {
            MethodRef::Def(id) => self
                .module
                .method(*id)
                .map(|m| m.signature.as_slice())
                .ok_or_else(|| Error::DanglingReference(format!("method {} was removed", id.index()))),
            MethodRef::Member(token) => self
                .module
                .member_ref(*token)
                .map(|m| m.signature.as_slice())
                .ok_or_else(|| Error::DanglingReference(format!("member reference {token}"))),
            MethodRef::Spec(token) => match self.module.method_spec(*token) {
                Some(spec) => self.signature_of(&spec.method),
                None => Err(Error::DanglingReference(format!("method spec {token}"))),
            },
            MethodRef::Unresolved(spec) => Err(Error::DanglingReference(format!(
                "{spec} was not imported"
            ))),
        }
    }

    /// Token of the `StandAloneSig` row describing `locals`
    fn local_sig(&mut self, own: Option<Token>, locals: SignatureLocalVariables) -> Result<Token> {
        if locals.locals.is_empty() {
            return Ok(Token::new(0));
        }

        let blob = encode_local_var_signature(&locals)?;
        if let Some(token) = own {
            let current = token
                .row()
                .checked_sub(1)
                .and_then(|row| self.stand_alone_sigs.get(row as usize));
            if token.table() == TableId::StandAloneSig as u8 && current == Some(&blob) {
                return Ok(token);
            }
        }

        let index = match self.stand_alone_sigs.iter().position(|sig| *sig == blob) {
            Some(index) => index,
            None => {
                self.stand_alone_sigs.push(blob);
                self.stand_alone_sigs.len() - 1
            }
        };
        Ok(TableId::StandAloneSig.token(row_count(index + 1)))
    }
}

fn effect(signature: &SignatureMethod) -> (u16, u16) {
    #[allow(clippy::cast_possible_truncation)]
    let pops = signature.param_count() as u16 + u16::from(signature.has_this);
    (pops, u16::from(!signature.return_type.is_void()))
}

impl TokenProvider for Writer<'_> {
    fn string_token(&mut self, value: &U16Str) -> Result<Token> {
        let index = self.user_strings.add(value)?;
        Ok(Token::new(0x7000_0000 | index))
    }

    fn method_token(&mut self, method: &MethodRef) -> Result<Token> {
        match method {
            MethodRef::Def(id) => Ok(TableId::MethodDef.token(self.method_row(*id)?)),
            MethodRef::Member(token) | MethodRef::Spec(token) => Ok(*token),
            MethodRef::Unresolved(spec) => Err(Error::DanglingReference(format!(
                "{spec} was not imported"
            ))),
        }
    }

    fn field_token(&mut self, field: FieldRef) -> Result<Token> {
        match field {
            FieldRef::Def(id) => Ok(TableId::Field.token(self.field_row(id)?)),
            FieldRef::Member(token) => Ok(token),
        }
    }

    fn member_token(&mut self, member: &MemberToken) -> Result<Token> {
        match member {
            MemberToken::Type(token) => Ok(*token),
            MemberToken::Method(method) => self.method_token(method),
            MemberToken::Field(field) => self.field_token(*field),
        }
    }

    fn call_stack_effect(&mut self, method: &MethodRef, opcode: OpCode) -> Result<(u16, u16)> {
        let signature = parse_method_signature(self.signature_of(method)?)?;
        let (pops, pushes) = effect(&signature);
        if opcode == OpCode::Newobj {
            // the constructor's `this` is created, not popped
            return Ok((pops.saturating_sub(1), 1));
        }
        Ok((pops, pushes))
    }

    fn calli_stack_effect(&mut self, sig: Token) -> Result<(u16, u16)> {
        let Some(blob) = self.module.stand_alone_sig(sig) else {
            return Err(Error::DanglingReference(format!("call site signature {sig}")));
        };
        Ok(effect(&parse_method_signature(blob)?))
    }
}

/// Rows of the retained tables that survive, by table and model position.
///
/// A row dies when it names a removed method, field or parameter, a retained row that does not
/// exist, or a row that died itself.
fn live_retained(writer: &Writer<'_>) -> BTreeMap<TableId, Vec<bool>> {
    let module = writer.module;
    let mut alive: BTreeMap<TableId, Vec<bool>> = module
        .retained
        .iter()
        .map(|(table, rows)| (*table, vec![true; rows.len()]))
        .collect();

    let target_alive = |alive: &BTreeMap<TableId, Vec<bool>>, target: &RowRef| match target {
        RowRef::Method(id) => writer.method_rows.get(id.index()).copied().flatten().is_some(),
        RowRef::Field(id) => writer.field_rows.get(id.index()).copied().flatten().is_some(),
        RowRef::Param(owner, position) => {
            writer.method_rows.get(owner.index()).copied().flatten().is_some()
                && module
                    .method(*owner)
                    .is_some_and(|method| *position < method.params.len())
        }
        RowRef::Token(token) => match TableId::from_u8(token.table()) {
            Some(table) if !table.is_modeled() && !token.is_null() => alive
                .get(&table)
                .and_then(|rows| rows.get(token.row() as usize - 1))
                .copied()
                .unwrap_or(false),
            _ => true,
        },
    };

    loop {
        let mut changed = false;
        for (table, rows) in &module.retained {
            for (index, row) in rows.iter().enumerate() {
                if alive[table][index] && !row.refs().all(|target| target_alive(&alive, target)) {
                    if let Some(flags) = alive.get_mut(table) {
                        flags[index] = false;
                    }
                    changed = true;
                }
            }
        }
        if !changed {
            return alive;
        }
    }
}

/// Value a sorted table is ordered by for the key cell of a row
fn sort_value(writer: &Writer<'_>, table: TableId, row: &RetainedRow) -> Result<u64> {
    let Some(key) = table.sort_key() else {
        return Ok(0);
    };
    let Some(Cell::Ref(target)) = row.0.get(key) else {
        return Err(malformed_error!("Key of a {} row is not a reference", table));
    };
    let Some(token) = writer.resolve(target)? else {
        return Err(malformed_error!("Key of a {} row names a removed row", table));
    };
    let encoded = match table.columns()[key] {
        Column::Coded(ci_type) => {
            let Some(tag) = TableId::from_u8(token.table()).and_then(|t| ci_type.tag_of(t)) else {
                return Err(malformed_error!("Token {} can not be stored as {:?}", token, ci_type));
            };
            (u64::from(token.row()) << ci_type.tag_bits()) | u64::from(tag)
        }
        _ => u64::from(token.row()),
    };
    // Generic parameters of one owner are ordered by their number
    let number = match (table, row.0.first()) {
        (TableId::GenericParam, Some(Cell::Value(number))) => u64::from(*number),
        _ => 0,
    };
    Ok((encoded << 16) | number)
}

/// Number the surviving retained rows and return the order each table is written in
fn number_retained(writer: &mut Writer<'_>) -> Result<BTreeMap<TableId, Vec<usize>>> {
    let module = writer.module;
    let alive = live_retained(writer);
    let mut order = BTreeMap::new();

    let unsorted = module.retained.keys().filter(|table| table.sort_key().is_none());
    let sorted = SORTED_ORDER.iter().filter(|table| module.retained.contains_key(table));
    for table in unsorted.chain(sorted).copied().collect::<Vec<_>>() {
        let rows = &module.retained[&table];
        let mut survivors: Vec<usize> = (0..rows.len()).filter(|i| alive[&table][*i]).collect();
        if table.sort_key().is_some() {
            let mut keyed = Vec::with_capacity(survivors.len());
            for index in survivors {
                keyed.push((sort_value(writer, table, &rows[index])?, index));
            }
            keyed.sort_by_key(|(key, _)| *key);
            survivors = keyed.into_iter().map(|(_, index)| index).collect();
        }

        if survivors.len() < rows.len() {
            log::debug!(
                "Dropping {} {} rows that name removed members",
                rows.len() - survivors.len(),
                table
            );
        }

        let mut numbering = vec![None; rows.len()];
        for (position, index) in survivors.iter().enumerate() {
            numbering[*index] = Some(row_count(position + 1));
        }
        writer.retained_rows.insert(table, numbering);
        order.insert(table, survivors);
    }
    Ok(order)
}

/// Raw values of a surviving retained row
fn lower_retained(
    writer: &Writer<'_>,
    table: TableId,
    row: &RetainedRow,
    strings: &mut StringsBuilder,
    blobs: &mut BlobBuilder,
) -> Result<RetainedRaw> {
    let mut values = Vec::with_capacity(row.0.len());
    for (column, cell) in table.columns().iter().zip(&row.0) {
        values.push(match (column, cell) {
            (_, Cell::Value(value)) => *value,
            (_, Cell::String(value)) => strings.add(value),
            (_, Cell::Blob(value)) => blobs.add(value)?,
            (Column::List(target), Cell::List(start)) => list_start(writer, *target, *start),
            (Column::Coded(_), Cell::Ref(target)) => match writer.resolve(target)? {
                Some(token) => token.value(),
                None => return Err(Error::DanglingReference(format!("{table} row {target:?}"))),
            },
            (_, Cell::Ref(target)) => match writer.resolve(target)? {
                Some(token) => token.row(),
                None => return Err(Error::DanglingReference(format!("{table} row {target:?}"))),
            },
            (_, Cell::List(_)) => {
                return Err(malformed_error!("{} holds a list outside a list column", table))
            }
        });
    }
    Ok(RetainedRaw { values })
}

/// New first row of a run that started at `start`: the first survivor at or after it
fn list_start(writer: &Writer<'_>, target: TableId, start: u32) -> u32 {
    let rows = writer
        .retained_rows
        .get(&target)
        .map_or(&[][..], Vec::as_slice);
    let first = rows
        .iter()
        .skip(start.saturating_sub(1) as usize)
        .find_map(|row| *row);
    first.unwrap_or_else(|| row_count(rows.iter().flatten().count() + 1))
}

/// Serialize `module`. Unresolved references must have been imported.
pub(super) fn write(module: &Module) -> Result<Vec<u8>> {
    let mut method_rows = vec![None; module.methods.len()];
    let mut field_rows = vec![None; module.fields.len()];
    let mut param_rows = vec![None; module.methods.len()];
    let mut method_order = Vec::new();
    let mut field_order = Vec::new();
    let mut next_param = 1;
    for ty in &module.types {
        for id in &ty.methods {
            if let Some(method) = module.method(*id) {
                method_order.push(*id);
                method_rows[id.index()] = Some(row_count(method_order.len()));
                param_rows[id.index()] = Some(next_param);
                next_param += row_count(method.params.len());
            }
        }
        for id in &ty.fields {
            if module.field(*id).is_some() {
                field_order.push(*id);
                field_rows[id.index()] = Some(row_count(field_order.len()));
            }
        }
    }

    let mut writer = Writer {
        module,
        method_rows,
        field_rows,
        param_rows,
        retained_rows: BTreeMap::new(),
        user_strings: UserStringsBuilder::new(),
        stand_alone_sigs: module.stand_alone_sigs.clone(),
    };
    let retained_order = number_retained(&mut writer)?;

    let fresh;
    let base: &[u8] = match &module.image {
        Some(image) => &image.0[..],
        None => {
            fresh = skeleton();
            &fresh
        }
    };
    let layout = PeLayout::parse(base)?;
    let plan = layout.plan_section(METADATA_SECTION)?;

    let mut section = Vec::new();
    let mut rvas = Vec::with_capacity(method_order.len());
    for id in &method_order {
        let Some(method) = module.method(*id) else {
            continue;
        };
        let Some(body) = &method.body else {
            rvas.push(method.rva);
            continue;
        };

        let returns_value = !parse_method_signature(&method.signature)?
            .return_type
            .is_void();
        let local_sig = writer.local_sig(
            body.local_sig,
            SignatureLocalVariables {
                locals: body.local_types(),
            },
        )?;
        let raw = encode_body(body, local_sig, returns_value, &mut writer).map_err(|error| {
            log::warn!("Failed to encode body of {}: {}", method.name, error);
            error
        })?;

        if !raw.fits_tiny() {
            pad_to(&mut section, 4);
        }
        rvas.push(plan.rva + row_count(section.len()));
        raw.write(&mut section)?;
    }
    let il_size = section.len();
    pad_to(&mut section, 4);

    let mut strings = StringsBuilder::new();
    let mut blobs = BlobBuilder::new();
    let mut guids = GuidBuilder::new();
    let mut tables = TablesStream {
        sorted: SORTED_TABLES,
        ..TablesStream::default()
    };
    tables.modules.push(ModuleRaw {
        generation: module.generation,
        name: strings.add(&module.name),
        mvid: if module.mvid == uguid::Guid::ZERO {
            0
        } else {
            guids.add(module.mvid)
        },
        encid: 0,
        encbaseid: 0,
    });

    for type_ref in &module.type_refs {
        tables.type_refs.push(TypeRefRaw {
            resolution_scope: coded(type_ref.scope, CodedIndexType::ResolutionScope)?,
            type_name: strings.add(&type_ref.name),
            type_namespace: strings.add(&type_ref.namespace),
        });
    }

    let mut next_field = 1;
    let mut next_method = 1;
    for ty in &module.types {
        tables.type_defs.push(TypeDefRaw {
            flags: ty.flags,
            type_name: strings.add(&ty.name),
            type_namespace: strings.add(&ty.namespace),
            extends: coded(ty.extends, CodedIndexType::TypeDefOrRef)?,
            field_list: next_field,
            method_list: next_method,
        });
        next_field += row_count(ty.fields.iter().filter(|id| module.field(**id).is_some()).count());
        next_method += row_count(ty.methods.iter().filter(|id| module.method(**id).is_some()).count());
    }

    for id in &field_order {
        let Some(field) = module.field(*id) else {
            continue;
        };
        tables.fields.push(FieldRaw {
            flags: field.flags,
            name: strings.add(&field.name),
            signature: blobs.add(&field.signature)?,
        });
    }

    for (id, rva) in method_order.iter().zip(rvas) {
        let Some(method) = module.method(*id) else {
            continue;
        };
        tables.method_defs.push(MethodDefRaw {
            rva,
            impl_flags: method.impl_flags.bits(),
            flags: method.flags.bits(),
            name: strings.add(&method.name),
            signature: blobs.add(&method.signature)?,
            param_list: row_count(tables.params.len() + 1),
        });
        for param in &method.params {
            tables.params.push(ParamRaw {
                flags: param.flags,
                sequence: param.sequence,
                name: strings.add(&param.name),
            });
        }
    }

    for member in &module.member_refs {
        let class = match member.parent {
            MemberRefParent::Token(token) => coded(token, CodedIndexType::MemberRefParent)?,
            MemberRefParent::Method(id) => CodedIndex::new(TableId::MethodDef, writer.method_row(id)?),
        };
        tables.member_refs.push(MemberRefRaw {
            class,
            name: strings.add(&member.name),
            signature: blobs.add(&member.signature)?,
        });
    }

    for signature in &writer.stand_alone_sigs {
        tables.stand_alone_sigs.push(StandAloneSigRaw {
            signature: blobs.add(signature)?,
        });
    }

    for name in &module.module_refs {
        tables.module_refs.push(ModuleRefRaw {
            name: strings.add(name),
        });
    }

    for signature in &module.type_specs {
        tables.type_specs.push(TypeSpecRaw {
            signature: blobs.add(signature)?,
        });
    }

    if let Some(assembly) = &module.assembly {
        let [major_version, minor_version, build_number, revision_number] = assembly.name.version;
        tables.assemblies.push(AssemblyRaw {
            hash_alg_id: assembly.hash_alg_id,
            major_version,
            minor_version,
            build_number,
            revision_number,
            flags: assembly.flags,
            public_key: blobs.add(&assembly.name.public_key_or_token)?,
            name: strings.add(&assembly.name.name),
            culture: strings.add(&assembly.name.culture),
        });
    }

    for reference in &module.assembly_refs {
        let [major_version, minor_version, build_number, revision_number] = reference.name.version;
        tables.assembly_refs.push(AssemblyRefRaw {
            major_version,
            minor_version,
            build_number,
            revision_number,
            flags: reference.flags,
            public_key_or_token: blobs.add(&reference.name.public_key_or_token)?,
            name: strings.add(&reference.name.name),
            culture: strings.add(&reference.name.culture),
            hash_value: blobs.add(&reference.hash_value)?,
        });
    }

    for spec in &module.method_specs {
        let method = match &spec.method {
            MethodRef::Def(id) => CodedIndex::new(TableId::MethodDef, writer.method_row(*id)?),
            MethodRef::Member(token) => coded(*token, CodedIndexType::MethodDefOrRef)?,
            other => {
                return Err(Error::DanglingReference(format!(
                    "method spec instantiates {other:?}"
                )))
            }
        };
        tables.method_specs.push(MethodSpecRaw {
            method,
            instantiation: blobs.add(&spec.instantiation)?,
        });
    }

    for (table, order) in &retained_order {
        let rows = &module.retained[table];
        let mut raw = Vec::with_capacity(order.len());
        for index in order {
            raw.push(lower_retained(&writer, *table, &rows[*index], &mut strings, &mut blobs)?);
        }
        if !raw.is_empty() {
            tables.retained.insert(*table, raw);
        }
    }

    let strings = strings.finish();
    let user_strings = writer.user_strings.finish();
    let guids = guids.finish();
    let blobs = blobs.finish();

    if strings.len() > 0xFFFF {
        tables.heap_sizes |= HEAP_LARGE_STRINGS;
    }
    if guids.len() / 16 > 0xFFFF {
        tables.heap_sizes |= HEAP_LARGE_GUID;
    }
    if blobs.len() > 0xFFFF {
        tables.heap_sizes |= HEAP_LARGE_BLOB;
    }
    let tables = tables.write()?;

    let streams: [(&str, &[u8]); 5] = [
        ("#~", &tables),
        ("#Strings", &strings),
        ("#US", &user_strings),
        ("#GUID", &guids),
        ("#Blob", &blobs),
    ];

    let mut root = Root::new(
        streams
            .iter()
            .map(|(name, _)| StreamHeader {
                offset: 0,
                size: 0,
                name: (*name).to_string(),
            })
            .collect(),
    );
    root.version.clone_from(&module.runtime_version);

    let mut offset = root.encoded_size();
    for (header, (_, data)) in root.stream_headers.iter_mut().zip(streams.iter()) {
        header.offset = row_count(offset);
        header.size = row_count(data.len());
        offset += data.len();
    }

    let metadata_start = section.len();
    root.write(&mut section);
    for (_, data) in streams {
        section.extend_from_slice(data);
    }
    let metadata_rva = plan.rva + row_count(metadata_start);
    let metadata_size = row_count(section.len() - metadata_start);

    let cor20 = layout.rva_to_offset(layout.clr_rva)?;
    if cor20 >= plan.pointer as usize {
        return Err(malformed_error!("CLR header lives in the metadata section"));
    }
    let mut image = emit_section(
        base,
        &layout,
        &plan,
        METADATA_SECTION,
        METADATA_CHARACTERISTICS,
        &section,
    )?;
    patch_u32(&mut image, cor20 + COR20_METADATA_RVA, metadata_rva)?;
    patch_u32(&mut image, cor20 + COR20_METADATA_SIZE, metadata_size)?;
    if let Some(entry) = module.entry_point {
        let token = writer.method_rows.get(entry.index()).copied().flatten();
        let token = token.map_or(0, |row| TableId::MethodDef.token(row).value());
        patch_u32(&mut image, cor20 + COR20_ENTRY_POINT, token)?;
    }

    log::debug!(
        "Serialized {} - {} methods, {} bytes of IL, {} bytes of metadata",
        module.name,
        method_order.len(),
        il_size,
        metadata_size
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use goblin::pe::PE;

    use super::METADATA_SECTION;
    use crate::{
        assembly::{Instruction, OpCode},
        metadata::{signatures::TypeSignature, tables::TableId},
        module::{Cell, RetainedRow, RowRef, TypeId},
        test::factories::{game_module, ANCHOR_METHOD, ANCHOR_TYPE},
        Module,
    };

    fn attribute(parent: RowRef) -> RetainedRow {
        RetainedRow(vec![
            Cell::Ref(parent),
            Cell::Ref(RowRef::Token(TableId::MemberRef.token(1))),
            Cell::Blob(vec![1, 0, 0, 0]),
        ])
    }

    #[test]
    fn output_is_stable() {
        let mut module = game_module();
        let first = module.to_bytes().unwrap();
        let mut reloaded = Module::from_mem(first.clone()).unwrap();
        assert_eq!(reloaded, module);
        assert_eq!(reloaded.to_bytes().unwrap(), first);
    }

    #[test]
    fn locals_get_a_signature_row() {
        let mut module = game_module();
        let anchor = module.find_type(ANCHOR_TYPE).unwrap();
        let awake = module.find_method(anchor, ANCHOR_METHOD, |_| true).unwrap();
        let sigs = module.stand_alone_sigs.len();

        let body = module.method_mut(awake).unwrap().body.as_mut().unwrap();
        let slot = body.add_local(TypeSignature::I4).unwrap();
        body.instructions.push_front(Instruction::stloc(slot));
        body.instructions.push_front(Instruction::ldc_i4(7));

        let mut reloaded = Module::from_mem(module.to_bytes().unwrap()).unwrap();
        assert_eq!(reloaded.stand_alone_sigs.len(), sigs + 1);
        let body = reloaded.method(awake).unwrap().body.as_ref().unwrap();
        assert_eq!(body.local_types(), vec![TypeSignature::I4]);
        let first = body.instructions.first().unwrap();
        assert_eq!(body.instructions.get(first).unwrap().opcode, OpCode::LdcI47);

        // writing again reuses the row it was loaded with
        let again = Module::from_mem(reloaded.to_bytes().unwrap()).unwrap();
        assert_eq!(again.stand_alone_sigs.len(), sigs + 1);
    }

    #[test]
    fn removed_method_shifts_rows() {
        let mut module = game_module();
        let anchor = module.find_type(ANCHOR_TYPE).unwrap();
        let awake = module.find_method(anchor, ANCHOR_METHOD, |_| true).unwrap();
        let mut extra = module.method(awake).unwrap().clone();
        extra.name = "Extra".to_string();
        let id = module.add_method(anchor, extra).unwrap();
        module.remove_method(id).unwrap();

        let reloaded = Module::from_mem(module.to_bytes().unwrap()).unwrap();
        assert_eq!(reloaded.methods().count(), module.methods().count());
        assert!(reloaded.find_method(anchor, "Extra", |_| true).is_none());
    }

    #[test]
    fn image_is_a_managed_pe() {
        let image = game_module().to_bytes().unwrap();
        assert_eq!(&image[..2], b"MZ");

        let pe = PE::parse(&image).unwrap();
        assert!(pe.is_lib);
        let last = pe.sections.last().unwrap();
        assert_eq!(last.name, METADATA_SECTION);
        assert_eq!(image.len() % 0x200, 0);
    }

    #[test]
    fn attributes_survive_a_rewrite() {
        let mut module = game_module();
        let anchor = module.find_type(ANCHOR_TYPE).unwrap();
        let awake = module.find_method(anchor, ANCHOR_METHOD, |_| true).unwrap();
        let on_anchor = attribute(RowRef::Token(anchor.token()));
        let on_module = attribute(RowRef::Token(TypeId(0).token()));
        let on_awake = attribute(RowRef::Method(awake));
        for row in [on_anchor.clone(), on_awake.clone(), on_module.clone()] {
            module.add_retained(TableId::CustomAttribute, row).unwrap();
        }

        let mut reloaded = Module::from_mem(module.to_bytes().unwrap()).unwrap();
        let rows = reloaded.retained(TableId::CustomAttribute);
        assert_eq!(rows.len(), 3);
        assert!(rows.contains(&on_awake));
        // rows come back sorted by parent
        let on_types: Vec<_> = rows
            .iter()
            .filter(|row| matches!(row.0[0], Cell::Ref(RowRef::Token(_))))
            .collect();
        assert_eq!(on_types, vec![&on_module, &on_anchor]);

        let again = Module::from_mem(reloaded.to_bytes().unwrap()).unwrap();
        assert_eq!(again, reloaded);
    }

    #[test]
    fn removed_method_drops_its_attributes() {
        let mut module = game_module();
        let anchor = module.find_type(ANCHOR_TYPE).unwrap();
        let awake = module.find_method(anchor, ANCHOR_METHOD, |_| true).unwrap();
        let mut extra = module.method(awake).unwrap().clone();
        extra.name = "Extra".to_string();
        let id = module.add_method(anchor, extra).unwrap();
        module
            .add_retained(TableId::CustomAttribute, attribute(RowRef::Method(id)))
            .unwrap();
        module
            .add_retained(TableId::CustomAttribute, attribute(RowRef::Method(awake)))
            .unwrap();
        module.remove_method(id).unwrap();

        let reloaded = Module::from_mem(module.to_bytes().unwrap()).unwrap();
        assert_eq!(
            reloaded.retained(TableId::CustomAttribute),
            &[attribute(RowRef::Method(awake))]
        );
    }

    #[test]
    fn nested_rows_follow_their_types() {
        let mut module = game_module();
        let anchor = module.find_type(ANCHOR_TYPE).unwrap();
        let nested = module.add_type(crate::module::TypeDef {
            flags: 0x0000_0002,
            namespace: String::new(),
            name: "Inner".to_string(),
            extends: crate::metadata::token::Token::new(0),
            fields: Vec::new(),
            methods: Vec::new(),
        });
        let row = RetainedRow(vec![
            Cell::Ref(RowRef::Token(nested.token())),
            Cell::Ref(RowRef::Token(anchor.token())),
        ]);
        module.add_retained(TableId::NestedClass, row.clone()).unwrap();
        assert!(module
            .add_retained(TableId::NestedClass, RetainedRow(vec![Cell::Value(1)]))
            .is_err());
        assert!(module.add_retained(TableId::TypeDef, row.clone()).is_err());

        let reloaded = Module::from_mem(module.to_bytes().unwrap()).unwrap();
        assert_eq!(reloaded.retained(TableId::NestedClass), &[row]);
        assert_eq!(reloaded.type_def(nested).unwrap().name, "Inner");
    }

    #[test]
    fn entry_point_follows_its_method() {
        let mut module = game_module();
        let anchor = module.find_type(ANCHOR_TYPE).unwrap();
        let awake = module.find_method(anchor, ANCHOR_METHOD, |_| true).unwrap();
        module.entry_point = Some(awake);

        let mut reloaded = Module::from_mem(module.to_bytes().unwrap()).unwrap();
        assert_eq!(reloaded.entry_point(), Some(awake));

        reloaded.remove_method(awake).unwrap();
        let bare = Module::from_mem(reloaded.to_bytes().unwrap()).unwrap();
        assert_eq!(bare.entry_point(), None);
    }
}
