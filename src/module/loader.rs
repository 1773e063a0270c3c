//! Building the owned [`Module`] model from a module image.
//!
//! The image is parsed in one pass: the CLR header locates the metadata root, the heaps are
//! wrapped in place, the `#~` stream is read into raw rows, and every row is then turned into
//! its owned counterpart. Method bodies are decoded last, once all handles their operands can
//! name exist.

use widestring::U16String;

use crate::{
    assembly::{decode_body, OperandResolver},
    file::File,
    metadata::{
        cor20header::{Cor20Header, COR20_SIZE},
        method::{MethodAttributes, MethodBody, MethodImplAttributes},
        root::Root,
        signatures::parse_local_var_signature,
        streams::{Blob, Guid, Strings, UserStrings},
        tables::{CodedIndex, Column, TableId, TablesStream},
        token::Token,
    },
    module::{
        AssemblyDef, AssemblyName, AssemblyRefDef, BaseImage, Cell, FieldDef, FieldId, FieldRef,
        MemberRefDef, MemberRefParent, MemberToken, MethodDef, MethodId, MethodRef, MethodSpecDef,
        Module, ParamDef, RetainedRow, RowRef, TypeDef, TypeRefDef, ASSEMBLY_FLAG_PUBLIC_KEY,
    },
    Result,
};

const EMPTY_HEAP: &[u8] = &[0];

fn stream<'a>(data: &'a [u8], root: &Root, name: &str) -> Result<Option<&'a [u8]>> {
    let Some(header) = root.stream(name) else {
        return Ok(None);
    };
    let start = header.offset as usize;
    let end = start.saturating_add(header.size as usize);
    data.get(start..end)
        .map(Some)
        .ok_or_else(|| out_of_bounds_error!())
}

fn token_or_null(index: &CodedIndex) -> Token {
    if index.is_null() {
        Token::new(0)
    } else {
        index.token()
    }
}

/// Split a table's rows into the contiguous member lists of their owners.
///
/// `starts` are the 1-based first rows of each owner, `total` the size of the member table.
fn member_ranges(starts: &[u32], total: usize, what: &str) -> Result<Vec<std::ops::Range<usize>>> {
    let mut ranges = Vec::with_capacity(starts.len());
    for (index, start) in starts.iter().enumerate() {
        let begin = (*start as usize).saturating_sub(1).min(total);
        let end = match starts.get(index + 1) {
            Some(next) => (*next as usize).saturating_sub(1).min(total),
            None => total,
        };
        if begin > end {
            return Err(malformed_error!(
                "{} list of row {} is not ordered",
                what,
                index + 1
            ));
        }
        ranges.push(begin..end);
    }
    Ok(ranges)
}

fn assembly_name(
    strings: &Strings,
    blobs: &Blob,
    name: u32,
    culture: u32,
    version: [u16; 4],
    public_key: u32,
    flags: u32,
) -> Result<AssemblyName> {
    Ok(AssemblyName {
        name: strings.get(name as usize)?.to_string(),
        version,
        public_key_or_token: blobs.get(public_key as usize)?.to_vec(),
        has_full_public_key: flags & ASSEMBLY_FLAG_PUBLIC_KEY != 0,
        culture: strings.get(culture as usize)?.to_string(),
    })
}

struct BodyResolver<'a> {
    module: &'a Module,
    user_strings: &'a UserStrings<'a>,
}

impl BodyResolver<'_> {
    fn check_row(&self, token: Token, rows: usize) -> Result<u32> {
        let row = token.row();
        if row == 0 || row as usize > rows {
            return Err(malformed_error!("Token {} is out of range", token));
        }
        Ok(row - 1)
    }
}

impl OperandResolver for BodyResolver<'_> {
    fn user_string(&self, token: Token) -> Result<U16String> {
        if token.table() != 0x70 {
            return Err(malformed_error!("Token {} is not a user string", token));
        }
        self.user_strings.get(token.row() as usize)
    }

    fn method(&self, token: Token) -> Result<MethodRef> {
        match TableId::from_u8(token.table()) {
            Some(TableId::MethodDef) => Ok(MethodRef::Def(MethodId(
                self.check_row(token, self.module.methods.len())?,
            ))),
            Some(TableId::MemberRef) => {
                let row = self.check_row(token, self.module.member_refs.len())?;
                if self.module.member_refs[row as usize].is_field() {
                    return Err(malformed_error!("Token {} names a field, not a method", token));
                }
                Ok(MethodRef::Member(token))
            }
            Some(TableId::MethodSpec) => {
                self.check_row(token, self.module.method_specs.len())?;
                Ok(MethodRef::Spec(token))
            }
            _ => Err(malformed_error!("Token {} is not a method", token)),
        }
    }

    fn field(&self, token: Token) -> Result<FieldRef> {
        match TableId::from_u8(token.table()) {
            Some(TableId::Field) => Ok(FieldRef::Def(FieldId(
                self.check_row(token, self.module.fields.len())?,
            ))),
            Some(TableId::MemberRef) => {
                let row = self.check_row(token, self.module.member_refs.len())?;
                if !self.module.member_refs[row as usize].is_field() {
                    return Err(malformed_error!("Token {} names a method, not a field", token));
                }
                Ok(FieldRef::Member(token))
            }
            _ => Err(malformed_error!("Token {} is not a field", token)),
        }
    }

    fn member(&self, token: Token) -> Result<MemberToken> {
        match TableId::from_u8(token.table()) {
            Some(TableId::TypeDef) => {
                self.check_row(token, self.module.types.len())?;
                Ok(MemberToken::Type(token))
            }
            Some(TableId::TypeRef) => {
                self.check_row(token, self.module.type_refs.len())?;
                Ok(MemberToken::Type(token))
            }
            Some(TableId::TypeSpec) => {
                self.check_row(token, self.module.type_specs.len())?;
                Ok(MemberToken::Type(token))
            }
            Some(TableId::Field) => Ok(MemberToken::Field(self.field(token)?)),
            Some(TableId::MemberRef) => {
                let row = self.check_row(token, self.module.member_refs.len())?;
                if self.module.member_refs[row as usize].is_field() {
                    Ok(MemberToken::Field(FieldRef::Member(token)))
                } else {
                    Ok(MemberToken::Method(MethodRef::Member(token)))
                }
            }
            Some(TableId::MethodDef | TableId::MethodSpec) => {
                Ok(MemberToken::Method(self.method(token)?))
            }
            _ => Err(malformed_error!("Token {} can not be loaded by ldtoken", token)),
        }
    }
}

/// Turn the rows of the tables outside the model into [`RetainedRow`]s
fn retained_rows(
    tables: &TablesStream,
    strings: &Strings,
    blobs: &Blob,
    param_owners: &[(MethodId, usize)],
) -> Result<std::collections::BTreeMap<TableId, Vec<RetainedRow>>> {
    let mut retained = std::collections::BTreeMap::new();
    for (table, rows) in &tables.retained {
        let columns = table.columns();
        let mut owned = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cells = Vec::with_capacity(columns.len());
            for (column, value) in columns.iter().zip(&row.values) {
                cells.push(match column {
                    Column::U16 | Column::U32 => Cell::Value(*value),
                    Column::Str => Cell::String(strings.get(*value as usize)?.to_string()),
                    Column::Blob => Cell::Blob(blobs.get(*value as usize)?.to_vec()),
                    Column::List(_) => Cell::List(*value),
                    Column::Index(target) => {
                        Cell::Ref(RowRef::from_row(*target, *value, param_owners))
                    }
                    Column::Coded(_) => {
                        let token = Token::new(*value);
                        match TableId::from_u8(token.table()) {
                            Some(target) => {
                                Cell::Ref(RowRef::from_row(target, token.row(), param_owners))
                            }
                            None => return Err(malformed_error!("Invalid reference {}", token)),
                        }
                    }
                });
            }
            owned.push(RetainedRow(cells));
        }
        retained.insert(*table, owned);
    }
    Ok(retained)
}

/// Parse a module image.
///
/// # Errors
/// Returns an error if the image is not a valid module of the supported format.
pub(crate) fn load(file: &File) -> Result<Module> {
    let (clr_rva, _) = file.clr();
    let cor20 = Cor20Header::read(file.rva_slice(clr_rva, COR20_SIZE)?)?;
    let data = file.rva_slice(cor20.meta_data_rva, cor20.meta_data_size as usize)?;

    let root = Root::read(data)?;
    let Some(tables_data) = stream(data, &root, "#~")? else {
        return Err(malformed_error!("Module has no #~ stream"));
    };
    let tables = TablesStream::read(tables_data)?;
    let strings = Strings::from(stream(data, &root, "#Strings")?.unwrap_or(EMPTY_HEAP))?;
    let blobs = Blob::from(stream(data, &root, "#Blob")?.unwrap_or(EMPTY_HEAP))?;
    let user_strings = UserStrings::from(stream(data, &root, "#US")?.unwrap_or(EMPTY_HEAP))?;
    let guids = Guid::from(stream(data, &root, "#GUID")?.unwrap_or_default())?;

    let Some(module_row) = tables.modules.first() else {
        return Err(malformed_error!("Module table is empty"));
    };
    let mut module = Module::empty(strings.get(module_row.name as usize)?);
    module.generation = module_row.generation;
    module.runtime_version.clone_from(&root.version);
    if module_row.mvid != 0 {
        module.mvid = guids.get(module_row.mvid as usize)?;
    }

    if let Some(row) = tables.assemblies.first() {
        module.assembly = Some(AssemblyDef {
            name: assembly_name(
                &strings,
                &blobs,
                row.name,
                row.culture,
                [
                    row.major_version,
                    row.minor_version,
                    row.build_number,
                    row.revision_number,
                ],
                row.public_key,
                ASSEMBLY_FLAG_PUBLIC_KEY,
            )?,
            hash_alg_id: row.hash_alg_id,
            flags: row.flags,
        });
    }

    for row in &tables.assembly_refs {
        module.assembly_refs.push(AssemblyRefDef {
            name: assembly_name(
                &strings,
                &blobs,
                row.name,
                row.culture,
                [
                    row.major_version,
                    row.minor_version,
                    row.build_number,
                    row.revision_number,
                ],
                row.public_key_or_token,
                row.flags,
            )?,
            flags: row.flags,
            hash_value: blobs.get(row.hash_value as usize)?.to_vec(),
        });
    }

    for row in &tables.module_refs {
        module
            .module_refs
            .push(strings.get(row.name as usize)?.to_string());
    }

    for row in &tables.type_refs {
        module.type_refs.push(TypeRefDef {
            scope: token_or_null(&row.resolution_scope),
            namespace: strings.get(row.type_namespace as usize)?.to_string(),
            name: strings.get(row.type_name as usize)?.to_string(),
        });
    }

    for row in &tables.type_specs {
        module
            .type_specs
            .push(blobs.get(row.signature as usize)?.to_vec());
    }

    for row in &tables.stand_alone_sigs {
        module
            .stand_alone_sigs
            .push(blobs.get(row.signature as usize)?.to_vec());
    }

    for row in &tables.fields {
        module.fields.push(Some(FieldDef {
            flags: row.flags,
            name: strings.get(row.name as usize)?.to_string(),
            signature: blobs.get(row.signature as usize)?.to_vec(),
        }));
    }

    let param_starts: Vec<u32> = tables.method_defs.iter().map(|m| m.param_list).collect();
    let param_ranges = member_ranges(&param_starts, tables.params.len(), "Param")?;
    let mut param_owners = Vec::with_capacity(tables.params.len());
    for (index, (row, params)) in tables.method_defs.iter().zip(param_ranges).enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let owner = MethodId(index as u32);
        param_owners.extend((0..params.len()).map(|position| (owner, position)));
        let mut param_defs = Vec::with_capacity(params.len());
        for param in &tables.params[params] {
            param_defs.push(ParamDef {
                flags: param.flags,
                sequence: param.sequence,
                name: strings.get(param.name as usize)?.to_string(),
            });
        }
        module.methods.push(Some(MethodDef {
            flags: MethodAttributes::from_bits_retain(row.flags),
            impl_flags: MethodImplAttributes::from_bits_retain(row.impl_flags),
            name: strings.get(row.name as usize)?.to_string(),
            signature: blobs.get(row.signature as usize)?.to_vec(),
            params: param_defs,
            body: None,
            rva: 0,
        }));
    }

    let field_starts: Vec<u32> = tables.type_defs.iter().map(|t| t.field_list).collect();
    let method_starts: Vec<u32> = tables.type_defs.iter().map(|t| t.method_list).collect();
    let field_ranges = member_ranges(&field_starts, tables.fields.len(), "Field")?;
    let method_ranges = member_ranges(&method_starts, tables.method_defs.len(), "Method")?;
    for ((row, fields), methods) in tables.type_defs.iter().zip(field_ranges).zip(method_ranges) {
        #[allow(clippy::cast_possible_truncation)]
        let fields = fields.map(|i| FieldId(i as u32)).collect();
        #[allow(clippy::cast_possible_truncation)]
        let methods = methods.map(|i| MethodId(i as u32)).collect();
        module.types.push(TypeDef {
            flags: row.flags,
            namespace: strings.get(row.type_namespace as usize)?.to_string(),
            name: strings.get(row.type_name as usize)?.to_string(),
            extends: token_or_null(&row.extends),
            fields,
            methods,
        });
    }

    for row in &tables.member_refs {
        let parent = if row.class.tag == TableId::MethodDef {
            if row.class.row == 0 || row.class.row as usize > module.methods.len() {
                return Err(malformed_error!("MemberRef parent {} is out of range", row.class.token()));
            }
            MemberRefParent::Method(MethodId(row.class.row - 1))
        } else {
            MemberRefParent::Token(token_or_null(&row.class))
        };
        module.member_refs.push(MemberRefDef {
            parent,
            name: strings.get(row.name as usize)?.to_string(),
            signature: blobs.get(row.signature as usize)?.to_vec(),
        });
    }

    for row in &tables.method_specs {
        let method = match row.method.tag {
            TableId::MethodDef if row.method.row > 0 => MethodRef::Def(MethodId(row.method.row - 1)),
            TableId::MemberRef if row.method.row > 0 => MethodRef::Member(row.method.token()),
            _ => return Err(malformed_error!("Invalid MethodSpec method {}", row.method.token())),
        };
        module.method_specs.push(MethodSpecDef {
            method,
            instantiation: blobs.get(row.instantiation as usize)?.to_vec(),
        });
    }

    module.retained = retained_rows(&tables, &strings, &blobs, &param_owners)?;

    let entry_point = Token::new(cor20.entry_point_token);
    if entry_point.table() == TableId::MethodDef as u8
        && !entry_point.is_null()
        && entry_point.row() as usize <= module.methods.len()
    {
        module.entry_point = Some(MethodId(entry_point.row() - 1));
    }

    let mut bodies = Vec::new();
    let mut foreign = Vec::new();
    {
        let resolver = BodyResolver {
            module: &module,
            user_strings: &user_strings,
        };
        for (index, row) in tables.method_defs.iter().enumerate() {
            if row.rva == 0 {
                continue;
            }
            if !MethodImplAttributes::from_bits_retain(row.impl_flags).is_il() {
                foreign.push((index, row.rva));
                continue;
            }
            let offset = file.rva_to_offset(row.rva)?;
            let Some(body_data) = file.data().get(offset..) else {
                return Err(out_of_bounds_error!());
            };
            let (raw, _) = MethodBody::read(body_data)?;
            let locals = if raw.local_var_sig_token.is_null() {
                Vec::new()
            } else {
                let row = resolver.check_row(raw.local_var_sig_token, module.stand_alone_sigs.len())?;
                parse_local_var_signature(&module.stand_alone_sigs[row as usize])?.locals
            };
            let body = decode_body(&raw, locals, &resolver).map_err(|error| {
                malformed_error!(
                    "Body of method {} - {}",
                    method_name(&strings, row.name),
                    error
                )
            })?;
            bodies.push((index, body));
        }
    }
    for (index, body) in bodies {
        if let Some(Some(method)) = module.methods.get_mut(index) {
            method.body = Some(body);
        }
    }
    for (index, rva) in foreign {
        if let Some(Some(method)) = module.methods.get_mut(index) {
            method.rva = rva;
        }
    }
    module.image = Some(BaseImage(file.data().into()));

    log::debug!(
        "Loaded module {} - {} types, {} methods, {} type references",
        module.name,
        module.types.len(),
        module.methods.len(),
        module.type_refs.len()
    );

    Ok(module)
}

fn method_name(strings: &Strings, index: u32) -> String {
    strings
        .get(index as usize)
        .map_or_else(|_| format!("#{index}"), str::to_string)
}
