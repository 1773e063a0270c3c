//! Raw row layouts of the supported tables (ECMA-335 II.22).
//!
//! Rows hold heap offsets and table indices exactly as stored; resolving them into names,
//! signatures and model handles is the job of [`crate::module`].

use crate::{
    file::io::{read_le_at, read_le_at_dyn, write_le, write_le_dyn},
    metadata::tables::{
        info::TableInfo,
        types::{CodedIndex, CodedIndexType, TableId},
    },
    Result,
};

/// A row type of one metadata table.
pub trait TableRow: Sized {
    /// The table this row belongs to
    const TABLE: TableId;

    /// Read one row at `offset`.
    ///
    /// # Errors
    /// Returns an error on truncated data or an invalid coded index.
    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self>;

    /// Append the row to `buffer`.
    ///
    /// # Errors
    /// Returns an error if a value does not fit its column.
    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()>;
}

fn read_str(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<u32> {
    read_le_at_dyn(data, offset, info.is_large_str())
}

fn read_blob(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<u32> {
    read_le_at_dyn(data, offset, info.is_large_blob())
}

fn read_guid(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<u32> {
    read_le_at_dyn(data, offset, info.is_large_guid())
}

fn read_index(data: &[u8], offset: &mut usize, info: &TableInfo, table: TableId) -> Result<u32> {
    read_le_at_dyn(data, offset, info.is_large(table))
}

fn read_coded(
    data: &[u8],
    offset: &mut usize,
    info: &TableInfo,
    ci_type: CodedIndexType,
) -> Result<CodedIndex> {
    let raw = read_le_at_dyn(data, offset, info.is_large_coded(ci_type))?;
    info.decode_coded_index(raw, ci_type)
}

fn write_coded(
    buffer: &mut Vec<u8>,
    info: &TableInfo,
    index: &CodedIndex,
    ci_type: CodedIndexType,
) -> Result<()> {
    let raw = info.encode_coded_index(index, ci_type)?;
    write_le_dyn(buffer, raw, info.is_large_coded(ci_type))
}

/// `Module` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleRaw {
    /// Reserved, zero
    pub generation: u16,
    /// `#Strings` index of the module name
    pub name: u32,
    /// `#GUID` index of the module version id
    pub mvid: u32,
    /// `#GUID` index, zero
    pub encid: u32,
    /// `#GUID` index, zero
    pub encbaseid: u32,
}

impl TableRow for ModuleRaw {
    const TABLE: TableId = TableId::Module;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(ModuleRaw {
            generation: read_le_at::<u16>(data, offset)?,
            name: read_str(data, offset, info)?,
            mvid: read_guid(data, offset, info)?,
            encid: read_guid(data, offset, info)?,
            encbaseid: read_guid(data, offset, info)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_le::<u16>(buffer, self.generation);
        write_le_dyn(buffer, self.name, info.is_large_str())?;
        write_le_dyn(buffer, self.mvid, info.is_large_guid())?;
        write_le_dyn(buffer, self.encid, info.is_large_guid())?;
        write_le_dyn(buffer, self.encbaseid, info.is_large_guid())
    }
}

/// `TypeRef` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeRefRaw {
    /// `ResolutionScope` coded index
    pub resolution_scope: CodedIndex,
    /// `#Strings` index of the type name
    pub type_name: u32,
    /// `#Strings` index of the namespace
    pub type_namespace: u32,
}

impl TableRow for TypeRefRaw {
    const TABLE: TableId = TableId::TypeRef;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(TypeRefRaw {
            resolution_scope: read_coded(data, offset, info, CodedIndexType::ResolutionScope)?,
            type_name: read_str(data, offset, info)?,
            type_namespace: read_str(data, offset, info)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_coded(
            buffer,
            info,
            &self.resolution_scope,
            CodedIndexType::ResolutionScope,
        )?;
        write_le_dyn(buffer, self.type_name, info.is_large_str())?;
        write_le_dyn(buffer, self.type_namespace, info.is_large_str())
    }
}

/// `TypeDef` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDefRaw {
    /// `TypeAttributes`
    pub flags: u32,
    /// `#Strings` index of the type name
    pub type_name: u32,
    /// `#Strings` index of the namespace
    pub type_namespace: u32,
    /// `TypeDefOrRef` coded index of the base type
    pub extends: CodedIndex,
    /// First row of this type's run in the `Field` table
    pub field_list: u32,
    /// First row of this type's run in the `MethodDef` table
    pub method_list: u32,
}

impl TableRow for TypeDefRaw {
    const TABLE: TableId = TableId::TypeDef;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(TypeDefRaw {
            flags: read_le_at::<u32>(data, offset)?,
            type_name: read_str(data, offset, info)?,
            type_namespace: read_str(data, offset, info)?,
            extends: read_coded(data, offset, info, CodedIndexType::TypeDefOrRef)?,
            field_list: read_index(data, offset, info, TableId::Field)?,
            method_list: read_index(data, offset, info, TableId::MethodDef)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_le::<u32>(buffer, self.flags);
        write_le_dyn(buffer, self.type_name, info.is_large_str())?;
        write_le_dyn(buffer, self.type_namespace, info.is_large_str())?;
        write_coded(buffer, info, &self.extends, CodedIndexType::TypeDefOrRef)?;
        write_le_dyn(buffer, self.field_list, info.is_large(TableId::Field))?;
        write_le_dyn(buffer, self.method_list, info.is_large(TableId::MethodDef))
    }
}

/// `Field` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldRaw {
    /// `FieldAttributes`
    pub flags: u16,
    /// `#Strings` index of the name
    pub name: u32,
    /// `#Blob` index of the field signature
    pub signature: u32,
}

impl TableRow for FieldRaw {
    const TABLE: TableId = TableId::Field;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(FieldRaw {
            flags: read_le_at::<u16>(data, offset)?,
            name: read_str(data, offset, info)?,
            signature: read_blob(data, offset, info)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_le::<u16>(buffer, self.flags);
        write_le_dyn(buffer, self.name, info.is_large_str())?;
        write_le_dyn(buffer, self.signature, info.is_large_blob())
    }
}

/// `MethodDef` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDefRaw {
    /// RVA of the body, 0 if the method has none
    pub rva: u32,
    /// `MethodImplAttributes`
    pub impl_flags: u16,
    /// `MethodAttributes`
    pub flags: u16,
    /// `#Strings` index of the name
    pub name: u32,
    /// `#Blob` index of the method signature
    pub signature: u32,
    /// First row of this method's run in the `Param` table
    pub param_list: u32,
}

impl TableRow for MethodDefRaw {
    const TABLE: TableId = TableId::MethodDef;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(MethodDefRaw {
            rva: read_le_at::<u32>(data, offset)?,
            impl_flags: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u16>(data, offset)?,
            name: read_str(data, offset, info)?,
            signature: read_blob(data, offset, info)?,
            param_list: read_index(data, offset, info, TableId::Param)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_le::<u32>(buffer, self.rva);
        write_le::<u16>(buffer, self.impl_flags);
        write_le::<u16>(buffer, self.flags);
        write_le_dyn(buffer, self.name, info.is_large_str())?;
        write_le_dyn(buffer, self.signature, info.is_large_blob())?;
        write_le_dyn(buffer, self.param_list, info.is_large(TableId::Param))
    }
}

/// `Param` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamRaw {
    /// `ParamAttributes`
    pub flags: u16,
    /// 0 for the return value, 1.. for parameters
    pub sequence: u16,
    /// `#Strings` index of the name
    pub name: u32,
}

impl TableRow for ParamRaw {
    const TABLE: TableId = TableId::Param;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(ParamRaw {
            flags: read_le_at::<u16>(data, offset)?,
            sequence: read_le_at::<u16>(data, offset)?,
            name: read_str(data, offset, info)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_le::<u16>(buffer, self.flags);
        write_le::<u16>(buffer, self.sequence);
        write_le_dyn(buffer, self.name, info.is_large_str())
    }
}

/// `MemberRef` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRefRaw {
    /// `MemberRefParent` coded index of the declaring type
    pub class: CodedIndex,
    /// `#Strings` index of the member name
    pub name: u32,
    /// `#Blob` index of the member signature
    pub signature: u32,
}

impl TableRow for MemberRefRaw {
    const TABLE: TableId = TableId::MemberRef;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(MemberRefRaw {
            class: read_coded(data, offset, info, CodedIndexType::MemberRefParent)?,
            name: read_str(data, offset, info)?,
            signature: read_blob(data, offset, info)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_coded(buffer, info, &self.class, CodedIndexType::MemberRefParent)?;
        write_le_dyn(buffer, self.name, info.is_large_str())?;
        write_le_dyn(buffer, self.signature, info.is_large_blob())
    }
}

/// `StandAloneSig` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StandAloneSigRaw {
    /// `#Blob` index of the signature
    pub signature: u32,
}

impl TableRow for StandAloneSigRaw {
    const TABLE: TableId = TableId::StandAloneSig;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(StandAloneSigRaw {
            signature: read_blob(data, offset, info)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_le_dyn(buffer, self.signature, info.is_large_blob())
    }
}

/// `ModuleRef` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleRefRaw {
    /// `#Strings` index of the module name
    pub name: u32,
}

impl TableRow for ModuleRefRaw {
    const TABLE: TableId = TableId::ModuleRef;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(ModuleRefRaw {
            name: read_str(data, offset, info)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_le_dyn(buffer, self.name, info.is_large_str())
    }
}

/// `TypeSpec` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeSpecRaw {
    /// `#Blob` index of the type signature
    pub signature: u32,
}

impl TableRow for TypeSpecRaw {
    const TABLE: TableId = TableId::TypeSpec;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(TypeSpecRaw {
            signature: read_blob(data, offset, info)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_le_dyn(buffer, self.signature, info.is_large_blob())
    }
}

/// `Assembly` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssemblyRaw {
    /// Hash algorithm id
    pub hash_alg_id: u32,
    /// Version major
    pub major_version: u16,
    /// Version minor
    pub minor_version: u16,
    /// Version build
    pub build_number: u16,
    /// Version revision
    pub revision_number: u16,
    /// `AssemblyFlags`
    pub flags: u32,
    /// `#Blob` index of the public key
    pub public_key: u32,
    /// `#Strings` index of the name
    pub name: u32,
    /// `#Strings` index of the culture
    pub culture: u32,
}

impl TableRow for AssemblyRaw {
    const TABLE: TableId = TableId::Assembly;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(AssemblyRaw {
            hash_alg_id: read_le_at::<u32>(data, offset)?,
            major_version: read_le_at::<u16>(data, offset)?,
            minor_version: read_le_at::<u16>(data, offset)?,
            build_number: read_le_at::<u16>(data, offset)?,
            revision_number: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u32>(data, offset)?,
            public_key: read_blob(data, offset, info)?,
            name: read_str(data, offset, info)?,
            culture: read_str(data, offset, info)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_le::<u32>(buffer, self.hash_alg_id);
        write_le::<u16>(buffer, self.major_version);
        write_le::<u16>(buffer, self.minor_version);
        write_le::<u16>(buffer, self.build_number);
        write_le::<u16>(buffer, self.revision_number);
        write_le::<u32>(buffer, self.flags);
        write_le_dyn(buffer, self.public_key, info.is_large_blob())?;
        write_le_dyn(buffer, self.name, info.is_large_str())?;
        write_le_dyn(buffer, self.culture, info.is_large_str())
    }
}

/// `AssemblyRef` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssemblyRefRaw {
    /// Version major
    pub major_version: u16,
    /// Version minor
    pub minor_version: u16,
    /// Version build
    pub build_number: u16,
    /// Version revision
    pub revision_number: u16,
    /// `AssemblyFlags`
    pub flags: u32,
    /// `#Blob` index of the public key or token
    pub public_key_or_token: u32,
    /// `#Strings` index of the name
    pub name: u32,
    /// `#Strings` index of the culture
    pub culture: u32,
    /// `#Blob` index of the hash value
    pub hash_value: u32,
}

impl TableRow for AssemblyRefRaw {
    const TABLE: TableId = TableId::AssemblyRef;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(AssemblyRefRaw {
            major_version: read_le_at::<u16>(data, offset)?,
            minor_version: read_le_at::<u16>(data, offset)?,
            build_number: read_le_at::<u16>(data, offset)?,
            revision_number: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u32>(data, offset)?,
            public_key_or_token: read_blob(data, offset, info)?,
            name: read_str(data, offset, info)?,
            culture: read_str(data, offset, info)?,
            hash_value: read_blob(data, offset, info)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_le::<u16>(buffer, self.major_version);
        write_le::<u16>(buffer, self.minor_version);
        write_le::<u16>(buffer, self.build_number);
        write_le::<u16>(buffer, self.revision_number);
        write_le::<u32>(buffer, self.flags);
        write_le_dyn(buffer, self.public_key_or_token, info.is_large_blob())?;
        write_le_dyn(buffer, self.name, info.is_large_str())?;
        write_le_dyn(buffer, self.culture, info.is_large_str())?;
        write_le_dyn(buffer, self.hash_value, info.is_large_blob())
    }
}

/// `MethodSpec` row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSpecRaw {
    /// `MethodDefOrRef` coded index of the generic method
    pub method: CodedIndex,
    /// `#Blob` index of the instantiation signature
    pub instantiation: u32,
}

impl TableRow for MethodSpecRaw {
    const TABLE: TableId = TableId::MethodSpec;

    fn read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
        Ok(MethodSpecRaw {
            method: read_coded(data, offset, info, CodedIndexType::MethodDefOrRef)?,
            instantiation: read_blob(data, offset, info)?,
        })
    }

    fn write(&self, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        write_coded(buffer, info, &self.method, CodedIndexType::MethodDefOrRef)?;
        write_le_dyn(buffer, self.instantiation, info.is_large_blob())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_def_small_columns() {
        let info = TableInfo::new(&[(TableId::MethodDef, 2), (TableId::Param, 1)], 0);
        let row = MethodDefRaw {
            rva: 4,
            impl_flags: 0,
            flags: 0x0096,
            name: 0x10,
            signature: 0x08,
            param_list: 1,
        };

        let mut buffer = Vec::new();
        row.write(&mut buffer, &info).unwrap();
        assert_eq!(buffer.len(), 4 + 2 + 2 + 2 + 2 + 2);

        let mut offset = 0;
        assert_eq!(MethodDefRaw::read(&buffer, &mut offset, &info).unwrap(), row);
        assert_eq!(offset, buffer.len());
    }

    #[test]
    fn type_ref_large_heaps() {
        let info = TableInfo::new(
            &[(TableId::TypeRef, 3), (TableId::AssemblyRef, 1)],
            crate::metadata::tables::info::HEAP_LARGE_STRINGS,
        );
        let row = TypeRefRaw {
            resolution_scope: CodedIndex::new(TableId::AssemblyRef, 1),
            type_name: 0x1_0000,
            type_namespace: 0x20,
        };

        let mut buffer = Vec::new();
        row.write(&mut buffer, &info).unwrap();
        // scope(2) + name(4) + namespace(4)
        assert_eq!(buffer.len(), 10);
        assert_eq!(&buffer[..2], &[(1 << 2) | 2, 0]);

        let mut offset = 0;
        assert_eq!(TypeRefRaw::read(&buffer, &mut offset, &info).unwrap(), row);
    }

    #[test]
    fn oversized_small_column_is_rejected() {
        let info = TableInfo::new(&[], 0);
        let row = ParamRaw {
            flags: 0,
            sequence: 1,
            name: 0x1_0000,
        };
        let mut buffer = Vec::new();
        assert!(row.write(&mut buffer, &info).is_err());
    }
}
