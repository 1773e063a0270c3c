//! Column layouts of the tables the module model does not decode (ECMA-335 II.22).
//!
//! Rows of these tables are kept as a list of column values and written back in the same
//! shape; only the references they hold are renumbered.

use crate::{
    file::io::{read_le_at, read_le_at_dyn, write_le, write_le_dyn},
    metadata::tables::{
        info::TableInfo,
        types::{CodedIndex, CodedIndexType, TableId},
    },
    Result,
};

/// One column of a retained table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Column {
    /// Two byte constant
    U16,
    /// Four byte constant
    U32,
    /// `#Strings` index
    Str,
    /// `#Blob` index
    Blob,
    /// Index of a single row of another table
    Index(TableId),
    /// First row of a run in another table, as in `PropertyMap.PropertyList`
    List(TableId),
    /// Coded index
    Coded(CodedIndexType),
}

impl TableId {
    /// Column layout of a retained table, empty for the modeled tables
    #[must_use]
    pub fn columns(self) -> &'static [Column] {
        use Column::{Blob, Coded, Index, List, Str, U16, U32};
        use CodedIndexType as Ci;
        match self {
            TableId::InterfaceImpl => &[Index(TableId::TypeDef), Coded(Ci::TypeDefOrRef)],
            // Type is one byte followed by a padding byte
            TableId::Constant => &[U16, Coded(Ci::HasConstant), Blob],
            TableId::CustomAttribute => &[
                Coded(Ci::HasCustomAttribute),
                Coded(Ci::CustomAttributeType),
                Blob,
            ],
            TableId::FieldMarshal => &[Coded(Ci::HasFieldMarshal), Blob],
            TableId::DeclSecurity => &[U16, Coded(Ci::HasDeclSecurity), Blob],
            TableId::ClassLayout => &[U16, U32, Index(TableId::TypeDef)],
            TableId::FieldLayout => &[U32, Index(TableId::Field)],
            TableId::EventMap => &[Index(TableId::TypeDef), List(TableId::Event)],
            TableId::Event => &[U16, Str, Coded(Ci::TypeDefOrRef)],
            TableId::PropertyMap => &[Index(TableId::TypeDef), List(TableId::Property)],
            TableId::Property => &[U16, Str, Blob],
            TableId::MethodSemantics => &[
                U16,
                Index(TableId::MethodDef),
                Coded(Ci::HasSemantics),
            ],
            TableId::MethodImpl => &[
                Index(TableId::TypeDef),
                Coded(Ci::MethodDefOrRef),
                Coded(Ci::MethodDefOrRef),
            ],
            TableId::ImplMap => &[
                U16,
                Coded(Ci::MemberForwarded),
                Str,
                Index(TableId::ModuleRef),
            ],
            TableId::FieldRVA => &[U32, Index(TableId::Field)],
            TableId::AssemblyProcessor => &[U32],
            TableId::AssemblyOS => &[U32, U32, U32],
            TableId::AssemblyRefProcessor => &[U32, Index(TableId::AssemblyRef)],
            TableId::AssemblyRefOS => &[U32, U32, U32, Index(TableId::AssemblyRef)],
            TableId::File => &[U32, Str, Blob],
            TableId::ExportedType => &[U32, U32, Str, Str, Coded(Ci::Implementation)],
            TableId::ManifestResource => &[U32, U32, Str, Coded(Ci::Implementation)],
            TableId::NestedClass => &[Index(TableId::TypeDef), Index(TableId::TypeDef)],
            TableId::GenericParam => &[U16, U16, Coded(Ci::TypeOrMethodDef), Str],
            TableId::GenericParamConstraint => {
                &[Index(TableId::GenericParam), Coded(Ci::TypeDefOrRef)]
            }
            _ => &[],
        }
    }

    /// Column whose value orders the rows of a table that must be sorted, if any
    #[must_use]
    pub fn sort_key(self) -> Option<usize> {
        match self {
            TableId::InterfaceImpl
            | TableId::CustomAttribute
            | TableId::FieldMarshal
            | TableId::MethodImpl
            | TableId::NestedClass
            | TableId::GenericParamConstraint => Some(0),
            TableId::Constant
            | TableId::DeclSecurity
            | TableId::FieldLayout
            | TableId::ImplMap
            | TableId::FieldRVA => Some(1),
            TableId::ClassLayout | TableId::MethodSemantics | TableId::GenericParam => Some(2),
            _ => None,
        }
    }
}

/// `sorted` mask of the tables header: the tables ECMA-335 II.22 requires in key order
pub const SORTED_TABLES: u64 = 0x0000_1600_3301_FA00;

/// A row of a retained table.
///
/// Heap and row indices are kept as stored. A coded index is kept as the token it names, so
/// the row does not depend on the column sizing of the stream it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetainedRaw {
    /// One value per column of [`TableId::columns`]
    pub values: Vec<u32>,
}

impl RetainedRaw {
    /// Read one row of `table` at `offset`.
    ///
    /// # Errors
    /// Returns an error on truncated data or an invalid coded index.
    pub fn read(
        table: TableId,
        data: &[u8],
        offset: &mut usize,
        info: &TableInfo,
    ) -> Result<RetainedRaw> {
        let columns = table.columns();
        if columns.is_empty() {
            return Err(malformed_error!("Table {} has no retained layout", table));
        }

        let mut values = Vec::with_capacity(columns.len());
        for column in columns {
            let value = match column {
                Column::U16 => u32::from(read_le_at::<u16>(data, offset)?),
                Column::U32 => read_le_at::<u32>(data, offset)?,
                Column::Str => read_le_at_dyn(data, offset, info.is_large_str())?,
                Column::Blob => read_le_at_dyn(data, offset, info.is_large_blob())?,
                Column::Index(target) | Column::List(target) => {
                    read_le_at_dyn(data, offset, info.is_large(*target))?
                }
                Column::Coded(ci_type) => {
                    let raw = read_le_at_dyn(data, offset, info.is_large_coded(*ci_type))?;
                    info.decode_coded_index(raw, *ci_type)?.token().value()
                }
            };
            values.push(value);
        }
        Ok(RetainedRaw { values })
    }

    /// Append the row, laid out as `table`, to `buffer`.
    ///
    /// # Errors
    /// Returns an error if a value does not fit its column or a token can not be coded.
    pub fn write(&self, table: TableId, buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
        let columns = table.columns();
        if columns.len() != self.values.len() {
            return Err(malformed_error!(
                "Row of {} has {} values for {} columns",
                table,
                self.values.len(),
                columns.len()
            ));
        }

        for (column, value) in columns.iter().zip(&self.values) {
            match column {
                Column::U16 => {
                    let Ok(value) = u16::try_from(*value) else {
                        return Err(malformed_error!("Value {} of {} exceeds u16", value, table));
                    };
                    write_le::<u16>(buffer, value);
                }
                Column::U32 => write_le::<u32>(buffer, *value),
                Column::Str => write_le_dyn(buffer, *value, info.is_large_str())?,
                Column::Blob => write_le_dyn(buffer, *value, info.is_large_blob())?,
                Column::Index(target) | Column::List(target) => {
                    write_le_dyn(buffer, *value, info.is_large(*target))?;
                }
                Column::Coded(ci_type) => {
                    let token = crate::metadata::token::Token::new(*value);
                    let Some(target) = TableId::from_u8(token.table()) else {
                        return Err(malformed_error!("Token {} names no table", token));
                    };
                    let raw = info.encode_coded_index(&CodedIndex::new(target, token.row()), *ci_type)?;
                    write_le_dyn(buffer, raw, info.is_large_coded(*ci_type))?;
                }
            }
        }
        Ok(())
    }
}
