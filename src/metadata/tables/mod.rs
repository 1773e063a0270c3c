//! The `#~` tables stream.
//!
//! [`TablesStream`] holds the raw rows of every table of a compressed stream. The tables the
//! module model decodes get typed rows; every other table is kept as [`RetainedRaw`] rows laid
//! out by [`Column`]. Reading validates the header and sizes every column through
//! [`TableInfo`]; writing recomputes the sizing from the current row counts, so a stream can
//! grow past the 2-byte index limits without the caller noticing.

mod info;
mod rows;
mod schema;
mod types;

pub use info::{TableInfo, HEAP_LARGE_BLOB, HEAP_LARGE_GUID, HEAP_LARGE_STRINGS};
pub use rows::*;
pub use schema::{Column, RetainedRaw, SORTED_TABLES};
pub use types::{CodedIndex, CodedIndexType, TableId};

use std::collections::BTreeMap;

use strum::IntoEnumIterator;

use crate::{
    file::io::{pad_to, read_le_at, write_le},
    Result,
};

/// Raw content of the `#~` stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TablesStream {
    /// Heap size flags from the header
    pub heap_sizes: u8,
    /// `sorted` mask from the header
    pub sorted: u64,
    /// `Module` rows
    pub modules: Vec<ModuleRaw>,
    /// `TypeRef` rows
    pub type_refs: Vec<TypeRefRaw>,
    /// `TypeDef` rows
    pub type_defs: Vec<TypeDefRaw>,
    /// `Field` rows
    pub fields: Vec<FieldRaw>,
    /// `MethodDef` rows
    pub method_defs: Vec<MethodDefRaw>,
    /// `Param` rows
    pub params: Vec<ParamRaw>,
    /// `MemberRef` rows
    pub member_refs: Vec<MemberRefRaw>,
    /// `StandAloneSig` rows
    pub stand_alone_sigs: Vec<StandAloneSigRaw>,
    /// `ModuleRef` rows
    pub module_refs: Vec<ModuleRefRaw>,
    /// `TypeSpec` rows
    pub type_specs: Vec<TypeSpecRaw>,
    /// `Assembly` rows
    pub assemblies: Vec<AssemblyRaw>,
    /// `AssemblyRef` rows
    pub assembly_refs: Vec<AssemblyRefRaw>,
    /// `MethodSpec` rows
    pub method_specs: Vec<MethodSpecRaw>,
    /// Rows of the tables without a typed layout, by table
    pub retained: BTreeMap<TableId, Vec<RetainedRaw>>,
}

fn check_count(data: &[u8], offset: usize, info: &TableInfo, table: TableId) -> Result<usize> {
    let count = info.rows(table) as usize;
    // Every row is at least two bytes, reject counts the data can not hold
    if count > data.len().saturating_sub(offset) / 2 + 1 {
        return Err(malformed_error!(
            "Row count {} of table {} exceeds the stream",
            count,
            table
        ));
    }
    Ok(count)
}

fn read_rows<T: TableRow>(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Vec<T>> {
    let count = check_count(data, *offset, info, T::TABLE)?;
    let mut rows = Vec::with_capacity(count);
    for _ in 0..count {
        rows.push(T::read(data, offset, info)?);
    }
    Ok(rows)
}

fn read_retained(
    table: TableId,
    data: &[u8],
    offset: &mut usize,
    info: &TableInfo,
) -> Result<Vec<RetainedRaw>> {
    let count = check_count(data, *offset, info, table)?;
    let mut rows = Vec::with_capacity(count);
    for _ in 0..count {
        rows.push(RetainedRaw::read(table, data, offset, info)?);
    }
    Ok(rows)
}

fn write_rows<T: TableRow>(rows: &[T], buffer: &mut Vec<u8>, info: &TableInfo) -> Result<()> {
    for row in rows {
        row.write(buffer, info)?;
    }
    Ok(())
}

impl TablesStream {
    /// Parse the `#~` stream.
    ///
    /// # Errors
    /// Returns an error for a truncated stream, a table that only exists in uncompressed
    /// streams, or invalid rows.
    pub fn read(data: &[u8]) -> Result<TablesStream> {
        let mut offset = 4;
        let major = read_le_at::<u8>(data, &mut offset)?;
        let _minor = read_le_at::<u8>(data, &mut offset)?;
        if major != 2 {
            return Err(malformed_error!("Unsupported tables stream version {}", major));
        }
        let heap_sizes = read_le_at::<u8>(data, &mut offset)?;
        offset += 1;
        let valid = read_le_at::<u64>(data, &mut offset)?;
        let sorted = read_le_at::<u64>(data, &mut offset)?;

        let mut row_counts = Vec::new();
        for bit in 0..64u8 {
            if valid & (1u64 << bit) == 0 {
                continue;
            }
            let Some(table) = TableId::from_u8(bit) else {
                return Err(malformed_error!("Unsupported metadata table 0x{:02X}", bit));
            };
            row_counts.push((table, read_le_at::<u32>(data, &mut offset)?));
        }

        let info = TableInfo::new(&row_counts, heap_sizes);
        let mut tables = TablesStream {
            heap_sizes,
            sorted,
            ..TablesStream::default()
        };
        let offset = &mut offset;
        for (table, _) in &row_counts {
            match table {
                TableId::Module => tables.modules = read_rows(data, offset, &info)?,
                TableId::TypeRef => tables.type_refs = read_rows(data, offset, &info)?,
                TableId::TypeDef => tables.type_defs = read_rows(data, offset, &info)?,
                TableId::Field => tables.fields = read_rows(data, offset, &info)?,
                TableId::MethodDef => tables.method_defs = read_rows(data, offset, &info)?,
                TableId::Param => tables.params = read_rows(data, offset, &info)?,
                TableId::MemberRef => tables.member_refs = read_rows(data, offset, &info)?,
                TableId::StandAloneSig => {
                    tables.stand_alone_sigs = read_rows(data, offset, &info)?;
                }
                TableId::ModuleRef => tables.module_refs = read_rows(data, offset, &info)?,
                TableId::TypeSpec => tables.type_specs = read_rows(data, offset, &info)?,
                TableId::Assembly => tables.assemblies = read_rows(data, offset, &info)?,
                TableId::AssemblyRef => tables.assembly_refs = read_rows(data, offset, &info)?,
                TableId::MethodSpec => tables.method_specs = read_rows(data, offset, &info)?,
                other => {
                    let rows = read_retained(*other, data, offset, &info)?;
                    tables.retained.insert(*other, rows);
                }
            }
        }
        Ok(tables)
    }

    /// Rows of a retained table, empty if the table is absent
    #[must_use]
    pub fn retained(&self, table: TableId) -> &[RetainedRaw] {
        self.retained.get(&table).map_or(&[], Vec::as_slice)
    }

    /// Number of rows in `table`
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        let count = match table {
            TableId::Module => self.modules.len(),
            TableId::TypeRef => self.type_refs.len(),
            TableId::TypeDef => self.type_defs.len(),
            TableId::Field => self.fields.len(),
            TableId::MethodDef => self.method_defs.len(),
            TableId::Param => self.params.len(),
            TableId::MemberRef => self.member_refs.len(),
            TableId::StandAloneSig => self.stand_alone_sigs.len(),
            TableId::ModuleRef => self.module_refs.len(),
            TableId::TypeSpec => self.type_specs.len(),
            TableId::Assembly => self.assemblies.len(),
            TableId::AssemblyRef => self.assembly_refs.len(),
            TableId::MethodSpec => self.method_specs.len(),
            other => self.retained(other).len(),
        };
        #[allow(clippy::cast_possible_truncation)]
        let count = count as u32;
        count
    }

    /// Column sizing for the current row counts
    #[must_use]
    pub fn info(&self) -> TableInfo {
        let counts: Vec<(TableId, u32)> = TableId::iter()
            .map(|table| (table, self.row_count(table)))
            .collect();
        TableInfo::new(&counts, self.heap_sizes)
    }

    /// Serialize the stream, padded to 4 bytes.
    ///
    /// # Errors
    /// Returns an error if a row does not fit its columns.
    pub fn write(&self) -> Result<Vec<u8>> {
        let info = self.info();

        let mut valid = 0u64;
        for table in TableId::iter() {
            if self.row_count(table) > 0 {
                valid |= 1u64 << (table as u8);
            }
        }

        let mut buffer = Vec::new();
        write_le::<u32>(&mut buffer, 0);
        write_le::<u8>(&mut buffer, 2);
        write_le::<u8>(&mut buffer, 0);
        write_le::<u8>(&mut buffer, self.heap_sizes);
        write_le::<u8>(&mut buffer, 1);
        write_le::<u64>(&mut buffer, valid);
        write_le::<u64>(&mut buffer, self.sorted);
        for table in TableId::iter() {
            let count = self.row_count(table);
            if count > 0 {
                write_le::<u32>(&mut buffer, count);
            }
        }

        for table in TableId::iter() {
            let buffer = &mut buffer;
            match table {
                TableId::Module => write_rows(&self.modules, buffer, &info)?,
                TableId::TypeRef => write_rows(&self.type_refs, buffer, &info)?,
                TableId::TypeDef => write_rows(&self.type_defs, buffer, &info)?,
                TableId::Field => write_rows(&self.fields, buffer, &info)?,
                TableId::MethodDef => write_rows(&self.method_defs, buffer, &info)?,
                TableId::Param => write_rows(&self.params, buffer, &info)?,
                TableId::MemberRef => write_rows(&self.member_refs, buffer, &info)?,
                TableId::StandAloneSig => write_rows(&self.stand_alone_sigs, buffer, &info)?,
                TableId::ModuleRef => write_rows(&self.module_refs, buffer, &info)?,
                TableId::TypeSpec => write_rows(&self.type_specs, buffer, &info)?,
                TableId::Assembly => write_rows(&self.assemblies, buffer, &info)?,
                TableId::AssemblyRef => write_rows(&self.assembly_refs, buffer, &info)?,
                TableId::MethodSpec => write_rows(&self.method_specs, buffer, &info)?,
                other => {
                    for row in self.retained(other) {
                        row.write(other, buffer, &info)?;
                    }
                }
            }
        }

        pad_to(&mut buffer, 4);
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TablesStream {
        TablesStream {
            modules: vec![ModuleRaw {
                generation: 0,
                name: 1,
                mvid: 1,
                encid: 0,
                encbaseid: 0,
            }],
            type_refs: vec![TypeRefRaw {
                resolution_scope: CodedIndex::new(TableId::AssemblyRef, 1),
                type_name: 10,
                type_namespace: 20,
            }],
            type_defs: vec![TypeDefRaw {
                flags: 0,
                type_name: 30,
                type_namespace: 0,
                extends: CodedIndex::new(TableId::TypeRef, 1),
                field_list: 1,
                method_list: 1,
            }],
            method_defs: vec![MethodDefRaw {
                rva: 4,
                impl_flags: 0,
                flags: 0x0081,
                name: 40,
                signature: 1,
                param_list: 1,
            }],
            assembly_refs: vec![AssemblyRefRaw {
                major_version: 4,
                minor_version: 0,
                build_number: 0,
                revision_number: 0,
                flags: 0,
                public_key_or_token: 0,
                name: 50,
                culture: 0,
                hash_value: 0,
            }],
            ..TablesStream::default()
        }
    }

    #[test]
    fn write_then_read() {
        let tables = sample();
        let data = tables.write().unwrap();
        assert_eq!(data.len() % 4, 0);

        let parsed = TablesStream::read(&data).unwrap();
        assert_eq!(parsed, tables);
        assert_eq!(parsed.row_count(TableId::MethodDef), 1);
        assert_eq!(parsed.row_count(TableId::Field), 0);
    }

    #[test]
    fn retained_tables_keep_their_rows() {
        let mut tables = sample();
        tables.sorted = SORTED_TABLES;
        tables.retained.insert(
            TableId::CustomAttribute,
            vec![RetainedRaw {
                values: vec![
                    TableId::TypeDef.token(1).value(),
                    TableId::MethodDef.token(1).value(),
                    0x0A,
                ],
            }],
        );
        tables.retained.insert(
            TableId::NestedClass,
            vec![RetainedRaw { values: vec![1, 1] }],
        );

        let data = tables.write().unwrap();
        let parsed = TablesStream::read(&data).unwrap();
        assert_eq!(parsed, tables);
        assert_eq!(parsed.row_count(TableId::CustomAttribute), 1);
        assert_eq!(parsed.retained(TableId::NestedClass)[0].values, vec![1, 1]);
        assert!(parsed.retained(TableId::Event).is_empty());
    }

    #[test]
    fn rejects_uncompressed_only_tables() {
        let mut data = sample().write().unwrap();
        // Set the MethodPtr (0x05) bit in the valid mask
        data[8] |= 0x20;
        assert!(TablesStream::read(&data).is_err());
    }

    #[test]
    fn rejects_truncated_stream() {
        let data = sample().write().unwrap();
        assert!(TablesStream::read(&data[..data.len() - 12]).is_err());
        assert!(TablesStream::read(&data[..10]).is_err());
    }
}
