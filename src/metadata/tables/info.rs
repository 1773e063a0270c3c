use strum::{EnumCount, IntoEnumIterator};

use crate::{
    metadata::tables::types::{CodedIndex, CodedIndexType, TableId},
    Result,
};

/// Heap size flag for `#Strings` in the tables header
pub const HEAP_LARGE_STRINGS: u8 = 0x01;
/// Heap size flag for `#GUID` in the tables header
pub const HEAP_LARGE_GUID: u8 = 0x02;
/// Heap size flag for `#Blob` in the tables header
pub const HEAP_LARGE_BLOB: u8 = 0x04;

/// Column sizing for the tables stream.
///
/// Index columns are 2 bytes wide unless the referenced heap or table is too large for that,
/// in which case they are 4 bytes wide (ECMA-335 II.24.2.6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableInfo {
    rows: [u32; 64],
    coded_index_large: [bool; CodedIndexType::COUNT],
    heap_sizes: u8,
}

impl TableInfo {
    /// Build the sizing from per-table row counts and the heap size flags.
    #[must_use]
    pub fn new(row_counts: &[(TableId, u32)], heap_sizes: u8) -> Self {
        let mut rows = [0u32; 64];
        for (table, count) in row_counts {
            rows[*table as usize] = *count;
        }

        let mut coded_index_large = [false; CodedIndexType::COUNT];
        for ci_type in CodedIndexType::iter() {
            let max_rows = ci_type
                .tables()
                .iter()
                .map(|table| rows[*table as usize])
                .max()
                .unwrap_or(0);
            coded_index_large[ci_type as usize] = max_rows >= 1 << (16 - ci_type.tag_bits());
        }

        TableInfo {
            rows,
            coded_index_large,
            heap_sizes,
        }
    }

    /// Heap size flags as stored in the tables header
    #[must_use]
    pub fn heap_sizes(&self) -> u8 {
        self.heap_sizes
    }

    /// Number of rows in `table`
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.rows[table as usize]
    }

    /// True if indices into `table` are 4 bytes wide
    #[must_use]
    pub fn is_large(&self, table: TableId) -> bool {
        self.rows[table as usize] > u32::from(u16::MAX)
    }

    /// True if `#Strings` indices are 4 bytes wide
    #[must_use]
    pub fn is_large_str(&self) -> bool {
        self.heap_sizes & HEAP_LARGE_STRINGS != 0
    }

    /// True if `#GUID` indices are 4 bytes wide
    #[must_use]
    pub fn is_large_guid(&self) -> bool {
        self.heap_sizes & HEAP_LARGE_GUID != 0
    }

    /// True if `#Blob` indices are 4 bytes wide
    #[must_use]
    pub fn is_large_blob(&self) -> bool {
        self.heap_sizes & HEAP_LARGE_BLOB != 0
    }

    /// True if coded indices of `ci_type` are 4 bytes wide
    #[must_use]
    pub fn is_large_coded(&self, ci_type: CodedIndexType) -> bool {
        self.coded_index_large[ci_type as usize]
    }

    /// Split a raw coded index into table and row.
    ///
    /// # Errors
    /// Returns an error if the tag does not name a table of `ci_type`.
    pub fn decode_coded_index(&self, value: u32, ci_type: CodedIndexType) -> Result<CodedIndex> {
        let bits = ci_type.tag_bits();
        let tag = value & ((1 << bits) - 1);
        let Some(table) = ci_type.table_of(tag) else {
            return Err(malformed_error!(
                "Invalid tag {} for coded index {:?}",
                tag,
                ci_type
            ));
        };

        Ok(CodedIndex::new(table, value >> bits))
    }

    /// Combine table and row into a raw coded index.
    ///
    /// # Errors
    /// Returns an error if the table is not addressable by `ci_type`.
    pub fn encode_coded_index(&self, index: &CodedIndex, ci_type: CodedIndexType) -> Result<u32> {
        let Some(tag) = ci_type.tag_of(index.tag) else {
            return Err(malformed_error!(
                "Table {} can not be referenced by {:?}",
                index.tag,
                ci_type
            ));
        };

        Ok((index.row << ci_type.tag_bits()) | tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_and_large_columns() {
        let info = TableInfo::new(&[(TableId::TypeDef, 10), (TableId::MethodDef, 70_000)], 0);
        assert!(!info.is_large(TableId::TypeDef));
        assert!(info.is_large(TableId::MethodDef));
        assert!(!info.is_large_str());
        assert!(!info.is_large_coded(CodedIndexType::TypeDefOrRef));
        assert!(info.is_large_coded(CodedIndexType::MethodDefOrRef));
        assert!(info.is_large_coded(CodedIndexType::MemberRefParent));

        let info = TableInfo::new(&[(TableId::TypeRef, 1 << 14)], HEAP_LARGE_BLOB);
        assert!(info.is_large_coded(CodedIndexType::TypeDefOrRef));
        assert!(info.is_large_blob());
        assert!(!info.is_large_guid());
    }

    #[test]
    fn coded_index_roundtrip() {
        let info = TableInfo::new(&[], 0);
        let index = CodedIndex::new(TableId::TypeRef, 5);
        let raw = info
            .encode_coded_index(&index, CodedIndexType::MemberRefParent)
            .unwrap();
        assert_eq!(raw, (5 << 3) | 1);
        assert_eq!(
            info.decode_coded_index(raw, CodedIndexType::MemberRefParent)
                .unwrap(),
            index
        );

        assert!(info
            .encode_coded_index(&CodedIndex::new(TableId::Field, 1), CodedIndexType::TypeDefOrRef)
            .is_err());
        assert!(info
            .decode_coded_index(0x3, CodedIndexType::TypeDefOrRef)
            .is_err());
    }

    #[test]
    fn custom_attribute_constructor_tags() {
        let info = TableInfo::new(&[(TableId::MemberRef, 4)], 0);
        let ctor = CodedIndex::new(TableId::MemberRef, 4);
        let raw = info
            .encode_coded_index(&ctor, CodedIndexType::CustomAttributeType)
            .unwrap();
        assert_eq!(raw, (4 << 3) | 3);
        assert_eq!(
            info.decode_coded_index(raw, CodedIndexType::CustomAttributeType)
                .unwrap(),
            ctor
        );
        assert!(info
            .decode_coded_index(1 << 3, CodedIndexType::CustomAttributeType)
            .is_err());
    }

    #[test]
    fn custom_attribute_parents_widen_early() {
        // five tag bits leave 11 bits for the row
        let info = TableInfo::new(&[(TableId::Param, 1 << 11)], 0);
        assert!(info.is_large_coded(CodedIndexType::HasCustomAttribute));
        assert!(!info.is_large_coded(CodedIndexType::HasFieldMarshal));
    }
}
