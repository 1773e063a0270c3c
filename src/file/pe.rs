//! The PE container around the metadata.
//!
//! [`PeLayout`] is the part of goblin's PE parse the crate needs after loading: header offsets,
//! alignments, the CLR data directory and the section table. It owns its data, so a [`super::File`]
//! does not borrow from its backend.
//!
//! Writing never moves existing sections. [`PeLayout::plan_section`] finds the place for one
//! more section after the last one, and [`emit_section`] produces the image with that section
//! appended and the headers that describe it updated.

use goblin::pe::{section_table::SectionTable, PE};

use crate::{
    file::io::{align_to, patch_u16, patch_u32, read_le_at},
    Error::GoblinErr,
    Result,
};

/// Size of a section table entry
const SECTION_HEADER_SIZE: usize = 40;
/// Index of the certificate table in the data directories
const CERTIFICATE_DIRECTORY: usize = 4;
/// Index of the CLR runtime header in the data directories
const CLR_DIRECTORY: usize = 14;

/// Header offsets, alignments and sections of a PE image.
#[derive(Clone, Debug)]
pub struct PeLayout {
    /// Offset of the `PE\0\0` signature
    pub pe_offset: usize,
    /// Offset of the optional header
    pub optional_header_offset: usize,
    /// Offset of the first section header
    pub section_table_offset: usize,
    /// True for PE32+ images
    pub pe32_plus: bool,
    /// `FileAlignment`
    pub file_alignment: u32,
    /// `SectionAlignment`
    pub section_alignment: u32,
    /// `SizeOfHeaders`, the room available for section headers
    pub size_of_headers: u32,
    /// RVA of the CLR runtime header
    pub clr_rva: u32,
    /// Size of the CLR runtime header
    pub clr_size: u32,
    /// Section headers in table order
    pub sections: Vec<SectionTable>,
}

/// Where a new section goes, as decided by [`PeLayout::plan_section`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionPlan {
    /// Index of the new section header; sections from here on are dropped
    pub index: usize,
    /// RVA of the new section
    pub rva: u32,
    /// File offset of the new section
    pub pointer: u32,
}

impl PeLayout {
    /// Parse the headers of a PE image that carries a CLR runtime header.
    ///
    /// # Errors
    /// Returns [`crate::Error::GoblinErr`] if goblin rejects the image, or
    /// [`crate::Error::Malformed`] if it is not a managed image.
    pub fn parse(data: &[u8]) -> Result<PeLayout> {
        let pe = PE::parse(data).map_err(GoblinErr)?;
        let Some(optional_header) = pe.header.optional_header else {
            return Err(malformed_error!("File does not have an OptionalHeader"));
        };
        let (clr_rva, clr_size) = match optional_header
            .data_directories
            .get_clr_runtime_header()
            .as_ref()
        {
            Some(dir) if dir.virtual_address != 0 => (dir.virtual_address, dir.size),
            _ => {
                return Err(malformed_error!(
                    "File does not have a CLR runtime header directory"
                ))
            }
        };

        let pe_offset = pe.header.dos_header.pe_pointer as usize;
        let optional_header_offset = pe_offset + 24;
        Ok(PeLayout {
            pe_offset,
            optional_header_offset,
            section_table_offset: optional_header_offset
                + pe.header.coff_header.size_of_optional_header as usize,
            pe32_plus: optional_header.standard_fields.magic != 0x10b,
            file_alignment: optional_header.windows_fields.file_alignment,
            section_alignment: optional_header.windows_fields.section_alignment,
            size_of_headers: optional_header.windows_fields.size_of_headers,
            clr_rva,
            clr_size,
            sections: pe.sections,
        })
    }

    /// Convert an RVA to a file offset.
    ///
    /// # Errors
    /// Returns an error if no section holds file data for `rva`.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        for section in &self.sections {
            let extent = section.virtual_size.max(section.size_of_raw_data);
            let Some(section_max) = section.virtual_address.checked_add(extent) else {
                return Err(malformed_error!(
                    "Section malformed, causing integer overflow - {} + {}",
                    section.virtual_address,
                    extent
                ));
            };
            if section.virtual_address <= rva && rva < section_max {
                let delta = rva - section.virtual_address;
                if delta >= section.size_of_raw_data {
                    return Err(malformed_error!("RVA {:#x} is not backed by file data", rva));
                }
                return Ok((section.pointer_to_raw_data + delta) as usize);
            }
        }

        Err(malformed_error!(
            "RVA could not be converted to offset - {:#x}",
            rva
        ))
    }

    /// Offset of the data directory table in the optional header
    #[must_use]
    pub fn data_directories_offset(&self) -> usize {
        self.optional_header_offset + if self.pe32_plus { 112 } else { 96 }
    }

    /// Place a section named `name` after every other section.
    ///
    /// A trailing section with the same name is replaced, so writing an image this crate
    /// produced does not grow its section table.
    ///
    /// # Errors
    /// Returns an error if the headers have no room for one more section header.
    pub fn plan_section(&self, name: [u8; 8]) -> Result<SectionPlan> {
        let index = match self.sections.last() {
            Some(last) if last.name == name => self.sections.len() - 1,
            _ => self.sections.len(),
        };
        let kept = &self.sections[..index];

        let header_end = self.section_table_offset + (index + 1) * SECTION_HEADER_SIZE;
        let first_data = kept
            .iter()
            .filter(|section| section.size_of_raw_data != 0)
            .map(|section| section.pointer_to_raw_data as usize)
            .min()
            .unwrap_or(usize::MAX);
        if header_end > self.size_of_headers as usize || header_end > first_data {
            return Err(malformed_error!(
                "No room for another section header - table would end at {:#x}",
                header_end
            ));
        }

        let virtual_end = kept
            .iter()
            .map(|s| s.virtual_address as usize + s.virtual_size.max(s.size_of_raw_data) as usize)
            .max()
            .unwrap_or(self.size_of_headers as usize);
        let raw_end = kept
            .iter()
            .map(|s| s.pointer_to_raw_data as usize + s.size_of_raw_data as usize)
            .max()
            .unwrap_or(0)
            .max(self.size_of_headers as usize);

        let rva = align_to(virtual_end, self.section_alignment as usize);
        let pointer = align_to(raw_end, self.file_alignment as usize);
        let (Ok(rva), Ok(pointer)) = (u32::try_from(rva), u32::try_from(pointer)) else {
            return Err(malformed_error!("Image exceeds 4 GiB"));
        };
        Ok(SectionPlan {
            index,
            rva,
            pointer,
        })
    }
}

/// Build an image from the headers and kept sections of `base` plus one new section.
///
/// Anything `base` holds past the kept sections is dropped, including an overlay and a
/// certificate table, which would no longer match the content.
///
/// # Errors
/// Returns an error if the headers of `base` can not be patched.
pub fn emit_section(
    base: &[u8],
    layout: &PeLayout,
    plan: &SectionPlan,
    name: [u8; 8],
    characteristics: u32,
    content: &[u8],
) -> Result<Vec<u8>> {
    let pointer = plan.pointer as usize;
    let mut image = base[..pointer.min(base.len())].to_vec();
    image.resize(pointer, 0);
    image.extend_from_slice(content);
    let raw_size = align_to(content.len(), layout.file_alignment as usize);
    image.resize(pointer + raw_size, 0);

    #[allow(clippy::cast_possible_truncation)]
    let (virtual_size, raw_size) = (content.len() as u32, raw_size as u32);
    let header = layout.section_table_offset + plan.index * SECTION_HEADER_SIZE;
    image[header..header + 8].copy_from_slice(&name);
    patch_u32(&mut image, header + 8, virtual_size)?;
    patch_u32(&mut image, header + 12, plan.rva)?;
    patch_u32(&mut image, header + 16, raw_size)?;
    patch_u32(&mut image, header + 20, plan.pointer)?;
    image[header + 24..header + 36].fill(0);
    patch_u32(&mut image, header + 36, characteristics)?;

    #[allow(clippy::cast_possible_truncation)]
    patch_u16(&mut image, layout.pe_offset + 6, (plan.index + 1) as u16)?;

    let size_of_image = align_to(
        plan.rva as usize + content.len(),
        layout.section_alignment as usize,
    );
    let Ok(size_of_image) = u32::try_from(size_of_image) else {
        return Err(malformed_error!("Image exceeds 4 GiB"));
    };
    patch_u32(&mut image, layout.optional_header_offset + 56, size_of_image)?;
    patch_u32(&mut image, layout.optional_header_offset + 64, 0)?;

    let certificate = layout.data_directories_offset() + CERTIFICATE_DIRECTORY * 8;
    let mut offset = certificate;
    let certificate_start = read_le_at::<u32>(&image, &mut offset)?;
    if certificate_start != 0 && certificate_start >= plan.pointer {
        patch_u32(&mut image, certificate, 0)?;
        patch_u32(&mut image, certificate + 4, 0)?;
    }

    Ok(image)
}

/// A minimal PE32 library with an empty `.text` section holding a CLR runtime header.
///
/// Modules built from scratch are written on top of this image. The CLR header names no
/// metadata until the writer patches it.
#[must_use]
pub fn skeleton() -> Vec<u8> {
    use crate::metadata::cor20header::{Cor20Header, COMIMAGE_FLAGS_ILONLY, COR20_SIZE};

    let mut image = vec![0u8; 0x400];
    let mut put = |offset: usize, bytes: &[u8]| {
        image[offset..offset + bytes.len()].copy_from_slice(bytes);
    };

    put(0x00, b"MZ");
    put(0x3C, &0x80u32.to_le_bytes());
    put(0x80, b"PE\0\0");

    // COFF header
    put(0x84, &0x014Cu16.to_le_bytes());
    put(0x86, &1u16.to_le_bytes());
    put(0x94, &0x00E0u16.to_le_bytes());
    put(0x96, &0x2102u16.to_le_bytes());

    // Optional header, standard fields
    put(0x98, &0x010Bu16.to_le_bytes());
    put(0x9A, &[8, 0]);
    put(0x9C, &0x200u32.to_le_bytes());
    put(0xAC, &0x2000u32.to_le_bytes());

    // Windows fields
    put(0xB4, &0x1000_0000u32.to_le_bytes());
    put(0xB8, &0x2000u32.to_le_bytes());
    put(0xBC, &0x200u32.to_le_bytes());
    put(0xC0, &4u16.to_le_bytes());
    put(0xC8, &4u16.to_le_bytes());
    put(0xD0, &0x4000u32.to_le_bytes());
    put(0xD4, &0x200u32.to_le_bytes());
    put(0xDC, &3u16.to_le_bytes());
    put(0xDE, &0x8540u16.to_le_bytes());
    put(0xE0, &0x0010_0000u32.to_le_bytes());
    put(0xE4, &0x1000u32.to_le_bytes());
    put(0xE8, &0x0010_0000u32.to_le_bytes());
    put(0xEC, &0x1000u32.to_le_bytes());
    put(0xF4, &16u32.to_le_bytes());

    // Data directories
    let clr = 0xF8 + CLR_DIRECTORY * 8;
    put(clr, &0x2000u32.to_le_bytes());
    #[allow(clippy::cast_possible_truncation)]
    put(clr + 4, &(COR20_SIZE as u32).to_le_bytes());

    // .text
    put(0x178, b".text\0\0\0");
    #[allow(clippy::cast_possible_truncation)]
    put(0x180, &(COR20_SIZE as u32).to_le_bytes());
    put(0x184, &0x2000u32.to_le_bytes());
    put(0x188, &0x200u32.to_le_bytes());
    put(0x18C, &0x200u32.to_le_bytes());
    put(0x19C, &0x6000_0020u32.to_le_bytes());

    let mut cor20 = Vec::with_capacity(COR20_SIZE);
    Cor20Header {
        major_runtime_version: 2,
        minor_runtime_version: 5,
        meta_data_rva: 0,
        meta_data_size: 0,
        flags: COMIMAGE_FLAGS_ILONLY,
        entry_point_token: 0,
    }
    .write(&mut cor20);
    put(0x200, &cor20);

    image
}
