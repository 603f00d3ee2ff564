//! PE container layout for rewritten modules.
//!
//! A rewrite never moves existing code or data: every section keeps its RVA and its content,
//! so RVAs held anywhere in the image (method bodies, field data, resources, vtable fixups,
//! import and relocation tables) stay valid. The rebuilt metadata goes into a new `.meta`
//! section appended behind the last section, followed by the strong name signature slot:
//!
//! ```text
//! headers          DOS header, PE headers, section table (grown by one entry)
//! sections         original sections, raw data shifted only if the table needed room
//! .meta            metadata root, streams, signature slot
//! ```
//!
//! Inside the original image only the structures describing the layout are patched:
//!
//! - COFF `NumberOfSections`, optional header `SizeOfInitializedData`, `SizeOfImage`,
//!   `SizeOfHeaders` and `CheckSum`
//! - the certificate table directory, which is cleared since any Authenticode signature is
//!   invalidated by the rewrite
//! - `PointerToRawData` of the debug directory entries, if raw data had to shift
//! - the metadata directory, flags, entry point and strong name directory of the CLI header
//!
//! An image whose last section is a `.meta` section holding the metadata (an image this
//! crate wrote before) has that section replaced instead of stacking another one, which keeps
//! rewriting a rewritten image byte-identical.
//!
//! Records without an image of their own are first given a minimal PE32 library image by
//! [`template`], then laid out the same way.

use goblin::pe::section_table::SectionTable;

use crate::{
    file::{
        io::{read_le_at, write_le_at},
        rva_to_offset, File, SECTION_HEADER_SIZE,
    },
    metadata::cor20header::{Cor20Header, ImageFlags, COR20_HEADER_SIZE},
    Result,
};

/// Name of the section holding rewritten metadata.
pub const METADATA_SECTION_NAME: &str = ".meta";

/// `IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ`
const METADATA_SECTION_CHARACTERISTICS: u32 = 0x4000_0040;
/// `IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ`
const TEXT_SECTION_CHARACTERISTICS: u32 = 0x6000_0020;
const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x0000_0040;

const DIRECTORY_SECURITY: usize = 4;
const DIRECTORY_DEBUG: usize = 6;
const DIRECTORY_CLR: usize = 14;
const DEBUG_DIRECTORY_ENTRY_SIZE: usize = 28;

const TEMPLATE_PE_OFFSET: usize = 0x80;
const TEMPLATE_FILE_ALIGNMENT: u32 = 0x200;
const TEMPLATE_SECTION_ALIGNMENT: u32 = 0x2000;
const TEMPLATE_OPTIONAL_HEADER_SIZE: u16 = 0xE0;

/// What the rewrite stores in the CLI header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClrUpdate {
    /// Runtime flags
    pub flags: ImageFlags,
    /// Entry point token
    pub entry_point_token: u32,
    /// Size of the signature slot to reserve, 0 for none
    pub signature_size: u32,
}

/// A laid out image before the checksum is computed.
pub(crate) struct PeLayout {
    /// The complete image
    pub data: Vec<u8>,
    /// File offset and size of the signature slot
    pub signature: Option<(usize, usize)>,
    /// File offset of the optional header `CheckSum` field
    pub checksum_offset: usize,
}

/// Offsets of the optional header fields which are patched, relative to its start.
struct OptionalHeaderFields {
    size_of_initialized_data: usize,
    size_of_image: usize,
    size_of_headers: usize,
    checksum: usize,
    number_of_directories: usize,
    directories: usize,
}

impl OptionalHeaderFields {
    fn new(is_pe32_plus: bool) -> Self {
        OptionalHeaderFields {
            size_of_initialized_data: 8,
            size_of_image: 56,
            size_of_headers: 60,
            checksum: 64,
            number_of_directories: if is_pe32_plus { 108 } else { 92 },
            directories: if is_pe32_plus { 112 } else { 96 },
        }
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error!("Image exceeds 4GB"))
}

fn read_u32(data: &[u8], mut offset: usize) -> Result<u32> {
    read_le_at::<u32>(data, &mut offset)
}

fn write_u32(data: &mut [u8], mut offset: usize, value: u32) -> Result<()> {
    write_le_at(data, &mut offset, value)
}

fn section_span(section: &SectionTable) -> u32 {
    if section.virtual_size == 0 {
        section.size_of_raw_data
    } else {
        section.virtual_size
    }
}

fn section_contains(section: &SectionTable, rva: u32) -> bool {
    rva >= section.virtual_address
        && u64::from(rva) < u64::from(section.virtual_address) + u64::from(section_span(section))
}

/// Lay `metadata` out inside the PE image `base`.
///
/// # Arguments
///
/// * `base` - A PE image with a CLI header: the image the record was read from, or a
///   [`template`].
/// * `metadata` - The complete metadata block (root, stream directory and streams).
/// * `update` - Flags, entry point and signature slot size for the CLI header.
///
/// # Returns
///
/// The rewritten image, the location of its signature slot and of its checksum field.
///
/// # Errors
///
/// Returns [`crate::Error::GoblinErr`] or [`crate::Error::Malformed`] if `base` is not a
/// well-formed PE image, and [`crate::Error::Unsupported`] if the section table cannot grow
/// without moving the first section's RVA.
pub(crate) fn layout(base: &[u8], metadata: &[u8], update: &ClrUpdate) -> Result<PeLayout> {
    let file = File::from_mem(base.to_vec())?;
    let data = file.data();

    let file_alignment = file.file_alignment() as usize;
    let section_alignment = file.section_alignment() as usize;
    if file_alignment == 0 || section_alignment == 0 {
        return Err(malformed_error!("Image declares a zero alignment"));
    }

    let pe_offset = file.pe_signature_offset();
    let optional_offset = file.optional_header_offset();
    let section_table_offset = file.section_table_offset();
    let fields = OptionalHeaderFields::new(file.is_pe32_plus());
    let directory_count = read_u32(data, optional_offset + fields.number_of_directories)? as usize;
    if directory_count <= DIRECTORY_CLR {
        return Err(malformed_error!(
            "Image has {} data directories, no CLI header",
            directory_count
        ));
    }
    let directory_offset = |index: usize| optional_offset + fields.directories + index * 8;

    let (clr_rva, _) = file.clr()?;
    let clr_rva = to_u32(clr_rva)?;
    let clr_offset = file.rva_to_offset(clr_rva as usize)?;
    let old_metadata_rva = read_u32(data, clr_offset + 8)?;

    let mut sections: Vec<SectionTable> = file.sections().cloned().collect();
    let replaces_metadata_section = sections.last().is_some_and(|last| {
        last.name().is_ok_and(|name| name == METADATA_SECTION_NAME)
            && section_contains(last, old_metadata_rva)
            && !section_contains(last, clr_rva)
    });
    if replaces_metadata_section {
        sections.pop();
    }

    let old_headers_size = read_u32(data, optional_offset + fields.size_of_headers)? as usize;
    let table_end = section_table_offset + (sections.len() + 1) * SECTION_HEADER_SIZE;
    let headers_size = old_headers_size.max(align_up(table_end, file_alignment));
    let shift = headers_size - old_headers_size;
    if let Some(first_rva) = sections.iter().map(|s| s.virtual_address as usize).min() {
        if headers_size > first_rva {
            return Err(crate::Error::Unsupported(
                "The section table cannot grow without moving the first section".to_string(),
            ));
        }
    }

    let mut output = data
        .get(..old_headers_size)
        .ok_or_else(|| out_of_bounds_error!())?
        .to_vec();
    output.resize(headers_size, 0);

    let mut section_headers = Vec::with_capacity((sections.len() + 1) * SECTION_HEADER_SIZE);
    for (index, section) in sections.iter_mut().enumerate() {
        let header_start = section_table_offset + index * SECTION_HEADER_SIZE;
        let mut header = data
            .get(header_start..header_start + SECTION_HEADER_SIZE)
            .ok_or_else(|| out_of_bounds_error!())?
            .to_vec();

        if section.size_of_raw_data > 0 && section.pointer_to_raw_data > 0 {
            let start = section.pointer_to_raw_data as usize;
            let raw = file.data_slice(start, section.size_of_raw_data as usize)?;
            let new_start = start + shift;
            if output.len() < new_start + raw.len() {
                output.resize(new_start + raw.len(), 0);
            }
            output[new_start..new_start + raw.len()].copy_from_slice(raw);

            section.pointer_to_raw_data = to_u32(new_start)?;
            write_u32(&mut header, 20, section.pointer_to_raw_data)?;
        }
        section_headers.extend_from_slice(&header);
    }

    let signature_size = update.signature_size as usize;
    let metadata_size = align_up(metadata.len(), 4);
    let meta_virtual_size = metadata_size + signature_size;
    let meta_raw_size = align_up(meta_virtual_size, file_alignment);
    let meta_offset = align_up(output.len(), file_alignment);
    let meta_rva = align_up(
        sections
            .iter()
            .map(|s| s.virtual_address as usize + section_span(s) as usize)
            .max()
            .unwrap_or(headers_size),
        section_alignment,
    );

    output.resize(meta_offset, 0);
    output.extend_from_slice(metadata);
    output.resize(meta_offset + meta_raw_size, 0);

    let mut name = [0u8; 8];
    name[..METADATA_SECTION_NAME.len()].copy_from_slice(METADATA_SECTION_NAME.as_bytes());
    let meta_section = SectionTable {
        name,
        virtual_size: to_u32(meta_virtual_size)?,
        virtual_address: to_u32(meta_rva)?,
        size_of_raw_data: to_u32(meta_raw_size)?,
        pointer_to_raw_data: to_u32(meta_offset)?,
        characteristics: METADATA_SECTION_CHARACTERISTICS,
        ..SectionTable::default()
    };
    section_headers.extend_from_slice(&name);
    for value in [
        meta_section.virtual_size,
        meta_section.virtual_address,
        meta_section.size_of_raw_data,
        meta_section.pointer_to_raw_data,
        0,
        0,
        0,
        meta_section.characteristics,
    ] {
        section_headers.extend_from_slice(&value.to_le_bytes());
    }
    sections.push(meta_section);

    output[section_table_offset..section_table_offset + section_headers.len()]
        .copy_from_slice(&section_headers);
    let section_count = u16::try_from(sections.len())
        .map_err(|_| malformed_error!("Too many sections - {}", sections.len()))?;
    output[pe_offset + 6..pe_offset + 8].copy_from_slice(&section_count.to_le_bytes());

    let initialized_data: u64 = sections
        .iter()
        .filter(|s| s.characteristics & IMAGE_SCN_CNT_INITIALIZED_DATA != 0)
        .map(|s| u64::from(s.size_of_raw_data))
        .sum();
    write_u32(
        &mut output,
        optional_offset + fields.size_of_initialized_data,
        u32::try_from(initialized_data).map_err(|_| malformed_error!("Image exceeds 4GB"))?,
    )?;
    write_u32(
        &mut output,
        optional_offset + fields.size_of_image,
        to_u32(align_up(meta_rva + meta_virtual_size, section_alignment))?,
    )?;
    write_u32(
        &mut output,
        optional_offset + fields.size_of_headers,
        to_u32(headers_size)?,
    )?;
    write_u32(&mut output, optional_offset + fields.checksum, 0)?;

    if directory_count > DIRECTORY_SECURITY {
        write_u32(&mut output, directory_offset(DIRECTORY_SECURITY), 0)?;
        write_u32(&mut output, directory_offset(DIRECTORY_SECURITY) + 4, 0)?;
    }

    if shift > 0 && directory_count > DIRECTORY_DEBUG {
        let debug_rva = read_u32(&output, directory_offset(DIRECTORY_DEBUG))? as usize;
        let debug_size = read_u32(&output, directory_offset(DIRECTORY_DEBUG) + 4)? as usize;
        if debug_rva != 0 {
            let debug_offset = rva_to_offset(&sections, debug_rva)?;
            for entry in 0..debug_size / DEBUG_DIRECTORY_ENTRY_SIZE {
                let field = debug_offset + entry * DEBUG_DIRECTORY_ENTRY_SIZE + 24;
                let pointer = read_u32(&output, field)? as usize;
                if pointer != 0 {
                    write_u32(&mut output, field, to_u32(pointer + shift)?)?;
                }
            }
        }
    }

    let clr_offset = rva_to_offset(&sections, clr_rva as usize)?;
    let metadata_rva = to_u32(meta_rva)?;
    let signature_rva = if signature_size > 0 {
        to_u32(meta_rva + metadata_size)?
    } else {
        0
    };
    write_u32(&mut output, clr_offset + 8, metadata_rva)?;
    write_u32(&mut output, clr_offset + 12, to_u32(metadata.len())?)?;
    write_u32(&mut output, clr_offset + 16, update.flags.bits())?;
    write_u32(&mut output, clr_offset + 20, update.entry_point_token)?;
    write_u32(&mut output, clr_offset + 32, signature_rva)?;
    write_u32(&mut output, clr_offset + 36, update.signature_size)?;

    Ok(PeLayout {
        data: output,
        signature: (signature_size > 0).then_some((meta_offset + metadata_size, signature_size)),
        checksum_offset: optional_offset + fields.checksum,
    })
}

/// A minimal PE32 library image whose `.text` section holds nothing but a CLI header.
///
/// The metadata directory is left empty; [`layout`] fills it in.
///
/// # Arguments
///
/// * `major_runtime_version` / `minor_runtime_version` - Runtime version of the CLI header.
pub(crate) fn template(major_runtime_version: u16, minor_runtime_version: u16) -> Vec<u8> {
    let file_alignment = TEMPLATE_FILE_ALIGNMENT as usize;
    let text_rva = TEMPLATE_SECTION_ALIGNMENT;
    let mut image = vec![0u8; 2 * file_alignment];

    // DOS header: signature and e_lfanew
    image[0..2].copy_from_slice(b"MZ");
    image[0x3C..0x40].copy_from_slice(&(TEMPLATE_PE_OFFSET as u32).to_le_bytes());

    let mut headers = Vec::with_capacity(0x100);
    headers.extend_from_slice(b"PE\0\0");

    // COFF header: i386, one section, no timestamp, EXECUTABLE_IMAGE | 32BIT_MACHINE | DLL
    headers.extend_from_slice(&0x014Cu16.to_le_bytes());
    headers.extend_from_slice(&1u16.to_le_bytes());
    headers.extend_from_slice(&[0u8; 12]);
    headers.extend_from_slice(&TEMPLATE_OPTIONAL_HEADER_SIZE.to_le_bytes());
    headers.extend_from_slice(&0x2102u16.to_le_bytes());

    // Optional header, standard fields
    headers.extend_from_slice(&0x010Bu16.to_le_bytes());
    headers.extend_from_slice(&[0x30, 0x00]);
    headers.extend_from_slice(&TEMPLATE_FILE_ALIGNMENT.to_le_bytes()); // SizeOfCode
    headers.extend_from_slice(&0u32.to_le_bytes()); // SizeOfInitializedData
    headers.extend_from_slice(&0u32.to_le_bytes()); // SizeOfUninitializedData
    headers.extend_from_slice(&0u32.to_le_bytes()); // AddressOfEntryPoint
    headers.extend_from_slice(&text_rva.to_le_bytes()); // BaseOfCode
    headers.extend_from_slice(&0u32.to_le_bytes()); // BaseOfData

    // Optional header, windows fields
    headers.extend_from_slice(&0x1000_0000u32.to_le_bytes()); // ImageBase
    headers.extend_from_slice(&TEMPLATE_SECTION_ALIGNMENT.to_le_bytes());
    headers.extend_from_slice(&TEMPLATE_FILE_ALIGNMENT.to_le_bytes());
    for version in [4u16, 0, 0, 0, 4, 0] {
        headers.extend_from_slice(&version.to_le_bytes());
    }
    headers.extend_from_slice(&0u32.to_le_bytes()); // Win32VersionValue
    headers.extend_from_slice(&(2 * text_rva).to_le_bytes()); // SizeOfImage
    headers.extend_from_slice(&TEMPLATE_FILE_ALIGNMENT.to_le_bytes()); // SizeOfHeaders
    headers.extend_from_slice(&0u32.to_le_bytes()); // CheckSum
    headers.extend_from_slice(&3u16.to_le_bytes()); // Subsystem: console
    headers.extend_from_slice(&0x8540u16.to_le_bytes()); // DllCharacteristics
    for reserve in [0x0010_0000u32, 0x1000, 0x0010_0000, 0x1000] {
        headers.extend_from_slice(&reserve.to_le_bytes());
    }
    headers.extend_from_slice(&0u32.to_le_bytes()); // LoaderFlags
    headers.extend_from_slice(&16u32.to_le_bytes()); // NumberOfRvaAndSizes
    for directory in 0..16 {
        if directory == DIRECTORY_CLR {
            headers.extend_from_slice(&text_rva.to_le_bytes());
            headers.extend_from_slice(&(COR20_HEADER_SIZE as u32).to_le_bytes());
        } else {
            headers.extend_from_slice(&[0u8; 8]);
        }
    }

    // Section table: .text
    headers.extend_from_slice(b".text\0\0\0");
    for value in [
        COR20_HEADER_SIZE as u32,
        text_rva,
        TEMPLATE_FILE_ALIGNMENT,
        TEMPLATE_FILE_ALIGNMENT,
        0,
        0,
        0,
        TEXT_SECTION_CHARACTERISTICS,
    ] {
        headers.extend_from_slice(&value.to_le_bytes());
    }

    image[TEMPLATE_PE_OFFSET..TEMPLATE_PE_OFFSET + headers.len()].copy_from_slice(&headers);

    let mut clr_header = Vec::with_capacity(COR20_HEADER_SIZE);
    Cor20Header::library(major_runtime_version, minor_runtime_version).write(&mut clr_header);
    image[file_alignment..file_alignment + COR20_HEADER_SIZE].copy_from_slice(&clr_header);

    image
}

/// The PE checksum of `data`, skipping the checksum field at `checksum_offset`.
///
/// 16-bit little-endian words are summed with end-around carry, then the file size is added.
#[must_use]
pub fn pe_checksum(data: &[u8], checksum_offset: usize) -> u32 {
    let mut checksum: u64 = 0;
    let mut offset = 0;
    while offset < data.len() {
        if offset >= checksum_offset && offset < checksum_offset + 4 {
            offset += 2;
            continue;
        }

        let word = if offset + 1 < data.len() {
            u64::from(u16::from_le_bytes([data[offset], data[offset + 1]]))
        } else {
            u64::from(data[offset])
        };

        checksum += word;
        if checksum > 0xFFFF {
            checksum = (checksum & 0xFFFF) + (checksum >> 16);
        }
        offset += 2;
    }

    checksum += data.len() as u64;
    while checksum > 0xFFFF {
        checksum = (checksum & 0xFFFF) + (checksum >> 16);
    }

    #[allow(clippy::cast_possible_truncation)]
    {
        checksum as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(signature_size: u32) -> ClrUpdate {
        ClrUpdate {
            flags: ImageFlags::ILONLY,
            entry_point_token: 0,
            signature_size,
        }
    }

    fn metadata() -> Vec<u8> {
        b"BSJB".iter().copied().chain([0xAB; 60]).collect()
    }

    #[test]
    fn template_parses() {
        let file = File::from_mem(template(2, 5)).unwrap();
        assert_eq!(file.sections().count(), 1);
        assert_eq!(file.clr().unwrap(), (0x2000, 72));
        assert_eq!(file.rva_to_offset(0x2000).unwrap(), 0x200);
        assert_eq!(file.section_table_offset(), 0x178);
    }

    #[test]
    fn appends_metadata_section() {
        let laid_out = layout(&template(2, 5), &metadata(), &update(128)).unwrap();
        let file = File::from_mem(laid_out.data.clone()).unwrap();

        let sections: Vec<SectionTable> = file.sections().cloned().collect();
        assert_eq!(sections.len(), 2);
        let meta = &sections[1];
        assert_eq!(meta.name().unwrap(), ".meta");
        assert_eq!(meta.virtual_address, 0x4000);
        assert_eq!(meta.pointer_to_raw_data, 0x400);
        assert_eq!(meta.virtual_size, 64 + 128);
        assert_eq!(laid_out.data.len(), 0x600);

        let clr = Cor20Header::read(file.data_slice(0x200, 72).unwrap()).unwrap();
        assert_eq!(clr.meta_data_rva, 0x4000);
        assert_eq!(clr.meta_data_size, 64);
        assert_eq!(clr.strong_name_signature_rva, 0x4040);
        assert_eq!(clr.strong_name_signature_size, 128);
        assert_eq!(laid_out.signature, Some((0x440, 128)));
        assert_eq!(&laid_out.data[0x400..0x404], b"BSJB");
    }

    #[test]
    fn replaces_its_own_metadata_section() {
        let first = layout(&template(2, 5), &metadata(), &update(0)).unwrap();
        assert!(first.signature.is_none());

        let second = layout(&first.data, &metadata(), &update(0)).unwrap();
        assert_eq!(second.data, first.data);

        let signed = layout(&first.data, &metadata(), &update(256)).unwrap();
        let file = File::from_mem(signed.data).unwrap();
        assert_eq!(file.sections().count(), 2);
    }

    #[test]
    fn grows_the_section_table() {
        let mut base = template(2, 5);
        // claim a larger optional header so the section table ends right at SizeOfHeaders
        let size_field = TEMPLATE_PE_OFFSET + 20;
        base[size_field..size_field + 2].copy_from_slice(&0x0140u16.to_le_bytes());
        // move the .text entry to its new position
        let old_table = TEMPLATE_PE_OFFSET + 24 + 0xE0;
        let new_table = TEMPLATE_PE_OFFSET + 24 + 0x140;
        let entry: Vec<u8> = base[old_table..old_table + 40].to_vec();
        base[new_table..new_table + 40].copy_from_slice(&entry);

        let laid_out = layout(&base, &metadata(), &update(0)).unwrap();
        let file = File::from_mem(laid_out.data.clone()).unwrap();
        let text = file.sections().next().unwrap().clone();
        assert_eq!(text.pointer_to_raw_data, 0x400);
        assert_eq!(file.rva_to_offset(0x2000).unwrap(), 0x400);
        assert_eq!(&laid_out.data[0x400..0x404], &72u32.to_le_bytes());
    }

    #[test]
    fn checksum() {
        let data = [0x01, 0x00, 0xFF, 0xFF, 0xAA, 0xBB, 0x02];
        // 0x0001 + 0xFFFF -> 0x10000 -> 0x0001, + 0x0002 + 7
        assert_eq!(pe_checksum(&data, 4), 0x000A);
        assert_ne!(pe_checksum(&data, 2), pe_checksum(&data, 4));
    }
}
