//! The CLI header of a module image.
//!
//! The 72-byte CLI header of ECMA-335 II.25.3.3 is located through data directory 14 of the
//! PE optional header. It records where the metadata root lives, the runtime flags including
//! whether the image is strong-name signed, and where the signature slot is. Every location
//! field is an RVA that resolves through [`crate::file::File::rva_to_offset`].
//!
//! Fields this crate never interprets (managed resources, vtable fixups and the other native
//! directories) are decoded and written back untouched, so rewriting the header of an image
//! only changes the metadata location, the flags and the signature slot.

use bitflags::bitflags;

use crate::{file::parser::Parser, Result};

/// Size of the encoded header.
pub const COR20_HEADER_SIZE: usize = 72;

bitflags! {
    #[derive(PartialEq, Eq, Clone, Copy, Debug)]
    /// Runtime flags of the CLI header (ECMA-335 II.25.3.3.1)
    pub struct ImageFlags: u32 {
        /// Image contains only IL code
        const ILONLY = 0x0000_0001;
        /// Image must be loaded into a 32-bit process
        const REQUIRED_32BIT = 0x0000_0002;
        /// Image is an IL library
        const IL_LIBRARY = 0x0000_0004;
        /// Image carries a strong name signature
        const STRONGNAMESIGNED = 0x0000_0008;
        /// Entry point is a native function
        const NATIVE_ENTRYPOINT = 0x0000_0010;
        /// Runtime should track debug data
        const TRACKDEBUGDATA = 0x0001_0000;
        /// Image prefers a 32-bit process
        const PREFER_32BIT = 0x0002_0000;
    }
}

/// The decoded CLI header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cor20Header {
    /// Size of the header, always 72
    pub cb: u32,
    /// Major runtime version
    pub major_runtime_version: u16,
    /// Minor runtime version
    pub minor_runtime_version: u16,
    /// RVA of the metadata root
    pub meta_data_rva: u32,
    /// Size of the metadata
    pub meta_data_size: u32,
    /// Runtime flags
    pub flags: ImageFlags,
    /// Token of the entry point method, 0 for libraries
    pub entry_point_token: u32,
    /// RVA of the managed resources
    pub resource_rva: u32,
    /// Size of the managed resources
    pub resource_size: u32,
    /// RVA of the strong name signature slot, 0 if none
    pub strong_name_signature_rva: u32,
    /// Size of the strong name signature slot
    pub strong_name_signature_size: u32,
    /// RVA of the code manager table, always 0
    pub code_manager_table_rva: u32,
    /// Size of the code manager table, always 0
    pub code_manager_table_size: u32,
    /// RVA of the vtable fixups
    pub vtable_fixups_rva: u32,
    /// Size of the vtable fixups
    pub vtable_fixups_size: u32,
    /// RVA of the export address table jumps
    pub export_address_table_jmp_rva: u32,
    /// Size of the export address table jumps
    pub export_address_table_jmp_size: u32,
    /// RVA of the managed native header
    pub managed_native_header_rva: u32,
    /// Size of the managed native header
    pub managed_native_header_size: u32,
}

impl Cor20Header {
    /// Decode the header from the start of `data`.
    ///
    /// # Arguments
    ///
    /// * `data` - The bytes at the file offset the CLI header directory resolves to.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for truncated data and [`crate::Error::Malformed`]
    /// for an invalid size, runtime version, flag set or signature directory.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < COR20_HEADER_SIZE {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb as usize != COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;
        if major_runtime_version == 0 || major_runtime_version > 10 {
            return Err(malformed_error!(
                "Invalid major runtime version: {}",
                major_runtime_version
            ));
        }

        let meta_data_rva = parser.read_le::<u32>()?;
        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_rva == 0 || meta_data_size == 0 {
            return Err(malformed_error!("Image carries no metadata"));
        }

        let raw_flags = parser.read_le::<u32>()?;
        let Some(flags) = ImageFlags::from_bits(raw_flags) else {
            return Err(malformed_error!(
                "Invalid CLR flags: 0x{:08X} contains undefined bits",
                raw_flags
            ));
        };

        let entry_point_token = parser.read_le::<u32>()?;
        let resource_rva = parser.read_le::<u32>()?;
        let resource_size = parser.read_le::<u32>()?;

        let strong_name_signature_rva = parser.read_le::<u32>()?;
        let strong_name_signature_size = parser.read_le::<u32>()?;
        if (strong_name_signature_rva == 0) != (strong_name_signature_size == 0) {
            return Err(malformed_error!("Strong name signature values are invalid"));
        }

        Ok(Cor20Header {
            cb,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags,
            entry_point_token,
            resource_rva,
            resource_size,
            strong_name_signature_rva,
            strong_name_signature_size,
            code_manager_table_rva: parser.read_le::<u32>()?,
            code_manager_table_size: parser.read_le::<u32>()?,
            vtable_fixups_rva: parser.read_le::<u32>()?,
            vtable_fixups_size: parser.read_le::<u32>()?,
            export_address_table_jmp_rva: parser.read_le::<u32>()?,
            export_address_table_jmp_size: parser.read_le::<u32>()?,
            managed_native_header_rva: parser.read_le::<u32>()?,
            managed_native_header_size: parser.read_le::<u32>()?,
        })
    }

    /// A header for a freshly laid out library image.
    ///
    /// The metadata and signature directories are left empty and filled in once the layout
    /// is known.
    #[must_use]
    pub fn library(major_runtime_version: u16, minor_runtime_version: u16) -> Cor20Header {
        Cor20Header {
            cb: COR20_HEADER_SIZE as u32,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva: 0,
            meta_data_size: 0,
            flags: ImageFlags::ILONLY,
            entry_point_token: 0,
            resource_rva: 0,
            resource_size: 0,
            strong_name_signature_rva: 0,
            strong_name_signature_size: 0,
            code_manager_table_rva: 0,
            code_manager_table_size: 0,
            vtable_fixups_rva: 0,
            vtable_fixups_size: 0,
            export_address_table_jmp_rva: 0,
            export_address_table_jmp_size: 0,
            managed_native_header_rva: 0,
            managed_native_header_size: 0,
        }
    }

    /// Append the encoded header to `buffer`.
    pub fn write(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.cb.to_le_bytes());
        buffer.extend_from_slice(&self.major_runtime_version.to_le_bytes());
        buffer.extend_from_slice(&self.minor_runtime_version.to_le_bytes());
        for value in [
            self.meta_data_rva,
            self.meta_data_size,
            self.flags.bits(),
            self.entry_point_token,
            self.resource_rva,
            self.resource_size,
            self.strong_name_signature_rva,
            self.strong_name_signature_size,
            self.code_manager_table_rva,
            self.code_manager_table_size,
            self.vtable_fixups_rva,
            self.vtable_fixups_size,
            self.export_address_table_jmp_rva,
            self.export_address_table_jmp_size,
            self.managed_native_header_rva,
            self.managed_native_header_size,
        ] {
            buffer.extend_from_slice(&value.to_le_bytes());
        }
    }
}
