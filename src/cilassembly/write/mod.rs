//! Serialization of a [`ModuleRecord`] into a module image.
//!
//! Writing happens in two steps. The metadata block is rebuilt from the record: the decoded
//! tables are encoded again, every other table is written from its retained rows, and the heaps
//! continue the heaps the record was read with, so every index held by a retained row stays
//! valid. The block is then laid out inside a PE image by [`pe`]:
//!
//! ```text
//! metadata root and stream directory
//! #~, #Strings, #US, #GUID, #Blob        (each padded to 4)
//! signature slot                         (optional)
//! ```
//!
//! Records read from an image are written back into that image; records built in memory get a
//! minimal library image. Either way the output is a pure function of the record and the
//! [`WriteOptions`], which is what makes repeated signing runs byte-identical.

mod heaps;
mod output;
pub mod pe;
mod tables;

pub use heaps::{BlobHeapBuilder, GuidHeapBuilder, StringHeapBuilder, LARGE_HEAP_THRESHOLD};
pub use output::ImageOutput;
pub use tables::{HeapSet, TableRows};

use crate::{
    metadata::{
        cor20header::ImageFlags, record::ModuleRecord, root::Root, streams::StreamHeader,
    },
    Result,
};

use pe::ClrUpdate;

/// Layout decisions which are not part of the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Size of the signature slot to reserve, 0 for none
    pub signature_size: u32,
    /// Whether the CLI header declares the image as strong-name signed
    pub strong_name_signed: bool,
}

impl WriteOptions {
    /// Options for an image without a signature slot.
    #[must_use]
    pub fn unsigned() -> Self {
        Self::default()
    }

    /// Options reserving a slot of `signature_size` bytes which will be filled in.
    #[must_use]
    pub fn signed(signature_size: u32) -> Self {
        WriteOptions {
            signature_size,
            strong_name_signed: true,
        }
    }

    /// Options reserving a zero-filled slot without declaring the image signed.
    #[must_use]
    pub fn delay_signed(signature_size: u32) -> Self {
        WriteOptions {
            signature_size,
            strong_name_signed: false,
        }
    }
}

/// Serialize `record` into a complete PE image.
///
/// # Arguments
///
/// * `record` - The module to write.
/// * `options` - Signature slot size and the strong-name flag of the CLI header.
///
/// # Returns
///
/// The image with a zero-filled signature slot and a valid PE checksum.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the record holds values which cannot be encoded,
/// such as coded indexes into tables their column cannot reference, and any error of
/// [`pe::layout`] if the retained image cannot take the new metadata.
pub fn write_image(record: &ModuleRecord, options: &WriteOptions) -> Result<ImageOutput> {
    let metadata = build_metadata(record)?;

    let mut flags = record.image_flags;
    flags.set(ImageFlags::STRONGNAMESIGNED, options.strong_name_signed);
    let update = ClrUpdate {
        flags,
        entry_point_token: record.entry_point_token,
        signature_size: options.signature_size,
    };

    let template;
    let base: &[u8] = match &record.retained.image {
        Some(image) => image,
        None => {
            template = pe::template(record.major_runtime_version, record.minor_runtime_version);
            &template
        }
    };

    let layout = pe::layout(base, &metadata, &update)?;
    Ok(ImageOutput::new(
        layout.data,
        layout.signature,
        layout.checksum_offset,
    ))
}

/// Build the metadata block of `record`: root, stream directory and streams.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a value cannot be encoded.
pub fn build_metadata(record: &ModuleRecord) -> Result<Vec<u8>> {
    let mut heaps = HeapSet::from_retained(&record.retained)?;
    let rows = TableRows::intern(record, &mut heaps)?;

    let tables = rows.encode(
        heaps.strings.is_large(),
        heaps.blobs.is_large(),
        heaps.guids.is_large(),
        record.sorted_tables,
    )?;

    let mut user_strings = record.user_strings.clone();
    user_strings.resize((user_strings.len() + 3) & !3, 0);

    let mut streams: Vec<(&str, Vec<u8>)> =
        vec![("#~", tables), ("#Strings", heaps.strings.finish())];
    if !user_strings.is_empty() {
        streams.push(("#US", user_strings));
    }
    if !heaps.guids.is_empty() {
        streams.push(("#GUID", heaps.guids.finish()));
    }
    streams.push(("#Blob", heaps.blobs.finish()));

    let mut root = Root::new(
        &record.runtime_version,
        streams
            .iter()
            .map(|(name, _)| StreamHeader {
                offset: 0,
                size: 0,
                name: (*name).to_string(),
            })
            .collect(),
    );

    let mut stream_offset = root.size();
    for (header, (_, data)) in root.stream_headers.iter_mut().zip(&streams) {
        header.offset = to_u32(stream_offset)?;
        header.size = to_u32(data.len())?;
        stream_offset += data.len();
    }

    let mut data = Vec::with_capacity(stream_offset);
    root.write(&mut data)?;
    for (_, stream) in &streams {
        data.extend_from_slice(stream);
    }

    Ok(data)
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error!("Image exceeds 4GB"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cilassembly::ModuleBuilder,
        file::File,
        metadata::{identity::AssemblyVersion, tables::TableId},
        ModuleView,
    };

    fn lib_a() -> ModuleRecord {
        ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0))
            .reference("LibB", AssemblyVersion::new(1, 0, 0, 0))
            .friend("LibB")
            .user_strings(vec![0x00, 0x05, 0x48, 0x00, 0x69, 0x00, 0x00])
            .build()
    }

    #[test]
    fn unsigned_roundtrip() {
        let record = lib_a();
        let output = write_image(&record, &WriteOptions::unsigned()).unwrap();
        assert!(!output.has_signature_slot());
        assert_eq!(&output.as_bytes()[..2], b"MZ");

        let view = ModuleView::from_mem(output.as_bytes().to_vec()).unwrap();
        assert!(!view.header().flags.contains(ImageFlags::STRONGNAMESIGNED));
        assert_eq!(view.header().meta_data_rva, 0x4000);
        assert!(view.signature().is_none());

        let names: Vec<&str> = view
            .root()
            .stream_headers
            .iter()
            .map(|header| header.name.as_str())
            .collect();
        assert_eq!(names, ["#~", "#Strings", "#US", "#GUID", "#Blob"]);

        let mut reread = view.record().unwrap();
        assert_eq!(reread.user_strings.len(), 8);
        reread.user_strings.truncate(7);
        reread.retained = record.retained.clone();
        assert_eq!(reread, record);
    }

    #[test]
    fn signature_slot() {
        let record = lib_a();
        let output = write_image(&record, &WriteOptions::signed(128)).unwrap();
        let range = output.signature_range().unwrap();
        assert_eq!(range.len(), 128);

        let view = ModuleView::from_mem(output.as_bytes().to_vec()).unwrap();
        assert!(view.header().flags.contains(ImageFlags::STRONGNAMESIGNED));
        assert_eq!(view.signature().unwrap(), &[0u8; 128][..]);
        assert_eq!(view.signature_range(), Some(range));
        assert_eq!(
            view.header().strong_name_signature_rva,
            view.header().meta_data_rva + view.header().meta_data_size
        );

        let delayed = write_image(&record, &WriteOptions::delay_signed(128)).unwrap();
        let view = ModuleView::from_mem(delayed.into_bytes()).unwrap();
        assert!(!view.header().flags.contains(ImageFlags::STRONGNAMESIGNED));
        assert_eq!(view.header().strong_name_signature_size, 128);
    }

    #[test]
    fn deterministic() {
        let record = lib_a();
        let first = write_image(&record, &WriteOptions::signed(256)).unwrap();
        let second = write_image(&record.clone(), &WriteOptions::signed(256)).unwrap();
        assert_eq!(first, second);

        let reread = ModuleRecord::from_mem(first.into_bytes()).unwrap();
        let third = write_image(&reread, &WriteOptions::signed(256)).unwrap();
        assert_eq!(third, second);
    }

    #[test]
    fn retained_content_survives() {
        let record = ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0))
            .type_definition("LibA", "Widget")
            .build();
        let image = write_image(&record, &WriteOptions::unsigned())
            .unwrap()
            .into_bytes();

        let mut reread = ModuleRecord::from_mem(image.clone()).unwrap();
        let type_defs = reread.retained.table(TableId::TypeDef).unwrap().clone();
        let text_before = File::from_mem(image.clone())
            .unwrap()
            .data_slice(0x200, 0x200)
            .unwrap()
            .to_vec();

        reread.assembly.version = AssemblyVersion::new(2, 0, 0, 0);
        let rewritten = write_image(&reread, &WriteOptions::signed(128))
            .unwrap()
            .into_bytes();

        let view = ModuleView::from_mem(rewritten.clone()).unwrap();
        assert_eq!(
            view.raw_table(TableId::TypeDef).unwrap(),
            type_defs.data.as_slice()
        );
        let record = view.record().unwrap();
        assert_eq!(record.version(), AssemblyVersion::new(2, 0, 0, 0));

        let file = File::from_mem(rewritten).unwrap();
        assert_eq!(file.sections().count(), 2);
        let text_after = file.data_slice(0x200, 0x200).unwrap();
        // only the CLI header fields describing metadata, flags and signature differ
        assert_eq!(&text_after[72..], &text_before[72..]);
        assert_eq!(&text_after[..8], &text_before[..8]);
    }
}
