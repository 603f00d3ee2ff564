//! Encoder for the `#~` stream.
//!
//! Encoding runs in two phases. [`TableRows::intern`] resolves every value of the model to a
//! heap index, producing raw rows; once all heaps are complete their widths are known and
//! [`TableRows::encode`] lays the rows out with the final column sizes.
//!
//! Tables the model does not decode are written from their retained rows. Their values are
//! unchanged; only their column widths follow the new layout, which differs from the one they
//! were read with when a heap crosses the 64K boundary.

use std::sync::Arc;

use crate::{
    metadata::{
        record::{ModuleRecord, RetainedContent},
        tables::{
            transcode, AssemblyRaw, AssemblyRefRaw, CustomAttributeRaw, MemberRefRaw, ModuleRaw,
            ModuleRefRaw, RowReadable, RowWritable, TableId, TableInfo, TableInfoRef, TypeRefRaw,
        },
    },
    Result,
};

use super::heaps::{BlobHeapBuilder, GuidHeapBuilder, StringHeapBuilder};

/// The heaps shared by all tables of one image.
#[derive(Default)]
pub struct HeapSet {
    /// `#Strings`
    pub strings: StringHeapBuilder,
    /// `#Blob`
    pub blobs: BlobHeapBuilder,
    /// `#GUID`
    pub guids: GuidHeapBuilder,
}

impl HeapSet {
    /// Heaps continuing the heaps a record was read with.
    ///
    /// # Arguments
    ///
    /// * `retained` - The retained content of a record; empty heaps start fresh ones.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a retained heap is not well-formed.
    pub fn from_retained(retained: &RetainedContent) -> Result<Self> {
        Ok(HeapSet {
            strings: StringHeapBuilder::with_base(&retained.strings)?,
            blobs: BlobHeapBuilder::with_base(&retained.blobs)?,
            guids: GuidHeapBuilder::with_base(&retained.guids)?,
        })
    }
}

/// All rows of one image with heap values replaced by indexes.
pub struct TableRows<'a> {
    module: ModuleRaw,
    type_refs: Vec<TypeRefRaw>,
    member_refs: Vec<MemberRefRaw>,
    custom_attributes: Vec<CustomAttributeRaw>,
    module_refs: Vec<ModuleRefRaw>,
    assembly: AssemblyRaw,
    references: Vec<AssemblyRefRaw>,
    retained: &'a RetainedContent,
}

fn rid(index: usize) -> Result<u32> {
    u32::try_from(index + 1).map_err(|_| malformed_error!("Table exceeds 2^32 rows"))
}

impl<'a> TableRows<'a> {
    /// Intern every value of `record` into `heaps`.
    ///
    /// The interning order is fixed (module, assembly, references, type references, member
    /// references, module references, attributes), so identical records produce identical
    /// heaps.
    ///
    /// # Errors
    /// Returns an error if a value cannot be stored in its heap.
    pub fn intern(record: &'a ModuleRecord, heaps: &mut HeapSet) -> Result<Self> {
        let module = ModuleRaw {
            rid: 1,
            generation: record.module.generation,
            name: heaps.strings.intern(&record.module.name)?,
            mvid: heaps.guids.intern(Some(record.module.mvid))?,
            encid: heaps.guids.intern(record.module.enc_id)?,
            encbaseid: heaps.guids.intern(record.module.enc_base_id)?,
        };

        let definition = &record.assembly;
        let assembly = AssemblyRaw {
            rid: 1,
            hash_alg_id: definition.hash_algorithm,
            major_version: definition.version.major,
            minor_version: definition.version.minor,
            build_number: definition.version.build,
            revision_number: definition.version.revision,
            flags: definition.flags,
            public_key: heaps.blobs.intern(&definition.public_key)?,
            name: heaps.strings.intern(&definition.name)?,
            culture: heaps
                .strings
                .intern(definition.culture.as_deref().unwrap_or_default())?,
        };

        let mut references = Vec::with_capacity(record.references.len());
        for (index, reference) in record.references.iter().enumerate() {
            let public_key_or_token = match &reference.identity {
                Some(identity) => heaps.blobs.intern(identity.blob())?,
                None => 0,
            };
            references.push(AssemblyRefRaw {
                rid: rid(index)?,
                major_version: reference.version.major,
                minor_version: reference.version.minor,
                build_number: reference.version.build,
                revision_number: reference.version.revision,
                flags: reference.flags,
                public_key_or_token,
                name: heaps.strings.intern(&reference.name)?,
                culture: heaps
                    .strings
                    .intern(reference.culture.as_deref().unwrap_or_default())?,
                hash_value: heaps.blobs.intern(&reference.hash_value)?,
            });
        }

        let mut type_refs = Vec::with_capacity(record.type_refs.len());
        for (index, type_ref) in record.type_refs.iter().enumerate() {
            type_refs.push(TypeRefRaw {
                rid: rid(index)?,
                resolution_scope: type_ref.resolution_scope,
                type_name: heaps.strings.intern(&type_ref.name)?,
                type_namespace: heaps.strings.intern(&type_ref.namespace)?,
            });
        }

        let mut member_refs = Vec::with_capacity(record.member_refs.len());
        for (index, member_ref) in record.member_refs.iter().enumerate() {
            member_refs.push(MemberRefRaw {
                rid: rid(index)?,
                class: member_ref.class,
                name: heaps.strings.intern(&member_ref.name)?,
                signature: heaps.blobs.intern(&member_ref.signature)?,
            });
        }

        let mut module_refs = Vec::with_capacity(record.module_refs.len());
        for (index, name) in record.module_refs.iter().enumerate() {
            module_refs.push(ModuleRefRaw {
                rid: rid(index)?,
                name: heaps.strings.intern(name)?,
            });
        }

        let mut custom_attributes = Vec::with_capacity(record.custom_attributes.len());
        for (index, attribute) in record.custom_attributes.iter().enumerate() {
            custom_attributes.push(CustomAttributeRaw {
                rid: rid(index)?,
                parent: attribute.parent,
                constructor: attribute.constructor,
                value: heaps.blobs.intern(&attribute.value.to_blob()?)?,
            });
        }

        Ok(TableRows {
            module,
            type_refs,
            member_refs,
            custom_attributes,
            module_refs,
            assembly,
            references,
            retained: &record.retained,
        })
    }

    /// Row counts of all tables carrying rows, decoded and retained, in table order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a table exceeds 2^32 rows.
    pub fn row_counts(&self) -> Result<Vec<(TableId, u32)>> {
        let counts = [
            (TableId::Module, 1),
            (TableId::TypeRef, self.type_refs.len()),
            (TableId::MemberRef, self.member_refs.len()),
            (TableId::CustomAttribute, self.custom_attributes.len()),
            (TableId::ModuleRef, self.module_refs.len()),
            (TableId::Assembly, 1),
            (TableId::AssemblyRef, self.references.len()),
        ];

        let mut rows = Vec::with_capacity(counts.len());
        for (table_id, count) in counts {
            if count > 0 {
                let count = u32::try_from(count)
                    .map_err(|_| malformed_error!("Table {} exceeds 2^32 rows", table_id))?;
                rows.push((table_id, count));
            }
        }
        rows.extend(
            self.retained
                .tables
                .iter()
                .filter(|table| table.rows > 0)
                .map(|table| (table.id, table.rows)),
        );
        rows.sort_by_key(|(table_id, _)| *table_id);
        Ok(rows)
    }

    /// Encode the `#~` stream, padded to 4 bytes.
    ///
    /// `sorted` is masked to the tables actually present.
    ///
    /// # Errors
    /// Returns an error if a coded index targets a table its column cannot reference, or if a
    /// value does not fit its column.
    pub fn encode(
        &self,
        large_str: bool,
        large_blob: bool,
        large_guid: bool,
        sorted: u64,
    ) -> Result<Vec<u8>> {
        let row_counts = self.row_counts()?;
        let info: TableInfoRef = Arc::new(TableInfo::new_with(
            &row_counts,
            large_str,
            large_blob,
            large_guid,
        ));
        let valid = row_counts
            .iter()
            .fold(0u64, |valid, (table_id, _)| valid | table_id.bit());

        let mut heap_sizes = 0u8;
        if large_str {
            heap_sizes |= 0x01;
        }
        if large_guid {
            heap_sizes |= 0x02;
        }
        if large_blob {
            heap_sizes |= 0x04;
        }

        let mut buffer = Vec::new();
        buffer.extend_from_slice(&0u32.to_le_bytes());
        // version 2.0
        buffer.push(2);
        buffer.push(0);
        buffer.push(heap_sizes);
        buffer.push(1);
        buffer.extend_from_slice(&valid.to_le_bytes());
        buffer.extend_from_slice(&(sorted & valid).to_le_bytes());
        for (_, count) in &row_counts {
            buffer.extend_from_slice(&count.to_le_bytes());
        }

        for (table_id, count) in &row_counts {
            match table_id {
                TableId::Module => {
                    write_rows(&mut buffer, std::slice::from_ref(&self.module), &info)?;
                }
                TableId::TypeRef => write_rows(&mut buffer, &self.type_refs, &info)?,
                TableId::MemberRef => write_rows(&mut buffer, &self.member_refs, &info)?,
                TableId::CustomAttribute => {
                    write_rows(&mut buffer, &self.custom_attributes, &info)?;
                }
                TableId::ModuleRef => write_rows(&mut buffer, &self.module_refs, &info)?,
                TableId::Assembly => {
                    write_rows(&mut buffer, std::slice::from_ref(&self.assembly), &info)?;
                }
                TableId::AssemblyRef => write_rows(&mut buffer, &self.references, &info)?,
                other => {
                    let (Some(table), Some(layout)) =
                        (self.retained.table(*other), self.retained.layout.as_ref())
                    else {
                        return Err(malformed_error!("Rows of table {} were not retained", other));
                    };
                    buffer.extend_from_slice(&transcode(*other, &table.data, *count, layout, &info)?);
                }
            }
        }

        buffer.resize((buffer.len() + 3) & !3, 0);
        Ok(buffer)
    }
}

fn write_rows<T: RowReadable + RowWritable>(
    buffer: &mut Vec<u8>,
    rows: &[T],
    info: &TableInfoRef,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let row_size = T::row_size(info) as usize;
    let mut offset = buffer.len();
    buffer.resize(offset + row_size * rows.len(), 0);

    for (index, row) in rows.iter().enumerate() {
        row.row_write(buffer, &mut offset, rid(index)?, info)?;
    }

    Ok(())
}
