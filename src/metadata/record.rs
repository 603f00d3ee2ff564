//! Owned, mutable model of one module.
//!
//! A [`ModuleRecord`] holds everything needed to write the module back out. The tables which
//! describe identity and cross-module references are decoded with their heap values resolved;
//! the writer interns those values again. Everything else the image contains is kept as
//! [`RetainedContent`]: the original heaps, the raw rows of every other table and the PE image
//! itself, so a rewrite reproduces all of it unchanged.

use log::debug;
use std::{path::Path, sync::Arc};
use strum::IntoEnumIterator;

use crate::{
    metadata::{
        cor20header::ImageFlags,
        customattributes::{
            CustomAttribute, CustomAttributeValue, FriendDeclaration, FRIEND_ATTRIBUTE_NAME,
            FRIEND_ATTRIBUTE_NAMESPACE,
        },
        identity::{AssemblyIdentity, AssemblyVersion, Identity, PublicKeyToken},
        tables::{
            AssemblyFlags, AssemblyHashAlgorithm, AssemblyRaw, AssemblyRefRaw, CodedIndex,
            CustomAttributeRaw, MemberRefRaw, MetadataTable, ModuleRaw, ModuleRefRaw,
            TableAccess, TableId, TableInfoRef, TypeRefRaw,
        },
        view::{ModuleView, ModuleViewData},
    },
    Error, Result,
};

/// The `Module` row: the module's file name and its version id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDefinition {
    /// Reserved, 0
    pub generation: u16,
    /// Module file name, e.g. `LibA.dll`
    pub name: String,
    /// Module version id, unique per compilation
    pub mvid: uguid::Guid,
    /// Edit-and-continue id
    pub enc_id: Option<uguid::Guid>,
    /// Edit-and-continue base id
    pub enc_base_id: Option<uguid::Guid>,
}

/// The `Assembly` row: the identity other modules bind against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyDefinition {
    /// A value of [`AssemblyHashAlgorithm`]
    pub hash_algorithm: u32,
    /// Version
    pub version: AssemblyVersion,
    /// Bitmask of [`AssemblyFlags`]
    pub flags: u32,
    /// Public key blob, empty if the module has no strong name
    pub public_key: Vec<u8>,
    /// Simple name
    pub name: String,
    /// Culture, `None` if neutral
    pub culture: Option<String>,
}

/// An `AssemblyRef` row: a reference to another module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEntry {
    /// Simple name of the referenced module
    pub name: String,
    /// Referenced version
    pub version: AssemblyVersion,
    /// Bitmask of [`AssemblyFlags`]
    pub flags: u32,
    /// Culture, `None` if neutral
    pub culture: Option<String>,
    /// Public key or token; `None` means the referenced module is expected unsigned
    pub identity: Option<Identity>,
    /// Hash of the referenced module, usually empty
    pub hash_value: Vec<u8>,
}

impl ReferenceEntry {
    /// Create a tokenless reference.
    #[must_use]
    pub fn new(name: impl Into<String>, version: AssemblyVersion) -> Self {
        ReferenceEntry {
            name: name.into(),
            version,
            flags: 0,
            culture: None,
            identity: None,
            hash_value: Vec::new(),
        }
    }

    /// Whether the reference pins a signer.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.identity
            .as_ref()
            .is_some_and(|identity| !identity.blob().is_empty())
    }

    /// The token of the referenced signer, if any.
    #[must_use]
    pub fn token(&self) -> Option<PublicKeyToken> {
        if self.has_token() {
            self.identity.as_ref().map(Identity::to_token)
        } else {
            None
        }
    }

    /// Pin the reference to `token`.
    pub fn set_token(&mut self, token: PublicKeyToken) {
        self.identity = Some(Identity::Token(token));
        self.flags &= !AssemblyFlags::PUBLIC_KEY;
    }

    /// Full identity of the referenced module.
    #[must_use]
    pub fn identity(&self) -> AssemblyIdentity {
        AssemblyIdentity::new(
            self.name.clone(),
            self.version,
            self.culture.clone(),
            self.identity.clone().filter(|identity| !identity.blob().is_empty()),
        )
    }
}

/// A `TypeRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeReference {
    /// Where the type lives (`ResolutionScope`)
    pub resolution_scope: CodedIndex,
    /// Type name
    pub name: String,
    /// Namespace, empty for the global namespace
    pub namespace: String,
}

/// A `MemberRef` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberReference {
    /// Declaring type (`MemberRefParent`)
    pub class: CodedIndex,
    /// Member name, `.ctor` for constructors
    pub name: String,
    /// Member signature blob
    pub signature: Vec<u8>,
}

/// The raw rows of one table which is not decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedTable {
    /// The table
    pub id: TableId,
    /// Number of rows in `data`
    pub rows: u32,
    /// The rows, laid out under [`RetainedContent::layout`]
    pub data: Vec<u8>,
}

/// Image content the model does not decode, carried through a rewrite unchanged.
///
/// Records built in memory start with an empty instance; the writer then lays out a fresh PE
/// image and fresh heaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetainedContent {
    /// The PE image the record was read from
    pub image: Option<Arc<[u8]>>,
    /// The `#Strings` heap as read
    pub strings: Vec<u8>,
    /// The `#Blob` heap as read
    pub blobs: Vec<u8>,
    /// The `#GUID` heap as read
    pub guids: Vec<u8>,
    /// Row counts and column widths the retained rows are laid out with
    pub layout: Option<TableInfoRef>,
    /// Rows of every table which is not decoded, in table id order
    pub tables: Vec<RetainedTable>,
}

impl RetainedContent {
    /// Rows of `id`, if the table is retained.
    #[must_use]
    pub fn table(&self, id: TableId) -> Option<&RetainedTable> {
        self.tables.iter().find(|table| table.id == id)
    }
}

/// The owned model of one module image.
///
/// # Examples
///
/// ```rust,no_run
/// use strongnamer::ModuleRecord;
/// use std::path::Path;
///
/// let record = ModuleRecord::from_file(Path::new("LibA.dll"))?;
/// println!("{} ({})", record.identity(), record.fingerprint());
/// for reference in &record.references {
///     println!("  -> {}", reference.identity());
/// }
/// # Ok::<(), strongnamer::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Runtime version string of the metadata root
    pub runtime_version: String,
    /// Major runtime version of the image header
    pub major_runtime_version: u16,
    /// Minor runtime version of the image header
    pub minor_runtime_version: u16,
    /// Image header flags
    pub image_flags: ImageFlags,
    /// Entry point token, 0 for libraries
    pub entry_point_token: u32,
    /// `sorted` bit vector of the `#~` header
    pub sorted_tables: u64,
    /// The `Module` row
    pub module: ModuleDefinition,
    /// The `Assembly` row
    pub assembly: AssemblyDefinition,
    /// `AssemblyRef` rows, in row order
    pub references: Vec<ReferenceEntry>,
    /// `TypeRef` rows, in row order
    pub type_refs: Vec<TypeReference>,
    /// `MemberRef` rows, in row order
    pub member_refs: Vec<MemberReference>,
    /// `ModuleRef` names, in row order
    pub module_refs: Vec<String>,
    /// `CustomAttribute` rows, in row order
    pub custom_attributes: Vec<CustomAttribute>,
    /// Raw `#US` heap
    pub user_strings: Vec<u8>,
    /// Everything else the image carries
    pub retained: RetainedContent,
}

impl ModuleRecord {
    /// Load the module image at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a supported module image.
    pub fn from_file(path: &Path) -> Result<Self> {
        ModuleView::from_file(path)?.record()
    }

    /// Load a module image from memory.
    ///
    /// # Errors
    /// Returns an error if `data` is not a supported module image.
    pub fn from_mem(data: Vec<u8>) -> Result<Self> {
        ModuleView::from_mem(data)?.record()
    }

    /// Simple name of the module.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.assembly.name
    }

    /// Version of the module.
    #[must_use]
    pub fn version(&self) -> AssemblyVersion {
        self.assembly.version
    }

    /// The content fingerprint: the module version id.
    #[must_use]
    pub fn fingerprint(&self) -> uguid::Guid {
        self.module.mvid
    }

    /// Whether the module already carries a strong name.
    #[must_use]
    pub fn has_public_key(&self) -> bool {
        self.assembly.flags & AssemblyFlags::PUBLIC_KEY != 0 || !self.assembly.public_key.is_empty()
    }

    /// The public key blob, if any.
    #[must_use]
    pub fn public_key(&self) -> Option<&[u8]> {
        if self.assembly.public_key.is_empty() {
            None
        } else {
            Some(&self.assembly.public_key)
        }
    }

    /// Full identity of the module.
    #[must_use]
    pub fn identity(&self) -> AssemblyIdentity {
        AssemblyIdentity::new(
            self.assembly.name.clone(),
            self.assembly.version,
            self.assembly.culture.clone(),
            self.public_key()
                .map(|public_key| Identity::PubKey(public_key.to_vec())),
        )
    }

    /// Bind the module identity to `public_key` with SHA-1 as the hash algorithm.
    pub fn set_strong_name(&mut self, public_key: &[u8]) {
        self.assembly.hash_algorithm = AssemblyHashAlgorithm::SHA1;
        self.assembly.public_key = public_key.to_vec();
        self.assembly.flags |= AssemblyFlags::PUBLIC_KEY;
    }

    /// The friend declarations of the module.
    pub fn friend_declarations(&self) -> impl Iterator<Item = &FriendDeclaration> {
        self.custom_attributes
            .iter()
            .filter_map(|attribute| match &attribute.value {
                CustomAttributeValue::FriendDeclaration(declaration) => Some(declaration),
                CustomAttributeValue::Opaque(_) => None,
            })
    }

    /// Mutable access to the friend declarations of the module.
    pub fn friend_declarations_mut(&mut self) -> impl Iterator<Item = &mut FriendDeclaration> {
        self.custom_attributes
            .iter_mut()
            .filter_map(|attribute| match &mut attribute.value {
                CustomAttributeValue::FriendDeclaration(declaration) => Some(declaration),
                CustomAttributeValue::Opaque(_) => None,
            })
    }

    /// Build the model from a decoded image.
    ///
    /// # Arguments
    ///
    /// * `view` - The decoded image.
    ///
    /// # Errors
    ///
    /// Returns an error if a heap index is invalid, or [`crate::Error::Unsupported`] if the
    /// image has no `Assembly` row.
    pub fn from_view(view: &ModuleViewData<'_>) -> Result<Self> {
        let module_table: Option<&MetadataTable<ModuleRaw>> = view.tables.table();
        let module_row = match module_table {
            Some(table) if table.row_count() == 1 => table
                .get(1)
                .ok_or_else(|| malformed_error!("Module row cannot be decoded"))?,
            _ => return Err(malformed_error!("Image must carry exactly one Module row")),
        };

        let assembly_table: Option<&MetadataTable<AssemblyRaw>> = view.tables.table();
        let assembly_row = match assembly_table {
            Some(table) if table.row_count() == 1 => table
                .get(1)
                .ok_or_else(|| malformed_error!("Assembly row cannot be decoded"))?,
            Some(_) => return Err(malformed_error!("Image carries more than one Assembly row")),
            None => {
                return Err(Error::Unsupported(
                    "Module has no assembly manifest".to_string(),
                ))
            }
        };

        let module = ModuleDefinition {
            generation: module_row.generation,
            name: required_string(view, module_row.name)?,
            mvid: view.guid_at(module_row.mvid)?.unwrap_or(uguid::Guid::ZERO),
            enc_id: view.guid_at(module_row.encid)?,
            enc_base_id: view.guid_at(module_row.encbaseid)?,
        };

        let assembly = AssemblyDefinition {
            hash_algorithm: assembly_row.hash_alg_id,
            version: AssemblyVersion::new(
                assembly_row.major_version,
                assembly_row.minor_version,
                assembly_row.build_number,
                assembly_row.revision_number,
            ),
            flags: assembly_row.flags,
            public_key: view.blob_at(assembly_row.public_key)?.to_vec(),
            name: required_string(view, assembly_row.name)?,
            culture: optional_string(view, assembly_row.culture)?,
        };

        let mut references = Vec::new();
        let reference_table: Option<&MetadataTable<AssemblyRefRaw>> = view.tables.table();
        if let Some(table) = reference_table {
            for row in table.iter() {
                references.push(reference_entry(view, &row?)?);
            }
        }

        let mut type_refs = Vec::new();
        let type_ref_table: Option<&MetadataTable<TypeRefRaw>> = view.tables.table();
        if let Some(table) = type_ref_table {
            for row in table.iter() {
                let row = row?;
                type_refs.push(TypeReference {
                    resolution_scope: row.resolution_scope,
                    name: required_string(view, row.type_name)?,
                    namespace: optional_string(view, row.type_namespace)?.unwrap_or_default(),
                });
            }
        }

        let mut member_refs = Vec::new();
        let member_ref_table: Option<&MetadataTable<MemberRefRaw>> = view.tables.table();
        if let Some(table) = member_ref_table {
            for row in table.iter() {
                let row = row?;
                member_refs.push(MemberReference {
                    class: row.class,
                    name: required_string(view, row.name)?,
                    signature: view.blob_at(row.signature)?.to_vec(),
                });
            }
        }

        let mut module_refs = Vec::new();
        let module_ref_table: Option<&MetadataTable<ModuleRefRaw>> = view.tables.table();
        if let Some(table) = module_ref_table {
            for row in table.iter() {
                module_refs.push(required_string(view, row?.name)?);
            }
        }

        let mut custom_attributes = Vec::new();
        let attribute_table: Option<&MetadataTable<CustomAttributeRaw>> = view.tables.table();
        if let Some(table) = attribute_table {
            for row in table.iter() {
                let row = row?;
                let blob = view.blob_at(row.value)?;
                let value = if is_friend_constructor(&type_refs, &member_refs, row.constructor) {
                    match FriendDeclaration::decode(blob) {
                        Ok(declaration) => CustomAttributeValue::FriendDeclaration(declaration),
                        Err(error) => {
                            debug!(
                                "{}: friend declaration {} kept opaque - {}",
                                assembly.name, row.rid, error
                            );
                            CustomAttributeValue::Opaque(blob.to_vec())
                        }
                    }
                } else {
                    CustomAttributeValue::Opaque(blob.to_vec())
                };

                custom_attributes.push(CustomAttribute {
                    parent: row.parent,
                    constructor: row.constructor,
                    value,
                });
            }
        }

        let mut tables = Vec::new();
        for table_id in TableId::iter().filter(|id| !id.is_decoded()) {
            if let Some(data) = view.tables.raw_table(table_id) {
                tables.push(RetainedTable {
                    id: table_id,
                    rows: view.tables.info.rows(table_id),
                    data: data.to_vec(),
                });
            }
        }

        let retained = RetainedContent {
            image: Some(Arc::from(view.data)),
            strings: view.string_heap.to_vec(),
            blobs: view.blob_heap.to_vec(),
            guids: view.guid_heap.to_vec(),
            layout: Some(view.tables.info.clone()),
            tables,
        };

        Ok(ModuleRecord {
            runtime_version: view.root.version.clone(),
            major_runtime_version: view.header.major_runtime_version,
            minor_runtime_version: view.header.minor_runtime_version,
            image_flags: view.header.flags,
            entry_point_token: view.header.entry_point_token,
            sorted_tables: view.tables.sorted,
            module,
            assembly,
            references,
            type_refs,
            member_refs,
            module_refs,
            custom_attributes,
            user_strings: view.user_strings.to_vec(),
            retained,
        })
    }
}

fn required_string(view: &ModuleViewData<'_>, index: u32) -> Result<String> {
    Ok(view.string_at(index)?.unwrap_or_default().to_string())
}

fn optional_string(view: &ModuleViewData<'_>, index: u32) -> Result<Option<String>> {
    Ok(view
        .string_at(index)?
        .filter(|value| !value.is_empty())
        .map(str::to_string))
}

fn reference_entry(view: &ModuleViewData<'_>, row: &AssemblyRefRaw) -> Result<ReferenceEntry> {
    let blob = view.blob_at(row.public_key_or_token)?;
    let identity = if blob.is_empty() {
        None
    } else {
        Some(Identity::from(blob, row.flags & AssemblyFlags::PUBLIC_KEY != 0)?)
    };

    Ok(ReferenceEntry {
        name: required_string(view, row.name)?,
        version: AssemblyVersion::new(
            row.major_version,
            row.minor_version,
            row.build_number,
            row.revision_number,
        ),
        flags: row.flags,
        culture: optional_string(view, row.culture)?,
        identity,
        hash_value: view.blob_at(row.hash_value)?.to_vec(),
    })
}

/// Whether `constructor` is a constructor of `InternalsVisibleToAttribute`.
fn is_friend_constructor(
    type_refs: &[TypeReference],
    member_refs: &[MemberReference],
    constructor: CodedIndex,
) -> bool {
    if constructor.tag != TableId::MemberRef || constructor.row == 0 {
        return false;
    }
    let Some(member) = member_refs.get(constructor.row as usize - 1) else {
        return false;
    };
    if member.class.tag != TableId::TypeRef || member.class.row == 0 {
        return false;
    }

    type_refs
        .get(member.class.row as usize - 1)
        .is_some_and(|type_ref| {
            type_ref.name == FRIEND_ATTRIBUTE_NAME && type_ref.namespace == FRIEND_ATTRIBUTE_NAMESPACE
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn friend_type_refs() -> (Vec<TypeReference>, Vec<MemberReference>) {
        let type_refs = vec![
            TypeReference {
                resolution_scope: CodedIndex::new(TableId::AssemblyRef, 1),
                name: "Object".to_string(),
                namespace: "System".to_string(),
            },
            TypeReference {
                resolution_scope: CodedIndex::new(TableId::AssemblyRef, 1),
                name: FRIEND_ATTRIBUTE_NAME.to_string(),
                namespace: FRIEND_ATTRIBUTE_NAMESPACE.to_string(),
            },
        ];
        let member_refs = vec![
            MemberReference {
                class: CodedIndex::new(TableId::TypeRef, 1),
                name: ".ctor".to_string(),
                signature: vec![0x20, 0x00, 0x01],
            },
            MemberReference {
                class: CodedIndex::new(TableId::TypeRef, 2),
                name: ".ctor".to_string(),
                signature: vec![0x20, 0x01, 0x01, 0x0E],
            },
        ];
        (type_refs, member_refs)
    }

    #[test]
    fn friend_constructor_detection() {
        let (type_refs, member_refs) = friend_type_refs();

        assert!(is_friend_constructor(
            &type_refs,
            &member_refs,
            CodedIndex::new(TableId::MemberRef, 2)
        ));
        assert!(!is_friend_constructor(
            &type_refs,
            &member_refs,
            CodedIndex::new(TableId::MemberRef, 1)
        ));
        assert!(!is_friend_constructor(
            &type_refs,
            &member_refs,
            CodedIndex::new(TableId::MemberRef, 7)
        ));
        assert!(!is_friend_constructor(
            &type_refs,
            &member_refs,
            CodedIndex::new(TableId::MethodDef, 2)
        ));
    }

    #[test]
    fn reference_tokens() {
        let mut reference = ReferenceEntry::new("LibB", AssemblyVersion::new(1, 0, 0, 0));
        assert!(!reference.has_token());
        assert!(reference.token().is_none());

        reference.identity = Some(Identity::PubKey(Vec::new()));
        assert!(!reference.has_token());

        let token = PublicKeyToken::from_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        reference.flags = AssemblyFlags::PUBLIC_KEY;
        reference.set_token(token);
        assert!(reference.has_token());
        assert_eq!(reference.token(), Some(token));
        assert_eq!(reference.flags & AssemblyFlags::PUBLIC_KEY, 0);
        assert_eq!(
            reference.identity().display_name(),
            "LibB, Version=1.0.0.0, Culture=neutral, PublicKeyToken=0102030405060708"
        );
    }
}
