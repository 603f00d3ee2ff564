//! Synthesis of module images from a handful of identity facts.
//!
//! [`ModuleBuilder`] produces complete, well-formed PE images. Besides the identity and
//! reference tables the model decodes, a built module can carry `TypeDef` rows, which the model
//! keeps as retained rows; they stand in for the content of real modules a rewrite must carry
//! through unchanged. The builder creates fixtures for tests and benchmarks, and demo modules
//! for the command line front end.

use std::{path::Path, sync::Arc};

use sha1::{Digest, Sha1};

use crate::{
    cilassembly::write::{write_image, StringHeapBuilder, WriteOptions},
    metadata::{
        cor20header::ImageFlags,
        customattributes::{
            CustomAttribute, CustomAttributeValue, FriendDeclaration, FRIEND_ATTRIBUTE_NAME,
            FRIEND_ATTRIBUTE_NAMESPACE,
        },
        identity::{AssemblyVersion, Identity, PublicKeyToken},
        record::{
            AssemblyDefinition, MemberReference, ModuleDefinition, ModuleRecord, ReferenceEntry,
            RetainedContent, RetainedTable, TypeReference,
        },
        tables::{AssemblyFlags, AssemblyHashAlgorithm, CodedIndex, TableId, TableInfo},
    },
    Result,
};

/// Name of the reference which resolves the attribute types of built modules.
pub const RUNTIME_REFERENCE: &str = "System.Runtime";
/// Token of [`RUNTIME_REFERENCE`].
pub const RUNTIME_TOKEN: [u8; 8] = [0xB0, 0x3F, 0x5F, 0x7F, 0x11, 0xD5, 0x0A, 0x3A];

const DEFAULT_RUNTIME_VERSION: &str = "v4.0.30319";

/// `Public | BeforeFieldInit`
const TYPE_DEFINITION_FLAGS: u32 = 0x0010_0001;

struct AttributeSpec {
    namespace: String,
    name: String,
    value: CustomAttributeValue,
}

/// Builder for [`ModuleRecord`]s and their images.
///
/// # Examples
///
/// ```rust
/// use strongnamer::{metadata::identity::AssemblyVersion, ModuleBuilder, ModuleRecord};
///
/// let image = ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0))
///     .reference("LibB", AssemblyVersion::new(1, 0, 0, 0))
///     .friend("LibB")
///     .to_bytes()?;
///
/// let record = ModuleRecord::from_mem(image)?;
/// assert_eq!(record.name(), "LibA");
/// assert_eq!(record.friend_declarations().count(), 1);
/// # Ok::<(), strongnamer::Error>(())
/// ```
pub struct ModuleBuilder {
    name: String,
    version: AssemblyVersion,
    culture: Option<String>,
    mvid: Option<uguid::Guid>,
    public_key: Vec<u8>,
    references: Vec<ReferenceEntry>,
    module_refs: Vec<String>,
    attributes: Vec<AttributeSpec>,
    type_definitions: Vec<(String, String)>,
    user_strings: Vec<u8>,
}

impl ModuleBuilder {
    /// Start a library module called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, version: AssemblyVersion) -> Self {
        ModuleBuilder {
            name: name.into(),
            version,
            culture: None,
            mvid: None,
            public_key: Vec::new(),
            references: Vec::new(),
            module_refs: Vec::new(),
            attributes: Vec::new(),
            type_definitions: Vec::new(),
            user_strings: Vec::new(),
        }
    }

    /// Set the module version id. Without one, an id is derived from name and version.
    #[must_use]
    pub fn mvid(mut self, mvid: uguid::Guid) -> Self {
        self.mvid = Some(mvid);
        self
    }

    /// Set the culture.
    #[must_use]
    pub fn culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = Some(culture.into());
        self
    }

    /// Give the module a strong name of its own.
    #[must_use]
    pub fn public_key(mut self, public_key: impl Into<Vec<u8>>) -> Self {
        self.public_key = public_key.into();
        self
    }

    /// Add a reference without a token.
    #[must_use]
    pub fn reference(mut self, name: impl Into<String>, version: AssemblyVersion) -> Self {
        self.references.push(ReferenceEntry::new(name, version));
        self
    }

    /// Add a reference pinned to `token`.
    #[must_use]
    pub fn signed_reference(
        mut self,
        name: impl Into<String>,
        version: AssemblyVersion,
        token: PublicKeyToken,
    ) -> Self {
        let mut reference = ReferenceEntry::new(name, version);
        reference.identity = Some(Identity::Token(token));
        self.references.push(reference);
        self
    }

    /// Add a `ModuleRef`.
    #[must_use]
    pub fn module_ref(mut self, name: impl Into<String>) -> Self {
        self.module_refs.push(name.into());
        self
    }

    /// Declare `text` as a friend module.
    #[must_use]
    pub fn friend(mut self, text: impl Into<String>) -> Self {
        self.attributes.push(AttributeSpec {
            namespace: FRIEND_ATTRIBUTE_NAMESPACE.to_string(),
            name: FRIEND_ATTRIBUTE_NAME.to_string(),
            value: CustomAttributeValue::FriendDeclaration(FriendDeclaration::new(text)),
        });
        self
    }

    /// Add an assembly level attribute of type `namespace.name` carrying `value` verbatim.
    #[must_use]
    pub fn attribute(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.attributes.push(AttributeSpec {
            namespace: namespace.into(),
            name: name.into(),
            value: CustomAttributeValue::Opaque(value.into()),
        });
        self
    }

    /// Define the type `namespace.name`.
    ///
    /// The first definition also adds the `<Module>` type. Type definitions are not decoded by
    /// the model; they end up in [`ModuleRecord::retained`].
    #[must_use]
    pub fn type_definition(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.type_definitions.push((namespace.into(), name.into()));
        self
    }

    /// Set the raw `#US` heap.
    #[must_use]
    pub fn user_strings(mut self, user_strings: Vec<u8>) -> Self {
        self.user_strings = user_strings;
        self
    }

    /// Assemble the record.
    #[must_use]
    pub fn build(self) -> ModuleRecord {
        let retained = retained_type_definitions(&self.type_definitions);

        let mvid = self
            .mvid
            .unwrap_or_else(|| derived_mvid(&self.name, self.version));

        let mut references = self.references;
        let mut type_refs = Vec::new();
        let mut member_refs = Vec::new();
        let mut custom_attributes = Vec::new();

        if !self.attributes.is_empty() {
            let mut runtime = ReferenceEntry::new(RUNTIME_REFERENCE, AssemblyVersion::new(8, 0, 0, 0));
            runtime.identity = Some(Identity::Token(PublicKeyToken::new(RUNTIME_TOKEN)));
            references.push(runtime);
            let runtime_row = references.len() as u32;

            for attribute in self.attributes {
                let type_row = match type_refs.iter().position(|type_ref: &TypeReference| {
                    type_ref.namespace == attribute.namespace && type_ref.name == attribute.name
                }) {
                    Some(index) => index + 1,
                    None => {
                        type_refs.push(TypeReference {
                            resolution_scope: CodedIndex::new(TableId::AssemblyRef, runtime_row),
                            name: attribute.name,
                            namespace: attribute.namespace,
                        });
                        member_refs.push(MemberReference {
                            class: CodedIndex::new(TableId::TypeRef, type_refs.len() as u32),
                            name: ".ctor".to_string(),
                            signature: vec![0x20, 0x01, 0x01, 0x0E],
                        });
                        type_refs.len()
                    }
                };

                custom_attributes.push(CustomAttribute {
                    parent: CodedIndex::new(TableId::Assembly, 1),
                    constructor: CodedIndex::new(TableId::MemberRef, type_row as u32),
                    value: attribute.value,
                });
            }
        }

        let mut flags = 0;
        if !self.public_key.is_empty() {
            flags |= AssemblyFlags::PUBLIC_KEY;
        }

        let sorted_tables = if custom_attributes.is_empty() {
            0
        } else {
            TableId::CustomAttribute.bit()
        };

        ModuleRecord {
            runtime_version: DEFAULT_RUNTIME_VERSION.to_string(),
            major_runtime_version: 2,
            minor_runtime_version: 5,
            image_flags: ImageFlags::ILONLY,
            entry_point_token: 0,
            sorted_tables,
            module: ModuleDefinition {
                generation: 0,
                name: format!("{}.dll", self.name),
                mvid,
                enc_id: None,
                enc_base_id: None,
            },
            assembly: AssemblyDefinition {
                hash_algorithm: AssemblyHashAlgorithm::SHA1,
                version: self.version,
                flags,
                public_key: self.public_key,
                name: self.name,
                culture: self.culture,
            },
            references,
            type_refs,
            member_refs,
            module_refs: self.module_refs,
            custom_attributes,
            user_strings: self.user_strings,
            retained,
        }
    }

    /// Build the record and serialize it as an unsigned image.
    ///
    /// # Errors
    /// Returns an error if the record cannot be encoded.
    pub fn to_bytes(self) -> Result<Vec<u8>> {
        Ok(write_image(&self.build(), &WriteOptions::unsigned())?.into_bytes())
    }

    /// Build the record and write it as an unsigned image to `path`.
    ///
    /// # Errors
    /// Returns an error if the record cannot be encoded or the file cannot be written.
    pub fn write_to(self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

/// `TypeDef` rows for `definitions`, headed by `<Module>`, with the strings heap they index.
fn retained_type_definitions(definitions: &[(String, String)]) -> RetainedContent {
    if definitions.is_empty() {
        return RetainedContent::default();
    }

    let mut strings = StringHeapBuilder::new();
    let mut intern = |value: &str| -> u16 {
        strings
            .intern(value)
            .ok()
            .and_then(|index| u16::try_from(index).ok())
            .unwrap_or(0)
    };

    let mut rows = Vec::new();
    let mut push_row = |flags: u32, name: u16, namespace: u16| {
        rows.extend_from_slice(&flags.to_le_bytes());
        rows.extend_from_slice(&name.to_le_bytes());
        rows.extend_from_slice(&namespace.to_le_bytes());
        // extends, field list, method list
        rows.extend_from_slice(&0u16.to_le_bytes());
        rows.extend_from_slice(&1u16.to_le_bytes());
        rows.extend_from_slice(&1u16.to_le_bytes());
    };

    push_row(0, intern("<Module>"), 0);
    for (namespace, name) in definitions {
        let name = intern(name);
        let namespace = intern(namespace);
        push_row(TYPE_DEFINITION_FLAGS, name, namespace);
    }

    let count = u32::try_from(definitions.len() + 1).unwrap_or(u32::MAX);
    RetainedContent {
        image: None,
        strings: strings.finish(),
        blobs: Vec::new(),
        guids: Vec::new(),
        layout: Some(Arc::new(TableInfo::new_with(
            &[(TableId::TypeDef, count)],
            false,
            false,
            false,
        ))),
        tables: vec![RetainedTable {
            id: TableId::TypeDef,
            rows: count,
            data: rows,
        }],
    }
}

fn derived_mvid(name: &str, version: AssemblyVersion) -> uguid::Guid {
    let digest = Sha1::digest(format!("{name}, Version={version}").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uguid::Guid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friend_scaffolding() {
        let record = ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0))
            .reference("LibB", AssemblyVersion::new(1, 0, 0, 0))
            .friend("LibB")
            .friend("LibC.Tests")
            .attribute("System.Reflection", "AssemblyTitleAttribute", vec![1, 0, 0, 0, 0])
            .build();

        assert_eq!(record.module.name, "LibA.dll");
        assert_eq!(record.references.len(), 2);
        assert_eq!(record.references[1].name, RUNTIME_REFERENCE);
        assert!(record.references[1].has_token());
        assert_eq!(record.type_refs.len(), 2);
        assert_eq!(record.member_refs.len(), 2);
        assert_eq!(record.custom_attributes.len(), 3);
        assert_eq!(
            record.custom_attributes[1].constructor,
            CodedIndex::new(TableId::MemberRef, 1)
        );
        assert_eq!(record.friend_declarations().count(), 2);
        assert!(!record.has_public_key());
    }

    #[test]
    fn derived_ids() {
        let a = ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0)).build();
        let again = ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0)).build();
        let b = ModuleBuilder::new("LibB", AssemblyVersion::new(1, 0, 0, 0)).build();
        assert_eq!(a.fingerprint(), again.fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.sorted_tables, 0);
    }

    #[test]
    fn type_definitions() {
        let record = ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0))
            .type_definition("LibA", "Widget")
            .type_definition("LibA.Internal", "Helper")
            .build();

        let table = record.retained.table(TableId::TypeDef).unwrap();
        assert_eq!(table.rows, 3);
        assert_eq!(table.data.len(), 3 * 14);
        assert_eq!(&record.retained.strings[1..10], b"<Module>\0");

        let image = ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0))
            .type_definition("LibA", "Widget")
            .to_bytes()
            .unwrap();
        let reread = ModuleRecord::from_mem(image).unwrap();
        assert_eq!(reread.retained.table(TableId::TypeDef).unwrap().rows, 2);
        assert!(ModuleBuilder::new("LibA", AssemblyVersion::default())
            .build()
            .retained
            .tables
            .is_empty());
    }

    #[test]
    fn image_roundtrip() {
        let builder = ModuleBuilder::new("LibB", AssemblyVersion::new(2, 1, 0, 0))
            .culture("de")
            .module_ref("native.so");
        let expected = ModuleBuilder::new("LibB", AssemblyVersion::new(2, 1, 0, 0))
            .culture("de")
            .module_ref("native.so")
            .build();

        let mut record = ModuleRecord::from_mem(builder.to_bytes().unwrap()).unwrap();
        assert!(record.retained.image.is_some());
        record.retained = expected.retained.clone();
        assert_eq!(record, expected);
        assert_eq!(record.identity().to_string(), "LibB, Version=2.1.0.0, Culture=de, PublicKeyToken=null");
    }
}
