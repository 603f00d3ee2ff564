use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use strongnamer::{
    metadata::identity::PublicKeyToken, strongname::verify_image, KeyMaterial, ModuleView,
};

use crate::{
    app::GlobalOptions,
    output::{emit, field, hex, Columns, Report},
};

#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub version: String,
    pub module: String,
    pub mvid: String,
    pub runtime_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub culture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_token: Option<String>,
    pub image_flags: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub references: Vec<ReferenceInfo>,
    pub friends: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ReferenceInfo {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

pub fn run(path: &Path, key: Option<&Path>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let view = ModuleView::from_file(path)
        .with_context(|| format!("failed to load module: {}", path.display()))?;
    let record = view
        .record()
        .with_context(|| format!("failed to decode module: {}", path.display()))?;

    let signature = match key {
        Some(key_path) => {
            let key = KeyMaterial::from_file(key_path)
                .with_context(|| format!("failed to load key: {}", key_path.display()))?;
            Some(verify_image(&view, &key).to_string())
        }
        None => None,
    };

    let info = ModuleInfo {
        name: record.name().to_string(),
        version: record.version().to_string(),
        module: record.module.name.clone(),
        mvid: record.fingerprint().to_string(),
        runtime_version: record.runtime_version.clone(),
        culture: record.assembly.culture.clone(),
        public_key: record.public_key().map(hex),
        public_key_token: record
            .public_key()
            .map(|public_key| PublicKeyToken::from_public_key(public_key).to_string()),
        image_flags: format!("{:?}", view.header().flags),
        signature,
        references: record
            .references
            .iter()
            .map(|reference| ReferenceInfo {
                name: reference.name.clone(),
                version: reference.version.to_string(),
                token: reference.token().map(|token| token.to_string()),
            })
            .collect(),
        friends: record
            .friend_declarations()
            .map(|declaration| declaration.text.clone())
            .collect(),
    };

    emit(&info, opts)
}

impl Report for ModuleInfo {
    fn print_text(&self) {
        field("Assembly", &self.name);
        field("Version", &self.version);
        field("Module", &self.module);
        field("Mvid", &self.mvid);
        field("Runtime", &self.runtime_version);
        if let Some(culture) = &self.culture {
            field("Culture", culture);
        }
        field("Image flags", &self.image_flags);
        match (&self.public_key_token, &self.public_key) {
            (Some(token), Some(public_key)) => {
                field("Strong-named", format!("yes ({token})"));
                field("Public key", public_key);
            }
            _ => field("Strong-named", "no"),
        }
        if let Some(signature) = &self.signature {
            field("Signature", signature);
        }

        if !self.references.is_empty() {
            println!("\nReferences:");
            let mut columns = Columns::new(&["Name", "Version", "Token"])
                .right_aligned(1)
                .prefixed("  ");
            for reference in &self.references {
                columns.push(vec![
                    reference.name.clone(),
                    reference.version.clone(),
                    reference.token.clone().unwrap_or_else(|| "-".to_string()),
                ]);
            }
            columns.print();
        }

        if !self.friends.is_empty() {
            println!("\nFriends:");
            for friend in &self.friends {
                println!("  {friend}");
            }
        }
    }
}
