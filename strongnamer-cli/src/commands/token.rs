use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use strongnamer::KeyMaterial;

use crate::{
    app::GlobalOptions,
    output::{emit, field, hex, Report},
};

#[derive(Debug, Serialize)]
pub struct TokenInfo {
    pub token: String,
    pub public_key: String,
    pub bit_length: u32,
    pub can_sign: bool,
}

pub fn run(path: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let key = KeyMaterial::from_file(path)
        .with_context(|| format!("failed to load key: {}", path.display()))?;

    let info = TokenInfo {
        token: key.token().to_string(),
        public_key: hex(key.public_key()),
        bit_length: key.bit_length(),
        can_sign: key.can_sign(),
    };

    emit(&info, opts)
}

impl Report for TokenInfo {
    fn print_text(&self) {
        field("Token", &self.token);
        field("Key size", format!("{} bits", self.bit_length));
        let kind = if self.can_sign {
            "key pair"
        } else {
            "public key only (delay signing)"
        };
        field("Container", kind);
        field("Public key", &self.public_key);
    }
}
