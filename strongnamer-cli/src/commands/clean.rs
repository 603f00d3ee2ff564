use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use strongnamer::IncrementalCache;

use crate::{
    app::GlobalOptions,
    output::{emit, Report},
};

#[derive(Debug, Serialize)]
pub struct CleanResult {
    pub output_dir: String,
    pub removed: usize,
}

pub fn run(output_dir: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let removed = IncrementalCache::clear(output_dir)
        .with_context(|| format!("failed to clean {}", output_dir.display()))?;

    let result = CleanResult {
        output_dir: output_dir.display().to_string(),
        removed,
    };
    emit(&result, opts)
}

impl Report for CleanResult {
    fn print_text(&self) {
        println!("Removed {} modules from {}", self.removed, self.output_dir);
    }
}
