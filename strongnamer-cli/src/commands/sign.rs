use serde::Serialize;
use strongnamer::{
    CachePolicy, KeySource, ModuleState, Signer, SignerOptions, SigningRequest, UnresolvedPolicy,
};

use crate::{
    app::{CacheMode, GlobalOptions, SignArgs},
    output::{emit, Columns, Report},
};

#[derive(Debug, Serialize)]
pub struct SignResult {
    pub modules: Vec<ModuleResult>,
    pub written: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub copy_local: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ModuleResult {
    pub input: String,
    pub state: &'static str,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn state_name(state: &ModuleState) -> &'static str {
    match state {
        ModuleState::NotYetAvailable => "missing",
        ModuleState::AlreadySigned => "already-signed",
        ModuleState::CacheHit => "up-to-date",
        ModuleState::Signed => "signed",
        ModuleState::Failed(_) => "failed",
    }
}

pub fn run(args: &SignArgs, opts: &GlobalOptions) -> anyhow::Result<()> {
    let options = SignerOptions {
        parallel: !args.sequential,
        cache: match args.cache {
            CacheMode::Fingerprint => CachePolicy::Fingerprint,
            CacheMode::Key => CachePolicy::FingerprintAndKey,
            CacheMode::Off => CachePolicy::Disabled,
        },
        unresolved_references: if args.leave_unresolved {
            UnresolvedPolicy::LeaveUnset
        } else {
            UnresolvedPolicy::Stamp
        },
        search_directories: args.search_dir.clone(),
    };

    let request = SigningRequest::new(
        args.modules.clone(),
        KeySource::File(args.key.clone()),
        &args.output,
    )
    .with_copy_local(args.copy_local.clone());

    let report = Signer::new(options).sign(&request)?;

    let result = SignResult {
        modules: report
            .modules
            .iter()
            .map(|outcome| ModuleResult {
                input: outcome.input.display().to_string(),
                state: state_name(&outcome.state),
                path: outcome.final_path.display().to_string(),
                error: match &outcome.state {
                    ModuleState::Failed(reason) => Some(reason.clone()),
                    _ => None,
                },
            })
            .collect(),
        written: report.written(),
        failed: report.failed(),
        copy_local: report
            .copy_local
            .iter()
            .map(|path| path.display().to_string())
            .collect(),
    };

    emit(&result, opts)
}

impl Report for SignResult {
    fn print_text(&self) {
        let mut columns = Columns::new(&["Module", "State", "Path"]);
        for module in &self.modules {
            columns.push(vec![
                module.input.clone(),
                module.state.to_string(),
                module.path.clone(),
            ]);
        }
        columns.print();

        for module in &self.modules {
            if let Some(error) = &module.error {
                eprintln!("warning: {}: {}", module.input, error);
            }
        }
        println!(
            "\n{} written, {} failed, {} modules",
            self.written,
            self.failed,
            self.modules.len()
        );
    }
}
