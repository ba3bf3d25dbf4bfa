use std::path::{Path, PathBuf};

use anyhow::Context;
use aspectweave::{weaver::WeaveOutcome, WeaveConfig, WeaveTask};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::file_display_name,
    output::{print_output, Align, TabWriter},
};

pub struct WeaveOptions<'a> {
    pub references: &'a str,
    pub key_file: Option<&'a Path>,
    pub key_container: Option<&'a str>,
    pub key_store: Option<&'a Path>,
    pub symbols: bool,
    pub global: &'a GlobalOptions,
}

#[derive(Debug, Serialize)]
pub struct WeaveResult {
    pub path: String,
    pub signed: bool,
    #[serde(flatten)]
    pub outcome: WeaveOutcome,
}

pub fn run(path: &Path, opts: &WeaveOptions<'_>) -> anyhow::Result<()> {
    let mut config = WeaveConfig::new(PathBuf::from(path))
        .with_reference_list(opts.references)
        .with_symbols(opts.symbols);
    if let Some(key_file) = opts.key_file {
        config = config.with_key_file(key_file);
    }
    if let Some(container) = opts.key_container {
        config = config.with_key_container(container);
    }
    if let Some(store) = opts.key_store {
        config = config.with_key_store(store);
    }
    let signed = config.signs();

    let outcome = WeaveTask::new(config)
        .run()
        .with_context(|| format!("failed to weave {}", path.display()))?;

    let result = WeaveResult {
        path: path.display().to_string(),
        signed,
        outcome,
    };

    print_output(&result, opts.global, |r| {
        let name = file_display_name(path);
        match &r.outcome {
            WeaveOutcome::Woven(report) => {
                println!(
                    "Wove {} aspect instances into {} members of {name}",
                    report.emitted_aspects,
                    report.members.len()
                );
                println!("  Initializer: {}", report.initializer);
                if r.signed {
                    println!("  Strong name: signed");
                }
                println!();

                let mut table = TabWriter::new(vec![
                    ("MEMBER", Align::Left),
                    ("KIND", Align::Left),
                    ("ASPECTS", Align::Right),
                    ("SLOTS", Align::Left),
                ])
                .indent("  ");
                for member in &report.members {
                    table.row(vec![
                        member.plan.member.clone(),
                        member.plan.kind.clone(),
                        member.plan.aspects.len().to_string(),
                        member.fields.join(", "),
                    ]);
                }
                table.print();
            }
            WeaveOutcome::NoAspects => println!("{name}: no aspects detected, module unchanged"),
            WeaveOutcome::AlreadyProcessed => println!("{name}: already woven, module unchanged"),
        }
    })
}
