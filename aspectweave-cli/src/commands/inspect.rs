use std::path::Path;

use anyhow::Context;
use aspectweave::weaver::{MemberPlan, Weaver};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{load_module, load_resolver},
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
pub struct InspectResult {
    pub module: String,
    pub processed: bool,
    pub members: Vec<MemberPlan>,
}

pub fn run(
    path: &Path,
    references: &str,
    member: Option<&str>,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let module = load_module(path)?;
    let resolver = load_resolver(references)?;
    let mut members = Weaver::new(&resolver)
        .plan(&module)
        .with_context(|| format!("failed to resolve aspects of {}", module.name))?;
    if let Some(filter) = member {
        members.retain(|plan| plan.member.contains(filter));
    }

    let result = InspectResult {
        module: module.name.clone(),
        processed: Weaver::is_processed(&module),
        members,
    };

    print_output(&result, opts, |r| {
        if r.processed {
            println!("{} is already woven; plans reflect the original declarations", r.module);
        }
        if r.members.is_empty() {
            println!("No members of {} receive aspects.", r.module);
            return;
        }

        let mut table = TabWriter::new(vec![
            ("MEMBER", Align::Left),
            ("#", Align::Right),
            ("ASPECT", Align::Left),
            ("ORDER", Align::Right),
            ("DECLARED AT", Align::Left),
        ]);
        for plan in &r.members {
            for (i, aspect) in plan.aspects.iter().enumerate() {
                let member = if i == 0 { plan.member.clone() } else { String::new() };
                table.row(vec![
                    member,
                    (i + 1).to_string(),
                    aspect.aspect_type.clone(),
                    aspect.order.to_string(),
                    aspect.declared_at.clone(),
                ]);
            }
        }
        table.print();
        println!();
        let applications: usize = r.members.iter().map(|p| p.aspects.len()).sum();
        println!("{} members, {applications} aspect applications", r.members.len());
    })
}
