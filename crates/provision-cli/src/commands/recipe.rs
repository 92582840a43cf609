use anyhow::{Result, bail};
use docker_provisioner::image::{self, ImagePlan};
use docker_provisioner::EngineEnvironment;
use std::path::Path;

use crate::config;

pub fn run(hosts_path: &Path, only: Option<&str>) -> Result<()> {
    let file = config::load(hosts_path)?;
    let env = EngineEnvironment::from_env();
    let working_dir = file.options.resolve_working_dir();

    let mut failed = 0;
    for host in file.select(only)? {
        match image::plan(host, env.build_args.as_deref(), &working_dir) {
            Ok(plan) => print!("{}", describe(&host.name, &plan)),
            Err(e) => {
                eprintln!("# {}: {}", host.name, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} hosts have no usable image", failed);
    }
    Ok(())
}

fn describe(name: &str, plan: &ImagePlan) -> String {
    match plan {
        ImagePlan::Pull { reference } => format!("# {}: pull {} and use it as-is\n\n", name, reference),
        ImagePlan::Directory {
            context,
            dockerfile,
            build_args,
        } => format!(
            "# {}: build {} in {} with {:?}\n\n",
            name,
            dockerfile,
            context.display(),
            build_args
        ),
        ImagePlan::Recipe {
            strategy,
            recipe,
            build_args,
        } => format!(
            "# {} ({:?}, build args {:?})\n{}\n",
            name,
            strategy,
            build_args,
            recipe.render()
        ),
    }
}
