//! Print the CustomResourceDefinitions for every modelled Istio resource

use clap::Args;
use istio_common::crd::all_crds;

use crate::Result;

#[derive(Args, Debug)]
pub struct CrdsArgs {
    /// Print a single compact JSON line per CRD instead of one pretty array
    #[arg(long)]
    pub compact: bool,
}

pub fn run(args: CrdsArgs) -> Result<()> {
    println!("{}", render(&args)?);
    Ok(())
}

fn render(args: &CrdsArgs) -> Result<String> {
    let crds = all_crds();
    if args.compact {
        let lines = crds
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(lines.join("\n"))
    } else {
        Ok(serde_json::to_string_pretty(&crds)?)
    }
}
