//! `certprov plan`

use anyhow::Result;

use super::{load_documents, plan_failed, print_plan};
use crate::Context;
use crate::cli::SourceArgs;
use crate::config::Settings;
use crate::ui;

pub fn run(ctx: &Context, args: &SourceArgs) -> Result<u8> {
    let settings = Settings::load()?;
    let documents = load_documents(args, &settings)?;

    let plan = match provision::plan(documents) {
        Ok(plan) => plan,
        Err(e) => return Ok(plan_failed(&e)),
    };

    print_plan(&plan);
    if !ctx.quiet {
        println!();
        ui::info("Run `certprov apply` to provision these resources");
    }
    Ok(0)
}
