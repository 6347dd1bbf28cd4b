//! `certprov validate`

use anyhow::Result;

use super::{load_documents, print_validation};
use crate::Context;
use crate::cli::SourceArgs;
use crate::config::Settings;
use crate::ui;

/// Exit code when any document fails validation
const INVALID: u8 = 2;

pub fn run(ctx: &Context, args: &SourceArgs) -> Result<u8> {
    let settings = Settings::load()?;
    let documents = load_documents(args, &settings)?;

    let invalid = print_validation(&documents);
    println!();
    if invalid == 0 {
        if !ctx.quiet {
            ui::success(&format!("{} resource(s) valid", documents.len()));
        }
        Ok(0)
    } else {
        ui::error(&format!("{invalid} of {} resource(s) invalid", documents.len()));
        Ok(INVALID)
    }
}
