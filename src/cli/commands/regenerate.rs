//! Regenerate Command
//!
//! Rerun a request even when a fresh analysis is cached, then replace it.

use super::RequestArgs;
use super::run::print_result;
use crate::cli::context::CommandContext;
use crate::cli::ui::Output;
use crate::types::Result;

pub async fn run(ctx: &CommandContext, args: RequestArgs, format: &str) -> Result<()> {
    let out = Output::new(format);
    let request = args.into_request()?;
    let controller = ctx.regeneration()?;

    let result = controller.regenerate(request).await?;
    if !out.is_json() {
        out.success(&format!(
            "Regenerated ({} of {} stages reused)",
            result.stage_count() - result.executed_stages(),
            result.stage_count()
        ));
    }
    print_result(&out, &result)
}
