//! Command dispatch: bridges CLI args -> core services -> output formatting.

pub mod config_cmd;
pub mod jobs;
pub mod onboard;
pub mod util;

use crate::cli::Command;
use crate::config::Context;
use crate::error::CliError;
use crate::serve;

/// Dispatch a config-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, ctx: &Context) -> Result<(), CliError> {
    match cmd {
        Command::Jobs(args) => jobs::handle(args, ctx).await,
        Command::Onboard(args) => onboard::handle(args, ctx).await,
        Command::Serve(args) => serve::handle(args, ctx).await,
        Command::Config(args) => config_cmd::handle(args, ctx),
        // Completions are handled before the config is loaded
        Command::Completions(_) => Ok(()),
    }
}
