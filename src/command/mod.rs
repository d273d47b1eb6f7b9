//! One-shot commands for standalone mode
//!
//! Each [`Command`] contributes a clap subcommand. The runner parses the
//! process arguments and runs the selected command against the application
//! context; no listener is started.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshestra_kernel::command::Command;
//!
//! struct Migrate;
//!
//! #[async_trait]
//! impl Command for Migrate {
//!     fn definition(&self) -> clap::Command {
//!         clap::Command::new("migrate").about("Apply pending migrations")
//!     }
//!
//!     async fn run(&self, app: Arc<Application>, _matches: &ArgMatches) -> anyhow::Result<()> {
//!         app.resolve::<Database>()?.migrate().await
//!     }
//! }
//! ```

use crate::error::{KernelError, Result};
use crate::lifecycle::Application;
use async_trait::async_trait;
use clap::ArgMatches;
use clap::error::ErrorKind;
use std::sync::Arc;

#[async_trait]
pub trait Command: Send + Sync {
    /// The clap subcommand, whose name selects this command
    fn definition(&self) -> clap::Command;

    async fn run(&self, app: Arc<Application>, matches: &ArgMatches) -> anyhow::Result<()>;
}

/// Parses arguments and dispatches to the matching [`Command`]
pub struct CommandRunner {
    name: String,
    commands: Vec<Arc<dyn Command>>,
}

impl CommandRunner {
    pub fn new(name: impl Into<String>, commands: Vec<Arc<dyn Command>>) -> Self {
        Self {
            name: name.into(),
            commands,
        }
    }

    fn cli(&self) -> clap::Command {
        self.commands.iter().fold(
            clap::Command::new(self.name.clone())
                .subcommand_required(true)
                .arg_required_else_help(true),
            |cli, command| cli.subcommand(command.definition()),
        )
    }

    /// Run the command selected by `args`.
    ///
    /// `args[0]` is the binary name. Help and version requests are printed
    /// and count as success.
    pub async fn run(&self, app: Arc<Application>, args: Vec<String>) -> Result<()> {
        let matches = match self.cli().try_get_matches_from(args) {
            Ok(matches) => matches,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                let _ = e.print();
                return Ok(());
            }
            Err(e) => return Err(KernelError::command(e.render().to_string())),
        };

        let Some((selected, sub_matches)) = matches.subcommand() else {
            return Err(KernelError::command("no command given"));
        };

        let command = self
            .commands
            .iter()
            .find(|c| c.definition().get_name() == selected)
            .ok_or_else(|| KernelError::command(format!("unknown command '{selected}'")))?;

        tracing::debug!("Running command: {}", selected);
        command
            .run(app, sub_matches)
            .await
            .map_err(|e| KernelError::command(format!("{selected}: {e:#}")))
    }
}
