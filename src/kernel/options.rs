use strum_macros::{Display, EnumString};

/// Argument that selects standalone mode.
pub const CLI_FLAG: &str = "--cli";

/// How the kernel runs the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AppMode {
    /// Long-running HTTP server.
    #[default]
    Server,
    /// One-shot command, no listener.
    Cli,
}

impl AppMode {
    /// `Cli` when `args` contains `--cli`.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if args.into_iter().any(|arg| arg.as_ref() == CLI_FLAG) {
            AppMode::Cli
        } else {
            AppMode::Server
        }
    }
}

/// Options for [`Kernel::init`](super::Kernel::init)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelInitOptions {
    pub mode: AppMode,
}

impl KernelInitOptions {
    pub fn server() -> Self {
        Self {
            mode: AppMode::Server,
        }
    }

    pub fn cli() -> Self {
        Self { mode: AppMode::Cli }
    }

    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            mode: AppMode::from_args(args),
        }
    }
}

/// Remove every `--cli` selector so the command parser never sees it.
pub fn strip_cli_flag(args: Vec<String>) -> Vec<String> {
    args.into_iter().filter(|arg| arg != CLI_FLAG).collect()
}
