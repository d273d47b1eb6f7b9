use crate::lifecycle::LifecycleState;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KernelError>;

#[derive(Debug, Error)]
pub enum KernelError {
    /// A bootstrap pipeline failed; `context` names the pipeline.
    #[error("{context}: {source}")]
    Bootstrap {
        context: &'static str,
        source: Box<KernelError>,
    },

    #[error(
        "AppRef::get() has not been set yet. Ensure that you read the application handle from a Created or Listening hook"
    )]
    HandleNotReady,

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to listen on {address}: {source}")]
    Listen {
        address: String,
        source: std::io::Error,
    },

    #[error("Application is already listening; the router can no longer be changed")]
    AlreadyListening,

    #[error("Command failed: {message}")]
    Command { message: String },

    #[error("Shutdown timed out after {}ms", .0.as_millis())]
    ShutdownTimeout(Duration),

    #[error("Dependency not found: {type_name}")]
    DependencyNotFound { type_name: String },

    #[error("Failed to downcast type: {type_name}")]
    DowncastFailed { type_name: String },

    #[error("Module registration failed: {message}")]
    ModuleRegistrationFailed { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KernelError {
    pub fn bootstrap(context: &'static str, source: KernelError) -> Self {
        Self::Bootstrap {
            context,
            source: Box::new(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn listen(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::Listen {
            address: address.into(),
            source,
        }
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    pub fn module_registration(message: impl Into<String>) -> Self {
        Self::ModuleRegistrationFailed {
            message: message.into(),
        }
    }
}
