//! Handler registry: routing definitions and the handler implementations
//! they name.

pub mod definitions;
pub mod handler;
pub mod set;

pub use self::definitions::HandlerRegistry;
pub use self::handler::{
    EventPayload, Handler, HandlerError, InvocationContext, PayloadHandler, TypedHandler,
};
pub use self::set::HandlerSet;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("no handler definition for event type '{0}'")]
    NoDefinition(String),

    #[error("handler for event type '{0}' is inactive")]
    Inactive(String),

    #[error("handler '{0}' has no registered implementation")]
    NoImplementation(String),
}
