//! Built-in integrations
//!
//! Each integration contributes its metadata and actions to an
//! [`ActionRegistry`]. Call [`register_all`] once at startup, usually from
//! inside [`stepruntime::registry::init`].

mod common;
mod debug;
mod http;
mod linear;
mod resend;
mod slack;

pub use debug::{LogAction, LOG};
pub use http::{HttpRequestAction, SEND_REQUEST};
pub use linear::{CreateTicketAction, FindIssuesAction, CREATE_TICKET, FIND_ISSUES};
pub use resend::{SendEmailAction, SEND_EMAIL};
pub use slack::{SendMessageAction, SEND_MESSAGE};

use stepruntime::ActionRegistry;
use tracing::debug;

/// Register every built-in integration and its actions
pub fn register_all(registry: &mut ActionRegistry) {
    let integrations = [
        (http::integration(), http::actions()),
        (resend::integration(), resend::actions()),
        (slack::integration(), slack::actions()),
        (linear::integration(), linear::actions()),
        (debug::integration(), debug::actions()),
    ];

    for (integration, actions) in integrations {
        debug!("Registering integration '{}' ({} actions)", integration.id, actions.len());
        registry.register_integration(integration);
        for action in actions {
            registry.register(action);
        }
    }
}

/// A fresh registry holding only the built-in integrations
pub fn builtin_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    register_all(&mut registry);
    registry
}
