// Built-in handlers, one module per feature area.

mod captive;
mod router;
mod subscriber;

pub use captive::{CaptiveHandler, register_captive_handlers};
pub use router::{HealthcheckHandler, register_router_handlers};
pub use subscriber::{SubscriberHandler, register_subscriber_handlers};
