//! Built-in message handlers.

pub mod oru_r01;

pub use oru_r01::ValueGroupOruR01Handler;

use crate::router::{MessageHandler, MessageRouter};
use crate::store::{PatientDirectory, Stores};
use crate::CoreResult;
use std::sync::Arc;

/// Builds the router with every built-in handler registered.
pub fn default_router(
    stores: &Stores,
    patients: Arc<dyn PatientDirectory>,
) -> CoreResult<MessageRouter> {
    let oru: Arc<dyn MessageHandler> = Arc::new(ValueGroupOruR01Handler::new(
        patients,
        stores.encounters.clone(),
        stores.observations.clone(),
    ));

    Ok(MessageRouter::builder()
        .register_named([("ORU_R01".to_string(), oru)])?
        .build())
}
