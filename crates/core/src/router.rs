//! Message routing.
//!
//! Handlers are registered under a [`HandlerKey`] (message type + trigger event) while a
//! [`HandlerRegistryBuilder`] is open. Building freezes the table; the resulting
//! [`MessageRouter`] is read-only and shared across pollers behind an `Arc`.

use crate::error::{Hl7Error, ParseCause};
use crate::{CoreError, CoreResult};
use hl7_wire::Message;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Routing key of a handler, e.g. `ORU` / `R01`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    message_type: String,
    trigger_event: String,
}

impl HandlerKey {
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidHandlerKey`] if either part is blank or contains `_`.
    pub fn new(message_type: &str, trigger_event: &str) -> CoreResult<Self> {
        let message_type = message_type.trim();
        let trigger_event = trigger_event.trim();
        let valid = |part: &str| !part.is_empty() && !part.contains('_');
        if !valid(message_type) || !valid(trigger_event) {
            return Err(CoreError::InvalidHandlerKey(format!(
                "{}_{}",
                message_type, trigger_event
            )));
        }

        Ok(Self {
            message_type: message_type.to_ascii_uppercase(),
            trigger_event: trigger_event.to_ascii_uppercase(),
        })
    }

    /// The key a parsed message routes under.
    pub fn of(message: &Message) -> CoreResult<Self> {
        Self::new(message.message_type(), message.trigger_event())
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn trigger_event(&self) -> &str {
        &self.trigger_event
    }
}

impl FromStr for HandlerKey {
    type Err = CoreError;

    /// Parses the `<type>_<trigger>` form, e.g. `ORU_R01`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('_');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(message_type), Some(trigger_event), None) => {
                Self::new(message_type, trigger_event)
                    .map_err(|_| CoreError::InvalidHandlerKey(s.to_string()))
            }
            _ => Err(CoreError::InvalidHandlerKey(s.to_string())),
        }
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.message_type, self.trigger_event)
    }
}

/// Failure reported by a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The message itself is unacceptable, e.g. its patient cannot be resolved. Classified like
    /// a parse failure.
    #[error("{message}")]
    Rejected { message: String, cause: ParseCause },

    /// Anything else that went wrong inside the handler.
    #[error("{0}")]
    Application(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn rejected(message: impl Into<String>, cause: ParseCause) -> Self {
        Self::Rejected {
            message: message.into(),
            cause,
        }
    }
}

impl From<CoreError> for HandlerError {
    fn from(e: CoreError) -> Self {
        Self::Application(Box::new(e))
    }
}

/// Consumes one kind of parsed message and writes the resulting clinical records.
pub trait MessageHandler: Send + Sync {
    fn process(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Collects handler registrations before the router is built.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<HandlerKey, Arc<dyn MessageHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `message_type` / `trigger_event`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidHandlerKey`] if the key parts are malformed.
    /// - [`CoreError::DuplicateHandler`] if the key already has a handler.
    pub fn register_handler(
        mut self,
        message_type: &str,
        trigger_event: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> CoreResult<Self> {
        let key = HandlerKey::new(message_type, trigger_event)?;
        self.insert(key, handler)?;
        Ok(self)
    }

    /// Registers handlers from a `<type>_<trigger>` → handler mapping.
    pub fn register_named<I>(mut self, handlers: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (String, Arc<dyn MessageHandler>)>,
    {
        for (name, handler) in handlers {
            let key: HandlerKey = name.parse()?;
            self.insert(key, handler)?;
        }
        Ok(self)
    }

    fn insert(&mut self, key: HandlerKey, handler: Arc<dyn MessageHandler>) -> CoreResult<()> {
        if self.handlers.contains_key(&key) {
            return Err(CoreError::DuplicateHandler(key.to_string()));
        }
        tracing::debug!("registered HL7 handler for {}", key);
        self.handlers.insert(key, handler);
        Ok(())
    }

    pub fn build(self) -> MessageRouter {
        MessageRouter {
            handlers: self.handlers,
        }
    }
}

/// Dispatches parsed messages to the handler registered for their type and trigger event.
pub struct MessageRouter {
    handlers: HashMap<HandlerKey, Arc<dyn MessageHandler>>,
}

impl MessageRouter {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    fn handler_for(&self, message: &Message) -> Option<&Arc<dyn MessageHandler>> {
        let key = HandlerKey::of(message).ok()?;
        self.handlers.get(&key)
    }

    pub fn can_route(&self, message: &Message) -> bool {
        self.handler_for(message).is_some()
    }

    /// Registered keys, sorted for display.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().map(ToString::to_string).collect();
        keys.sort();
        keys
    }

    /// Hands `message` to its handler.
    ///
    /// # Errors
    ///
    /// - [`Hl7Error::NoRoute`] if no handler is registered for the message.
    /// - [`Hl7Error::Parse`] if the handler rejected the message.
    /// - [`Hl7Error::Handler`] for any other handler failure.
    pub fn dispatch(&self, message: &Message) -> Result<(), Hl7Error> {
        let message_name = message.name();
        let handler = self.handler_for(message).ok_or_else(|| Hl7Error::NoRoute {
            message_name: message_name.clone(),
        })?;

        tracing::debug!("dispatching {} to its handler", message_name);
        handler.process(message).map_err(|e| match e {
            HandlerError::Rejected { message, cause } => Hl7Error::parse(message, cause),
            HandlerError::Application(source) => Hl7Error::Handler {
                message_name,
                source,
            },
        })
    }
}
