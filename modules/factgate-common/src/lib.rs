pub mod config;
pub mod correlation;
pub mod date;
pub mod error;
pub mod fact;
pub mod identity;
pub mod naming;
pub mod version;

pub use config::{GatewayConfig, LogFormat};
pub use error::{ConformityViolation, KernelError, KernelResult};
pub use fact::{Attribute, Attributes, EventType, Fact, FactBuilder, FactEnvelope, FactKind};
pub use identity::{Entity, EntityReference, Identifier};
pub use version::{FieldDescriptor, TypeDescriptor, Versioned};
