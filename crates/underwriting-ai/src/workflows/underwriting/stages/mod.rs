//! Stage function backends.
//!
//! [`RuleBasedStages`] scores applications with fixed underwriting tables and is
//! used when no model endpoint is configured. [`HostedModelStages`] sends each
//! stage to an OpenAI-compatible chat-completions endpoint.

mod hosted;
mod rules;

pub use hosted::{HostedModelStages, ModelClientError};
pub use rules::{base_rate, RuleBasedStages};
