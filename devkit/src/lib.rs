/*!
# Sensu DevKit - test doubles for the agent

Helps test the agent without a broker:
- In-memory transport recording publishes and driving subscriptions
- Builders for bus payloads
- Harness wiring settings, registry and transport together
*/

pub mod harness;
pub mod messages;
pub mod mock_transport;

pub use harness::TestHarness;
pub use messages::MessageBuilder;
pub use mock_transport::{MockTransport, PublishedMessage};
