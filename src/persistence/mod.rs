//! The persistence engine: object store, environment record, reflection
//! codec, loopback pipe, reentrant dual-graph processor, and storage fees.

pub mod codec;
pub mod env;
pub mod fees;
pub mod loopback;
pub mod reentrant;
pub mod session;
pub mod store;

pub use codec::GraphCodec;
pub use env::EnvironmentState;
pub use fees::StorageFees;
pub use loopback::{LoopbackCodec, RefTranslator};
pub use reentrant::ReentrantProcessor;
pub use session::PersistenceSession;
pub use store::{GraphStore, InMemoryGraphStore, ENVIRONMENT_KEY, STATICS_KEY};
