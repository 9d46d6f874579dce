pub mod document;
pub mod gateway;
mod writer;

pub use document::ConfinementDocument;
pub use gateway::PersistenceGateway;
