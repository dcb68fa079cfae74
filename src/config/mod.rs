pub mod schema;

pub use schema::{
    CommandsConfig, Config, GenerationConfig, PresenceConfig, ReliabilityConfig, SessionConfig,
};
