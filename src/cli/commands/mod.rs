mod ask;
mod collection;
mod config;
mod serve;
mod status;

pub use ask::AskArgs;
pub use collection::CollectionCommand;
pub use config::ConfigCommand;
pub use serve::ServeArgs;

pub use ask::handle_ask;
pub use collection::handle_collection;
pub use config::handle_config;
pub use serve::handle_serve;
pub use status::handle_status;
