pub mod mapping;
pub mod messaging;
pub mod pairing;
pub mod registry;
pub mod scripts;
pub mod service;

#[cfg(test)]
mod testing;

pub use mapping::Mapper;
pub use messaging::{ContactResolution, Messenger, RecentChat, MAPPING_ALERT};
pub use pairing::{Pairing, PairingCoordinator, PairingOutcome};
pub use registry::SessionRegistry;
pub use service::WhatsAppService;
