// Service exports
pub mod memory;
pub mod photon;
pub mod postgres;
pub mod traits;
pub mod viacep;

pub use memory::InMemoryStore;
pub use photon::PhotonClient;
pub use postgres::PostgresStore;
pub use traits::{GeocodeError, GeocodingService, LookupError, PostalLookup, RecordStore, StoreError};
pub use viacep::ViaCepClient;
