pub mod chapa;
pub mod gateway;
pub mod locks;
pub mod memory;
pub mod metrics;
pub mod mongo;
pub mod store;

pub use chapa::ChapaClient;
pub use gateway::{MockGateway, PaymentGateway, SharedGateway};
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use mongo::MongoStore;
pub use store::{DomainStore, SharedStore, StoreError};
