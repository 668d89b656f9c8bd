pub mod bus;
pub mod envelope;
pub mod health;
pub mod pending;
pub mod supervisor;

pub use bus::MessageBus;
pub use envelope::{Envelope, RoutePath, Status, BROKER_GATEWAY, CRAWL_WORKER, DB_WORKER};
pub use health::WorkerHealth;
pub use pending::PendingMessageTable;
pub use supervisor::{Service, ServiceFactory, Supervisor, WorkerClass, WorkerContext};
