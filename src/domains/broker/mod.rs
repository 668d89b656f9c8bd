pub mod gateway;
pub mod messages;

pub use gateway::{
    consume_project_queue, publish_json, BrokerGateway, NatsBrokerGateway, PublishedMessage, TestBroker,
};
pub use messages::{CompensationNotice, CrawlRequest, DataGatheredNotice};
