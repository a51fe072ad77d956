pub mod agent;
pub mod api_client;
pub mod bidder;
pub mod cache;
pub mod config;
pub mod events;
pub mod gossip;
pub mod metrics;
pub mod offline;
pub mod peer_view;
