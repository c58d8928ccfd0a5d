//! Trait seam around [`Router`], matching the `Store`/`DnsResolver` pattern
//! used at every other crate boundary in this workspace: the production
//! implementation is a concrete struct, but callers that need to inject a
//! test double depend on the trait object instead.

use async_trait::async_trait;

use crate::{
    error::DeliveryError,
    router::{PreparedMessage, RouteTaken, Router},
};

#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    async fn deliver_direct(&self, message: &PreparedMessage) -> Result<(), DeliveryError>;
    async fn deliver_relay(&self, message: &PreparedMessage) -> Result<(), DeliveryError>;
    async fn deliver_hybrid(&self, message: &PreparedMessage) -> Result<RouteTaken, DeliveryError>;
}

#[async_trait]
impl DeliveryBackend for Router {
    async fn deliver_direct(&self, message: &PreparedMessage) -> Result<(), DeliveryError> {
        Router::deliver_direct(self, message).await
    }

    async fn deliver_relay(&self, message: &PreparedMessage) -> Result<(), DeliveryError> {
        Router::deliver_relay(self, message).await
    }

    async fn deliver_hybrid(&self, message: &PreparedMessage) -> Result<RouteTaken, DeliveryError> {
        Router::deliver_hybrid(self, message).await
    }
}
