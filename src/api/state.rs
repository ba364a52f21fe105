use std::sync::Arc;

use crate::pipeline::Pipeline;
use crate::services::CredentialProvider;
use crate::storage::SubscriptionStore;
use crate::watch::RepoApiFactory;

#[derive(Clone)]
pub struct AppState {
    pub subscriptions: SubscriptionStore,
    pub pipeline: Arc<Pipeline>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub api_factory: RepoApiFactory,
}
