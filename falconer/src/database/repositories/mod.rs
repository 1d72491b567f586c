//! Repositories over the store's named buckets.

mod downloads;
mod livestreams;
mod pipelines;
mod subscriptions;
mod templates;

pub use downloads::DownloadsRepository;
pub use livestreams::LivestreamsRepository;
pub use pipelines::PipelinesRepository;
pub use subscriptions::SubscriptionsRepository;
pub use templates::TemplatesRepository;
