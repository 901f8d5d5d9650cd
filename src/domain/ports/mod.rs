//! Domain ports (interfaces) for the packmule sync runtime.

pub mod destination_sink;
pub mod health_probe;
pub mod notification_channel;
pub mod source_provider;
pub mod sync_agent;
pub mod transferor;

pub use destination_sink::DestinationSink;
pub use health_probe::{FnProbe, HealthProbe};
pub use notification_channel::NotificationChannel;
pub use source_provider::{ByteStream, ItemStream, SourceProvider};
pub use sync_agent::SyncAgent;
pub use transferor::{TransferContext, TransferReceipt, Transferor};
