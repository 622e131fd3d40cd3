mod archiver;
mod dispatcher;
mod fcm;
mod fetcher;
mod gateway;
mod queue;
mod record;
mod store;

pub use archiver::{Archiver, ARCHIVE_TASK};
pub use dispatcher::{Dispatcher, DISPATCH_TASK};
pub use fcm::FcmClient;
pub use fetcher::{Fetcher, FETCH_TASK};
pub use gateway::PushGateway;
pub use queue::PushQueue;
pub use record::{PushRecord, PushState, RecordFlags};
pub use store::RecordStore;
