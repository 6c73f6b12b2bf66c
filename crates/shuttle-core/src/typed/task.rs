//! Task trait - ties a job name to an argument type.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// An argument type that knows which handler runs it.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendReport { user_id: u64 }
///
/// impl Task for SendReport {
///     const NAME: &'static str = "reports.send";
/// }
/// ```
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
}
