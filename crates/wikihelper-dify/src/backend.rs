use std::future::Future;

use crate::error::DifyError;
use crate::stream::EventStream;
use crate::wire::ChatRequest;

/// Something that can answer a chat request with a stream of events.
///
/// [`DifyClient`](crate::client::DifyClient) is the production
/// implementation; tests drive chat sessions with scripted streams.
pub trait ChatBackend: Send + Sync {
    /// User id requests are attributed to.
    fn user(&self) -> &str;

    fn open_stream(
        &self,
        request: ChatRequest,
    ) -> impl Future<Output = Result<EventStream, DifyError>> + Send;
}
