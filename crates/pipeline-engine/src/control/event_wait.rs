use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{PipelineError, Result};
use crate::event::{EventSource, Listener, Subscription};
use crate::node::Node;
use crate::shape::NodeShape;

/// Waits for one event from an external source
///
/// Each call subscribes once, returns the first event delivered and
/// ignores any that follow. The subscription is dropped on every exit
/// path, whether an event arrived, the wait timed out or the call was
/// cancelled. The input is ignored.
pub struct EventWaitNode<I, E: 'static> {
    source: Arc<dyn EventSource<E>>,
    limit: Duration,
    _input: PhantomData<fn(I)>,
}

impl<I, E> EventWaitNode<I, E>
where
    I: Send + 'static,
    E: Send + 'static,
{
    pub fn new(source: Arc<dyn EventSource<E>>, limit: Duration) -> Self {
        Self {
            source,
            limit,
            _input: PhantomData,
        }
    }
}

#[async_trait]
impl<I, E> Node<I, E> for EventWaitNode<I, E>
where
    I: Send + 'static,
    E: Send + 'static,
{
    async fn apply(&self, _input: I) -> Result<E> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let listener: Listener<E> = Arc::new(move |event: E| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(event);
            }
        });
        let _subscription = Subscription::new(Arc::clone(&self.source), listener);

        match tokio::time::timeout(self.limit, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(PipelineError::failed(
                "event source released the listener without delivering an event",
            )),
            Err(_) => {
                log::warn!("No event received within {:?}", self.limit);
                Err(PipelineError::EventTimeout { limit: self.limit })
            }
        }
    }

    fn shape(&self) -> NodeShape {
        NodeShape::wrapper(format!("wait for event {:?}", self.limit), Vec::new())
    }
}
