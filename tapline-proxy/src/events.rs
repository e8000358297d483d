use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{trace, warn};

use crate::capture::{InterceptedRequest, InterceptedResponse};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ProxyEvent {
    #[serde(rename = "request")]
    RequestCaptured(InterceptedRequest),
    #[serde(rename = "response")]
    ResponseCaptured {
        request: InterceptedRequest,
        response: InterceptedResponse,
    },
    #[serde(rename = "error", rename_all = "camelCase")]
    ForwardingError { request_id: u64, message: String },
}

impl ProxyEvent {
    pub fn request_id(&self) -> u64 {
        match self {
            ProxyEvent::RequestCaptured(request) => request.id,
            ProxyEvent::ResponseCaptured { request, .. } => request.id,
            ProxyEvent::ForwardingError { request_id, .. } => *request_id,
        }
    }
}

/// Subscription to captured traffic. A subscriber that falls more than the
/// channel capacity behind loses the oldest events; the proxy never waits.
#[derive(Debug)]
pub struct ProxyEvents {
    receiver: broadcast::Receiver<ProxyEvent>,
}

impl ProxyEvents {
    /// Next event, or `None` once the proxy has been dropped.
    pub async fn recv(&mut self) -> Option<ProxyEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, dropping oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ProxyEvent> {
        BroadcastStream::new(self.receiver).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(error = %err, "event subscriber lagged");
                None
            }
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    sender: broadcast::Sender<ProxyEvent>,
}

impl EventSink {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn emit(&self, event: ProxyEvent) {
        let request_id = event.request_id();
        if self.sender.send(event).is_err() {
            trace!(request_id, "no event subscribers");
        }
    }

    pub(crate) fn subscribe(&self) -> ProxyEvents {
        ProxyEvents {
            receiver: self.sender.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio_stream::StreamExt;

    use super::{EventSink, ProxyEvent};
    use crate::capture::{InterceptedRequest, Protocol};
    use crate::source::ClientSource;

    fn request(id: u64) -> InterceptedRequest {
        InterceptedRequest {
            id,
            timestamp: Utc::now(),
            method: "GET".to_string(),
            url: "http://example.com/".to_string(),
            protocol: Protocol::Http,
            host: "example.com".to_string(),
            path: "/".to_string(),
            headers: Vec::new(),
            body: String::new(),
            source: ClientSource::Terminal,
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let sink = EventSink::new(8);
        let mut first = sink.subscribe();
        let mut second = sink.subscribe();

        sink.emit(ProxyEvent::RequestCaptured(request(1)));
        sink.emit(ProxyEvent::ForwardingError {
            request_id: 1,
            message: "refused".to_string(),
        });

        for events in [&mut first, &mut second] {
            assert_eq!(events.recv().await.unwrap().request_id(), 1);
            assert!(matches!(
                events.recv().await.unwrap(),
                ProxyEvent::ForwardingError { .. }
            ));
        }
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_silent() {
        let sink = EventSink::new(1);
        sink.emit(ProxyEvent::RequestCaptured(request(7)));
        let mut late = sink.subscribe();
        sink.emit(ProxyEvent::RequestCaptured(request(8)));
        assert_eq!(late.recv().await.unwrap().request_id(), 8);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_oldest() {
        let sink = EventSink::new(2);
        let mut events = sink.subscribe();
        for id in 1..=5 {
            sink.emit(ProxyEvent::RequestCaptured(request(id)));
        }
        assert_eq!(events.recv().await.unwrap().request_id(), 4);
        assert_eq!(events.recv().await.unwrap().request_id(), 5);
    }

    #[tokio::test]
    async fn stream_ends_when_sink_is_dropped() {
        let sink = EventSink::new(4);
        let stream = sink.subscribe().into_stream();
        sink.emit(ProxyEvent::RequestCaptured(request(1)));
        drop(sink);

        let ids: Vec<u64> = stream.map(|event| event.request_id()).collect().await;
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn serializes_with_event_tag() {
        let json = serde_json::to_value(ProxyEvent::ForwardingError {
            request_id: 3,
            message: "connection refused".to_string(),
        })
        .unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["requestId"], 3);

        let json = serde_json::to_value(ProxyEvent::RequestCaptured(request(2))).unwrap();
        assert_eq!(json["event"], "request");
        assert_eq!(json["data"]["protocol"], "http");
        assert_eq!(json["data"]["source"], "terminal");
    }
}
