//! Topic-based binding.
//!
//! Every operation listens on its own topic `{domain}.{operation}` (`sample.get-by-id`).
//! A record carries a [`ChannelMessage`] envelope; when the envelope names a callback
//! topic, the result (or the error) is published there. Without a callback the result is
//! dropped and failures are only logged.
//!
//! [`InMemoryBroker`] provides the topic fan-out in process so listeners and clients can
//! run without an external broker.

use crate::channel::ChannelMessage;
use crate::client_trait::CrudClient;
use crate::config::ResourceConfig;
use crate::dispatch::{
    serve, Binding, CrudRequest, CrudResponse, Decoded, Dispatcher, Rejected, Transport,
};
use crate::entity::CrudEntity;
use crate::error::CrudError;
use crate::operation::Operation;
use crate::user::User;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Topic of `operation` for `domain`.
pub fn channel(domain: &str, operation: Operation) -> String {
    format!("{domain}.{operation}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct KafkaRecord {
    pub topic: String,
    pub value: Value,
}

#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn publish(&self, topic: &str, value: Value) -> Result<(), CrudError>;
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<mpsc::UnboundedSender<KafkaRecord>>>,
    closed: bool,
}

/// Topic fan-out over unbounded tokio channels. Every subscriber sees every record
/// published after it subscribed.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<KafkaRecord> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state();
        if !state.closed {
            state.topics.entry(topic.to_string()).or_default().push(sender);
        }
        receiver
    }

    /// Drops every subscription to `topic`.
    pub fn unsubscribe(&self, topic: &str) {
        self.state().topics.remove(topic);
    }

    /// Number of topics with at least one subscription.
    pub fn topic_count(&self) -> usize {
        self.state().topics.len()
    }

    /// Ends every subscription and rejects further publishing.
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        state.topics.clear();
        debug!("Broker closed");
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, topic: &str, value: Value) -> Result<(), CrudError> {
        let mut state = self.state();
        if state.closed {
            return Err(CrudError::Transport("broker closed".to_string()));
        }
        let Some(subscribers) = state.topics.get_mut(topic) else {
            debug!(topic, "No subscribers");
            return Ok(());
        };
        let record = KafkaRecord {
            topic: topic.to_string(),
            value,
        };
        subscribers.retain(|subscriber| subscriber.send(record.clone()).is_ok());
        Ok(())
    }
}

/// What the listener keeps of an envelope for the reply.
#[derive(Debug, Clone, Default)]
pub struct ReplyTo {
    callback: Option<String>,
    metadata: BTreeMap<String, Value>,
}

/// A reply to publish: callback topic plus envelope.
pub type Reply = Option<(String, ChannelMessage<Value>)>;

pub struct KafkaListener<E: CrudEntity> {
    domain: String,
    dispatcher: Arc<Dispatcher<E>>,
    publisher: Arc<dyn Publisher>,
}

impl<E: CrudEntity> KafkaListener<E> {
    pub fn new(
        config: &ResourceConfig,
        dispatcher: Arc<Dispatcher<E>>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            domain: config.domain_name.clone(),
            dispatcher,
            publisher,
        }
    }

    /// Serves one record and publishes the reply, if any.
    pub async fn handle(&self, record: KafkaRecord) {
        let Some((callback, reply)) = serve(self, &self.dispatcher, record).await else {
            return;
        };
        let value = match serde_json::to_value(&reply) {
            Ok(value) => value,
            Err(e) => {
                warn!(%callback, error = %e, "Reply not serializable");
                return;
            }
        };
        if let Err(e) = self.publisher.publish(&callback, value).await {
            warn!(%callback, error = %e, "Reply not delivered");
        }
    }

    /// Spawns one consumer per in-scope unary operation. Consumers stop when the broker
    /// closes.
    pub fn start(self: Arc<Self>, broker: &InMemoryBroker) -> Vec<JoinHandle<()>> {
        self.dispatcher
            .scope()
            .iter()
            .filter(|operation| !operation.is_streaming())
            .map(|operation| {
                let topic = channel(&self.domain, operation);
                let mut records = broker.subscribe(&topic);
                let listener = Arc::clone(&self);
                tokio::spawn(async move {
                    info!(%topic, "Listener started");
                    while let Some(record) = records.recv().await {
                        listener.handle(record).await;
                    }
                    info!(%topic, "Listener stopped");
                })
            })
            .collect()
    }

    fn operation_of(&self, topic: &str) -> Result<Operation, CrudError> {
        topic
            .strip_prefix(&self.domain)
            .and_then(|rest| rest.strip_prefix('.'))
            .ok_or_else(|| CrudError::RouteNotFound(format!("topic {topic}")))?
            .parse()
            .map_err(|_| CrudError::RouteNotFound(format!("topic {topic}")))
    }
}

impl<E: CrudEntity> Binding<E> for KafkaListener<E> {
    type Request = KafkaRecord;
    type Context = ReplyTo;
    type Response = Reply;

    const TRANSPORT: Transport = Transport::Kafka;

    fn decode(&self, record: KafkaRecord) -> Result<Decoded<E, ReplyTo>, Rejected<ReplyTo>> {
        let operation = self.operation_of(&record.topic)?;
        let envelope: ChannelMessage<Value> = serde_json::from_value(record.value)
            .map_err(|e| Rejected::new(CrudError::from(e), Some(operation), None))?;
        let context = ReplyTo {
            callback: envelope.callback_channel().map(str::to_string),
            metadata: envelope.metadata,
        };
        match CrudRequest::from_channel_data(operation, envelope.data) {
            Ok(request) => Ok(Decoded {
                request,
                user: envelope.user,
                context,
            }),
            Err(error) => Err(Rejected::new(error, Some(operation), Some(context))),
        }
    }

    fn encode(
        &self,
        operation: Operation,
        context: &ReplyTo,
        response: CrudResponse<E>,
    ) -> Result<Reply, CrudError> {
        let Some(callback) = &context.callback else {
            debug!(domain = %self.domain, %operation, "No callback, result dropped");
            return Ok(None);
        };
        let mut reply = ChannelMessage::new(response.to_channel_data()?);
        reply.status = Some(operation.status());
        reply.metadata = context.metadata.clone();
        Ok(Some((callback.clone(), reply)))
    }

    fn encode_error(
        &self,
        operation: Option<Operation>,
        context: Option<&ReplyTo>,
        error: CrudError,
    ) -> Reply {
        let Some(context) = context else {
            warn!(domain = %self.domain, ?operation, error = %error, "Undeliverable failure");
            return None;
        };
        let Some(callback) = &context.callback else {
            warn!(domain = %self.domain, ?operation, error = %error, "Failure without callback");
            return None;
        };
        let mut reply = ChannelMessage::failure(error.to_body());
        reply.metadata = context.metadata.clone();
        Some((callback.clone(), reply))
    }
}

/// Publishes request envelopes without waiting for a reply.
pub struct ChannelClient<E: CrudEntity> {
    domain: String,
    publisher: Arc<dyn Publisher>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: CrudEntity> Clone for ChannelClient<E> {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            publisher: Arc::clone(&self.publisher),
            _entity: PhantomData,
        }
    }
}

impl<E: CrudEntity> ChannelClient<E> {
    pub fn new(config: &ResourceConfig, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            domain: config.domain_name.clone(),
            publisher,
            _entity: PhantomData,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Publishes `request` on its operation topic.
    pub async fn send(
        &self,
        request: &CrudRequest<E>,
        user: Option<User>,
        callback: Option<&str>,
    ) -> Result<(), CrudError> {
        let operation = request.operation();
        let mut envelope = ChannelMessage::new(request.to_channel_data()?).with_user(user);
        if let Some(callback) = callback {
            envelope = envelope.with_callback(callback);
        }
        let topic = channel(&self.domain, operation);
        debug!(%topic, ?callback, "Publishing request");
        self.publisher
            .publish(&topic, serde_json::to_value(&envelope)?)
            .await
    }
}

/// Request/reply over the broker: publishes with a private callback topic and waits for
/// the reply on it.
pub struct KafkaClient<E: CrudEntity> {
    channel: ChannelClient<E>,
    broker: InMemoryBroker,
    timeout: Duration,
    sequence: AtomicU64,
}

impl<E: CrudEntity> KafkaClient<E> {
    pub fn new(config: &ResourceConfig, broker: InMemoryBroker) -> Self {
        Self {
            channel: ChannelClient::new(config, Arc::new(broker.clone())),
            broker,
            timeout: config.callback_timeout(),
            sequence: AtomicU64::new(0),
        }
    }
}

impl<E: CrudEntity> KafkaClient<E> {
    async fn exchange(
        &self,
        request: &CrudRequest<E>,
        user: Option<User>,
        callback: &str,
        replies: &mut mpsc::UnboundedReceiver<KafkaRecord>,
    ) -> Result<KafkaRecord, CrudError> {
        self.channel.send(request, user, Some(callback)).await?;
        tokio::time::timeout(self.timeout, replies.recv())
            .await
            .map_err(|_| CrudError::Transport(format!("no reply on {callback}")))?
            .ok_or_else(|| CrudError::Transport("broker closed".to_string()))
    }
}

#[async_trait]
impl<E: CrudEntity> CrudClient<E> for KafkaClient<E> {
    fn transport(&self) -> Transport {
        Transport::Kafka
    }

    async fn request(
        &self,
        request: CrudRequest<E>,
        user: Option<User>,
    ) -> Result<CrudResponse<E>, CrudError> {
        let operation = request.operation();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let callback = format!("{}.reply.{sequence}", channel(self.channel.domain(), operation));
        let mut replies = self.broker.subscribe(&callback);
        let received = self
            .exchange(&request, user, &callback, &mut replies)
            .await;
        self.broker.unsubscribe(&callback);
        let record = received?;
        let reply: ChannelMessage<Value> = serde_json::from_value(record.value)
            .map_err(|e| CrudError::Transport(e.to_string()))?;
        if let Some(error) = reply.error {
            return Err(error.into_error());
        }
        CrudResponse::from_channel_data(operation.result_kind(), reply.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockService;
    use crate::testing::{Note, NoteDto};
    use serde_json::json;

    fn listener(mock: &MockService<Note>, broker: &InMemoryBroker) -> KafkaListener<Note> {
        KafkaListener::new(
            &ResourceConfig::for_domain("note"),
            Arc::new(Dispatcher::new(mock.service())),
            Arc::new(broker.clone()),
        )
    }

    fn record(topic: &str, value: Value) -> KafkaRecord {
        KafkaRecord {
            topic: topic.to_string(),
            value,
        }
    }

    #[tokio::test]
    async fn replies_go_to_the_callback_with_the_operation_status() {
        let broker = InMemoryBroker::new();
        let mock = MockService::<Note>::new();
        mock.expect(Operation::Save)
            .return_ok(CrudResponse::Dto(NoteDto {
                id: Some(1),
                ..NoteDto::new("a")
            }));
        let mut replies = broker.subscribe("replies");

        listener(&mock, &broker)
            .handle(record(
                "note.save",
                json!({"data": {"dto": {"title": "a"}}, "callback": "replies", "metadata": {"trace": "x"}}),
            ))
            .await;

        let reply = replies.recv().await.unwrap();
        assert_eq!(
            reply.value,
            json!({"data": {"dto": {"id": 1, "title": "a", "locked": false}}, "metadata": {"trace": "x"}, "status": 201})
        );
        mock.verify();
    }

    #[tokio::test]
    async fn failures_are_reported_on_the_callback() {
        let broker = InMemoryBroker::new();
        let mock = MockService::<Note>::new();
        let mut replies = broker.subscribe("replies");

        listener(&mock, &broker)
            .handle(record(
                "note.get-by-id",
                json!({"data": {"id": "x"}, "callback": "replies"}),
            ))
            .await;

        let reply: ChannelMessage<Value> =
            serde_json::from_value(replies.recv().await.unwrap().value).unwrap();
        assert_eq!(reply.status, Some(400));
        assert_eq!(reply.error.unwrap().error, "BAD_REQUEST");
        mock.verify();
    }

    #[tokio::test]
    async fn blank_callbacks_publish_nothing() {
        let broker = InMemoryBroker::new();
        let mock = MockService::<Note>::new();
        mock.expect(Operation::DeleteById)
            .return_ok(CrudResponse::Id(3));
        let mut replies = broker.subscribe("  ");

        let listener = listener(&mock, &broker);
        listener
            .handle(record("note.delete-by-id", json!({"data": {"id": 3}, "callback": "  "})))
            .await;
        listener
            .handle(record("other.count", json!({"data": {}})))
            .await;

        assert!(replies.try_recv().is_err());
        mock.verify();
    }

    #[tokio::test]
    async fn client_round_trips_through_started_listener() {
        let broker = InMemoryBroker::new();
        let mock = MockService::<Note>::new();
        mock.expect(Operation::CountAll)
            .return_ok(CrudResponse::Count(5));
        mock.expect(Operation::GetById)
            .return_err(CrudError::DomainNotFound("note with id 8".into()));
        let handles = Arc::new(listener(&mock, &broker)).start(&broker);
        // Every unary operation gets a consumer; get-stream has no topic.
        assert_eq!(handles.len(), Operation::ALL.len() - 1);

        let client = KafkaClient::<Note>::new(&ResourceConfig::for_domain("note"), broker.clone());
        let topics = broker.topic_count();
        assert_eq!(client.count_all(None).await.unwrap(), 5);
        assert_eq!(
            client.get_by_id(8, None).await.unwrap_err(),
            CrudError::DomainNotFound("note with id 8".into())
        );
        // Reply topics are dropped once answered.
        assert_eq!(broker.topic_count(), topics);

        broker.close();
        for handle in handles {
            handle.await.unwrap();
        }
        mock.verify();
    }

    #[tokio::test]
    async fn unanswered_requests_release_their_reply_topic() {
        let broker = InMemoryBroker::new();
        let config = ResourceConfig {
            callback_timeout_ms: 20,
            ..ResourceConfig::for_domain("note")
        };
        let client = KafkaClient::<Note>::new(&config, broker.clone());
        for _ in 0..3 {
            let result = client.count_all(None).await;
            assert!(matches!(result, Err(CrudError::Transport(_))));
        }
        assert_eq!(broker.topic_count(), 0);
    }
}
