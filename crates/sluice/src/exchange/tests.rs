//! Unit tests for the exchange controller

use super::*;
use crate::pipe::Listener;
use bytes::Bytes;

// Mock pipe recording emitted chunks along with the closed-state of
// watched sessions at the moment each chunk went out, which is how the
// close-before-emit ordering of retry and throw is observed.
#[derive(Default)]
struct ObservingPipe {
    sent: Mutex<Vec<SentRecord>>,
    watched: Mutex<Vec<Session>>,
    resumes: Mutex<usize>,
    proceeds: Mutex<Vec<Option<Bytes>>>,
    once_listeners: Mutex<Vec<(Selector, Listener)>>,
}

#[derive(Clone)]
struct SentRecord {
    chunk: Chunk,
    watched_closed: Vec<bool>,
}

impl ObservingPipe {
    fn watch(&self, session: &Session) {
        lock(&self.watched).push(session.clone());
    }

    fn sent(&self) -> Vec<SentRecord> {
        lock(&self.sent).clone()
    }

    fn resumes(&self) -> usize {
        *lock(&self.resumes)
    }

    // Deliver a chunk to the first registered one-shot listener whose
    // selector matches its kind; reports whether the listener completed
    // its continuation
    fn deliver(&self, chunk: Chunk) -> bool {
        let kind = chunk.kind();
        let entry = {
            let listeners = &mut *lock(&self.once_listeners);
            listeners
                .iter()
                .position(|(selector, _)| matches!(selector, Selector::Kind(k) if *k == kind))
                .map(|index| listeners.remove(index))
        };
        let Some((_, mut listener)) = entry else {
            return false;
        };
        let completed = Arc::new(Mutex::new(false));
        let flag = completed.clone();
        listener(chunk, Continuation::new(move |_| *lock(&flag) = true));
        let completed = *lock(&completed);
        completed
    }
}

impl Pipe for ObservingPipe {
    fn send(&self, chunk: Chunk) {
        let watched_closed = lock(&self.watched).iter().map(Session::is_closed).collect();
        lock(&self.sent).push(SentRecord {
            chunk,
            watched_closed,
        });
    }

    fn resume(&self) {
        *lock(&self.resumes) += 1;
    }

    fn proceed(&self, replacement: Option<Bytes>) {
        lock(&self.proceeds).push(replacement);
    }

    fn on(&self, _selector: Selector, _listener: Listener) {}

    fn once(&self, selector: Selector, listener: Listener) {
        lock(&self.once_listeners).push((selector, listener));
    }
}

fn exchange() -> (Arc<ObservingPipe>, Exchange) {
    let pipe = Arc::new(ObservingPipe::default());
    let exchange = Exchange::new(pipe.clone());
    (pipe, exchange)
}

fn bytes(data: &'static str) -> Bytes {
    Bytes::from_static(data.as_bytes())
}

#[test]
fn test_request_emits_request_chunk_and_streams_on_its_session() {
    let (pipe, exchange) = exchange();

    let stream = exchange.request(bytes("ping")).unwrap();
    stream.write("extra").unwrap();

    let sent = pipe.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].chunk.kind(), ChunkKind::Request);
    assert_eq!(sent[0].chunk.payload(), Some(&bytes("ping")));
    assert_eq!(sent[1].chunk.kind(), ChunkKind::RequestData);

    let opener = sent[0].chunk.session().unwrap();
    let writer = sent[1].chunk.session().unwrap();
    assert!(opener.same_as(writer));
    assert!(!opener.is_closed());
}

#[test]
fn test_duplicate_request_is_a_violation() {
    let (_pipe, exchange) = exchange();

    exchange.request(bytes("one")).unwrap();
    assert_eq!(
        exchange.request(bytes("two")).unwrap_err(),
        ProtocolViolation::RequestAlreadyInitiated
    );
}

#[test]
fn test_duplicate_respond_is_a_violation() {
    let (_pipe, exchange) = exchange();

    exchange.respond(bytes("pong")).unwrap();
    assert_eq!(
        exchange.respond(bytes("pong again")).unwrap_err(),
        ProtocolViolation::ResponseAlreadyInitiated
    );
}

#[test]
fn test_respond_without_payload_is_an_empty_reply() {
    let (pipe, exchange) = exchange();

    exchange.respond(None).unwrap();

    let sent = pipe.sent();
    assert_eq!(sent[0].chunk.kind(), ChunkKind::Response);
    assert_eq!(sent[0].chunk.payload(), None);
    assert!(!sent[0].chunk.is_end());
}

#[test]
fn test_retry_closes_both_sessions_before_the_new_request_goes_out() {
    let (pipe, exchange) = exchange();

    exchange.request(bytes("attempt 1")).unwrap();
    exchange.respond(bytes("partial")).unwrap();

    let sent = pipe.sent();
    pipe.watch(sent[0].chunk.session().unwrap());
    pipe.watch(sent[1].chunk.session().unwrap());

    let stream = exchange.retry(bytes("attempt 2")).unwrap();

    let sent = pipe.sent();
    let record = &sent[2];
    assert_eq!(record.chunk.kind(), ChunkKind::Request);
    assert_eq!(record.chunk.payload(), Some(&bytes("attempt 2")));
    // the superseded sessions were already dead when this chunk went out
    assert_eq!(record.watched_closed, vec![true, true]);
    assert!(!record.chunk.session().unwrap().is_closed());

    // the fresh attempt streams on the fresh session
    stream.write("more").unwrap();
    let sent = pipe.sent();
    assert!(sent[3]
        .chunk
        .session()
        .unwrap()
        .same_as(record.chunk.session().unwrap()));
}

#[test]
fn test_retry_can_repeat() {
    let (pipe, exchange) = exchange();

    exchange.request(bytes("1")).unwrap();
    exchange.retry(bytes("2")).unwrap();
    exchange.retry(bytes("3")).unwrap();

    let sent = pipe.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent[0].chunk.session().unwrap().is_closed());
    assert!(sent[1].chunk.session().unwrap().is_closed());
    assert!(!sent[2].chunk.session().unwrap().is_closed());
}

#[test]
fn test_throw_closes_sessions_then_emits_failure() {
    let (pipe, exchange) = exchange();

    exchange.request(bytes("doomed")).unwrap();
    let sent = pipe.sent();
    pipe.watch(sent[0].chunk.session().unwrap());

    exchange.throw(ExchangeFailure::new("boom"));

    let sent = pipe.sent();
    let record = &sent[1];
    assert_eq!(record.chunk.kind(), ChunkKind::Failure);
    assert_eq!(record.chunk.failure().unwrap().to_string(), "boom");
    assert_eq!(record.watched_closed, vec![true]);
    // throw unsuspends the point so the error is not held back
    assert!(pipe.resumes() >= 2);
}

#[test]
fn test_sibling_shares_the_exchange_context() {
    let (_pipe, exchange) = exchange();
    let other = Arc::new(ObservingPipe::default());
    let sibling = exchange.sibling(other);

    exchange.request(bytes("from a")).unwrap();
    assert_eq!(
        sibling.request(bytes("from b")).unwrap_err(),
        ProtocolViolation::RequestAlreadyInitiated
    );

    // a retry on either handle frees both
    sibling.retry(bytes("again")).unwrap();
}

#[test]
fn test_proceed_with_forwards_a_replacement_payload() {
    let (pipe, exchange) = exchange();

    exchange.proceed();
    exchange.proceed_with("swapped");

    let proceeds = lock(&pipe.proceeds).clone();
    assert_eq!(proceeds, vec![None, Some(bytes("swapped"))]);
}

#[tokio::test]
async fn test_reply_settles_on_the_terminal_response() {
    let (pipe, exchange) = exchange();

    let (_stream, reply) = exchange.request_with_reply(bytes("ping")).unwrap();
    // settling releases the delivery so queued chunks keep flowing
    assert!(pipe.deliver(Chunk::Response {
        data: Some(bytes("pong")),
        session: Session::new(),
    }));

    assert_eq!(reply.recv().await, Ok(Some(bytes("pong"))));
}

#[tokio::test]
async fn test_reply_settles_on_the_terminal_failure() {
    let (pipe, exchange) = exchange();

    let (_stream, reply) = exchange.request_with_reply(bytes("ping")).unwrap();
    assert!(pipe.deliver(Chunk::Failure {
        error: ExchangeFailure::new("downstream gave up"),
    }));
    // a late response after the failure must not double-settle, but it
    // still completes its delivery
    assert!(pipe.deliver(Chunk::Response {
        data: Some(bytes("too late")),
        session: Session::new(),
    }));

    assert_eq!(
        reply.recv().await,
        Err(ExchangeFailure::new("downstream gave up"))
    );
}

#[tokio::test]
async fn test_reply_reports_abandonment_when_nothing_settles_it() {
    let (pipe, exchange) = exchange();

    let (_stream, reply) = exchange.request_with_reply(bytes("ping")).unwrap();
    lock(&pipe.once_listeners).clear();

    assert_eq!(
        reply.recv().await,
        Err(ExchangeFailure::new("exchange abandoned"))
    );
}
