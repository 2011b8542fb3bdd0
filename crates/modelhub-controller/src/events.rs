//! Watch fan-in for gateway clients
//!
//! One producer task per watched kind forwards events into a single merged
//! stream. The hand-off channel holds one event, so a slow consumer stalls
//! every producer's watch read. Cancelling the token stops all producers and
//! ends the merged stream.

use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use kube::api::{Api, DynamicObject, WatchEvent, WatchParams};
use kube::{Client, ResourceExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use modelhub_common::naming::resync_timestamp;
use modelhub_common::{Error, KindRegistry, ResourceKind, RESYNC_ANNOTATION_KEY};

use crate::client::KubeClient;

/// Capacity of the merged channel: the smallest bounded hand-off
pub const FANOUT_CHANNEL_CAPACITY: usize = 1;

/// Kinds a gateway client watches
pub const GATEWAY_KINDS: [ResourceKind; 3] = [
    ResourceKind::Model,
    ResourceKind::ModelSource,
    ResourceKind::Dataset,
];

/// Server-side watch timeout (seconds) - must be less than the client read_timeout
/// (30s) so the API server ends an idle watch before the client gives up on it.
/// The watch then resumes from the last resourceVersion.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Delay before re-establishing a watch that failed to open
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// What happened to a watched object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    /// Object created (or listed on watch start)
    Added,
    /// Object changed
    Modified,
    /// Object removed
    Deleted,
}

/// One event delivered to a gateway client
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceEvent {
    /// Kind of the object (`Model`, `ModelSource`, `Dataset`)
    pub resource: String,
    /// What happened
    pub action: EventAction,
    /// Full object as JSON
    pub payload: serde_json::Value,
}

impl ResourceEvent {
    fn from_object(kind: ResourceKind, action: EventAction, obj: &DynamicObject) -> Self {
        Self {
            resource: kind.as_str().to_string(),
            action,
            payload: serde_json::to_value(obj).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Send `item`, giving up when cancelled or when the receiver is gone.
/// Returns `false` when the producer should stop.
async fn forward<T>(tx: &mpsc::Sender<T>, item: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

/// Merge `streams` into one, one producer task per input stream.
///
/// The output ends when every input has ended or `cancel` fires.
pub fn fan_in<S, T>(streams: Vec<S>, cancel: CancellationToken) -> ReceiverStream<T>
where
    S: Stream<Item = T> + Send + Unpin + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(FANOUT_CHANNEL_CAPACITY);
    for mut stream in streams {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = stream.next() => next,
                };
                let Some(item) = next else { break };
                if !forward(&tx, item, &cancel).await {
                    break;
                }
            }
        });
    }
    ReceiverStream::new(rx)
}

/// Watch `kinds` cluster-wide and merge their events into one stream.
pub fn watch_resources(
    client: Client,
    registry: &KindRegistry,
    kinds: &[ResourceKind],
    cancel: CancellationToken,
) -> Result<ReceiverStream<ResourceEvent>, Error> {
    let streams = kinds
        .iter()
        .map(|&kind| {
            let ar = registry.api_resource(kind)?;
            let api: Api<DynamicObject> = Api::all_with(client.clone(), &ar);
            Ok(kind_events(api, kind))
        })
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(fan_in(streams, cancel))
}

/// What a single watch event means for the producer
#[derive(Debug)]
enum WatchStep {
    /// Forward the object to the gateway
    Emit(EventAction, DynamicObject),
    /// Nothing to forward; remember the bookmarked version
    Bookmark(String),
    /// The saved version expired; list again from scratch
    Relist,
    /// The watch ended or failed; reopen from the saved version
    Reopen,
}

fn classify(event: Option<kube::Result<WatchEvent<DynamicObject>>>, kind: ResourceKind) -> WatchStep {
    match event {
        Some(Ok(WatchEvent::Added(obj))) => WatchStep::Emit(EventAction::Added, obj),
        Some(Ok(WatchEvent::Modified(obj))) => WatchStep::Emit(EventAction::Modified, obj),
        Some(Ok(WatchEvent::Deleted(obj))) => WatchStep::Emit(EventAction::Deleted, obj),
        Some(Ok(WatchEvent::Bookmark(bookmark))) => {
            WatchStep::Bookmark(bookmark.metadata.resource_version)
        }
        Some(Ok(WatchEvent::Error(e))) if e.code == 410 => {
            debug!(kind = %kind, "watch version expired, restarting from scratch");
            WatchStep::Relist
        }
        Some(Ok(WatchEvent::Error(e))) => {
            warn!(kind = %kind, error = %e.message, "watch error event");
            WatchStep::Reopen
        }
        Some(Err(e)) => {
            warn!(kind = %kind, error = %e, "watch stream failed");
            WatchStep::Reopen
        }
        None => WatchStep::Reopen,
    }
}

/// Resumable watch over one kind
struct WatchCursor {
    api: Api<DynamicObject>,
    kind: ResourceKind,
    params: WatchParams,
    version: String,
    events: Option<BoxStream<'static, kube::Result<WatchEvent<DynamicObject>>>>,
}

impl WatchCursor {
    /// Next event to forward; reopens the watch as often as needed
    async fn next_event(&mut self) -> ResourceEvent {
        loop {
            if self.events.is_none() {
                match self.api.watch(&self.params, &self.version).await {
                    Ok(stream) => self.events = Some(stream.boxed()),
                    Err(e) => {
                        warn!(kind = %self.kind, error = %e, "failed to open watch, retrying");
                        tokio::time::sleep(WATCH_RETRY_DELAY).await;
                        continue;
                    }
                }
            }
            let Some(events) = self.events.as_mut() else {
                continue;
            };

            match classify(events.next().await, self.kind) {
                WatchStep::Emit(action, obj) => {
                    if let Some(rv) = obj.resource_version() {
                        self.version = rv;
                    }
                    return ResourceEvent::from_object(self.kind, action, &obj);
                }
                WatchStep::Bookmark(rv) => self.version = rv,
                WatchStep::Relist => {
                    self.version = "0".to_string();
                    self.events = None;
                }
                WatchStep::Reopen => self.events = None,
            }
        }
    }
}

/// Endless event stream for one kind; ends only when dropped
fn kind_events(api: Api<DynamicObject>, kind: ResourceKind) -> BoxStream<'static, ResourceEvent> {
    info!(kind = %kind, "watch producer started");
    let cursor = WatchCursor {
        api,
        kind,
        params: WatchParams::default().timeout(WATCH_TIMEOUT_SECS),
        version: "0".to_string(),
        events: None,
    };
    stream::unfold(cursor, |mut cursor| async move {
        let event = cursor.next_event().await;
        Some((event, cursor))
    })
    .boxed()
}

/// Ask the dataset controller to re-sync every version of a Model.
///
/// Stamps the Model with a fresh resync annotation; the Model reconciler
/// copies it onto each owned dataset. Returns the timestamp written.
pub async fn trigger_resync(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
) -> Result<String, Error> {
    let at = resync_timestamp(Utc::now());
    kube.set_annotation(ResourceKind::Model, namespace, name, RESYNC_ANNOTATION_KEY, &at)
        .await?;
    info!(model = %name, namespace = %namespace, at = %at, "resync requested");
    Ok(at)
}
