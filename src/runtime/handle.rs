use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::{
    sync::{
        Mutex, broadcast,
        mpsc::{self, OwnedPermit},
        oneshot,
    },
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::{
    batch::BatchCollection,
    core::store::{OperationStore, StoreError, StoreSnapshotV1},
    event::{OperationEvent, StoredEvent},
    ledger::LocationLedger,
    operation::{Content, Operation},
    persist::{EventSink, PersistError},
    types::{EventSeq, OperationId, OperationSet, OperationType, User},
    view::OperationView,
};

use super::events::SiloEvent;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("runtime channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub flush_on_request: bool,
    pub batch_max_ops: usize,
    pub batch_max_latency_ms: u64,
    pub persist_queue_bound: usize,
    pub snapshot_every_ops: usize,
    pub compact_after_snapshot: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_request: true,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            snapshot_every_ops: 2000,
            compact_after_snapshot: false,
        }
    }
}

/// Cloneable handle to the single writer owning the store and the ledger.
///
/// Every lifecycle call goes through one command loop, so two callers can
/// never race on the same operation or location.
pub struct SiloHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<SiloEvent>,
}

impl Clone for SiloHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

enum Command {
    Request {
        operation: Operation,
        resp: Reply<OperationId>,
    },
    Execute {
        id: OperationId,
        done_by: User,
        override_batches: Option<BatchCollection>,
        resp: Reply<()>,
    },
    Cancel {
        id: OperationId,
        cancelled_by: User,
        resp: Reply<()>,
    },
    Rollback {
        id: OperationId,
        rollback_user: User,
        resp: Reply<OperationId>,
    },
    Replace {
        id: OperationId,
        replace_user: User,
        content: Content,
        resp: Reply<OperationId>,
    },
    SetType {
        id: OperationId,
        operation_type: OperationType,
        resp: Reply<()>,
    },
    AddToSet {
        id: OperationId,
        set: OperationSet,
        resp: Reply<bool>,
    },
    View {
        id: OperationId,
        resp: oneshot::Sender<Option<OperationView>>,
    },
    Pending {
        resp: oneshot::Sender<Vec<OperationView>>,
    },
    Flush {
        resp: Reply<EventSeq>,
    },
    Checkpoint {
        resp: Reply<()>,
    },
    Shutdown {
        resp: Reply<()>,
    },
}

enum PersistMsg {
    Events(Vec<StoredEvent>),
    Flush {
        resp: oneshot::Sender<Result<EventSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: StoreSnapshotV1,
        last_seq: EventSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

struct Writer<L> {
    store: OperationStore,
    ledger: L,
    events_tx: broadcast::Sender<SiloEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    config: RuntimeConfig,
    events_since_snapshot: usize,
}

pub fn spawn_silo<L>(
    store: OperationStore,
    ledger: L,
    sink: Option<Box<dyn EventSink>>,
    config: RuntimeConfig,
) -> SiloHandle
where
    L: LocationLedger + Send + 'static,
{
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<SiloEvent>(1024);

    let (persist_tx, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound);
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<EventSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let mut writer = Writer {
        store,
        ledger,
        events_tx: events_tx.clone(),
        persist_tx,
        config,
        events_since_snapshot: 0,
    };

    tokio::spawn(async move {
        loop {
            if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        if writer.handle_command(cmd).await {
                            break;
                        }
                    }
                    durable = rx.recv() => {
                        if let Some(Ok(event_seq)) = durable {
                            let _ = writer.events_tx.send(SiloEvent::DurableUpTo { event_seq });
                        }
                    }
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                if writer.handle_command(cmd).await {
                    break;
                }
            }
        }
    });

    SiloHandle { cmd_tx, events_tx }
}

impl SiloHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SiloEvent> {
        self.events_tx.subscribe()
    }

    /// Persists a pending operation.
    pub async fn request(&self, operation: Operation) -> Result<OperationId, RuntimeError> {
        self.call(|resp| Command::Request { operation, resp }).await?
    }

    pub async fn execute(
        &self,
        id: OperationId,
        done_by: User,
        override_batches: Option<BatchCollection>,
    ) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Execute {
            id,
            done_by,
            override_batches,
            resp,
        })
        .await?
    }

    pub async fn cancel(&self, id: OperationId, cancelled_by: User) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Cancel {
            id,
            cancelled_by,
            resp,
        })
        .await?
    }

    /// Creates the pending rollback of `id`; execute it to undo the effect.
    pub async fn create_rollback(
        &self,
        id: OperationId,
        rollback_user: User,
    ) -> Result<OperationId, RuntimeError> {
        self.call(|resp| Command::Rollback {
            id,
            rollback_user,
            resp,
        })
        .await?
    }

    pub async fn create_replace(
        &self,
        id: OperationId,
        replace_user: User,
        content: impl Into<Content>,
    ) -> Result<OperationId, RuntimeError> {
        let content = content.into();
        self.call(|resp| Command::Replace {
            id,
            replace_user,
            content,
            resp,
        })
        .await?
    }

    pub async fn set_type(
        &self,
        id: OperationId,
        operation_type: OperationType,
    ) -> Result<(), RuntimeError> {
        self.call(|resp| Command::SetType {
            id,
            operation_type,
            resp,
        })
        .await?
    }

    pub async fn add_to_set(&self, id: OperationId, set: OperationSet) -> Result<bool, RuntimeError> {
        self.call(|resp| Command::AddToSet { id, set, resp }).await?
    }

    pub async fn view(&self, id: OperationId) -> Result<Option<OperationView>, RuntimeError> {
        self.call(|resp| Command::View { id, resp }).await
    }

    pub async fn pending(&self) -> Result<Vec<OperationView>, RuntimeError> {
        self.call(|resp| Command::Pending { resp }).await
    }

    pub async fn flush(&self) -> Result<EventSeq, RuntimeError> {
        self.call(|resp| Command::Flush { resp }).await?
    }

    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Checkpoint { resp }).await?
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Shutdown { resp }).await?
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

impl<L: LocationLedger> Writer<L> {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Request { operation, resp } => {
                let res = self
                    .mutate(
                        |store, _| store.insert(operation),
                        |id| vec![SiloEvent::Requested { id: *id }],
                    )
                    .await;
                let _ = resp.send(res);
            }
            Command::Execute {
                id,
                done_by,
                override_batches,
                resp,
            } => {
                let res = self
                    .mutate(
                        |store, ledger| store.execute(id, done_by, override_batches, ledger),
                        |_| vec![SiloEvent::Executed { id }],
                    )
                    .await;
                let _ = resp.send(res);
            }
            Command::Cancel {
                id,
                cancelled_by,
                resp,
            } => {
                let res = self
                    .mutate(
                        |store, _| store.cancel(id, cancelled_by),
                        |_| vec![SiloEvent::Cancelled { id }],
                    )
                    .await;
                let _ = resp.send(res);
            }
            Command::Rollback {
                id,
                rollback_user,
                resp,
            } => {
                let res = self
                    .mutate(
                        |store, _| store.create_rollback(id, rollback_user),
                        |rollback| {
                            vec![
                                SiloEvent::Requested { id: *rollback },
                                SiloEvent::RollbackCreated {
                                    id,
                                    rollback: *rollback,
                                },
                            ]
                        },
                    )
                    .await;
                let _ = resp.send(res);
            }
            Command::Replace {
                id,
                replace_user,
                content,
                resp,
            } => {
                let res = self
                    .mutate(
                        |store, _| store.create_replace(id, replace_user, content),
                        |replacement| {
                            vec![
                                SiloEvent::Cancelled { id },
                                SiloEvent::Requested { id: *replacement },
                                SiloEvent::Replaced {
                                    id,
                                    replacement: *replacement,
                                },
                            ]
                        },
                    )
                    .await;
                let _ = resp.send(res);
            }
            Command::SetType {
                id,
                operation_type,
                resp,
            } => {
                let res = self
                    .mutate(
                        |store, _| store.set_type(id, operation_type),
                        |_| vec![SiloEvent::Updated { id }],
                    )
                    .await;
                let _ = resp.send(res);
            }
            Command::AddToSet { id, set, resp } => {
                let res = self
                    .mutate(
                        |store, _| store.add_to_set(id, set),
                        |_| vec![SiloEvent::Updated { id }],
                    )
                    .await;
                let _ = resp.send(res);
            }
            Command::View { id, resp } => {
                let _ = resp.send(self.store.view(id));
            }
            Command::Pending { resp } => {
                let views = self.store.pending().into_iter().map(Operation::view).collect();
                let _ = resp.send(views);
            }
            Command::Flush { resp } => {
                let out = if let Some(tx) = &self.persist_tx {
                    let (flush_tx, flush_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                        Err(RuntimeError::ChannelClosed)
                    } else {
                        flush_rx
                            .await
                            .map_err(|_| RuntimeError::ChannelClosed)
                            .and_then(|r| r.map_err(RuntimeError::from))
                    }
                } else {
                    Ok(self.store.latest_event_seq())
                };
                let _ = resp.send(out);
            }
            Command::Checkpoint { resp } => {
                let out = self.checkpoint().await;
                let _ = resp.send(out);
            }
            Command::Shutdown { resp } => {
                let out = if let Some(tx) = &self.persist_tx {
                    let (done_tx, done_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                        Err(RuntimeError::ChannelClosed)
                    } else {
                        done_rx.await.map_err(|_| RuntimeError::ChannelClosed)
                    }
                } else {
                    Ok(())
                };
                let _ = resp.send(out);
                return true;
            }
        }

        self.maybe_auto_checkpoint().await;
        false
    }

    /// Runs one store mutation and hands its journal events to persistence.
    ///
    /// Queue capacity is reserved before the store is touched: once a
    /// mutation succeeds its events always reach the worker, and a closed
    /// worker refuses the call with the store unchanged. A full queue makes
    /// the writer wait.
    async fn mutate<T>(
        &mut self,
        apply: impl FnOnce(&mut OperationStore, &mut L) -> Result<T, StoreError>,
        announce: impl FnOnce(&T) -> Vec<SiloEvent>,
    ) -> Result<T, RuntimeError> {
        let permit = reserve_persist(self.persist_tx.clone()).await?;
        let value = apply(&mut self.store, &mut self.ledger)?;
        let stored = self.store.drain_pending_events();
        self.events_since_snapshot += stored.len();

        match permit {
            Some(permit) => {
                if !stored.is_empty() {
                    permit.send(PersistMsg::Events(stored));
                }
            }
            None => {
                let _ = self.events_tx.send(SiloEvent::DurableUpTo {
                    event_seq: self.store.latest_event_seq(),
                });
            }
        }
        for event in announce(&value) {
            let _ = self.events_tx.send(event);
        }
        Ok(value)
    }

    async fn checkpoint(&mut self) -> Result<(), RuntimeError> {
        let Some(tx) = &self.persist_tx else {
            return Ok(());
        };

        let snapshot = self.store.export_snapshot();
        let last_seq = self.store.latest_event_seq();
        let (cp_tx, cp_rx) = oneshot::channel();
        tx.send(PersistMsg::Checkpoint {
            snapshot,
            last_seq,
            compact: self.config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .map_err(|_| RuntimeError::ChannelClosed)?;
        cp_rx.await.map_err(|_| RuntimeError::ChannelClosed)??;
        self.events_since_snapshot = 0;
        Ok(())
    }

    async fn maybe_auto_checkpoint(&mut self) {
        if self.config.snapshot_every_ops == 0
            || self.events_since_snapshot < self.config.snapshot_every_ops
        {
            return;
        }
        if let Err(err) = self.checkpoint().await {
            warn!(%err, "automatic checkpoint failed");
        }
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn EventSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<EventSeq, PersistError>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredEvent>::new();
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
        let mut last_durable: EventSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Events(events) => {
                            let has_request = events
                                .iter()
                                .any(|e| matches!(e.event, OperationEvent::Requested { .. }));
                            buf.extend(events);

                            if buf.len() >= config.batch_max_ops || (config.flush_on_request && has_request) {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let result = match flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await {
                                Err(err) => Err(err),
                                Ok(()) => {
                                    let sink_ref = Arc::clone(&sink);
                                    match tokio::task::spawn_blocking(move || {
                                        let mut sink = sink_ref.blocking_lock();
                                        sink.write_snapshot(&snapshot, last_seq)?;
                                        if compact {
                                            let removed = sink.compact_through(last_seq)?;
                                            debug!(last_seq, removed, "journal compacted");
                                        }
                                        Result::<(), PersistError>::Ok(())
                                    }).await {
                                        Ok(inner) => inner,
                                        Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
                                    }
                                }
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn EventSink>>>,
    buf: &mut Vec<StoredEvent>,
    last_durable: &mut EventSeq,
    durable_tx: &mpsc::UnboundedSender<Result<EventSeq, PersistError>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let events = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let append_res: Result<EventSeq, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let seq = sink.append_events(&events)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match append_res {
        Ok(seq) => {
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            warn!(%err, "journal append failed");
            let _ = durable_tx.send(Err(PersistError::Message(format!("append failed: {err}"))));
            Err(err)
        }
    }
}

async fn reserve_persist(
    tx: Option<mpsc::Sender<PersistMsg>>,
) -> Result<Option<OwnedPermit<PersistMsg>>, RuntimeError> {
    let Some(tx) = tx else {
        return Ok(None);
    };
    if tx.capacity() == 0 {
        debug!("persist queue full, waiting for the journal worker");
    }
    tx.reserve_owned()
        .await
        .map(Some)
        .map_err(|_| RuntimeError::ChannelClosed)
}
