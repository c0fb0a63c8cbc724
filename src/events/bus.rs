use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::event::Event;
use super::sink::{EventSink, StdOutSink};

/// Producer handle for the event stream. Cheap to clone; sends never
/// block.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    tx: flume::Sender<Event>,
}

impl EventEmitter {
    /// Publish an event. Silently dropped once the bus is shut down;
    /// event delivery must never fail a workflow run.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

/// Fans events out to the registered sinks from a background task.
pub struct EventBus {
    sinks: Arc<Mutex<Vec<Box<dyn EventSink>>>>,
    tx: flume::Sender<Event>,
    rx: flume::Receiver<Event>,
    listener: Mutex<Option<Listener>>,
}

struct Listener {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    pub fn with_sink<S: EventSink + 'static>(sink: S) -> Self {
        Self::with_sinks(vec![Box::new(sink)])
    }

    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            sinks: Arc::new(Mutex::new(sinks)),
            tx,
            rx,
            listener: Mutex::new(None),
        }
    }

    /// Register another sink. Takes effect for all later events.
    pub fn add_sink<S: EventSink + 'static>(&self, sink: S) {
        self.sinks.lock().unwrap().push(Box::new(sink));
    }

    /// Producer handle for handlers and the dispatch loop.
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
        }
    }

    /// Start the broadcast task. Idempotent.
    pub fn start(&self) {
        let mut guard = self.listener.lock().expect("listener poisoned");
        if guard.is_some() {
            return;
        }
        let rx = self.rx.clone();
        let sinks = Arc::clone(&self.sinks);
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stopped => {
                        // Deliver anything already queued before exiting.
                        while let Ok(event) = rx.try_recv() {
                            broadcast(&sinks, &event);
                        }
                        break;
                    }
                    received = rx.recv_async() => {
                        let Ok(event) = received else { break };
                        broadcast(&sinks, &event);
                    }
                }
            }
        });
        *guard = Some(Listener { stop, handle });
    }

    /// Stop the broadcast task and wait for it to drain.
    pub async fn shutdown(&self) {
        let listener = self.listener.lock().expect("listener poisoned").take();
        if let Some(listener) = listener {
            let _ = listener.stop.send(());
            let _ = listener.handle.await;
        }
    }
}

fn broadcast(sinks: &Arc<Mutex<Vec<Box<dyn EventSink>>>>, event: &Event) {
    let mut sinks = sinks.lock().unwrap();
    for sink in sinks.iter_mut() {
        if let Err(sink_error) = sink.handle(event) {
            eprintln!("event sink error: {sink_error}");
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.listener.lock() {
            if let Some(listener) = guard.take() {
                let _ = listener.stop.send(());
                listener.handle.abort();
            }
        }
    }
}
