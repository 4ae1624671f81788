use std::{collections::HashMap, sync::Mutex};

use serde_json::{json, Map, Value};
use tokio::{
    sync::oneshot::{self, Receiver, Sender},
    task::JoinHandle,
};
use tracing::{info, info_span, Span};
use tracing_forest::{processor::from_fn, traits::*, tree::Tree, worker_task};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter, Layer, Registry};
use uuid::Uuid;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

lazy_static! {
    /// Captured trees keyed by the uuid of their root `logged_span`.
    static ref PENDING_TREES: Mutex<HashMap<Uuid, Sender<Tree>>> = Mutex::new(HashMap::new());
    static ref FOREST_WORKER: Mutex<Option<JoinHandle<()>>> = Mutex::new(None);
}

/// A root span whose subtree is captured by the tracing-forest worker and
/// handed back by `retrieve`, so a `?debug` request can show its own
/// pipeline log.
///
/// The span is not entered on creation.  Enter it around the synchronous work
/// to capture, since an entered guard can't be held across an `.await`.
pub struct LoggedSpan {
    pub span: Span,
    rx: Receiver<Tree>,
}

fn tree_to_json(tree: &Tree) -> Value {
    match tree {
        Tree::Span(span) => json!({
            "name": span.name(),
            "level": span.level().to_string(),
            "duration_us": span.total_duration().as_micros() as u64,
            "nodes": span.nodes().iter().map(tree_to_json).collect::<Vec<_>>(),
        }),
        Tree::Event(event) => {
            let mut fields: Map<String, Value> = event
                .fields()
                .iter()
                .map(|f| (f.key().to_string(), Value::from(f.value())))
                .collect();
            fields.insert("level".to_string(), json!(event.level().to_string()));
            if let Some(message) = event.message() {
                fields.insert("message".to_string(), json!(message));
            }
            Value::Object(fields)
        }
    }
}

impl LoggedSpan {
    pub fn new_logged_span(name: &str) -> LoggedSpan {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = PENDING_TREES.lock() {
            pending.insert(id, tx);
        }

        let span = info_span!(parent: None, "logged_span", name, uuid = %id);
        span.in_scope(|| info!("logged_span_start"));
        LoggedSpan { span, rx }
    }

    /// Close the span and wait for its tree.  `None` if the worker dropped it.
    pub async fn retrieve(self) -> Option<Tree> {
        let LoggedSpan { span, rx } = self;
        span.in_scope(|| info!("logged_span_end"));
        drop(span);
        rx.await.ok()
    }

    pub async fn retrieve_serde_json(self) -> Value {
        self.retrieve()
            .await
            .map(|tree| tree_to_json(&tree))
            .unwrap_or(Value::Null)
    }
}

/// Whether `init_logging()` has run in this process.  Retrievals only
/// complete once the forest worker is up.
pub fn logging_active() -> bool {
    FOREST_WORKER.lock().map(|w| w.is_some()).unwrap_or(false)
}

/// Compact stderr output, present only when `RUST_LOG` is set and non-empty.
fn stderr_layer() -> Option<BoxedLayer> {
    let directives = std::env::var("RUST_LOG").ok().filter(|v| !v.is_empty())?;
    let filter = EnvFilter::try_new(directives).ok()?;
    Some(
        tracing_subscriber::fmt::layer()
            .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
            .compact()
            .with_ansi(false)
            .without_time()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    )
}

fn deliver(tree: Tree) {
    let id = match &tree {
        Tree::Span(span) => span.uuid(),
        Tree::Event(_) => return,
    };
    let waiting = PENDING_TREES
        .lock()
        .ok()
        .and_then(|mut pending| pending.remove(&id));
    if let Some(tx) = waiting {
        // The requester may already be gone.
        let _ = tx.send(tree);
    }
}

/// Install the global subscriber.  The forest worker always sees
/// `accessgraph=trace` for `LoggedSpan`.  Must run inside a tokio runtime;
/// later calls are no-ops.
pub fn init_logging() {
    let mut worker = match FOREST_WORKER.lock() {
        Ok(worker) if worker.is_none() => worker,
        _ => return,
    };

    let mut layers: Vec<BoxedLayer> = stderr_layer().into_iter().collect();
    let handle = tokio::spawn(
        worker_task()
            .set_global(true)
            .map_receiver(|_| {
                from_fn(|tree| {
                    deliver(tree);
                    Ok(())
                })
            })
            .build_with(|forest| {
                layers.push(forest.boxed());
                Registry::default()
                    .with(layers)
                    .with(EnvFilter::new("accessgraph=trace"))
            })
            .on(async {
                let _ = tokio::signal::ctrl_c().await;
            }),
    );
    *worker = Some(handle);
}

