//! The fan-out work loop: drains a dirty set of `(type, id)` keys and
//! pushes fresh operations into every open stream for that document (spec
//! §4.3.6 "stream updater").

use super::ContentBackend;
use crate::error::Result;
use crate::model::DocKey;
use crate::stream::StreamHandle;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run until `cancel` fires. Exits promptly when the dirty set is empty and
/// `notify` hasn't fired, per spec §9 "exits when empty".
pub async fn run(backend: Arc<ContentBackend>, cancel: CancellationToken) {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let keys = claim_all(&backend).await;
        if keys.is_empty() {
            tokio::select! {
                _ = backend.notify.notified() => continue,
                _ = cancel.cancelled() => return,
            }
        }

        let results = futures::future::join_all(
            keys.into_iter()
                .map(|key| process_key(backend.clone(), key)),
        )
        .await;

        let had_error = results.iter().any(Result::is_err);
        if had_error {
            attempt += 1;
            let delay = backend.config.backoff.delay_for_attempt(attempt);
            tracing::warn!(?delay, attempt, "stream-update work loop backing off after error");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = backend.notify.notified() => {},
                _ = cancel.cancelled() => return,
            }
        } else {
            attempt = 0;
        }
    }
}

async fn claim_all(backend: &ContentBackend) -> Vec<DocKey> {
    let mut dirty = backend.dirty.lock().await;
    dirty.drain(..).collect()
}

/// Process one claimed key: steps 2-7 of spec §4.3.6.
async fn process_key(backend: Arc<ContentBackend>, key: DocKey) -> Result<()> {
    let Some(streams_entry) = backend.streams.get(&key) else {
        return Ok(());
    };
    let mut candidates: Vec<Arc<StreamHandle>> = {
        let streams = streams_entry.lock().await;
        streams.iter().cloned().collect()
    };
    drop(streams_entry);

    // Filter to streams that still need data, annotated with their current
    // versionNext, then sort ascending versionNext, descending versionEnd
    // (spec §4.3.6 step 2).
    let mut open = Vec::new();
    for stream in candidates.drain(..) {
        if stream.needs_update().await {
            let next = stream.version_next().await;
            let end = stream.version_end().await;
            open.push((next, end, stream));
        } else if stream.is_closed() {
            backend.unregister_stream(&key, &stream).await;
        }
    }
    if open.is_empty() {
        return Ok(());
    }
    open.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let from = open[0].0;
    let mut to = open[0].1;
    for (next, end, _) in open.iter().skip(1) {
        if *next <= to {
            to = to.max(*end);
        }
    }
    to = to.min(from.saturating_add(backend.config.load_limit));

    let result = backend
        .load_operations(&key.doc_type, &key.id, from, to)
        .await;

    let loaded = match result {
        Ok(ops) => ops,
        Err(err) => {
            if let Some((_, _, first)) = open.first() {
                first.fail(err.clone());
            }
            backend.schedule_stream_update(key).await;
            return Err(err);
        },
    };

    for op in &loaded {
        for (_, _, stream) in open.iter() {
            if stream.version_next().await == op.version {
                if let Err(err) = stream.push_operation(op.clone()).await {
                    tracing::warn!(doc = %key, error = %err, "work loop push failed");
                }
                if stream.is_closed() {
                    backend.unregister_stream(&key, stream).await;
                }
            }
        }
    }

    let filled_completely = loaded
        .last()
        .map(|op| op.version == to.saturating_sub(1))
        .unwrap_or(false);
    if filled_completely && to < open.iter().map(|(_, end, _)| *end).max().unwrap_or(to) {
        backend.schedule_stream_update(key).await;
        backend.notify.notify_one();
    }

    Ok(())
}
