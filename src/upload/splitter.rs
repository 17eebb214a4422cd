//! Single-pass relay of an unbounded body into a block blob.
//!
//! The body is read into one block-sized buffer.  A body that fits in the
//! first buffer is written with a single `put_blob`; anything longer is
//! staged block by block, in order, and committed at the end.

use base64::Engine;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use md5::{Digest, Md5};
use metrics::counter;
use serde::Serialize;
use std::fmt::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::block_id;
use crate::errors::UploadError;
use crate::metrics::{BLOCKS_STAGED_TOTAL, BYTES_RECEIVED_TOTAL, COMMITS_TOTAL, UPLOADS_TOTAL};
use crate::storage::backend::ObjectStore;

/// Where a streamed body goes and how it is cut.
#[derive(Debug, Clone, Copy)]
pub struct StreamTarget<'a> {
    pub container: &'a str,
    pub object_name: &'a str,
    pub content_type: &'a str,
    pub block_size: usize,
    pub max_size: u64,
}

/// What a completed relay wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub container: String,
    pub object_name: String,
    pub content_type: String,
    pub size: u64,
    /// Number of staged blocks; zero when a single put was used.
    pub blocks: u32,
    /// Base64 MD5 of the bytes read from the body.
    pub content_md5: String,
}

/// Relay `stream` into `target.object_name`.
///
/// Staging is strictly sequential and holds at most one buffer.  When
/// `cancel` fires the relay stops before the next block with
/// [`UploadError::UploadCancelled`].  On any failure after the first block
/// was staged, the staged blocks are discarded.
pub async fn stream_to_object<S, E>(
    store: &dyn ObjectStore,
    target: StreamTarget<'_>,
    stream: S,
    cancel: &CancellationToken,
) -> Result<UploadSummary, UploadError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    if target.container.is_empty() || target.object_name.is_empty() {
        return Err(UploadError::MissingUploadTarget(
            "container and object name are required".to_string(),
        ));
    }
    if target.block_size == 0 {
        return Err(UploadError::InvalidArgument("block size must be positive".to_string()));
    }

    let mut staged_any = false;
    let result = relay_stream(store, target, stream, cancel, &mut staged_any).await;
    if result.is_err() && staged_any {
        if let Err(err) = store.discard_staged(target.container, target.object_name).await {
            warn!(
                container = target.container,
                object_name = target.object_name,
                error = %err,
                "failed to discard staged blocks"
            );
        }
    }
    result
}

async fn relay_stream<S, E>(
    store: &dyn ObjectStore,
    target: StreamTarget<'_>,
    mut stream: S,
    cancel: &CancellationToken,
    staged_any: &mut bool,
) -> Result<UploadSummary, UploadError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut relay = Relay {
        store,
        target,
        cancel,
        buffer: BytesMut::with_capacity(target.block_size),
        block_ids: Vec::new(),
    };
    let mut hasher = Md5::new();
    let mut received: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::UploadCancelled),
            next = stream.next() => next,
        };
        let Some(next) = next else { break };
        let mut chunk = next.map_err(|e| {
            UploadError::InvalidArgument(format!("failed to read upload body: {e}"))
        })?;

        received += chunk.len() as u64;
        if received > target.max_size {
            return Err(UploadError::PayloadTooLarge {
                limit: target.max_size,
            });
        }
        hasher.update(&chunk);

        while !chunk.is_empty() {
            if relay.buffer.len() == target.block_size {
                *staged_any = true;
                relay.stage_buffer().await?;
            }
            let take = (target.block_size - relay.buffer.len()).min(chunk.len());
            relay.buffer.extend_from_slice(&chunk.split_to(take));
        }
    }
    counter!(BYTES_RECEIVED_TOTAL).increment(received);

    let blocks = relay.finish().await?;
    let content_md5 = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());
    counter!(UPLOADS_TOTAL, "path" => "stream").increment(1);
    info!(
        container = target.container,
        object_name = target.object_name,
        size = received,
        blocks,
        "streamed upload stored"
    );

    Ok(UploadSummary {
        container: target.container.to_string(),
        object_name: target.object_name.to_string(),
        content_type: target.content_type.to_string(),
        size: received,
        blocks,
        content_md5,
    })
}

struct Relay<'a> {
    store: &'a dyn ObjectStore,
    target: StreamTarget<'a>,
    cancel: &'a CancellationToken,
    buffer: BytesMut,
    block_ids: Vec<String>,
}

impl Relay<'_> {
    fn take_buffer(&mut self) -> Bytes {
        std::mem::replace(&mut self.buffer, BytesMut::with_capacity(self.target.block_size)).freeze()
    }

    async fn stage_buffer(&mut self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::UploadCancelled);
        }
        let block_id = block_id::encode(self.block_ids.len() as u32)?;
        let data = self.take_buffer();
        debug!(
            object_name = self.target.object_name,
            block_id = %block_id,
            len = data.len(),
            "staging block"
        );
        self.store
            .stage_block(self.target.container, self.target.object_name, &block_id, data)
            .await?;
        counter!(BLOCKS_STAGED_TOTAL, "path" => "stream").increment(1);
        self.block_ids.push(block_id);
        Ok(())
    }

    /// Write whatever is left and return the number of staged blocks.
    async fn finish(mut self) -> Result<u32, UploadError> {
        let StreamTarget {
            container,
            object_name,
            content_type,
            ..
        } = self.target;

        if self.block_ids.is_empty() {
            let data = self.take_buffer();
            self.store.put_blob(container, object_name, data, content_type).await?;
            return Ok(0);
        }

        if !self.buffer.is_empty() {
            self.stage_buffer().await?;
        }
        if self.cancel.is_cancelled() {
            return Err(UploadError::UploadCancelled);
        }
        match self
            .store
            .commit_block_list(container, object_name, &self.block_ids, content_type)
            .await
        {
            Ok(()) => {
                counter!(COMMITS_TOTAL, "outcome" => "ok").increment(1);
                Ok(self.block_ids.len() as u32)
            }
            Err(err) => {
                counter!(COMMITS_TOTAL, "outcome" => "error").increment(1);
                Err(err.into())
            }
        }
    }
}
