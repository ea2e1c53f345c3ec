use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use cortex_shared::AppError;
use sea_orm::prelude::PgVector;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Anything that can turn a batch of texts into vectors. Implemented by
/// [`crate::LlmClient`]; tests substitute a local implementation.
pub trait Embedder: Send + Sync + 'static {
  fn embed_batch(
    &self,
    inputs: &[String],
  ) -> impl Future<Output = Result<Vec<PgVector>, AppError>> + Send;
}

impl Embedder for crate::LlmClient {
  async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<PgVector>, AppError> {
    Self::embed_batch(self, inputs).await
  }
}

struct Item {
  text: String,
  reply: oneshot::Sender<Result<PgVector, AppError>>,
}

/// Accumulates single embedding requests and flushes them as one vectorized
/// call once `batch_size` items are pending or `flush_interval` has elapsed
/// since the first pending item.
#[derive(Clone)]
pub struct EmbeddingBatcher {
  tx: mpsc::Sender<Item>,
}

impl EmbeddingBatcher {
  pub fn spawn<E: Embedder>(embedder: Arc<E>, batch_size: usize, flush_interval: Duration) -> Self {
    let (tx, rx) = mpsc::channel(batch_size.max(1) * 4);
    tokio::spawn(run(embedder, rx, batch_size.max(1), flush_interval));
    Self { tx }
  }

  /// Embed one text through the shared batch. Suspends until its batch is
  /// flushed.
  pub async fn embed(&self, text: String) -> Result<PgVector, AppError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Item { text, reply })
      .await
      .map_err(|_| AppError::new(anyhow!("embedding batcher is gone")))?;
    rx.await
      .map_err(|_| AppError::new(anyhow!("embedding batch dropped before replying")))?
  }
}

async fn run<E: Embedder>(
  embedder: Arc<E>,
  mut rx: mpsc::Receiver<Item>,
  batch_size: usize,
  flush_interval: Duration,
) {
  let mut pending: Vec<Item> = Vec::with_capacity(batch_size);
  let mut deadline = Instant::now();

  loop {
    tokio::select! {
      item = rx.recv() => {
        match item {
          Some(item) => {
            if pending.is_empty() {
              deadline = Instant::now() + flush_interval;
            }
            pending.push(item);
            if pending.len() >= batch_size {
              flush(&embedder, &mut pending).await;
            }
          }
          None => {
            flush(&embedder, &mut pending).await;
            return;
          }
        }
      }
      () = tokio::time::sleep_until(deadline), if !pending.is_empty() => {
        flush(&embedder, &mut pending).await;
      }
    }
  }
}

async fn flush<E: Embedder>(embedder: &Arc<E>, pending: &mut Vec<Item>) {
  if pending.is_empty() {
    return;
  }
  let items = std::mem::take(pending);
  let texts: Vec<String> = items.iter().map(|item| item.text.clone()).collect();

  match embedder.embed_batch(&texts).await {
    Ok(vectors) => {
      for (item, vector) in items.into_iter().zip(vectors) {
        let _ = item.reply.send(Ok(vector));
      }
    }
    Err(err) => {
      tracing::warn!(batch = texts.len(), error = %err, "embedding batch failed");
      let message = err.to_string();
      for item in items {
        let _ = item.reply.send(Err(AppError::new(anyhow!(message.clone()))));
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  /// Records batch sizes and returns a fixed-direction unit vector per text.
  struct FakeEmbedder {
    batches: Mutex<Vec<usize>>,
  }

  impl Embedder for FakeEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<PgVector>, AppError> {
      self.batches.lock().unwrap().push(inputs.len());
      Ok(
        inputs
          .iter()
          .map(|text| PgVector::from(vec![text.len() as f32, 1.0]))
          .collect(),
      )
    }
  }

  #[tokio::test]
  async fn full_batch_flushes_immediately() {
    let embedder = Arc::new(FakeEmbedder { batches: Mutex::new(vec![]) });
    let batcher = EmbeddingBatcher::spawn(embedder.clone(), 2, Duration::from_secs(60));

    let (a, b) = tokio::join!(
      batcher.embed("Casey Adams".to_owned()),
      batcher.embed("Anthropic".to_owned()),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(*embedder.batches.lock().unwrap(), vec![2]);
  }

  #[tokio::test]
  async fn partial_batch_flushes_on_the_timer() {
    let embedder = Arc::new(FakeEmbedder { batches: Mutex::new(vec![]) });
    let batcher = EmbeddingBatcher::spawn(embedder.clone(), 100, Duration::from_millis(20));

    let vector = batcher.embed("Cloudflare".to_owned()).await.unwrap();
    assert_eq!(vector.as_slice().len(), 2);
    assert_eq!(*embedder.batches.lock().unwrap(), vec![1]);
  }
}
