//! Upload source - documents sent directly over the connection

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::{info, warn};

use super::{
  dispatch::DispatchQueue,
  handle::Reporter,
  message::{Job, JobSource},
};
use crate::{domain::client::ClientId, ipc::UploadedDocument};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
  #[error("{name}: content is not valid base64: {source}")]
  Base64 {
    name: String,
    #[source]
    source: base64::DecodeError,
  },
}

/// Decode an uploaded document's payload.
pub fn decode_document(doc: &UploadedDocument) -> Result<Vec<u8>, UploadError> {
  STANDARD.decode(doc.content.trim()).map_err(|source| UploadError::Base64 {
    name: doc.name.clone(),
    source,
  })
}

/// Enqueue one job per uploaded document. Undecodable documents are reported
/// and skipped. Returns the number of jobs enqueued.
pub fn ingest(client_id: &ClientId, documents: Vec<UploadedDocument>, reporter: &Reporter, queue: &DispatchQueue) -> usize {
  let total = documents.len();
  let mut enqueued = 0;

  for doc in documents {
    let content = match decode_document(&doc) {
      Ok(content) => content,
      Err(e) => {
        warn!(client_id = %client_id, error = %e, "Rejected uploaded document");
        reporter.log(format!("Error processing {}", e));
        continue;
      }
    };

    let job = Job::new(
      client_id.clone(),
      JobSource::Uploaded { name: doc.name },
      content,
      reporter.clone(),
    );
    queue.enqueue(job);
    enqueued += 1;
  }

  info!(client_id = %client_id, total, enqueued, "Upload ingested");
  reporter.log(format!("Queued {} of {} uploaded document(s)", enqueued, total));
  enqueued
}
