#[cfg(test)]
mod tests {
  use std::time::Duration;

  use tokio::time::Instant;

  use pretty_assertions::assert_eq;

  use crate::actor::{
    SessionState,
    __tests__::helpers::{DispatchTestContext, RecordingTransport, Sent, envelope_xml, utf16le},
    message::{Job, JobSource},
  };

  #[tokio::test]
  async fn test_single_envelope_sends_one_text() {
    let ctx = DispatchTestContext::new();
    let client = ctx.session("acme-01", SessionState::Ready).await;

    ctx
      .queue
      .enqueue(ctx.uploaded(&client, "a.xml", envelope_xml("91", "9876543210", "Hello", None)));
    ctx.drain().await;

    assert_eq!(
      ctx.transport.sent(),
      vec![Sent::Text {
        chat: "919876543210@c.us".to_string(),
        text: "Hello".to_string(),
      }]
    );
    let stats = ctx.queue.stats();
    assert_eq!((stats.succeeded, stats.failed), (1, 0));
  }

  #[tokio::test]
  async fn test_jobs_dispatch_in_enqueue_order_across_sources() {
    let ctx = DispatchTestContext::new();
    let client = ctx.session("acme-01", SessionState::Ready).await;
    let tmp = tempfile::tempdir().expect("tempdir");
    let processed = tmp.path().join("processed");

    for i in 1..=6 {
      let doc = envelope_xml("91", "9876543210", &format!("message {}", i), None);
      let job = if i % 2 == 0 {
        let path = tmp.path().join(format!("{}.xml", i));
        std::fs::write(&path, &doc).expect("write");
        ctx.watched(&client, &path, &processed)
      } else {
        ctx.uploaded(&client, &format!("{}.xml", i), doc)
      };
      ctx.queue.enqueue(job);
    }
    ctx.drain().await;

    let expected: Vec<String> = (1..=6).map(|i| format!("message {}", i)).collect();
    assert_eq!(ctx.transport.texts(), expected);

    for i in [2, 4, 6] {
      assert!(processed.join(format!("{}.xml", i)).exists());
      assert!(!tmp.path().join(format!("{}.xml", i)).exists());
    }
  }

  #[tokio::test]
  async fn test_failed_decode_does_not_block_next_job() {
    let mut ctx = DispatchTestContext::new();
    let client = ctx.session("acme-01", SessionState::Ready).await;

    ctx.queue.enqueue(ctx.uploaded(&client, "bad.xml", "<NOT_AN_ENVELOPE/>"));
    ctx
      .queue
      .enqueue(ctx.uploaded(&client, "good.xml", envelope_xml("44", "7700900123", "after", None)));
    ctx.drain().await;

    assert_eq!(ctx.transport.texts(), vec!["after".to_string()]);
    let stats = ctx.queue.stats();
    assert_eq!((stats.succeeded, stats.failed), (1, 1));
    assert!(ctx.logs().iter().any(|l| l.starts_with("Error processing bad.xml")));
  }

  #[tokio::test]
  async fn test_missing_field_never_reaches_transport() {
    let mut ctx = DispatchTestContext::new();
    let client = ctx.session("acme-01", SessionState::Ready).await;

    let doc = "<ENVELOP><COUNTRYCODE>91</COUNTRYCODE><TEXT>Hello</TEXT></ENVELOP>";
    ctx.queue.enqueue(ctx.uploaded(&client, "no-mobile.xml", doc));
    ctx.drain().await;

    assert!(ctx.transport.sent().is_empty());
    assert!(ctx.logs().iter().any(|l| l.contains("Missing required field <MOBILE>")));
  }

  #[tokio::test]
  async fn test_session_not_ready_is_job_level() {
    let transport = RecordingTransport::new(Duration::ZERO, false);
    let mut ctx = DispatchTestContext::with_transport(transport);
    let pairing = ctx.session("pairing-01", SessionState::AwaitingPairing).await;
    let unknown = crate::domain::client::ClientId::new("never-set-up").expect("id");

    ctx
      .queue
      .enqueue(ctx.uploaded(&pairing, "a.xml", envelope_xml("91", "1", "one", None)));
    ctx
      .queue
      .enqueue(ctx.uploaded(&unknown, "b.xml", envelope_xml("91", "2", "two", None)));
    ctx.drain().await;

    assert!(ctx.transport.sent().is_empty());
    assert_eq!(ctx.queue.stats().failed, 2);
    let not_ready = ctx.logs().iter().filter(|l| l.contains("is not ready")).count();
    assert_eq!(not_ready, 2);
  }

  #[tokio::test]
  async fn test_concurrent_enqueue_keeps_one_worker() {
    let transport = RecordingTransport::new(Duration::from_millis(2), true);
    let ctx = DispatchTestContext::with_transport(transport);
    let client = ctx.session("acme-01", SessionState::Ready).await;

    let mut producers = Vec::new();
    for p in 0..4 {
      let queue = ctx.queue.clone();
      let reporter = ctx.reporter.clone();
      let client = client.clone();
      producers.push(tokio::spawn(async move {
        for i in 0..5 {
          let doc = envelope_xml("91", "9876543210", &format!("{}-{}", p, i), None);
          let source = JobSource::Uploaded {
            name: format!("{}-{}.xml", p, i),
          };
          queue.enqueue(Job::new(client.clone(), source, doc.into_bytes(), reporter.clone()));
          tokio::task::yield_now().await;
        }
      }));
    }
    for producer in producers {
      producer.await.expect("producer");
    }
    ctx.drain().await;

    assert_eq!(ctx.transport.sent().len(), 20);
    assert_eq!(ctx.transport.max_in_flight(), 1);
    assert!(!ctx.queue.is_active());
    assert_eq!(ctx.queue.stats().pending, 0);
  }

  #[tokio::test]
  async fn test_attachment_sent_after_text() {
    let mut ctx = DispatchTestContext::new();
    let client = ctx.session("acme-01", SessionState::Ready).await;
    let tmp = tempfile::tempdir().expect("tempdir");
    let invoice = tmp.path().join("0042.pdf");
    std::fs::write(&invoice, b"%PDF-1.4").expect("write");

    ctx.queue.enqueue(ctx.uploaded(
      &client,
      "with.xml",
      envelope_xml("91", "9876543210", "invoice", Some(&invoice)),
    ));
    ctx.queue.enqueue(ctx.uploaded(
      &client,
      "missing.xml",
      envelope_xml("91", "9876543210", "no invoice", Some(&tmp.path().join("gone.pdf"))),
    ));
    ctx.drain().await;

    assert_eq!(
      ctx.transport.sent(),
      vec![
        Sent::Text {
          chat: "919876543210@c.us".to_string(),
          text: "invoice".to_string(),
        },
        Sent::Attachment {
          chat: "919876543210@c.us".to_string(),
          path: invoice.clone(),
        },
        Sent::Text {
          chat: "919876543210@c.us".to_string(),
          text: "no invoice".to_string(),
        },
      ]
    );
    assert_eq!(ctx.queue.stats().succeeded, 2);
    assert!(ctx.logs().iter().any(|l| l.starts_with("Attachment not found")));
  }

  #[tokio::test]
  async fn test_utf16_document_is_detected_and_sent() {
    let mut ctx = DispatchTestContext::new();
    let client = ctx.session("acme-01", SessionState::Ready).await;

    let doc = utf16le(&envelope_xml("91", "9876543210", "नमस्ते", None));
    ctx.queue.enqueue(ctx.uploaded(&client, "utf16.xml", doc));
    ctx.drain().await;

    assert_eq!(ctx.transport.texts(), vec!["नमस्ते".to_string()]);
    assert!(ctx.logs().contains(&"Detected UTF-16 LE encoding".to_string()));
  }

  #[tokio::test]
  async fn test_worker_restarts_after_idle() {
    let ctx = DispatchTestContext::new();
    let client = ctx.session("acme-01", SessionState::Ready).await;

    ctx.queue.enqueue(ctx.uploaded(&client, "1.xml", envelope_xml("1", "2", "first", None)));
    ctx.drain().await;
    ctx.queue.enqueue(ctx.uploaded(&client, "2.xml", envelope_xml("1", "2", "second", None)));
    ctx.drain().await;

    assert_eq!(ctx.transport.texts(), vec!["first".to_string(), "second".to_string()]);
    assert_eq!(ctx.queue.stats().workers_started, 2);
  }

  #[tokio::test]
  async fn test_panicking_job_does_not_stall_queue() {
    let mut ctx = DispatchTestContext::with_transport(RecordingTransport::panicking_on("boom"));
    let client = ctx.session("acme-01", SessionState::Ready).await;

    ctx
      .queue
      .enqueue(ctx.uploaded(&client, "boom.xml", envelope_xml("91", "9876543210", "boom", None)));
    ctx
      .queue
      .enqueue(ctx.uploaded(&client, "next.xml", envelope_xml("91", "9876543210", "next", None)));
    ctx.drain().await;

    assert_eq!(ctx.transport.texts(), vec!["next".to_string()]);
    let stats = ctx.queue.stats();
    assert_eq!((stats.succeeded, stats.failed, stats.pending), (1, 1, 0));
    assert!(!ctx.queue.is_active());
    assert!(
      ctx
        .logs()
        .iter()
        .any(|l| l.starts_with("Error processing boom.xml: Job panicked"))
    );

    // A fresh worker still starts afterwards
    ctx
      .queue
      .enqueue(ctx.uploaded(&client, "later.xml", envelope_xml("91", "9876543210", "later", None)));
    ctx.drain().await;
    assert_eq!(ctx.transport.texts(), vec!["next".to_string(), "later".to_string()]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_post_job_delay_follows_sends_only() {
    let delay = Duration::from_millis(1000);
    let ctx = DispatchTestContext::with_post_job_delay(RecordingTransport::new(Duration::ZERO, true), 1000);
    let client = ctx.session("acme-01", SessionState::Ready).await;
    let unknown = crate::domain::client::ClientId::new("never-set-up").expect("id");

    let started = Instant::now();
    ctx
      .queue
      .enqueue(ctx.uploaded(&client, "1.xml", envelope_xml("91", "1", "first", None)));
    ctx.queue.enqueue(ctx.uploaded(&client, "bad.xml", "<NOT_AN_ENVELOPE/>"));
    ctx
      .queue
      .enqueue(ctx.uploaded(&unknown, "2.xml", envelope_xml("91", "2", "nobody", None)));
    ctx
      .queue
      .enqueue(ctx.uploaded(&client, "3.xml", envelope_xml("91", "3", "second", None)));
    ctx.drain().await;

    assert_eq!(ctx.transport.texts(), vec!["first".to_string(), "second".to_string()]);
    let times = ctx.transport.text_times();
    let gap = times[1] - times[0];
    // One delay after the first send; the two early failures add none
    assert!(gap >= delay, "sends only {:?} apart", gap);
    assert!(gap < delay * 2, "failed jobs were delayed too: {:?}", gap);
    // The worker also waits after the last send before going idle
    assert!(started.elapsed() >= delay * 2);
  }
}
