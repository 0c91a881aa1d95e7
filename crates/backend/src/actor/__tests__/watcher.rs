#[cfg(test)]
mod tests {
  use std::{fs, path::Path, time::Duration};

  use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
  };
  use tokio_util::sync::CancellationToken;

  use crate::{
    actor::{
      SessionState,
      __tests__::helpers::{DispatchTestContext, envelope_xml},
      watcher::{WatchSource, WatchTarget},
    },
    domain::config::WatcherConfig,
  };

  fn fast_config() -> WatcherConfig {
    WatcherConfig {
      stability_threshold_ms: 150,
      poll_interval_ms: 20,
      ..Default::default()
    }
  }

  async fn wait_for_sends(ctx: &DispatchTestContext, count: usize) {
    timeout(Duration::from_secs(5), async {
      while ctx.transport.sent().len() < count {
        sleep(Duration::from_millis(20)).await;
      }
    })
    .await
    .expect("timed out waiting for sends");
    ctx.drain().await;
  }

  fn write(dir: &Path, name: &str, text: &str) {
    fs::write(dir.join(name), envelope_xml("91", "9876543210", text, None)).expect("write document");
  }

  #[tokio::test]
  async fn test_watch_source_dispatches_and_moves_documents() {
    let ctx = DispatchTestContext::new();
    let client = ctx.session("acme-01", SessionState::Ready).await;

    let tmp = tempfile::tempdir().expect("tempdir");
    let source = tmp.path().to_path_buf();
    let processed = source.join("processed");

    // Present before watching starts
    write(&source, "existing.xml", "existing");
    // Ignored: hidden, wrong extension
    write(&source, ".hidden.xml", "hidden");
    write(&source, "notes.txt", "notes");

    let cancel = CancellationToken::new();
    let target = WatchTarget {
      client_id: client.clone(),
      source: source.clone(),
      processed: processed.clone(),
    };
    let task = WatchSource::spawn(
      target,
      &fast_config(),
      ctx.queue.clone(),
      ctx.reporter.clone(),
      cancel.clone(),
    )
    .expect("spawn watch source");

    wait_for_sends(&ctx, 1).await;
    assert_eq!(ctx.transport.texts(), vec!["existing".to_string()]);

    write(&source, "0042.xml", "dropped later");
    wait_for_sends(&ctx, 2).await;

    assert_eq!(
      ctx.transport.texts(),
      vec!["existing".to_string(), "dropped later".to_string()]
    );
    assert!(processed.join("existing.xml").exists());
    assert!(processed.join("0042.xml").exists());
    assert!(!source.join("0042.xml").exists());
    assert!(source.join(".hidden.xml").exists());
    assert!(source.join("notes.txt").exists());

    // Files landing in the nested processed folder are not re-read
    sleep(Duration::from_millis(400)).await;
    assert_eq!(ctx.transport.sent().len(), 2);

    cancel.cancel();
    timeout(Duration::from_secs(2), task)
      .await
      .expect("watch source should stop")
      .expect("join");
  }

  #[tokio::test]
  async fn test_file_still_being_written_waits_for_stability() {
    let ctx = DispatchTestContext::new();
    let client = ctx.session("acme-01", SessionState::Ready).await;

    let tmp = tempfile::tempdir().expect("tempdir");
    let source = tmp.path().to_path_buf();
    let config = WatcherConfig {
      stability_threshold_ms: 300,
      poll_interval_ms: 20,
      ..Default::default()
    };

    let cancel = CancellationToken::new();
    let target = WatchTarget {
      client_id: client,
      source: source.clone(),
      processed: source.join("processed"),
    };
    let _task = WatchSource::spawn(target, &config, ctx.queue.clone(), ctx.reporter.clone(), cancel.clone())
      .expect("spawn watch source");

    // Grow the file in chunks, each well inside the stability window
    let doc = envelope_xml("91", "9876543210", "slow writer", None);
    let path = source.join("slow.xml");
    let (head, tail) = doc.split_at(doc.len() / 2);
    fs::write(&path, head).expect("write head");
    sleep(Duration::from_millis(150)).await;
    assert!(ctx.transport.sent().is_empty());

    let mut full = head.to_string();
    full.push_str(tail);
    fs::write(&path, &full).expect("write tail");
    sleep(Duration::from_millis(150)).await;
    assert!(ctx.transport.sent().is_empty());

    wait_for_sends(&ctx, 1).await;
    assert_eq!(ctx.transport.texts(), vec!["slow writer".to_string()]);

    cancel.cancel();
  }

  #[tokio::test]
  async fn test_watch_error_is_reported_and_watching_continues() {
    let mut ctx = DispatchTestContext::new();
    let client = ctx.session("acme-01", SessionState::Ready).await;

    let tmp = tempfile::tempdir().expect("tempdir");
    let source = tmp.path().to_path_buf();
    let target = WatchTarget {
      client_id: client,
      source: source.clone(),
      processed: source.join("processed"),
    };

    let (event_tx, event_rx) = mpsc::channel(256);
    let injector = event_tx.clone();
    let cancel = CancellationToken::new();
    let watch = WatchSource::with_events(
      target,
      &fast_config(),
      ctx.queue.clone(),
      ctx.reporter.clone(),
      cancel.clone(),
      event_tx,
      event_rx,
    )
    .expect("watch source");
    let task = tokio::spawn(watch.run());

    injector
      .send(Err(notify::Error::generic("watch descriptor lost")))
      .await
      .expect("inject error");

    write(&source, "after-error.xml", "still watching");
    wait_for_sends(&ctx, 1).await;
    assert_eq!(ctx.transport.texts(), vec!["still watching".to_string()]);
    assert!(!task.is_finished());
    assert!(
      ctx
        .logs()
        .iter()
        .any(|l| l.starts_with("Watcher error:") && l.contains("watch descriptor lost"))
    );

    cancel.cancel();
    timeout(Duration::from_secs(2), task)
      .await
      .expect("watch source should stop")
      .expect("join");
  }
}
