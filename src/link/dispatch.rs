// src/link/dispatch.rs
//! Ordered queues for listener delivery and outbound writes

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

pub(crate) type Writer<W> = Arc<Mutex<Option<W>>>;

pub(crate) enum Job {
    /// Run a listener callback.
    Deliver(Box<dyn FnOnce() + Send>),
    /// Write bytes once the receiver is streaming.
    Write { bytes: Vec<u8>, label: String },
    Shutdown,
}

/// Spawn the queue. Deliveries run one at a time in the order they were
/// sent. Writes keep their relative order on a second task, so a write
/// waiting for the receiver never holds back a delivery.
pub(crate) fn spawn<W>(
    writer: Writer<W>,
    ready: watch::Receiver<bool>,
    cancel: CancellationToken,
    write_poll: Duration,
) -> mpsc::UnboundedSender<Job>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<(Vec<u8>, String)>();

    tokio::spawn(async move {
        let mut ready = ready;
        while let Some((bytes, label)) = write_rx.recv().await {
            if wait_until_ready(&mut ready, &cancel, write_poll).await {
                write(&writer, &bytes, &label).await;
            } else {
                debug!(command = %label, "Link closed before command was sent");
            }
        }
        trace!("Write queue stopped");
    });

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                Job::Deliver(callback) => callback(),
                Job::Write { bytes, label } => {
                    let _ = write_tx.send((bytes, label));
                }
                Job::Shutdown => break,
            }
        }
        trace!("Dispatch queue stopped");
    });
    tx
}

async fn wait_until_ready(
    ready: &mut watch::Receiver<bool>,
    cancel: &CancellationToken,
    write_poll: Duration,
) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            waited = tokio::time::timeout(write_poll, ready.wait_for(|r| *r)) => match waited {
                Ok(Ok(_)) => return true,
                Ok(Err(_)) => return false,
                Err(_) => trace!("Waiting for receiver before writing"),
            },
        }
    }
}

async fn write<W>(writer: &Writer<W>, bytes: &[u8], label: &str)
where
    W: AsyncWrite + Unpin + Send,
{
    let mut guard = writer.lock().await;
    let Some(stream) = guard.as_mut() else {
        warn!(command = %label, "No connection to write to");
        return;
    };
    let result = async {
        stream.write_all(bytes).await?;
        stream.flush().await
    }
    .await;
    match result {
        Ok(()) => debug!(command = %label, bytes = bytes.len(), "Sent command"),
        Err(e) => warn!(command = %label, error = %e, "Error while sending command"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_deliveries_run_in_order() {
        let writer: Writer<tokio::io::DuplexStream> = Arc::new(Mutex::new(None));
        let (_ready_tx, ready_rx) = watch::channel(false);
        let jobs = spawn(writer, ready_rx, CancellationToken::new(), Duration::from_millis(10));

        let seen = Arc::new(StdMutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            jobs.send(Job::Deliver(Box::new(move || seen.lock().unwrap().push(i))))
                .unwrap();
        }
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        jobs.send(Job::Deliver(Box::new(move || {
            let _ = done_tx.send(());
        })))
        .unwrap();
        done_rx.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_waits_for_ready() {
        let (local, mut remote) = tokio::io::duplex(64);
        let writer = Arc::new(Mutex::new(Some(local)));
        let (ready_tx, ready_rx) = watch::channel(false);
        let jobs = spawn(writer, ready_rx, CancellationToken::new(), Duration::from_millis(500));

        jobs.send(Job::Write {
            bytes: b"$PSRF151,01*0F\r\n".to_vec(),
            label: "sbas".into(),
        })
        .unwrap();

        let mut buf = [0u8; 16];
        let early = tokio::time::timeout(Duration::from_secs(2), remote.read(&mut buf)).await;
        assert!(early.is_err(), "nothing is written before the receiver is ready");

        ready_tx.send_replace(true);
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"$PSRF151,01*0F\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_write_does_not_block_delivery() {
        let (local, _remote) = tokio::io::duplex(64);
        let writer = Arc::new(Mutex::new(Some(local)));
        let (_ready_tx, ready_rx) = watch::channel(false);
        let jobs = spawn(writer, ready_rx, CancellationToken::new(), Duration::from_millis(500));

        jobs.send(Job::Write {
            bytes: b"x".to_vec(),
            label: "x".into(),
        })
        .unwrap();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        jobs.send(Job::Deliver(Box::new(move || {
            let _ = done_tx.send(());
        })))
        .unwrap();
        tokio::time::timeout(Duration::from_millis(100), done_rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_drops_pending_write() {
        let (local, _remote) = tokio::io::duplex(64);
        let writer = Arc::new(Mutex::new(Some(local)));
        let (_ready_tx, ready_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let jobs = spawn(writer, ready_rx, cancel.clone(), Duration::from_millis(10));

        jobs.send(Job::Write {
            bytes: b"x".to_vec(),
            label: "x".into(),
        })
        .unwrap();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        jobs.send(Job::Deliver(Box::new(move || {
            let _ = done_tx.send(());
        })))
        .unwrap();
        cancel.cancel();
        done_rx.await.unwrap();
    }
}
