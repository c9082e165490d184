//! Releasing results nobody is going to inspect.

use super::result::ResultReceiver;

/// Wait for the result on `out` and discard it.
///
/// Fire-and-forget callers use this so the captured output is released even
/// though nobody reads it. Returns immediately if the run task already
/// dropped its sender.
pub async fn drain_out(out: ResultReceiver) {
    if let Ok(result) = out.await {
        result.discard();
    }
}

/// [`drain_out`] every receiver in turn.
pub async fn drain_all<I>(outs: I)
where
    I: IntoIterator<Item = ResultReceiver>,
{
    for out in outs {
        drain_out(out).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SafeBuffer;
    use crate::process::InvocationResult;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    fn pending(stdout: &SafeBuffer, stderr: &SafeBuffer) -> ResultReceiver {
        stdout.write(b"unread output").unwrap();
        stderr.write(b"unread errors").unwrap();
        let (tx, rx) = oneshot::channel();
        let result = InvocationResult::new(Uuid::now_v7(), stdout.clone(), stderr.clone());
        tx.send(result).unwrap();
        rx
    }

    #[tokio::test]
    async fn test_drain_out_discards_both_buffers() {
        let stdout = SafeBuffer::new();
        let stderr = SafeBuffer::new();

        drain_out(pending(&stdout, &stderr)).await;

        assert!(stdout.is_discarded());
        assert!(stderr.is_discarded());
    }

    #[tokio::test]
    async fn test_drain_out_tolerates_closed_channel() {
        let (tx, rx) = oneshot::channel::<InvocationResult>();
        drop(tx);
        drain_out(rx).await;
    }

    #[tokio::test]
    async fn test_drain_all() {
        let buffers: Vec<_> = (0..3).map(|_| (SafeBuffer::new(), SafeBuffer::new())).collect();
        let receivers: Vec<_> = buffers.iter().map(|(out, err)| pending(out, err)).collect();

        drain_all(receivers).await;

        for (out, err) in &buffers {
            assert!(out.is_discarded());
            assert!(err.is_discarded());
        }
    }
}
