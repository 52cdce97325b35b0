//! The relay loop: reads upstream lines until termination and hands accepted
//! fragments to a [`FragmentHandler`].

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::state::{RelayState, Step, Termination};
use crate::ai::classify;
use crate::errors::RelayError;

/// Whether a fragment reached the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Cancellation or a write failure stopped delivery; the relay must end.
    Interrupted,
}

/// Receives every fragment accepted while the stream is healthy.
#[async_trait]
pub trait FragmentHandler: Send {
    async fn on_accepted(&mut self, fragment: &str) -> Delivery;
}

/// Drives `lines` to termination.
///
/// Cancellation is checked while waiting for the next line and again before a line
/// is processed. Read errors and cancellation are terminal; nothing is retried.
pub async fn relay<S, H>(lines: &mut S, handler: &mut H, cancel: &CancellationToken) -> Termination
where
    S: Stream<Item = Result<String, RelayError>> + Unpin,
    H: FragmentHandler + ?Sized,
{
    let mut state = RelayState::new();

    let termination = loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break state.cancel().clone(),
            next = lines.next() => next,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!(error = %e, "LLM stream read failed");
                let cause = match e {
                    RelayError::UpstreamRead(cause) => cause,
                    other => other.to_string(),
                };
                break state.read_failed(cause).clone();
            }
            None => break state.exhausted().clone(),
        };

        if line.is_empty() {
            continue;
        }
        if cancel.is_cancelled() {
            break state.cancel().clone();
        }

        #[cfg(feature = "debug-logs")]
        debug!(line = %line, "Upstream line");
        #[cfg(not(feature = "debug-logs"))]
        debug!(line_len = line.len(), "Upstream line");

        let chunk = classify(&line);
        match state.observe(&chunk) {
            Step::Continue => {}
            Step::Deliver(fragment) => {
                if handler.on_accepted(&fragment).await == Delivery::Interrupted {
                    break state.cancel().clone();
                }
            }
            Step::Finished => {
                if let Some(t) = state.termination() {
                    break t.clone();
                }
            }
        }
    };

    if !termination.is_success() {
        debug!(
            accumulated_bytes = state.full_text().len(),
            withheld_bytes = state.withheld_text().len(),
            "Relay ended without success"
        );
    }

    termination
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[derive(Default)]
    struct Collect {
        fragments: Vec<String>,
        interrupt_after: Option<usize>,
    }

    #[async_trait]
    impl FragmentHandler for Collect {
        async fn on_accepted(&mut self, fragment: &str) -> Delivery {
            self.fragments.push(fragment.to_string());
            match self.interrupt_after {
                Some(n) if self.fragments.len() >= n => Delivery::Interrupted,
                _ => Delivery::Delivered,
            }
        }
    }

    fn lines(items: &[&str]) -> impl Stream<Item = Result<String, RelayError>> + Unpin {
        stream::iter(
            items
                .iter()
                .map(|s| Ok((*s).to_string()))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn delivers_fragments_until_done() {
        let mut source = lines(&[
            r#"data: {"result":"Hel"}"#,
            "",
            r#"data: {"result":"lo"}"#,
            "data: [DONE]",
            r#"data: {"result":"after done"}"#,
        ]);
        let mut handler = Collect::default();

        let termination = relay(&mut source, &mut handler, &CancellationToken::new()).await;

        assert_eq!(termination, Termination::Completed);
        assert_eq!(handler.fragments, vec!["Hel", "lo"]);
        // The line after [DONE] is never read.
        assert_eq!(
            source.next().await.unwrap().unwrap(),
            r#"data: {"result":"after done"}"#
        );
    }

    #[tokio::test]
    async fn error_chunk_is_never_streamed() {
        let mut source = lines(&[r#"data: {"error":{"code":"429","message":"rate limited"}}"#]);
        let mut handler = Collect::default();

        let termination = relay(&mut source, &mut handler, &CancellationToken::new()).await;

        assert!(handler.fragments.is_empty());
        assert_eq!(
            termination,
            Termination::UpstreamProtocolError("API error: rate limited".to_string())
        );
    }

    #[tokio::test]
    async fn parse_failure_does_not_stop_reading() {
        let mut source = lines(&[
            r#"data: {"result":"a"}"#,
            "data: {oops",
            r#"data: {"result":"b"}"#,
        ]);
        let mut handler = Collect::default();

        let termination = relay(&mut source, &mut handler, &CancellationToken::new()).await;

        assert_eq!(handler.fragments, vec!["a"]);
        assert!(matches!(termination, Termination::ParseFailure(_)));
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn read_error_is_terminal() {
        let mut source = stream::iter(vec![
            Ok(r#"data: {"result":"a"}"#.to_string()),
            Err(RelayError::UpstreamRead("connection reset".to_string())),
            Ok(r#"data: {"result":"b"}"#.to_string()),
        ]);
        let mut handler = Collect::default();

        let termination = relay(&mut source, &mut handler, &CancellationToken::new()).await;

        assert_eq!(handler.fragments, vec!["a"]);
        assert_eq!(
            termination.error_message().unwrap(),
            "[LLM read error] connection reset"
        );
    }

    #[tokio::test]
    async fn pre_cancelled_token_reads_nothing() {
        let mut source = lines(&[r#"data: {"result":"a"}"#]);
        let mut handler = Collect::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let termination = relay(&mut source, &mut handler, &cancel).await;

        assert_eq!(termination, Termination::Cancelled);
        assert!(handler.fragments.is_empty());
    }

    #[tokio::test]
    async fn interrupted_delivery_cancels_the_relay() {
        let mut source = lines(&[
            r#"data: {"result":"a"}"#,
            r#"data: {"result":"b"}"#,
            r#"data: {"result":"c"}"#,
        ]);
        let mut handler = Collect {
            interrupt_after: Some(2),
            ..Collect::default()
        };

        let termination = relay(&mut source, &mut handler, &CancellationToken::new()).await;

        assert_eq!(termination, Termination::Cancelled);
        assert_eq!(handler.fragments, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cancellation_while_waiting_for_a_line() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, RelayError>>(4);
        let mut source = tokio_stream::wrappers::ReceiverStream::new(rx);
        let mut handler = Collect::default();
        let cancel = CancellationToken::new();

        tx.send(Ok(r#"data: {"result":"a"}"#.to_string())).await.unwrap();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            canceller.cancel();
        });

        // `tx` stays open, so only cancellation can end the loop.
        let termination = relay(&mut source, &mut handler, &cancel).await;

        assert_eq!(termination, Termination::Cancelled);
        assert_eq!(handler.fragments, vec!["a"]);
        drop(tx);
    }
}
