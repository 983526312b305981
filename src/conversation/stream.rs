//! Hybrid stream/future returned by `send_message`.

use std::future::IntoFuture;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::Stream;
use tokio::sync::mpsc;

use crate::error::Result;

/// The live text of one assistant turn.
///
/// Consume it either way:
/// - as a [`Stream`] of text chunks, for incremental display;
/// - by `.await`ing it directly, which drains the stream and returns the
///   concatenated text.
///
/// Dropping the stream does not cancel the turn; tool calls still run and
/// history is still updated. Use `Conversation::abort` to cancel.
pub struct MessageStream {
    rx: mpsc::UnboundedReceiver<Result<String>>,
}

impl MessageStream {
    pub(super) fn new(rx: mpsc::UnboundedReceiver<Result<String>>) -> Self {
        Self { rx }
    }

    /// Drain the stream and return the concatenated text.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(chunk) = self.rx.recv().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }
}

impl Stream for MessageStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl IntoFuture for MessageStream {
    type Output = Result<String>;
    type IntoFuture = BoxFuture<'static, Result<String>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.collect_text())
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream").finish()
    }
}
