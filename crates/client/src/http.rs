use std::time::Duration;

use amai_chat::{ChatHistoryResponse, ChatMessage, DataSource, Integration};
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use crate::backend::{
    BoxFuture, ChatBackend, ChatStreamHandle, StreamWorker, TransportEvent, make_event_stream,
};
use crate::error::{
    BuildClientSnafu, ClientError, ClientResult, DecodeBodySnafu, InvalidHostSnafu,
    ReadBodySnafu, RequestSnafu, StatusSnafu,
};
use crate::sse::SseDecoder;

pub const DEFAULT_BACKEND_HOST: &str = "http://localhost:8001";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`ChatBackend`] over the backend's REST and SSE endpoints.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    host: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(host: &str) -> ClientResult<Self> {
        let host = host.trim().trim_end_matches('/').to_string();
        ensure!(
            host.starts_with("http://") || host.starts_with("https://"),
            InvalidHostSnafu {
                stage: "http-backend-new",
                host,
            }
        );

        // No overall timeout: chat streams stay open for as long as generation runs.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context(BuildClientSnafu {
                stage: "http-backend-new",
            })?;

        Ok(Self { host, client })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    async fn send_checked(request: RequestBuilder, stage: &'static str) -> ClientResult<Response> {
        let response = request.send().await.context(RequestSnafu { stage })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        StatusSnafu {
            stage,
            status: status.as_u16(),
            body,
        }
        .fail()
    }

    async fn read_json<T: DeserializeOwned>(
        response: Response,
        stage: &'static str,
    ) -> ClientResult<T> {
        let bytes = response.bytes().await.context(ReadBodySnafu { stage })?;
        serde_json::from_slice(&bytes).context(DecodeBodySnafu { stage })
    }

    async fn run_stream_worker(
        request: RequestBuilder,
        event_tx: mpsc::UnboundedSender<TransportEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let opened = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!("chat stream closed before the connection opened");
                return;
            }
            opened = Self::send_checked(request, "open-chat-stream") => opened,
        };
        let response = match opened {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(error = %error, "failed to open chat stream");
                let _ = event_tx.send(TransportEvent::Failed(error.to_string()));
                return;
            }
        };

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!("chat stream closed by client");
                    return;
                }
                next_chunk = body.next() => {
                    match next_chunk {
                        Some(Ok(chunk)) => {
                            for frame in decoder.push(&chunk) {
                                if event_tx.send(TransportEvent::Message(frame.data)).is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Err(source)) => {
                            let error = ClientError::ReadBody {
                                stage: "read-chat-stream",
                                source,
                            };
                            tracing::warn!(error = %error, "chat stream body failed");
                            let _ = event_tx.send(TransportEvent::Failed(error.to_string()));
                            return;
                        }
                        None => {
                            if decoder.has_pending() {
                                tracing::debug!("discarding unterminated event at end of chat stream");
                            }
                            let _ = event_tx.send(TransportEvent::Failed(
                                "chat stream closed by server".to_string(),
                            ));
                            return;
                        }
                    }
                }
            }
        }
    }
}

impl ChatBackend for HttpBackend {
    fn list_integrations(&self) -> BoxFuture<'_, ClientResult<Vec<Integration>>> {
        Box::pin(async move {
            let request = self.client.get(self.url("/api/integrations"));
            let response = Self::send_checked(request, "list-integrations").await?;
            Self::read_json(response, "list-integrations").await
        })
    }

    fn save_integration(&self, source: DataSource) -> BoxFuture<'_, ClientResult<Integration>> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.url("/api/integrations"))
                .json(&json!({ "dataSource": source }));
            let response = Self::send_checked(request, "save-integration").await?;
            Self::read_json(response, "save-integration").await
        })
    }

    fn remove_integration(&self, source: DataSource) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(async move {
            let request = self
                .client
                .delete(self.url(&format!("/api/integrations/{}", source.as_str())));
            Self::send_checked(request, "remove-integration").await?;
            Ok(())
        })
    }

    fn chat_history(&self) -> BoxFuture<'_, ClientResult<Vec<ChatMessage>>> {
        Box::pin(async move {
            let request = self.client.get(self.url("/api/chat/history"));
            let response = Self::send_checked(request, "chat-history").await?;
            let history: ChatHistoryResponse = Self::read_json(response, "chat-history").await?;
            Ok(history.messages)
        })
    }

    fn clear_chat_history(&self) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(async move {
            let request = self.client.delete(self.url("/api/chat/history"));
            Self::send_checked(request, "clear-chat-history").await?;
            Ok(())
        })
    }

    fn download_channel_messages<'a>(
        &'a self,
        chat_id: &'a str,
        channel: &'a str,
    ) -> BoxFuture<'a, ClientResult<Vec<u8>>> {
        Box::pin(async move {
            let path = format!(
                "/api/chat/channel-messages/{}/{}",
                urlencoding::encode(chat_id),
                urlencoding::encode(channel)
            );
            let request = self.client.get(self.url(&path));
            let response = Self::send_checked(request, "download-channel-messages").await?;
            let bytes = response.bytes().await.context(ReadBodySnafu {
                stage: "download-channel-messages",
            })?;
            Ok(bytes.to_vec())
        })
    }

    fn open_chat_stream(&self, message: &str) -> ClientResult<ChatStreamHandle> {
        let url = self.url(&format!(
            "/api/chat/stream?message={}",
            urlencoding::encode(message)
        ));
        let request = self.client.get(url).header(ACCEPT, "text/event-stream");

        let (event_tx, stream, cancel_rx) = make_event_stream();
        let worker: StreamWorker = Box::pin(Self::run_stream_worker(request, event_tx, cancel_rx));

        Ok(ChatStreamHandle { stream, worker })
    }
}
