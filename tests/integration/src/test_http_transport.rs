//! HTTP transport tests against a minimal local HTTP server.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use ruststack_upload_core::{HttpPartTransport, PartTransport, PresignedRequest, UploadError};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use crate::init_tracing;

    /// What the server received.
    #[derive(Debug)]
    struct Received {
        request_line: String,
        headers: Vec<String>,
        body: Vec<u8>,
    }

    /// Serve one request with `response`, returning the base URL and a handle
    /// yielding the request.
    async fn serve_once(response: &'static str) -> (String, JoinHandle<Received>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let header_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos;
                }
            };

            let head = String::from_utf8(buf[..header_end].to_vec()).unwrap();
            let mut lines = head.split("\r\n");
            let request_line = lines.next().unwrap().to_owned();
            let headers: Vec<String> = lines.map(str::to_lowercase).collect();
            let content_length = headers
                .iter()
                .find_map(|h| h.strip_prefix("content-length:"))
                .map_or(0, |v| v.trim().parse::<usize>().unwrap());

            let mut body = buf[header_end + 4..].to_vec();
            while body.len() < content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before body");
                body.extend_from_slice(&chunk[..n]);
            }

            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            Received {
                request_line,
                headers,
                body,
            }
        });
        (format!("http://{addr}"), handle)
    }

    fn transport() -> HttpPartTransport {
        HttpPartTransport::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_should_put_part_and_return_etag() {
        init_tracing();
        let (base, server) = serve_once(
            "HTTP/1.1 200 OK\r\nETag: \"abc123\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let mut request =
            PresignedRequest::put(format!("{base}/uploads/files/a.bin?partNumber=2&uploadId=U1"));
        request
            .headers
            .push(("x-amz-meta-origin".to_owned(), "test".to_owned()));

        let etag = transport()
            .send_part(&request, Bytes::from_static(b"part-two"))
            .await
            .unwrap();
        let received = server.await.unwrap();

        assert_eq!(etag, "\"abc123\"");
        assert_eq!(
            received.request_line,
            "PUT /uploads/files/a.bin?partNumber=2&uploadId=U1 HTTP/1.1"
        );
        assert!(received.headers.iter().any(|h| h == "x-amz-meta-origin: test"));
        assert_eq!(received.body, b"part-two");
    }

    #[tokio::test]
    async fn test_should_classify_forbidden_as_authentication_error() {
        init_tracing();
        let (base, server) = serve_once(
            "HTTP/1.1 403 Forbidden\r\nContent-Length: 21\r\nConnection: close\r\n\r\nSignatureDoesNotMatch",
        )
        .await;

        let result = transport()
            .send_part(&PresignedRequest::put(format!("{base}/k")), Bytes::from_static(b"x"))
            .await;
        server.await.unwrap();

        match result {
            Err(UploadError::Authentication(message)) => {
                assert!(message.contains("SignatureDoesNotMatch"));
            }
            other => panic!("expected authentication error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_should_reject_response_without_etag() {
        init_tracing();
        let (base, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;

        let result = transport()
            .send_part(&PresignedRequest::put(format!("{base}/k")), Bytes::from_static(b"x"))
            .await;
        server.await.unwrap();

        assert!(matches!(result, Err(UploadError::ServerRejection(_))));
        assert!(!result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_should_classify_server_error_as_rejection() {
        init_tracing();
        let (base, server) = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let result = transport()
            .send_part(&PresignedRequest::put(format!("{base}/k")), Bytes::from_static(b"x"))
            .await;
        server.await.unwrap();

        assert_eq!(
            result,
            Err(UploadError::ServerRejection("503 Service Unavailable".to_owned()))
        );
    }
}
