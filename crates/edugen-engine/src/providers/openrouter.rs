use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use edugen_contracts::config::ApiConfig;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};

use super::{api_key_error, ApiKeyError, ImageProvider, ProviderRequest, ProviderResponse};
use crate::util::{
    decode_data_url, error_chain_text, map_object, push_unique_warning, truncate_text, ImageBytes,
};

/// OpenRouter chat-completions image transport.
pub struct OpenRouterProvider {
    api_base: String,
    settings: ApiConfig,
    http: HttpClient,
}

impl OpenRouterProvider {
    pub fn new(api: &ApiConfig) -> Self {
        Self {
            api_base: api.base_url.trim().trim_end_matches('/').to_string(),
            settings: api.clone(),
            http: HttpClient::new(),
        }
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn build_payload(request: &ProviderRequest) -> Value {
        let mut payload = map_object(json!({
            "model": request.model,
            "messages": [{
                "role": "user",
                "content": request.content,
            }],
            "modalities": ["image", "text"],
        }));
        if let Some(frame) = request.frame.as_ref() {
            payload.insert(
                "image_config".to_string(),
                json!({
                    "aspect_ratio": aspect_bucket(frame.width, frame.height),
                    "width": frame.width,
                    "height": frame.height,
                }),
            );
        }
        Value::Object(payload)
    }

    /// One round trip. A 401 is reported as [`ApiKeyError::Invalid`].
    fn attempt(&self, api_key: &str, payload: &Value) -> Result<(Value, ImageBytes)> {
        let endpoint = self.chat_endpoint();
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .header("accept", "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header("HTTP-Referer", &self.settings.http_referer)
            .header("X-Title", &self.settings.app_title)
            .timeout(Duration::from_secs_f64(self.settings.timeout.max(1.0)))
            .json(payload)
            .send()
            .with_context(|| format!("OpenRouter request failed ({endpoint})"))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiKeyError::Invalid.into());
        }
        let body = response
            .text()
            .context("OpenRouter response body read failed")?;
        if !status.is_success() {
            bail!(
                "OpenRouter request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            );
        }
        let parsed: Value =
            serde_json::from_str(&body).context("OpenRouter returned invalid JSON payload")?;
        let Some(url) = extract_image_url(&parsed) else {
            bail!("No image found in API response");
        };
        let image = if url.starts_with("data:") {
            decode_data_url(&url)?
        } else {
            self.download_image(&url)?
        };
        Ok((parsed, image))
    }

    fn download_image(&self, url: &str) -> Result<ImageBytes> {
        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs_f64(
                self.settings.download_timeout.max(1.0),
            ))
            .send()
            .with_context(|| format!("OpenRouter image download failed ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "OpenRouter image download failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .context("OpenRouter image bytes read failed")?
            .to_vec();
        Ok(ImageBytes { bytes, mime_type })
    }
}

impl ImageProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let Some(api_key) = request
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
        else {
            return Err(ApiKeyError::Missing.into());
        };

        let payload = Self::build_payload(request);
        let max_retries = self.settings.max_retries;
        let retry_delay = Duration::from_secs_f64(self.settings.retry_delay.max(0.0));
        let mut warnings = Vec::new();
        let mut last_err = None;

        for attempt in 0..=max_retries {
            tracing::debug!(
                model = %request.model,
                attempt = attempt + 1,
                total = max_retries + 1,
                images = request.image_count(),
                "sending OpenRouter request"
            );
            let started = Instant::now();
            match self.attempt(api_key, &payload) {
                Ok((response_payload, image)) => {
                    let latency_s = started.elapsed().as_secs_f64();
                    tracing::info!(model = %request.model, latency_s, "image generated");
                    let mut provider_response = Map::new();
                    provider_response.insert("status_code".to_string(), json!(200));
                    provider_response.insert("latency_s".to_string(), json!(latency_s));
                    provider_response.insert("body".to_string(), response_payload);
                    return Ok(ProviderResponse {
                        image,
                        provider_request: map_object(json!({
                            "endpoint": self.chat_endpoint(),
                            "payload": payload,
                        })),
                        provider_response,
                        warnings,
                        attempts: attempt + 1,
                    });
                }
                Err(err) => {
                    if let Some(key_err) = api_key_error(&err) {
                        tracing::error!(error = %key_err, "critical API error");
                        return Err(err);
                    }
                    let text = error_chain_text(&err, 220);
                    tracing::warn!(
                        model = %request.model,
                        attempt = attempt + 1,
                        error = %text,
                        "API call failed"
                    );
                    if attempt < max_retries {
                        push_unique_warning(
                            &mut warnings,
                            format!(
                                "OpenRouter retry {}/{} after failure: {text}",
                                attempt + 1,
                                max_retries
                            ),
                        );
                        thread::sleep(retry_delay);
                    }
                    last_err = Some(err);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts made"));
        Err(err.context(format!(
            "OpenRouter generation failed after {} attempts",
            max_retries + 1
        )))
    }
}

/// Nearest aspect bucket the image API accepts for a frame.
pub fn aspect_bucket(width: u32, height: u32) -> &'static str {
    if width == 0 || height == 0 {
        return "1:1";
    }
    let ratio = f64::from(width) / f64::from(height);
    if ratio > 1.3 {
        "16:9"
    } else if ratio > 1.1 {
        "4:3"
    } else if ratio >= 0.8 {
        "1:1"
    } else if ratio >= 0.7 {
        "3:4"
    } else if ratio >= 0.6 {
        "2:3"
    } else {
        "9:16"
    }
}

fn extract_image_url(payload: &Value) -> Option<String> {
    payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("message"))
        .and_then(|message| message.get("images"))
        .and_then(Value::as_array)
        .and_then(|images| images.first())
        .and_then(|image| image.get("image_url"))
        .and_then(|image_url| image_url.get("url"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    use edugen_contracts::categories::Frame;
    use serde_json::{json, Value};

    use super::*;

    struct Canned {
        status: u16,
        content_type: &'static str,
        body: Vec<u8>,
    }

    fn json_reply(status: u16, body: Value) -> Canned {
        Canned {
            status,
            content_type: "application/json",
            body: body.to_string().into_bytes(),
        }
    }

    /// Serves canned replies in order, one per connection, and reports each
    /// request's head and body. `replies` receives the server's base URL.
    fn serve_with(
        replies: impl FnOnce(&str) -> Vec<Canned>,
    ) -> anyhow::Result<(String, mpsc::Receiver<(String, String)>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}", listener.local_addr()?);
        let replies = replies(&base);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for reply in replies {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
                let mut head = String::new();
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                    if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                    head.push_str(&line);
                }
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).expect("read body");
                let _ = tx.send((head, String::from_utf8_lossy(&body).to_string()));

                let status_line = match reply.status {
                    200 => "200 OK",
                    401 => "401 Unauthorized",
                    _ => "500 Internal Server Error",
                };
                let header = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.content_type,
                    reply.body.len()
                );
                stream.write_all(header.as_bytes()).expect("write head");
                stream.write_all(&reply.body).expect("write body");
            }
        });
        Ok((base, rx))
    }

    fn serve(replies: Vec<Canned>) -> anyhow::Result<(String, mpsc::Receiver<(String, String)>)> {
        serve_with(|_| replies)
    }

    fn settings(base: &str) -> ApiConfig {
        ApiConfig {
            base_url: base.to_string(),
            max_retries: 2,
            retry_delay: 0.0,
            timeout: 5.0,
            download_timeout: 5.0,
            ..ApiConfig::default()
        }
    }

    fn request(frame: Option<Frame>) -> ProviderRequest {
        ProviderRequest {
            model: "google/gemini-2.5-flash-image-preview".to_string(),
            content: vec![
                json!({"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}),
                json!({"type": "text", "text": "draw a clock"}),
            ],
            frame,
            api_key: Some("sk-test".to_string()),
            seed: 0,
        }
    }

    fn image_reply(url: &str) -> Value {
        json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "images": [{"type": "image_url", "image_url": {"url": url}}]
                }
            }]
        })
    }

    #[test]
    fn aspect_bucket_maps_frames() {
        assert_eq!(aspect_bucket(1920, 1080), "16:9");
        assert_eq!(aspect_bucket(1300, 1000), "4:3");
        assert_eq!(aspect_bucket(1024, 1024), "1:1");
        assert_eq!(aspect_bucket(1100, 1000), "1:1");
        assert_eq!(aspect_bucket(800, 1000), "1:1");
        assert_eq!(aspect_bucket(1536, 2048), "3:4");
        assert_eq!(aspect_bucket(2, 3), "2:3");
        assert_eq!(aspect_bucket(1080, 1920), "9:16");
        assert_eq!(aspect_bucket(0, 10), "1:1");
    }

    #[test]
    fn generation_posts_chat_payload_and_decodes_data_url() -> anyhow::Result<()> {
        let (base, rx) = serve(vec![json_reply(
            200,
            image_reply("data:image/png;base64,aGVsbG8="),
        )])?;
        let provider = OpenRouterProvider::new(&settings(&base));
        let response = provider.generate(&request(Some(Frame {
            width: 1920,
            height: 1080,
            aspect_ratio: "16:9".to_string(),
        })))?;
        assert_eq!(response.image.bytes, b"hello");
        assert_eq!(response.attempts, 1);

        let (head, body) = rx.recv()?;
        let lowered = head.to_ascii_lowercase();
        assert!(lowered.starts_with("post /chat/completions"));
        assert!(lowered.contains("authorization: bearer sk-test"));
        assert!(lowered.contains("http-referer: http://localhost:8080"));
        assert!(lowered.contains("x-title: educational image generator"));

        let sent: Value = serde_json::from_str(&body)?;
        assert_eq!(sent["modalities"], json!(["image", "text"]));
        assert_eq!(
            sent["image_config"],
            json!({"aspect_ratio": "16:9", "width": 1920, "height": 1080})
        );
        assert_eq!(sent["messages"][0]["content"][1]["text"], json!("draw a clock"));
        Ok(())
    }

    #[test]
    fn refinement_request_omits_image_config() -> anyhow::Result<()> {
        let (base, rx) = serve(vec![json_reply(
            200,
            image_reply("data:image/png;base64,aGVsbG8="),
        )])?;
        OpenRouterProvider::new(&settings(&base)).generate(&request(None))?;
        let (_, body) = rx.recv()?;
        let sent: Value = serde_json::from_str(&body)?;
        assert!(sent.get("image_config").is_none());
        Ok(())
    }

    #[test]
    fn transient_failures_are_retried() -> anyhow::Result<()> {
        let (base, _rx) = serve(vec![
            json_reply(500, json!({"error": "busy"})),
            json_reply(200, json!({"choices": [{"message": {"content": "no image"}}]})),
            json_reply(200, image_reply("data:image/png;base64,aGVsbG8=")),
        ])?;
        let response = OpenRouterProvider::new(&settings(&base)).generate(&request(None))?;
        assert_eq!(response.attempts, 3);
        assert_eq!(response.warnings.len(), 2);
        Ok(())
    }

    #[test]
    fn exhausted_retries_surface_an_ordinary_error() -> anyhow::Result<()> {
        let (base, _rx) = serve(vec![
            json_reply(500, json!({})),
            json_reply(500, json!({})),
            json_reply(500, json!({})),
        ])?;
        let err = OpenRouterProvider::new(&settings(&base))
            .generate(&request(None))
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert_eq!(api_key_error(&err), None);
        assert!(err.to_string().contains("after 3 attempts"));
        Ok(())
    }

    #[test]
    fn unauthorized_is_fatal_and_not_retried() -> anyhow::Result<()> {
        let (base, rx) = serve(vec![
            json_reply(401, json!({"error": "bad key"})),
            json_reply(200, image_reply("data:image/png;base64,aGVsbG8=")),
        ])?;
        let err = OpenRouterProvider::new(&settings(&base))
            .generate(&request(None))
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert_eq!(api_key_error(&err), Some(ApiKeyError::Invalid));
        assert_eq!(err.to_string(), "Wrong API Key. Enter a valid API Key");
        rx.recv()?;
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        Ok(())
    }

    #[test]
    fn missing_key_fails_before_any_request() {
        let mut req = request(None);
        req.api_key = Some("   ".to_string());
        let provider = OpenRouterProvider::new(&settings("http://127.0.0.1:9"));
        let err = provider.generate(&req).err();
        assert_eq!(
            err.as_ref().and_then(api_key_error),
            Some(ApiKeyError::Missing)
        );
    }

    #[test]
    fn remote_image_urls_are_downloaded() -> anyhow::Result<()> {
        let (base, rx) = serve_with(|base| {
            vec![
                json_reply(200, image_reply(&format!("{base}/files/out.png"))),
                Canned {
                    status: 200,
                    content_type: "image/png",
                    body: b"PNGDATA".to_vec(),
                },
            ]
        })?;
        let response = OpenRouterProvider::new(&settings(&base)).generate(&request(None))?;
        assert_eq!(response.image.bytes, b"PNGDATA");
        assert_eq!(response.image.mime_type.as_deref(), Some("image/png"));

        rx.recv()?;
        let (download_head, _) = rx.recv()?;
        assert!(download_head.starts_with("GET /files/out.png"));
        Ok(())
    }
}
