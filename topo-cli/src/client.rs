//! REST client for the topo API server.

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::Response;
use serde::Deserialize;
use topo_api::{Device, DeviceEvent};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Error body returned by the server
#[derive(Deserialize)]
struct ApiError {
    error: String,
}

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new(server: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/v1", server.trim_end_matches('/')),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                format!("Cannot connect to topo server at {}", self.base_url).into()
            } else {
                Box::new(e) as Box<dyn std::error::Error>
            }
        })?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let message = match response.json::<ApiError>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        Err(message.into())
    }

    pub async fn get_device(&self, id: &str) -> Result<Device> {
        let response = self.send(self.http.get(self.url(&format!("/devices/{}", id)))).await?;
        Ok(response.json().await?)
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let response = self.send(self.http.get(self.url("/devices"))).await?;
        Ok(response.json().await?)
    }

    pub async fn add_device(&self, device: &Device) -> Result<Device> {
        let response = self
            .send(self.http.post(self.url("/devices")).json(device))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn update_device(&self, device: &Device) -> Result<Device> {
        let response = self
            .send(
                self.http
                    .put(self.url(&format!("/devices/{}", device.id)))
                    .json(device),
            )
            .await?;
        Ok(response.json().await?)
    }

    pub async fn remove_device(&self, id: &str, revision: Option<u64>) -> Result<Device> {
        let mut request = self.http.delete(self.url(&format!("/devices/{}", id)));
        if let Some(revision) = revision {
            request = request.query(&[("revision", revision)]);
        }
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }

    /// Open the device event stream, optionally following live changes.
    pub async fn events(&self, subscribe: bool) -> Result<EventReader> {
        let response = self
            .send(
                self.http
                    .get(self.url("/devices/events"))
                    .query(&[("subscribe", subscribe)]),
            )
            .await?;
        Ok(EventReader {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            buffer: String::new(),
            pending: Vec::new(),
        })
    }
}

/// One Server-Sent Events frame.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

/// Split complete frames off the front of `buffer`. Comment-only frames
/// (keep-alives) are dropped.
pub fn drain_frames(buffer: &mut String) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(end) = buffer.find("\n\n") {
        let raw: String = buffer.drain(..end + 2).collect();
        let mut event = String::from("message");
        let mut data: Option<String> = None;
        for line in raw.lines() {
            if let Some(value) = line.strip_prefix("event:") {
                event = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                let value = value.strip_prefix(' ').unwrap_or(value);
                match data.as_mut() {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_string()),
                }
            }
        }
        if let Some(data) = data {
            frames.push(Frame { event, data });
        }
    }
    frames
}

/// Reads device events from an SSE response.
pub struct EventReader {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: String,
    pending: Vec<Frame>,
}

impl EventReader {
    /// Next device event, or `None` when the server ends the stream.
    pub async fn next_event(&mut self) -> Result<Option<DeviceEvent>> {
        loop {
            if !self.pending.is_empty() {
                let frame = self.pending.remove(0);
                if frame.event == "error" {
                    return Err(frame.data.into());
                }
                return Ok(Some(serde_json::from_str(&frame.data)?));
            }

            let Some(chunk) = self.body.next().await else {
                return Ok(None);
            };
            self.buffer.push_str(&String::from_utf8_lossy(&chunk?));
            self.pending = drain_frames(&mut self.buffer);
        }
    }
}
