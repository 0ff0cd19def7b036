// src/testing.rs

use crate::downloader::{Body, Transport, TransportError};
use crate::models::{CanonicalFile, Checksum, IdentityKey, OwningPurchase, Placement, Platform};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use futures_util::{stream, StreamExt};
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn md5_hex(body: &[u8]) -> String {
    hex::encode(Md5::digest(body))
}

pub fn canonical_file(name: &str, body: &[u8]) -> CanonicalFile {
    let hex = md5_hex(body);
    CanonicalFile {
        identity_key: IdentityKey::Checksum(hex.clone()),
        owner: OwningPurchase {
            purchase_id: "p1".into(),
            purchased_at: NaiveDate::from_ymd_opt(2020, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            bundle_name: "Bundle A".into(),
        },
        platform: Platform::Ebook,
        item_name: name.into(),
        file_name: name.into(),
        url: format!("https://dl.example.invalid/{name}"),
        size_bytes: body.len() as u64,
        checksum: Some(Checksum::md5(hex)),
        placement: Placement::Purchase,
    }
}

/// In-memory transport that records what the workers asked for.
#[derive(Default)]
pub struct MemoryTransport {
    files: HashMap<String, Vec<u8>>,
    failures: Mutex<HashMap<String, u32>>,
    stalls: Mutex<HashMap<String, u32>>,
    delay: Duration,
    chunk_delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, url: &str, body: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), body);
        self
    }

    pub fn failing_first(self, url: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
        self
    }

    /// The first `times` bodies for `url` deliver one chunk and then go silent.
    pub fn stalling_first(self, url: &str, times: u32) -> Self {
        self.stalls
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
        self
    }

    /// Pause before every body chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get(&self, url: &str) -> Result<Body, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(TransportError::Status(503));
                }
            }
        }

        let body = self
            .files
            .get(url)
            .cloned()
            .ok_or(TransportError::Status(404))?;
        let mut chunks: Vec<Result<Bytes, TransportError>> = body
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let content_length = Some(body.len() as u64);

        let stalled = {
            let mut stalls = self.stalls.lock().unwrap();
            match stalls.get_mut(url) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if stalled {
            chunks.truncate(1);
            return Ok(Body {
                content_length,
                stream: stream::iter(chunks).chain(stream::pending()).boxed(),
            });
        }

        let chunk_delay = self.chunk_delay;
        Ok(Body {
            content_length,
            stream: stream::iter(chunks)
                .then(move |chunk| async move {
                    tokio::time::sleep(chunk_delay).await;
                    chunk
                })
                .boxed(),
        })
    }
}
