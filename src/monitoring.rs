//! Read-only view of what the agent currently sees and says.
//!
//! [`MonitoringService`] folds text, image, and annotation events into a
//! shared [`MonitorView`]; with the `server` feature the view is served over
//! HTTP as `GET /text` and `GET /image`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bus::Processor;
use crate::error::LeolaniResult;
use crate::event::{Annotation, Bounds, Event, ImageSignal, Mention, Payload};
use crate::friends::FriendStore;

/// Latest utterance and who said it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextInfo {
    pub utterance: String,
    /// `"You"` for the user, `"Leolani"` for the agent.
    pub speaker: String,
}

/// Something recognised in the latest image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayItem {
    pub name: String,
    pub bounds: Option<Bounds>,
}

/// Latest image and what was recognised in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub hash: u64,
    /// Base64 PNG when the image was inlined in the signal.
    pub img: Option<String>,
    pub files: Vec<String>,
    pub items: Vec<DisplayItem>,
}

#[derive(Debug, Default)]
struct Snapshot {
    text: Option<TextInfo>,
    display: Option<DisplayInfo>,
}

/// Shared, cheaply clonable monitoring state.
#[derive(Debug, Clone, Default)]
pub struct MonitorView {
    inner: Arc<RwLock<Snapshot>>,
}

impl MonitorView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> Option<TextInfo> {
        self.read(|s| s.text.clone())
    }

    pub fn display(&self) -> Option<DisplayInfo> {
        self.read(|s| s.display.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Snapshot) -> T) -> T {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    fn set_text(&self, utterance: &str, from_agent: bool) {
        let info = TextInfo {
            utterance: utterance.to_string(),
            speaker: if from_agent { "Leolani" } else { "You" }.to_string(),
        };
        self.write(|s| s.text = Some(info));
    }

    fn set_image(&self, signal: &ImageSignal) {
        let mut hasher = DefaultHasher::new();
        signal.image.hash(&mut hasher);
        signal.files.hash(&mut hasher);
        let info = DisplayInfo {
            hash: hasher.finish(),
            img: signal.image.clone(),
            files: signal.files.clone(),
            items: Vec::new(),
        };
        self.write(|s| s.display = Some(info));
    }

    /// Append items to the current image. Without an image they are dropped.
    fn add_items(&self, items: Vec<DisplayItem>) {
        self.write(|s| {
            if let Some(display) = s.display.as_mut() {
                display.items.extend(items);
            }
        });
    }
}

/// Processor feeding a [`MonitorView`].
pub struct MonitoringService {
    view: MonitorView,
    friends: Arc<dyn FriendStore>,
}

impl MonitoringService {
    pub const NAME: &'static str = "monitoring";

    pub fn new(view: MonitorView, friends: Arc<dyn FriendStore>) -> Self {
        Self { view, friends }
    }

    fn items(&self, mentions: &[Mention]) -> Vec<DisplayItem> {
        let mut items = Vec::new();
        for mention in mentions.iter().filter(|m| !m.segment.is_empty()) {
            for annotation in &mention.annotations {
                let name = match annotation {
                    Annotation::Object(object) => object.label.clone(),
                    Annotation::VectorIdentity(face_id) => self.display_name(face_id),
                    Annotation::Entity { .. } => continue,
                };
                if name.is_empty() {
                    continue;
                }
                items.push(DisplayItem {
                    name,
                    bounds: mention.bounds(),
                });
            }
        }
        items
    }

    fn display_name(&self, face_id: &str) -> String {
        match self.friends.get(face_id) {
            Ok(Some(friend)) => friend
                .display_name()
                .filter(|n| !n.is_empty())
                .unwrap_or(face_id)
                .to_string(),
            Ok(None) => face_id.to_string(),
            Err(e) => {
                tracing::warn!(face_id, error = %e, "friend lookup failed");
                face_id.to_string()
            }
        }
    }
}

#[async_trait]
impl Processor for MonitoringService {
    async fn process(&mut self, event: &Event) -> LeolaniResult<()> {
        match &event.payload {
            Payload::TextSignal(text) => self.view.set_text(&text.signal.text, text.from_agent),
            Payload::Image(image) => self.view.set_image(&image.signal),
            Payload::Annotation(annotations) => {
                let items = self.items(&annotations.mentions);
                self.view.add_items(items);
            }
            _ => tracing::debug!(topic = %event.topic(), kind = event.kind(), "unhandled event"),
        }
        Ok(())
    }
}

// ── HTTP ────────────────────────────────────────────────────────────────

#[cfg(feature = "server")]
mod http {
    use axum::extract::State;
    use axum::http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use tokio::sync::watch;
    use tower_http::set_header::SetResponseHeaderLayer;

    use super::MonitorView;

    /// Routes of the monitoring surface, with no-cache headers on every response.
    pub fn router(view: MonitorView) -> Router {
        Router::new()
            .route("/text", get(text_info))
            .route("/image", get(display_info))
            .layer(SetResponseHeaderLayer::overriding(
                CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                PRAGMA,
                HeaderValue::from_static("no-cache"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                EXPIRES,
                HeaderValue::from_static("0"),
            ))
            .with_state(view)
    }

    async fn text_info(State(view): State<MonitorView>) -> Response {
        match view.text() {
            Some(text) => Json(text).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn display_info(State(view): State<MonitorView>) -> Response {
        match view.display() {
            Some(display) => Json(display).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    /// Serve on `listener` until `shutdown` flips to true.
    pub async fn serve(
        listener: tokio::net::TcpListener,
        view: MonitorView,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "monitoring listening");
        }
        axum::serve(listener, router(view))
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                tracing::info!("monitoring shutting down");
            })
            .await
    }
}

#[cfg(feature = "server")]
pub use http::{router, serve};
