//! Helpers shared by unit tests.

use std::sync::Mutex;

use axum::Router;

use crate::transport::activity::Activity;
use crate::transport::sink::{ActivitySink, SinkFuture};

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A delivered or updated activity, as seen by [`RecordingSink`].
#[derive(Clone, Debug)]
pub enum Delivery {
    /// New activity.
    Sent(Activity),
    /// In-place edit of an earlier activity.
    Updated(String, Activity),
}

/// Sink that records every activity instead of sending it.
#[derive(Default)]
pub struct RecordingSink {
    pub deliveries: Mutex<Vec<Delivery>>,
    pub edits: bool,
}

impl RecordingSink {
    pub fn with_edits() -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            edits: true,
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Text of every sent or updated activity, in order.
    pub fn texts(&self) -> Vec<String> {
        self.deliveries()
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Sent(a) | Delivery::Updated(_, a) => a.text,
            })
            .collect()
    }
}

impl ActivitySink for RecordingSink {
    fn send(&self, activity: Activity) -> SinkFuture<'_, String> {
        Box::pin(async move {
            let mut deliveries = self.deliveries.lock().unwrap();
            deliveries.push(Delivery::Sent(activity));
            Ok(format!("activity-{}", deliveries.len()))
        })
    }

    fn update(&self, activity_id: &str, activity: Activity) -> SinkFuture<'_, ()> {
        let id = activity_id.to_string();
        Box::pin(async move {
            self.deliveries
                .lock()
                .unwrap()
                .push(Delivery::Updated(id, activity));
            Ok(())
        })
    }

    fn supports_updates(&self) -> bool {
        self.edits
    }
}
