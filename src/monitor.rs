use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::VecDeque,
    fmt,
    fmt::Write as _,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Instant,
};
use uuid::Uuid;

/// Fixed-capacity history. Pushing onto a full buffer evicts the oldest item.
#[derive(Debug)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().rev()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ConnectionEvent {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub remote: Option<String>,
    pub status: u16,
    pub elapsed_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NotificationLevel::Info => "info",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    pub at: DateTime<Utc>,
    pub level: NotificationLevel,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MonitorSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub connection_capacity: usize,
    pub notification_capacity: usize,
    pub connections: Vec<ConnectionEvent>,
    pub notifications: Vec<Notification>,
}

/// In-memory record of recent traffic and service events.
#[derive(Debug)]
pub struct Monitor {
    started_at: DateTime<Utc>,
    started: Instant,
    total_requests: AtomicU64,
    connections: Mutex<RingBuffer<ConnectionEvent>>,
    notifications: Mutex<RingBuffer<Notification>>,
}

impl Monitor {
    pub fn new(connection_history: usize, notification_history: usize) -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            total_requests: AtomicU64::new(0),
            connections: Mutex::new(RingBuffer::new(connection_history)),
            notifications: Mutex::new(RingBuffer::new(notification_history)),
        }
    }

    pub fn record_connection(&self, event: ConnectionEvent) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification {
                at: Utc::now(),
                level,
                message: message.into(),
            });
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        let notifications = self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        MonitorSnapshot {
            started_at: self.started_at,
            uptime_secs: self.started.elapsed().as_secs(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            connection_capacity: connections.capacity(),
            notification_capacity: notifications.capacity(),
            connections: connections.iter().cloned().collect(),
            notifications: notifications.iter().cloned().collect(),
        }
    }
}

/// Middleware recording every request except polls of the monitor API.
pub async fn track_connections(
    State(monitor): State<Arc<Monitor>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if path == "/api/monitor" {
        return next.run(request).await;
    }

    let method = request.method().to_string();
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    monitor.record_connection(ConnectionEvent {
        id: Uuid::new_v4(),
        at: Utc::now(),
        method,
        path,
        remote,
        status: response.status().as_u16(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    });

    response
}

pub fn render_page(snapshot: &MonitorSnapshot) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta http-equiv=\"refresh\" content=\"5\">\n<title>VidSphere Monitor</title>\n\
         <style>\nbody { font-family: sans-serif; margin: 2em; background: #f7f7f7; }\n\
         table { border-collapse: collapse; width: 100%; margin-bottom: 2em; background: #fff; }\n\
         th, td { border: 1px solid #ddd; padding: 6px 10px; text-align: left; }\n\
         th { background: #eee; }\n.error { color: #b00020; }\n.warning { color: #a66300; }\n\
         </style>\n</head>\n<body>\n<h1>VidSphere Monitor</h1>\n",
    );

    let _ = write!(
        html,
        "<p>Started {} &middot; uptime {}s &middot; {} requests</p>\n",
        snapshot.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.uptime_secs,
        snapshot.total_requests
    );

    let _ = write!(
        html,
        "<h2>Recent connections ({}/{})</h2>\n<table>\n\
         <tr><th>Time</th><th>Client</th><th>Method</th>\
         <th>Path</th><th>Status</th><th>ms</th></tr>\n",
        snapshot.connections.len(),
        snapshot.connection_capacity
    );
    for c in &snapshot.connections {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            c.at.format("%H:%M:%S"),
            escape_html(c.remote.as_deref().unwrap_or("-")),
            escape_html(&c.method),
            escape_html(&c.path),
            c.status,
            c.elapsed_ms
        );
    }
    html.push_str("</table>\n");

    let _ = write!(
        html,
        "<h2>Notifications ({}/{})</h2>\n<table>\n\
         <tr><th>Time</th><th>Level</th><th>Message</th></tr>\n",
        snapshot.notifications.len(),
        snapshot.notification_capacity
    );
    for n in &snapshot.notifications {
        let _ = write!(
            html,
            "<tr class=\"{level}\"><td>{}</td><td>{level}</td><td>{}</td></tr>\n",
            n.at.format("%H:%M:%S"),
            escape_html(&n.message),
            level = n.level
        );
    }
    html.push_str("</table>\n</body>\n</html>\n");

    html
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str) -> ConnectionEvent {
        ConnectionEvent {
            id: Uuid::new_v4(),
            at: Utc::now(),
            method: "GET".to_string(),
            path: path.to_string(),
            remote: Some("127.0.0.1:50000".to_string()),
            status: 200,
            elapsed_ms: 3,
        }
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut ring = RingBuffer::new(3);
        assert_eq!(ring.iter().count(), 0);
        for i in 1..=5 {
            ring.push(i);
        }
        assert_eq!(ring.capacity(), 3);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![5, 4, 3]);
    }

    #[test]
    fn zero_capacity_holds_one() {
        let mut ring = RingBuffer::new(0);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn snapshot_counts_all_requests_but_keeps_recent() {
        let monitor = Monitor::new(2, 2);
        for path in ["/videos", "/video/a.mp4", "/preview/a.mp4"] {
            monitor.record_connection(event(path));
        }
        monitor.notify(NotificationLevel::Info, "uploaded a.mp4");

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.connection_capacity, 2);
        let paths: Vec<_> = snapshot.connections.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["/preview/a.mp4", "/video/a.mp4"]);
        assert_eq!(snapshot.notifications.len(), 1);
        assert_eq!(snapshot.notifications[0].level, NotificationLevel::Info);
    }

    #[test]
    fn page_escapes_untrusted_text() {
        let monitor = Monitor::new(5, 5);
        monitor.record_connection(event("/video/<script>.mp4"));
        monitor.notify(NotificationLevel::Error, "thumbnail failed for \"x&y\"");

        let html = render_page(&monitor.snapshot());
        assert!(html.contains("/video/&lt;script&gt;.mp4"));
        assert!(html.contains("&quot;x&amp;y&quot;"));
        assert!(html.contains("class=\"error\""));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn levels_serialize_lowercase() {
        let json = serde_json::to_value(NotificationLevel::Warning).unwrap();
        assert_eq!(json, "warning");
    }
}
