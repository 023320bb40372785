//! Public response and notification shapes delivered to Transaction Engine
//! callers.

/// A completed PE reply, decoded to structured JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct PeResponse {
    pub status: u16,
    pub header: serde_json::Value,
    pub body: serde_json::Value,
}

/// A PE notification delivered to a subscriber after the initial Subscribe
/// reply, routed by subscription ID rather than by request ID.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub subscribe_id: String,
    pub resource: String,
    pub body: serde_json::Value,
}
