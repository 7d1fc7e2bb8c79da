/// Database row types. These map directly to SQLite rows.
/// Distinct from shipchat-types models to keep the DB layer independent.
/// Timestamps are unix milliseconds so cursor comparisons stay exact.

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRow {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub department: String,
    pub ship_id: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRow {
    pub id: String,
    /// JSON array of participant ids
    pub participants: String,
    /// JSON object, absent until the first message
    pub last_message: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub timestamp: i64,
    pub kind: String,
}
