use uuid::Uuid;

/// A fresh asset identifier: random v4 UUID in hyphenated form.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
