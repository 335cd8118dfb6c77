use super::entry::OutboxEntry;

/// Bus topic for an entry: `prefix + lower(aggregate_type) + "." + lower(event_type)`.
pub fn topic_for(prefix: &str, entry: &OutboxEntry) -> String {
    format!(
        "{}{}.{}",
        prefix,
        entry.aggregate_type().as_str().to_lowercase(),
        entry.event_type().as_str().to_lowercase()
    )
}
