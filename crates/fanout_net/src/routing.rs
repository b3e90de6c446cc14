//! Exchange, queue and routing-key naming.
//!
//! Every subscription owns exactly one queue, named from its `(type, id)`
//! pair. The queue is bound under its own name, so the queue name doubles as
//! the routing key publishers use to reach it.

/// Well-known name of the direct-routing exchange.
pub const EXCHANGE_NAME: &str = "nitrogen";

/// Build the queue name for a subscription.
///
/// `<type>.<id>`, with `%` and `.` in the type escaped so the first unescaped
/// `.` always separates the two parts. The mapping is therefore injective:
/// distinct `(type, id)` pairs never share a queue.
#[must_use]
pub fn queue_name(item_type: &str, id: &str) -> String {
    let mut name = String::with_capacity(item_type.len() + id.len() + 1);
    for ch in item_type.chars() {
        match ch {
            '%' => name.push_str("%25"),
            '.' => name.push_str("%2E"),
            other => name.push(other),
        }
    }
    name.push('.');
    name.push_str(id);
    name
}

/// Hex encoding of a queue name, safe as a single NATS subject token and as
/// a JetStream consumer name.
#[must_use]
pub fn token(queue: &str) -> String {
    use std::fmt::Write;

    queue.bytes().fold(String::with_capacity(queue.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Subject a message routed under `routing_key` is published on.
///
/// `<exchange>.<token(routing_key)>`
#[must_use]
pub fn routed_subject(exchange: &str, routing_key: &str) -> String {
    format!("{exchange}.{}", token(routing_key))
}

/// Wildcard subject covering everything routed through an exchange.
///
/// `<exchange>.>`
#[must_use]
pub fn exchange_subjects(exchange: &str) -> String {
    format!("{exchange}.>")
}

/// JetStream consumer name backing a queue.
///
/// `q-<token(queue)>`
#[must_use]
pub fn consumer_name(queue: &str) -> String {
    format!("q-{}", token(queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name_plain() {
        assert_eq!(queue_name("temperature", "abc123"), "temperature.abc123");
    }

    #[test]
    fn test_queue_name_deterministic() {
        assert_eq!(queue_name("t", "1"), queue_name("t", "1"));
    }

    #[test]
    fn test_queue_name_distinct_ids_never_collide() {
        assert_ne!(queue_name("temperature", "a"), queue_name("temperature", "b"));
        assert_ne!(queue_name("temperature", "a.b"), queue_name("temperature", "a_b"));
    }

    #[test]
    fn test_queue_name_injective_with_dotted_types() {
        assert_ne!(queue_name("a.b", "c"), queue_name("a", "b.c"));
        assert_ne!(queue_name("a%2Eb", "c"), queue_name("a.b", "c"));
        assert_eq!(queue_name("a.b", "c"), "a%2Eb.c");
    }

    #[test]
    fn test_subjects() {
        assert_eq!(token("t.1"), "742e31");
        assert_eq!(routed_subject("nitrogen", "t.1"), "nitrogen.742e31");
        assert_eq!(exchange_subjects("nitrogen"), "nitrogen.>");
        assert_eq!(consumer_name("t.1"), "q-742e31");
    }
}
