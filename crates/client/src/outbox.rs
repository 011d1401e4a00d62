//! Priority outbox with retry-until-acknowledged semantics.
//!
//! Every user action becomes an item with a fresh `msgId`. Items drain
//! head-first by priority (insertion order breaks ties), one send per
//! flush tick, and stay queued until the edge's `ACK_MSG` retires them.
//! The queue survives disconnects untouched; stale `last_sent_at` values
//! make in-flight items immediately resendable after a reconnect.

use std::collections::HashSet;

use serde_json::{Map, Value};
use uuid::Uuid;

use fireline_protocol::MessageKind;

/// One queued intent awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct OutboxItem {
    pub msg_id: String,
    pub type_name: String,
    pub payload: Map<String, Value>,
    pub priority: u8,
    pub attempts: u32,
    pub last_sent_at: Option<u64>,
    seq: u64,
}

impl OutboxItem {
    /// Serializes the item as a wire frame.
    fn encode(&self) -> String {
        let mut body = self.payload.clone();
        body.insert("type".into(), Value::String(self.type_name.clone()));
        body.insert("msgId".into(), Value::String(self.msg_id.clone()));
        Value::Object(body).to_string()
    }
}

/// The reliable sender's queue and in-flight table.
#[derive(Debug)]
pub struct Outbox {
    /// Sorted by `(priority, seq)`.
    items: Vec<OutboxItem>,
    /// `msgId`s currently in flight (sent, not yet acknowledged).
    pending: HashSet<String>,
    resend_after_ms: u64,
    next_seq: u64,
}

impl Outbox {
    pub fn new(resend_after_ms: u64) -> Self {
        Self {
            items: Vec::new(),
            pending: HashSet::new(),
            resend_after_ms,
            next_seq: 0,
        }
    }

    /// Queues an intent under a fresh `msgId` and returns it.
    ///
    /// Priority is derived from the wire tag; unrecognized tags queue at
    /// the lowest urgency.
    pub fn enqueue(&mut self, type_name: impl Into<String>, payload: Map<String, Value>) -> String {
        let msg_id = Uuid::new_v4().to_string();
        self.enqueue_with_id(msg_id.clone(), type_name, payload);
        msg_id
    }

    pub(crate) fn enqueue_with_id(
        &mut self,
        msg_id: String,
        type_name: impl Into<String>,
        payload: Map<String, Value>,
    ) {
        let type_name = type_name.into();
        let priority = MessageKind::parse(&type_name).priority();
        let seq = self.next_seq;
        self.next_seq += 1;

        let item = OutboxItem {
            msg_id,
            type_name,
            payload,
            priority,
            attempts: 0,
            last_sent_at: None,
            seq,
        };

        let pos = self.items.partition_point(|i| i.priority <= item.priority);
        self.items.insert(pos, item);
    }

    /// One flush decision: at most one frame per tick.
    ///
    /// Sends the head-most item that is not in flight; failing that,
    /// resends the first in-flight item whose ACK is overdue; otherwise
    /// does nothing. The returned frame must actually be handed to the
    /// transport: the item is already marked sent.
    pub fn flush_tick(&mut self, now_ms: u64) -> Option<String> {
        if let Some(idx) = self
            .items
            .iter()
            .position(|i| !self.pending.contains(&i.msg_id))
        {
            let item = &mut self.items[idx];
            item.attempts += 1;
            item.last_sent_at = Some(now_ms);
            let frame = item.encode();
            let msg_id = item.msg_id.clone();
            self.pending.insert(msg_id);
            return Some(frame);
        }

        let resend_after = self.resend_after_ms;
        if let Some(idx) = self.items.iter().position(|i| {
            self.pending.contains(&i.msg_id)
                && i.last_sent_at
                    .is_some_and(|t| now_ms.saturating_sub(t) > resend_after)
        }) {
            let item = &mut self.items[idx];
            item.attempts += 1;
            item.last_sent_at = Some(now_ms);
            return Some(item.encode());
        }

        None
    }

    /// Retires an item on receipt of its `ACK_MSG`. Returns `true` iff an
    /// item was actually queued under this id.
    pub fn acked(&mut self, msg_id: &str) -> bool {
        let was_pending = self.pending.remove(msg_id);
        let before = self.items.len();
        self.items.retain(|i| i.msg_id != msg_id);
        was_pending || before != self.items.len()
    }

    /// Items still queued (sent or not).
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items currently in flight.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queued items in drain order, for inspection.
    pub fn items(&self) -> impl Iterator<Item = &OutboxItem> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESEND: u64 = 1_500;

    fn payload(fields: &[(&str, Value)]) -> Map<String, Value> {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn frame_type(frame: &str) -> String {
        let v: Value = serde_json::from_str(frame).unwrap();
        v["type"].as_str().unwrap().to_string()
    }

    #[test]
    fn enqueue_orders_by_priority_then_insertion() {
        let mut outbox = Outbox::new(RESEND);
        outbox.enqueue("CHAT_SEND", payload(&[("text", "a".into())]));
        outbox.enqueue("LOCATION_UPDATE", payload(&[("lat", 1.0.into())]));
        outbox.enqueue("SOS_RAISE", Map::new());
        outbox.enqueue("SOS_CLEAR", Map::new());

        let order: Vec<&str> = outbox.items().map(|i| i.type_name.as_str()).collect();
        assert_eq!(
            order,
            vec!["SOS_RAISE", "SOS_CLEAR", "LOCATION_UPDATE", "CHAT_SEND"]
        );
    }

    #[test]
    fn unknown_type_drains_last() {
        let mut outbox = Outbox::new(RESEND);
        outbox.enqueue("RADIO_CHECK", Map::new());
        outbox.enqueue("CHAT_SEND", payload(&[("text", "a".into())]));

        let order: Vec<&str> = outbox.items().map(|i| i.type_name.as_str()).collect();
        assert_eq!(order, vec!["CHAT_SEND", "RADIO_CHECK"]);
    }

    #[test]
    fn one_send_per_tick() {
        let mut outbox = Outbox::new(RESEND);
        outbox.enqueue("CHAT_SEND", payload(&[("text", "a".into())]));
        outbox.enqueue("CHAT_SEND", payload(&[("text", "b".into())]));

        assert!(outbox.flush_tick(0).is_some());
        assert_eq!(outbox.pending_len(), 1);
        assert!(outbox.flush_tick(0).is_some());
        assert_eq!(outbox.pending_len(), 2);
        // Both in flight, neither overdue.
        assert!(outbox.flush_tick(100).is_none());
    }

    #[test]
    fn resend_only_after_timeout() {
        let mut outbox = Outbox::new(RESEND);
        outbox.enqueue("CHAT_SEND", payload(&[("text", "a".into())]));

        let first = outbox.flush_tick(0).unwrap();
        assert_eq!(frame_type(&first), "CHAT_SEND");

        // Not yet overdue (strict threshold).
        assert!(outbox.flush_tick(RESEND).is_none());

        let resent = outbox.flush_tick(RESEND + 1).unwrap();
        assert_eq!(frame_type(&resent), "CHAT_SEND");

        let item = outbox.items().next().unwrap();
        assert_eq!(item.attempts, 2);
        assert_eq!(item.last_sent_at, Some(RESEND + 1));
    }

    #[test]
    fn fresh_item_preempts_overdue_resend() {
        let mut outbox = Outbox::new(RESEND);
        outbox.enqueue("CHAT_SEND", payload(&[("text", "a".into())]));
        assert!(outbox.flush_tick(0).is_some());

        // An urgent item arrives while the chat ACK is overdue.
        outbox.enqueue("SOS_RAISE", Map::new());
        let frame = outbox.flush_tick(RESEND + 100).unwrap();
        assert_eq!(frame_type(&frame), "SOS_RAISE");

        // Next tick handles the overdue resend.
        let frame = outbox.flush_tick(RESEND + 100).unwrap();
        assert_eq!(frame_type(&frame), "CHAT_SEND");
    }

    #[test]
    fn ack_retires_item() {
        let mut outbox = Outbox::new(RESEND);
        let msg_id = outbox.enqueue("CHAT_SEND", payload(&[("text", "a".into())]));
        outbox.flush_tick(0);

        assert!(outbox.acked(&msg_id));
        assert!(outbox.is_empty());
        assert_eq!(outbox.pending_len(), 0);
        assert!(outbox.flush_tick(RESEND * 2).is_none());
    }

    #[test]
    fn ack_for_unknown_id_is_ignored() {
        let mut outbox = Outbox::new(RESEND);
        assert!(!outbox.acked("never-sent"));
    }

    #[test]
    fn unsent_item_can_be_acked() {
        // An ACK can race ahead of the next flush after a resend; the
        // queued copy must still be dropped.
        let mut outbox = Outbox::new(RESEND);
        let msg_id = outbox.enqueue("CHAT_SEND", payload(&[("text", "a".into())]));
        assert!(outbox.acked(&msg_id));
        assert!(outbox.is_empty());
    }

    #[test]
    fn pending_survives_reconnect_and_is_resendable() {
        let mut outbox = Outbox::new(RESEND);
        outbox.enqueue("LOCATION_UPDATE", payload(&[("lat", 1.0.into())]));
        outbox.flush_tick(0);

        // Transport drops; nothing is flushed for a while. The item is
        // still queued and overdue once flushing resumes.
        assert_eq!(outbox.len(), 1);
        let frame = outbox.flush_tick(10_000).unwrap();
        assert_eq!(frame_type(&frame), "LOCATION_UPDATE");
        assert_eq!(outbox.items().next().unwrap().attempts, 2);
    }

    #[test]
    fn encode_carries_type_msg_id_and_payload() {
        let mut outbox = Outbox::new(RESEND);
        let msg_id = outbox.enqueue(
            "LOCATION_UPDATE",
            payload(&[("lat", 37.0.into()), ("lng", (-122.0).into())]),
        );
        let frame = outbox.flush_tick(0).unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "LOCATION_UPDATE");
        assert_eq!(v["msgId"], msg_id.as_str());
        assert_eq!(v["lat"], 37.0);
        assert_eq!(v["lng"], -122.0);
    }

    #[test]
    fn distinct_enqueues_get_distinct_ids() {
        let mut outbox = Outbox::new(RESEND);
        let a = outbox.enqueue("CHAT_SEND", payload(&[("text", "a".into())]));
        let b = outbox.enqueue("CHAT_SEND", payload(&[("text", "a".into())]));
        assert_ne!(a, b);
    }
}
