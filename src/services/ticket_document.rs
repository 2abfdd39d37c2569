//! Printable ticket export
//!
//! The scan payload is the only machine-read part of the document; the rest is
//! presentation for the holder.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use uuid::Uuid;

use crate::database::entities::{Event, Seat, Ticket};

pub const SCAN_PAYLOAD_PREFIX: &str = "TICKET:";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TicketDocument {
    pub ticket_id: Uuid,
    pub event_name: String,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    /// `None` for general admission
    pub seat_label: Option<String>,
    pub admission_no: i32,
    pub used: bool,
    pub scan_payload: String,
}

impl TicketDocument {
    pub fn new(ticket: &Ticket, event: &Event, seat: Option<&Seat>) -> Self {
        Self {
            ticket_id: ticket.ticket_id,
            event_name: event.name.clone(),
            location: event.location.clone(),
            starts_at: event.starts_at,
            seat_label: seat.map(Seat::label),
            admission_no: ticket.admission_no,
            used: ticket.used,
            scan_payload: scan_payload(ticket.ticket_id),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== {} ===", self.event_name);
        if !self.location.is_empty() {
            let _ = writeln!(out, "Venue: {}", self.location);
        }
        let _ = writeln!(out, "Starts: {}", self.starts_at.format("%Y-%m-%d %H:%M UTC"));
        match &self.seat_label {
            Some(label) => {
                let _ = writeln!(out, "Seat: {}", label);
            }
            None => {
                let _ = writeln!(out, "General admission #{}", self.admission_no + 1);
            }
        }
        let _ = writeln!(out, "Ticket: {}", self.ticket_id);
        if self.used {
            let _ = writeln!(out, "Status: USED");
        }
        let _ = writeln!(out, "Scan code: {}", self.scan_payload);
        out
    }
}

pub fn scan_payload(ticket_id: Uuid) -> String {
    format!("{}{}", SCAN_PAYLOAD_PREFIX, ticket_id)
}

/// Inverse of [`scan_payload`]; also accepts a bare UUID.
pub fn parse_scan_payload(raw: &str) -> Option<Uuid> {
    let raw = raw.trim();
    let id = raw.strip_prefix(SCAN_PAYLOAD_PREFIX).unwrap_or(raw);
    Uuid::parse_str(id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn fixture(seat: bool) -> TicketDocument {
        let event = Event {
            id: 1,
            name: "Village Kabaddi Final".to_string(),
            location: "District Ground".to_string(),
            starts_at: Utc::now(),
            price: BigDecimal::from(100),
            available_tickets: 10,
            is_active: true,
        };
        let seat_row = Seat {
            id: 7,
            event_id: 1,
            section: "North".to_string(),
            row_number: 3,
            seat_number: 14,
            is_sold: true,
            held_by: None,
        };
        let ticket = Ticket {
            ticket_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            event_id: 1,
            seat_id: seat.then_some(7),
            admission_no: 0,
            used: false,
            used_at: None,
            issued_at: Utc::now(),
        };
        TicketDocument::new(&ticket, &event, seat.then_some(&seat_row))
    }

    #[test]
    fn document_embeds_ticket_id_in_scan_payload() {
        let doc = fixture(true);
        assert_eq!(doc.scan_payload, format!("TICKET:{}", doc.ticket_id));
        assert_eq!(parse_scan_payload(&doc.scan_payload), Some(doc.ticket_id));

        let text = doc.render_text();
        assert!(text.contains("North / row 3 / seat 14"));
        assert!(text.contains(&doc.scan_payload));
    }

    #[test]
    fn general_admission_has_no_seat_line() {
        let text = fixture(false).render_text();
        assert!(text.contains("General admission #1"));
        assert!(!text.contains("Seat:"));
    }

    #[test]
    fn bare_uuid_is_accepted() {
        let id = Uuid::new_v4();
        assert_eq!(parse_scan_payload(&id.to_string()), Some(id));
        assert_eq!(parse_scan_payload("TICKET:nope"), None);
    }
}
