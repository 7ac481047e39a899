use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::printer_state::{PrinterId, PrinterIdentity, PrinterSnapshot, PrinterState};
use crate::mqtt::topic_router::DomainEvent;

/// Latest decoded state per printer.
///
/// Every printer gets its own `watch` channel. Writers go through `send_modify`,
/// so a reader borrowing the value sees either the snapshot before or after an
/// update, never one in between. The printer set is fixed when the cache is
/// built; a configuration reload builds a new cache.
#[derive(Clone, Debug)]
pub struct PrinterStateCache {
    entries: Arc<HashMap<PrinterId, watch::Sender<PrinterState>>>,
}

impl PrinterStateCache {
    pub fn new(printers: &[PrinterIdentity]) -> Self {
        let entries = printers
            .iter()
            .map(|printer| {
                let (tx, _rx) = watch::channel(PrinterState::new(
                    printer.id,
                    Some(printer.name.clone()),
                ));
                (printer.id, tx)
            })
            .collect();
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn get(&self, printer_id: PrinterId) -> Option<PrinterState> {
        self.entries
            .get(&printer_id)
            .map(|tx| tx.borrow().clone())
    }

    pub fn contains(&self, printer_id: PrinterId) -> bool {
        self.entries.contains_key(&printer_id)
    }

    pub fn printer_ids(&self) -> Vec<PrinterId> {
        let mut ids: Vec<PrinterId> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Receiver that wakes whenever the printer's snapshot changes.
    pub fn subscribe(&self, printer_id: PrinterId) -> Option<watch::Receiver<PrinterState>> {
        self.entries.get(&printer_id).map(|tx| tx.subscribe())
    }

    /// Fold a routed event into the printer's snapshot. Returns false when the
    /// event was not applied.
    pub fn apply(&self, printer_id: PrinterId, event: &DomainEvent) -> bool {
        if event.printer_id != printer_id {
            warn!(
                "Dropping event for printer {} routed to session {}",
                event.printer_id, printer_id
            );
            return false;
        }
        let Some(tx) = self.entries.get(&printer_id) else {
            debug!("No cache entry for printer {}", printer_id);
            return false;
        };
        let received_at = Instant::now();
        tx.send_modify(|state| state.merge(&event.update, received_at));
        true
    }

    pub fn apply_snapshot(&self, printer_id: PrinterId, snapshot: &PrinterSnapshot) -> bool {
        match self.entries.get(&printer_id) {
            Some(tx) => {
                tx.send_modify(|state| state.merge_snapshot(snapshot));
                true
            }
            None => false,
        }
    }
}
