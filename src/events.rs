use std::collections::VecDeque;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValueEvent {
    pub device_id: usize,
    pub name: String,
    pub value: String,
    pub timestamp_ms: u64,
}

/// Fans displayed-value changes out to live subscribers and keeps a
/// bounded history per device.
pub struct ValueEvents {
    event_tx: broadcast::Sender<ValueEvent>,
    history: RwLock<FxHashMap<usize, VecDeque<ValueEvent>>>,
    history_capacity: usize,
}

impl ValueEvents {
    pub fn new(broadcast_capacity: usize, history_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            event_tx,
            history: RwLock::new(FxHashMap::default()),
            history_capacity,
        }
    }

    pub fn dispatch(&self, event: ValueEvent) {
        {
            let mut history = self.history.write();
            let entries = history.entry(event.device_id).or_default();
            while !entries.is_empty() && entries.len() >= self.history_capacity {
                entries.pop_front();
            }
            if self.history_capacity > 0 {
                entries.push_back(event.clone());
            }
        }
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ValueEvent> {
        self.event_tx.subscribe()
    }

    pub fn history(&self, device_id: usize, limit: Option<usize>) -> Vec<ValueEvent> {
        let history = self.history.read();
        let Some(entries) = history.get(&device_id) else {
            return Vec::new();
        };
        let skip = limit
            .map(|lim| entries.len().saturating_sub(lim))
            .unwrap_or(0);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self, device_id: usize) -> Option<ValueEvent> {
        self.history
            .read()
            .get(&device_id)
            .and_then(|entries| entries.back().cloned())
    }

    /// Newest event of every named value, ordered by device then name.
    /// `device` narrows it to one device.
    pub fn latest(&self, device: Option<usize>) -> Vec<ValueEvent> {
        let history = self.history.read();
        let mut latest = Vec::new();
        for (id, entries) in history.iter() {
            if device.is_some_and(|wanted| wanted != *id) {
                continue;
            }
            let mut seen: Vec<&str> = Vec::new();
            for event in entries.iter().rev() {
                if !seen.contains(&event.name.as_str()) {
                    seen.push(&event.name);
                    latest.push(event.clone());
                }
            }
        }
        latest.sort_by(|a, b| (a.device_id, &a.name).cmp(&(b.device_id, &b.name)));
        latest
    }

    /// Drops the history of a deleted device and shifts the devices behind
    /// it down one id, mirroring the registry renumbering.
    pub fn forget(&self, device_id: usize) {
        let mut history = self.history.write();
        history.remove(&device_id);
        let shifted: FxHashMap<_, _> = history
            .drain()
            .map(|(id, mut entries)| {
                if id > device_id {
                    entries.iter_mut().for_each(|e| e.device_id = id - 1);
                    (id - 1, entries)
                } else {
                    (id, entries)
                }
            })
            .collect();
        *history = shifted;
    }

    pub fn clear(&self) {
        self.history.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(device_id: usize, value: &str) -> ValueEvent {
        ValueEvent {
            device_id,
            name: "state".into(),
            value: value.into(),
            timestamp_ms: 0,
        }
    }

    #[test]
    fn history_is_bounded_per_device() {
        let events = ValueEvents::new(8, 2);
        events.dispatch(event(0, "on"));
        events.dispatch(event(0, "off"));
        events.dispatch(event(0, "on"));
        events.dispatch(event(1, "on"));

        let values: Vec<_> = events.history(0, None).into_iter().map(|e| e.value).collect();
        assert_eq!(values, vec!["off", "on"]);
        assert_eq!(events.history(1, None).len(), 1);
        assert_eq!(events.history(0, Some(1))[0].value, "on");
        assert_eq!(events.last(0).map(|e| e.value).as_deref(), Some("on"));
        assert!(events.history(7, None).is_empty());
    }

    #[test]
    fn forgetting_a_device_shifts_later_ids() {
        let events = ValueEvents::new(8, 4);
        events.dispatch(event(0, "a"));
        events.dispatch(event(1, "b"));
        events.dispatch(event(2, "c"));

        events.forget(1);

        assert_eq!(events.last(0).map(|e| e.value).as_deref(), Some("a"));
        let moved = events.last(1).unwrap();
        assert_eq!((moved.device_id, moved.value.as_str()), (1, "c"));
        assert!(events.last(2).is_none());
    }

    #[test]
    fn latest_keeps_the_newest_value_per_name() {
        let events = ValueEvents::new(8, 8);
        events.dispatch(event(1, "off"));
        events.dispatch(ValueEvent {
            name: "humid".into(),
            ..event(0, "40.0")
        });
        events.dispatch(event(0, "on"));
        events.dispatch(event(1, "on"));

        let latest: Vec<_> = events
            .latest(None)
            .into_iter()
            .map(|e| (e.device_id, e.name, e.value))
            .collect();
        assert_eq!(
            latest,
            vec![
                (0, "humid".to_string(), "40.0".to_string()),
                (0, "state".to_string(), "on".to_string()),
                (1, "state".to_string(), "on".to_string()),
            ]
        );
        assert_eq!(events.latest(Some(1)).len(), 1);
        assert!(events.latest(Some(5)).is_empty());
    }

    #[test]
    fn subscribers_receive_dispatched_events() {
        let events = ValueEvents::new(8, 4);
        let mut rx = events.subscribe();
        events.dispatch(event(3, "1"));
        assert_eq!(rx.try_recv().unwrap(), event(3, "1"));
    }
}
