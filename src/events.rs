/// Typed subscriber registry for transport events
///
/// Each subscriber owns an unbounded receiver. `emit` delivers a clone of the
/// event to every live subscriber in call order, so a single producer task
/// yields in-order delivery per subscriber. Dropped receivers are pruned on
/// the next emit.
use tokio::sync::mpsc;

pub type EventReceiver<E> = mpsc::UnboundedReceiver<E>;

pub struct Subscribers<E: Clone> {
    senders: Vec<mpsc::UnboundedSender<E>>,
}

impl<E: Clone> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            senders: Vec::new(),
        }
    }
}

impl<E: Clone> Subscribers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&mut self) -> EventReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push(tx);
        rx
    }

    /// Deliver an event to every live subscriber
    pub fn emit(&mut self, event: E) {
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_in_order_to_all() {
        let mut subs: Subscribers<u32> = Subscribers::new();
        let mut a = subs.subscribe();
        let mut b = subs.subscribe();

        subs.emit(1);
        subs.emit(2);

        assert_eq!(a.try_recv().unwrap(), 1);
        assert_eq!(a.try_recv().unwrap(), 2);
        assert_eq!(b.try_recv().unwrap(), 1);
        assert_eq!(b.try_recv().unwrap(), 2);
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let mut subs: Subscribers<u32> = Subscribers::new();
        let a = subs.subscribe();
        let mut b = subs.subscribe();
        drop(a);

        subs.emit(7);
        assert_eq!(subs.len(), 1);
        assert_eq!(b.try_recv().unwrap(), 7);
    }
}
