//! Fan-out of one line to every active session, or all but one.

use std::sync::Arc;

use tracing::debug;

use crate::registry::Registry;

#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Registry,
}

impl Broadcaster {
    pub fn new(registry: Registry) -> Broadcaster {
        Broadcaster { registry }
    }

    /// Queues `text` for every member except `exclude` and returns how many accepted it.
    ///
    /// The registry lock is held only while copying the member list. A member whose queue is full
    /// or gone is skipped; its own session notices the broken connection on its next read.
    pub fn broadcast(&self, text: &str, exclude: Option<&str>) -> usize {
        let line: Arc<str> = Arc::from(text);
        let recipients = self.registry.snapshot();
        let mut delivered = 0;
        for member in recipients.iter() {
            if exclude == Some(&*member.name) {
                continue;
            }
            match member.deliver(line.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => debug!(
                    nick = %member.name,
                    peer = %member.addr,
                    error = %err,
                    "dropped broadcast line"
                ),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::member;
    use crate::session::Outgoing;

    fn line(outgoing: Outgoing) -> String {
        match outgoing {
            Outgoing::Line(line) => line.to_string(),
            Outgoing::Close => panic!("unexpected close"),
        }
    }

    #[test]
    fn excludes_only_the_sender() {
        let registry = Registry::new();
        let (alice, mut alice_rx) = member(1, "Alice");
        let (bob, mut bob_rx) = member(2, "Bob");
        let (carol, mut carol_rx) = member(3, "Carol");
        for m in vec![alice, bob, carol] {
            registry.try_insert(m).unwrap();
        }

        let broadcaster = Broadcaster::new(registry);
        assert_eq!(broadcaster.broadcast("hello", Some("Alice")), 2);

        assert!(alice_rx.try_recv().is_err());
        assert_eq!(line(bob_rx.try_recv().unwrap()), "hello");
        assert_eq!(line(carol_rx.try_recv().unwrap()), "hello");
        // exactly one copy each
        assert!(bob_rx.try_recv().is_err());
        assert!(carol_rx.try_recv().is_err());
    }

    #[test]
    fn failed_recipient_does_not_stop_the_rest() {
        let registry = Registry::new();
        let (gone, gone_rx) = member(1, "Gone");
        let (bob, mut bob_rx) = member(2, "Bob");
        registry.try_insert(gone).unwrap();
        registry.try_insert(bob).unwrap();
        drop(gone_rx);

        let broadcaster = Broadcaster::new(registry);
        assert_eq!(broadcaster.broadcast("still here", None), 1);
        assert_eq!(line(bob_rx.try_recv().unwrap()), "still here");
    }

    #[test]
    fn full_queue_drops_for_that_member_only() {
        let registry = Registry::new();
        let (slow, _slow_rx) = member(1, "Slow");
        let (bob, mut bob_rx) = member(2, "Bob");
        registry.try_insert(slow).unwrap();
        registry.try_insert(bob).unwrap();

        let broadcaster = Broadcaster::new(registry);
        // test members have a queue of 8
        for n in 0..8 {
            assert_eq!(broadcaster.broadcast(&n.to_string(), Some("Bob")), 1);
        }
        assert_eq!(broadcaster.broadcast("overflow", None), 1);
        assert_eq!(line(bob_rx.try_recv().unwrap()), "overflow");
    }

    #[test]
    fn departed_member_receives_nothing() {
        let registry = Registry::new();
        let (bob, mut bob_rx) = member(2, "Bob");
        registry.try_insert(bob).unwrap();
        registry.remove("Bob", crate::session::SessionId(2));

        let broadcaster = Broadcaster::new(registry);
        assert_eq!(broadcaster.broadcast("anyone?", None), 0);
        assert!(bob_rx.try_recv().is_err());
    }
}
