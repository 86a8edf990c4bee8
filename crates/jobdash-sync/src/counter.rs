use std::sync::Arc;
use tokio::sync::watch;

/// Unread notification count. Pull snapshots set a baseline and push events
/// adjust it; the value never goes below zero.
#[derive(Clone)]
pub struct UnreadCounter {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for UnreadCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl UnreadCounter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn hydrate(&self, count: u64) {
        self.tx.send_replace(count);
    }

    pub fn increment(&self) {
        self.tx.send_modify(|count| *count = count.saturating_add(1));
    }

    pub fn decrement_one(&self) {
        self.tx.send_modify(|count| *count = count.saturating_sub(1));
    }

    pub fn clear(&self) {
        self.tx.send_replace(0);
    }

    pub fn value(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hydrate_then_increments_accumulate() {
        let counter = UnreadCounter::new();
        counter.hydrate(5);
        counter.increment();
        counter.increment();
        assert_eq!(counter.value(), 7);

        counter.clear();
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn decrement_is_floored_at_zero() {
        let counter = UnreadCounter::new();
        counter.decrement_one();
        assert_eq!(counter.value(), 0);

        counter.hydrate(1);
        counter.decrement_one();
        counter.decrement_one();
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn hydrate_replaces_pushed_deltas() {
        let counter = UnreadCounter::new();
        counter.increment();
        counter.increment();
        counter.hydrate(1);
        assert_eq!(counter.value(), 1);
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Increment,
        DecrementOne,
        Clear,
        Hydrate(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => Just(Op::Increment),
            4 => Just(Op::DecrementOne),
            1 => Just(Op::Clear),
            1 => (0u64..8).prop_map(Op::Hydrate),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn any_sequence_tracks_the_saturating_model(
            ops in prop::collection::vec(op_strategy(), 0..512),
        ) {
            let counter = UnreadCounter::new();
            let mut expected: u64 = 0;
            for op in ops {
                match op {
                    Op::Increment => {
                        counter.increment();
                        expected += 1;
                    }
                    Op::DecrementOne => {
                        counter.decrement_one();
                        expected = expected.saturating_sub(1);
                    }
                    Op::Clear => {
                        counter.clear();
                        expected = 0;
                    }
                    Op::Hydrate(count) => {
                        counter.hydrate(count);
                        expected = count;
                    }
                }
                prop_assert_eq!(counter.value(), expected);
            }
        }
    }

    #[test]
    fn subscribers_observe_latest_value() {
        let counter = UnreadCounter::new();
        let mut rx = counter.subscribe();
        counter.hydrate(3);
        counter.increment();
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(*rx.borrow_and_update(), 4);
    }
}
