//! Single-slot, lock-free handoff of a requested pixel format

use std::sync::atomic::{AtomicU8, Ordering};

use crate::types::PixelFormat;

const EMPTY: u8 = 0;

/// Holds at most one requested format. Writers overwrite, the delivery
/// thread drains it once per frame. Only the latest request is ever seen.
#[derive(Debug, Default)]
pub struct PendingFormat {
    slot: AtomicU8,
}

impl PendingFormat {
    pub fn new() -> Self {
        Self {
            slot: AtomicU8::new(EMPTY),
        }
    }

    /// Store `format`, returning the unconsumed request it replaced
    pub fn request(&self, format: PixelFormat) -> Option<PixelFormat> {
        let previous = self.slot.swap(format.code(), Ordering::AcqRel);
        PixelFormat::from_code(previous)
    }

    /// Drain the slot
    pub fn take(&self) -> Option<PixelFormat> {
        PixelFormat::from_code(self.slot.swap(EMPTY, Ordering::AcqRel))
    }

    /// Put back a drained request that could not be applied. A request made
    /// since the drain wins; returns whether `format` was stored.
    pub fn restore(&self, format: PixelFormat) -> bool {
        self.slot
            .compare_exchange(EMPTY, format.code(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.load(Ordering::Acquire) == EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_take_empty() {
        let mailbox = PendingFormat::new();
        assert!(mailbox.is_empty());
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn test_last_writer_wins() {
        let mailbox = PendingFormat::new();
        assert_eq!(mailbox.request(PixelFormat::Rgba8), None);
        assert_eq!(mailbox.request(PixelFormat::Rgba16Float), Some(PixelFormat::Rgba8));
        assert_eq!(mailbox.request(PixelFormat::Bgra8), Some(PixelFormat::Rgba16Float));

        assert_eq!(mailbox.take(), Some(PixelFormat::Bgra8));
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn test_restore_yields_to_newer_request() {
        let mailbox = PendingFormat::new();
        mailbox.request(PixelFormat::Rgba8);
        let drained = mailbox.take().unwrap();

        assert!(mailbox.restore(drained));
        assert_eq!(mailbox.take(), Some(PixelFormat::Rgba8));

        mailbox.request(PixelFormat::Rgba8);
        let drained = mailbox.take().unwrap();
        mailbox.request(PixelFormat::Rgb10A2);
        assert!(!mailbox.restore(drained));
        assert_eq!(mailbox.take(), Some(PixelFormat::Rgb10A2));
    }

    #[test]
    fn test_concurrent_requests_leave_one_value() {
        let mailbox = Arc::new(PendingFormat::new());
        let formats = [
            PixelFormat::Bgra8,
            PixelFormat::Rgba8,
            PixelFormat::Rgba16Float,
            PixelFormat::Rgb10A2,
        ];

        let handles: Vec<_> = formats
            .iter()
            .map(|&format| {
                let mailbox = Arc::clone(&mailbox);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        mailbox.request(format);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let last = mailbox.take().expect("a request must survive");
        assert!(formats.contains(&last));
        assert!(mailbox.is_empty());
    }

    fn any_format() -> impl proptest::strategy::Strategy<Value = PixelFormat> {
        proptest::prop_oneof![
            proptest::strategy::Just(PixelFormat::Bgra8),
            proptest::strategy::Just(PixelFormat::Rgba8),
            proptest::strategy::Just(PixelFormat::Rgba16Float),
            proptest::strategy::Just(PixelFormat::Rgb10A2),
        ]
    }

    proptest::proptest! {
        #[test]
        fn prop_take_returns_last_request(
            requests in proptest::collection::vec(any_format(), 1..16)
        ) {
            let mailbox = PendingFormat::new();
            for &format in &requests {
                mailbox.request(format);
            }
            proptest::prop_assert_eq!(mailbox.take(), requests.last().copied());
            proptest::prop_assert!(mailbox.is_empty());
        }
    }
}
