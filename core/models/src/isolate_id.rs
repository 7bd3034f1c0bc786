use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ISOLATE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an allocated isolate.
///
/// The scheduler keys its registry on this value, so it outlives the isolate
/// itself: teardown still needs it after the snapshot creator has consumed the
/// isolate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsolateId(u64);
impl IsolateId {
    pub fn next() -> Self {
        IsolateId(NEXT_ISOLATE_ID.fetch_add(1, Ordering::Relaxed))
    }
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}
impl std::fmt::Display for IsolateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "isolate#{}", self.0)
    }
}

#[test]
fn ids_are_unique() {
    let a = IsolateId::next();
    let b = IsolateId::next();
    assert_ne!(a, b);
    assert!(b > a);
    assert_eq!(format!("{a}"), format!("isolate#{}", a.as_u64()));
}
