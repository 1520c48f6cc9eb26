/*
 * Copyright 2025 Joyent, Inc.
 */

use std::cmp::Ordering;

use crate::entry::PoolEntry;
use crate::resource::Resource;

/// Total order over entries for idle-set handoff: persistent entries before
/// dynamic ones, so warmed-up seeds are reused and dynamic entries drain
/// once load subsides; least-recently-used first among persistent entries;
/// ties broken by id.
pub(crate) fn compare<R>(a: &PoolEntry<R>, b: &PoolEntry<R>) -> Ordering
where
    R: Resource,
{
    match a.is_dynamic().cmp(&b.is_dynamic()) {
        Ordering::Equal if a.is_dynamic() => a.id().cmp(&b.id()),
        Ordering::Equal => match a.last_used_at().cmp(&b.last_used_at()) {
            Ordering::Equal => a.id().cmp(&b.id()),
            ordering => ordering,
        },
        ordering => ordering,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;
    use std::thread;
    use std::time::Duration;

    use slog::{o, Logger};

    use crate::entry::EntryId;

    struct TestResource;

    impl Resource for TestResource {
        type Error = io::Error;
        const KIND: &'static str = "Test";
        const STALE_AFTER: Duration = Duration::from_secs(5);

        fn connect(&mut self) -> Result<(), io::Error> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), io::Error> {
            Ok(())
        }

        fn check(&mut self) -> bool {
            true
        }

        fn cleanup(&mut self) -> Result<(), io::Error> {
            Ok(())
        }
    }

    fn entry(id: u32, dynamic: bool) -> PoolEntry<TestResource> {
        let log = Logger::root(slog::Discard, o!());
        let mut e = PoolEntry::new(EntryId::from(id), TestResource, &log);
        e.set_dynamic(dynamic);
        e
    }

    fn cycle(e: &mut PoolEntry<TestResource>) {
        let res = e.reserve(None).unwrap();
        e.give_back(res.resource);
        e.free();
    }

    #[test]
    fn persistent_before_dynamic() {
        let persistent = entry(2, false);
        let dynamic = entry(1, true);
        assert_eq!(compare(&persistent, &dynamic), Ordering::Less);
        assert_eq!(compare(&dynamic, &persistent), Ordering::Greater);
    }

    #[test]
    fn least_recently_used_persistent_first() {
        let create = |_id| TestResource;
        let mut a = entry(1, false);
        let mut b = entry(2, false);
        a.connect_with(&create).unwrap();
        b.connect_with(&create).unwrap();

        cycle(&mut a);
        thread::sleep(Duration::from_millis(5));
        cycle(&mut b);
        assert_eq!(compare(&a, &b), Ordering::Less);

        thread::sleep(Duration::from_millis(5));
        cycle(&mut a);
        assert_eq!(compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn dynamic_ties_break_by_id() {
        let a = entry(3, true);
        let b = entry(7, true);
        assert_eq!(compare(&a, &b), Ordering::Less);
    }
}
