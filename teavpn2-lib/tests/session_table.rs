#![forbid(unsafe_code)]

use std::net::Ipv4Addr;

use teavpn2_lib::proto::IfInfo;
use teavpn2_lib::session::{FdEntry, SessionTable};
use teavpn2_lib::Error;

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn if_info(ipv4: Ipv4Addr) -> IfInfo {
    IfInfo {
        ipv4,
        netmask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: Ipv4Addr::new(10, 8, 0, 1),
        mtu: 1500,
    }
}

#[test]
fn capacity_bounds_simultaneous_slots() {
    let table = SessionTable::new(3, 4);
    let a = table.acquire().expect("slot 0");
    let b = table.acquire().expect("slot 1");
    let c = table.acquire().expect("slot 2");
    assert!(table.acquire().is_none(), "a fourth slot must not exist");
    assert_eq!(table.in_use(), 3);

    let slots = [a.slot(), b.slot(), c.slot()];
    let mut sorted = slots;
    sorted.sort_unstable();
    assert_eq!(sorted, [0, 1, 2]);
}

#[test]
fn release_of_a_free_slot_is_rejected() -> TestResult<()> {
    let table = SessionTable::new(2, 4);
    let s = table.acquire().expect("slot");
    table.release(s.slot())?;
    assert!(matches!(
        table.release(s.slot()),
        Err(Error::SlotNotInUse(_))
    ));
    assert!(matches!(table.release(99), Err(Error::SlotNotInUse(99))));
    Ok(())
}

#[test]
fn balanced_sequences_restore_the_free_stack() -> TestResult<()> {
    let table = SessionTable::new(4, 4);
    let initial = table.free_slots();

    let a = table.acquire().expect("a");
    let b = table.acquire().expect("b");
    table.release(a.slot())?;
    let c = table.acquire().expect("c");
    let d = table.acquire().expect("d");
    table.release(d.slot())?;
    table.release(b.slot())?;
    table.release(c.slot())?;

    // Order-insensitive: the same set of slots is free again.
    assert_eq!(table.free_slots(), initial);
    assert_eq!(table.in_use(), 0);
    Ok(())
}

#[test]
fn released_sessions_come_back_pristine() -> TestResult<()> {
    let table = SessionTable::new(1, 4);
    let s = table.acquire().expect("slot");
    s.mark_connected();
    s.set_username("alice");
    s.record_error();
    table.release(s.slot())?;

    let s = table.acquire().expect("slot again");
    assert!(s.is_used());
    assert!(!s.is_connected());
    assert!(!s.is_authenticated());
    assert_eq!(s.username(), None);
    assert!(!s.is_expired(1));
    Ok(())
}

#[test]
fn flag_ordering_holds_through_the_lifecycle() {
    let table = SessionTable::new(1, 4);
    let s = table.acquire().expect("slot");
    assert!(s.is_used() && !s.is_connected() && !s.is_authenticated());
    s.mark_connected();
    assert!(s.is_used() && s.is_connected() && !s.is_authenticated());
    s.mark_authenticated(if_info(Ipv4Addr::new(10, 8, 0, 2)));
    assert!(s.is_used() && s.is_connected() && s.is_authenticated());
}

#[test]
fn ip_map_tracks_the_binding_session() -> TestResult<()> {
    let table = SessionTable::new(4, 4);
    let vip = Ipv4Addr::new(10, 8, 0, 2);

    assert!(table.by_ip(vip).is_none());

    let s = table.acquire().expect("slot");
    s.mark_connected();
    table.bind_ip(s.slot(), vip)?;
    s.mark_authenticated(if_info(vip));

    let found = table.by_ip(vip).expect("bound address resolves");
    assert_eq!(found.slot(), s.slot());

    table.unbind_ip(vip);
    assert!(table.by_ip(vip).is_none());
    Ok(())
}

#[test]
fn ip_collisions_are_rejected() -> TestResult<()> {
    let table = SessionTable::new(4, 4);
    let vip = Ipv4Addr::new(10, 8, 0, 2);
    let a = table.acquire().expect("a");
    let b = table.acquire().expect("b");
    table.bind_ip(a.slot(), vip)?;
    assert!(matches!(
        table.bind_ip(b.slot(), vip),
        Err(Error::AddrInUse(addr)) if addr == vip
    ));
    Ok(())
}

#[test]
fn release_clears_the_ip_binding() -> TestResult<()> {
    let table = SessionTable::new(2, 4);
    let vip = Ipv4Addr::new(10, 8, 0, 7);
    let s = table.acquire().expect("slot");
    s.mark_connected();
    table.bind_ip(s.slot(), vip)?;
    s.mark_authenticated(if_info(vip));
    table.release(s.slot())?;

    assert!(table.by_ip(vip).is_none());
    // The freed cell is bindable again.
    let s = table.acquire().expect("slot");
    table.bind_ip(s.slot(), vip)?;
    Ok(())
}

#[test]
fn fd_map_resolves_sessions_and_sentinels() -> TestResult<()> {
    let table = SessionTable::new(2, 4);
    table.mark_listener(5);
    table.mark_wake_pipe(6);

    let s = table.acquire().expect("slot");
    s.bind_fd(9);
    table.bind_fd(s.slot(), 9);

    assert!(matches!(table.by_fd(5), FdEntry::Listener));
    assert!(matches!(table.by_fd(6), FdEntry::WakePipe));
    match table.by_fd(9) {
        FdEntry::Session(found) => assert_eq!(found.slot(), s.slot()),
        other => panic!("expected a session, got {other:?}"),
    }
    assert!(matches!(table.by_fd(7), FdEntry::Unknown));
    assert!(matches!(table.by_fd(-1), FdEntry::Unknown));

    table.release(s.slot())?;
    assert!(matches!(table.by_fd(9), FdEntry::Unknown));
    Ok(())
}

#[test]
fn peer_map_resolves_datagram_sources() -> TestResult<()> {
    let table = SessionTable::new(2, 4);
    let peer = "198.51.100.4:40000".parse()?;

    let s = table.acquire().expect("slot");
    table.bind_peer(s.slot(), peer);
    let found = table.by_peer(peer).expect("peer resolves");
    assert_eq!(found.slot(), s.slot());
    assert_eq!(s.peer(), Some(peer));

    table.release(s.slot())?;
    assert!(table.by_peer(peer).is_none());
    Ok(())
}
