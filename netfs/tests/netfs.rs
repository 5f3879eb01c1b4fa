use netfs::error::{ECANCELED, ENOENT, ENOMEM};
use netfs::{
    IoOrigin, Netfs, NetfsConfig, NetfsError, RefTrace, RequestFlags, RequestState, StatsSink,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// --------------------------------------------------------------------
// Lifecycle
//

#[test]
fn test_request_lifecycle() {
    init_logger();
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    let rreq = netfs.create(IoOrigin::Writeback, 0x2000, 0x3000).unwrap();
    assert_eq!(rreq.state(), RequestState::Created);
    assert!(netfs.registry().is_empty());

    netfs.register(&rreq).unwrap();
    assert_eq!(rreq.state(), RequestState::Registered);
    assert_eq!(netfs.registry().len(), 1);

    let sub_op = rreq.get(RefTrace::GetSubOp);
    assert!(netfs.begin_sub_op(&rreq, 0x3000));
    assert!(!netfs.sub_op_complete(&rreq));
    assert_eq!(rreq.ref_count(), 3);

    assert!(netfs.sub_op_complete(&sub_op));
    sub_op.put(RefTrace::PutSubOp);
    assert_eq!(rreq.state(), RequestState::Completing);

    netfs.retire(&rreq).unwrap();
    assert_eq!(rreq.state(), RequestState::Retired);
    assert!(netfs.registry().is_empty());
    assert_eq!(rreq.ref_count(), 1);
    assert_eq!(netfs.live_requests(), 1);

    drop(rreq);
    assert_eq!(netfs.live_requests(), 0);
}

#[test]
fn test_retire_unregistered_request() {
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    let rreq = netfs.create(IoOrigin::ReadPage, 0, 0x1000).unwrap();
    let err = netfs.retire(&rreq).unwrap_err();
    assert_eq!(err, NetfsError::NotRegistered(rreq.debug_id()));
    assert_eq!(err.errno(), -ENOENT);
    assert_eq!(rreq.state(), RequestState::Created);
}

#[test]
fn test_register_twice() {
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    let rreq = netfs.create(IoOrigin::ReadPage, 0, 0x1000).unwrap();
    netfs.register(&rreq).unwrap();
    assert!(matches!(
        netfs.register(&rreq),
        Err(NetfsError::AlreadyRegistered(_))
    ));
    assert_eq!(netfs.registry().len(), 1);
}

#[test]
fn test_retired_request_is_never_reinserted() {
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    let rreq = netfs.create(IoOrigin::LaunderWrite, 0, 0x1000).unwrap();
    netfs.register(&rreq).unwrap();
    netfs.retire(&rreq).unwrap();
    assert!(netfs.register(&rreq).is_err());
    assert!(netfs.registry().is_empty());
}

// --------------------------------------------------------------------
// Errors
//

#[test]
fn test_error_first_wins() {
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    let rreq = netfs.create(IoOrigin::DioRead, 0, 0x1000).unwrap();
    netfs.register(&rreq).unwrap();
    assert!(netfs.begin_sub_op(&rreq, 0x800));
    assert!(netfs.begin_sub_op(&rreq, 0x800));

    assert_eq!(netfs.mark_error(&rreq, -5), -5);
    assert_eq!(netfs.mark_error(&rreq, -110), -5);
    assert_eq!(rreq.error(), -5);

    // A failed sub-op does not stop the others from completing
    assert!(!netfs.sub_op_complete(&rreq));
    assert!(!netfs.sub_op_complete(&rreq));
    assert!(netfs.sub_op_complete(&rreq));
    netfs.retire(&rreq).unwrap();
    assert_eq!(rreq.error(), -5);
}

#[test]
fn test_cancel_keeps_earlier_error() {
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    let rreq = netfs.create(IoOrigin::UnbufferedWrite, 0, 0x1000).unwrap();
    netfs.register(&rreq).unwrap();
    netfs.mark_error(&rreq, -28);
    netfs.cancel(&rreq).unwrap();
    assert_eq!(rreq.error(), -28);
    assert!(rreq.test_flags(RequestFlags::CANCELLED | RequestFlags::FAILED));
}

#[test]
fn test_cancel_sets_ecanceled() {
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    let rreq = netfs.create(IoOrigin::WriteThrough, 0, 0x1000).unwrap();
    netfs.register(&rreq).unwrap();
    netfs.cancel(&rreq).unwrap();
    assert_eq!(rreq.error(), -ECANCELED);
    assert!(!netfs.begin_sub_op(&rreq, 0x10));
    assert_eq!(
        netfs.cancel(&rreq),
        Err(NetfsError::AlreadyRetired(rreq.debug_id()))
    );
}

#[test]
fn test_completion_after_cancel_still_runs() {
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    let rreq = netfs.create(IoOrigin::ReadForWrite, 0, 0x1000).unwrap();
    netfs.register(&rreq).unwrap();
    netfs.cancel(&rreq).unwrap();

    let mut ran = false;
    assert!(netfs.complete_sub_op(&rreq, |_| ran = true));
    assert!(ran);
    assert_eq!(rreq.state(), RequestState::Retired);
}

#[test]
fn test_cancel_after_completion_keeps_outcome() {
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    let rreq = netfs.create(IoOrigin::ReadAhead, 0, 0x1000).unwrap();
    netfs.register(&rreq).unwrap();
    assert!(netfs.sub_op_complete(&rreq));

    // Completion already fired and saw no error; cancel only unlinks
    netfs.cancel(&rreq).unwrap();
    assert_eq!(
        netfs.retire(&rreq),
        Err(NetfsError::AlreadyRetired(rreq.debug_id()))
    );
    assert_eq!(rreq.error(), 0);
    assert!(rreq.test_flags(RequestFlags::COMPLETE));
    assert!(!rreq.test_flags(RequestFlags::CANCELLED));
    assert!(!rreq.test_flags(RequestFlags::FAILED));
    assert!(netfs.registry().is_empty());
    assert_eq!(rreq.ref_count(), 1);

    let stats = netfs.stats_report();
    assert!(stats.contains("done   RA=1 "), "{stats}");
    assert!(stats.ends_with("rr=1 fail=0 cancel=0\n"), "{stats}");
}

#[test]
fn test_cancel_is_not_counted_as_failure() {
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    let rreq = netfs.create(IoOrigin::DioWrite, 0, 0x1000).unwrap();
    netfs.register(&rreq).unwrap();
    netfs.cancel(&rreq).unwrap();
    assert!(!rreq.test_flags(RequestFlags::FAILED));
    assert!(netfs.stats_report().ends_with("fail=0 cancel=1\n"));
}

// --------------------------------------------------------------------
// Allocation limit
//

#[test]
fn test_create_beyond_limit_fails_cleanly() {
    let config = NetfsConfig::from_json(r#"{"max_requests": 2}"#).unwrap();
    let netfs = Netfs::init(config).unwrap();
    let a = netfs.create(IoOrigin::ReadAhead, 0, 0x1000).unwrap();
    let b = netfs.create(IoOrigin::ReadAhead, 0x1000, 0x1000).unwrap();
    netfs.register(&a).unwrap();

    let err = netfs.create(IoOrigin::ReadAhead, 0x2000, 0x1000).unwrap_err();
    assert_eq!(err, NetfsError::NoMemory { limit: 2 });
    assert_eq!(err.errno(), -ENOMEM);
    assert_eq!(netfs.registry().len(), 1);
    assert_eq!(netfs.live_requests(), 2);
    assert!(netfs.stats_report().contains("create RA=2 "));

    drop(b);
    let c = netfs.create(IoOrigin::ReadAhead, 0x2000, 0x1000).unwrap();
    assert_eq!(c.debug_id().id(), 3);
}

// --------------------------------------------------------------------
// Stats
//

#[derive(Default)]
struct CountingSink {
    created: AtomicUsize,
    completed: AtomicUsize,
    freed: AtomicUsize,
}

impl StatsSink for CountingSink {
    fn request_created(&self, _origin: IoOrigin) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    fn request_completed(&self, _origin: IoOrigin) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn request_failed(&self, _origin: IoOrigin) {}

    fn request_cancelled(&self, _origin: IoOrigin) {}

    fn request_freed(&self) {
        self.freed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_custom_sink_sees_every_free_once() {
    let sink = Arc::new(CountingSink::default());
    let netfs = Netfs::with_stats_sink(NetfsConfig::default(), sink.clone()).unwrap();

    for i in 0..20u64 {
        let rreq = netfs.create(IoOrigin::Writeback, i * 0x1000, 0x1000).unwrap();
        netfs.register(&rreq).unwrap();
        let extra = rreq.clone();
        netfs.complete_sub_op(&rreq, |_| {});
        drop(extra);
    }

    assert_eq!(sink.created.load(Ordering::SeqCst), 20);
    assert_eq!(sink.completed.load(Ordering::SeqCst), 20);
    assert_eq!(sink.freed.load(Ordering::SeqCst), 20);
    assert_eq!(netfs.stats_report(), "");
}

#[test]
fn test_stats_report() {
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    for origin in [IoOrigin::ReadAhead, IoOrigin::ReadAhead, IoOrigin::DioWrite] {
        let rreq = netfs.create(origin, 0, 0x1000).unwrap();
        netfs.register(&rreq).unwrap();
        netfs.complete_sub_op(&rreq, |_| {});
    }
    let keep = netfs.create(IoOrigin::Writeback, 0, 0x1000).unwrap();
    netfs.register(&keep).unwrap();
    netfs.mark_error(&keep, -5);

    assert_eq!(
        netfs.stats_report(),
        "Netfs  : create RA=2 RP=0 RW=0 WB=1 WT=0 LW=0 UW=0 DR=0 DW=1\n\
         Netfs  : done   RA=2 RP=0 RW=0 WB=0 WT=0 LW=0 UW=0 DR=0 DW=1\n\
         Netfs  : rr=1 fail=1 cancel=0\n"
    );
}

// --------------------------------------------------------------------
// Init / shutdown
//

#[test]
fn test_invalid_config_rejected() {
    let config = NetfsConfig {
        report_page_rows: 0,
        ..NetfsConfig::default()
    };
    assert!(matches!(
        Netfs::init(config),
        Err(NetfsError::InvalidConfig(_))
    ));
}

#[test]
fn test_shutdown_cancels_leftovers() {
    init_logger();
    let netfs = Netfs::init(NetfsConfig::from_json(r#"{"debug_mask": 7}"#).unwrap()).unwrap();
    let reqs: Vec<_> = (0..3)
        .map(|i| {
            let rreq = netfs.create(IoOrigin::ReadPage, i * 0x1000, 0x1000).unwrap();
            netfs.register(&rreq).unwrap();
            rreq
        })
        .collect();
    let done = netfs.create(IoOrigin::ReadPage, 0x8000, 0x1000).unwrap();
    netfs.register(&done).unwrap();
    netfs.complete_sub_op(&done, |_| {});

    assert_eq!(netfs.shutdown(), 3);
    assert!(netfs.is_shut_down());
    assert!(netfs.registry().is_empty());
    for rreq in &reqs {
        assert!(rreq.test_flags(RequestFlags::CANCELLED));
        assert_eq!(rreq.ref_count(), 1);
    }
    assert!(!done.test_flags(RequestFlags::CANCELLED));

    assert_eq!(
        netfs.create(IoOrigin::ReadPage, 0, 0x1000).unwrap_err(),
        NetfsError::ShutDown
    );
    assert_eq!(netfs.shutdown(), 0);
    assert!(netfs.stats_report().contains("cancel=3"));
}

#[test]
fn test_register_after_shutdown_refused() {
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    let early = netfs.create(IoOrigin::Writeback, 0, 0x1000).unwrap();
    assert_eq!(netfs.shutdown(), 0);

    assert_eq!(netfs.register(&early), Err(NetfsError::ShutDown));
    assert_eq!(early.state(), RequestState::Created);
    assert_eq!(early.ref_count(), 1);
    assert!(netfs.registry().is_empty());
    assert!(netfs.registry().is_closed());
}

#[test]
fn test_shutdown_unlinks_completing_request_without_cancelling() {
    let netfs = Netfs::init(NetfsConfig::default()).unwrap();
    let rreq = netfs.create(IoOrigin::ReadPage, 0, 0x1000).unwrap();
    netfs.register(&rreq).unwrap();
    assert!(netfs.sub_op_complete(&rreq));

    assert_eq!(netfs.shutdown(), 1);
    assert!(netfs.registry().is_empty());
    assert!(!rreq.test_flags(RequestFlags::CANCELLED));
    assert_eq!(rreq.error(), 0);
}
