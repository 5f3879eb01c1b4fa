//! Synthetic submission load
//!
//! Each worker behaves like an I/O issuing path: it creates a request,
//! registers it, splits it into sub-operations and completes them out of
//! order, with the occasional failure or cancellation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use netfs::{IoOrigin, Netfs, NetfsError, RefTrace, RequestRef};
use tracing::{debug, warn};

/// Shape of the generated load
#[derive(Debug, Clone, Copy)]
pub struct Workload {
    pub requests: u64,
    pub sub_op_size: u64,
    pub sub_ops: u64,
    pub in_flight: usize,
    pub pause: Duration,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            requests: 200,
            sub_op_size: 0x1000,
            sub_ops: 4,
            in_flight: 6,
            pause: Duration::from_millis(5),
        }
    }
}

/// One request and the sub-operation references it handed out
struct InFlight {
    rreq: RequestRef,
    sub_ops: Vec<RequestRef>,
}

/// Outcome counters of a single worker
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerReport {
    pub completed: u64,
    pub cancelled: u64,
    pub refused: u64,
}

/// Run one worker to completion. Blocking; call from `spawn_blocking`.
pub fn run_worker(netfs: &Arc<Netfs>, worker: usize, load: Workload) -> WorkerReport {
    let origin = IoOrigin::ALL[worker % IoOrigin::COUNT];
    let len = load.sub_op_size * load.sub_ops;
    let mut queue: VecDeque<InFlight> = VecDeque::new();
    let mut report = WorkerReport::default();

    for i in 0..load.requests {
        match issue(netfs, origin, i * len, len, load.sub_ops, load.sub_op_size) {
            Ok(in_flight) => queue.push_back(in_flight),
            Err(NetfsError::NoMemory { limit }) => {
                debug!(worker, limit, "request limit reached, draining");
                report.refused += 1;
                if let Some(oldest) = queue.pop_front() {
                    finish(netfs, oldest, Some(i), &mut report);
                }
            }
            Err(e) => {
                warn!(worker, "cannot issue request: {e}");
                break;
            }
        }

        while queue.len() > load.in_flight {
            let Some(oldest) = queue.pop_front() else {
                break;
            };
            finish(netfs, oldest, Some(i), &mut report);
        }
        std::thread::sleep(load.pause);
    }

    // Drain: leftovers complete normally
    for in_flight in queue {
        finish(netfs, in_flight, None, &mut report);
    }
    report
}

fn issue(
    netfs: &Netfs,
    origin: IoOrigin,
    start: u64,
    len: u64,
    sub_ops: u64,
    sub_op_size: u64,
) -> Result<InFlight, NetfsError> {
    let rreq = netfs.create(origin, start, len)?;
    netfs.register(&rreq)?;

    let mut refs = Vec::new();
    for _ in 0..sub_ops {
        if !netfs.begin_sub_op(&rreq, sub_op_size) {
            break;
        }
        refs.push(rreq.get(RefTrace::GetSubOp));
    }
    // Issuing done, drop the issuer's hold
    if netfs.sub_op_complete(&rreq) {
        netfs.retire(&rreq)?;
    }
    Ok(InFlight {
        rreq,
        sub_ops: refs,
    })
}

/// Complete a request's sub-ops. `seq` picks injected cancels and errors;
/// `None` completes cleanly.
fn finish(netfs: &Netfs, in_flight: InFlight, seq: Option<u64>, report: &mut WorkerReport) {
    let InFlight { rreq, mut sub_ops } = in_flight;

    match seq {
        Some(seq) if seq % 17 == 0 => {
            if netfs.cancel(&rreq).is_ok() {
                report.cancelled += 1;
            }
        }
        Some(seq) if seq % 7 == 0 => {
            netfs.mark_error(&rreq, -5);
        }
        _ => {}
    }

    // Complete in reverse issue order
    while let Some(sub_op) = sub_ops.pop() {
        let done = netfs.complete_sub_op(&sub_op, |r| {
            debug!(debug_id = %r.debug_id(), error = r.error(), "request completed");
        });
        if done {
            report.completed += 1;
        }
        sub_op.put(RefTrace::PutSubOp);
    }
}
