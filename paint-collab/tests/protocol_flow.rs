//! Protocol tests over an in-memory mesh of workers.
//!
//! Packages are pumped between workers by hand, so every exchange is
//! deterministic and the number of packages can be checked.

use bytes::Bytes;

use paint_collab::{
    HistoryWorker, Package, PackageType, PeerChannel, PeerId, ReconcileReport, ResponseRouting,
    WorkerConfig, WorkerError,
};
use paint_core::{
    Command, CommandFactory, CommandKind, CommandMemento, DrawCommand, DrawHistory, Pen, Point,
};
use tokio::sync::mpsc;

struct Link {
    to: usize,
    rx: mpsc::UnboundedReceiver<Bytes>,
    /// Id the receiving worker knows the sender by
    sender_id: PeerId,
}

#[derive(Default)]
struct Mesh {
    workers: Vec<HistoryWorker>,
    links: Vec<Vec<Link>>,
    reports: Vec<(usize, ReconcileReport)>,
    errors: Vec<(usize, WorkerError)>,
    delivered: Vec<PackageType>,
}

impl Mesh {
    fn with(workers: Vec<HistoryWorker>) -> Self {
        let links = workers.iter().map(|_| Vec::new()).collect();
        Self {
            workers,
            links,
            ..Default::default()
        }
    }

    fn connect(&mut self, a: usize, b: usize) -> (PeerId, PeerId) {
        let (a_to_b, rx_ab) = PeerChannel::new(format!("{a}->{b}"));
        let (b_to_a, rx_ba) = PeerChannel::new(format!("{b}->{a}"));
        let ids = (a_to_b.id, b_to_a.id);

        self.links[a].push(Link { to: b, rx: rx_ab, sender_id: b_to_a.id });
        self.links[b].push(Link { to: a, rx: rx_ba, sender_id: a_to_b.id });
        self.workers[a].add_peer(a_to_b);
        self.workers[b].add_peer(b_to_a);
        ids
    }

    /// Deliver packages until every queue is empty.
    fn pump(&mut self) {
        let Mesh { workers, links, reports, errors, delivered } = self;
        loop {
            let mut moved = 0;
            for source in links.iter_mut() {
                for link in source.iter_mut() {
                    while let Ok(bytes) = link.rx.try_recv() {
                        let package = Package::decode(&bytes).unwrap();
                        delivered.push(package.package_type);
                        match workers[link.to].handle_package(&link.sender_id, &package) {
                            Ok(Some(report)) => reports.push((link.to, report)),
                            Ok(None) => {}
                            Err(e) => errors.push((link.to, e)),
                        }
                        moved += 1;
                    }
                }
            }
            for worker in workers.iter_mut() {
                moved += worker.drain_changes().unwrap();
            }
            if moved == 0 {
                break;
            }
            assert!(delivered.len() < 1_000, "protocol did not settle");
        }
    }

    fn xs(&self, index: usize) -> Vec<i32> {
        applied_xs(&self.workers[index])
    }

    fn assert_converged(&self, a: usize, b: usize) {
        let (wa, wb) = (&self.workers[a], &self.workers[b]);
        assert_eq!(wa.hash().total_hash(), wb.hash().total_hash());
        assert_eq!(wa.history().applied_mementos(0), wb.history().applied_mementos(0));
    }
}

fn line(x: i32) -> Box<DrawCommand> {
    Box::new(DrawCommand::line(Pen::default(), Point::new(x, 0), Point::new(x, 10)))
}

fn worker(xs: &[i32]) -> HistoryWorker {
    worker_with_config(xs, WorkerConfig::default())
}

fn worker_with_config(xs: &[i32], config: WorkerConfig) -> HistoryWorker {
    let mut worker = HistoryWorker::new(config);
    for &x in xs {
        worker.history_mut().add(line(x));
    }
    // No peers yet, nothing goes out
    worker.drain_changes().unwrap();
    worker
}

fn applied_xs(worker: &HistoryWorker) -> Vec<i32> {
    worker.history().applied().map(|c| c.memento().points[0].x).collect()
}

#[test]
fn test_missing_suffix_is_pulled() {
    let mut mesh = Mesh::with(vec![worker(&[1, 2, 3]), worker(&[1, 2])]);
    mesh.connect(0, 1);

    mesh.workers[0].update().unwrap();
    mesh.pump();

    assert_eq!(mesh.xs(1), vec![1, 2, 3]);
    mesh.assert_converged(0, 1);

    let (at, report) = &mesh.reports[0];
    assert_eq!(*at, 1);
    assert_eq!(report.from_position, 2);
    assert_eq!(report.popped, 0);
    assert_eq!(report.applied, 1);
    assert_eq!(
        mesh.delivered,
        vec![
            PackageType::HistoryHashUpdate,
            PackageType::CommandHashesRequest,
            PackageType::CommandHashesResponse,
            PackageType::CommandsRequest,
            PackageType::CommandsResponse,
        ]
    );
}

#[test]
fn test_receiver_adopts_broadcaster_log() {
    let mut mesh = Mesh::with(vec![worker(&[1, 2, 3]), worker(&[1, 2])]);
    mesh.connect(0, 1);

    // The shorter side announces: the longer side truncates
    mesh.workers[1].update().unwrap();
    mesh.pump();

    assert_eq!(mesh.xs(0), vec![1, 2]);
    mesh.assert_converged(0, 1);
}

#[test]
fn test_divergent_middle_is_replaced() {
    let mut mesh = Mesh::with(vec![worker(&[1, 2, 3]), worker(&[1, 9])]);
    mesh.connect(0, 1);

    mesh.workers[0].update().unwrap();
    mesh.pump();

    assert_eq!(mesh.xs(1), vec![1, 2, 3]);
    assert_eq!(mesh.reports[0].1.popped, 1);
    assert_eq!(mesh.workers[1].history().canvas().len(), 3);
    mesh.assert_converged(0, 1);
}

#[test]
fn test_new_peer_bootstraps_from_start_synchronization() {
    let mut mesh = Mesh::with(vec![worker(&[4, 5]), worker(&[])]);
    let (to_new_peer, _) = mesh.connect(0, 1);

    mesh.workers[0].start_synchronization(&to_new_peer).unwrap();
    mesh.pump();

    assert_eq!(mesh.xs(1), vec![4, 5]);
    assert_eq!(mesh.reports[0].1.from_position, 0);
    mesh.assert_converged(0, 1);
}

#[test]
fn test_identical_logs_exchange_one_package() {
    let mut mesh = Mesh::with(vec![worker(&[1, 2]), worker(&[1, 2])]);
    mesh.connect(0, 1);

    mesh.workers[0].update().unwrap();
    mesh.pump();

    assert_eq!(mesh.delivered, vec![PackageType::HistoryHashUpdate]);
    assert!(mesh.reports.is_empty());
}

#[test]
fn test_local_edit_propagates() {
    let mut mesh = Mesh::with(vec![worker(&[1]), worker(&[1])]);
    mesh.connect(0, 1);

    mesh.workers[1].history_mut().add(line(2));
    mesh.pump();

    assert_eq!(mesh.xs(0), vec![1, 2]);
    mesh.assert_converged(0, 1);
}

#[test]
fn test_undo_propagates_and_redo_tail_stays_local() {
    let mut mesh = Mesh::with(vec![worker(&[1, 2, 3]), worker(&[1, 2, 3])]);
    mesh.connect(0, 1);

    mesh.workers[0].history_mut().undo();
    mesh.pump();

    assert_eq!(mesh.xs(1), vec![1, 2]);
    // The peer's log is rewritten, not undone: it has no redo tail
    assert_eq!(mesh.workers[1].history().len(), 2);
    assert_eq!(mesh.workers[0].history().len(), 3);
    assert!(mesh.workers[0].history().can_redo());
    mesh.assert_converged(0, 1);
}

#[test]
fn test_reconcile_does_not_echo() {
    let mut mesh = Mesh::with(vec![worker(&[1, 2, 3]), worker(&[])]);
    mesh.connect(0, 1);

    mesh.workers[0].update().unwrap();
    mesh.pump();

    // The receiver never announces its rewritten log
    let hash_updates = mesh
        .delivered
        .iter()
        .filter(|t| **t == PackageType::HistoryHashUpdate)
        .count();
    assert_eq!(hash_updates, 1);
    assert!(!mesh.workers[1].history().is_silenced());
}

#[test]
fn test_three_peers_converge_with_unicast_routing() {
    let config = WorkerConfig {
        routing: ResponseRouting::Unicast,
    };
    let mut mesh = Mesh::with(vec![
        worker_with_config(&[1], config.clone()),
        worker_with_config(&[1], config.clone()),
        worker_with_config(&[1], config),
    ]);
    mesh.connect(0, 1);
    mesh.connect(0, 2);
    mesh.connect(1, 2);

    mesh.workers[0].history_mut().add(line(2));
    mesh.pump();

    assert!(mesh.errors.is_empty(), "unexpected errors: {:?}", mesh.errors);
    mesh.assert_converged(0, 1);
    mesh.assert_converged(0, 2);
    assert_eq!(mesh.xs(2), vec![1, 2]);
}

#[test]
fn test_broadcast_responses_reach_bystanders() {
    // Two peers behind one hub: the hub's answers go to both
    let mut mesh = Mesh::with(vec![worker(&[1, 2]), worker(&[1, 2]), worker(&[1])]);
    mesh.connect(0, 1);
    mesh.connect(0, 2);

    mesh.workers[0].update().unwrap();
    mesh.pump();

    assert_eq!(mesh.xs(2), vec![1, 2]);
    mesh.assert_converged(0, 1);
    mesh.assert_converged(0, 2);
    // Peer 1 was already in sync but still rewrote its tail from the
    // commands response meant for peer 2
    assert!(mesh.reports.iter().any(|(at, _)| *at == 1));
    assert!(mesh.reports.iter().any(|(at, _)| *at == 2));
    assert_eq!(mesh.workers[1].history().canvas().len(), 2);
}

fn concurrent_edits_settle(config: WorkerConfig) {
    let mut mesh = Mesh::with(vec![
        worker_with_config(&[1], config.clone()),
        worker_with_config(&[1], config),
    ]);
    mesh.connect(0, 1);

    // Both draw before hearing from the other
    mesh.workers[0].history_mut().add(line(2));
    mesh.workers[1].history_mut().add(line(3));
    mesh.pump();

    assert!(mesh.errors.is_empty(), "unexpected errors: {:?}", mesh.errors);
    mesh.assert_converged(0, 1);

    // The log with the lower total hash wins
    let (with_2, with_3) = (worker(&[1, 2]), worker(&[1, 3]));
    let expected = if with_2.hash().total_hash() < with_3.hash().total_hash() {
        vec![1, 2]
    } else {
        vec![1, 3]
    };
    assert_eq!(mesh.xs(0), expected);

    // Both sides first swapped logs, then one side overwrote its log again
    assert!(mesh.reports.iter().filter(|(_, r)| r.popped == 1).count() >= 3);
}

#[test]
fn test_concurrent_edits_converge() {
    concurrent_edits_settle(WorkerConfig::default());
}

#[test]
fn test_concurrent_edits_converge_with_unicast_routing() {
    concurrent_edits_settle(WorkerConfig {
        routing: ResponseRouting::Unicast,
    });
}

#[test]
fn test_update_realigns_diverged_peers() {
    let mut mesh = Mesh::with(vec![worker(&[1, 2]), worker(&[1, 3])]);
    mesh.connect(0, 1);

    mesh.workers[1].update().unwrap();
    mesh.pump();

    mesh.assert_converged(0, 1);
    assert_eq!(mesh.xs(0), vec![1, 3]);
}

#[test]
fn test_unknown_kind_is_reported_not_applied() {
    let freehand = DrawCommand::freehand(Pen::default(), vec![Point::new(0, 0), Point::new(1, 1)]);

    let mut sender = worker(&[1]);
    sender.history_mut().add(Box::new(freehand));
    sender.history_mut().add(line(3));
    sender.drain_changes().unwrap();

    let mut factory = CommandFactory::empty();
    factory.register(CommandKind::Line.tag(), || Box::new(DrawCommand::new(CommandKind::Line)));
    let receiver = HistoryWorker::with_history(DrawHistory::new(), factory, WorkerConfig::default());

    let mut mesh = Mesh::with(vec![sender, receiver]);
    mesh.connect(0, 1);
    mesh.workers[0].update().unwrap();
    mesh.pump();

    let report = &mesh.reports[0].1;
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].position, 1);
    assert_eq!(mesh.xs(1), vec![1]);
    assert_ne!(
        mesh.workers[0].hash().total_hash(),
        mesh.workers[1].hash().total_hash()
    );
}

#[test]
fn test_mementos_survive_the_wire() {
    let ellipse = CommandMemento::shape(
        CommandKind::Ellipse,
        Pen::new([12, 34, 56, 78], 5),
        Point::new(-3, -4),
        Point::new(30, 40),
    );
    let mut sender = worker(&[]);
    let command = sender.factory().from_memento(&ellipse).unwrap();
    sender.history_mut().add(command);
    sender.drain_changes().unwrap();

    let mut mesh = Mesh::with(vec![sender, worker(&[])]);
    mesh.connect(0, 1);
    mesh.workers[0].update().unwrap();
    mesh.pump();

    assert_eq!(mesh.workers[1].history().applied_mementos(0), vec![ellipse]);
}
