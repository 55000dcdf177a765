// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cf_storage::FakeObjectStore;

async fn new_dispatcher() -> Dispatcher<FakeObjectStore> {
    let store = Arc::new(FakeObjectStore::new());
    store.ensure_bucket("acct1-files").await.unwrap();
    Dispatcher::new(store, "acct1-files")
}

#[tokio::test]
async fn submit_task_uploads_payload_and_enqueues() {
    let mut d = new_dispatcher().await;
    let id = d.submit_task(b"some comment text").await.unwrap();
    assert_eq!(d.waiting_len(), 1);
    assert_eq!(d.known_task_count(), 1);
    assert!(!id.as_str().is_empty());
}

#[tokio::test]
async fn distribute_spreads_tasks_to_least_loaded_worker() {
    let mut d = new_dispatcher().await;
    let w1 = InstanceId::new();
    let w2 = InstanceId::new();
    d.reconcile_roster(&[w1.clone(), w2.clone()], &[]);
    for _ in 0..4 {
        d.submit_task(b"x").await.unwrap();
    }
    d.distribute();
    let max = d.assigned_len(&w1).max(d.assigned_len(&w2));
    let min = d.assigned_len(&w1).min(d.assigned_len(&w2));
    assert!(max - min <= 1);
    assert_eq!(d.assigned_len(&w1) + d.assigned_len(&w2), 4);
}

#[tokio::test]
async fn heartbeat_stages_next_assigned_task_into_processing() {
    let mut d = new_dispatcher().await;
    let w1 = InstanceId::new();
    d.reconcile_roster(&[w1.clone()], &[]);
    let task = d.submit_task(b"x").await.unwrap();
    d.distribute();
    assert_eq!(d.processing(&w1), None);
    let reply = d.on_worker_heartbeat(&w1);
    assert_eq!(reply, DispatcherReply::Task(task.clone()));
    assert_eq!(d.processing(&w1), Some(task));
}

#[tokio::test]
async fn heartbeat_with_nothing_staged_is_an_ack() {
    let mut d = new_dispatcher().await;
    let w1 = InstanceId::new();
    d.reconcile_roster(&[w1.clone()], &[]);
    assert_eq!(d.on_worker_heartbeat(&w1), DispatcherReply::Ack);
}

#[tokio::test]
async fn unknown_worker_heartbeat_is_an_ack() {
    let mut d = new_dispatcher().await;
    assert_eq!(d.on_worker_heartbeat(&InstanceId::new()), DispatcherReply::Ack);
}

#[tokio::test]
async fn done_dispatches_next_assigned_task_before_stealing() {
    let mut d = new_dispatcher().await;
    let w1 = InstanceId::new();
    d.reconcile_roster(&[w1.clone()], &[]);
    for _ in 0..2 {
        d.submit_task(b"x").await.unwrap();
    }
    d.distribute();
    let first = d.on_worker_heartbeat(&w1);
    let DispatcherReply::Task(first_id) = first else { panic!("expected a task") };
    let reply = d.on_worker_done(&w1, &first_id);
    assert!(matches!(reply, DispatcherReply::Task(_)));
}

#[tokio::test]
async fn steal_pulls_from_the_busiest_peers_tail_when_idle_worker_is_empty() {
    // S6: assigned[w1]=[T1,T2,T3], assigned[w2]=[]. w2 reports done on an
    // empty queue; D pops T3 (the tail) from w1 and gives it to w2.
    let mut d = new_dispatcher().await;
    let w1 = InstanceId::new();
    let w2 = InstanceId::new();
    d.reconcile_roster(&[w1.clone(), w2.clone()], &[]);

    let t1 = d.submit_task(b"t1").await.unwrap();
    let t2 = d.submit_task(b"t2").await.unwrap();
    let t3 = d.submit_task(b"t3").await.unwrap();
    d.force_assign(&w1, t1);
    d.force_assign(&w1, t2);
    d.force_assign(&w1, t3.clone());
    assert_eq!(d.assigned_len(&w1), 3);
    assert_eq!(d.assigned_len(&w2), 0);

    let dummy = TaskId::new();
    let reply = d.on_worker_done(&w2, &dummy);
    assert_eq!(reply, DispatcherReply::Task(t3));
    assert_eq!(d.assigned_len(&w1), 2);
    assert_eq!(d.processing(&w2), Some(reply_task(&reply)));
}

fn reply_task(reply: &DispatcherReply) -> TaskId {
    match reply {
        DispatcherReply::Task(id) => id.clone(),
        DispatcherReply::Ack => panic!("expected a task"),
    }
}

#[tokio::test]
async fn steal_does_not_fire_when_the_busiest_peer_has_fewer_than_two_assigned() {
    let mut d = new_dispatcher().await;
    let w1 = InstanceId::new();
    let w2 = InstanceId::new();
    d.reconcile_roster(&[w1.clone(), w2.clone()], &[]);

    let t1 = d.submit_task(b"t1").await.unwrap();
    d.force_assign(&w1, t1);

    let dummy = TaskId::new();
    let reply = d.on_worker_done(&w2, &dummy);
    assert_eq!(reply, DispatcherReply::Ack);
    assert_eq!(d.assigned_len(&w1), 1);
}

#[tokio::test]
async fn reconcile_reclaims_tasks_from_a_departed_worker() {
    let mut d = new_dispatcher().await;
    let w1 = InstanceId::new();
    d.reconcile_roster(&[w1.clone()], &[]);
    for _ in 0..3 {
        d.submit_task(b"x").await.unwrap();
    }
    d.distribute();
    assert_eq!(d.waiting_len(), 0);

    d.reconcile_roster(&[], &[]);
    assert_eq!(d.waiting_len(), 3);
}

#[tokio::test]
async fn reconcile_also_reclaims_a_processing_task() {
    let mut d = new_dispatcher().await;
    let w1 = InstanceId::new();
    d.reconcile_roster(&[w1.clone()], &[]);
    d.submit_task(b"x").await.unwrap();
    d.distribute();
    d.on_worker_heartbeat(&w1);
    assert!(d.processing(&w1).is_some());

    d.reconcile_roster(&[], &[]);
    assert_eq!(d.waiting_len(), 1);
}

#[tokio::test]
async fn task_conservation_holds_across_submit_distribute_and_done() {
    let mut d = new_dispatcher().await;
    let w1 = InstanceId::new();
    d.reconcile_roster(&[w1.clone()], &[]);
    for _ in 0..5 {
        d.submit_task(b"x").await.unwrap();
    }
    d.distribute();

    let mut completed = 0;
    let mut current = match d.on_worker_heartbeat(&w1) {
        DispatcherReply::Task(t) => Some(t),
        DispatcherReply::Ack => None,
    };
    while let Some(t) = current {
        completed += 1;
        current = match d.on_worker_done(&w1, &t) {
            DispatcherReply::Task(next) => Some(next),
            DispatcherReply::Ack => None,
        };
    }
    assert_eq!(completed, 5);
    assert_eq!(d.waiting_len(), 0);
    assert_eq!(d.known_task_count(), 0);
}
