// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn heartbeat_round_trips_through_json() {
    let hb = HeartBeat::worker(1_700_000_000, "inst-w1", "running", "running", 3, Some(1_700_000_001), false, None);
    let packet = Packet::HeartBeat(hb.clone());
    let json = serde_json::to_string(&packet).unwrap();
    assert!(json.contains("\"packet_type\":\"HeartBeat\""));
    let back: Packet = serde_json::from_str(&json).unwrap();
    assert_eq!(back, packet);
}

#[test]
fn worker_heartbeat_omits_dispatcher_only_fields() {
    let hb = HeartBeat::worker(1, "inst-w1", "running", "running", 0, None, false, None);
    let json = serde_json::to_value(&hb).unwrap();
    assert!(json.get("tasks_waiting").is_none());
    assert!(json.get("worker_allocation").is_none());
}

#[test]
fn dispatcher_heartbeat_carries_worker_allocation() {
    let mut allocation = std::collections::HashMap::new();
    allocation.insert("inst-w1".to_string(), 2u32);
    let hb = HeartBeat::dispatcher(1, "inst-d", "running", 1, 2, allocation.clone());
    assert_eq!(hb.worker_allocation, Some(allocation));
    assert_eq!(hb.program_state, None);
}

#[test]
fn controller_reply_round_trips() {
    let hb = HeartBeat::controller_reply(1, vec!["inst-w1".into()], vec!["inst-w2".into()]);
    let json = serde_json::to_string(&hb).unwrap();
    let back: HeartBeat = serde_json::from_str(&json).unwrap();
    assert_eq!(back, hb);
}

#[test]
fn command_kind_serializes_snake_case() {
    let json = serde_json::to_string(&CommandKind::Done).unwrap();
    assert_eq!(json, "\"done\"");
}

#[test]
fn done_command_round_trips_with_all_fields() {
    let cmd = Command::done(5, "inst-w1", "task-xyz", 1, 1, 2, 3);
    let packet = Packet::Command(cmd.clone());
    let json = serde_json::to_string(&packet).unwrap();
    let back: Packet = serde_json::from_str(&json).unwrap();
    assert_eq!(back, packet);
    assert_eq!(cmd.command, CommandKind::Done);
}

#[test]
fn stop_and_kill_commands_carry_no_payload() {
    let json = serde_json::to_value(Command::stop(1)).unwrap();
    assert!(json.get("task").is_none());
    assert!(json.get("argmax").is_none());
}
