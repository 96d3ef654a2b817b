//! Fleet coordination semantics: the command routing grammar and the
//! single-owner handoff rule, exercised against simulated worker tables.

use flowmill::bus::{self, Command, CommandVerb};
use flowmill::runtime::supervisor::{command_action, CommandAction};
use std::collections::{HashMap, HashSet};

const WID: &str = "3e8c8cc8-7567-4594-a8d0-c38d9f64765e";
const AID: &str = "fe8927e9-a02a-416a-8928-c3a86dae4c61";

/// A fleet of workers, each with its local running-workflow table.
struct Fleet {
    tables: HashMap<&'static str, HashSet<String>>,
}

impl Fleet {
    fn new(workers: &[&'static str]) -> Self {
        Self {
            tables: workers.iter().map(|w| (*w, HashSet::new())).collect(),
        }
    }

    /// Every worker observes the broadcast and applies its action.
    fn observe(&mut self, command: &Command) {
        for (worker, table) in self.tables.iter_mut() {
            match command_action(worker, command) {
                CommandAction::StartLocal => {
                    table.insert(command.workflow_id.clone());
                }
                CommandAction::StopReplica | CommandAction::Stop => {
                    table.remove(&command.workflow_id);
                }
            }
        }
    }

    fn owners(&self, wid: &str) -> Vec<&'static str> {
        let mut owners: Vec<&'static str> = self
            .tables
            .iter()
            .filter(|(_, table)| table.contains(wid))
            .map(|(worker, _)| *worker)
            .collect();
        owners.sort();
        owners
    }
}

fn start_command(target: &str) -> Command {
    bus::parse_command_subject(&bus::command_subject(target, AID, WID, "start"))
        .expect("start command")
}

fn stop_command() -> Command {
    bus::parse_command_subject(&bus::command_subject("", AID, WID, "stop")).expect("stop command")
}

#[test]
fn start_moves_ownership_to_the_target() {
    let mut fleet = Fleet::new(&["w0", "w1", "w2"]);
    fleet.observe(&start_command("w1"));
    assert_eq!(fleet.owners(WID), vec!["w1"]);
}

#[test]
fn handoff_leaves_at_most_one_owner() {
    let mut fleet = Fleet::new(&["w0", "w1", "w2"]);
    fleet.observe(&start_command("w0"));
    assert_eq!(fleet.owners(WID), vec!["w0"]);

    // Live-move: a start naming w2 doubles as the stop signal for w0.
    fleet.observe(&start_command("w2"));
    assert_eq!(fleet.owners(WID), vec!["w2"]);
}

#[test]
fn conflicting_starts_settle_on_the_last_observed_target() {
    let mut fleet = Fleet::new(&["w0", "w1"]);
    fleet.observe(&start_command("w0"));
    fleet.observe(&start_command("w1"));
    assert_eq!(fleet.owners(WID), vec!["w1"]);

    // Reordered delivery: the losing worker stops itself on the next
    // observation of a start naming someone else.
    let mut fleet = Fleet::new(&["w0", "w1"]);
    fleet.observe(&start_command("w1"));
    fleet.observe(&start_command("w0"));
    assert_eq!(fleet.owners(WID), vec!["w0"]);
}

#[test]
fn broadcast_stop_clears_every_worker() {
    let mut fleet = Fleet::new(&["w0", "w1", "w2"]);
    fleet.observe(&start_command("w2"));
    fleet.observe(&stop_command());
    assert!(fleet.owners(WID).is_empty());
}

#[test]
fn stop_of_an_unknown_workflow_is_idempotent() {
    let mut fleet = Fleet::new(&["w0"]);
    fleet.observe(&stop_command());
    fleet.observe(&stop_command());
    assert!(fleet.owners(WID).is_empty());
}

#[test]
fn command_round_trip_preserves_the_routing_grammar() {
    let subject = bus::command_subject("w0", AID, WID, "start");
    assert_eq!(subject, format!("workflow.w0.{AID}.{WID}.start"));

    let command = bus::parse_command_subject(&subject).expect("parse");
    assert_eq!(command.target, "w0");
    assert_eq!(command.account_id, AID);
    assert_eq!(command.workflow_id, WID);
    assert_eq!(command.verb, CommandVerb::Start);
}
