//! Typestate for a single background task run (C11), grounded on
//! `ingestion::state`'s use of `state_machines`: a task starts `Running`
//! and can only reach a terminal state once, via `complete` or `fail`.

use state_machines::state_machine;

state_machine! {
    name: TaskMachine,
    state: TaskState,
    initial: Running,
    states: [Running, Complete, Error],
    events {
        complete { transition: { from: Running, to: Complete } }
        fail { transition: { from: Running, to: Error } }
    }
}

pub fn start() -> TaskMachine<(), Running> {
    TaskMachine::new(())
}
